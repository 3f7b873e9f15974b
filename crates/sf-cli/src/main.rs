fn main() {
    sf_cli::init_logging();
    std::process::exit(sf_cli::run_cli_from_args(std::env::args_os()));
}
