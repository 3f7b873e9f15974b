use std::ffi::OsString;

use clap::Parser;
use sf_core::StoryForgeError;
use tracing_subscriber::EnvFilter;

mod cli_args;
mod commands;
mod config;
mod error_map;
mod line_play;
mod source_loader;

pub(crate) use cli_args::{
    Cli, CompileArgs, CompileDirArgs, ExportArgs, Mode, PlayArgs, ValidateArgs,
};
pub(crate) use config::load_config;
#[cfg(test)]
pub(crate) use config::{parse_config, CliConfig};
pub(crate) use error_map::{
    emit_error, json_line, map_cli_config_invalid, map_cli_config_read, map_cli_io,
    map_cli_output_write, map_cli_source_invalid, map_cli_source_read, map_cli_source_scan,
};
pub(crate) use source_loader::{
    find_story_files, load_story_document, read_bundle_bytes, story_stem, write_output,
    STORY_SUFFIX,
};

/// Logs go to stderr so stdout stays a clean result protocol. `RUST_LOG` overrides `warn`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, StoryForgeError> {
    match cli.command {
        Mode::Compile(args) => commands::run_compile(args),
        Mode::CompileDir(args) => commands::run_compile_dir(args),
        Mode::Validate(args) => commands::run_validate(args),
        Mode::Export(args) => commands::run_export(args),
        Mode::Play(args) => line_play::run_play(args),
    }
}

#[cfg(test)]
mod tests;
