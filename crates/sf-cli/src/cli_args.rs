use clap::{Args, Parser, Subcommand, ValueEnum};
use sf_compiler::TargetFormat;
use sf_export::ExportFormat;

#[derive(Debug, Parser)]
#[command(name = "storyforge")]
#[command(about = "Compile, validate, export and play branching stories")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Compile(CompileArgs),
    CompileDir(CompileDirArgs),
    Validate(ValidateArgs),
    Export(ExportArgs),
    Play(PlayArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum BundleFormatArg {
    Wasm,
    Json,
    Binary,
}

impl From<BundleFormatArg> for TargetFormat {
    fn from(value: BundleFormatArg) -> Self {
        match value {
            BundleFormatArg::Wasm => TargetFormat::Wasm,
            BundleFormatArg::Json => TargetFormat::Json,
            BundleFormatArg::Binary => TargetFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum ExportFormatArg {
    Html,
    Json,
    Binary,
    Wasm,
    Markdown,
}

impl ExportFormatArg {
    /// `None` for the Markdown outline, which is not a bundle artifact.
    pub(crate) fn bundle_format(self) -> Option<ExportFormat> {
        match self {
            Self::Html => Some(ExportFormat::Html),
            Self::Json => Some(ExportFormat::Json),
            Self::Binary => Some(ExportFormat::Binary),
            Self::Wasm => Some(ExportFormat::Wasm),
            Self::Markdown => None,
        }
    }
}

#[derive(Debug, Args)]
pub(crate) struct CompileArgs {
    #[arg(long = "story")]
    pub(crate) story: String,
    #[arg(long = "out")]
    pub(crate) out: String,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
    #[arg(long = "format", value_enum)]
    pub(crate) format: Option<BundleFormatArg>,
}

#[derive(Debug, Args)]
pub(crate) struct CompileDirArgs {
    #[arg(long = "stories-dir")]
    pub(crate) stories_dir: String,
    #[arg(long = "out-dir")]
    pub(crate) out_dir: String,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
}

#[derive(Debug, Args)]
pub(crate) struct ValidateArgs {
    #[arg(long = "bundle")]
    pub(crate) bundle: String,
}

#[derive(Debug, Args)]
pub(crate) struct ExportArgs {
    #[arg(long = "story")]
    pub(crate) story: String,
    #[arg(long = "format", value_enum, default_value = "html")]
    pub(crate) format: ExportFormatArg,
    #[arg(long = "out")]
    pub(crate) out: String,
    #[arg(long = "title")]
    pub(crate) title: Option<String>,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
}

#[derive(Debug, Args)]
pub(crate) struct PlayArgs {
    #[arg(long = "bundle")]
    pub(crate) bundle: String,
    #[arg(long = "state-dir")]
    pub(crate) state_dir: Option<String>,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
    /// Continue from the auto-save instead of starting over.
    #[arg(long = "resume")]
    pub(crate) resume: bool,
}
