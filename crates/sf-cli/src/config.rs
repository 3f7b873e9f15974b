use std::fs;
use std::path::Path;

use serde::Deserialize;
use sf_compiler::CompileOptions;
use sf_core::StoryForgeError;
use sf_runtime::{LoaderOptions, SandboxLimits};

use crate::{map_cli_config_invalid, map_cli_config_read};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "storyforge.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub(crate) struct CliConfig {
    pub(crate) compile: CompileOptions,
    pub(crate) loader: LoaderOptions,
    pub(crate) sandbox: SandboxLimits,
}

pub(crate) fn parse_config(raw: &str) -> Result<CliConfig, StoryForgeError> {
    toml::from_str(raw).map_err(map_cli_config_invalid)
}

/// An explicit path must exist; otherwise `storyforge.toml` in the working
/// directory is used when present.
pub(crate) fn load_config(path: Option<&str>) -> Result<CliConfig, StoryForgeError> {
    let path = match path {
        Some(path) => {
            let path = Path::new(path);
            if !path.is_file() {
                return Err(StoryForgeError::new(
                    "CLI_CONFIG_NOT_FOUND",
                    format!("Config file does not exist: {}", path.display()),
                ));
            }
            path.to_path_buf()
        }
        None => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if !path.is_file() {
                return Ok(CliConfig::default());
            }
            path.to_path_buf()
        }
    };

    let raw = fs::read_to_string(&path).map_err(map_cli_config_read)?;
    let config = parse_config(&raw)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}
