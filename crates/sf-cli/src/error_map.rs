use sf_core::StoryForgeError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> StoryForgeError {
    StoryForgeError::new(code, error.to_string())
}

pub(crate) fn json_line(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text.escape_default()))
}

pub(crate) fn emit_error(error: StoryForgeError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!("ERROR_MSG_JSON:{}", json_line(&error.message));
    1
}

pub(crate) fn map_cli_io(error: std::io::Error) -> StoryForgeError {
    map_error("CLI_IO", error)
}

pub(crate) fn map_cli_source_read(error: std::io::Error) -> StoryForgeError {
    map_error("CLI_SOURCE_READ", error)
}

pub(crate) fn map_cli_source_invalid(error: serde_json::Error) -> StoryForgeError {
    map_error("CLI_SOURCE_INVALID", error)
}

pub(crate) fn map_cli_source_scan(error: walkdir::Error) -> StoryForgeError {
    map_error("CLI_SOURCE_SCAN", error)
}

pub(crate) fn map_cli_output_write(error: std::io::Error) -> StoryForgeError {
    map_error("CLI_OUTPUT_WRITE", error)
}

pub(crate) fn map_cli_config_read(error: std::io::Error) -> StoryForgeError {
    map_error("CLI_CONFIG_READ", error)
}

pub(crate) fn map_cli_config_invalid(error: toml::de::Error) -> StoryForgeError {
    map_error("CLI_CONFIG_INVALID", error)
}
