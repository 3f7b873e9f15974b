use std::fs;
use std::path::{Path, PathBuf};

use sf_core::{StoryDocument, StoryForgeError};
use walkdir::WalkDir;

use crate::{map_cli_output_write, map_cli_source_invalid, map_cli_source_read, map_cli_source_scan};

pub(crate) const STORY_SUFFIX: &str = ".story.json";

pub(crate) fn load_story_document(path: &Path) -> Result<StoryDocument, StoryForgeError> {
    if !path.is_file() {
        return Err(StoryForgeError::new(
            "CLI_SOURCE_NOT_FOUND",
            format!("Story file does not exist: {}", path.display()),
        ));
    }
    let raw = fs::read_to_string(path).map_err(map_cli_source_read)?;
    serde_json::from_str(&raw).map_err(map_cli_source_invalid)
}

pub(crate) fn read_bundle_bytes(path: &Path) -> Result<Vec<u8>, StoryForgeError> {
    if !path.is_file() {
        return Err(StoryForgeError::new(
            "CLI_BUNDLE_NOT_FOUND",
            format!("Bundle file does not exist: {}", path.display()),
        ));
    }
    fs::read(path).map_err(map_cli_source_read)
}

pub(crate) fn write_output(path: &Path, bytes: &[u8]) -> Result<(), StoryForgeError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(map_cli_output_write)?;
    fs::write(path, bytes).map_err(map_cli_output_write)
}

/// `*.story.json` files under `root`, sorted by path.
pub(crate) fn find_story_files(root: &Path) -> Result<Vec<PathBuf>, StoryForgeError> {
    if !root.is_dir() {
        return Err(StoryForgeError::new(
            "CLI_SOURCE_NOT_DIR",
            format!("Stories path is not a directory: {}", root.display()),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(map_cli_source_scan)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_story = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(STORY_SUFFIX));
        if is_story {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// `cave.story.json` becomes `cave`.
pub(crate) fn story_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.strip_suffix(STORY_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "story".to_string()),
    }
}
