mod html;
mod markdown;

use serde::{Deserialize, Serialize};
use sf_compiler::CompileResult;
use sf_core::envelope::{encode_envelope, is_envelope};
use sf_core::{map_json, Bundle, StoryForgeError};

pub use html::{escape_html, render_player_html};
pub use markdown::generate_story_markdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Html,
    Json,
    Binary,
    Wasm,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Json => "json",
            Self::Binary => "bin",
            Self::Wasm => "wasm",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::Binary => "application/octet-stream",
            Self::Wasm => "application/wasm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Page title for HTML; defaults to the story name.
    pub title: Option<String>,
    /// File name without extension; defaults to a slug of the story name.
    pub file_stem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "story".to_string()
    } else {
        slug
    }
}

fn envelope_bytes(result: &CompileResult, bundle: &Bundle) -> Result<Vec<u8>, StoryForgeError> {
    if let Some(bytes) = result.bytes.as_ref().filter(|bytes| is_envelope(bytes)) {
        return Ok(bytes.clone());
    }
    let json = serde_json::to_string(bundle).map_err(map_json)?;
    Ok(encode_envelope(&json, true)?.bytes)
}

fn render(
    result: &CompileResult,
    bundle: &Bundle,
    options: &ExportOptions,
) -> Result<Vec<u8>, StoryForgeError> {
    match options.format {
        ExportFormat::Html => {
            let title = options.title.as_deref().unwrap_or(&bundle.metadata.name);
            Ok(render_player_html(bundle, title)?.into_bytes())
        }
        ExportFormat::Json => serde_json::to_vec_pretty(bundle).map_err(map_json),
        ExportFormat::Binary | ExportFormat::Wasm => envelope_bytes(result, bundle),
    }
}

/// Packages a successful compile as a downloadable artifact.
///
/// Returns `None` when the compile failed or the artifact cannot be rendered.
pub fn export_bundle(result: &CompileResult, options: &ExportOptions) -> Option<ExportArtifact> {
    if !result.success {
        return None;
    }
    let bundle = result.bundle.as_ref()?;
    let bytes = match render(result, bundle, options) {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(code = %error.code, "export failed: {}", error.message);
            return None;
        }
    };
    let stem = options
        .file_stem
        .clone()
        .unwrap_or_else(|| slugify(&bundle.metadata.name));
    let artifact = ExportArtifact {
        file_name: format!("{}.{}", stem, options.format.extension()),
        content_type: options.format.content_type(),
        bytes,
    };
    tracing::info!(
        file_name = %artifact.file_name,
        size = artifact.size(),
        "exported bundle"
    );
    Some(artifact)
}
