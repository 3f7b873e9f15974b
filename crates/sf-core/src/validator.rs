use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bundle::{Bundle, BUNDLE_VERSION, SUPPORTED_BUNDLE_VERSIONS};
use crate::checksum::{canonical_json, verify_value};
use crate::envelope::decode_envelope;

/// Canonical JSON size above which a bundle is flagged as large.
pub const RECOMMENDED_BUNDLE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleErrorCode {
    ParseError,
    CorruptData,
    MissingVersion,
    UnsupportedVersion,
    MissingMetadata,
    MissingData,
    MissingStack,
    SchemaInvalid,
    EmptyCards,
    InvalidNavigation,
    NoEntryPoint,
    ChecksumMismatch,
    LoadCancelled,
    OrphanedCards,
    DeadEndCards,
    LargeBundle,
    OldVersion,
}

impl BundleErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::CorruptData => "CORRUPT_DATA",
            Self::MissingVersion => "MISSING_VERSION",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::MissingMetadata => "MISSING_METADATA",
            Self::MissingData => "MISSING_DATA",
            Self::MissingStack => "MISSING_STACK",
            Self::SchemaInvalid => "SCHEMA_INVALID",
            Self::EmptyCards => "EMPTY_CARDS",
            Self::InvalidNavigation => "INVALID_NAVIGATION",
            Self::NoEntryPoint => "NO_ENTRY_POINT",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::LoadCancelled => "LOAD_CANCELLED",
            Self::OrphanedCards => "ORPHANED_CARDS",
            Self::DeadEndCards => "DEAD_END_CARDS",
            Self::LargeBundle => "LARGE_BUNDLE",
            Self::OldVersion => "OLD_VERSION",
        }
    }

    /// Only a checksum mismatch may be a transient transfer corruption.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ChecksumMismatch)
    }

    pub fn is_warning(self) -> bool {
        matches!(
            self,
            Self::OrphanedCards | Self::DeadEndCards | Self::LargeBundle | Self::OldVersion
        )
    }
}

impl fmt::Display for BundleErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleIssue {
    pub code: BundleErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl BundleIssue {
    pub fn new(code: BundleErrorCode, details: impl Into<String>) -> Self {
        Self {
            code,
            message: describe(code).message.to_string(),
            details: Some(details.into()),
        }
    }

    pub fn suggestion(&self) -> &'static str {
        describe(self.code).suggestion
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueDescription {
    pub message: &'static str,
    pub suggestion: &'static str,
}

pub fn describe(code: BundleErrorCode) -> IssueDescription {
    let (message, suggestion) = match code {
        BundleErrorCode::ParseError => (
            "The story file could not be read.",
            "Download or export the story again.",
        ),
        BundleErrorCode::CorruptData => (
            "The story data is corrupted.",
            "Re-export the story from the editor.",
        ),
        BundleErrorCode::MissingVersion => (
            "The story file has no format version.",
            "Recompile the story with a current editor.",
        ),
        BundleErrorCode::UnsupportedVersion => (
            "This story was made with an unsupported format version.",
            "Update the player or recompile the story.",
        ),
        BundleErrorCode::MissingMetadata => (
            "The story is missing its title information.",
            "Recompile the story.",
        ),
        BundleErrorCode::MissingData => (
            "The story contains no playable data.",
            "Recompile the story.",
        ),
        BundleErrorCode::MissingStack => (
            "The story definition is missing.",
            "Recompile the story.",
        ),
        BundleErrorCode::SchemaInvalid => (
            "The story data has an unexpected structure.",
            "Recompile the story with a current editor.",
        ),
        BundleErrorCode::EmptyCards => (
            "The story has no cards.",
            "Add at least one card and compile again.",
        ),
        BundleErrorCode::InvalidNavigation => (
            "The story's navigation data is invalid.",
            "Recompile the story.",
        ),
        BundleErrorCode::NoEntryPoint => (
            "The story has no starting card.",
            "Choose a first card in the editor and compile again.",
        ),
        BundleErrorCode::ChecksumMismatch => (
            "The story file failed its integrity check.",
            "Try loading again; if it keeps failing, download the story again.",
        ),
        BundleErrorCode::LoadCancelled => (
            "Loading was cancelled.",
            "Start loading again when ready.",
        ),
        BundleErrorCode::OrphanedCards => (
            "Some cards cannot be reached from the start.",
            "Link the unreachable cards with choices or remove them.",
        ),
        BundleErrorCode::DeadEndCards => (
            "Some cards have no choices and end the story.",
            "Confirm these endings are intentional.",
        ),
        BundleErrorCode::LargeBundle => (
            "The story file is larger than recommended.",
            "Reduce embedded images or enable compression.",
        ),
        BundleErrorCode::OldVersion => (
            "The story uses an older format version.",
            "Recompile to use the latest format.",
        ),
    };
    IssueDescription {
        message,
        suggestion,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<BundleIssue>,
    pub warnings: Vec<BundleIssue>,
    pub bundle: Option<Bundle>,
}

impl ValidationResult {
    fn failed(issue: BundleIssue) -> Self {
        Self {
            is_valid: false,
            errors: vec![issue],
            warnings: Vec::new(),
            bundle: None,
        }
    }

    pub fn first_error_code(&self) -> Option<BundleErrorCode> {
        self.errors.first().map(|issue| issue.code)
    }
}

/// Phase one: structural checks that do not trust the checksum.
pub fn validate_schema(value: &Value) -> Result<Bundle, BundleIssue> {
    let Some(root) = value.as_object() else {
        return Err(BundleIssue::new(
            BundleErrorCode::CorruptData,
            "Bundle root is not an object.",
        ));
    };

    let version = match root.get("version") {
        None | Some(Value::Null) => {
            return Err(BundleIssue::new(
                BundleErrorCode::MissingVersion,
                "Field \"version\" is missing.",
            ))
        }
        Some(Value::String(version)) => version.as_str(),
        Some(_) => {
            return Err(BundleIssue::new(
                BundleErrorCode::SchemaInvalid,
                "Field \"version\" must be a string.",
            ))
        }
    };
    if !SUPPORTED_BUNDLE_VERSIONS.contains(&version) {
        return Err(BundleIssue::new(
            BundleErrorCode::UnsupportedVersion,
            format!(
                "Version \"{}\" is not one of {}.",
                version,
                SUPPORTED_BUNDLE_VERSIONS.join(", ")
            ),
        ));
    }

    let metadata_ok = root
        .get("metadata")
        .and_then(Value::as_object)
        .map(|metadata| metadata.contains_key("id") && metadata.contains_key("name"))
        .unwrap_or(false);
    if !metadata_ok {
        return Err(BundleIssue::new(
            BundleErrorCode::MissingMetadata,
            "Field \"metadata\" must be an object with \"id\" and \"name\".",
        ));
    }

    let Some(data) = root.get("data").and_then(Value::as_object) else {
        return Err(BundleIssue::new(
            BundleErrorCode::MissingData,
            "Field \"data\" is missing or not an object.",
        ));
    };

    if !data.get("stack").map(Value::is_object).unwrap_or(false) {
        return Err(BundleIssue::new(
            BundleErrorCode::MissingStack,
            "Field \"data.stack\" is missing or not an object.",
        ));
    }

    let Some(cards) = data.get("cards").and_then(Value::as_array) else {
        return Err(BundleIssue::new(
            BundleErrorCode::SchemaInvalid,
            "Field \"data.cards\" must be an array.",
        ));
    };
    if cards.is_empty() {
        return Err(BundleIssue::new(
            BundleErrorCode::EmptyCards,
            "Field \"data.cards\" is empty.",
        ));
    }
    if let Some(index) = cards
        .iter()
        .position(|card| !card.get("id").map(Value::is_string).unwrap_or(false))
    {
        return Err(BundleIssue::new(
            BundleErrorCode::SchemaInvalid,
            format!("Card at index {} has no string \"id\".", index),
        ));
    }

    let Some(navigation) = data.get("navigation").and_then(Value::as_object) else {
        return Err(BundleIssue::new(
            BundleErrorCode::InvalidNavigation,
            "Field \"data.navigation\" is missing or not an object.",
        ));
    };
    let entry = navigation.get("entryNodeId").and_then(Value::as_str);
    let entry_exists = entry
        .map(|entry| {
            cards
                .iter()
                .any(|card| card.get("id").and_then(Value::as_str) == Some(entry))
        })
        .unwrap_or(false);
    if !entry_exists {
        return Err(BundleIssue::new(
            BundleErrorCode::NoEntryPoint,
            format!(
                "Navigation entry {:?} does not name a card in the bundle.",
                entry
            ),
        ));
    }

    let bundle = serde_json::from_value::<Bundle>(value.clone())
        .map_err(|error| BundleIssue::new(BundleErrorCode::SchemaInvalid, error.to_string()))?;

    // Every choice must join two cards of this bundle.
    if let Some(choice) = bundle.data.choices.iter().find(|choice| {
        bundle.card(&choice.source_card_id).is_none() || bundle.card(&choice.target_card_id).is_none()
    }) {
        return Err(BundleIssue::new(
            BundleErrorCode::InvalidNavigation,
            format!(
                "Choice \"{}\" links \"{}\" to \"{}\", but both must be cards in the bundle.",
                choice.id, choice.source_card_id, choice.target_card_id
            ),
        ));
    }
    Ok(bundle)
}

/// Phase two: recompute the digest over `{metadata, data, assets}`.
pub fn validate_checksum(value: &Value) -> Result<(), BundleIssue> {
    if verify_value(value) {
        return Ok(());
    }
    Err(BundleIssue::new(
        BundleErrorCode::ChecksumMismatch,
        "Stored checksum does not match the bundle contents.",
    ))
}

fn collect_warnings(value: &Value, bundle: &Bundle) -> Vec<BundleIssue> {
    let mut warnings = Vec::new();
    let navigation = &bundle.data.navigation;

    if !navigation.orphans.is_empty() {
        warnings.push(BundleIssue::new(
            BundleErrorCode::OrphanedCards,
            format!(
                "{} unreachable card(s): {}",
                navigation.orphans.len(),
                navigation.orphans.join(", ")
            ),
        ));
    }
    if !navigation.dead_ends.is_empty() {
        warnings.push(BundleIssue::new(
            BundleErrorCode::DeadEndCards,
            format!(
                "{} ending card(s): {}",
                navigation.dead_ends.len(),
                navigation.dead_ends.join(", ")
            ),
        ));
    }

    let size = canonical_json(value).len();
    if size > RECOMMENDED_BUNDLE_SIZE {
        warnings.push(BundleIssue::new(
            BundleErrorCode::LargeBundle,
            format!(
                "Bundle is {} bytes; recommended maximum is {} bytes.",
                size, RECOMMENDED_BUNDLE_SIZE
            ),
        ));
    }

    if bundle.version != BUNDLE_VERSION {
        warnings.push(BundleIssue::new(
            BundleErrorCode::OldVersion,
            format!(
                "Bundle version {} is older than {}.",
                bundle.version, BUNDLE_VERSION
            ),
        ));
    }

    warnings
}

pub fn validate_bundle(value: &Value) -> ValidationResult {
    let bundle = match validate_schema(value) {
        Ok(bundle) => bundle,
        Err(issue) => {
            tracing::debug!(code = %issue.code, "bundle schema validation failed");
            return ValidationResult::failed(issue);
        }
    };

    if let Err(issue) = validate_checksum(value) {
        tracing::debug!(code = %issue.code, "bundle checksum validation failed");
        return ValidationResult::failed(issue);
    }

    let warnings = collect_warnings(value, &bundle);
    ValidationResult {
        is_valid: true,
        errors: Vec::new(),
        warnings,
        bundle: Some(bundle),
    }
}

pub fn parse_bundle_bytes(bytes: &[u8]) -> Result<Value, BundleIssue> {
    let json = decode_envelope(bytes)
        .map_err(|error| BundleIssue::new(BundleErrorCode::ParseError, error.message))?;
    serde_json::from_str::<Value>(&json)
        .map_err(|error| BundleIssue::new(BundleErrorCode::ParseError, error.to_string()))
}

pub fn validate_bytes(bytes: &[u8]) -> ValidationResult {
    match parse_bundle_bytes(bytes) {
        Ok(value) => validate_bundle(&value),
        Err(issue) => ValidationResult::failed(issue),
    }
}
