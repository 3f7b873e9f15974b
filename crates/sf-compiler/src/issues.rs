use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompileErrorCode {
    NoCards,
    InvalidEntryCard,
    InvalidChoiceSource,
    InvalidChoiceTarget,
    SerializationFailed,
    BundleValidationFailed,
    BundleTooLarge,
    OrphanedCard,
    DeadEnd,
    EmptyContent,
    UnlinkedChoice,
    NoEntryCard,
    AssetTooLarge,
    AssetUnresolved,
    CompressionFailed,
}

impl CompileErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoCards => "NO_CARDS",
            Self::InvalidEntryCard => "INVALID_ENTRY_CARD",
            Self::InvalidChoiceSource => "INVALID_CHOICE_SOURCE",
            Self::InvalidChoiceTarget => "INVALID_CHOICE_TARGET",
            Self::SerializationFailed => "SERIALIZATION_FAILED",
            Self::BundleValidationFailed => "BUNDLE_VALIDATION_FAILED",
            Self::BundleTooLarge => "BUNDLE_TOO_LARGE",
            Self::OrphanedCard => "ORPHANED_CARD",
            Self::DeadEnd => "DEAD_END",
            Self::EmptyContent => "EMPTY_CONTENT",
            Self::UnlinkedChoice => "UNLINKED_CHOICE",
            Self::NoEntryCard => "NO_ENTRY_CARD",
            Self::AssetTooLarge => "ASSET_TOO_LARGE",
            Self::AssetUnresolved => "ASSET_UNRESOLVED",
            Self::CompressionFailed => "COMPRESSION_FAILED",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            Self::NoCards => "Add at least one card to the story.",
            Self::InvalidEntryCard => "Pick an existing card as the first card.",
            Self::InvalidChoiceSource | Self::InvalidChoiceTarget => {
                "Relink or delete the choice."
            }
            Self::SerializationFailed | Self::BundleValidationFailed => {
                "Report this story to support; the compiler produced an invalid bundle."
            }
            Self::BundleTooLarge => "Remove or shrink embedded images, or enable compression.",
            Self::OrphanedCard => "Link the card from another card or delete it.",
            Self::DeadEnd => "Confirm the card is meant to end the story.",
            Self::EmptyContent => "Write some text for the card.",
            Self::UnlinkedChoice => "Choose a target card for the choice.",
            Self::NoEntryCard => "Set a first card for the story.",
            Self::AssetTooLarge => "Use a smaller image.",
            Self::AssetUnresolved => "Check that the image file exists.",
            Self::CompressionFailed => "No action needed; the bundle is stored uncompressed.",
        }
    }
}

impl fmt::Display for CompileErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileIssue {
    pub code: CompileErrorCode,
    pub message: String,
    pub card_id: Option<String>,
    pub choice_id: Option<String>,
}

impl CompileIssue {
    pub fn new(code: CompileErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            card_id: None,
            choice_id: None,
        }
    }

    pub fn with_card(mut self, card_id: Option<&str>) -> Self {
        self.card_id = card_id.map(str::to_string);
        self
    }

    pub fn with_choice(mut self, choice_id: &str) -> Self {
        self.choice_id = Some(choice_id.to_string());
        self
    }
}
