use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sf_core::{map_json, StoryForgeError, StoryValue};

use crate::flags::PersistedFlags;

pub const PLAYER_STATE_SCHEMA: &str = "player-state.v2";
/// Saves written before flags moved to the bitmask encoding.
pub const LEGACY_PLAYER_STATE_SCHEMA: &str = "player-state.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPlayerState {
    pub schema_version: String,
    pub stack_id: String,
    #[serde(default)]
    pub bundle_checksum: String,
    pub current_card_id: Option<String>,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, StoryValue>,
    #[serde(default)]
    pub flags: PersistedFlags,
    #[serde(default)]
    pub visited_cards: Vec<String>,
    #[serde(default)]
    pub total_play_time_ms: u64,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub saved_at: String,
}

impl SavedPlayerState {
    pub fn to_json(&self) -> Result<String, StoryForgeError> {
        serde_json::to_string(self).map_err(map_json)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoryForgeError> {
        let state: Self = serde_json::from_str(raw).map_err(|error| {
            StoryForgeError::new(
                "RUNTIME_STATE_INVALID",
                format!("Saved state is not valid JSON: {}", error),
            )
        })?;
        if state.schema_version != PLAYER_STATE_SCHEMA
            && state.schema_version != LEGACY_PLAYER_STATE_SCHEMA
        {
            return Err(StoryForgeError::new(
                "RUNTIME_STATE_SCHEMA",
                format!("Unsupported player state schema: {}", state.schema_version),
            ));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod saved_state_tests {
    use super::*;

    #[test]
    fn legacy_save_with_flag_list_parses() {
        let state = SavedPlayerState::from_json(
            r#"{
  "schemaVersion": "player-state.v1",
  "stackId": "s1",
  "currentCardId": "c2",
  "history": ["c1"],
  "flags": ["met-guide"],
  "visitedCards": ["c1", "c2"]
}"#,
        )
        .expect("legacy save should parse");
        assert_eq!(state.flags, PersistedFlags::Legacy(vec!["met-guide".to_string()]));
        assert_eq!(state.total_play_time_ms, 0);
        assert!(!state.is_complete);
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let error = SavedPlayerState::from_json(
            r#"{"schemaVersion": "player-state.v9", "stackId": "s1", "currentCardId": null}"#,
        )
        .expect_err("schema should be rejected");
        assert_eq!(error.code, "RUNTIME_STATE_SCHEMA");

        let error = SavedPlayerState::from_json("{").expect_err("json should be rejected");
        assert_eq!(error.code, "RUNTIME_STATE_INVALID");
    }
}
