use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Stack {
    pub id: String,
    pub name: String,
    pub description: String,
    pub first_card_id: Option<String>,
    pub art_style_id: Option<String>,
    pub theme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Card {
    pub id: String,
    pub title: String,
    pub content: String,
    pub script: Option<String>,
    pub image_url: Option<String>,
    pub message: Option<String>,
    pub speaker: Option<String>,
    pub speaker_type: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Choice {
    pub id: String,
    pub source_card_id: String,
    pub label: String,
    pub target_card_id: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub appearance: String,
    pub image_urls: Vec<String>,
    pub avatar_url: Option<String>,
    pub order_index: i64,
}

/// One story as exported by the editor: the stack plus its cards, choices and characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryDocument {
    pub stack: Stack,
    pub cards: Vec<Card>,
    pub choices: Vec<Choice>,
    pub characters: Vec<Character>,
}
