use serde::{Deserialize, Serialize};

pub const BUNDLE_VERSION: &str = "1.1.0";
pub const SUPPORTED_BUNDLE_VERSIONS: &[&str] = &["1.0.0", "1.0.1", "1.1.0"];
pub const COMPILER_VERSION: &str = concat!("storyforge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub version: String,
    pub compiled_at: String,
    pub checksum: String,
    pub metadata: BundleMetadata,
    pub data: BundleData,
    pub assets: AssetManifest,
}

impl Bundle {
    pub fn card(&self, card_id: &str) -> Option<&SerializedCard> {
        self.data.cards.iter().find(|card| card.id == card_id)
    }

    pub fn entry_card_id(&self) -> Option<&str> {
        self.data.navigation.entry_node_id.as_deref()
    }

    pub fn asset(&self, asset_ref: &str) -> Option<&AssetEntry> {
        self.assets.images.iter().find(|asset| asset.id == asset_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BundleMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub entry_card_id: Option<String>,
    pub card_count: usize,
    pub choice_count: usize,
    pub character_count: usize,
    pub asset_count: usize,
    pub dead_end_count: usize,
    pub orphan_count: usize,
    pub estimated_playtime_minutes: u32,
    pub theme: Option<String>,
    pub art_style_id: Option<String>,
    pub compiler_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleData {
    pub stack: SerializedStack,
    pub cards: Vec<SerializedCard>,
    #[serde(default)]
    pub choices: Vec<SerializedChoice>,
    #[serde(default)]
    pub characters: Vec<SerializedCharacter>,
    pub navigation: NavigationGraph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializedStack {
    pub id: String,
    pub name: String,
    pub description: String,
    pub first_card_id: Option<String>,
    pub art_style_id: Option<String>,
    pub theme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializedCard {
    pub id: String,
    pub title: String,
    pub content: String,
    pub script: Option<String>,
    pub image_ref: Option<String>,
    pub message: Option<String>,
    pub speaker: Option<String>,
    pub speaker_type: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializedChoice {
    pub id: String,
    pub source_card_id: String,
    pub label: String,
    pub target_card_id: String,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializedCharacter {
    pub id: String,
    pub name: String,
    pub appearance: String,
    pub image_refs: Vec<String>,
    pub avatar_ref: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEdge {
    pub source_card_id: String,
    pub target_card_id: String,
    pub choice_id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationNode {
    pub card_id: String,
    pub out_edges: Vec<NavigationEdge>,
    pub in_edges: Vec<NavigationEdge>,
    pub is_dead_end: bool,
    pub is_orphan: bool,
    pub depth: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationGraph {
    pub entry_node_id: Option<String>,
    pub nodes: Vec<NavigationNode>,
    pub dead_ends: Vec<String>,
    pub orphans: Vec<String>,
}

impl NavigationGraph {
    pub fn node(&self, card_id: &str) -> Option<&NavigationNode> {
        self.nodes.iter().find(|node| node.card_id == card_id)
    }

    pub fn reachable_count(&self) -> usize {
        self.nodes.iter().filter(|node| !node.is_orphan).count()
    }

    pub fn max_depth(&self) -> i32 {
        self.nodes.iter().map(|node| node.depth).max().unwrap_or(-1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetCompression {
    #[default]
    None,
    Lz4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Card,
    Character,
    Avatar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    pub id: String,
    pub url: String,
    pub kind: AssetKind,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub embedded: bool,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetManifest {
    pub images: Vec<AssetEntry>,
    pub total_size: u64,
    pub compression: AssetCompression,
}

pub fn card_asset_ref(card_id: &str) -> String {
    format!("card-{}", card_id)
}

pub fn character_asset_ref(character_id: &str, index: usize) -> String {
    format!("char-{}-{}", character_id, index)
}

pub fn avatar_asset_ref(character_id: &str) -> String {
    format!("char-avatar-{}", character_id)
}
