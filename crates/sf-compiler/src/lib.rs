mod assets;
mod graph;
mod issues;
mod pipeline;
mod serializer;

pub use assets::{
    collect_assets, mime_from_extension, parse_data_url, AssetCollection, AssetPolicy,
    AssetResolver,
};
pub use graph::{build_navigation_graph, resolve_entry_card_id};
pub use issues::{CompileErrorCode, CompileIssue};
pub use pipeline::{
    compile, compile_with_resolver, CompileOptions, CompileResult, CompileStats, TargetFormat,
    DEFAULT_MAX_ASSET_SIZE, DEFAULT_MAX_BUNDLE_SIZE,
};
pub use serializer::{
    estimate_playtime_minutes, serialize_bundle, serialize_card, serialize_character,
    serialize_choices, SerializeInput,
};

use sf_core::StoryDocument;

pub fn compile_document(document: &StoryDocument, options: &CompileOptions) -> CompileResult {
    compile(
        &document.stack,
        &document.cards,
        &document.choices,
        &document.characters,
        options,
    )
}
