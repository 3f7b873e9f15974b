use std::sync::Arc;

use sf_compiler::{CompileOptions, CompileResult};
use sf_core::{Card, Character, Choice, Stack, StoryDocument, StoryForgeError};
use sf_export::{ExportArtifact, ExportOptions};
use sf_runtime::{BundleSource, RuntimeOptions, StateStore, StoryRuntime};
use sf_sync::SyncManager;

pub fn compile_story(
    stack: &Stack,
    cards: &[Card],
    choices: &[Choice],
    characters: &[Character],
    options: &CompileOptions,
) -> CompileResult {
    sf_compiler::compile(stack, cards, choices, characters, options)
}

pub fn compile_document(document: &StoryDocument, options: &CompileOptions) -> CompileResult {
    sf_compiler::compile_document(document, options)
}

pub fn export_bundle(result: &CompileResult, options: &ExportOptions) -> Option<ExportArtifact> {
    sf_export::export_bundle(result, options)
}

pub fn generate_story_markdown(
    stack: &Stack,
    cards: &[Card],
    choices: &[Choice],
    characters: &[Character],
) -> String {
    sf_export::generate_story_markdown(stack, cards, choices, characters)
}

pub fn create_runtime(store: Arc<dyn StateStore>, options: RuntimeOptions) -> StoryRuntime {
    StoryRuntime::new(store, options)
}

#[derive(Clone)]
pub struct PlayDocumentOptions {
    pub document: StoryDocument,
    pub compile: CompileOptions,
    pub runtime: RuntimeOptions,
    pub store: Arc<dyn StateStore>,
}

/// Compiles `document`, loads it into a fresh runtime and starts it.
pub async fn play_document(options: PlayDocumentOptions) -> Result<StoryRuntime, StoryForgeError> {
    let compiled = compile_document(&options.document, &options.compile);
    if !compiled.success {
        let issue = compiled.errors.first();
        return Err(StoryForgeError::new(
            issue.map(|issue| issue.code.as_str()).unwrap_or("COMPILE_FAILED"),
            issue
                .map(|issue| issue.message.clone())
                .unwrap_or_else(|| "Story did not compile.".to_string()),
        ));
    }
    let source = match compiled.bytes {
        Some(bytes) => BundleSource::Bytes(bytes),
        None => {
            return Err(StoryForgeError::new(
                "COMPILE_FAILED",
                "Compiler produced no bundle bytes.",
            ))
        }
    };

    let mut runtime = create_runtime(options.store, options.runtime);
    runtime.load_bundle(source).await?;
    runtime.start()?;
    Ok(runtime)
}

/// Fetches the server bundle and hot-swaps it into `runtime`.
///
/// Returns the new bundle checksum. On failure the runtime keeps its bundle.
pub async fn apply_sync_update(
    runtime: &mut StoryRuntime,
    sync: &SyncManager,
) -> Result<String, StoryForgeError> {
    let bundle = sync.sync_from_server().await?;
    let checksum = bundle.checksum.clone();
    runtime.swap_bundle(bundle)?;
    tracing::info!(checksum = %checksum, "applied synced bundle");
    Ok(checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sf_runtime::MemoryStore;
    use sf_sync::{SyncConfig, SyncTransport, UpdateStatus};

    fn card(id: &str, content: &str, order_index: i64) -> Card {
        Card {
            id: id.to_string(),
            title: id.to_string(),
            content: content.to_string(),
            order_index,
            ..Card::default()
        }
    }

    fn document(ending: &str) -> StoryDocument {
        StoryDocument {
            stack: Stack {
                id: "garden".to_string(),
                name: "Garden".to_string(),
                first_card_id: Some("gate".to_string()),
                ..Stack::default()
            },
            cards: vec![card("gate", "A gate.", 0), card("pond", ending, 1)],
            choices: vec![Choice {
                id: "walk".to_string(),
                source_card_id: "gate".to_string(),
                label: "Walk in".to_string(),
                target_card_id: Some("pond".to_string()),
                order_index: 0,
            }],
            characters: Vec::new(),
        }
    }

    fn store() -> Arc<dyn StateStore> {
        Arc::new(MemoryStore::default())
    }

    struct FixedServer {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl SyncTransport for FixedServer {
        async fn check(&self, _stack_id: &str, _checksum: &str) -> Result<UpdateStatus, StoryForgeError> {
            Ok(UpdateStatus::default())
        }

        async fn fetch_full(&self, _stack_id: &str) -> Result<Vec<u8>, StoryForgeError> {
            Ok(self.bytes.clone())
        }
    }

    #[test]
    fn compile_story_and_export_html() {
        let doc = document("Still water.");
        let result = compile_story(
            &doc.stack,
            &doc.cards,
            &doc.choices,
            &doc.characters,
            &CompileOptions::default(),
        );
        assert!(result.success, "errors: {:?}", result.errors);
        let artifact = export_bundle(&result, &ExportOptions::default()).expect("html artifact");
        assert_eq!(artifact.file_name, "garden.html");

        let outline = generate_story_markdown(&doc.stack, &doc.cards, &doc.choices, &doc.characters);
        assert!(outline.starts_with("# Garden"));
    }

    #[tokio::test]
    async fn play_document_starts_at_entry() {
        let runtime = play_document(PlayDocumentOptions {
            document: document("Still water."),
            compile: CompileOptions::default(),
            runtime: RuntimeOptions::default(),
            store: store(),
        })
        .await
        .expect("runtime should start");
        assert_eq!(runtime.current_card().map(|card| card.id.as_str()), Some("gate"));
    }

    #[tokio::test]
    async fn play_document_reports_compile_errors() {
        let mut doc = document("Still water.");
        doc.cards.clear();
        let error = play_document(PlayDocumentOptions {
            document: doc,
            compile: CompileOptions::default(),
            runtime: RuntimeOptions::default(),
            store: store(),
        })
        .await
        .err()
        .expect("empty story fails");
        assert_eq!(error.code, "NO_CARDS");
    }

    #[tokio::test]
    async fn sync_update_swaps_bundle_and_keeps_position() {
        let mut runtime = play_document(PlayDocumentOptions {
            document: document("Still water."),
            compile: CompileOptions::default(),
            runtime: RuntimeOptions::default(),
            store: store(),
        })
        .await
        .expect("runtime should start");
        let local = runtime.bundle().map(|b| b.checksum.clone()).expect("bundle loaded");

        let newer = compile_document(&document("Rippling water."), &CompileOptions::default())
            .bytes
            .expect("newer bundle");
        let sync = SyncManager::new(
            SyncConfig::default(),
            local.clone(),
            Arc::new(FixedServer { bytes: newer }),
        );

        let checksum = apply_sync_update(&mut runtime, &sync).await.expect("sync applies");
        assert_ne!(checksum, local);
        assert_eq!(runtime.current_card().map(|card| card.id.as_str()), Some("gate"));
        runtime.select_choice("walk").expect("walk");
        assert_eq!(
            runtime.current_card().map(|card| card.content.as_str()),
            Some("Rippling water.")
        );
    }
}
