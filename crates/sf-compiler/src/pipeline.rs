use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sf_core::checksum::stamp;
use sf_core::envelope::encode_envelope;
use sf_core::validator::validate_schema;
use sf_core::{AssetCompression, Bundle, Card, Character, Choice, Stack};

use crate::assets::{collect_assets, AssetPolicy, AssetResolver};
use crate::graph::{build_navigation_graph, resolve_entry_card_id};
use crate::issues::{CompileErrorCode, CompileIssue};
use crate::serializer::{serialize_bundle, SerializeInput};

pub const DEFAULT_MAX_ASSET_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_BUNDLE_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Wasm,
    Json,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub embed_assets: bool,
    pub compress_assets: bool,
    pub max_asset_size: u64,
    pub max_bundle_size: u64,
    pub optimize_for_size: bool,
    pub target_format: TargetFormat,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            embed_assets: true,
            compress_assets: true,
            max_asset_size: DEFAULT_MAX_ASSET_SIZE,
            max_bundle_size: DEFAULT_MAX_BUNDLE_SIZE,
            optimize_for_size: false,
            target_format: TargetFormat::Wasm,
        }
    }
}

impl CompileOptions {
    fn wants_compression(&self) -> bool {
        self.target_format != TargetFormat::Json && (self.compress_assets || self.optimize_for_size)
    }

    fn effective_max_asset_size(&self) -> u64 {
        if self.optimize_for_size {
            self.max_asset_size / 4
        } else {
            self.max_asset_size
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompileStats {
    pub total_cards: usize,
    pub total_choices: usize,
    pub total_characters: usize,
    pub total_assets: usize,
    pub uncompressed_size: usize,
    pub bundle_size: usize,
    pub compile_time_ms: u64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileResult {
    pub success: bool,
    pub bundle: Option<Bundle>,
    pub bytes: Option<Vec<u8>>,
    pub errors: Vec<CompileIssue>,
    pub warnings: Vec<CompileIssue>,
    pub stats: CompileStats,
    pub target_format: TargetFormat,
}

impl CompileResult {
    fn failed(
        errors: Vec<CompileIssue>,
        warnings: Vec<CompileIssue>,
        started: Instant,
        target_format: TargetFormat,
    ) -> Self {
        for error in &errors {
            tracing::warn!(code = %error.code, "compile failed: {}", error.message);
        }
        Self {
            success: false,
            bundle: None,
            bytes: None,
            errors,
            warnings,
            stats: CompileStats {
                compile_time_ms: elapsed_ms(started),
                ..CompileStats::default()
            },
            target_format,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[derive(Debug, Default)]
struct PreValidation {
    errors: Vec<CompileIssue>,
    warnings: Vec<CompileIssue>,
}

fn pre_validate(stack: &Stack, cards: &[Card], choices: &[Choice]) -> PreValidation {
    let mut report = PreValidation::default();
    if cards.is_empty() {
        report.errors.push(CompileIssue::new(
            CompileErrorCode::NoCards,
            "The story has no cards.",
        ));
        return report;
    }

    let card_ids = cards.iter().map(|card| card.id.as_str()).collect::<HashSet<_>>();

    match stack.first_card_id.as_deref() {
        Some(first) if !card_ids.contains(first) => report.errors.push(
            CompileIssue::new(
                CompileErrorCode::InvalidEntryCard,
                format!("First card \"{}\" does not exist.", first),
            )
            .with_card(Some(first)),
        ),
        Some(_) => {}
        None => report.warnings.push(CompileIssue::new(
            CompileErrorCode::NoEntryCard,
            format!(
                "No first card set; starting at \"{}\".",
                cards[0].id
            ),
        )),
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for choice in choices {
        if !card_ids.contains(choice.source_card_id.as_str()) {
            report.errors.push(
                CompileIssue::new(
                    CompileErrorCode::InvalidChoiceSource,
                    format!(
                        "Choice \"{}\" starts at missing card \"{}\".",
                        choice.id, choice.source_card_id
                    ),
                )
                .with_choice(&choice.id),
            );
            continue;
        }
        match choice.target_card_id.as_deref() {
            None => report.warnings.push(
                CompileIssue::new(
                    CompileErrorCode::UnlinkedChoice,
                    format!("Choice \"{}\" has no target and is skipped.", choice.label),
                )
                .with_card(Some(&choice.source_card_id))
                .with_choice(&choice.id),
            ),
            Some(target) if !card_ids.contains(target) => report.errors.push(
                CompileIssue::new(
                    CompileErrorCode::InvalidChoiceTarget,
                    format!(
                        "Choice \"{}\" points to missing card \"{}\".",
                        choice.id, target
                    ),
                )
                .with_card(Some(&choice.source_card_id))
                .with_choice(&choice.id),
            ),
            Some(target) => adjacency
                .entry(choice.source_card_id.as_str())
                .or_default()
                .push(target),
        }
    }

    let mut reachable = HashSet::new();
    if let Some(entry) = resolve_entry_card_id(stack.first_card_id.as_deref(), cards) {
        let mut queue = VecDeque::from([entry]);
        reachable.insert(entry);
        while let Some(current) = queue.pop_front() {
            for &target in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                if reachable.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }

    for card in cards {
        let card_id = Some(card.id.as_str());
        if !reachable.contains(card.id.as_str()) {
            report.warnings.push(
                CompileIssue::new(
                    CompileErrorCode::OrphanedCard,
                    format!("Card \"{}\" cannot be reached from the start.", card.title),
                )
                .with_card(card_id),
            );
        }
        if !adjacency.contains_key(card.id.as_str()) {
            report.warnings.push(
                CompileIssue::new(
                    CompileErrorCode::DeadEnd,
                    format!("Card \"{}\" has no choices and ends the story.", card.title),
                )
                .with_card(card_id),
            );
        }
        let has_message = card
            .message
            .as_deref()
            .map(|message| !message.trim().is_empty())
            .unwrap_or(false);
        if card.content.trim().is_empty() && !has_message {
            report.warnings.push(
                CompileIssue::new(
                    CompileErrorCode::EmptyContent,
                    format!("Card \"{}\" has no content.", card.title),
                )
                .with_card(card_id),
            );
        }
    }

    report
}

pub fn compile(
    stack: &Stack,
    cards: &[Card],
    choices: &[Choice],
    characters: &[Character],
    options: &CompileOptions,
) -> CompileResult {
    compile_with_resolver(stack, cards, choices, characters, options, None)
}

pub fn compile_with_resolver(
    stack: &Stack,
    cards: &[Card],
    choices: &[Choice],
    characters: &[Character],
    options: &CompileOptions,
    resolver: Option<&dyn AssetResolver>,
) -> CompileResult {
    let started = Instant::now();
    let format = options.target_format;

    let PreValidation {
        errors,
        mut warnings,
    } = pre_validate(stack, cards, choices);
    if !errors.is_empty() {
        return CompileResult::failed(errors, warnings, started, format);
    }

    let entry = resolve_entry_card_id(stack.first_card_id.as_deref(), cards);
    let navigation = build_navigation_graph(entry, cards, choices);

    let compress = options.wants_compression();
    let collected = collect_assets(
        cards,
        characters,
        AssetPolicy {
            embed: options.embed_assets,
            max_asset_size: options.effective_max_asset_size(),
            compression: if compress {
                AssetCompression::Lz4
            } else {
                AssetCompression::None
            },
        },
        resolver,
    );
    warnings.extend(collected.warnings);

    let mut bundle = match serialize_bundle(SerializeInput {
        stack,
        cards,
        choices,
        characters,
        navigation,
        assets: collected.manifest,
        compiled_at: chrono::Utc::now().to_rfc3339(),
    }) {
        Ok(bundle) => bundle,
        Err(error) => {
            let issue = CompileIssue::new(CompileErrorCode::SerializationFailed, error.message);
            return CompileResult::failed(vec![issue], warnings, started, format);
        }
    };

    let bundle_value = match serde_json::to_value(&bundle) {
        Ok(value) => value,
        Err(error) => {
            let issue = CompileIssue::new(CompileErrorCode::SerializationFailed, error.to_string());
            return CompileResult::failed(vec![issue], warnings, started, format);
        }
    };
    if let Err(issue) = validate_schema(&bundle_value) {
        let message = format!(
            "{} ({})",
            issue.message,
            issue.details.unwrap_or_default()
        );
        let issue = CompileIssue::new(CompileErrorCode::BundleValidationFailed, message);
        return CompileResult::failed(vec![issue], warnings, started, format);
    }

    let json = bundle_value.to_string();
    let (bytes, compressed) = if format == TargetFormat::Json {
        (json.clone().into_bytes(), false)
    } else {
        match encode_envelope(&json, compress) {
            Ok(encoded) => (encoded.bytes, encoded.compressed),
            Err(error) if compress => {
                warnings.push(CompileIssue::new(
                    CompileErrorCode::CompressionFailed,
                    format!("Compression failed, storing uncompressed: {}", error.message),
                ));
                bundle.assets.compression = AssetCompression::None;
                if let Err(error) = stamp(&mut bundle) {
                    let issue = CompileIssue::new(CompileErrorCode::SerializationFailed, error.message);
                    return CompileResult::failed(vec![issue], warnings, started, format);
                }
                let raw = serde_json::to_string(&bundle).unwrap_or_else(|_| json.clone());
                match encode_envelope(&raw, false) {
                    Ok(encoded) => (encoded.bytes, false),
                    Err(error) => {
                        let issue =
                            CompileIssue::new(CompileErrorCode::SerializationFailed, error.message);
                        return CompileResult::failed(vec![issue], warnings, started, format);
                    }
                }
            }
            Err(error) => {
                let issue = CompileIssue::new(CompileErrorCode::SerializationFailed, error.message);
                return CompileResult::failed(vec![issue], warnings, started, format);
            }
        }
    };

    if bytes.len() as u64 > options.max_bundle_size {
        let issue = CompileIssue::new(
            CompileErrorCode::BundleTooLarge,
            format!(
                "Bundle is {} bytes; the limit is {} bytes.",
                bytes.len(),
                options.max_bundle_size
            ),
        );
        return CompileResult::failed(vec![issue], warnings, started, format);
    }

    let stats = CompileStats {
        total_cards: bundle.data.cards.len(),
        total_choices: bundle.data.choices.len(),
        total_characters: bundle.data.characters.len(),
        total_assets: bundle.assets.images.len(),
        uncompressed_size: json.len(),
        bundle_size: bytes.len(),
        compile_time_ms: elapsed_ms(started),
        // 1 whenever no compression took effect.
        compression_ratio: if compressed && !json.is_empty() {
            bytes.len() as f64 / json.len() as f64
        } else {
            1.0
        },
    };

    tracing::info!(
        stack_id = %bundle.metadata.id,
        cards = stats.total_cards,
        bytes = stats.bundle_size,
        ratio = stats.compression_ratio,
        warnings = warnings.len(),
        "compiled story bundle"
    );

    CompileResult {
        success: true,
        bundle: Some(bundle),
        bytes: Some(bytes),
        errors: Vec::new(),
        warnings,
        stats,
        target_format: format,
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use crate::compiler_test_support::*;
    use sf_core::envelope::decode_envelope;
    use sf_core::{validate_bytes, BundleErrorCode};

    fn codes(issues: &[CompileIssue]) -> Vec<CompileErrorCode> {
        issues.iter().map(|issue| issue.code).collect()
    }

    #[test]
    fn empty_story_is_no_cards_with_zero_stats() {
        let result = compile(&stack(None), &[], &[], &[], &CompileOptions::default());
        assert!(!result.success);
        assert_eq!(codes(&result.errors), vec![CompileErrorCode::NoCards]);
        assert_eq!(result.stats.total_cards, 0);
        assert_eq!(result.stats.bundle_size, 0);
        assert!(result.bundle.is_none());
        assert!(result.bytes.is_none());
    }

    #[test]
    fn invalid_first_card_is_hard_error() {
        let result = compile(
            &stack(Some("ghost")),
            &cards(&["a"]),
            &[],
            &[],
            &CompileOptions::default(),
        );
        assert!(!result.success);
        assert_eq!(codes(&result.errors), vec![CompileErrorCode::InvalidEntryCard]);
    }

    #[test]
    fn dangling_choices_are_hard_errors() {
        let result = compile(
            &stack(Some("a")),
            &cards(&["a", "b"]),
            &[choice("1", "ghost", "b"), choice("2", "a", "nowhere")],
            &[],
            &CompileOptions::default(),
        );
        assert_eq!(
            codes(&result.errors),
            vec![
                CompileErrorCode::InvalidChoiceSource,
                CompileErrorCode::InvalidChoiceTarget
            ]
        );
        assert_eq!(result.errors[1].choice_id.as_deref(), Some("2"));
    }

    #[test]
    fn soft_issues_are_warnings_and_compile_succeeds() {
        let mut cards = cards(&["a", "b", "lost"]);
        cards[1].content = "  ".to_string();
        let mut unlinked = choice("u", "a", "b");
        unlinked.target_card_id = None;
        let result = compile(
            &stack(Some("a")),
            &cards,
            &[choice("1", "a", "b"), unlinked],
            &[],
            &CompileOptions::default(),
        );
        assert!(result.success, "errors: {:?}", result.errors);
        let warnings = codes(&result.warnings);
        assert!(warnings.contains(&CompileErrorCode::UnlinkedChoice));
        assert!(warnings.contains(&CompileErrorCode::OrphanedCard));
        assert!(warnings.contains(&CompileErrorCode::DeadEnd));
        assert!(warnings.contains(&CompileErrorCode::EmptyContent));
        assert_eq!(result.stats.total_choices, 1);
    }

    #[test]
    fn missing_first_card_warns_and_uses_first_card() {
        let result = compile(
            &stack(None),
            &cards(&["start", "next"]),
            &[choice("1", "start", "next")],
            &[],
            &CompileOptions::default(),
        );
        assert!(result.success);
        assert!(codes(&result.warnings).contains(&CompileErrorCode::NoEntryCard));
        let bundle = result.bundle.expect("bundle");
        assert_eq!(bundle.entry_card_id(), Some("start"));
    }

    #[test]
    fn compressed_output_round_trips_through_validator() {
        let mut cards = cards(&["a", "b"]);
        cards[0].content = "The same sentence again. ".repeat(40);
        let result = compile(
            &stack(Some("a")),
            &cards,
            &[choice("1", "a", "b")],
            &[],
            &CompileOptions::default(),
        );
        assert!(result.success);
        assert!(result.stats.compression_ratio < 1.0);
        let bytes = result.bytes.expect("bytes");
        let validation = validate_bytes(&bytes);
        assert!(validation.is_valid, "errors: {:?}", validation.errors);
        assert_eq!(
            validation.warnings.iter().map(|w| w.code).collect::<Vec<_>>(),
            vec![BundleErrorCode::DeadEndCards]
        );
    }

    #[test]
    fn json_target_emits_plain_json_with_unit_ratio() {
        let options = CompileOptions {
            target_format: TargetFormat::Json,
            ..CompileOptions::default()
        };
        let result = compile(&stack(Some("a")), &cards(&["a"]), &[], &[], &options);
        assert!(result.success);
        let bytes = result.bytes.expect("bytes");
        assert_eq!(bytes.first(), Some(&b'{'));
        assert_eq!(result.stats.compression_ratio, 1.0);
        let json = decode_envelope(&bytes).expect("plain json");
        assert!(json.contains("\"checksum\""));
    }

    #[test]
    fn embedded_data_url_is_stored_once() {
        use base64::Engine as _;
        let payload = base64::engine::general_purpose::STANDARD.encode(vec![7u8; 30_000]);
        let mut cards = cards(&["a"]);
        cards[0].image_url = Some(format!("data:image/png;base64,{}", payload));
        let options = CompileOptions {
            target_format: TargetFormat::Json,
            ..CompileOptions::default()
        };
        let result = compile(&stack(Some("a")), &cards, &[], &[], &options);
        assert!(result.success, "errors: {:?}", result.errors);

        let bundle = result.bundle.expect("bundle");
        let asset = &bundle.assets.images[0];
        assert!(asset.embedded);
        assert_eq!(asset.url, "data:image/png");
        assert_eq!(asset.data.as_deref(), Some(payload.as_str()));
        assert!(result.stats.bundle_size < payload.len() + payload.len() / 2);
    }

    #[test]
    fn uncompressed_envelope_reports_unit_ratio() {
        let options = CompileOptions {
            target_format: TargetFormat::Binary,
            compress_assets: false,
            optimize_for_size: false,
            ..CompileOptions::default()
        };
        let result = compile(&stack(Some("a")), &cards(&["a"]), &[], &[], &options);
        assert!(result.success);
        assert!(result.stats.bundle_size > result.stats.uncompressed_size);
        assert_eq!(result.stats.compression_ratio, 1.0);
        let bytes = result.bytes.expect("bytes");
        assert_eq!(&bytes[..4], b"SFB1");
    }

    #[test]
    fn bundle_over_ceiling_is_rejected_with_sizes() {
        let options = CompileOptions {
            max_bundle_size: 64,
            ..CompileOptions::default()
        };
        let result = compile(&stack(Some("a")), &cards(&["a"]), &[], &[], &options);
        assert!(!result.success);
        assert_eq!(codes(&result.errors), vec![CompileErrorCode::BundleTooLarge]);
        assert!(result.errors[0].message.contains("64"));
        assert_eq!(result.stats.total_cards, 0);
    }

    #[test]
    fn recompiling_same_story_keeps_checksum() {
        let stack = stack(Some("a"));
        let cards = cards(&["a", "b"]);
        let choices = vec![choice("1", "a", "b")];
        let first = compile(&stack, &cards, &choices, &[], &CompileOptions::default());
        let second = compile(&stack, &cards, &choices, &[], &CompileOptions::default());
        let first = first.bundle.expect("first");
        let second = second.bundle.expect("second");
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: CompileOptions =
            serde_json::from_str(r#"{"embed_assets": false, "target_format": "binary"}"#)
                .expect("options should parse");
        assert!(!options.embed_assets);
        assert!(options.compress_assets);
        assert_eq!(options.max_bundle_size, DEFAULT_MAX_BUNDLE_SIZE);
        assert_eq!(options.target_format, TargetFormat::Binary);
    }
}
