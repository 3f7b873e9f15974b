use super::*;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use sf_compiler::{CompileOptions, TargetFormat};
use sf_core::{Card, Choice, Stack, StoryDocument};

use crate::line_play::{open_runtime, run_line_mode_with_io, SaveKeys};

fn document() -> StoryDocument {
    StoryDocument {
        stack: Stack {
            id: "garden".to_string(),
            name: "Night Garden".to_string(),
            first_card_id: Some("gate".to_string()),
            ..Stack::default()
        },
        cards: vec![
            Card {
                id: "gate".to_string(),
                title: "gate".to_string(),
                content: "An iron gate.".to_string(),
                ..Card::default()
            },
            Card {
                id: "pond".to_string(),
                title: "pond".to_string(),
                content: "A still pond.".to_string(),
                order_index: 1,
                ..Card::default()
            },
        ],
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

fn write_bundle(dir: &Path) -> String {
    let result = sf_api::compile_document(&document(), &CompileOptions::default());
    assert!(result.success, "errors: {:?}", result.errors);
    let path = dir.join("garden.sfb");
    fs::write(&path, result.bytes.expect("bundle bytes")).expect("bundle should be written");
    path.to_string_lossy().to_string()
}

fn play_args(bundle: &str, state_dir: &Path, resume: bool) -> PlayArgs {
    PlayArgs {
        bundle: bundle.to_string(),
        state_dir: Some(state_dir.to_string_lossy().to_string()),
        config: None,
        resume,
    }
}

#[test]
fn parse_config_reads_compile_and_loader_sections() {
    let config = parse_config(
        r#"
[compile]
embed_assets = false
max_bundle_size = 1024
target_format = "json"

[loader]
max_retries = 1
"#,
    )
    .expect("config should parse");
    assert!(!config.compile.embed_assets);
    assert_eq!(config.compile.max_bundle_size, 1024);
    assert_eq!(config.compile.target_format, TargetFormat::Json);
    assert!(config.compile.compress_assets);
    assert_eq!(config.loader.max_retries, 1);
    assert_eq!(config.loader.retry_delay_ms, 1000);

    assert_eq!(parse_config("").expect("empty config"), CliConfig::default());
    let error = parse_config("[compile]\nmax_bundle_size = \"big\"").expect_err("bad type");
    assert_eq!(error.code, "CLI_CONFIG_INVALID");
}

#[test]
fn explicit_missing_config_is_an_error() {
    let error = load_config(Some("/definitely/not/here/storyforge.toml")).expect_err("missing");
    assert_eq!(error.code, "CLI_CONFIG_NOT_FOUND");
}

#[test]
fn story_stem_strips_story_suffix() {
    assert_eq!(story_stem(Path::new("dir/cave.story.json")), "cave");
    assert_eq!(story_stem(Path::new("dir/notes.json")), "notes");
}

#[test]
fn find_story_files_walks_nested_directories() {
    let dir = tempfile::tempdir().expect("temp dir");
    for name in ["b.story.json", "nested/a.story.json", "readme.md", "plain.json"] {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent");
        }
        fs::write(&path, "{}").expect("file");
    }
    let files = find_story_files(dir.path()).expect("scan");
    let names = files
        .iter()
        .map(|path| story_stem(path))
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["b".to_string(), "a".to_string()]);

    let error = find_story_files(&dir.path().join("readme.md")).expect_err("not a dir");
    assert_eq!(error.code, "CLI_SOURCE_NOT_DIR");
}

#[test]
fn load_story_document_reports_missing_and_invalid_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = load_story_document(&dir.path().join("none.story.json")).expect_err("missing");
    assert_eq!(missing.code, "CLI_SOURCE_NOT_FOUND");

    let broken = dir.path().join("broken.story.json");
    fs::write(&broken, "{").expect("file");
    let invalid = load_story_document(&broken).expect_err("invalid");
    assert_eq!(invalid.code, "CLI_SOURCE_INVALID");
}

#[test]
fn save_keys_follow_bundle_file_name() {
    let keys = SaveKeys::for_bundle(Path::new("out/garden.sfb"));
    assert_eq!(keys.auto_save, "garden.autosave");
    assert_eq!(keys.slot, "garden.slot");
    assert_eq!(keys.last_known_good, "garden.lkg");
}

#[test]
fn line_mode_handles_choices_and_commands() {
    let dir = tempfile::tempdir().expect("temp dir");
    let bundle = write_bundle(dir.path());
    let state_dir = dir.path().join("state");
    let (mut runtime, keys) =
        open_runtime(&play_args(&bundle, &state_dir, false)).expect("runtime should open");

    let mut input = Cursor::new(":help\n9\n1\n:back\n:save\n1\n:load\n:quit\n".as_bytes());
    let mut output = Vec::new();
    let code = run_line_mode_with_io(&mut runtime, &keys, &mut input, &mut output)
        .expect("line mode should run");
    assert_eq!(code, 0);

    let text = String::from_utf8(output).expect("utf-8 output");
    assert!(text.starts_with("Night Garden\n"));
    assert!(text.contains("== gate ==\nAn iron gate.\n  [1] Walk in"));
    assert!(text.contains("unknown choice: 9"));
    assert!(text.contains("== pond ==\nA still pond.\n[END]"));
    assert!(text.contains("went back"));
    assert!(text.contains("saved: garden.slot"));
    assert!(text.contains("loaded: garden.slot"));
    assert!(text.trim_end().ends_with("bye"));
    assert_eq!(runtime.current_card().map(|card| card.id.as_str()), Some("gate"));
    assert!(state_dir.join("garden.slot.json").is_file());
}

#[test]
fn resume_continues_from_auto_save() {
    let dir = tempfile::tempdir().expect("temp dir");
    let bundle = write_bundle(dir.path());
    let state_dir = dir.path().join("state");

    let (mut runtime, _) =
        open_runtime(&play_args(&bundle, &state_dir, false)).expect("first session");
    runtime.select_choice("walk").expect("walk");
    drop(runtime);

    let (resumed, _) = open_runtime(&play_args(&bundle, &state_dir, true)).expect("second session");
    assert_eq!(resumed.current_card().map(|card| card.id.as_str()), Some("pond"));
    assert!(resumed.is_complete());

    let (fresh, _) = open_runtime(&play_args(&bundle, &state_dir, false)).expect("third session");
    assert_eq!(fresh.current_card().map(|card| card.id.as_str()), Some("gate"));
}

#[test]
fn run_cli_reports_errors_with_non_zero_exit() {
    let code = run_cli_from_args([
        "storyforge",
        "validate",
        "--bundle",
        "/definitely/not/here.sfb",
    ]);
    assert_eq!(code, 1);
}
