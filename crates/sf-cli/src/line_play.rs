use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use sf_api::create_runtime;
use sf_core::StoryForgeError;
use sf_runtime::{
    BundleSource, FileStore, LoaderOptions, LoaderStatus, RuntimeOptions, StateStore, StoryRuntime,
};

use crate::{load_config, map_cli_io, read_bundle_bytes, PlayArgs};

pub(crate) const DEFAULT_STATE_DIR: &str = ".storyforge";
const HELP: &str = "commands: :help :back :restart :save :load :quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineAction {
    NotHandled,
    Continue,
    Refresh,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SaveKeys {
    pub(crate) auto_save: String,
    pub(crate) slot: String,
    pub(crate) last_known_good: String,
}

impl SaveKeys {
    pub(crate) fn for_bundle(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "story".to_string());
        Self {
            auto_save: format!("{}.autosave", stem),
            slot: format!("{}.slot", stem),
            last_known_good: format!("{}.lkg", stem),
        }
    }
}

/// Loads the bundle into a runtime backed by a file store and positions it.
pub(crate) fn open_runtime(args: &PlayArgs) -> Result<(StoryRuntime, SaveKeys), StoryForgeError> {
    let config = load_config(args.config.as_deref())?;
    let bundle_path = Path::new(&args.bundle);
    let bytes = read_bundle_bytes(bundle_path)?;
    let keys = SaveKeys::for_bundle(bundle_path);
    let state_dir = args.state_dir.as_deref().unwrap_or(DEFAULT_STATE_DIR);
    let store: Arc<dyn StateStore> = Arc::new(FileStore::new(state_dir));

    let mut runtime = create_runtime(
        store,
        RuntimeOptions {
            loader: LoaderOptions {
                last_known_good_key: Some(keys.last_known_good.clone()),
                ..config.loader
            },
            sandbox: config.sandbox,
            auto_save_key: Some(keys.auto_save.clone()),
        },
    );

    let executor = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|error| StoryForgeError::from_display("CLI_ASYNC_RUNTIME", error))?;
    let status = executor.block_on(runtime.load_bundle(BundleSource::Bytes(bytes)))?;
    if status == LoaderStatus::Fallback {
        tracing::warn!(bundle = %args.bundle, "bundle unreadable, playing last known good copy");
    }

    if !(args.resume && runtime.restore_state(&keys.auto_save)?) {
        runtime.start()?;
    }
    Ok((runtime, keys))
}

pub(crate) fn run_play(args: PlayArgs) -> Result<i32, StoryForgeError> {
    let (mut runtime, keys) = open_runtime(&args)?;
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut writer = io::stdout();
    let code = run_line_mode_with_io(&mut runtime, &keys, &mut reader, &mut writer);
    runtime.destroy();
    code
}

fn render_card(runtime: &mut StoryRuntime, writer: &mut dyn Write) -> Result<usize, StoryForgeError> {
    let Some(title) = runtime.current_card().map(|card| card.title.clone()) else {
        writeln!(writer, "(no card)").map_err(map_cli_io)?;
        return Ok(0);
    };
    let content = runtime.render_current_card().unwrap_or_default();
    writeln!(writer).map_err(map_cli_io)?;
    writeln!(writer, "== {} ==", title).map_err(map_cli_io)?;
    writeln!(writer, "{}", content).map_err(map_cli_io)?;

    let labels = runtime
        .current_choices()
        .into_iter()
        .map(|choice| choice.label.clone())
        .collect::<Vec<_>>();
    for (index, label) in labels.iter().enumerate() {
        let label = runtime.render_text(label);
        writeln!(writer, "  [{}] {}", index + 1, label).map_err(map_cli_io)?;
    }
    Ok(labels.len())
}

pub(crate) fn run_line_mode_with_io(
    runtime: &mut StoryRuntime,
    keys: &SaveKeys,
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
) -> Result<i32, StoryForgeError> {
    let name = runtime
        .bundle()
        .map(|bundle| bundle.metadata.name.clone())
        .unwrap_or_default();
    writeln!(writer, "{}", name).map_err(map_cli_io)?;
    writeln!(writer, "{}", HELP).map_err(map_cli_io)?;

    loop {
        let choice_count = render_card(runtime, writer)?;
        if runtime.is_complete() {
            writeln!(writer, "[END]").map_err(map_cli_io)?;
        }

        loop {
            let Some(raw) = prompt_input_from("> ", reader, writer)? else {
                return Ok(0);
            };
            let raw = raw.trim();
            match handle_line_cmd(raw, keys, runtime, writer)? {
                LineAction::Continue => continue,
                LineAction::Refresh => break,
                LineAction::Quit => return Ok(0),
                LineAction::NotHandled => {}
            }

            let picked = raw
                .parse::<usize>()
                .ok()
                .filter(|index| (1..=choice_count).contains(index))
                .and_then(|index| runtime.current_choices().get(index - 1).map(|choice| choice.id.clone()));
            match picked {
                Some(choice_id) => {
                    runtime.select_choice(&choice_id)?;
                    break;
                }
                None => writeln!(writer, "unknown choice: {}", raw).map_err(map_cli_io)?,
            }
        }
    }
}

pub(crate) fn handle_line_cmd(
    raw: &str,
    keys: &SaveKeys,
    runtime: &mut StoryRuntime,
    writer: &mut dyn Write,
) -> Result<LineAction, StoryForgeError> {
    let (action, message) = match raw {
        ":help" => (LineAction::Continue, HELP.to_string()),
        ":back" => {
            if runtime.go_back()? {
                (LineAction::Refresh, "went back".to_string())
            } else {
                (LineAction::Continue, "nothing to go back to".to_string())
            }
        }
        ":restart" => {
            runtime.restart()?;
            (LineAction::Refresh, "restarted".to_string())
        }
        ":save" => {
            runtime.save_state(&keys.slot)?;
            (LineAction::Continue, format!("saved: {}", keys.slot))
        }
        ":load" => {
            if runtime.restore_state(&keys.slot)? {
                (LineAction::Refresh, format!("loaded: {}", keys.slot))
            } else {
                (LineAction::Continue, "no saved game".to_string())
            }
        }
        ":quit" => (LineAction::Quit, "bye".to_string()),
        _ => return Ok(LineAction::NotHandled),
    };
    writeln!(writer, "{}", message).map_err(map_cli_io)?;
    Ok(action)
}

/// `None` at end of input.
pub(crate) fn prompt_input_from(
    prefix: &str,
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
) -> Result<Option<String>, StoryForgeError> {
    write!(writer, "{}", prefix).map_err(map_cli_io)?;
    writer.flush().map_err(map_cli_io)?;
    let mut input = String::new();
    if reader.read_line(&mut input).map_err(map_cli_io)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim_end_matches(&['\r', '\n'][..]).to_string()))
}
