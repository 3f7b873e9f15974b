use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sf_core::{Bundle, BundleIssue, SerializedCard, SerializedChoice, StoryForgeError, StoryValue};

use crate::events::{EventBus, RuntimeEvent, Subscription};
use crate::flags::FlagSet;
use crate::loader::{load_with_retries, BundleSource, LoadCancel, LoaderOptions, LoaderState, LoaderStatus};
use crate::sandbox::{CardRef, SandboxLimits, ScriptContext, ScriptSandbox};
use crate::saved_state::{SavedPlayerState, PLAYER_STATE_SCHEMA};
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeOptions {
    pub loader: LoaderOptions,
    pub sandbox: SandboxLimits,
    pub auto_save_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub current_card_id: Option<String>,
    pub history: Vec<String>,
    pub variables: BTreeMap<String, StoryValue>,
    pub flags: FlagSet,
    pub visited_cards: BTreeSet<String>,
    pub play_start_time: Option<Instant>,
    /// Play time carried from earlier sessions, excluding the current one.
    pub total_play_time_ms: u64,
    pub is_complete: bool,
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^{}]+)\}").expect("template pattern should compile"))
}

fn issue_error(issue: BundleIssue) -> StoryForgeError {
    let message = match issue.details {
        Some(details) => format!("{} {}", issue.message, details),
        None => issue.message,
    };
    StoryForgeError::new(issue.code.as_str(), message)
}

pub struct StoryRuntime {
    options: RuntimeOptions,
    store: Arc<dyn StateStore>,
    bundle: Option<Bundle>,
    sandbox: Option<ScriptSandbox>,
    state: RuntimeState,
    loader: LoaderState,
    events: EventBus,
    auto_save_key: Option<String>,
    destroyed: bool,
}

impl StoryRuntime {
    pub fn new(store: Arc<dyn StateStore>, options: RuntimeOptions) -> Self {
        let auto_save_key = options.auto_save_key.clone();
        Self {
            options,
            store,
            bundle: None,
            sandbox: None,
            state: RuntimeState::default(),
            loader: LoaderState::default(),
            events: EventBus::default(),
            auto_save_key,
            destroyed: false,
        }
    }

    pub async fn load_bundle(&mut self, source: BundleSource) -> Result<LoaderStatus, StoryForgeError> {
        self.load_bundle_with_cancel(source, None).await
    }

    pub async fn load_bundle_with_cancel(
        &mut self,
        mut source: BundleSource,
        cancel: Option<&LoadCancel>,
    ) -> Result<LoaderStatus, StoryForgeError> {
        self.ensure_alive()?;
        let loaded = load_with_retries(
            &mut source,
            &self.options.loader,
            self.store.as_ref(),
            cancel,
            &mut self.loader,
        )
        .await
        .map_err(issue_error)?;
        self.sandbox = Some(ScriptSandbox::new(self.options.sandbox));
        self.bundle = Some(loaded.bundle);
        self.state = RuntimeState::default();
        Ok(self.loader.status)
    }

    fn ensure_alive(&self) -> Result<(), StoryForgeError> {
        if self.destroyed {
            return Err(StoryForgeError::new(
                "RUNTIME_DESTROYED",
                "The runtime has been destroyed.",
            ));
        }
        Ok(())
    }

    fn loaded_bundle(&self) -> Result<&Bundle, StoryForgeError> {
        self.ensure_alive()?;
        self.bundle
            .as_ref()
            .ok_or_else(|| StoryForgeError::new("RUNTIME_NOT_LOADED", "No bundle is loaded."))
    }

    fn emit(&self, event: RuntimeEvent) {
        self.events.emit(event);
    }

    pub fn start(&mut self) -> Result<(), StoryForgeError> {
        self.begin(false)
    }

    /// Like `start`, but play time keeps accumulating.
    pub fn restart(&mut self) -> Result<(), StoryForgeError> {
        self.begin(true)
    }

    fn begin(&mut self, keep_play_time: bool) -> Result<(), StoryForgeError> {
        let (stack_id, entry) = {
            let bundle = self.loaded_bundle()?;
            let entry = bundle.entry_card_id().map(str::to_string).ok_or_else(|| {
                StoryForgeError::new("RUNTIME_NO_ENTRY", "The bundle has no entry card.")
            })?;
            (bundle.metadata.id.clone(), entry)
        };
        let carried = if keep_play_time { self.play_time() } else { 0 };
        self.state = RuntimeState {
            play_start_time: Some(Instant::now()),
            total_play_time_ms: carried,
            ..RuntimeState::default()
        };
        self.emit(RuntimeEvent::StoryStarted {
            timestamp: self.play_time(),
            stack_id,
            card_id: entry.clone(),
        });
        self.enter_card(&entry)?;
        self.auto_save();
        Ok(())
    }

    fn enter_card(&mut self, card_id: &str) -> Result<(), StoryForgeError> {
        let (card, is_dead_end) = {
            let bundle = self.loaded_bundle()?;
            let card = bundle.card(card_id).cloned().ok_or_else(|| {
                StoryForgeError::new(
                    "RUNTIME_CARD_NOT_FOUND",
                    format!("Card \"{}\" is not in the bundle.", card_id),
                )
            })?;
            let is_dead_end = !bundle
                .data
                .choices
                .iter()
                .any(|choice| choice.source_card_id == card.id);
            (card, is_dead_end)
        };

        self.state.current_card_id = Some(card.id.clone());
        self.state.visited_cards.insert(card.id.clone());
        self.run_card_script(&card);
        self.emit(RuntimeEvent::CardEntered {
            timestamp: self.play_time(),
            card_id: card.id.clone(),
        });
        if is_dead_end {
            self.state.is_complete = true;
            self.emit(RuntimeEvent::StoryCompleted {
                timestamp: self.play_time(),
                card_id: card.id.clone(),
            });
        }
        tracing::debug!(card_id = %card.id, dead_end = is_dead_end, "entered card");
        Ok(())
    }

    fn run_card_script(&mut self, card: &SerializedCard) {
        let Some(script) = card.script.as_deref() else {
            return;
        };
        let play_time_ms = self.play_time();
        let Some(sandbox) = self.sandbox.as_ref() else {
            return;
        };
        let mut context = ScriptContext {
            variables: &mut self.state.variables,
            flags: &mut self.state.flags,
            visited_cards: &self.state.visited_cards,
            current_card: Some(CardRef {
                id: card.id.clone(),
                title: card.title.clone(),
            }),
            play_time_ms,
        };
        let result = sandbox.run(script, &mut context);

        match result {
            Ok(()) => self.emit(RuntimeEvent::ScriptExecuted {
                timestamp: self.play_time(),
                card_id: card.id.clone(),
            }),
            Err(error) => {
                tracing::warn!(card_id = %card.id, %error, "card script failed");
                self.emit(RuntimeEvent::Error {
                    timestamp: self.play_time(),
                    code: error.code,
                    message: error.message,
                    card_id: Some(card.id.clone()),
                });
            }
        }
    }

    pub fn current_card(&self) -> Option<&SerializedCard> {
        let bundle = self.bundle.as_ref()?;
        bundle.card(self.state.current_card_id.as_deref()?)
    }

    pub fn current_choices(&self) -> Vec<&SerializedChoice> {
        let (Some(bundle), Some(current)) = (self.bundle.as_ref(), self.state.current_card_id.as_deref())
        else {
            return Vec::new();
        };
        let mut choices = bundle
            .data
            .choices
            .iter()
            .filter(|choice| choice.source_card_id == current)
            .collect::<Vec<_>>();
        choices.sort_by_key(|choice| choice.order_index);
        choices
    }

    pub fn select_choice(&mut self, choice_id: &str) -> Result<(), StoryForgeError> {
        let (current, target) = {
            let bundle = self.loaded_bundle()?;
            let current = self.state.current_card_id.clone().ok_or_else(|| {
                StoryForgeError::new("RUNTIME_NOT_STARTED", "The story has not been started.")
            })?;
            let choice = bundle
                .data
                .choices
                .iter()
                .find(|choice| choice.id == choice_id)
                .ok_or_else(|| {
                    StoryForgeError::new(
                        "RUNTIME_CHOICE_NOT_FOUND",
                        format!("Choice \"{}\" does not exist.", choice_id),
                    )
                })?;
            if choice.source_card_id != current {
                return Err(StoryForgeError::new(
                    "RUNTIME_CHOICE_NOT_AVAILABLE",
                    format!(
                        "Choice \"{}\" is not available on card \"{}\".",
                        choice_id, current
                    ),
                ));
            }
            if bundle.card(&choice.target_card_id).is_none() {
                return Err(StoryForgeError::new(
                    "RUNTIME_CARD_NOT_FOUND",
                    format!(
                        "Choice \"{}\" leads to card \"{}\", which is not in the bundle.",
                        choice_id, choice.target_card_id
                    ),
                ));
            }
            (current, choice.target_card_id.clone())
        };

        self.emit(RuntimeEvent::ChoiceSelected {
            timestamp: self.play_time(),
            card_id: current.clone(),
            choice_id: choice_id.to_string(),
            target_card_id: target.clone(),
        });
        self.emit(RuntimeEvent::CardExited {
            timestamp: self.play_time(),
            card_id: current.clone(),
        });
        self.state.history.push(current);
        self.enter_card(&target)?;
        self.auto_save();
        Ok(())
    }

    /// Returns `false` when there is no history. Scripts on the re-entered card run again.
    pub fn go_back(&mut self) -> Result<bool, StoryForgeError> {
        self.loaded_bundle()?;
        let Some(current) = self.state.current_card_id.clone() else {
            return Ok(false);
        };
        let Some(previous) = self.state.history.pop() else {
            return Ok(false);
        };
        self.emit(RuntimeEvent::CardExited {
            timestamp: self.play_time(),
            card_id: current,
        });
        self.enter_card(&previous)?;
        self.auto_save();
        Ok(true)
    }

    pub fn get_variable(&self, name: &str) -> Option<&StoryValue> {
        self.state.variables.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: impl Into<StoryValue>) {
        self.state.variables.insert(name.to_string(), value.into());
        self.auto_save();
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.state.flags.has(name)
    }

    pub fn set_flag(&mut self, name: &str) {
        self.state.flags.set(name);
        self.auto_save();
    }

    pub fn clear_flag(&mut self, name: &str) {
        self.state.flags.clear(name);
        self.auto_save();
    }

    pub fn has_visited(&self, card_id: &str) -> bool {
        self.state.visited_cards.contains(card_id)
    }

    pub fn subscribe(&mut self, listener: impl Fn(&RuntimeEvent) + 'static) -> Subscription {
        self.events.subscribe(listener)
    }

    pub fn enable_auto_save(&mut self, key: impl Into<String>) {
        self.auto_save_key = Some(key.into());
    }

    pub fn disable_auto_save(&mut self) {
        self.auto_save_key = None;
    }

    pub fn auto_save_key(&self) -> Option<&str> {
        self.auto_save_key.as_deref()
    }

    fn auto_save(&self) {
        let Some(key) = self.auto_save_key.as_deref() else {
            return;
        };
        if self.bundle.is_none() || self.state.current_card_id.is_none() {
            return;
        }
        if let Err(error) = self.save_state(key) {
            tracing::warn!(key, %error, "auto-save failed");
        }
    }

    pub fn snapshot(&self) -> Result<SavedPlayerState, StoryForgeError> {
        let bundle = self.loaded_bundle()?;
        Ok(SavedPlayerState {
            schema_version: PLAYER_STATE_SCHEMA.to_string(),
            stack_id: bundle.metadata.id.clone(),
            bundle_checksum: bundle.checksum.clone(),
            current_card_id: self.state.current_card_id.clone(),
            history: self.state.history.clone(),
            variables: self.state.variables.clone(),
            flags: self.state.flags.to_persisted(),
            visited_cards: self.state.visited_cards.iter().cloned().collect(),
            total_play_time_ms: self.play_time(),
            is_complete: self.state.is_complete,
            saved_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn save_state(&self, key: &str) -> Result<(), StoryForgeError> {
        let saved = self.snapshot()?;
        self.store.set(key, &saved.to_json()?)
    }

    /// Returns `false` when nothing is saved under `key`.
    pub fn restore_state(&mut self, key: &str) -> Result<bool, StoryForgeError> {
        let restored = {
            let bundle = self.loaded_bundle()?;
            let Some(raw) = self.store.get(key)? else {
                return Ok(false);
            };
            let saved = SavedPlayerState::from_json(&raw)?;
            if saved.stack_id != bundle.metadata.id {
                return Err(StoryForgeError::new(
                    "RUNTIME_STATE_MISMATCH",
                    format!(
                        "Saved state belongs to story \"{}\", not \"{}\".",
                        saved.stack_id, bundle.metadata.id
                    ),
                ));
            }
            if let Some(card_id) = saved.current_card_id.as_deref() {
                if bundle.card(card_id).is_none() {
                    return Err(StoryForgeError::new(
                        "RUNTIME_STATE_STALE",
                        format!("Saved card \"{}\" no longer exists.", card_id),
                    ));
                }
            }
            if saved.bundle_checksum != bundle.checksum {
                tracing::info!(key, "restoring state saved against another build of this story");
            }
            RuntimeState {
                flags: FlagSet::from_persisted(&saved.flags)?,
                current_card_id: saved.current_card_id,
                history: saved
                    .history
                    .into_iter()
                    .filter(|card_id| bundle.card(card_id).is_some())
                    .collect(),
                variables: saved.variables,
                visited_cards: saved.visited_cards.into_iter().collect(),
                play_start_time: Some(Instant::now()),
                total_play_time_ms: saved.total_play_time_ms,
                is_complete: saved.is_complete,
            }
        };
        self.state = restored;
        self.emit(RuntimeEvent::StateRestored {
            timestamp: self.play_time(),
            card_id: self.state.current_card_id.clone(),
        });
        Ok(true)
    }

    pub fn clear_saved_state(&self, key: &str) -> Result<(), StoryForgeError> {
        self.store.remove(key)
    }

    /// Replaces the active bundle, keeping the current card when it still exists.
    pub fn swap_bundle(&mut self, bundle: Bundle) -> Result<(), StoryForgeError> {
        self.ensure_alive()?;
        let current_survives = self
            .state
            .current_card_id
            .as_deref()
            .map(|card_id| bundle.card(card_id).is_some());
        let entry = bundle.entry_card_id().map(str::to_string);
        self.state
            .history
            .retain(|card_id| bundle.card(card_id).is_some());
        tracing::info!(
            stack_id = %bundle.metadata.id,
            checksum = %bundle.checksum,
            "swapping active bundle"
        );
        self.bundle = Some(bundle);
        if self.sandbox.is_none() {
            self.sandbox = Some(ScriptSandbox::new(self.options.sandbox));
        }

        if current_survives == Some(false) {
            self.state.history.clear();
            match entry {
                Some(entry) => self.enter_card(&entry)?,
                None => self.state.current_card_id = None,
            }
        }
        self.auto_save();
        Ok(())
    }

    pub fn eval_expression(&mut self, expression: &str) -> Result<StoryValue, StoryForgeError> {
        self.loaded_bundle()?;
        let play_time_ms = self.play_time();
        let current_card = self.current_card().map(|card| CardRef {
            id: card.id.clone(),
            title: card.title.clone(),
        });
        let sandbox = self
            .sandbox
            .as_ref()
            .ok_or_else(|| StoryForgeError::new("RUNTIME_NOT_LOADED", "No bundle is loaded."))?;
        let mut context = ScriptContext {
            variables: &mut self.state.variables,
            flags: &mut self.state.flags,
            visited_cards: &self.state.visited_cards,
            current_card,
            play_time_ms,
        };
        sandbox.eval(expression, &mut context)
    }

    /// Expands `${expression}` placeholders; a failing expression renders empty.
    pub fn render_text(&mut self, template: &str) -> String {
        let mut output = String::with_capacity(template.len());
        let mut last_index = 0usize;
        for captures in template_pattern().captures_iter(template) {
            let (Some(full), Some(expression)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            output.push_str(&template[last_index..full.start()]);
            match self.eval_expression(expression.as_str()) {
                Ok(value) => output.push_str(&value.to_text()),
                Err(error) => {
                    tracing::warn!(expression = expression.as_str(), %error, "interpolation failed");
                    self.emit(RuntimeEvent::Error {
                        timestamp: self.play_time(),
                        code: error.code,
                        message: error.message,
                        card_id: self.state.current_card_id.clone(),
                    });
                }
            }
            last_index = full.end();
        }
        output.push_str(&template[last_index..]);
        output
    }

    pub fn render_content(&mut self, card: &SerializedCard) -> String {
        self.render_text(&card.content)
    }

    pub fn render_current_card(&mut self) -> Option<String> {
        let content = self.current_card()?.content.clone();
        Some(self.render_text(&content))
    }

    /// Idempotent. Drops listeners, the bundle, the sandbox and all player state.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.events.clear();
        self.bundle = None;
        self.sandbox = None;
        self.state = RuntimeState::default();
        self.auto_save_key = None;
        self.loader = LoaderState::default();
        self.destroyed = true;
        tracing::debug!("runtime destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn loader_state(&self) -> &LoaderState {
        &self.loader
    }

    pub fn bundle(&self) -> Option<&Bundle> {
        self.bundle.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete
    }

    /// Milliseconds played, across restored sessions.
    pub fn play_time(&self) -> u64 {
        let session = self
            .state
            .play_start_time
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.state.total_play_time_ms + session
    }
}
