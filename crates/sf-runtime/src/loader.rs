use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sf_core::validator::parse_bundle_bytes;
use sf_core::{validate_bundle, Bundle, BundleErrorCode, BundleIssue, StoryForgeError};

use crate::store::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoaderStatus {
    #[default]
    Idle,
    Loading,
    Validating,
    Validated,
    Error,
    Retrying,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct LoaderState {
    pub status: LoaderStatus,
    pub error: Option<BundleIssue>,
    pub warnings: Vec<BundleIssue>,
    pub retry_count: u32,
    pub attempts: u32,
    pub has_last_known_good: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub last_known_good_key: Option<String>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            last_known_good_key: None,
        }
    }
}

impl LoaderOptions {
    pub fn retry_delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(retry)))
    }
}

/// Shared cancel flag, checked before every load attempt.
#[derive(Debug, Clone, Default)]
pub struct LoadCancel(Arc<AtomicBool>);

impl LoadCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub type FetchBundle = Box<dyn FnMut(u32) -> Result<Vec<u8>, StoryForgeError>>;

pub enum BundleSource {
    Bytes(Vec<u8>),
    Value(Value),
    /// Called once per attempt with the 1-based attempt number.
    Fetch(FetchBundle),
}

impl fmt::Debug for BundleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Fetch(_) => f.write_str("Fetch(..)"),
        }
    }
}

impl BundleSource {
    fn read(&mut self, attempt: u32) -> Result<Value, BundleIssue> {
        match self {
            Self::Bytes(bytes) => parse_bundle_bytes(bytes),
            Self::Value(value) => Ok(value.clone()),
            Self::Fetch(fetch) => {
                let bytes = fetch(attempt).map_err(|error| {
                    BundleIssue::new(BundleErrorCode::ParseError, error.to_string())
                })?;
                parse_bundle_bytes(&bytes)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBundle {
    pub bundle: Bundle,
    pub from_fallback: bool,
}

fn read_last_known_good(store: &dyn StateStore, key: &str) -> Option<Bundle> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(error) => {
            tracing::warn!(key, %error, "failed to read last-known-good bundle");
            return None;
        }
    };
    let value = parse_bundle_bytes(raw.as_bytes()).ok()?;
    match serde_json::from_value::<Bundle>(value) {
        Ok(bundle) => Some(bundle),
        Err(error) => {
            tracing::warn!(key, %error, "stored last-known-good bundle is unreadable");
            None
        }
    }
}

/// Load → validate, retrying checksum mismatches, then falling back to the
/// last-known-good bundle. `state` tracks every transition.
pub async fn load_with_retries(
    source: &mut BundleSource,
    options: &LoaderOptions,
    store: &dyn StateStore,
    cancel: Option<&LoadCancel>,
    state: &mut LoaderState,
) -> Result<LoadedBundle, BundleIssue> {
    let lkg_key = options.last_known_good_key.as_deref();
    *state = LoaderState {
        has_last_known_good: lkg_key
            .map(|key| matches!(store.get(key), Ok(Some(_))))
            .unwrap_or(false),
        ..LoaderState::default()
    };

    let failure = loop {
        if cancel.map(LoadCancel::is_cancelled).unwrap_or(false) {
            let issue = BundleIssue::new(
                BundleErrorCode::LoadCancelled,
                format!("Cancelled after {} attempt(s).", state.attempts),
            );
            state.status = LoaderStatus::Error;
            state.error = Some(issue.clone());
            return Err(issue);
        }

        state.attempts += 1;
        state.status = LoaderStatus::Loading;
        tracing::debug!(attempt = state.attempts, "loading bundle");
        let value = match source.read(state.attempts) {
            Ok(value) => value,
            Err(issue) => break issue,
        };

        state.status = LoaderStatus::Validating;
        let result = validate_bundle(&value);
        if let (true, Some(bundle)) = (result.is_valid, result.bundle) {
            state.status = LoaderStatus::Validated;
            state.warnings = result.warnings;
            if let Some(key) = lkg_key {
                match store.set(key, &value.to_string()) {
                    Ok(()) => state.has_last_known_good = true,
                    Err(error) => {
                        tracing::warn!(key, %error, "failed to persist last-known-good bundle")
                    }
                }
            }
            tracing::info!(
                stack_id = %bundle.metadata.id,
                attempts = state.attempts,
                warnings = state.warnings.len(),
                "bundle loaded"
            );
            return Ok(LoadedBundle {
                bundle,
                from_fallback: false,
            });
        }

        let Some(issue) = result.errors.into_iter().next() else {
            break BundleIssue::new(BundleErrorCode::CorruptData, "Validation produced no bundle.");
        };
        if issue.code.is_retryable() && state.retry_count < options.max_retries {
            state.retry_count += 1;
            state.status = LoaderStatus::Retrying;
            state.error = Some(issue);
            let delay = options.retry_delay(state.retry_count);
            tracing::debug!(retry = state.retry_count, ?delay, "retrying bundle load");
            tokio::time::sleep(delay).await;
            continue;
        }
        break issue;
    };

    tracing::warn!(code = %failure.code, attempts = state.attempts, "bundle load failed");
    state.status = LoaderStatus::Error;
    state.error = Some(failure.clone());

    if let Some(bundle) = lkg_key.and_then(|key| read_last_known_good(store, key)) {
        state.status = LoaderStatus::Fallback;
        tracing::info!(stack_id = %bundle.metadata.id, "using last-known-good bundle");
        return Ok(LoadedBundle {
            bundle,
            from_fallback: true,
        });
    }
    Err(failure)
}
