mod transport;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sf_core::{validate_bytes, Bundle, StoryForgeError};
use tokio::task::JoinHandle;

pub use transport::{HttpTransport, SyncTransport, UpdateStatus};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub endpoint: String,
    pub stack_id: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            stack_id: String::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    UpdateAvailable {
        checksum: String,
        updated_at: Option<String>,
    },
    SyncStarted,
    SyncCompleted {
        checksum: String,
    },
    SyncFailed {
        code: String,
        message: String,
    },
}

type SyncListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Shared {
    config: SyncConfig,
    transport: Arc<dyn SyncTransport>,
    checksum: Mutex<String>,
    pending: Mutex<Option<UpdateStatus>>,
    listeners: Mutex<Vec<(u64, SyncListener)>>,
    next_listener: AtomicU64,
    online: AtomicBool,
    destroyed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn emit(&self, event: SyncEvent) {
        let listeners = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(&event);
        }
    }

    fn fail(&self, error: &StoryForgeError) {
        tracing::warn!(code = %error.code, stack_id = %self.config.stack_id, "sync failed: {}", error.message);
        self.emit(SyncEvent::SyncFailed {
            code: error.code.clone(),
            message: error.message.clone(),
        });
    }

    fn check_destroyed(&self) -> Result<(), StoryForgeError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(StoryForgeError::new(
                "SYNC_DESTROYED",
                "Sync manager has been destroyed.",
            ));
        }
        Ok(())
    }

    async fn check_for_updates(&self) -> Result<Option<UpdateStatus>, StoryForgeError> {
        self.check_destroyed()?;
        let current = lock(&self.checksum).clone();
        let status = match self.transport.check(&self.config.stack_id, &current).await {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(code = %error.code, "update check failed: {}", error.message);
                return Err(error);
            }
        };

        let newer = status
            .checksum
            .as_deref()
            .filter(|checksum| status.has_updates && *checksum != current)
            .map(str::to_string);
        let Some(checksum) = newer else {
            tracing::debug!(stack_id = %self.config.stack_id, "bundle is up to date");
            return Ok(None);
        };

        tracing::info!(stack_id = %self.config.stack_id, checksum = %checksum, "bundle update available");
        *lock(&self.pending) = Some(status.clone());
        self.emit(SyncEvent::UpdateAvailable {
            checksum,
            updated_at: status.updated_at.clone(),
        });
        Ok(Some(status))
    }

    async fn sync_from_server(&self) -> Result<Bundle, StoryForgeError> {
        self.check_destroyed()?;
        self.emit(SyncEvent::SyncStarted);
        let bytes = match self.transport.fetch_full(&self.config.stack_id).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.fail(&error);
                return Err(error);
            }
        };

        let validation = validate_bytes(&bytes);
        let bundle = match validation.bundle {
            Some(bundle) if validation.is_valid => bundle,
            _ => {
                let error = validation
                    .errors
                    .first()
                    .map(|issue| {
                        StoryForgeError::new(
                            issue.code.as_str(),
                            issue.details.clone().unwrap_or_else(|| issue.message.clone()),
                        )
                    })
                    .unwrap_or_else(|| {
                        StoryForgeError::new("SYNC_INVALID_BUNDLE", "Server bundle is invalid.")
                    });
                self.fail(&error);
                return Err(error);
            }
        };

        *lock(&self.checksum) = bundle.checksum.clone();
        *lock(&self.pending) = None;
        tracing::info!(stack_id = %self.config.stack_id, checksum = %bundle.checksum, "bundle synced");
        self.emit(SyncEvent::SyncCompleted {
            checksum: bundle.checksum.clone(),
        });
        Ok(bundle)
    }
}

/// Background update checker bound to one story and its current bundle checksum.
///
/// Updates are announced with [`SyncEvent::UpdateAvailable`] and only applied
/// when the caller asks for [`SyncManager::sync_from_server`].
pub struct SyncManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(
        config: SyncConfig,
        bundle_checksum: impl Into<String>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                checksum: Mutex::new(bundle_checksum.into()),
                pending: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                online: AtomicBool::new(true),
                destroyed: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn with_http(config: SyncConfig, bundle_checksum: impl Into<String>) -> Result<Self, StoryForgeError> {
        let transport = HttpTransport::new(config.endpoint.clone(), config.request_timeout())?;
        Ok(Self::new(config, bundle_checksum, Arc::new(transport)))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub fn checksum(&self) -> String {
        lock(&self.shared.checksum).clone()
    }

    pub fn pending_update(&self) -> Option<UpdateStatus> {
        lock(&self.shared.pending).clone()
    }

    /// Registers a listener and returns its id for [`SyncManager::unsubscribe`].
    pub fn subscribe(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> u64 {
        let id = self.shared.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = lock(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub async fn check_for_updates(&self) -> Result<Option<UpdateStatus>, StoryForgeError> {
        self.shared.check_for_updates().await
    }

    pub async fn sync_from_server(&self) -> Result<Bundle, StoryForgeError> {
        self.shared.sync_from_server().await
    }

    /// Spawns the polling task on the current tokio runtime. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), StoryForgeError> {
        self.shared.check_destroyed()?;
        let mut task = lock(&self.task);
        if task.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let interval = shared.config.poll_interval();
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if shared.destroyed.load(Ordering::SeqCst) {
                    break;
                }
                if !shared.online.load(Ordering::SeqCst) {
                    tracing::debug!("offline, skipping update check");
                    continue;
                }
                // Failures are logged inside; polling carries on.
                let _ = shared.check_for_updates().await;
            }
        }));
        tracing::debug!(stack_id = %self.shared.config.stack_id, "sync polling started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).is_some()
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    /// Records connectivity. Regaining it triggers an immediate update check.
    pub async fn set_online(&self, online: bool) -> Result<Option<UpdateStatus>, StoryForgeError> {
        let was_online = self.shared.online.swap(online, Ordering::SeqCst);
        if online && !was_online && !self.shared.destroyed.load(Ordering::SeqCst) {
            tracing::info!(stack_id = %self.shared.config.stack_id, "back online, checking for updates");
            return self.shared.check_for_updates().await;
        }
        Ok(None)
    }

    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        lock(&self.shared.listeners).clear();
        tracing::debug!(stack_id = %self.shared.config.stack_id, "sync manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod sync_tests {
    use super::*;
    use async_trait::async_trait;
    use sf_compiler::{compile, CompileOptions};
    use sf_core::{Card, Stack};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockTransport {
        statuses: Mutex<VecDeque<Result<UpdateStatus, StoryForgeError>>>,
        bundle: Mutex<Option<Vec<u8>>>,
        checks: AtomicUsize,
        fetches: AtomicUsize,
        seen_checksums: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn check(&self, _stack_id: &str, checksum: &str) -> Result<UpdateStatus, StoryForgeError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            lock(&self.seen_checksums).push(checksum.to_string());
            lock(&self.statuses)
                .pop_front()
                .unwrap_or_else(|| Ok(UpdateStatus::default()))
        }

        async fn fetch_full(&self, _stack_id: &str) -> Result<Vec<u8>, StoryForgeError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            lock(&self.bundle)
                .clone()
                .ok_or_else(|| StoryForgeError::new("SYNC_HTTP", "connection refused"))
        }
    }

    fn newer(checksum: &str) -> Result<UpdateStatus, StoryForgeError> {
        Ok(UpdateStatus {
            has_updates: true,
            checksum: Some(checksum.to_string()),
            updated_at: Some("2026-10-01T00:00:00Z".to_string()),
        })
    }

    fn manager(transport: &Arc<MockTransport>) -> (SyncManager, Arc<Mutex<Vec<SyncEvent>>>) {
        let config = SyncConfig {
            endpoint: "http://sync.invalid/bundles".to_string(),
            stack_id: "stack-1".to_string(),
            poll_interval_ms: 1_000,
            ..SyncConfig::default()
        };
        let manager = SyncManager::new(config, "local", Arc::clone(transport) as Arc<dyn SyncTransport>);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.subscribe(move |event| lock(&sink).push(event.clone()));
        (manager, events)
    }

    fn server_bundle() -> Vec<u8> {
        let stack = Stack {
            id: "stack-1".to_string(),
            name: "Remote".to_string(),
            ..Stack::default()
        };
        let cards = vec![Card {
            id: "only".to_string(),
            title: "Only".to_string(),
            content: "Newer text.".to_string(),
            ..Card::default()
        }];
        compile(&stack, &cards, &[], &[], &CompileOptions::default())
            .bytes
            .expect("server bundle compiles")
    }

    #[tokio::test]
    async fn newer_checksum_is_announced_but_not_applied() {
        let transport = Arc::new(MockTransport::default());
        lock(&transport.statuses).push_back(newer("remote"));
        let (manager, events) = manager(&transport);

        let status = manager.check_for_updates().await.expect("check succeeds");
        assert_eq!(status.and_then(|s| s.checksum).as_deref(), Some("remote"));
        assert_eq!(manager.checksum(), "local");
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(
            lock(&events).as_slice(),
            &[SyncEvent::UpdateAvailable {
                checksum: "remote".to_string(),
                updated_at: Some("2026-10-01T00:00:00Z".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn same_checksum_is_not_an_update() {
        let transport = Arc::new(MockTransport::default());
        lock(&transport.statuses).push_back(newer("local"));
        let (manager, events) = manager(&transport);

        assert!(manager.check_for_updates().await.expect("check").is_none());
        assert!(lock(&events).is_empty());
        assert_eq!(lock(&transport.seen_checksums).as_slice(), &["local".to_string()]);
    }

    #[tokio::test]
    async fn sync_validates_and_tracks_new_checksum() {
        let transport = Arc::new(MockTransport::default());
        *lock(&transport.bundle) = Some(server_bundle());
        let (manager, events) = manager(&transport);

        let bundle = manager.sync_from_server().await.expect("sync succeeds");
        assert_eq!(bundle.metadata.name, "Remote");
        assert_eq!(manager.checksum(), bundle.checksum);
        let events = lock(&events);
        assert_eq!(events[0], SyncEvent::SyncStarted);
        assert_eq!(
            events[1],
            SyncEvent::SyncCompleted {
                checksum: bundle.checksum.clone()
            }
        );
    }

    #[tokio::test]
    async fn invalid_or_unreachable_server_bundle_fails_sync() {
        let transport = Arc::new(MockTransport::default());
        let (manager, events) = manager(&transport);

        let error = manager.sync_from_server().await.expect_err("fetch fails");
        assert_eq!(error.code, "SYNC_HTTP");

        *lock(&transport.bundle) = Some(b"{\"version\": 3}".to_vec());
        let error = manager.sync_from_server().await.expect_err("bundle invalid");
        assert_ne!(error.code, "SYNC_HTTP");
        assert_eq!(manager.checksum(), "local");
        let failures = lock(&events)
            .iter()
            .filter(|event| matches!(event, SyncEvent::SyncFailed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_skips_while_offline_and_rechecks_on_reconnect() {
        let transport = Arc::new(MockTransport::default());
        let (manager, _events) = manager(&transport);
        manager.start().expect("start");
        manager.start().expect("second start is a no-op");

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(transport.checks.load(Ordering::SeqCst), 2);

        manager.set_online(false).await.expect("offline");
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(transport.checks.load(Ordering::SeqCst), 2);

        lock(&transport.statuses).push_back(newer("remote"));
        let status = manager.set_online(true).await.expect("online");
        assert!(status.is_some());
        assert_eq!(transport.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_stops_polling_and_rejects_calls() {
        let transport = Arc::new(MockTransport::default());
        let (manager, _events) = manager(&transport);
        manager.start().expect("start");
        manager.destroy();
        manager.destroy();

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(transport.checks.load(Ordering::SeqCst), 0);
        assert!(!manager.is_running());
        let error = manager.check_for_updates().await.expect_err("destroyed");
        assert_eq!(error.code, "SYNC_DESTROYED");
        assert!(manager.start().is_err());
    }
}
