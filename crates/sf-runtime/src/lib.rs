mod events;
mod flags;
mod loader;
mod rhai_bridge;
mod runtime;
mod sandbox;
mod saved_state;
mod store;

pub use events::{RuntimeEvent, Subscription};
pub use flags::{FlagSet, PersistedFlags};
pub use loader::{
    load_with_retries, BundleSource, FetchBundle, LoadCancel, LoadedBundle, LoaderOptions,
    LoaderState, LoaderStatus,
};
pub use runtime::{RuntimeOptions, RuntimeState, StoryRuntime};
pub use sandbox::{CardRef, SandboxLimits, ScriptContext, ScriptSandbox, SCRIPT_ERROR};
pub use saved_state::{SavedPlayerState, LEGACY_PLAYER_STATE_SCHEMA, PLAYER_STATE_SCHEMA};
pub use store::{FileStore, MemoryStore, StateStore};
