use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    StoryStarted {
        timestamp: u64,
        stack_id: String,
        card_id: String,
    },
    CardEntered {
        timestamp: u64,
        card_id: String,
    },
    CardExited {
        timestamp: u64,
        card_id: String,
    },
    ChoiceSelected {
        timestamp: u64,
        card_id: String,
        choice_id: String,
        target_card_id: String,
    },
    StoryCompleted {
        timestamp: u64,
        card_id: String,
    },
    StateRestored {
        timestamp: u64,
        card_id: Option<String>,
    },
    ScriptExecuted {
        timestamp: u64,
        card_id: String,
    },
    Error {
        timestamp: u64,
        code: String,
        message: String,
        card_id: Option<String>,
    },
}

impl RuntimeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoryStarted { .. } => "story_started",
            Self::CardEntered { .. } => "card_entered",
            Self::CardExited { .. } => "card_exited",
            Self::ChoiceSelected { .. } => "choice_selected",
            Self::StoryCompleted { .. } => "story_completed",
            Self::StateRestored { .. } => "state_restored",
            Self::ScriptExecuted { .. } => "script_executed",
            Self::Error { .. } => "error",
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::StoryStarted { timestamp, .. }
            | Self::CardEntered { timestamp, .. }
            | Self::CardExited { timestamp, .. }
            | Self::ChoiceSelected { timestamp, .. }
            | Self::StoryCompleted { timestamp, .. }
            | Self::StateRestored { timestamp, .. }
            | Self::ScriptExecuted { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }
}

type Listener = Rc<dyn Fn(&RuntimeEvent)>;
type ListenerList = RefCell<Vec<(u64, Listener)>>;

#[derive(Default)]
pub(crate) struct EventBus {
    listeners: Rc<ListenerList>,
    next_id: u64,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self, listener: impl Fn(&RuntimeEvent) + 'static) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    /// Delivers in subscription order; a panicking listener does not stop the rest.
    pub(crate) fn emit(&self, event: RuntimeEvent) {
        let snapshot = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect::<Vec<_>>();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!(event = event.kind(), "runtime event listener panicked");
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.borrow().len()
    }
}

/// Handle returned by `subscribe`; dropping it keeps the listener registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}
