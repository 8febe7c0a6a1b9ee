use serde::{Deserialize, Serialize};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

/// Where a generate cycle currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum Phase {
    Idle,
    Uploading,
    Triggering,
    Polling { execute_id: String },
    Succeeded,
    Failed,
}

/// Page state threaded through every controller step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub prompt: String,
    pub is_loading: bool,
    #[serde(flatten)]
    pub phase: Phase,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            is_loading: false,
            phase: Phase::Idle,
        }
    }
}

impl PageState {
    pub fn enter(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Start a cycle: loading on, previous terminal phase cleared.
    pub fn begin(mut self) -> Self {
        self.is_loading = true;
        self.phase = Phase::Uploading;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastVariant {
    Default,
    Destructive,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
}

impl Toast {
    pub fn success(description: impl Into<String>) -> Self {
        Self {
            title: "成功".to_string(),
            description: description.into(),
            variant: ToastVariant::Default,
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            title: "错误".to_string(),
            description: description.into(),
            variant: ToastVariant::Destructive,
        }
    }
}

/// Receives the toasts a controller emits.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Collects toasts in memory.
#[derive(Debug, Clone, Default)]
pub struct ToastLog {
    toasts: Arc<Mutex<Vec<Toast>>>,
}

impl ToastLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Toast> {
        self.toasts
            .lock()
            .map(|toasts| toasts.clone())
            .unwrap_or_default()
    }

    pub fn take(&self) -> Vec<Toast> {
        self.toasts
            .lock()
            .map(|mut toasts| std::mem::take(&mut *toasts))
            .unwrap_or_default()
    }
}

impl Notifier for ToastLog {
    fn notify(&self, toast: Toast) {
        if let Ok(mut toasts) = self.toasts.lock() {
            toasts.push(toast);
        }
    }
}

/// Counter owned by a page; bumping it invalidates every token issued before.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> GenerationToken {
        GenerationToken {
            counter: self.counter.clone(),
            issued: self.counter.load(Ordering::SeqCst),
        }
    }

    pub fn bump(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Held by in-flight work; checked before results are applied.
#[derive(Debug, Clone)]
pub struct GenerationToken {
    counter: Arc<AtomicU64>,
    issued: u64,
}

impl GenerationToken {
    /// A token nobody can invalidate, for callers without a page lifecycle.
    pub fn detached() -> Self {
        Generation::new().token()
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.issued
    }

    pub fn is_stale(&self) -> bool {
        !self.is_current()
    }

    /// Whether this token was issued by `generation`.
    pub fn belongs_to(&self, generation: &Generation) -> bool {
        Arc::ptr_eq(&self.counter, &generation.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_invalidates_earlier_tokens_only() {
        let generation = Generation::new();
        let old = generation.token();
        generation.bump();
        let fresh = generation.token();

        assert!(old.is_stale());
        assert!(fresh.is_current());
        assert!(fresh.belongs_to(&generation));
        assert!(!fresh.belongs_to(&Generation::new()));
    }

    #[test]
    fn toast_log_drains() {
        let log = ToastLog::new();
        log.notify(Toast::success("ok"));
        log.notify(Toast::error("bad"));

        assert_eq!(log.snapshot().len(), 2);
        let drained = log.take();
        assert_eq!(drained[1].variant, ToastVariant::Destructive);
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn page_state_serializes_flat() {
        let state = PageState::default().begin().enter(Phase::Polling {
            execute_id: "e1".to_string(),
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"], "polling");
        assert_eq!(json["execute_id"], "e1");
        assert_eq!(json["is_loading"], true);
    }
}
