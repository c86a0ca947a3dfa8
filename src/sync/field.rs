use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::notification::{NoticeKind, Notifier};
use crate::types::{FieldValue, RecordId};

use super::debounce::Debouncer;
use super::ledger::{FlushObserver, LedgerHandle};
use super::lifecycle::FieldSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Coalesce a keystroke stream into one write after the quiet period.
    Debounced(Duration),
    /// Atomic inputs (checkbox, select, date) write on change.
    Immediate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Local value already matches the server; nothing was sent.
    Unchanged,
    Saved(RecordId),
    /// A newer write for this field already landed; this response was ignored.
    Stale,
    Failed(SyncError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Unchanged,
    /// The server echoed our own last write.
    Confirmed,
    /// The server value replaced local state.
    Adopted,
}

#[derive(Debug)]
struct FieldState {
    local: FieldValue,
    server: FieldValue,
    last_pushed: Option<FieldValue>,
    issued_seq: u64,
    applied_seq: u64,
}

struct FieldShared<S> {
    label: String,
    state: Mutex<FieldState>,
    sink: S,
    ledger: LedgerHandle,
    notifier: Arc<dyn Notifier>,
}

impl<S> FieldShared<S> {
    fn lock(&self) -> MutexGuard<'_, FieldState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<S: FieldSink> FieldShared<S> {
    fn record_pending(self: &Arc<Self>, value_id: &RecordId, value: Option<FieldValue>) {
        if value.is_some() {
            let observer: Weak<dyn FlushObserver> = Arc::downgrade(self) as Weak<Self>;
            self.ledger.watch(value_id, observer);
        }
        self.ledger.record_pending(value_id, value);
    }
}

/// A ledger flush wrote `value` for us: treat it as our own applied push so
/// the timer or a blur does not send it again.
impl<S: FieldSink> FlushObserver for FieldShared<S> {
    fn flushed(&self, value: &FieldValue) {
        let mut state = self.lock();
        state.issued_seq += 1;
        state.applied_seq = state.issued_seq;
        state.last_pushed = Some(value.clone());
        state.server = value.clone();
        debug!(field = %self.label, seq = state.applied_seq, "pending change flushed");
    }
}

/// One editable value with a scheduled commit.
///
/// Local edits are visible immediately; the write happens after the quiet
/// period, on `commit_now`, or right away for immediate fields.
pub struct DebouncedField<S: FieldSink> {
    shared: Arc<FieldShared<S>>,
    debouncer: Debouncer,
}

impl<S: FieldSink> DebouncedField<S> {
    pub fn new(
        label: impl Into<String>,
        server_value: FieldValue,
        mode: CommitMode,
        sink: S,
        ledger: LedgerHandle,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let quiet = match mode {
            CommitMode::Debounced(quiet) => quiet,
            CommitMode::Immediate => Duration::ZERO,
        };
        Self {
            shared: Arc::new(FieldShared {
                label: label.into(),
                state: Mutex::new(FieldState {
                    local: server_value.clone(),
                    server: server_value,
                    last_pushed: None,
                    issued_seq: 0,
                    applied_seq: 0,
                }),
                sink,
                ledger,
                notifier,
            }),
            debouncer: Debouncer::new(quiet),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    pub fn local_value(&self) -> FieldValue {
        self.shared.lock().local.clone()
    }

    pub fn server_value(&self) -> FieldValue {
        self.shared.lock().server.clone()
    }

    pub fn is_dirty(&self) -> bool {
        let state = self.shared.lock();
        state.local != state.server
    }

    pub fn has_scheduled_commit(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn set_local_value(&mut self, value: FieldValue) {
        let dirty = {
            let mut state = self.shared.lock();
            state.local = value.clone();
            state.local != state.server
        };

        if let Some(value_id) = self.shared.sink.backing_id() {
            self.shared
                .record_pending(&value_id, dirty.then_some(value));
        }

        if !dirty {
            self.debouncer.cancel();
            return;
        }

        let shared = Arc::clone(&self.shared);
        self.debouncer.schedule(async move {
            push(shared).await;
        });
    }

    /// Writes now if the local value differs from the server value.
    pub async fn commit_now(&mut self) -> CommitOutcome {
        self.debouncer.cancel();
        push(Arc::clone(&self.shared)).await
    }

    pub fn cancel_scheduled(&mut self) -> bool {
        self.debouncer.cancel()
    }

    /// Folds a value reported by the server into local state.
    pub fn reconcile_from_server(&mut self, value: FieldValue) -> Reconciliation {
        let mut state = self.shared.lock();
        // Nothing new from the server; an unsaved local edit stays pending.
        if state.server == value {
            return Reconciliation::Unchanged;
        }

        if state.last_pushed.as_ref() == Some(&value) {
            state.server = value;
            let settled = state.local == state.server;
            drop(state);
            if settled {
                self.clear_pending();
            }
            return Reconciliation::Confirmed;
        }

        debug!(field = %self.shared.label, "adopting server value");
        state.local = value.clone();
        state.server = value;
        drop(state);
        self.debouncer.cancel();
        self.clear_pending();
        Reconciliation::Adopted
    }

    fn clear_pending(&self) {
        if let Some(value_id) = self.shared.sink.backing_id() {
            self.shared.ledger.record_pending(&value_id, None);
        }
    }
}

async fn push<S: FieldSink>(shared: Arc<FieldShared<S>>) -> CommitOutcome {
    let (value, seq) = {
        let mut state = shared.lock();
        if state.local == state.server {
            return CommitOutcome::Unchanged;
        }
        state.issued_seq += 1;
        state.last_pushed = Some(state.local.clone());
        (state.local.clone(), state.issued_seq)
    };
    debug!(field = %shared.label, seq, "committing field");

    match shared.sink.write(value.clone()).await {
        Ok(value_id) => {
            let pending = {
                let mut state = shared.lock();
                if seq < state.applied_seq {
                    debug!(field = %shared.label, seq, applied = state.applied_seq, "discarding stale response");
                    return CommitOutcome::Stale;
                }
                state.applied_seq = seq;
                state.server = value;
                (state.local != state.server).then(|| state.local.clone())
            };
            shared.record_pending(&value_id, pending);
            CommitOutcome::Saved(value_id)
        }
        Err(err) => {
            if err.is_user_visible() {
                warn!(field = %shared.label, error = %err, "field save failed");
                shared
                    .notifier
                    .notify(NoticeKind::Error, &format!("Failed to save {}", shared.label));
            } else {
                debug!(field = %shared.label, error = %err, "field save withheld");
            }
            CommitOutcome::Failed(err)
        }
    }
}
