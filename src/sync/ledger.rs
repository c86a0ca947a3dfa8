use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::remote::RemoteStore;
use crate::types::{FieldValue, RecordId};

/// What `flush_all` does with entries whose write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Empty the ledger whatever the outcome.
    #[default]
    ClearAll,
    /// Put failed entries back unless a newer edit arrived during the flush.
    RetainFailed,
}

impl FlushPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClearAll => "clear",
            Self::RetainFailed => "retain-failed",
        }
    }
}

impl FromStr for FlushPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" | "clear-all" => Ok(Self::ClearAll),
            "retain-failed" | "retain" => Ok(Self::RetainFailed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct FlushReport {
    pub saved: Vec<RecordId>,
    pub failed: Vec<(RecordId, SyncError)>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.saved.len() + self.failed.len()
    }
}

/// Latest uncommitted value per backing value id.
///
/// Cloning yields another handle onto the same ledger. A ledger belongs to a
/// single panel.
#[derive(Clone, Default)]
pub struct LedgerHandle {
    entries: Arc<Mutex<HashMap<RecordId, FieldValue>>>,
    observers: Arc<Mutex<HashMap<RecordId, Weak<dyn FlushObserver>>>>,
}

/// Owner of a ledger entry, told when a flush persisted its value.
pub trait FlushObserver: Send + Sync {
    fn flushed(&self, value: &FieldValue);
}

impl fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("entries", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl LedgerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RecordId, FieldValue>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<RecordId, Weak<dyn FlushObserver>>> {
        match self.observers.lock() {
            Ok(observers) => observers,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers the store that owns `value_id`. Held weakly.
    pub fn watch(&self, value_id: &RecordId, observer: Weak<dyn FlushObserver>) {
        let mut observers = self.observers();
        observers.retain(|_, existing| existing.strong_count() > 0);
        observers.insert(value_id.clone(), observer);
    }

    /// `None` means the value is no longer pending.
    pub fn record_pending(&self, value_id: &RecordId, value: Option<FieldValue>) {
        let mut entries = self.lock();
        match value {
            Some(value) => {
                entries.insert(value_id.clone(), value);
            }
            None => {
                entries.remove(value_id);
            }
        }
    }

    pub fn pending_value(&self, value_id: &RecordId) -> Option<FieldValue> {
        self.lock().get(value_id).cloned()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Writes every pending entry concurrently and waits for all of them.
    pub async fn flush_all<R: RemoteStore>(
        &self,
        remote: Arc<R>,
        policy: FlushPolicy,
    ) -> FlushReport {
        let pending: Vec<(RecordId, FieldValue)> = self.lock().drain().collect();
        if pending.is_empty() {
            return FlushReport::default();
        }
        info!(count = pending.len(), policy = policy.as_str(), "flushing pending changes");

        let mut writes = JoinSet::new();
        for (value_id, value) in pending {
            let remote = Arc::clone(&remote);
            writes.spawn(async move {
                let result = remote.update_field_value(&value_id, &value).await;
                (value_id, value, result)
            });
        }

        let mut report = FlushReport::default();
        let mut saved_values = Vec::new();
        let mut failed_values = Vec::new();
        while let Some(joined) = writes.join_next().await {
            let Ok((value_id, value, result)) = joined else {
                warn!("pending change write task did not complete");
                continue;
            };
            match result {
                Ok(()) => {
                    debug!(value_id = %value_id, "flushed pending change");
                    saved_values.push((value_id.clone(), value));
                    report.saved.push(value_id);
                }
                Err(err) => {
                    warn!(value_id = %value_id, error = %err, "failed to flush pending change");
                    failed_values.push((value_id.clone(), value));
                    report.failed.push((value_id, SyncError::Remote(err)));
                }
            }
        }

        {
            let mut entries = self.lock();
            match policy {
                FlushPolicy::ClearAll => entries.clear(),
                FlushPolicy::RetainFailed => {
                    for (value_id, value) in failed_values {
                        entries.entry(value_id).or_insert(value);
                    }
                }
            }
        }

        let observers: Vec<_> = {
            let observers = self.observers();
            saved_values
                .into_iter()
                .filter_map(|(value_id, value)| {
                    observers
                        .get(&value_id)
                        .and_then(Weak::upgrade)
                        .map(|observer| (observer, value))
                })
                .collect()
        };
        for (observer, value) in observers {
            observer.flushed(&value);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::{Call, RecordingRemote};

    fn id(raw: i64) -> RecordId {
        RecordId::from(raw)
    }

    #[test]
    fn test_record_pending_upserts_and_removes() {
        let ledger = LedgerHandle::new();
        assert!(!ledger.has_pending_changes());

        ledger.record_pending(&id(1), Some(FieldValue::text("a")));
        ledger.record_pending(&id(1), Some(FieldValue::text("ab")));
        ledger.record_pending(&id(2), Some(FieldValue::Null));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.pending_value(&id(1)), Some(FieldValue::text("ab")));
        assert_eq!(ledger.pending_value(&id(2)), Some(FieldValue::Null));

        ledger.record_pending(&id(1), None);
        ledger.record_pending(&id(2), None);
        assert!(!ledger.has_pending_changes());
    }

    #[tokio::test]
    async fn test_flush_writes_each_entry_and_empties_ledger() {
        let remote = Arc::new(RecordingRemote::default());
        let ledger = LedgerHandle::new();
        ledger.record_pending(&id(10), Some(FieldValue::text("north")));
        ledger.record_pending(&id(11), Some(FieldValue::Number(3.0)));

        let report = ledger
            .flush_all(Arc::clone(&remote), FlushPolicy::ClearAll)
            .await;

        assert!(report.is_complete());
        assert_eq!(report.attempted(), 2);
        assert!(!ledger.has_pending_changes());

        let mut calls = remote.calls();
        calls.sort_by_key(|call| format!("{call:?}"));
        assert_eq!(
            calls,
            vec![
                Call::UpdateValue(id(10), FieldValue::text("north")),
                Call::UpdateValue(id(11), FieldValue::Number(3.0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_clears_even_when_writes_fail() {
        let remote = Arc::new(RecordingRemote::default());
        remote.fail_value(id(2));
        let ledger = LedgerHandle::new();
        ledger.record_pending(&id(1), Some(FieldValue::text("ok")));
        ledger.record_pending(&id(2), Some(FieldValue::text("lost")));

        let report = ledger
            .flush_all(Arc::clone(&remote), FlushPolicy::ClearAll)
            .await;

        assert!(!ledger.has_pending_changes());
        assert_eq!(report.saved, vec![id(1)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, id(2));
    }

    #[tokio::test]
    async fn test_retain_failed_keeps_unsaved_entries() {
        let remote = Arc::new(RecordingRemote::default());
        remote.fail_value(id(2));
        let ledger = LedgerHandle::new();
        ledger.record_pending(&id(1), Some(FieldValue::text("ok")));
        ledger.record_pending(&id(2), Some(FieldValue::text("keep me")));

        let report = ledger
            .flush_all(Arc::clone(&remote), FlushPolicy::RetainFailed)
            .await;

        assert!(!report.is_complete());
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.pending_value(&id(2)), Some(FieldValue::text("keep me")));
    }

    #[tokio::test]
    async fn test_flush_of_empty_ledger_issues_no_writes() {
        let remote = Arc::new(RecordingRemote::default());
        let ledger = LedgerHandle::new();

        let report = ledger
            .flush_all(Arc::clone(&remote), FlushPolicy::ClearAll)
            .await;

        assert_eq!(report.attempted(), 0);
        assert!(remote.calls().is_empty());
    }

    #[derive(Default)]
    struct Seen(Mutex<Vec<FieldValue>>);

    impl FlushObserver for Seen {
        fn flushed(&self, value: &FieldValue) {
            self.0.lock().unwrap().push(value.clone());
        }
    }

    #[tokio::test]
    async fn test_flush_reports_saved_values_to_their_owner() {
        let remote = Arc::new(RecordingRemote::default());
        remote.fail_value(id(2));
        let ledger = LedgerHandle::new();
        let saved = Arc::new(Seen::default());
        let failed = Arc::new(Seen::default());
        let saved_observer: Arc<dyn FlushObserver> = saved.clone();
        let failed_observer: Arc<dyn FlushObserver> = failed.clone();
        ledger.watch(&id(1), Arc::downgrade(&saved_observer));
        ledger.watch(&id(2), Arc::downgrade(&failed_observer));
        ledger.record_pending(&id(1), Some(FieldValue::text("kept")));
        ledger.record_pending(&id(2), Some(FieldValue::text("lost")));

        ledger
            .flush_all(Arc::clone(&remote), FlushPolicy::ClearAll)
            .await;

        assert_eq!(*saved.0.lock().unwrap(), vec![FieldValue::text("kept")]);
        assert!(failed.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_watch_drops_dead_observers() {
        let ledger = LedgerHandle::new();
        let gone: Arc<dyn FlushObserver> = Arc::new(Seen::default());
        ledger.watch(&id(1), Arc::downgrade(&gone));
        drop(gone);

        let live: Arc<dyn FlushObserver> = Arc::new(Seen::default());
        ledger.watch(&id(2), Arc::downgrade(&live));

        assert_eq!(ledger.observers().len(), 1);
    }

    #[test]
    fn test_flush_policy_from_str() {
        assert_eq!(FlushPolicy::from_str("clear"), Ok(FlushPolicy::ClearAll));
        assert_eq!(
            FlushPolicy::from_str("Retain-Failed"),
            Ok(FlushPolicy::RetainFailed)
        );
        assert!(FlushPolicy::from_str("keep-everything").is_err());
    }
}
