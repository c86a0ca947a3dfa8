use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::debug;

use crate::error::SyncError;
use crate::remote::RemoteStore;
use crate::types::{FieldValue, RecordId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    NoRecord,
    Creating,
    HasRecord(RecordId),
}

/// Create-vs-update routing for one backing record.
///
/// At most one create is ever in flight. A caller that arrives while a create
/// is pending waits for it and is then routed to update.
#[derive(Debug)]
pub struct RecordLifecycle {
    state: Mutex<LifecycleState>,
    create_gate: AsyncMutex<()>,
}

pub enum Route<'a> {
    Create(CreatePermit<'a>),
    Update(RecordId),
}

/// Exclusive right to issue the create request.
///
/// Dropping the permit without `succeed` returns the lifecycle to `NoRecord`.
pub struct CreatePermit<'a> {
    lifecycle: &'a RecordLifecycle,
    resolved: bool,
    _gate: AsyncMutexGuard<'a, ()>,
}

impl CreatePermit<'_> {
    pub fn succeed(mut self, id: RecordId) {
        debug!(record_id = %id, "create resolved");
        *self.lifecycle.lock() = LifecycleState::HasRecord(id);
        self.resolved = true;
    }
}

impl Drop for CreatePermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            *self.lifecycle.lock() = LifecycleState::NoRecord;
        }
    }
}

impl RecordLifecycle {
    pub fn new(existing: Option<RecordId>) -> Self {
        let state = match existing {
            Some(id) => LifecycleState::HasRecord(id),
            None => LifecycleState::NoRecord,
        };
        Self {
            state: Mutex::new(state),
            create_gate: AsyncMutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().clone()
    }

    pub fn record_id(&self) -> Option<RecordId> {
        match &*self.lock() {
            LifecycleState::HasRecord(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Learns an id created elsewhere, e.g. reported by a server refresh.
    pub fn adopt(&self, id: RecordId) {
        let mut state = self.lock();
        if *state == LifecycleState::NoRecord {
            *state = LifecycleState::HasRecord(id);
        }
    }

    pub async fn route(&self) -> Route<'_> {
        if let Some(id) = self.record_id() {
            return Route::Update(id);
        }

        let gate = self.create_gate.lock().await;
        if let Some(id) = self.record_id() {
            return Route::Update(id);
        }

        *self.lock() = LifecycleState::Creating;
        Route::Create(CreatePermit {
            lifecycle: self,
            resolved: false,
            _gate: gate,
        })
    }
}

/// Write target for a field value that may need a backing record.
pub trait FieldSink: Send + Sync + 'static {
    fn backing_id(&self) -> Option<RecordId>;

    /// Persists `value`, returning the id of the record that holds it.
    fn write(
        &self,
        value: FieldValue,
    ) -> impl std::future::Future<Output = Result<RecordId, SyncError>> + Send;
}

/// A custom-field value on a task: created on first edit, updated after.
pub struct ValueBinding<R> {
    remote: Arc<R>,
    task_id: RecordId,
    definition_id: RecordId,
    lifecycle: RecordLifecycle,
}

impl<R: RemoteStore> ValueBinding<R> {
    pub fn new(
        remote: Arc<R>,
        task_id: RecordId,
        definition_id: RecordId,
        value_id: Option<RecordId>,
    ) -> Self {
        Self {
            remote,
            task_id,
            definition_id,
            lifecycle: RecordLifecycle::new(value_id),
        }
    }

    pub fn definition_id(&self) -> &RecordId {
        &self.definition_id
    }

    pub fn lifecycle(&self) -> &RecordLifecycle {
        &self.lifecycle
    }
}

impl<R: RemoteStore> FieldSink for ValueBinding<R> {
    fn backing_id(&self) -> Option<RecordId> {
        self.lifecycle.record_id()
    }

    async fn write(&self, value: FieldValue) -> Result<RecordId, SyncError> {
        match self.lifecycle.route().await {
            Route::Update(value_id) => {
                self.remote.update_field_value(&value_id, &value).await?;
                Ok(value_id)
            }
            Route::Create(permit) => {
                let value_id = self
                    .remote
                    .create_field_value(&self.task_id, &self.definition_id, &value)
                    .await?;
                permit.succeed(value_id.clone());
                Ok(value_id)
            }
        }
    }
}
