//! Task detail panel: one editing surface over a task record.
//!
//! The panel owns the draft of the core task fields, a record-level save
//! timer, one field store per custom field, and the pending-change ledger.
//! Everything is torn down on `close`; a fresh session is derived on `open`.

mod keys;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::notification::{NoticeKind, Notifier};
use crate::remote::RemoteStore;
use crate::sync::{
    CommitMode, CommitOutcome, DebouncedField, Debouncer, FlushPolicy, FlushReport, LedgerHandle,
    Reconciliation, RecordLifecycle, Route, ValueBinding,
};
use crate::types::{
    CustomFieldDefinition, CustomFieldEntry, CustomFieldKind, CustomFieldValue, FieldValue,
    RecordId, SaveState, TaskDraft, TaskRecord, TaskStatus,
};

pub use keys::KeyOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelOptions {
    pub text_debounce: Duration,
    pub saved_indicator: Duration,
    pub flush_policy: FlushPolicy,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            text_debounce: Duration::from_millis(500),
            saved_indicator: Duration::from_secs(2),
            flush_policy: FlushPolicy::ClearAll,
        }
    }
}

/// Immutable input the panel derives its field stores from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelSnapshot {
    pub record: Option<TaskRecord>,
    pub create_mode: bool,
    pub custom_fields: Vec<CustomFieldEntry>,
}

impl PanelSnapshot {
    pub fn create(custom_fields: Vec<CustomFieldEntry>) -> Self {
        Self {
            record: None,
            create_mode: true,
            custom_fields,
        }
    }

    pub fn existing(record: TaskRecord, custom_fields: Vec<CustomFieldEntry>) -> Self {
        Self {
            record: Some(record),
            create_mode: false,
            custom_fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Unchanged,
    /// A required field is empty; nothing was sent.
    Withheld,
    Created(RecordId),
    Updated(RecordId),
    Failed(SyncError),
}

struct PanelState {
    draft: TaskDraft,
    baseline: TaskDraft,
    save_state: SaveState,
    saved_until: Option<Instant>,
}

struct PanelShared<R> {
    session_id: Uuid,
    remote: Arc<R>,
    notifier: Arc<dyn Notifier>,
    lifecycle: RecordLifecycle,
    state: Mutex<PanelState>,
    saved_indicator: Duration,
}

impl PanelState {
    fn has_unsaved_changes(&self) -> bool {
        !self.draft.diff(&self.baseline).is_empty()
    }
}

impl<R> PanelShared<R> {
    fn lock(&self) -> MutexGuard<'_, PanelState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn finish_success(&self, apply: impl FnOnce(&mut PanelState)) {
        let mut state = self.lock();
        apply(&mut state);
        state.save_state = if state.has_unsaved_changes() {
            SaveState::Dirty
        } else {
            SaveState::Idle
        };
        state.saved_until = Some(Instant::now() + self.saved_indicator);
    }

    fn finish_failure(&self, message: &str, err: &SyncError) {
        self.lock().save_state = SaveState::Idle;
        warn!(session = %self.session_id, error = %err, "{message}");
        self.notifier.notify(NoticeKind::Error, message);
    }
}

pub struct CustomFieldEditor<R: RemoteStore> {
    definition: CustomFieldDefinition,
    field: DebouncedField<ValueBinding<R>>,
}

impl<R: RemoteStore> CustomFieldEditor<R> {
    pub fn definition(&self) -> &CustomFieldDefinition {
        &self.definition
    }

    pub fn value(&self) -> FieldValue {
        self.field.local_value()
    }

    pub fn is_dirty(&self) -> bool {
        self.field.is_dirty()
    }

    pub fn value_id(&self) -> Option<RecordId> {
        self.field.sink().lifecycle().record_id()
    }
}

struct Session<R: RemoteStore> {
    snapshot: Arc<PanelSnapshot>,
    shared: Arc<PanelShared<R>>,
    record_timer: Debouncer,
    custom_fields: Vec<CustomFieldEditor<R>>,
    confirm_delete_open: bool,
}

/// Imperative flush contract handed to whatever hosts the panel.
pub struct FlushHandle<R> {
    ledger: LedgerHandle,
    remote: Arc<R>,
    policy: FlushPolicy,
}

impl<R> Clone for FlushHandle<R> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            remote: Arc::clone(&self.remote),
            policy: self.policy,
        }
    }
}

impl<R: RemoteStore> FlushHandle<R> {
    pub fn has_pending_changes(&self) -> bool {
        self.ledger.has_pending_changes()
    }

    pub async fn flush_pending_changes(&self) -> FlushReport {
        self.ledger
            .flush_all(Arc::clone(&self.remote), self.policy)
            .await
    }
}

pub struct TaskPanel<R: RemoteStore> {
    remote: Arc<R>,
    notifier: Arc<dyn Notifier>,
    options: PanelOptions,
    ledger: LedgerHandle,
    session: Option<Session<R>>,
}

impl<R: RemoteStore> TaskPanel<R> {
    pub fn new(remote: Arc<R>, notifier: Arc<dyn Notifier>, options: PanelOptions) -> Self {
        Self {
            remote,
            notifier,
            options,
            ledger: LedgerHandle::new(),
            session: None,
        }
    }

    pub fn flush_handle(&self) -> FlushHandle<R> {
        FlushHandle {
            ledger: self.ledger.clone(),
            remote: Arc::clone(&self.remote),
            policy: self.options.flush_policy,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.session
            .as_ref()
            .and_then(|session| session.shared.lifecycle.record_id())
    }

    pub fn is_create_mode(&self) -> bool {
        self.is_open() && self.record_id().is_none()
    }

    pub fn save_state(&self) -> SaveState {
        self.session
            .as_ref()
            .map(|session| session.shared.lock().save_state)
            .unwrap_or_default()
    }

    pub fn saved_indicator_visible(&self) -> bool {
        self.session.as_ref().is_some_and(|session| {
            session
                .shared
                .lock()
                .saved_until
                .is_some_and(|until| Instant::now() < until)
        })
    }

    pub fn draft(&self) -> Option<TaskDraft> {
        self.session
            .as_ref()
            .map(|session| session.shared.lock().draft.clone())
    }

    pub fn is_delete_confirmation_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.confirm_delete_open)
    }

    /// Derives every field store from `snapshot`.
    ///
    /// Re-opening with the snapshot that is already shown keeps local edits.
    pub fn open(&mut self, snapshot: Arc<PanelSnapshot>) {
        if let Some(session) = &self.session
            && Arc::ptr_eq(&session.snapshot, &snapshot)
        {
            return;
        }

        self.ledger.clear();
        let record_id = snapshot.record.as_ref().map(|record| record.id.clone());
        let draft = snapshot
            .record
            .as_ref()
            .map(TaskDraft::from)
            .unwrap_or_default();
        let shared = Arc::new(PanelShared {
            session_id: Uuid::new_v4(),
            remote: Arc::clone(&self.remote),
            notifier: Arc::clone(&self.notifier),
            lifecycle: RecordLifecycle::new(record_id.clone()),
            state: Mutex::new(PanelState {
                baseline: draft.clone(),
                draft,
                save_state: SaveState::Idle,
                saved_until: None,
            }),
            saved_indicator: self.options.saved_indicator,
        });
        info!(
            session = %shared.session_id,
            record_id = ?record_id,
            create_mode = snapshot.create_mode,
            custom_fields = snapshot.custom_fields.len(),
            "panel opened"
        );

        self.session = Some(Session {
            snapshot,
            shared,
            record_timer: Debouncer::new(self.options.text_debounce),
            custom_fields: Vec::new(),
            confirm_delete_open: false,
        });
        self.ensure_custom_editors();
    }

    /// Tears the surface down. Scheduled commits are cancelled; the ledger is
    /// left for the host to flush.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            info!(session = %session.shared.session_id, "panel closed");
        }
    }

    /// Commits outstanding edits, flushes the ledger, then closes.
    pub async fn close_with_flush(&mut self) -> (SaveOutcome, FlushReport) {
        let record = self.blur().await;

        if let Some(session) = self.session.as_mut() {
            for editor in &mut session.custom_fields {
                if editor.value_id().is_none() && editor.is_dirty() {
                    editor.field.commit_now().await;
                } else {
                    editor.field.cancel_scheduled();
                }
            }
        }

        let report = if self.ledger.has_pending_changes() {
            self.flush_handle().flush_pending_changes().await
        } else {
            FlushReport::default()
        };

        self.close();
        (record, report)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        self.edit(self.options.text_debounce, |draft| draft.title = title);
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        let description = description.into();
        self.edit(self.options.text_debounce, |draft| {
            draft.description = description
        });
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.edit(Duration::ZERO, |draft| draft.status = status);
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.edit(Duration::ZERO, |draft| draft.priority = priority);
    }

    pub fn set_assignees(&mut self, assignee_ids: Vec<String>) {
        self.edit(Duration::ZERO, |draft| draft.assignee_ids = assignee_ids);
    }

    pub fn set_due_date(&mut self, due_date: Option<NaiveDate>) {
        self.edit(Duration::ZERO, |draft| draft.due_date = due_date);
    }

    fn edit(&mut self, delay: Duration, apply: impl FnOnce(&mut TaskDraft)) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let lifecycle_started = session.shared.lifecycle.record_id().is_some()
            || session.shared.lifecycle.state() == crate::sync::LifecycleState::Creating;
        let needs_save = {
            let mut state = session.shared.lock();
            apply(&mut state.draft);
            // A record never loses its title, so a blank one is not saved.
            let needs_save = state.draft.has_required_fields()
                && (!lifecycle_started || state.has_unsaved_changes());
            if !state.save_state.is_busy() {
                state.save_state = if needs_save {
                    SaveState::Dirty
                } else {
                    SaveState::Idle
                };
            }
            needs_save
        };

        if needs_save {
            let shared = Arc::clone(&session.shared);
            session.record_timer.schedule_after(delay, async move {
                save_record(shared).await;
            });
        } else {
            session.record_timer.cancel();
        }
    }

    /// Saves the core fields now instead of waiting for the quiet period.
    pub async fn blur(&mut self) -> SaveOutcome {
        let Some(session) = self.session.as_mut() else {
            return SaveOutcome::Unchanged;
        };
        session.record_timer.cancel();
        let outcome = save_record(Arc::clone(&session.shared)).await;
        self.ensure_custom_editors();
        outcome
    }

    pub fn custom_fields(&self) -> &[CustomFieldEditor<R>] {
        self.session
            .as_ref()
            .map(|session| session.custom_fields.as_slice())
            .unwrap_or_default()
    }

    pub fn set_custom_field(
        &mut self,
        definition_id: &RecordId,
        value: FieldValue,
    ) -> Result<(), SyncError> {
        let editor = self.editor_mut(definition_id)?;
        validate_option(&editor.definition, &value)?;
        editor.field.set_local_value(value);
        Ok(())
    }

    pub async fn blur_custom_field(
        &mut self,
        definition_id: &RecordId,
    ) -> Result<CommitOutcome, SyncError> {
        let editor = self.editor_mut(definition_id)?;
        Ok(editor.field.commit_now().await)
    }

    /// Applies values freshly fetched from the server to the custom fields.
    pub fn reconcile_custom_values(
        &mut self,
        values: &[CustomFieldValue],
    ) -> Vec<(RecordId, Reconciliation)> {
        self.ensure_custom_editors();
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for editor in &mut session.custom_fields {
            let Some(value) = values
                .iter()
                .find(|value| value.definition_id == editor.definition.id)
            else {
                continue;
            };
            editor.field.sink().lifecycle().adopt(value.id.clone());
            let outcome = editor.field.reconcile_from_server(value.value.clone());
            results.push((editor.definition.id.clone(), outcome));
        }
        results
    }

    fn editor_mut(
        &mut self,
        definition_id: &RecordId,
    ) -> Result<&mut CustomFieldEditor<R>, SyncError> {
        self.ensure_custom_editors();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SyncError::MissingRecord("task".to_string()))?;
        if session.shared.lifecycle.record_id().is_none() {
            return Err(SyncError::MissingRecord("task".to_string()));
        }
        session
            .custom_fields
            .iter_mut()
            .find(|editor| &editor.definition.id == definition_id)
            .ok_or_else(|| SyncError::missing_record(definition_id))
    }

    /// Custom fields hang off a task id, so editors exist only once it does.
    fn ensure_custom_editors(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.custom_fields.is_empty() || session.snapshot.custom_fields.is_empty() {
            return;
        }
        let Some(task_id) = session.shared.lifecycle.record_id() else {
            return;
        };

        session.custom_fields = session
            .snapshot
            .custom_fields
            .iter()
            .map(|entry| {
                let mode = if entry.definition.kind.commits_immediately() {
                    CommitMode::Immediate
                } else {
                    CommitMode::Debounced(self.options.text_debounce)
                };
                let binding = ValueBinding::new(
                    Arc::clone(&self.remote),
                    task_id.clone(),
                    entry.definition.id.clone(),
                    entry.value.as_ref().map(|value| value.id.clone()),
                );
                let initial = entry
                    .value
                    .as_ref()
                    .map(|value| value.value.clone())
                    .unwrap_or_default();
                CustomFieldEditor {
                    definition: entry.definition.clone(),
                    field: DebouncedField::new(
                        entry.definition.name.clone(),
                        initial,
                        mode,
                        binding,
                        self.ledger.clone(),
                        Arc::clone(&self.notifier),
                    ),
                }
            })
            .collect();
        debug!(
            session = %session.shared.session_id,
            count = session.custom_fields.len(),
            "custom field editors ready"
        );
    }

    pub fn cancel_delete(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.confirm_delete_open = false;
        }
    }

    /// Deletes the backing record and closes the panel.
    pub async fn confirm_delete(&mut self) -> Result<(), SyncError> {
        let id = {
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| SyncError::MissingRecord("task".to_string()))?;
            session.confirm_delete_open = false;
            let id = session
                .shared
                .lifecycle
                .record_id()
                .ok_or_else(|| SyncError::MissingRecord("task".to_string()))?;
            session.record_timer.cancel();
            id
        };

        match self.remote.delete_task(&id).await {
            Ok(()) => {
                info!(record_id = %id, "task deleted");
                self.notifier.notify(NoticeKind::Success, "Task deleted");
                self.ledger.clear();
                self.close();
                Ok(())
            }
            Err(err) => {
                warn!(record_id = %id, error = %err, "failed to delete task");
                self.notifier
                    .notify(NoticeKind::Error, "Failed to delete task");
                Err(err.into())
            }
        }
    }
}

async fn save_record<R: RemoteStore>(shared: Arc<PanelShared<R>>) -> SaveOutcome {
    match shared.lifecycle.route().await {
        Route::Create(permit) => {
            let draft = {
                let mut state = shared.lock();
                if !state.draft.has_required_fields() {
                    debug!(session = %shared.session_id, "create withheld until title is set");
                    return SaveOutcome::Withheld;
                }
                state.save_state = SaveState::Creating;
                state.draft.clone()
            };

            match shared.remote.create_task(&draft.create_payload()).await {
                Ok(id) => {
                    // Waiters resume as updates and diff against this baseline.
                    shared.finish_success(|state| state.baseline = draft);
                    permit.succeed(id.clone());
                    info!(session = %shared.session_id, record_id = %id, "task created");
                    shared.notifier.notify(NoticeKind::Success, "Task created");
                    SaveOutcome::Created(id)
                }
                Err(err) => {
                    drop(permit);
                    let err = SyncError::from(err);
                    shared.finish_failure("Failed to create task", &err);
                    SaveOutcome::Failed(err)
                }
            }
        }
        Route::Update(id) => {
            let patch = {
                let mut state = shared.lock();
                if !state.draft.has_required_fields() {
                    if state.save_state == SaveState::Dirty {
                        state.save_state = SaveState::Idle;
                    }
                    debug!(session = %shared.session_id, record_id = %id, "blank title not saved");
                    return SaveOutcome::Withheld;
                }
                let patch = state.draft.diff(&state.baseline);
                if patch.is_empty() {
                    if state.save_state == SaveState::Dirty {
                        state.save_state = SaveState::Idle;
                    }
                    return SaveOutcome::Unchanged;
                }
                state.save_state = SaveState::Saving;
                patch
            };

            match shared.remote.update_task(&id, &patch).await {
                Ok(()) => {
                    debug!(session = %shared.session_id, record_id = %id, "task saved");
                    shared.finish_success(|state| patch.apply_to(&mut state.baseline));
                    SaveOutcome::Updated(id)
                }
                Err(err) => {
                    let err = SyncError::from(err);
                    shared.finish_failure("Failed to save task", &err);
                    SaveOutcome::Failed(err)
                }
            }
        }
    }
}

fn validate_option(
    definition: &CustomFieldDefinition,
    value: &FieldValue,
) -> Result<(), SyncError> {
    if definition.kind != CustomFieldKind::Select || definition.options.is_empty() {
        return Ok(());
    }
    match value {
        FieldValue::Null => Ok(()),
        FieldValue::Text(choice) if definition.options.iter().any(|option| option == choice) => {
            Ok(())
        }
        _ => Err(SyncError::Validation("a listed option")),
    }
}
