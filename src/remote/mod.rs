//! Remote persistence contract for tasks and custom-field values.

mod http;

use std::future::Future;

use crate::error::RemoteError;
use crate::types::{CreateTaskPayload, FieldValue, RecordId, TaskPatch};

pub use http::{HttpRemote, RemoteConfig};

/// Writes issued by the reconciliation layer.
///
/// Every method is a single request; callers never retry.
pub trait RemoteStore: Send + Sync + 'static {
    fn create_task(
        &self,
        payload: &CreateTaskPayload,
    ) -> impl Future<Output = Result<RecordId, RemoteError>> + Send;

    fn update_task(
        &self,
        id: &RecordId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn delete_task(&self, id: &RecordId) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn create_field_value(
        &self,
        task_id: &RecordId,
        definition_id: &RecordId,
        value: &FieldValue,
    ) -> impl Future<Output = Result<RecordId, RemoteError>> + Send;

    fn update_field_value(
        &self,
        value_id: &RecordId,
        value: &FieldValue,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
