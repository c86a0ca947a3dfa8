//! Local-edit to server reconciliation primitives.

pub mod debounce;
pub mod field;
pub mod ledger;
pub mod lifecycle;

pub use debounce::Debouncer;
pub use field::{CommitMode, CommitOutcome, DebouncedField, Reconciliation};
pub use ledger::{FlushObserver, FlushPolicy, FlushReport, LedgerHandle};
pub use lifecycle::{CreatePermit, FieldSink, LifecycleState, RecordLifecycle, Route, ValueBinding};
