//! Remediation engine: single-file text fixes applied under a
//! backup, verify, write protocol, with undo and a persisted fix history.

pub mod engine;
pub mod history;
pub mod verify;

pub use engine::{FixError, FixPreview, FixRequest, FixResult, RemediationEngine, UndoResult};
pub use history::{FixHistory, FixRecord, HistoryError};
pub use verify::{verify, VerifyError};
