//! Live-mode controller for the livewire development monitor.
//!
//! Ties the adapters together and owns the policy layers:
//! - Notification scheduling (idle gating, batching, dedup)
//! - Network call tracking against the project's route inventory
//! - Session accounting and the end-of-session report
//! - Deployment readiness checks
//! - The [`LiveController`] lifecycle

pub mod controller;
pub mod git;
pub mod network_tracker;
pub mod performance;
pub mod readiness;
pub mod scheduler;
pub mod session_logger;

pub use controller::{
    ActivationReport, ComponentReport, ControllerError, DeactivationReport, LiveController, LiveState, LiveStatus,
};
pub use git::{CommitOutcome, GitCommitter, GitError};
pub use performance::{PerformanceError, PerformanceMonitor, PerformanceReport};
pub use readiness::{DeploymentChecker, ReadinessCheck, ReadinessReport};
pub use scheduler::{EnqueueOutcome, NotificationScheduler};
