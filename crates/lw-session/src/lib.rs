//! Subprocess side of live mode: the ProcessOutputMonitor adapter, bounded
//! one-shot commands and the test runner built on them.

pub mod bounded;
pub mod process_monitor;
pub mod test_runner;

pub use bounded::{run_bounded, CommandOutput, ProcessError};
pub use process_monitor::{ErrorEntry, OutputLine, ProcessOutputMonitor, ProcessStatus, Stream};
pub use test_runner::{Framework, TestResult, TestRunner, TestScope, TestStats};
