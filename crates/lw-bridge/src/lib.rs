//! Bridge between the live-mode pipeline and the outside world.
//!
//! - [`receiver`]: local HTTP listener the injected browser script reports to
//! - [`tracking_script`]: the browser-side script and its injection into the
//!   frontend entry page
//! - [`event_bus`]: fan-out of [`protocol::LiveEvent`]s to host subscribers
//! - [`api_error`]: HTTP error responses for the ingestion routes

pub mod api_error;
pub mod event_bus;
pub mod protocol;
pub mod receiver;
pub mod tracking_script;

pub use event_bus::EventBus;
pub use protocol::{LiveEvent, Notification};
pub use receiver::{BrowserReport, ExternalEventReceiver, ReceiverError};
