//! Shared vocabulary types for the OmniMessage Gateway workspace.
//!
//! Kept separate from `omni-router`/`omni-adapters`/`omni-scheduler` the same
//! way `fc-common` sits underneath `fc-router`/`fc-scheduler`: every other
//! crate depends on this one, this one depends on nothing in the workspace.

pub mod error;
pub mod logging;
pub mod message;
pub mod routing;
pub mod schedule;

pub use error::GatewayErrorKind;
pub use logging::{init_default_logging, init_logging};
pub use message::{Attachment, Channel, Message, MessageStatus, Priority, SendResult};
pub use routing::{DeadLetterEntry, RoutingRule};
pub use schedule::{ScheduleEntry, ScheduleStatus};
