//! Human approval of generated content before dispatch.

pub mod model;
pub mod session;
pub mod ws;

pub use model::{ApprovalAction, ApprovalEvent};
pub use session::{ApprovalService, ApprovalTransport, Disconnected, SessionOutcome};
