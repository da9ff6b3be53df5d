//! The fork/payload bridge.
//!
//! A proof-of-stake consensus client submits candidate payloads and fork choice updates through
//! the [`PayloadBridge`]. The stage loop calls [`PayloadBridge::prepare_cycle`] before each cycle
//! and [`PayloadBridge::on_cycle_complete`] after it; the head the cycle ends on decides the
//! [`PayloadStatus`] handed back to the client.

mod bridge;
mod error;
mod status;

pub use bridge::PayloadBridge;
pub use error::BridgeError;
pub use status::{ForkchoiceState, PayloadStatus, PayloadStatusKind, PendingStatus};
