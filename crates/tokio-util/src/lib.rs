//! Event broadcasting helpers used by the sync pipeline.

mod event_sender;
mod event_stream;

pub use event_sender::EventSender;
pub use event_stream::EventStream;
