//! Session Module
//!
//! Request lifecycle, cancellation, delta aggregation and callbacks.

pub mod aggregator;
pub mod cancel;
pub mod events;
pub mod stream_session;

pub use aggregator::DeltaAggregator;
pub use cancel::{CancelHandle, CancelReason};
pub use events::{ChatCallbacks, ResponseMeta, SessionOutcome};
pub use stream_session::{SessionSettings, SessionState, StreamSession};
