//! Analysis lifecycle: start, progress, cancellation, settlement

mod cancel;
mod engine;
mod events;
mod pipeline;
mod types;

pub use cancel::CancellationToken;
pub use engine::{AnalysisTracker, TrackerBuilder};
pub use events::{AnalysisEvent, EventBus};
pub use types::{
    Accepted, AnalysisRequest, AnalysisStatus, CancelOutcome, CancelReply, ReportedStatus,
    Settlement, SettledOutcome, Stage, StatusReply,
};
