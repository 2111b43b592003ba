pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod planner;
pub mod request;
pub mod slice;
pub mod transport;

pub use engine::DownloadEngine;
pub use error::DownloadError;
pub use orchestrator::{DownloadReport, FailureSignal, Orchestrator};
pub use planner::{DownloadPlan, Planner, ProbeInfo};
pub use request::DownloadRequest;
pub use slice::{build_slices, SliceDescriptor, SliceStatus, STREAM_CHUNK_SIZE};
pub use transport::{RetryPolicy, SliceTransporter, TransferOutcome};

#[cfg(test)]
mod test_support;
