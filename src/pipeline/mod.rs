//! Buffering and fan-out between acquisition and persistence
//!
//! ```text
//! [AcquisitionLoop] ──► AcquisitionQueue ──► [DistributionHub] ──► LiveView
//!                                                             ├──► FileRotator
//!                                                             └──► StagingWriter
//! ```
//!
//! The queue is the only backpressured handoff: a full queue blocks the
//! acquisition thread and the device FIFO absorbs the difference.

pub mod hub;
pub mod live_view;
pub mod queue;

pub use hub::{DistributionHub, HubCommand, HubHandle, HubSummary};
pub use live_view::{LiveView, LIVE_VIEW_IDLE_TIMEOUT};
pub use queue::{acquisition_queue, Dequeued, QueueConsumer, QueueProducer};
