//! Back-pressured decode pipeline
//!
//! Three owned stage threads and the decoder's completion callback pass
//! [`FrameUnit`]s through two queues. Three counting permits bound how many
//! units may sit in the input cache, inside the device, and in the output
//! cache. A run ends when the end-of-stream sentinel has travelled through
//! every stage.

mod completion;
mod context;
mod frame_queue;
mod frame_unit;
mod orchestrator;
mod semaphore;
mod sink;
mod source;
mod submission;

pub use completion::CompletionStage;
pub use context::{PipelineContext, PipelineProgress, RunReport};
pub use frame_queue::{FrameQueue, QueueStats};
pub use frame_unit::FrameUnit;
pub use orchestrator::{Pipeline, PipelineBuilder};
pub use semaphore::{CountingPermit, PermitClosed};
pub use sink::SinkStage;
pub use source::SourceStage;
pub use submission::SubmissionStage;
