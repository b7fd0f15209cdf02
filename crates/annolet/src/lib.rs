//! annolet: staged JSONL annotation pipeline.
//!
//! Files deposited under `input/*.jsonl` in a blob store are split into
//! lines, each line is annotated by an inference capability with bounded
//! retry, and results are written back as time-windowed batch files under
//! `output/`. A serialized stats actor aggregates counters across the
//! stages.

pub mod aggregator;
pub mod annotator;
pub mod intake;
pub mod message;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod store;
pub mod transport;

pub use aggregator::{FLUSH_THRESHOLD, FlushReport, ResultAggregator, output_key};
pub use annotator::{AnnotateError, Annotator, EchoAnnotator, HttpAnnotator};
pub use intake::{
    IntakeError, IntakeReport, UploadEvent, UploadEventKind, handle_upload_event, split_file,
};
pub use message::{
    BATCH_WINDOW_MS, FileIntakeMessage, ProcessingMessage, ResultMessage, batch_id,
};
pub use pipeline::{Pipeline, PipelineConfig};
pub use processor::{LineProcessor, MAX_RETRIES, ProcessError, ProcessOutcome};
pub use queue::{Delivery, Queue, QueueReceiver, queue};
pub use stats::{StatsDelta, StatsError, StatsHandle, StatsSnapshot};
pub use store::{BlobStore, MemoryStore, StoreError};
