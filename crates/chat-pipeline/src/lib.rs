pub mod config;
pub mod events;
pub mod fallback;
pub mod orchestrator;
pub mod replies;

pub use config::PipelineConfig;
pub use events::{EventSink, PipelineEvent, RecordingEventSink, TracingEventSink, EVENT_TARGET};
pub use fallback::{FallbackResolver, FallbackResponse};
pub use orchestrator::{ChatPipeline, PipelineOutcome, SweepStats};
pub use replies::short_circuit_reply;

pub use chat_error::{ChatError, FailureKind, Result};
