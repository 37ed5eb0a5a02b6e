// 事件到推理的处理管线
pub mod aggregator;
pub mod error;
pub mod gemini;
pub mod handler;
pub mod payload;
pub mod storage;

pub use error::{FailureKind, PipelineError};
pub use handler::{EventHandler, InvocationOutcome};
