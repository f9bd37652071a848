//! Model gateway adapter.
//!
//! The one surface the engine talks to models through: completion with
//! optional streaming and tool calling, transparent retry, long-input
//! chunk-summarisation, and fallback-tool injection for models without
//! native search or code execution. The core never branches on model
//! identity; capability flags on the backend drive everything.

pub mod backends;
pub mod gateway;
pub mod longtext;
pub mod request;
pub mod response;
pub mod retry;
pub mod sink;

pub use backends::mock::MockBackend;
pub use backends::openai_compat::OpenAiCompatBackend;
pub use backends::{BackendFactory, LlmBackend, ModelCapabilities};
pub use gateway::ModelGateway;
pub use request::{ChatMessage, CompletionRequest, MessageRole, ToolChoice, ToolDefinition};
pub use response::{FinishReason, ModelResponse, TokenUsage, ToolCallData};
pub use sink::{ChannelSink, NullSink, StreamSegment, StreamSink, ThinkingSplitter, strip_thinking};
