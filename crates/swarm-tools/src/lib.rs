//! Tool registry and built-in tools.
//!
//! Tools are the model-callable side effects of the engine. The registry
//! catalogs native and fallback tools and dispatches invocations coming
//! out of model output; handler failures are surfaced back to the model
//! as tool-result content rather than raised through the step.

pub mod browser;
pub mod files;
pub mod interpreter;
pub mod registry;
pub mod tool;

pub use browser::SandboxBrowser;
pub use files::{ReadFileTool, WriteFileTool};
pub use interpreter::SandboxCodeInterpreter;
pub use registry::ToolRegistry;
pub use tool::Tool;
