//! Device tools exposed to the voice assistant

pub mod dispatch;
pub mod schema;

pub use dispatch::{DEVICE_NOT_FOUND, ToolCall, ToolDispatcher, ToolName, ToolResponse, ToolResult};
pub use schema::{FunctionDeclaration, declarations};
