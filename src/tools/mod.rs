//! Tools module - Tool descriptors, the registry and built-in tools
//!
//! Tools are described once with a name, parameter schema and handler, then
//! registered in a [`ToolRegistry`] shared by every agent that uses them.

pub mod builtin;
pub mod descriptor;
pub mod registry;

pub use builtin::{fetch_url_tool, file_tools, shell_tools, web_tools};
pub use descriptor::{
    HandlerResult, ParamSpec, ParamType, ToolArgs, ToolBuilder, ToolDescriptor, ToolHandler,
    ToolOutput,
};
pub use registry::{ToolError, ToolRegistry};
