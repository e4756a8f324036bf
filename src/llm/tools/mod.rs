pub mod handoff;
mod tool;

pub use handoff::HandoffTool;
pub use tool::{FunctionDescriptor, Tool, ToolDescriptor, ToolRegistry};
