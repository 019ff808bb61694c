//! Static tool table and the built-in arithmetic tools.

pub mod math;
pub mod registry;

pub use math::{math_tools, AddTool, DivideTool, MultiplyTool, SubtractTool};
pub use registry::{ToolDescriptor, ToolRegistry, ValidatedCall};
