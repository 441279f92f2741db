//! Tools the model can call, and the code that runs them.

pub mod executor;
pub mod registry;

pub use executor::{ToolExecutor, ToolResult};
pub use registry::{ArgKind, ArgSchema, ToolDeclaration, ToolRegistry};
