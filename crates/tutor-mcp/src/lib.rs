mod protocol;
mod server;
pub mod tools;

pub use protocol::{JsonRpcResponse, ToolResult};
pub use server::{run_server, ServerOptions};
pub use tools::ToolContext;
