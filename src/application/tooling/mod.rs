mod error;
mod interface;
mod process;
mod registry;

pub use error::TransportError;
pub use interface::{ToolDescriptor, ToolTransport};
pub use process::{payload_is_error, payload_text, ToolServer};
pub use registry::{DispatchError, RegisteredTool, ToolRegistry};
