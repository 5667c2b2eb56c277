//! Wire types shared between the deskpilot engine and its stdio transport.

mod config_types;
mod tools;
mod wire;

pub use config_types::ConfirmationMode;
pub use config_types::ResultClass;
pub use config_types::ShellKind;
pub use tools::*;
pub use wire::ContentItem;
pub use wire::ToolCallRequest;
pub use wire::ToolCallResponse;
