pub mod channel;
pub mod error;
pub mod manager;
pub mod types;

pub use channel::{Channel, StreamHandle};
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{ChannelCapabilities, ChannelStatus, MessageFormat, MessageId, OutboundMessage};
