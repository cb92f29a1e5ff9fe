pub mod config;
pub mod election;
pub mod error;
pub mod leader;
pub mod mission;
pub mod node;
pub mod protocol;
pub mod router;
pub mod shutdown;
pub mod transport;

pub use config::{ElectionConfig, NodeConfig};
pub use election::{DictatorNode, ElectionState, NodeContext};
pub use error::{DictatorError, Result};
pub use mission::{Mission, TenureContext};
pub use node::Node;
pub use protocol::{Envelope, Kind, NodeId};
pub use router::{CommandHandler, CommandRouter};
pub use transport::Packet;
