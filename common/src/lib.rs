pub mod config;
pub mod monitor;
pub mod net;
pub mod publisher;
pub mod sensors;
pub mod session;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{DroppedPublishPolicy, LoopConfig, RackConfig};
pub use monitor::{Monitor, StartupError, TickReport};
pub use net::{
    BrokerTransport, ConnectInfo, EventQueue, NameResolver, NetError, NetworkEvent, NetworkStack,
    Resolution,
};
pub use publisher::{LastPublished, Publisher};
pub use sensors::{AnalogInput, DigitalInput};
pub use session::BrokerSession;
pub use topics::{TopicError, Topics};
pub use types::{Channel, ConnectionState, ConnectionStatus, PublishOutcome, SensorSample};
