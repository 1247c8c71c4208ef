use std::{collections::VecDeque, net::IpAddr, net::SocketAddr};

use thiserror::Error;

use crate::{config::Credentials, types::ConnectionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("wifi association failed: {0}")]
    Link(String),
    #[error("dns request for `{host}` could not be submitted (code {code})")]
    ResolveSubmit { host: String, code: i32 },
    #[error("broker connect request rejected locally (code {0})")]
    Connect(i32),
    #[error("publish to `{topic}` rejected by transport (code {code})")]
    Publish { topic: String, code: i32 },
}

impl NetError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Link(_) => -1,
            Self::ResolveSubmit { code, .. } | Self::Publish { code, .. } => *code,
            Self::Connect(code) => *code,
        }
    }
}

/// Outcome of submitting a name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Address already known; no callback will follow.
    Ready(IpAddr),
    /// Lookup in flight; a [`NetworkEvent::Resolved`] follows.
    Pending,
}

/// Connection parameters sent with the broker handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub credentials: Option<Credentials>,
}

/// Asynchronous completions delivered during the network-advance step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Resolved {
        host: String,
        address: Option<IpAddr>,
    },
    ConnectionStatus(ConnectionStatus),
    PublishComplete {
        topic: String,
        result: Result<(), i32>,
    },
}

pub trait NameResolver {
    /// Looks up `host`, answering immediately when the address is known.
    /// At most one lookup is in flight at a time.
    fn resolve(&mut self, host: &str) -> Result<Resolution, NetError>;
}

pub trait BrokerTransport {
    fn connect(&mut self, broker: SocketAddr, info: &ConnectInfo) -> Result<(), NetError>;

    /// Enqueues a QoS 0, non-retained publish. `Ok` only acknowledges the local
    /// enqueue; nothing waits for the broker.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetError>;
}

/// Platform network stack: resolver, broker transport and the per-tick
/// completion queue.
pub trait NetworkStack: NameResolver + BrokerTransport {
    /// Hands over every completion queued since the previous call.
    fn drain_events(&mut self) -> Vec<NetworkEvent>;
}

/// Single-threaded completion queue shared by platform callbacks.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<NetworkEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: NetworkEvent) {
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<NetworkEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drains_in_arrival_order() {
        let mut queue = EventQueue::default();
        queue.push(NetworkEvent::ConnectionStatus(ConnectionStatus::Accepted));
        queue.push(NetworkEvent::ConnectionStatus(ConnectionStatus::Disconnected));

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                NetworkEvent::ConnectionStatus(ConnectionStatus::Accepted),
                NetworkEvent::ConnectionStatus(ConnectionStatus::Disconnected),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn error_codes() {
        assert_eq!(NetError::Connect(-4).code(), -4);
        assert_eq!(
            NetError::Publish {
                topic: "rack/01/door".to_string(),
                code: -1
            }
            .code(),
            -1
        );
    }
}
