use std::net::{IpAddr, SocketAddr};

use crate::net::{
    BrokerTransport, ConnectInfo, EventQueue, NameResolver, NetError, NetworkEvent, NetworkStack,
    Resolution,
};

/// Recording network stack used across the crate's tests.
#[derive(Debug, Default)]
pub struct MockNetwork {
    pub cached: Option<IpAddr>,
    pub resolve_error: Option<NetError>,
    pub connect_error: Option<NetError>,
    pub publish_error: Option<NetError>,
    pub resolves: Vec<String>,
    pub connects: Vec<(SocketAddr, ConnectInfo)>,
    pub publish_calls: usize,
    pub published: Vec<(String, Vec<u8>)>,
    pub queue: EventQueue,
}

impl MockNetwork {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn ready(address: IpAddr) -> Self {
        Self {
            cached: Some(address),
            ..Self::default()
        }
    }

    pub fn published_text(&self) -> Vec<(String, String)> {
        self.published
            .iter()
            .map(|(topic, payload)| (topic.clone(), String::from_utf8_lossy(payload).into_owned()))
            .collect()
    }
}

impl NameResolver for MockNetwork {
    fn resolve(&mut self, host: &str) -> Result<Resolution, NetError> {
        self.resolves.push(host.to_string());
        if let Some(err) = self.resolve_error.clone() {
            return Err(err);
        }
        Ok(match self.cached {
            Some(address) => Resolution::Ready(address),
            None => Resolution::Pending,
        })
    }
}

impl BrokerTransport for MockNetwork {
    fn connect(&mut self, broker: SocketAddr, info: &ConnectInfo) -> Result<(), NetError> {
        self.connects.push((broker, info.clone()));
        match self.connect_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetError> {
        self.publish_calls += 1;
        if let Some(err) = self.publish_error.clone() {
            return Err(err);
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

impl NetworkStack for MockNetwork {
    fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.queue.drain()
    }
}
