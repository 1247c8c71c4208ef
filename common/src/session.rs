use std::net::{IpAddr, SocketAddr};

use log::{debug, info, warn};

use crate::{
    config::RackConfig,
    net::{BrokerTransport, ConnectInfo, NameResolver, NetError, NetworkEvent, Resolution},
    types::{ConnectionState, ConnectionStatus},
};

/// Broker connection lifecycle.
///
/// `Disconnected -> Resolving -> Connecting -> Connected`, with any
/// non-accepted status dropping back to `Disconnected`. There is no
/// reconnect: once disconnected the session stays that way until restart.
#[derive(Debug, Clone)]
pub struct BrokerSession {
    host: String,
    port: u16,
    info: ConnectInfo,
    state: ConnectionState,
    broker_address: Option<IpAddr>,
    last_status: Option<ConnectionStatus>,
    started: bool,
}

impl BrokerSession {
    pub fn new(config: &RackConfig) -> Self {
        Self {
            host: config.network.mqtt_host.clone(),
            port: config.network.mqtt_port,
            info: ConnectInfo {
                client_id: config.session.client_id.clone(),
                keep_alive_secs: config.session.keep_alive_secs,
                credentials: config.network.mqtt_credentials.clone(),
            },
            state: ConnectionState::Disconnected,
            broker_address: None,
            last_status: None,
            started: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn broker_address(&self) -> Option<IpAddr> {
        self.broker_address
    }

    /// The transport status that last moved the session, if any.
    pub fn last_status(&self) -> Option<ConnectionStatus> {
        self.last_status
    }

    /// Requests resolution of the broker host. If the resolver already knows the
    /// address the connect request is issued before this returns.
    ///
    /// A submission error is fatal to startup and is returned to the caller.
    pub fn start<N>(&mut self, net: &mut N) -> Result<(), NetError>
    where
        N: NameResolver + BrokerTransport,
    {
        if self.started {
            warn!("[MQTT] session already started; ignoring");
            return Ok(());
        }
        self.started = true;
        self.state = ConnectionState::Resolving;

        match net.resolve(&self.host) {
            Ok(Resolution::Ready(address)) => {
                self.on_resolved(Some(address), net);
                Ok(())
            }
            Ok(Resolution::Pending) => {
                info!("[DNS] resolving `{}`...", self.host);
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    /// Applies one completion delivered by the network-advance step.
    pub fn handle_event<T: BrokerTransport>(&mut self, event: &NetworkEvent, transport: &mut T) {
        match event {
            NetworkEvent::Resolved { address, .. } => self.on_resolved(*address, transport),
            NetworkEvent::ConnectionStatus(status) => self.on_connection_status(*status),
            NetworkEvent::PublishComplete { topic, result } => match result {
                Ok(()) => debug!("[MQTT] publish to '{topic}' completed"),
                Err(code) => warn!("[MQTT] publish to '{topic}' failed after enqueue: {code}"),
            },
        }
    }

    fn on_resolved<T: BrokerTransport>(&mut self, address: Option<IpAddr>, transport: &mut T) {
        if self.state != ConnectionState::Resolving {
            debug!(
                "[DNS] ignoring resolution result in state {}",
                self.state.as_str()
            );
            return;
        }

        let Some(address) = address else {
            warn!("[DNS] failed to resolve `{}`; staying offline", self.host);
            self.state = ConnectionState::Disconnected;
            return;
        };

        info!("[DNS] resolved `{}` -> {address}", self.host);
        self.broker_address = Some(address);
        self.state = ConnectionState::Connecting;

        info!("[MQTT] connecting to broker as `{}`...", self.info.client_id);
        if let Err(err) = transport.connect(SocketAddr::new(address, self.port), &self.info) {
            warn!("[MQTT] {err}");
            self.state = ConnectionState::Disconnected;
        }
    }

    fn on_connection_status(&mut self, status: ConnectionStatus) {
        match (self.state, status.is_accepted()) {
            (ConnectionState::Connecting, true) => {
                info!("[MQTT] connected to broker");
                self.state = ConnectionState::Connected;
                self.last_status = Some(status);
            }
            (ConnectionState::Connecting | ConnectionState::Connected, false) => {
                warn!(
                    "[MQTT] connection lost or refused: {status:?} (code {})",
                    status.code()
                );
                self.state = ConnectionState::Disconnected;
                self.last_status = Some(status);
            }
            (state, _) => {
                debug!(
                    "[MQTT] ignoring connection status {status:?} in state {}",
                    state.as_str()
                );
            }
        }
    }
}
