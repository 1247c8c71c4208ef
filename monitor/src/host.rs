use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming,
    MqttOptions, Outgoing, QoS,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rack_common::{
    config::{Credentials, LoopConfig, RackConfig},
    net::{
        BrokerTransport, ConnectInfo, EventQueue, NameResolver, NetError, NetworkEvent,
        NetworkStack, Resolution,
    },
    sensors::{AnalogInput, DigitalInput},
    ConnectionStatus, Monitor,
};

const REQUEST_CHANNEL_CAPACITY: usize = 32;

// Transport error codes, numbered like the lwIP `err_t` values they stand in for.
const ERR_MEM: i32 = -1;
const ERR_ISCONN: i32 = -10;
const ERR_CONN: i32 = -11;

/// Ticks between simulated door toggles.
const SIMULATED_DOOR_PERIOD: u64 = 15;
/// Raw ADC sample for roughly 27 °C with the default calibration.
const SIMULATED_ADC_BASELINE: u16 = 876;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("=== starting rack monitor ===");

    let config = load_config();
    // The host is already on its network; association only applies on the device.
    info!(
        "[Wi-Fi] host build, skipping association with `{}`",
        config.network.wifi_ssid
    );

    let mut net = HostNetwork::new();
    let mut monitor = Monitor::new(&config, SimulatedDoor::default(), SimulatedAdc::default())
        .context("invalid monitor configuration")?;

    monitor
        .start(&mut net)
        .context("failed to submit broker name resolution")?;

    loop {
        net.advance();

        let report = monitor.tick(&mut net);
        debug!(
            tick = monitor.ticks(),
            events = report.events,
            door = ?report.door,
            temperature = ?report.temperature,
            state = monitor.session().state().as_str(),
            "tick complete"
        );

        tokio::time::sleep(monitor.tick_interval()).await;
    }
}

fn load_config() -> RackConfig {
    let mut config = RackConfig::default();

    if std::env::var("MONITOR_VARIANT").is_ok_and(|variant| variant.trim() == "button") {
        config.main_loop = LoopConfig::button_only();
    }

    if let Ok(ssid) = std::env::var("WIFI_SSID") {
        config.network.wifi_ssid = ssid;
    }
    if let Ok(pass) = std::env::var("WIFI_PASS") {
        config.network.wifi_pass = pass;
    }
    if let Ok(host) = std::env::var("MQTT_BROKER") {
        config.network.mqtt_host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        config.network.mqtt_port = port;
    }
    if let Ok(username) = std::env::var("MQTT_USER") {
        let password = std::env::var("MQTT_PASS").unwrap_or_default();
        config.network.mqtt_credentials = Some(Credentials { username, password });
    }
    if let Ok(base) = std::env::var("MQTT_BASE_TOPIC") {
        config.topics.base = base;
    }
    if let Ok(device_id) = std::env::var("MQTT_RACK_NUMBER") {
        config.topics.device_id = device_id;
    }
    if let Some(unit) = std::env::var("TEMPERATURE_UNITS")
        .ok()
        .and_then(|value| value.chars().next())
    {
        config.sensors.temperature_unit = unit;
    }
    if let Some(interval) = env_parse::<u64>("TICK_INTERVAL_MS") {
        config.main_loop.tick_interval_ms = interval;
    }

    config.sanitize();
    config
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

enum HostEvent {
    Network(NetworkEvent),
    PublishFlushed,
}

/// tokio/rumqttc network stack. Background tasks only enqueue; completions
/// reach the session when [`HostNetwork::advance`] runs at the top of a tick.
struct HostNetwork {
    tx: mpsc::UnboundedSender<HostEvent>,
    rx: mpsc::UnboundedReceiver<HostEvent>,
    queue: EventQueue,
    lookup_in_flight: bool,
    client: Option<AsyncClient>,
    in_flight_topics: VecDeque<String>,
}

impl HostNetwork {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            queue: EventQueue::default(),
            lookup_in_flight: false,
            client: None,
            in_flight_topics: VecDeque::new(),
        }
    }

    /// Moves completions from the background tasks into the tick queue.
    fn advance(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                HostEvent::Network(event) => {
                    match &event {
                        NetworkEvent::Resolved { .. } => self.lookup_in_flight = false,
                        NetworkEvent::ConnectionStatus(status) if !status.is_accepted() => {
                            self.client = None;
                        }
                        _ => {}
                    }
                    self.queue.push(event);
                }
                HostEvent::PublishFlushed => {
                    if let Some(topic) = self.in_flight_topics.pop_front() {
                        self.queue.push(NetworkEvent::PublishComplete {
                            topic,
                            result: Ok(()),
                        });
                    }
                }
            }
        }
    }
}

impl NameResolver for HostNetwork {
    fn resolve(&mut self, host: &str) -> Result<Resolution, NetError> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(Resolution::Ready(address));
        }
        if self.lookup_in_flight {
            return Ok(Resolution::Pending);
        }

        self.lookup_in_flight = true;
        let host = host.to_string();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let address = match tokio::net::lookup_host((host.as_str(), 0)).await {
                Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
                Err(err) => {
                    warn!("[DNS] lookup for `{host}` failed: {err}");
                    None
                }
            };
            let _ = tx.send(HostEvent::Network(NetworkEvent::Resolved { host, address }));
        });

        Ok(Resolution::Pending)
    }
}

impl BrokerTransport for HostNetwork {
    fn connect(&mut self, broker: SocketAddr, info: &ConnectInfo) -> Result<(), NetError> {
        if self.client.is_some() {
            return Err(NetError::Connect(ERR_ISCONN));
        }

        let mut options = MqttOptions::new(&info.client_id, broker.ip().to_string(), broker.port());
        options.set_keep_alive(Duration::from_secs(u64::from(info.keep_alive_secs)));
        options.set_clean_session(true);
        if let Some(credentials) = &info.credentials {
            options.set_credentials(&credentials.username, &credentials.password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        spawn_event_pump(eventloop, self.tx.clone());
        self.client = Some(client);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetError> {
        let client = self.client.as_ref().ok_or_else(|| NetError::Publish {
            topic: topic.to_string(),
            code: ERR_CONN,
        })?;

        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|err| {
                debug!("try_publish rejected: {err}");
                NetError::Publish {
                    topic: topic.to_string(),
                    code: ERR_MEM,
                }
            })?;

        self.in_flight_topics.push_back(topic.to_string());
        Ok(())
    }
}

impl NetworkStack for HostNetwork {
    fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.queue.drain()
    }
}

/// Polls the rumqttc event loop until the first failure. rumqttc reconnects on
/// the next `poll` after an error, so stopping here keeps the session down.
fn spawn_event_pump(mut eventloop: EventLoop, tx: mpsc::UnboundedSender<HostEvent>) {
    tokio::spawn(async move {
        loop {
            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ConnAck { code, .. }))) => {
                    let status = status_for_return_code(code);
                    let _ = tx.send(HostEvent::Network(NetworkEvent::ConnectionStatus(status)));
                    if status.is_accepted() {
                        continue;
                    }
                    break;
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    info!("broker closed the connection");
                    HostEvent::Network(NetworkEvent::ConnectionStatus(
                        ConnectionStatus::Disconnected,
                    ))
                }
                Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                    let _ = tx.send(HostEvent::PublishFlushed);
                    continue;
                }
                Ok(_) => continue,
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    HostEvent::Network(NetworkEvent::ConnectionStatus(status_for_error(&err)))
                }
            };

            let _ = tx.send(event);
            break;
        }
    });
}

fn status_for_return_code(code: ConnectReturnCode) -> ConnectionStatus {
    match code {
        ConnectReturnCode::Success => ConnectionStatus::Accepted,
        ConnectReturnCode::RefusedProtocolVersion => ConnectionStatus::RefusedProtocolVersion,
        ConnectReturnCode::BadClientId => ConnectionStatus::IdentifierRejected,
        ConnectReturnCode::ServiceUnavailable => ConnectionStatus::ServerUnavailable,
        ConnectReturnCode::BadUserNamePassword => ConnectionStatus::BadCredentials,
        ConnectReturnCode::NotAuthorized => ConnectionStatus::NotAuthorized,
    }
}

fn status_for_error(err: &ConnectionError) -> ConnectionStatus {
    match err {
        ConnectionError::ConnectionRefused(code) => status_for_return_code(*code),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => {
            ConnectionStatus::Timeout
        }
        _ => ConnectionStatus::Disconnected,
    }
}

/// Door contact stand-in: idles high (open) and pulls low for a stretch of
/// ticks every [`SIMULATED_DOOR_PERIOD`].
#[derive(Default)]
struct SimulatedDoor {
    reads: u64,
}

impl DigitalInput for SimulatedDoor {
    fn is_high(&mut self) -> bool {
        self.reads = self.reads.saturating_add(1);
        (self.reads / SIMULATED_DOOR_PERIOD) % 2 == 0
    }
}

/// Temperature stand-in: a slow sawtooth a few counts around room temperature.
#[derive(Default)]
struct SimulatedAdc {
    reads: u64,
}

impl AnalogInput for SimulatedAdc {
    fn read_raw(&mut self) -> u16 {
        self.reads = self.reads.saturating_add(1);
        // Changes every 5 reads so most ticks see an unchanged value.
        let step = ((self.reads / 5) % 8) as u16;
        SIMULATED_ADC_BASELINE - 4 + step
    }
}
