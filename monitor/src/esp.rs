use std::{
    ffi::c_void,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use embedded_svc::{
    mqtt::client::{Event as _, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::{Gpio34, Gpio5, Input, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    handle::RawHandle,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    nvs::EspDefaultNvsPartition,
    sys,
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use rack_common::{
    config::{AuthMode, LoopConfig, NetworkConfig, RackConfig},
    net::{
        BrokerTransport, ConnectInfo, EventQueue, NameResolver, NetError, NetworkEvent,
        NetworkStack, Resolution,
    },
    sensors::{AnalogInput, DigitalInput},
    ConnectionStatus, Monitor, StartupError,
};

const DNS_THREAD_STACK: usize = 4096;
const PLACEHOLDER_CREDENTIAL: &str = "CHANGE_ME";

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    thread::sleep(Duration::from_secs(2));
    info!("=== starting rack monitor ===");

    let config = build_time_config();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let _wifi = connect_wifi(modem, sys_loop, nvs_partition, &config.network)
        .map_err(StartupError::from)
        .context("wifi startup failed")?;

    let door = DoorPin::new(pins.gpio5).context("failed to configure door GPIO")?;
    let adc = TemperatureAdc::new(adc1, pins.gpio34).context("failed to configure ADC")?;

    let mut net = EspNetwork::new();
    let mut monitor =
        Monitor::new(&config, door, adc).context("invalid monitor configuration")?;

    monitor
        .start(&mut net)
        .context("failed to submit broker name resolution")?;

    loop {
        net.advance();

        let report = monitor.tick(&mut net);
        debug!(
            "tick {}: events={} door={:?} temperature={:?} state={}",
            monitor.ticks(),
            report.events,
            report.door,
            report.temperature,
            monitor.session().state().as_str()
        );

        thread::sleep(monitor.tick_interval());
    }
}

fn build_time_config() -> RackConfig {
    let mut config = RackConfig::default();

    if option_env!("MONITOR_VARIANT") == Some("button") {
        config.main_loop = LoopConfig::button_only();
    }
    config.network.wifi_ssid = option_env!("WIFI_SSID")
        .unwrap_or(PLACEHOLDER_CREDENTIAL)
        .to_string();
    config.network.wifi_pass = option_env!("WIFI_PASS")
        .unwrap_or(PLACEHOLDER_CREDENTIAL)
        .to_string();
    if let Some(host) = option_env!("MQTT_BROKER") {
        config.network.mqtt_host = host.to_string();
    }
    if let Some(base) = option_env!("MQTT_BASE_TOPIC") {
        config.topics.base = base.to_string();
    }
    if let Some(device_id) = option_env!("MQTT_RACK_NUMBER") {
        config.topics.device_id = device_id.to_string();
    }
    if let Some(unit) = option_env!("TEMPERATURE_UNITS").and_then(|value| value.chars().next()) {
        config.sensors.temperature_unit = unit;
    }

    config.sanitize();
    config
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> Result<EspWifi<'static>, NetError> {
    let link = |stage: &str, err: sys::EspError| NetError::Link(format!("{stage}: {err}"));

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))
        .map_err(|err| link("driver init", err))?;
    let mut wifi =
        BlockingWifi::wrap(&mut esp_wifi, sys_loop).map_err(|err| link("driver wrap", err))?;

    let auth_method = match network.auth_mode {
        AuthMode::Open => AuthMethod::None,
        AuthMode::Wpa2Personal => AuthMethod::WPA2Personal,
        AuthMode::WpaWpa2Personal => AuthMethod::WPAWPA2Personal,
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| NetError::Link("ssid too long".to_string()))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| NetError::Link("password too long".to_string()))?,
        auth_method,
        ..Default::default()
    }))
    .map_err(|err| link("configuration", err))?;

    wifi.start().map_err(|err| link("start", err))?;
    info!("[Wi-Fi] connecting to `{}`...", network.wifi_ssid);

    let timeout = Duration::from_millis(network.wifi_connect_timeout_ms);
    let started = Instant::now();
    let associated = wifi
        .wifi_mut()
        .connect()
        .and_then(|()| wifi.wifi_wait_while(|| wifi.is_connected().map(|up| !up), Some(timeout)))
        .and_then(|()| {
            let remaining = timeout.saturating_sub(started.elapsed());
            wifi.ip_wait_while(|| wifi.wifi().is_up().map(|up| !up), Some(remaining))
        });

    if let Err(err) = associated {
        if let Err(disconnect_err) = wifi.disconnect() {
            warn!("[Wi-Fi] disconnect after failed association: {disconnect_err}");
        }
        return Err(NetError::Link(format!(
            "`{}` not up within {}ms: {err}",
            network.wifi_ssid, network.wifi_connect_timeout_ms
        )));
    }

    info!("[Wi-Fi] connected in {}ms", started.elapsed().as_millis());
    Ok(esp_wifi)
}

struct DoorPin {
    pin: PinDriver<'static, Gpio5, Input>,
}

impl DoorPin {
    fn new(gpio: Gpio5) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input(gpio)?;
        pin.set_pull(Pull::Up)?;
        Ok(Self { pin })
    }
}

impl DigitalInput for DoorPin {
    fn is_high(&mut self) -> bool {
        self.pin.is_high()
    }
}

struct TemperatureAdc {
    channel: AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>,
    last_raw: u16,
}

impl TemperatureAdc {
    fn new(adc1: ADC1, gpio: Gpio34) -> anyhow::Result<Self> {
        let adc = AdcDriver::new(adc1)?;
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let mut channel = AdcChannelDriver::new(adc, gpio, &config)?;
        // Seeds the fallback used when a later read fails.
        let last_raw = channel
            .read_raw()
            .context("initial ADC sample failed")?;
        Ok(Self { channel, last_raw })
    }
}

impl AnalogInput for TemperatureAdc {
    fn read_raw(&mut self) -> u16 {
        match self.channel.read_raw() {
            Ok(raw) => self.last_raw = raw,
            Err(err) => warn!("adc read failed, reusing last sample: {err:?}"),
        }
        self.last_raw
    }
}

/// esp-idf network stack. The MQTT task and the DNS thread only send into
/// `tx`; nothing reaches the session until [`EspNetwork::advance`].
struct EspNetwork {
    tx: mpsc::Sender<NetworkEvent>,
    rx: mpsc::Receiver<NetworkEvent>,
    queue: EventQueue,
    lookup_in_flight: bool,
    // Declared before `refusal_tx` so the client, and its raw error handler,
    // are gone before the sender the handler points at is freed.
    client: Option<EspMqttClient<'static>>,
    refusal_tx: Option<Box<mpsc::Sender<NetworkEvent>>>,
}

impl EspNetwork {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            queue: EventQueue::default(),
            lookup_in_flight: false,
            client: None,
            refusal_tx: None,
        }
    }

    fn advance(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            match &event {
                NetworkEvent::Resolved { .. } => self.lookup_in_flight = false,
                NetworkEvent::ConnectionStatus(status) if !status.is_accepted() => {
                    // Dropping the client stops esp-mqtt's own reconnect timer.
                    self.client = None;
                }
                _ => {}
            }
            self.queue.push(event);
        }
    }
}

impl NameResolver for EspNetwork {
    fn resolve(&mut self, host: &str) -> Result<Resolution, NetError> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(Resolution::Ready(address));
        }
        if self.lookup_in_flight {
            return Ok(Resolution::Pending);
        }

        let tx = self.tx.clone();
        let lookup_host = host.to_string();
        thread::Builder::new()
            .name("dns".to_string())
            .stack_size(DNS_THREAD_STACK)
            .spawn(move || {
                let address = match (lookup_host.as_str(), 0).to_socket_addrs() {
                    Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
                    Err(err) => {
                        warn!("[DNS] lookup for `{lookup_host}` failed: {err}");
                        None
                    }
                };
                let _ = tx.send(NetworkEvent::Resolved {
                    host: lookup_host,
                    address,
                });
            })
            .map_err(|err| NetError::ResolveSubmit {
                host: host.to_string(),
                code: err.raw_os_error().unwrap_or(-1),
            })?;

        self.lookup_in_flight = true;
        Ok(Resolution::Pending)
    }
}

impl BrokerTransport for EspNetwork {
    fn connect(&mut self, broker: SocketAddr, info: &ConnectInfo) -> Result<(), NetError> {
        let url = format!("mqtt://{}:{}", broker.ip(), broker.port());
        let credentials = info.credentials.as_ref();
        let conf = MqttClientConfiguration {
            client_id: Some(info.client_id.as_str()),
            keep_alive_interval: Some(Duration::from_secs(u64::from(info.keep_alive_secs))),
            username: credentials.map(|c| c.username.as_str()),
            password: credentials.map(|c| c.password.as_str()),
            ..Default::default()
        };

        let tx = self.tx.clone();
        let client = EspMqttClient::new_cb(&url, &conf, move |event| {
            let status = match event.payload() {
                EventPayload::Connected(_) => ConnectionStatus::Accepted,
                EventPayload::Disconnected => ConnectionStatus::Disconnected,
                EventPayload::Error(err) => {
                    warn!("mqtt error event: {err:?}");
                    return;
                }
                _ => return,
            };
            let _ = tx.send(NetworkEvent::ConnectionStatus(status));
        })
        .map_err(|err| NetError::Connect(err.code()))?;

        // A refused CONNACK arrives as an error event followed by a plain
        // disconnect. The return code only exists on the raw event.
        let refusal_tx = Box::new(self.tx.clone());
        let handler_arg = (&*refusal_tx as *const mpsc::Sender<NetworkEvent>)
            .cast_mut()
            .cast::<c_void>();
        // SAFETY: `handler_arg` points into `refusal_tx`, which is stored next to
        // the client and outlives it; see the field order on `EspNetwork`.
        let registered = unsafe {
            sys::esp_mqtt_client_register_event(
                client.handle(),
                sys::esp_mqtt_event_id_t_MQTT_EVENT_ERROR,
                Some(on_mqtt_error),
                handler_arg,
            )
        };
        if let Err(err) = sys::EspError::convert(registered) {
            warn!("[MQTT] refusal codes unavailable: {err}");
        }

        self.client = Some(client);
        self.refusal_tx = Some(refusal_tx);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetError> {
        let publish_error = |code| NetError::Publish {
            topic: topic.to_string(),
            code,
        };
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| publish_error(esp_idf_svc::sys::ESP_ERR_INVALID_STATE))?;

        client
            .enqueue(topic, QoS::AtMostOnce, false, payload)
            .map(|_| ())
            .map_err(|err| publish_error(err.code()))
    }
}

impl NetworkStack for EspNetwork {
    fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.queue.drain()
    }
}

/// Raw esp-mqtt error handler. Forwards a refused CONNACK with its return code;
/// every other error is left to the client callback.
unsafe extern "C" fn on_mqtt_error(
    handler_arg: *mut c_void,
    _base: sys::esp_event_base_t,
    _event_id: i32,
    event_data: *mut c_void,
) {
    // SAFETY: esp-mqtt passes the registered argument back unchanged and hands
    // over an `esp_mqtt_event_t` that lives for the duration of the call.
    let (tx, event) = unsafe {
        (
            handler_arg.cast::<mpsc::Sender<NetworkEvent>>().as_ref(),
            event_data.cast::<sys::esp_mqtt_event_t>().as_ref(),
        )
    };
    let (Some(tx), Some(event)) = (tx, event) else {
        return;
    };
    // SAFETY: `error_handle` is either null or points into the event.
    let Some(error) = (unsafe { event.error_handle.as_ref() }) else {
        return;
    };
    if error.error_type != sys::esp_mqtt_error_type_t_MQTT_ERROR_TYPE_CONNECTION_REFUSED {
        return;
    }

    let status = ConnectionStatus::from_connack(error.connect_return_code as u32);
    let _ = tx.send(NetworkEvent::ConnectionStatus(status));
}
