/// Standard unencrypted MQTT port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;
/// Broker keep-alive, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;
/// Wi-Fi association timeout, in milliseconds.
pub const DEFAULT_WIFI_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CLIENT_ID: &str = "pico-client";
pub const DEFAULT_BROKER_HOST: &str = "test.mosquitto.org";
pub const DEFAULT_BASE_TOPIC: &str = "rack";
pub const DEFAULT_DEVICE_ID: &str = "01";

/// ADC full-scale reference, in volts.
pub const ADC_REFERENCE_VOLTS: f32 = 3.3;
pub const ADC_RESOLUTION_BITS: u8 = 12;
/// GPIO carrying the door contact (idles high, internal pull-up).
pub const DEFAULT_DOOR_PIN: i32 = 5;
pub const DEFAULT_TEMPERATURE_UNIT: char = 'C';

/// Tick interval of the door-only firmware, in milliseconds.
pub const BUTTON_ONLY_TICK_INTERVAL_MS: u64 = 200;
/// Tick interval of the door + temperature firmware, in milliseconds.
pub const COMBINED_TICK_INTERVAL_MS: u64 = 1_000;

const MIN_TICK_INTERVAL_MS: u64 = 10;
const MAX_TICK_INTERVAL_MS: u64 = 60_000;
const MIN_KEEP_ALIVE_SECS: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    Open,
    #[default]
    Wpa2Personal,
    WpaWpa2Personal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub auth_mode: AuthMode,
    pub wifi_connect_timeout_ms: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_credentials: Option<Credentials>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            auth_mode: AuthMode::default(),
            wifi_connect_timeout_ms: DEFAULT_WIFI_CONNECT_TIMEOUT_MS,
            mqtt_host: DEFAULT_BROKER_HOST.to_string(),
            mqtt_port: DEFAULT_BROKER_PORT,
            mqtt_credentials: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_id: String,
    pub keep_alive_secs: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub base: String,
    pub device_id: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_TOPIC.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
        }
    }
}

/// Linear calibration of an on-die temperature sensor:
/// `temp_c = reference_temp_c - (volts - reference_volts) / slope_volts_per_c`.
///
/// The constants are sensor specific. The defaults match the RP2040 sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub reference_temp_c: f32,
    pub reference_volts: f32,
    pub slope_volts_per_c: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            reference_temp_c: 27.0,
            reference_volts: 0.706,
            slope_volts_per_c: 0.001721,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub door_pin: i32,
    pub adc_reference_volts: f32,
    pub adc_resolution_bits: u8,
    pub calibration: Calibration,
    /// `'C'` or `'F'`. Anything else makes the temperature reader return the
    /// unrecognized-unit sentinel.
    pub temperature_unit: char,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            door_pin: DEFAULT_DOOR_PIN,
            adc_reference_volts: ADC_REFERENCE_VOLTS,
            adc_resolution_bits: ADC_RESOLUTION_BITS,
            calibration: Calibration::default(),
            temperature_unit: DEFAULT_TEMPERATURE_UNIT,
        }
    }
}

/// What happens to a channel's last-published value when a publish is
/// dropped because the broker is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DroppedPublishPolicy {
    /// Advance the memory anyway; the dropped value is never retried.
    #[default]
    Advance,
    /// Keep the old memory; the value is attempted again next tick.
    Retain,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub tick_interval_ms: u64,
    pub dropped_publish_policy: DroppedPublishPolicy,
    /// When false the ADC is never read and only the door channel publishes.
    pub poll_temperature: bool,
}

impl LoopConfig {
    /// Door-only firmware: faster ticks, no temperature channel.
    pub fn button_only() -> Self {
        Self {
            tick_interval_ms: BUTTON_ONLY_TICK_INTERVAL_MS,
            poll_temperature: false,
            ..Self::default()
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: COMBINED_TICK_INTERVAL_MS,
            dropped_publish_policy: DroppedPublishPolicy::default(),
            poll_temperature: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RackConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub topics: TopicConfig,
    pub sensors: SensorConfig,
    pub main_loop: LoopConfig,
}

impl RackConfig {
    pub fn sanitize(&mut self) {
        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = DEFAULT_BROKER_PORT;
        }
        if self.network.wifi_connect_timeout_ms == 0 {
            self.network.wifi_connect_timeout_ms = DEFAULT_WIFI_CONNECT_TIMEOUT_MS;
        }

        self.session.keep_alive_secs = self.session.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS);
        if self.session.client_id.trim().is_empty() {
            self.session.client_id = DEFAULT_CLIENT_ID.to_string();
        }

        if !matches!(self.sensors.adc_resolution_bits, 8 | 10 | 12 | 16) {
            self.sensors.adc_resolution_bits = ADC_RESOLUTION_BITS;
        }
        let volts = self.sensors.adc_reference_volts;
        if volts.is_nan() || volts <= 0.0 {
            self.sensors.adc_reference_volts = ADC_REFERENCE_VOLTS;
        }

        self.main_loop.tick_interval_ms = self
            .main_loop
            .tick_interval_ms
            .clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS);
    }
}
