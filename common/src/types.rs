use std::fmt;

/// Broker session state. Owned by [`crate::session::BrokerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Resolving,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Resolving => "RESOLVING",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }
}

/// Connection status reported by the broker transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Accepted,
    RefusedProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Disconnected,
    Timeout,
}

impl ConnectionStatus {
    pub fn code(self) -> u16 {
        match self {
            Self::Accepted => 0,
            Self::RefusedProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadCredentials => 4,
            Self::NotAuthorized => 5,
            Self::Disconnected => 256,
            Self::Timeout => 257,
        }
    }

    /// Maps an MQTT 3.1.1 CONNACK return code. Anything outside 0..=5 is
    /// treated as a dropped connection.
    pub fn from_connack(return_code: u32) -> Self {
        match return_code {
            0 => Self::Accepted,
            1 => Self::RefusedProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadCredentials,
            5 => Self::NotAuthorized,
            _ => Self::Disconnected,
        }
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// A reporting channel. Each channel has its own topic and last-published memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Door,
    Temperature,
}

impl Channel {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Door => "door",
            Self::Temperature => "temperature",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Maps a unit selector (`'C'` or `'F'`) to a unit.
    pub fn from_selector(selector: char) -> Option<Self> {
        match selector {
            'C' => Some(Self::Celsius),
            'F' => Some(Self::Fahrenheit),
            _ => None,
        }
    }
}

/// One reading taken during a tick. Never stored across ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorSample {
    DoorState(bool),
    Temperature { value: f32, unit: Option<TemperatureUnit> },
}

/// Result of running change detection and publishing for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Skipped,
    Sent,
    Dropped(DropReason),
    Failed(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotConnected,
}

impl PublishOutcome {
    /// True when the transport was (or would have been) asked to send.
    pub fn is_attempt(self) -> bool {
        !matches!(self, Self::Skipped)
    }
}
