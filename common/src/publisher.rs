use std::fmt;

use log::{debug, info, warn};

use crate::{
    config::DroppedPublishPolicy,
    net::BrokerTransport,
    session::BrokerSession,
    topics::Topics,
    types::{Channel, DropReason, PublishOutcome},
};

/// Door memory before anything was published. A closed contact on the first
/// tick is published; an open one is not.
pub const NEVER_PUBLISHED_DOOR: bool = false;
/// Temperature memory before anything was published. Equal to the
/// unrecognized-unit sentinel, so a misconfigured unit never publishes.
pub const NEVER_PUBLISHED_TEMPERATURE: f32 = -1.0;

/// A value that can be reported on a channel.
pub trait ChannelValue: Copy + PartialEq + fmt::Debug {
    fn payload(&self) -> String;
}

/// `"ON"` for an active contact, `"OFF"` otherwise.
impl ChannelValue for bool {
    fn payload(&self) -> String {
        door_payload(*self).to_string()
    }
}

/// Two fractional digits, no unit, rounded to nearest from the exact binary
/// value (23.465f32 is stored as 23.46500015.. and renders as `"23.47"`).
impl ChannelValue for f32 {
    fn payload(&self) -> String {
        format!("{self:.2}")
    }
}

pub fn door_payload(active: bool) -> &'static str {
    if active {
        "ON"
    } else {
        "OFF"
    }
}

/// Most recent value a publish was attempted with, per channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastPublished<V> {
    value: V,
}

impl<V: ChannelValue> LastPublished<V> {
    pub fn new(initial: V) -> Self {
        Self { value: initial }
    }

    pub fn value(&self) -> V {
        self.value
    }

    /// Exact comparison; for floats any bit-different reading counts.
    pub fn differs(&self, current: V) -> bool {
        self.value != current
    }

    fn record(&mut self, value: V) {
        self.value = value;
    }
}

impl LastPublished<bool> {
    pub fn door() -> Self {
        Self::new(NEVER_PUBLISHED_DOOR)
    }
}

impl LastPublished<f32> {
    pub fn temperature() -> Self {
        Self::new(NEVER_PUBLISHED_TEMPERATURE)
    }
}

/// Change detection and publishing on the fixed channel topics.
#[derive(Debug, Clone)]
pub struct Publisher {
    topics: Topics,
    policy: DroppedPublishPolicy,
}

impl Publisher {
    pub fn new(topics: Topics, policy: DroppedPublishPolicy) -> Self {
        Self { topics, policy }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn maybe_publish<V, T>(
        &self,
        channel: Channel,
        current: V,
        last: &mut LastPublished<V>,
        session: &BrokerSession,
        transport: &mut T,
    ) -> PublishOutcome
    where
        V: ChannelValue,
        T: BrokerTransport,
    {
        if !last.differs(current) {
            debug!("[{channel}] unchanged ({current:?})");
            return PublishOutcome::Skipped;
        }

        let payload = current.payload();
        info!("[{channel}] changed to {payload}");

        if !session.is_connected() {
            warn!("[MQTT] not connected, not publishing {channel}");
            if self.policy == DroppedPublishPolicy::Advance {
                last.record(current);
            }
            return PublishOutcome::Dropped(DropReason::NotConnected);
        }

        last.record(current);

        let topic = self.topics.for_channel(channel);
        info!("[MQTT] publishing: topic='{topic}', message='{payload}'");
        match transport.publish(topic, payload.as_bytes()) {
            Ok(()) => {
                info!("[MQTT] publish enqueued");
                PublishOutcome::Sent
            }
            Err(err) => {
                warn!("[MQTT] {err}");
                PublishOutcome::Failed(err.code())
            }
        }
    }
}
