use std::time::Duration;

use log::info;
use thiserror::Error;

use crate::{
    config::RackConfig,
    net::{BrokerTransport, NetError, NetworkStack},
    publisher::{LastPublished, Publisher},
    sensors::{AnalogInput, DigitalInput, DoorReader, TemperatureReader},
    session::BrokerSession,
    topics::{TopicError, Topics},
    types::{Channel, PublishOutcome, SensorSample},
};

/// Failures that abort the process before the main loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("wifi association failed: {0}")]
    Link(String),
    #[error("dns request for `{host}` could not be submitted (code {code})")]
    ResolveSubmit { host: String, code: i32 },
    #[error("invalid topic configuration: {0}")]
    Topic(#[from] TopicError),
    #[error(transparent)]
    Network(NetError),
}

impl From<NetError> for StartupError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Link(reason) => Self::Link(reason),
            NetError::ResolveSubmit { host, code } => Self::ResolveSubmit { host, code },
            other => Self::Network(other),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub events: usize,
    pub door: PublishOutcome,
    pub temperature: PublishOutcome,
}

/// Cooperative main loop body. Owns every piece of mutable state the firmware
/// carries between ticks.
pub struct Monitor<D, A> {
    door: DoorReader<D>,
    temperature: TemperatureReader<A>,
    session: BrokerSession,
    publisher: Publisher,
    last_door: LastPublished<bool>,
    last_temperature: LastPublished<f32>,
    tick_interval: Duration,
    poll_temperature: bool,
    ticks: u64,
}

impl<D: DigitalInput, A: AnalogInput> Monitor<D, A> {
    pub fn new(config: &RackConfig, door_pin: D, adc: A) -> Result<Self, StartupError> {
        let topics = Topics::new(&config.topics.base, &config.topics.device_id)?;
        info!(
            "publishing on '{}' and '{}'",
            topics.door(),
            topics.temperature()
        );

        Ok(Self {
            door: DoorReader::new(door_pin),
            temperature: TemperatureReader::new(adc, &config.sensors),
            session: BrokerSession::new(config),
            publisher: Publisher::new(topics, config.main_loop.dropped_publish_policy),
            last_door: LastPublished::door(),
            last_temperature: LastPublished::temperature(),
            tick_interval: Duration::from_millis(config.main_loop.tick_interval_ms),
            poll_temperature: config.main_loop.poll_temperature,
            ticks: 0,
        })
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    pub fn topics(&self) -> &Topics {
        self.publisher.topics()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Kicks off broker resolution. Errors here are fatal.
    pub fn start<N: NetworkStack>(&mut self, net: &mut N) -> Result<(), StartupError> {
        self.session.start(net)?;
        Ok(())
    }

    /// One loop iteration: apply queued network completions, then poll the
    /// door and temperature sensors and publish whatever changed. The caller
    /// sleeps for [`Self::tick_interval`] between ticks.
    pub fn tick<N: NetworkStack>(&mut self, net: &mut N) -> TickReport {
        self.ticks = self.ticks.saturating_add(1);

        let events = net.drain_events();
        for event in &events {
            self.session.handle_event(event, net);
        }

        let sample = self.door.sample();
        let door = self.publish_sample(sample, net);

        let temperature = if self.poll_temperature {
            let sample = self.temperature.sample();
            self.publish_sample(sample, net)
        } else {
            PublishOutcome::Skipped
        };

        TickReport {
            events: events.len(),
            door,
            temperature,
        }
    }

    fn publish_sample<T: BrokerTransport>(
        &mut self,
        sample: SensorSample,
        transport: &mut T,
    ) -> PublishOutcome {
        match sample {
            SensorSample::DoorState(active) => self.publisher.maybe_publish(
                Channel::Door,
                active,
                &mut self.last_door,
                &self.session,
                transport,
            ),
            SensorSample::Temperature { value, .. } => self.publisher.maybe_publish(
                Channel::Temperature,
                value,
                &mut self.last_temperature,
                &self.session,
                transport,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::VecDeque,
        net::{IpAddr, Ipv4Addr},
        rc::Rc,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::LoopConfig,
        net::NetworkEvent,
        testing::MockNetwork,
        types::{ConnectionState, ConnectionStatus, DropReason},
    };

    #[derive(Clone, Default)]
    struct ScriptedPin(Rc<RefCell<VecDeque<bool>>>);

    impl ScriptedPin {
        fn levels(levels: &[bool]) -> Self {
            Self(Rc::new(RefCell::new(levels.iter().copied().collect())))
        }
    }

    impl DigitalInput for ScriptedPin {
        fn is_high(&mut self) -> bool {
            // Idle high once the script runs out.
            self.0.borrow_mut().pop_front().unwrap_or(true)
        }
    }

    struct ScriptedAdc {
        samples: VecDeque<u16>,
        last: u16,
        reads: Rc<RefCell<usize>>,
    }

    impl ScriptedAdc {
        fn samples(samples: &[u16]) -> Self {
            Self {
                samples: samples.iter().copied().collect(),
                last: samples.last().copied().unwrap_or(876),
                reads: Rc::default(),
            }
        }
    }

    impl AnalogInput for ScriptedAdc {
        fn read_raw(&mut self) -> u16 {
            *self.reads.borrow_mut() += 1;
            self.samples.pop_front().unwrap_or(self.last)
        }
    }

    const BROKER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));

    fn config() -> RackConfig {
        let mut config = RackConfig::default();
        config.network.mqtt_host = "broker.lan".to_string();
        config.topics.base = "dc".to_string();
        config.topics.device_id = "rack7".to_string();
        config
    }

    #[test]
    fn rejects_invalid_topics_before_start() {
        let mut config = config();
        config.topics.device_id = "+".to_string();
        let result = Monitor::new(&config, ScriptedPin::default(), ScriptedAdc::samples(&[]));
        assert!(matches!(result, Err(StartupError::Topic(_))));
    }

    #[test]
    fn full_lifecycle_publishes_after_connect() {
        let mut net = MockNetwork::pending();
        // Door closed (low) on every tick, temperature steady then changing.
        let pin = ScriptedPin::levels(&[false, false, false, false]);
        let adc = ScriptedAdc::samples(&[876, 876, 876, 860]);
        let mut monitor = Monitor::new(&config(), pin, adc).unwrap();

        monitor.start(&mut net).unwrap();
        assert_eq!(monitor.session().state(), ConnectionState::Resolving);

        // Tick 1: still resolving; both channels change but are dropped.
        let first = monitor.tick(&mut net);
        assert_eq!(first.events, 0);
        assert_eq!(first.door, PublishOutcome::Dropped(DropReason::NotConnected));
        assert_eq!(
            first.temperature,
            PublishOutcome::Dropped(DropReason::NotConnected)
        );

        // Tick 2: resolution completes and the connect request goes out.
        net.queue.push(NetworkEvent::Resolved {
            host: "broker.lan".to_string(),
            address: Some(BROKER),
        });
        let second = monitor.tick(&mut net);
        assert_eq!(second.events, 1);
        assert_eq!(monitor.session().state(), ConnectionState::Connecting);
        assert_eq!(second.door, PublishOutcome::Skipped);
        assert_eq!(second.temperature, PublishOutcome::Skipped);

        // Tick 3: accepted. Nothing changed, so nothing is sent.
        net.queue
            .push(NetworkEvent::ConnectionStatus(ConnectionStatus::Accepted));
        let third = monitor.tick(&mut net);
        assert!(monitor.session().is_connected());
        assert_eq!(third.temperature, PublishOutcome::Skipped);

        // Tick 4: temperature moves and goes out on its topic.
        let fourth = monitor.tick(&mut net);
        assert_eq!(fourth.door, PublishOutcome::Skipped);
        assert_eq!(fourth.temperature, PublishOutcome::Sent);

        let published = net.published_text();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "dc/rack7/temperature");
        assert_eq!(published[0].1, "34.63");
        assert_eq!(monitor.ticks(), 4);
    }

    #[test]
    fn door_events_publish_on_and_off() {
        let mut net = MockNetwork::ready(BROKER);
        let pin = ScriptedPin::levels(&[true, false, false, true]);
        let adc = ScriptedAdc::samples(&[876]);
        let mut monitor = Monitor::new(&config(), pin, adc).unwrap();

        monitor.start(&mut net).unwrap();
        net.queue
            .push(NetworkEvent::ConnectionStatus(ConnectionStatus::Accepted));

        let outcomes: Vec<_> = (0..4).map(|_| monitor.tick(&mut net).door).collect();

        assert_eq!(
            outcomes,
            vec![
                PublishOutcome::Skipped,
                PublishOutcome::Sent,
                PublishOutcome::Skipped,
                PublishOutcome::Sent,
            ]
        );
        let door: Vec<_> = net
            .published_text()
            .into_iter()
            .filter(|(topic, _)| topic == "dc/rack7/door")
            .map(|(_, payload)| payload)
            .collect();
        assert_eq!(door, vec!["ON".to_string(), "OFF".to_string()]);
    }

    #[test]
    fn loop_keeps_polling_after_connection_loss() {
        let mut net = MockNetwork::ready(BROKER);
        let pin = ScriptedPin::levels(&[true, true, false]);
        let adc = ScriptedAdc::samples(&[876]);
        let mut monitor = Monitor::new(&config(), pin, adc).unwrap();

        monitor.start(&mut net).unwrap();
        net.queue
            .push(NetworkEvent::ConnectionStatus(ConnectionStatus::Accepted));
        monitor.tick(&mut net);

        net.queue
            .push(NetworkEvent::ConnectionStatus(ConnectionStatus::Disconnected));
        monitor.tick(&mut net);
        assert_eq!(monitor.session().state(), ConnectionState::Disconnected);

        let report = monitor.tick(&mut net);
        assert_eq!(
            report.door,
            PublishOutcome::Dropped(DropReason::NotConnected)
        );
        assert_eq!(net.connects.len(), 1);
    }

    #[test]
    fn tick_interval_comes_from_config() {
        let mut config = config();
        config.main_loop.tick_interval_ms = 200;
        let monitor =
            Monitor::new(&config, ScriptedPin::default(), ScriptedAdc::samples(&[])).unwrap();
        assert_eq!(monitor.tick_interval(), Duration::from_millis(200));
        assert_eq!(monitor.topics().door(), "dc/rack7/door");
    }

    #[test]
    fn resolver_submission_failure_is_a_startup_error() {
        let mut net = MockNetwork::pending();
        net.resolve_error = Some(NetError::ResolveSubmit {
            host: "broker.lan".to_string(),
            code: -12,
        });
        let mut monitor =
            Monitor::new(&config(), ScriptedPin::default(), ScriptedAdc::samples(&[])).unwrap();

        let err = monitor.start(&mut net).unwrap_err();

        match err {
            StartupError::ResolveSubmit { host, code } => {
                assert_eq!(host, "broker.lan");
                assert_eq!(code, -12);
            }
            other => panic!("unexpected startup error: {other:?}"),
        }
        assert_eq!(monitor.session().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn net_errors_map_onto_startup_errors() {
        let link = StartupError::from(NetError::Link("no AP".to_string()));
        assert!(matches!(link, StartupError::Link(ref reason) if reason == "no AP"));
        assert_eq!(link.to_string(), "wifi association failed: no AP");

        let connect = StartupError::from(NetError::Connect(-4));
        assert!(matches!(connect, StartupError::Network(NetError::Connect(-4))));
    }

    #[test]
    fn button_only_variant_never_reads_the_adc() {
        let mut config = config();
        config.main_loop = LoopConfig::button_only();
        let mut net = MockNetwork::ready(BROKER);
        let adc = ScriptedAdc::samples(&[860]);
        let reads = Rc::clone(&adc.reads);
        let pin = ScriptedPin::levels(&[false, false, true]);
        let mut monitor = Monitor::new(&config, pin, adc).unwrap();

        monitor.start(&mut net).unwrap();
        net.queue
            .push(NetworkEvent::ConnectionStatus(ConnectionStatus::Accepted));
        let reports: Vec<_> = (0..3).map(|_| monitor.tick(&mut net)).collect();

        assert_eq!(*reads.borrow(), 0);
        assert!(reports
            .iter()
            .all(|report| report.temperature == PublishOutcome::Skipped));
        assert_eq!(monitor.tick_interval(), Duration::from_millis(200));
        assert_eq!(
            net.published_text(),
            vec![
                ("dc/rack7/door".to_string(), "ON".to_string()),
                ("dc/rack7/door".to_string(), "OFF".to_string()),
            ]
        );
    }
}
