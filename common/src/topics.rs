use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic {0} segment is empty")]
    EmptySegment(&'static str),
    #[error("topic {segment} segment `{value}` contains a wildcard or null character")]
    InvalidCharacter { segment: &'static str, value: String },
}

/// Fixed publish topics, `<base>/<device-id>/door` and
/// `<base>/<device-id>/temperature`. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    door: String,
    temperature: String,
}

impl Topics {
    pub fn new(base: &str, device_id: &str) -> Result<Self, TopicError> {
        let base = validate_segment("base", base.trim_end_matches('/'))?;
        let device_id = validate_segment("device id", device_id.trim_matches('/'))?;

        let prefix = format!("{base}/{device_id}");
        Ok(Self {
            door: format!("{prefix}/{}", Channel::Door.suffix()),
            temperature: format!("{prefix}/{}", Channel::Temperature.suffix()),
        })
    }

    pub fn for_channel(&self, channel: Channel) -> &str {
        match channel {
            Channel::Door => &self.door,
            Channel::Temperature => &self.temperature,
        }
    }

    pub fn door(&self) -> &str {
        &self.door
    }

    pub fn temperature(&self) -> &str {
        &self.temperature
    }
}

fn validate_segment<'a>(segment: &'static str, value: &'a str) -> Result<&'a str, TopicError> {
    if value.is_empty() {
        return Err(TopicError::EmptySegment(segment));
    }
    if value.contains(['+', '#', '\0']) {
        return Err(TopicError::InvalidCharacter {
            segment,
            value: value.to_string(),
        });
    }
    Ok(value)
}
