use tracing::info;
use transit_core::{ConsumedMessage, MessageHandler, RecordSchema, Result, WEATHER_TOPIC};

use crate::source_weather::{WeatherStatus, WeatherUpdate};

/// Latest weather as seen by a consumer of the weather topic
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherModel {
    pub temperature: f64,
    pub status: WeatherStatus,
    updates: u64,
    schema: RecordSchema,
}

impl WeatherModel {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temperature: 70.0,
            status: WeatherStatus::Sunny,
            updates: 0,
            schema: RecordSchema::weather_value()?,
        })
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Apply a weather update. Messages from other topics are ignored.
    pub fn process_message(&mut self, message: &ConsumedMessage) -> Result<()> {
        if message.topic != WEATHER_TOPIC {
            return Ok(());
        }
        let reading: WeatherUpdate = message.value(&self.schema)?;
        self.temperature = reading.temperature;
        self.status = reading.status;
        self.updates += 1;
        info!(
            temperature = self.temperature,
            status = %self.status,
            "weather updated"
        );
        Ok(())
    }
}

impl MessageHandler for WeatherModel {
    fn handle(&mut self, message: &ConsumedMessage) -> Result<()> {
        self.process_message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_core::TransitError;

    fn message(topic: &str, payload: Vec<u8>) -> ConsumedMessage {
        ConsumedMessage {
            topic: topic.to_string(),
            payload: Some(payload),
            ..Default::default()
        }
    }

    fn framed(update: &WeatherUpdate) -> Vec<u8> {
        RecordSchema::weather_value()
            .unwrap()
            .with_id(1)
            .encode(update)
            .unwrap()
    }

    #[test]
    fn test_applies_weather_update() {
        let mut model = WeatherModel::new().unwrap();
        model
            .process_message(&message(
                WEATHER_TOPIC,
                framed(&WeatherUpdate {
                    temperature: 12.5,
                    status: WeatherStatus::Precipitation,
                }),
            ))
            .unwrap();
        assert_eq!(model.temperature, 12.5);
        assert_eq!(model.status, WeatherStatus::Precipitation);
        assert_eq!(model.updates(), 1);
    }

    #[test]
    fn test_ignores_other_topics() {
        let mut model = WeatherModel::new().unwrap();
        model
            .process_message(&message(
                "station.loop.turnstile.entry.v1",
                b"not avro".to_vec(),
            ))
            .unwrap();
        assert_eq!(model, WeatherModel::new().unwrap());
    }

    #[test]
    fn test_undecodable_update_is_an_error() {
        let mut model = WeatherModel::new().unwrap();
        let err = model
            .process_message(&message(WEATHER_TOPIC, vec![0, 0, 0, 0, 1, 0xff]))
            .unwrap_err();
        assert!(matches!(err, TransitError::Deserialization(_)));
        assert_eq!(model.updates(), 0);
    }
}
