//! Record schemas bound to producers and consumers.
//!
//! Schemas are Avro record documents parsed with `apache-avro`. Keys and
//! values travel in the schema-registry wire format: a zero magic byte, the
//! registry id of the writer schema as a big-endian `u32`, then the Avro
//! binary datum. The REST proxy writes exactly this framing when it is given
//! the same documents, so both production paths are readable by one decoder.

use crate::{Result, TransitError};
use apache_avro::types::Value as AvroValue;
use apache_avro::Schema;
use serde::de::DeserializeOwned;
use serde::Serialize;

const TIMESTAMP_KEY: &str = include_str!("../schemas/timestamp_key.json");
const STATION_KEY: &str = include_str!("../schemas/station_key.json");
const TURNSTILE_VALUE: &str = include_str!("../schemas/turnstile_value.json");
const WEATHER_VALUE: &str = include_str!("../schemas/weather_value.json");
const TRANSFORMED_STATION_VALUE: &str = include_str!("../schemas/transformed_station_value.json");

/// Leading byte of every framed record
pub const MAGIC_BYTE: u8 = 0;

const HEADER_LEN: usize = 5;

/// Parsed Avro record schema
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    name: String,
    fields: Vec<String>,
    schema: Schema,
    document: String,
}

impl RecordSchema {
    /// Parse an Avro record schema document.
    pub fn parse(document: &str) -> Result<Self> {
        let schema = Schema::parse_str(document)
            .map_err(|e| TransitError::Config(format!("invalid Avro schema: {e}")))?;
        let (name, fields) = match &schema {
            Schema::Record(record) => (
                record.name.fullname(None),
                record.fields.iter().map(|f| f.name.clone()).collect(),
            ),
            _ => {
                return Err(TransitError::Config(
                    "schema must be an Avro record".to_string(),
                ))
            }
        };
        Ok(Self {
            name,
            fields,
            schema,
            document: document.trim().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema document as it was parsed
    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn avro(&self) -> &Schema {
        &self.schema
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// Resolve a record against this schema.
    ///
    /// Fields the schema does not declare are dropped; a missing field or an
    /// incompatible value is a `Serialization` error.
    pub fn resolve<T: Serialize>(&self, record: &T) -> Result<AvroValue> {
        let value = apache_avro::to_value(record)
            .map_err(|e| TransitError::Serialization(format!("{}: {e}", self.name)))?;
        value
            .resolve(&self.schema)
            .map_err(|e| TransitError::Serialization(format!("{}: {e}", self.name)))
    }

    /// Avro binary datum without framing
    pub fn encode_datum<T: Serialize>(&self, record: &T) -> Result<Vec<u8>> {
        let value = self.resolve(record)?;
        apache_avro::to_avro_datum(&self.schema, value)
            .map_err(|e| TransitError::Serialization(format!("{}: {e}", self.name)))
    }

    /// Decode an unframed datum written with this schema.
    pub fn decode_datum<T: DeserializeOwned>(&self, mut datum: &[u8]) -> Result<T> {
        let value = apache_avro::from_avro_datum(&self.schema, &mut datum, None)
            .map_err(|e| TransitError::Deserialization(format!("{}: {e}", self.name)))?;
        apache_avro::from_value(&value)
            .map_err(|e| TransitError::Deserialization(format!("{}: {e}", self.name)))
    }

    /// Decode a framed record. The writer schema is assumed to be this one.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let (_id, datum) = unframe(bytes)?;
        self.decode_datum(datum)
    }

    /// JSON form of a record after checking it resolves against the schema.
    ///
    /// This is the record shape the REST proxy expects next to the schema
    /// documents.
    pub fn to_json<T: Serialize>(&self, record: &T) -> Result<serde_json::Value> {
        self.resolve(record)?;
        serde_json::to_value(record).map_err(|e| TransitError::Serialization(e.to_string()))
    }

    /// Bind this schema to the id the registry assigned to it.
    pub fn with_id(self, id: u32) -> RegisteredSchema {
        RegisteredSchema { id, schema: self }
    }

    pub fn timestamp_key() -> Result<Self> {
        Self::parse(TIMESTAMP_KEY)
    }

    pub fn station_key() -> Result<Self> {
        Self::parse(STATION_KEY)
    }

    pub fn turnstile_value() -> Result<Self> {
        Self::parse(TURNSTILE_VALUE)
    }

    pub fn weather_value() -> Result<Self> {
        Self::parse(WEATHER_VALUE)
    }

    pub fn transformed_station_value() -> Result<Self> {
        Self::parse(TRANSFORMED_STATION_VALUE)
    }
}

/// A schema together with its registry id
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredSchema {
    pub id: u32,
    pub schema: RecordSchema,
}

impl RegisteredSchema {
    /// Encode a record in the registry wire format.
    pub fn encode<T: Serialize>(&self, record: &T) -> Result<Vec<u8>> {
        let datum = self.schema.encode_datum(record)?;
        Ok(frame(self.id, &datum))
    }
}

/// Registry subject of a topic's keys
pub fn key_subject(topic: &str) -> String {
    format!("{topic}-key")
}

/// Registry subject of a topic's values
pub fn value_subject(topic: &str) -> String {
    format!("{topic}-value")
}

/// Prefix `datum` with the magic byte and schema id.
pub fn frame(schema_id: u32, datum: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + datum.len());
    bytes.push(MAGIC_BYTE);
    bytes.extend_from_slice(&schema_id.to_be_bytes());
    bytes.extend_from_slice(datum);
    bytes
}

/// Split a framed record into its schema id and datum.
pub fn unframe(bytes: &[u8]) -> Result<(u32, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(TransitError::Deserialization(format!(
            "record of {} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(TransitError::Deserialization(format!(
            "unknown magic byte {}",
            bytes[0]
        )));
    }
    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((id, &bytes[HEADER_LEN..]))
}
