//! # Transit TX - station reference-data transform
//!
//! Consumes the station rows published by the JDBC connector, derives the
//! line each station is on and keeps the result in a table that is mirrored
//! to a compacted changelog topic.

pub mod station;
pub mod table;

pub use station::{line_from_station, Station, StationKey, TransformedStation, LINE_PRIORITY, NO_LINE};
pub use table::{StationTable, StationTransformer};
