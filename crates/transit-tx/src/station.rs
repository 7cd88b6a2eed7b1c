use serde::{Deserialize, Serialize};
use transit_core::Line;

/// Value written for a station that belongs to no known line
pub const NO_LINE: &str = "-";

/// Checked in order; the first line whose flag is set wins.
pub const LINE_PRIORITY: [Line; 3] = [Line::Red, Line::Blue, Line::Green];

/// Station row as published by the reference-data connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub stop_id: i64,
    pub direction_id: String,
    pub stop_name: String,
    pub station_name: String,
    pub station_descriptive_name: String,
    pub station_id: i64,
    pub order: i64,
    pub red: bool,
    pub blue: bool,
    pub green: bool,
}

impl Station {
    pub fn serves(&self, line: Line) -> bool {
        match line {
            Line::Red => self.red,
            Line::Blue => self.blue,
            Line::Green => self.green,
        }
    }
}

/// Projection of a station kept in the table and its changelog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedStation {
    pub station_id: i64,
    pub station_name: String,
    pub order: i64,
    pub line: String,
}

impl From<&Station> for TransformedStation {
    fn from(station: &Station) -> Self {
        Self {
            station_id: station.station_id,
            station_name: station.station_name.clone(),
            order: station.order,
            line: line_from_station(station).to_string(),
        }
    }
}

/// Key of the changelog topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationKey {
    pub station_id: i64,
}

/// Derive the line a station is on, or [`NO_LINE`] when no flag is set.
pub fn line_from_station(station: &Station) -> &'static str {
    LINE_PRIORITY
        .iter()
        .find(|line| station.serves(**line))
        .map(|line| line.as_str())
        .unwrap_or(NO_LINE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_core::RecordSchema;

    fn station(red: bool, blue: bool, green: bool) -> Station {
        Station {
            stop_id: 30001,
            direction_id: "E".to_string(),
            stop_name: "Austin (O'Hare-bound)".to_string(),
            station_name: "Austin".to_string(),
            station_descriptive_name: "Austin (Blue Line)".to_string(),
            station_id: 40010,
            order: 29,
            red,
            blue,
            green,
        }
    }

    #[test]
    fn test_single_flag_selects_its_line() {
        assert_eq!(line_from_station(&station(true, false, false)), "red");
        assert_eq!(line_from_station(&station(false, true, false)), "blue");
        assert_eq!(line_from_station(&station(false, false, true)), "green");
    }

    #[test]
    fn test_no_flag_yields_sentinel() {
        assert_eq!(line_from_station(&station(false, false, false)), NO_LINE);
    }

    #[test]
    fn test_first_flag_in_priority_order_wins() {
        assert_eq!(line_from_station(&station(true, true, true)), "red");
        assert_eq!(line_from_station(&station(false, true, true)), "blue");
        assert_eq!(line_from_station(&station(true, false, true)), "red");
    }

    #[test]
    fn test_transformed_station_matches_schema() {
        let transformed = TransformedStation::from(&station(false, true, false));
        assert_eq!(transformed.station_id, 40010);
        assert_eq!(transformed.station_name, "Austin");
        assert_eq!(transformed.order, 29);
        assert_eq!(transformed.line, "blue");
        RecordSchema::transformed_station_value()
            .unwrap()
            .resolve(&transformed)
            .unwrap();
        RecordSchema::station_key()
            .unwrap()
            .resolve(&StationKey { station_id: 40010 })
            .unwrap();
    }

    #[test]
    fn test_decodes_connector_row() {
        let row = r#"{
            "stop_id": 30001, "direction_id": "E", "stop_name": "Austin (O'Hare-bound)",
            "station_name": "Austin", "station_descriptive_name": "Austin (Blue Line)",
            "station_id": 40010, "order": 29, "red": false, "blue": true, "green": false
        }"#;
        let decoded: Station = serde_json::from_str(row).unwrap();
        assert_eq!(decoded, station(false, true, false));
    }
}
