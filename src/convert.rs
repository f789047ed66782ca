//! Flattening of Grafana `/api/ds/query` responses into a `DatasetTable`.
//!
//! Every frame of every query result contributes one measurement column.
//! Timestamps arrive as epoch milliseconds and are bucketed to the minute,
//! the resolution of the intermediate CSV files.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::dataset::DatasetTable;
use crate::error::Result;

const MEASUREMENT_MARKER: &str = "r._measurement == ";

// ======================================================
// RESPONSE SHAPE
// ======================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: BTreeMap<String, QueryResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub schema: FrameSchema,
    #[serde(default)]
    pub data: FrameData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameSchema {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameMeta {
    #[serde(default, rename = "executedQueryString")]
    pub executed_query_string: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameData {
    /// Column-major: `values[0]` timestamps, `values[1]` readings.
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

pub fn parse_response(raw: &str) -> Result<QueryResponse> {
    Ok(serde_json::from_str(raw)?)
}

// ======================================================
// CONVERSION
// ======================================================

/// Measurement filtered on by a Flux query:
/// `... r._measurement == "flow") ...` gives `flow`.
pub fn measurement_name(query: &str) -> Option<String> {
    let rest = query.split(MEASUREMENT_MARKER).nth(1)?;
    let name = rest.split(')').next()?.replace('"', "");
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn frame_name(key: &str, index: usize, frame: &Frame) -> String {
    frame
        .schema
        .meta
        .executed_query_string
        .as_deref()
        .and_then(measurement_name)
        .or_else(|| frame.schema.name.clone().filter(|n| !n.is_empty()))
        .unwrap_or_else(|| format!("{}{}", key, index + 1))
}

/// A data point as a number. Strings that do not parse read as `0.0`;
/// nulls are no reading at all.
fn reading(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => Some(s.trim().parse().unwrap_or(0.0)),
        _ => None,
    }
}

/// Epoch milliseconds to a UTC timestamp truncated to the minute.
pub fn minute_of(millis: i64) -> Option<NaiveDateTime> {
    let ts = DateTime::from_timestamp_millis(millis)?.naive_utc();
    ts.with_second(0)?.with_nanosecond(0)
}

/// Build the table of one panel. Null readings are skipped and unparsable
/// strings count as zero. Two readings of the same measurement in the same
/// minute keep the later one.
pub fn to_table(response: &QueryResponse) -> DatasetTable {
    let mut table = DatasetTable::new();

    for (key, result) in &response.results {
        if let Some(error) = &result.error {
            warn!(query = %key, %error, "query returned an error");
        }
        if result.frames.is_empty() {
            debug!(query = %key, "no frames in query result");
            continue;
        }

        for (index, frame) in result.frames.iter().enumerate() {
            let name = frame_name(key, index, frame);
            table.series_index(&name);

            let (Some(times), Some(values)) = (frame.data.values.first(), frame.data.values.get(1)) else {
                continue;
            };
            for (time, value) in times.iter().zip(values) {
                let Some(v) = reading(value) else { continue };
                let Some(ts) = time.as_i64().and_then(minute_of) else {
                    warn!(query = %key, time = %time, "unreadable timestamp skipped");
                    continue;
                };
                table.record(ts, &name, v);
            }
        }
    }

    table
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dataset::tests::ts;

    // 2024-03-01 00:00:00 UTC
    const T0: i64 = 1_709_251_200_000;

    fn response() -> String {
        serde_json::json!({
            "results": {
                "A": {
                    "frames": [{
                        "schema": {"meta": {"executedQueryString":
                            "from(bucket: \"plant\") |> filter(fn: (r) => r._measurement == \"flow\") |> aggregateWindow(every: 10s, fn: last)"}},
                        "data": {"values": [[T0, T0 + 60_000, T0 + 120_000], [1.5, null, 3.0]]}
                    }]
                },
                "B": {
                    "frames": [{
                        "schema": {"meta": {"executedQueryString":
                            "from(bucket: \"plant\") |> filter(fn: (r) => r._measurement == \"level\")"}},
                        "data": {"values": [[T0 + 60_000, T0 + 65_000], [7, 8]]}
                    }]
                },
                "C": {"frames": []}
            }
        })
        .to_string()
    }

    #[test]
    fn extracts_measurement_from_flux() {
        let q = r#"filter(fn: (r) => r._measurement == "temp_in") |> last()"#;
        assert_eq!(measurement_name(q).as_deref(), Some("temp_in"));
        assert_eq!(measurement_name("SELECT 1"), None);
    }

    #[test]
    fn unions_measurements_into_one_table() {
        let table = to_table(&parse_response(&response()).unwrap());

        assert_eq!(table.series(), &["flow".to_string(), "level".to_string()]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[0].timestamp, ts(1, 0, 0));
        assert_eq!(table.rows()[0].values, vec![Some(1.5), None]);
        // null flow reading stays absent; later level reading in the same minute wins
        assert_eq!(table.rows()[1].values, vec![None, Some(8.0)]);
        assert_eq!(table.rows()[2].values, vec![Some(3.0), None]);
    }

    #[test]
    fn frames_without_a_query_fall_back_to_schema_or_key() {
        let raw = serde_json::json!({
            "results": {
                "A": {"frames": [
                    {"schema": {"name": "power"}, "data": {"values": [[T0], [true]]}},
                    {"data": {"values": [[T0], [2]]}}
                ]}
            }
        })
        .to_string();
        let table = to_table(&parse_response(&raw).unwrap());
        assert_eq!(table.series(), &["power".to_string(), "A2".to_string()]);
        assert_eq!(table.rows()[0].values, vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn empty_or_error_responses_give_empty_tables() {
        let raw = r#"{"results": {"A": {"error": "bad query", "frames": []}}}"#;
        assert!(to_table(&parse_response(raw).unwrap()).is_empty());
        assert!(to_table(&parse_response("{}").unwrap()).is_empty());
    }

    #[test]
    fn timestamps_truncate_to_the_minute() {
        assert_eq!(minute_of(T0 + 59_999), Some(ts(1, 0, 0)));
        assert_eq!(minute_of(T0 + 60_000), Some(ts(1, 0, 1)));
    }

    #[test]
    fn string_readings_parse_or_count_as_zero() {
        let raw = serde_json::json!({
            "results": {"A": {"frames": [{
                "schema": {"name": "pump"},
                "data": {"values": [[T0, T0 + 60_000, T0 + 120_000], [" 2.5 ", "abc", null]]}
            }]}}
        })
        .to_string();
        let table = to_table(&parse_response(&raw).unwrap());

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].values, vec![Some(2.5)]);
        assert_eq!(table.rows()[1].values, vec![Some(0.0)]);
    }
}
