//! CSV loading and writing at the crate edge.
//!
//! Cells are read as raw strings; typing is left to the operations that
//! need it.

use std::path::Path;

use serde_json::Value;

use super::value::TabularValue;
use crate::error::TableError;

/// Parses CSV text into a tabular value.
pub fn from_csv_str(data: &str) -> Result<TabularValue, TableError> {
    let mut reader = csv::Reader::from_reader(data.as_bytes());
    read_from(&mut reader)
}

/// Reads a CSV file into a tabular value.
pub fn read_csv(path: impl AsRef<Path>) -> Result<TabularValue, TableError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    read_from(&mut reader)
}

fn read_from<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<TabularValue, TableError> {
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    TabularValue::from_records(headers, records)
}

/// Renders a tabular value as CSV text, header row first.
pub fn to_csv_string(table: &TabularValue) -> Result<String, TableError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_to(&mut writer, table)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| TableError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TableError::Csv(e.to_string()))
}

/// Writes a tabular value to a CSV file.
pub fn write_csv(table: &TabularValue, path: impl AsRef<Path>) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    write_to(&mut writer, table)?;
    writer.flush().map_err(|e| TableError::Csv(e.to_string()))
}

fn write_to<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    table: &TabularValue,
) -> Result<(), TableError> {
    writer.write_record(table.headers())?;
    for row in table.rows() {
        let fields: Vec<String> = table
            .headers()
            .iter()
            .map(|h| row.get(h).map(cell_text).unwrap_or_default())
            .collect();
        writer.write_record(&fields)?;
    }
    Ok(())
}

/// Text form of a cell as it appears in CSV output.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_csv_str_keeps_raw_strings() {
        let table = from_csv_str("email,age\nA@x.com,31\nb@y.org,\n").expect("parse");

        assert_eq!(table.headers(), &["email".to_string(), "age".to_string()]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[0]["age"], json!("31"));
        assert_eq!(table.rows()[1]["age"], json!(""));
    }

    #[test]
    fn test_ragged_csv_is_an_error() {
        assert!(from_csv_str("a,b\n1,2\n3\n").is_err());
    }

    #[test]
    fn test_to_csv_string_renders_numbers_and_nulls() {
        let table = TabularValue::from_rows(
            vec!["name".to_string(), "total".to_string()],
            vec![
                [
                    ("name".to_string(), json!("north")),
                    ("total".to_string(), json!(12.5)),
                ]
                .into_iter()
                .collect(),
                [
                    ("name".to_string(), json!("south")),
                    ("total".to_string(), Value::Null),
                ]
                .into_iter()
                .collect(),
            ],
        )
        .expect("valid table");

        let text = to_csv_string(&table).expect("render");
        assert_eq!(text, "name,total\nnorth,12.5\nsouth,\n");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.csv");

        let table = from_csv_str("city,pop\n\"Paris, FR\",2100000\n").expect("parse");
        write_csv(&table, &path).expect("write");
        let loaded = read_csv(&path).expect("read");

        assert_eq!(loaded, table);
        assert_eq!(loaded.rows()[0]["city"], json!("Paris, FR"));
    }
}
