//! Event serializers handed out by storage dialects.
//!
//! Unbuffered backends take a [`Converter`] (one event per save); buffered
//! backends take a [`BatchConverter`] (the whole buffer per save). Batch
//! output preserves buffer order.

use crate::error::{Error, Result};
use crate::event::Event;

/// Serialize a single event.
pub type Converter = fn(&Event) -> Result<Vec<u8>>;

/// Serialize a batch of events into one payload.
pub type BatchConverter = fn(&[Event]) -> Result<Vec<u8>>;

const CSV_DELIMITER: char = '\u{1}';

/// Converter for a file format name (`json` or `csv`).
pub fn converter_for(format: &str) -> Result<Converter> {
    match format {
        "json" => Ok(convert_json),
        "csv" => Ok(convert_csv),
        other => Err(unsupported(other)),
    }
}

/// Batch converter for a file format name (`json` or `csv`).
pub fn batch_converter_for(format: &str) -> Result<BatchConverter> {
    match format {
        "json" => Ok(convert_batch_json),
        "csv" => Ok(convert_batch_csv),
        other => Err(unsupported(other)),
    }
}

fn unsupported(format: &str) -> Error {
    Error::Config(format!(
        "unsupported output `{format}` file format (use `json` or `csv`)"
    ))
}

/// One JSON object terminated by a newline.
pub fn convert_json(event: &Event) -> Result<Vec<u8>> {
    let mut out = serde_json::to_vec(event).map_err(|e| Error::Convert(e.to_string()))?;
    out.push(b'\n');
    Ok(out)
}

/// Newline-delimited JSON.
pub fn convert_batch_json(events: &[Event]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for event in events {
        out.extend(convert_json(event)?);
    }
    Ok(out)
}

/// One `\x01`-delimited record terminated by a newline.
pub fn convert_csv(event: &Event) -> Result<Vec<u8>> {
    let mut out = String::new();
    write_record(&mut out, &event.to_record());
    Ok(out.into_bytes())
}

pub fn convert_batch_csv(events: &[Event]) -> Result<Vec<u8>> {
    let mut out = String::new();
    for event in events {
        write_record(&mut out, &event.to_record());
    }
    Ok(out.into_bytes())
}

fn write_record(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(CSV_DELIMITER);
        }
        if needs_quotes(field) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

fn needs_quotes(field: &str) -> bool {
    field
        .chars()
        .any(|c| c == CSV_DELIMITER || c == '"' || c == '\n' || c == '\r')
}
