// omectl - CLI for OpenManage Enterprise device inventory
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Rendering the device collection and placing it on disk or stdout.

use crate::model::{Device, DeviceCollection};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Columns of the CSV export, in order.
pub const CSV_COLUMNS: [&str; 6] = [
    "Id",
    "Identifier",
    "DeviceServiceTag",
    "ChassisServiceTag",
    "Model",
    "DeviceName",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output file {path:?} does not match requested format `{format}`")]
    FormatMismatch { path: PathBuf, format: OutputFormat },
    #[error("device #{index} ({label}) has no `{field}` field")]
    MissingField {
        index: usize,
        label: String,
        field: &'static str,
    },
    #[error("serializing device list as JSON")]
    Json(#[from] serde_json::Error),
    #[error("writing CSV record")]
    Csv(#[from] csv::Error),
    #[error("writing {0}")]
    Io(String, #[source] io::Error),
}

/// A path with a non-empty extension must carry the extension of `format`.
/// Comparison is case-sensitive; paths without an extension always pass.
pub fn validate_output_format(path: Option<&Path>, format: OutputFormat) -> bool {
    let Some(extension) = path.and_then(Path::extension) else {
        return true;
    };
    extension.is_empty() || extension.to_str() == Some(format.extension())
}

pub fn ensure_output_format(path: Option<&Path>, format: OutputFormat) -> Result<(), OutputError> {
    if validate_output_format(path, format) {
        return Ok(());
    }
    Err(OutputError::FormatMismatch {
        path: path.map(Path::to_path_buf).unwrap_or_default(),
        format,
    })
}

/// First of `report.json`, `report(1).json`, `report(2).json`, ... that does not exist yet.
pub fn resolve_output_path(requested: &Path) -> PathBuf {
    if !requested.exists() {
        return requested.to_path_buf();
    }

    let stem = requested.file_stem().unwrap_or_default();
    let extension = requested.extension();
    let mut counter: u64 = 1;
    loop {
        let mut name = stem.to_os_string();
        name.push(format!("({counter})"));
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }
        let candidate = requested.with_file_name(name);
        if !candidate.exists() {
            debug!(
                requested = %requested.display(),
                chosen = %candidate.display(),
                "output file exists, writing to a new name"
            );
            return candidate;
        }
        counter += 1;
    }
}

pub fn render(collection: &DeviceCollection, format: OutputFormat) -> Result<Vec<u8>, OutputError> {
    match format {
        OutputFormat::Json => render_json(collection).map(String::into_bytes),
        OutputFormat::Csv => render_csv(collection),
    }
}

/// Pretty JSON with every object's keys sorted and a four-space indent.
pub fn render_json(collection: &DeviceCollection) -> Result<String, OutputError> {
    let value = sort_keys(serde_json::to_value(collection)?);
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    buf.push(b'\n');
    // serde_json only emits UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn render_csv(collection: &DeviceCollection) -> Result<Vec<u8>, OutputError> {
    let terminator = if cfg!(windows) {
        csv::Terminator::CRLF
    } else {
        csv::Terminator::Any(b'\n')
    };
    let mut writer = csv::WriterBuilder::new()
        .terminator(terminator)
        .from_writer(Vec::new());

    writer.write_record(CSV_COLUMNS)?;
    for (index, device) in collection.value.iter().enumerate() {
        writer.write_record(csv_row(index, device)?)?;
    }
    writer
        .into_inner()
        .map_err(|err| OutputError::Io("CSV buffer".to_string(), err.into_error()))
}

fn csv_row(index: usize, device: &Device) -> Result<Vec<String>, OutputError> {
    CSV_COLUMNS
        .iter()
        .map(|&field| {
            device
                .field(field)
                .map(cell)
                .ok_or_else(|| OutputError::MissingField {
                    index,
                    label: device.label(),
                    field,
                })
        })
        .collect()
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Writes to a fresh file next to `destination` (see [`resolve_output_path`]) or to stdout.
/// Returns the file actually written.
pub fn write_output(bytes: &[u8], destination: Option<&Path>) -> Result<Option<PathBuf>, OutputError> {
    let Some(requested) = destination else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(bytes)
            .and_then(|_| handle.flush())
            .map_err(|err| OutputError::Io("stdout".to_string(), err))?;
        return Ok(None);
    };

    let path = resolve_output_path(requested);
    let io_err = |err| OutputError::Io(path.display().to_string(), err);
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .and_then(|_| writer.flush())
        .map_err(io_err)?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn collection(devices: Value) -> DeviceCollection {
        serde_json::from_value(json!({
            "@odata.context": "/api/$metadata#Collection(DeviceService.Device)",
            "@odata.count": devices.as_array().map(|a| a.len()).unwrap_or(0),
            "value": devices
        }))
        .unwrap()
    }

    fn r740() -> Value {
        json!({
            "Type": 1000,
            "Id": 10074,
            "Identifier": "GV6V7Z2",
            "DeviceServiceTag": "GV6V7Z2",
            "ChassisServiceTag": null,
            "Model": "PowerEdge R740",
            "DeviceName": "r740-01.lab",
            "Status": 1000,
            "DeviceManagement": [{"NetworkAddress": "192.168.1.45", "ManagementType": 2}]
        })
    }

    #[test]
    fn format_validation_follows_extension() {
        assert!(!validate_output_format(Some(Path::new("out.csv")), OutputFormat::Json));
        assert!(validate_output_format(Some(Path::new("out.json")), OutputFormat::Json));
        assert!(validate_output_format(Some(Path::new("noext")), OutputFormat::Csv));
        assert!(validate_output_format(None, OutputFormat::Csv));
        assert!(!validate_output_format(Some(Path::new("out.JSON")), OutputFormat::Json));
        assert!(validate_output_format(Some(Path::new("reports/.hidden")), OutputFormat::Json));
    }

    #[test]
    fn ensure_output_format_reports_mismatch() {
        let err = ensure_output_format(Some(Path::new("inventory.csv")), OutputFormat::Json).unwrap_err();
        assert!(matches!(err, OutputError::FormatMismatch { format: OutputFormat::Json, .. }));
        assert!(err.to_string().contains("inventory.csv"));
    }

    #[test]
    fn missing_path_is_used_unchanged() {
        let dir = tempdir().unwrap();
        let requested = dir.path().join("report.json");
        assert_eq!(resolve_output_path(&requested), requested);
    }

    #[test]
    fn existing_paths_get_next_free_counter() {
        let dir = tempdir().unwrap();
        let requested = dir.path().join("report.json");
        fs::write(&requested, "{}").unwrap();
        assert_eq!(resolve_output_path(&requested), dir.path().join("report(1).json"));

        fs::write(dir.path().join("report(1).json"), "{}").unwrap();
        assert_eq!(resolve_output_path(&requested), dir.path().join("report(2).json"));
    }

    #[test]
    fn counter_is_appended_when_there_is_no_extension() {
        let dir = tempdir().unwrap();
        let requested = dir.path().join("report");
        fs::write(&requested, "").unwrap();
        assert_eq!(resolve_output_path(&requested), dir.path().join("report(1)"));
    }

    #[test]
    fn json_round_trips_with_sorted_keys_and_four_space_indent() {
        let original = collection(json!([r740(), {"Id": 10075, "Zeta": 1, "Alpha": {"b": 2, "a": 1}}]));
        let rendered = render_json(&original).unwrap();

        assert!(rendered.starts_with("{\n    \"@odata.context\""));
        assert!(rendered.ends_with("}\n"));
        let alpha = rendered.find("\"Alpha\"").unwrap();
        let zeta = rendered.find("\"Zeta\"").unwrap();
        assert!(alpha < zeta);
        assert!(rendered.find("\"a\": 1").unwrap() < rendered.find("\"b\": 2").unwrap());

        let parsed: DeviceCollection = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn csv_has_fixed_header_and_rows() {
        let data = collection(json!([r740(), {
            "Id": 10080,
            "Identifier": "J8K2M13",
            "DeviceServiceTag": "J8K2M13",
            "ChassisServiceTag": "CH4SS1S",
            "Model": "PowerEdge MX740c, 2S",
            "DeviceName": "mx-sled-3"
        }]));
        let rendered = String::from_utf8(render_csv(&data).unwrap()).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(
            lines,
            vec![
                "Id,Identifier,DeviceServiceTag,ChassisServiceTag,Model,DeviceName",
                "10074,GV6V7Z2,GV6V7Z2,,PowerEdge R740,r740-01.lab",
                "10080,J8K2M13,J8K2M13,CH4SS1S,\"PowerEdge MX740c, 2S\",mx-sled-3",
            ]
        );
    }

    #[test]
    fn csv_missing_model_is_an_error() {
        let mut device = r740();
        device.as_object_mut().unwrap().remove("Model");
        let err = render_csv(&collection(json!([device]))).unwrap_err();
        match err {
            OutputError::MissingField { index, label, field } => {
                assert_eq!(index, 0);
                assert_eq!(label, "10074");
                assert_eq!(field, "Model");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn write_output_never_overwrites() {
        let dir = tempdir().unwrap();
        let requested = dir.path().join("devices.csv");
        fs::write(&requested, "keep me").unwrap();

        let written = write_output(b"Id\n1\n", Some(&requested)).unwrap().unwrap();

        assert_eq!(written, dir.path().join("devices(1).csv"));
        assert_eq!(fs::read_to_string(&requested).unwrap(), "keep me");
        assert_eq!(fs::read_to_string(&written).unwrap(), "Id\n1\n");
    }

    #[test]
    fn render_dispatches_on_format() {
        let data = collection(json!([r740()]));
        let json = render(&data, OutputFormat::Json).unwrap();
        assert!(json.starts_with(b"{"));
        let csv = render(&data, OutputFormat::Csv).unwrap();
        assert!(csv.starts_with(b"Id,Identifier"));
    }
}
