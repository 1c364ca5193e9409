use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Parses a JSON file into a given type `T`.
///
/// Errors are automatically converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let data = fs::read_to_string(file_path.as_ref())?;
    let parsed_data: T = serde_json::from_str(&data)?;

    Ok(parsed_data)
}

/// Reads a JSON document as an untyped value. A missing file is treated as `null`.
pub fn read_json_value(file_path: impl AsRef<Path>) -> Result<serde_json::Value> {
    match fs::read_to_string(file_path.as_ref()) {
        Ok(data) if data.trim().is_empty() => Ok(serde_json::Value::Null),
        Ok(data) => Ok(serde_json::from_str(&data)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Value::Null),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        name: String,
    }

    #[test]
    fn parse_json_file_reads_typed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.json");
        fs::write(&path, r#"{"name":"m1"}"#).unwrap();

        let probe: Probe = parse_json_file(&path).unwrap();
        assert_eq!(probe.name, "m1");
    }

    #[test]
    fn parse_json_file_reports_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.json");
        fs::write(&path, "{not json").unwrap();

        let result: Result<Probe> = parse_json_file(&path);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn read_json_value_treats_missing_file_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let value = read_json_value(dir.path().join("absent.json")).unwrap();
        assert!(value.is_null());
    }
}
