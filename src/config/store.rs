use std::path::Path;

use super::LinkConfig;
use crate::error::{LinkError, Result};

/// Load a JSON configuration file
///
/// Missing sections and fields fall back to their defaults. The result is
/// validated before it is returned.
pub fn load_file(path: &Path) -> Result<LinkConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        LinkError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let config: LinkConfig = serde_json::from_str(&text).map_err(|e| {
        LinkError::Config(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    config.validate()?;
    tracing::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load `path` when given, otherwise return the defaults
pub fn load_or_default(path: Option<&Path>) -> Result<LinkConfig> {
    match path {
        Some(path) => load_file(path),
        None => Ok(LinkConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"signaling_url":"ws://10.0.0.2:8442","telemetry":{{"interval_ms":10,"hands":["right"]}}}}"#
        )
        .unwrap();

        let config = load_file(file.path()).unwrap();
        assert_eq!(config.signaling_url, "ws://10.0.0.2:8442");
        assert_eq!(config.telemetry.interval_ms, 10);
        assert_eq!(config.telemetry.hands.len(), 1);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"telemetry":{{"interval_ms":0}}}}"#).unwrap();
        assert!(load_file(file.path()).is_err());
    }

    #[test]
    fn test_no_path_gives_defaults() {
        assert_eq!(load_or_default(None).unwrap(), LinkConfig::default());
    }
}
