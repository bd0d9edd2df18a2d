//! YAML/JSON document reading shared by tool configs and playbooks.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ConfigError;

/// Serialization format chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }

    pub fn parse<T: DeserializeOwned>(self, path: &Path, contents: &str) -> Result<T, ConfigError> {
        let parsed = match self {
            Self::Yaml => serde_yaml::from_str(contents).map_err(|err| err.to_string()),
            Self::Json => serde_json::from_str(contents).map_err(|err| err.to_string()),
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// Read and deserialize a document. Format is checked before the file is touched.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = DocumentFormat::from_path(path)?;
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), ?format, "parsing document");
    format.parse(path, &contents)
}
