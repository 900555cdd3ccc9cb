//! Pipeline configuration file.
//!
//! Every section is optional; missing fields take their defaults. JSON when
//! the file ends in `.json`, YAML otherwise.

use std::path::{Path, PathBuf};

use qrtrack_chessboard::ChessboardParams;
use serde::{Deserialize, Serialize};

use crate::calibrate::CalibrationParams;
use crate::publish::PublisherParams;
use crate::store::GridConvention;
use crate::track::TrackingParams;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub grid_convention: GridConvention,
    pub calibration: CalibrationParams,
    pub chessboard: ChessboardParams,
    pub tracking: TrackingParams,
    pub publisher: PublisherParams,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))
        } else {
            serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))
        }
    }
}
