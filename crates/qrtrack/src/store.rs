//! Geometry records: reference grid, scene extent and transformation.
//!
//! Files are YAML unless their extension is `.json`. YAML written by OpenCV
//! `FileStorage` is accepted as is: the `%YAML:1.0` directive is dropped and
//! type tags such as `!!opencv-matrix` are ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nalgebra::Point2;
use qrtrack_core::Homography;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// strftime pattern of `calib_time`.
pub const CALIB_TIME_FORMAT: &str = "%a %B %d %G - %X";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{}: file not found", path.display())]
    NotFound { path: PathBuf },
    #[error("{}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: malformed record: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("{}: write failed: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How the `Size` field of a grid file counts the board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridConvention {
    /// `Size` counts inner corners.
    #[default]
    InnerCorners,
    /// `Size` counts squares; the inner-corner grid is one smaller each way.
    Squares,
}

/// Scene-space layout of the checkerboard's inner corners.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceGrid {
    pub origin: Point2<f64>,
    pub step: f64,
    /// Inner corners along y.
    pub rows: usize,
    /// Inner corners along x.
    pub cols: usize,
}

impl ReferenceGrid {
    pub fn corner_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Scene coordinates of every inner corner, row-major from the origin.
    pub fn scene_points(&self) -> Vec<Point2<f32>> {
        let mut pts = Vec::with_capacity(self.corner_count());
        for j in 0..self.rows {
            for i in 0..self.cols {
                pts.push(Point2::new(
                    (self.origin.x + i as f64 * self.step) as f32,
                    (self.origin.y + j as f64 * self.step) as f32,
                ));
            }
        }
        pts
    }
}

/// Output canvas of every warp, in scene pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneExtent {
    pub width: usize,
    pub height: usize,
}

impl SceneExtent {
    /// Used by calibration when no extent is supplied.
    pub const FALLBACK: SceneExtent = SceneExtent {
        width: 1200,
        height: 1200,
    };
}

/// Persisted camera-to-scene homography.
#[derive(Clone, Debug, PartialEq)]
pub struct Transformation {
    pub homography: Homography,
    pub calib_time: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

fn malformed(path: &Path, reason: impl ToString) -> StoreError {
    StoreError::Malformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_text(path: &Path) -> Result<String, StoreError> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound {
            path: path.to_path_buf(),
        },
        _ => StoreError::Read {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn untag(value: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match value {
        Value::Tagged(tagged) => untag(tagged.value),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(untag).collect()),
        Value::Mapping(map) => {
            Value::Mapping(map.into_iter().map(|(k, v)| (k, untag(v))).collect())
        }
        other => other,
    }
}

fn parse_record<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T, StoreError> {
    match Format::of(path) {
        Format::Json => serde_json::from_str(text).map_err(|e| malformed(path, e)),
        Format::Yaml => {
            let body: String = text
                .lines()
                .filter(|l| !l.trim_start().starts_with("%YAML"))
                .collect::<Vec<_>>()
                .join("\n");
            let value: serde_yaml::Value =
                serde_yaml::from_str(&body).map_err(|e| malformed(path, e))?;
            serde_yaml::from_value(untag(value)).map_err(|e| malformed(path, e))
        }
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let text = read_text(path)?;
    parse_record(path, &text)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    /// OpenCV `Size` order: width (columns), height (rows).
    Pair(Vec<i64>),
    Named {
        #[serde(rename = "Rows", alias = "rows")]
        rows: i64,
        #[serde(rename = "Columns", alias = "columns", alias = "cols")]
        cols: i64,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Pair(Vec<f64>),
    Named {
        #[serde(rename = "X", alias = "x")]
        x: f64,
        #[serde(rename = "Y", alias = "y")]
        y: f64,
    },
}

#[derive(Deserialize)]
struct RawGrid {
    #[serde(rename = "Size", alias = "size")]
    size: RawSize,
    #[serde(rename = "Origin", alias = "origin")]
    origin: RawPoint,
    #[serde(rename = "Step", alias = "step")]
    step: f64,
}

#[derive(Deserialize)]
struct RawExtent {
    #[serde(rename = "Size", alias = "size", default)]
    size: Option<Vec<i64>>,
    #[serde(rename = "Width", alias = "width", default)]
    width: Option<i64>,
    #[serde(rename = "Height", alias = "height", default)]
    height: Option<i64>,
}

#[derive(Deserialize, Serialize)]
struct OpenCvMatrix {
    rows: usize,
    cols: usize,
    #[serde(default)]
    dt: Option<String>,
    data: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMatrix {
    Nested(Vec<Vec<f64>>),
    Flat(Vec<f64>),
    OpenCv(OpenCvMatrix),
}

#[derive(Deserialize)]
struct RawTransformation {
    #[serde(default)]
    calib_time: Option<String>,
    transform_mat: RawMatrix,
}

#[derive(Serialize)]
struct StoredTransformation<'a> {
    calib_time: &'a str,
    transform_mat: OpenCvMatrix,
}

fn positive(path: &Path, what: &str, v: i64) -> Result<usize, StoreError> {
    if v < 1 {
        return Err(malformed(path, format!("{what} must be at least 1, got {v}")));
    }
    usize::try_from(v).map_err(|e| malformed(path, e))
}

/// Load the checkerboard reference grid.
pub fn load_reference_grid(
    path: impl AsRef<Path>,
    convention: GridConvention,
) -> Result<ReferenceGrid, StoreError> {
    let path = path.as_ref();
    let raw: RawGrid = read_record(path)?;

    let (rows, cols) = match raw.size {
        RawSize::Pair(v) if v.len() == 2 => (v[1], v[0]),
        RawSize::Pair(v) => {
            return Err(malformed(path, format!("Size needs 2 entries, got {}", v.len())))
        }
        RawSize::Named { rows, cols } => (rows, cols),
    };
    let (rows, cols) = match convention {
        GridConvention::InnerCorners => (rows, cols),
        GridConvention::Squares => (rows - 1, cols - 1),
    };
    let rows = positive(path, "grid rows", rows)?;
    let cols = positive(path, "grid columns", cols)?;

    let origin = match raw.origin {
        RawPoint::Pair(v) if v.len() == 2 => Point2::new(v[0], v[1]),
        RawPoint::Pair(v) => {
            return Err(malformed(path, format!("Origin needs 2 entries, got {}", v.len())))
        }
        RawPoint::Named { x, y } => Point2::new(x, y),
    };
    if !origin.x.is_finite() || !origin.y.is_finite() {
        return Err(malformed(path, "Origin is not finite"));
    }
    if !(raw.step.is_finite() && raw.step > 0.0) {
        return Err(malformed(path, format!("Step must be positive, got {}", raw.step)));
    }

    let grid = ReferenceGrid {
        origin,
        step: raw.step,
        rows,
        cols,
    };
    log::debug!(
        "reference grid {}x{} inner corners, step {} from ({}, {})",
        grid.cols,
        grid.rows,
        grid.step,
        grid.origin.x,
        grid.origin.y
    );
    Ok(grid)
}

/// Load the output canvas size.
pub fn load_scene_extent(path: impl AsRef<Path>) -> Result<SceneExtent, StoreError> {
    let path = path.as_ref();
    let raw: RawExtent = read_record(path)?;

    let (w, h) = match (raw.size, raw.width, raw.height) {
        (Some(v), _, _) if v.len() == 2 => (v[0], v[1]),
        (Some(v), _, _) => {
            return Err(malformed(path, format!("Size needs 2 entries, got {}", v.len())))
        }
        (None, Some(w), Some(h)) => (w, h),
        _ => return Err(malformed(path, "expected Size or Width/Height")),
    };

    Ok(SceneExtent {
        width: positive(path, "scene width", w)?,
        height: positive(path, "scene height", h)?,
    })
}

/// Write the transformation with a local-time `calib_time` stamp.
///
/// An existing file is overwritten.
pub fn save_transformation(matrix: &Homography, path: impl AsRef<Path>) -> Result<(), StoreError> {
    let path = path.as_ref();
    let stamp = chrono::Local::now().format(CALIB_TIME_FORMAT).to_string();
    let record = StoredTransformation {
        calib_time: &stamp,
        transform_mat: OpenCvMatrix {
            rows: 3,
            cols: 3,
            dt: Some("d".to_string()),
            data: matrix.to_row_major().to_vec(),
        },
    };

    let invalid = |e: String| StoreError::WriteFailure {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    };
    let text = match Format::of(path) {
        Format::Json => serde_json::to_string_pretty(&record).map_err(|e| invalid(e.to_string()))?,
        Format::Yaml => serde_yaml::to_string(&record).map_err(|e| invalid(e.to_string()))?,
    };

    fs::write(path, text).map_err(|source| StoreError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("transformation written to {}", path.display());
    Ok(())
}

/// Load a transformation written by [`save_transformation`] or the legacy tools.
pub fn load_transformation(path: impl AsRef<Path>) -> Result<Transformation, StoreError> {
    let path = path.as_ref();
    let raw: RawTransformation = read_record(path)?;

    let values: Vec<f64> = match raw.transform_mat {
        RawMatrix::Nested(rows) => {
            if rows.len() != 3 || rows.iter().any(|r| r.len() != 3) {
                return Err(malformed(path, "transform_mat must be 3x3"));
            }
            rows.into_iter().flatten().collect()
        }
        RawMatrix::Flat(v) => v,
        RawMatrix::OpenCv(m) => {
            if m.rows != 3 || m.cols != 3 {
                return Err(malformed(
                    path,
                    format!("transform_mat must be 3x3, got {}x{}", m.rows, m.cols),
                ));
            }
            m.data
        }
    };

    let values: [f64; 9] = values
        .try_into()
        .map_err(|v: Vec<f64>| malformed(path, format!("transform_mat needs 9 values, got {}", v.len())))?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(malformed(path, "transform_mat has non-finite entries"));
    }

    Ok(Transformation {
        homography: Homography::from_row_major(&values),
        calib_time: raw.calib_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_points_are_row_major() {
        let grid = ReferenceGrid {
            origin: Point2::new(10.0, 20.0),
            step: 5.0,
            rows: 2,
            cols: 3,
        };
        let pts = grid.scene_points();
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[0], Point2::new(10.0, 20.0));
        assert_eq!(pts[2], Point2::new(20.0, 20.0));
        assert_eq!(pts[3], Point2::new(10.0, 25.0));
        for w in pts.windows(2) {
            assert!(w[1].y > w[0].y || (w[1].y == w[0].y && w[1].x > w[0].x));
        }
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::of(Path::new("a.JSON")), Format::Json);
        assert_eq!(Format::of(Path::new("a.yml")), Format::Yaml);
        assert_eq!(Format::of(Path::new("a.xml")), Format::Yaml);
        assert_eq!(Format::of(Path::new("noext")), Format::Yaml);
    }

    #[test]
    fn directive_and_tags_are_ignored() {
        let text = "%YAML:1.0\n---\ntransform_mat: !!opencv-matrix\n   rows: 3\n   cols: 3\n   dt: d\n   data: [ 1.0000000000000000e+00, 0.0, 0.0, 0.0, 1.0000000000000000e+00, 0.0, 0.0, 0.0, 1.0000000000000000e+00 ]\n";
        let raw: RawTransformation = parse_record(Path::new("t.yml"), text).expect("parse");
        assert!(matches!(raw.transform_mat, RawMatrix::OpenCv(ref m) if m.data.len() == 9));
    }
}
