//! Planar workspace calibration and QR marker tracking.
//!
//! The crate ties the workspace together:
//!
//! - [`store`]: reference grid, scene extent and transformation files.
//! - [`source`]: still images, video files and capture devices.
//! - [`calibrate`]: checkerboard homography with a human accept/retry step.
//! - [`track`]: the per-frame reproject, decode and publish loop.
//! - [`publish`]: pose sinks, including the OSC parameter-tree publisher.
//!
//! Offline, [`calibrate::Calibrator`] turns one frame of a checkerboard into a
//! camera-to-scene [`qrtrack_core::Homography`]. Online,
//! [`track::TrackingSession`] warps every frame through it, decodes markers
//! and forwards one [`qrtrack_markers::PoseRecord`] per marker.

pub mod calibrate;
pub mod config;
pub mod detect;
pub mod publish;
pub mod source;
pub mod store;
pub mod track;

pub use qrtrack_chessboard as chessboard;
pub use qrtrack_core as core;
pub use qrtrack_markers as markers;

pub use calibrate::{
    CalibrationError, CalibrationOutcome, CalibrationParams, CalibrationState, Calibrator,
    CheckerboardFinder, ConfirmationProvider, ConsoleConfirmation, CornerOrder,
    ScriptedConfirmation, Verdict,
};
pub use config::{ConfigError, PipelineConfig};
pub use publish::{LogSink, ParameterTreePublisher, PoseSink, PublishError, PublisherParams};
pub use source::{FrameSource, SourceDescriptor, SourceError};
pub use store::{GridConvention, ReferenceGrid, SceneExtent, StoreError, Transformation};
pub use track::{
    CancelToken, FrameProcessor, Reprojector, StrategyMode, TrackError, TrackingParams,
    TrackingSession, TrackingSummary,
};
