//! Continuous tracking: pull, reproject, decode, publish.

mod strategy;

pub use strategy::{AcceleratedReprojector, CpuReprojector, Reproject, Reprojector, StrategyMode};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use qrtrack_core::{GrayImage, RgbImage};
use qrtrack_markers::{DecodeError, HeadingConvention, MarkerDecoder, PoseRecord};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::publish::PoseSink;
use crate::source::{FrameSource, SourceError};

#[derive(thiserror::Error, Debug)]
pub enum TrackError {
    #[error("frame source failed: {0}")]
    Source(#[from] SourceError),
    #[error("marker decoding failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("transformation is not invertible")]
    SingularTransformation,
    #[error("could not install the interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),
}

/// Shared stop flag, checked once per iteration.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel on SIGINT / Ctrl-C. Only one handler may exist per process.
    pub fn install_interrupt_handler(&self) -> Result<(), TrackError> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            info!("interrupt received, stopping after the current frame");
            token.cancel();
        })?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    pub heading: HeadingConvention,
    pub strategy: StrategyMode,
    /// Worker threads of the accelerated strategy; `None` lets rayon decide.
    pub threads: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackingSummary {
    pub frames: u64,
    /// Frames dropped because decoding failed.
    pub skipped_frames: u64,
    pub markers: u64,
    pub published: u64,
    /// Records the sink refused.
    pub dropped: u64,
}

/// Per-frame work shared by the tracking loop and single-image decoding.
pub struct FrameProcessor {
    pub reprojector: Reprojector,
    pub heading: HeadingConvention,
}

impl FrameProcessor {
    pub fn new(reprojector: Reprojector, heading: HeadingConvention) -> Self {
        Self {
            reprojector,
            heading,
        }
    }

    /// Scene-space intensity image of a camera frame.
    pub fn reproject(&mut self, frame: &RgbImage) -> GrayImage {
        self.reprojector.reproject(frame)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(w = frame.width, h = frame.height))
    )]
    pub fn process(
        &mut self,
        frame: &RgbImage,
        decoder: &mut dyn MarkerDecoder,
    ) -> Result<Vec<PoseRecord>, DecodeError> {
        let gray = self.reproject(frame);
        let observations = decoder.decode(&gray.view())?;
        debug!("{} markers in frame", observations.len());

        Ok(observations
            .iter()
            .filter_map(|obs| {
                let pose = PoseRecord::from_observation(obs, self.heading);
                if pose.is_none() {
                    debug!(
                        "marker {} has {} corners, too few for {:?}",
                        obs.id,
                        obs.corners.len(),
                        self.heading
                    );
                }
                pose
            })
            .collect())
    }
}

/// One tracking run over a frame source.
pub struct TrackingSession {
    pub processor: FrameProcessor,
    cancel: CancelToken,
}

impl TrackingSession {
    pub fn new(processor: FrameProcessor, cancel: CancelToken) -> Self {
        Self { processor, cancel }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Loop until cancelled; only cancellation ends the session with `Ok`.
    ///
    /// A frame that cannot be pulled aborts the session, including the end of
    /// a finite source. Decode failures skip the frame and sink failures drop
    /// the record; neither stops the loop.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        decoder: &mut dyn MarkerDecoder,
        sink: &mut dyn PoseSink,
    ) -> Result<TrackingSummary, TrackError> {
        let mut summary = TrackingSummary::default();
        info!(
            "tracking started ({} reprojection)",
            self.processor.reprojector.name()
        );

        loop {
            if self.cancel.is_cancelled() {
                info!("tracking cancelled");
                break;
            }

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    error!("failed to load a frame after {} frames: {e}", summary.frames);
                    return Err(e.into());
                }
            };
            summary.frames += 1;

            match self.processor.process(&frame, decoder) {
                Ok(poses) => {
                    for pose in &poses {
                        summary.markers += 1;
                        match sink.publish(pose) {
                            Ok(()) => summary.published += 1,
                            Err(e) => {
                                summary.dropped += 1;
                                warn!("publishing marker {} failed: {e}", pose.id);
                            }
                        }
                    }
                }
                Err(e) => {
                    summary.skipped_frames += 1;
                    warn!("frame {} skipped: {e}", summary.frames);
                }
            }

            std::thread::yield_now();
        }

        info!(
            "tracking finished: {} frames, {} markers, {} published, {} dropped",
            summary.frames, summary.markers, summary.published, summary.dropped
        );
        Ok(summary)
    }
}

/// Decode a single frame; any decoder error is returned.
pub fn decode_frame(
    processor: &mut FrameProcessor,
    frame: &RgbImage,
    decoder: &mut dyn MarkerDecoder,
) -> Result<Vec<PoseRecord>, TrackError> {
    Ok(processor.process(frame, decoder)?)
}
