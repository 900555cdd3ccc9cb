//! Interactive checkerboard calibration.
//!
//! Detection order of the inner corners is ambiguous up to a half turn of the
//! board. The engine presents the forward solution to a reviewer, and on
//! rejection the solution computed from the reversed corner sequence:
//!
//! ```text
//! Detecting -> NotFound
//!           -> Found -> AwaitingConfirm(Forward) -> Accepted(Forward)
//!                                                -> Rejected(Forward) -> AwaitingConfirm(Reversed)
//!                                                                        -> Accepted(Reversed)
//!                                                                        -> Rejected(Reversed)
//! ```

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use nalgebra::Point2;
use qrtrack_chessboard::ChessboardError;
use qrtrack_core::{
    estimate_homography, refine_corners_subpix, rgb_to_gray, warp_perspective_rgb, GrayImage,
    Homography, RgbImage, SubPixParams, WarpPlan,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::source::{save_frame, SourceError};
use crate::store::{save_transformation, ReferenceGrid, SceneExtent, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("checkerboard corners not found: {0}")]
    CornersNotFound(#[source] ChessboardError),
    #[error("detected {detected} corners but the reference grid has {expected}")]
    CornerCountMismatch { detected: usize, expected: usize },
    #[error("homography estimation failed for the {0} corner order")]
    HomographyFailed(CornerOrder),
    #[error("calibration rejected in both corner orders; check the grid file and board placement")]
    CalibrationRejected,
    #[error("reviewer interaction failed: {0}")]
    Interaction(#[from] io::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Order in which detected corners are paired with the reference grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CornerOrder {
    Forward,
    Reversed,
}

impl std::fmt::Display for CornerOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Forward => "forward",
            Self::Reversed => "reversed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationState {
    Detecting,
    Found,
    NotFound,
    AwaitingConfirm(CornerOrder),
    Accepted(CornerOrder),
    Rejected(CornerOrder),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Locates the inner corners of a `cols x rows` checkerboard, row-major.
pub trait CheckerboardFinder {
    fn find(
        &self,
        image: &GrayImage,
        rows: usize,
        cols: usize,
    ) -> Result<Vec<Point2<f32>>, ChessboardError>;
}

/// The human in the loop.
pub trait ConfirmationProvider {
    /// Judge a frame reprojected into the scene extent.
    fn review(&mut self, preview: &RgbImage, order: CornerOrder) -> Result<Verdict, CalibrationError>;

    /// Whether a raw device frame should be kept at `path`.
    fn offer_capture_save(&mut self, _path: &Path) -> bool {
        false
    }
}

/// Answers from a prepared list; an exhausted list rejects.
#[derive(Debug, Default)]
pub struct ScriptedConfirmation {
    answers: VecDeque<Verdict>,
    save_capture: bool,
    /// Orders presented so far.
    pub reviewed: Vec<CornerOrder>,
}

impl ScriptedConfirmation {
    pub fn new(answers: impl IntoIterator<Item = Verdict>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_capture_save(mut self, save: bool) -> Self {
        self.save_capture = save;
        self
    }
}

impl ConfirmationProvider for ScriptedConfirmation {
    fn review(&mut self, _preview: &RgbImage, order: CornerOrder) -> Result<Verdict, CalibrationError> {
        self.reviewed.push(order);
        Ok(self.answers.pop_front().unwrap_or(Verdict::Reject))
    }

    fn offer_capture_save(&mut self, _path: &Path) -> bool {
        self.save_capture
    }
}

/// Y/N prompts on a line-oriented terminal.
///
/// End of input counts as "no". When `preview_path` is set each candidate is
/// written there as an image before the question.
pub struct ConsoleConfirmation<R, W> {
    input: R,
    output: W,
    pub preview_path: Option<PathBuf>,
}

impl<R: BufRead, W: Write> ConsoleConfirmation<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            preview_path: None,
        }
    }

    pub fn with_preview(mut self, path: Option<PathBuf>) -> Self {
        self.preview_path = path;
        self
    }

    fn ask_yes_no(&mut self, question: &str) -> io::Result<bool> {
        let mut line = String::new();
        loop {
            writeln!(self.output, "{question}")?;
            self.output.flush()?;
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            match line.trim() {
                "y" | "Y" => return Ok(true),
                "n" | "N" => return Ok(false),
                _ => continue,
            }
        }
    }
}

impl ConsoleConfirmation<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConfirmationProvider for ConsoleConfirmation<R, W> {
    fn review(&mut self, preview: &RgbImage, order: CornerOrder) -> Result<Verdict, CalibrationError> {
        if let Some(path) = self.preview_path.clone() {
            save_frame(preview, &path)?;
            writeln!(
                self.output,
                "Reprojected frame ({order} corner order) written to {}",
                path.display()
            )?;
        }
        Ok(if self.ask_yes_no("Is the result correct? Y/N")? {
            Verdict::Accept
        } else {
            Verdict::Reject
        })
    }

    fn offer_capture_save(&mut self, path: &Path) -> bool {
        let question = format!("Save the captured frame to {}? Y/N", path.display());
        self.ask_yes_no(&question).unwrap_or_else(|e| {
            warn!("could not read the answer: {e}");
            false
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub refine_subpix: bool,
    pub subpix: SubPixParams,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            refine_subpix: true,
            subpix: SubPixParams::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CalibrationOutcome {
    /// Camera pixels to scene pixels.
    pub transformation: Homography,
    pub order: CornerOrder,
    /// Detected (and refined) corners in detection order.
    pub image_corners: Vec<Point2<f32>>,
    /// States visited, first to last.
    pub trace: Vec<CalibrationState>,
}

pub struct Calibrator<F> {
    pub finder: F,
    pub params: CalibrationParams,
}

impl<F: CheckerboardFinder> Calibrator<F> {
    pub fn new(finder: F, params: CalibrationParams) -> Self {
        Self { finder, params }
    }

    /// Run detection and the two-round review on a single frame.
    ///
    /// `extent` falls back to [`SceneExtent::FALLBACK`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(rows = grid.rows, cols = grid.cols))
    )]
    pub fn calibrate(
        &self,
        frame: &RgbImage,
        grid: &ReferenceGrid,
        extent: Option<SceneExtent>,
        reviewer: &mut dyn ConfirmationProvider,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let extent = extent.unwrap_or(SceneExtent::FALLBACK);
        let mut trace = vec![CalibrationState::Detecting];

        let gray = rgb_to_gray(&frame.view());
        let mut corners = match self.finder.find(&gray, grid.rows, grid.cols) {
            Ok(c) => c,
            Err(e) => {
                trace.push(CalibrationState::NotFound);
                debug!("calibration trace: {trace:?}");
                return Err(CalibrationError::CornersNotFound(e));
            }
        };
        trace.push(CalibrationState::Found);
        info!(
            "found {} checkerboard corners ({}x{})",
            corners.len(),
            grid.cols,
            grid.rows
        );

        let scene = grid.scene_points();
        if corners.len() != scene.len() {
            return Err(CalibrationError::CornerCountMismatch {
                detected: corners.len(),
                expected: scene.len(),
            });
        }

        if self.params.refine_subpix {
            refine_corners_subpix(&gray.view(), &mut corners, &self.params.subpix);
        }

        for order in [CornerOrder::Forward, CornerOrder::Reversed] {
            let mut ordered = corners.clone();
            if order == CornerOrder::Reversed {
                ordered.reverse();
            }
            let h = estimate_homography(&ordered, &scene)
                .ok_or(CalibrationError::HomographyFailed(order))?;
            let plan = WarpPlan::new(&h, extent.width, extent.height)
                .ok_or(CalibrationError::HomographyFailed(order))?;
            let preview = warp_perspective_rgb(&frame.view(), &plan);

            trace.push(CalibrationState::AwaitingConfirm(order));
            match reviewer.review(&preview, order)? {
                Verdict::Accept => {
                    trace.push(CalibrationState::Accepted(order));
                    info!("calibration accepted ({order} corner order)");
                    debug!("calibration trace: {trace:?}");
                    return Ok(CalibrationOutcome {
                        transformation: h,
                        order,
                        image_corners: corners,
                        trace,
                    });
                }
                Verdict::Reject => {
                    trace.push(CalibrationState::Rejected(order));
                    info!("calibration rejected ({order} corner order)");
                }
            }
        }

        debug!("calibration trace: {trace:?}");
        Err(CalibrationError::CalibrationRejected)
    }
}

/// Calibrate and persist the accepted transformation at `output`.
///
/// `capture` is set for frames grabbed from a device, normally
/// [`CAPTURE_FILE`](crate::source::CAPTURE_FILE). The reviewer is first
/// offered to keep the raw frame there.
pub fn calibrate_to_file<F: CheckerboardFinder>(
    calibrator: &Calibrator<F>,
    frame: &RgbImage,
    grid: &ReferenceGrid,
    extent: Option<SceneExtent>,
    reviewer: &mut dyn ConfirmationProvider,
    capture: Option<&Path>,
    output: &Path,
) -> Result<CalibrationOutcome, CalibrationError> {
    if let Some(path) = capture {
        if reviewer.offer_capture_save(path) {
            save_frame(frame, path)?;
        }
    }
    let outcome = calibrator.calibrate(frame, grid, extent, reviewer)?;
    save_transformation(&outcome.transformation, output)?;
    Ok(outcome)
}
