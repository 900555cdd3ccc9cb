//! Frame acquisition: still images, video files and capture devices.

use std::path::{Path, PathBuf};

use log::{debug, info};
use qrtrack_core::RgbImage;

/// Raw frame persisted during single-shot calibration from a device.
pub const CAPTURE_FILE: &str = "calibration_capture.png";

/// Devices tried per probe, starting at the requested index.
pub const PROBE_SPAN: u32 = 10;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const VIDEO_EXTENSIONS: [&str; 1] = ["avi"];

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("`{0}` is neither an image, a video file nor a device index")]
    InvalidDescriptor(String),
    #[error("device index must not be negative, got {0}")]
    NegativeIndex(i64),
    #[error("no capture device found in {first_index}..={last_index}")]
    NoDeviceFound { first_index: u32, last_index: u32 },
    #[error("{what} is unavailable: {reason}")]
    Unavailable { what: String, reason: String },
    #[error("no more frames in the source")]
    Exhausted,
    #[error("image i/o failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("capture backend failed: {0}")]
    Backend(String),
}

/// Parsed form of a user-supplied source string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    Image(PathBuf),
    Video(PathBuf),
    Device(u32),
}

impl SourceDescriptor {
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}

fn has_extension(s: &str, exts: &[&str]) -> bool {
    Path::new(s)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Classify a source string. File extensions are checked before numbers.
pub fn parse_descriptor(s: &str) -> Result<SourceDescriptor, SourceError> {
    if has_extension(s, &IMAGE_EXTENSIONS) {
        return Ok(SourceDescriptor::Image(PathBuf::from(s)));
    }
    if has_extension(s, &VIDEO_EXTENSIONS) {
        return Ok(SourceDescriptor::Video(PathBuf::from(s)));
    }
    match s.trim().parse::<i64>() {
        Ok(i) if i < 0 => Err(SourceError::NegativeIndex(i)),
        Ok(i) => u32::try_from(i)
            .map(SourceDescriptor::Device)
            .map_err(|_| SourceError::InvalidDescriptor(s.to_string())),
        Err(_) => Err(SourceError::InvalidDescriptor(s.to_string())),
    }
}

/// Anything that yields RGB frames.
pub trait FrameSource {
    /// Pull the next frame; a finite source reports [`SourceError::Exhausted`]
    /// once it has nothing left.
    fn next_frame(&mut self) -> Result<RgbImage, SourceError>;
}

/// Opens devices and video files.
pub trait CaptureBackend {
    fn open_device(&mut self, index: u32) -> Result<Box<dyn FrameSource>, SourceError>;
    fn open_video(&mut self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// A resolved, ready-to-read source.
pub struct OpenedSource {
    pub source: Box<dyn FrameSource>,
    pub descriptor: SourceDescriptor,
}

/// Try devices `start..start + PROBE_SPAN`; the first that opens wins.
///
/// The range is cut at `u32::MAX`, so a start within `PROBE_SPAN` of the
/// top tries fewer devices.
pub fn probe_devices(
    backend: &mut dyn CaptureBackend,
    start: u32,
) -> Result<(u32, Box<dyn FrameSource>), SourceError> {
    let last = start.checked_add(PROBE_SPAN - 1).unwrap_or(u32::MAX);
    for index in start..=last {
        match backend.open_device(index) {
            Ok(source) => {
                info!("opened capture device {index}");
                return Ok((index, source));
            }
            Err(e) => debug!("device {index}: {e}"),
        }
    }
    Err(SourceError::NoDeviceFound {
        first_index: start,
        last_index: last,
    })
}

/// Turn a descriptor into a live frame source.
pub fn resolve(
    descriptor: &SourceDescriptor,
    backend: &mut dyn CaptureBackend,
) -> Result<OpenedSource, SourceError> {
    let (source, descriptor) = match descriptor {
        SourceDescriptor::Image(path) => (
            Box::new(ImageFileSource::open(path)?) as Box<dyn FrameSource>,
            descriptor.clone(),
        ),
        SourceDescriptor::Video(path) => (backend.open_video(path)?, descriptor.clone()),
        SourceDescriptor::Device(start) => {
            let (index, source) = probe_devices(backend, *start)?;
            (source, SourceDescriptor::Device(index))
        }
    };
    Ok(OpenedSource { source, descriptor })
}

/// Single still image: one frame, then exhausted.
pub struct ImageFileSource {
    frame: Option<RgbImage>,
}

impl ImageFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let img = image::open(path)?.to_rgb8();
        debug!(
            "loaded {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        Ok(Self::from_frame(from_image_rgb(img)))
    }

    pub fn from_frame(frame: RgbImage) -> Self {
        Self { frame: Some(frame) }
    }
}

impl FrameSource for ImageFileSource {
    fn next_frame(&mut self) -> Result<RgbImage, SourceError> {
        self.frame.take().ok_or(SourceError::Exhausted)
    }
}

/// Backend used when no capture library is compiled in.
#[derive(Debug, Default)]
pub struct ImageOnlyBackend;

const NO_BACKEND: &str = "built without a capture backend (enable the `opencv` feature)";

impl CaptureBackend for ImageOnlyBackend {
    fn open_device(&mut self, index: u32) -> Result<Box<dyn FrameSource>, SourceError> {
        Err(SourceError::Unavailable {
            what: format!("capture device {index}"),
            reason: NO_BACKEND.to_string(),
        })
    }

    fn open_video(&mut self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        Err(SourceError::Unavailable {
            what: path.display().to_string(),
            reason: NO_BACKEND.to_string(),
        })
    }
}

/// The best backend available in this build.
pub fn default_backend() -> Box<dyn CaptureBackend> {
    #[cfg(feature = "opencv")]
    {
        Box::new(opencv_backend::OpenCvBackend)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Box::new(ImageOnlyBackend)
    }
}

pub(crate) fn from_image_rgb(img: image::RgbImage) -> RgbImage {
    let (width, height) = (img.width() as usize, img.height() as usize);
    RgbImage {
        width,
        height,
        data: img.into_raw(),
    }
}

pub(crate) fn to_image_rgb(frame: &RgbImage) -> Result<image::RgbImage, SourceError> {
    image::RgbImage::from_raw(frame.width as u32, frame.height as u32, frame.data.clone())
        .ok_or_else(|| SourceError::Backend("frame buffer does not match its size".to_string()))
}

/// Write a frame to disk; the format follows the extension.
pub fn save_frame(frame: &RgbImage, path: impl AsRef<Path>) -> Result<(), SourceError> {
    let path = path.as_ref();
    to_image_rgb(frame)?.save(path)?;
    info!("frame written to {}", path.display());
    Ok(())
}

/// Grab one frame from the first device at or after `index` and save it.
///
/// Returns the index of the device that was used.
pub fn capture_to_file(
    index: &str,
    path: impl AsRef<Path>,
    backend: &mut dyn CaptureBackend,
) -> Result<u32, SourceError> {
    let start = match parse_descriptor(index)? {
        SourceDescriptor::Device(i) => i,
        _ => return Err(SourceError::InvalidDescriptor(index.to_string())),
    };
    let (used, mut source) = probe_devices(backend, start)?;
    let frame = source.next_frame()?;
    save_frame(&frame, path)?;
    Ok(used)
}

#[cfg(feature = "opencv")]
pub mod opencv_backend {
    //! OpenCV `VideoCapture` backend.

    use std::path::Path;

    use opencv::core::{AlgorithmHint, Mat};
    use opencv::prelude::*;
    use opencv::{imgproc, videoio};
    use qrtrack_core::RgbImage;

    use super::{CaptureBackend, FrameSource, SourceError};

    fn backend_err(e: opencv::Error) -> SourceError {
        SourceError::Backend(e.to_string())
    }

    #[derive(Debug, Default)]
    pub struct OpenCvBackend;

    pub struct OpenCvSource {
        cap: videoio::VideoCapture,
        what: String,
    }

    impl OpenCvSource {
        fn checked(cap: videoio::VideoCapture, what: String) -> Result<Self, SourceError> {
            if cap.is_opened().map_err(backend_err)? {
                Ok(Self { cap, what })
            } else {
                Err(SourceError::Unavailable {
                    what,
                    reason: "VideoCapture did not open".to_string(),
                })
            }
        }
    }

    impl CaptureBackend for OpenCvBackend {
        fn open_device(&mut self, index: u32) -> Result<Box<dyn FrameSource>, SourceError> {
            let index = i32::try_from(index)
                .map_err(|_| SourceError::InvalidDescriptor(index.to_string()))?;
            let cap = videoio::VideoCapture::new(index, videoio::CAP_ANY).map_err(backend_err)?;
            Ok(Box::new(OpenCvSource::checked(
                cap,
                format!("capture device {index}"),
            )?))
        }

        fn open_video(&mut self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
            let name = path.to_string_lossy();
            let cap =
                videoio::VideoCapture::from_file(&name, videoio::CAP_ANY).map_err(backend_err)?;
            Ok(Box::new(OpenCvSource::checked(cap, name.into_owned())?))
        }
    }

    impl FrameSource for OpenCvSource {
        fn next_frame(&mut self) -> Result<RgbImage, SourceError> {
            let mut frame = Mat::default();
            // A closed device and the end of a video look the same here.
            if !self.cap.read(&mut frame).map_err(backend_err)? || frame.empty() {
                return Err(SourceError::Backend(format!(
                    "failed to load a frame from {}",
                    self.what
                )));
            }
            let mut rgb = Mat::default();
            imgproc::cvt_color(
                &frame,
                &mut rgb,
                imgproc::COLOR_BGR2RGB,
                0,
                AlgorithmHint::ALGO_HINT_DEFAULT,
            )
            .map_err(backend_err)?;
            let width = rgb.cols() as usize;
            let height = rgb.rows() as usize;
            let rgb = if rgb.is_continuous() {
                rgb
            } else {
                rgb.try_clone().map_err(backend_err)?
            };
            let data = rgb.data_bytes().map_err(backend_err)?.to_vec();
            Ok(RgbImage {
                width,
                height,
                data,
            })
        }
    }
}
