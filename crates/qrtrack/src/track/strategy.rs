//! Frame reprojection strategies.
//!
//! Both strategies run the same row kernels from `qrtrack-core`, so their
//! intensity buffers are byte-identical. The accelerated one stages the frame
//! in a reusable upload buffer and spreads rows across a dedicated rayon pool.

use log::{info, warn};
use qrtrack_core::{gray_row, warp_rgb_row, GrayImage, RgbImage, WarpPlan};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Requested execution strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    #[default]
    Cpu,
    /// Accelerated when the probe succeeds and more than one core is available.
    Auto,
    /// Accelerated unless the probe fails.
    Accelerated,
}

/// Warp a camera frame into the scene and reduce it to intensity.
pub trait Reproject {
    fn reproject(&mut self, frame: &RgbImage) -> GrayImage;
    fn name(&self) -> &'static str;
}

pub struct CpuReprojector {
    plan: WarpPlan,
    row: Vec<u8>,
}

impl CpuReprojector {
    pub fn new(plan: WarpPlan) -> Self {
        Self {
            row: vec![0; plan.width * 3],
            plan,
        }
    }
}

impl Reproject for CpuReprojector {
    fn reproject(&mut self, frame: &RgbImage) -> GrayImage {
        let mut out = GrayImage::new(self.plan.width, self.plan.height);
        if self.plan.width == 0 {
            return out;
        }
        let src = frame.view();
        for (y, g_row) in out.data.chunks_exact_mut(self.plan.width).enumerate() {
            warp_rgb_row(&self.plan, &src, y, &mut self.row);
            gray_row(&self.row, g_row);
        }
        out
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

pub struct AcceleratedReprojector {
    plan: WarpPlan,
    pool: rayon::ThreadPool,
    upload: RgbImage,
    device_out: GrayImage,
}

impl AcceleratedReprojector {
    /// Build the worker pool; `threads = None` lets rayon decide.
    pub fn new(plan: WarpPlan, threads: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("reproject-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;
        Ok(Self {
            plan,
            pool,
            upload: RgbImage::new(0, 0),
            device_out: GrayImage::new(plan.width, plan.height),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Reproject for AcceleratedReprojector {
    fn reproject(&mut self, frame: &RgbImage) -> GrayImage {
        self.upload.width = frame.width;
        self.upload.height = frame.height;
        self.upload.data.clear();
        self.upload.data.extend_from_slice(&frame.data);

        let plan = &self.plan;
        let width = plan.width;
        if width == 0 {
            return GrayImage::new(0, plan.height);
        }
        let src = self.upload.view();
        let out = &mut self.device_out.data;
        self.pool.install(|| {
            out.par_chunks_mut(width).enumerate().for_each_init(
                || vec![0u8; width * 3],
                |row, (y, g_row)| {
                    warp_rgb_row(plan, &src, y, row);
                    gray_row(row, g_row);
                },
            );
        });

        self.device_out.clone()
    }

    fn name(&self) -> &'static str {
        "accelerated"
    }
}

/// Strategy chosen once at session start.
pub enum Reprojector {
    Cpu(CpuReprojector),
    Accelerated(AcceleratedReprojector),
}

impl Reprojector {
    pub fn cpu(plan: WarpPlan) -> Self {
        Self::Cpu(CpuReprojector::new(plan))
    }

    /// Probe for the accelerated path; any failure falls back to the CPU.
    pub fn select(mode: StrategyMode, plan: WarpPlan, threads: Option<usize>) -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        let wanted = match mode {
            StrategyMode::Cpu => false,
            StrategyMode::Auto => cores > 1 || threads.is_some_and(|t| t > 1),
            StrategyMode::Accelerated => true,
        };
        if !wanted {
            info!("reprojection strategy: cpu");
            return Self::cpu(plan);
        }

        match AcceleratedReprojector::new(plan, threads) {
            Ok(acc) => {
                info!("reprojection strategy: accelerated ({} threads)", acc.threads());
                Self::Accelerated(acc)
            }
            Err(e) => {
                warn!("accelerated reprojection unavailable ({e}); using cpu");
                Self::cpu(plan)
            }
        }
    }
}

impl Reproject for Reprojector {
    fn reproject(&mut self, frame: &RgbImage) -> GrayImage {
        match self {
            Self::Cpu(r) => r.reproject(frame),
            Self::Accelerated(r) => r.reproject(frame),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Cpu(r) => r.name(),
            Self::Accelerated(r) => r.name(),
        }
    }
}
