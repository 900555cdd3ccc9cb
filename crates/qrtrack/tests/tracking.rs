use std::collections::VecDeque;

use approx::assert_abs_diff_eq;
use nalgebra::Point2;
use qrtrack::core::{GrayImageView, Homography, RgbImage, WarpPlan};
use qrtrack::markers::{
    DecodeError, HeadingConvention, MarkerDecoder, MarkerObservation, PoseRecord,
};
use qrtrack::publish::{PoseSink, PublishError};
use qrtrack::source::{FrameSource, SourceError};
use qrtrack::track::{
    decode_frame, CancelToken, FrameProcessor, Reprojector, StrategyMode, TrackError,
    TrackingSession, TrackingSummary,
};

const W: usize = 40;
const H: usize = 30;

/// Yields `remaining` frames, then either ends or fails.
struct CountedFrames {
    remaining: usize,
    fail_at_end: bool,
    pulled: usize,
    /// Cancelled when the last frame is handed out, like Ctrl-C mid-frame.
    cancel_on_last: Option<CancelToken>,
}

impl CountedFrames {
    fn new(remaining: usize) -> Self {
        Self {
            remaining,
            fail_at_end: false,
            pulled: 0,
            cancel_on_last: None,
        }
    }
}

impl FrameSource for CountedFrames {
    fn next_frame(&mut self) -> Result<RgbImage, SourceError> {
        if self.remaining == 0 {
            return Err(if self.fail_at_end {
                SourceError::Backend("camera unplugged".to_string())
            } else {
                SourceError::Exhausted
            });
        }
        self.remaining -= 1;
        self.pulled += 1;
        if self.remaining == 0 {
            if let Some(token) = &self.cancel_on_last {
                token.cancel();
            }
        }
        Ok(bright_spot_frame(10 + self.pulled % 20, 12))
    }
}

/// Black frame with a white 3x3 block at `(x, y)`.
fn bright_spot_frame(x: usize, y: usize) -> RgbImage {
    let mut f = RgbImage::new(W, H);
    for yy in y..y + 3 {
        for xx in x..x + 3 {
            let i = (yy * W + xx) * 3;
            f.data[i..i + 3].copy_from_slice(&[255, 255, 255]);
        }
    }
    f
}

/// Plays back a fixed script of decode results, one per frame.
struct ScriptedDecoder(VecDeque<Result<Vec<MarkerObservation>, DecodeError>>);

impl MarkerDecoder for ScriptedDecoder {
    fn decode(&mut self, _image: &GrayImageView<'_>) -> Result<Vec<MarkerObservation>, DecodeError> {
        self.0.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Reports one unit square around every bright pixel, id = pixel index.
struct BrightSpotDecoder;

impl MarkerDecoder for BrightSpotDecoder {
    fn decode(&mut self, image: &GrayImageView<'_>) -> Result<Vec<MarkerObservation>, DecodeError> {
        Ok(image
            .data
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 128)
            .map(|(i, _)| {
                let (x, y) = ((i % image.width) as f32, (i / image.width) as f32);
                MarkerObservation::new(
                    i.to_string().as_str(),
                    vec![
                        Point2::new(x - 0.5, y - 0.5),
                        Point2::new(x + 0.5, y - 0.5),
                        Point2::new(x + 0.5, y + 0.5),
                        Point2::new(x - 0.5, y + 0.5),
                    ],
                )
            })
            .collect())
    }
}

#[derive(Default)]
struct CollectingSink {
    poses: Vec<PoseRecord>,
    cancel_on_first: Option<CancelToken>,
    refuse: Option<String>,
}

impl PoseSink for CollectingSink {
    fn publish(&mut self, pose: &PoseRecord) -> Result<(), PublishError> {
        if let Some(token) = &self.cancel_on_first {
            token.cancel();
        }
        if self.refuse.as_deref() == Some(pose.id.as_str()) {
            return Err(PublishError::Unreachable("tree offline".to_string()));
        }
        self.poses.push(pose.clone());
        Ok(())
    }
}

fn square(id: &str, cx: f32, cy: f32) -> MarkerObservation {
    MarkerObservation::new(
        id,
        vec![
            Point2::new(cx + 2.0, cy - 2.0),
            Point2::new(cx + 2.0, cy + 2.0),
            Point2::new(cx - 2.0, cy + 2.0),
            Point2::new(cx - 2.0, cy - 2.0),
        ],
    )
}

fn identity_plan() -> WarpPlan {
    WarpPlan::new(&Homography::identity(), W, H).expect("identity is invertible")
}

fn session(mode: StrategyMode) -> TrackingSession {
    let reprojector = Reprojector::select(mode, identity_plan(), Some(2));
    TrackingSession::new(
        FrameProcessor::new(reprojector, HeadingConvention::FirstSecond),
        CancelToken::new(),
    )
}

/// Track `frames` frames, interrupted while the last one is in flight.
fn track_then_interrupt(
    frames: usize,
    decoder: &mut dyn MarkerDecoder,
    sink: &mut CollectingSink,
) -> TrackingSummary {
    let mut tracking = session(StrategyMode::Cpu);
    let mut source = CountedFrames::new(frames);
    source.cancel_on_last = Some(tracking.cancel_token());
    let summary = tracking.run(&mut source, decoder, sink).expect("run");
    assert_eq!(source.pulled, frames);
    summary
}

#[test]
fn every_marker_is_published_until_interrupted() {
    let mut decoder = ScriptedDecoder(VecDeque::from([
        Ok(vec![square("1", 10.0, 10.0), square("2", 20.0, 5.0)]),
        Ok(vec![]),
        Ok(vec![square("1", 11.0, 10.0)]),
    ]));
    let mut sink = CollectingSink::default();

    let summary = track_then_interrupt(3, &mut decoder, &mut sink);

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.markers, 3);
    assert_eq!(summary.published, 3);
    assert_eq!(summary.skipped_frames, 0);

    let ids: Vec<&str> = sink.poses.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "1"]);
    assert_abs_diff_eq!(sink.poses[2].x, 11.0, epsilon = 1e-5);
    assert_abs_diff_eq!(sink.poses[2].y, 10.0, epsilon = 1e-5);
    // corners 0 -> 1 point along +y
    assert_abs_diff_eq!(sink.poses[0].angle, 90.0, epsilon = 1e-4);
}

#[test]
fn cancellation_stops_after_current_frame() {
    let mut tracking = session(StrategyMode::Cpu);
    let mut source = CountedFrames::new(100);
    let mut decoder = ScriptedDecoder(
        (0..100)
            .map(|_| Ok(vec![square("5", 8.0, 8.0), square("6", 30.0, 20.0)]))
            .collect(),
    );
    let mut sink = CollectingSink {
        cancel_on_first: Some(tracking.cancel_token()),
        ..Default::default()
    };

    let summary = tracking
        .run(&mut source, &mut decoder, &mut sink)
        .expect("run");

    assert_eq!(source.pulled, 1);
    assert_eq!(summary.frames, 1);
    // the frame in flight is finished
    assert_eq!(sink.poses.len(), 2);
}

#[test]
fn cancelled_before_start_pulls_nothing() {
    let mut tracking = session(StrategyMode::Cpu);
    tracking.cancel_token().cancel();
    let mut source = CountedFrames::new(5);

    let summary = tracking
        .run(
            &mut source,
            &mut ScriptedDecoder(VecDeque::new()),
            &mut CollectingSink::default(),
        )
        .expect("run");

    assert_eq!(summary.frames, 0);
    assert_eq!(source.pulled, 0);
}

#[test]
fn publish_failure_does_not_stop_the_loop() {
    let mut decoder = ScriptedDecoder(VecDeque::from([
        Ok(vec![square("bad", 5.0, 5.0), square("good", 9.0, 9.0)]),
        Ok(vec![square("good", 10.0, 9.0)]),
    ]));
    let mut sink = CollectingSink {
        refuse: Some("bad".to_string()),
        ..Default::default()
    };

    let summary = track_then_interrupt(2, &mut decoder, &mut sink);

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.markers, 3);
    assert_eq!(summary.published, 2);
    assert_eq!(summary.dropped, 1);
    assert_eq!(sink.poses.len(), 2);
}

#[test]
fn decode_failure_skips_the_frame() {
    let mut decoder = ScriptedDecoder(VecDeque::from([
        Ok(vec![square("1", 5.0, 5.0)]),
        Err(DecodeError::Payload("damaged".to_string())),
        Ok(vec![square("1", 6.0, 5.0)]),
    ]));
    let mut sink = CollectingSink::default();

    let summary = track_then_interrupt(3, &mut decoder, &mut sink);

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.skipped_frames, 1);
    assert_eq!(sink.poses.len(), 2);
}

#[test]
fn end_of_source_is_a_fatal_error() {
    let mut source = CountedFrames::new(2);
    let mut decoder = ScriptedDecoder(VecDeque::from([
        Ok(vec![square("1", 5.0, 5.0)]),
        Ok(vec![square("1", 6.0, 5.0)]),
    ]));
    let mut sink = CollectingSink::default();

    let err = session(StrategyMode::Cpu)
        .run(&mut source, &mut decoder, &mut sink)
        .unwrap_err();

    assert!(matches!(err, TrackError::Source(SourceError::Exhausted)));
    assert_eq!(source.pulled, 2);
    // frames already pulled are still published
    assert_eq!(sink.poses.len(), 2);
}

#[test]
fn source_failure_ends_the_session_with_error() {
    let mut source = CountedFrames::new(1);
    source.fail_at_end = true;
    let mut sink = CollectingSink::default();

    let err = session(StrategyMode::Cpu)
        .run(&mut source, &mut BrightSpotDecoder, &mut sink)
        .unwrap_err();

    assert!(matches!(err, TrackError::Source(SourceError::Backend(_))));
    assert_eq!(sink.poses.len(), 9);
}

#[test]
fn markers_with_too_few_corners_are_dropped() {
    let mut decoder = ScriptedDecoder(VecDeque::from([Ok(vec![
        MarkerObservation::new("lonely", vec![Point2::new(1.0, 1.0)]),
        square("ok", 4.0, 4.0),
    ])]));
    let mut sink = CollectingSink::default();

    let summary = track_then_interrupt(1, &mut decoder, &mut sink);

    assert_eq!(summary.markers, 1);
    assert_eq!(sink.poses[0].id.as_str(), "ok");
}

#[test]
fn cpu_and_accelerated_paths_yield_identical_poses() {
    let scale = Homography::from_row_major(&[
        0.8, 0.1, 2.0, //
        -0.05, 0.9, 1.0, //
        0.0, 0.0, 1.0,
    ]);
    let frames: Vec<RgbImage> = (0..4).map(|k| bright_spot_frame(6 + 5 * k, 4 + 4 * k)).collect();

    let mut results = Vec::new();
    for mode in [StrategyMode::Cpu, StrategyMode::Accelerated] {
        let plan = WarpPlan::new(&scale, W, H).expect("invertible");
        let mut processor = FrameProcessor::new(
            Reprojector::select(mode, plan, Some(3)),
            HeadingConvention::FirstSecond,
        );
        let poses: Vec<Vec<PoseRecord>> = frames
            .iter()
            .map(|f| decode_frame(&mut processor, f, &mut BrightSpotDecoder).expect("decode"))
            .collect();
        results.push(poses);
    }

    assert!(results[0].iter().any(|p| !p.is_empty()));
    assert_eq!(results[0], results[1]);
}
