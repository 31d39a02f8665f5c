use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use crate::diagnostics::{FrameDiagnostics, TrackerEvent};
use crate::estimation::{
    inlier_count, metric_reprojection_errors, planar_reprojection_errors, MatchReprojectionError,
    PoseEstimator, RobustEstimator,
};
use crate::matching::{find_matches, FeatureMatch, FeatureMatcher, MatchSet, PatchMatcher};
use crate::projection::{project_metric, project_planar, FeaturesInView, SearchRadius};
use crate::{
    FeatureId, FeatureMap, Homography, ImageSize, Keyframe, OctaveCount, PinholeIntrinsics, Pose,
};

#[derive(Debug)]
pub enum TrackerConfigError {
    NonPositiveThreshold { value: f32 },
    RadiusFactorBelowOne { value: f32 },
}

impl std::fmt::Display for TrackerConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerConfigError::NonPositiveThreshold { value } => {
                write!(f, "inlier threshold must be > 0 pixels, got {value}")
            }
            TrackerConfigError::RadiusFactorBelowOne { value } => {
                write!(f, "resync radius factor must be >= 1, got {value}")
            }
        }
    }
}

impl std::error::Error for TrackerConfigError {}

/// Maximum reprojection error, in pixels, for a match to count as an inlier.
#[derive(Clone, Copy, Debug)]
pub struct InlierThresholdPx(f32);

impl InlierThresholdPx {
    pub fn try_new(value: f32) -> Result<Self, TrackerConfigError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(TrackerConfigError::NonPositiveThreshold { value });
        }
        Ok(Self(value))
    }

    pub fn px(self) -> f32 {
        self.0
    }
}

/// Widening applied to the search window during resync, when the motion
/// prior is not trusted.
#[derive(Clone, Copy, Debug)]
pub struct ResyncRadiusFactor(f32);

impl ResyncRadiusFactor {
    pub fn try_new(value: f32) -> Result<Self, TrackerConfigError> {
        if !value.is_finite() || value < 1.0 {
            return Err(TrackerConfigError::RadiusFactorBelowOne { value });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    pub image_size: ImageSize,
    pub octave_count: OctaveCount,
    pub search_radius: SearchRadius,
    pub planar_inlier_threshold: InlierThresholdPx,
    pub metric_inlier_threshold: InlierThresholdPx,
    pub min_planar_inliers: NonZeroUsize,
    pub min_metric_inliers: NonZeroUsize,
    pub lost_after_failures: NonZeroUsize,
    pub resync_radius_factor: ResyncRadiusFactor,
}

impl TrackerConfig {
    pub fn with_defaults(image_size: ImageSize, octave_count: OctaveCount) -> Self {
        Self {
            image_size,
            octave_count,
            search_radius: SearchRadius::try_new(10.0).expect("positive"),
            planar_inlier_threshold: InlierThresholdPx::try_new(2.5).expect("positive"),
            metric_inlier_threshold: InlierThresholdPx::try_new(3.0).expect("positive"),
            min_planar_inliers: NonZeroUsize::new(10).expect("non-zero"),
            min_metric_inliers: NonZeroUsize::new(20).expect("non-zero"),
            lost_after_failures: NonZeroUsize::new(1).expect("non-zero"),
            resync_radius_factor: ResyncRadiusFactor::try_new(3.0).expect("valid factor"),
        }
    }
}

#[derive(Debug)]
pub enum TrackError {
    MapNotBound,
    OctaveCountMismatch { actual: usize, expected: usize },
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackError::MapNotBound => {
                write!(f, "tracking requested before a map was bound")
            }
            TrackError::OctaveCountMismatch { actual, expected } => {
                write!(f, "octave count mismatch: got {actual}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for TrackError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingMode {
    Planar,
    Metric,
}

/// The authoritative pose for the active mode. Exactly one representation
/// is valid at a time.
#[derive(Clone, Copy, Debug)]
pub enum TrackedPose {
    Planar(Homography),
    Metric(Pose),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackingState {
    Tracking,
    Lost,
}

#[derive(Clone, Copy, Debug)]
enum ModeState {
    Planar,
    Metric { intrinsics: PinholeIntrinsics },
}

struct PipelineOutcome {
    in_view: FeaturesInView,
    matches: MatchSet,
    pose: Option<TrackedPose>,
    errors: Vec<MatchReprojectionError>,
    inliers: usize,
}

/// Frame-to-frame pose tracker against a read-only feature map.
///
/// Before calibration the pose is a plane homography; after
/// `activate_metric_mode` it is a rotation and translation. Tracking runs
/// predict, match, estimate, classify every frame; too few inliers for
/// `lost_after_failures` consecutive frames transitions to Lost, and only
/// `resync` recovers from there.
pub struct PoseTracker {
    config: TrackerConfig,
    matcher: Box<dyn FeatureMatcher>,
    estimator: Box<dyn PoseEstimator>,
    map: Option<Arc<FeatureMap>>,
    mode_state: ModeState,
    state: TrackingState,
    consecutive_failures: usize,
    current_homography: Homography,
    metric_pose: Pose,
    frame: Option<Keyframe>,
    features_in_view: FeaturesInView,
    matches: MatchSet,
    reprojection_errors: Vec<MatchReprojectionError>,
    inlier_count: usize,
    last_matches: MatchSet,
    events: Vec<TrackerEvent>,
    diagnostics: FrameDiagnostics,
}

impl PoseTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_parts(
            config,
            Box::new(PatchMatcher::default()),
            Box::new(RobustEstimator::default()),
        )
    }

    pub fn with_parts(
        config: TrackerConfig,
        matcher: Box<dyn FeatureMatcher>,
        estimator: Box<dyn PoseEstimator>,
    ) -> Self {
        let octaves = config.octave_count.get();
        Self {
            config,
            matcher,
            estimator,
            map: None,
            mode_state: ModeState::Planar,
            state: TrackingState::Tracking,
            consecutive_failures: 0,
            current_homography: Homography::identity(),
            metric_pose: Pose::identity(),
            frame: None,
            features_in_view: FeaturesInView::with_octaves(octaves),
            matches: MatchSet::new(),
            reprojection_errors: Vec::new(),
            inlier_count: 0,
            last_matches: MatchSet::new(),
            events: Vec::new(),
            diagnostics: FrameDiagnostics::empty(),
        }
    }

    /// Binds the map and seeds the planar pose. Clears all per-frame state
    /// and returns the tracker to planar tracking.
    pub fn reset_tracking(
        &mut self,
        map: Arc<FeatureMap>,
        initial_pose: Homography,
    ) -> Result<(), TrackError> {
        if map.octave_count() != self.config.octave_count {
            return Err(TrackError::OctaveCountMismatch {
                actual: map.octave_count().get(),
                expected: self.config.octave_count.get(),
            });
        }
        self.map = Some(map);
        self.mode_state = ModeState::Planar;
        self.state = TrackingState::Tracking;
        self.consecutive_failures = 0;
        self.current_homography = initial_pose;
        self.metric_pose = Pose::identity();
        self.frame = None;
        self.features_in_view = FeaturesInView::with_octaves(self.config.octave_count.get());
        self.matches = MatchSet::new();
        self.reprojection_errors = Vec::new();
        self.inlier_count = 0;
        self.last_matches = MatchSet::new();
        self.events.clear();
        self.diagnostics = FrameDiagnostics::empty();
        Ok(())
    }

    /// Switches to metric tracking with a calibrated camera and a seed pose.
    /// The planar homography is kept for callers that still read it.
    pub fn activate_metric_mode(&mut self, intrinsics: PinholeIntrinsics, pose: Pose) {
        self.mode_state = ModeState::Metric { intrinsics };
        self.metric_pose = pose;
    }

    pub fn set_current_pose(&mut self, pose: Homography) {
        self.current_homography = pose;
    }

    pub fn set_metric_pose(&mut self, pose: Pose) {
        self.metric_pose = pose;
    }

    /// Tracks one frame. Ok(true) on enough inliers, Ok(false) on a frame
    /// that failed to track. While Lost, frames are retained for `resync`
    /// but not tracked.
    pub fn track_frame(&mut self, frame: Keyframe) -> Result<bool, TrackError> {
        let map = self.map.clone().ok_or(TrackError::MapNotBound)?;
        if frame.octave_count() != self.config.octave_count.get() {
            return Err(TrackError::OctaveCountMismatch {
                actual: frame.octave_count(),
                expected: self.config.octave_count.get(),
            });
        }

        if self.state == TrackingState::Lost {
            self.frame = Some(frame);
            self.features_in_view = FeaturesInView::with_octaves(self.config.octave_count.get());
            self.matches = MatchSet::new();
            self.reprojection_errors = Vec::new();
            self.inlier_count = 0;
            self.diagnostics = FrameDiagnostics::empty();
            return Ok(false);
        }

        let started = Instant::now();
        let outcome = self.run_pipeline(&map, &frame, 1.0, true);
        let tracked = outcome.pose.is_some() && outcome.inliers >= self.min_inliers();

        if tracked {
            self.install_pose(&outcome);
            let flags: Vec<bool> = outcome.errors.iter().map(|e| e.is_inlier).collect();
            self.last_matches = outcome.matches.retain_by_flags(&flags);
            self.consecutive_failures = 0;
        } else {
            self.register_failure();
        }

        self.diagnostics = self.build_diagnostics(&outcome, 1.0, started);
        self.features_in_view = outcome.in_view;
        self.matches = outcome.matches;
        self.reprojection_errors = outcome.errors;
        self.inlier_count = outcome.inliers;
        self.frame = Some(frame);
        Ok(tracked)
    }

    /// Attempts recovery from Lost by re-matching the retained frame with
    /// the relaxed search window and no visibility culling. The only path
    /// back to Tracking; failure leaves the tracker Lost.
    pub fn resync(&mut self) -> Result<bool, TrackError> {
        let map = self.map.clone().ok_or(TrackError::MapNotBound)?;
        if self.state == TrackingState::Tracking {
            return Ok(true);
        }
        self.events.push(TrackerEvent::ResyncStarted);
        let Some(frame) = self.frame.take() else {
            self.events.push(TrackerEvent::ResyncFailed);
            return Ok(false);
        };

        let started = Instant::now();
        let factor = self.config.resync_radius_factor.get();
        let outcome = self.run_pipeline(&map, &frame, factor, false);
        let recovered = outcome.pose.is_some() && outcome.inliers >= self.min_inliers();

        if recovered {
            self.install_pose(&outcome);
            let flags: Vec<bool> = outcome.errors.iter().map(|e| e.is_inlier).collect();
            self.last_matches = outcome.matches.retain_by_flags(&flags);
            self.state = TrackingState::Tracking;
            self.consecutive_failures = 0;
            self.events.push(TrackerEvent::ResyncSucceeded {
                inlier_count: outcome.inliers,
            });
            self.events.push(TrackerEvent::TrackingRecovered);
        } else {
            self.events.push(TrackerEvent::ResyncFailed);
        }

        self.diagnostics = self.build_diagnostics(&outcome, factor, started);
        self.features_in_view = outcome.in_view;
        self.matches = outcome.matches;
        self.reprojection_errors = outcome.errors;
        self.inlier_count = outcome.inliers;
        self.frame = Some(frame);
        Ok(recovered)
    }

    fn run_pipeline(
        &self,
        map: &FeatureMap,
        frame: &Keyframe,
        radius_factor: f32,
        require_in_image: bool,
    ) -> PipelineOutcome {
        match self.mode_state {
            ModeState::Planar => {
                let in_view = project_planar(
                    map,
                    &self.current_homography,
                    self.config.image_size,
                    require_in_image,
                );
                let matches = find_matches(
                    &in_view,
                    frame,
                    self.matcher.as_ref(),
                    self.config.search_radius,
                    radius_factor,
                );
                let estimate =
                    self.estimator
                        .estimate_planar(&matches, map, &self.current_homography);
                // Without a hypothesis, classify against the prior so the
                // errors stay parallel with the match vector.
                let classify_against = match &estimate {
                    Some(homography) => homography,
                    None => &self.current_homography,
                };
                let errors = planar_reprojection_errors(
                    &matches,
                    map,
                    classify_against,
                    self.config.planar_inlier_threshold.px(),
                );
                let inliers = inlier_count(&errors);
                PipelineOutcome {
                    in_view,
                    matches,
                    pose: estimate.map(TrackedPose::Planar),
                    errors,
                    inliers,
                }
            }
            ModeState::Metric { intrinsics } => {
                let in_view = project_metric(
                    map,
                    &self.metric_pose,
                    intrinsics,
                    self.config.image_size,
                    require_in_image,
                );
                let matches = find_matches(
                    &in_view,
                    frame,
                    self.matcher.as_ref(),
                    self.config.search_radius,
                    radius_factor,
                );
                let estimate =
                    self.estimator
                        .estimate_metric(&matches, map, intrinsics, &self.metric_pose);
                let classify_against = match &estimate {
                    Some(pose) => pose,
                    None => &self.metric_pose,
                };
                let errors = metric_reprojection_errors(
                    &matches,
                    map,
                    classify_against,
                    intrinsics,
                    self.config.metric_inlier_threshold.px(),
                );
                let inliers = inlier_count(&errors);
                PipelineOutcome {
                    in_view,
                    matches,
                    pose: estimate.map(TrackedPose::Metric),
                    errors,
                    inliers,
                }
            }
        }
    }

    fn install_pose(&mut self, outcome: &PipelineOutcome) {
        match outcome.pose {
            Some(TrackedPose::Planar(homography)) => self.current_homography = homography,
            Some(TrackedPose::Metric(pose)) => self.metric_pose = pose,
            None => {}
        }
    }

    fn register_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.lost_after_failures.get()
            && self.state == TrackingState::Tracking
        {
            self.state = TrackingState::Lost;
            self.events.push(TrackerEvent::TrackingLost {
                consecutive_failures: self.consecutive_failures,
            });
        }
    }

    fn build_diagnostics(
        &self,
        outcome: &PipelineOutcome,
        radius_factor: f32,
        started: Instant,
    ) -> FrameDiagnostics {
        let inlier_ratio = if outcome.matches.is_empty() {
            None
        } else {
            Some(outcome.inliers as f32 / outcome.matches.len() as f32)
        };
        let reprojection_rmse_px = if outcome.inliers == 0 {
            None
        } else {
            let sum: f32 = outcome
                .errors
                .iter()
                .filter(|e| e.is_inlier)
                .map(|e| e.error_sq_px)
                .sum();
            Some((sum / outcome.inliers as f32).sqrt())
        };
        FrameDiagnostics {
            features_in_view: outcome.in_view.total(),
            matches_found: outcome.matches.len(),
            inlier_count: outcome.inliers,
            inlier_ratio,
            reprojection_rmse_px,
            search_radius_px: self.matcher_search_radius() * radius_factor,
            tracking_time: Some(started.elapsed()),
        }
    }

    fn min_inliers(&self) -> usize {
        match self.mode_state {
            ModeState::Planar => self.config.min_planar_inliers.get(),
            ModeState::Metric { .. } => self.config.min_metric_inliers.get(),
        }
    }

    pub fn is_lost(&self) -> bool {
        self.state == TrackingState::Lost
    }

    pub fn mode(&self) -> TrackingMode {
        match self.mode_state {
            ModeState::Planar => TrackingMode::Planar,
            ModeState::Metric { .. } => TrackingMode::Metric,
        }
    }

    /// The authoritative pose for the active mode.
    pub fn current_pose(&self) -> TrackedPose {
        match self.mode_state {
            ModeState::Planar => TrackedPose::Planar(self.current_homography),
            ModeState::Metric { .. } => TrackedPose::Metric(self.metric_pose),
        }
    }

    pub fn current_homography(&self) -> Homography {
        self.current_homography
    }

    pub fn metric_pose(&self) -> Option<Pose> {
        match self.mode_state {
            ModeState::Planar => None,
            ModeState::Metric { .. } => Some(self.metric_pose),
        }
    }

    pub fn image_size(&self) -> ImageSize {
        self.config.image_size
    }

    pub fn octave_count(&self) -> OctaveCount {
        self.config.octave_count
    }

    /// Search window at the coarsest octave, in image pixels.
    pub fn matcher_search_radius(&self) -> f32 {
        self.config
            .search_radius
            .for_octave(self.config.octave_count.top_octave())
    }

    pub fn frame(&self) -> Option<&Keyframe> {
        self.frame.as_ref()
    }

    pub fn features_in_view(&self) -> &FeaturesInView {
        &self.features_in_view
    }

    pub fn matches(&self) -> &MatchSet {
        &self.matches
    }

    pub fn match_for(&self, feature_id: FeatureId) -> Option<&FeatureMatch> {
        self.matches.get(feature_id)
    }

    pub fn inlier_count(&self) -> usize {
        self.inlier_count
    }

    pub fn reprojection_errors(&self) -> &[MatchReprojectionError] {
        &self.reprojection_errors
    }

    /// Inlier matches of the last successfully tracked frame.
    pub fn last_matches(&self) -> &MatchSet {
        &self.last_matches
    }

    pub fn diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }

    pub fn take_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{PoseTracker, TrackError, TrackedPose, TrackerConfig, TrackingMode};
    use crate::diagnostics::TrackerEvent;
    use crate::test_helpers::{
        assign_planar_world_positions, empty_keyframe, keyframe_from_homography,
        keyframe_from_pose, planar_grid_map, pyramid_grid_map,
    };
    use crate::{Homography, ImageSize, Keypoint, OctaveCount, PinholeIntrinsics, Pose};

    fn test_config() -> TrackerConfig {
        TrackerConfig::with_defaults(
            ImageSize::try_new(640, 480).expect("image size"),
            OctaveCount::try_from(1).expect("octaves"),
        )
    }

    fn tracker_with_grid() -> (PoseTracker, Arc<crate::FeatureMap>) {
        let (map, _) = planar_grid_map(5, 5, 60.0, Keypoint { x: 100.0, y: 100.0 });
        let map = Arc::new(map);
        let mut tracker = PoseTracker::new(test_config());
        tracker
            .reset_tracking(Arc::clone(&map), Homography::identity())
            .expect("reset");
        (tracker, map)
    }

    fn homography_offset(h: &Homography, expected_dx: f32, expected_dy: f32) {
        let origin = Keypoint { x: 200.0, y: 200.0 };
        let mapped = h.apply(origin).expect("finite");
        assert!(
            (mapped.x - origin.x - expected_dx).abs() < 0.5,
            "dx mismatch: got {}, expected {expected_dx}",
            mapped.x - origin.x
        );
        assert!(
            (mapped.y - origin.y - expected_dy).abs() < 0.5,
            "dy mismatch: got {}, expected {expected_dy}",
            mapped.y - origin.y
        );
    }

    #[test]
    fn track_before_reset_is_rejected() {
        let mut tracker = PoseTracker::new(test_config());
        let frame = empty_keyframe(OctaveCount::try_from(1).expect("octaves"), 0);
        let err = tracker.track_frame(frame).expect_err("no map bound");
        assert!(matches!(err, TrackError::MapNotBound));
    }

    #[test]
    fn reset_rejects_octave_mismatch() {
        let mut map = crate::FeatureMap::new(OctaveCount::try_from(2).expect("octaves"));
        map.add_feature(
            Keypoint { x: 10.0, y: 10.0 },
            crate::PatchDescriptor([0; 32]),
            0,
        )
        .expect("feature");
        let mut tracker = PoseTracker::new(test_config());
        let err = tracker
            .reset_tracking(Arc::new(map), Homography::identity())
            .expect_err("mismatch");
        assert!(matches!(
            err,
            TrackError::OctaveCountMismatch {
                actual: 2,
                expected: 1
            }
        ));
    }

    #[test]
    fn frame_octave_mismatch_is_rejected() {
        let (mut tracker, _map) = tracker_with_grid();
        let frame = empty_keyframe(OctaveCount::try_from(3).expect("octaves"), 0);
        let err = tracker.track_frame(frame).expect_err("mismatch");
        assert!(matches!(
            err,
            TrackError::OctaveCountMismatch {
                actual: 3,
                expected: 1
            }
        ));
    }

    #[test]
    fn static_scene_keeps_pose_and_inliers() {
        let (mut tracker, map) = tracker_with_grid();
        for frame_id in 0..4 {
            let frame =
                keyframe_from_homography(&map, &Homography::identity(), frame_id).expect("frame");
            let tracked = tracker.track_frame(frame).expect("track");
            assert!(tracked, "frame {frame_id} should track");
            assert!(!tracker.is_lost());
            homography_offset(&tracker.current_homography(), 0.0, 0.0);
            assert!(tracker.inlier_count() >= 10);
            assert_eq!(
                tracker.reprojection_errors().len(),
                tracker.matches().len(),
                "errors must stay parallel with matches"
            );
        }
        let diag = tracker.diagnostics();
        assert_eq!(diag.matches_found, 25);
        assert_eq!(diag.inlier_count, tracker.inlier_count());
        assert!(diag.inlier_ratio.expect("ratio") > 0.9);
    }

    #[test]
    fn translating_scene_recovers_motion() {
        let (mut tracker, map) = tracker_with_grid();
        for step in 1..=3 {
            let truth = Homography::from_translation(3.0 * step as f32, 2.0 * step as f32);
            let frame = keyframe_from_homography(&map, &truth, step as u64).expect("frame");
            assert!(tracker.track_frame(frame).expect("track"));
            homography_offset(
                &tracker.current_homography(),
                3.0 * step as f32,
                2.0 * step as f32,
            );
        }
    }

    #[test]
    fn zero_feature_frame_fails_without_panic() {
        let (mut tracker, _map) = tracker_with_grid();
        let frame = empty_keyframe(OctaveCount::try_from(1).expect("octaves"), 0);
        let tracked = tracker.track_frame(frame).expect("no error");
        assert!(!tracked);
        assert!(tracker.is_lost(), "default policy loses after one failure");
        let events = tracker.take_events();
        assert!(matches!(
            events.as_slice(),
            [TrackerEvent::TrackingLost {
                consecutive_failures: 1
            }]
        ));
    }

    #[test]
    fn lost_tracker_retains_frames_without_tracking() {
        let (mut tracker, map) = tracker_with_grid();
        let empty = empty_keyframe(OctaveCount::try_from(1).expect("octaves"), 0);
        assert!(!tracker.track_frame(empty).expect("no error"));
        assert!(tracker.is_lost());

        let good = keyframe_from_homography(&map, &Homography::identity(), 1).expect("frame");
        let tracked = tracker.track_frame(good).expect("no error");
        assert!(!tracked, "lost tracker must not track frames directly");
        assert!(tracker.is_lost());
        assert!(tracker.matches().is_empty());
        let retained = tracker.frame().expect("retained frame");
        assert_eq!(retained.frame_id().as_u64(), 1);
    }

    #[test]
    fn resync_recovers_from_lost() {
        let (mut tracker, map) = tracker_with_grid();
        let truth = Homography::from_translation(4.0, 0.0);
        let frame = keyframe_from_homography(&map, &truth, 0).expect("frame");
        assert!(tracker.track_frame(frame).expect("track"));

        let empty = empty_keyframe(OctaveCount::try_from(1).expect("octaves"), 1);
        assert!(!tracker.track_frame(empty).expect("no error"));
        assert!(tracker.is_lost());
        tracker.take_events();

        let truth = Homography::from_translation(8.0, 0.0);
        let frame = keyframe_from_homography(&map, &truth, 2).expect("frame");
        assert!(!tracker.track_frame(frame).expect("no error"));

        let recovered = tracker.resync().expect("no error");
        assert!(recovered);
        assert!(!tracker.is_lost());
        homography_offset(&tracker.current_homography(), 8.0, 0.0);

        let events = tracker.take_events();
        assert!(matches!(
            events.as_slice(),
            [
                TrackerEvent::ResyncStarted,
                TrackerEvent::ResyncSucceeded { .. },
                TrackerEvent::TrackingRecovered
            ]
        ));
    }

    #[test]
    fn resync_without_retained_frame_stays_lost() {
        let (mut tracker, _map) = tracker_with_grid();
        let empty = empty_keyframe(OctaveCount::try_from(1).expect("octaves"), 0);
        assert!(!tracker.track_frame(empty).expect("no error"));
        assert!(tracker.is_lost());
        tracker.take_events();

        // The retained frame has no keypoints; resync must fail cleanly.
        let recovered = tracker.resync().expect("no error");
        assert!(!recovered);
        assert!(tracker.is_lost());
        let events = tracker.take_events();
        assert!(matches!(
            events.as_slice(),
            [TrackerEvent::ResyncStarted, TrackerEvent::ResyncFailed]
        ));
    }

    #[test]
    fn resync_while_tracking_is_a_noop() {
        let (mut tracker, map) = tracker_with_grid();
        let frame = keyframe_from_homography(&map, &Homography::identity(), 0).expect("frame");
        assert!(tracker.track_frame(frame).expect("track"));
        assert!(tracker.resync().expect("no error"));
        assert!(tracker.take_events().is_empty());
    }

    #[test]
    fn reset_clears_lost_state_and_matches() {
        let (mut tracker, map) = tracker_with_grid();
        let frame = keyframe_from_homography(&map, &Homography::identity(), 0).expect("frame");
        assert!(tracker.track_frame(frame).expect("track"));
        let empty = empty_keyframe(OctaveCount::try_from(1).expect("octaves"), 1);
        assert!(!tracker.track_frame(empty).expect("no error"));
        assert!(tracker.is_lost());

        tracker
            .reset_tracking(map, Homography::identity())
            .expect("reset");
        assert!(!tracker.is_lost());
        assert!(tracker.matches().is_empty());
        assert!(tracker.last_matches().is_empty());
        assert!(tracker.frame().is_none());
        assert_eq!(tracker.inlier_count(), 0);
        assert!(tracker.take_events().is_empty());
        assert_eq!(tracker.mode(), TrackingMode::Planar);
    }

    #[test]
    fn match_lookup_agrees_with_match_vector() {
        let (mut tracker, map) = tracker_with_grid();
        let frame = keyframe_from_homography(&map, &Homography::identity(), 0).expect("frame");
        assert!(tracker.track_frame(frame).expect("track"));
        for candidate in tracker.matches().matches() {
            let looked_up = tracker
                .match_for(candidate.feature_id())
                .expect("lookup must hit");
            assert_eq!(looked_up.feature_id(), candidate.feature_id());
        }
    }

    #[test]
    fn inlier_count_never_exceeds_match_count() {
        let (mut tracker, map) = tracker_with_grid();
        let frame = keyframe_from_homography(&map, &Homography::identity(), 0).expect("frame");
        assert!(tracker.track_frame(frame).expect("track"));
        assert!(tracker.inlier_count() <= tracker.matches().len());
        assert!(tracker.last_matches().len() <= tracker.matches().len());
    }

    #[test]
    fn metric_mode_tracks_static_scene() {
        let (map, ids) = planar_grid_map(5, 5, 60.0, Keypoint { x: 100.0, y: 100.0 });
        let intrinsics =
            PinholeIntrinsics::try_new(400.0, 400.0, 320.0, 240.0).expect("intrinsics");
        let mut map = map;
        assign_planar_world_positions(&mut map, &ids, intrinsics, 2.0);
        let map = Arc::new(map);

        let mut tracker = PoseTracker::new(test_config());
        tracker
            .reset_tracking(Arc::clone(&map), Homography::identity())
            .expect("reset");
        tracker.activate_metric_mode(intrinsics, Pose::identity());
        assert_eq!(tracker.mode(), TrackingMode::Metric);

        for frame_id in 0..3 {
            let frame =
                keyframe_from_pose(&map, &Pose::identity(), intrinsics, frame_id).expect("frame");
            let tracked = tracker.track_frame(frame).expect("track");
            assert!(tracked, "metric frame {frame_id} should track");
            assert!(tracker.inlier_count() >= 20);
            match tracker.current_pose() {
                TrackedPose::Metric(pose) => {
                    let t = pose.translation();
                    let drift = (t[0] * t[0] + t[1] * t[1] + t[2] * t[2]).sqrt();
                    assert!(drift < 1e-2, "static metric pose drifted by {drift}");
                }
                TrackedPose::Planar(_) => panic!("expected metric pose"),
            }
        }
        assert!(tracker.metric_pose().is_some());
    }

    #[test]
    fn matcher_search_radius_covers_coarsest_octave() {
        let config = TrackerConfig::with_defaults(
            ImageSize::try_new(640, 480).expect("image size"),
            OctaveCount::try_from(3).expect("octaves"),
        );
        let tracker = PoseTracker::new(config);
        let base = config.search_radius.base_px();
        assert!((tracker.matcher_search_radius() - base * 4.0).abs() < 1e-6);
    }

    #[test]
    fn errors_stay_parallel_when_estimation_fails() {
        // Three matches are below the four-correspondence minimum, so the
        // estimator yields nothing; the errors must still line up with the
        // matches, classified against the prior.
        let (map, _) = planar_grid_map(1, 3, 60.0, Keypoint { x: 100.0, y: 100.0 });
        let map = Arc::new(map);
        let mut tracker = PoseTracker::new(test_config());
        tracker
            .reset_tracking(Arc::clone(&map), Homography::identity())
            .expect("reset");

        let frame = keyframe_from_homography(&map, &Homography::identity(), 0).expect("frame");
        let tracked = tracker.track_frame(frame).expect("no error");
        assert!(!tracked);
        assert_eq!(tracker.matches().len(), 3);
        assert_eq!(
            tracker.reprojection_errors().len(),
            tracker.matches().len(),
            "errors must stay parallel with matches on failed frames"
        );
        assert_eq!(tracker.inlier_count(), 3, "exact matches fit the prior");
    }

    #[test]
    fn four_octave_pyramid_tracks_and_loses_on_empty_frame() {
        let octaves = OctaveCount::try_from(4).expect("octaves");
        let config = TrackerConfig::with_defaults(
            ImageSize::try_new(640, 480).expect("image size"),
            octaves,
        );
        let (map, _) = pyramid_grid_map(5, 5, 60.0, Keypoint { x: 100.0, y: 100.0 }, octaves);
        let map = Arc::new(map);
        let mut tracker = PoseTracker::new(config);
        tracker
            .reset_tracking(Arc::clone(&map), Homography::identity())
            .expect("reset");

        let frame = keyframe_from_homography(&map, &Homography::identity(), 0).expect("frame");
        assert!(tracker.track_frame(frame).expect("track"));
        for octave in 0..4 {
            assert!(
                !tracker.features_in_view().octave(octave).is_empty(),
                "octave {octave} should carry predictions"
            );
        }
        let coarse_matches = tracker
            .matches()
            .matches()
            .iter()
            .filter(|m| m.octave() > 0)
            .count();
        assert!(coarse_matches > 0, "coarse octaves should contribute matches");

        let truth = Homography::from_translation(3.0, 2.0);
        let frame = keyframe_from_homography(&map, &truth, 1).expect("frame");
        assert!(tracker.track_frame(frame).expect("track"));
        homography_offset(&tracker.current_homography(), 3.0, 2.0);

        let empty = empty_keyframe(octaves, 2);
        assert!(!tracker.track_frame(empty).expect("no error"));
        assert!(tracker.is_lost());
        let events = tracker.take_events();
        assert!(matches!(
            events.as_slice(),
            [TrackerEvent::TrackingLost { .. }]
        ));
    }

    #[test]
    fn resync_diagnostics_report_relaxed_radius() {
        let (mut tracker, _map) = tracker_with_grid();
        let empty = empty_keyframe(OctaveCount::try_from(1).expect("octaves"), 0);
        assert!(!tracker.track_frame(empty).expect("no error"));
        assert!(tracker.is_lost());

        assert!(!tracker.resync().expect("no error"));
        let expected = tracker.matcher_search_radius() * 3.0;
        assert!(
            (tracker.diagnostics().search_radius_px - expected).abs() < 1e-6,
            "resync diagnostics must report the relaxed window"
        );
    }
}
