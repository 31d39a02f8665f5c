use std::time::Duration;

/// Per-frame tracking counters, reset at the start of every tracked frame.
#[derive(Clone, Debug)]
pub struct FrameDiagnostics {
    pub features_in_view: usize,
    pub matches_found: usize,
    pub inlier_count: usize,
    pub inlier_ratio: Option<f32>,
    pub reprojection_rmse_px: Option<f32>,
    pub search_radius_px: f32,
    pub tracking_time: Option<Duration>,
}

impl FrameDiagnostics {
    pub fn empty() -> Self {
        Self {
            features_in_view: 0,
            matches_found: 0,
            inlier_count: 0,
            inlier_ratio: None,
            reprojection_rmse_px: None,
            search_radius_px: 0.0,
            tracking_time: None,
        }
    }
}

/// State transitions the tracker reports to its caller. Drained with
/// `PoseTracker::take_events`.
#[derive(Clone, Debug)]
pub enum TrackerEvent {
    TrackingLost { consecutive_failures: usize },
    TrackingRecovered,
    ResyncStarted,
    ResyncSucceeded { inlier_count: usize },
    ResyncFailed,
}
