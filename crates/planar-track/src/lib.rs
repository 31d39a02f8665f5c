#![warn(clippy::all)]
use std::num::NonZeroUsize;

mod diagnostics;
mod estimation;
mod homography;
mod keyframe;
mod map;
mod math;
mod matching;
mod pose;
mod projection;
#[cfg(test)]
mod test_helpers;
mod tracker;

pub use diagnostics::{FrameDiagnostics, TrackerEvent};
pub use estimation::{
    inlier_count, metric_reprojection_errors, planar_reprojection_errors, EstimatorConfig,
    MatchReprojectionError, PoseEstimator, RobustEstimator,
};
pub use homography::Homography;
pub use keyframe::{Keyframe, KeyframeError, KeyframeLevel};
pub use map::{Feature, FeatureId, FeatureMap, MapError};
pub use matching::{FeatureMatch, FeatureMatcher, MatchSet, MatchSetError, PatchMatcher};
pub use pose::{IntrinsicsError, PinholeIntrinsics, Pose};
pub use projection::{
    project_metric, project_planar, FeatureProjectionInfo, FeaturesInView, SearchRadius,
    SearchRadiusError,
};
pub use tracker::{
    InlierThresholdPx, PoseTracker, ResyncRadiusFactor, TrackError, TrackedPose, TrackerConfig,
    TrackerConfigError, TrackingMode,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

pub const DESCRIPTOR_BYTES: usize = 32;

/// Binary appearance descriptor compared by Hamming distance.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchDescriptor(pub [u8; DESCRIPTOR_BYTES]);

impl PatchDescriptor {
    pub fn hamming_distance(&self, other: &PatchDescriptor) -> u32 {
        let mut dist = 0u32;
        for i in 0..DESCRIPTOR_BYTES {
            dist += (self.0[i] ^ other.0[i]).count_ones();
        }
        dist
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    width: u32,
    height: u32,
}

impl ImageSize {
    pub fn try_new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }

    pub fn width(self) -> u32 {
        self.width
    }

    pub fn height(self) -> u32 {
        self.height
    }

    pub fn contains(self, point: Keypoint) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x < self.width as f32
            && point.y < self.height as f32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OctaveCount(NonZeroUsize);

#[derive(Debug)]
pub enum OctaveCountError {
    Zero,
}

impl std::fmt::Display for OctaveCountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OctaveCountError::Zero => write!(f, "octave count must be > 0"),
        }
    }
}

impl std::error::Error for OctaveCountError {}

impl OctaveCount {
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Index of the coarsest pyramid level.
    pub fn top_octave(self) -> usize {
        self.0.get() - 1
    }
}

impl TryFrom<usize> for OctaveCount {
    type Error = OctaveCountError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        NonZeroUsize::new(value)
            .map(OctaveCount)
            .ok_or(OctaveCountError::Zero)
    }
}
