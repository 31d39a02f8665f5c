use std::collections::HashMap;

use crate::projection::{FeatureProjectionInfo, FeaturesInView, SearchRadius};
use crate::{FeatureId, Keyframe, Keypoint};

/// One accepted feature-to-keypoint correspondence in the current frame.
#[derive(Clone, Copy, Debug)]
pub struct FeatureMatch {
    feature_id: FeatureId,
    keypoint: Keypoint,
    octave: usize,
}

impl FeatureMatch {
    pub fn new(feature_id: FeatureId, keypoint: Keypoint, octave: usize) -> Self {
        Self {
            feature_id,
            keypoint,
            octave,
        }
    }

    pub fn feature_id(&self) -> FeatureId {
        self.feature_id
    }

    pub fn keypoint(&self) -> Keypoint {
        self.keypoint
    }

    pub fn octave(&self) -> usize {
        self.octave
    }
}

/// Appearance-validating matcher seam. Implementations return at most one
/// match for a predicted feature, or None when nothing in the window is
/// acceptable.
pub trait FeatureMatcher {
    fn find_match(
        &self,
        projection: &FeatureProjectionInfo,
        frame: &Keyframe,
        radius_px: f32,
    ) -> Option<FeatureMatch>;
}

/// Nearest-descriptor matcher over the predicted octave's keypoints within
/// the search window.
#[derive(Clone, Copy, Debug)]
pub struct PatchMatcher {
    pub max_distance: u32,
    pub second_best_ratio: f32,
}

impl Default for PatchMatcher {
    fn default() -> Self {
        Self {
            max_distance: 64,
            second_best_ratio: 0.9,
        }
    }
}

impl FeatureMatcher for PatchMatcher {
    fn find_match(
        &self,
        projection: &FeatureProjectionInfo,
        frame: &Keyframe,
        radius_px: f32,
    ) -> Option<FeatureMatch> {
        let level = frame.level(projection.octave())?;
        let radius_sq = radius_px * radius_px;
        let predicted = projection.predicted();

        let mut best: Option<(usize, u32, f32)> = None;
        let mut second_best_distance: Option<u32> = None;
        for (index, keypoint) in level.keypoints().iter().enumerate() {
            let dx = keypoint.x - predicted.x;
            let dy = keypoint.y - predicted.y;
            let pixel_dist_sq = dx * dx + dy * dy;
            if pixel_dist_sq > radius_sq {
                continue;
            }
            let distance = projection
                .descriptor()
                .hamming_distance(&level.descriptors()[index]);
            match best {
                Some((_, best_distance, best_pixel_sq))
                    if distance > best_distance
                        || (distance == best_distance && pixel_dist_sq >= best_pixel_sq) =>
                {
                    second_best_distance = Some(
                        second_best_distance.map_or(distance, |second| second.min(distance)),
                    );
                }
                Some((_, best_distance, _)) => {
                    second_best_distance = Some(
                        second_best_distance.map_or(best_distance, |second| second.min(best_distance)),
                    );
                    best = Some((index, distance, pixel_dist_sq));
                }
                None => best = Some((index, distance, pixel_dist_sq)),
            }
        }

        let (index, distance, _) = best?;
        if distance > self.max_distance {
            return None;
        }
        if let Some(second) = second_best_distance {
            if distance as f32 >= self.second_best_ratio * second as f32 {
                return None;
            }
        }
        Some(FeatureMatch::new(
            projection.feature_id(),
            level.keypoints()[index],
            projection.octave(),
        ))
    }
}

#[derive(Debug)]
pub enum MatchSetError {
    DuplicateFeature { feature_id: FeatureId },
}

impl std::fmt::Display for MatchSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchSetError::DuplicateFeature { feature_id } => {
                write!(f, "feature {feature_id:?} already has a match this frame")
            }
        }
    }
}

impl std::error::Error for MatchSetError {}

/// Matches of the current frame with an id-indexed lookup into the vector.
/// Each feature appears at most once.
#[derive(Clone, Debug, Default)]
pub struct MatchSet {
    matches: Vec<FeatureMatch>,
    by_feature: HashMap<FeatureId, usize>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_push(&mut self, candidate: FeatureMatch) -> Result<(), MatchSetError> {
        if self.by_feature.contains_key(&candidate.feature_id()) {
            return Err(MatchSetError::DuplicateFeature {
                feature_id: candidate.feature_id(),
            });
        }
        self.by_feature
            .insert(candidate.feature_id(), self.matches.len());
        self.matches.push(candidate);
        Ok(())
    }

    pub fn matches(&self) -> &[FeatureMatch] {
        &self.matches
    }

    pub fn get(&self, feature_id: FeatureId) -> Option<&FeatureMatch> {
        self.by_feature
            .get(&feature_id)
            .and_then(|&index| self.matches.get(index))
    }

    pub fn index_of(&self, feature_id: FeatureId) -> Option<usize> {
        self.by_feature.get(&feature_id).copied()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Builds a new set holding only the matches flagged as inliers.
    /// `inlier_flags` is parallel with the match vector.
    pub fn retain_by_flags(&self, inlier_flags: &[bool]) -> MatchSet {
        let mut kept = MatchSet::new();
        for (candidate, &keep) in self.matches.iter().zip(inlier_flags) {
            if keep {
                // Uniqueness carries over from this set.
                let _ = kept.try_push(*candidate);
            }
        }
        kept
    }
}

/// Runs the matcher over every octave bucket with the octave-scaled window,
/// collecting at most one match per feature. Unmatched features are skipped
/// without error.
pub fn find_matches(
    in_view: &FeaturesInView,
    frame: &Keyframe,
    matcher: &dyn FeatureMatcher,
    radius: SearchRadius,
    radius_factor: f32,
) -> MatchSet {
    let mut matches = MatchSet::new();
    for octave in 0..in_view.octave_count() {
        let radius_px = radius.for_octave(octave) * radius_factor;
        for projection in in_view.octave(octave) {
            if let Some(found) = matcher.find_match(projection, frame, radius_px) {
                let _ = matches.try_push(found);
            }
        }
    }
    matches
}
