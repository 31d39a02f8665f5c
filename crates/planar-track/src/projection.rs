use crate::{
    FeatureId, FeatureMap, Homography, ImageSize, Keypoint, PatchDescriptor, PinholeIntrinsics,
    Pose,
};

/// Where a map feature is predicted to appear in the incoming frame.
#[derive(Clone, Copy, Debug)]
pub struct FeatureProjectionInfo {
    feature_id: FeatureId,
    predicted: Keypoint,
    octave: usize,
    descriptor: PatchDescriptor,
}

impl FeatureProjectionInfo {
    pub fn feature_id(&self) -> FeatureId {
        self.feature_id
    }

    pub fn predicted(&self) -> Keypoint {
        self.predicted
    }

    pub fn octave(&self) -> usize {
        self.octave
    }

    pub fn descriptor(&self) -> &PatchDescriptor {
        &self.descriptor
    }
}

/// Per-frame projection buckets, outer index is the pyramid octave.
#[derive(Clone, Debug)]
pub struct FeaturesInView {
    octaves: Vec<Vec<FeatureProjectionInfo>>,
}

impl FeaturesInView {
    pub fn with_octaves(octave_count: usize) -> Self {
        Self {
            octaves: vec![Vec::new(); octave_count],
        }
    }

    fn push(&mut self, info: FeatureProjectionInfo) {
        if let Some(bucket) = self.octaves.get_mut(info.octave) {
            bucket.push(info);
        }
    }

    pub fn octave(&self, octave: usize) -> &[FeatureProjectionInfo] {
        self.octaves.get(octave).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn octave_count(&self) -> usize {
        self.octaves.len()
    }

    pub fn total(&self) -> usize {
        self.octaves.iter().map(Vec::len).sum()
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &FeatureProjectionInfo> {
        self.octaves.iter().flatten()
    }
}

#[derive(Debug)]
pub enum SearchRadiusError {
    NonPositive { base_px: f32 },
}

impl std::fmt::Display for SearchRadiusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchRadiusError::NonPositive { base_px } => {
                write!(f, "search radius must be > 0 pixels, got {base_px}")
            }
        }
    }
}

impl std::error::Error for SearchRadiusError {}

/// Matching window radius in image pixels, doubled per pyramid octave so
/// coarse levels search proportionally wider.
#[derive(Clone, Copy, Debug)]
pub struct SearchRadius(f32);

impl SearchRadius {
    pub fn try_new(base_px: f32) -> Result<Self, SearchRadiusError> {
        if !base_px.is_finite() || base_px <= 0.0 {
            return Err(SearchRadiusError::NonPositive { base_px });
        }
        Ok(Self(base_px))
    }

    pub fn base_px(self) -> f32 {
        self.0
    }

    pub fn for_octave(self, octave: usize) -> f32 {
        self.0 * (1u32 << octave.min(16)) as f32
    }
}

/// Predicts feature positions under a plane homography. With
/// `require_in_image`, predictions outside the frame are excluded.
pub fn project_planar(
    map: &FeatureMap,
    homography: &Homography,
    image_size: ImageSize,
    require_in_image: bool,
) -> FeaturesInView {
    let mut in_view = FeaturesInView::with_octaves(map.octave_count().get());
    for (feature_id, feature) in map.iter() {
        let Some(predicted) = homography.apply(feature.reference_position()) else {
            continue;
        };
        if require_in_image && !image_size.contains(predicted) {
            continue;
        }
        in_view.push(FeatureProjectionInfo {
            feature_id,
            predicted,
            octave: feature.octave(),
            descriptor: *feature.descriptor(),
        });
    }
    in_view
}

/// Predicts feature positions under a metric camera pose. Features without
/// a metric position or behind the camera are excluded.
pub fn project_metric(
    map: &FeatureMap,
    pose: &Pose,
    intrinsics: PinholeIntrinsics,
    image_size: ImageSize,
    require_in_image: bool,
) -> FeaturesInView {
    let mut in_view = FeaturesInView::with_octaves(map.octave_count().get());
    for (feature_id, feature) in map.iter() {
        let Some(world) = feature.world_position() else {
            continue;
        };
        let Some(predicted) = intrinsics.project(pose.transform(world)) else {
            continue;
        };
        if require_in_image && !image_size.contains(predicted) {
            continue;
        }
        in_view.push(FeatureProjectionInfo {
            feature_id,
            predicted,
            octave: feature.octave(),
            descriptor: *feature.descriptor(),
        });
    }
    in_view
}
