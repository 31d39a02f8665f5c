use slotmap::{new_key_type, SlotMap};

use crate::{Keypoint, OctaveCount, PatchDescriptor, Point3};

new_key_type! {
    pub struct FeatureId;
}

#[derive(Debug)]
pub enum MapError {
    OctaveOutOfRange { octave: usize, octave_count: usize },
    UnknownFeature { feature_id: FeatureId },
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::OctaveOutOfRange {
                octave,
                octave_count,
            } => write!(
                f,
                "feature octave {octave} out of range for {octave_count} octaves"
            ),
            MapError::UnknownFeature { feature_id } => {
                write!(f, "unknown feature {feature_id:?}")
            }
        }
    }
}

impl std::error::Error for MapError {}

/// A tracked plane landmark. The reference position is in pixels of the
/// reference keyframe; a metric position appears once calibration upgrades
/// the map to 3D.
#[derive(Clone, Debug)]
pub struct Feature {
    reference_position: Keypoint,
    world_position: Option<Point3>,
    descriptor: PatchDescriptor,
    octave: usize,
}

impl Feature {
    pub fn reference_position(&self) -> Keypoint {
        self.reference_position
    }

    pub fn world_position(&self) -> Option<Point3> {
        self.world_position
    }

    pub fn descriptor(&self) -> &PatchDescriptor {
        &self.descriptor
    }

    pub fn octave(&self) -> usize {
        self.octave
    }
}

/// Read-only landmark store the tracker matches against. Building and
/// refining the map happens elsewhere.
#[derive(Clone, Debug)]
pub struct FeatureMap {
    features: SlotMap<FeatureId, Feature>,
    octave_count: OctaveCount,
}

impl FeatureMap {
    pub fn new(octave_count: OctaveCount) -> Self {
        Self {
            features: SlotMap::with_key(),
            octave_count,
        }
    }

    pub fn add_feature(
        &mut self,
        reference_position: Keypoint,
        descriptor: PatchDescriptor,
        octave: usize,
    ) -> Result<FeatureId, MapError> {
        if octave >= self.octave_count.get() {
            return Err(MapError::OctaveOutOfRange {
                octave,
                octave_count: self.octave_count.get(),
            });
        }
        Ok(self.features.insert(Feature {
            reference_position,
            world_position: None,
            descriptor,
            octave,
        }))
    }

    pub fn set_world_position(
        &mut self,
        feature_id: FeatureId,
        position: Point3,
    ) -> Result<(), MapError> {
        let feature = self
            .features
            .get_mut(feature_id)
            .ok_or(MapError::UnknownFeature { feature_id })?;
        feature.world_position = Some(position);
        Ok(())
    }

    pub fn feature(&self, feature_id: FeatureId) -> Option<&Feature> {
        self.features.get(feature_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &Feature)> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn octave_count(&self) -> OctaveCount {
        self.octave_count
    }

    pub fn world_position_count(&self) -> usize {
        self.features
            .values()
            .filter(|feature| feature.world_position.is_some())
            .count()
    }
}

#[cfg(test)]
pub(crate) fn assert_map_invariants(map: &FeatureMap) {
    for (feature_id, feature) in map.iter() {
        assert!(
            feature.octave() < map.octave_count().get(),
            "feature {feature_id:?} octave {} exceeds octave count {}",
            feature.octave(),
            map.octave_count().get()
        );
    }
}
