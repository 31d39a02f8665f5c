//! Synthetic scenes shared across the unit tests.
#![allow(dead_code)]

use crate::{
    FeatureId, FeatureMap, FrameId, Homography, Keyframe, KeyframeError, KeyframeLevel, Keypoint,
    MapError, OctaveCount, PatchDescriptor, PinholeIntrinsics, Point3, Pose, Timestamp,
};

#[derive(Debug)]
pub(crate) enum TestHelperError {
    Keyframe(KeyframeError),
    Map(MapError),
}

impl From<KeyframeError> for TestHelperError {
    fn from(err: KeyframeError) -> Self {
        TestHelperError::Keyframe(err)
    }
}

impl From<MapError> for TestHelperError {
    fn from(err: MapError) -> Self {
        TestHelperError::Map(err)
    }
}

/// A descriptor with a support block unique to `index` for 0..32, so any
/// two distinct indices are at least 32 bits apart and equal indices match
/// exactly.
pub(crate) fn indexed_descriptor(index: usize) -> PatchDescriptor {
    let mut bytes = [0u8; 32];
    let low = index % 8;
    for byte in bytes.iter_mut().skip(low * 3).take(3) {
        *byte = 0xFF;
    }
    let high = (index / 8) % 4;
    for byte in bytes.iter_mut().skip(24 + high * 2).take(2) {
        *byte = 0xFF;
    }
    PatchDescriptor(bytes)
}

/// A single-octave map with `rows * cols` features laid out on a regular
/// grid starting at `origin`, each carrying a distinct descriptor.
pub(crate) fn planar_grid_map(
    rows: usize,
    cols: usize,
    spacing_px: f32,
    origin: Keypoint,
) -> (FeatureMap, Vec<FeatureId>) {
    let mut map = FeatureMap::new(OctaveCount::try_from(1).expect("octaves"));
    let mut ids = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let index = row * cols + col;
            let position = Keypoint {
                x: origin.x + col as f32 * spacing_px,
                y: origin.y + row as f32 * spacing_px,
            };
            let id = map
                .add_feature(position, indexed_descriptor(index), 0)
                .expect("grid feature");
            ids.push(id);
        }
    }
    (map, ids)
}

/// Like [`planar_grid_map`] but with the features spread round-robin over
/// all pyramid octaves.
pub(crate) fn pyramid_grid_map(
    rows: usize,
    cols: usize,
    spacing_px: f32,
    origin: Keypoint,
    octaves: OctaveCount,
) -> (FeatureMap, Vec<FeatureId>) {
    let mut map = FeatureMap::new(octaves);
    let mut ids = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let index = row * cols + col;
            let position = Keypoint {
                x: origin.x + col as f32 * spacing_px,
                y: origin.y + row as f32 * spacing_px,
            };
            let id = map
                .add_feature(position, indexed_descriptor(index), index % octaves.get())
                .expect("grid feature");
            ids.push(id);
        }
    }
    (map, ids)
}

fn frame_timestamp(frame_id: u64) -> Timestamp {
    Timestamp::from_nanos(frame_id as i64 * 33_000_000)
}

pub(crate) fn empty_keyframe(octaves: OctaveCount, frame_id: u64) -> Keyframe {
    let levels = vec![KeyframeLevel::empty(); octaves.get()];
    Keyframe::new(FrameId::new(frame_id), frame_timestamp(frame_id), levels, octaves)
        .expect("empty keyframe")
}

fn keyframe_from_observations(
    map: &FeatureMap,
    frame_id: u64,
    observe: impl Fn(&crate::Feature) -> Option<Keypoint>,
) -> Result<Keyframe, TestHelperError> {
    let octaves = map.octave_count();
    let mut keypoints = vec![Vec::new(); octaves.get()];
    let mut descriptors = vec![Vec::new(); octaves.get()];
    for (_, feature) in map.iter() {
        let Some(observed) = observe(feature) else {
            continue;
        };
        keypoints[feature.octave()].push(observed);
        descriptors[feature.octave()].push(*feature.descriptor());
    }
    let mut levels = Vec::with_capacity(octaves.get());
    for (points, descs) in keypoints.into_iter().zip(descriptors) {
        levels.push(KeyframeLevel::new(points, descs)?);
    }
    Ok(Keyframe::new(
        FrameId::new(frame_id),
        frame_timestamp(frame_id),
        levels,
        octaves,
    )?)
}

/// Renders the map under a plane homography: every feature observed exactly
/// where the homography predicts it.
pub(crate) fn keyframe_from_homography(
    map: &FeatureMap,
    homography: &Homography,
    frame_id: u64,
) -> Result<Keyframe, TestHelperError> {
    keyframe_from_observations(map, frame_id, |feature| {
        homography.apply(feature.reference_position())
    })
}

/// Renders the map under a metric camera pose. Features without a metric
/// position or behind the camera are left unobserved.
pub(crate) fn keyframe_from_pose(
    map: &FeatureMap,
    pose: &Pose,
    intrinsics: PinholeIntrinsics,
    frame_id: u64,
) -> Result<Keyframe, TestHelperError> {
    keyframe_from_observations(map, frame_id, |feature| {
        let world = feature.world_position()?;
        intrinsics.project(pose.transform(world))
    })
}

/// Back-projects every listed feature onto the plane at `depth`, as if the
/// reference image were taken by `intrinsics` from the world origin.
pub(crate) fn assign_planar_world_positions(
    map: &mut FeatureMap,
    ids: &[FeatureId],
    intrinsics: PinholeIntrinsics,
    depth: f32,
) {
    for &id in ids {
        let reference = map
            .feature(id)
            .expect("listed feature")
            .reference_position();
        let world = Point3 {
            x: (reference.x - intrinsics.cx()) / intrinsics.fx() * depth,
            y: (reference.y - intrinsics.cy()) / intrinsics.fy() * depth,
            z: depth,
        };
        map.set_world_position(id, world).expect("world position");
    }
}

#[cfg(test)]
mod tests {
    use super::{indexed_descriptor, planar_grid_map};

    #[test]
    fn indexed_descriptors_are_well_separated() {
        for a in 0..32 {
            for b in 0..32 {
                let distance = indexed_descriptor(a).hamming_distance(&indexed_descriptor(b));
                if a == b {
                    assert_eq!(distance, 0);
                } else {
                    assert!(distance >= 32, "indices {a} and {b} too close: {distance}");
                }
            }
        }
    }

    #[test]
    fn grid_map_is_row_major() {
        let (map, ids) = planar_grid_map(
            2,
            3,
            50.0,
            crate::Keypoint { x: 10.0, y: 20.0 },
        );
        assert_eq!(ids.len(), 6);
        let last = map.feature(ids[5]).expect("feature").reference_position();
        assert!((last.x - 110.0).abs() < 1e-6);
        assert!((last.y - 70.0).abs() < 1e-6);
    }
}
