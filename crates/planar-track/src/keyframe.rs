use crate::{FrameId, Keypoint, OctaveCount, PatchDescriptor, Timestamp};

#[derive(Debug)]
pub enum KeyframeError {
    LengthMismatch {
        keypoints: usize,
        descriptors: usize,
    },
    OctaveCountMismatch {
        levels: usize,
        expected: usize,
    },
}

impl std::fmt::Display for KeyframeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyframeError::LengthMismatch {
                keypoints,
                descriptors,
            } => write!(
                f,
                "keyframe level requires parallel keypoints and descriptors, got {keypoints} and {descriptors}"
            ),
            KeyframeError::OctaveCountMismatch { levels, expected } => {
                write!(f, "keyframe has {levels} pyramid levels, expected {expected}")
            }
        }
    }
}

impl std::error::Error for KeyframeError {}

/// One pyramid level of detections. Keypoints and descriptors are parallel.
#[derive(Clone, Debug)]
pub struct KeyframeLevel {
    keypoints: Vec<Keypoint>,
    descriptors: Vec<PatchDescriptor>,
}

impl KeyframeLevel {
    pub fn new(
        keypoints: Vec<Keypoint>,
        descriptors: Vec<PatchDescriptor>,
    ) -> Result<Self, KeyframeError> {
        if keypoints.len() != descriptors.len() {
            return Err(KeyframeError::LengthMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn empty() -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &[PatchDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Immutable per-frame detections, bucketed by pyramid octave.
#[derive(Clone, Debug)]
pub struct Keyframe {
    frame_id: FrameId,
    timestamp: Timestamp,
    levels: Vec<KeyframeLevel>,
}

impl Keyframe {
    pub fn new(
        frame_id: FrameId,
        timestamp: Timestamp,
        levels: Vec<KeyframeLevel>,
        octaves: OctaveCount,
    ) -> Result<Self, KeyframeError> {
        if levels.len() != octaves.get() {
            return Err(KeyframeError::OctaveCountMismatch {
                levels: levels.len(),
                expected: octaves.get(),
            });
        }
        Ok(Self {
            frame_id,
            timestamp,
            levels,
        })
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn level(&self, octave: usize) -> Option<&KeyframeLevel> {
        self.levels.get(octave)
    }

    pub fn levels(&self) -> &[KeyframeLevel] {
        &self.levels
    }

    pub fn octave_count(&self) -> usize {
        self.levels.len()
    }

    pub fn total_keypoints(&self) -> usize {
        self.levels.iter().map(KeyframeLevel::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(KeyframeLevel::is_empty)
    }
}
