use crate::math;
use crate::{Keypoint, Point3};

#[derive(Clone, Copy, Debug)]
pub struct PinholeIntrinsics {
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
}

#[derive(Debug)]
pub enum IntrinsicsError {
    NonPositiveFocal { fx: f32, fy: f32 },
}

impl std::fmt::Display for IntrinsicsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntrinsicsError::NonPositiveFocal { fx, fy } => {
                write!(
                    f,
                    "pinhole intrinsics require fx, fy > 0 (fx={fx}, fy={fy})"
                )
            }
        }
    }
}

impl std::error::Error for IntrinsicsError {}

impl PinholeIntrinsics {
    pub fn try_new(fx: f32, fy: f32, cx: f32, cy: f32) -> Result<Self, IntrinsicsError> {
        if fx <= 0.0 || fy <= 0.0 {
            return Err(IntrinsicsError::NonPositiveFocal { fx, fy });
        }
        Ok(Self { fx, fy, cx, cy })
    }

    pub fn fx(&self) -> f32 {
        self.fx
    }

    pub fn fy(&self) -> f32 {
        self.fy
    }

    pub fn cx(&self) -> f32 {
        self.cx
    }

    pub fn cy(&self) -> f32 {
        self.cy
    }

    /// Projects a camera-frame point; None when at or behind the camera.
    pub fn project(&self, pc: [f32; 3]) -> Option<Keypoint> {
        if pc[2] <= 1e-6 {
            return None;
        }
        Some(Keypoint {
            x: self.fx * (pc[0] / pc[2]) + self.cx,
            y: self.fy * (pc[1] / pc[2]) + self.cy,
        })
    }
}

/// World-to-camera rigid transform.
#[derive(Clone, Copy, Debug)]
pub struct Pose {
    rotation: [[f32; 3]; 3],
    translation: [f32; 3],
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    pub fn from_rt(rotation: [[f32; 3]; 3], translation: [f32; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn rotation(&self) -> [[f32; 3]; 3] {
        self.rotation
    }

    pub fn translation(&self) -> [f32; 3] {
        self.translation
    }

    pub fn inverse(&self) -> Pose {
        let r_t = math::mat_transpose(self.rotation);
        let t = math::mat_mul_vec(r_t, self.translation);
        Pose {
            rotation: r_t,
            translation: [-t[0], -t[1], -t[2]],
        }
    }

    /// Compose two poses: `next ∘ self`.
    pub fn compose(self, next: Pose) -> Pose {
        let r = math::mat_mul(next.rotation, self.rotation);
        let t = math::mat_mul_vec(next.rotation, self.translation);
        Pose {
            rotation: r,
            translation: [
                t[0] + next.translation[0],
                t[1] + next.translation[1],
                t[2] + next.translation[2],
            ],
        }
    }

    pub fn transform(&self, point: Point3) -> [f32; 3] {
        math::transform_point(self.rotation, self.translation, [point.x, point.y, point.z])
    }
}
