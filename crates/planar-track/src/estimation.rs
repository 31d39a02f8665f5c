use crate::math;
use crate::matching::MatchSet;
use crate::{FeatureMap, Homography, Keypoint, PinholeIntrinsics, Point3, Pose};

#[derive(Clone, Copy, Debug)]
pub struct EstimatorConfig {
    pub max_iterations: usize,
    pub sample_threshold_px: f32,
    pub refine_iterations: usize,
    pub huber_delta_px: f32,
    pub seed: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            sample_threshold_px: 3.0,
            refine_iterations: 12,
            huber_delta_px: 2.0,
            seed: 0x5EED_u64,
        }
    }
}

/// Solver contract the tracker depends on. Estimators receive the full
/// match set and the pose prior from the previous frame; they return None
/// when no pose hypothesis survives.
pub trait PoseEstimator {
    fn estimate_planar(
        &self,
        matches: &MatchSet,
        map: &FeatureMap,
        prior: &Homography,
    ) -> Option<Homography>;

    fn estimate_metric(
        &self,
        matches: &MatchSet,
        map: &FeatureMap,
        intrinsics: PinholeIntrinsics,
        prior: &Pose,
    ) -> Option<Pose>;
}

/// Default estimator: RANSAC homography fitting for the planar phase,
/// Gauss-Newton reprojection refinement from the prior for the metric phase.
#[derive(Clone, Copy, Debug, Default)]
pub struct RobustEstimator {
    config: EstimatorConfig,
}

impl RobustEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }
}

impl PoseEstimator for RobustEstimator {
    fn estimate_planar(
        &self,
        matches: &MatchSet,
        map: &FeatureMap,
        _prior: &Homography,
    ) -> Option<Homography> {
        let mut reference = Vec::with_capacity(matches.len());
        let mut observed = Vec::with_capacity(matches.len());
        for candidate in matches.matches() {
            let feature = map.feature(candidate.feature_id())?;
            reference.push(feature.reference_position());
            observed.push(candidate.keypoint());
        }
        ransac_homography(&reference, &observed, self.config)
    }

    fn estimate_metric(
        &self,
        matches: &MatchSet,
        map: &FeatureMap,
        intrinsics: PinholeIntrinsics,
        prior: &Pose,
    ) -> Option<Pose> {
        let mut world = Vec::with_capacity(matches.len());
        let mut observed = Vec::with_capacity(matches.len());
        for candidate in matches.matches() {
            let feature = map.feature(candidate.feature_id())?;
            let Some(position) = feature.world_position() else {
                continue;
            };
            world.push(position);
            observed.push(candidate.keypoint());
        }
        refine_pose_gauss_newton(&world, &observed, intrinsics, *prior, self.config)
    }
}

/// Per-match squared reprojection error and its inlier verdict. Indexed in
/// parallel with the match vector that produced it.
#[derive(Clone, Copy, Debug)]
pub struct MatchReprojectionError {
    pub error_sq_px: f32,
    pub is_inlier: bool,
}

pub fn planar_reprojection_errors(
    matches: &MatchSet,
    map: &FeatureMap,
    homography: &Homography,
    threshold_px: f32,
) -> Vec<MatchReprojectionError> {
    let threshold_sq = threshold_px * threshold_px;
    matches
        .matches()
        .iter()
        .map(|candidate| {
            let error_sq_px = map
                .feature(candidate.feature_id())
                .and_then(|feature| {
                    homography.transfer_error_sq(feature.reference_position(), candidate.keypoint())
                })
                .unwrap_or(f32::INFINITY);
            MatchReprojectionError {
                error_sq_px,
                is_inlier: error_sq_px <= threshold_sq,
            }
        })
        .collect()
}

pub fn metric_reprojection_errors(
    matches: &MatchSet,
    map: &FeatureMap,
    pose: &Pose,
    intrinsics: PinholeIntrinsics,
    threshold_px: f32,
) -> Vec<MatchReprojectionError> {
    let threshold_sq = threshold_px * threshold_px;
    matches
        .matches()
        .iter()
        .map(|candidate| {
            let error_sq_px = map
                .feature(candidate.feature_id())
                .and_then(|feature| feature.world_position())
                .and_then(|world| intrinsics.project(pose.transform(world)))
                .map(|projected| {
                    let dx = projected.x - candidate.keypoint().x;
                    let dy = projected.y - candidate.keypoint().y;
                    dx * dx + dy * dy
                })
                .unwrap_or(f32::INFINITY);
            MatchReprojectionError {
                error_sq_px,
                is_inlier: error_sq_px <= threshold_sq,
            }
        })
        .collect()
}

pub fn inlier_count(errors: &[MatchReprojectionError]) -> usize {
    errors.iter().filter(|e| e.is_inlier).count()
}

fn ransac_homography(
    reference: &[Keypoint],
    observed: &[Keypoint],
    config: EstimatorConfig,
) -> Option<Homography> {
    let total = reference.len();
    if total < 4 {
        return None;
    }

    let threshold_sq = config.sample_threshold_px * config.sample_threshold_px;
    let mut rng = XorShift64::new(config.seed);
    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best: Option<Homography> = None;

    for _ in 0..config.max_iterations {
        let Some(sample) = sample_four(&mut rng, total) else {
            continue;
        };
        let src: Vec<Keypoint> = sample.iter().map(|&i| reference[i]).collect();
        let dst: Vec<Keypoint> = sample.iter().map(|&i| observed[i]).collect();
        let Some(hypothesis) = homography_from_correspondences(&src, &dst) else {
            continue;
        };

        let mut inliers = Vec::new();
        for idx in 0..total {
            if let Some(err_sq) = hypothesis.transfer_error_sq(reference[idx], observed[idx]) {
                if err_sq <= threshold_sq {
                    inliers.push(idx);
                }
            }
        }
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            best = Some(hypothesis);
        }
        if best_inliers.len() == total {
            break;
        }
    }

    let hypothesis = best?;
    if best_inliers.len() < 4 {
        return None;
    }

    // Refit on the consensus set; fall back to the winning hypothesis when
    // the refit turns out degenerate.
    let src: Vec<Keypoint> = best_inliers.iter().map(|&i| reference[i]).collect();
    let dst: Vec<Keypoint> = best_inliers.iter().map(|&i| observed[i]).collect();
    Some(homography_from_correspondences(&src, &dst).unwrap_or(hypothesis))
}

/// Direct linear transform with Hartley normalization, solved through the
/// 8x8 normal equations (h22 fixed at 1).
fn homography_from_correspondences(src: &[Keypoint], dst: &[Keypoint]) -> Option<Homography> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let (t_src, src_n) = normalize_points(src)?;
    let (t_dst, dst_n) = normalize_points(dst)?;

    let mut ata = [0.0_f32; 64];
    let mut atb = [0.0_f32; 8];
    for (p, q) in src_n.iter().zip(&dst_n) {
        let rows = [
            ([p.x, p.y, 1.0, 0.0, 0.0, 0.0, -p.x * q.x, -p.y * q.x], q.x),
            ([0.0, 0.0, 0.0, p.x, p.y, 1.0, -p.x * q.y, -p.y * q.y], q.y),
        ];
        for (row, rhs) in rows {
            for i in 0..8 {
                for j in 0..8 {
                    ata[i * 8 + j] += row[i] * row[j];
                }
                atb[i] += row[i] * rhs;
            }
        }
    }

    if !math::solve_linear_system(&mut ata, &mut atb, 8) {
        return None;
    }

    let normalized = [
        [atb[0], atb[1], atb[2]],
        [atb[3], atb[4], atb[5]],
        [atb[6], atb[7], 1.0],
    ];
    // Denormalize: H = T_dst^-1 * Hn * T_src.
    let t_dst_inv = math::mat_inverse(t_dst)?;
    let matrix = math::mat_mul(t_dst_inv, math::mat_mul(normalized, t_src));
    if matrix.iter().flatten().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Homography::from_matrix(matrix))
}

/// Similarity transform shifting the centroid to the origin and scaling the
/// mean distance to sqrt(2).
fn normalize_points(points: &[Keypoint]) -> Option<([[f32; 3]; 3], Vec<Keypoint>)> {
    let n = points.len() as f32;
    let mut mean_x = 0.0_f32;
    let mut mean_y = 0.0_f32;
    for p in points {
        mean_x += p.x;
        mean_y += p.y;
    }
    mean_x /= n;
    mean_y /= n;

    let mut mean_dist = 0.0_f32;
    for p in points {
        let dx = p.x - mean_x;
        let dy = p.y - mean_y;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;
    if !mean_dist.is_finite() || mean_dist < 1e-6 {
        return None;
    }

    let scale = std::f32::consts::SQRT_2 / mean_dist;
    let transform = [
        [scale, 0.0, -scale * mean_x],
        [0.0, scale, -scale * mean_y],
        [0.0, 0.0, 1.0],
    ];
    let normalized = points
        .iter()
        .map(|p| Keypoint {
            x: scale * (p.x - mean_x),
            y: scale * (p.y - mean_y),
        })
        .collect();
    Some((transform, normalized))
}

fn refine_pose_gauss_newton(
    world: &[Point3],
    observed: &[Keypoint],
    intrinsics: PinholeIntrinsics,
    prior: Pose,
    config: EstimatorConfig,
) -> Option<Pose> {
    if world.len() < 4 {
        return None;
    }

    let mut pose = prior;
    for _ in 0..config.refine_iterations {
        let mut jtj = [0.0_f32; 36];
        let mut jtr = [0.0_f32; 6];
        let mut valid = 0usize;

        for (point, pixel) in world.iter().zip(observed) {
            let pc = pose.transform(*point);
            if pc[2] <= 1e-6 {
                continue;
            }
            let inv_z = 1.0 / pc[2];
            let u = intrinsics.fx() * pc[0] * inv_z + intrinsics.cx();
            let v = intrinsics.fy() * pc[1] * inv_z + intrinsics.cy();
            let ru = u - pixel.x;
            let rv = v - pixel.y;

            let err = (ru * ru + rv * rv).sqrt();
            let weight = if err <= config.huber_delta_px {
                1.0
            } else {
                config.huber_delta_px / err
            };

            // d(u,v)/d(pc), then chain through d(pc)/d(rho, omega) = [I | -skew(pc)].
            let du_dpc = [
                intrinsics.fx() * inv_z,
                0.0,
                -intrinsics.fx() * pc[0] * inv_z * inv_z,
            ];
            let dv_dpc = [
                0.0,
                intrinsics.fy() * inv_z,
                -intrinsics.fy() * pc[1] * inv_z * inv_z,
            ];
            let neg_skew = math::skew([-pc[0], -pc[1], -pc[2]]);

            let mut ju = [0.0_f32; 6];
            let mut jv = [0.0_f32; 6];
            for k in 0..3 {
                ju[k] = du_dpc[k];
                jv[k] = dv_dpc[k];
            }
            for k in 0..3 {
                let mut su = 0.0_f32;
                let mut sv = 0.0_f32;
                for m in 0..3 {
                    su += du_dpc[m] * neg_skew[m][k];
                    sv += dv_dpc[m] * neg_skew[m][k];
                }
                ju[3 + k] = su;
                jv[3 + k] = sv;
            }

            for i in 0..6 {
                for j in 0..6 {
                    jtj[i * 6 + j] += weight * (ju[i] * ju[j] + jv[i] * jv[j]);
                }
                jtr[i] += weight * (ju[i] * ru + jv[i] * rv);
            }
            valid += 1;
        }

        if valid < 4 {
            return None;
        }
        let mut delta = [0.0_f32; 6];
        for i in 0..6 {
            delta[i] = -jtr[i];
        }
        if !math::solve_linear_system(&mut jtj, &mut delta, 6) {
            return None;
        }

        pose = apply_se3_delta(pose, delta);
        let step_sq: f32 = delta.iter().map(|d| d * d).sum();
        if step_sq < 1e-12 {
            break;
        }
    }

    let finite = pose
        .rotation()
        .iter()
        .flatten()
        .chain(pose.translation().iter())
        .all(|v| v.is_finite());
    if finite {
        Some(pose)
    } else {
        None
    }
}

/// Left-multiplied update: pose' = exp([rho, omega]) ∘ pose.
fn apply_se3_delta(pose: Pose, delta: [f32; 6]) -> Pose {
    let rho = [delta[0], delta[1], delta[2]];
    let omega = [delta[3], delta[4], delta[5]];
    let dr = math::so3_exp(omega);
    let rotation = math::mat_mul(dr, pose.rotation());
    let rt = math::mat_mul_vec(dr, pose.translation());
    Pose::from_rt(rotation, [rt[0] + rho[0], rt[1] + rho[1], rt[2] + rho[2]])
}

#[derive(Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_usize(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        (self.next_u64() as usize) % max
    }
}

fn sample_four(rng: &mut XorShift64, max: usize) -> Option<[usize; 4]> {
    if max < 4 {
        return None;
    }
    let a = rng.next_usize(max);
    let mut b = rng.next_usize(max - 1);
    if b >= a {
        b += 1;
    }

    let (min_ab, max_ab) = if a < b { (a, b) } else { (b, a) };
    let mut c = rng.next_usize(max - 2);
    if c >= min_ab {
        c += 1;
    }
    if c >= max_ab {
        c += 1;
    }

    let mut sorted = [a, b, c];
    sorted.sort_unstable();
    let mut d = rng.next_usize(max - 3);
    for &taken in &sorted {
        if d >= taken {
            d += 1;
        }
    }

    Some([a, b, c, d])
}
