use std::sync::Arc;
use std::time::Instant;

use planar_track::{
    FeatureMap, FrameId, Homography, ImageSize, Keyframe, KeyframeLevel, Keypoint, OctaveCount,
    PatchDescriptor, PoseTracker, Timestamp, TrackerConfig,
};

const DEFAULT_FRAMES: usize = 120;
const GRID_ROWS: usize = 8;
const GRID_COLS: usize = 10;
const GRID_SPACING_PX: f32 = 48.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("usage: track_synthetic [frames] [dropout_frame]");
        std::process::exit(1);
    }
    let frames = args
        .get(1)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_FRAMES);
    let dropout_frame = args.get(2).and_then(|s| s.parse::<usize>().ok());

    let image_size = ImageSize::try_new(640, 480).ok_or("bad image size")?;
    let octaves = OctaveCount::try_from(1)?;
    let map = Arc::new(build_grid_map(octaves)?);
    eprintln!(
        "synthetic map: {} features on a {}x{} grid",
        map.len(),
        GRID_ROWS,
        GRID_COLS
    );

    let config = TrackerConfig::with_defaults(image_size, octaves);
    let mut tracker = PoseTracker::new(config);
    tracker.reset_tracking(Arc::clone(&map), Homography::identity())?;

    let mut tracked_frames = 0usize;
    let mut lost_frames = 0usize;
    let mut resyncs = 0usize;
    let start = Instant::now();

    for frame_index in 0..frames {
        // Slow horizontal pan with a gentle vertical wobble.
        let dx = 0.8 * frame_index as f32;
        let dy = 6.0 * (frame_index as f32 * 0.1).sin();
        let truth = Homography::from_translation(dx, dy);

        let frame = if dropout_frame == Some(frame_index) {
            empty_frame(octaves, frame_index as u64)?
        } else {
            render_frame(&map, &truth, octaves, frame_index as u64)?
        };

        let tracked = tracker.track_frame(frame)?;
        if tracked {
            tracked_frames += 1;
        } else {
            lost_frames += 1;
        }

        if tracker.is_lost() {
            let recovered = tracker.resync()?;
            resyncs += 1;
            eprintln!(
                "frame {frame_index}: lost, resync {}",
                if recovered { "recovered" } else { "failed" }
            );
        }

        for event in tracker.take_events() {
            eprintln!("frame {frame_index}: event {event:?}");
        }

        if frame_index % 30 == 0 {
            let diag = tracker.diagnostics();
            eprintln!(
                "frame {frame_index}: in_view={} matches={} inliers={} rmse={:?}",
                diag.features_in_view, diag.matches_found, diag.inlier_count,
                diag.reprojection_rmse_px
            );
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 {
        frames as f64 / elapsed
    } else {
        0.0
    };
    eprintln!(
        "tracked {tracked_frames}/{frames} frames ({lost_frames} lost, {resyncs} resyncs) at {fps:.0} fps"
    );

    if tracked_frames == 0 {
        return Err("no frames tracked".into());
    }
    Ok(())
}

fn build_grid_map(octaves: OctaveCount) -> Result<FeatureMap, Box<dyn std::error::Error>> {
    let mut map = FeatureMap::new(octaves);
    for row in 0..GRID_ROWS {
        for col in 0..GRID_COLS {
            let position = Keypoint {
                x: 60.0 + col as f32 * GRID_SPACING_PX,
                y: 60.0 + row as f32 * GRID_SPACING_PX,
            };
            map.add_feature(position, grid_descriptor(row * GRID_COLS + col), 0)?;
        }
    }
    Ok(map)
}

// Spread each index over disjoint byte blocks so distinct features stay far
// apart in Hamming distance.
fn grid_descriptor(index: usize) -> PatchDescriptor {
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = ((index * 31 + i * 17) % 251) as u8;
    }
    PatchDescriptor(bytes)
}

fn render_frame(
    map: &FeatureMap,
    truth: &Homography,
    octaves: OctaveCount,
    frame_id: u64,
) -> Result<Keyframe, Box<dyn std::error::Error>> {
    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();
    for (_, feature) in map.iter() {
        let Some(observed) = truth.apply(feature.reference_position()) else {
            continue;
        };
        keypoints.push(observed);
        descriptors.push(*feature.descriptor());
    }
    let level = KeyframeLevel::new(keypoints, descriptors)?;
    Ok(Keyframe::new(
        FrameId::new(frame_id),
        Timestamp::from_nanos(frame_id as i64 * 33_333_333),
        vec![level],
        octaves,
    )?)
}

fn empty_frame(
    octaves: OctaveCount,
    frame_id: u64,
) -> Result<Keyframe, Box<dyn std::error::Error>> {
    Ok(Keyframe::new(
        FrameId::new(frame_id),
        Timestamp::from_nanos(frame_id as i64 * 33_333_333),
        vec![KeyframeLevel::empty(); octaves.get()],
        octaves,
    )?)
}
