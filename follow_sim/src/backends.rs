//! Simulated detection backends.
//!
//! Each backend observes the oracle's snapshot through its own noise profile
//! and reports in its own raw layout, so the pipeline's normalizer sees the
//! same variety it would see from real detectors:
//!
//! | Backend | Layout     | Confidence | Character                         |
//! |---------|------------|------------|-----------------------------------|
//! | Motion  | TopLeft    | absent     | needs image motion, jittery       |
//! | Edge    | Corners    | 0.5..0.8   | sees still people, false alarms   |
//! | Model   | Normalized | 0.85..0.99 | tight boxes, rare dropouts        |
//! | Hybrid  | TopLeft    | fused      | motion + edge by IoU consensus    |

use crate::oracle::WorldSnapshot;
use follow_core::BoundingBox;
use follow_env::{BackendKind, DetectionBackend, EnvError, FrameDetections, RawBox, RawDetection};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Observation noise for one detector.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    /// Std dev of box centre jitter (px)
    pub center_jitter_px: f64,

    /// Std dev of relative box size error
    pub size_jitter: f64,

    /// Probability of missing a visible person in one frame
    pub dropout: f64,

    /// Probability of one spurious box per frame
    pub false_positive_rate: f64,

    /// Uniform confidence range
    pub confidence: (f64, f64),

    /// Minimum apparent speed (cm/s) for a person to be detected at all
    pub min_apparent_speed: Option<f64>,
}

impl NoiseProfile {
    pub fn motion() -> Self {
        Self {
            center_jitter_px: 6.0,
            size_jitter: 0.08,
            dropout: 0.10,
            false_positive_rate: 0.0,
            confidence: (0.6, 0.9),
            min_apparent_speed: Some(3.0),
        }
    }

    pub fn edge() -> Self {
        Self {
            center_jitter_px: 4.0,
            size_jitter: 0.05,
            dropout: 0.15,
            false_positive_rate: 0.05,
            confidence: (0.5, 0.8),
            min_apparent_speed: None,
        }
    }

    pub fn model() -> Self {
        Self {
            center_jitter_px: 2.0,
            size_jitter: 0.03,
            dropout: 0.02,
            false_positive_rate: 0.0,
            confidence: (0.85, 0.99),
            min_apparent_speed: None,
        }
    }
}

/// Consensus parameters for the hybrid backend.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridConfig {
    /// Minimum IoU for a motion box and an edge box to agree
    pub iou_threshold: f64,
    pub motion_weight: f64,
    pub edge_weight: f64,

    /// Added to the confidence of boxes both detectors agree on
    pub consensus_bonus: f64,

    /// Unmatched motion boxes survive above this confidence
    pub motion_only_confidence: f64,

    /// Unmatched edge boxes survive above this confidence
    pub edge_only_confidence: f64,

    /// Final confidence floor
    pub min_consensus: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            motion_weight: 0.6,
            edge_weight: 0.4,
            consensus_bonus: 0.1,
            motion_only_confidence: 0.7,
            edge_only_confidence: 0.8,
            min_consensus: 0.5,
        }
    }
}

/// Pixel-space observation shared by all layouts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub bbox: BoundingBox,
    pub confidence: f64,
}

/// A seeded observer applying one noise profile.
struct Observer {
    profile: NoiseProfile,
    rng: ChaCha8Rng,
}

impl Observer {
    fn new(profile: NoiseProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn observe(&mut self, snapshot: &WorldSnapshot) -> Vec<Observation> {
        let mut observations = Vec::new();

        for view in snapshot.views.iter().filter(|v| v.visible()) {
            let Some(truth) = view.bbox else { continue };
            if let Some(min_speed) = self.profile.min_apparent_speed {
                if view.apparent_speed_cm_s < min_speed {
                    continue;
                }
            }
            if self.rng.gen::<f64>() < self.profile.dropout {
                continue;
            }

            let center = truth.center();
            let cx = center.x + gaussian(&mut self.rng, self.profile.center_jitter_px);
            let cy = center.y + gaussian(&mut self.rng, self.profile.center_jitter_px);
            let scale = (1.0 + gaussian(&mut self.rng, self.profile.size_jitter)).max(0.1);
            let width = truth.width * scale;
            let height = truth.height * scale;

            observations.push(Observation {
                bbox: BoundingBox::new(cx - width / 2.0, cy - height / 2.0, width, height),
                confidence: self.confidence(),
            });
        }

        if self.rng.gen::<f64>() < self.profile.false_positive_rate {
            let width = self.rng.gen_range(30.0..120.0);
            let height = width * 2.0;
            let x = self.rng.gen_range(0.0..(snapshot.frame.width as f64 - width).max(1.0));
            let y = self.rng.gen_range(0.0..(snapshot.frame.height as f64 - height).max(1.0));
            observations.push(Observation {
                bbox: BoundingBox::new(x, y, width, height),
                confidence: self.confidence(),
            });
        }

        observations
    }

    fn confidence(&mut self) -> f64 {
        let (lo, hi) = self.profile.confidence;
        if hi > lo {
            self.rng.gen_range(lo..hi)
        } else {
            lo
        }
    }
}

/// Zero-mean normal sample; zero when `std_dev` is not positive.
pub(crate) fn gaussian(rng: &mut ChaCha8Rng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, std_dev).map_or(0.0, |normal| normal.sample(rng))
}

fn check_frame(snapshot: &WorldSnapshot) -> Result<(), EnvError> {
    if snapshot.frame.width == 0 || snapshot.frame.height == 0 {
        return Err(EnvError::backend("camera returned an empty frame"));
    }
    Ok(())
}

fn frame_of(kind: BackendKind, snapshot: &WorldSnapshot, detections: Vec<RawDetection>) -> FrameDetections {
    FrameDetections {
        backend: kind,
        frame: snapshot.frame,
        timestamp: snapshot.time,
        detections,
    }
}

// ============================================================================
// BACKENDS
// ============================================================================

/// Frame-differencing detector: no confidence, blind to still scenes.
pub struct MotionBackend {
    observer: Observer,
}

impl MotionBackend {
    pub fn new(seed: u64) -> Self {
        Self {
            observer: Observer::new(NoiseProfile::motion(), seed),
        }
    }
}

impl DetectionBackend for MotionBackend {
    type Frame = WorldSnapshot;

    fn kind(&self) -> BackendKind {
        BackendKind::Motion
    }

    fn detect(&mut self, snapshot: &WorldSnapshot) -> Result<FrameDetections, EnvError> {
        check_frame(snapshot)?;
        let detections = self
            .observer
            .observe(snapshot)
            .into_iter()
            .map(|o| {
                RawDetection::new(
                    RawBox::TopLeft {
                        x: o.bbox.x,
                        y: o.bbox.y,
                        w: o.bbox.width,
                        h: o.bbox.height,
                    },
                    None,
                )
            })
            .collect();
        Ok(frame_of(self.kind(), snapshot, detections))
    }
}

/// Contour detector reporting corner coordinates.
pub struct EdgeBackend {
    observer: Observer,
}

impl EdgeBackend {
    pub fn new(seed: u64) -> Self {
        Self {
            observer: Observer::new(NoiseProfile::edge(), seed),
        }
    }
}

impl DetectionBackend for EdgeBackend {
    type Frame = WorldSnapshot;

    fn kind(&self) -> BackendKind {
        BackendKind::Edge
    }

    fn detect(&mut self, snapshot: &WorldSnapshot) -> Result<FrameDetections, EnvError> {
        check_frame(snapshot)?;
        let detections = self
            .observer
            .observe(snapshot)
            .into_iter()
            .map(|o| {
                RawDetection::new(
                    RawBox::Corners {
                        x1: o.bbox.x,
                        y1: o.bbox.y,
                        x2: o.bbox.right(),
                        y2: o.bbox.bottom(),
                    },
                    Some(o.confidence),
                )
            })
            .collect();
        Ok(frame_of(self.kind(), snapshot, detections))
    }
}

/// Learned person detector reporting normalised centre/size.
pub struct ModelBackend {
    observer: Observer,
}

impl ModelBackend {
    pub fn new(seed: u64) -> Self {
        Self {
            observer: Observer::new(NoiseProfile::model(), seed),
        }
    }
}

impl DetectionBackend for ModelBackend {
    type Frame = WorldSnapshot;

    fn kind(&self) -> BackendKind {
        BackendKind::Model
    }

    fn detect(&mut self, snapshot: &WorldSnapshot) -> Result<FrameDetections, EnvError> {
        check_frame(snapshot)?;
        let w = snapshot.frame.width as f64;
        let h = snapshot.frame.height as f64;
        let detections = self
            .observer
            .observe(snapshot)
            .into_iter()
            .map(|o| {
                let center = o.bbox.center();
                RawDetection::new(
                    RawBox::Normalized {
                        cx: center.x / w,
                        cy: center.y / h,
                        w: o.bbox.width / w,
                        h: o.bbox.height / h,
                    },
                    Some(o.confidence),
                )
            })
            .collect();
        Ok(frame_of(self.kind(), snapshot, detections))
    }
}

/// Motion and edge detectors fused by box overlap.
pub struct HybridBackend {
    motion: Observer,
    edge: Observer,
    config: HybridConfig,
}

impl HybridBackend {
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, HybridConfig::default())
    }

    pub fn with_config(seed: u64, config: HybridConfig) -> Self {
        Self {
            motion: Observer::new(NoiseProfile::motion(), seed),
            edge: Observer::new(NoiseProfile::edge(), seed.rotate_left(17) ^ 0xed6e),
            config,
        }
    }
}

impl DetectionBackend for HybridBackend {
    type Frame = WorldSnapshot;

    fn kind(&self) -> BackendKind {
        BackendKind::Hybrid
    }

    fn detect(&mut self, snapshot: &WorldSnapshot) -> Result<FrameDetections, EnvError> {
        check_frame(snapshot)?;
        let motion = self.motion.observe(snapshot);
        let edge = self.edge.observe(snapshot);
        let detections = consensus(&motion, &edge, &self.config)
            .into_iter()
            .map(|o| {
                RawDetection::new(
                    RawBox::TopLeft {
                        x: o.bbox.x,
                        y: o.bbox.y,
                        w: o.bbox.width,
                        h: o.bbox.height,
                    },
                    Some(o.confidence),
                )
            })
            .collect();
        Ok(frame_of(self.kind(), snapshot, detections))
    }
}

/// Merges motion and edge observations.
///
/// Each motion box pairs with the unused edge box of highest IoU above the
/// threshold; agreed boxes are blended by weight and receive the consensus
/// bonus. Unpaired boxes survive only above their own confidence bar.
pub fn consensus(motion: &[Observation], edge: &[Observation], config: &HybridConfig) -> Vec<Observation> {
    let mut used = vec![false; edge.len()];
    let mut fused = Vec::new();

    for m in motion {
        let best = edge
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .map(|(i, e)| (i, m.bbox.iou(&e.bbox)))
            .filter(|(_, iou)| *iou > config.iou_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((i, _)) => {
                used[i] = true;
                let e = &edge[i];
                let (wm, we) = (config.motion_weight, config.edge_weight);
                fused.push(Observation {
                    bbox: BoundingBox::new(
                        wm * m.bbox.x + we * e.bbox.x,
                        wm * m.bbox.y + we * e.bbox.y,
                        wm * m.bbox.width + we * e.bbox.width,
                        wm * m.bbox.height + we * e.bbox.height,
                    ),
                    confidence: (wm * m.confidence + we * e.confidence + config.consensus_bonus).min(1.0),
                });
            }
            None if m.confidence > config.motion_only_confidence => fused.push(*m),
            None => {}
        }
    }

    fused.extend(
        edge.iter()
            .zip(&used)
            .filter(|(e, used)| !**used && e.confidence > config.edge_only_confidence)
            .map(|(e, _)| *e),
    );

    fused.retain(|o| o.confidence >= config.min_consensus);
    fused
}

/// Boxed backend over world snapshots.
pub type SimBackend = Box<dyn DetectionBackend<Frame = WorldSnapshot>>;

/// Builds the backend variant for `kind`.
pub fn make_backend(kind: BackendKind, seed: u64) -> SimBackend {
    match kind {
        BackendKind::Motion => Box::new(MotionBackend::new(seed)),
        BackendKind::Edge => Box::new(EdgeBackend::new(seed)),
        BackendKind::Model => Box::new(ModelBackend::new(seed)),
        BackendKind::Hybrid => Box::new(HybridBackend::new(seed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{CameraModel, Oracle};
    use crate::scenarios::{ActorScript, ScenarioScript};
    use follow_core::{DetectionNormalizer, NormalizerConfig};
    use follow_env::FrameDims;

    fn still_snapshot() -> WorldSnapshot {
        Oracle::new(ScenarioScript::standing_subject(), CameraModel::default()).snapshot()
    }

    fn observation(x: f64, confidence: f64) -> Observation {
        Observation {
            bbox: BoundingBox::new(x, 100.0, 100.0, 200.0),
            confidence,
        }
    }

    #[test]
    fn test_every_layout_normalizes_near_truth() {
        let snapshot = still_snapshot();
        let truth = snapshot.subject().unwrap().bbox.unwrap();
        let normalizer = DetectionNormalizer::new(NormalizerConfig::default());

        for kind in [BackendKind::Edge, BackendKind::Model] {
            let mut backend = make_backend(kind, 3);
            let mut seen = 0;
            for _ in 0..20 {
                let frame = backend.detect(&snapshot).unwrap();
                assert_eq!(frame.backend, kind);
                for d in normalizer.normalize(&frame) {
                    if (d.center().x - truth.center().x).abs() < 30.0 {
                        seen += 1;
                    }
                }
            }
            assert!(seen >= 10, "{} saw the subject {} times", kind, seen);
        }
    }

    #[test]
    fn test_motion_backend_blind_to_still_scene() {
        let snapshot = still_snapshot();
        let mut backend = MotionBackend::new(1);
        for _ in 0..20 {
            assert!(backend.detect(&snapshot).unwrap().detections.is_empty());
        }
    }

    #[test]
    fn test_motion_backend_sees_walking_subject() {
        let script = ScenarioScript {
            subject: ActorScript::new(100.0, 0.0).leg(f64::INFINITY, 0.0, 20.0),
            ..ScenarioScript::standing_subject()
        };
        let mut oracle = Oracle::new(script, CameraModel::default());
        oracle.step(0.05, &Default::default());

        let mut backend = MotionBackend::new(1);
        let hits: usize = (0..20)
            .map(|_| backend.detect(&oracle.snapshot()).unwrap().detections.len())
            .sum();
        assert!(hits >= 10);
        let frame = backend.detect(&oracle.snapshot()).unwrap();
        assert!(frame.detections.iter().all(|d| d.confidence.is_none()));
    }

    #[test]
    fn test_same_seed_same_frames() {
        let snapshot = still_snapshot();
        let mut a = make_backend(BackendKind::Edge, 9);
        let mut b = make_backend(BackendKind::Edge, 9);
        for _ in 0..10 {
            assert_eq!(a.detect(&snapshot).unwrap(), b.detect(&snapshot).unwrap());
        }
    }

    #[test]
    fn test_empty_frame_is_a_backend_failure() {
        let mut snapshot = still_snapshot();
        snapshot.frame = FrameDims::new(0, 0);
        assert!(matches!(
            ModelBackend::new(0).detect(&snapshot),
            Err(EnvError::BackendFailure(_))
        ));
    }

    #[test]
    fn test_consensus_blends_agreeing_boxes() {
        let config = HybridConfig::default();
        let fused = consensus(&[observation(100.0, 0.6)], &[observation(110.0, 0.5)], &config);

        assert_eq!(fused.len(), 1);
        assert!((fused[0].bbox.x - 104.0).abs() < 1e-9);
        assert!((fused[0].confidence - (0.36 + 0.2 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_consensus_filters_unpaired_boxes() {
        let config = HybridConfig::default();
        let motion = [observation(0.0, 0.75), observation(200.0, 0.65)];
        let edge = [observation(400.0, 0.85), observation(520.0, 0.75)];
        let fused = consensus(&motion, &edge, &config);

        let xs: Vec<f64> = fused.iter().map(|o| o.bbox.x).collect();
        assert_eq!(xs, vec![0.0, 400.0]);
    }

    #[test]
    fn test_consensus_pairs_each_edge_box_once() {
        let config = HybridConfig::default();
        let motion = [observation(100.0, 0.6), observation(105.0, 0.6)];
        let edge = [observation(102.0, 0.6)];
        let fused = consensus(&motion, &edge, &config);

        // Second motion box finds no partner and is below its own bar
        assert_eq!(fused.len(), 1);
    }
}
