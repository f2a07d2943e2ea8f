//! The "NORMALIZER" - canonical detections from heterogeneous backends
//!
//! Every backend reports boxes in its own layout (top-left + size, corner
//! pairs, frame-normalized centre + size) and some omit confidence. The
//! normalizer maps them all into one pixel-space `Detection`, clips to the
//! frame and applies the quality filter. It is a pure transform: an empty
//! input (or everything filtered out) is simply an empty output.

use crate::config::NormalizerConfig;
use follow_env::{BackendKind, FrameDetections, FrameDims, RawBox, RawDetection};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// CANONICAL DETECTION
// ============================================================================

/// Axis-aligned box in pixel units, `(x, y)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let iy = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One observed candidate subject in one frame. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    bbox: BoundingBox,
    confidence: f64,
    source: BackendKind,
    timestamp: f64,
}

impl Detection {
    /// Confidence is clamped into [0, 1].
    pub fn new(bbox: BoundingBox, confidence: f64, source: BackendKind, timestamp: f64) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            timestamp,
        }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn source(&self) -> BackendKind {
        self.source
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn center(&self) -> Point2<f64> {
        self.bbox.center()
    }

    pub fn area(&self) -> f64 {
        self.bbox.area()
    }

    pub fn width(&self) -> f64 {
        self.bbox.width
    }

    /// Signed horizontal offset of the centre from the frame centre
    /// (negative = left of centre).
    pub fn horizontal_offset(&self, frame: FrameDims) -> f64 {
        self.center().x - frame.width as f64 / 2.0
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Converts raw backend output into canonical detections.
#[derive(Debug, Clone)]
pub struct DetectionNormalizer {
    config: NormalizerConfig,
}

impl DetectionNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalizes one frame's worth of raw detections.
    pub fn normalize(&self, raw: &FrameDetections) -> Vec<Detection> {
        let detections: Vec<Detection> = raw
            .detections
            .iter()
            .filter_map(|d| self.normalize_one(d, raw.frame, raw.backend, raw.timestamp))
            .collect();

        let dropped = raw.detections.len() - detections.len();
        if dropped > 0 {
            debug!(
                "Normalizer dropped {}/{} {} detections",
                dropped,
                raw.detections.len(),
                raw.backend
            );
        }
        detections
    }

    fn normalize_one(
        &self,
        raw: &RawDetection,
        frame: FrameDims,
        source: BackendKind,
        timestamp: f64,
    ) -> Option<Detection> {
        let confidence = raw.confidence.unwrap_or(1.0);
        if !confidence.is_finite() {
            return None;
        }
        let confidence = confidence.clamp(0.0, 1.0);
        if confidence < self.config.min_confidence {
            return None;
        }

        let bbox = clip_to_frame(to_pixels(&raw.bbox, frame)?, frame)?;
        if bbox.width < self.config.min_box_width_px || bbox.height < self.config.min_box_height_px
        {
            return None;
        }

        let aspect = bbox.height / bbox.width;
        if self.config.min_aspect_ratio.is_some_and(|lo| aspect < lo)
            || self.config.max_aspect_ratio.is_some_and(|hi| aspect > hi)
        {
            return None;
        }

        Some(Detection::new(bbox, confidence, source, timestamp))
    }
}

/// Converts any raw layout into a top-left pixel box. `None` if the raw
/// values are non-finite or have no extent.
fn to_pixels(raw: &RawBox, frame: FrameDims) -> Option<BoundingBox> {
    let (fw, fh) = (frame.width as f64, frame.height as f64);
    let bbox = match *raw {
        RawBox::TopLeft { x, y, w, h } => BoundingBox::new(x, y, w, h),
        RawBox::Corners { x1, y1, x2, y2 } => {
            BoundingBox::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
        }
        RawBox::Normalized { cx, cy, w, h } => {
            BoundingBox::new((cx - w / 2.0) * fw, (cy - h / 2.0) * fh, w * fw, h * fh)
        }
    };

    let finite = [bbox.x, bbox.y, bbox.width, bbox.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || bbox.width <= 0.0 || bbox.height <= 0.0 {
        return None;
    }
    Some(bbox)
}

/// Clips a box to the frame. `None` if nothing is left.
fn clip_to_frame(bbox: BoundingBox, frame: FrameDims) -> Option<BoundingBox> {
    let x0 = bbox.x.max(0.0);
    let y0 = bbox.y.max(0.0);
    let x1 = bbox.right().min(frame.width as f64);
    let y1 = bbox.bottom().min(frame.height as f64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(BoundingBox::new(x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame_of(detections: Vec<RawDetection>) -> FrameDetections {
        FrameDetections {
            backend: BackendKind::Model,
            frame: FrameDims::new(640, 480),
            timestamp: 1.5,
            detections,
        }
    }

    fn normalizer() -> DetectionNormalizer {
        DetectionNormalizer::new(NormalizerConfig::default())
    }

    #[test]
    fn test_empty_input_is_empty_output() {
        let out = normalizer().normalize(&frame_of(vec![]));
        assert!(out.is_empty());
    }

    #[test]
    fn test_layouts_agree() {
        let layouts = [
            RawBox::TopLeft { x: 270.0, y: 140.0, w: 100.0, h: 200.0 },
            RawBox::Corners { x1: 370.0, y1: 340.0, x2: 270.0, y2: 140.0 },
            RawBox::Normalized {
                cx: 320.0 / 640.0,
                cy: 240.0 / 480.0,
                w: 100.0 / 640.0,
                h: 200.0 / 480.0,
            },
        ];

        for layout in layouts {
            let out = normalizer().normalize(&frame_of(vec![RawDetection::new(layout, Some(0.9))]));
            assert_eq!(out.len(), 1);
            let d = &out[0];
            assert_relative_eq!(d.center().x, 320.0, epsilon = 1e-9);
            assert_relative_eq!(d.center().y, 240.0, epsilon = 1e-9);
            assert_relative_eq!(d.area(), 20_000.0, epsilon = 1e-6);
            assert_eq!(d.source(), BackendKind::Model);
            assert_eq!(d.timestamp(), 1.5);
        }
    }

    #[test]
    fn test_missing_confidence_defaults_to_one() {
        let raw = RawDetection::new(RawBox::TopLeft { x: 0.0, y: 0.0, w: 50.0, h: 100.0 }, None);
        let out = normalizer().normalize(&frame_of(vec![raw]));
        assert_eq!(out[0].confidence(), 1.0);
    }

    #[test]
    fn test_box_clipped_to_frame() {
        let raw = RawDetection::new(
            RawBox::TopLeft { x: 600.0, y: -20.0, w: 100.0, h: 120.0 },
            Some(0.8),
        );
        let out = normalizer().normalize(&frame_of(vec![raw]));
        let bbox = out[0].bbox();
        assert_relative_eq!(bbox.x, 600.0);
        assert_relative_eq!(bbox.width, 40.0);
        assert_relative_eq!(bbox.y, 0.0);
        assert_relative_eq!(bbox.height, 100.0);
    }

    #[test]
    fn test_degenerate_and_offscreen_dropped() {
        let raws = vec![
            RawDetection::new(RawBox::TopLeft { x: 10.0, y: 10.0, w: 0.0, h: 50.0 }, Some(0.9)),
            RawDetection::new(RawBox::TopLeft { x: 700.0, y: 10.0, w: 50.0, h: 50.0 }, Some(0.9)),
            RawDetection::new(RawBox::TopLeft { x: f64::NAN, y: 10.0, w: 50.0, h: 50.0 }, Some(0.9)),
        ];
        assert!(normalizer().normalize(&frame_of(raws)).is_empty());
    }

    #[test]
    fn test_quality_filter() {
        let config = NormalizerConfig {
            min_aspect_ratio: Some(1.5),
            max_aspect_ratio: Some(4.0),
            ..Default::default()
        };
        let normalizer = DetectionNormalizer::new(config);
        let raws = vec![
            // Too unconfident
            RawDetection::new(RawBox::TopLeft { x: 0.0, y: 0.0, w: 50.0, h: 100.0 }, Some(0.1)),
            // Too small
            RawDetection::new(RawBox::TopLeft { x: 0.0, y: 0.0, w: 5.0, h: 10.0 }, Some(0.9)),
            // Too wide for a standing person
            RawDetection::new(RawBox::TopLeft { x: 0.0, y: 0.0, w: 100.0, h: 50.0 }, Some(0.9)),
            // Kept
            RawDetection::new(RawBox::TopLeft { x: 0.0, y: 0.0, w: 50.0, h: 120.0 }, Some(0.9)),
        ];
        let out = normalizer.normalize(&frame_of(raws));
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].bbox().height, 120.0);
    }

    #[test]
    fn test_confidence_clamped() {
        let raw = RawDetection::new(RawBox::TopLeft { x: 0.0, y: 0.0, w: 50.0, h: 100.0 }, Some(1.7));
        let out = normalizer().normalize(&frame_of(vec![raw]));
        assert_eq!(out[0].confidence(), 1.0);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert_relative_eq!(a.iou(&b), 50.0 / 150.0);
        assert_relative_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_horizontal_offset_sign() {
        let frame = FrameDims::new(640, 480);
        let left = Detection::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 0.9, BackendKind::Edge, 0.0);
        assert_relative_eq!(left.horizontal_offset(frame), -270.0);
    }
}
