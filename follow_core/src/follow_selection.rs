//! The "SELECTOR" - continuity-first target selection
//!
//! Picks at most one detection per tick. While a target is held, the
//! candidate nearest to its last centre wins if it lies inside the
//! continuity gap, regardless of confidence, so the command stream never
//! jumps between co-present subjects.
//!
//! ```text
//!            ┌───────────┐  candidate within gap   ┌──────────┐
//!  ───────►  │ NO TARGET │ ──── rule 1 (score) ──► │ TRACKING │ ◄─┐ rule 2
//!            └───────────┘                         └──────────┘ ──┘
//!                  ▲                                    │ no candidate in gap
//!                  │   misses > loss_threshold     ┌──────────┐
//!                  └────────────────────────────── │  MISSED  │
//!                                                  └──────────┘
//! ```

use crate::config::SelectorConfig;
use crate::follow_detection::Detection;
use follow_env::FrameDims;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;
use tracing::{debug, info};

// ============================================================================
// TARGET STATE
// ============================================================================

/// The selector's belief about the tracked subject. Owned by the selector.
#[derive(Debug, Clone)]
pub struct TargetState {
    last: Detection,
    history: VecDeque<Point2<f64>>,
    capacity: usize,
    continuity: f64,
    ticks_since_seen: u32,
    session_id: u64,
}

impl TargetState {
    fn adopt(detection: Detection, session_id: u64, capacity: usize, initial_continuity: f64) -> Self {
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(detection.center());
        Self {
            last: detection,
            history,
            capacity,
            continuity: initial_continuity,
            ticks_since_seen: 0,
            session_id,
        }
    }

    fn accept(&mut self, detection: Detection, gain: f64) {
        self.history.push_back(detection.center());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.last = detection;
        self.continuity += gain * (1.0 - self.continuity);
        self.ticks_since_seen = 0;
    }

    fn miss(&mut self, gain: f64) {
        self.ticks_since_seen += 1;
        self.continuity *= 1.0 - gain;
    }

    /// Last accepted detection.
    pub fn last(&self) -> &Detection {
        &self.last
    }

    pub fn last_center(&self) -> Point2<f64> {
        self.last.center()
    }

    /// Prior centres, oldest first, bounded by the configured capacity.
    pub fn history(&self) -> &VecDeque<Point2<f64>> {
        &self.history
    }

    /// Continuity score in [0, 1].
    pub fn continuity(&self) -> f64 {
        self.continuity
    }

    pub fn ticks_since_seen(&self) -> u32 {
        self.ticks_since_seen
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

// ============================================================================
// SELECTION RESULT
// ============================================================================

/// What happened to the target this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionEvent {
    /// No target held and no candidates
    Idle,
    /// New target adopted by score (new session)
    Acquired,
    /// Held target matched within the gap
    Continued,
    /// Held target not matched; still held
    Missed,
    /// Held target dropped after too many misses
    Lost,
}

/// Output of one selector tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// The tracked subject this tick, if seen
    pub target: Option<Detection>,
    pub event: SelectionEvent,

    /// Session of the held target (also set while `Missed`)
    pub session_id: Option<u64>,
    pub continuity: f64,
    pub ticks_since_seen: u32,
}

// ============================================================================
// SELECTOR
// ============================================================================

/// Smart target selector.
pub struct SmartTargetSelector {
    config: SelectorConfig,
    target: Option<TargetState>,
    last_tick: Option<f64>,
    sessions: u64,
}

impl SmartTargetSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            target: None,
            last_tick: None,
            sessions: 0,
        }
    }

    pub fn target(&self) -> Option<&TargetState> {
        self.target.as_ref()
    }

    /// Continuity gap for the given time since the previous tick.
    pub fn gap_threshold(&self, elapsed: f64) -> f64 {
        let scale = if elapsed.is_finite() {
            (elapsed / self.config.nominal_tick_secs).clamp(1.0, self.config.max_gap_scale)
        } else {
            1.0
        };
        self.config.continuity_gap_px * scale
    }

    /// Composite rule-1 score of a candidate.
    pub fn score(&self, detection: &Detection, frame: FrameDims) -> f64 {
        let (cx, cy) = frame.center();
        let off_center = nalgebra::distance(&detection.center(), &Point2::new(cx, cy));
        let area = detection.area() / frame.area().max(1.0);
        let center = off_center / frame.half_diagonal().max(1.0);

        self.config.confidence_weight * detection.confidence() + self.config.area_weight * area
            - self.config.center_weight * center
    }

    /// Runs one selection tick.
    pub fn select(&mut self, candidates: &[Detection], frame: FrameDims, now: f64) -> Selection {
        let elapsed = self.last_tick.map_or(0.0, |t| now - t);
        self.last_tick = Some(now);

        let Some(mut state) = self.target.take() else {
            return self.acquire(candidates, frame);
        };

        let gap = self.gap_threshold(elapsed);
        let previous = state.last_center();

        let nearest = candidates
            .iter()
            .map(|d| (nalgebra::distance(&previous, &d.center()), d))
            .filter(|(displacement, _)| *displacement < gap)
            .min_by(|(da, a), (db, b)| continuity_order(*da, a, *db, b));

        let selection = match nearest {
            Some((displacement, detection)) => {
                state.accept(detection.clone(), self.config.continuity_gain);
                debug!(
                    "Target #{} continued (moved {:.1}px, continuity {:.2})",
                    state.session_id, displacement, state.continuity
                );
                Selection {
                    target: Some(detection.clone()),
                    event: SelectionEvent::Continued,
                    session_id: Some(state.session_id),
                    continuity: state.continuity,
                    ticks_since_seen: 0,
                }
            }
            None => {
                state.miss(self.config.continuity_gain);
                if state.ticks_since_seen > self.config.loss_threshold {
                    info!(
                        "Target #{} lost after {} missed ticks",
                        state.session_id, state.ticks_since_seen
                    );
                    return Selection {
                        target: None,
                        event: SelectionEvent::Lost,
                        session_id: None,
                        continuity: 0.0,
                        ticks_since_seen: state.ticks_since_seen,
                    };
                }
                debug!(
                    "Target #{} missed ({} / {})",
                    state.session_id, state.ticks_since_seen, self.config.loss_threshold
                );
                Selection {
                    target: None,
                    event: SelectionEvent::Missed,
                    session_id: Some(state.session_id),
                    continuity: state.continuity,
                    ticks_since_seen: state.ticks_since_seen,
                }
            }
        };

        self.target = Some(state);
        selection
    }

    /// Rule 1: adopt the best-scoring candidate as a new session.
    fn acquire(&mut self, candidates: &[Detection], frame: FrameDims) -> Selection {
        let best = candidates
            .iter()
            .map(|d| (self.score(d, frame), d))
            .max_by(|(sa, a), (sb, b)| {
                sa.total_cmp(sb)
                    .then_with(|| a.area().total_cmp(&b.area()))
                    .then_with(|| a.confidence().total_cmp(&b.confidence()))
            });

        let Some((score, detection)) = best else {
            return Selection {
                target: None,
                event: SelectionEvent::Idle,
                session_id: None,
                continuity: 0.0,
                ticks_since_seen: 0,
            };
        };

        self.sessions += 1;
        let state = TargetState::adopt(
            detection.clone(),
            self.sessions,
            self.config.history_capacity,
            self.config.continuity_gain,
        );
        info!(
            "✓ Target #{} acquired at ({:.0}, {:.0}) score={:.3}",
            self.sessions,
            detection.center().x,
            detection.center().y,
            score
        );

        let selection = Selection {
            target: Some(detection.clone()),
            event: SelectionEvent::Acquired,
            session_id: Some(state.session_id),
            continuity: state.continuity,
            ticks_since_seen: 0,
        };
        self.target = Some(state);
        selection
    }
}

/// Rule-2 ordering: smaller displacement, then larger area, then higher
/// confidence. `Less` means preferred.
fn continuity_order(da: f64, a: &Detection, db: f64, b: &Detection) -> Ordering {
    da.total_cmp(&db)
        .then_with(|| b.area().total_cmp(&a.area()))
        .then_with(|| b.confidence().total_cmp(&a.confidence()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::follow_detection::BoundingBox;
    use approx::assert_relative_eq;
    use follow_env::BackendKind;

    const FRAME: FrameDims = FrameDims {
        width: 640,
        height: 480,
    };
    const DT: f64 = 1.0 / 30.0;

    fn det_at(cx: f64, cy: f64, size: f64, confidence: f64) -> Detection {
        Detection::new(
            BoundingBox::new(cx - size / 2.0, cy - size / 2.0, size, size),
            confidence,
            BackendKind::Model,
            0.0,
        )
    }

    fn selector() -> SmartTargetSelector {
        SmartTargetSelector::new(SelectorConfig::default())
    }

    #[test]
    fn test_idle_without_candidates() {
        let mut sel = selector();
        let out = sel.select(&[], FRAME, 0.0);
        assert_eq!(out.event, SelectionEvent::Idle);
        assert!(out.target.is_none());
        assert!(sel.target().is_none());
    }

    #[test]
    fn test_rule_one_prefers_confidence() {
        let mut sel = selector();
        let weak_center = det_at(320.0, 240.0, 40.0, 0.4);
        let strong_side = det_at(500.0, 240.0, 40.0, 0.95);
        let out = sel.select(&[weak_center, strong_side.clone()], FRAME, 0.0);
        assert_eq!(out.event, SelectionEvent::Acquired);
        assert_eq!(out.target, Some(strong_side));
        assert_eq!(out.session_id, Some(1));
    }

    #[test]
    fn test_continuity_beats_confidence() {
        let mut sel = selector();
        sel.select(&[det_at(100.0, 100.0, 40.0, 0.6)], FRAME, 0.0);

        let same = det_at(105.0, 102.0, 40.0, 0.5);
        let other = det_at(400.0, 400.0, 80.0, 0.99);
        let out = sel.select(&[other, same.clone()], FRAME, DT);

        assert_eq!(out.event, SelectionEvent::Continued);
        assert_eq!(out.target, Some(same));
        assert_eq!(out.session_id, Some(1));
    }

    #[test]
    fn test_tie_break_area_then_confidence() {
        let mut sel = selector();
        sel.select(&[det_at(200.0, 200.0, 40.0, 0.9)], FRAME, 0.0);

        // Equidistant (10px left / right); larger area wins
        let small = det_at(190.0, 200.0, 40.0, 0.99);
        let large = det_at(210.0, 200.0, 60.0, 0.5);
        let out = sel.select(&[small, large.clone()], FRAME, DT);
        assert_eq!(out.target, Some(large));

        // Equidistant and equal area; higher confidence wins
        let mut sel = selector();
        sel.select(&[det_at(200.0, 200.0, 40.0, 0.9)], FRAME, 0.0);
        let low = det_at(190.0, 200.0, 40.0, 0.5);
        let high = det_at(210.0, 200.0, 40.0, 0.8);
        let out = sel.select(&[low, high.clone()], FRAME, DT);
        assert_eq!(out.target, Some(high));
    }

    #[test]
    fn test_gap_scales_with_elapsed_time() {
        let sel = selector();
        assert_relative_eq!(sel.gap_threshold(DT / 2.0), 150.0);
        assert_relative_eq!(sel.gap_threshold(2.0 * DT), 300.0, epsilon = 1e-9);
        assert_relative_eq!(sel.gap_threshold(10.0), 450.0);
    }

    #[test]
    fn test_slow_frame_tolerates_larger_jump() {
        let mut sel = selector();
        sel.select(&[det_at(100.0, 240.0, 40.0, 0.9)], FRAME, 0.0);

        // 200px in one nominal tick is a different subject...
        let out = sel.select(&[det_at(300.0, 240.0, 40.0, 0.9)], FRAME, DT);
        assert_eq!(out.event, SelectionEvent::Missed);

        // ...but after a long frame gap it is accepted
        let out = sel.select(&[det_at(300.0, 240.0, 40.0, 0.9)], FRAME, DT + 3.0 * DT);
        assert_eq!(out.event, SelectionEvent::Continued);
    }

    #[test]
    fn test_loss_and_reacquire_new_session() {
        let mut sel = selector();
        sel.select(&[det_at(100.0, 100.0, 40.0, 0.9)], FRAME, 0.0);

        let far = det_at(600.0, 400.0, 40.0, 0.9);
        let mut t = 0.0;
        for i in 1..=5 {
            t += DT;
            let out = sel.select(&[far.clone()], FRAME, t);
            assert_eq!(out.event, SelectionEvent::Missed);
            assert_eq!(out.ticks_since_seen, i);
            assert!(out.target.is_none());
        }

        t += DT;
        let out = sel.select(&[far.clone()], FRAME, t);
        assert_eq!(out.event, SelectionEvent::Lost);
        assert!(sel.target().is_none());

        t += DT;
        let out = sel.select(&[far.clone()], FRAME, t);
        assert_eq!(out.event, SelectionEvent::Acquired);
        assert_eq!(out.session_id, Some(2));
    }

    #[test]
    fn test_history_is_bounded() {
        let config = SelectorConfig {
            history_capacity: 4,
            ..Default::default()
        };
        let mut sel = SmartTargetSelector::new(config);
        for i in 0..10 {
            let x = 100.0 + i as f64 * 5.0;
            sel.select(&[det_at(x, 200.0, 40.0, 0.9)], FRAME, i as f64 * DT);
        }
        let state = sel.target().unwrap();
        assert_eq!(state.history().len(), 4);
        assert_relative_eq!(state.history().front().unwrap().x, 130.0);
        assert_relative_eq!(state.history().back().unwrap().x, 145.0);
    }

    #[test]
    fn test_continuity_rises_and_decays() {
        let mut sel = selector();
        let d = det_at(320.0, 240.0, 40.0, 0.9);
        let mut last = 0.0;
        for i in 0..5 {
            let out = sel.select(&[d.clone()], FRAME, i as f64 * DT);
            assert!(out.continuity > last);
            assert!(out.continuity <= 1.0);
            last = out.continuity;
        }
        let out = sel.select(&[], FRAME, 5.0 * DT);
        assert!(out.continuity < last);
    }
}
