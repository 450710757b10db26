//! Animated geometry changes.
//!
//! A map's geo vertices either rest (`Idle`) or move linearly from `from` to
//! `to` over `duration`. Restarting mid-way starts from where the mesh
//! currently is, so the geometry never jumps.

use crate::core::geo::Point;
use instant::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionState {
    Idle,
    Transitioning {
        start: Instant,
        duration: Duration,
        from: Vec<Point>,
        to: Vec<Point>,
    },
}

impl TransitionState {
    /// Progress in `[0, 1]`; 1 when idle
    pub fn factor(&self, now: Instant) -> f64 {
        match self {
            Self::Idle => 1.0,
            Self::Transitioning {
                start, duration, ..
            } => {
                if duration.is_zero() {
                    return 1.0;
                }
                let elapsed = now.saturating_duration_since(*start);
                (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Transitioning { .. })
    }
}

/// Geo vertices of one map together with their transition state
#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedGeometry {
    resting: Vec<Point>,
    state: TransitionState,
}

impl AnimatedGeometry {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self {
            resting: vertices,
            state: TransitionState::Idle,
        }
    }

    pub fn state(&self) -> &TransitionState {
        &self.state
    }

    pub fn is_transitioning(&self) -> bool {
        self.state.is_active()
    }

    /// Geometry the transition is heading to (the resting one when idle)
    pub fn target(&self) -> &[Point] {
        match &self.state {
            TransitionState::Idle => &self.resting,
            TransitionState::Transitioning { to, .. } => to,
        }
    }

    /// Interpolated geometry at `now`
    pub fn at(&self, now: Instant) -> Vec<Point> {
        match &self.state {
            TransitionState::Idle => self.resting.clone(),
            TransitionState::Transitioning { from, to, .. } => {
                let t = self.state.factor(now);
                from.iter().zip(to).map(|(a, b)| a.lerp(b, t)).collect()
            }
        }
    }

    /// Moves towards `target` over `duration`.
    ///
    /// Falls back to [`commit`](Self::commit) when the vertex count changes or
    /// the duration is zero.
    pub fn start(&mut self, target: Vec<Point>, now: Instant, duration: Duration) {
        let from = self.at(now);
        if duration.is_zero() || from.len() != target.len() {
            self.commit(target);
            return;
        }

        self.state = TransitionState::Transitioning {
            start: now,
            duration,
            from,
            to: target,
        };
    }

    /// Replaces the geometry immediately, cancelling any transition
    pub fn commit(&mut self, target: Vec<Point>) {
        self.resting = target;
        self.state = TransitionState::Idle;
    }

    /// Settles a finished transition. Returns true when one just finished.
    pub fn advance(&mut self, now: Instant) -> bool {
        if !self.state.is_active() || self.state.factor(now) < 1.0 {
            return false;
        }
        if let TransitionState::Transitioning { to, .. } =
            std::mem::replace(&mut self.state, TransitionState::Idle)
        {
            self.resting = to;
        }
        true
    }
}
