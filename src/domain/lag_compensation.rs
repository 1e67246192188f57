// Server-side rewind of entity positions for fair hit validation.
//
// All timestamps here are server clock values. A client only ever echoes the
// timestamp of a snapshot it received; its own clock is never consulted.

use crate::domain::ecs::EntityId;
use crate::domain::snapshot::Snapshot;
use glam::DVec2;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};

pub const DEFAULT_WINDOW_SECONDS: f64 = 1.0;

/// What to do when a rewind lands outside the retained history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Refuse the hit claim.
    #[default]
    Reject,
    /// Validate against the target's current position instead.
    CurrentPosition,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitValidation {
    Confirmed { position: DVec2 },
    OutOfRange { position: DVec2, distance: f64 },
    NotInWindow,
}

/// Where `t` falls in a time-ordered sample list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Sample {
    Empty,
    BeforeOldest(DVec2),
    At(DVec2),
    AfterNewest(DVec2),
}

/// Linear interpolation over `(timestamp, position)` samples sorted by time.
pub(crate) fn sample_at(samples: &VecDeque<(f64, DVec2)>, t: f64) -> Sample {
    let (Some(&(oldest_t, oldest)), Some(&(newest_t, newest))) = (samples.front(), samples.back())
    else {
        return Sample::Empty;
    };
    if t < oldest_t {
        return Sample::BeforeOldest(oldest);
    }
    if t > newest_t {
        return Sample::AfterNewest(newest);
    }

    // First sample strictly after t; its predecessor is at or before t.
    let upper = samples.partition_point(|&(ts, _)| ts <= t);
    let (t0, p0) = samples[upper - 1];
    if t0 == t || upper == samples.len() {
        return Sample::At(p0);
    }
    let (t1, p1) = samples[upper];
    let w = (t - t0) / (t1 - t0);
    Sample::At(DVec2::new(p0.x + (p1.x - p0.x) * w, p0.y + (p1.y - p0.y) * w))
}

pub struct LagCompensator {
    window: f64,
    policy: MissPolicy,
    history: BTreeMap<EntityId, VecDeque<(f64, DVec2)>>,
    newest: Option<f64>,
}

impl LagCompensator {
    pub fn new(window: f64, policy: MissPolicy) -> Self {
        Self {
            window: window.max(0.0),
            policy,
            history: BTreeMap::new(),
            newest: None,
        }
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn policy(&self) -> MissPolicy {
        self.policy
    }

    /// Appends every entity in the snapshot to its history and drops samples
    /// that fell out of the window. Out-of-order snapshots are ignored.
    pub fn record_snapshot(&mut self, snapshot: &Snapshot) {
        if self.newest.is_some_and(|newest| snapshot.timestamp <= newest) {
            return;
        }
        self.newest = Some(snapshot.timestamp);

        for state in &snapshot.entities {
            self.history
                .entry(state.id)
                .or_default()
                .push_back((snapshot.timestamp, state.position));
        }

        let horizon = snapshot.timestamp - self.window;
        self.history.retain(|_, samples| {
            while samples.front().is_some_and(|&(t, _)| t < horizon) {
                samples.pop_front();
            }
            !samples.is_empty()
        });
    }

    /// Position of `id` at server time `timestamp`, or `None` when the entity
    /// is unknown or `timestamp` predates the retained history.
    pub fn historical_position(&self, id: EntityId, timestamp: f64) -> Option<DVec2> {
        match sample_at(self.history.get(&id)?, timestamp) {
            Sample::At(p) | Sample::AfterNewest(p) => Some(p),
            Sample::BeforeOldest(_) | Sample::Empty => None,
        }
    }

    /// Clamps a client-echoed view timestamp into `[now - window, now]`.
    pub fn rewind_time(&self, view_timestamp: f64, now: f64) -> f64 {
        if !view_timestamp.is_finite() {
            return now;
        }
        view_timestamp.clamp(now - self.window, now)
    }

    /// Rewound target position under the configured miss policy.
    pub fn resolve_target(
        &self,
        target: EntityId,
        view_timestamp: f64,
        now: f64,
        live_position: Option<DVec2>,
    ) -> Option<DVec2> {
        let t = self.rewind_time(view_timestamp, now);
        match (self.historical_position(target, t), self.policy) {
            (Some(p), _) => Some(p),
            (None, MissPolicy::CurrentPosition) => live_position,
            (None, MissPolicy::Reject) => None,
        }
    }

    pub fn validate_hit(
        &self,
        shooter: DVec2,
        target: EntityId,
        view_timestamp: f64,
        now: f64,
        range: f64,
        live_position: Option<DVec2>,
    ) -> HitValidation {
        let Some(position) = self.resolve_target(target, view_timestamp, now, live_position) else {
            return HitValidation::NotInWindow;
        };
        let distance = shooter.distance(position);
        if distance <= range {
            HitValidation::Confirmed { position }
        } else {
            HitValidation::OutOfRange { position, distance }
        }
    }

    pub fn tracked_entities(&self) -> usize {
        self.history.len()
    }
}

impl Default for LagCompensator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECONDS, MissPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::EntityState;

    fn snapshot(tick: u64, timestamp: f64, entities: &[(u64, DVec2)]) -> Snapshot {
        Snapshot {
            tick,
            timestamp,
            entities: entities
                .iter()
                .map(|&(id, position)| EntityState {
                    id: EntityId(id),
                    position,
                    velocity: DVec2::ZERO,
                    health: None,
                    dead: false,
                })
                .collect(),
        }
    }

    #[test]
    fn when_querying_midpoint_then_position_is_midpoint() {
        let mut lag = LagCompensator::default();
        lag.record_snapshot(&snapshot(1, 2.0, &[(1, DVec2::new(0.0, 10.0))]));
        lag.record_snapshot(&snapshot(2, 2.5, &[(1, DVec2::new(20.0, -4.0))]));

        let mid = lag.historical_position(EntityId(1), 2.25).expect("in window");
        assert!((mid - DVec2::new(10.0, 3.0)).length() < 1e-9);
    }

    #[test]
    fn exact_and_newer_timestamps_return_recorded_samples() {
        let mut lag = LagCompensator::default();
        lag.record_snapshot(&snapshot(1, 1.0, &[(1, DVec2::ZERO)]));
        lag.record_snapshot(&snapshot(2, 1.1, &[(1, DVec2::X)]));

        assert_eq!(lag.historical_position(EntityId(1), 1.0), Some(DVec2::ZERO));
        assert_eq!(lag.historical_position(EntityId(1), 1.1), Some(DVec2::X));
        assert_eq!(lag.historical_position(EntityId(1), 5.0), Some(DVec2::X));
        assert_eq!(lag.historical_position(EntityId(2), 1.0), None);
    }

    #[test]
    fn when_timestamp_is_older_than_window_then_lookup_misses() {
        let mut lag = LagCompensator::new(1.0, MissPolicy::Reject);
        for step in 0..30 {
            let t = f64::from(step) * 0.1;
            lag.record_snapshot(&snapshot(step as u64, t, &[(1, DVec2::new(t, 0.0))]));
        }

        assert_eq!(lag.historical_position(EntityId(1), 1.0), None);
        assert!(lag.historical_position(EntityId(1), 2.5).is_some());
    }

    #[test]
    fn entities_missing_from_recent_snapshots_age_out() {
        let mut lag = LagCompensator::new(0.5, MissPolicy::Reject);
        lag.record_snapshot(&snapshot(1, 0.0, &[(1, DVec2::ZERO), (2, DVec2::ZERO)]));
        lag.record_snapshot(&snapshot(2, 1.0, &[(1, DVec2::ZERO)]));

        assert_eq!(lag.tracked_entities(), 1);
    }

    #[test]
    fn rewind_time_is_clamped_to_window() {
        let lag = LagCompensator::new(1.0, MissPolicy::Reject);
        assert_eq!(lag.rewind_time(3.0, 10.0), 9.0);
        assert_eq!(lag.rewind_time(12.0, 10.0), 10.0);
        assert_eq!(lag.rewind_time(9.5, 10.0), 9.5);
        assert_eq!(lag.rewind_time(f64::NAN, 10.0), 10.0);
    }

    #[test]
    fn when_claim_is_outside_history_then_policy_decides() {
        let mut reject = LagCompensator::new(1.0, MissPolicy::Reject);
        let mut fallback = LagCompensator::new(1.0, MissPolicy::CurrentPosition);
        for lag in [&mut reject, &mut fallback] {
            lag.record_snapshot(&snapshot(1, 9.8, &[(1, DVec2::new(5.0, 0.0))]));
        }
        let live = Some(DVec2::new(6.0, 0.0));

        assert_eq!(
            reject.validate_hit(DVec2::ZERO, EntityId(1), 9.0, 10.0, 10.0, live),
            HitValidation::NotInWindow
        );
        assert_eq!(
            fallback.validate_hit(DVec2::ZERO, EntityId(1), 9.0, 10.0, 10.0, live),
            HitValidation::Confirmed {
                position: DVec2::new(6.0, 0.0)
            }
        );
    }

    #[test]
    fn validate_hit_uses_rewound_position_for_range() {
        let mut lag = LagCompensator::default();
        lag.record_snapshot(&snapshot(1, 9.5, &[(1, DVec2::new(10.0, 0.0))]));
        lag.record_snapshot(&snapshot(2, 10.0, &[(1, DVec2::new(100.0, 0.0))]));

        assert_eq!(
            lag.validate_hit(DVec2::ZERO, EntityId(1), 9.5, 10.0, 20.0, None),
            HitValidation::Confirmed {
                position: DVec2::new(10.0, 0.0)
            }
        );
        assert!(matches!(
            lag.validate_hit(DVec2::ZERO, EntityId(1), 10.0, 10.0, 20.0, None),
            HitValidation::OutOfRange { distance, .. } if (distance - 100.0).abs() < 1e-9
        ));
    }
}
