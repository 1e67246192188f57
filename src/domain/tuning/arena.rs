use glam::DVec2;

/// Playable area and world-level timers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaTuning {
    pub min: DVec2,
    pub max: DVec2,

    /// Seconds a dead non-player entity stays in the world before removal.
    pub corpse_seconds: f64,
}

impl Default for ArenaTuning {
    fn default() -> Self {
        Self {
            min: DVec2::new(-400.0, -230.0),
            max: DVec2::new(400.0, 230.0),
            corpse_seconds: 5.0,
        }
    }
}

impl ArenaTuning {
    pub fn clamp(&self, position: DVec2) -> DVec2 {
        position.clamp(self.min, self.max)
    }

    pub fn contains(&self, position: DVec2) -> bool {
        position.cmpge(self.min).all() && position.cmple(self.max).all()
    }
}
