/// Gameplay tuning for projectiles.
#[derive(Debug, Clone, Copy)]
pub struct ProjectileTuning {
    /// Initial projectile speed in world units per second.
    pub speed: f64,

    /// Lifetime in seconds before the projectile is despawned.
    pub life_time: f64,

    /// World-space collision radius.
    pub radius: f64,

    /// Base damage before the target's defense is applied.
    pub damage: f64,

    /// Seconds between shots for one shooter.
    pub cooldown: f64,

    /// Slow applied to whatever a projectile hits.
    pub slow_seconds: f64,
    pub slow_fraction: f64,
}

impl Default for ProjectileTuning {
    fn default() -> Self {
        Self {
            speed: 400.0,
            life_time: 1.25,
            radius: 5.0,
            damage: 15.0,
            cooldown: 0.25,
            slow_seconds: 1.0,
            slow_fraction: 0.3,
        }
    }
}
