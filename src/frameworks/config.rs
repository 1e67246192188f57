use crate::domain::content::{GenerationParams, ParamsError};
use crate::domain::lag_compensation::{DEFAULT_WINDOW_SECONDS, MissPolicy};
use crate::use_cases::{GameConfig, LobbySettings};
use serde::Deserialize;
use std::{env, fmt, net::IpAddr, path::PathBuf, str::FromStr, time::Duration};

// Runtime/server settings (not gameplay tuning).

pub const CONFIG_PATH_ENV: &str = "ARENA_CONFIG";

pub const INPUT_CHANNEL_CAPACITY: usize = 1024;
pub const WORLD_BROADCAST_CAPACITY: usize = 128;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_address: IpAddr,
    pub http_port: u16,
    /// Pinned lobby clients land in when they name none.
    pub default_lobby_id: String,
    pub tick_rate_hz: u32,
    /// Zero disables match end.
    pub match_time_limit_secs: u64,
    pub countdown_seconds: u32,
    pub world_seed: i64,
    pub generation: GenerationParams,
    pub snapshot_history: usize,
    pub snapshot_every: u64,
    pub lag_window_secs: f64,
    pub miss_policy: MissPolicy,
    pub max_buffered_inputs: usize,
    /// Sent snapshots kept per connection as delta baselines.
    pub delta_history: usize,
    pub input_channel_capacity: usize,
    pub world_broadcast_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            http_port: 3001,
            default_lobby_id: "test".to_string(),
            tick_rate_hz: 60,
            match_time_limit_secs: 600,
            countdown_seconds: 3,
            world_seed: 42,
            generation: GenerationParams::default(),
            snapshot_history: 120,
            snapshot_every: 1,
            lag_window_secs: DEFAULT_WINDOW_SECONDS,
            miss_policy: MissPolicy::default(),
            max_buffered_inputs: 64,
            delta_history: 64,
            input_channel_capacity: INPUT_CHANNEL_CAPACITY,
            world_broadcast_capacity: WORLD_BROADCAST_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidEnv {
        key: &'static str,
        value: String,
    },
    Generation(ParamsError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {source}", path.display())
            }
            ConfigError::InvalidEnv { key, value } => write!(f, "invalid {key}={value:?}"),
            ConfigError::Generation(err) => write!(f, "invalid [generation]: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Generation(err) => Some(err),
            ConfigError::InvalidEnv { .. } => None,
        }
    }
}

fn env_override<T: FromStr>(key: &'static str, slot: &mut T) -> Result<(), ConfigError> {
    let Ok(value) = env::var(key) else {
        return Ok(());
    };
    *slot = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })?;
    Ok(())
}

impl Settings {
    /// Defaults, then the TOML file named by `ARENA_CONFIG`, then env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        settings.apply_env()?;
        settings
            .generation
            .validate()
            .map_err(ConfigError::Generation)?;
        Ok(settings)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("GAME_SERVER_PORT", &mut self.http_port)?;
        env_override("GAME_SERVER_BIND", &mut self.bind_address)?;
        env_override("ARENA_DEFAULT_LOBBY", &mut self.default_lobby_id)?;
        env_override("ARENA_TICK_RATE", &mut self.tick_rate_hz)?;
        env_override("ARENA_MATCH_TIME_LIMIT_SECS", &mut self.match_time_limit_secs)?;
        env_override("ARENA_WORLD_SEED", &mut self.world_seed)?;
        env_override("ARENA_LAG_WINDOW_SECS", &mut self.lag_window_secs)?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate_hz.clamp(1, 1000)))
    }

    pub fn game_config(&self) -> GameConfig {
        GameConfig {
            tick_interval: self.tick_interval(),
            match_time_limit: Duration::from_secs(self.match_time_limit_secs),
            countdown_seconds: self.countdown_seconds,
            seed: self.world_seed,
            params: self.generation.clone(),
            snapshot_history: self.snapshot_history,
            snapshot_every: self.snapshot_every,
            lag_window: self.lag_window_secs,
            miss_policy: self.miss_policy,
            max_buffered_inputs: self.max_buffered_inputs,
            ..GameConfig::default()
        }
    }

    pub fn lobby_settings(&self) -> LobbySettings {
        LobbySettings {
            input_channel_capacity: self.input_channel_capacity,
            world_broadcast_capacity: self.world_broadcast_capacity,
            game: self.game_config(),
        }
    }
}

pub fn http_port() -> u16 {
    env::var("GAME_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Settings::default().http_port)
}
