// Frameworks layer: runtime bootstrap and settings.

pub mod config;
pub mod server;
