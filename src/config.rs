use crate::capture::{CaptureConstraints, ListenerSettings};
use crate::conversation::CoreSettings;
use crate::leadership::LeadershipSettings;
use crate::recovery::RecoverySettings;
use crate::turn::TurnSettings;
use crate::vad::{EscalationSettings, VadSettings};
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub authority: AuthorityConfig,
    pub turn: TurnSettings,
    pub vad: VadSettings,
    pub escalation: EscalationSettings,
    pub leadership: LeadershipSettings,
    pub recovery: RecoverySettings,
    pub capture: CaptureConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "mediator-core".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// NATS server; in-memory authority when unset
    pub nats_url: Option<String>,
    /// Stable id for this client; a fresh one per run when unset
    pub client_id: Option<String>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            nats_url: Some("nats://localhost:4222".to_string()),
            client_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Length of each forwarded audio segment
    pub chunk_duration_ms: u64,
    /// Detector cadence when no frames arrive
    pub tick_interval_ms: u64,
    pub constraints: CaptureConstraints,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 1000,
            tick_interval_ms: 100,
            constraints: CaptureConstraints::default(),
        }
    }
}

impl Config {
    /// Load from a config file (extension optional, as the `config` crate resolves it)
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid config {}", path))
    }

    /// Settings for the conversation core
    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            turn: self.turn.clone(),
            listener: ListenerSettings {
                vad: self.vad.clone(),
                escalation: self.escalation.clone(),
                constraints: self.capture.constraints,
                tick_interval_ms: self.capture.tick_interval_ms,
            },
            leadership: self.leadership.clone(),
            recovery: self.recovery.clone(),
            chunk_duration_ms: self.capture.chunk_duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::VadStrategy;
    use std::io::Write;

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediator.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[service.http]
port = 4000

[vad]
strategy = "classifier"
silence_threshold_ms = 1500

[leadership]
profile_id = "laptop"
"#
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.service.http.port, 4000);
        assert_eq!(config.service.http.bind, "127.0.0.1");
        assert_eq!(config.vad.strategy, VadStrategy::Classifier);
        assert_eq!(config.vad.silence_threshold_ms, 1500);
        assert_eq!(config.vad.min_speaking_duration_ms, 3000);
        assert_eq!(config.leadership.profile_id, "laptop");
        assert_eq!(config.leadership.debounce_ms, 50);
        assert_eq!(config.recovery.window_hours, 24);

        let core = config.core_settings();
        assert_eq!(core.listener.vad.silence_threshold_ms, 1500);
        assert_eq!(core.chunk_duration_ms, 1000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/mediator-core").is_err());
    }
}
