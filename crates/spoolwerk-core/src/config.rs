// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.
//
// Durations are stored as integer milliseconds so the JSON file stays easy to
// edit by hand.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::StrategyKind;

/// Persistent application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub scheduler: SchedulerConfig,
    pub strategies: StrategyConfig,
    pub verification: VerificationConfig,
}

/// Device enumeration and status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long an enumeration stays valid.
    #[serde(with = "duration_ms")]
    pub device_cache_ttl: Duration,
    /// How long a polled status stays valid.
    #[serde(with = "duration_ms")]
    pub status_ttl: Duration,
    /// Device used when a submission names none.
    pub preferred_device: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            device_cache_ttl: Duration::from_secs(30),
            status_ttl: Duration::from_secs(2),
            preferred_device: None,
        }
    }
}

/// Worker loop behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long the worker blocks on an empty queue before re-checking for
    /// shutdown.
    #[serde(with = "duration_ms")]
    pub queue_poll_interval: Duration,
    /// Upper bound on waiting for a `Busy` device to come `Online`.
    #[serde(with = "duration_ms")]
    pub device_wait_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub device_wait_poll: Duration,
    pub default_max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_poll_interval: Duration::from_secs(1),
            device_wait_timeout: Duration::from_secs(30),
            device_wait_poll: Duration::from_secs(1),
            default_max_retries: crate::types::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Per-strategy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Strategies to run. They always run in canonical chain order,
    /// whatever order this list uses.
    pub enabled: Vec<StrategyKind>,
    #[serde(with = "duration_ms")]
    pub raster_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub renderer_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub shell_verb_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub raw_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub script_timeout: Duration,
    /// Resolution pages are rasterised at for the raster strategy.
    pub raster_dpi: u32,
    /// Resolution pages are rasterised at for the raw command stream.
    pub raw_dpi: u32,
    /// Widest bitmap row the raw channel accepts, in dots.
    pub raw_max_width_dots: u32,
    /// Rendering helper. `{device}` and `{file}` in the arguments are
    /// substituted per job.
    pub renderer_program: PathBuf,
    pub renderer_args: Vec<String>,
    /// Shell verb launcher. Same placeholders as the renderer.
    pub shell_verb_program: PathBuf,
    pub shell_verb_args: Vec<String>,
    /// Automation script, invoked as `<script> <file> <device>`.
    pub script_path: Option<PathBuf>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let (shell_verb_program, shell_verb_args) = default_shell_verb();
        Self {
            enabled: StrategyKind::chain().to_vec(),
            raster_timeout: Duration::from_secs(60),
            renderer_timeout: Duration::from_secs(30),
            shell_verb_timeout: Duration::from_secs(30),
            raw_timeout: Duration::from_secs(60),
            script_timeout: Duration::from_secs(30),
            raster_dpi: 150,
            raw_dpi: 200,
            raw_max_width_dots: 576,
            renderer_program: PathBuf::from("SumatraPDF"),
            renderer_args: vec![
                "-print-to".into(),
                "{device}".into(),
                "-silent".into(),
                "{file}".into(),
            ],
            shell_verb_program,
            shell_verb_args,
            script_path: None,
        }
    }
}

impl StrategyConfig {
    /// Per-attempt bound for a strategy.
    pub fn timeout_for(&self, kind: StrategyKind) -> Duration {
        match kind {
            StrategyKind::Raster => self.raster_timeout,
            StrategyKind::Renderer => self.renderer_timeout,
            StrategyKind::ShellVerb => self.shell_verb_timeout,
            StrategyKind::RawStream => self.raw_timeout,
            StrategyKind::Script => self.script_timeout,
        }
    }
}

#[cfg(windows)]
fn default_shell_verb() -> (PathBuf, Vec<String>) {
    (
        PathBuf::from("powershell"),
        vec![
            "-NoProfile".into(),
            "-Command".into(),
            "Start-Process -FilePath '{file}' -Verb Print -WindowStyle Hidden".into(),
        ],
    )
}

#[cfg(not(windows))]
fn default_shell_verb() -> (PathBuf, Vec<String>) {
    // CUPS has no print verb; `lp` is the closest equivalent.
    (
        PathBuf::from("lp"),
        vec!["-d".into(), "{device}".into(), "{file}".into()],
    )
}

/// How strategy outcomes are confirmed against the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// How long a submitted job has to show up in the device queue.
    #[serde(with = "duration_ms")]
    pub appear_timeout: Duration,
    /// How long the device queue has to drain back to its baseline.
    #[serde(with = "duration_ms")]
    pub drain_timeout: Duration,
    /// Quiet period for strategies that leave no queue trace.
    #[serde(with = "duration_ms")]
    pub blind_settle: Duration,
    /// Count a heuristic verification as success. When false, strategies
    /// without queue visibility can never complete a job.
    pub accept_heuristic: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            appear_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            blind_settle: Duration::from_secs(3),
            accept_heuristic: true,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_full_chain() {
        let config = AppConfig::default();
        assert_eq!(config.strategies.enabled, StrategyKind::chain());
        assert_eq!(config.strategies.raster_dpi, 150);
        assert_eq!(config.scheduler.default_max_retries, 3);
        assert!(config.verification.accept_heuristic);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"registry": {"status_ttl": 250}}"#).expect("parse config");
        assert_eq!(config.registry.status_ttl, Duration::from_millis(250));
        assert_eq!(config.registry.device_cache_ttl, Duration::from_secs(30));
        assert_eq!(config.strategies.raw_max_width_dots, 576);
    }

    #[test]
    fn durations_serialise_as_millis() {
        let json = serde_json::to_value(AppConfig::default()).expect("serialise");
        assert_eq!(json["verification"]["poll_interval"], 500);
    }
}
