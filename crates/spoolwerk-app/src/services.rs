// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: loads configuration, picks a host spooler and wires the
// registry, delivery chain and job queue together for the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use spoolwerk_core::AppConfig;
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_print::{DeviceRegistry, ExecutionChain, JobQueue, SimulatedSpooler, Spooler};
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.json";

pub struct AppServices {
    pub config: AppConfig,
    pub registry: Arc<DeviceRegistry>,
    pub queue: JobQueue,
    config_dir: PathBuf,
}

impl AppServices {
    /// Build every service. Must run inside the Tokio runtime.
    pub fn init(config_dir: &Path, simulate: bool) -> Result<Self> {
        info!(path = %config_dir.display(), simulate, "initialising services");
        let config = load_config(config_dir).unwrap_or_default();

        let spooler = host_spooler(simulate)?;
        let registry = Arc::new(DeviceRegistry::new(spooler, config.registry.clone()));
        let chain = ExecutionChain::standard(
            registry.clone(),
            config.strategies.clone(),
            config.verification.clone(),
        );
        let queue = JobQueue::start(registry.clone(), chain, config.scheduler.clone())?;

        Ok(Self {
            config,
            registry,
            queue,
            config_dir: config_dir.to_path_buf(),
        })
    }

    /// Write the effective configuration back to disk.
    pub fn save_config(&self) -> Result<PathBuf> {
        persist_config(&self.config_dir, &self.config)
    }

    /// Device to use when the caller names none: the configured preference,
    /// else the host default, else the first device.
    pub async fn default_device_id(&self) -> Result<String> {
        if let Some(preferred) = &self.config.registry.preferred_device {
            return Ok(preferred.clone());
        }
        let devices = self.registry.list_devices(false).await?;
        devices
            .into_iter()
            .next()
            .map(|d| d.id)
            .ok_or_else(|| SpoolError::DeviceNotFound("the host reports no devices".into()))
    }
}

fn host_spooler(simulate: bool) -> Result<Arc<dyn Spooler>> {
    if simulate {
        warn!("using the simulated spooler; nothing will reach paper");
        return Ok(Arc::new(SimulatedSpooler::demo()));
    }
    #[cfg(unix)]
    {
        Ok(Arc::new(spoolwerk_print::CupsSpooler::new()))
    }
    #[cfg(not(unix))]
    {
        Err(SpoolError::Host(
            "no host spooler backend for this platform; run with --simulate".into(),
        ))
    }
}

fn load_config(config_dir: &Path) -> Option<AppConfig> {
    let path = config_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            None
        }
    }
}

fn persist_config(config_dir: &Path, config: &AppConfig) -> Result<PathBuf> {
    std::fs::create_dir_all(config_dir)?;
    let path = config_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(path)
}
