// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device registry: enumeration, stable ids and status polling.
//
// Device ids are derived from display names and must stay stable across
// refreshes, so jobs created before a refresh still resolve. Lookups accept
// ids produced by other normalisation passes (plain names, names with
// underscores, partial names) and walk a fixed fallback chain before giving
// up. Status is a live poll hidden behind a short TTL cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::config::RegistryConfig;
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{Device, DeviceStatus};

use crate::spooler::{HostStatus, Spooler, flags};

/// Derive a stable id from a display name: whitespace and underscores become
/// single `_` separators, other punctuation is dropped, the result is
/// lowercased and trimmed of separators.
///
/// `"HP LaserJet Pro (M404)"` becomes `"hp_laserjet_pro_m404"`.
pub fn normalize_device_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_whitespace() || c == '_' {
            pending_sep = !id.is_empty();
        } else if c.is_alphanumeric() {
            if pending_sep {
                id.push('_');
                pending_sep = false;
            }
            id.extend(c.to_lowercase());
        }
    }
    id
}

/// Map a status poll onto a device status. Precedence is fixed:
/// error, then offline, then paused, then busy (or queued work), then online.
pub fn classify(status: &HostStatus) -> DeviceStatus {
    if status.flags & flags::FAULT_MASK != 0 {
        DeviceStatus::Error
    } else if status.flags & flags::OFFLINE_MASK != 0 || status.work_offline {
        DeviceStatus::Offline
    } else if status.flags & flags::PAUSED != 0 {
        DeviceStatus::Paused
    } else if status.flags & (flags::BUSY | flags::PRINTING) != 0 || status.active_jobs > 0 {
        DeviceStatus::Busy
    } else {
        DeviceStatus::Online
    }
}

/// Detailed status of one device.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub device: Device,
    pub status: DeviceStatus,
    pub active_jobs: u32,
    pub flags: u32,
    pub message: String,
}

#[derive(Default)]
struct DeviceCache {
    devices: Vec<Device>,
    refreshed_at: Option<Instant>,
    /// Display name to id, kept across refreshes and never pruned.
    ids: HashMap<String, String>,
}

impl DeviceCache {
    /// The id of a display name. Assigned on first sight; an id is never
    /// handed to a second name, even after its device disappears.
    fn id_for(&mut self, name: &str) -> String {
        if let Some(id) = self.ids.get(name) {
            return id.clone();
        }
        let base = normalize_device_id(name);
        let base = if base.is_empty() {
            "device".to_string()
        } else {
            base
        };
        let mut id = base.clone();
        let mut n = 2;
        while self.ids.values().any(|taken| *taken == id) {
            id = format!("{base}_{n}");
            n += 1;
        }
        self.ids.insert(name.to_string(), id.clone());
        id
    }

    /// The id belonged to a device that is no longer enumerated.
    fn is_retired(&self, id: &str) -> bool {
        self.ids.values().any(|taken| taken == id) && !self.devices.iter().any(|d| d.id == id)
    }
}

#[derive(Clone, Copy)]
struct StatusEntry {
    status: DeviceStatus,
    host: Option<HostStatus>,
    polled_at: Instant,
}

/// Enumerates devices through a [`Spooler`] and answers status queries.
pub struct DeviceRegistry {
    spooler: Arc<dyn Spooler>,
    config: RegistryConfig,
    cache: Mutex<DeviceCache>,
    statuses: Mutex<HashMap<String, StatusEntry>>,
}

impl DeviceRegistry {
    pub fn new(spooler: Arc<dyn Spooler>, config: RegistryConfig) -> Self {
        Self {
            spooler,
            config,
            cache: Mutex::new(DeviceCache::default()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn spooler(&self) -> &Arc<dyn Spooler> {
        &self.spooler
    }

    /// Devices sorted default-first, then by name. Served from cache unless
    /// `force_refresh` or the cache has expired.
    #[instrument(skip(self))]
    pub async fn list_devices(&self, force_refresh: bool) -> Result<Vec<Device>> {
        if !force_refresh {
            let cache = self.cache.lock().expect("device cache lock poisoned");
            let fresh = cache
                .refreshed_at
                .is_some_and(|at| at.elapsed() < self.config.device_cache_ttl);
            if fresh {
                return Ok(cache.devices.clone());
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<Vec<Device>> {
        let host_devices = self.spooler.enumerate().await?;

        let mut cache = self.cache.lock().expect("device cache lock poisoned");
        let mut devices: Vec<Device> = Vec::with_capacity(host_devices.len());
        for host in host_devices {
            if devices.iter().any(|d| d.name == host.name) {
                debug!(name = %host.name, "duplicate device name ignored");
                continue;
            }
            devices.push(Device {
                id: cache.id_for(&host.name),
                name: host.name,
                is_default: host.is_default,
                capabilities: host.capabilities,
            });
        }
        devices.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));

        info!(count = devices.len(), "device list refreshed");
        cache.devices = devices.clone();
        cache.refreshed_at = Some(Instant::now());
        Ok(devices)
    }

    /// Resolve an id to a device.
    ///
    /// Tries, in order: the exact id, the exact id after a forced refresh,
    /// the id read as a display name (underscores for spaces, any case), the
    /// id re-normalised, and finally a substring match either way round.
    #[instrument(skip(self))]
    pub async fn get_device(&self, id: &str) -> Result<Device> {
        let devices = self.list_devices(false).await?;
        if let Some(device) = devices.iter().find(|d| d.id == id) {
            return Ok(device.clone());
        }

        let devices = self.list_devices(true).await?;
        if let Some(device) = devices.iter().find(|d| d.id == id) {
            return Ok(device.clone());
        }

        // A vanished device's id must not drift onto a look-alike.
        let retired = self
            .cache
            .lock()
            .expect("device cache lock poisoned")
            .is_retired(id);
        if retired {
            return Err(SpoolError::DeviceNotFound(format!("{id} is no longer present")));
        }

        let as_name = id.replace('_', " ");
        if let Some(device) = devices
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(&as_name) || d.name.eq_ignore_ascii_case(id))
        {
            debug!(id, device = %device.id, "resolved by display name");
            return Ok(device.clone());
        }

        let normalized = normalize_device_id(id);
        if !normalized.is_empty() {
            if let Some(device) = devices.iter().find(|d| d.id == normalized) {
                debug!(id, device = %device.id, "resolved by re-normalised id");
                return Ok(device.clone());
            }

            let lower_name = as_name.to_lowercase();
            if let Some(device) = devices.iter().find(|d| {
                let name = d.name.to_lowercase();
                name.contains(&lower_name)
                    || lower_name.contains(&name)
                    || d.id.contains(&normalized)
                    || normalized.contains(&d.id)
            }) {
                warn!(id, device = %device.id, "resolved by partial name match");
                return Ok(device.clone());
            }
        }

        Err(SpoolError::DeviceNotFound(id.to_string()))
    }

    /// Current status of a device, polled live unless a poll younger than
    /// the status TTL is cached. A poll that fails reports `Error`.
    pub async fn get_status(&self, id: &str) -> Result<DeviceStatus> {
        let device = self.get_device(id).await?;
        if let Some(entry) = self.cached_status(&device.id) {
            return Ok(entry.status);
        }
        Ok(self.poll_device(&device).await.status)
    }

    /// Poll a device bypassing the TTL cache.
    pub async fn poll(&self, device: &Device) -> Result<HostStatus> {
        let status = self.spooler.query(&device.name).await;
        self.record(device, status.as_ref().ok().copied());
        status
    }

    async fn poll_device(&self, device: &Device) -> StatusEntry {
        match self.spooler.query(&device.name).await {
            Ok(host) => self.record(device, Some(host)),
            Err(err) => {
                warn!(device = %device.id, error = %err, "status poll failed");
                self.record(device, None)
            }
        }
    }

    fn record(&self, device: &Device, host: Option<HostStatus>) -> StatusEntry {
        let entry = StatusEntry {
            status: host.as_ref().map_or(DeviceStatus::Error, classify),
            host,
            polled_at: Instant::now(),
        };
        self.statuses
            .lock()
            .expect("status cache lock poisoned")
            .insert(device.id.clone(), entry);
        entry
    }

    fn cached_status(&self, id: &str) -> Option<StatusEntry> {
        let statuses = self.statuses.lock().expect("status cache lock poisoned");
        statuses
            .get(id)
            .filter(|e| e.polled_at.elapsed() < self.config.status_ttl)
            .copied()
    }

    /// Drop a cached status so the next query polls.
    pub fn invalidate_status(&self, id: &str) {
        self.statuses
            .lock()
            .expect("status cache lock poisoned")
            .remove(id);
    }

    /// Status, queue depth and raw flags of a device, freshly polled.
    pub async fn status_report(&self, id: &str) -> Result<StatusReport> {
        let device = self.get_device(id).await?;
        let entry = self.poll_device(&device).await;
        let host = entry.host.unwrap_or_default();
        let message = match (entry.status, entry.host) {
            (DeviceStatus::Error, None) => "status query failed".to_string(),
            (DeviceStatus::Error, Some(_)) => "device reports a fault".to_string(),
            (DeviceStatus::Offline, _) => "device is offline".to_string(),
            (DeviceStatus::Paused, _) => "device is paused".to_string(),
            (DeviceStatus::Busy, _) => format!("{} job(s) in queue", host.active_jobs),
            (DeviceStatus::Online, _) => "ready".to_string(),
        };
        Ok(StatusReport {
            device,
            status: entry.status,
            active_jobs: host.active_jobs,
            flags: host.flags,
            message,
        })
    }
}
