// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device selection with fallback.
//
// The preferred device wins when it is ready. Otherwise every other device is
// tried default-first, then by name. A relaxed pass may settle for a busy
// device; if it finds nothing, one strict pass runs against a freshly
// enumerated device list. Every device examined during a call is recorded and
// never offered again within that call.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use spoolwerk_core::types::{Device, DeviceStatus};

use crate::registry::DeviceRegistry;

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Selection {
    pub device: Device,
    /// Status observed when the device was chosen.
    pub status: DeviceStatus,
    /// True when the device is not the one the caller asked for.
    pub substituted: bool,
}

pub struct DeviceSelector {
    registry: Arc<DeviceRegistry>,
}

impl DeviceSelector {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Find a usable device for `preferred_id`.
    pub async fn resolve(&self, preferred_id: &str, allow_busy: bool) -> Option<Selection> {
        self.resolve_excluding(preferred_id, allow_busy, &[]).await
    }

    /// Like [`DeviceSelector::resolve`], but never returns a device in
    /// `excluded`, even the preferred one.
    #[instrument(skip(self))]
    pub async fn resolve_excluding(
        &self,
        preferred_id: &str,
        allow_busy: bool,
        excluded: &[&str],
    ) -> Option<Selection> {
        let mut rejected: HashSet<String> = excluded.iter().map(|id| id.to_string()).collect();

        let preferred = self.registry.get_device(preferred_id).await.ok();
        if let Some(device) = preferred.as_ref().filter(|d| rejected.contains(&d.id)) {
            debug!(device = %device.id, "preferred device excluded");
        } else if let Some(device) = &preferred {
            let status = self.status_of(device).await;
            if status == DeviceStatus::Online || (allow_busy && status == DeviceStatus::Busy) {
                debug!(device = %device.id, %status, "preferred device usable");
                return Some(Selection {
                    device: device.clone(),
                    status,
                    substituted: false,
                });
            }
            debug!(device = %device.id, %status, "preferred device not ready");
            rejected.insert(device.id.clone());
        } else {
            warn!(preferred_id, "preferred device not found, looking for a fallback");
        }

        let preferred_key = preferred.as_ref().map(|d| d.id.as_str());
        if let Some(selection) = self
            .scan(&mut rejected, allow_busy, false, preferred_key)
            .await
        {
            return Some(selection);
        }

        if allow_busy {
            debug!("relaxed pass found nothing, retrying strictly");
            if let Some(selection) = self.scan(&mut rejected, false, true, preferred_key).await {
                return Some(selection);
            }
        }

        warn!(preferred_id, "no usable device");
        None
    }

    /// One pass over all not-yet-rejected devices.
    async fn scan(
        &self,
        rejected: &mut HashSet<String>,
        allow_busy: bool,
        refresh: bool,
        preferred: Option<&str>,
    ) -> Option<Selection> {
        let devices = match self.registry.list_devices(refresh).await {
            Ok(devices) => devices,
            Err(err) => {
                warn!(error = %err, "device enumeration failed");
                return None;
            }
        };

        let mut first_busy: Option<(Device, DeviceStatus)> = None;
        for device in devices {
            if rejected.contains(&device.id) {
                continue;
            }
            let status = self.status_of(&device).await;
            rejected.insert(device.id.clone());
            match status {
                DeviceStatus::Online => {
                    return Some(self.chosen(device, status, preferred));
                }
                DeviceStatus::Busy if allow_busy && first_busy.is_none() => {
                    first_busy = Some((device, status));
                }
                _ => debug!(device = %device.id, %status, "skipping device"),
            }
        }
        first_busy.map(|(device, status)| self.chosen(device, status, preferred))
    }

    fn chosen(&self, device: Device, status: DeviceStatus, preferred: Option<&str>) -> Selection {
        let substituted = preferred != Some(device.id.as_str());
        if substituted {
            info!(device = %device.id, %status, "fallback device selected");
        }
        Selection {
            device,
            status,
            substituted,
        }
    }

    async fn status_of(&self, device: &Device) -> DeviceStatus {
        self.registry
            .get_status(&device.id)
            .await
            .unwrap_or(DeviceStatus::Error)
    }
}
