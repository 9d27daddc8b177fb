// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process simulated spooler.
//
// Devices are scripted: their status bits, whether each channel accepts,
// swallows or rejects work, and how many status polls a queued job takes to
// drain. Used by the test suites and by `spoolwerk --simulate`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use image::DynamicImage;
use tracing::debug;

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::DeviceCapabilities;
use spoolwerk_document::{PageGeometry, Rect};

use crate::spooler::{DevMode, DeviceSettings, DocHandle, HostDevice, HostStatus, Spooler};

/// What a channel does with work handed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// The job shows up in the device queue and later drains.
    Print,
    /// The call succeeds but nothing reaches the queue.
    Swallow,
    /// The call fails.
    Reject,
}

/// Delivery channels of the simulated host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Document,
    Raw,
}

#[derive(Debug)]
struct SimDevice {
    host: HostDevice,
    flags: u32,
    work_offline: bool,
    queue: u32,
    polls_since_drain: u32,
    drain_polls: u32,
    /// Remaining polls that report the device busy.
    busy_polls: u32,
    /// Flags that replace the current ones after the given number of polls.
    pending_flags: Option<(u32, u32)>,
    query_fails: bool,
    document: Acceptance,
    raw: Acceptance,
    settings: DeviceSettings,
    applied: Vec<DevMode>,
    pages_drawn: u32,
    raw_bytes: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct OpenDoc {
    device: String,
    pages: u32,
}

/// A scriptable in-memory spooler.
#[derive(Debug, Default)]
pub struct SimulatedSpooler {
    devices: Mutex<Vec<SimDevice>>,
    docs: Mutex<HashMap<u64, OpenDoc>>,
    next_doc: AtomicU64,
}

impl SimulatedSpooler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two devices: a default colour laser and a monochrome receipt printer.
    pub fn demo() -> Self {
        let sim = Self::new();
        sim.add_device("Office Laser (Floor 2)", true);
        sim.add_device_with(
            "Receipt Printer 80mm",
            false,
            DeviceCapabilities {
                color: false,
                duplex: false,
                paper_sizes: Vec::new(),
            },
        );
        sim
    }

    pub fn add_device(&self, name: &str, is_default: bool) {
        self.add_device_with(
            name,
            is_default,
            DeviceCapabilities {
                color: true,
                duplex: true,
                paper_sizes: Vec::new(),
            },
        );
    }

    pub fn add_device_with(&self, name: &str, is_default: bool, capabilities: DeviceCapabilities) {
        let mut devices = self.devices.lock().expect("sim devices lock poisoned");
        devices.retain(|d| d.host.name != name);
        devices.push(SimDevice {
            host: HostDevice {
                name: name.to_string(),
                is_default,
                capabilities,
            },
            flags: 0,
            work_offline: false,
            queue: 0,
            polls_since_drain: 0,
            drain_polls: 2,
            busy_polls: 0,
            pending_flags: None,
            query_fails: false,
            document: Acceptance::Print,
            raw: Acceptance::Print,
            settings: DeviceSettings::default(),
            applied: Vec::new(),
            pages_drawn: 0,
            raw_bytes: Vec::new(),
        });
    }

    pub fn remove_device(&self, name: &str) {
        self.devices
            .lock()
            .expect("sim devices lock poisoned")
            .retain(|d| d.host.name != name);
    }

    /// Replace a device's status bits.
    pub fn set_flags(&self, name: &str, flags: u32) {
        self.with_device(name, |d| d.flags = flags);
    }

    pub fn set_work_offline(&self, name: &str, offline: bool) {
        self.with_device(name, |d| d.work_offline = offline);
    }

    /// Report the device busy for the next `polls` status queries.
    pub fn set_busy_for_polls(&self, name: &str, polls: u32) {
        self.with_device(name, |d| d.busy_polls = polls);
    }

    /// Keep the current flags for the next `polls` status queries, then
    /// switch to `flags`.
    pub fn set_flags_after_polls(&self, name: &str, polls: u32, flags: u32) {
        self.with_device(name, |d| d.pending_flags = Some((polls, flags)));
    }

    /// Make status queries fail outright.
    pub fn set_query_fails(&self, name: &str, fails: bool) {
        self.with_device(name, |d| d.query_fails = fails);
    }

    pub fn set_acceptance(&self, name: &str, channel: Channel, acceptance: Acceptance) {
        self.with_device(name, |d| match channel {
            Channel::Document => d.document = acceptance,
            Channel::Raw => d.raw = acceptance,
        });
    }

    /// Status polls a queued job survives before leaving the queue.
    pub fn set_drain_polls(&self, name: &str, polls: u32) {
        self.with_device(name, |d| d.drain_polls = polls.max(1));
    }

    /// Put a job into the device queue from outside the spooler, the way an
    /// external application printing to the device would.
    pub fn inject_job(&self, name: &str) {
        self.with_device(name, |d| d.queue += 1);
    }

    pub fn queue_len(&self, name: &str) -> u32 {
        self.read_device(name, |d| d.queue).unwrap_or(0)
    }

    pub fn pages_drawn(&self, name: &str) -> u32 {
        self.read_device(name, |d| d.pages_drawn).unwrap_or(0)
    }

    pub fn raw_jobs(&self, name: &str) -> Vec<Vec<u8>> {
        self.read_device(name, |d| d.raw_bytes.clone())
            .unwrap_or_default()
    }

    /// Every settings block applied to the device, oldest first.
    pub fn applied_settings(&self, name: &str) -> Vec<DevMode> {
        self.read_device(name, |d| d.applied.clone())
            .unwrap_or_default()
    }

    pub fn current_settings(&self, name: &str) -> Option<DeviceSettings> {
        self.read_device(name, |d| d.settings.clone())
    }

    fn with_device(&self, name: &str, f: impl FnOnce(&mut SimDevice)) {
        let mut devices = self.devices.lock().expect("sim devices lock poisoned");
        if let Some(device) = devices.iter_mut().find(|d| d.host.name == name) {
            f(device);
        }
    }

    fn read_device<T>(&self, name: &str, f: impl FnOnce(&SimDevice) -> T) -> Option<T> {
        let devices = self.devices.lock().expect("sim devices lock poisoned");
        devices.iter().find(|d| d.host.name == name).map(f)
    }

    fn try_device<T>(&self, name: &str, f: impl FnOnce(&mut SimDevice) -> Result<T>) -> Result<T> {
        let mut devices = self.devices.lock().expect("sim devices lock poisoned");
        let device = devices
            .iter_mut()
            .find(|d| d.host.name == name)
            .ok_or_else(|| SpoolError::Host(format!("no such device: {name}")))?;
        f(device)
    }

    fn submit(device: &mut SimDevice, acceptance: Acceptance) -> Result<()> {
        match acceptance {
            Acceptance::Print => {
                device.queue += 1;
                Ok(())
            }
            Acceptance::Swallow => Ok(()),
            Acceptance::Reject => Err(SpoolError::Host(format!(
                "{} rejected the job",
                device.host.name
            ))),
        }
    }
}

#[async_trait]
impl Spooler for SimulatedSpooler {
    async fn enumerate(&self) -> Result<Vec<HostDevice>> {
        let devices = self.devices.lock().expect("sim devices lock poisoned");
        Ok(devices.iter().map(|d| d.host.clone()).collect())
    }

    async fn query(&self, name: &str) -> Result<HostStatus> {
        self.try_device(name, |d| {
            if d.query_fails {
                return Err(SpoolError::Host(format!("cannot open {name}")));
            }
            match d.pending_flags {
                Some((0, next)) => {
                    d.flags = next;
                    d.pending_flags = None;
                }
                Some((remaining, next)) => d.pending_flags = Some((remaining - 1, next)),
                None => {}
            }
            if d.queue > 0 {
                d.polls_since_drain += 1;
                if d.polls_since_drain >= d.drain_polls {
                    d.queue -= 1;
                    d.polls_since_drain = 0;
                }
            }
            let mut flags = d.flags;
            if d.busy_polls > 0 {
                d.busy_polls -= 1;
                flags |= crate::spooler::flags::BUSY;
            }
            Ok(HostStatus {
                flags,
                active_jobs: d.queue,
                work_offline: d.work_offline,
            })
        })
    }

    async fn capture_settings(&self, name: &str) -> Result<DeviceSettings> {
        self.try_device(name, |d| Ok(d.settings.clone()))
    }

    async fn apply_settings(&self, name: &str, settings: &DeviceSettings) -> Result<()> {
        self.try_device(name, |d| {
            d.applied.push(settings.devmode());
            d.settings = settings.clone();
            Ok(())
        })
    }

    async fn start_document(&self, name: &str, title: &str) -> Result<DocHandle> {
        self.try_device(name, |d| {
            if d.document == Acceptance::Reject {
                return Err(SpoolError::Host(format!("{name}: StartDoc refused")));
            }
            Ok(())
        })?;
        let id = self.next_doc.fetch_add(1, Ordering::Relaxed);
        self.docs.lock().expect("sim docs lock poisoned").insert(
            id,
            OpenDoc {
                device: name.to_string(),
                pages: 0,
            },
        );
        debug!(device = name, title, doc = id, "simulated document started");
        Ok(DocHandle {
            id,
            device: name.to_string(),
            title: title.to_string(),
        })
    }

    async fn draw_page(
        &self,
        doc: &DocHandle,
        _page: &DynamicImage,
        _geometry: &PageGeometry,
        _placement: &Rect,
    ) -> Result<()> {
        let mut docs = self.docs.lock().expect("sim docs lock poisoned");
        let open = docs
            .get_mut(&doc.id)
            .ok_or_else(|| SpoolError::Host(format!("document {} is not open", doc.id)))?;
        open.pages += 1;
        Ok(())
    }

    async fn end_document(&self, doc: DocHandle) -> Result<()> {
        let open = self
            .docs
            .lock()
            .expect("sim docs lock poisoned")
            .remove(&doc.id)
            .ok_or_else(|| SpoolError::Host(format!("document {} is not open", doc.id)))?;
        self.try_device(&open.device, |d| {
            d.pages_drawn += open.pages;
            let acceptance = d.document;
            Self::submit(d, acceptance)
        })
    }

    async fn abort_document(&self, doc: DocHandle) {
        self.docs
            .lock()
            .expect("sim docs lock poisoned")
            .remove(&doc.id);
    }

    async fn write_raw(&self, name: &str, _title: &str, data: &[u8]) -> Result<()> {
        self.try_device(name, |d| {
            let acceptance = d.raw;
            let result = Self::submit(d, acceptance);
            if result.is_ok() {
                d.raw_bytes.push(data.to_vec());
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spooler::flags;

    #[tokio::test]
    async fn queued_job_drains_after_polls() {
        let sim = SimulatedSpooler::new();
        sim.add_device("P", true);
        sim.set_drain_polls("P", 2);
        sim.write_raw("P", "t", b"abc").await.expect("write");
        assert_eq!(sim.queue_len("P"), 1);

        let first = sim.query("P").await.expect("query");
        assert_eq!(first.active_jobs, 1);
        let second = sim.query("P").await.expect("query");
        assert_eq!(second.active_jobs, 0);
    }

    #[tokio::test]
    async fn swallowing_channel_leaves_queue_empty() {
        let sim = SimulatedSpooler::new();
        sim.add_device("P", true);
        sim.set_acceptance("P", Channel::Document, Acceptance::Swallow);
        let doc = sim.start_document("P", "t").await.expect("start");
        sim.end_document(doc).await.expect("end");
        assert_eq!(sim.queue_len("P"), 0);
    }

    #[tokio::test]
    async fn busy_polls_count_down() {
        let sim = SimulatedSpooler::new();
        sim.add_device("P", true);
        sim.set_busy_for_polls("P", 1);
        let busy = sim.query("P").await.expect("query");
        assert_ne!(busy.flags & flags::BUSY, 0);
        let idle = sim.query("P").await.expect("query");
        assert_eq!(idle.flags & flags::BUSY, 0);
    }

    #[tokio::test]
    async fn scheduled_flags_apply_after_polls() {
        let sim = SimulatedSpooler::new();
        sim.add_device("P", true);
        sim.set_flags("P", flags::BUSY);
        sim.set_flags_after_polls("P", 2, flags::ERROR);
        for _ in 0..2 {
            assert_eq!(sim.query("P").await.expect("query").flags, flags::BUSY);
        }
        assert_eq!(sim.query("P").await.expect("query").flags, flags::ERROR);
        assert_eq!(sim.query("P").await.expect("query").flags, flags::ERROR);
    }

    #[tokio::test]
    async fn unknown_device_is_host_error() {
        let sim = SimulatedSpooler::new();
        assert!(matches!(sim.query("nope").await, Err(SpoolError::Host(_))));
    }
}
