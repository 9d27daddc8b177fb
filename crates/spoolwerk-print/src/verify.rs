// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Delivery verification against device-observable state.
//
// A zero exit code or a successful API call proves nothing about paper. For
// channels that land in the host queue, delivery counts once the queue grew
// past its pre-submission depth and later drained back to it. Channels with
// no queue visibility get a settle delay followed by a fault check, and the
// result is marked as heuristic.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::config::VerificationConfig;
use spoolwerk_core::types::{Device, DeviceStatus};

use crate::registry::{DeviceRegistry, classify};

/// How much a verification result can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Confidence {
    /// The job was seen entering and leaving the device queue.
    Observed,
    /// Nothing went visibly wrong within the settle period.
    Heuristic,
}

/// Result of checking one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verified: bool,
    pub confidence: Confidence,
    pub detail: String,
}

pub struct Verifier {
    registry: Arc<DeviceRegistry>,
    config: VerificationConfig,
}

impl Verifier {
    pub fn new(registry: Arc<DeviceRegistry>, config: VerificationConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Queue depth before submission. A failed poll counts as empty.
    pub async fn baseline(&self, device: &Device) -> u32 {
        match self.registry.poll(device).await {
            Ok(status) => status.active_jobs,
            Err(err) => {
                warn!(device = %device.id, error = %err, "baseline poll failed, assuming empty queue");
                0
            }
        }
    }

    /// Wait for the queue to rise above `baseline`, then to drain back to it.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn confirm_queued(&self, device: &Device, baseline: u32) -> Verification {
        let appeared = self
            .poll_until(device, self.config.appear_timeout, |jobs| jobs > baseline)
            .await;
        match appeared {
            PollOutcome::Met => debug!("job appeared in device queue"),
            PollOutcome::TimedOut => {
                return self.observed(false, "job never appeared in the device queue".into());
            }
            PollOutcome::Fault(status) => {
                return self.observed(false, format!("device reported {status} after submission"));
            }
        }

        let drained = self
            .poll_until(device, self.config.drain_timeout, |jobs| jobs <= baseline)
            .await;
        match drained {
            PollOutcome::Met => {
                info!("job drained from device queue");
                self.observed(true, "job entered and left the device queue".into())
            }
            PollOutcome::TimedOut => self.observed(
                false,
                format!(
                    "job still queued after {}ms",
                    self.config.drain_timeout.as_millis()
                ),
            ),
            PollOutcome::Fault(status) => {
                self.observed(false, format!("device reported {status} while printing"))
            }
        }
    }

    /// Settle, then make sure the device is not faulted or offline.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn confirm_blind(&self, device: &Device) -> Verification {
        sleep(self.config.blind_settle).await;
        let status = match self.registry.poll(device).await {
            Ok(host) => classify(&host),
            Err(err) => {
                return Verification {
                    verified: false,
                    confidence: Confidence::Heuristic,
                    detail: format!("status poll failed: {err}"),
                };
            }
        };
        let (verified, detail) = match status {
            DeviceStatus::Error | DeviceStatus::Offline => {
                (false, format!("device reported {status} after hand-off"))
            }
            _ if !self.config.accept_heuristic => (
                false,
                "no queue signal and heuristic verification is disabled".to_string(),
            ),
            _ => (true, format!("no fault within {}ms", self.config.blind_settle.as_millis())),
        };
        if verified {
            warn!("delivery accepted on heuristic verification only");
        }
        Verification {
            verified,
            confidence: Confidence::Heuristic,
            detail,
        }
    }

    fn observed(&self, verified: bool, detail: String) -> Verification {
        Verification {
            verified,
            confidence: Confidence::Observed,
            detail,
        }
    }

    async fn poll_until(
        &self,
        device: &Device,
        limit: Duration,
        done: impl Fn(u32) -> bool,
    ) -> PollOutcome {
        let deadline = Instant::now() + limit;
        loop {
            if let Ok(host) = self.registry.poll(device).await {
                if done(host.active_jobs) {
                    return PollOutcome::Met;
                }
                let status = classify(&host);
                if status == DeviceStatus::Error {
                    return PollOutcome::Fault(status);
                }
            }
            if Instant::now() >= deadline {
                return PollOutcome::TimedOut;
            }
            sleep(self.config.poll_interval).await;
        }
    }
}

enum PollOutcome {
    Met,
    TimedOut,
    Fault(DeviceStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Acceptance, Channel, SimulatedSpooler};
    use crate::spooler::{Spooler, flags};
    use spoolwerk_core::config::RegistryConfig;

    fn fast() -> VerificationConfig {
        VerificationConfig {
            poll_interval: Duration::from_millis(5),
            appear_timeout: Duration::from_millis(60),
            drain_timeout: Duration::from_millis(200),
            blind_settle: Duration::from_millis(5),
            accept_heuristic: true,
        }
    }

    async fn setup(config: VerificationConfig) -> (Arc<SimulatedSpooler>, Verifier, Device) {
        let sim = Arc::new(SimulatedSpooler::new());
        sim.add_device("P", true);
        let registry = Arc::new(DeviceRegistry::new(sim.clone(), RegistryConfig::default()));
        let device = registry.get_device("p").await.expect("device");
        (sim, Verifier::new(registry, config), device)
    }

    #[tokio::test]
    async fn queued_job_is_observed() {
        let (sim, verifier, device) = setup(fast()).await;
        let baseline = verifier.baseline(&device).await;
        sim.write_raw("P", "t", b"x").await.expect("write");
        let v = verifier.confirm_queued(&device, baseline).await;
        assert!(v.verified, "{}", v.detail);
        assert_eq!(v.confidence, Confidence::Observed);
    }

    #[tokio::test]
    async fn swallowed_job_is_not_verified() {
        let (sim, verifier, device) = setup(fast()).await;
        sim.set_acceptance("P", Channel::Raw, Acceptance::Swallow);
        let baseline = verifier.baseline(&device).await;
        sim.write_raw("P", "t", b"x").await.expect("write");
        let v = verifier.confirm_queued(&device, baseline).await;
        assert!(!v.verified);
        assert!(v.detail.contains("never appeared"));
    }

    #[tokio::test]
    async fn blind_check_rejects_faulted_device() {
        let (sim, verifier, device) = setup(fast()).await;
        sim.set_flags("P", flags::PAPER_OUT);
        let v = verifier.confirm_blind(&device).await;
        assert!(!v.verified);
        assert_eq!(v.confidence, Confidence::Heuristic);
    }

    #[tokio::test]
    async fn blind_check_respects_heuristic_switch() {
        let (_sim, verifier, device) = setup(fast()).await;
        assert!(verifier.confirm_blind(&device).await.verified);

        let (_sim, strict, device) = setup(VerificationConfig {
            accept_heuristic: false,
            ..fast()
        })
        .await;
        assert!(!strict.confirm_blind(&device).await.verified);
    }
}
