// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Delivery strategy chain.
//
// A job is delivered by trying each enabled strategy in canonical order until
// one reports a verified delivery. Failures, timeouts and unverified
// "successes" are logged and the next strategy is tried. Device settings are
// scoped around every attempt, and the job's state is checked before each
// attempt so a cancel or pause stops the chain between strategies.

pub mod raster;
pub mod raw_stream;
pub mod renderer;
pub mod script;
pub mod shell_verb;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::config::{StrategyConfig, VerificationConfig};
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{Device, JobId, PrintJob, PrintSettings, StrategyKind};
use spoolwerk_document::SourceDocument;

use crate::registry::DeviceRegistry;
use crate::settings_scope::with_device_settings;
use crate::spooler::DeviceSettings;
use crate::store::JobStore;
use crate::verify::{Confidence, Verification, Verifier};

pub use raster::RasterStrategy;
pub use raw_stream::RawStreamStrategy;
pub use renderer::RendererStrategy;
pub use script::ScriptStrategy;
pub use shell_verb::ShellVerbStrategy;

/// Outcome of one strategy attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyResult {
    /// The strategy actually tried to deliver.
    pub attempted: bool,
    /// The delivery call itself reported success.
    pub succeeded: bool,
    /// The device confirmed the delivery.
    pub verified: bool,
    pub detail: String,
    pub confidence: Option<Confidence>,
}

impl StrategyResult {
    /// The strategy does not apply to this job.
    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            attempted: false,
            succeeded: false,
            verified: false,
            detail: detail.into(),
            confidence: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            attempted: true,
            succeeded: false,
            verified: false,
            detail: detail.into(),
            confidence: None,
        }
    }

    /// Delivery call succeeded; `verification` says whether it took effect.
    pub fn delivered(verification: Verification) -> Self {
        Self {
            attempted: true,
            succeeded: true,
            verified: verification.verified,
            detail: verification.detail,
            confidence: Some(verification.confidence),
        }
    }
}

/// One entry in a chain run's log.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub strategy: StrategyKind,
    pub result: StrategyResult,
    pub elapsed: Duration,
}

/// Everything a strategy needs to deliver one job.
pub struct JobContext {
    /// Snapshot taken when the job entered `Printing`.
    pub job: PrintJob,
    /// Job settings after capability correction.
    pub settings: PrintSettings,
    pub document: Arc<SourceDocument>,
    /// Per-job scratch directory, removed when the job finishes.
    pub scratch: PathBuf,
    store: Arc<JobStore>,
}

impl JobContext {
    pub fn new(
        job: PrintJob,
        settings: PrintSettings,
        document: Arc<SourceDocument>,
        scratch: PathBuf,
        store: Arc<JobStore>,
    ) -> Self {
        Self {
            job,
            settings,
            document,
            scratch,
            store,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    /// The job was cancelled or paused and must not start new work.
    pub fn is_halted(&self) -> bool {
        self.store.is_halted(self.job.id)
    }

    pub fn report_progress(&self, pages_done: usize, total_pages: usize) {
        self.store.update(self.job.id, |job| {
            job.record_progress(pages_done as u32, total_pages as u32)
        });
    }

    /// Zero-based pages to deliver, honouring the page range.
    pub fn selected_pages(&self) -> Vec<usize> {
        let total = self.document.page_count();
        match &self.settings.page_range {
            Some(range) => range.indices(total),
            None => (0..total).collect(),
        }
    }
}

/// One way of getting a job onto the device.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Deliver the job and check the device for evidence that it worked.
    ///
    /// `Err` means the attempt broke; `Ok` with `verified == false` means it
    /// ran but could not be confirmed. Both move the chain on, except
    /// `Err(SpoolError::Cancelled)`, which stops it.
    async fn attempt(&self, ctx: &JobContext, device: &Device) -> Result<StrategyResult>;
}

/// Result of running the chain for one job.
#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    pub attempts: Vec<AttemptRecord>,
    pub delivered_by: Option<StrategyKind>,
    pub cancelled: bool,
}

impl ChainOutcome {
    pub fn into_result(self) -> Result<StrategyKind> {
        if let Some(kind) = self.delivered_by {
            return Ok(kind);
        }
        if self.cancelled {
            return Err(SpoolError::Cancelled);
        }
        let summary = if self.attempts.is_empty() {
            "no delivery strategy is enabled".to_string()
        } else {
            self.attempts
                .iter()
                .map(|a| format!("{}: {}", a.strategy.display_name(), a.result.detail))
                .collect::<Vec<_>>()
                .join("; ")
        };
        Err(SpoolError::AllStrategiesFailed(summary))
    }
}

/// The ordered set of enabled strategies.
pub struct ExecutionChain {
    registry: Arc<DeviceRegistry>,
    strategies: Vec<Box<dyn Strategy>>,
    config: StrategyConfig,
    /// Added to each strategy's bound so verification windows never eat
    /// into transmission time.
    verification_budget: Duration,
}

impl ExecutionChain {
    /// A chain over `strategies`. Strategies not listed in
    /// `config.enabled` are dropped; the rest are put in canonical order.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        mut strategies: Vec<Box<dyn Strategy>>,
        config: StrategyConfig,
        verification: &VerificationConfig,
    ) -> Self {
        strategies.retain(|s| config.enabled.contains(&s.kind()));
        strategies.sort_by_key(|s| chain_position(s.kind()));
        let verification_budget =
            verification.appear_timeout + verification.drain_timeout + verification.blind_settle;
        Self {
            registry,
            strategies,
            config,
            verification_budget,
        }
    }

    /// The five built-in strategies.
    pub fn standard(
        registry: Arc<DeviceRegistry>,
        config: StrategyConfig,
        verification: VerificationConfig,
    ) -> Self {
        let verifier = Arc::new(Verifier::new(registry.clone(), verification.clone()));
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(RasterStrategy::new(verifier.clone(), config.raster_dpi)),
            Box::new(RendererStrategy::new(
                verifier.clone(),
                config.renderer_program.clone(),
                config.renderer_args.clone(),
            )),
            Box::new(ShellVerbStrategy::new(
                verifier.clone(),
                config.shell_verb_program.clone(),
                config.shell_verb_args.clone(),
            )),
            Box::new(RawStreamStrategy::new(
                verifier.clone(),
                config.raw_dpi,
                config.raw_max_width_dots,
            )),
            Box::new(ScriptStrategy::new(verifier, config.script_path.clone())),
        ];
        Self::new(registry, strategies, config, &verification)
    }

    /// Kinds in the order they will be attempted.
    pub fn order(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Try each strategy until one is verified.
    #[instrument(skip(self, ctx, device), fields(job = %ctx.job_id(), device = %device.id))]
    pub async fn run(&self, ctx: &JobContext, device: &Device) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        let device_settings = DeviceSettings::from_job(&ctx.settings);

        for strategy in &self.strategies {
            let kind = strategy.kind();
            if ctx.is_halted() {
                info!(strategy = %kind, "job halted, stopping delivery chain");
                outcome.cancelled = true;
                break;
            }

            let bound = self.config.timeout_for(kind) + self.verification_budget;
            debug!(strategy = %kind, bound_ms = bound.as_millis() as u64, "attempting delivery");
            let started = Instant::now();
            let attempt = with_device_settings(
                self.registry.spooler().as_ref(),
                &device.name,
                &device_settings,
                || async {
                    match tokio::time::timeout(bound, strategy.attempt(ctx, device)).await {
                        Ok(result) => result,
                        Err(_) => Err(SpoolError::Timeout(format!(
                            "{} after {}ms",
                            kind,
                            bound.as_millis()
                        ))),
                    }
                },
            )
            .await;
            let elapsed = started.elapsed();

            let result = match attempt {
                Ok(result) => result,
                Err(SpoolError::Cancelled) => {
                    info!(strategy = %kind, "delivery interrupted by cancel or pause");
                    outcome.cancelled = true;
                    break;
                }
                Err(err) => StrategyResult::failed(err.to_string()),
            };

            let verified = result.verified;
            if verified {
                info!(
                    strategy = %kind,
                    confidence = ?result.confidence,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "delivery verified"
                );
            } else if result.attempted {
                warn!(strategy = %kind, detail = %result.detail, "delivery not verified, trying next strategy");
            } else {
                debug!(strategy = %kind, detail = %result.detail, "strategy skipped");
            }
            outcome.attempts.push(AttemptRecord {
                strategy: kind,
                result,
                elapsed,
            });
            if verified {
                outcome.delivered_by = Some(kind);
                break;
            }
        }

        if outcome.delivered_by.is_none() && !outcome.cancelled {
            warn!(attempts = outcome.attempts.len(), "delivery chain exhausted");
        }
        outcome
    }
}

fn chain_position(kind: StrategyKind) -> usize {
    StrategyKind::chain()
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(usize::MAX)
}

/// Substitute `{device}` and `{file}` in argument templates.
pub(crate) fn expand_args(templates: &[String], device: &str, file: &Path) -> Vec<String> {
    let file = file.display().to_string();
    templates
        .iter()
        .map(|t| t.replace("{device}", device).replace("{file}", &file))
        .collect()
}

/// Run a helper program to completion. The child is killed if the
/// surrounding attempt is abandoned.
pub(crate) async fn run_helper(kind: StrategyKind, program: &Path, args: &[String]) -> Result<()> {
    debug!(strategy = %kind, program = %program.display(), ?args, "spawning helper");
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SpoolError::StrategyFailed {
            strategy: kind.display_name().to_string(),
            detail: format!("cannot run {}: {e}", program.display()),
        })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(SpoolError::StrategyFailed {
        strategy: kind.display_name().to_string(),
        detail: format!("{} exited with {}: {}", program.display(), output.status, stderr.trim()),
    })
}
