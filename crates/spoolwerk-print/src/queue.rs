// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print job queue and its single worker.
//
// Callers submit and control jobs concurrently; one background task pulls job
// ids off a FIFO and drives each job through device selection and the
// delivery chain, so at most one job ever owns the device. Control
// operations only flip job state under the table lock; the worker notices at
// its next checkpoint (before selection, before each strategy, between
// pages).

use std::path::Path;
use std::sync::{Arc, Mutex};

use image::{DynamicImage, Rgb, RgbImage};
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use spoolwerk_core::config::SchedulerConfig;
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{
    Device, DeviceStatus, ErrorKind, JobError, JobId, JobStatus, PrintJob, PrintSettings,
    Progress, StrategyKind,
};
use spoolwerk_document::SourceDocument;

use crate::capabilities::auto_correct_settings;
use crate::registry::DeviceRegistry;
use crate::selector::DeviceSelector;
use crate::store::{JobFilter, JobStore};
use crate::strategy::{ExecutionChain, JobContext};

/// User recorded on test page jobs.
const TEST_PAGE_USER: &str = "test-page";

/// Live view of one job for progress displays.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: Progress,
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_cancel: bool,
    /// Seconds since the job started printing.
    pub elapsed_secs: Option<f64>,
    /// Seconds left, extrapolated from the page rate so far.
    pub eta_secs: Option<f64>,
}

/// Queue-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub worker_running: bool,
}

struct Inner {
    store: Arc<JobStore>,
    registry: Arc<DeviceRegistry>,
    selector: DeviceSelector,
    chain: ExecutionChain,
    config: SchedulerConfig,
    sender: mpsc::UnboundedSender<JobId>,
    shutdown: CancellationToken,
    /// Parent of per-job scratch directories and generated test pages.
    scratch: TempDir,
}

/// The job queue. Dropping it stops the worker after the current job.
pub struct JobQueue {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Create the queue and spawn its worker on the current runtime.
    pub fn start(
        registry: Arc<DeviceRegistry>,
        chain: ExecutionChain,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("spoolwerk-").tempdir()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            store: Arc::new(JobStore::new()),
            selector: DeviceSelector::new(registry.clone()),
            registry,
            chain,
            config,
            sender,
            shutdown: CancellationToken::new(),
            scratch,
        });
        let worker = tokio::spawn(worker_loop(inner.clone(), receiver));
        info!(
            strategies = ?inner.chain.order(),
            scratch = %inner.scratch.path().display(),
            "job queue started"
        );
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Validate and enqueue a job. Fails before anything is queued if the
    /// device is unknown, the source is missing or the settings are invalid.
    #[instrument(skip(self, source, settings), fields(source = %source.as_ref().display()))]
    pub async fn submit(
        &self,
        device_id: &str,
        source: impl AsRef<Path>,
        settings: PrintSettings,
        user: &str,
    ) -> Result<PrintJob> {
        let source = source.as_ref();
        if self.inner.shutdown.is_cancelled() {
            return Err(SpoolError::Host("job queue is shut down".into()));
        }
        settings.validate()?;
        let device = self.inner.registry.get_device(device_id).await?;
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| SpoolError::SourceNotFound(format!("{}: {e}", source.display())))?;
        if !metadata.is_file() {
            return Err(SpoolError::SourceNotFound(format!(
                "{} is not a file",
                source.display()
            )));
        }

        let mut job = PrintJob::new(device.id, source.to_path_buf(), settings, user.to_string());
        job.file_size = metadata.len();
        job.max_retries = self.inner.config.default_max_retries;
        self.inner.store.insert(job.clone());

        if !self.inner.enqueue(job.id) {
            self.inner.store.update(job.id, |j| {
                j.fail(JobError {
                    kind: ErrorKind::Internal,
                    message: "print worker is not running".into(),
                })
            });
            return Err(SpoolError::Host("print worker is not running".into()));
        }
        info!(
            job = %job.id,
            device = %job.device_id,
            title = %job.title,
            user = %job.user,
            bytes = job.file_size,
            "job submitted"
        );
        Ok(job)
    }

    /// Generate a test page and submit it to `device_id`, or to the first
    /// ready device (default first) when none is given.
    pub async fn submit_test_page(&self, device_id: Option<&str>) -> Result<PrintJob> {
        let device_id = match device_id {
            Some(id) => id.to_string(),
            None => self.pick_test_device().await?.id,
        };
        let path = self
            .inner
            .scratch
            .path()
            .join(format!("test-page-{}.png", JobId::new()));
        render_test_page()
            .save(&path)
            .map_err(|e| SpoolError::ImageError(format!("test page: {e}")))?;
        self.submit(&device_id, &path, PrintSettings::default(), TEST_PAGE_USER)
            .await
    }

    async fn pick_test_device(&self) -> Result<Device> {
        let devices = self.inner.registry.list_devices(false).await?;
        for device in &devices {
            if self.inner.registry.get_status(&device.id).await.ok() == Some(DeviceStatus::Online) {
                return Ok(device.clone());
            }
        }
        devices
            .into_iter()
            .next()
            .ok_or_else(|| SpoolError::DeviceNotFound("no devices available".into()))
    }

    pub fn get_job(&self, id: JobId) -> Option<PrintJob> {
        self.inner.store.get(id)
    }

    /// Jobs matching `filter`, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<PrintJob> {
        self.inner.store.list(filter)
    }

    /// Cancel a job that has not finished. An in-flight device write
    /// completes, but nothing further is started.
    pub fn cancel(&self, id: JobId) -> bool {
        let done = self.inner.store.update(id, |j| j.cancel());
        if done {
            info!(job = %id, "job cancelled");
        }
        done
    }

    pub fn pause(&self, id: JobId) -> bool {
        let done = self.inner.store.update(id, |j| j.pause());
        if done {
            info!(job = %id, "job paused");
        }
        done
    }

    /// Return a paused job to the back of the queue.
    pub fn resume(&self, id: JobId) -> bool {
        let done = self.inner.store.update(id, |j| j.resume());
        if done {
            info!(job = %id, "job resumed");
            self.inner.enqueue(id);
        }
        done
    }

    /// Re-queue a failed job while its retry budget lasts.
    pub fn retry(&self, id: JobId) -> bool {
        let done = self.inner.store.update(id, |j| j.retry());
        if done {
            info!(job = %id, "job re-queued for retry");
            self.inner.enqueue(id);
        }
        done
    }

    pub fn job_progress(&self, id: JobId) -> Option<JobProgress> {
        self.inner.store.get(id).map(|job| progress_view(&job))
    }

    pub fn queue_status(&self) -> QueueStatus {
        let counts = self.inner.store.counts();
        let count = |s: JobStatus| counts.get(&s).copied().unwrap_or(0);
        QueueStatus {
            queued: count(JobStatus::Pending),
            active: count(JobStatus::Processing) + count(JobStatus::Printing),
            paused: count(JobStatus::Paused),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            total: counts.values().sum(),
            worker_running: self
                .worker
                .lock()
                .expect("worker handle lock poisoned")
                .as_ref()
                .is_some_and(|h| !h.is_finished()),
        }
    }

    /// Stop the worker once the current job is done and wait for it.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self
            .worker
            .lock()
            .expect("worker handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "print worker panicked");
            }
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn worker_loop(inner: Arc<Inner>, mut receiver: mpsc::UnboundedReceiver<JobId>) {
    info!("print worker started");
    loop {
        let next = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = timeout(inner.config.queue_poll_interval, receiver.recv()) => next,
        };
        match next {
            Ok(Some(id)) => inner.process(id).await,
            Ok(None) => break,
            Err(_) => trace!("queue idle"),
        }
    }
    info!("print worker stopped");
}

impl Inner {
    fn enqueue(&self, id: JobId) -> bool {
        match self.sender.send(id) {
            Ok(()) => true,
            Err(_) => {
                warn!(job = %id, "print worker is gone, job not queued");
                false
            }
        }
    }

    #[instrument(skip(self), fields(job = %id))]
    async fn process(&self, id: JobId) {
        let Some(job) = self.store.transition(id, |j| j.begin_processing()) else {
            debug!("job is no longer pending, skipping");
            return;
        };
        info!(device = %job.device_id, title = %job.title, "processing job");

        let scratch = match tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(self.scratch.path())
        {
            Ok(dir) => dir,
            Err(err) => {
                self.finish(id, Err(SpoolError::Io(err)));
                return;
            }
        };
        let result = self.execute(job, scratch.path()).await;
        self.finish(id, result);
        if let Err(err) = scratch.close() {
            warn!(error = %err, "could not remove job scratch directory");
        }
    }

    /// Record the outcome, unless the job was cancelled or paused meanwhile.
    fn finish(&self, id: JobId, result: Result<StrategyKind>) {
        match result {
            Ok(kind) => {
                if self.store.update(id, |j| j.complete()) {
                    info!(strategy = %kind, "job completed");
                } else {
                    info!(strategy = %kind, "job delivered after it was halted");
                }
            }
            Err(SpoolError::Cancelled) => info!("job halted"),
            Err(err) => {
                let error = JobError::from(&err);
                if self.store.update(id, |j| j.is_active() && j.fail(error)) {
                    warn!(error = %err, "job failed");
                }
            }
        }
    }

    async fn execute(&self, job: PrintJob, scratch: &Path) -> Result<StrategyKind> {
        if self.store.is_halted(job.id) {
            return Err(SpoolError::Cancelled);
        }

        let requested = job.device_id.clone();
        let Some(mut selection) = self.selector.resolve(&requested, true).await else {
            return Err(self.no_device_error(&requested).await);
        };
        if selection.status == DeviceStatus::Busy {
            if let DeviceWait::Faulted(status) =
                self.wait_for_online(job.id, &selection.device).await?
            {
                // Only a busy device is worth waiting for.
                let faulted = selection.device.id.clone();
                warn!(device = %faulted, %status, "device failed while waiting, reselecting");
                let fallback = self
                    .selector
                    .resolve_excluding(&requested, false, &[faulted.as_str()])
                    .await;
                selection = match fallback {
                    Some(selection) => selection,
                    None => {
                        return Err(SpoolError::DeviceUnavailable(format!(
                            "{faulted} became {status} while waiting and no fallback device is ready"
                        )));
                    }
                };
            }
        }
        let device = selection.device;

        // Cancellation wins any race with this transition.
        let Some(job) = self
            .store
            .transition(job.id, |j| j.begin_printing(&device.id))
        else {
            return Err(SpoolError::Cancelled);
        };
        if selection.substituted {
            info!(from = %requested, to = %device.id, "job moved to fallback device");
        }

        let document = open_source(&job.source)?;
        let (settings, notices) = auto_correct_settings(&job.settings, &device.capabilities);
        for notice in &notices {
            warn!(
                field = notice.field,
                original = %notice.original,
                corrected = %notice.corrected,
                "{}",
                notice.reason
            );
        }

        let ctx = JobContext::new(
            job,
            settings,
            Arc::new(document),
            scratch.to_path_buf(),
            self.store.clone(),
        );
        ctx.report_progress(0, ctx.selected_pages().len());

        let outcome = self.chain.run(&ctx, &device).await;
        self.registry.invalidate_status(&device.id);
        outcome.into_result()
    }

    /// Poll a busy device until it is online or stops being merely busy.
    /// Running out of time is not fatal: the chain is attempted anyway.
    async fn wait_for_online(&self, id: JobId, device: &Device) -> Result<DeviceWait> {
        let deadline = Instant::now() + self.config.device_wait_timeout;
        loop {
            if self.store.is_halted(id) {
                return Err(SpoolError::Cancelled);
            }
            self.registry.invalidate_status(&device.id);
            match self.registry.get_status(&device.id).await {
                Ok(DeviceStatus::Online) => {
                    debug!(device = %device.id, "device became ready");
                    return Ok(DeviceWait::Ready);
                }
                Ok(DeviceStatus::Busy) => trace!(device = %device.id, "waiting for device"),
                Ok(status) => return Ok(DeviceWait::Faulted(status)),
                Err(err) => trace!(device = %device.id, error = %err, "waiting for device"),
            }
            if Instant::now() >= deadline {
                warn!(device = %device.id, "device still busy, attempting delivery anyway");
                return Ok(DeviceWait::TimedOut);
            }
            sleep(self.config.device_wait_poll).await;
        }
    }

    async fn no_device_error(&self, requested: &str) -> SpoolError {
        match self.registry.get_device(requested).await {
            Ok(device) => {
                let status = self
                    .registry
                    .get_status(&device.id)
                    .await
                    .unwrap_or(DeviceStatus::Error);
                SpoolError::DeviceUnavailable(format!(
                    "{} is {status} and no fallback device is ready",
                    device.id
                ))
            }
            Err(_) => SpoolError::DeviceNotFound(format!(
                "{requested} (and no fallback device is ready)"
            )),
        }
    }
}

/// How waiting for a busy device ended.
enum DeviceWait {
    Ready,
    TimedOut,
    /// The device went offline, paused or faulted.
    Faulted(DeviceStatus),
}

/// Open the job's source. A missing file fails the job; a file that cannot
/// be parsed is passed on opaquely for the external strategies.
fn open_source(path: &Path) -> Result<SourceDocument> {
    match SourceDocument::open(path) {
        Ok(document) => Ok(document),
        Err(err) if err.kind() == ErrorKind::SourceNotFound => Err(err),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "source not parsed, passing it on as-is");
            Ok(SourceDocument::opaque(path))
        }
    }
}

fn progress_view(job: &PrintJob) -> JobProgress {
    let elapsed_secs = job
        .duration()
        .and_then(|d| d.to_std().ok())
        .map(|d| d.as_secs_f64());
    let p = job.progress;
    let eta_secs = match elapsed_secs {
        Some(elapsed)
            if job.status == JobStatus::Printing
                && p.pages_done > 0
                && p.total_pages > p.pages_done
                && elapsed > 0.0 =>
        {
            let rate = f64::from(p.pages_done) / elapsed;
            Some(f64::from(p.total_pages - p.pages_done) / rate)
        }
        _ => None,
    };
    JobProgress {
        id: job.id,
        status: job.status,
        progress: p,
        can_pause: job.status.can_pause(),
        can_resume: job.status.can_resume(),
        can_cancel: job.status.can_cancel(),
        elapsed_secs,
        eta_secs,
    }
}

/// An A4 page at 75 dpi: border, grey ramp, colour bars and a checkerboard.
fn render_test_page() -> DynamicImage {
    const W: u32 = 620;
    const H: u32 = 877;
    let mut page = RgbImage::from_pixel(W, H, Rgb([255, 255, 255]));
    let bars = [
        Rgb([0, 255, 255]),
        Rgb([255, 0, 255]),
        Rgb([255, 255, 0]),
        Rgb([255, 0, 0]),
        Rgb([0, 255, 0]),
        Rgb([0, 0, 255]),
    ];
    for (x, y, pixel) in page.enumerate_pixels_mut() {
        let border = x < 6 || y < 6 || x >= W - 6 || y >= H - 6;
        if border {
            *pixel = Rgb([0, 0, 0]);
        } else if (60..120).contains(&y) && (30..W - 30).contains(&x) {
            let level = ((x - 30) * 255 / (W - 61)) as u8;
            *pixel = Rgb([level, level, level]);
        } else if (160..260).contains(&y) && (30..W - 30).contains(&x) {
            let bar = ((x - 30) * bars.len() as u32 / (W - 60)) as usize;
            *pixel = bars[bar.min(bars.len() - 1)];
        } else if (320..620).contains(&y) && (160..460).contains(&x) {
            let dark = ((x - 160) / 30 + (y - 320) / 30) % 2 == 0;
            if dark {
                *pixel = Rgb([0, 0, 0]);
            }
        }
    }
    DynamicImage::ImageRgb8(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedSpooler;
    use chrono::{Duration as ChronoDuration, Utc};
    use spoolwerk_core::config::{RegistryConfig, StrategyConfig, VerificationConfig};
    use std::time::Duration;

    fn queue(sim: Arc<SimulatedSpooler>) -> JobQueue {
        let registry = Arc::new(DeviceRegistry::new(sim, RegistryConfig::default()));
        let chain = ExecutionChain::new(
            registry.clone(),
            Vec::new(),
            StrategyConfig::default(),
            &VerificationConfig::default(),
        );
        JobQueue::start(
            registry,
            chain,
            SchedulerConfig {
                queue_poll_interval: Duration::from_millis(10),
                ..SchedulerConfig::default()
            },
        )
        .expect("queue")
    }

    #[tokio::test]
    async fn submit_rejects_unknown_device_and_missing_source() {
        let sim = Arc::new(SimulatedSpooler::new());
        sim.add_device("P", true);
        let q = queue(sim);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hi").expect("write");

        let err = q
            .submit("plotter", &file, PrintSettings::default(), "ann")
            .await
            .expect_err("unknown device");
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);

        let err = q
            .submit("p", dir.path().join("missing.txt"), PrintSettings::default(), "ann")
            .await
            .expect_err("missing source");
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);

        let bad = PrintSettings {
            copies: 0,
            ..PrintSettings::default()
        };
        let err = q.submit("p", &file, bad, "ann").await.expect_err("bad settings");
        assert_eq!(err.kind(), ErrorKind::InvalidSettings);

        assert!(q.list_jobs(&JobFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn submitted_job_records_source_metadata() {
        let sim = Arc::new(SimulatedSpooler::new());
        sim.add_device("Office Laser", true);
        let q = queue(sim);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("Report.TXT");
        std::fs::write(&file, "twelve bytes").expect("write");

        let job = q
            .submit("Office Laser", &file, PrintSettings::default(), "")
            .await
            .expect("submit");
        assert_eq!(job.device_id, "office_laser");
        assert_eq!(job.user, "anonymous");
        assert_eq!(job.title, "Report.TXT");
        assert_eq!(job.file_type.as_deref(), Some("txt"));
        assert_eq!(job.file_size, 12);
        assert_eq!(job.status, JobStatus::Pending);
        q.shutdown().await;
    }

    #[test]
    fn eta_extrapolates_page_rate() {
        let mut job = PrintJob::new(
            "p".into(),
            "/tmp/a.pdf".into(),
            PrintSettings::default(),
            "ann".into(),
        );
        job.begin_processing();
        job.begin_printing("p");
        job.started_at = Some(Utc::now() - ChronoDuration::seconds(10));
        job.record_progress(2, 6);

        let view = progress_view(&job);
        let eta = view.eta_secs.expect("eta");
        assert!((eta - 20.0).abs() < 1.0, "eta was {eta}");
        assert!(view.can_pause && view.can_cancel && !view.can_resume);
    }

    #[test]
    fn no_eta_before_first_page() {
        let mut job = PrintJob::new(
            "p".into(),
            "/tmp/a.pdf".into(),
            PrintSettings::default(),
            "ann".into(),
        );
        job.begin_processing();
        job.begin_printing("p");
        job.record_progress(0, 6);
        assert!(progress_view(&job).eta_secs.is_none());
    }

    #[test]
    fn test_page_has_border_and_ramp() {
        let page = render_test_page().to_rgb8();
        assert_eq!(page.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(page.get_pixel(300, 40), &Rgb([255, 255, 255]));
        let left = page.get_pixel(31, 90)[0];
        let right = page.get_pixel(580, 90)[0];
        assert!(left < right);
    }

    #[tokio::test]
    async fn shutdown_stops_worker_and_refuses_work() {
        let sim = Arc::new(SimulatedSpooler::new());
        sim.add_device("P", true);
        let q = queue(sim);
        assert!(q.queue_status().worker_running);
        q.shutdown().await;
        assert!(!q.queue_status().worker_running);

        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hi").expect("write");
        assert!(q.submit("p", &file, PrintSettings::default(), "ann").await.is_err());
    }
}
