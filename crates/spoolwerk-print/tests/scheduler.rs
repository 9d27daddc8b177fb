// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end scheduling scenarios against the simulated spooler: device
// fallback, chain ordering and exhaustion, single-job ownership of the
// device, cancellation, pause/resume and the retry bound.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use tempfile::TempDir;
use tokio::sync::Notify;

use spoolwerk_core::config::{RegistryConfig, SchedulerConfig, StrategyConfig, VerificationConfig};
use spoolwerk_core::error::Result;
use spoolwerk_core::types::{Device, ErrorKind, JobId, JobStatus, PrintJob, PrintSettings, StrategyKind};
use spoolwerk_print::sim::{Acceptance, Channel};
use spoolwerk_print::spooler::flags;
use spoolwerk_print::strategy::{ExecutionChain, JobContext, Strategy, StrategyResult};
use spoolwerk_print::verify::{Confidence, Verification};
use spoolwerk_print::{DeviceRegistry, JobFilter, JobQueue, SimulatedSpooler};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behaviour {
    Verified,
    /// Reports success without any device-side evidence.
    Unverified,
    Fails,
}

#[derive(Default)]
struct Concurrency {
    log: Mutex<Vec<(JobId, StrategyKind)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: Notify,
}

impl Concurrency {
    fn kinds(&self) -> Vec<StrategyKind> {
        self.log
            .lock()
            .expect("tracker lock poisoned")
            .iter()
            .map(|(_, k)| *k)
            .collect()
    }
}

struct Mock {
    kind: StrategyKind,
    behaviour: Behaviour,
    delay: Duration,
    tracker: Arc<Concurrency>,
}

#[async_trait]
impl Strategy for Mock {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn attempt(&self, ctx: &JobContext, _device: &Device) -> Result<StrategyResult> {
        let now = self.tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracker.peak.fetch_max(now, Ordering::SeqCst);
        self.tracker
            .log
            .lock()
            .expect("tracker lock poisoned")
            .push((ctx.job_id(), self.kind));
        self.tracker.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(match self.behaviour {
            Behaviour::Verified => StrategyResult::delivered(Verification {
                verified: true,
                confidence: Confidence::Observed,
                detail: "queue rose and drained".into(),
            }),
            Behaviour::Unverified => StrategyResult::delivered(Verification {
                verified: false,
                confidence: Confidence::Observed,
                detail: "queue never changed".into(),
            }),
            Behaviour::Fails => StrategyResult::failed("driver refused the job"),
        })
    }
}

struct Harness {
    sim: Arc<SimulatedSpooler>,
    queue: JobQueue,
    tracker: Arc<Concurrency>,
    source: PathBuf,
    _dir: TempDir,
}

fn scheduler() -> SchedulerConfig {
    SchedulerConfig {
        queue_poll_interval: Duration::from_millis(10),
        device_wait_timeout: Duration::from_secs(10),
        device_wait_poll: Duration::from_millis(5),
        default_max_retries: 1,
    }
}

fn harness(sim: SimulatedSpooler, behaviours: [Behaviour; 5], delay: Duration) -> Harness {
    let sim = Arc::new(sim);
    let registry = Arc::new(DeviceRegistry::new(
        sim.clone(),
        RegistryConfig {
            status_ttl: Duration::ZERO,
            ..RegistryConfig::default()
        },
    ));
    let tracker = Arc::new(Concurrency::default());
    let strategies: Vec<Box<dyn Strategy>> = StrategyKind::chain()
        .iter()
        .zip(behaviours)
        .map(|(kind, behaviour)| {
            Box::new(Mock {
                kind: *kind,
                behaviour,
                delay,
                tracker: tracker.clone(),
            }) as Box<dyn Strategy>
        })
        .collect();
    let chain = ExecutionChain::new(
        registry.clone(),
        strategies,
        StrategyConfig::default(),
        &VerificationConfig::default(),
    );
    let queue = JobQueue::start(registry, chain, scheduler()).expect("queue");

    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("letter.txt");
    std::fs::write(&source, "Dear printer,\nplease work.\n").expect("write source");
    Harness {
        sim,
        queue,
        tracker,
        source,
        _dir: dir,
    }
}

fn two_printers() -> SimulatedSpooler {
    let sim = SimulatedSpooler::new();
    sim.add_device("printer a", true);
    sim.add_device("printer b", false);
    sim
}

const ALL_VERIFY: [Behaviour; 5] = [Behaviour::Verified; 5];
const ALL_FAIL: [Behaviour; 5] = [Behaviour::Fails; 5];

async fn wait_for(queue: &JobQueue, id: JobId, done: impl Fn(&PrintJob) -> bool) -> PrintJob {
    for _ in 0..1000 {
        if let Some(job) = queue.get_job(id) {
            if done(&job) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} never reached the expected state: {:?}", queue.get_job(id));
}

async fn wait_finished(queue: &JobQueue, id: JobId) -> PrintJob {
    wait_for(queue, id, |j| j.is_finished()).await
}

#[tokio::test]
async fn offline_device_falls_back_and_records_new_device() {
    let sim = two_printers();
    sim.set_flags("printer a", flags::OFFLINE);
    let h = harness(sim, ALL_VERIFY, Duration::ZERO);

    let job = h
        .queue
        .submit("printer_a", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");
    assert_eq!(job.device_id, "printer_a");

    let done = wait_finished(&h.queue, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.device_id, "printer_b");
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn unverified_successes_do_not_complete_the_job() {
    let h = harness(
        two_printers(),
        [
            Behaviour::Unverified,
            Behaviour::Unverified,
            Behaviour::Verified,
            Behaviour::Verified,
            Behaviour::Verified,
        ],
        Duration::ZERO,
    );
    let job = h
        .queue
        .submit("printer_a", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");

    let done = wait_finished(&h.queue, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(
        h.tracker.kinds(),
        vec![StrategyKind::Raster, StrategyKind::Renderer, StrategyKind::ShellVerb]
    );
}

#[tokio::test]
async fn exhausted_chain_fails_without_retrying() {
    let h = harness(two_printers(), ALL_FAIL, Duration::ZERO);
    let job = h
        .queue
        .submit("printer_a", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");

    let done = wait_finished(&h.queue, job.id).await;
    assert_eq!(done.status, JobStatus::Failed);
    let error = done.error.expect("error recorded");
    assert_eq!(error.kind, ErrorKind::AllStrategiesFailed);
    assert_eq!(done.retry_count, 0);
    assert_eq!(h.tracker.kinds(), StrategyKind::chain().to_vec());
}

#[tokio::test]
async fn only_one_job_owns_the_device() {
    let h = harness(two_printers(), ALL_VERIFY, Duration::from_millis(15));
    let mut ids = Vec::new();
    for user in ["ann", "bob", "cat", "dan"] {
        let job = h
            .queue
            .submit("printer_a", &h.source, PrintSettings::default(), user)
            .await
            .expect("submit");
        ids.push(job.id);
    }

    let mut peak_active = 0;
    loop {
        let jobs = h.queue.list_jobs(&JobFilter::default());
        let active = jobs.iter().filter(|j| j.is_active()).count();
        peak_active = peak_active.max(active);
        if jobs.iter().all(|j| j.is_finished()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(peak_active <= 1, "{peak_active} jobs were active at once");
    assert_eq!(h.tracker.peak.load(Ordering::SeqCst), 1);

    // Strictly FIFO.
    let order: Vec<JobId> = h
        .tracker
        .log
        .lock()
        .expect("tracker lock poisoned")
        .iter()
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(order, ids);
    assert_eq!(h.queue.queue_status().completed, 4);
}

#[tokio::test]
async fn device_faulting_during_wait_is_replaced() {
    let sim = two_printers();
    sim.set_flags("printer a", flags::BUSY);
    // Busy when selected and for one wait poll, then jammed.
    sim.set_flags_after_polls("printer a", 2, flags::ERROR);
    let h = harness(sim, ALL_VERIFY, Duration::ZERO);

    let started = std::time::Instant::now();
    let job = h
        .queue
        .submit("printer_a", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");
    let done = wait_finished(&h.queue, job.id).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.device_id, "printer_b");
    // Far below the ten second device wait.
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
}

#[tokio::test]
async fn device_faulting_during_wait_without_fallback_fails_fast() {
    let sim = SimulatedSpooler::new();
    sim.add_device("solo", true);
    sim.set_flags("solo", flags::BUSY);
    sim.set_flags_after_polls("solo", 2, flags::OFFLINE);
    let h = harness(sim, ALL_VERIFY, Duration::ZERO);

    let started = std::time::Instant::now();
    let job = h
        .queue
        .submit("solo", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");
    let done = wait_finished(&h.queue, job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error.expect("error").kind, ErrorKind::DeviceUnavailable);
    assert!(h.tracker.kinds().is_empty());
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
}

#[tokio::test]
async fn cancel_while_waiting_for_device_never_prints() {
    let sim = SimulatedSpooler::new();
    sim.add_device("solo", true);
    sim.set_busy_for_polls("solo", 100_000);
    let h = harness(sim, ALL_VERIFY, Duration::ZERO);

    let job = h
        .queue
        .submit("solo", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");
    wait_for(&h.queue, job.id, |j| j.status == JobStatus::Processing).await;

    assert!(h.queue.cancel(job.id));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = h.queue.get_job(job.id).expect("job");
    assert_eq!(after.status, JobStatus::Cancelled);
    assert!(h.tracker.kinds().is_empty());
    assert!(!h.queue.cancel(job.id), "cancelling twice is rejected");
    assert!(!h.queue.resume(job.id));
}

#[tokio::test]
async fn cancel_mid_chain_stops_before_next_strategy() {
    let h = harness(
        two_printers(),
        [
            Behaviour::Unverified,
            Behaviour::Verified,
            Behaviour::Verified,
            Behaviour::Verified,
            Behaviour::Verified,
        ],
        Duration::from_millis(80),
    );
    let job = h
        .queue
        .submit("printer_a", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");

    h.tracker.started.notified().await;
    assert!(h.queue.cancel(job.id));

    let done = wait_finished(&h.queue, job.id).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(done.status, JobStatus::Cancelled);
    assert_eq!(h.tracker.kinds(), vec![StrategyKind::Raster]);
    assert_eq!(
        h.queue.get_job(job.id).map(|j| j.status),
        Some(JobStatus::Cancelled)
    );
}

#[tokio::test]
async fn paused_job_resumes_from_the_queue() {
    let sim = SimulatedSpooler::new();
    sim.add_device("solo", true);
    sim.set_busy_for_polls("solo", 100_000);
    let h = harness(sim, ALL_VERIFY, Duration::ZERO);

    let job = h
        .queue
        .submit("solo", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");
    wait_for(&h.queue, job.id, |j| j.status == JobStatus::Processing).await;

    assert!(h.queue.pause(job.id));
    assert!(!h.queue.pause(job.id));
    let progress = h.queue.job_progress(job.id).expect("progress");
    assert!(progress.can_resume && !progress.can_pause);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.tracker.kinds().is_empty());

    h.sim.set_busy_for_polls("solo", 0);
    assert!(h.queue.resume(job.id));
    let done = wait_finished(&h.queue, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(h.tracker.kinds(), vec![StrategyKind::Raster]);
}

#[tokio::test]
async fn retry_is_bounded_by_budget() {
    let h = harness(two_printers(), ALL_FAIL, Duration::ZERO);
    let job = h
        .queue
        .submit("printer_a", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");
    assert_eq!(job.max_retries, 1);

    let failed = wait_finished(&h.queue, job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);

    assert!(h.queue.retry(job.id));
    let failed_again = wait_for(&h.queue, job.id, |j| {
        j.status == JobStatus::Failed && j.retry_count == 1
    })
    .await;
    assert_eq!(h.tracker.kinds().len(), 10);

    assert!(!h.queue.retry(job.id));
    let unchanged = h.queue.get_job(job.id).expect("job");
    assert_eq!(unchanged.status, JobStatus::Failed);
    assert_eq!(unchanged.retry_count, 1);
    assert_eq!(unchanged.error, failed_again.error);
}

#[tokio::test]
async fn no_ready_device_fails_as_unavailable() {
    let sim = SimulatedSpooler::new();
    sim.add_device("solo", true);
    sim.set_flags("solo", flags::PAPER_JAM);
    let h = harness(sim, ALL_VERIFY, Duration::ZERO);

    let job = h
        .queue
        .submit("solo", &h.source, PrintSettings::default(), "ann")
        .await
        .expect("submit");
    let done = wait_finished(&h.queue, job.id).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error.map(|e| e.kind), Some(ErrorKind::DeviceUnavailable));
    assert!(h.tracker.kinds().is_empty());
}

#[tokio::test]
async fn standard_chain_falls_through_to_raw_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("label.png");
    DynamicImage::ImageRgb8(RgbImage::new(64, 32))
        .save(&source)
        .expect("write png");

    let sim = Arc::new(SimulatedSpooler::new());
    sim.add_device("Receipt", true);
    sim.set_acceptance("Receipt", Channel::Document, Acceptance::Swallow);
    let registry = Arc::new(DeviceRegistry::new(
        sim.clone(),
        RegistryConfig {
            status_ttl: Duration::ZERO,
            ..RegistryConfig::default()
        },
    ));
    let strategies = StrategyConfig {
        renderer_program: PathBuf::from("/nonexistent/renderer"),
        shell_verb_program: PathBuf::from("/nonexistent/print-verb"),
        ..StrategyConfig::default()
    };
    let verification = VerificationConfig {
        poll_interval: Duration::from_millis(2),
        appear_timeout: Duration::from_millis(40),
        drain_timeout: Duration::from_millis(200),
        blind_settle: Duration::from_millis(2),
        accept_heuristic: true,
    };
    let chain = ExecutionChain::standard(registry.clone(), strategies, verification);
    let queue = JobQueue::start(registry, chain, scheduler()).expect("queue");

    let settings = PrintSettings {
        copies: 2,
        ..PrintSettings::default()
    };
    let job = queue
        .submit("receipt", &source, settings, "ann")
        .await
        .expect("submit");
    let done = wait_finished(&queue, job.id).await;

    assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error);
    assert_eq!(sim.pages_drawn("Receipt"), 1, "raster drew into a swallowing driver");
    let raw = sim.raw_jobs("Receipt");
    // Two copies, each its own raw job ending in the page trailer.
    assert_eq!(raw.len(), 2);
    for copy in &raw {
        assert!(copy.ends_with(&[0x0C, 0x1B, b'@']));
    }
    // Job settings were applied for each attempt and the original restored.
    assert!(!sim.applied_settings("Receipt").is_empty());
    assert_eq!(sim.current_settings("Receipt").map(|s| s.copies), Some(1));
}

#[tokio::test]
async fn test_page_goes_to_first_ready_device() {
    let sim = two_printers();
    sim.set_flags("printer a", flags::PAUSED);
    let h = harness(sim, ALL_VERIFY, Duration::ZERO);

    let job = h.queue.submit_test_page(None).await.expect("test page");
    assert_eq!(job.device_id, "printer_b");
    assert_eq!(job.user, "test-page");
    assert!(job.file_size > 0);
    let done = wait_finished(&h.queue, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
}
