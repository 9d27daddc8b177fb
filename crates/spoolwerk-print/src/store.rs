// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job table.
//
// Every read hands out a snapshot and every mutation runs under the table
// lock, so a transition and its timestamps land together and readers never
// see a half-applied change. Jobs stay until the process exits.

use std::collections::HashMap;
use std::sync::Mutex;

use spoolwerk_core::types::{JobId, JobStatus, PrintJob};

/// Filters for [`JobStore::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub device_id: Option<String>,
    pub user: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, job: &PrintJob) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.device_id.as_deref().is_none_or(|d| job.device_id == d)
            && self.user.as_deref().is_none_or(|u| job.user == u)
    }
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<JobId, PrintJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: PrintJob) {
        self.jobs
            .lock()
            .expect("job table lock poisoned")
            .insert(job.id, job);
    }

    pub fn get(&self, id: JobId) -> Option<PrintJob> {
        self.jobs
            .lock()
            .expect("job table lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Matching jobs, newest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<PrintJob> {
        let mut jobs: Vec<PrintJob> = self
            .jobs
            .lock()
            .expect("job table lock poisoned")
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Apply `change` under the lock. Returns what `change` returned, or
    /// `false` for an unknown id.
    pub fn update(&self, id: JobId, change: impl FnOnce(&mut PrintJob) -> bool) -> bool {
        let mut jobs = self.jobs.lock().expect("job table lock poisoned");
        jobs.get_mut(&id).is_some_and(change)
    }

    /// Like [`JobStore::update`], returning a snapshot after a successful
    /// change.
    pub fn transition(
        &self,
        id: JobId,
        change: impl FnOnce(&mut PrintJob) -> bool,
    ) -> Option<PrintJob> {
        let mut jobs = self.jobs.lock().expect("job table lock poisoned");
        let job = jobs.get_mut(&id)?;
        change(job).then(|| job.clone())
    }

    /// The job no longer owns the device: cancelled, paused, or gone.
    pub fn is_halted(&self, id: JobId) -> bool {
        let jobs = self.jobs.lock().expect("job table lock poisoned");
        jobs.get(&id).is_none_or(|job| !job.status.is_active())
    }

    /// Job count per status.
    pub fn counts(&self) -> HashMap<JobStatus, usize> {
        let jobs = self.jobs.lock().expect("job table lock poisoned");
        let mut counts = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
