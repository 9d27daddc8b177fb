// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Print: device registry and fallback selection, the delivery
// strategy chain with device-side verification, and the single-worker job
// queue. Host spoolers plug in through the `Spooler` trait.

pub mod capabilities;
#[cfg(unix)]
pub mod cups;
pub mod queue;
pub mod registry;
pub mod selector;
pub mod settings_scope;
pub mod sim;
pub mod spooler;
pub mod store;
pub mod strategy;
pub mod verify;

#[cfg(unix)]
pub use cups::CupsSpooler;
pub use queue::{JobProgress, JobQueue, QueueStatus};
pub use registry::{DeviceRegistry, StatusReport};
pub use selector::{DeviceSelector, Selection};
pub use sim::SimulatedSpooler;
pub use spooler::Spooler;
pub use store::{JobFilter, JobStore};
pub use strategy::{ExecutionChain, JobContext, Strategy, StrategyResult};
pub use verify::{Confidence, Verifier};
