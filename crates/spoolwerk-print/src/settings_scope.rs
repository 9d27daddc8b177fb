// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scoped device settings.
//
// Job settings are pushed onto the shared device configuration for the
// duration of one delivery attempt and the captured configuration is put back
// afterwards, whatever the attempt returned.

use std::future::Future;

use tracing::{debug, warn};

use spoolwerk_core::error::Result;

use crate::spooler::{DeviceSettings, Spooler};

/// Run `body` with `settings` applied to device `name`.
///
/// If the current settings cannot be captured nothing is applied, since
/// there would be nothing to restore. A failed apply or restore is logged;
/// neither changes the body's result.
pub async fn with_device_settings<T, F, Fut>(
    spooler: &dyn Spooler,
    name: &str,
    settings: &DeviceSettings,
    body: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let previous = match spooler.capture_settings(name).await {
        Ok(previous) => Some(previous),
        Err(err) => {
            warn!(device = name, error = %err, "could not capture device settings, leaving them untouched");
            None
        }
    };

    if previous.is_some() {
        match spooler.apply_settings(name, settings).await {
            Ok(()) => debug!(device = name, "job settings applied"),
            Err(err) => warn!(device = name, error = %err, "could not apply job settings"),
        }
    }

    let result = body().await;

    if let Some(previous) = previous {
        if previous != *settings {
            match spooler.apply_settings(name, &previous).await {
                Ok(()) => debug!(device = name, "device settings restored"),
                Err(err) => warn!(device = name, error = %err, "could not restore device settings"),
            }
        }
    }

    result
}
