// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Last-resort delivery through an operator-supplied automation script,
// invoked as `<script> <file> <device>`. PowerShell scripts go through
// `powershell -File`. Verification is blind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{Device, StrategyKind};

use super::{JobContext, Strategy, StrategyResult, run_helper};
use crate::verify::Verifier;

pub struct ScriptStrategy {
    verifier: Arc<Verifier>,
    script: Option<PathBuf>,
}

impl ScriptStrategy {
    pub fn new(verifier: Arc<Verifier>, script: Option<PathBuf>) -> Self {
        Self { verifier, script }
    }
}

/// Program and arguments that run `script` for one job.
fn invocation(script: &Path, file: &Path, device: &str) -> (PathBuf, Vec<String>) {
    let file = file.display().to_string();
    let is_powershell = script
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("ps1"));
    if is_powershell {
        (
            PathBuf::from("powershell"),
            vec![
                "-NoProfile".into(),
                "-ExecutionPolicy".into(),
                "Bypass".into(),
                "-File".into(),
                script.display().to_string(),
                file,
                device.to_string(),
            ],
        )
    } else {
        (script.to_path_buf(), vec![file, device.to_string()])
    }
}

#[async_trait]
impl Strategy for ScriptStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Script
    }

    #[instrument(skip_all, fields(job = %ctx.job_id(), device = %device.id))]
    async fn attempt(&self, ctx: &JobContext, device: &Device) -> Result<StrategyResult> {
        let Some(script) = &self.script else {
            return Ok(StrategyResult::skipped("no automation script configured"));
        };
        let (program, args) = invocation(script, &ctx.job.source, &device.name);
        run_helper(self.kind(), &program, &args).await?;
        Ok(StrategyResult::delivered(
            self.verifier.confirm_blind(device).await,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powershell_scripts_run_through_powershell() {
        let (program, args) = invocation(
            Path::new("C:/tools/print.PS1"),
            Path::new("C:/jobs/a.pdf"),
            "Office Laser",
        );
        assert_eq!(program, PathBuf::from("powershell"));
        assert_eq!(args.last().map(String::as_str), Some("Office Laser"));
        assert!(args.contains(&"-File".to_string()));
    }

    #[test]
    fn other_scripts_run_directly() {
        let (program, args) = invocation(Path::new("/opt/print.sh"), Path::new("/jobs/a.pdf"), "P");
        assert_eq!(program, PathBuf::from("/opt/print.sh"));
        assert_eq!(args, vec!["/jobs/a.pdf".to_string(), "P".to_string()]);
    }
}
