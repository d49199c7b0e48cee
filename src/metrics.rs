//! Run-scoped metrics sink.
//!
//! Records are appended as JSONL to `metrics.jsonl` inside the run directory,
//! one object per call. There is no external tracking backend; this file plus
//! the tracing output is the whole observability surface.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;

const METRICS_FILE: &str = "metrics.jsonl";

/// Per-batch adversarial training record.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GanBatchRecord {
    pub epoch: usize,
    pub loss_d: f32,
    pub loss_d_real: f32,
    pub loss_d_fake: f32,
    pub loss_g: f32,
}

/// Per-epoch invertible training record.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct InnEpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
}

/// Append-only JSONL metrics writer for one run.
pub struct MetricsSink {
    file: File,
    path: PathBuf,
}

impl MetricsSink {
    /// Open (or create) the metrics file under `run_dir`.
    ///
    /// # Errors
    /// Returns an error if the run directory or file cannot be created.
    pub fn new(run_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(run_dir)?;
        let path = run_dir.join(METRICS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    /// Append one record as a JSON line.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn log<R: Serialize>(&mut self, record: &R) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }

    /// Path of the underlying metrics file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
