//! Batch run accounting.
//!
//! Every batch command processes items one at a time, logs and counts
//! per-item failures, and keeps going. [`RunSummary::finish`] turns a
//! non-zero failure count into an error so the process exits with status 1.

use anyhow::{bail, Result};
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl RunSummary {
    pub fn print(&self) {
        println!("  processed: {}", self.processed);
        println!("  updated: {}", self.updated);
        println!("  skipped: {}", self.skipped);
        println!("  failed: {}", self.failed);
        if self.failed == 0 {
            println!("ok");
        }
    }

    pub fn finish(self, command: &str) -> Result<()> {
        if self.failed > 0 {
            bail!("{}: {} of {} items failed", command, self.failed, self.processed);
        }
        Ok(())
    }
}
