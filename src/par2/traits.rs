//! Traits and types for PAR2 recovery file generation

use crate::pausable::PausableContext;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A single progress update from a running PAR2 binary, `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Par2Progress(pub u8);

/// Trait for generating PAR2 recovery files over a set of input files.
#[async_trait]
pub trait Par2Executor: Send + Sync {
    /// Generate PAR2 recovery data for `files`, writing volumes alongside
    /// `base_par2` (the `.par2` index file path without volume suffix).
    ///
    /// `ctx` is watched for cancellation while the subprocess runs: on
    /// cancellation the child receives SIGTERM, then SIGKILL if still alive
    /// after 5 seconds.
    ///
    /// Returns every file in the output directory matching `*.par2`
    /// (case-insensitive), in lexical order.
    async fn create(
        &self,
        files: &[PathBuf],
        base_par2: &Path,
        progress: Option<tokio::sync::mpsc::UnboundedSender<Par2Progress>>,
        ctx: &PausableContext,
    ) -> crate::Result<Vec<PathBuf>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
