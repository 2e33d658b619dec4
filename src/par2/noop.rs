//! No-op PAR2 executor used when recovery file generation is disabled

use super::traits::{Par2Executor, Par2Progress};
use crate::pausable::PausableContext;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Executor used when `par2.enabled = false`. Any invocation is a bug in the
/// caller -- the Processor must not invoke the executor at all in that case
/// -- so this simply reports the capability as unsupported.
pub struct NoOpPar2Executor;

#[async_trait]
impl Par2Executor for NoOpPar2Executor {
    async fn create(
        &self,
        _files: &[PathBuf],
        _base_par2: &Path,
        _progress: Option<tokio::sync::mpsc::UnboundedSender<Par2Progress>>,
        _ctx: &PausableContext,
    ) -> crate::Result<Vec<PathBuf>> {
        Err(crate::Error::Par2(crate::error::Par2Error::BinaryNotFound(
            "PAR2 generation requires par2_path to be configured and point at a par2 or parpar binary"
                .into(),
        )))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_not_supported() {
        let executor = NoOpPar2Executor;
        let result = executor
            .create(&[], Path::new("out.par2"), None, &PausableContext::new())
            .await;
        assert!(matches!(result, Err(crate::Error::Par2(_))));
    }
}
