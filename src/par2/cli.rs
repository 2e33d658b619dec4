//! CLI-based PAR2 executor using an external `par2` or `parpar` binary

use super::parser::{block_size, parse_percent, split_lines};
use super::traits::{Par2Executor, Par2Progress};
use crate::pausable::PausableContext;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

/// Grace period between SIGTERM and SIGKILL for a cancelled subprocess (§5).
const KILL_GRACE: Duration = Duration::from_secs(5);

/// CLI-based PAR2 executor. The binary's basename selects the invocation
/// style: `parpar` gets parpar's flag grammar, anything else is treated as
/// the reference `par2` CLI.
pub struct CliPar2Executor {
    binary_path: PathBuf,
    article_size: u64,
    redundancy: String,
    volume_size_bytes: u64,
    max_input_slices: u32,
    extra_options: Vec<String>,
}

impl CliPar2Executor {
    /// Build an executor from the configured binary path and posting/PAR2 settings.
    pub fn new(
        binary_path: PathBuf,
        article_size: u64,
        redundancy: String,
        volume_size_bytes: u64,
        max_input_slices: u32,
        extra_options: Vec<String>,
    ) -> Self {
        Self {
            binary_path,
            article_size,
            redundancy,
            volume_size_bytes,
            max_input_slices,
            extra_options,
        }
    }

    /// Locate `par2` or `parpar` on `PATH`, preferring `parpar` if both are available.
    pub fn from_path(
        article_size: u64,
        redundancy: String,
        volume_size_bytes: u64,
        max_input_slices: u32,
        extra_options: Vec<String>,
    ) -> Option<Self> {
        let binary_path = which::which("parpar").or_else(|_| which::which("par2")).ok()?;
        Some(Self::new(
            binary_path,
            article_size,
            redundancy,
            volume_size_bytes,
            max_input_slices,
            extra_options,
        ))
    }

    fn is_parpar(&self) -> bool {
        self.binary_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("parpar"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Par2Executor for CliPar2Executor {
    async fn create(
        &self,
        files: &[PathBuf],
        base_par2: &Path,
        progress: Option<UnboundedSender<Par2Progress>>,
        ctx: &PausableContext,
    ) -> crate::Result<Vec<PathBuf>> {
        let largest = files
            .iter()
            .filter_map(|f| std::fs::metadata(f).ok())
            .map(|m| m.len())
            .max()
            .unwrap_or(self.article_size);
        let block = block_size(self.article_size, largest);

        let mut cmd = Command::new(&self.binary_path);
        if self.is_parpar() {
            cmd.arg(format!("-s{block}"))
                .arg(format!("-r{}", self.redundancy))
                .arg("--max-input-slices")
                .arg(self.max_input_slices.to_string())
                .arg("-o")
                .arg(base_par2);
        } else {
            cmd.arg("create")
                .arg(format!("-s{block}"))
                .arg(format!("-r{}", self.redundancy))
                .arg(format!("-n{}", self.max_input_slices.max(1)))
                .arg(format!("-m{}", self.volume_size_bytes.max(16)));
            cmd.arg(base_par2);
        }
        cmd.args(&self.extra_options);
        cmd.args(files);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| crate::error::Par2Error::Spawn(format!("{} failed to start: {e}", self.name())))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| crate::error::Par2Error::Spawn("failed to capture stdout".into()))?;

        let mut last_percent = 0u8;
        let mut buf = [0u8; 4096];
        let mut pending = String::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = ctx.wait_cancelled(), if !cancelled => {
                    cancelled = true;
                    terminate(&mut child, self.name()).await;
                }
                result = stdout.read(&mut buf) => {
                    let n = result
                        .map_err(|e| crate::error::Par2Error::Spawn(format!("failed reading stdout: {e}")))?;
                    if n == 0 {
                        break;
                    }
                    pending.push_str(&String::from_utf8_lossy(&buf[..n]));

                    // Keep any trailing partial line in `pending` for the next read.
                    let last_break = pending
                        .rfind(['\n', '\r'])
                        .map(|i| i + 1)
                        .unwrap_or(0);
                    let complete = pending[..last_break].to_string();
                    pending.drain(..last_break);

                    for line in split_lines(&complete) {
                        if let Some(pct) = parse_percent(line)
                            && pct >= last_percent
                        {
                            last_percent = pct;
                            if let Some(tx) = &progress {
                                let _ = tx.send(Par2Progress(pct));
                            }
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| crate::error::Par2Error::Spawn(format!("failed waiting on {}: {e}", self.name())))?;

        if cancelled {
            return Err(crate::Error::Cancelled);
        }

        if !status.success() {
            let mut stderr_buf = Vec::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_end(&mut stderr_buf).await;
            }
            return Err(crate::error::Par2Error::ExitFailure {
                status: status.code().unwrap_or(-1),
                detail: String::from_utf8_lossy(&stderr_buf).into_owned(),
            }
            .into());
        }

        let out_dir = base_par2.parent().unwrap_or_else(|| Path::new("."));
        let mut outputs: Vec<PathBuf> = std::fs::read_dir(out_dir)
            .map_err(crate::Error::Io)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("par2"))
                    .unwrap_or(false)
            })
            .collect();

        if outputs.is_empty() {
            return Err(crate::error::Par2Error::NoOutput.into());
        }

        outputs.sort();
        Ok(outputs)
    }

    fn name(&self) -> &'static str {
        if self.is_parpar() { "parpar" } else { "par2" }
    }
}

/// Send SIGTERM (unix) or kill directly (other platforms), then escalate to
/// SIGKILL after [`KILL_GRACE`] if the process is still alive.
async fn terminate(child: &mut tokio::process::Child, name: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is this child's own pid as reported by tokio; sending
            // SIGTERM to it is the same operation `kill(1)` would perform.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        tracing::warn!(binary = name, "PAR2 subprocess did not exit within grace period, sending SIGKILL");
        let _ = child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_parpar_detects_basename() {
        let executor = CliPar2Executor::new(
            PathBuf::from("/usr/local/bin/parpar"),
            750_000,
            "10".into(),
            0,
            0,
            Vec::new(),
        );
        assert!(executor.is_parpar());
        assert_eq!(executor.name(), "parpar");
    }

    #[test]
    fn is_parpar_false_for_par2() {
        let executor = CliPar2Executor::new(
            PathBuf::from("/usr/bin/par2"),
            750_000,
            "10".into(),
            0,
            0,
            Vec::new(),
        );
        assert!(!executor.is_parpar());
        assert_eq!(executor.name(), "par2");
    }
}
