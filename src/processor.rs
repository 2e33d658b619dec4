//! Processor (G): job-level orchestrator.
//!
//! Grounded on `usenet-dl::downloader::download_task::orchestration::run_download_task`
//! (phased top-level lifecycle for a single unit of work) and
//! `usenet-dl::downloader::post_process` (chaining an external recovery-data
//! step into the move-to-destination step). Here the direction is inverted:
//! generate recovery data *before* posting, post, then move sources instead
//! of downloaded output.

use crate::config::{Config, JobRequest};
use crate::nzb;
use crate::par2::{Par2Executor, Par2Progress};
use crate::pausable::PausableContext;
use crate::pool::PoolFacade;
use crate::poster::{self, PosterParams};
use crate::progress::ProgressManager;
use crate::types::{FileEntry, JobId, PosterOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything produced by running a single job to completion.
pub struct ProcessOutcome {
    /// Path the NZB was written to, if at least one file posted successfully
    pub nzb_path: Option<PathBuf>,
    /// Combined per-file results/errors across data and PAR2 files
    pub outcome: PosterOutcome,
}

/// Job-level orchestrator: resolves input files, runs PAR2 (D) if enabled,
/// drives the Poster (E) over data and PAR2 files, assembles the NZB (F),
/// and relocates source files.
pub struct Processor {
    pool: Arc<PoolFacade>,
    par2_executor: Arc<dyn Par2Executor>,
    config: Config,
    progress: Option<Arc<ProgressManager>>,
}

impl Processor {
    /// Build a processor from a pool facade, PAR2 executor, and config snapshot.
    pub fn new(
        pool: Arc<PoolFacade>,
        par2_executor: Arc<dyn Par2Executor>,
        config: Config,
        progress: Option<Arc<ProgressManager>>,
    ) -> Self {
        Self {
            pool,
            par2_executor,
            config,
            progress,
        }
    }

    /// Run one job to completion. Any fatal error fails the whole job;
    /// per-file errors are collected into the returned outcome instead.
    pub async fn process(
        &self,
        job_id: JobId,
        request: &JobRequest,
        ctx: PausableContext,
    ) -> crate::Result<ProcessOutcome> {
        tracing::info!(job_id = %job_id, paths = ?request.paths, "starting job");

        // Phase 1: resolve input files (expand directories, skip symlinks
        // escaping the configured roots).
        let files = resolve_files(&request.paths)?;
        if files.is_empty() {
            return Err(crate::Error::Fatal("no input files resolved for job".to_string()));
        }

        // Phase 2: PAR2 recovery data, if enabled.
        ctx.checkpoint().await?;
        let par2_files = if self.config.par2.enabled {
            self.create_par2(job_id, &files, &ctx).await?
        } else {
            Vec::new()
        };

        // Phase 3: post data files.
        let poster_workers = self.poster_worker_count();
        let mut outcome = poster::run(PosterParams {
            files: files.clone(),
            posting: self.config.posting.clone(),
            post_check: self.config.post_check.clone(),
            poster_workers,
            pool: self.pool.clone(),
            ctx: ctx.clone(),
            progress: self.progress.clone(),
        })
        .await;

        // Phase 4: post PAR2 files, under their own obfuscation policy,
        // numbered after the data files.
        if !par2_files.is_empty() {
            let mut par2_posting = self.config.posting.clone();
            par2_posting.obfuscation_policy = self.config.posting.par2_obfuscation_policy;

            let par2_outcome = poster::run(PosterParams {
                files: par2_files,
                posting: par2_posting,
                post_check: self.config.post_check.clone(),
                poster_workers,
                pool: self.pool.clone(),
                ctx: ctx.clone(),
                progress: self.progress.clone(),
            })
            .await;

            outcome.per_file_results.extend(par2_outcome.per_file_results);
            outcome.errors.extend(par2_outcome.errors);
        }

        // Phase 5: assemble the NZB, unless nothing posted (or only partial
        // success and `maintain_partial` is off).
        let maintain_partial = self.config.posting.maintain_partial;
        let should_assemble =
            !outcome.per_file_results.is_empty() && (outcome.errors.is_empty() || maintain_partial);

        let nzb_path = if should_assemble {
            let path = self.nzb_output_path(&files);
            nzb::write(&path, &outcome.per_file_results, chrono::Utc::now().timestamp()).await?;
            tracing::info!(job_id = %job_id, nzb_path = %path.display(), "wrote NZB");
            Some(path)
        } else {
            tracing::warn!(job_id = %job_id, errors = outcome.errors.len(), "no NZB written");
            None
        };

        // Phase 6: relocate source files once the job has produced output.
        if nzb_path.is_some() {
            self.move_sources(&files).await;
        }

        tracing::info!(
            job_id = %job_id,
            files_ok = outcome.per_file_results.len(),
            files_failed = outcome.errors.len(),
            "job finished"
        );

        Ok(ProcessOutcome { nzb_path, outcome })
    }

    async fn create_par2(
        &self,
        job_id: JobId,
        files: &[FileEntry],
        ctx: &PausableContext,
    ) -> crate::Result<Vec<FileEntry>> {
        let base_par2 = self.par2_base_path(files);
        let inputs: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<Par2Progress>();
        let logger = tokio::spawn(async move {
            while let Some(Par2Progress(pct)) = progress_rx.recv().await {
                tracing::debug!(job_id = %job_id, percent = pct, "PAR2 progress");
            }
        });

        let result = self.par2_executor.create(&inputs, &base_par2, Some(progress_tx), ctx).await;
        let _ = logger.await;

        let produced = result.map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "PAR2 generation failed");
            e
        })?;

        let start_order = files.len() as u32;
        let mut par2_files = Vec::with_capacity(produced.len());
        for (i, path) in produced.into_iter().enumerate() {
            let size = std::fs::metadata(&path)?.len();
            par2_files.push(FileEntry {
                path,
                size,
                order: start_order + i as u32 + 1,
            });
        }
        Ok(par2_files)
    }

    fn poster_worker_count(&self) -> usize {
        let total: u32 = self
            .config
            .servers
            .iter()
            .filter(|s| s.enabled && s.post)
            .map(|s| s.max_connections)
            .sum();
        total.max(1) as usize
    }

    fn par2_base_path(&self, files: &[FileEntry]) -> PathBuf {
        let name = job_basename(files);
        self.config.output_dir.join(format!("{name}.par2"))
    }

    fn nzb_output_path(&self, files: &[FileEntry]) -> PathBuf {
        let name = job_basename(files);
        self.config.output_dir.join(format!("{name}.nzb"))
    }

    async fn move_sources(&self, files: &[FileEntry]) {
        for file in files {
            let Some(name) = file.path.file_name() else { continue };
            let dest = self.config.output_dir.join(name);
            if dest == file.path {
                continue;
            }
            if let Err(e) = tokio::fs::rename(&file.path, &dest).await {
                tracing::warn!(
                    path = %file.path.display(),
                    error = %e,
                    "rename failed, falling back to copy+delete"
                );
                if let Err(e2) = copy_then_remove(&file.path, &dest).await {
                    tracing::error!(
                        path = %file.path.display(),
                        error = %e2,
                        "failed to move source file to output_dir"
                    );
                }
            }
        }
    }
}

fn job_basename(files: &[FileEntry]) -> String {
    files
        .first()
        .and_then(|f| f.path.file_stem())
        .and_then(|s| s.to_str())
        .unwrap_or("postie-job")
        .to_string()
}

async fn copy_then_remove(src: &Path, dest: &Path) -> crate::Result<()> {
    tokio::fs::copy(src, dest).await?;
    tokio::fs::remove_file(src).await?;
    Ok(())
}

/// Expand `paths` into an ordered, deduplicated file list. Directories are
/// walked recursively; symlinks are followed only when their target stays
/// within one of the originally-supplied roots.
fn resolve_files(paths: &[PathBuf]) -> crate::Result<Vec<FileEntry>> {
    let roots: Vec<PathBuf> = paths.iter().filter_map(|p| p.canonicalize().ok()).collect();

    let mut collected: Vec<PathBuf> = Vec::new();
    for path in paths {
        collect(path, &roots, &mut collected)?;
    }
    collected.sort();
    collected.dedup();

    let mut files = Vec::with_capacity(collected.len());
    for (i, path) in collected.into_iter().enumerate() {
        let size = std::fs::metadata(&path)?.len();
        files.push(FileEntry {
            path,
            size,
            order: (i + 1) as u32,
        });
    }
    Ok(files)
}

fn collect(path: &Path, roots: &[PathBuf], out: &mut Vec<PathBuf>) -> crate::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;

    if meta.file_type().is_symlink() {
        let Ok(target) = std::fs::canonicalize(path) else {
            return Ok(());
        };
        if !roots.iter().any(|root| target.starts_with(root)) {
            tracing::warn!(path = %path.display(), "skipping symlink pointing outside configured roots");
            return Ok(());
        }
        return collect(&target, roots, out);
    }

    if meta.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        entries.sort();
        for entry in entries {
            collect(&entry, roots, out)?;
        }
    } else {
        out.push(path.to_path_buf());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_files_expands_directory_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.bin"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.bin"), b"a").unwrap();

        let files = resolve_files(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].path.ends_with("a.bin"));
        assert!(files[1].path.ends_with("b.bin"));
        assert_eq!(files[0].order, 1);
        assert_eq!(files[1].order, 2);
    }

    #[test]
    fn resolve_files_rejects_symlink_outside_roots() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("secret.bin");
        std::fs::write(&target, b"secret").unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, dir.path().join("link.bin")).unwrap();
            let files = resolve_files(&[dir.path().to_path_buf()]).unwrap();
            assert!(files.is_empty());
        }
    }

    #[test]
    fn job_basename_uses_first_file_stem() {
        let files = vec![FileEntry {
            path: PathBuf::from("/tmp/movie.mkv"),
            size: 10,
            order: 1,
        }];
        assert_eq!(job_basename(&files), "movie");
    }
}
