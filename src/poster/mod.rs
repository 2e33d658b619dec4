//! Poster (E): the segment pipeline. Drives a job's files through four
//! concurrent stages connected by bounded channels under a shared pausable
//! context -- segment, encode, post with retry, and optionally post-check.
//!
//! - [`segmenter`] — Stage P1, single-threaded sequential reads
//! - [`encoder`] — Stage P2, CPU-bound yEnc encoding pool plus the per-file CRC Finalizer
//! - [`poster_worker`] — Stage P3, NNTP posting with local retry
//! - [`post_check`] — Stage P4, optional propagation verification and repost

mod encoder;
mod post_check;
mod poster_worker;
mod segmenter;

use crate::config::{PostCheckConfig, PostingConfig};
use crate::pausable::PausableContext;
use crate::pool::PoolFacade;
use crate::progress::ProgressManager;
use crate::speed_limiter::SpeedLimiter;
use crate::types::{FileEntry, FilePostError, FilePostResult, Headers, PostResult, PosterOutcome};
use encoder::{FirstHeaders, ObfuscationStates};
use poster_worker::PostAttempt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A terminal outcome for one article, as observed by the Collector.
enum Settled {
    /// Accepted and (if post-check is enabled) confirmed present.
    Accepted(PostResult),
    /// Permanently failed; never retried again.
    Failed { file_number: u32, part_number: u32, message: String },
}

/// Everything the Poster needs to drive a job's files to completion.
pub struct PosterParams {
    /// Files to post, in job order
    pub files: Vec<FileEntry>,
    /// Posting pipeline tuning
    pub posting: PostingConfig,
    /// Post-check settings
    pub post_check: PostCheckConfig,
    /// Total poster (Stage P3) worker count, typically the sum of posting providers' connection limits
    pub poster_workers: usize,
    /// Multi-provider pool facade
    pub pool: Arc<PoolFacade>,
    /// Pause/cancel handle for this job
    pub ctx: PausableContext,
    /// Optional progress sink; one sub-task is registered per file
    pub progress: Option<Arc<ProgressManager>>,
}

const CHANNEL_FACTOR: usize = 2;

/// Run the full Poster pipeline over `params.files` to completion.
pub async fn run(params: PosterParams) -> PosterOutcome {
    let PosterParams {
        files,
        posting,
        post_check,
        poster_workers,
        pool,
        ctx,
        progress,
    } = params;

    if files.is_empty() {
        return PosterOutcome::default();
    }

    let article_size = posting.article_size_bytes.max(1);
    let mut aggs: HashMap<u32, FileAgg> = HashMap::new();
    for file in &files {
        let total_parts = file.size.div_ceil(article_size).max(1) as u32;
        aggs.insert(
            file.order,
            FileAgg {
                file_name: file_name_of(file),
                total_parts,
                settled_parts: 0,
                succeeded: Vec::new(),
                sha256: None,
                fatal: None,
                progress_id: progress.as_ref().map(|_| Uuid::new_v4()),
            },
        );
    }
    if let Some(progress) = &progress {
        for (file_number, agg) in &aggs {
            if let Some(id) = agg.progress_id {
                progress.register(id, format!("file #{file_number} {}", agg.file_name), agg.total_parts as u64);
            }
        }
    }

    let encoder_workers = if posting.encoder_workers == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    } else {
        posting.encoder_workers
    };
    let poster_workers = poster_workers.max(1);
    let speed_limiter = SpeedLimiter::new(if posting.throttle_bytes_per_sec == 0 {
        None
    } else {
        Some(posting.throttle_bytes_per_sec)
    });

    let states: ObfuscationStates = Arc::new(Mutex::new(HashMap::new()));
    let first_headers: FirstHeaders = Arc::new(Mutex::new(HashMap::new()));
    let done = CancellationToken::new();

    let (segment_tx, segment_rx) = mpsc::channel(encoder_workers * CHANNEL_FACTOR);
    let (hash_tx, mut hash_rx) = mpsc::channel(files.len().max(1));
    let (seg_error_tx, mut seg_error_rx) = mpsc::channel(files.len().max(1));
    let (article_tx, article_rx) = mpsc::channel(poster_workers * CHANNEL_FACTOR);
    let repost_tx = article_tx.clone();
    let article_rx = Arc::new(Mutex::new(article_rx));
    let (attempt_tx, mut attempt_rx) = mpsc::channel(poster_workers * CHANNEL_FACTOR);
    let (accepted_tx, accepted_rx) = mpsc::channel(poster_workers * CHANNEL_FACTOR);
    let (settled_tx, mut settled_rx) = mpsc::channel(poster_workers * CHANNEL_FACTOR);

    let p1 = tokio::spawn(segmenter::run(
        files.clone(),
        article_size,
        ctx.clone(),
        speed_limiter,
        segment_tx,
        hash_tx,
        seg_error_tx,
    ));

    let p2 = tokio::spawn(encoder::run(
        segment_rx,
        encoder_workers,
        posting.obfuscation_policy,
        posting.groups.clone(),
        posting.default_from.clone(),
        posting.message_id_domain.clone(),
        states.clone(),
        first_headers.clone(),
        ctx.clone(),
        article_tx,
    ));

    let p3 = tokio::spawn(poster_worker::run(
        article_rx,
        poster_workers,
        posting.max_retries,
        posting.retry_delay,
        posting.message_id_domain.clone(),
        states.clone(),
        pool.clone(),
        ctx.clone(),
        done.clone(),
        attempt_tx,
    ));

    let p4 = if post_check.enabled {
        Some(tokio::spawn(post_check::run(
            accepted_rx,
            post_check.delay,
            post_check.max_reposts,
            posting.message_id_domain.clone(),
            states.clone(),
            pool.clone(),
            ctx.clone(),
            done.clone(),
            repost_tx,
            settled_tx.clone(),
        )))
    } else {
        drop(accepted_rx);
        drop(repost_tx);
        None
    };

    let post_check_enabled = post_check.enabled;
    let router = tokio::spawn(async move {
        while let Some(attempt) = attempt_rx.recv().await {
            match attempt {
                PostAttempt::Success { article, result } if post_check_enabled => {
                    if accepted_tx.send((article, result)).await.is_err() {
                        return;
                    }
                }
                PostAttempt::Success { result, .. } => {
                    if settled_tx.send(Settled::Accepted(result)).await.is_err() {
                        return;
                    }
                }
                PostAttempt::Failed { file_number, part_number, message } => {
                    if settled_tx
                        .send(Settled::Failed { file_number, part_number, message })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    });

    let grand_total: u64 = aggs.values().map(|a| a.total_parts as u64).sum();
    let mut settled_count = 0u64;
    let mut remaining_files: usize = aggs.len();

    while remaining_files > 0 {
        let settled_file: Option<u32> = tokio::select! {
            _ = ctx.wait_cancelled() => break,
            msg = settled_rx.recv() => {
                let Some(msg) = msg else { break };
                settled_count += 1;
                match msg {
                    Settled::Accepted(result) => {
                        let file_number = result.file_number;
                        if let Some(agg) = aggs.get_mut(&file_number) {
                            agg.settled_parts += 1;
                            agg.succeeded.push(result);
                            if agg.is_done() {
                                remaining_files -= 1;
                            }
                        }
                        Some(file_number)
                    }
                    Settled::Failed { file_number, .. } => {
                        if let Some(agg) = aggs.get_mut(&file_number) {
                            agg.settled_parts += 1;
                            if agg.is_done() {
                                remaining_files -= 1;
                            }
                        }
                        Some(file_number)
                    }
                }
            }
            hash = hash_rx.recv() => {
                let Some(hash) = hash else { continue };
                if let Some(agg) = aggs.get_mut(&hash.file_number) {
                    agg.sha256 = Some(hash.sha256);
                }
                continue;
            }
            err = seg_error_rx.recv() => {
                let Some((file_number, error)) = err else { continue };
                if let Some(agg) = aggs.get_mut(&file_number)
                    && agg.fatal.is_none()
                {
                    agg.fatal = Some(error.to_string());
                    if agg.settled_parts == 0 {
                        remaining_files -= 1;
                    }
                }
                continue;
            }
        };

        if let (Some(progress), Some(file_number)) = (&progress, settled_file)
            && let Some(agg) = aggs.get(&file_number)
            && let Some(id) = agg.progress_id
        {
            progress.update(id, agg.settled_parts as u64);
        }

        if settled_count >= grand_total {
            break;
        }
    }

    done.cancel();
    let _ = p1.await;
    let _ = p2.await;
    let _ = p3.await;
    if let Some(p4) = p4 {
        let _ = p4.await;
    }
    let _ = router.await;

    if let Some(progress) = &progress {
        for agg in aggs.values() {
            if let Some(id) = agg.progress_id {
                progress.finish(id);
            }
        }
    }

    finalize(aggs, &first_headers).await
}

fn file_name_of(file: &FileEntry) -> String {
    file.path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file.bin")
        .to_string()
}

struct FileAgg {
    file_name: String,
    total_parts: u32,
    settled_parts: u32,
    succeeded: Vec<PostResult>,
    sha256: Option<String>,
    fatal: Option<String>,
    progress_id: Option<Uuid>,
}

impl FileAgg {
    fn is_done(&self) -> bool {
        self.settled_parts >= self.total_parts
    }
}

async fn finalize(aggs: HashMap<u32, FileAgg>, first_headers: &FirstHeaders) -> PosterOutcome {
    let first_headers = first_headers.lock().await;
    let mut outcome = PosterOutcome::default();

    let mut entries: Vec<(u32, FileAgg)> = aggs.into_iter().collect();
    entries.sort_by_key(|(n, _)| *n);

    for (file_number, agg) in entries {
        if let Some(fatal) = &agg.fatal
            && agg.succeeded.is_empty()
        {
            outcome.errors.push(FilePostError {
                file_number,
                file_name: agg.file_name,
                message: fatal.clone(),
            });
            continue;
        }

        if agg.succeeded.is_empty() {
            outcome.errors.push(FilePostError {
                file_number,
                file_name: agg.file_name,
                message: "no segments were successfully posted".to_string(),
            });
            continue;
        }

        let headers: Option<&Headers> = first_headers.get(&file_number);
        let (subject, poster, groups) = match headers {
            Some(h) => (h.subject.clone(), h.from.clone(), h.groups.clone()),
            None => (agg.file_name.clone(), String::new(), Vec::new()),
        };

        outcome.per_file_results.push(FilePostResult {
            file_number,
            file_name: agg.file_name,
            subject,
            poster,
            groups,
            sha256: agg.sha256.unwrap_or_default(),
            segments: agg.succeeded,
        });
    }

    outcome
}
