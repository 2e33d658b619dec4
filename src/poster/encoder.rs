//! Stage P2 -- Encoder pool: turns Segments into ready-to-post Articles.
//!
//! Workers run fully in parallel; a single Finalizer per file combines each
//! segment's pCRC32 in part-number order to obtain the file-wide CRC32, and
//! patches it into the trailer of the last article before it is emitted.

use super::segmenter::SegmentJob;
use crate::obfuscation::FileObfuscationState;
use crate::pausable::PausableContext;
use crate::types::{Article, Headers, ObfuscationPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Per-file obfuscation state, shared between the encoder and poster stages
/// so retries can regenerate the envelope without losing file-level stability.
pub type ObfuscationStates = Arc<Mutex<HashMap<u32, FileObfuscationState>>>;

/// The first article's headers for each file, captured for NZB bookkeeping
/// (subject/poster/groups are taken "from article 0" per file).
pub type FirstHeaders = Arc<Mutex<HashMap<u32, Headers>>>;

enum FinalizeJob {
    /// A non-last part's crc/length, for order-preserving accumulation only.
    Part { file_number: u32, part_number: u32, pcrc32: u32, length: u64 },
    /// The last part of a file: held until the combined CRC is known.
    Last {
        file_number: u32,
        part_number: u32,
        total_parts: u32,
        pcrc32: u32,
        length: u64,
        headers: Headers,
        bytes: Vec<u8>,
        offset: u64,
        file_size: u64,
    },
}

/// Run `workers` encoder tasks plus one finalizer task to completion.
/// Articles (including finalized last-parts) are sent to `article_tx`.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    segment_rx: mpsc::Receiver<SegmentJob>,
    workers: usize,
    policy: ObfuscationPolicy,
    groups: Vec<String>,
    default_from: String,
    message_id_domain: String,
    states: ObfuscationStates,
    first_headers: FirstHeaders,
    ctx: PausableContext,
    article_tx: mpsc::Sender<Article>,
) {
    let workers = workers.max(1);
    let segment_rx = Arc::new(Mutex::new(segment_rx));
    let (finalize_tx, finalize_rx) = mpsc::channel(workers * 2);

    let finalizer = tokio::spawn(run_finalizer(finalize_rx, article_tx.clone()));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let segment_rx = segment_rx.clone();
        let states = states.clone();
        let first_headers = first_headers.clone();
        let ctx = ctx.clone();
        let article_tx = article_tx.clone();
        let finalize_tx = finalize_tx.clone();
        let groups = groups.clone();
        let default_from = default_from.clone();
        let message_id_domain = message_id_domain.clone();

        handles.push(tokio::spawn(async move {
            loop {
                if ctx.checkpoint().await.is_err() {
                    return;
                }

                let job = {
                    let mut rx = segment_rx.lock().await;
                    rx.recv().await
                };
                let Some(job) = job else { return };

                let headers = {
                    let mut states = states.lock().await;
                    let state = states
                        .entry(job.segment.file.order)
                        .or_insert_with(|| FileObfuscationState::new(policy));
                    state.headers_for(
                        &job.segment,
                        &groups,
                        &default_from,
                        &message_id_domain,
                        job.segment
                            .file
                            .path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or("file.bin"),
                    )
                };

                if headers.part_number == 1 {
                    first_headers.lock().await.insert(headers.file_number, headers.clone());
                }

                let is_last = job.segment.part == job.segment.total_parts;
                if is_last {
                    let pcrc32 = crc32fast::hash(&job.bytes);
                    let msg = FinalizeJob::Last {
                        file_number: job.segment.file.order,
                        part_number: job.segment.part,
                        total_parts: job.segment.total_parts,
                        pcrc32,
                        length: job.bytes.len() as u64,
                        headers,
                        bytes: job.bytes,
                        offset: job.segment.offset,
                        file_size: job.segment.file.size,
                    };
                    if finalize_tx.send(msg).await.is_err() {
                        return;
                    }
                } else {
                    let article = crate::yenc::build(
                        &job.bytes,
                        &headers,
                        job.segment.offset,
                        job.segment.file.size,
                        None,
                    );
                    let msg = FinalizeJob::Part {
                        file_number: job.segment.file.order,
                        part_number: job.segment.part,
                        pcrc32: article.pcrc32,
                        length: job.bytes.len() as u64,
                    };
                    if finalize_tx.send(msg).await.is_err() || article_tx.send(article).await.is_err() {
                        return;
                    }
                }
            }
        }));
    }
    drop(finalize_tx);

    for handle in handles {
        let _ = handle.await;
    }
    let _ = finalizer.await;
}

#[derive(Default)]
struct FileAccumulator {
    next_expected: u32,
    accumulated_crc: Option<u32>,
    pending: HashMap<u32, (u32, u64)>,
    held_last: Option<FinalizeJob>,
}

async fn run_finalizer(mut rx: mpsc::Receiver<FinalizeJob>, article_tx: mpsc::Sender<Article>) {
    let mut files: HashMap<u32, FileAccumulator> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        let (file_number, part_number, pcrc32, length, total_parts) = match &msg {
            FinalizeJob::Part { file_number, part_number, pcrc32, length } => {
                (*file_number, *part_number, *pcrc32, *length, None)
            }
            FinalizeJob::Last {
                file_number,
                part_number,
                total_parts,
                pcrc32,
                length,
                ..
            } => (*file_number, *part_number, *pcrc32, *length, Some(*total_parts)),
        };

        let acc = files.entry(file_number).or_insert_with(|| FileAccumulator {
            next_expected: 1,
            ..Default::default()
        });

        if total_parts.is_some() {
            acc.held_last = Some(msg);
        }
        acc.pending.insert(part_number, (pcrc32, length));

        while let Some((pcrc32, length)) = acc.pending.remove(&acc.next_expected) {
            acc.accumulated_crc = Some(match acc.accumulated_crc {
                None => pcrc32,
                Some(running) => crate::yenc::crc32_combine(running, pcrc32, length),
            });
            acc.next_expected += 1;
        }

        let ready = match &acc.held_last {
            Some(FinalizeJob::Last { total_parts, .. }) => acc.next_expected > *total_parts,
            _ => false,
        };

        if ready {
            let crc = acc.accumulated_crc.expect("last part always contributes to the accumulator");
            if let Some(FinalizeJob::Last {
                headers,
                bytes,
                offset,
                file_size,
                ..
            }) = files.remove(&file_number).and_then(|mut f| f.held_last.take())
            {
                let article = crate::yenc::build(&bytes, &headers, offset, file_size, Some(crc));
                if article_tx.send(article).await.is_err() {
                    return;
                }
            }
        }
    }
}
