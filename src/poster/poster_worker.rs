//! Stage P3 -- Poster workers: post each Article, retrying transient
//! failures with backoff and regenerating the envelope on every attempt.

use super::encoder::ObfuscationStates;
use crate::pausable::PausableContext;
use crate::pool::PoolFacade;
use crate::retry::backoff_delay;
use crate::types::{Article, PostOutcome, PostResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Outcome of driving one Article through posting and local retry.
pub enum PostAttempt {
    /// Accepted by a provider; `article` carries the envelope that was
    /// actually accepted, for a possible Stage P4 repost.
    Success { article: Article, result: PostResult },
    /// Failed after exhausting retries or hitting a terminal outcome.
    Failed { file_number: u32, part_number: u32, message: String },
}

/// Run `workers` poster tasks to completion, pulling from `article_rx`
/// (shared across both Stage P2's direct emissions and Stage P4's reposts)
/// and sending each settled attempt to `result_tx`.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    article_rx: Arc<Mutex<mpsc::Receiver<Article>>>,
    workers: usize,
    max_retries: u32,
    retry_delay: Duration,
    message_id_domain: String,
    states: ObfuscationStates,
    pool: Arc<PoolFacade>,
    ctx: PausableContext,
    done: CancellationToken,
    result_tx: mpsc::Sender<PostAttempt>,
) {
    let workers = workers.max(1);
    let mut handles = Vec::with_capacity(workers);

    for _ in 0..workers {
        let article_rx = article_rx.clone();
        let states = states.clone();
        let pool = pool.clone();
        let ctx = ctx.clone();
        let done = done.clone();
        let result_tx = result_tx.clone();
        let message_id_domain = message_id_domain.clone();

        handles.push(tokio::spawn(async move {
            loop {
                if ctx.checkpoint().await.is_err() {
                    return;
                }

                let article = tokio::select! {
                    _ = done.cancelled() => return,
                    article = async {
                        let mut rx = article_rx.lock().await;
                        rx.recv().await
                    } => article,
                };
                let Some(mut article) = article else { return };

                let attempt = post_with_retry(
                    &mut article,
                    max_retries,
                    retry_delay,
                    &message_id_domain,
                    &states,
                    &pool,
                    &ctx,
                )
                .await;

                if result_tx.send(attempt).await.is_err() {
                    return;
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn post_with_retry(
    article: &mut Article,
    max_retries: u32,
    retry_delay: Duration,
    message_id_domain: &str,
    states: &ObfuscationStates,
    pool: &PoolFacade,
    ctx: &PausableContext,
) -> PostAttempt {
    let file_number = article.headers.file_number;
    let part_number = article.headers.part_number;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if ctx.checkpoint().await.is_err() {
            return PostAttempt::Failed {
                file_number,
                part_number,
                message: "cancelled".to_string(),
            };
        }

        let (outcome, accepted) = pool.post_article(&article.headers, &article.body).await;
        match outcome {
            PostOutcome::Ok => {
                let (provider, message_id) =
                    accepted.unwrap_or_else(|| (String::new(), article.headers.message_id.clone()));
                return PostAttempt::Success {
                    article: article.clone(),
                    result: PostResult {
                        file_number,
                        part_number,
                        message_id,
                        provider,
                        bytes: article.body.len() as u64,
                        attempts,
                    },
                };
            }
            PostOutcome::Transient if attempts <= max_retries => {
                tokio::time::sleep(backoff_delay(retry_delay, attempts)).await;
                if let Some(state) = states.lock().await.get(&file_number) {
                    state.refresh_envelope(&mut article.headers, message_id_domain);
                }
            }
            PostOutcome::Transient | PostOutcome::Permanent | PostOutcome::Auth | PostOutcome::Quota => {
                return PostAttempt::Failed {
                    file_number,
                    part_number,
                    message: format!("{outcome:?} after {attempts} attempt(s)"),
                };
            }
        }
    }
}
