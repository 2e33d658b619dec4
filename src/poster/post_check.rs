//! Stage P4 -- Post-check (optional): re-verifies each accepted article is
//! visible on the check pool after a settle delay, reposting missing
//! articles up to a configured number of times.

use super::Settled;
use super::encoder::ObfuscationStates;
use crate::pausable::PausableContext;
use crate::pool::{PoolFacade, StatResult};
use crate::types::{Article, PostResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

struct Pending {
    article: Article,
    reposts: u32,
}

/// Consume accepted articles from `accepted_rx`, check each after `delay`,
/// and either forward it to `settled_tx` once confirmed present, or repost
/// it via `article_tx` (back into Stage P3) up to `max_reposts` times.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    mut accepted_rx: mpsc::Receiver<(Article, PostResult)>,
    delay: Duration,
    max_reposts: u32,
    message_id_domain: String,
    states: ObfuscationStates,
    pool: Arc<PoolFacade>,
    ctx: PausableContext,
    done: CancellationToken,
    article_tx: mpsc::Sender<Article>,
    settled_tx: mpsc::Sender<Settled>,
) {
    // message-id -> repost bookkeeping for articles currently in flight.
    let in_flight: Arc<Mutex<HashMap<String, Pending>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut checks = Vec::new();

    loop {
        let next = tokio::select! {
            _ = done.cancelled() => break,
            next = accepted_rx.recv() => next,
        };
        let Some((article, result)) = next else { break };

        // `article.reposts` is 0 for a first-seen article and carries the
        // correct count for one re-entering via a repost's success, so it
        // must be read here rather than assumed zero -- clobbering it back
        // to 0 would let a permanently-missing article repost forever.
        let reposts = article.reposts;
        in_flight.lock().await.insert(result.message_id.clone(), Pending { article, reposts });

        let pool = pool.clone();
        let ctx = ctx.clone();
        let states = states.clone();
        let article_tx = article_tx.clone();
        let settled_tx = settled_tx.clone();
        let in_flight = in_flight.clone();
        let message_id_domain = message_id_domain.clone();

        checks.push(tokio::spawn(async move {
            if ctx.checkpoint().await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            if ctx.checkpoint().await.is_err() {
                return;
            }

            check_one(
                result,
                max_reposts,
                &message_id_domain,
                &states,
                &pool,
                &in_flight,
                &article_tx,
                &settled_tx,
            )
            .await;
        }));
    }

    for check in checks {
        let _ = check.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn check_one(
    result: PostResult,
    max_reposts: u32,
    message_id_domain: &str,
    states: &ObfuscationStates,
    pool: &PoolFacade,
    in_flight: &Arc<Mutex<HashMap<String, Pending>>>,
    article_tx: &mpsc::Sender<Article>,
    settled_tx: &mpsc::Sender<Settled>,
) {
    match pool.stat_article(&result.message_id).await {
        StatResult::Present | StatResult::Unknown => {
            in_flight.lock().await.remove(&result.message_id);
            let _ = settled_tx.send(Settled::Accepted(result)).await;
        }
        StatResult::Missing => {
            let pending = in_flight.lock().await.remove(&result.message_id);
            let Some(pending) = pending else { return };

            if pending.reposts >= max_reposts {
                let _ = settled_tx
                    .send(Settled::Failed {
                        file_number: result.file_number,
                        part_number: result.part_number,
                        message: format!("article missing on check pool after {} repost(s)", pending.reposts),
                    })
                    .await;
                return;
            }

            let mut article = pending.article;
            if let Some(state) = states.lock().await.get(&article.headers.file_number) {
                state.refresh_envelope(&mut article.headers, message_id_domain);
            }
            article.reposts = pending.reposts + 1;
            let new_pending = Pending { article: article.clone(), reposts: article.reposts };
            in_flight.lock().await.insert(article.headers.message_id.clone(), new_pending);
            let _ = article_tx.send(article).await;
        }
    }
}
