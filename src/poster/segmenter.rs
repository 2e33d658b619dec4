//! Stage P1 -- Segmenter: reads each file sequentially in input order,
//! emitting fixed-size segments. Single-threaded; no segment buffer outlives
//! its handoff to P2.

use crate::pausable::PausableContext;
use crate::speed_limiter::SpeedLimiter;
use crate::types::{FileEntry, Segment};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// One segment's worth of raw bytes, handed to the encoder stage.
pub struct SegmentJob {
    /// Segment metadata (file, part number, offset, length)
    pub segment: Segment,
    /// Raw bytes read from disk for this segment
    pub bytes: Vec<u8>,
}

/// Emitted once a file has been fully read, carrying its content hash.
pub struct FileHash {
    /// File ordinal this hash belongs to
    pub file_number: u32,
    /// sha256 of the file content, lowercase hex
    pub sha256: String,
}

/// Run the segmenter to completion, sending segments and file hashes as
/// they become available. Returns an error only for fatal conditions
/// (cancellation); per-file I/O errors are reported via `errors_tx` so
/// sibling files keep going when `maintain_partial` is set by the caller.
pub async fn run(
    files: Vec<FileEntry>,
    article_size: u64,
    ctx: PausableContext,
    speed_limiter: SpeedLimiter,
    segment_tx: mpsc::Sender<SegmentJob>,
    hash_tx: mpsc::Sender<FileHash>,
    error_tx: mpsc::Sender<(u32, crate::Error)>,
) {
    for file in files {
        if let Err(e) = read_file(&file, article_size, &ctx, &speed_limiter, &segment_tx, &hash_tx).await {
            if matches!(e, crate::Error::Cancelled) {
                return;
            }
            let _ = error_tx.send((file.order, e)).await;
        }
    }
}

async fn read_file(
    file: &FileEntry,
    article_size: u64,
    ctx: &PausableContext,
    speed_limiter: &SpeedLimiter,
    segment_tx: &mpsc::Sender<SegmentJob>,
    hash_tx: &mpsc::Sender<FileHash>,
) -> crate::Result<()> {
    let total_parts = file.size.div_ceil(article_size).max(1) as u32;
    let mut handle = tokio::fs::File::open(&file.path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; article_size as usize];
    let mut offset = 0u64;
    let mut part = 1u32;

    loop {
        ctx.checkpoint().await?;

        let want = article_size.min(file.size - offset) as usize;
        if want == 0 {
            break;
        }

        let mut filled = 0usize;
        while filled < want {
            let n = handle.read(&mut buf[filled..want]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let bytes = buf[..filled].to_vec();
        hasher.update(&bytes);
        speed_limiter.acquire(bytes.len() as u64).await;

        let segment = Segment {
            file: file.clone(),
            part,
            total_parts,
            offset,
            length: bytes.len() as u64,
        };

        if segment_tx
            .send(SegmentJob { segment, bytes })
            .await
            .is_err()
        {
            return Ok(());
        }

        offset += filled as u64;
        part += 1;
        if filled < want {
            break;
        }
    }

    let sha256 = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    let _ = hash_tx
        .send(FileHash {
            file_number: file.order,
            sha256,
        })
        .await;

    Ok(())
}
