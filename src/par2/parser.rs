//! Block-size arithmetic and progress-line parsing for PAR2 binaries.

/// PAR2's hard limit on the number of source blocks in a recovery set.
const MAX_BLOCKS: u64 = 32768;

/// Compute the PAR2 block size for a file set given the configured article
/// size and the largest input file, keeping total block count within
/// [`MAX_BLOCKS`]. Clamped to be at least `article_size`.
pub fn block_size(article_size: u64, largest_file_size: u64) -> u64 {
    if article_size == 0 {
        return largest_file_size.max(1);
    }
    let parts = largest_file_size.div_ceil(article_size * MAX_BLOCKS).max(1);
    (article_size * parts).max(article_size)
}

/// Split a byte stream into lines, treating `\n`, `\r\n`, and bare `\r` all
/// as terminators. `parpar` updates progress on a single CR-terminated line,
/// so a plain `split('\n')` would never observe it.
pub fn split_lines(chunk: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = chunk.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&chunk[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&chunk[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < bytes.len() {
        lines.push(&chunk[start..]);
    }
    lines
}

/// Extract a trailing `NN%` or `Processing: NN%` percentage from a progress
/// line. Returns `None` for unparseable lines -- those are still treated as
/// a liveness signal by the caller, just without a progress update.
pub fn parse_percent(line: &str) -> Option<u8> {
    let trimmed = line.trim();
    let digits_end = trimmed.strip_suffix('%')?;
    let digits_start = digits_end
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    digits_end[digits_start..].parse::<u8>().ok().map(|p| p.min(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_stays_within_max_blocks() {
        let article_size = 750_000;
        let file_size = 750_000 * 40_000; // would need 40000 blocks at article_size
        let size = block_size(article_size, file_size);
        let blocks = file_size.div_ceil(size);
        assert!(blocks <= MAX_BLOCKS);
        assert!(size >= article_size);
    }

    #[test]
    fn block_size_clamped_to_article_size_for_small_files() {
        assert_eq!(block_size(750_000, 1000), 750_000);
    }

    #[test]
    fn split_lines_handles_bare_cr() {
        let lines = split_lines("Processing: 10%\rProcessing: 20%\rProcessing: 30%\n");
        assert_eq!(lines, vec!["Processing: 10%", "Processing: 20%", "Processing: 30%"]);
    }

    #[test]
    fn split_lines_handles_crlf() {
        let lines = split_lines("a\r\nb\r\n");
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn parse_percent_plain() {
        assert_eq!(parse_percent("45%"), Some(45));
    }

    #[test]
    fn parse_percent_with_prefix() {
        assert_eq!(parse_percent("Processing: 63%"), Some(63));
    }

    #[test]
    fn parse_percent_rejects_non_percent_line() {
        assert_eq!(parse_percent("Loading source files"), None);
    }
}
