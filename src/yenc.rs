//! yEnc Article Builder: turns a segment's raw bytes into a ready-to-post
//! article with yEnc-encoded body, `=ybegin`/`=ypart`/`=yend` trailer, and
//! per-part/full-file CRC32.

use crate::types::{Article, Headers};

const LINE_LENGTH: usize = 128;

/// Bytes that must be escaped with a leading `0x3D` after the +42 shift.
fn is_critical(b: u8) -> bool {
    matches!(b, 0x00 | 0x0A | 0x0D | 0x3D)
}

/// yEnc-encode `data`, wrapping at exactly [`LINE_LENGTH`] output characters
/// per line (the final line may be shorter). Returns the encoded body
/// (without trailer lines) and the CRC32 of the decoded input.
fn encode_data(data: &[u8]) -> (Vec<u8>, u32) {
    let mut out = Vec::with_capacity(data.len() + data.len() / LINE_LENGTH + 16);
    let mut line = Vec::with_capacity(LINE_LENGTH);

    for &byte in data {
        let mut v = byte.wrapping_add(42);
        let escaped = is_critical(v);
        if escaped {
            v = v.wrapping_add(64);
        }

        // An escaped byte emits two output characters; flush first if they
        // wouldn't both fit, so every line is exactly LINE_LENGTH output
        // characters (the escape marker plus escaped value never split
        // across a line boundary).
        let width = if escaped { 2 } else { 1 };
        if line.len() + width > LINE_LENGTH {
            out.extend_from_slice(&line);
            out.extend_from_slice(b"\r\n");
            line.clear();
        }

        if escaped {
            line.push(0x3D);
        }
        line.push(v);

        if line.len() == LINE_LENGTH {
            out.extend_from_slice(&line);
            out.extend_from_slice(b"\r\n");
            line.clear();
        }
    }
    if !line.is_empty() {
        out.extend_from_slice(&line);
        out.extend_from_slice(b"\r\n");
    }

    let crc = crc32fast::hash(data);
    (out, crc)
}

/// Build a ready-to-post [`Article`] from a segment's raw bytes and headers.
///
/// `offset`/`file_size` locate the segment within its source file (for the
/// `=ypart begin=/end=` and `=ybegin size=` fields). `full_crc32`, when
/// `Some`, is patched into the `=yend` trailer of the last part once the
/// Finalizer has combined all parts' CRC32 values.
pub fn build(
    segment: &[u8],
    headers: &Headers,
    offset: u64,
    file_size: u64,
    full_crc32: Option<u32>,
) -> Article {
    let (body, pcrc32) = encode_data(segment);

    let mut text = String::new();
    text.push_str(&format!(
        "=ybegin part={} total={} line={} size={} name={}\r\n",
        headers.part_number, headers.total_parts, LINE_LENGTH, file_size, headers.yenc_name
    ));
    text.push_str(&format!(
        "=ypart begin={} end={}\r\n",
        offset + 1,
        offset + segment.len() as u64
    ));

    let mut out = text.into_bytes();
    out.extend_from_slice(&body);

    let is_last = headers.part_number == headers.total_parts;
    let mut trailer = format!(
        "=yend size={} part={} pcrc32={:08x}",
        segment.len(),
        headers.part_number,
        pcrc32
    );
    if is_last
        && let Some(crc) = full_crc32
    {
        trailer.push_str(&format!(" crc32={:08x}", crc));
    }
    trailer.push_str("\r\n");
    out.extend_from_slice(trailer.as_bytes());

    Article {
        headers: headers.clone(),
        body: out,
        pcrc32,
        full_crc32: if is_last { full_crc32 } else { None },
        reposts: 0,
    }
}

/// Combine two CRC32 values as if the second buffer (of length `len2` bytes)
/// had been appended to the first, without re-reading either buffer. This is
/// the standard zlib `crc32_combine` construction over GF(2) matrices.
pub fn crc32_combine(crc1: u32, crc2: u32, len2: u64) -> u32 {
    if len2 == 0 {
        return crc1;
    }

    fn times(mat: &[u32; 32], vec: u32) -> u32 {
        let mut sum = 0u32;
        let mut vec = vec;
        let mut i = 0;
        while vec != 0 {
            if vec & 1 != 0 {
                sum ^= mat[i];
            }
            vec >>= 1;
            i += 1;
        }
        sum
    }

    fn square(mat: &[u32; 32]) -> [u32; 32] {
        let mut out = [0u32; 32];
        for (n, slot) in out.iter_mut().enumerate() {
            *slot = times(mat, mat[n]);
        }
        out
    }

    let mut odd = [0u32; 32];
    odd[0] = 0xedb8_8320;
    let mut row = 1u32;
    for slot in odd.iter_mut().skip(1) {
        *slot = row;
        row <<= 1;
    }

    let mut even = square(&odd);
    odd = square(&even);

    let mut crc1 = crc1;
    let mut len2 = len2;
    loop {
        even = square(&odd);
        if len2 & 1 != 0 {
            crc1 = times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
        odd = square(&even);
        if len2 & 1 != 0 {
            crc1 = times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_critical_bytes() {
        let (encoded, _) = encode_data(&[0x00u8.wrapping_sub(42), 0x0Au8.wrapping_sub(42)]);
        // Both inputs decode to critical output bytes and must carry an escape marker.
        assert_eq!(encoded.iter().filter(|&&b| b == 0x3D).count(), 2);
    }

    #[test]
    fn round_trips_plain_bytes() {
        let input: Vec<u8> = (0..=255u8).collect();
        let (encoded, crc) = encode_data(&input);
        assert_eq!(crc, crc32fast::hash(&input));

        // Decode back and compare.
        let mut decoded = Vec::new();
        let mut i = 0;
        while i < encoded.len() {
            match encoded[i] {
                b'\r' | b'\n' => {
                    i += 1;
                    continue;
                }
                0x3D => {
                    let v = encoded[i + 1].wrapping_sub(64).wrapping_sub(42);
                    decoded.push(v);
                    i += 2;
                }
                b => {
                    decoded.push(b.wrapping_sub(42));
                    i += 1;
                }
            }
        }
        assert_eq!(decoded, input);
    }

    #[test]
    fn lines_are_128_output_chars_except_last() {
        let input = vec![1u8; 300];
        let (encoded, _) = encode_data(&input);
        for line in encoded.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            assert!(line.len() <= LINE_LENGTH);
        }
    }

    #[test]
    fn lines_stay_within_128_output_chars_with_escapes() {
        // 0x13 + 42 = 0x3D, a critical value, so every byte in this run
        // emits two output characters (the escape marker plus the escaped
        // value). A run of them must still wrap at exactly LINE_LENGTH
        // output characters, not LINE_LENGTH input bytes.
        let input = vec![0x13u8; 300];
        let (encoded, _) = encode_data(&input);
        let mut lines = 0;
        for line in encoded.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            lines += 1;
            assert!(line.len() <= LINE_LENGTH, "line exceeded {LINE_LENGTH}: {}", line.len());
        }
        assert!(lines > 1, "expected the escaped run to span multiple lines");
    }

    #[test]
    fn crc32_combine_matches_direct_hash() {
        let a = b"hello, ";
        let b = b"usenet!";
        let combined: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
        let expected = crc32fast::hash(&combined);
        let got = crc32_combine(crc32fast::hash(a), crc32fast::hash(b), b.len() as u64);
        assert_eq!(got, expected);
    }
}
