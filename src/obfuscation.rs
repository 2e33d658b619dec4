//! Obfuscation Policy: decides subject, yEnc name, date, poster, message-id,
//! and groups for each article, per §4.2's substitution table.

use crate::types::{Headers, ObfuscationPolicy, Segment};
use rand::Rng;
use rand::distributions::Alphanumeric;

const TOKEN_LEN: usize = 24;
const LOCAL_LEN: usize = 8;

/// Per-file state carried across articles so `partial` policy can keep a
/// stable token and `full` can keep per-article randomness independent.
#[derive(Clone, Debug)]
pub struct FileObfuscationState {
    policy: ObfuscationPolicy,
    /// Stable token used by `partial`, regenerated per-article under `full`.
    stable_token: String,
}

impl FileObfuscationState {
    /// Start tracking a new file under `policy`, drawing the stable token
    /// used for `partial` up front.
    pub fn new(policy: ObfuscationPolicy) -> Self {
        Self {
            policy,
            stable_token: random_token(TOKEN_LEN),
        }
    }

    /// Build headers for one article of this file.
    #[allow(clippy::too_many_arguments)]
    pub fn headers_for(
        &self,
        segment: &Segment,
        groups: &[String],
        default_from: &str,
        message_id_domain: &str,
        original_subject: &str,
    ) -> Headers {
        let original_file_name = segment
            .file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file.bin")
            .to_string();

        let (subject, yenc_name) = match self.policy {
            ObfuscationPolicy::None => (
                format!("{original_file_name} [{}/{}]", segment.part, segment.total_parts),
                original_file_name.clone(),
            ),
            ObfuscationPolicy::Partial => (self.stable_token.clone(), self.stable_token.clone()),
            ObfuscationPolicy::Full => {
                let token = random_token(TOKEN_LEN);
                (token.clone(), token)
            }
        };

        let date = match self.policy {
            ObfuscationPolicy::Full => {
                let now = chrono::Utc::now().timestamp();
                let back = rand::thread_rng().gen_range(0..=6 * 3600);
                now - back
            }
            _ => chrono::Utc::now().timestamp(),
        };

        let from = match self.policy {
            ObfuscationPolicy::Full => random_from(),
            _ => default_from.to_string(),
        };

        let message_id = fresh_message_id(message_id_domain);

        Headers {
            subject,
            from,
            groups: groups.to_vec(),
            message_id,
            date,
            yenc_name,
            original_file_name,
            original_subject: original_subject.to_string(),
            file_number: segment.file.order,
            part_number: segment.part,
            total_parts: segment.total_parts,
        }
    }

    /// Regenerate the NNTP envelope fields for a retry or repost of the same
    /// encoded body: always a fresh message-id, and under `full` also a
    /// fresh subject/from/date. Never touches `yenc_name`, which is already
    /// baked into the encoded body's `=ybegin` line.
    pub fn refresh_envelope(&self, headers: &mut Headers, message_id_domain: &str) {
        headers.message_id = fresh_message_id(message_id_domain);
        if self.policy == ObfuscationPolicy::Full {
            headers.subject = random_token(TOKEN_LEN);
            headers.from = random_from();
            headers.date = chrono::Utc::now().timestamp() - rand::thread_rng().gen_range(0..=6 * 3600);
        }
    }
}

/// A fresh, angle-bracketed message-id for the given domain.
pub fn fresh_message_id(message_id_domain: &str) -> String {
    format!("<{}@{}>", random_token(TOKEN_LEN), message_id_domain)
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_from() -> String {
    let local: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LOCAL_LEN)
        .map(char::from)
        .collect();
    let domain: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN / 2)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{local}@{domain}.invalid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileEntry;
    use std::path::PathBuf;

    fn segment(part: u32, total: u32) -> Segment {
        Segment {
            file: FileEntry {
                path: PathBuf::from("a.bin"),
                size: 1000,
                order: 1,
            },
            part,
            total_parts: total,
            offset: 0,
            length: 1000,
        }
    }

    #[test]
    fn none_policy_uses_original_name_and_numbered_subject() {
        let state = FileObfuscationState::new(ObfuscationPolicy::None);
        let headers = state.headers_for(&segment(1, 3), &["alt.bin".into()], "u@h", "example.com", "a.bin");
        assert_eq!(headers.subject, "a.bin [1/3]");
        assert_eq!(headers.yenc_name, "a.bin");
        assert_eq!(headers.from, "u@h");
    }

    #[test]
    fn partial_policy_is_stable_within_a_file() {
        let state = FileObfuscationState::new(ObfuscationPolicy::Partial);
        let h1 = state.headers_for(&segment(1, 2), &["a".into()], "u@h", "d", "s");
        let h2 = state.headers_for(&segment(2, 2), &["a".into()], "u@h", "d", "s");
        assert_eq!(h1.subject, h2.subject);
        assert_eq!(h1.yenc_name, h2.yenc_name);
    }

    #[test]
    fn full_policy_varies_per_article() {
        let state = FileObfuscationState::new(ObfuscationPolicy::Full);
        let h1 = state.headers_for(&segment(1, 2), &["a".into()], "u@h", "d", "s");
        let h2 = state.headers_for(&segment(2, 2), &["a".into()], "u@h", "d", "s");
        assert_ne!(h1.subject, h2.subject);
        assert_ne!(h1.message_id, h2.message_id);
    }

    #[test]
    fn refresh_envelope_always_changes_message_id() {
        let state = FileObfuscationState::new(ObfuscationPolicy::None);
        let mut headers = state.headers_for(&segment(1, 1), &["a".into()], "u@h", "example.com", "s");
        let original = headers.clone();
        state.refresh_envelope(&mut headers, "example.com");
        assert_ne!(headers.message_id, original.message_id);
        assert_eq!(headers.subject, original.subject);
        assert_eq!(headers.yenc_name, original.yenc_name);
    }

    #[test]
    fn refresh_envelope_regenerates_subject_under_full() {
        let state = FileObfuscationState::new(ObfuscationPolicy::Full);
        let mut headers = state.headers_for(&segment(1, 1), &["a".into()], "u@h", "example.com", "s");
        let original_subject = headers.subject.clone();
        let original_yenc_name = headers.yenc_name.clone();
        state.refresh_envelope(&mut headers, "example.com");
        assert_ne!(headers.subject, original_subject);
        // yenc_name is already baked into the encoded body and must not change.
        assert_eq!(headers.yenc_name, original_yenc_name);
    }

    #[test]
    fn message_id_always_has_angle_bracket_shape() {
        let state = FileObfuscationState::new(ObfuscationPolicy::None);
        let headers = state.headers_for(&segment(1, 1), &["a".into()], "u@h", "example.com", "s");
        assert!(headers.message_id.starts_with('<'));
        assert!(headers.message_id.ends_with("@example.com>"));
    }
}
