use sha2::{Digest, Sha256};

const MAX_STEM_LEN: usize = 64;
const HASH_BYTES: usize = 16;

/// Deterministic, filesystem-safe file name for a cache key:
/// `{sanitized_key}--{short_hash(key)}.json`.
///
/// The hash keeps keys that sanitize to the same stem apart.
pub fn cache_filename(key: &str) -> String {
    let stem = sanitize_key(key);
    let hash = short_hash(key);
    format!("{stem}--{hash}.json")
}

fn sanitize_key(key: &str) -> String {
    let mut stem = String::with_capacity(key.len().min(MAX_STEM_LEN));
    let mut prev_underscore = false;
    for c in key.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' };
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        stem.push(c);
        if stem.len() >= MAX_STEM_LEN {
            break;
        }
    }
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "entry".to_string()
    } else {
        stem.to_string()
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(HASH_BYTES * 2);
    for byte in digest.iter().take(HASH_BYTES) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::cache_filename;

    #[test]
    fn snapshot_keys_become_safe_names() {
        let name = cache_filename("progress_snapshot:3f2a/../x");
        assert!(name.starts_with("progress_snapshot_3f2a_x--"));
        assert!(name.ends_with(".json"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn colliding_stems_get_distinct_names() {
        assert_ne!(cache_filename("a:b"), cache_filename("a/b"));
        assert_eq!(cache_filename("a:b"), cache_filename("a:b"));
    }

    #[test]
    fn truncated_stems_are_told_apart_by_a_wide_hash() {
        let prefix = "k".repeat(80);
        let first = cache_filename(&format!("{prefix}:one"));
        let second = cache_filename(&format!("{prefix}:two"));
        assert_ne!(first, second);

        let hash = first
            .strip_suffix(".json")
            .and_then(|name| name.rsplit_once("--"))
            .map(|(_, hash)| hash)
            .unwrap();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_key_still_has_a_stem() {
        assert!(cache_filename("::").starts_with("entry--"));
    }
}
