use sha2::{Digest, Sha256};

/// Short content fingerprint over a list of fields.
///
/// Joins the parts with `|`, hashes with SHA-256 and keeps the first 16 hex
/// characters. Used as the embedding-relevant fingerprint of a pull request
/// (`embed_hash`) and as half of a pairwise-cache key.
pub fn content_fingerprint<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_ref().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_short() {
        let a = content_fingerprint(&["h1", "title", "body"]);
        let b = content_fingerprint(&["h1", "title", "body"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn sensitive_to_any_field() {
        let base = content_fingerprint(&["h1", "title", "body"]);
        assert_ne!(base, content_fingerprint(&["h2", "title", "body"]));
        assert_ne!(base, content_fingerprint(&["h1", "Title", "body"]));
    }

    #[test]
    fn separator_prevents_field_bleed() {
        assert_ne!(
            content_fingerprint(&["ab", "c"]),
            content_fingerprint(&["a", "bc"])
        );
    }
}
