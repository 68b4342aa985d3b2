//! Diff canonicalisation and change-identity hashing.
//!
//! Two diffs that differ only in file order or git metadata (index lines,
//! `---`/`+++` headers, hunk markers) describe the same change and must hash
//! identically; any change to added, removed or context content must not.

use sha2::{Digest, Sha256};

/// Canonicalises a raw unified diff.
///
/// Splits on `diff --git ` boundaries; per file section keeps the
/// destination path (after `b/`) and the trimmed, non-empty content lines,
/// dropping `index`, `---`, `+++` and `@@` lines. Sections are sorted by
/// path and joined.
pub fn normalize_diff(raw: &str) -> String {
    let mut sections: Vec<(String, String)> = Vec::new();

    for chunk in raw.split("diff --git ") {
        if chunk.trim().is_empty() {
            continue;
        }
        let mut lines = chunk.lines();
        let header = lines.next().unwrap_or("");
        let path = dest_path(header);

        let mut content = String::new();
        for line in lines {
            if line.starts_with("index ")
                || line.starts_with("---")
                || line.starts_with("+++")
                || line.starts_with("@@")
                || line.starts_with("new file mode")
                || line.starts_with("deleted file mode")
                || line.starts_with("old mode")
                || line.starts_with("new mode")
                || line.starts_with("similarity index")
                || line.starts_with("rename from")
                || line.starts_with("rename to")
            {
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            content.push_str(trimmed);
            content.push('\n');
        }

        sections.push((path, content));
    }

    sections.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    for (path, content) in sections {
        out.push_str(&path);
        out.push('\n');
        out.push_str(&content);
    }
    out
}

/// SHA-256 of the canonicalised diff, hex-encoded.
pub fn hash_diff(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_diff(raw).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extracts the destination path from a `diff --git a/x b/y` header tail.
fn dest_path(header: &str) -> String {
    header
        .split(" b/")
        .nth(1)
        .unwrap_or(header)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF_A: &str = "diff --git a/src/one.rs b/src/one.rs\n\
index 111..222 100644\n\
--- a/src/one.rs\n\
+++ b/src/one.rs\n\
@@ -1,2 +1,2 @@\n\
-old line\n\
+new line\n\
diff --git a/src/two.rs b/src/two.rs\n\
index 333..444 100644\n\
--- a/src/two.rs\n\
+++ b/src/two.rs\n\
@@ -5,1 +5,1 @@\n\
+added\n";

    /// Same change with file sections reordered and different metadata.
    const DIFF_A_REORDERED: &str = "diff --git a/src/two.rs b/src/two.rs\n\
index aaa..bbb 100644\n\
--- a/src/two.rs\n\
+++ b/src/two.rs\n\
@@ -50,1 +50,1 @@\n\
+added\n\
diff --git a/src/one.rs b/src/one.rs\n\
index ccc..ddd 100644\n\
--- a/src/one.rs\n\
+++ b/src/one.rs\n\
@@ -9,2 +9,2 @@\n\
-old line\n\
+new line\n";

    #[test]
    fn reordering_and_metadata_do_not_change_the_hash() {
        assert_eq!(hash_diff(DIFF_A), hash_diff(DIFF_A_REORDERED));
    }

    #[test]
    fn content_change_changes_the_hash() {
        let mutated = DIFF_A.replace("+new line", "+New line");
        assert_ne!(hash_diff(DIFF_A), hash_diff(&mutated));
    }

    #[test]
    fn whitespace_only_padding_is_ignored() {
        let padded = DIFF_A.replace("+new line", "+new line   ");
        assert_eq!(hash_diff(DIFF_A), hash_diff(&padded));
    }

    #[test]
    fn normalized_form_keeps_dest_paths() {
        let norm = normalize_diff(DIFF_A);
        assert!(norm.contains("src/one.rs\n"));
        assert!(norm.contains("src/two.rs\n"));
        assert!(!norm.contains("index "));
        assert!(!norm.contains("@@"));
    }

    #[test]
    fn empty_diff_hashes_consistently() {
        assert_eq!(hash_diff(""), hash_diff(""));
        assert_ne!(hash_diff(""), hash_diff(DIFF_A));
    }
}
