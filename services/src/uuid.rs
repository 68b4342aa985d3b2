use uuid::Uuid;

/// Deterministic UUIDv3 (MD5) from an arbitrary string id.
///
/// Vector stores that require UUID point keys get a stable mapping from
/// human-readable ids like `"42-1087-code"`. The same input always yields
/// the same UUID, so points can be re-addressed across runs.
pub fn stable_uuid(id: &str) -> Uuid {
    Uuid::new_v3(&Uuid::NAMESPACE_URL, id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_uuid() {
        assert_eq!(stable_uuid("7-12-code"), stable_uuid("7-12-code"));
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(stable_uuid("7-12-code"), stable_uuid("7-12-intent"));
    }
}
