/// Model used when no explicit choice has been stored.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Model-id prefixes shown by default; the listing hides fine-tunes and
/// non-chat models behind this filter.
pub const DEFAULT_MODEL_PREFIXES: &[&str] = &["gpt"];

/// Keeps the ids that start with any of `prefixes`; no prefixes means no
/// filtering.
pub fn filter_model_ids(ids: Vec<String>, prefixes: &[&str]) -> Vec<String> {
    if prefixes.is_empty() {
        return ids;
    }
    ids.into_iter()
        .filter(|id| prefixes.iter().any(|prefix| id.starts_with(prefix)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn prefix_filter_keeps_matching_ids() {
        let listed = ids(&["gpt-4", "whisper-1", "gpt-3.5-turbo", "dall-e-3"]);
        assert_eq!(
            filter_model_ids(listed, DEFAULT_MODEL_PREFIXES),
            ids(&["gpt-4", "gpt-3.5-turbo"]),
        );
    }

    #[test]
    fn empty_prefix_list_passes_everything_through() {
        let listed = ids(&["gpt-4", "whisper-1"]);
        assert_eq!(filter_model_ids(listed.clone(), &[]), listed);
    }
}
