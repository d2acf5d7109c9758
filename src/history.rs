//! Client-side filtering of restoration history.

use crate::api::resources::HistoryItem;

/// Search text matches filename or model name, case-insensitively.
/// Status must match exactly (ignoring case) when given.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub search: Option<String>,
    pub status: Option<String>,
}

impl HistoryFilter {
    pub fn is_empty(&self) -> bool {
        self.search.as_deref().is_none_or(|s| s.trim().is_empty()) && self.status.is_none()
    }

    pub fn matches(&self, item: &HistoryItem) -> bool {
        if let Some(status) = &self.status {
            if !item
                .status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(status))
            {
                return false;
            }
        }

        let needle = match self.search.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_lowercase(),
            _ => return true,
        };
        [&item.original_filename, &item.model_name]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    /// Matching items in their original order
    pub fn apply<'a>(&self, items: &'a [HistoryItem]) -> Vec<&'a HistoryItem> {
        items.iter().filter(|item| self.matches(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::resources::Id;
    use serde_json::Map;

    fn item(id: &str, filename: &str, status: &str, model: Option<&str>) -> HistoryItem {
        HistoryItem {
            id: Id(id.to_string()),
            original_filename: Some(filename.to_string()),
            status: Some(status.to_string()),
            model_name: model.map(str::to_string),
            created_at: None,
            restored_image_url: None,
            extra: Map::new(),
        }
    }

    fn sample() -> Vec<HistoryItem> {
        vec![
            item("1", "Grandma_1952.jpg", "completed", Some("GFPGAN")),
            item("2", "wedding.png", "failed", None),
            item("3", "grandpa.tiff", "completed", Some("CodeFormer")),
            item("4", "beach.jpg", "processing", Some("gfpgan")),
        ]
    }

    fn ids(items: &[&HistoryItem]) -> Vec<String> {
        items.iter().map(|i| i.id.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let items = sample();
        let filter = HistoryFilter::default();
        assert!(filter.is_empty());
        assert_eq!(filter.apply(&items).len(), 4);
    }

    #[test]
    fn test_search_is_case_insensitive_and_ordered() {
        let items = sample();
        let filter = HistoryFilter {
            search: Some("GRAND".to_string()),
            status: None,
        };
        assert_eq!(ids(&filter.apply(&items)), vec!["1", "3"]);
    }

    #[test]
    fn test_search_matches_model_name() {
        let items = sample();
        let filter = HistoryFilter {
            search: Some("gfpgan".to_string()),
            status: None,
        };
        assert_eq!(ids(&filter.apply(&items)), vec!["1", "4"]);
    }

    #[test]
    fn test_status_and_search_combine() {
        let items = sample();
        let filter = HistoryFilter {
            search: Some("gfp".to_string()),
            status: Some("Completed".to_string()),
        };
        assert_eq!(ids(&filter.apply(&items)), vec!["1"]);
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let items = sample();
        let filter = HistoryFilter {
            search: Some("   ".to_string()),
            status: Some("failed".to_string()),
        };
        assert!(!filter.is_empty());
        assert_eq!(ids(&filter.apply(&items)), vec!["2"]);
    }
}
