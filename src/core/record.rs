use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalogue record as supplied by the caller. The scanner only reads
/// these fields and never mutates them; records are supplied fresh on
/// each invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    /// Locator for the primary image (URL or filesystem path). Records
    /// without one cannot be duplicates by image and are skipped.
    pub image_ref: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Draft,
    Active,
    Sold,
    Withdrawn,
    Passed,
    Returned,
}

/// Normalize a title for bucketing: trim and lowercase.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Normalize an image reference for exact-match bucketing. Query strings
/// and fragments do not change which image a reference resolves to, so
/// they are stripped before comparison.
pub fn normalize_image_ref(reference: &str) -> String {
    let trimmed = reference.trim();
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title_trims_and_lowercases() {
        assert_eq!(normalize_title("  Ming Vase "), "ming vase");
        assert_eq!(normalize_title("BOWL"), "bowl");
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn test_normalize_image_ref_strips_query_and_fragment() {
        assert_eq!(
            normalize_image_ref("https://cdn.example.com/a.jpg?v=2&w=800"),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            normalize_image_ref("https://cdn.example.com/a.jpg#main"),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(normalize_image_ref(" /images/a.jpg "), "/images/a.jpg");
    }

    #[test]
    fn test_normalized_refs_with_different_params_collide() {
        let a = normalize_image_ref("a.jpg?token=1");
        let b = normalize_image_ref("a.jpg?token=2");
        assert_eq!(a, b);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RecordStatus::Withdrawn).unwrap();
        assert_eq!(json, "\"withdrawn\"");
    }
}
