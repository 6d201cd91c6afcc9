//! Post content rules shared by the create and update paths.

use crate::domain::error::DomainError;

pub const CAPTION_MAX_CHARS: usize = 2200;
pub const LOCATION_MAX_CHARS: usize = 100;

/// Split a comma-separated tag input into an ordered, de-duplicated list.
///
/// Whitespace is removed entirely (`"summer, beach"` yields `summer`, `beach`)
/// and empty fragments are dropped.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut tags: Vec<String> = Vec::new();
    for fragment in compact.split(',') {
        if fragment.is_empty() || tags.iter().any(|tag| tag == fragment) {
            continue;
        }
        tags.push(fragment.to_string());
    }
    tags
}

/// De-duplicate an already split tag list, keeping first occurrences.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() || normalized.iter().any(|existing| existing == tag) {
            continue;
        }
        normalized.push(tag.to_string());
    }
    normalized
}

pub fn ensure_id(value: &str, field: &'static str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("`{field}` is required")));
    }
    Ok(())
}

pub fn validate_caption(caption: &str) -> Result<(), DomainError> {
    if caption.trim().is_empty() {
        return Err(DomainError::validation("`caption` must not be empty"));
    }
    if caption.chars().count() > CAPTION_MAX_CHARS {
        return Err(DomainError::validation(format!(
            "`caption` exceeds {CAPTION_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

pub fn validate_location(location: Option<&str>) -> Result<(), DomainError> {
    match location {
        Some(value) if value.chars().count() > LOCATION_MAX_CHARS => {
            Err(DomainError::validation(format!(
                "`location` exceeds {LOCATION_MAX_CHARS} characters"
            )))
        }
        _ => Ok(()),
    }
}

/// Trim a location input, mapping blank values to `None`.
pub fn normalize_location(location: Option<String>) -> Option<String> {
    location.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tags_strips_whitespace_and_empties() {
        assert_eq!(
            parse_tags(" summer, beach ,, sun set"),
            vec!["summer", "beach", "sunset"]
        );
    }

    #[test]
    fn parse_tags_keeps_first_occurrence() {
        assert_eq!(parse_tags("a,b,a,c,b"), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_tag_input_is_acceptable() {
        assert!(parse_tags("").is_empty());
        assert!(parse_tags(" , ").is_empty());
    }

    #[test]
    fn normalize_tags_trims_and_dedups() {
        assert_eq!(normalize_tags([" x", "y", "x ", ""]), vec!["x", "y"]);
    }

    #[test]
    fn caption_rules() {
        assert!(validate_caption("nice view").is_ok());
        assert!(validate_caption("   ").is_err());
        let long = "a".repeat(CAPTION_MAX_CHARS + 1);
        assert!(validate_caption(&long).is_err());
    }

    #[test]
    fn location_rules() {
        assert!(validate_location(None).is_ok());
        assert!(validate_location(Some("Cairo")).is_ok());
        let long = "b".repeat(LOCATION_MAX_CHARS + 1);
        assert!(validate_location(Some(&long)).is_err());
    }

    #[test]
    fn missing_id_is_rejected() {
        assert!(ensure_id("", "post_id").is_err());
        assert!(ensure_id("p1", "post_id").is_ok());
    }

    #[test]
    fn blank_location_becomes_none() {
        assert_eq!(normalize_location(Some("  ".to_string())), None);
        assert_eq!(
            normalize_location(Some(" Giza ".to_string())),
            Some("Giza".to_string())
        );
    }
}
