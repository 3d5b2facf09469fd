//! Frontmatter extraction for corpus articles.
//!
//! Articles may open with a metadata block delimited by `---` lines:
//!
//! ```text
//! ---
//! title: "Adding a YouTube video"
//! created_at: "2024-01-05T10:00:00Z"
//! updated_at: "2024-02-01T08:30:00Z"
//! ---
//! # Adding a YouTube video
//! ```
//!
//! Only `created_at` and `updated_at` are extracted. Extraction never fails:
//! anything missing or malformed simply yields `None`, and values are
//! passed through unvalidated for the reconciler to judge.

const MARKER: &str = "---";

/// Timestamps declared in a document's frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Extract `created_at` / `updated_at` from the frontmatter block of `text`.
pub fn extract(text: &str) -> Frontmatter {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines();

    match lines.next() {
        Some(first) if first.trim_end() == MARKER => {}
        _ => return Frontmatter::default(),
    }

    let mut block = Vec::new();
    let mut closed = false;
    for line in lines {
        if line.trim_end() == MARKER {
            closed = true;
            break;
        }
        block.push(line);
    }
    if !closed {
        return Frontmatter::default();
    }

    let mut fm = Frontmatter::default();
    for line in block {
        let line = line.trim();
        if fm.created_at.is_none() {
            if let Some(value) = field_value(line, "created_at") {
                fm.created_at = Some(value);
                continue;
            }
        }
        if fm.updated_at.is_none() {
            if let Some(value) = field_value(line, "updated_at") {
                fm.updated_at = Some(value);
            }
        }
    }
    fm
}

fn field_value(line: &str, key: &str) -> Option<String> {
    let rest = line.strip_prefix(key)?.strip_prefix(':')?;
    let value = strip_quotes(rest.trim()).trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_and_bare_values() {
        let fm = extract(
            "---\ntitle: Video embeds\ncreated_at: \"2024-01-05T10:00:00Z\"\nupdated_at: 2024-02-01\n---\n# Body\n",
        );
        assert_eq!(fm.created_at.as_deref(), Some("2024-01-05T10:00:00Z"));
        assert_eq!(fm.updated_at.as_deref(), Some("2024-02-01"));
    }

    #[test]
    fn single_quotes_are_stripped() {
        let fm = extract("---\ncreated_at: '2024-01-01'\nupdated_at: '2024-01-02'\n---\n");
        assert_eq!(fm.created_at.as_deref(), Some("2024-01-01"));
        assert_eq!(fm.updated_at.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn no_opening_marker_yields_nothing() {
        let fm = extract("# Title\n---\ncreated_at: 2024-01-01\n---\n");
        assert_eq!(fm, Frontmatter::default());
    }

    #[test]
    fn unterminated_block_yields_nothing() {
        let fm = extract("---\ncreated_at: 2024-01-01\nupdated_at: 2024-01-02\n# never closed\n");
        assert_eq!(fm, Frontmatter::default());
    }

    #[test]
    fn missing_key_is_none() {
        let fm = extract("---\ncreated_at: 2024-01-01\n---\nbody");
        assert_eq!(fm.created_at.as_deref(), Some("2024-01-01"));
        assert_eq!(fm.updated_at, None);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let fm = extract("---\nCreated_At: 2024-01-01\nUPDATED_AT: 2024-01-02\n---\n");
        assert_eq!(fm, Frontmatter::default());
    }

    #[test]
    fn keys_after_closing_marker_are_ignored() {
        let fm = extract("---\ncreated_at: 2024-01-01\n---\nupdated_at: 2024-05-05\n");
        assert_eq!(fm.updated_at, None);
    }

    #[test]
    fn malformed_values_pass_through() {
        let fm = extract("---\ncreated_at: last tuesday\nupdated_at: \"\"\n---\n");
        assert_eq!(fm.created_at.as_deref(), Some("last tuesday"));
        assert_eq!(fm.updated_at, None);
    }

    #[test]
    fn handles_crlf_and_bom() {
        let fm = extract("\u{feff}---\r\ncreated_at: 2024-01-01\r\nupdated_at: 2024-01-03\r\n---\r\nbody");
        assert_eq!(fm.created_at.as_deref(), Some("2024-01-01"));
        assert_eq!(fm.updated_at.as_deref(), Some("2024-01-03"));
    }

    #[test]
    fn similar_key_prefix_does_not_match() {
        let fm = extract("---\ncreated_at_local: 2024-01-01\nupdated_at: 2024-01-03\n---\n");
        assert_eq!(fm.created_at, None);
        assert_eq!(fm.updated_at.as_deref(), Some("2024-01-03"));
    }
}
