use std::path::Path;

pub const TEMP_ALIAS_PREFIX: &str = "temp_retry_";

/// Splits `name` into its stem and its extension (dot included, may be empty).
pub fn split_name(name: &str) -> (&str, &str) {
    let ext_len = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.len() + 1)
        .unwrap_or(0);
    name.split_at(name.len() - ext_len)
}

/// True when `stem` ends with `suffix`, optionally followed by a `_<digits>`
/// conflict counter. An empty suffix marks nothing.
pub fn carries_completion_marker(stem: &str, suffix: &str) -> bool {
    if suffix.is_empty() {
        return false;
    }
    if stem.ends_with(suffix) {
        return true;
    }
    match stem.rsplit_once('_') {
        Some((head, counter)) => {
            !counter.is_empty()
                && counter.chars().all(|ch| ch.is_ascii_digit())
                && head.ends_with(suffix)
        }
        None => false,
    }
}

/// Turns an oracle title into a filename stem.
///
/// Keeps alphanumerics, `_`, whitespace and `-`; whitespace and `-` become `_`;
/// `_` runs collapse; edges are trimmed; the result is cut to `max_chars`.
/// Returns `None` when nothing usable is left.
pub fn sanitize_title(title: &str, max_chars: usize) -> Option<String> {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        let mapped = if ch.is_alphanumeric() {
            ch
        } else if ch == '_' || ch == '-' || ch.is_whitespace() {
            '_'
        } else {
            continue;
        };
        if mapped == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(mapped);
    }
    let truncated: String = out.chars().take(max_chars).collect();
    let trimmed = truncated.trim_matches('_');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Random `temp_retry_<8 hex><ext>` name. Callers check it against the folder.
pub fn temp_alias_candidate(ext: &str) -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("{TEMP_ALIAS_PREFIX}{}{ext}", &token[..8])
}

#[cfg(test)]
mod tests {
    use super::{carries_completion_marker, sanitize_title, split_name, temp_alias_candidate};

    #[test]
    fn split_name_handles_odd_names() {
        assert_eq!(split_name("weird name!.png"), ("weird name!", ".png"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".hidden"), (".hidden", ""));
    }

    #[test]
    fn marker_detection_accepts_conflict_counters() {
        assert!(carries_completion_marker("Sunset_DESC", "_DESC"));
        assert!(carries_completion_marker("Sunset_DESC_12", "_DESC"));
        assert!(!carries_completion_marker("Sunset_DESC_x", "_DESC"));
        assert!(!carries_completion_marker("MY_DESCRIPTION", "_DESC"));
        assert!(!carries_completion_marker("IMG_0001", "_DESC"));
        assert!(!carries_completion_marker("Sunset_DESC", ""));
    }

    #[test]
    fn sanitize_strips_path_hostile_characters() {
        assert_eq!(
            sanitize_title("Red barn / at dusk: 2024?", 60).as_deref(),
            Some("Red_barn_at_dusk_2024")
        );
        assert_eq!(
            sanitize_title("  Snow-capped   peaks  ", 60).as_deref(),
            Some("Snow_capped_peaks")
        );
        assert_eq!(
            sanitize_title("../../etc/passwd", 60).as_deref(),
            Some("etcpasswd")
        );
        assert_eq!(sanitize_title("Café Olé", 60).as_deref(), Some("Café_Olé"));
    }

    #[test]
    fn sanitize_rejects_symbol_only_titles() {
        assert_eq!(sanitize_title("?!/*", 60), None);
        assert_eq!(sanitize_title(" - _ ", 60), None);
    }

    #[test]
    fn sanitize_truncates_without_trailing_separator() {
        assert_eq!(
            sanitize_title("Golden Retriever Puppy", 9).as_deref(),
            Some("Golden_Re")
        );
        assert_eq!(sanitize_title("Golden Retriever", 7).as_deref(), Some("Golden"));
    }

    #[test]
    fn temp_alias_keeps_extension() {
        let alias = temp_alias_candidate(".png");
        assert!(alias.starts_with("temp_retry_"));
        assert!(alias.ends_with(".png"));
        assert_eq!(alias.len(), "temp_retry_".len() + 8 + 4);
        assert_ne!(alias, temp_alias_candidate(".png"));
    }
}
