use crate::marks::roman_numeral;

pub const DEFAULT_SLUG_LEN: usize = 40;

const FALLBACK_SLUG: &str = "brandoit";

/// Filesystem-safe slug: lowercase, `[a-z0-9-]` only, separator runs
/// collapsed to single hyphens, trimmed, then cut to `max_len`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut last_was_hyphen = false;
    for ch in text.to_lowercase().chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else if ch.is_whitespace() || ch == '-' {
            '-'
        } else {
            continue;
        };
        if mapped == '-' {
            if last_was_hyphen {
                continue;
            }
            last_was_hyphen = true;
        } else {
            last_was_hyphen = false;
        }
        collapsed.push(mapped);
    }
    collapsed.trim_matches('-').chars().take(max_len).collect()
}

/// Export name for one mark: `{slug}-mark-{numeral}.{extension}`. The
/// extension is used verbatim; callers pass a bare extension like `png`.
pub fn export_filename(prompt: &str, version_number: i64, extension: &str) -> String {
    let slug = slugify(prompt, DEFAULT_SLUG_LEN);
    let slug = if slug.is_empty() { FALLBACK_SLUG } else { slug.as_str() };
    let numeral = roman_numeral(version_number).to_lowercase();
    format!("{slug}-mark-{numeral}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::{export_filename, slugify, DEFAULT_SLUG_LEN};

    #[test]
    fn slug_drops_punctuation_and_hyphenates() {
        assert_eq!(slugify("Hello, World!!", DEFAULT_SLUG_LEN), "hello-world");
        assert_eq!(slugify("Neon  Coffee   Logo", DEFAULT_SLUG_LEN), "neon-coffee-logo");
    }

    #[test]
    fn slug_collapses_mixed_separator_runs() {
        assert_eq!(slugify("a - b -- c", DEFAULT_SLUG_LEN), "a-b-c");
        assert_eq!(slugify("--edgy--", DEFAULT_SLUG_LEN), "edgy");
    }

    #[test]
    fn slug_of_whitespace_or_punctuation_is_empty() {
        assert_eq!(slugify("   ", DEFAULT_SLUG_LEN), "");
        assert_eq!(slugify("!?!.,;", DEFAULT_SLUG_LEN), "");
    }

    #[test]
    fn slug_truncates_to_max_len() {
        let long = "A".repeat(100);
        assert_eq!(slugify(&long, 40).len(), 40);
        assert_eq!(slugify("brand new logo", 5), "brand");
    }

    #[test]
    fn filename_combines_slug_numeral_and_extension() {
        assert_eq!(
            export_filename("My Cool Chart", 1, "png"),
            "my-cool-chart-mark-i.png"
        );
        assert_eq!(export_filename("My Cool Chart", 4, "webp"), "my-cool-chart-mark-iv.webp");
    }

    #[test]
    fn filename_falls_back_when_slug_is_empty() {
        assert_eq!(export_filename("", 2, "svg"), "brandoit-mark-ii.svg");
        assert_eq!(export_filename("!!!", 3, "png"), "brandoit-mark-iii.png");
    }
}
