use regex::Regex;

use crate::traits::Sanitizer;

/// Wide enough that html2text never wraps a line of a post body.
const WRAP_WIDTH: usize = 1000;

/// Converts post bodies from HTML to plain text with html2text, falling back
/// to tag stripping when the markup cannot be rendered.
pub struct HtmlSanitizer {
    tag_re: Regex,
    break_re: Regex,
}

impl HtmlSanitizer {
    pub fn new() -> Self {
        Self {
            tag_re: Regex::new(r"<[^>]*>").expect("valid tag pattern"),
            break_re: Regex::new(r"(?i)<br\s*/?>").expect("valid line break pattern"),
        }
    }

    fn strip_tags(&self, markup: &str) -> String {
        let with_breaks = self.break_re.replace_all(markup, "\n");
        let text = self.tag_re.replace_all(&with_breaks, "");
        decode_entities(&text)
    }
}

impl Default for HtmlSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer for HtmlSanitizer {
    fn strip(&self, markup: &str) -> String {
        if markup.is_empty() {
            return String::new();
        }

        let text = match html2text::from_read(markup.as_bytes(), WRAP_WIDTH) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("html2text failed, stripping tags instead: {}", e);
                self.strip_tags(markup)
            }
        };

        text.lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#47;", "/")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_and_keeps_text() {
        let sanitizer = HtmlSanitizer::new();
        let text = sanitizer.strip("first line<br>second <strong>bold</strong> line");

        assert!(!text.contains('<'));
        assert!(text.contains("first line"));
        assert!(text.contains("bold"));
        assert!(text.lines().count() >= 2);
    }

    #[test]
    fn empty_body_stays_empty() {
        assert_eq!(HtmlSanitizer::new().strip(""), "");
    }

    #[test]
    fn fallback_decodes_entities() {
        let sanitizer = HtmlSanitizer::new();
        assert_eq!(
            sanitizer.strip_tags("<span class=\"quote\">&gt;implying</span><br/>a &amp; b"),
            ">implying\na & b"
        );
    }
}
