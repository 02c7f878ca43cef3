use once_cell::sync::Lazy;
use regex::Regex;

/// Every extracted image is represented in the paragraph stream by a token of
/// this shape. Placeholders must survive translation and filtering unchanged.
pub const IMAGE_PREFIX: &str = "[IMAGE_";

pub static IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[IMAGE_[A-Za-z0-9_]+\]").expect("image token regex"));

pub fn image_token(page: usize, index: usize) -> String {
    format!("[IMAGE_P{page:03}_I{index:02}]")
}

#[inline]
pub fn is_image_placeholder(paragraph: &str) -> bool {
    paragraph.starts_with(IMAGE_PREFIX)
}

pub fn placeholders_in(text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![];
    }
    IMAGE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn strip_placeholders(text: &str) -> String {
    IMAGE_RE.replace_all(text, " ").into_owned()
}

/// True when `translated` carries exactly the placeholder tokens of
/// `source`, in any order. A translation that drops or invents one is
/// unusable as-is.
pub fn placeholders_preserved(source: &str, translated: &str) -> bool {
    let mut expected = placeholders_in(source);
    let mut found = placeholders_in(translated);
    expected.sort();
    found.sort();
    expected == found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_format_is_stable() {
        assert_eq!(image_token(7, 2), "[IMAGE_P007_I02]");
        assert!(is_image_placeholder(&image_token(0, 0)));
    }

    #[test]
    fn finds_tokens_inside_text() {
        let text = "before [IMAGE_P001_I00] after [IMAGE_042]";
        assert_eq!(
            placeholders_in(text),
            vec!["[IMAGE_P001_I00]", "[IMAGE_042]"]
        );
        assert!(!strip_placeholders(text).contains("[IMAGE_"));
    }

    #[test]
    fn preservation_check_catches_dropped_tokens() {
        let source = "see [IMAGE_P001_I00] here and [IMAGE_P001_I01] there";
        assert!(placeholders_preserved(source, "смотри [IMAGE_P001_I01] и [IMAGE_P001_I00]"));
        assert!(!placeholders_preserved(source, "смотри [IMAGE_P001_I00]"));
        assert!(placeholders_preserved("no tokens at all", "без токенов"));
    }

    #[test]
    fn plain_text_has_no_placeholders() {
        assert!(placeholders_in("a figure caption").is_empty());
        assert!(!is_image_placeholder("see [Figure 1]"));
    }
}
