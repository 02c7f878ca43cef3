use once_cell::sync::Lazy;
use regex::Regex;

static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("multi space"));
static SPACE_BEFORE_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([.,!?;:])").expect("space before punct"));
static BROKEN_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w)-\s+(\w)").expect("broken word"));
static EXCESS_NEWLINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{4,}").expect("excess newlines"));

const LIGATURES: [(&str, &str); 5] = [
    ("\u{FB01}", "fi"),
    ("\u{FB02}", "fl"),
    ("\u{FB00}", "ff"),
    ("\u{FB03}", "ffi"),
    ("\u{FB04}", "ffl"),
];

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Scanner/OCR cleanup applied to raw page text before segmentation:
/// ligatures, hyphen-broken words, stray spaces before punctuation.
pub fn clean_ocr_artifacts(text: &str) -> String {
    let mut out = text.to_string();
    for (lig, replacement) in LIGATURES {
        if out.contains(lig) {
            out = out.replace(lig, replacement);
        }
    }
    out = BROKEN_WORD_RE.replace_all(&out, "$1$2").into_owned();
    out = SPACE_BEFORE_PUNCT_RE.replace_all(&out, "$1").into_owned();
    MULTI_SPACE_RE.replace_all(&out, " ").into_owned()
}

pub fn collapse_blank_runs(text: &str) -> String {
    EXCESS_NEWLINES_RE.replace_all(text, "\n\n\n").into_owned()
}

pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

pub fn head_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
