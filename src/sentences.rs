use once_cell::sync::Lazy;
use regex::Regex;

/// Internal stand-in for a protected period, restored after splitting.
const DOT: &str = "<<CW_DOT>>";

/// Sentences at or below this many characters are treated as OCR noise.
pub const MIN_SENTENCE_CHARS: usize = 10;

const ABBREVIATIONS: [&str; 21] = [
    "Ph.D", "M.D", "B.A", "M.A", "B.S", "M.S", "Mrs", "Prof", "Corp", "Inc", "Ltd", "etc",
    "i.e", "e.g", "Mr", "Dr", "Ms", "Sr", "Jr", "Co", "vs",
];

static ABBREV_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = ABBREVIATIONS
        .iter()
        .map(|a| regex::escape(a))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\.")).expect("abbrev regex")
});

static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\.(\d+)").expect("decimal regex"));

static INITIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-ZА-ЯЁ])\.").expect("initial regex"));

/// Splits `text` into sentences, protecting abbreviations, initials and
/// decimal numbers from false breaks. A text with no terminal punctuation
/// comes back as a single sentence. Fragments at or below
/// [`MIN_SENTENCE_CHARS`] characters are dropped as noise.
pub fn split_sentences(text: &str) -> Vec<String> {
    let protected = protect_periods(text);

    split_at_boundaries(&protected)
        .into_iter()
        .map(|s| s.replace(DOT, ".").trim().to_string())
        .filter(|s| s.chars().count() > MIN_SENTENCE_CHARS)
        .collect()
}

fn protect_periods(text: &str) -> String {
    let out = ABBREV_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        format!("{}{DOT}", &caps[1])
    });
    let out = DECIMAL_RE.replace_all(&out, format!("${{1}}{DOT}${{2}}").as_str());
    INITIAL_RE
        .replace_all(&out, format!("${{1}}{DOT}").as_str())
        .into_owned()
}

/// Breaks on whitespace that follows `.`/`!`/`?` and precedes an uppercase
/// letter. The regex crate has no lookbehind, so this is a hand scan.
fn split_at_boundaries(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences: Vec<String> = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j > i + 1 && j < chars.len() && chars[j].is_uppercase() {
                sentences.push(chars[start..=i].iter().collect());
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    if start < chars.len() {
        sentences.push(chars[start..].iter().collect());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protects_title_abbreviations() {
        let got = split_sentences("Dr. Smith went home. He was very tired.");
        assert_eq!(got, vec!["Dr. Smith went home.", "He was very tired."]);
    }

    #[test]
    fn protects_decimals_and_initials() {
        let got = split_sentences("The rate was 3.14 percent overall. J. Doe disagreed loudly.");
        assert_eq!(
            got,
            vec![
                "The rate was 3.14 percent overall.",
                "J. Doe disagreed loudly."
            ]
        );
    }

    #[test]
    fn no_terminal_punctuation_is_one_sentence() {
        let text = "a sentence without any terminal punctuation";
        assert_eq!(split_sentences(text), vec![text.to_string()]);
    }

    #[test]
    fn drops_short_noise_fragments() {
        let got = split_sentences("Ok. This one is long enough to keep around.");
        assert_eq!(got, vec!["This one is long enough to keep around."]);
    }

    #[test]
    fn lowercase_continuation_does_not_split() {
        let got = split_sentences("It cost 5 dollars. and then some more words here");
        assert_eq!(got.len(), 1);
    }
}
