use once_cell::sync::Lazy;
use regex::Regex;

use crate::placeholders::is_image_placeholder;
use crate::sentences::split_sentences;
use crate::textutil::word_count;

/// Below this running word count a group keeps absorbing short sentences even
/// when the budget check would otherwise close it.
const SMALL_GROUP_WORDS: usize = 30;

/// A sentence needs more commas than this before a mid-comma split is tried.
const MIN_COMMAS_FOR_SPLIT: usize = 2;

static NUMBERED_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[.)]\s").expect("numbered item"));
static LETTERED_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][.)]\s").expect("lettered item"));

const LIST_MARKERS: [char; 10] = ['•', '●', '○', '■', '□', '▪', '▫', '-', '*', '–'];

#[derive(Clone, Copy, Debug)]
pub struct SegmentOptions {
    /// Hard per-paragraph word budget; overflow only via an unsplittable sentence.
    pub max_words: usize,
    /// Target size at which a sentence group is closed.
    pub ideal_words: usize,
    /// Fragments at or below this many characters are dropped as noise.
    pub min_chars: usize,
    /// Paragraph size when synthesizing paragraphs from bare sentence runs.
    pub sentences_per_paragraph: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            max_words: 150,
            ideal_words: 90,
            min_chars: 20,
            sentences_per_paragraph: 8,
        }
    }
}

/// Turns a chapter's text into paragraphs: natural blank-line blocks when the
/// text has them, line-stream reconstruction when every sentence sits on its
/// own line, synthesized sentence runs otherwise. Every candidate then goes
/// through the word-budget pass. Image placeholder tokens always come out as
/// their own paragraph, untouched.
pub fn segment_paragraphs(text: &str, opts: &SegmentOptions) -> Vec<String> {
    let candidates = if text.matches("\n\n").count() > 5 {
        text.split("\n\n")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    } else if text.matches('\n').count() as f64 > text.matches(". ").count() as f64 * 0.8 {
        split_page_text(text, opts.min_chars)
    } else {
        synthesize_paragraphs(text, opts.sentences_per_paragraph)
    };

    let mut out: Vec<String> = Vec::new();
    for candidate in candidates {
        if is_image_placeholder(&candidate) {
            out.push(candidate);
            continue;
        }
        if candidate.chars().count() <= opts.min_chars {
            continue;
        }
        if word_count(&candidate) <= opts.max_words {
            out.push(candidate);
        } else {
            out.extend(split_long_paragraph(
                &candidate,
                opts.max_words,
                opts.ideal_words,
            ));
        }
    }
    out
}

/// Rebuilds paragraphs from a raw page line stream: a blank line closes the
/// current paragraph, and a line that follows sentence-final punctuation and
/// starts with a capital or digit (or a list marker) opens a new one.
pub fn split_page_text(text: &str, min_chars: usize) -> Vec<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |lines: &mut Vec<&str>, out: &mut Vec<String>| {
        if lines.is_empty() {
            return;
        }
        let para = lines.join(" ");
        if para.chars().count() > min_chars || is_image_placeholder(&para) {
            out.push(para);
        }
        lines.clear();
    };

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            flush(&mut current, &mut paragraphs);
            continue;
        }
        if is_image_placeholder(stripped) {
            flush(&mut current, &mut paragraphs);
            paragraphs.push(stripped.to_string());
            continue;
        }
        if let Some(prev) = current.last() {
            if opens_new_paragraph(prev, stripped) {
                flush(&mut current, &mut paragraphs);
            }
        }
        current.push(stripped);
    }
    flush(&mut current, &mut paragraphs);
    paragraphs
}

fn opens_new_paragraph(prev_line: &str, curr_line: &str) -> bool {
    let prev = prev_line.trim_end();
    if prev.ends_with(['.', '!', '?', ':', ';']) {
        if let Some(first) = curr_line.chars().next() {
            if first.is_uppercase() || first.is_ascii_digit() {
                return true;
            }
        }
    }
    if curr_line.starts_with(LIST_MARKERS) {
        return true;
    }
    NUMBERED_ITEM_RE.is_match(curr_line) || LETTERED_ITEM_RE.is_match(curr_line)
}

/// Builds paragraphs out of an unformatted sentence stream.
fn synthesize_paragraphs(text: &str, sentences_per_paragraph: usize) -> Vec<String> {
    let per = sentences_per_paragraph.max(1);
    let sentences = split_sentences(text);
    let mut paragraphs: Vec<String> = Vec::new();
    for chunk in sentences.chunks(per) {
        let para = chunk.join(" ").trim().to_string();
        if !para.is_empty() {
            paragraphs.push(para);
        }
    }
    paragraphs
}

/// Breaks an over-budget paragraph into sentence groups, then re-splits any
/// single sentence that alone blows the budget.
pub fn split_long_paragraph(text: &str, max_words: usize, ideal_words: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return vec![text.to_string()];
    }
    group_sentences(&sentences, max_words, ideal_words)
}

/// Greedy sentence packing: close a group when adding the next sentence would
/// exceed `max_words` (unless the group is still small and the sentence below
/// `ideal_words`), and close eagerly once a group reaches `ideal_words`.
pub fn group_sentences(sentences: &[String], max_words: usize, ideal_words: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    for sentence in sentences {
        if word_count(sentence) > max_words {
            pieces.extend(split_oversized_sentence(sentence, max_words));
        } else {
            pieces.push(sentence.clone());
        }
    }

    let mut groups: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_words = 0usize;

    for piece in pieces {
        let words = word_count(&piece);
        let over_budget = current_words + words > max_words;
        let keep_merging = current_words < SMALL_GROUP_WORDS && words < ideal_words;
        if !current.is_empty() && over_budget && !keep_merging {
            groups.push(current.join(" "));
            current.clear();
            current_words = 0;
        }
        current.push(piece);
        current_words += words;
        if current_words >= ideal_words {
            groups.push(current.join(" "));
            current.clear();
            current_words = 0;
        }
    }
    if !current.is_empty() {
        groups.push(current.join(" "));
    }
    groups
}

/// Last-resort split for a single sentence over the word budget: semicolon
/// boundaries, else colon boundaries, else the comma nearest the word-count
/// midpoint. A sentence with none of those comes back unsplit; that is the one
/// accepted budget overflow.
pub fn split_oversized_sentence(sentence: &str, max_words: usize) -> Vec<String> {
    debug_assert!(word_count(sentence) > max_words);

    if sentence.contains(';') {
        let fragments: Vec<&str> = sentence.split(';').collect();
        let last = fragments.len() - 1;
        return fragments
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let f = f.trim();
                if i < last {
                    format!("{f};")
                } else {
                    f.to_string()
                }
            })
            .filter(|f| !f.is_empty() && *f != ";")
            .collect();
    }

    if sentence.contains(':') {
        let fragments: Vec<&str> = sentence.split(':').collect();
        return fragments
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let f = f.trim();
                if i == 0 {
                    format!("{f}:")
                } else {
                    f.to_string()
                }
            })
            .filter(|f| !f.is_empty() && *f != ":")
            .collect();
    }

    let comma_count = sentence.matches(',').count();
    if comma_count > MIN_COMMAS_FOR_SPLIT {
        return split_at_middle_comma(sentence);
    }

    vec![sentence.to_string()]
}

fn split_at_middle_comma(sentence: &str) -> Vec<String> {
    let total_words = word_count(sentence);
    let target = total_words / 2;

    let mut best_pos: Option<usize> = None;
    let mut best_dist = usize::MAX;
    for (pos, _) in sentence.match_indices(',') {
        let words_before = word_count(&sentence[..pos]);
        let dist = words_before.abs_diff(target);
        if dist < best_dist {
            best_dist = dist;
            best_pos = Some(pos);
        }
    }

    match best_pos {
        Some(pos) => {
            let head = sentence[..=pos].trim().to_string();
            let tail = sentence[pos + 1..].trim().to_string();
            vec![head, tail].into_iter().filter(|s| !s.is_empty()).collect()
        }
        None => vec![sentence.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Capitalized first word so the sentence splitter sees a boundary.
    fn words(n: usize) -> String {
        (0..n)
            .map(|i| if i == 0 { format!("Word{i}") } else { format!("word{i}") })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn short_single_word_sentences_pack_to_ideal() {
        // One-word "sentences" with max_words=5, ideal_words=3 close every
        // third word, leaving the remainder in the final group.
        let sentences: Vec<String> = ["A.", "B.", "C.", "D.", "E.", "F.", "G."]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let groups = group_sentences(&sentences, 5, 3);
        assert_eq!(groups, vec!["A. B. C.", "D. E. F.", "G."]);
        for g in &groups {
            assert!(g.split(". ").count() <= 3);
        }
    }

    #[test]
    fn word_budget_holds_for_splittable_text() {
        let max_words = 12;
        let text = format!(
            "{}. {}. {}. {}.",
            words(8),
            words(7),
            words(9),
            words(5)
        );
        for para in split_long_paragraph(&text, max_words, 8) {
            assert!(
                word_count(&para) <= max_words,
                "paragraph over budget: {para}"
            );
        }
    }

    #[test]
    fn semicolon_split_reattaches_separator() {
        let sentence = format!("{}; {}; {}", words(6), words(6), words(6));
        let parts = split_oversized_sentence(&sentence, 10);
        assert_eq!(parts.len(), 3);
        assert!(parts[0].ends_with(';'));
        assert!(parts[1].ends_with(';'));
        assert!(!parts[2].ends_with(';'));
    }

    #[test]
    fn colon_split_keeps_colon_on_head() {
        let sentence = format!("{}: {}", words(4), words(10));
        let parts = split_oversized_sentence(&sentence, 8);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with(':'));
        assert!(!parts[1].contains(':'));
    }

    #[test]
    fn comma_split_lands_near_midpoint() {
        let sentence = format!("{}, {}, {}, {}", words(5), words(5), words(5), words(5));
        let parts = split_oversized_sentence(&sentence, 12);
        assert_eq!(parts.len(), 2);
        let left = word_count(&parts[0]);
        let right = word_count(&parts[1]);
        assert!(left.abs_diff(right) <= 2, "unbalanced split: {left}/{right}");
    }

    #[test]
    fn sentence_without_separators_is_accepted_overflow() {
        let sentence = words(20);
        let parts = split_oversized_sentence(&sentence, 10);
        assert_eq!(parts, vec![sentence]);
    }

    #[test]
    fn blank_line_blocks_are_natural_paragraphs() {
        let blocks: Vec<String> = (0..8)
            .map(|i| format!("Paragraph number {i} with a little bit of body text."))
            .collect();
        let text = blocks.join("\n\n");
        let opts = SegmentOptions::default();
        assert_eq!(segment_paragraphs(&text, &opts), blocks);
    }

    #[test]
    fn image_placeholders_pass_through_unsplit() {
        let text = [
            "An ordinary opening paragraph that is long enough to keep.",
            "[IMAGE_P001_I00]",
            "A closing paragraph, also long enough to survive the filter.",
            "",
            "x",
            "",
            "Filler block one that pads the blank line count a bit more.",
            "Filler block two that pads the blank line count a bit more.",
            "Filler block three that pads the blank line count some more.",
        ]
        .join("\n\n");
        let opts = SegmentOptions::default();
        let paras = segment_paragraphs(&text, &opts);
        assert!(paras.contains(&"[IMAGE_P001_I00]".to_string()));
        assert!(!paras.contains(&"x".to_string()));
    }

    #[test]
    fn page_lines_rebuild_into_paragraphs() {
        let text = "The first paragraph starts here\nand continues on this line.\nThe second one begins because the previous line ended a sentence.\n\n• a bullet item long enough to keep";
        let paras = split_page_text(text, 10);
        assert_eq!(paras.len(), 3);
        assert!(paras[0].starts_with("The first paragraph"));
        assert!(paras[1].starts_with("The second one"));
        assert!(paras[2].starts_with("• a bullet"));
    }
}
