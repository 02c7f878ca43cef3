use crate::placeholders::is_image_placeholder;

/// Default paragraph chunk size for context-window grouping.
pub const DEFAULT_WINDOW: usize = 3;

/// One translation request: the paragraphs to translate (image placeholders
/// kept in place) plus read-only neighboring text for continuity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationGroup {
    pub index: usize,
    pub to_translate: Vec<String>,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

impl TranslationGroup {
    /// Paragraphs that actually go to the translator, placeholders excluded.
    pub fn text_paragraphs(&self) -> impl Iterator<Item = &String> {
        self.to_translate.iter().filter(|p| !is_image_placeholder(p))
    }

    pub fn char_count(&self) -> usize {
        self.text_paragraphs().map(|p| p.chars().count()).sum()
    }

    pub fn source_text(&self) -> String {
        self.text_paragraphs()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Character-budget grouping: paragraphs accumulate until the next text
/// paragraph would push the group past `max_chars`. Image placeholders ride
/// along in original order and never count toward the budget; a placeholder
/// run between two text paragraphs stays with the earlier group.
pub fn build_char_groups(paragraphs: &[String], max_chars: usize) -> Vec<TranslationGroup> {
    let mut groups: Vec<TranslationGroup> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_chars = 0usize;

    let mut close = |current: &mut Vec<String>, chars: &mut usize, groups: &mut Vec<TranslationGroup>| {
        if current.is_empty() {
            return;
        }
        groups.push(TranslationGroup {
            index: groups.len(),
            to_translate: std::mem::take(current),
            context_before: Vec::new(),
            context_after: Vec::new(),
        });
        *chars = 0;
    };

    for paragraph in paragraphs {
        if is_image_placeholder(paragraph) {
            current.push(paragraph.clone());
            continue;
        }
        let chars = paragraph.chars().count();
        if current_chars > 0 && current_chars + chars > max_chars {
            close(&mut current, &mut current_chars, &mut groups);
        }
        current.push(paragraph.clone());
        current_chars += chars;
    }
    close(&mut current, &mut current_chars, &mut groups);
    groups
}

/// Context-window grouping: fixed chunks of `window` paragraphs, each carrying
/// up to `window` preceding and following text paragraphs as context. Images
/// stay in `to_translate` but never appear in context.
pub fn build_window_groups(paragraphs: &[String], window: usize) -> Vec<TranslationGroup> {
    let window = window.max(1);
    let mut groups = Vec::new();
    let mut start = 0usize;
    while start < paragraphs.len() {
        let end = (start + window).min(paragraphs.len());
        let mut context_before: Vec<String> = paragraphs[..start]
            .iter()
            .filter(|p| !is_image_placeholder(p))
            .cloned()
            .collect();
        let keep_from = context_before.len().saturating_sub(window);
        context_before.drain(..keep_from);
        let context_after: Vec<String> = paragraphs[end..]
            .iter()
            .filter(|p| !is_image_placeholder(p))
            .take(window)
            .cloned()
            .collect();
        groups.push(TranslationGroup {
            index: groups.len(),
            to_translate: paragraphs[start..end].to_vec(),
            context_before,
            context_after,
        });
        start = end;
    }
    groups
}

/// Merges translated text back against the original paragraph order: image
/// slots come through unchanged, text slots consume translated pieces in
/// order. When the translator returns fewer pieces than text slots, the
/// leftover slots keep their original text instead of failing the chapter.
pub fn reassemble(original: &[String], translated: &str) -> Vec<String> {
    let mut pieces = translated
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty());

    original
        .iter()
        .map(|slot| {
            if is_image_placeholder(slot) {
                slot.clone()
            } else {
                pieces.next().unwrap_or(slot.as_str()).to_string()
            }
        })
        .collect()
}
