use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on glossary terms shown in any one prompt.
pub const GLOSSARY_PROMPT_CAP: usize = 20;

/// New term pairs taken from a single original/translated pair.
const TERM_PAIRS_PER_GROUP: usize = 3;
/// Target-side candidates shorter than this are ignored as noise.
const MIN_TARGET_TERM_CHARS: usize = 4;

const TERM_STOPWORDS: [&str; 5] = ["The", "This", "That", "These", "Those"];

static CAP_TERM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\p{Lu}\p{Ll}+(?:\s+\p{Lu}\p{Ll}+)*").expect("capitalized term"));

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlossaryTerm {
    pub source: String,
    pub translation: String,
    #[serde(default)]
    pub seen: usize,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct GlossaryUpdate {
    pub source: String,
    pub translation: String,
}

/// What happened when an update was applied. A conflicting retranslation of
/// an already-pinned term is reported, not silently accepted.
#[derive(Clone, Debug)]
pub enum GlossaryEvent {
    Added {
        source: String,
        translation: String,
    },
    Conflict {
        source: String,
        existing: String,
        proposed: String,
    },
}

/// Append-only term memory accumulated over a translation run. First
/// translation of a term wins; later sightings only bump its counter.
#[derive(Clone, Default)]
pub struct Glossary {
    terms: HashMap<String, GlossaryTerm>,
}

impl Glossary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn apply_updates(
        &mut self,
        updates: impl IntoIterator<Item = GlossaryUpdate>,
    ) -> Vec<GlossaryEvent> {
        let mut events = Vec::new();
        for up in updates {
            let source = up.source.trim();
            let translation = up.translation.trim();
            if source.is_empty() || translation.is_empty() {
                continue;
            }
            match self.terms.get_mut(source) {
                None => {
                    self.terms.insert(
                        source.to_string(),
                        GlossaryTerm {
                            source: source.to_string(),
                            translation: translation.to_string(),
                            seen: 1,
                        },
                    );
                    events.push(GlossaryEvent::Added {
                        source: source.to_string(),
                        translation: translation.to_string(),
                    });
                }
                Some(existing) => {
                    existing.seen = existing.seen.saturating_add(1);
                    if existing.translation != translation {
                        events.push(GlossaryEvent::Conflict {
                            source: source.to_string(),
                            existing: existing.translation.clone(),
                            proposed: translation.to_string(),
                        });
                    }
                }
            }
        }
        events
    }

    /// Terms that actually occur in `text`, longest source first so compound
    /// terms outrank their fragments, bounded by `max_items`.
    #[must_use]
    pub fn relevant_for_text<'a>(&'a self, text: &str, max_items: usize) -> Vec<&'a GlossaryTerm> {
        if self.terms.is_empty() || text.is_empty() || max_items == 0 {
            return Vec::new();
        }
        let mut items: Vec<&GlossaryTerm> = self
            .terms
            .values()
            .filter(|t| text.contains(&t.source))
            .collect();
        items.sort_by(|a, b| {
            b.source
                .len()
                .cmp(&a.source.len())
                .then_with(|| b.seen.cmp(&a.seen))
                .then_with(|| a.source.cmp(&b.source))
        });
        items.truncate(max_items);
        items
    }

    #[must_use]
    pub fn render_for_prompt(terms: &[&GlossaryTerm]) -> String {
        if terms.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        out.push_str("GLOSSARY (follow these translations consistently):\n");
        for t in terms {
            out.push_str("- ");
            out.push_str(&t.source);
            out.push_str(" => ");
            out.push_str(&t.translation);
            out.push('\n');
        }
        out
    }

    /// Snapshot for the persisted context file; ordered for stable output.
    #[must_use]
    pub fn export(&self) -> Vec<GlossaryTerm> {
        let mut terms: Vec<GlossaryTerm> = self.terms.values().cloned().collect();
        terms.sort_by(|a, b| a.source.cmp(&b.source));
        terms
    }

    pub fn import(&mut self, terms: Vec<GlossaryTerm>) {
        for t in terms {
            self.terms.entry(t.source.clone()).or_insert(t);
        }
    }
}

/// Heuristic term mining over one original/translated pair: capitalized
/// runs that do not open a sentence are treated as candidate terms, paired
/// by position. Crude, but enough to keep recurring names consistent; the
/// glossary's first-wins rule absorbs bad pairs.
pub fn extract_term_updates(original: &str, translated: &str) -> Vec<GlossaryUpdate> {
    let sources: Vec<String> = capitalized_terms(original)
        .into_iter()
        .filter(|t| !TERM_STOPWORDS.contains(&t.as_str()))
        .take(TERM_PAIRS_PER_GROUP)
        .collect();
    if sources.is_empty() {
        return Vec::new();
    }
    let targets: Vec<String> = capitalized_terms(translated)
        .into_iter()
        .filter(|t| t.chars().count() >= MIN_TARGET_TERM_CHARS)
        .collect();
    sources
        .into_iter()
        .zip(targets)
        .map(|(source, translation)| GlossaryUpdate {
            source,
            translation,
        })
        .collect()
}

fn capitalized_terms(text: &str) -> Vec<String> {
    CAP_TERM_RE
        .find_iter(text)
        .filter(|m| !opens_sentence(text, m.start()))
        .map(|m| m.as_str().to_string())
        .collect()
}

// The regex crate has no lookbehind, so sentence starts are filtered here.
fn opens_sentence(text: &str, pos: usize) -> bool {
    let before = text[..pos].trim_end();
    before.is_empty() || before.ends_with(['.', '!', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up(source: &str, translation: &str) -> GlossaryUpdate {
        GlossaryUpdate {
            source: source.to_string(),
            translation: translation.to_string(),
        }
    }

    #[test]
    fn first_translation_wins() {
        let mut g = Glossary::new();
        g.apply_updates([up("warp core", "варп-ядро")]);
        let events = g.apply_updates([up("warp core", "ядро искривления")]);
        assert!(matches!(events.as_slice(), [GlossaryEvent::Conflict { .. }]));
        let hits = g.relevant_for_text("the warp core hummed", 10);
        assert_eq!(hits[0].translation, "варп-ядро");
    }

    #[test]
    fn relevance_prefers_longer_terms_and_respects_cap() {
        let mut g = Glossary::new();
        g.apply_updates([
            up("core", "ядро"),
            up("warp core", "варп-ядро"),
            up("bridge", "мостик"),
        ]);
        let hits = g.relevant_for_text("the warp core sat below the bridge", 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "warp core");
    }

    #[test]
    fn blank_updates_are_ignored() {
        let mut g = Glossary::new();
        let events = g.apply_updates([up("  ", "x"), up("y", "")]);
        assert!(events.is_empty());
        assert!(g.is_empty());
    }

    #[test]
    fn term_mining_skips_sentence_starts_and_stopwords() {
        let original = "The crew trusted the Aurora Drive. Later they doubted it.";
        let translated = "Экипаж доверял установке Аврора Драйв. Позже они усомнились.";
        let updates = extract_term_updates(original, translated);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].source, "Aurora Drive");
        assert_eq!(updates[0].translation, "Аврора Драйв");
    }

    #[test]
    fn term_mining_pairs_by_position_and_caps_count() {
        let original =
            "We met Alice Cooper, then Bob Marley, then Carol King, then Dave Brubeck today.";
        let translated = "Мы встретили Элис Купер, затем Боба Марли, затем Кэрол Кинг сегодня.";
        let updates = extract_term_updates(original, translated);
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].source, "Alice Cooper");
        assert_eq!(updates[1].translation, "Боба Марли");
    }

    #[test]
    fn term_mining_handles_empty_sides() {
        assert!(extract_term_updates("nothing capitalized here", "ничего").is_empty());
        assert!(extract_term_updates("saw the Warp Core hum", "").is_empty());
    }

    #[test]
    fn export_import_round_trips() {
        let mut g = Glossary::new();
        g.apply_updates([up("alpha", "альфа"), up("beta", "бета")]);
        let mut g2 = Glossary::new();
        g2.import(g.export());
        assert_eq!(g2.len(), 2);
        let hits = g2.relevant_for_text("alpha", GLOSSARY_PROMPT_CAP);
        assert_eq!(hits[0].translation, "альфа");
    }
}
