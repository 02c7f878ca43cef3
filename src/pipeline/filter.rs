use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::placeholders::is_image_placeholder;
use crate::progress::ConsoleProgress;
use crate::project::Project;
use crate::store::read_json;

static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("multi space"));
static MULTI_NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("multi newline"));

/// `blacklist_config.json`: what to strip from translated chapters and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub blacklist: BlacklistRules,
    #[serde(default)]
    pub settings: FilterSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlacklistRules {
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSettings {
    pub remove_empty_paragraphs: bool,
    pub case_sensitive: bool,
    pub trim_whitespace: bool,
    pub min_paragraph_length: usize,
    pub log_removals: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            remove_empty_paragraphs: true,
            case_sensitive: false,
            trim_whitespace: true,
            min_paragraph_length: 10,
            log_removals: true,
        }
    }
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            blacklist: BlacklistRules::default(),
            settings: FilterSettings::default(),
        }
    }
}

impl BlacklistConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path).with_context(|| format!("load blacklist config {}", path.display()))
    }
}

#[derive(Debug, Default)]
pub struct FilterOptions {
    pub config: BlacklistConfig,
}

struct CompiledFilter {
    symbols: Vec<String>,
    phrases: Vec<Regex>,
    patterns: Vec<Regex>,
    settings: FilterSettings,
    removals: usize,
}

impl CompiledFilter {
    fn build(config: &BlacklistConfig, log: &ConsoleProgress) -> Self {
        let case_insensitive = !config.settings.case_sensitive;
        let phrases = config
            .blacklist
            .phrases
            .iter()
            .filter_map(|phrase| {
                RegexBuilder::new(&regex::escape(phrase))
                    .case_insensitive(case_insensitive)
                    .build()
                    .ok()
            })
            .collect();
        let patterns = config
            .blacklist
            .patterns
            .iter()
            .filter_map(|pattern| {
                match RegexBuilder::new(pattern)
                    .case_insensitive(case_insensitive)
                    .build()
                {
                    Ok(re) => Some(re),
                    Err(err) => {
                        log.warn(format!("bad blacklist pattern '{pattern}': {err}"));
                        None
                    }
                }
            })
            .collect();
        Self {
            symbols: config.blacklist.symbols.clone(),
            phrases,
            patterns,
            settings: config.settings.clone(),
            removals: 0,
        }
    }

    fn apply(&mut self, text: &str) -> String {
        let mut text = text.to_string();
        for symbol in &self.symbols {
            let count = text.matches(symbol.as_str()).count();
            if count > 0 {
                text = text.replace(symbol.as_str(), "");
                self.removals += count;
            }
        }
        for re in self.phrases.iter().chain(self.patterns.iter()) {
            let count = re.find_iter(&text).count();
            if count > 0 {
                text = re.replace_all(&text, "").into_owned();
                self.removals += count;
            }
        }
        if self.settings.trim_whitespace {
            text = MULTI_SPACE_RE.replace_all(&text, " ").into_owned();
            text = text
                .lines()
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("\n");
            text = MULTI_NEWLINE_RE.replace_all(&text, "\n\n").into_owned();
        }
        text
    }

    fn keeps(&self, paragraph: &str) -> bool {
        if is_image_placeholder(paragraph) {
            return true;
        }
        if !self.settings.remove_empty_paragraphs {
            return true;
        }
        paragraph.trim().chars().count() >= self.settings.min_paragraph_length
    }
}

/// Post-translation cleanup: strips blacklisted symbols, phrases, and regex
/// patterns from every translated chapter, dropping paragraphs that end up
/// empty. Image placeholders are never dropped.
pub fn run_filter(project_dir: &Path, opts: &FilterOptions, log: &ConsoleProgress) -> Result<()> {
    let project = Project::open(project_dir)?;
    let numbers = project.chapter_numbers()?;
    let mut filter = CompiledFilter::build(&opts.config, log);

    let mut processed = 0usize;
    for (i, number) in numbers.iter().enumerate() {
        if !project.has_translated(*number) {
            continue;
        }
        let mut chapter = project.load_translated(*number)?;
        chapter.title = filter.apply(&chapter.title).trim().to_string();
        let mut kept: Vec<String> = Vec::with_capacity(chapter.paragraphs.len());
        for p in &chapter.paragraphs {
            let filtered = if is_image_placeholder(p) {
                p.clone()
            } else {
                filter.apply(p)
            };
            if filter.keeps(&filtered) {
                kept.push(filtered);
            }
        }
        chapter.paragraphs = kept;
        project.save_translated(&chapter)?;
        processed += 1;
        log.progress("filter", i + 1, numbers.len());
    }

    log.info(format!(
        "filtered {} chapters, {} removals",
        processed, filter.removals
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ChapterSummaryEntry, MetadataFile, TranslatedChapterFile};

    fn seed(dir: &Path, paragraphs: Vec<String>) -> Project {
        let project = Project::create(dir).unwrap();
        project
            .save_metadata(&MetadataFile {
                total_pages: 1,
                chapters: vec![ChapterSummaryEntry {
                    number: 0,
                    title: "Chapter".into(),
                    start_page: 0,
                    end_page: 0,
                    page_count: 1,
                    status: "extracted".into(),
                }],
                extraction_complete: true,
                book_title: None,
                book_info: None,
            })
            .unwrap();
        project
            .save_translated(&TranslatedChapterFile {
                number: 0,
                title: "Chapter".into(),
                paragraphs,
                summary: None,
                original_word_count: 10,
                translator: "stub".into(),
                translation_date: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        project
    }

    #[test]
    fn phrases_and_symbols_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let project = seed(
            dir.path(),
            vec![
                "Перевод выполнен ИИ: настоящий текст главы остается на месте.".into(),
                "Короткий § обрывок".into(),
            ],
        );
        let opts = FilterOptions {
            config: BlacklistConfig {
                blacklist: BlacklistRules {
                    phrases: vec!["перевод выполнен ии:".into()],
                    symbols: vec!["§".into()],
                    patterns: vec![],
                },
                settings: FilterSettings::default(),
            },
        };
        let log = ConsoleProgress::new(false);
        run_filter(dir.path(), &opts, &log).unwrap();

        let chapter = project.load_translated(0).unwrap();
        assert_eq!(
            chapter.paragraphs,
            vec![
                "настоящий текст главы остается на месте.",
                "Короткий обрывок"
            ]
        );
    }

    #[test]
    fn empty_paragraphs_are_dropped_but_images_stay() {
        let dir = tempfile::tempdir().unwrap();
        let project = seed(
            dir.path(),
            vec![
                "***".into(),
                "[IMAGE_P001_I00]".into(),
                "A paragraph long enough to keep after filtering.".into(),
            ],
        );
        let opts = FilterOptions {
            config: BlacklistConfig {
                blacklist: BlacklistRules {
                    phrases: vec![],
                    symbols: vec!["*".into()],
                    patterns: vec![],
                },
                settings: FilterSettings::default(),
            },
        };
        let log = ConsoleProgress::new(false);
        run_filter(dir.path(), &opts, &log).unwrap();

        let chapter = project.load_translated(0).unwrap();
        assert_eq!(chapter.paragraphs.len(), 2);
        assert_eq!(chapter.paragraphs[0], "[IMAGE_P001_I00]");
    }

    #[test]
    fn bad_patterns_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), vec!["A paragraph long enough to keep.".into()]);
        let opts = FilterOptions {
            config: BlacklistConfig {
                blacklist: BlacklistRules {
                    phrases: vec![],
                    symbols: vec![],
                    patterns: vec!["([unclosed".into()],
                },
                settings: FilterSettings::default(),
            },
        };
        let log = ConsoleProgress::new(false);
        assert!(run_filter(dir.path(), &opts, &log).is_ok());
    }
}
