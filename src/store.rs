use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::glossary::{Glossary, GlossaryTerm};
use crate::textutil::tail_chars;

pub const PROGRESS_FILE: &str = "translation_progress.json";
pub const CONTEXT_FILE: &str = "translation_context.json";

/// Translated paragraphs kept for prompt continuity.
pub const RECENT_TRANSLATIONS_KEPT: usize = 5;
/// Tail of the previous source paragraph carried into the next prompt.
pub const PREVIOUS_TAIL_CHARS: usize = 200;

/// Serializes as a temp file in the target directory, then renames over the
/// destination, so readers never observe a truncated JSON document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("parse {}", path.display()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub status: ChapterStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProgressFile {
    #[serde(default)]
    chapters: BTreeMap<String, ChapterProgress>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    total_chapters: usize,
    #[serde(default)]
    completed_chapters: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_chapter: Option<usize>,
}

/// Per-chapter completion ledger behind `translation_progress.json`. Single
/// writer within a run; every mutation is persisted immediately so a killed
/// process resumes from the last recorded state.
pub struct ProgressStore {
    path: PathBuf,
    file: ProgressFile,
}

impl ProgressStore {
    pub fn open(dir: &Path, total_chapters: usize) -> Result<Self> {
        let path = dir.join(PROGRESS_FILE);
        let mut file: ProgressFile = if path.exists() {
            read_json(&path)?
        } else {
            ProgressFile::default()
        };
        file.total_chapters = total_chapters;
        Ok(Self { path, file })
    }

    pub fn status(&self, chapter: usize) -> ChapterStatus {
        self.file
            .chapters
            .get(&chapter.to_string())
            .map_or(ChapterStatus::NotStarted, |c| c.status)
    }

    pub fn is_complete(&self, chapter: usize) -> bool {
        self.status(chapter) == ChapterStatus::Completed
    }

    pub fn retries(&self, chapter: usize) -> u32 {
        self.file
            .chapters
            .get(&chapter.to_string())
            .map_or(0, |c| c.retries)
    }

    pub fn completed_count(&self) -> usize {
        self.file.completed_chapters
    }

    pub fn total_chapters(&self) -> usize {
        self.file.total_chapters
    }

    pub fn chapters(&self) -> impl Iterator<Item = (usize, &ChapterProgress)> {
        self.file
            .chapters
            .iter()
            .filter_map(|(k, v)| Some((k.parse().ok()?, v)))
    }

    pub fn mark_start(&mut self, chapter: usize) -> Result<()> {
        let entry = self
            .file
            .chapters
            .entry(chapter.to_string())
            .or_insert_with(|| ChapterProgress {
                status: ChapterStatus::NotStarted,
                started_at: None,
                completed_at: None,
                retries: 0,
            });
        entry.status = ChapterStatus::InProgress;
        entry.started_at = Some(Utc::now().to_rfc3339());
        self.file.current_chapter = Some(chapter);
        self.save()
    }

    pub fn mark_complete(&mut self, chapter: usize) -> Result<()> {
        if let Some(entry) = self.file.chapters.get_mut(&chapter.to_string()) {
            entry.status = ChapterStatus::Completed;
            entry.completed_at = Some(Utc::now().to_rfc3339());
        }
        self.save()
    }

    /// Records a chapter that was attempted and gave up, bumping its retry
    /// count, so a restart can tell "failed" apart from "never started".
    pub fn mark_failed(&mut self, chapter: usize) -> Result<()> {
        if let Some(entry) = self.file.chapters.get_mut(&chapter.to_string()) {
            entry.status = ChapterStatus::Failed;
            entry.retries = entry.retries.saturating_add(1);
        }
        self.save()
    }

    fn save(&mut self) -> Result<()> {
        self.file.completed_chapters = self
            .file
            .chapters
            .values()
            .filter(|c| c.status == ChapterStatus::Completed)
            .count();
        self.file.last_updated = Some(Utc::now().to_rfc3339());
        write_json_atomic(&self.path, &self.file)
    }
}

/// Prompt-continuity state scrolled along while translating one chapter.
/// Built fresh per chapter; callers own it and thread it through explicitly.
#[derive(Debug, Default, Clone)]
pub struct RollingContext {
    pub previous_summary: Option<String>,
    pub recent_translations: Vec<String>,
    pub previous_tail: Option<String>,
}

impl RollingContext {
    pub fn push_translation(&mut self, translated: &str) {
        self.recent_translations.push(translated.to_string());
        if self.recent_translations.len() > RECENT_TRANSLATIONS_KEPT {
            let drop = self.recent_translations.len() - RECENT_TRANSLATIONS_KEPT;
            self.recent_translations.drain(..drop);
        }
    }

    pub fn note_source(&mut self, source: &str) {
        self.previous_tail = Some(tail_chars(source, PREVIOUS_TAIL_CHARS).to_string());
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextFile {
    #[serde(default)]
    glossary: Vec<GlossaryTerm>,
    #[serde(default)]
    chapter_summaries: BTreeMap<String, String>,
    #[serde(default)]
    last_updated: Option<String>,
}

/// Cross-chapter memory behind `translation_context.json`: the accumulated
/// glossary and one summary per completed chapter.
pub struct ContextStore {
    path: PathBuf,
    file: ContextFile,
    pub glossary: Glossary,
}

impl ContextStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(CONTEXT_FILE);
        let file: ContextFile = if path.exists() {
            read_json(&path)?
        } else {
            ContextFile::default()
        };
        let mut glossary = Glossary::new();
        glossary.import(file.glossary.clone());
        Ok(Self {
            path,
            file,
            glossary,
        })
    }

    pub fn record_summary(&mut self, chapter: usize, summary: &str) -> Result<()> {
        self.file
            .chapter_summaries
            .insert(chapter.to_string(), summary.to_string());
        self.save()
    }

    pub fn summary_of(&self, chapter: usize) -> Option<&str> {
        self.file
            .chapter_summaries
            .get(&chapter.to_string())
            .map(String::as_str)
    }

    /// Seeds a chapter's rolling context from the previous chapter's summary.
    pub fn build_context(&self, chapter: usize) -> RollingContext {
        let previous_summary = chapter
            .checked_sub(1)
            .and_then(|prev| self.summary_of(prev))
            .map(str::to_string);
        RollingContext {
            previous_summary,
            ..RollingContext::default()
        }
    }

    pub fn save(&mut self) -> Result<()> {
        self.file.glossary = self.glossary.export();
        self.file.last_updated = Some(Utc::now().to_rfc3339());
        write_json_atomic(&self.path, &self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::GlossaryUpdate;

    #[test]
    fn progress_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = ProgressStore::open(dir.path(), 10).unwrap();
            store.mark_start(0).unwrap();
            store.mark_complete(0).unwrap();
            store.mark_start(1).unwrap();
            store.mark_failed(1).unwrap();
        }
        let store = ProgressStore::open(dir.path(), 10).unwrap();
        assert!(store.is_complete(0));
        assert_eq!(store.status(1), ChapterStatus::Failed);
        assert_eq!(store.retries(1), 1);
        assert_eq!(store.status(2), ChapterStatus::NotStarted);
        assert_eq!(store.completed_count(), 1);
    }

    #[test]
    fn failed_chapter_accumulates_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::open(dir.path(), 3).unwrap();
        store.mark_start(2).unwrap();
        store.mark_failed(2).unwrap();
        store.mark_start(2).unwrap();
        store.mark_failed(2).unwrap();
        assert_eq!(store.retries(2), 2);
        assert!(!store.is_complete(2));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &serde_json::json!({"ok": true})).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn rolling_context_keeps_a_bounded_window() {
        let mut ctx = RollingContext::default();
        for i in 0..8 {
            ctx.push_translation(&format!("t{i}"));
        }
        assert_eq!(ctx.recent_translations.len(), RECENT_TRANSLATIONS_KEPT);
        assert_eq!(ctx.recent_translations[0], "t3");
        ctx.note_source(&"x".repeat(500));
        assert_eq!(ctx.previous_tail.as_ref().unwrap().len(), PREVIOUS_TAIL_CHARS);
    }

    #[test]
    fn context_store_round_trips_glossary_and_summaries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = ContextStore::open(dir.path()).unwrap();
            store.glossary.apply_updates([GlossaryUpdate {
                source: "engine".into(),
                translation: "двигатель".into(),
            }]);
            store.record_summary(0, "The crew lifts off.").unwrap();
        }
        let store = ContextStore::open(dir.path()).unwrap();
        assert_eq!(store.glossary.len(), 1);
        let ctx = store.build_context(1);
        assert_eq!(ctx.previous_summary.as_deref(), Some("The crew lifts off."));
        assert!(store.build_context(0).previous_summary.is_none());
    }
}
