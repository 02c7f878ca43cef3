use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::chapters::TocEntry;
use crate::store::{read_json, write_json_atomic};
use crate::textutil::word_count;

/// Raw page dump produced by an external PDF/text extractor: ordered page
/// texts (image placeholder tokens already inlined) plus the document TOC.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PagesFile {
    pub pages: Vec<String>,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
    #[serde(default)]
    pub book_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterFile {
    pub number: usize,
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
    pub paragraphs: Vec<String>,
    pub word_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatedChapterFile {
    pub number: usize,
    pub title: String,
    pub paragraphs: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub original_word_count: usize,
    pub translator: String,
    pub translation_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterSummaryEntry {
    pub number: usize,
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
    pub page_count: usize,
    pub status: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataFile {
    pub total_pages: usize,
    pub chapters: Vec<ChapterSummaryEntry>,
    pub extraction_complete: bool,
    #[serde(default)]
    pub book_title: Option<String>,
    #[serde(default)]
    pub book_info: Option<serde_json::Value>,
}

/// `figures_metadata.json`, written by the external figure extractor.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FiguresFile {
    pub total_figures: usize,
    #[serde(default)]
    pub figures: Vec<FigureEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigureEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub page: usize,
    #[serde(default)]
    pub caption: Option<String>,
    pub filename: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub vector_count: Option<usize>,
}

/// One extraction/translation workspace on disk: `metadata.json` plus
/// numbered chapter files, all written atomically.
pub struct Project {
    dir: PathBuf,
}

impl Project {
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("project directory {} does not exist", dir.display());
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create project directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chapter_path(&self, number: usize) -> PathBuf {
        self.dir.join(format!("chapter_{number:03}.json"))
    }

    pub fn translated_chapter_path(&self, number: usize) -> PathBuf {
        self.dir.join(format!("chapter_{number:03}_translated.json"))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    pub fn load_pages(path: &Path) -> Result<PagesFile> {
        let pages: PagesFile = read_json(path)?;
        if pages.pages.is_empty() {
            bail!("{} contains no pages", path.display());
        }
        Ok(pages)
    }

    pub fn load_metadata(&self) -> Result<MetadataFile> {
        read_json(&self.metadata_path())
    }

    pub fn save_metadata(&self, metadata: &MetadataFile) -> Result<()> {
        write_json_atomic(&self.metadata_path(), metadata)
    }

    pub fn load_chapter(&self, number: usize) -> Result<ChapterFile> {
        read_json(&self.chapter_path(number))
    }

    pub fn save_chapter(&self, chapter: &ChapterFile) -> Result<()> {
        write_json_atomic(&self.chapter_path(chapter.number), chapter)
    }

    pub fn load_translated(&self, number: usize) -> Result<TranslatedChapterFile> {
        read_json(&self.translated_chapter_path(number))
    }

    pub fn save_translated(&self, chapter: &TranslatedChapterFile) -> Result<()> {
        write_json_atomic(&self.translated_chapter_path(chapter.number), chapter)
    }

    pub fn has_translated(&self, number: usize) -> bool {
        self.translated_chapter_path(number).exists()
    }

    /// Figure inventory, when the external figure extractor has run.
    pub fn load_figures(&self) -> Option<FiguresFile> {
        let path = self.dir.join("figures_metadata.json");
        path.exists().then(|| read_json(&path).ok()).flatten()
    }

    /// Chapter numbers present on disk, in order.
    pub fn chapter_numbers(&self) -> Result<Vec<usize>> {
        let metadata = self.load_metadata()?;
        Ok(metadata.chapters.iter().map(|c| c.number).collect())
    }
}

impl ChapterFile {
    pub fn new(
        number: usize,
        title: String,
        start_page: usize,
        end_page: usize,
        paragraphs: Vec<String>,
    ) -> Self {
        let words = paragraphs.iter().map(|p| word_count(p)).sum();
        Self {
            number,
            title,
            start_page,
            end_page,
            paragraphs,
            word_count: words,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::create(dir.path()).unwrap();
        let chapter = ChapterFile::new(
            3,
            "Chapter 3".into(),
            10,
            19,
            vec!["First paragraph here.".into(), "Second one.".into()],
        );
        project.save_chapter(&chapter).unwrap();
        let loaded = project.load_chapter(3).unwrap();
        assert_eq!(loaded.title, "Chapter 3");
        assert_eq!(loaded.word_count, 5);
        assert!(dir.path().join("chapter_003.json").exists());
    }

    #[test]
    fn missing_project_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(Project::open(&missing).is_err());
        assert!(Project::create(&missing).is_ok());
    }

    #[test]
    fn pages_file_requires_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.json");
        std::fs::write(&path, r#"{"pages": [], "toc": []}"#).unwrap();
        assert!(Project::load_pages(&path).is_err());
        std::fs::write(&path, r#"{"pages": ["hello world"]}"#).unwrap();
        let pages = Project::load_pages(&path).unwrap();
        assert_eq!(pages.pages.len(), 1);
        assert!(pages.toc.is_empty());
    }
}
