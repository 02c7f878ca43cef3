use std::path::Path;

use anyhow::{bail, Result};

use crate::chapters::{
    self, repair_coverage, verify_coverage, ChapterBounds, DEFAULT_PAGES_PER_CHAPTER,
    MIN_CHAPTER_PAGES,
};
use crate::config::AppConfig;
use crate::progress::ConsoleProgress;
use crate::project::{ChapterFile, ChapterSummaryEntry, MetadataFile, PagesFile, Project};
use crate::segment::{segment_paragraphs, SegmentOptions};
use crate::textutil::{clean_ocr_artifacts, collapse_blank_runs};

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub segment: SegmentOptions,
    pub min_chapter_pages: usize,
    pub pages_per_chapter: usize,
    pub clean_ocr: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            segment: SegmentOptions::default(),
            min_chapter_pages: MIN_CHAPTER_PAGES,
            pages_per_chapter: DEFAULT_PAGES_PER_CHAPTER,
            clean_ocr: true,
        }
    }
}

impl ExtractOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut opts = Self::default();
        let e = &cfg.extract;
        if let Some(v) = e.max_words {
            opts.segment.max_words = v;
        }
        if let Some(v) = e.ideal_words {
            opts.segment.ideal_words = v;
        }
        if let Some(v) = e.min_chars {
            opts.segment.min_chars = v;
        }
        if let Some(v) = e.sentences_per_paragraph {
            opts.segment.sentences_per_paragraph = v;
        }
        if let Some(v) = e.min_chapter_pages {
            opts.min_chapter_pages = v;
        }
        if let Some(v) = e.pages_per_chapter {
            opts.pages_per_chapter = v;
        }
        opts
    }
}

/// Extraction stage: page dump in, one JSON file per chapter plus
/// `metadata.json` out.
pub fn run_extract(
    pages_path: &Path,
    output_dir: &Path,
    opts: &ExtractOptions,
    log: &ConsoleProgress,
) -> Result<()> {
    let pages_file = Project::load_pages(pages_path)?;
    let project = Project::create(output_dir)?;
    let bounds = resolve_bounds(&pages_file, opts, log);
    log.info(format!(
        "{} pages, {} chapters",
        pages_file.pages.len(),
        bounds.len()
    ));

    let mut entries = Vec::with_capacity(bounds.len());
    for (number, bound) in bounds.iter().enumerate() {
        let text = chapter_text(&pages_file.pages, bound, opts.clean_ocr);
        let paragraphs = segment_paragraphs(&text, &opts.segment);
        let chapter = ChapterFile::new(
            number,
            bound.title.clone(),
            bound.start_page,
            bound.end_page,
            paragraphs,
        );
        if chapter.paragraphs.is_empty() {
            log.warn(format!("chapter {number} ({}) has no paragraphs", bound.title));
        }
        project.save_chapter(&chapter)?;
        entries.push(ChapterSummaryEntry {
            number,
            title: bound.title.clone(),
            start_page: bound.start_page,
            end_page: bound.end_page,
            page_count: bound.page_count(),
            status: "extracted".to_string(),
        });
        log.progress("extract", number + 1, bounds.len());
    }

    if entries.is_empty() {
        bail!("extraction produced no chapters");
    }
    project.save_metadata(&MetadataFile {
        total_pages: pages_file.pages.len(),
        chapters: entries,
        extraction_complete: true,
        book_title: pages_file.book_title.clone(),
        book_info: None,
    })?;
    Ok(())
}

/// TOC, then markers, then uniform windows; coverage violations are logged
/// before being repaired.
fn resolve_bounds(
    pages_file: &PagesFile,
    opts: &ExtractOptions,
    log: &ConsoleProgress,
) -> Vec<ChapterBounds> {
    let total_pages = pages_file.pages.len();
    let mut bounds = if pages_file.toc.is_empty() {
        Vec::new()
    } else {
        log.info(format!("using TOC ({} entries)", pages_file.toc.len()));
        chapters::resolve_from_toc(&pages_file.toc, total_pages, opts.min_chapter_pages)
    };
    if bounds.len() < 2 {
        log.info("scanning pages for chapter markers");
        bounds = chapters::resolve_from_patterns(&pages_file.pages);
    }
    if bounds.len() < 2 {
        log.info(format!(
            "no chapter structure found, splitting every {} pages",
            opts.pages_per_chapter
        ));
        bounds = chapters::fallback_by_pages(total_pages, opts.pages_per_chapter);
    }

    let report = verify_coverage(&bounds, total_pages);
    if !report.is_exact() {
        log.warn(format!(
            "page coverage: {} missing, {} overlapping; repairing",
            report.missing.len(),
            report.overlapping.len()
        ));
        repair_coverage(&mut bounds, total_pages);
    }
    bounds
}

fn chapter_text(pages: &[String], bound: &ChapterBounds, clean_ocr: bool) -> String {
    let end = bound.end_page.min(pages.len().saturating_sub(1));
    let joined = pages[bound.start_page..=end].join("\n");
    let joined = collapse_blank_runs(&joined);
    if clean_ocr {
        clean_ocr_artifacts(&joined)
    } else {
        joined
    }
}
