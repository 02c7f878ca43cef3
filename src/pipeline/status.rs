use std::path::Path;

use anyhow::Result;

use crate::progress::ConsoleProgress;
use crate::project::Project;
use crate::store::{ChapterStatus, ProgressStore};

/// Prints the translation ledger for a project: per-chapter status plus
/// overall counts.
pub fn run_status(project_dir: &Path, log: &ConsoleProgress) -> Result<()> {
    let project = Project::open(project_dir)?;
    let metadata = project.load_metadata()?;
    let progress = ProgressStore::open(project_dir, metadata.chapters.len())?;

    let mut completed = 0usize;
    let mut in_progress = 0usize;
    let mut failed = 0usize;
    for chapter in &metadata.chapters {
        let status = progress.status(chapter.number);
        let label = match status {
            ChapterStatus::NotStarted => "not started",
            ChapterStatus::InProgress => "in progress",
            ChapterStatus::Completed => "completed",
            ChapterStatus::Failed => "failed",
        };
        match status {
            ChapterStatus::Completed => completed += 1,
            ChapterStatus::InProgress => in_progress += 1,
            ChapterStatus::Failed => failed += 1,
            ChapterStatus::NotStarted => {}
        }
        let retries = progress.retries(chapter.number);
        if retries > 0 {
            log.info(format!(
                "chapter {:3}  {:<11}  (retries: {})  {}",
                chapter.number, label, retries, chapter.title
            ));
        } else {
            log.info(format!(
                "chapter {:3}  {:<11}  {}",
                chapter.number, label, chapter.title
            ));
        }
    }

    log.info(format!(
        "{} chapters: {} completed, {} in progress, {} failed, {} not started",
        metadata.chapters.len(),
        completed,
        in_progress,
        failed,
        metadata.chapters.len() - completed - in_progress - failed
    ));
    if let Some(figures) = project.load_figures() {
        log.info(format!("{} figures extracted", figures.total_figures));
    }
    Ok(())
}
