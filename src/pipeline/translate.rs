use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::config::AppConfig;
use crate::glossary::{extract_term_updates, Glossary, GLOSSARY_PROMPT_CAP};
use crate::groups::{build_char_groups, build_window_groups, reassemble, TranslationGroup};
use crate::llm::{complete_with_retries, ChatBackend, ChatMessage};
use crate::placeholders::{is_image_placeholder, placeholders_preserved, strip_placeholders};
use crate::progress::ConsoleProgress;
use crate::project::{Project, TranslatedChapterFile};
use crate::prompts::{
    build_context_block, default_system_prompt, render_neighbor_context, render_summary_prompt,
    render_title_prompt, render_translate_prompt, SystemPromptFn, SUMMARY_SYSTEM_PROMPT,
};
use crate::store::{ContextStore, ProgressStore, RollingContext};

const DEFAULT_MAX_CHARS: usize = 2500;
const DEFAULT_WORKERS: usize = 3;
const DEFAULT_MAX_RETRIES: u32 = 3;
const SUMMARY_SAMPLE_CHARS: usize = 1500;

#[derive(Clone)]
pub struct TranslateOptions {
    /// Worker thread count; 1 selects the sequential contextual path where
    /// each translation feeds the next prompt's rolling context.
    pub workers: usize,
    pub max_chars: usize,
    /// When set, chapters split into fixed paragraph chunks carrying
    /// neighboring text as prompt context, instead of character budgeting.
    pub context_window: Option<usize>,
    pub max_retries: u32,
    pub target_language: String,
    pub translator_name: String,
    pub system_prompt: SystemPromptFn,
    /// Polled by workers between tasks; setting it drains the queue without
    /// cancelling in-flight requests.
    pub stop: Arc<AtomicBool>,
}

impl TranslateOptions {
    pub fn from_config(cfg: &AppConfig, translator_name: &str) -> Self {
        let t = &cfg.translate;
        let target_language = t
            .target_language
            .clone()
            .unwrap_or_else(|| "Russian".to_string());
        Self {
            workers: t.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            max_chars: t.max_chars.unwrap_or(DEFAULT_MAX_CHARS),
            context_window: t.context_window,
            max_retries: t.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            system_prompt: default_system_prompt(&target_language, t.domain.as_deref()),
            target_language,
            translator_name: translator_name.to_string(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct GroupTask {
    chapter: usize,
    total_groups: usize,
    group: TranslationGroup,
}

struct GroupResult {
    chapter: usize,
    group_index: usize,
    text: String,
    failed: bool,
    chars_sent: usize,
    chars_received: usize,
}

#[derive(Default)]
struct RunStats {
    chars_sent: usize,
    chars_received: usize,
    failed_groups: usize,
    completed_groups: usize,
}

struct PendingChapter {
    title: String,
    original_word_count: usize,
    groups: Vec<TranslationGroup>,
    results: BTreeMap<usize, (String, bool)>,
}

/// Translation stage: walks pending chapters and translates their paragraph
/// groups, either over a worker pool with channel fan-in to a single
/// consumer, or sequentially with a rolling per-group context when
/// `workers == 1`.
pub fn run_translate(
    project_dir: &Path,
    backend: Arc<dyn ChatBackend>,
    opts: &TranslateOptions,
    log: &ConsoleProgress,
) -> Result<()> {
    let project = Project::open(project_dir)?;
    let chapter_numbers = project.chapter_numbers()?;
    let mut progress = ProgressStore::open(project_dir, chapter_numbers.len())?;
    let mut context_store = ContextStore::open(project_dir)?;

    let pending_numbers: Vec<usize> = chapter_numbers
        .iter()
        .copied()
        .filter(|&n| !progress.is_complete(n))
        .collect();
    if pending_numbers.is_empty() {
        log.info("all chapters already translated");
        return Ok(());
    }
    log.info(format!(
        "{} of {} chapters pending",
        pending_numbers.len(),
        chapter_numbers.len()
    ));

    let completed = if opts.workers <= 1 {
        run_sequential(
            &project,
            &pending_numbers,
            backend.as_ref(),
            opts,
            &mut progress,
            &mut context_store,
            log,
        )?
    } else {
        run_parallel(
            &project,
            &pending_numbers,
            backend,
            opts,
            &mut progress,
            &mut context_store,
            log,
        )?
    };
    context_store.save()?;

    if completed == 0 {
        bail!("no chapters were translated");
    }
    Ok(())
}

fn build_groups(paragraphs: &[String], opts: &TranslateOptions) -> Vec<TranslationGroup> {
    match opts.context_window {
        Some(window) => build_window_groups(paragraphs, window),
        None => build_char_groups(paragraphs, opts.max_chars),
    }
}

/// Fan-out over a worker pool; the single consumer owns all chapter assembly
/// and persistence. Workers read a glossary snapshot taken at run start; new
/// terms mined from the results land in the context store as they arrive.
#[allow(clippy::too_many_arguments)]
fn run_parallel(
    project: &Project,
    pending_numbers: &[usize],
    backend: Arc<dyn ChatBackend>,
    opts: &TranslateOptions,
    progress: &mut ProgressStore,
    context_store: &mut ContextStore,
    log: &ConsoleProgress,
) -> Result<usize> {
    let glossary = Arc::new(context_store.glossary.clone());
    let mut pending: HashMap<usize, PendingChapter> = HashMap::new();
    let mut contexts: HashMap<usize, Arc<RollingContext>> = HashMap::new();
    let mut tasks: Vec<GroupTask> = Vec::new();

    for &number in pending_numbers {
        let chapter = project
            .load_chapter(number)
            .with_context(|| format!("load chapter {number}"))?;
        let groups = build_groups(&chapter.paragraphs, opts);
        progress.mark_start(number)?;
        contexts.insert(number, Arc::new(context_store.build_context(number)));
        for group in &groups {
            tasks.push(GroupTask {
                chapter: number,
                total_groups: groups.len(),
                group: group.clone(),
            });
        }
        pending.insert(
            number,
            PendingChapter {
                title: chapter.title,
                original_word_count: chapter.word_count,
                groups,
                results: BTreeMap::new(),
            },
        );
    }

    let total_tasks = tasks.len();
    let stats = Arc::new(Mutex::new(RunStats::default()));
    let (result_tx, result_rx) = channel::<GroupResult>();
    spawn_workers(tasks, backend.clone(), opts, &contexts, &glossary, &stats, result_tx);

    // Single consumer: all chapter assembly and persistence happens here.
    let mut done_tasks = 0usize;
    let mut completed_chapters = 0usize;
    for result in result_rx {
        done_tasks += 1;
        log.progress("translate", done_tasks, total_tasks);
        let chapter_done = match pending.get_mut(&result.chapter) {
            Some(entry) => {
                if !result.failed && !result.text.is_empty() {
                    if let Some(group) = entry.groups.get(result.group_index) {
                        context_store
                            .glossary
                            .apply_updates(extract_term_updates(&group.source_text(), &result.text));
                    }
                }
                entry
                    .results
                    .insert(result.group_index, (result.text, result.failed));
                entry.results.len() >= entry.groups.len()
            }
            None => false,
        };
        if !chapter_done {
            continue;
        }
        if let Some(entry) = pending.remove(&result.chapter) {
            if finalize_chapter(
                result.chapter,
                entry,
                project,
                backend.as_ref(),
                opts,
                progress,
                context_store,
                log,
            )? {
                completed_chapters += 1;
            }
        }
    }

    // Anything still pending either had no text groups (image-only chapters)
    // or lost results to a dead worker; both get finalized, never dropped.
    let mut leftovers: Vec<usize> = pending.keys().copied().collect();
    leftovers.sort_unstable();
    for number in leftovers {
        if let Some(entry) = pending.remove(&number) {
            if entry.results.len() < entry.groups.len() {
                log.warn(format!(
                    "chapter {number}: only {} of {} groups reported",
                    entry.results.len(),
                    entry.groups.len()
                ));
            }
            if finalize_chapter(
                number,
                entry,
                project,
                backend.as_ref(),
                opts,
                progress,
                context_store,
                log,
            )? {
                completed_chapters += 1;
            }
        }
    }

    let stats = stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    log.info(format!(
        "done: {} chapters, {} groups ok, {} failed, {} chars sent, {} received",
        completed_chapters,
        stats.completed_groups,
        stats.failed_groups,
        stats.chars_sent,
        stats.chars_received
    ));
    Ok(completed_chapters)
}

/// One request at a time, strict group order: every successful translation
/// feeds the rolling context and the glossary before the next prompt is
/// built.
#[allow(clippy::too_many_arguments)]
fn run_sequential(
    project: &Project,
    pending_numbers: &[usize],
    backend: &dyn ChatBackend,
    opts: &TranslateOptions,
    progress: &mut ProgressStore,
    context_store: &mut ContextStore,
    log: &ConsoleProgress,
) -> Result<usize> {
    let mut completed_chapters = 0usize;
    let mut stats = RunStats::default();

    'chapters: for &number in pending_numbers {
        let chapter = project
            .load_chapter(number)
            .with_context(|| format!("load chapter {number}"))?;
        let groups = build_groups(&chapter.paragraphs, opts);
        progress.mark_start(number)?;
        let mut ctx = context_store.build_context(number);
        let mut results: BTreeMap<usize, (String, bool)> = BTreeMap::new();
        let total_groups = groups.len();

        for (done, group) in groups.iter().enumerate() {
            if opts.stop.load(Ordering::Relaxed) {
                log.warn("stop requested, remaining chapters are left for the next run");
                break 'chapters;
            }
            let task = GroupTask {
                chapter: number,
                total_groups,
                group: group.clone(),
            };
            let result = translate_group(
                &task,
                backend,
                &opts.system_prompt,
                &opts.target_language,
                Some(&ctx),
                &context_store.glossary,
                opts.max_retries,
            );
            stats.chars_sent += result.chars_sent;
            stats.chars_received += result.chars_received;
            let source = group.source_text();
            if result.failed {
                stats.failed_groups += 1;
            } else {
                stats.completed_groups += 1;
                if !result.text.is_empty() {
                    context_store
                        .glossary
                        .apply_updates(extract_term_updates(&source, &result.text));
                    ctx.push_translation(&result.text);
                }
            }
            if !source.is_empty() {
                ctx.note_source(&source);
            }
            results.insert(result.group_index, (result.text, result.failed));
            log.progress("translate", done + 1, total_groups);
        }

        let entry = PendingChapter {
            title: chapter.title,
            original_word_count: chapter.word_count,
            groups,
            results,
        };
        if finalize_chapter(
            number,
            entry,
            project,
            backend,
            opts,
            progress,
            context_store,
            log,
        )? {
            completed_chapters += 1;
        }
    }

    log.info(format!(
        "done: {} chapters, {} groups ok, {} failed, {} chars sent, {} received",
        completed_chapters,
        stats.completed_groups,
        stats.failed_groups,
        stats.chars_sent,
        stats.chars_received
    ));
    Ok(completed_chapters)
}

fn spawn_workers(
    tasks: Vec<GroupTask>,
    backend: Arc<dyn ChatBackend>,
    opts: &TranslateOptions,
    contexts: &HashMap<usize, Arc<RollingContext>>,
    glossary: &Arc<Glossary>,
    stats: &Arc<Mutex<RunStats>>,
    result_tx: Sender<GroupResult>,
) {
    let (task_tx, task_rx) = channel::<GroupTask>();
    for task in tasks {
        // Receiver is alive, send cannot fail here.
        let _ = task_tx.send(task);
    }
    drop(task_tx);
    let task_rx = Arc::new(Mutex::new(task_rx));

    for _ in 0..opts.workers.max(1) {
        let task_rx = task_rx.clone();
        let result_tx = result_tx.clone();
        let backend = backend.clone();
        let contexts = contexts.clone();
        let glossary = glossary.clone();
        let stats = stats.clone();
        let system_prompt = opts.system_prompt.clone();
        let stop = opts.stop.clone();
        let target_language = opts.target_language.clone();
        let max_retries = opts.max_retries;
        thread::spawn(move || loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let task = {
                let rx = match task_rx.lock() {
                    Ok(rx) => rx,
                    Err(_) => break,
                };
                match rx.recv() {
                    Ok(task) => task,
                    Err(_) => break,
                }
            };
            let result = translate_group(
                &task,
                backend.as_ref(),
                &system_prompt,
                &target_language,
                contexts.get(&task.chapter).map(|c| c.as_ref()),
                &glossary,
                max_retries,
            );
            if let Ok(mut s) = stats.lock() {
                s.chars_sent += result.chars_sent;
                s.chars_received += result.chars_received;
                if result.failed {
                    s.failed_groups += 1;
                } else {
                    s.completed_groups += 1;
                }
            }
            if result_tx.send(result).is_err() {
                break;
            }
        });
    }
}

fn translate_group(
    task: &GroupTask,
    backend: &dyn ChatBackend,
    system_prompt: &SystemPromptFn,
    target_language: &str,
    context: Option<&RollingContext>,
    glossary: &Glossary,
    max_retries: u32,
) -> GroupResult {
    let source = task.group.source_text();
    // Image-only groups have nothing to send; pass them straight through.
    if source.trim().is_empty() {
        return GroupResult {
            chapter: task.chapter,
            group_index: task.group.index,
            text: String::new(),
            failed: false,
            chars_sent: 0,
            chars_received: 0,
        };
    }
    let mut context_block = context
        .map(|ctx| build_context_block(ctx, task.group.index, task.total_groups))
        .unwrap_or_default();
    context_block.push_str(&render_neighbor_context(
        &task.group.context_before,
        &task.group.context_after,
    ));
    let glossary_block =
        Glossary::render_for_prompt(&glossary.relevant_for_text(&source, GLOSSARY_PROMPT_CAP));
    let prompt = render_translate_prompt(&source, target_language, &context_block, &glossary_block);
    let messages = [ChatMessage::system(system_prompt()), ChatMessage::user(prompt)];

    let chars_sent = source.chars().count();
    match complete_with_retries(backend, &messages, max_retries) {
        Ok(text) if placeholders_preserved(&source, &text) => GroupResult {
            chapter: task.chapter,
            group_index: task.group.index,
            chars_sent,
            chars_received: text.chars().count(),
            text,
            failed: false,
        },
        // Degraded passthrough: an error, or a reply that lost placeholder
        // tokens, keeps the source text so the chapter still assembles.
        _ => GroupResult {
            chapter: task.chapter,
            group_index: task.group.index,
            chars_sent,
            chars_received: 0,
            text: source,
            failed: true,
        },
    }
}

/// Returns true when the chapter completed (possibly with per-group
/// fallbacks), false when every group failed and it was marked failed.
#[allow(clippy::too_many_arguments)]
fn finalize_chapter(
    number: usize,
    entry: PendingChapter,
    project: &Project,
    backend: &dyn ChatBackend,
    opts: &TranslateOptions,
    progress: &mut ProgressStore,
    context_store: &mut ContextStore,
    log: &ConsoleProgress,
) -> Result<bool> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut failed_groups = 0usize;
    for group in &entry.groups {
        let (text, failed) = entry
            .results
            .get(&group.index)
            .cloned()
            .unwrap_or_else(|| (group.source_text(), true));
        if failed {
            failed_groups += 1;
        }
        paragraphs.extend(reassemble(&group.to_translate, &text));
    }

    let all_failed = !entry.groups.is_empty() && failed_groups == entry.groups.len();
    if all_failed {
        log.warn(format!("chapter {number}: every group failed, will retry"));
        progress.mark_failed(number)?;
        return Ok(false);
    }
    if failed_groups > 0 {
        log.warn(format!(
            "chapter {number}: {failed_groups} group(s) fell back to source text"
        ));
    }

    let title = translate_title(&entry.title, backend, opts);
    let summary = summarize_chapter(&paragraphs, backend);

    project.save_translated(&TranslatedChapterFile {
        number,
        title,
        paragraphs,
        summary: summary.clone(),
        original_word_count: entry.original_word_count,
        translator: opts.translator_name.clone(),
        translation_date: Utc::now().to_rfc3339(),
    })?;
    if let Some(summary) = summary {
        context_store.record_summary(number, &summary)?;
    }
    progress.mark_complete(number)?;
    Ok(true)
}

fn translate_title(title: &str, backend: &dyn ChatBackend, opts: &TranslateOptions) -> String {
    let messages = [
        ChatMessage::system((opts.system_prompt)()),
        ChatMessage::user(render_title_prompt(title, &opts.target_language)),
    ];
    match backend.complete(&messages) {
        Ok(translated) if !translated.trim().is_empty() => translated.trim().to_string(),
        _ => title.to_string(),
    }
}

/// Chapter summary from the first three and last two text paragraphs,
/// bounded in size. Errors degrade to no summary, never to a failed chapter.
fn summarize_chapter(paragraphs: &[String], backend: &dyn ChatBackend) -> Option<String> {
    let text: Vec<&str> = paragraphs
        .iter()
        .filter(|p| !is_image_placeholder(p))
        .map(String::as_str)
        .collect();
    if text.is_empty() {
        return None;
    }
    let mut sample: Vec<&str> = text.iter().take(3).copied().collect();
    if text.len() > 3 {
        let tail_from = text.len().saturating_sub(2).max(3);
        sample.extend(&text[tail_from..]);
    }
    let joined = strip_placeholders(&sample.join("\n"));
    let sample_text = crate::textutil::head_chars(&joined, SUMMARY_SAMPLE_CHARS);
    let messages = [
        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
        ChatMessage::user(render_summary_prompt(sample_text)),
    ];
    backend
        .complete(&messages)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
