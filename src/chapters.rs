use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum span (in pages) below which consecutive TOC entries merge.
pub const MIN_CHAPTER_PAGES: usize = 2;
/// Uniform split width when neither TOC nor markers yield a structure.
pub const DEFAULT_PAGES_PER_CHAPTER: usize = 30;

const MAX_TITLE_CHARS: usize = 100;
const MARKER_SCAN_LINES: usize = 10;
const MIN_RESOLVED_CHAPTERS: usize = 2;

const TOC_KEYWORDS: [&str; 8] = [
    "chapter",
    "part",
    "section",
    "introduction",
    "appendix",
    "глава",
    "часть",
    "раздел",
];

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:Chapter|CHAPTER|Глава|ГЛАВА)\s+(?:\d+|[IVXLC]+)",
        r"|^(?:Part|PART|Часть|ЧАСТЬ)\s+(?:\d+|[IVXLC]+)",
        r"|^(?:Section|SECTION|Раздел)\s+(?:\d+|[IVXLC]+)",
        r"|^\d+\.\s+[A-ZА-ЯЁ]",
    ))
    .expect("chapter marker regex")
});

static TITLE_RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[=\-_*#]{3,}").expect("title rule"));
static TITLE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\d.]+\s+").expect("title number"));
static TITLE_PAGE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\.{2,}|\s{2,})\s*\d+\s*$").expect("title page ref"));

/// One table-of-contents entry as found in the source document.
/// `page` is 1-based, the way PDF outlines report it.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct TocEntry {
    pub level: u32,
    pub title: String,
    pub page: u32,
}

/// Resolved chapter span; both page indices are 0-based and inclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChapterBounds {
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
}

impl ChapterBounds {
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }
}

/// Page-coverage check result. `missing` are pages no chapter claims,
/// `overlapping` pages claimed more than once.
#[derive(Debug, Default)]
pub struct CoverageReport {
    pub missing: Vec<usize>,
    pub overlapping: Vec<usize>,
}

impl CoverageReport {
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.overlapping.is_empty()
    }
}

/// Resolves chapter boundaries for a document: TOC first, marker scan when
/// the TOC is absent or useless, uniform page windows as the last resort.
/// The result always covers every page exactly once.
pub fn resolve(
    toc: &[TocEntry],
    pages: &[String],
    min_pages: usize,
    pages_per_chapter: usize,
) -> Vec<ChapterBounds> {
    let total_pages = pages.len();
    let mut bounds = if toc.is_empty() {
        Vec::new()
    } else {
        resolve_from_toc(toc, total_pages, min_pages)
    };
    if bounds.len() < MIN_RESOLVED_CHAPTERS {
        bounds = resolve_from_patterns(pages);
    }
    if bounds.len() < MIN_RESOLVED_CHAPTERS {
        bounds = fallback_by_pages(total_pages, pages_per_chapter);
    }
    repair_coverage(&mut bounds, total_pages);
    bounds
}

/// TOC mode. Keeps shallow or keyword-bearing entries, converts pages to
/// 0-based, then merges runs of entries whose span stays under `min_pages`
/// into one chapter with a concatenated title.
pub fn resolve_from_toc(
    toc: &[TocEntry],
    total_pages: usize,
    min_pages: usize,
) -> Vec<ChapterBounds> {
    if total_pages == 0 {
        return Vec::new();
    }

    let filtered: Vec<(u32, String, usize)> = toc
        .iter()
        .filter_map(|entry| {
            let page = entry.page.checked_sub(1)? as usize;
            if page >= total_pages {
                return None;
            }
            let lower = entry.title.to_lowercase();
            let keep = entry.level <= 2 || TOC_KEYWORDS.iter().any(|k| lower.contains(k));
            keep.then(|| (entry.level, clean_title(&entry.title), page))
        })
        .collect();
    if filtered.is_empty() {
        return Vec::new();
    }

    // Inclusive end of the entry at `idx`: one page before the next entry
    // starts, or the last page of the document.
    let end_for = |idx: usize| -> usize {
        if idx + 1 < filtered.len() {
            filtered[idx + 1].2.saturating_sub(1)
        } else {
            total_pages - 1
        }
    };

    let mut merged: Vec<ChapterBounds> = Vec::new();
    let mut i = 0;
    while i < filtered.len() {
        let base_level = filtered[i].0;
        let mut title = filtered[i].1.clone();
        let start_page = filtered[i].2;
        let mut end_page = end_for(i);

        while end_page.saturating_sub(start_page) < min_pages && i + 1 < filtered.len() {
            i += 1;
            end_page = end_for(i);
            if filtered[i].0 <= base_level + 1 && title.chars().count() < MAX_TITLE_CHARS {
                title = format!("{title} / {}", filtered[i].1);
            }
        }

        merged.push(ChapterBounds {
            title,
            start_page,
            end_page,
        });
        i += 1;
    }

    // Force monotonic non-overlap; a TOC with out-of-order entries can
    // otherwise produce spans that run backwards.
    for j in 1..merged.len() {
        let prev_end = merged[j - 1].end_page;
        if merged[j].start_page <= prev_end {
            merged[j].start_page = prev_end + 1;
        }
    }
    merged.retain(|b| b.start_page <= b.end_page && b.start_page < total_pages);
    merged
}

/// Marker mode: scans the top of each page for chapter/part/section headings
/// (English and Cyrillic); each hit opens a chapter ending where the next one
/// begins. At most one hit counts per page.
pub fn resolve_from_patterns(pages: &[String]) -> Vec<ChapterBounds> {
    let mut starts: Vec<(usize, String)> = Vec::new();
    for (page_idx, page) in pages.iter().enumerate() {
        for line in page.lines().take(MARKER_SCAN_LINES) {
            let line = line.trim();
            if line.chars().count() < 3 {
                continue;
            }
            if MARKER_RE.is_match(line) {
                starts.push((page_idx, clean_title(line)));
                break;
            }
        }
    }

    let total_pages = pages.len();
    let mut bounds = Vec::with_capacity(starts.len());
    for (i, (start_page, title)) in starts.iter().enumerate() {
        let end_page = if i + 1 < starts.len() {
            starts[i + 1].0.saturating_sub(1)
        } else {
            total_pages.saturating_sub(1)
        };
        if *start_page <= end_page {
            bounds.push(ChapterBounds {
                title: title.clone(),
                start_page: *start_page,
                end_page,
            });
        }
    }
    bounds
}

/// Uniform fallback split: fixed-width page windows with synthetic titles.
pub fn fallback_by_pages(total_pages: usize, pages_per_chapter: usize) -> Vec<ChapterBounds> {
    let per = pages_per_chapter.max(1);
    let mut bounds = Vec::new();
    let mut start = 0usize;
    while start < total_pages {
        let end = (start + per - 1).min(total_pages - 1);
        bounds.push(ChapterBounds {
            title: format!("Part {}", bounds.len() + 1),
            start_page: start,
            end_page: end,
        });
        start = end + 1;
    }
    bounds
}

/// Reports pages left uncovered or claimed twice.
pub fn verify_coverage(bounds: &[ChapterBounds], total_pages: usize) -> CoverageReport {
    let mut counts = vec![0u32; total_pages];
    for b in bounds {
        for page in b.start_page..=b.end_page.min(total_pages.saturating_sub(1)) {
            counts[page] += 1;
        }
    }
    let mut report = CoverageReport::default();
    for (page, count) in counts.iter().enumerate() {
        match count {
            0 => report.missing.push(page),
            1 => {}
            _ => report.overlapping.push(page),
        }
    }
    report
}

/// Restores the exact-coverage invariant in place: clamps overlaps, extends
/// the outermost chapters to the document edges, and splits interior gaps
/// between the two adjacent chapters.
pub fn repair_coverage(bounds: &mut Vec<ChapterBounds>, total_pages: usize) {
    if total_pages == 0 {
        bounds.clear();
        return;
    }
    bounds.retain(|b| b.start_page < total_pages && b.start_page <= b.end_page);
    if bounds.is_empty() {
        bounds.push(ChapterBounds {
            title: "Untitled".to_string(),
            start_page: 0,
            end_page: total_pages - 1,
        });
        return;
    }

    for b in bounds.iter_mut() {
        if b.end_page >= total_pages {
            b.end_page = total_pages - 1;
        }
    }
    bounds.sort_by_key(|b| b.start_page);
    for j in 1..bounds.len() {
        let prev_end = bounds[j - 1].end_page;
        if bounds[j].start_page <= prev_end {
            bounds[j].start_page = prev_end + 1;
        }
    }
    bounds.retain(|b| b.start_page <= b.end_page && b.start_page < total_pages);

    if let Some(first) = bounds.first_mut() {
        first.start_page = 0;
    }
    if let Some(last) = bounds.last_mut() {
        last.end_page = total_pages - 1;
    }
    for j in 1..bounds.len() {
        let gap_start = bounds[j - 1].end_page + 1;
        if gap_start < bounds[j].start_page {
            let mid = (gap_start + bounds[j].start_page - 1) / 2;
            bounds[j - 1].end_page = mid;
            bounds[j].start_page = mid + 1;
        }
    }
}

/// Normalizes a raw heading: drops horizontal rules, leading numbering, and
/// trailing dot-leader page references, then bounds the length.
pub fn clean_title(title: &str) -> String {
    let title = TITLE_RULE_RE.replace_all(title, "");
    let title = TITLE_PAGE_REF_RE.replace(&title, "");
    let title = TITLE_NUMBER_RE.replace(&title, "");
    let mut cleaned = title.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.chars().count() > MAX_TITLE_CHARS {
        cleaned = cleaned.chars().take(MAX_TITLE_CHARS - 3).collect::<String>() + "...";
    }
    if cleaned.is_empty() {
        cleaned = "Untitled".to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toc(entries: &[(u32, &str, u32)]) -> Vec<TocEntry> {
        entries
            .iter()
            .map(|&(level, title, page)| TocEntry {
                level,
                title: title.to_string(),
                page,
            })
            .collect()
    }

    #[test]
    fn small_toc_entries_merge_forward() {
        // 0-based starts [0, 1, 2, 50] over 60 pages: the first three spans
        // are all under two pages and collapse into one chapter.
        let toc = toc(&[
            (1, "Preface", 1),
            (1, "Credits", 2),
            (1, "Chapter 1", 3),
            (1, "Chapter 2", 51),
        ]);
        let bounds = resolve_from_toc(&toc, 60, MIN_CHAPTER_PAGES);
        assert_eq!(bounds.len(), 2);
        assert_eq!((bounds[0].start_page, bounds[0].end_page), (0, 49));
        assert_eq!((bounds[1].start_page, bounds[1].end_page), (50, 59));
        assert_eq!(bounds[0].title, "Preface / Credits / Chapter 1");
    }

    #[test]
    fn resolve_covers_every_page_exactly_once() {
        // Deep levels, an out-of-range entry, and a gap before the first
        // chapter; the repaired result must still be an exact cover.
        let toc = toc(&[
            (1, "Chapter 1", 5),
            (3, "A footnote", 7),
            (1, "Chapter 2", 20),
            (1, "Chapter 3", 44),
            (1, "Ghost", 200),
        ]);
        let pages: Vec<String> = (0..80).map(|i| format!("page {i}")).collect();
        let bounds = resolve(&toc, &pages, MIN_CHAPTER_PAGES, DEFAULT_PAGES_PER_CHAPTER);
        assert!(verify_coverage(&bounds, 80).is_exact());
        assert_eq!(bounds[0].start_page, 0);
        assert_eq!(bounds.last().unwrap().end_page, 79);
    }

    #[test]
    fn resolve_is_idempotent() {
        let toc = toc(&[(1, "One", 1), (1, "Two", 10), (1, "Three", 31)]);
        let pages: Vec<String> = (0..50).map(|i| format!("page {i}")).collect();
        let first = resolve(&toc, &pages, MIN_CHAPTER_PAGES, DEFAULT_PAGES_PER_CHAPTER);
        let second = resolve(&toc, &pages, MIN_CHAPTER_PAGES, DEFAULT_PAGES_PER_CHAPTER);
        assert_eq!(first, second);
    }

    #[test]
    fn markers_open_chapters_without_a_toc() {
        let mut pages: Vec<String> = (0..9).map(|i| format!("plain body text {i}")).collect();
        pages[1] = "Chapter 1\nThe story begins here.".to_string();
        pages[5] = "Глава 2\nПродолжение истории.".to_string();
        let bounds = resolve(&[], &pages, MIN_CHAPTER_PAGES, DEFAULT_PAGES_PER_CHAPTER);
        assert_eq!(bounds.len(), 2);
        assert_eq!((bounds[0].start_page, bounds[0].end_page), (0, 4));
        assert_eq!((bounds[1].start_page, bounds[1].end_page), (5, 8));
        assert!(verify_coverage(&bounds, 9).is_exact());
    }

    #[test]
    fn uniform_fallback_when_nothing_matches() {
        let pages: Vec<String> = (0..65).map(|i| format!("plain body text {i}")).collect();
        let bounds = resolve(&[], &pages, MIN_CHAPTER_PAGES, 30);
        assert_eq!(bounds.len(), 3);
        assert_eq!((bounds[2].start_page, bounds[2].end_page), (60, 64));
        assert_eq!(bounds[0].title, "Part 1");
        assert!(verify_coverage(&bounds, 65).is_exact());
    }

    #[test]
    fn interior_gaps_split_between_neighbors() {
        let mut bounds = vec![
            ChapterBounds {
                title: "A".into(),
                start_page: 0,
                end_page: 9,
            },
            ChapterBounds {
                title: "B".into(),
                start_page: 20,
                end_page: 29,
            },
        ];
        repair_coverage(&mut bounds, 30);
        assert!(verify_coverage(&bounds, 30).is_exact());
        assert_eq!(bounds[0].end_page + 1, bounds[1].start_page);
    }

    #[test]
    fn titles_lose_rules_numbering_and_page_refs() {
        assert_eq!(clean_title("=== 3. The Long Road ==="), "The Long Road");
        assert_eq!(clean_title("Introduction ....... 42"), "Introduction");
        assert_eq!(clean_title("   "), "Untitled");
        assert_eq!(clean_title("Chapter 7"), "Chapter 7");
        let long = "word ".repeat(40);
        assert!(clean_title(&long).chars().count() <= MAX_TITLE_CHARS);
    }
}
