use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use chapterwise::config::{
    find_default_config, init_default_config, load_config, resolve_backend, AppConfig,
};
use chapterwise::llm::build_backend;
use chapterwise::pipeline::{
    run_extract, run_filter, run_status, run_translate, BlacklistConfig, ExtractOptions,
    FilterOptions, TranslateOptions,
};
use chapterwise::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "chapterwise")]
#[command(about = "Book extraction and LLM translation pipeline", long_about = None)]
struct Args {
    /// Config file path (default: search for chapterwise.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress progress output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a page dump into chapter JSON files
    Extract {
        /// pages.json produced by the PDF/text dumper
        pages: PathBuf,
        /// Output project directory
        #[arg(short, long, default_value = "extracted")]
        output: PathBuf,
        /// Word budget per paragraph
        #[arg(long)]
        max_words: Option<usize>,
        /// Pages per chapter when no structure is found
        #[arg(long)]
        pages_per_chapter: Option<usize>,
        /// Skip OCR artifact cleanup
        #[arg(long)]
        no_ocr_clean: bool,
    },
    /// Translate extracted chapters with an LLM backend
    Translate {
        /// Project directory holding chapter JSON files
        #[arg(default_value = "extracted")]
        project: PathBuf,
        /// Backend name from config (e.g. deepseek, ollama)
        #[arg(short, long)]
        backend: Option<String>,
        /// Worker thread count (1 translates sequentially with rolling context)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Character budget per request
        #[arg(long)]
        max_chars: Option<usize>,
        /// Target language
        #[arg(long)]
        target_language: Option<String>,
    },
    /// Apply the blacklist filter to translated chapters
    Filter {
        /// Project directory holding translated chapters
        #[arg(default_value = "extracted")]
        project: PathBuf,
        /// Blacklist config JSON (default: blacklist_config.json if present)
        #[arg(long)]
        blacklist: Option<PathBuf>,
    },
    /// Show per-chapter translation status
    Status {
        /// Project directory
        #[arg(default_value = "extracted")]
        project: PathBuf,
    },
    /// Write a starter chapterwise.toml
    InitConfig {
        /// Directory to write the config into
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

fn load_app_config(explicit: Option<&PathBuf>, workdir: &std::path::Path) -> anyhow::Result<AppConfig> {
    let path = match explicit {
        Some(p) => Some(p.clone()),
        None => find_default_config(workdir),
    };
    match path {
        Some(p) => load_config(&p),
        None => Ok(AppConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = ConsoleProgress::new(!args.quiet);

    match args.command {
        Command::Extract {
            pages,
            output,
            max_words,
            pages_per_chapter,
            no_ocr_clean,
        } => {
            let cfg = load_app_config(args.config.as_ref(), &output)?;
            let mut opts = ExtractOptions::from_config(&cfg);
            if let Some(v) = max_words {
                opts.segment.max_words = v;
            }
            if let Some(v) = pages_per_chapter {
                opts.pages_per_chapter = v;
            }
            if no_ocr_clean {
                opts.clean_ocr = false;
            }
            run_extract(&pages, &output, &opts, &log)
        }
        Command::Translate {
            project,
            backend,
            workers,
            max_chars,
            target_language,
        } => {
            let mut cfg = load_app_config(args.config.as_ref(), &project)?;
            if let Some(v) = target_language {
                cfg.translate.target_language = Some(v);
            }
            let backend_name = backend
                .or_else(|| cfg.translate.backend.clone())
                .unwrap_or_else(|| "deepseek".to_string());
            let resolved = resolve_backend(&cfg, &backend_name, &project)?;
            let model = resolved.model.clone();
            let chat: Arc<dyn chapterwise::llm::ChatBackend> =
                Arc::from(build_backend(resolved)?);
            let mut opts =
                TranslateOptions::from_config(&cfg, &format!("{backend_name}/{model}"));
            if let Some(v) = workers {
                opts.workers = v.max(1);
            }
            if let Some(v) = max_chars {
                opts.max_chars = v;
            }
            run_translate(&project, chat, &opts, &log)
        }
        Command::Filter { project, blacklist } => {
            let cfg = load_app_config(args.config.as_ref(), &project)?;
            let path = blacklist.or_else(|| cfg.filter.blacklist_file.as_deref().map(PathBuf::from));
            let config = match path {
                Some(path) => BlacklistConfig::load(&path)?,
                None => {
                    let default_path = project.join("blacklist_config.json");
                    if default_path.exists() {
                        BlacklistConfig::load(&default_path)?
                    } else {
                        BlacklistConfig::default()
                    }
                }
            };
            run_filter(&project, &FilterOptions { config }, &log)
        }
        Command::Status { project } => run_status(&project, &log),
        Command::InitConfig { dir, force } => {
            let path = init_default_config(&dir, force).context("init default config")?;
            eprintln!("Wrote config: {}", path.display());
            Ok(())
        }
    }
}
