use crate::config::ImportConfig;
use crate::input::read_dump;
use crate::orchestrator::{ImportRun, RunOptions};
use crate::schema::Collection;
use crate::store::{self, Store, StoreKind, UpsertPolicy};
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;

pub struct ImportArgs {
    pub file: PathBuf,
    pub store: Option<String>,
    pub store_path: Option<PathBuf>,
    pub policy: Option<String>,
    pub config: Option<PathBuf>,
    pub tables: Option<String>,
    pub dry_run: bool,
    pub json: bool,
    pub progress: bool,
    pub max_failure_reasons: Option<usize>,
}

pub fn run(args: ImportArgs) -> anyhow::Result<()> {
    if !args.file.exists() {
        anyhow::bail!("input file does not exist: {}", args.file.display());
    }

    let config = match &args.config {
        Some(path) => ImportConfig::load(path)?,
        None => ImportConfig::default(),
    };

    let mut options = RunOptions::from_config(&config);
    if let Some(policy) = &args.policy {
        options.policy = policy.parse::<UpsertPolicy>().map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(max) = args.max_failure_reasons {
        options.max_failure_reasons = max;
    }
    if let Some(tables) = &args.tables {
        options.only = Some(parse_collections(tables)?);
    }
    options.dry_run = args.dry_run;

    let kind = match &args.store {
        Some(s) => s.parse::<StoreKind>().map_err(|e| anyhow::anyhow!(e))?,
        None => config.store.backend.unwrap_or_default(),
    };
    let store_path = match args.store_path.clone().or_else(|| config.store.path.clone()) {
        Some(path) => path,
        None => kind.default_path()?,
    };

    let show_progress = args.progress && !args.json;
    let start_time = Instant::now();

    let dump = if show_progress {
        let file_size = std::fs::metadata(&args.file)?.len();
        let pb = ProgressBar::new(file_size);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
            )
            .unwrap()
            .progress_chars("█▓▒░  ")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message("reading");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        let pb_clone = pb.clone();
        let dump = read_dump(&args.file, Some(move |bytes| pb_clone.set_position(bytes)))?;
        pb.finish_and_clear();
        dump
    } else {
        read_dump(&args.file, None::<fn(u64)>)?
    };

    if !args.json {
        println!(
            "Importing {} ({:.2} MB, compression: {}) into {} store{}",
            args.file.display(),
            dump.file_size as f64 / (1024.0 * 1024.0),
            dump.compression,
            kind,
            match kind {
                StoreKind::Memory => String::new(),
                _ => format!(" at {}", store_path.display()),
            }
        );
        if args.dry_run {
            println!("Dry run: previewing against a copy, nothing will be written");
        }
        println!();
    }

    let mut store: Box<dyn Store> = if args.dry_run {
        Box::new(store::open_preview(kind, &store_path)?)
    } else {
        store::open(kind, &store_path)?
    };
    let mut run = ImportRun::new(&mut *store, options);

    let report = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        let pb_clone = pb.clone();
        run = run.with_progress(move |collection, done, total| {
            pb_clone.set_message(format!("{}: {}/{} rows", collection, done, total));
        });
        let report = run.run(dump.as_str(), &args.file.display().to_string())?;
        pb.finish_and_clear();
        report
    } else {
        run.run(dump.as_str(), &args.file.display().to_string())?
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    println!("{}", report);
    println!();
    if report.has_failures() {
        println!(
            "⚠ Import finished with {} failed row(s) in {:.3?}",
            report.totals.failed,
            start_time.elapsed()
        );
    } else {
        println!("✓ Import completed in {:.3?}", start_time.elapsed());
    }

    Ok(())
}

fn parse_collections(list: &str) -> anyhow::Result<Vec<Collection>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Collection>().map_err(|e| anyhow::anyhow!(e)))
        .collect()
}
