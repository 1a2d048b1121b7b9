use crate::config::ImportConfig;
use crate::input::read_dump;
use crate::parser::TupleIndex;
use crate::report::DumpSummary;
use std::path::PathBuf;
use std::time::Instant;

pub fn run(file: PathBuf, config: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("input file does not exist: {}", file.display());
    }

    let config = match &config {
        Some(path) => ImportConfig::load(path)?,
        None => ImportConfig::default(),
    };

    let start_time = Instant::now();
    let dump = read_dump(&file, None::<fn(u64)>)?;
    let index = TupleIndex::build(dump.as_str());

    let mut summary = DumpSummary::build(
        &file.display().to_string(),
        &dump.compression.to_string(),
        &index,
        |c| config.source_table(c).to_string(),
    );
    summary.bytes = dump.text.len();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Inspected {} ({:.2} MB) in {:.3?}\n",
        file.display(),
        summary.bytes as f64 / (1024.0 * 1024.0),
        start_time.elapsed()
    );
    if summary.tables.is_empty() {
        println!("No INSERT statements found.");
        return Ok(());
    }
    println!("{}", summary);

    Ok(())
}
