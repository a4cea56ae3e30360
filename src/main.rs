use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::Parser;
use log::info;

use neutron_retrieve::diagnostics::{DiagnosticSink, LogSink, MemorySink};
use neutron_retrieve::live::{LiveDataManager, LiveEvent};
use neutron_retrieve::retriever::{checked_index, classify_source, status, SourceKind};
use neutron_retrieve::{open_retriever, DataSetInfo, RetrievalConfig, Retriever};

/// Inspect the DataSets of a neutron data file or acquisition server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// File path, or `machine;port;user;password;[file]` for a server
    source: String,

    /// Only describe this DataSet
    #[arg(short, long)]
    index: Option<usize>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep polling a live server, printing events, with this interval
    #[arg(short, long, value_name = "SECS")]
    watch: Option<f64>,

    /// Print decoder diagnostics after the summary
    #[arg(short, long)]
    diagnostics: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RetrievalConfig::load(path)?,
        None => RetrievalConfig::default(),
    };
    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn DiagnosticSink> = if cli.diagnostics {
        memory.clone() as Arc<dyn DiagnosticSink>
    } else {
        Arc::new(LogSink)
    };

    if let Some(seconds) = cli.watch {
        return watch(&cli.source, seconds, &config, sink);
    }

    let mut retriever = open_retriever(&cli.source, &config, sink)
        .with_context(|| format!("opening {}", cli.source))?;
    let count = retriever.num_data_sets();
    println!("{}: {count} DataSets ({})", retriever.data_source_name(), status::message(count));

    if count > 0 {
        let indices: Vec<usize> = match cli.index {
            Some(i) => vec![checked_index(i, count)?],
            None => (0..count as usize).collect(),
        };
        let infos: Vec<(usize, DataSetInfo)> = indices
            .into_iter()
            .filter_map(|i| retriever.data_set_info(i).map(|info| (i, info)))
            .collect();
        println!("{}", summary_table(&infos)?);
    }

    if cli.diagnostics {
        for message in memory.messages() {
            println!("diagnostic: {message}");
        }
    }
    Ok(())
}

/// One row per DataSet, rendered with arrow's table printer.
fn summary_table(infos: &[(usize, DataSetInfo)]) -> Result<String> {
    let columns: Vec<(&str, ArrayRef)> = vec![
        ("index", Arc::new(UInt64Array::from_iter_values(infos.iter().map(|(i, _)| *i as u64)))),
        (
            "type",
            Arc::new(StringArray::from_iter_values(
                infos.iter().map(|(_, d)| format!("{:?}", d.data_set_type)),
            )),
        ),
        ("title", Arc::new(StringArray::from_iter_values(infos.iter().map(|(_, d)| &d.title)))),
        (
            "spectra",
            Arc::new(UInt64Array::from_iter_values(infos.iter().map(|(_, d)| d.num_spectra as u64))),
        ),
        ("x units", Arc::new(StringArray::from_iter_values(infos.iter().map(|(_, d)| &d.x_units)))),
        (
            "x min",
            Arc::new(Float64Array::from_iter(infos.iter().map(|(_, d)| d.x_range.map(|r| r.0)))),
        ),
        (
            "x max",
            Arc::new(Float64Array::from_iter(infos.iter().map(|(_, d)| d.x_range.map(|r| r.1)))),
        ),
    ];
    let batch = RecordBatch::try_from_iter(columns).context("building summary table")?;
    Ok(pretty_format_batches(&[batch])
        .context("formatting summary table")?
        .to_string())
}

fn watch(source: &str, seconds: f64, config: &RetrievalConfig, sink: Arc<dyn DiagnosticSink>) -> Result<()> {
    if classify_source(source)? != SourceKind::Live {
        anyhow::bail!("--watch needs a live server descriptor without a file field");
    }
    let manager = LiveDataManager::connect(source, config, sink)?;
    manager.set_update_interval(seconds);
    info!("watching {source} every {:?}", manager.update_interval());

    let count = manager.num_data_sets();
    for i in 0..count.max(0) as usize {
        manager.set_update_ignore_flag(i, false);
    }
    let events = manager.subscribe();
    for event in events.iter() {
        match event {
            LiveEvent::Status(text) => println!("status: {text}"),
            LiveEvent::DataChanged(text) => {
                println!("{text}");
                for i in 0..manager.num_data_sets().max(0) as usize {
                    manager.set_update_ignore_flag(i, false);
                }
            }
            LiveEvent::Updated(snapshot) => println!(
                "updated: slot {} v{} '{}' ({} spectra)",
                snapshot.slot_id,
                snapshot.version,
                snapshot.data_set.title,
                snapshot.data_set.len()
            ),
        }
    }
    Ok(())
}
