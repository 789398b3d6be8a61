use anyhow::{Context, Result};
use clap::Parser;

use utxoindex::config::{AppConfig, CliArgs};
use utxoindex::core::blocksource::FileBlockSource;
use utxoindex::index::ingest::{IngestOutcome, Ingestor};
use utxoindex::runtime::mdb::Mdb;
use utxoindex::runtime::store::RecordStore;

const DB_NAMESPACE: &[u8] = b"utxoindex:";

fn run(cfg: AppConfig) -> Result<()> {
    let mdb = Mdb::open(&cfg.db_path, DB_NAMESPACE).context("failed to open index db")?;
    let store = RecordStore::new(mdb);

    let mut ingestor = Ingestor::new(store, cfg.network);
    if cfg.quiet {
        ingestor = ingestor.silence();
    }

    let indexed = ingestor.index_height()?;
    match indexed {
        Some(h) => eprintln!("[indexer] resuming after height {h}"),
        None => eprintln!("[indexer] empty index, starting from genesis"),
    }

    let Some(blocks_file) = &cfg.blocks_file else {
        eprintln!("[indexer] no blocks file configured, nothing to do");
        return Ok(());
    };

    let source = FileBlockSource::load(blocks_file)
        .with_context(|| format!("failed to load blocks from {blocks_file}"))?;
    if source.is_empty() {
        eprintln!("[indexer] blocks file {blocks_file} holds no blocks, nothing to do");
        return Ok(());
    }
    eprintln!("[indexer] loaded {} blocks from {blocks_file}", source.len());

    let mut indexed_count = 0usize;
    for block in source.blocks_after(indexed.unwrap_or(-1)) {
        let report = ingestor
            .ingest_block(block)
            .with_context(|| format!("failed to ingest block at height {}", block.height))?;
        match report.outcome {
            IngestOutcome::Indexed => {
                indexed_count += 1;
                eprintln!(
                    "[indexer] height {} hash {}: {} outputs, {} spends, {} skips",
                    report.height,
                    report.hash,
                    report.outputs_indexed,
                    report.inputs_resolved,
                    report.inputs_skipped
                );
            }
            IngestOutcome::AlreadyIndexed => {
                eprintln!("[indexer] height {} hash {}: already indexed", report.height, report.hash);
            }
        }
    }

    eprintln!("[indexer] done, {indexed_count} new blocks indexed");
    Ok(())
}

fn main() {
    let cli = CliArgs::parse();
    let cfg = match AppConfig::from_cli(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[indexer] config error: {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cfg) {
        eprintln!("[indexer] fatal: {e:?}");
        std::process::exit(1);
    }
}
