use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use specxref::embedder::openai::DEFAULT_EMBED_MODEL;
use specxref::index::pinecone::PineconeIndex;
use specxref::net::RetryPolicy;
use specxref::{
    batch_ranges, build_vector, embed_records, load_sources, partition_records, Checkpoint,
    UpsertVector, VectorIndex, DEFAULT_BATCH_SIZE, DEFAULT_SOURCE_FILES,
};

#[derive(Parser, Debug)]
#[command(
    name = "specxref-ingest",
    about = "Flatten chunk JSON sources, embed them, and upsert into a Pinecone index"
)]
struct IngestCli {
    /// Source JSON files (flat record arrays or docling documents)
    #[arg(long = "input", value_name = "FILE", num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Output file receiving all skipped records as one JSON array
    #[arg(
        long,
        env = "SPECXREF_SKIPPED_OUT",
        default_value = "skipped_records.json"
    )]
    skipped_out: PathBuf,

    /// Records per upsert call
    #[arg(long, env = "SPECXREF_BATCH", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// API key for the embedding endpoint
    #[arg(long, env = "SPECXREF_EMBED_API_KEY")]
    embed_api_key: String,

    /// Base URL of the OpenAI-compatible embedding API
    #[arg(
        long,
        env = "SPECXREF_EMBED_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    embed_base_url: String,

    /// Embedding model identifier
    #[arg(long, env = "SPECXREF_EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "SPECXREF_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Max texts per embedding request
    #[arg(long, env = "SPECXREF_EMBED_BATCH", default_value_t = 32)]
    embed_batch_size: usize,

    /// Seconds to wait for each embedding request
    #[arg(long, env = "SPECXREF_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    embed_timeout_secs: u64,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY")]
    pinecone_api_key: String,

    /// Pinecone index host URL (https://<index>-<project>.svc.<env>.pinecone.io)
    #[arg(long, env = "SPECXREF_INDEX_HOST")]
    index_host: String,

    /// Optional Pinecone namespace
    #[arg(long, env = "SPECXREF_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds to wait for each upsert request
    #[arg(long, env = "SPECXREF_INDEX_TIMEOUT_SECS", default_value_t = 30)]
    index_timeout_secs: u64,

    /// Attempts per remote call before giving up (429/5xx/transport errors)
    #[arg(long, env = "SPECXREF_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Resume from the checkpoint left by a previously interrupted run
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Checkpoint file tracking contiguously uploaded batches
    #[arg(
        long,
        env = "SPECXREF_CHECKPOINT",
        default_value = ".specxref-upload.json"
    )]
    checkpoint: PathBuf,

    /// Number of concurrent upload workers (1 = strictly sequential)
    #[arg(long, env = "SPECXREF_UPLOAD_THREADS", default_value_t = 1)]
    upload_threads: usize,
}

fn main() -> Result<()> {
    let cli = IngestCli::parse();
    let inputs = if cli.inputs.is_empty() {
        DEFAULT_SOURCE_FILES.iter().map(PathBuf::from).collect()
    } else {
        cli.inputs.clone()
    };

    let report = load_sources(&inputs);
    let (valid, filter_skipped) = partition_records(report.combined);
    let mut skipped = report.skipped;
    skipped.extend(filter_skipped);
    eprintln!(
        "{} valid chunks ready for upload, {} skipped",
        valid.len(),
        skipped.len()
    );

    // Skipped records are persisted before any network work so the audit
    // file survives an upload failure.
    write_skipped(&cli.skipped_out, &skipped)?;
    eprintln!("saved skipped records to {}", cli.skipped_out.display());

    if valid.is_empty() {
        eprintln!("no valid chunks; nothing to upload.");
        return Ok(());
    }

    let retry = RetryPolicy::with_attempts(cli.max_retries);
    let embedder = specxref::embedder::OpenAiEmbedder::new(
        cli.embed_api_key.clone(),
        cli.embed_base_url.clone(),
        cli.embed_model.clone(),
        cli.embed_dimensions,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        retry,
        cli.embed_batch_size.max(1),
    )?;
    let embedded = embed_records(&embedder, valid)?;

    let vectors: Vec<UpsertVector> = embedded
        .iter()
        .map(build_vector)
        .collect::<Result<_>>()
        .context("failed to build upsert vectors")?;

    let index = PineconeIndex::new(
        cli.pinecone_api_key.clone(),
        cli.index_host.clone(),
        cli.namespace.clone(),
        Duration::from_secs(cli.index_timeout_secs.max(1)),
        retry,
    )?;

    let batch_size = cli.batch_size.max(1);
    let mut checkpoint = Checkpoint::open(cli.checkpoint.clone(), batch_size, cli.resume);
    let uploaded = if cli.upload_threads <= 1 {
        specxref::uploader::upload_all(&index, &vectors, batch_size, &mut checkpoint)?
    } else {
        upload_parallel(
            &index,
            &vectors,
            batch_size,
            &mut checkpoint,
            cli.upload_threads,
        )?
    };
    checkpoint.clear();

    eprintln!(
        "uploaded {} vectors to index at {}",
        uploaded, cli.index_host
    );
    Ok(())
}

fn write_skipped(path: &PathBuf, skipped: &[serde_json::Value]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, skipped)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

struct UploadTask {
    batch_no: usize,
    vectors: Vec<UpsertVector>,
}

type UploadOutcome = (usize, Result<usize>);

/// Spreads upsert batches across a fixed worker pool. Upserts are keyed by
/// id, so completion order does not matter to the index; the checkpoint
/// cursor still only advances over contiguously completed batches.
fn upload_parallel(
    index: &PineconeIndex,
    vectors: &[UpsertVector],
    batch_size: usize,
    checkpoint: &mut Checkpoint,
    workers: usize,
) -> Result<usize> {
    let ranges = batch_ranges(vectors.len(), batch_size);
    let total_batches = ranges.len();
    let already_done = checkpoint.uploaded_batches().min(total_batches);
    if already_done > 0 {
        eprintln!(
            "resuming after {} previously uploaded batch(es)",
            already_done
        );
    }
    let pending: Vec<UploadTask> = ranges
        .into_iter()
        .enumerate()
        .skip(already_done)
        .map(|(batch_no, range)| UploadTask {
            batch_no,
            vectors: vectors[range].to_vec(),
        })
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let (task_tx, task_rx) = bounded::<UploadTask>(workers * 2);
    let (result_tx, result_rx) = bounded::<UploadOutcome>(workers * 2);
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let worker_index = index.clone();
        let worker_rx = task_rx.clone();
        let worker_tx = result_tx.clone();
        handles.push(thread::spawn(move || {
            upload_worker(worker_id, worker_rx, worker_tx, worker_index)
        }));
    }
    drop(task_rx);
    drop(result_tx);

    let expected = pending.len();
    let feeder = thread::spawn(move || {
        for task in pending {
            if task_tx.send(task).is_err() {
                break;
            }
        }
    });

    let mut sent = 0usize;
    let mut completed: BTreeSet<usize> = BTreeSet::new();
    let mut cursor = already_done;
    let mut first_error: Option<anyhow::Error> = None;
    for _ in 0..expected {
        let Ok((batch_no, outcome)) = result_rx.recv() else {
            break;
        };
        match outcome {
            Ok(count) => {
                sent += count;
                completed.insert(batch_no);
                while completed.remove(&cursor) {
                    cursor += 1;
                }
                checkpoint.advance_to(cursor)?;
                eprintln!("uploaded batch {}/{} ({} vectors)", batch_no + 1, total_batches, count);
            }
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    let _ = feeder.join();
    for handle in handles {
        let _ = handle.join();
    }
    if let Some(err) = first_error {
        return Err(err);
    }
    Ok(sent)
}

fn upload_worker(
    worker_id: usize,
    receiver: Receiver<UploadTask>,
    sender: Sender<UploadOutcome>,
    index: PineconeIndex,
) {
    for task in receiver.iter() {
        let UploadTask { batch_no, vectors } = task;
        let outcome = index
            .upsert(&vectors)
            .map_err(|err| anyhow!("worker {} failed batch {}: {}", worker_id, batch_no + 1, err));
        if sender.send((batch_no, outcome)).is_err() {
            break;
        }
    }
}
