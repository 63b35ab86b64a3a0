use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use specxref::embedder::openai::DEFAULT_EMBED_MODEL;
use specxref::embedder::OpenAiEmbedder;
use specxref::net::RetryPolicy;
use specxref::qa::{
    best_chunk_index, build_chunks, format_response, load_xref_pairs, AnswerExtractor,
    ContextChunk, HfQaClient, DEFAULT_QA_MODEL, EXAMPLE_QUESTIONS,
};
use specxref::{embed_texts, TextEmbedder};

#[derive(Parser, Debug)]
#[command(
    name = "specxref-qa",
    about = "Answer checklist questions over cross-referenced spec/drawing chunks"
)]
struct QaCli {
    /// JSON array of precomputed spec/drawing cross-reference pairs
    #[arg(long, env = "SPECXREF_XREF", default_value = "xref_full.json")]
    xref: PathBuf,

    /// Answer a single question and exit (otherwise read questions from stdin)
    #[arg(long)]
    question: Option<String>,

    /// Print the example question list and exit
    #[arg(long, default_value_t = false)]
    examples: bool,

    /// API key for the embedding endpoint
    #[arg(long, env = "SPECXREF_EMBED_API_KEY")]
    embed_api_key: Option<String>,

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

    /// API key for the question-answering endpoint
    #[arg(long, env = "SPECXREF_QA_API_KEY")]
    qa_api_key: Option<String>,

    /// Base URL of the HuggingFace-inference-style QA API
    #[arg(
        long,
        env = "SPECXREF_QA_BASE",
        default_value = "https://api-inference.huggingface.co"
    )]
    qa_base_url: String,

    /// Extractive QA model identifier
    #[arg(long, env = "SPECXREF_QA_MODEL", default_value = DEFAULT_QA_MODEL)]
    qa_model: String,

    /// Seconds to wait for each remote call
    #[arg(long, env = "SPECXREF_QA_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Attempts per remote call before giving up
    #[arg(long, env = "SPECXREF_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,
}

fn main() -> Result<()> {
    let cli = QaCli::parse();
    if cli.examples {
        for question in EXAMPLE_QUESTIONS {
            println!("{question}");
        }
        return Ok(());
    }

    let retry = RetryPolicy::with_attempts(cli.max_retries);
    let timeout = Duration::from_secs(cli.timeout_secs.max(1));
    let embed_api_key = cli
        .embed_api_key
        .clone()
        .context("SPECXREF_EMBED_API_KEY must be set")?;
    let qa_api_key = cli
        .qa_api_key
        .clone()
        .context("SPECXREF_QA_API_KEY must be set")?;
    let embedder = OpenAiEmbedder::new(
        embed_api_key,
        cli.embed_base_url.clone(),
        cli.embed_model.clone(),
        cli.embed_dimensions,
        timeout,
        retry,
        cli.embed_batch_size.max(1),
    )?;
    let extractor = HfQaClient::new(
        qa_api_key,
        cli.qa_base_url.clone(),
        cli.qa_model.clone(),
        timeout,
        retry,
    )?;

    let pairs = load_xref_pairs(&cli.xref)?;
    anyhow::ensure!(!pairs.is_empty(), "{} contains no pairs", cli.xref.display());
    let chunks = build_chunks(pairs);
    eprintln!("embedding {} context chunks...", chunks.len());
    let contexts: Vec<String> = chunks.iter().map(|chunk| chunk.context.clone()).collect();
    let embeddings = embed_texts(&embedder, &contexts)?;

    if let Some(question) = &cli.question {
        let rendered = answer(&embedder, &extractor, &chunks, &embeddings, question)?;
        println!("{rendered}");
        return Ok(());
    }

    eprintln!("ready; type a question (empty line to quit)");
    let stdin = io::stdin();
    loop {
        print!("question> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            break;
        }
        match answer(&embedder, &extractor, &chunks, &embeddings, question) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
    Ok(())
}

fn answer(
    embedder: &dyn TextEmbedder,
    extractor: &dyn AnswerExtractor,
    chunks: &[ContextChunk],
    embeddings: &[Vec<f32>],
    question: &str,
) -> Result<String> {
    let query = embedder
        .embed_batch(&[question])?
        .into_iter()
        .next()
        .context("embedding endpoint returned no vector for the question")?;
    let top = best_chunk_index(&query, embeddings).context("no chunks to search")?;
    let chunk = &chunks[top];
    let span = extractor.answer(question, &chunk.context)?;
    Ok(format_response(&span, chunk))
}
