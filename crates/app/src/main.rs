use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_quiz_core::{
    CharacterNgramEmbedder, ChoiceKey, ChunkingConfig, Collection, Direction, DocumentStore,
    Embedder, EmbeddingConfig, GeminiClient, GenerationPolicy, IngestionReport, LlmConfig,
    LocalCollection, QdrantCollection, QuestionBank, QuestionGenerator, QuizSession,
    VectorIndex, VertexEmbedder, MAX_QUESTIONS,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type DynIndex = VectorIndex<Box<dyn Embedder>, Box<dyn Collection>>;

#[derive(Parser)]
#[command(name = "pdf-quiz", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Google Cloud project hosting the Vertex AI models.
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT", default_value = "")]
    project: String,

    /// Vertex AI region.
    #[arg(long, env = "GOOGLE_CLOUD_LOCATION", default_value = "us-central1")]
    location: String,

    /// OAuth bearer token, e.g. from `gcloud auth print-access-token`.
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Directory the local vector collection persists into.
    #[arg(long, env = "QUIZ_PERSIST_DIR", default_value = "quiz_index")]
    persist_dir: PathBuf,

    /// Embedding backend.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Vertex)]
    embedder: EmbedderKind,

    /// Embedding model name.
    #[arg(long, default_value = "textembedding-gecko@003")]
    embedding_model: String,

    /// Store vectors in Qdrant instead of the local collection.
    #[arg(long)]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, default_value = "pdf_quiz_chunks")]
    qdrant_collection: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Vertex AI text embeddings.
    Vertex,
    /// Hashed character trigrams, no network access.
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index PDFs.
    Ingest {
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Individual PDF files.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 1024)]
        chunk_size: usize,
        #[arg(long, default_value_t = 100)]
        chunk_overlap: usize,
    },
    /// Show the passages the index returns for a topic.
    Search {
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "4")]
        top_k: usize,
    },
    /// Generate a quiz from the indexed documents and save it as JSON.
    Generate {
        /// Topic to focus the questions on. Empty means general knowledge.
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=MAX_QUESTIONS as i64))]
        count: u8,
        /// Where to write the question bank.
        #[arg(long, default_value = "quiz.json")]
        out: PathBuf,
        #[arg(long, default_value = "gemini-pro")]
        model: String,
        #[arg(long, default_value_t = 0.8)]
        temperature: f32,
        #[arg(long, default_value_t = 500)]
        max_output_tokens: u32,
        /// Request `application/json` output from the model.
        #[arg(long, default_value_t = false)]
        json_mode: bool,
        #[arg(long, default_value_t = 10)]
        max_attempts: usize,
        /// Seconds to wait after a discarded attempt.
        #[arg(long, default_value_t = 20)]
        cooldown_secs: u64,
        /// Print every raw model response.
        #[arg(long, default_value_t = false)]
        show_raw: bool,
        /// Fail instead of saving a shorter quiz when a slot runs out of attempts.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Take a saved quiz interactively.
    Quiz {
        #[arg(long, default_value = "quiz.json")]
        bank: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-quiz boot"
    );

    match &cli.command {
        Command::Ingest {
            folder,
            files,
            chunk_size,
            chunk_overlap,
        } => {
            if folder.is_none() && files.is_empty() {
                anyhow::bail!("pass --folder or at least one --file");
            }

            let mut store = DocumentStore::new();
            let mut report = IngestionReport::default();

            if let Some(folder) = folder {
                let found = store
                    .ingest_folder(folder)
                    .with_context(|| format!("ingesting folder {}", folder.display()))?;
                report.pages_added += found.pages_added;
                report.skipped_files.extend(found.skipped_files);
            }
            if !files.is_empty() {
                let listed = store.ingest_files(files);
                report.pages_added += listed.pages_added;
                report.skipped_files.extend(listed.skipped_files);
            }
            for skipped in &report.skipped_files {
                warn!(source = %skipped.source, reason = %skipped.reason, "skipped pdf");
            }

            let config = ChunkingConfig {
                max_chars: *chunk_size,
                overlap_chars: *chunk_overlap,
                ..ChunkingConfig::default()
            };
            let chunks = store.chunks(&config)?;
            if chunks.is_empty() {
                println!("0 chunks ingested (no readable pages)");
                return Ok(());
            }

            let mut index = open_index(&cli).await?;
            let loaded = index.load(&chunks).await?;
            println!(
                "{} pages, {} chunks indexed at {} ({} files skipped)",
                report.pages_added,
                loaded,
                Utc::now().to_rfc3339(),
                report.skipped_files.len()
            );
        }
        Command::Search { topic, top_k } => {
            let index = open_index(&cli).await?;
            let hits = index.query(topic, *top_k).await?;
            println!("topic: {topic}");
            for hit in hits {
                println!(
                    "score={:.4} source={} page={} chunk={}",
                    hit.score, hit.chunk.source, hit.chunk.page, hit.chunk.chunk_id
                );
                println!("  {}", hit.chunk.text);
            }
        }
        Command::Generate {
            topic,
            count,
            out,
            model,
            temperature,
            max_output_tokens,
            json_mode,
            max_attempts,
            cooldown_secs,
            show_raw,
            strict,
        } => {
            let index = open_index(&cli).await?;
            let llm = GeminiClient::new(LlmConfig {
                model_name: model.clone(),
                temperature: *temperature,
                max_output_tokens: *max_output_tokens,
                project: cli.project.clone(),
                location: cli.location.clone(),
                endpoint: None,
                access_token: cli.access_token.clone(),
                json_mode: *json_mode,
            });
            let policy = GenerationPolicy {
                max_attempts: *max_attempts,
                cooldown: Duration::from_secs(*cooldown_secs),
                ..GenerationPolicy::default()
            };

            let generator =
                QuestionGenerator::new(topic, usize::from(*count), index, llm)?.with_policy(policy)?;
            let outcome = generator.generate_quiz().await?;

            if *show_raw {
                for raw in &outcome.raw_responses {
                    let verdict = match &raw.rejection {
                        Some(reason) => format!("rejected: {reason}"),
                        None => "accepted".to_string(),
                    };
                    println!(
                        "slot={} attempt={} {verdict}\n{:#}",
                        raw.slot + 1,
                        raw.attempt,
                        raw.response
                    );
                }
            }

            let topic = outcome.topic.clone();
            if !outcome.is_complete() {
                warn!(
                    exhausted = ?outcome.exhausted_slots,
                    generated = outcome.bank.len(),
                    requested = outcome.requested,
                    "some questions could not be generated"
                );
            }
            let bank = if *strict {
                outcome.require_complete()?
            } else {
                outcome.bank
            };

            bank.save_json(&topic, out)
                .await
                .with_context(|| format!("writing quiz bank to {}", out.display()))?;
            println!(
                "{} questions on \"{topic}\" written to {}",
                bank.len(),
                out.display()
            );
        }
        Command::Quiz { bank } => {
            let (topic, bank) = QuestionBank::load_json(bank)
                .await
                .with_context(|| format!("reading quiz bank {}", bank.display()))?;
            let mut session = QuizSession::new(bank)?;
            println!("Quiz: {topic} ({} questions)", session.len());
            run_quiz(&mut session)?;
        }
    }

    Ok(())
}

async fn open_index(cli: &Cli) -> anyhow::Result<DynIndex> {
    let embedder: Box<dyn Embedder> = match cli.embedder {
        EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder::default()),
        EmbedderKind::Vertex => Box::new(VertexEmbedder::new(EmbeddingConfig {
            model_name: cli.embedding_model.clone(),
            project: cli.project.clone(),
            location: cli.location.clone(),
            access_token: cli.access_token.clone(),
            ..EmbeddingConfig::default()
        })?),
    };

    let collection: Box<dyn Collection> = match &cli.qdrant_url {
        Some(url) => {
            let qdrant = QdrantCollection::new(url, &cli.qdrant_collection, embedder.dimensions())?;
            qdrant.ensure_collection().await?;
            Box::new(qdrant)
        }
        None => Box::new(
            LocalCollection::open(&cli.persist_dir)
                .await
                .with_context(|| format!("opening index in {}", cli.persist_dir.display()))?,
        ),
    };

    Ok(VectorIndex::open(embedder, collection).await?)
}

const QUIZ_HELP: &str = "commands: a-d select, s submit, n next, p previous, q quit";

fn run_quiz(session: &mut QuizSession) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    println!("{QUIZ_HELP}");

    loop {
        render_question(session);
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let input = line?.trim().to_lowercase();
        let index = session.current_index();

        match input.as_str() {
            "q" | "quit" => break,
            "n" | "next" => {
                session.next(Direction::Forward);
            }
            "p" | "prev" | "previous" => {
                session.next(Direction::Backward);
            }
            "s" | "submit" => {
                let Some(choice) = session.selected(index).map(str::to_string) else {
                    println!("select a choice first");
                    continue;
                };
                let feedback = session.submit(index, choice);
                if feedback.correct {
                    println!("Correct!");
                } else {
                    println!("Incorrect. The answer is {}.", feedback.correct_answer);
                }
                println!("{}", feedback.explanation);
            }
            other => match other.parse::<ChoiceKey>() {
                Ok(key) => select_key(session, index, key),
                Err(_) => println!("{QUIZ_HELP}"),
            },
        }
    }

    let score = session.score();
    println!(
        "Score: {}/{} correct ({} answered)",
        score.correct, score.total, score.answered
    );
    Ok(())
}

fn select_key(session: &mut QuizSession, index: usize, key: ChoiceKey) {
    let display = session
        .question_at(index)
        .display_choices()
        .into_iter()
        .find(|choice| key.matches_display(choice));
    match display {
        Some(choice) => session.select(index, choice),
        None => println!("no choice {key} for this question"),
    }
}

fn render_question(session: &QuizSession) {
    let index = session.current_index();
    let question = session.current_question();
    let selected = session.selected(index);

    println!();
    println!("Question {}/{}: {}", index + 1, session.len(), question.question);
    for choice in question.display_choices() {
        let marker = if selected == Some(choice.as_str()) { "*" } else { " " };
        println!(" {marker} {choice}");
    }
    if let Some(feedback) = session.feedback(index) {
        let verdict = if feedback.correct { "correct" } else { "incorrect" };
        println!("   submitted: {verdict}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_generate_with_defaults() {
        let cli = Cli::try_parse_from(["pdf-quiz", "generate", "--topic", "pumps"])
            .expect("arguments parse");
        match cli.command {
            Command::Generate {
                topic,
                count,
                cooldown_secs,
                max_attempts,
                ..
            } => {
                assert_eq!(topic, "pumps");
                assert_eq!(count, 1);
                assert_eq!(cooldown_secs, 20);
                assert_eq!(max_attempts, 10);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn cli_rejects_question_count_above_limit() {
        let result = Cli::try_parse_from(["pdf-quiz", "generate", "--count", "11"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_accepts_repeated_files() {
        let cli = Cli::try_parse_from([
            "pdf-quiz",
            "--embedder",
            "ngram",
            "ingest",
            "--file",
            "a.pdf",
            "--file",
            "b.pdf",
        ])
        .expect("arguments parse");
        match cli.command {
            Command::Ingest { files, folder, .. } => {
                assert!(folder.is_none());
                assert_eq!(files, vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")]);
            }
            _ => panic!("expected ingest"),
        }
    }
}
