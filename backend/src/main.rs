//! RegexFlow CLI - preview and apply regex edits to CSV files
//!
//! # Main Commands
//!
//! ```bash
//! regexflow serve                              # Start HTTP server (port 3000)
//! regexflow chat input.csv -o out.csv          # Conversational editing in the terminal
//! regexflow preview input.csv --tasks t.json   # Show what a task list would change
//! regexflow apply input.csv --tasks t.json -o out.csv
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! regexflow parse input.csv                    # Parse CSV to JSON
//! regexflow page input.csv --page 2            # One page of rows
//! ```

use clap::{ArgAction, Parser, Subcommand};
use regexflow::parser::format_delimiter;
use regexflow::session::Role;
use regexflow::{
    apply, parse_csv_file_auto, preview, to_csv, AiClient, Config, ConversationSession,
    DatasetStore, MemoryStore, ParseResult, TaskBatch, TaskGenerator, TaskSpec,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regexflow")]
#[command(about = "Preview and apply regex edits to tabular data", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: REGEXFLOW_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Edit a CSV file through a confirm-before-apply conversation
    Chat {
        /// Input CSV file
        input: PathBuf,

        /// Where to write the edited CSV on exit
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the changes a task list would make
    Preview {
        /// Input CSV file
        input: PathBuf,

        /// JSON task list (`{"tasks": [...]}` or `[...]`)
        #[arg(short, long)]
        tasks: PathBuf,

        /// Number of changes to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Apply a task list and write the result
    Apply {
        /// Input CSV file
        input: PathBuf,

        /// JSON task list (`{"tasks": [...]}` or `[...]`)
        #[arg(short, long)]
        tasks: PathBuf,

        /// Output CSV file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of changes to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Parse a CSV file and output JSON
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print one page of rows as JSON
    Page {
        /// Input CSV file
        input: PathBuf,

        /// Page number, from 1
        #[arg(long, default_value = "1")]
        page: usize,

        /// Rows per page (default: REGEXFLOW_PAGE_SIZE or 50)
        #[arg(long)]
        page_size: Option<usize>,
    },
}

/// Task list file contents
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Wrapped { tasks: Vec<TaskSpec> },
    Bare(Vec<TaskSpec>),
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match Config::from_env() {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "regexflow=info",
        1 => "regexflow=debug",
        _ => "regexflow=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_line_number(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();

    debug!("verbosity level: {}", verbose);
}

async fn run(command: Commands, config: Config) -> CliResult {
    match command {
        Commands::Serve { port } => {
            let config = Config {
                port: port.unwrap_or(config.port),
                ..config
            };
            regexflow::server::start_server(config).await
        }

        Commands::Chat { input, output } => cmd_chat(&input, output.as_deref(), &config).await,

        Commands::Preview { input, tasks, limit } => {
            cmd_preview(&input, &tasks, limit.unwrap_or(config.preview_limit))
        }

        Commands::Apply {
            input,
            tasks,
            output,
            limit,
        } => {
            cmd_apply(
                &input,
                &tasks,
                output.as_deref(),
                limit.unwrap_or(config.preview_limit),
            )
            .await
        }

        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),

        Commands::Page {
            input,
            page,
            page_size,
        } => cmd_page(&input, page, page_size.unwrap_or(config.page_size)).await,
    }
}

fn read_csv(input: &Path) -> Result<ParseResult, Box<dyn std::error::Error>> {
    eprintln!("📄 Reading CSV: {}", input.display());
    let result = parse_csv_file_auto(input)?;
    eprintln!("   Encoding: {}", result.encoding);
    eprintln!("   Delimiter: '{}'", format_delimiter(result.delimiter));
    eprintln!("   Columns: {}", result.dataset.columns.join(", "));
    eprintln!("   Rows: {}", result.dataset.row_count());
    Ok(result)
}

fn read_tasks(path: &Path) -> Result<Vec<TaskSpec>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let tasks = match serde_json::from_str::<TaskFile>(&content)? {
        TaskFile::Wrapped { tasks } => tasks,
        TaskFile::Bare(tasks) => tasks,
    };
    if tasks.is_empty() {
        return Err(format!("No tasks in {}", path.display()).into());
    }
    Ok(tasks)
}

fn cmd_preview(input: &Path, tasks_path: &Path, limit: usize) -> CliResult {
    let parsed = read_csv(input)?;
    let specs = read_tasks(tasks_path)?;
    let batch = TaskBatch::from_specs(&specs, &parsed.dataset)?;

    let report = preview(&batch, &parsed.dataset, limit)?;
    eprintln!("\n🔍 {} tasks, {} matches", batch.len(), report.total_matches);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_apply(
    input: &Path,
    tasks_path: &Path,
    output: Option<&Path>,
    limit: usize,
) -> CliResult {
    let parsed = read_csv(input)?;
    let specs = read_tasks(tasks_path)?;
    let batch = TaskBatch::from_specs(&specs, &parsed.dataset)?;

    let store = MemoryStore::with_dataset(parsed.dataset);
    let report = apply(&batch, &store, limit).await?;

    eprintln!("\n✅ Replaced {} items", report.total_replacements);
    for entry in &report.entries {
        eprintln!(
            "   Row {}, Column {}: \"{}\" → \"{}\"",
            entry.row, entry.column, entry.from, entry.to
        );
    }
    if report.omitted > 0 {
        eprintln!("   …and {} more", report.omitted);
    }

    let csv = to_csv(&store.snapshot().await?, parsed.delimiter)?;
    write_output(&csv, output)
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> CliResult {
    let parsed = read_csv(input)?;
    let json = serde_json::to_string_pretty(&parsed.dataset.rows)?;
    write_output(&json, output)
}

async fn cmd_page(input: &Path, page: usize, page_size: usize) -> CliResult {
    let parsed = read_csv(input)?;
    let store = MemoryStore::with_dataset(parsed.dataset);
    let page = store.read_page(page, page_size).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

async fn cmd_chat(input: &Path, output: Option<&Path>, config: &Config) -> CliResult {
    let parsed = read_csv(input)?;
    let delimiter = parsed.delimiter;

    let api_key = config
        .api_key
        .clone()
        .ok_or("ANTHROPIC_API_KEY not set; chat needs a task generator")?;
    let client = AiClient::new(api_key);
    let generator = match &config.model {
        Some(model) => client.with_model(model),
        None => client,
    };

    eprintln!("   Model: {}", generator.model());

    let store = MemoryStore::with_dataset(parsed.dataset);
    let mut session = ConversationSession::new("cli").with_preview_limit(config.preview_limit);

    eprintln!("\n💬 Describe an edit. Reply yes/no to confirm. Type 'exit' to finish.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let seq = session.message_seq();
        // Errors are already part of the conversation
        let _ = session
            .handle_input(line, &generator as &dyn TaskGenerator, &store as &dyn DatasetStore)
            .await;
        for message in session.messages_since(seq) {
            if message.role == Role::Bot {
                println!("{}", message.text);
            }
        }
    }

    if let Some(path) = output {
        let csv = to_csv(&store.snapshot().await?, delimiter)?;
        fs::write(path, csv)?;
        eprintln!("💾 Output written to: {}", path.display());
    }
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
