use anyhow::Result;
use clap::{Parser, Subcommand};
use docs_rag::commands::{ask, drop_collection, ingest, list_collections, query, serve_mcp};
use docs_rag::config::{resolve_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Local document question answering with retrieval over Ollama models")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector database
    #[arg(long, global = true, env = "DOCS_RAG_HOME")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, chunking and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Chunk, embed and store text documents
    Ingest {
        /// Documents to ingest; form feeds separate pages
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Target collection (default: configured collection)
        #[arg(long, short)]
        collection: Option<String>,
    },
    /// List collections and their passage counts
    Collections,
    /// Show the passages most similar to a query
    Query {
        query: String,
        #[arg(long, short)]
        collection: Option<String>,
        /// Number of passages to return
        #[arg(short, value_parser = clap::value_parser!(u16).range(1..))]
        k: Option<u16>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from the most relevant passages
    Ask {
        question: String,
        #[arg(long, short)]
        collection: Option<String>,
        /// Number of passages to ground the answer on
        #[arg(short, value_parser = clap::value_parser!(u16).range(1..))]
        k: Option<u16>,
        /// Print the answer and its sources as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a collection and all its passages
    Drop {
        collection: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Start MCP server on stdio
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest { paths, collection } => {
            ingest(&config_dir, &paths, collection.as_deref()).await?;
        }
        Commands::Collections => {
            list_collections(&config_dir).await?;
        }
        Commands::Query {
            query: text,
            collection,
            k,
            json,
        } => {
            query(
                &config_dir,
                &text,
                collection.as_deref(),
                k.map(usize::from),
                json,
            )
            .await?;
        }
        Commands::Ask {
            question,
            collection,
            k,
            json,
        } => {
            ask(
                &config_dir,
                &question,
                collection.as_deref(),
                k.map(usize::from),
                json,
            )
            .await?;
        }
        Commands::Drop { collection, yes } => {
            drop_collection(&config_dir, &collection, yes).await?;
        }
        Commands::Serve => {
            serve_mcp(&config_dir).await?;
        }
    }

    Ok(())
}
