use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use study_rag::commands::{
    ask, delete_document, ingest_paths, list_documents, search, show_status,
};
use study_rag::config::{Config, DATA_DIR_ENV, show_config};

#[derive(Parser)]
#[command(name = "study-rag")]
#[command(about = "Ask questions about your study materials with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector index
    #[arg(long, global = true, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest files or directories of study material
    Ingest {
        /// Files or directories (.txt, .md, .json, .pdf, .ppt, .pptx)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List ingested documents
    List,
    /// Delete a document and all of its chunks
    Delete {
        /// Document ID or filename
        document: String,
    },
    /// Show the passages most relevant to a query
    Search {
        query: String,
        /// Number of passages to return
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Answer a question from the ingested material
    Ask {
        question: String,
        /// Number of passages to retrieve
        #[arg(long)]
        limit: Option<usize>,
        /// Token budget of the context handed to the model
        #[arg(long)]
        max_context_tokens: Option<usize>,
    },
    /// Show Ollama and index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => Config::default_data_dir()?,
    };
    let config = Config::load(&data_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                if !config.config_file_path().exists() {
                    config.save()?;
                    println!("Wrote default configuration.");
                }
                println!(
                    "Edit {} to change settings, or run 'study-rag config --show'.",
                    config.config_file_path().display()
                );
            }
        }
        Commands::Ingest { paths } => {
            ingest_paths(&config, &paths).await?;
        }
        Commands::List => {
            list_documents(&config)?;
        }
        Commands::Delete { document } => {
            delete_document(&config, &document)?;
        }
        Commands::Search { query, limit } => {
            search(&config, &query, limit).await?;
        }
        Commands::Ask {
            question,
            limit,
            max_context_tokens,
        } => {
            ask(&config, &question, limit, max_context_tokens).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["study-rag", "list"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::List));
        }
    }

    #[test]
    fn ingest_command_with_paths() {
        let cli = Cli::try_parse_from(["study-rag", "ingest", "notes.txt", "lectures"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest { paths } = parsed.command {
                assert_eq!(
                    paths,
                    vec![PathBuf::from("notes.txt"), PathBuf::from("lectures")]
                );
            }
        }
    }

    #[test]
    fn ingest_requires_a_path() {
        let cli = Cli::try_parse_from(["study-rag", "ingest"]);
        assert!(cli.is_err());
    }

    #[test]
    fn ask_command_with_options() {
        let cli = Cli::try_parse_from([
            "study-rag",
            "ask",
            "What is mitosis?",
            "--limit",
            "5",
            "--max-context-tokens",
            "512",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask {
                question,
                limit,
                max_context_tokens,
            } = parsed.command
            {
                assert_eq!(question, "What is mitosis?");
                assert_eq!(limit, Some(5));
                assert_eq!(max_context_tokens, Some(512));
            }
        }
    }

    #[test]
    fn search_with_data_dir() {
        let cli = Cli::try_parse_from([
            "study-rag",
            "search",
            "osmosis",
            "--data-dir",
            "/tmp/study",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.data_dir, Some(PathBuf::from("/tmp/study")));
            if let Commands::Search { query, limit } = parsed.command {
                assert_eq!(query, "osmosis");
                assert_eq!(limit, None);
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["study-rag", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["study-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["study-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
