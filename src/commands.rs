//! Command-line interface for `lw`, built with `clap`.
//!
//! ```no_run
//! use clap::Parser;
//! use loreweave::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Search { query, limit } = cli.command {
//!     println!("searching for {query} (top {limit})");
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the vault configuration file.
    #[arg(long, short = 'c', global = true, env = "LW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration and prompt template.
    Init,

    /// Add a codex entry.
    #[clap(name = "add", alias = "a")]
    Add {
        name: String,

        #[arg(long = "type", short = 't')]
        entry_type: String,

        #[arg(long, short = 'm')]
        content: String,
    },

    /// Change fields of an existing entry.
    Update {
        id: i64,

        #[arg(long, short = 'n')]
        name: Option<String>,

        #[arg(long = "type", short = 't')]
        entry_type: Option<String>,

        #[arg(long, short = 'm')]
        content: Option<String>,
    },

    /// Delete an entry and its embeddings.
    Delete { id: i64 },

    /// List every entry.
    #[clap(name = "list", alias = "ls")]
    List,

    /// Semantic search over the codex.
    #[clap(name = "search", alias = "s")]
    Search {
        query: String,

        #[arg(long, short = 'l', default_value_t = 10)]
        limit: i64,
    },

    /// Print the context block that would accompany a question.
    Context { query: String },

    /// Ask a question, answered with codex context.
    #[clap(name = "ask", alias = "q")]
    Ask {
        question: String,

        /// Prompt template name; defaults to the configured one.
        #[arg(name = "template", short = 't')]
        template: Option<String>,

        /// Also print the context sent with the question.
        #[arg(long)]
        show_context: bool,
    },

    /// Extract entries from narrative text with the chat model and merge
    /// them into the codex by name.
    Import {
        /// File to read, or `-` for stdin.
        source: String,
    },

    /// Embed every entry that lacks an embedding for the current model.
    Reindex,

    /// Show the stored embedding of an entry.
    Embedding { id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_with_alias() {
        let cli = Cli::try_parse_from([
            "lw", "a", "Aria", "--type", "Character", "--content", "A wandering mage.",
        ])
        .unwrap();
        match cli.command {
            Commands::Add { name, entry_type, content } => {
                assert_eq!(name, "Aria");
                assert_eq!(entry_type, "Character");
                assert_eq!(content, "A wandering mage.");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_search_defaults_and_global_config() {
        let cli = Cli::try_parse_from(["lw", "s", "sorcerer", "--config", "/tmp/vault.yaml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/vault.yaml")));
        match cli.command {
            Commands::Search { query, limit } => {
                assert_eq!(query, "sorcerer");
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_add_requires_type_and_content() {
        assert!(Cli::try_parse_from(["lw", "add", "Aria"]).is_err());
    }

    #[test]
    fn test_parse_import_from_stdin() {
        let cli = Cli::try_parse_from(["lw", "import", "-"]).unwrap();
        match cli.command {
            Commands::Import { source } => assert_eq!(source, "-"),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["lw", "import"]).is_err());
    }
}
