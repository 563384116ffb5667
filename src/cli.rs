//! CLI definitions for historify
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "historify",
    version,
    about = "Revision-safe logging of file changes",
    long_about = "Tamper-evident journal for file-tree changes.\nEvery scan is recorded in an append-only chain of signed changelogs\nanchored in a random seed, so any rewrite of history is detectable\nwith only the public key and the repository on disk."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new repository
    Init {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,

        /// Repository name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Generate a signing key pair
    Keygen {
        /// Where to write the secret key
        secret_key: String,

        /// Where to write the public key
        public_key: String,
    },

    /// Set a configuration key
    Config {
        /// Configuration key (section.option)
        key: String,

        /// Value to set
        value: String,

        /// Repository directory
        #[arg(default_value = ".")]
        path: String,
    },

    /// Report configuration issues
    CheckConfig {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,
    },

    /// Register a tracked category
    AddCategory {
        /// Category name
        name: String,

        /// Data directory (repository-relative or absolute)
        datapath: String,

        /// Repository directory
        #[arg(default_value = ".")]
        path: String,
    },

    /// Sign the current state and open a new changelog
    Start {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,
    },

    /// Close the current period (same semantics as start)
    Closing {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,
    },

    /// Scan categories and record file changes
    Scan {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,

        /// Only scan this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Append an administrative comment to the open changelog
    Comment {
        /// Comment text
        message: String,

        /// Repository directory
        #[arg(default_value = ".")]
        path: String,
    },

    /// Read the changelog chain
    Log {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,

        /// Only read this changelog file
        #[arg(long)]
        file: Option<String>,

        /// Only show rows for this category
        #[arg(long)]
        category: Option<String>,

        /// Only show rows of this transaction type
        #[arg(long = "type")]
        transaction_type: Option<String>,
    },

    /// Verify signatures and hash references
    Verify {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,

        /// Replay the whole chain from the seed
        #[arg(long)]
        full_chain: bool,
    },

    /// Summarize repository state
    Status {
        /// Repository directory
        #[arg(default_value = ".")]
        path: String,

        /// Only show this category
        #[arg(long)]
        category: Option<String>,

        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Produce snapshot archives of the repository
    Snapshot {
        /// Output archive base (a .tar.gz suffix is accepted)
        out: String,

        /// Repository directory
        #[arg(default_value = ".")]
        path: String,

        /// Also archive external categories
        #[arg(long)]
        full: bool,

        /// Pack archives into optical-media images (default bd-r)
        #[arg(long, value_name = "TYPE", num_args = 0..=1, default_missing_value = "bd-r")]
        media: Option<String>,
    },
}
