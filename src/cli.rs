//! Command-line interface, built on clap.
//!
//! Subcommands: `run` (process a text file), `demo` (built-in synthetic
//! document), `status` (effective configuration). Global flags pick the
//! gate profile and tenant.

use clap::{Parser, Subcommand, ValueEnum};

/// GLEANER — cost-aware LLM document extraction orchestrator.
#[derive(Debug, Parser)]
#[command(name = "gleaner", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quality-gate profile for this session.
    #[arg(long, global = true)]
    pub profile: Option<ProfileArg>,

    /// Tenant the jobs are billed against.
    #[arg(long, global = true, default_value = "default")]
    pub tenant: String,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Gate profile accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProfileArg {
    /// High bar: confident, fully-described concepts only.
    Strict,
    /// The default trade-off between recall and precision.
    Balanced,
    /// Low bar: keep anything plausibly real.
    Permissive,
}

impl ProfileArg {
    pub fn as_config_name(self) -> &'static str {
        match self {
            ProfileArg::Strict => "strict",
            ProfileArg::Balanced => "balanced",
            ProfileArg::Permissive => "permissive",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process a text document through the extraction pipeline.
    Run {
        /// Path to a UTF-8 text file.
        file: String,

        /// Document identifier; defaults to the file name.
        #[arg(long)]
        document_id: Option<String>,
    },

    /// Show the effective configuration.
    Status,

    /// Run the built-in demo document through the pipeline.
    Demo,
}
