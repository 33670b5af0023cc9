use clap::{Parser, Subcommand};

use smt_cli::commands::config_ops;
use smt_cli::commands::decode_ops::{self, TranslateOptions};

#[derive(Parser)]
#[command(name = "decoder", about = "Statistical machine translation decoder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate one sentence per input line
    Translate {
        /// Decoder config file (TOML); built-in defaults if omitted
        #[arg(short, long)]
        config: Option<String>,
        /// Number of worker threads (overrides the config)
        #[arg(short, long)]
        threads: Option<usize>,
        /// Weight overrides as "name value name value ..."
        #[arg(short, long)]
        weights: Option<String>,
        /// Input file; stdin if omitted
        #[arg(short, long)]
        input: Option<String>,
        /// Print one JSON object per sentence
        #[arg(long)]
        json: bool,
        /// Write JSON trace logs to this directory (needs the `trace` feature)
        #[arg(long)]
        trace_dir: Option<String>,
        /// Trace filter directives, e.g. "smt_core=trace"
        #[arg(long, requires = "trace_dir")]
        trace_filter: Option<String>,
    },
    /// Print every dense feature with its initial weight
    ShowWeights {
        /// Decoder config file (TOML)
        #[arg(short, long)]
        config: Option<String>,
        /// Weight overrides as "name value name value ..."
        #[arg(short, long)]
        weights: Option<String>,
    },
    /// Print the default config
    ConfigExport,
    /// Check a config file
    ConfigValidate {
        /// Config file (TOML)
        file: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Translate {
            config,
            threads,
            weights,
            input,
            json,
            trace_dir,
            trace_filter,
        } => decode_ops::translate(&TranslateOptions {
            config: config.as_deref(),
            threads,
            weights: weights.as_deref(),
            input: input.as_deref(),
            json,
            trace_dir: trace_dir.as_deref(),
            trace_filter: trace_filter.as_deref(),
        }),
        Command::ShowWeights { config, weights } => decode_ops::show_weights(config.as_deref(), weights.as_deref()),
        Command::ConfigExport => config_ops::config_export(),
        Command::ConfigValidate { file } => config_ops::config_validate(&file),
    }
}
