//! CLI entry point for the problem verifier.
//!
//! Usage:
//!   problem-verifier verify <descriptor.json> [options]
//!   problem-verifier verify --stdin [options]
//!
//! Options:
//!   --max-candidates <n>  Enumeration cap (default: 200000)
//!   --log-level <level>   Logging verbosity (default: warn)
//!
//! Prints the verdict as JSON on stdout and exits 0 only when the problem
//! is certified: a unique solution consistent with the claimed answer.

mod algebra;
mod descriptor;
mod expr;
mod parse;
mod solver;

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use descriptor::ProblemDescriptor;
use solver::{verify, SolverConfig, Status, Verdict, DEFAULT_MAX_CANDIDATES};

#[derive(Parser)]
#[command(name = "problem-verifier")]
#[command(about = "Bounded uniqueness solver for generated math word-problem verification")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Log level for the application
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Verify that a problem descriptor has a unique, consistent solution
    Verify {
        /// Path to descriptor JSON file (use --stdin to read from stdin)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Read the descriptor from stdin instead of a file
        #[arg(long)]
        stdin: bool,

        /// Maximum candidate assignments enumerated before giving up
        #[arg(long, default_value_t = DEFAULT_MAX_CANDIDATES)]
        max_candidates: u64,

        /// Logging verbosity
        #[arg(long, value_enum, default_value = "warn")]
        log_level: LogLevel,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Verify {
            file,
            stdin,
            max_candidates,
            log_level,
        } => {
            env_logger::Builder::from_default_env()
                .filter_level(log_level.to_level_filter())
                .init();

            // Read descriptor JSON
            let json_content = if stdin {
                let mut buffer = String::new();
                if let Err(e) = io::stdin().read_to_string(&mut buffer) {
                    eprintln!("Error reading from stdin: {}", e);
                    std::process::exit(2);
                }
                buffer
            } else if let Some(path) = file {
                match fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) => {
                        eprintln!("Error reading file {:?}: {}", path, e);
                        std::process::exit(2);
                    }
                }
            } else {
                eprintln!("Error: Must provide either a file path or --stdin");
                std::process::exit(2);
            };

            // Parse descriptor. Malformed JSON still yields a well-formed
            // verdict so the boundary layer always gets the contract shape.
            let descriptor: ProblemDescriptor = match serde_json::from_str(&json_content) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    eprintln!("Error parsing descriptor JSON: {}", e);
                    emit(&Verdict::failure(Status::ParseError));
                    std::process::exit(1);
                }
            };

            // Run solver
            let config = SolverConfig { max_candidates };
            let verdict = verify(&descriptor, &config);
            emit(&verdict);

            // Exit with appropriate code
            if verdict.unique && verdict.consistent_with_llm_answer {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
    }
}

fn emit(verdict: &Verdict) {
    println!("{}", serde_json::to_string_pretty(verdict).unwrap());
}
