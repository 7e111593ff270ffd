//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Execute a task file
//! - `validate`: Parse a task file and report what it declares

use crate::env::DEFAULT_TASK_FILE;
use crate::render::RendererKind;
use crate::task::Concurrency;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    Validate { file: PathBuf, verbose: bool },
}

/// Everything `run` needs, with CLI overrides separated from the file's options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub file: PathBuf,
    pub overrides: RunOverrides,
    pub verbose: bool,
    pub dry_run: bool,
    pub print_context: bool,
}

/// Flags that take precedence over the task file's `[options]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub concurrent: Option<Concurrency>,
    pub exit_on_error: Option<bool>,
    pub renderer: Option<RendererKind>,
    pub register_signal_listeners: Option<bool>,
}

#[derive(Debug, Parser)]
#[command(name = "taskflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a list of shell tasks with bounded concurrency and live progress")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a task file
    Run {
        /// Path to the task file
        #[arg(default_value = DEFAULT_TASK_FILE)]
        file: PathBuf,
        /// Concurrency: a number, `true` for unbounded or `false` for serial
        #[arg(short = 'c', long = "concurrent", value_name = "N|true|false")]
        concurrent: Option<Concurrency>,
        /// Keep running after a task fails and report all failures at the end
        #[arg(long = "continue-on-error")]
        continue_on_error: bool,
        /// Renderer: default, verbose or silent
        #[arg(short = 'r', long = "renderer", value_name = "KIND")]
        renderer: Option<RendererKind>,
        /// Do not install the ctrl-c handler
        #[arg(long = "no-signal-handlers")]
        no_signal_handlers: bool,
        /// Enable debug logging
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
        /// Print the declared task tree without running it
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
        /// Print the final context as JSON
        #[arg(long = "print-context")]
        print_context: bool,
    },
    /// Parse a task file and report the declared tasks
    Validate {
        /// Path to the task file
        #[arg(default_value = DEFAULT_TASK_FILE)]
        file: PathBuf,
        /// Enable debug logging
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                file,
                concurrent,
                continue_on_error,
                renderer,
                no_signal_handlers,
                verbose,
                dry_run,
                print_context,
            }) => Ok(ExecutionMode::Run(RunConfig {
                file: file.clone(),
                overrides: RunOverrides {
                    concurrent: *concurrent,
                    exit_on_error: continue_on_error.then_some(false),
                    renderer: *renderer,
                    register_signal_listeners: no_signal_handlers.then_some(false),
                },
                verbose: *verbose,
                dry_run: *dry_run,
                print_context: *print_context,
            })),
            Some(Commands::Validate { file, verbose }) => Ok(ExecutionMode::Validate {
                file: file.clone(),
                verbose: *verbose,
            }),
            None => Err(
                "No command specified. Use 'taskflow --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    pub fn verbose(&self) -> bool {
        matches!(
            &self.command,
            Some(Commands::Run { verbose: true, .. }) | Some(Commands::Validate { verbose: true, .. })
        )
    }
}
