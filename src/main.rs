use anyhow::Context as _;
use std::process::ExitCode;
use taskflow::cli::{Args, ExecutionMode, RunConfig, TaskFile, build_list, describe};
use taskflow::env::{FAILURE_EXIT_CODE, logging, messages};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose());

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::from(FAILURE_EXIT_CODE);
        }
    };

    let result = match mode {
        ExecutionMode::Run(config) => run(config).await,
        ExecutionMode::Validate { file, .. } => validate(&file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}

/// Logs go to stderr so they never interleave with renderer output on stdout.
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        logging::VERBOSE_FILTER
    } else {
        logging::DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: RunConfig) -> anyhow::Result<ExitCode> {
    let file = TaskFile::from_toml_file(&config.file)
        .with_context(|| format!("Failed to load {}", config.file.display()))?;
    info!(
        "Loaded {} tasks from {}",
        file.task_count(),
        config.file.display()
    );

    if config.dry_run {
        for line in describe(&file.tasks) {
            println!("{line}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let list = build_list(&file, &config.overrides);
    let outcome = list.run().await;

    let failed = match outcome {
        Ok(ctx) => {
            if config.print_context {
                println!("{}", serde_json::to_string_pretty(&ctx.snapshot())?);
            }
            !list.errors().is_empty()
        }
        Err(e) => {
            error!("Run failed: {}", e);
            true
        }
    };

    // The aggregated entries hold every task failure, the aborting one included
    let errors = list.errors();
    for failure in errors
        .iter()
        .filter(|failure| failure.message == messages::FAILED_WITHOUT_CRASHING)
    {
        for task_error in &failure.errors {
            eprintln!("✖ {task_error}");
        }
    }

    if failed {
        Ok(ExitCode::from(FAILURE_EXIT_CODE))
    } else {
        info!("All tasks finished");
        Ok(ExitCode::SUCCESS)
    }
}

fn validate(path: &std::path::Path) -> anyhow::Result<ExitCode> {
    let file = TaskFile::from_toml_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    println!(
        "{}: {} tasks ({} top-level)",
        path.display(),
        file.task_count(),
        file.tasks.len()
    );
    Ok(ExitCode::SUCCESS)
}
