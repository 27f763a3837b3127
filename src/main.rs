use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use validate_sch::cli::{Cli, Command, PreprocessArgs, ValidateArgs};
use validate_sch::config::{Config, ConfigManager};
use validate_sch::output::Output;
use validate_sch::preprocess::{PreprocessOptions, PreprocessTask};
use validate_sch::runner::BatchResult;
use validate_sch::task::{ValidationContext, ValidationTask};
use validate_sch::SchematronError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.verbosity().log_level().as_str()),
    )
    .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let build_failure = error
                .downcast_ref::<SchematronError>()
                .is_some_and(SchematronError::is_build_failure);
            if build_failure {
                eprintln!("BUILD FAILED: {}", error);
                ExitCode::from(1)
            } else {
                eprintln!("Error: {:#}", error);
                ExitCode::from(2)
            }
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Validate(args) => {
            let config = ConfigManager::load_config(cli.config.as_deref(), Some(args))
                .await
                .context("Failed to load configuration")?;
            validate(cli, &config, args).await
        }
        Command::Preprocess(args) => {
            let config = ConfigManager::load_config(cli.config.as_deref(), None)
                .await
                .context("Failed to load configuration")?;
            preprocess(&config, args).await
        }
    }
}

async fn validate(cli: &Cli, config: &Config, args: &ValidateArgs) -> anyhow::Result<()> {
    let context = ValidationContext::new(
        Arc::new(ConfigManager::get_entity_resolver(config)),
        ConfigManager::get_debug_directory(config),
        config.cache.max_validators,
    );

    let mut results = BatchResult::default();
    for settings in ConfigManager::get_tasks(config, args) {
        log::debug!("Running task {}", settings.label());
        let batch = ValidationTask::new(settings).execute(&context).await?;
        results.merge(batch);
    }

    print!("{}", Output::new(cli.verbosity()).format_results(&results));
    Ok(())
}

async fn preprocess(config: &Config, args: &PreprocessArgs) -> anyhow::Result<()> {
    let task = PreprocessTask {
        src: args.src.clone(),
        dst: args.dst.clone(),
        options: PreprocessOptions {
            keep_titles: args.keep_titles,
            keep_diagnostics: args.keep_diagnostics,
            keep_reports: args.keep_reports,
            keep_empty_patterns: args.keep_empty_patterns,
        },
        fail_on_error: args.fail_on_error,
    };
    task.execute(&ConfigManager::get_entity_resolver(config))
        .await?;
    Ok(())
}
