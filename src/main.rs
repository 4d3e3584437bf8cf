use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use checkrun::cli::{Cli, Command};
use checkrun::{
    CheckpointStore, CheckrunConfig, Controller, ExternalProcessor, ItemDetails, item, telemetry,
    ui,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            output_dir,
            sample_list,
            sample_sheet,
            checkpoint,
            max_attempts,
            timeout_secs,
        } => {
            // Flags da CLI têm precedência sobre o arquivo de configuração.
            if let Some(checkpoint) = &checkpoint {
                config.set_checkpoint_file(checkpoint)?;
            }
            if let Some(max_attempts) = max_attempts {
                config.max_attempts = max_attempts;
            }
            if let Some(timeout_secs) = timeout_secs {
                config.processor.timeout_secs = timeout_secs;
            }

            let subscriber = telemetry::init_subscriber(&output_dir, cli.verbose)
                .context("failed to set up logging")?;
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to install log subscriber")?;

            let items = item::load_sample_list(&sample_list).with_context(|| {
                format!("failed to load sample list {}", sample_list.display())
            })?;
            let details: BTreeMap<String, ItemDetails> = match &sample_sheet {
                Some(path) => item::load_sample_sheet(path)
                    .with_context(|| format!("failed to load sample sheet {}", path.display()))?,
                None => {
                    warn!("No sample sheet given, every item runs with default details");
                    items
                        .iter()
                        .map(|id| (id.clone(), ItemDetails::default()))
                        .collect()
                }
            };

            info!(
                items = items.len(),
                program = %config.processor.program,
                output_dir = %output_dir.display(),
                "Starting checkrun"
            );
            let processor = ExternalProcessor::from_config(&config.processor);
            let mut controller =
                Controller::new(processor, &output_dir, &config).with_progress(true);
            let report = controller.run(&items, &details).await;
            ui::print_report(&report);
        }

        Command::Status {
            output_dir,
            checkpoint,
        } => {
            tracing::subscriber::set_global_default(telemetry::console_subscriber(cli.verbose))
                .context("failed to install log subscriber")?;
            if let Some(checkpoint) = &checkpoint {
                config.set_checkpoint_file(checkpoint)?;
            }
            let path = config.checkpoint_path(&output_dir);
            if !path.exists() {
                bail!("no checkpoint found at {}", path.display());
            }
            let store = CheckpointStore::try_load(&path)
                .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
            ui::print_checkpoint(&store);
        }
    }

    Ok(())
}

/// Um `--config` explícito precisa existir; sem ele, `checkrun.toml` é opcional.
fn load_config(path: Option<&Path>) -> Result<CheckrunConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            CheckrunConfig::load_from(path)
                .with_context(|| format!("failed to load config {}", path.display()))
        }
        None => CheckrunConfig::load().context("failed to load checkrun.toml"),
    }
}
