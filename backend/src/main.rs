//! Rainfall watering advisor - command line entry point

use std::fs::File;
use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rainfall_backend::config::Config;
use rainfall_backend::error::AppError;
use rainfall_backend::external::bom::{BomClient, RainfallSource};
use rainfall_backend::external::gmail::{GmailClient, LogNotifier, Notifier};
use rainfall_backend::services::decision::policy_for_name;
use rainfall_backend::services::features::FeatureRowBuilder;
use rainfall_backend::services::pipeline::DailyRun;
use rainfall_backend::services::store::{RainfallStore, Table};
use rainfall_backend::services::training::{evaluate_policy, write_csv, TrainingSetAssembler};

#[derive(Parser, Debug)]
#[command(name = "rainfall", version, about = "Decide each day whether the garden needs watering")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect data, decide for today and notify (default)
    Run,
    /// Fetch and store forecasts and observations only
    Collect,
    /// Delete stored records
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
        /// Only reset this table (forecast, historical or decisions)
        #[arg(long)]
        table: Option<String>,
    },
    /// Print the schema of every table
    Tables,
    /// Export the labelled feature table as CSV
    Features {
        /// Model whose decisions drive replay adjustment
        #[arg(long)]
        model: Option<String>,
        /// Output file, stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replay a policy over history and compare with labels
    Evaluate {
        /// Policy to evaluate, defaults to the configured model
        #[arg(long)]
        model: Option<String>,
    },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rainfall=info,rainfall_backend=info,sqlx=warn".into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;
    init_tracing(&config);

    let cli = Cli::parse();
    tracing::debug!("Environment: {}", config.environment);

    if let Err(e) = run(cli.command.unwrap_or(Command::Run), &config).await {
        match e.downcast_ref::<AppError>() {
            Some(app_error) => tracing::error!(code = app_error.code(), "{}", app_error),
            None => tracing::error!("{:#}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    let today = chrono::Local::now().date_naive();
    let store = RainfallStore::connect(&config.database).await?;

    match command {
        Command::Run => {
            let source: Option<Box<dyn RainfallSource>> = if config.sources.enabled {
                Some(Box::new(BomClient::new(&config.sources)?))
            } else {
                None
            };
            let notifier: Box<dyn Notifier> = if config.email.enabled {
                Box::new(GmailClient::new(&config.email)?)
            } else {
                Box::new(LogNotifier)
            };

            let report = DailyRun::new(store, config, source, notifier)
                .execute(today)
                .await?;
            match report.action {
                Some(action) => tracing::info!("Decision for {}: {}", report.decision_date, action),
                None => tracing::info!("No decision recorded for {}", report.decision_date),
            }
        }
        Command::Collect => {
            let source = BomClient::new(&config.sources)?;
            DailyRun::new(store, config, Some(Box::new(source)), Box::new(LogNotifier))
                .collect(today)
                .await?;
        }
        Command::Reset { yes, table } => {
            if !yes {
                tracing::error!("Refusing to delete records without --yes");
                std::process::exit(2);
            }
            match table {
                Some(name) => store.reset_table(name.parse::<Table>()?).await?,
                None => store.reset_all().await?,
            }
        }
        Command::Tables => {
            for column in store.table_info().await? {
                println!(
                    "{}\t{}\t{}\t{}{}{}",
                    column.table_name,
                    column.column_index,
                    column.column_name,
                    column.data_type,
                    if column.not_null { "\tNOT NULL" } else { "" },
                    if column.primary_key > 0 { "\tPRIMARY KEY" } else { "" },
                );
            }
        }
        Command::Features { model, out } => {
            let replay_model = model.unwrap_or_else(|| config.model.replay_model.clone());
            let builder = FeatureRowBuilder::new(store.clone(), config.model.feature_window());
            let assembler = TrainingSetAssembler::new(store, builder);

            let table = assembler.build_feature_table(&replay_model).await?;
            let labels = assembler
                .build_labels(&table, &replay_model, &config.model.label_config())
                .await?;

            match out {
                Some(path) => {
                    write_csv(&table, &labels, File::create(&path)?)?;
                    tracing::info!("Feature table written to {}", path.display());
                }
                None => write_csv(&table, &labels, io::stdout().lock())?,
            }
        }
        Command::Evaluate { model } => {
            let name = model.unwrap_or_else(|| config.model.name.clone());
            let policy = policy_for_name(&name, config.model.decision_config())?;
            let builder = FeatureRowBuilder::new(store.clone(), config.model.feature_window());
            let assembler = TrainingSetAssembler::new(store, builder);

            let replay_model = &config.model.replay_model;
            let table = assembler.build_feature_table(replay_model).await?;
            let labels = assembler
                .build_labels(&table, replay_model, &config.model.label_config())
                .await?;
            let summary = evaluate_policy(&table, &labels, policy.as_ref());

            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
