use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use keiba_engine::{
    commands::{check_data, columns, extract, train},
    config::{
        resolve_crate_path, DatabaseConfig, LightgbmParams, TrainingSettings, YearRange,
        DEFAULT_TEST_YEAR,
    },
    context::AppContext,
};
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keiba")]
#[command(about = "Top-3 finish model and win-bet backtest over JRA-VAN race data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct PreviewYears {
    /// First year to extract
    #[arg(long, default_value_t = 2023)]
    start_year: i32,
    /// Last year to extract (inclusive)
    #[arg(long, default_value_t = 2023)]
    end_year: i32,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract races and print a preview with the table shape
    Extract {
        #[command(flatten)]
        years: PreviewYears,
    },
    /// Preprocess extracted races and summarise the win odds
    CheckData {
        #[command(flatten)]
        years: PreviewYears,
    },
    /// List a table's columns and those matching keywords
    Columns {
        /// Table to inspect
        #[arg(long, default_value = "jvd_ra")]
        table: String,
        /// Substrings to look for (defaults depend on the table)
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },
    /// Train the top-3 classifier and backtest win bets on the test year
    Train {
        /// First year to extract
        #[arg(long, default_value_t = 2021)]
        start_year: i32,
        /// Last year to extract (inclusive)
        #[arg(long, default_value_t = 2025)]
        end_year: i32,
        /// Year held out for evaluation; earlier years train the model
        #[arg(long, default_value_t = DEFAULT_TEST_YEAR)]
        test_year: i32,
        /// Destination for the trained model (defaults to models/lightgbm_model.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Number of boosting iterations
        #[arg(long)]
        num_iterations: Option<u32>,
        /// Learning rate
        #[arg(long)]
        learning_rate: Option<f64>,
        /// Number of leaves in one tree
        #[arg(long)]
        num_leaves: Option<u32>,
        /// Maximum tree depth (-1 means no limit)
        #[arg(long)]
        max_depth: Option<i32>,
        /// Minimum number of observations in one leaf
        #[arg(long)]
        min_data_in_leaf: Option<u32>,
        /// L1 regularization
        #[arg(long)]
        lambda_l1: Option<f64>,
        /// L2 regularization
        #[arg(long)]
        lambda_l2: Option<f64>,
        /// Feature fraction (0..=1)
        #[arg(long)]
        feature_fraction: Option<f64>,
        /// Bagging fraction (0..=1)
        #[arg(long)]
        bagging_fraction: Option<f64>,
        /// Bagging frequency (0 disables bagging)
        #[arg(long)]
        bagging_freq: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let database = match DatabaseConfig::from_env() {
        Ok(config) => {
            info!("Using database {}", config.describe());
            Some(config)
        }
        Err(err) => {
            warn!("Database configuration incomplete: {err}");
            None
        }
    };
    let app_context = AppContext::initialize(database);

    match command {
        Commands::Extract { years } => {
            extract::run(&app_context, years.range()?).await?;
        }
        Commands::CheckData { years } => {
            check_data::run(&app_context, years.range()?).await?;
        }
        Commands::Columns { table, keywords } => {
            columns::run(&app_context, &table, &keywords).await?;
        }
        Commands::Train {
            start_year,
            end_year,
            test_year,
            output,
            num_iterations,
            learning_rate,
            num_leaves,
            max_depth,
            min_data_in_leaf,
            lambda_l1,
            lambda_l2,
            feature_fraction,
            bagging_fraction,
            bagging_freq,
        } => {
            let range = YearRange::new(start_year, end_year)?;
            let defaults = LightgbmParams::default();
            let params = LightgbmParams {
                num_iterations: num_iterations.unwrap_or(defaults.num_iterations),
                learning_rate: learning_rate.unwrap_or(defaults.learning_rate),
                num_leaves: num_leaves.unwrap_or(defaults.num_leaves),
                max_depth: max_depth.unwrap_or(defaults.max_depth),
                min_data_in_leaf: min_data_in_leaf.unwrap_or(defaults.min_data_in_leaf),
                lambda_l1: lambda_l1.unwrap_or(defaults.lambda_l1),
                lambda_l2: lambda_l2.unwrap_or(defaults.lambda_l2),
                feature_fraction: feature_fraction.unwrap_or(defaults.feature_fraction),
                bagging_fraction: bagging_fraction.unwrap_or(defaults.bagging_fraction),
                bagging_freq: bagging_freq.unwrap_or(defaults.bagging_freq),
                seed: defaults.seed,
            };
            let mut settings = TrainingSettings {
                test_year,
                params,
                ..TrainingSettings::default()
            };
            if let Some(output) = output {
                settings.model_path = resolve_crate_path(output);
            }
            train::run(&app_context, range, settings).await?;
        }
    }

    Ok(())
}

impl PreviewYears {
    fn range(self) -> Result<YearRange> {
        YearRange::new(self.start_year, self.end_year)
    }
}
