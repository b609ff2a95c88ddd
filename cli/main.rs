#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

use clinpredict::frame::load::load_frame;
use clinpredict::learn::forest::DEFAULT_TREES;
use clinpredict::learn::{Method, ModelType};
use clinpredict::store::{Destination, create_destination_table, export_tsv};
use clinpredict::{DeploySettings, PrepareSettings, SupervisedDeployment};

#[derive(Clone, Copy, ValueEnum)]
pub enum ModelTypeCli {
    Classification,
    Regression,
}

impl From<ModelTypeCli> for ModelType {
    fn from(value: ModelTypeCli) -> Self {
        match value {
            ModelTypeCli::Classification => ModelType::Classification,
            ModelTypeCli::Regression => ModelType::Regression,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodCli {
    Linear,
    Rf,
}

impl From<MethodCli> for Method {
    fn from(value: MethodCli) -> Self {
        match value {
            MethodCli::Linear => Method::Linear,
            MethodCli::Rf => Method::Rf,
        }
    }
}

#[derive(Args)]
pub struct DeployArgs {
    /// Path to the CSV or TSV extract holding training and prediction rows
    pub data: PathBuf,

    #[arg(long, value_enum)]
    pub model_type: ModelTypeCli,

    #[arg(long, value_enum)]
    pub method: MethodCli,

    /// Row identifier written to the output and excluded from the features
    #[arg(long, value_name = "COLUMN")]
    pub grain_column: String,

    /// Flag column: N marks training rows, Y marks rows to score
    #[arg(long, value_name = "COLUMN")]
    pub window_column: String,

    /// Target column (Y/N for classification, numeric for regression)
    #[arg(long, value_name = "COLUMN")]
    pub predicted_column: String,

    /// SQLite database file that holds the destination table
    #[arg(long, value_name = "PATH")]
    pub database: PathBuf,

    /// Destination table, optionally qualified as schema.table
    #[arg(long, value_name = "TABLE")]
    pub destination_table: String,

    /// Fill missing values (mean or mode) instead of dropping incomplete training rows
    #[arg(long)]
    pub impute: bool,

    /// Worker threads for random forest fitting
    #[arg(long, default_value_t = num_cpus::get())]
    pub cores: usize,

    /// Number of trees in a random forest
    #[arg(long, default_value_t = DEFAULT_TREES)]
    pub trees: usize,

    /// Features considered at each split (default: sqrt(p) for classification, p/3 for regression)
    #[arg(long)]
    pub mtry: Option<usize>,

    /// Load probability.toml and factorlogit.toml instead of fitting
    #[arg(long)]
    pub use_saved_model: bool,

    /// Directory holding the saved model files
    #[arg(long, default_value = ".")]
    pub model_dir: PathBuf,

    /// Seed for random forest sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Create the database file and destination table when missing
    #[arg(long)]
    pub create_table: bool,

    /// Also write the output rows to this tab-separated file
    #[arg(long, value_name = "PATH")]
    pub tsv: Option<PathBuf>,
}

pub fn deploy(args: DeployArgs, debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    let model_type = ModelType::from(args.model_type);

    if args.create_table {
        create_destination_table(&Destination {
            database: args.database.clone(),
            table: args.destination_table.clone(),
            grain_column: args.grain_column.clone(),
            predicted_column: model_type.output_column().to_string(),
        })?;
    }

    let df = load_frame(&args.data)?;
    let deployment = SupervisedDeployment::prepare(
        df,
        PrepareSettings {
            model_type,
            grain_column: args.grain_column.clone(),
            window_column: args.window_column,
            predicted_column: args.predicted_column,
            impute: args.impute,
        },
    )?;

    let report = deployment.deploy(&DeploySettings {
        method: args.method.into(),
        cores: args.cores,
        database: args.database.clone(),
        destination_table: args.destination_table.clone(),
        trees: args.trees,
        mtry: args.mtry,
        use_saved_model: args.use_saved_model,
        model_dir: args.model_dir,
        seed: args.seed,
        verbose: debug,
    })?;

    if let Some(path) = args.tsv {
        export_tsv(
            &path,
            &Destination {
                database: args.database.clone(),
                table: args.destination_table.clone(),
                grain_column: args.grain_column,
                predicted_column: model_type.output_column().to_string(),
            },
            &report.rows,
        )?;
    }

    println!(
        "Wrote {} predictions to '{}' in {}",
        report.written,
        args.destination_table,
        args.database.display()
    );
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "clinpredict",
    about = "Fit or load a supervised model on a clinical extract and write scored rows to a table",
    long_about = "Prepares a tabular extract, fits or loads a logistic, linear, or random forest \
                 model, scores the rows flagged for prediction, ranks their top three factors, \
                 and inserts the results into a database table."
)]
struct Cli {
    /// Print debug logging and progress bars
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare data, fit or load a model, and write predictions
    #[command(about = "Score a dataset and write predictions to a database table")]
    Deploy(DeployArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    let cli = Cli::parse();
    let Cli { debug, command } = cli;

    let default_filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match command {
        Some(Commands::Deploy(args)) => deploy(args, debug),
        Some(Commands::Version) => {
            println!("clinpredict {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
