mod poller;
mod query;
mod sample;
mod source;
mod store;
mod web;

use clap::{Parser, Subcommand};
use std::fs;
use std::process::ExitCode;

use crate::poller::{poll_once, TickOutcome};
use crate::query::ExportSelection;
use crate::sample::DayBucket;
use crate::source::HttpPositionSource;
use crate::store::{open_store, MemoryStore, SampleStore};
use crate::web::Config;

#[derive(Parser)]
#[command(name = "iss-tracker")]
#[command(about = "Record the ISS ground track and serve it over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poller and the web server
    Serve {
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Fetch one sample and print it as JSON
    Fetch {
        #[arg(short, long)]
        config: Option<String>,
        /// Also append the sample to the configured store
        #[arg(long)]
        store: bool,
    },
    /// Write stored samples as CSV
    Export {
        #[arg(short, long)]
        config: Option<String>,
        /// Day bucket (YYYY-MM-DD); every day when omitted
        #[arg(long)]
        day: Option<DayBucket>,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate configuration and print the effective settings
    Check {
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { config: None }) {
        Commands::Serve { config } => serve(config.as_deref()),
        Commands::Fetch { config, store } => fetch(config.as_deref(), store),
        Commands::Export {
            config,
            day,
            output,
        } => export(config.as_deref(), day, output.as_deref()),
        Commands::Check { config } => check(config.as_deref()),
    }
}

fn load_config(path: Option<&str>) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn serve(path: Option<&str>) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    match web::run_server(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn fetch(path: Option<&str>, persist: bool) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    let source = match HttpPositionSource::new(config.source.url.clone(), config.source.timeout) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error building HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = if persist {
        match open_store(&config.storage) {
            Ok(store) => poll_once(&source, store.as_ref(), None).await,
            Err(e) => {
                eprintln!("Error opening store: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        poll_once(&source, &MemoryStore::with_capacity(1), None).await
    };

    match outcome {
        Ok(TickOutcome::Stored(sample)) => match serde_json::to_string_pretty(&sample) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error encoding sample: {}", e);
                ExitCode::FAILURE
            }
        },
        Ok(TickOutcome::QuotaReached { day, count }) => {
            eprintln!("Day {} already holds {} samples", day, count);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Fetch failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn export(path: Option<&str>, day: Option<DayBucket>, output: Option<&str>) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    let store = match open_store(&config.storage) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let selection = day.map_or(ExportSelection::All, ExportSelection::Day);
    let csv = match export_csv(store.as_ref(), selection) {
        Ok(csv) => csv,
        Err(e) => {
            eprintln!("Export failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match output {
        Some(file) => match fs::write(file, csv) {
            Ok(()) => {
                println!("Wrote {}", file);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error writing {}: {}", file, e);
                ExitCode::FAILURE
            }
        },
        None => {
            print!("{}", csv);
            ExitCode::SUCCESS
        }
    }
}

fn export_csv(store: &dyn SampleStore, selection: ExportSelection) -> query::QueryResult<String> {
    let samples = query::export(store, selection)?;
    query::render_csv(&samples)
}

fn check(path: Option<&str>) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            println!("Configuration is valid");
            print!("{}", yaml);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error encoding configuration: {}", e);
            ExitCode::FAILURE
        }
    }
}
