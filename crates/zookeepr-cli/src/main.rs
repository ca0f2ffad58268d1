use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use zookeepr_api::AnimalApi;
use zookeepr_core::{AnimalCriteria, CriterionKey, KernelError};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "zk")]
#[command(about = "Zookeepr CLI")]
struct Cli {
    #[arg(long, env = "ZOOKEEPR_DATA", default_value = "./data/animals.json")]
    data: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Animals {
        #[command(subcommand)]
        command: AnimalsCommand,
    },
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AnimalsCommand {
    List(ListArgs),
    Show(ShowArgs),
    Add(AddArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Check,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    species: Option<String>,
    #[arg(long)]
    diet: Option<String>,
    #[arg(long = "trait")]
    traits: Vec<String>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    id: String,
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Candidate record as inline JSON.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    json: Option<String>,
    /// Read the candidate record from a JSON file.
    #[arg(long)]
    file: Option<PathBuf>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let api = AnimalApi::open(&cli.data)?;
    match cli.command {
        Command::Animals { command } => run_animals(command, &api),
        Command::Db { command } => run_db(&command, &api),
    }
}

fn run_animals(command: AnimalsCommand, api: &AnimalApi) -> Result<()> {
    match command {
        AnimalsCommand::List(args) => {
            let animals = api.list_animals(&criteria_from_args(args))?;
            emit_json(serde_json::json!({ "animals": animals }))
        }
        AnimalsCommand::Show(args) => {
            let animal = api
                .get_animal(&args.id)?
                .ok_or_else(|| KernelError::NotFound(format!("animal {}", args.id)))?;
            emit_json(serde_json::to_value(&animal).context("failed to serialize animal")?)
        }
        AnimalsCommand::Add(args) => {
            let raw = if let Some(json) = args.json {
                json
            } else {
                let path = args.file.ok_or_else(|| anyhow!("either --json or --file is required"))?;
                fs::read_to_string(&path)
                    .with_context(|| format!("failed to read candidate file {}", path.display()))?
            };
            let candidate: Value =
                serde_json::from_str(&raw).context("candidate is not valid JSON")?;
            let animal = api.create_animal(candidate)?;
            tracing::info!(id = %animal.id, "added animal");
            emit_json(serde_json::to_value(&animal).context("failed to serialize animal")?)
        }
    }
}

fn run_db(command: &DbCommand, api: &AnimalApi) -> Result<()> {
    match command {
        DbCommand::Check => {
            let report = api.integrity_check()?;
            if !report.is_clean() {
                tracing::warn!(
                    duplicate_ids = ?report.duplicate_ids,
                    malformed_ids = ?report.malformed_ids,
                    "animal document has integrity findings"
                );
            }
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn criteria_from_args(args: ListArgs) -> AnimalCriteria {
    let mut pairs = args
        .traits
        .into_iter()
        .map(|value| (CriterionKey::PersonalityTraits.as_str(), value))
        .collect::<Vec<_>>();
    for (key, value) in [
        (CriterionKey::Diet, args.diet),
        (CriterionKey::Species, args.species),
        (CriterionKey::Name, args.name),
    ] {
        if let Some(value) = value {
            pairs.push((key.as_str(), value));
        }
    }
    AnimalCriteria::from_query_pairs(pairs).criteria
}
