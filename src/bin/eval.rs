//! Schema Evaluation CLI
//!
//! Compiles a schema once and evaluates instance documents against it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use keystone_schema::{Engine, EvaluationOptions, OutputFormat};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-eval")]
#[command(about = "Evaluate JSON instances against a JSON Schema")]
struct Cli {
    /// Path to the schema document
    #[arg(short, long)]
    schema: PathBuf,

    /// Instance documents to evaluate
    #[arg(required = true)]
    instances: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "hierarchical")]
    format: Format,

    /// Dialect URI assumed when the schema has no $schema
    #[arg(short, long)]
    dialect: Option<String>,

    /// Additional schema resources resolvable via $ref (roots must carry $id)
    #[arg(short, long)]
    resource: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Flag,
    List,
    Hierarchical,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Flag => OutputFormat::Flag,
            Format::List => OutputFormat::List,
            Format::Hierarchical => OutputFormat::Hierarchical,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(all_valid) => {
            if !all_valid {
                std::process::exit(1);
            }
        }
        Err(e) => {
            // Compile and IO problems are configuration errors, reported
            // before and distinctly from any instance verdict.
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let mut engine = Engine::new();
    if let Some(dialect) = &cli.dialect {
        engine.set_default_dialect(dialect);
    }
    for path in &cli.resource {
        let raw = read_json(path)?;
        engine
            .add_resource(&raw)
            .with_context(|| format!("registering resource {}", path.display()))?;
    }

    let schema = read_json(&cli.schema)?;
    let compiled = engine
        .compile(&schema)
        .with_context(|| format!("compiling {}", cli.schema.display()))?;

    let options = EvaluationOptions {
        format: cli.format.into(),
        ..EvaluationOptions::default()
    };

    let mut all_valid = true;
    for path in &cli.instances {
        let instance = read_json(path)?;
        let results = compiled
            .evaluate(&instance, &options)
            .with_context(|| format!("evaluating {}", path.display()))?;
        all_valid &= results.flag();

        let output = results.to_output(cli.format.into());
        if cli.instances.len() > 1 {
            println!("{}: {}", path.display(), serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(all_valid)
}

fn read_json(path: &PathBuf) -> Result<serde_json::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
