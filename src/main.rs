//! setjudge CLI - translate set descriptions and judge set equality.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use setjudge::{
    BatchRunner, ComparisonOperator, ComparisonPipeline, ComparisonRequest, ComparisonTask,
    ComparisonVerdict, Config, Direction, FormalSet, InformalSet, LlmClient, SchemaRegistry,
    SetDescription,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "setjudge")]
#[command(version)]
#[command(about = "Translate set descriptions and judge set equality via OpenAI-compatible LLMs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "setjudge.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate two sets and judge whether they are equal
    Compare {
        /// Name of the first set
        #[arg(long, default_value = "First")]
        first_name: String,

        /// Constraint of the first set
        #[arg(long)]
        first: String,

        /// Name of the second set
        #[arg(long, default_value = "Second")]
        second_name: String,

        /// Constraint of the second set
        #[arg(long)]
        second: String,

        /// Treat both constraints as formal set-builder expressions
        #[arg(long)]
        formal: bool,

        /// Relation to check (== or !=)
        #[arg(long, default_value = "==")]
        operator: ComparisonOperator,
    },

    /// Translate a single set
    Translate {
        /// Name of the set
        #[arg(long)]
        name: String,

        /// Constraint to translate
        #[arg(long)]
        constraint: String,

        /// The constraint is formal; translate it into English
        #[arg(long)]
        formal: bool,
    },

    /// Run comparison tasks from a JSONL file
    Batch {
        /// Path to input tasks JSONL file
        #[arg(short, long)]
        tasks: PathBuf,

        /// Path to output JSONL file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the JSON Schema of a structured output type
    Schema {
        #[arg(value_enum, default_value = "formal-set")]
        kind: SchemaKind,
    },

    /// Validate configuration file
    Validate {
        /// Also ping the backend's /models endpoint
        #[arg(long)]
        ping: bool,
    },

    /// Show example configuration
    Example,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaKind {
    InformalSet,
    FormalSet,
    ComparisonRequest,
    ComparisonVerdict,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# setjudge configuration file

[backend]
# API key (or set the variable named by api_key_env); "${VAR}" is expanded
# api_key = "sk-..."
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
timeout_secs = 120
max_retries = 3
max_in_flight = 8
# headers = { "OpenAI-Organization" = "${OPENAI_ORG}" }

[model]
endpoint = "openai"
id = "gpt-4o-mini"
response_mode = "tool"  # tool | json_schema | json_object
temperature = 0.0
max_tokens = 1024

[pipeline]
concurrent_translation = true
max_concurrent_tasks = 4
"#;
    println!("{example}");
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        warn!(path = ?path, "Config file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    Config::from_file(path).with_context(|| format!("Failed to load config from {:?}", path))
}

/// Build the pipeline; the returned client shares its usage counters.
fn build_pipeline(config: &Config) -> Result<(ComparisonPipeline, LlmClient)> {
    let client = LlmClient::from_config(config).context("Failed to create backend client")?;
    let pipeline = ComparisonPipeline::from_config(config, Arc::new(client.clone()))?;
    Ok((pipeline, client))
}

fn log_usage(client: &LlmClient) {
    let (requests, input_tokens, output_tokens) = client.usage();
    info!(
        endpoint = client.name(),
        requests, input_tokens, output_tokens, "Backend usage"
    );
}

fn source(name: String, constraint: String, formal: bool) -> SetDescription {
    if formal {
        FormalSet::from_formal(name, constraint).into()
    } else {
        InformalSet::new(name, constraint).into()
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Schema { kind } => {
            let registry = SchemaRegistry::new();
            let schema = match kind {
                SchemaKind::InformalSet => registry.schema_for::<InformalSet>(),
                SchemaKind::FormalSet => registry.schema_for::<FormalSet>(),
                SchemaKind::ComparisonRequest => registry.schema_for::<ComparisonRequest>(),
                SchemaKind::ComparisonVerdict => registry.schema_for::<ComparisonVerdict>(),
            };
            print_json(&*schema)?;
        }

        Commands::Validate { ping } => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Backend: {}", config.backend.base_url);
            info!(
                "  Model: {} ({:?} mode)",
                config.model.id, config.model.response_mode
            );
            info!(
                "  API key: {}",
                if api_key.is_some() { "resolved" } else { "none" }
            );
            info!(
                "  Max concurrent tasks: {}",
                config.pipeline.max_concurrent_tasks
            );

            if ping {
                let client = LlmClient::from_config(&config)?;
                let health = client.health_check().await;
                match health.latency_ms {
                    Some(ms) => info!("  {}: {} ({}ms)", health.endpoint, health.status, ms),
                    None => info!("  {}: {}", health.endpoint, health.status),
                }
                if let Some(error) = health.error {
                    return Err(anyhow!("Backend health check failed: {error}"));
                }
            }
        }

        Commands::Translate {
            name,
            constraint,
            formal,
        } => {
            let config = load_config(&cli.config)?;
            let (pipeline, client) = build_pipeline(&config)?;

            let set = source(name, constraint, formal);
            let translated = pipeline
                .translate(&set, Direction::for_source(&set))
                .await
                .context("Translation failed")?;
            log_usage(&client);
            print_json(&translated)?;
        }

        Commands::Compare {
            first_name,
            first,
            second_name,
            second,
            formal,
            operator,
        } => {
            let config = load_config(&cli.config)?;
            let (pipeline, client) = build_pipeline(&config)?;

            let task = ComparisonTask {
                id: "cli".to_string(),
                name: format!("{first_name} {operator} {second_name}"),
                operator,
                first: source(first_name, first, formal),
                second: source(second_name, second, formal),
            };

            let run = pipeline.run(&task).await;
            log_usage(&client);
            if let Some(failure) = run.failure {
                return Err(anyhow!(failure.cause)
                    .context(format!("Comparison failed during {}", failure.stage)));
            }

            let holds = run.verdict.as_ref().map(|v| v.holds(operator));
            print_json(&json!({
                "first": run.first,
                "second": run.second,
                "operator": operator,
                "verdict": run.verdict,
                "holds": holds,
            }))?;
        }

        Commands::Batch { tasks, output } => {
            let config = load_config(&cli.config)?;
            let (pipeline, client) = build_pipeline(&config)?;
            let runner = BatchRunner::from_config(&config, Arc::new(pipeline));

            let tasks_data = BatchRunner::load_tasks(&tasks)?;
            let stats = runner.run(tasks_data, &output).await?;
            log_usage(&client);

            println!("\n=== Batch Comparison Complete ===");
            println!("Tasks:       {}", stats.total);
            println!("Compared:    {}", stats.done);
            println!("Failed:      {}", stats.failed);
            println!("Equal:       {}", stats.equal);
            println!("Not equal:   {}", stats.not_equal);
            println!("Held:        {}", stats.held);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {output:?}");
        }
    }

    Ok(())
}
