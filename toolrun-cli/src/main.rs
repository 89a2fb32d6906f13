//! Toolrun CLI - Run tools, detect protocols, and execute plans

mod bootstrap;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use toolrun_core::prelude::*;

#[derive(Parser)]
#[command(name = "toolrun")]
#[command(about = "Tool execution runtime CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML, or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// User the calls are made on behalf of
    #[arg(short, long, global = true, env = "TOOLRUN_USER", default_value = "cli")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered tools with their metrics
    Tools,
    /// Execute one tool call and print the result
    Call {
        /// Tool name
        tool: String,
        /// Params as a JSON object
        #[arg(default_value = "{}")]
        params: String,
        /// Skip the cache lookup
        #[arg(long)]
        bypass_cache: bool,
    },
    /// Detect the protocol of a raw tool call and print the normalized call
    Detect {
        /// Raw payload as JSON; bare text is treated as a ReAct transcript
        payload: String,
        /// Also execute the call and print the text rendering
        #[arg(long)]
        run: bool,
    },
    /// Execute a plan file (JSON or YAML)
    Plan {
        file: PathBuf,
        /// Run steps one at a time
        #[arg(long)]
        sequential: bool,
    },
    /// Version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<ToolrunConfig> {
    let config = match path {
        Some(path) => ToolrunConfig::from_file(path)?,
        None => ToolrunConfig::load()?,
    };
    Ok(config)
}

fn build_executor(config: &ToolrunConfig) -> Arc<ToolExecutor> {
    let executor = ToolExecutor::from_config(Arc::new(ToolRegistry::new()), config);
    bootstrap::register_builtin_tools(&executor);
    Arc::new(executor)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("toolrun {}", env!("CARGO_PKG_VERSION"));
        println!("toolrun-core {}", toolrun_core::VERSION);
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config.as_ref())?;
    let executor = build_executor(&config);
    let ctx = ToolContext::new(cli.user.clone());

    let code = match cli.command {
        Commands::Version => ExitCode::SUCCESS,
        Commands::Tools => {
            for tool in executor.registry().list() {
                let metrics = executor.get_metrics(&tool.name);
                println!(
                    "{:<12} {:<8} {}",
                    tool.name,
                    metrics
                        .map(|m| format!("{:?}", m.status).to_lowercase())
                        .unwrap_or_default(),
                    tool.description
                );
            }
            ExitCode::SUCCESS
        }
        Commands::Call {
            tool,
            params,
            bypass_cache,
        } => {
            let params: Value =
                serde_json::from_str(&params).context("params must be valid JSON")?;
            let options = if bypass_cache {
                ExecuteOptions::new().bypass_cache()
            } else {
                ExecuteOptions::new()
            };
            let result = executor.execute_with(&tool, params, &ctx, options).await;
            print_json(&result)?;
            exit_code(result.success)
        }
        Commands::Detect { payload, run } => {
            let raw = serde_json::from_str::<Value>(&payload).unwrap_or(Value::String(payload));
            let protocols = ProtocolRegistry::with_defaults();
            let call = protocols.parse(&raw)?;
            print_json(&call)?;

            if run {
                let result = executor
                    .execute(&call.tool_name, call.params.clone(), &ctx)
                    .await;
                let protocol = call.meta.get("protocol").and_then(Value::as_str);
                println!("{}", protocols.format_result(protocol, &result, &ctx).result_text);
                exit_code(result.success)
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::Plan { file, sequential } => {
            let plan = OrchestrationPlan::from_file(&file)
                .with_context(|| format!("failed to load plan {}", file.display()))?;
            let orchestrator_config = if sequential {
                OrchestratorConfig::sequential()
            } else {
                config.orchestrator.clone()
            };
            let result = Orchestrator::new(executor.clone())
                .with_config(orchestrator_config)
                .execute_plan(&plan, &ctx)
                .await?;
            print_json(&result)?;
            exit_code(result.success)
        }
    };

    executor.shutdown();
    Ok(code)
}
