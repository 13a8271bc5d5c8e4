mod agent;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use outpost_engine::{ExecuteOptions, FetchAndExecuteRequest, RecursionGuard, WorkflowFetcher};
use outpost_types::{ExecutionParam, ExecutionResponse};
use outpost_util::AgentConfig;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::agent::{Agent, load_definition};

#[derive(Debug, Parser)]
#[command(name = "outpost", version, about = "Runs API and workflow definitions next to your data")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll for scheduled jobs until interrupted (default)
    Run,
    /// Execute one API or workflow and print the redacted result
    Execute(ExecuteArgs),
}

#[derive(Debug, Args)]
struct ExecuteArgs {
    /// Id of the API or workflow to fetch from the control plane
    #[arg(required_unless_present = "file")]
    api_id: Option<String>,
    #[arg(long, short, default_value = "staging")]
    environment: String,
    /// Fetch the published version
    #[arg(long)]
    published: bool,
    /// Treat the id as a workflow
    #[arg(long)]
    workflow: bool,
    /// Run a local definition document instead of fetching one
    #[arg(long, short, conflicts_with = "api_id")]
    file: Option<PathBuf>,
    /// Execution parameter as key=value; values that parse as JSON are bound as JSON
    #[arg(long = "param", short = 'p', value_parser = parse_param)]
    params: Vec<ExecutionParam>,
}

fn parse_param(raw: &str) -> Result<ExecutionParam, String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok(ExecutionParam { key: key.to_string(), value })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    let agent = Agent::from_config(config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => agent.run_until_shutdown().await,
        Command::Execute(args) => {
            let response = execute(&agent, args).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.state.has_error() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

async fn execute(agent: &Agent, args: ExecuteArgs) -> Result<ExecutionResponse> {
    if let Some(path) = args.file {
        let definition = load_definition(&path).await?;
        let options = ExecuteOptions {
            environment: args.environment,
            params: args.params,
            is_workflow_context: args.workflow,
            ..ExecuteOptions::default()
        };
        return Ok(agent.service.execute_definition(definition, options).await?);
    }

    let api_id = args.api_id.context("an api id or --file is required")?;
    let request = FetchAndExecuteRequest {
        is_workflow: args.workflow,
        published: args.published,
        params: args.params,
        ..FetchAndExecuteRequest::new(api_id, args.environment)
    };
    Ok(agent.service.fetch_and_execute(request, &mut RecursionGuard::new()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_bind_json_when_they_parse() {
        assert_eq!(parse_param("limit=10").expect("param").value, json!(10));
        assert_eq!(parse_param("filter={\"a\":1}").expect("param").value, json!({"a": 1}));
        assert_eq!(parse_param("name=orders=v2").expect("param").value, json!("orders=v2"));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn execute_needs_an_id_or_a_file() {
        assert!(Cli::try_parse_from(["outpost", "execute"]).is_err());
        assert!(Cli::try_parse_from(["outpost", "execute", "api-1", "--file", "def.yaml"]).is_err());

        let cli = Cli::try_parse_from(["outpost", "execute", "--file", "def.yaml", "-p", "id=7"]).expect("parse");
        let Some(Command::Execute(args)) = cli.command else {
            panic!("expected execute");
        };
        assert_eq!(args.environment, "staging");
        assert_eq!(args.params[0].value, json!(7));
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["outpost"]).expect("parse");
        assert!(cli.command.is_none());
    }
}
