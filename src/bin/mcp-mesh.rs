//! Operator CLI: thin HTTP client over the registry's read surface.
//!
//! `list`/`health`/`watch` add no endpoints of their own; they just call
//! `GET /agents`, `GET /health/:id`, and `GET /watch` and render the result.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use mcp_mesh::config::{resolve_config, ConfigKey};
use mcp_mesh::model::Agent;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "mcp-mesh", about = "Operator CLI for the mesh registry")]
struct Cli {
    /// Registry base URL (default from MCP_MESH_REGISTRY_URL or http://localhost:8000)
    #[arg(long, global = true)]
    registry_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered agents, optionally filtered by capability
    List {
        #[arg(long)]
        capability: Option<String>,
    },
    /// Show the health record for one agent
    Health { agent_id: String },
    /// Stream change events as they arrive
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let registry_url = cli
        .registry_url
        .or_else(|| resolve_config(ConfigKey::RegistryUrl, None))
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let registry_url = registry_url.trim_end_matches('/').to_string();

    let client = reqwest::Client::new();

    match cli.command {
        Commands::List { capability } => list(&client, &registry_url, capability).await,
        Commands::Health { agent_id } => health(&client, &registry_url, &agent_id).await,
        Commands::Watch => watch(&client, &registry_url).await,
    }
}

async fn list(
    client: &reqwest::Client,
    registry_url: &str,
    capability: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut url = format!("{registry_url}/agents");
    if let Some(cap) = &capability {
        url.push_str("?capability=");
        url.push_str(cap);
    }

    let agents: Vec<Agent> = client.get(&url).send().await?.error_for_status()?.json().await?;

    if agents.is_empty() {
        println!("no agents registered");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<12} {:<10} {}",
        "AGENT ID", "NAME", "NAMESPACE", "STATUS", "ENDPOINT"
    );
    for agent in &agents {
        println!(
            "{:<38} {:<20} {:<12} {:<10} {}",
            agent.agent_id,
            agent.name,
            agent.namespace,
            agent.status.as_str(),
            agent.endpoint
        );
    }

    Ok(())
}

async fn health(
    client: &reqwest::Client,
    registry_url: &str,
    agent_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{registry_url}/health/{agent_id}");
    let response = client.get(&url).send().await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        eprintln!("agent '{agent_id}' not found");
        std::process::exit(1);
    }

    let body: Value = response.error_for_status()?.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn watch(client: &reqwest::Client, registry_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{registry_url}/watch");
    let response = client
        .get(&url)
        .header("Accept", "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    println!("watching for change events (ctrl-c to stop)");

    let mut stream = response.bytes_stream();
    let mut buf = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buf.find("\n\n") {
            let frame = buf[..pos].to_string();
            buf.drain(..pos + 2);
            print_sse_frame(&frame);
        }
    }

    Ok(())
}

fn print_sse_frame(frame: &str) {
    let mut event_type = "message";
    let mut data = String::new();

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim());
        }
    }

    if data.is_empty() {
        return;
    }

    match serde_json::from_str::<Value>(&data) {
        Ok(value) => println!("[{event_type}] {value}"),
        Err(_) => println!("[{event_type}] {data}"),
    }
}
