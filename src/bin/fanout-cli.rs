use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "fanout-cli")]
#[command(about = "Diagnostics CLI for fanout-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall status: services, breakers, domains
    Status,
    /// Per-service health and instance records
    Services {
        /// Only show this service
        name: Option<String>,
    },
    /// Circuit breaker states and metrics
    Breakers {
        /// Only show breakers that are not closed
        #[arg(long)]
        open: bool,
    },
    /// Fan-out cache hit rates and latency
    Cache,
}

impl Commands {
    fn path(&self) -> &'static str {
        match self {
            Commands::Status => "/admin/status",
            Commands::Services { .. } => "/admin/services",
            Commands::Breakers { .. } => "/admin/breakers",
            Commands::Cache => "/admin/cache",
        }
    }

    /// Client-side filtering of list responses.
    fn filter(&self, json: Value) -> Value {
        match (self, json) {
            (Commands::Services { name: Some(name) }, Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .filter(|s| s["name"].as_str() == Some(name.as_str()))
                    .collect(),
            ),
            (Commands::Breakers { open: true }, Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .filter(|b| b["state"].as_str() != Some("CLOSED"))
                    .collect(),
            ),
            (_, json) => json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path()))
        .headers(headers)
        .send()
        .await?;
    print_response(res, &cli.command).await?;

    Ok(())
}

async fn print_response(res: reqwest::Response, command: &Commands) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&command.filter(json))?);
    Ok(())
}
