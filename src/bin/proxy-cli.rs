use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Operator CLI for the resilient proxy", long_about = None)]
struct Cli {
    /// Base URL of a running proxy.
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache and circuit breaker summary
    Health,
    /// Detailed cache and per-origin breaker stats
    Stats,
    /// Fetch a Swagger/OpenAPI document through the proxy
    Swagger {
        target: String,
        /// Bypass the cache for this fetch
        #[arg(long)]
        no_cache: bool,
    },
    /// Invalidate one cached document, or the whole cache
    Invalidate {
        #[arg(long)]
        url_key: Option<String>,
    },
    /// Force circuit breakers closed (one origin or all)
    Reset {
        #[arg(long)]
        origin: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Health => client.get(format!("{base}/proxy/health")).send().await?,
        Commands::Stats => client.get(format!("{base}/proxy/swagger/stats")).send().await?,
        Commands::Swagger { target, no_cache } => {
            let no_cache = no_cache.to_string();
            client
                .get(format!("{base}/proxy/swagger"))
                .query(&[("url", target.as_str()), ("noCache", no_cache.as_str())])
                .send()
                .await?
        }
        Commands::Invalidate { url_key } => {
            client
                .post(format!("{base}/proxy/swagger/invalidate"))
                .json(&json!({ "url": url_key }))
                .send()
                .await?
        }
        Commands::Reset { origin } => {
            client
                .post(format!("{base}/proxy/circuit/reset"))
                .json(&json!({ "origin": origin }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    for name in ["x-cache-status", "x-circuit-state", "x-retry-attempts"] {
        if let Some(value) = res.headers().get(name).and_then(|v| v.to_str().ok()) {
            eprintln!("{name}: {value}");
        }
    }

    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or(text);

    if status.is_success() {
        println!("{body}");
    } else {
        eprintln!("Error: proxy returned status {status}");
        eprintln!("{body}");
    }
    Ok(())
}
