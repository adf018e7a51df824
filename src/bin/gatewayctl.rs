use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gatewayctl")]
#[command(about = "Inspect a running gateway node through its admin listener", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:18082")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "admin-secret-key")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Node status and readiness
    Status,
    /// List deployed APIs
    Apis {
        /// Show a single API
        id: Option<String>,
    },
    /// Per registry type sync phase and watermark
    Sync,
    /// Force a full resync
    Resync {
        /// Registry type (e.g. API, SUBSCRIPTION); all types when omitted
        #[arg(short = 't', long = "type")]
        registry_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Apis { id: Some(id) } => client.get(format!("{base}/admin/apis/{id}")),
        Commands::Apis { id: None } => client.get(format!("{base}/admin/apis")),
        Commands::Sync => client.get(format!("{base}/admin/sync")),
        Commands::Resync { registry_type } => {
            let request = client.post(format!("{base}/admin/sync/resync"));
            match registry_type {
                Some(t) => request.query(&[("type", t)]),
                None => request,
            }
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
