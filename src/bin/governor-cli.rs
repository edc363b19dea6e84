use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "governor-cli")]
#[command(about = "Management CLI for the route governor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GOVERNOR_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version and the last refresh report
    Status,
    /// In-flight counts, ceilings and rates per route
    Concurrency,
    /// Blocked IPs and CIDRs
    BlockedIps,
    /// Mocked routes
    Mocks,
    /// Interceptor scripts per route
    Interceptors,
    /// Outbound request limits and their in-flight counts
    RequestLimits,
    /// Recent alarms
    Alarms,
    /// Run a refresh cycle now
    Refresh,
}

impl Commands {
    fn endpoint(&self) -> (Method, &'static str) {
        match self {
            Commands::Status => (Method::GET, "/admin/status"),
            Commands::Concurrency => (Method::GET, "/admin/concurrency"),
            Commands::BlockedIps => (Method::GET, "/admin/blocked-ips"),
            Commands::Mocks => (Method::GET, "/admin/mocks"),
            Commands::Interceptors => (Method::GET, "/admin/interceptors"),
            Commands::RequestLimits => (Method::GET, "/admin/request-limits"),
            Commands::Alarms => (Method::GET, "/admin/alarms"),
            Commands::Refresh => (Method::POST, "/admin/refresh"),
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

    let (method, path) = cli.command.endpoint();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
