use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "breaker-cli")]
#[command(about = "Management CLI for the command-breaker admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "BREAKER_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Engine version and circuit state of every command
    Status,
    /// Breaker counts by state and overall health
    Health,
    /// Rolling-window metrics for one command, or all
    Metrics { command: Option<String> },
    /// Show the live config of a command
    Config { command: String },
    /// Change thresholds of a command at runtime
    SetConfig {
        command: String,
        #[arg(long)]
        request_volume_threshold: Option<u32>,
        #[arg(long)]
        error_threshold_percentage: Option<u32>,
        #[arg(long)]
        sleep_window_ms: Option<u64>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        isolation_limit: Option<u32>,
        #[arg(long)]
        force_open: Option<bool>,
        #[arg(long)]
        force_closed: Option<bool>,
    },
    /// Force a command's circuit closed and clear its window
    Reset { command: String },
    /// Fire a batch of calls at a demo command
    LoadTest {
        command: String,
        #[arg(long, default_value_t = 20)]
        count: usize,
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .build()?;
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Health => client.get(format!("{base}/admin/health-summary")),
        Commands::Metrics { command: None } => client.get(format!("{base}/admin/metrics")),
        Commands::Metrics {
            command: Some(command),
        } => client.get(format!("{base}/admin/commands/{command}/metrics")),
        Commands::Config { command } => client.get(format!("{base}/admin/commands/{command}/config")),
        Commands::SetConfig {
            command,
            request_volume_threshold,
            error_threshold_percentage,
            sleep_window_ms,
            timeout_ms,
            isolation_limit,
            force_open,
            force_closed,
        } => {
            let mut patch = Map::new();
            let mut set = |name: &str, value: Option<Value>| {
                if let Some(value) = value {
                    patch.insert(name.to_string(), value);
                }
            };
            set("request_volume_threshold", request_volume_threshold.map(Value::from));
            set("error_threshold_percentage", error_threshold_percentage.map(Value::from));
            set("sleep_window_ms", sleep_window_ms.map(Value::from));
            set("timeout_ms", timeout_ms.map(Value::from));
            set("isolation_limit", isolation_limit.map(Value::from));
            set("force_open", force_open.map(Value::from));
            set("force_closed", force_closed.map(Value::from));
            if patch.is_empty() {
                eprintln!("Error: no config fields given");
                return Ok(());
            }
            client
                .put(format!("{base}/admin/commands/{command}/config"))
                .json(&Value::Object(patch))
        }
        Commands::Reset { command } => client.post(format!("{base}/admin/commands/{command}/reset")),
        Commands::LoadTest {
            command,
            count,
            concurrency,
        } => client
            .post(format!("{base}/admin/load-test/{command}"))
            .query(&[("count", count), ("concurrency", concurrency)]),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
