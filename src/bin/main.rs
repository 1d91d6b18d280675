use conversation_digest::{AppConfig, AppContext};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  digest analyze <conversation-id>
  digest analyze-all
  digest search <query...>";

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let context = match AppContext::from_config(&config).await {
        Ok(context) => context,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&context, command, &args[1..]).await;
    context.shutdown().await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    context: &AppContext,
    command: &str,
    rest: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    match (command, rest) {
        ("analyze", [conversation_id]) => {
            let summaries = context.analyzer.analyze(conversation_id).await?;
            println!("\n=== {} ({} chunks) ===", conversation_id, summaries.len());
            for summary in &summaries {
                println!("[{}] {}", summary.start_date, summary.resume);
            }
        }
        ("analyze-all", []) => {
            let report = context.analyzer.analyze_all().await?;
            info!("Bulk analysis complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ("search", words) if !words.is_empty() => {
            let query = words.join(" ");
            let answer = context.search.search(&query).await?;
            println!("{}", answer);
        }
        _ => return Err(USAGE.into()),
    }

    Ok(())
}
