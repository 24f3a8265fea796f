mod config;
mod terminal;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    HttpTransport, SessionController, SessionError, SessionOptions, SessionOutcome, UploadOutcome,
};
use shared::domain::SearchBudget;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::{config::normalize_server_url, terminal::TerminalSurface};

#[derive(Parser, Debug)]
#[command(name = "kg-chat", about = "Ask the knowledge-graph assistant from a terminal")]
struct Args {
    /// Config file; defaults to ./kg-chat.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    /// Ask one question and exit.
    #[arg(long)]
    question: Option<String>,
    /// Upload one image for segmentation and exit.
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    single_hop: bool,
    /// `Deeper` or `Deep`.
    #[arg(long)]
    search_budget: Option<SearchBudget>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(server_url) = &args.server_url {
        settings.server_url = normalize_server_url(server_url)?;
    }
    if args.single_hop {
        settings.enable_multi_hop = false;
    }
    if let Some(budget) = args.search_budget {
        settings.search_budget = budget;
    }

    let transport = HttpTransport::new(
        &settings.server_url,
        Duration::from_secs(settings.connect_timeout_secs),
    )
    .context("failed to set up the backend connection")?;
    let controller = SessionController::new(Arc::new(transport), Arc::new(TerminalSurface::new()));
    let mut options = SessionOptions {
        enable_multi_hop: settings.enable_multi_hop,
        search_budget: settings.search_budget,
    };

    if args.image.is_some() || args.question.is_some() {
        if let Some(path) = &args.image {
            match controller.upload_image(path).await? {
                UploadOutcome::Completed => {}
                UploadOutcome::Failed(reason) => bail!("image upload failed: {reason}"),
                UploadOutcome::Rejected => bail!("unsupported image type: {}", path.display()),
            }
        }
        if let Some(question) = &args.question {
            let report = controller.submit(question, options).await?;
            match report.outcome {
                SessionOutcome::BackendError(reason) | SessionOutcome::TransportFailed(reason) => {
                    bail!(reason)
                }
                _ => {}
            }
        }
        return Ok(());
    }

    println!(
        "Connected to {}. Type a question, /image <path>, /multihop on|off, /budget <Deeper|Deep> or /quit.",
        settings.server_url
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit" | "/exit", _) => break,
            ("/image", path) if !path.trim().is_empty() => {
                let path = PathBuf::from(path.trim());
                report_session_error(controller.upload_image(&path).await.map(|_| ()));
            }
            ("/multihop", value) => match value.trim() {
                "on" => options.enable_multi_hop = true,
                "off" => options.enable_multi_hop = false,
                _ => println!("usage: /multihop on|off"),
            },
            ("/budget", value) => match value.trim().parse::<SearchBudget>() {
                Ok(budget) => options.search_budget = budget,
                Err(err) => println!("{err}"),
            },
            ("", _) => {}
            _ if line.starts_with('/') => println!("unknown command: {line}"),
            _ => report_session_error(controller.submit(line, options).await.map(|_| ())),
        }
    }

    Ok(())
}

fn report_session_error(result: Result<(), SessionError>) {
    if let Err(err) = result {
        println!("{err}");
    }
}
