//! Terminal chat over the mnemo pipeline.
//!
//! Keeps one session for the whole run and prints tokens as they stream.
//! `exit` or `quit` ends the session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use mnemo_api::bootstrap::{build_coordinator, init_tracing, load_config};
use mnemo_common::AgentRequest;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "mnemo-chat", version, about = "Chat with mnemo in the terminal")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resume an existing session
    #[arg(short, long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Quiet by default so logs don't interleave with the conversation.
    init_tracing("warn");
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let name = config.agent.assistant_name.clone();
    let prefix = config.agent.command_prefix;
    let coordinator = Arc::new(build_coordinator(config).await?);

    println!("{name} is listening. Type {prefix}help for commands, 'exit' to quit.");

    let mut session_id = args.session;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nyou> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let mut request = AgentRequest::new(line);
        request.session_id = session_id.clone();

        let mut chunks = match coordinator.clone().run_stream(request) {
            Ok(chunks) => chunks,
            Err(e) => {
                println!("! {e}");
                continue;
            }
        };

        print!("{name}> ");
        while let Some(chunk) = chunks.next().await {
            if chunk.is_complete {
                session_id = Some(chunk.session_id);
                println!();
                break;
            }
            print!("{}", chunk.token);
            std::io::stdout().flush()?;
        }
    }

    println!("Goodbye.");
    Ok(())
}
