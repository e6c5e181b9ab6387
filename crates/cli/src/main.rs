mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Command};
use commands::UsageError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { session, text, backend, model, json } => {
            commands::run::execute(&session, &text, &backend, model.as_deref(), json).await
        }
        Command::Repl { session, backend } => commands::repl::execute(&session, &backend).await,
        Command::Smoke { session } => commands::smoke::execute(&session).await,
        Command::Autopsy { session, run, trace, checkpoint, json } => commands::autopsy::execute(
            session.as_deref(),
            run.as_deref(),
            trace.as_deref(),
            checkpoint.as_deref(),
            json,
        ),
        Command::Introspect {
            list,
            read,
            summarize,
            path,
            limit,
            lines,
            backend,
            instruction,
            max_tokens,
            chunking,
            max_chars,
        } => {
            commands::introspect::execute(
                list,
                read,
                summarize,
                path.as_deref(),
                limit,
                lines,
                &backend,
                instruction.as_deref(),
                max_tokens,
                &chunking,
                max_chars,
            )
            .await
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        if err.downcast_ref::<UsageError>().is_some() {
            std::process::exit(2);
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cognitive_runtime=info")))
        .json()
        .init();
}
