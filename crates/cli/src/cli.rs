use clap::{Parser, Subcommand};

/// cognitive-runtime — a multi-role reasoning pipeline over a pluggable LLM backend.
#[derive(Debug, Parser)]
#[command(name = "cognitive-runtime", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one turn and print the final answer.
    Run {
        #[arg(long)]
        session: String,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "fake")]
        backend: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Interactive read-eval-print loop over the same session.
    Repl {
        #[arg(long)]
        session: String,
        #[arg(long, default_value = "fake")]
        backend: String,
    },
    /// Run the scripted end-to-end smoke scenario against the fake backend.
    Smoke {
        #[arg(long, default_value = "smoke")]
        session: String,
    },
    /// Render an autopsy report over a past run's trace file.
    Autopsy {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        run: Option<String>,
        #[arg(long)]
        trace: Option<String>,
        #[arg(long)]
        checkpoint: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Inspect files under REPO_ROOT without touching session state.
    Introspect {
        #[arg(long)]
        list: bool,
        #[arg(long)]
        read: bool,
        #[arg(long)]
        summarize: bool,
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long, default_value_t = 200)]
        lines: usize,
        #[arg(long, default_value = "fake")]
        backend: String,
        #[arg(long)]
        instruction: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long, default_value = "auto")]
        chunking: String,
        #[arg(long, default_value_t = 40_000)]
        max_chars: usize,
    },
}
