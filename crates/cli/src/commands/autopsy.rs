use std::path::{Path, PathBuf};

use cr_domain::config::Config;

use super::UsageError;

#[allow(clippy::too_many_arguments)]
pub fn execute(
    session: Option<&str>,
    run: Option<&str>,
    trace: Option<&str>,
    checkpoint: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let data_root = config.resolve_data_root();

    let trace_path = resolve_trace_path(&data_root, session, run, trace)?;
    let trace_text = std::fs::read_to_string(&trace_path)?;

    let checkpoint_path = checkpoint.map(PathBuf::from).or_else(|| session.map(|s| data_root.join("checkpoints").join(format!("{s}.json"))));
    let checkpoint_json = checkpoint_path
        .filter(|p| p.exists())
        .map(|p| std::fs::read_to_string(p))
        .transpose()?
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()?;

    let report = cr_analysis::autopsy_from_trace(&trace_path, &trace_text, checkpoint_json.as_ref());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", cr_analysis::render_autopsy_markdown(&report));
    }
    Ok(())
}

fn resolve_trace_path(data_root: &Path, session: Option<&str>, run: Option<&str>, trace: Option<&str>) -> anyhow::Result<PathBuf> {
    if let Some(trace) = trace {
        return Ok(PathBuf::from(trace));
    }
    let (Some(session), Some(run)) = (session, run) else {
        return Err(UsageError("autopsy requires either --trace or both --session and --run".to_string()).into());
    };
    Ok(data_root.join("traces").join(format!("{session}__{run}.jsonl")))
}
