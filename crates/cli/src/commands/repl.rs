use cr_domain::config::Config;
use cr_providers::registry::BackendRegistry;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub async fn execute(session: &str, backend_name: &str) -> anyhow::Result<()> {
    let config = Config::default();
    let data_root = config.resolve_data_root();
    let registry = BackendRegistry::resolve(backend_name)?;

    let mut editor = DefaultEditor::new()?;
    println!("cognitive-runtime repl — session '{session}', backend '{backend_name}'. Ctrl-D to exit.");

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                editor.add_history_entry(trimmed).ok();
                match cr_runtime::run_turn(session, trimmed, registry.backend.as_ref(), &data_root, Some(&registry.name)).await {
                    Ok(final_text) => println!("{final_text}"),
                    Err(err) => tracing::warn!(error = %err, "turn failed"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                tracing::warn!(error = %err, "repl read error");
                break;
            }
        }
    }
    Ok(())
}
