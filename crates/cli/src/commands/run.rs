use cr_domain::config::Config;
use cr_providers::registry::BackendRegistry;

pub async fn execute(session: &str, text: &str, backend_name: &str, model: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = Config::default();
    let data_root = config.resolve_data_root();
    let registry = BackendRegistry::resolve(backend_name)?;

    if let Some(model) = model {
        tracing::info!(model, "model override requested (informational; role params unchanged)");
    }

    let final_text = cr_runtime::run_turn(session, text, registry.backend.as_ref(), &data_root, Some(&registry.name)).await?;

    if json {
        println!("{}", serde_json::json!({"session": session, "text": final_text}));
    } else {
        println!("{final_text}");
    }
    Ok(())
}
