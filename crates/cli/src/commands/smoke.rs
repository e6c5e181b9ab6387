use cr_domain::config::Config;
use cr_providers::fake::FakeBackend;

const TOOL_CALL_BLOCK: &str = "<<<TOOL_CALLS_JSON>>>\n\
[{\"id\":\"1\",\"tool\":\"fs.list_dir\",\"args\":{\"path\":\".\"}}]\n\
<<<END_TOOL_CALLS_JSON>>>";

/// Drives the scripted end-to-end scenario from the testable-properties
/// section: sandbox contains `hello.txt`, governor lists it with a tool call
/// then announces completion.
pub async fn execute(session: &str) -> anyhow::Result<()> {
    let config = Config::default();
    let data_root = config.resolve_data_root();
    let sandbox_dir = data_root.join("sandbox");
    std::fs::create_dir_all(&sandbox_dir)?;
    std::fs::write(sandbox_dir.join("hello.txt"), "hello")?;

    let backend = FakeBackend::new();
    backend.set_responses(vec!["reflection".to_string(), "planner".to_string(), "critic".to_string()]);
    backend.set_role_responses("governor", vec![TOOL_CALL_BLOCK.to_string(), "Smoke run complete.".to_string()]);

    let final_text = cr_runtime::run_turn(session, "Hello", &backend, &data_root, Some("fake")).await?;

    println!("{final_text}");
    if final_text != "Smoke run complete." {
        anyhow::bail!("smoke scenario produced unexpected final text: {final_text}");
    }
    Ok(())
}
