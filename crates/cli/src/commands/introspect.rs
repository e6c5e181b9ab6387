use cr_analysis::introspection::{list_repo_files, read_repo_file_tail, resolve_repo_root};
use cr_analysis::{summarize_repo_file, SummarizeOptions};
use cr_domain::config::Config;
use cr_providers::registry::BackendRegistry;

use super::UsageError;

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    list: bool,
    read: bool,
    summarize: bool,
    path: Option<&str>,
    limit: usize,
    lines: usize,
    backend_name: &str,
    instruction: Option<&str>,
    max_tokens: Option<u32>,
    chunking: &str,
    max_chars: usize,
) -> anyhow::Result<()> {
    let selected = [list, read, summarize].iter().filter(|v| **v).count();
    if selected != 1 {
        return Err(UsageError("introspect requires exactly one of --list, --read, --summarize".to_string()).into());
    }

    let repo_root = resolve_repo_root();

    if list {
        let files = list_repo_files(&repo_root, path, limit)?;
        for file in files {
            println!("{file}");
        }
        return Ok(());
    }

    let Some(path) = path else {
        return Err(UsageError("--path is required for --read/--summarize".to_string()).into());
    };

    if read {
        let text = read_repo_file_tail(&repo_root, path, lines)?;
        println!("{text}");
        return Ok(());
    }

    let config = Config::default();
    let data_root = config.resolve_data_root();
    let registry = BackendRegistry::resolve(backend_name)?;
    let options = SummarizeOptions {
        max_lines: lines,
        max_tokens,
        instruction: instruction.map(str::to_string),
        chunking: chunking.to_string(),
        max_chars,
    };
    let result = summarize_repo_file(&repo_root, path, &data_root, registry.backend.as_ref(), &options).await?;
    println!("{}", result.summary);
    Ok(())
}
