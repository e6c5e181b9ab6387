//! Name→handler map for built-in tools (spec §4.6).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    FsReadText,
    FsListDir,
    FsWriteText,
    ShellExec,
    HttpGet,
    SystemTime,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolKind>,
}

impl ToolRegistry {
    pub fn with_builtins() -> Self {
        let mut tools = HashMap::new();
        tools.insert("fs.read_text".to_string(), ToolKind::FsReadText);
        tools.insert("fs.list_dir".to_string(), ToolKind::FsListDir);
        tools.insert("fs.write_text".to_string(), ToolKind::FsWriteText);
        tools.insert("shell.exec".to_string(), ToolKind::ShellExec);
        tools.insert("http.get".to_string(), ToolKind::HttpGet);
        tools.insert("system.time".to_string(), ToolKind::SystemTime);
        Self { tools }
    }

    /// A registry with only the read-only `fs.read_text`/`fs.list_dir`/`system.time`
    /// tools, used by introspection (spec §4.16) which must never mutate the repo.
    pub fn readonly() -> Self {
        let mut tools = HashMap::new();
        tools.insert("fs.read_text".to_string(), ToolKind::FsReadText);
        tools.insert("fs.list_dir".to_string(), ToolKind::FsListDir);
        tools.insert("system.time".to_string(), ToolKind::SystemTime);
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<ToolKind> {
        self.tools.get(name).copied()
    }

    pub fn list_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}
