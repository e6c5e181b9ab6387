//! Path containment and shell-command validation (spec §4.5).

use std::path::{Path, PathBuf};

/// Rewrite a `/sandbox` (or `/sandbox/<tail>`) alias to a root-relative path,
/// then resolve it strictly inside `root`. Returns `None` on any escape
/// attempt: an absolute path, `..` components that leave `root`, or a
/// resolution that walks through a symlink out of `root`.
pub fn resolve_under_root(root: &Path, user_path: &str) -> Option<PathBuf> {
    if user_path.as_bytes().contains(&0) {
        return None;
    }

    let rewritten = if user_path == "/sandbox" {
        ".".to_string()
    } else if let Some(tail) = user_path.strip_prefix("/sandbox/") {
        tail.to_string()
    } else {
        user_path.to_string()
    };

    let candidate = Path::new(&rewritten);
    if candidate.is_absolute() {
        return None;
    }

    let root_abs = lexically_normalize(&std::env::current_dir().ok()?.join(root));
    let joined = root_abs.join(candidate);
    let normalized = lexically_normalize(&joined);

    if normalized.starts_with(&root_abs) {
        Some(normalized)
    } else {
        None
    }
}

/// Resolve `..`/`.` components without touching the filesystem (so the check
/// also catches escapes for paths that do not exist yet, e.g. `fs.write_text`).
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            ParentDir => {
                out.pop();
            }
            CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

const SHELL_METACHARACTERS: &[char] = &['|', '&', '>', '<', '`', '$', '\n'];

/// Validate a shell command string against an allowlist of leading tokens and
/// a deny-substring list (spec §4.5). Tokenization follows POSIX shell-word
/// splitting (quote-aware, no variable/glob expansion).
pub fn validate_shell_cmd(
    cmd: &str,
    allowed_prefixes: &[String],
    deny_substrings: &[String],
) -> Result<Vec<String>, String> {
    if cmd.trim().is_empty() {
        return Err("empty command".to_string());
    }

    let mut in_single = false;
    let mut in_double = false;
    for ch in cmd.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if !in_single && !in_double && SHELL_METACHARACTERS.contains(&c) => {
                return Err(format!("disallowed shell metacharacter: {c:?}"));
            }
            ';' if !in_single && !in_double => {
                return Err("disallowed shell metacharacter: ';'".to_string());
            }
            _ => {}
        }
    }
    if in_single || in_double {
        return Err("unterminated quote".to_string());
    }

    let tokens = tokenize(cmd)?;
    let first = tokens.first().ok_or("empty command")?;
    if !allowed_prefixes.iter().any(|p| p == first) {
        return Err(format!("command '{first}' is not in the allowed prefix list"));
    }

    for token in &tokens {
        let lower = token.to_ascii_lowercase();
        for deny in deny_substrings {
            let deny_lower = deny.to_ascii_lowercase();
            if lower == deny_lower || lower.starts_with(&deny_lower) {
                return Err(format!("token '{token}' matches denied pattern '{deny}'"));
            }
        }
    }

    Ok(tokens)
}

/// A small hand-written POSIX-ish word splitter (spec §9: "prefer a small
/// hand-written scanner for auditability"). Quotes are stripped; no escape
/// sequences other than a backslash before a quote character are honored.
fn tokenize(cmd: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_current = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = cmd.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                has_current = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_current = true;
            }
            '\\' if in_double => {
                if let Some(&next) = chars.peek() {
                    if next == '"' || next == '\\' {
                        current.push(next);
                        chars.next();
                        has_current = true;
                        continue;
                    }
                }
                current.push(ch);
                has_current = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_current {
                    tokens.push(std::mem::take(&mut current));
                    has_current = false;
                }
            }
            c => {
                current.push(c);
                has_current = true;
            }
        }
    }
    if in_single || in_double {
        return Err("unterminated quote".to_string());
    }
    if has_current {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_under_root(dir.path(), "/etc/passwd").is_none());
    }

    #[test]
    fn rejects_parent_escape() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_under_root(dir.path(), "../escape.txt").is_none());
        assert!(resolve_under_root(dir.path(), "a/../../escape.txt").is_none());
    }

    #[test]
    fn allows_nested_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let resolved = resolve_under_root(dir.path(), "a/b/c.txt").unwrap();
        assert!(resolved.starts_with(lexically_normalize(
            &std::env::current_dir().unwrap().join(dir.path())
        )));
    }

    #[test]
    fn rewrites_sandbox_alias() {
        let dir = tempfile::tempdir().unwrap();
        let a = resolve_under_root(dir.path(), "/sandbox").unwrap();
        let b = resolve_under_root(dir.path(), ".").unwrap();
        assert_eq!(a, b);
        let c = resolve_under_root(dir.path(), "/sandbox/hello.txt").unwrap();
        let d = resolve_under_root(dir.path(), "hello.txt").unwrap();
        assert_eq!(c, d);
    }

    #[test]
    fn shell_validation_rejects_metacharacters() {
        let allowed = vec!["ls".to_string()];
        let deny = vec!["rm".to_string()];
        assert!(validate_shell_cmd("ls | cat", &allowed, &deny).is_err());
        assert!(validate_shell_cmd("ls; rm -rf /", &allowed, &deny).is_err());
        assert!(validate_shell_cmd("ls `whoami`", &allowed, &deny).is_err());
    }

    #[test]
    fn shell_validation_rejects_unknown_prefix() {
        let allowed = vec!["ls".to_string()];
        let deny: Vec<String> = vec![];
        assert!(validate_shell_cmd("rm -rf /", &allowed, &deny).is_err());
    }

    #[test]
    fn shell_validation_accepts_quoted_args() {
        let allowed = vec!["echo".to_string()];
        let deny: Vec<String> = vec![];
        let tokens = validate_shell_cmd("echo \"hello world\"", &allowed, &deny).unwrap();
        assert_eq!(tokens, vec!["echo".to_string(), "hello world".to_string()]);
    }

    #[test]
    fn shell_validation_rejects_deny_prefix_token() {
        let allowed = vec!["ls".to_string()];
        let deny = vec!["rm".to_string()];
        assert!(validate_shell_cmd("ls rmrf", &allowed, &deny).is_err());
    }
}
