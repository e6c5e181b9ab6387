//! Name→factory backend registry (spec §4.14), mirroring the shape of
//! `cr_tools::ToolRegistry`.

use std::sync::Arc;

use cr_domain::{Error, Result};

use crate::fake::FakeBackend;
use crate::llama_server::LlamaServerBackend;
use crate::traits::Backend;

/// Construct the named backend, reading its configuration from the
/// environment (spec §6). Unlike the tool registry, backends are not
/// pre-registered: each is a one-shot construction keyed by name.
pub fn build_backend(name: &str) -> Result<Arc<dyn Backend>> {
    match name.to_ascii_lowercase().as_str() {
        "fake" => Ok(Arc::new(FakeBackend::from_env()?)),
        "llama" => Ok(Arc::new(LlamaServerBackend::from_env()?)),
        other => Err(Error::Config(format!(
            "unknown backend '{other}'. Available backends: fake, llama"
        ))),
    }
}

pub fn list_backends() -> Vec<&'static str> {
    vec!["fake", "llama"]
}

/// Convenience wrapper when a caller wants to hold a backend by name
/// alongside its constructed instance.
pub struct BackendRegistry {
    pub name: String,
    pub backend: Arc<dyn Backend>,
}

impl BackendRegistry {
    pub fn resolve(name: &str) -> Result<Self> {
        Ok(Self { name: name.to_string(), backend: build_backend(name)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let err = build_backend("nonexistent").unwrap_err();
        assert!(err.to_string().contains("unknown backend"));
    }

    #[test]
    fn fake_backend_resolves() {
        let registry = BackendRegistry::resolve("fake").unwrap();
        assert_eq!(registry.name, "fake");
    }
}
