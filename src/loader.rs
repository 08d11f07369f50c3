//! ABOUTME: The external Loader contract for `include`/`extends`/`import`
//!
//! Deliberately a thin trait (§1 "Deliberately out of scope: filesystem/HTTP
//! template loaders... only the... interface is core"). Grounded on the
//! teacher's habit of expressing a collaborator as a small trait object
//! stored behind `Rc` (see `MacroRegistry`/`Environment` composition in
//! `eval.rs`) rather than a generic parameter threaded through every call.

use crate::error::EngineError;

/// One loader response: the source text, the resolved path (used to resolve
/// further relative includes), and whether this result must never be cached.
#[derive(Debug, Clone)]
pub struct LoaderSource {
    pub src: String,
    pub path: String,
    pub no_cache: bool,
}

impl LoaderSource {
    pub fn new(src: impl Into<String>, path: impl Into<String>) -> Self {
        LoaderSource {
            src: src.into(),
            path: path.into(),
            no_cache: false,
        }
    }
}

/// `getSource(name) -> { src, path, noCache } | throws` from §6. Relative
/// names resolve against `from` (the current template's own resolved path),
/// mirroring the spec's "resolve against the current template's `path`".
pub trait Loader {
    fn get_source(&self, name: &str, from: Option<&str>) -> Result<LoaderSource, EngineError>;
}

/// A loader over an in-memory name->source table, useful for tests and for
/// embedding templates directly in a host program without touching a
/// filesystem (which stays a Non-goal of this crate per §1).
#[derive(Debug, Clone, Default)]
pub struct MapLoader {
    templates: std::collections::HashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, src: impl Into<String>) -> Self {
        self.templates.insert(name.into(), src.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, src: impl Into<String>) {
        self.templates.insert(name.into(), src.into());
    }
}

impl Loader for MapLoader {
    fn get_source(&self, name: &str, _from: Option<&str>) -> Result<LoaderSource, EngineError> {
        self.templates
            .get(name)
            .map(|src| LoaderSource::new(src.clone(), name.to_string()))
            .ok_or_else(|| EngineError::template_not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_loader_finds_registered_template() {
        let loader = MapLoader::new().with("a.html", "hello");
        let src = loader.get_source("a.html", None).unwrap();
        assert_eq!(src.src, "hello");
    }

    #[test]
    fn map_loader_reports_missing_template() {
        let loader = MapLoader::new();
        let err = loader.get_source("missing.html", None).unwrap_err();
        assert!(err.is_template_not_found());
    }
}
