//! Entity and URI Resolution
//!
//! External references met while compiling a rule document (`sch:include`, `sch:extends/@href`)
//! and while parsing input documents (external DTD subsets) are looked up through an
//! [`EntityResolver`]. The default resolver works relative to the referencing document or a
//! configured base directory; the catalog resolver maps well-known system identifiers to
//! local files first.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ResolveError;

/// The content behind a resolved external reference
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    /// Where the content was read from; nested references resolve relative to it
    pub location: PathBuf,
    pub content: String,
}

/// Resolves a system identifier against an optional base directory
pub trait EntityResolver: Send + Sync + Debug {
    fn resolve(&self, system_id: &str, base: Option<&Path>) -> Result<ResolvedEntity, ResolveError>;
}

fn uri_scheme_regex() -> &'static Regex {
    static SCHEME_REGEX: OnceLock<Regex> = OnceLock::new();
    SCHEME_REGEX.get_or_init(|| {
        Regex::new(r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*)://").expect("Invalid regex pattern")
    })
}

/// Strip a `file://` scheme; other schemes are rejected
pub fn system_id_to_path(system_id: &str) -> Result<PathBuf, ResolveError> {
    match uri_scheme_regex().captures(system_id) {
        Some(caps) if caps["scheme"].eq_ignore_ascii_case("file") => {
            Ok(PathBuf::from(&system_id[caps[0].len()..]))
        }
        Some(_) => Err(ResolveError::UnsupportedScheme(system_id.to_string())),
        None => Ok(PathBuf::from(system_id)),
    }
}

/// Resolves relative to the referencing document, then to the configured base directory
#[derive(Debug, Clone, Default)]
pub struct DefaultEntityResolver {
    base_dir: Option<PathBuf>,
}

impl DefaultEntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn locate(&self, system_id: &str, base: Option<&Path>) -> Result<PathBuf, ResolveError> {
        let path = system_id_to_path(system_id)?;
        if path.is_absolute() {
            return Ok(path);
        }
        match base.or(self.base_dir.as_deref()) {
            Some(dir) => Ok(dir.join(path)),
            None => Ok(path),
        }
    }
}

impl EntityResolver for DefaultEntityResolver {
    fn resolve(&self, system_id: &str, base: Option<&Path>) -> Result<ResolvedEntity, ResolveError> {
        let location = self.locate(system_id, base)?;
        if !location.is_file() {
            return Err(ResolveError::NotFound {
                system_id: system_id.to_string(),
                path: location,
            });
        }
        let content = std::fs::read_to_string(&location).map_err(|e| ResolveError::Unreadable {
            system_id: system_id.to_string(),
            details: e.to_string(),
        })?;
        Ok(ResolvedEntity { location, content })
    }
}

/// Exact system-id lookup table with a fallback resolver
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    entries: HashMap<String, PathBuf>,
    fallback: DefaultEntityResolver,
}

impl CatalogResolver {
    pub fn new(fallback: DefaultEntityResolver) -> Self {
        Self {
            entries: HashMap::new(),
            fallback,
        }
    }

    pub fn with_entry(mut self, system_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.add_entry(system_id, path);
        self
    }

    pub fn add_entry(&mut self, system_id: impl Into<String>, path: impl Into<PathBuf>) {
        self.entries.insert(system_id.into(), path.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EntityResolver for CatalogResolver {
    fn resolve(&self, system_id: &str, base: Option<&Path>) -> Result<ResolvedEntity, ResolveError> {
        match self.entries.get(system_id) {
            Some(mapped) => {
                log::debug!("Catalog maps '{}' to {}", system_id, mapped.display());
                self.fallback.resolve(&mapped.to_string_lossy(), None)
            }
            None => self.fallback.resolve(system_id, base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_system_id_to_path() {
        assert_eq!(
            system_id_to_path("file:///tmp/a.dtd").unwrap(),
            PathBuf::from("/tmp/a.dtd")
        );
        assert_eq!(
            system_id_to_path("common/a.sch").unwrap(),
            PathBuf::from("common/a.sch")
        );
        assert!(matches!(
            system_id_to_path("http://example.com/a.dtd"),
            Err(ResolveError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_default_resolver_prefers_referencing_document() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("part.sch"), "nested").unwrap();
        std::fs::write(temp_dir.path().join("part.sch"), "top").unwrap();

        let resolver = DefaultEntityResolver::with_base_dir(temp_dir.path());
        let from_base = resolver.resolve("part.sch", None).unwrap();
        assert_eq!(from_base.content, "top");

        let from_nested = resolver.resolve("part.sch", Some(&nested)).unwrap();
        assert_eq!(from_nested.content, "nested");
        assert_eq!(from_nested.location, nested.join("part.sch"));
    }

    #[test]
    fn test_default_resolver_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = DefaultEntityResolver::new();
        let result = resolver.resolve("missing.dtd", Some(temp_dir.path()));
        assert!(matches!(result, Err(ResolveError::NotFound { .. })));
    }

    #[test]
    fn test_catalog_resolver_maps_system_ids() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("local.dtd");
        std::fs::write(&local, "<!ENTITY x 'y'>").unwrap();

        let resolver = CatalogResolver::new(DefaultEntityResolver::new())
            .with_entry("http://example.com/remote.dtd", &local);
        assert_eq!(resolver.len(), 1);

        let resolved = resolver
            .resolve("http://example.com/remote.dtd", None)
            .unwrap();
        assert_eq!(resolved.location, local);

        let unmapped = resolver.resolve("http://example.com/other.dtd", None);
        assert!(matches!(unmapped, Err(ResolveError::UnsupportedScheme(_))));
    }
}
