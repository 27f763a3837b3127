//! Input Resources
//!
//! Input specifications arrive as heterogeneous [`ResourceCollection`]s. The
//! [`ResourceResolver`] folds them into one [`ResourceGroup`] per base directory, plus one
//! explicit [`GroupKey::Unrooted`] group for entries addressed by absolute path, and expands
//! every group into a sorted list of files.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::fs;

use crate::error::{Result, SchematronError};
use crate::runner::OutcomePolicy;

/// One element reported by a resource collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    /// Path relative to `base_dir`, or the full path when there is no base directory
    pub name: String,
    pub is_directory: bool,
    pub exists: bool,
    pub base_dir: Option<PathBuf>,
}

/// A source of input resources
#[async_trait]
pub trait ResourceCollection: Send + Sync + fmt::Debug {
    /// Whether every element of this collection lives on the local filesystem
    fn is_filesystem_only(&self) -> bool;

    async fn entries(&self) -> Result<Vec<ResourceEntry>>;
}

/// Files below a directory matching glob patterns
#[derive(Debug, Clone)]
pub struct FileSet {
    dir: PathBuf,
    includes: Vec<String>,
}

impl FileSet {
    pub fn new(dir: impl Into<PathBuf>, includes: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            includes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build a file set from a pattern such as `data/**/*.xml`, rooted at its literal prefix
    pub fn from_pattern(spec: &str) -> Self {
        let mut dir = PathBuf::new();
        let mut rest = Vec::new();
        for part in spec.split('/') {
            if rest.is_empty() && !has_glob_meta(part) {
                if part.is_empty() && dir.as_os_str().is_empty() {
                    dir.push("/");
                } else if !part.is_empty() {
                    dir.push(part);
                }
            } else {
                rest.push(part);
            }
        }
        if dir.as_os_str().is_empty() {
            dir.push(".");
        }
        Self::new(dir, vec![rest.join("/")])
    }
}

#[async_trait]
impl ResourceCollection for FileSet {
    fn is_filesystem_only(&self) -> bool {
        true
    }

    async fn entries(&self) -> Result<Vec<ResourceEntry>> {
        if fs::metadata(&self.dir).await.is_err() {
            return Ok(vec![ResourceEntry {
                name: self.dir.display().to_string(),
                is_directory: true,
                exists: false,
                base_dir: None,
            }]);
        }

        let matcher = build_glob_set(&self.includes)?;
        let files = scan_directory(&self.dir).await?;
        Ok(files
            .into_iter()
            .filter(|relative| matcher.is_match(relative))
            .map(|relative| ResourceEntry {
                name: relative,
                is_directory: false,
                exists: true,
                base_dir: Some(self.dir.clone()),
            })
            .collect())
    }
}

/// A single file or directory given by path
#[derive(Debug, Clone)]
pub struct PathResource {
    path: PathBuf,
}

impl PathResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResourceCollection for PathResource {
    fn is_filesystem_only(&self) -> bool {
        true
    }

    async fn entries(&self) -> Result<Vec<ResourceEntry>> {
        let path = std::path::absolute(&self.path).unwrap_or_else(|_| self.path.clone());
        let metadata = fs::metadata(&path).await.ok();
        Ok(vec![ResourceEntry {
            name: path.display().to_string(),
            is_directory: metadata.as_ref().is_some_and(|m| m.is_dir()),
            exists: metadata.is_some(),
            base_dir: None,
        }])
    }
}

/// A resource addressed by a non-file URL
#[derive(Debug, Clone)]
pub struct UrlResource {
    url: String,
}

impl UrlResource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ResourceCollection for UrlResource {
    fn is_filesystem_only(&self) -> bool {
        false
    }

    async fn entries(&self) -> Result<Vec<ResourceEntry>> {
        Ok(vec![ResourceEntry {
            name: self.url.clone(),
            is_directory: false,
            exists: true,
            base_dir: None,
        }])
    }
}

/// Turn a command line input spec into a collection
pub fn collection_from_spec(spec: &str) -> Box<dyn ResourceCollection> {
    if let Some((scheme, _)) = spec.split_once("://") {
        if scheme.eq_ignore_ascii_case("file") {
            return collection_from_spec(&spec[scheme.len() + 3..]);
        }
        return Box::new(UrlResource::new(spec));
    }
    if has_glob_meta(spec) {
        Box::new(FileSet::from_pattern(spec))
    } else {
        Box::new(PathResource::new(spec))
    }
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Identity of a resource group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    /// Canonical base directory
    BaseDir(PathBuf),
    /// Entries given directly by absolute path
    Unrooted,
}

/// Accumulated inclusions for one base directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGroup {
    pub files: BTreeSet<String>,
    /// Directories included recursively (`dir/**`)
    pub dirs: BTreeSet<String>,
}

impl ResourceGroup {
    /// The include patterns this group scans with
    pub fn patterns(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|file| literal_pattern(file))
            .chain(self.dirs.iter().map(|dir| match dir.as_str() {
                "." => "**".to_string(),
                dir => format!("{}/**", literal_pattern(dir)),
            }))
            .collect()
    }
}

/// Glob matching exactly `name`
fn literal_pattern(name: &str) -> String {
    let mut pattern = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '*' | '?' | '[' | ']' | '{' | '}' => {
                pattern.push('[');
                pattern.push(c);
                pattern.push(']');
            }
            c => pattern.push(c),
        }
    }
    pattern
}

/// A file to validate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    /// Path used to name the SVRL report
    pub relative: PathBuf,
}

/// Folds resource collections into groups and expands them
#[derive(Debug, Clone, Copy)]
pub struct ResourceResolver {
    policy: OutcomePolicy,
}

impl ResourceResolver {
    pub fn new(policy: OutcomePolicy) -> Self {
        Self { policy }
    }

    /// Group the entries of `collections` by base directory.
    ///
    /// A collection that is not filesystem backed is rejected outright. A missing entry is
    /// routed through the fail policy and skipped when the policy lets the batch continue.
    pub async fn resolve(
        &self,
        collections: &[Box<dyn ResourceCollection>],
    ) -> Result<BTreeMap<GroupKey, ResourceGroup>> {
        let mut groups: BTreeMap<GroupKey, ResourceGroup> = BTreeMap::new();

        for collection in collections {
            if !collection.is_filesystem_only() {
                return Err(SchematronError::Resolution(format!(
                    "Only filesystem resources are supported: {:?}",
                    collection
                )));
            }

            for entry in collection.entries().await? {
                if !entry.exists {
                    self.policy.route(&format!(
                        "Resource '{}' does not exist",
                        entry.base_dir.as_ref().map_or_else(
                            || entry.name.clone(),
                            |base| base.join(&entry.name).display().to_string()
                        )
                    ))?;
                    continue;
                }

                let key = match &entry.base_dir {
                    Some(base) => GroupKey::BaseDir(
                        fs::canonicalize(base).await.unwrap_or_else(|_| base.clone()),
                    ),
                    None => GroupKey::Unrooted,
                };
                let group = groups.entry(key).or_default();
                if entry.is_directory {
                    group.dirs.insert(entry.name);
                } else {
                    group.files.insert(entry.name);
                }
            }
        }

        Ok(groups)
    }

    /// Expand one group into a sorted, deduplicated file list
    pub async fn expand(&self, key: &GroupKey, group: &ResourceGroup) -> Result<Vec<ResolvedFile>> {
        let mut files = Vec::new();
        match key {
            GroupKey::BaseDir(base) => {
                let matcher = build_glob_set(&group.patterns())?;
                for relative in scan_directory(base).await? {
                    if matcher.is_match(&relative) {
                        files.push(ResolvedFile {
                            path: base.join(&relative),
                            relative: PathBuf::from(relative),
                        });
                    }
                }
            }
            GroupKey::Unrooted => {
                for file in &group.files {
                    let path = PathBuf::from(file);
                    files.push(ResolvedFile {
                        relative: strip_root(&path),
                        path,
                    });
                }
                for dir in &group.dirs {
                    let dir = PathBuf::from(dir);
                    for relative in scan_directory(&dir).await? {
                        let path = dir.join(relative);
                        files.push(ResolvedFile {
                            relative: strip_root(&path),
                            path,
                        });
                    }
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        Ok(files)
    }

    /// Resolve and expand every collection, group by group
    pub async fn resolve_files(
        &self,
        collections: &[Box<dyn ResourceCollection>],
    ) -> Result<Vec<ResolvedFile>> {
        let groups = self.resolve(collections).await?;
        let mut files = Vec::new();
        for (key, group) in &groups {
            let expanded = self.expand(key, group).await?;
            log::debug!("Resolved {} file(s) for {:?}", expanded.len(), key);
            files.extend(expanded);
        }
        Ok(files)
    }
}

fn strip_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                SchematronError::Config(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SchematronError::Config(format!("Failed to build include glob set: {}", e)))
}

/// All regular files below `root`, as sorted `/`-separated relative paths.
///
/// Symbolic links are followed. A directory reached a second time (through a link) is not
/// scanned again, which also stops link cycles.
async fn scan_directory(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    visited.insert(fs::canonicalize(root).await?);
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let mut read_dir = fs::read_dir(root.join(&relative)).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let mut file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                match fs::metadata(entry.path()).await {
                    Ok(target) => file_type = target.file_type(),
                    Err(e) => {
                        log::warn!(
                            "Skipping broken symbolic link '{}': {}",
                            entry.path().display(),
                            e
                        );
                        continue;
                    }
                }
            }

            let child = relative.join(entry.file_name());
            if file_type.is_dir() {
                if visited.insert(fs::canonicalize(entry.path()).await?) {
                    pending.push(child);
                } else {
                    log::debug!("Directory '{}' already scanned", entry.path().display());
                }
            } else if file_type.is_file() {
                let parts: Vec<String> = child
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
        }
    }

    files.sort();
    Ok(files)
}
