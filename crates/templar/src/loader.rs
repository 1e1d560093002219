//! Template loaders.
//!
//! A [`Loader`] fetches the raw content of a template path. Loaders are
//! registered per extension key; several loaders for the same key form a chain
//! that is tried in registration order.
//!
//! # Load Results
//!
//! Loading yields a [`LoadedTemplate`]:
//!
//! - `Inline`: the content itself (in-memory templates, generated content)
//! - `File`: a filesystem path, read on demand so edits are picked up on the
//!   next render and engines can compile files natively
//!
//! # Filesystem Fallback
//!
//! When template root folders are configured, the [`LoaderRegistry`] seeds
//! every extension's chain with a [`FileSystemLoader`]. Inserting a loader in
//! front of it keeps the filesystem as a fallback; replacing the chain removes
//! it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{RegistrationError, Result, TplError};
use crate::resolve::{validate_extension, ExtensionMatch, Suffixes};

/// The outcome of a successful [`Loader::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedTemplate {
    /// Template content held in memory.
    Inline(String),

    /// Template stored on disk at the given path.
    File(PathBuf),
}

impl LoadedTemplate {
    /// Returns the template content, reading it from disk if necessary.
    pub fn read(&self) -> Result<String> {
        match self {
            LoadedTemplate::Inline(content) => Ok(content.clone()),
            LoadedTemplate::File(path) => {
                std::fs::read_to_string(path).map_err(|e| TplError::io(path, e))
            }
        }
    }

    /// Returns the raw bytes of the template.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match self {
            LoadedTemplate::Inline(content) => Ok(content.as_bytes().to_vec()),
            LoadedTemplate::File(path) => std::fs::read(path).map_err(|e| TplError::io(path, e)),
        }
    }
}

/// Capability to fetch raw template content.
///
/// Implementations must be safe to share between threads: a finalized
/// pipeline calls loaders concurrently without locking.
pub trait Loader: Send + Sync {
    /// Loads `path`.
    ///
    /// Returns [`TplError::TemplateNotFound`] if this loader does not know the
    /// path. Chains treat that error as "try the next loader".
    fn load(&self, path: &str) -> Result<LoadedTemplate>;

    /// Every path this loader can load.
    fn paths(&self) -> Vec<String>;

    /// Whether [`load`](Self::load) would succeed for `path`.
    fn exists(&self, path: &str) -> bool {
        self.load(path).is_ok()
    }

    /// A string that changes whenever the content of `path` changes.
    ///
    /// The default hashes the loaded bytes with SHA-256.
    fn hash(&self, path: &str) -> Result<String> {
        let bytes = self.load(path)?.bytes()?;
        Ok(content_hash(&bytes))
    }
}

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Loads templates from one or more root folders.
///
/// Root folders are searched in order; the first one containing the path
/// wins. Paths escaping a root folder (via `..`) are never loaded.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    rootdirs: Vec<PathBuf>,
    extension: Option<String>,
}

impl FileSystemLoader {
    /// Creates a loader for files ending in `.{extension}`.
    ///
    /// Without an extension the loader accepts every file; this is what the
    /// registry uses as its default loader.
    pub fn new(rootdirs: Vec<PathBuf>, extension: Option<String>) -> Self {
        Self {
            rootdirs,
            extension,
        }
    }

    /// The root folders, in search order.
    pub fn rootdirs(&self) -> &[PathBuf] {
        &self.rootdirs
    }

    /// The extension this loader lists paths for.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    fn matches_extension(&self, name: &str) -> bool {
        match &self.extension {
            Some(extension) => {
                let wanted: Vec<&str> = extension.split('.').collect();
                Suffixes::parse(name).segments().ends_with(&wanted)
            }
            None => true,
        }
    }
}

/// Joins a template path onto `root`, refusing paths that leave it.
pub(crate) fn safe_join(root: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    let mut joined = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(joined)
}

impl Loader for FileSystemLoader {
    fn load(&self, path: &str) -> Result<LoadedTemplate> {
        self.rootdirs
            .iter()
            .filter_map(|root| safe_join(root, path))
            .find(|full| full.is_file())
            .map(LoadedTemplate::File)
            .ok_or_else(|| TplError::TemplateNotFound(path.to_string()))
    }

    fn paths(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for root in &self.rootdirs {
            let mut found = Vec::new();
            walk_dir_recursive(root, root, &mut HashSet::new(), &mut found);
            for path in found {
                if self.matches_extension(&path) && seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }
        paths
    }
}

/// Collects every file below `current` as a `/`-separated path relative to `root`.
///
/// Folders reached twice through symlinks are walked once.
fn walk_dir_recursive(
    current: &Path,
    root: &Path,
    visited: &mut HashSet<PathBuf>,
    files: &mut Vec<String>,
) {
    match current.canonicalize() {
        Ok(canonical) if !visited.insert(canonical.clone()) => return,
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("unreadable template folder {}: {e}", current.display());
            return;
        }
    }
    let entries = match std::fs::read_dir(current) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("unreadable template folder {}: {e}", current.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_dir_recursive(&path, root, visited, files);
        } else if path.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                files.push(
                    relative
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "/"),
                );
            }
        } else {
            tracing::warn!("unreadable template path: {}", path.display());
        }
    }
}

/// In-memory templates keyed by path.
#[derive(Debug, Clone, Default)]
pub struct InlineLoader {
    templates: HashMap<String, String>,
}

impl InlineLoader {
    /// Creates an empty inline loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader from `(path, content)` pairs.
    pub fn from_entries(entries: &[(&str, &str)]) -> Self {
        let mut loader = Self::new();
        for (path, content) in entries {
            loader.add(*path, *content);
        }
        loader
    }

    /// Adds or replaces a template.
    pub fn add(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.templates.insert(path.into(), content.into());
    }
}

impl Loader for InlineLoader {
    fn load(&self, path: &str) -> Result<LoadedTemplate> {
        self.templates
            .get(path)
            .map(|content| LoadedTemplate::Inline(content.clone()))
            .ok_or_else(|| TplError::TemplateNotFound(path.to_string()))
    }

    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.templates.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn exists(&self, path: &str) -> bool {
        self.templates.contains_key(path)
    }
}

/// Combines several loaders: a path is loaded by the first one knowing it.
pub struct ChainLoader {
    loaders: Vec<Arc<dyn Loader>>,
}

impl ChainLoader {
    /// Wraps `loaders`, tried in the given order.
    pub fn new(loaders: Vec<Arc<dyn Loader>>) -> Self {
        Self { loaders }
    }

    /// Number of wrapped loaders.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Whether the chain wraps no loaders.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl Loader for ChainLoader {
    fn load(&self, path: &str) -> Result<LoadedTemplate> {
        for loader in &self.loaders {
            match loader.load(path) {
                Err(TplError::TemplateNotFound(_)) => continue,
                result => return result,
            }
        }
        Err(TplError::TemplateNotFound(path.to_string()))
    }

    fn paths(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.loaders
            .iter()
            .flat_map(|loader| loader.paths())
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    fn exists(&self, path: &str) -> bool {
        self.loaders.iter().any(|loader| loader.exists(path))
    }

    fn hash(&self, path: &str) -> Result<String> {
        for loader in &self.loaders {
            match loader.hash(path) {
                Err(TplError::TemplateNotFound(_)) => continue,
                result => return result,
            }
        }
        Err(TplError::TemplateNotFound(path.to_string()))
    }
}

impl fmt::Debug for ChainLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLoader")
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

/// Mutable loader registry used while configuring a pipeline.
pub struct LoaderRegistry {
    rootdirs: Vec<PathBuf>,
    chains: HashMap<String, Vec<Arc<dyn Loader>>>,
    default: Option<Arc<dyn Loader>>,
}

impl LoaderRegistry {
    /// Creates a registry whose chains fall back to `rootdirs`.
    pub fn new(rootdirs: Vec<PathBuf>) -> Self {
        Self {
            rootdirs,
            chains: HashMap::new(),
            default: None,
        }
    }

    /// Returns the loader chain for `extension`, creating it if needed.
    ///
    /// A new chain starts with a [`FileSystemLoader`] for the configured root
    /// folders (if any).
    pub fn chain_mut(
        &mut self,
        extension: &str,
    ) -> std::result::Result<&mut Vec<Arc<dyn Loader>>, RegistrationError> {
        validate_extension(extension)?;
        let rootdirs = &self.rootdirs;
        Ok(self
            .chains
            .entry(extension.to_string())
            .or_insert_with(|| seed_chain(rootdirs, extension)))
    }

    /// Appends `loader` to the chain for `extension`.
    pub fn add<L: Loader + 'static>(
        &mut self,
        extension: &str,
        loader: L,
    ) -> std::result::Result<(), RegistrationError> {
        self.chain_mut(extension)?.push(Arc::new(loader));
        Ok(())
    }

    /// Sets the loader used when no extension key matches.
    pub fn set_default<L: Loader + 'static>(&mut self, loader: L) {
        self.default = Some(Arc::new(loader));
    }

    /// Whether a chain exists for `extension`.
    pub fn contains(&self, extension: &str) -> bool {
        self.chains.contains_key(extension)
    }

    /// Freezes the registry.
    ///
    /// `extensions` lists the file type and engine extensions: each one
    /// without a chain gets a filesystem-only chain. Empty chains are dropped.
    pub fn finalize<'e>(mut self, extensions: impl IntoIterator<Item = &'e str>) -> LoaderIndex {
        if !self.rootdirs.is_empty() {
            for extension in extensions {
                if !self.chains.contains_key(extension) {
                    let chain = seed_chain(&self.rootdirs, extension);
                    self.chains.insert(extension.to_string(), chain);
                }
            }
        }

        let default = self.default.take().or_else(|| {
            (!self.rootdirs.is_empty()).then(|| {
                Arc::new(FileSystemLoader::new(self.rootdirs.clone(), None)) as Arc<dyn Loader>
            })
        });

        let by_extension = self
            .chains
            .into_iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(extension, mut chain)| {
                let loader = if chain.len() == 1 {
                    chain.remove(0)
                } else {
                    Arc::new(ChainLoader::new(chain)) as Arc<dyn Loader>
                };
                (extension, loader)
            })
            .collect();

        LoaderIndex {
            by_extension,
            default,
        }
    }
}

fn seed_chain(rootdirs: &[PathBuf], extension: &str) -> Vec<Arc<dyn Loader>> {
    if rootdirs.is_empty() {
        return Vec::new();
    }
    vec![Arc::new(FileSystemLoader::new(
        rootdirs.to_vec(),
        Some(extension.to_string()),
    ))]
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("rootdirs", &self.rootdirs)
            .field("extensions", &self.chains.keys().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Read-only loader lookup produced by [`LoaderRegistry::finalize`].
#[derive(Clone)]
pub struct LoaderIndex {
    by_extension: HashMap<String, Arc<dyn Loader>>,
    default: Option<Arc<dyn Loader>>,
}

impl LoaderIndex {
    /// Whether a loader is registered for `extension`.
    pub fn contains_extension(&self, extension: &str) -> bool {
        self.by_extension.contains_key(extension)
    }

    /// Registered extension keys.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(String::as_str)
    }

    /// Resolves the loader for `suffixes`.
    ///
    /// The match is `None` when the default loader was used.
    pub fn resolve(&self, suffixes: &Suffixes<'_>) -> Option<(Arc<dyn Loader>, Option<ExtensionMatch>)> {
        match suffixes.resolve(|key| self.by_extension.contains_key(key)) {
            Some(found) => {
                let loader = Arc::clone(&self.by_extension[&found.key]);
                Some((loader, Some(found)))
            }
            None => self.default.clone().map(|loader| (loader, None)),
        }
    }

    /// Every known path, across all loaders, without duplicates.
    pub fn paths(&self) -> Vec<String> {
        let mut keys: Vec<&String> = self.by_extension.keys().collect();
        keys.sort();
        let mut seen = HashSet::new();
        keys.into_iter()
            .map(|key| &self.by_extension[key])
            .chain(self.default.iter())
            .flat_map(|loader| loader.paths())
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }
}

impl fmt::Debug for LoaderIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderIndex")
            .field("extensions", &self.by_extension.keys().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}
