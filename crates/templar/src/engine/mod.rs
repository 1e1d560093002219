//! Template engines and the renderers they build.
//!
//! An [`Engine`] is registered for an extension key (`jinja2`, `j2`, ...). It
//! never renders anything itself: for each target [`FileType`] it builds a
//! [`Renderer`] bound to that file type, so an engine can, for example,
//! auto-escape HTML output but not CSS output.
//!
//! # Renderer Memoization
//!
//! A finalized pipeline builds at most one renderer per (engine, mime type)
//! pair. The first render that needs a pair creates it; concurrent first uses
//! wait for that single construction instead of racing. Renderers are then
//! shared by every render call, so they must be usable through `&self` from
//! several threads at once.
//!
//! # Built-in Engines
//!
//! | Name | Type | Syntax |
//! |------|------|--------|
//! | `minijinja` | [`MiniJinjaEngine`] | Jinja2 (`{{ var }}`, `{% for %}`, ...) |
//! | `simple` | [`SimpleEngine`] | `{var}` substitution only |

pub mod jinja;
pub mod simple;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{RegistrationError, Result, TplError};
use crate::filetype::FileType;
use crate::resolve::{resolve_chain, validate_extension, ExtensionMatch};

pub use self::jinja::{MiniJinjaEngine, MiniJinjaRenderer};
pub use self::simple::{SimpleEngine, SimpleRenderer};

/// Variables passed to a renderer.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Settings shared with every engine when it builds a renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineContext {
    rootdirs: Vec<PathBuf>,
    cachedir: Option<PathBuf>,
}

impl EngineContext {
    /// Creates a context from template root folders and an optional cache folder.
    pub fn new(rootdirs: Vec<PathBuf>, cachedir: Option<PathBuf>) -> Self {
        Self { rootdirs, cachedir }
    }

    /// Template root folders, in search order.
    pub fn rootdirs(&self) -> &[PathBuf] {
        &self.rootdirs
    }

    /// Folder engines may use for compiled artifacts.
    pub fn cachedir(&self) -> Option<&Path> {
        self.cachedir.as_deref()
    }
}

/// Transforms template content for one engine and file type.
pub trait Renderer: Send + Sync {
    /// Renders `content`. `path` is the logical template path, if any.
    fn render_string(
        &self,
        content: &str,
        variables: &Variables,
        path: Option<&str>,
    ) -> Result<String>;

    /// Renders the template stored at `file`.
    ///
    /// Must produce the same output as [`render_string`](Self::render_string)
    /// on the file's content. The default reads the file and delegates.
    fn render_file(&self, file: &Path, variables: &Variables, path: Option<&str>) -> Result<String> {
        let content = std::fs::read_to_string(file).map_err(|e| TplError::io(file, e))?;
        self.render_string(&content, variables, path)
    }
}

/// Factory building a [`Renderer`] for a target file type.
///
/// Closures with the matching signature implement this trait.
pub trait Engine: Send + Sync {
    /// Builds the renderer for `filetype`.
    fn create_renderer(
        &self,
        context: &EngineContext,
        filetype: &FileType,
    ) -> Result<Arc<dyn Renderer>>;
}

impl<F> Engine for F
where
    F: Fn(&EngineContext, &FileType) -> Result<Arc<dyn Renderer>> + Send + Sync,
{
    fn create_renderer(
        &self,
        context: &EngineContext,
        filetype: &FileType,
    ) -> Result<Arc<dyn Renderer>> {
        (self)(context, filetype)
    }
}

/// Looks up a built-in engine by name.
pub fn builtin(name: &str) -> Option<Arc<dyn Engine>> {
    match name {
        "minijinja" | "jinja2" => Some(Arc::new(MiniJinjaEngine::new())),
        "simple" => Some(Arc::new(SimpleEngine::new())),
        _ => None,
    }
}

/// Mutable engine registry used while configuring a pipeline.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Vec<(String, Arc<dyn Engine>)>,
}

impl EngineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `engine` for `extension`.
    ///
    /// # Errors
    ///
    /// Fails for invalid extensions and for extensions that already have an engine.
    pub fn register(
        &mut self,
        extension: &str,
        engine: Arc<dyn Engine>,
    ) -> std::result::Result<(), RegistrationError> {
        validate_extension(extension)?;
        if self.contains(extension) {
            return Err(RegistrationError::DuplicateEngine(extension.to_string()));
        }
        self.engines.push((extension.to_string(), engine));
        Ok(())
    }

    /// Whether an engine is registered for `extension`.
    pub fn contains(&self, extension: &str) -> bool {
        self.engines.iter().any(|(ext, _)| ext == extension)
    }

    /// Registered extensions in registration order.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.engines.iter().map(|(ext, _)| ext.as_str())
    }

    /// Number of registered engines.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether no engines are registered.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Freezes the registry, preparing one renderer slot per mime type.
    ///
    /// An engine registered under several extensions shares its slots, so it
    /// builds at most one renderer per mime type.
    pub fn finalize<'m>(self, mimetypes: impl IntoIterator<Item = &'m str>) -> EngineIndex {
        let mimetypes: Vec<&str> = mimetypes.into_iter().collect();
        let mut built: Vec<(*const (), Arc<RendererCells>)> = Vec::new();
        let mut slots = HashMap::with_capacity(self.engines.len());

        for (extension, engine) in self.engines {
            let identity = Arc::as_ptr(&engine) as *const ();
            let renderers = match built.iter().find(|(ptr, _)| *ptr == identity) {
                Some((_, renderers)) => Arc::clone(renderers),
                None => {
                    let renderers: Arc<RendererCells> = Arc::new(
                        mimetypes
                            .iter()
                            .map(|mimetype| (mimetype.to_string(), OnceCell::new()))
                            .collect(),
                    );
                    built.push((identity, Arc::clone(&renderers)));
                    renderers
                }
            };
            slots.insert(extension, EngineSlot { engine, renderers });
        }
        EngineIndex { slots }
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("extensions", &self.extensions().collect::<Vec<_>>())
            .finish()
    }
}

type RendererCells = HashMap<String, OnceCell<Arc<dyn Renderer>>>;

struct EngineSlot {
    engine: Arc<dyn Engine>,
    renderers: Arc<RendererCells>,
}

/// Read-only engine lookup with memoized renderers.
pub struct EngineIndex {
    slots: HashMap<String, EngineSlot>,
}

impl EngineIndex {
    /// Whether an engine is registered for `extension`.
    pub fn contains_extension(&self, extension: &str) -> bool {
        self.slots.contains_key(extension)
    }

    /// Registered extension keys.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Resolves the engine chain for `segments`, innermost engine first.
    pub fn resolve_chain(&self, segments: &[&str]) -> Vec<ExtensionMatch> {
        resolve_chain(segments, |key| self.slots.contains_key(key))
    }

    /// Returns the renderer of the engine at `extension` for `filetype`,
    /// building it on first use.
    pub fn renderer(
        &self,
        extension: &str,
        filetype: &FileType,
        context: &EngineContext,
    ) -> Result<Arc<dyn Renderer>> {
        let slot = self
            .slots
            .get(extension)
            .ok_or_else(|| TplError::Config(format!("no engine for extension '{extension}'")))?;
        let cell = slot.renderers.get(filetype.mimetype()).ok_or_else(|| {
            TplError::Config(format!(
                "file type '{}' was not registered when the pipeline was finalized",
                filetype.mimetype()
            ))
        })?;
        let renderer = cell.get_or_try_init(|| {
            tracing::debug!(
                engine = extension,
                mimetype = filetype.mimetype(),
                "creating renderer"
            );
            slot.engine.create_renderer(context, filetype)
        })?;
        Ok(Arc::clone(renderer))
    }
}

impl fmt::Debug for EngineIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineIndex")
            .field("extensions", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upper;

    impl Renderer for Upper {
        fn render_string(&self, content: &str, _: &Variables, _: Option<&str>) -> Result<String> {
            Ok(content.to_uppercase())
        }
    }

    fn counting_engine(counter: Arc<AtomicUsize>) -> Arc<dyn Engine> {
        Arc::new(move |_: &EngineContext, _: &FileType| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Arc<dyn Renderer>, TplError>(Arc::new(Upper))
        })
    }

    #[test]
    fn test_register_duplicate_engine() {
        let mut registry = EngineRegistry::new();
        registry
            .register("jinja2", Arc::new(MiniJinjaEngine::new()))
            .unwrap();
        let err = registry
            .register("jinja2", Arc::new(SimpleEngine::new()))
            .unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateEngine("jinja2".into()));
    }

    #[test]
    fn test_register_invalid_extension() {
        let mut registry = EngineRegistry::new();
        assert!(registry
            .register(".jinja2", Arc::new(SimpleEngine::new()))
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_renderer_memoized_per_mimetype() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = EngineRegistry::new();
        registry
            .register("up", counting_engine(Arc::clone(&counter)))
            .unwrap();
        let index = registry.finalize(["text/css", "text/html"]);
        let context = EngineContext::default();
        let css = FileType::new("text/css");
        let html = FileType::new("text/html");

        let first = index.renderer("up", &css, &context).unwrap();
        let second = index.renderer("up", &css, &context).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        index.renderer("up", &html, &context).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_engine_shared_between_extensions_builds_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = counting_engine(Arc::clone(&counter));
        let mut registry = EngineRegistry::new();
        registry.register("j2", Arc::clone(&engine)).unwrap();
        registry.register("jinja2", engine).unwrap();
        registry
            .register("other", counting_engine(Arc::clone(&counter)))
            .unwrap();
        let index = registry.finalize(["text/plain"]);
        let filetype = FileType::new("text/plain");
        let context = EngineContext::default();

        let short = index.renderer("j2", &filetype, &context).unwrap();
        let long = index.renderer("jinja2", &filetype, &context).unwrap();
        assert!(Arc::ptr_eq(&short, &long));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        index.renderer("other", &filetype, &context).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_renderer_single_flight_across_threads() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = EngineRegistry::new();
        registry
            .register("up", counting_engine(Arc::clone(&counter)))
            .unwrap();
        let index = Arc::new(registry.finalize(["text/plain"]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    let filetype = FileType::new("text/plain");
                    index
                        .renderer("up", &filetype, &EngineContext::default())
                        .unwrap()
                        .render_string("x", &Variables::new(), None)
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "X");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_factory_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut registry = EngineRegistry::new();
        registry
            .register(
                "flaky",
                Arc::new(move |_: &EngineContext, _: &FileType| {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TplError::render("<engine>", "not ready"))
                    } else {
                        Ok(Arc::new(Upper) as Arc<dyn Renderer>)
                    }
                }),
            )
            .unwrap();
        let index = registry.finalize(["text/plain"]);
        let filetype = FileType::new("text/plain");
        let context = EngineContext::default();

        assert!(index.renderer("flaky", &filetype, &context).is_err());
        assert!(index.renderer("flaky", &filetype, &context).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_renderer_unknown_mimetype() {
        let mut registry = EngineRegistry::new();
        registry
            .register("up", Arc::new(SimpleEngine::new()))
            .unwrap();
        let index = registry.finalize(["text/plain"]);
        let result = index.renderer("up", &FileType::new("text/css"), &EngineContext::default());
        assert!(matches!(result, Err(TplError::Config(_))));
    }

    #[test]
    fn test_builtin_engines() {
        assert!(builtin("minijinja").is_some());
        assert!(builtin("simple").is_some());
        assert!(builtin("php").is_none());
    }

    #[test]
    fn test_default_render_file_reads_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.up");
        std::fs::write(&file, "abc").unwrap();
        assert_eq!(
            Upper.render_file(&file, &Variables::new(), Some("a.up")).unwrap(),
            "ABC"
        );
    }
}
