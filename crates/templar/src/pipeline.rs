//! The rendering pipeline.
//!
//! Configuration happens on a mutable [`PipelineBuilder`]. Calling
//! [`PipelineBuilder::finalize`] validates the registries and produces a
//! [`Pipeline`], which is immutable and can be shared between threads.
//!
//! # Resolution
//!
//! For a path such as `pages/site.css.jinja2` the pipeline determines, in this
//! order:
//!
//! 1. **Loader**: the most specific loader key among the trailing suffixes, or
//!    the default loader if none matches.
//! 2. **Engine chain**: engine keys matched right to left, each match
//!    consuming its suffixes. If no engine matches and the loader was selected
//!    by a key, that key's suffixes are dropped and the chain is resolved
//!    again, so `file.tpl.xml` with a loader for `xml` renders through the
//!    `tpl` engine.
//! 3. **File type**: the suffixes left over by the engine chain (`css` above)
//!    are matched first, then all suffixes, then the default file type.
//!
//! # Execution
//!
//! The loaded content passes through the engine chain, innermost engine
//! first, then through the file type's post-processors. Variables given by the
//! caller are merged over the file type's globals. Any failure aborts the
//! render; partial output is never returned.
//!
//! # Example
//!
//! ```rust
//! use templar::{InlineLoader, PipelineBuilder, SimpleEngine};
//! use serde_json::json;
//!
//! let mut builder = PipelineBuilder::default();
//! builder.filetype("text/css").add_extension("css")?;
//! builder.add_loader(
//!     "fmt",
//!     InlineLoader::from_entries(&[("site.css.fmt", "body {{ color: {color}; }}")]),
//! )?;
//! builder.register_engine("fmt", SimpleEngine::new())?;
//! let pipeline = builder.finalize()?;
//!
//! let css = pipeline.render("site.css.fmt", &json!({"color": "red"}))?;
//! assert_eq!(css, "body { color: red; }");
//! assert_eq!(pipeline.mimetype("site.css.fmt")?, "text/css");
//! # Ok::<(), templar::TplError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::TplConfig;
use crate::engine::{builtin, Engine, EngineContext, EngineIndex, EngineRegistry, Renderer, Variables};
use crate::error::{RegistrationError, Result, TplError};
use crate::filetype::{FileType, FileTypeIndex, FileTypeRegistry};
use crate::loader::{LoadedTemplate, Loader, LoaderIndex, LoaderRegistry};
use crate::resolve::Suffixes;

/// Mutable pipeline configuration.
#[derive(Debug)]
pub struct PipelineBuilder {
    context: EngineContext,
    default_filetype: Option<String>,
    loaders: LoaderRegistry,
    filetypes: FileTypeRegistry,
    engines: EngineRegistry,
    generation: u64,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new(EngineContext::default())
    }
}

impl PipelineBuilder {
    /// Creates an empty builder.
    ///
    /// If `context` names template root folders, filesystem loaders for them
    /// are added automatically.
    pub fn new(context: EngineContext) -> Self {
        Self {
            loaders: LoaderRegistry::new(context.rootdirs().to_vec()),
            context,
            default_filetype: None,
            filetypes: FileTypeRegistry::new(),
            engines: EngineRegistry::new(),
            generation: 0,
        }
    }

    /// Creates a builder from `config`, registering its built-in engines.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not validate or names an unknown engine.
    pub fn from_config(config: &TplConfig) -> Result<Self> {
        config.validate()?;
        let context = EngineContext::new(config.rootdirs.clone(), config.cachedir.clone());
        let mut builder = Self::new(context);

        for (extension, name) in &config.engines {
            let engine = builtin(name).ok_or_else(|| RegistrationError::UnknownEngine {
                extension: extension.clone(),
                name: name.clone(),
            })?;
            builder.engines.register(extension, engine)?;
            builder.generation += 1;
        }
        if let Some(mimetype) = &config.default_format {
            builder.set_default_filetype(mimetype.as_str());
        }
        Ok(builder)
    }

    /// The settings handed to engines.
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Returns the file type for `mimetype`, creating it if needed.
    pub fn filetype(&mut self, mimetype: &str) -> &mut FileType {
        self.generation += 1;
        self.filetypes.get_or_create(mimetype)
    }

    /// The file types registered so far.
    pub fn filetypes(&self) -> &FileTypeRegistry {
        &self.filetypes
    }

    /// Returns the loader chain for `extension`.
    ///
    /// With root folders configured, a new chain starts with a filesystem
    /// loader: insert in front of it to keep it as a fallback, or replace the
    /// chain to disable it.
    pub fn loaders_mut(
        &mut self,
        extension: &str,
    ) -> std::result::Result<&mut Vec<Arc<dyn Loader>>, RegistrationError> {
        self.generation += 1;
        self.loaders.chain_mut(extension)
    }

    /// Appends `loader` to the chain for `extension`.
    pub fn add_loader<L: Loader + 'static>(
        &mut self,
        extension: &str,
        loader: L,
    ) -> std::result::Result<&mut Self, RegistrationError> {
        self.generation += 1;
        self.loaders.add(extension, loader)?;
        Ok(self)
    }

    /// Sets the loader used when no loader key matches a path.
    pub fn set_default_loader<L: Loader + 'static>(&mut self, loader: L) -> &mut Self {
        self.generation += 1;
        self.loaders.set_default(loader);
        self
    }

    /// Registers `engine` for `extension`.
    pub fn register_engine<E: Engine + 'static>(
        &mut self,
        extension: &str,
        engine: E,
    ) -> std::result::Result<&mut Self, RegistrationError> {
        self.register_shared_engine(extension, Arc::new(engine))
    }

    /// Registers an engine that may also serve other extensions.
    ///
    /// All extensions registered with the same `Arc` share one renderer per
    /// file type.
    pub fn register_shared_engine(
        &mut self,
        extension: &str,
        engine: Arc<dyn Engine>,
    ) -> std::result::Result<&mut Self, RegistrationError> {
        self.engines.register(extension, engine)?;
        self.generation += 1;
        Ok(self)
    }

    /// Sets the file type used when no extension selects one.
    pub fn set_default_filetype(&mut self, mimetype: impl Into<String>) -> &mut Self {
        self.generation += 1;
        self.default_filetype = Some(mimetype.into());
        self
    }

    /// Validates the configuration and freezes it.
    ///
    /// # Errors
    ///
    /// Fails when two file types claim one extension, when the default file
    /// type is not registered, or when engines exist without any file type.
    pub fn finalize(self) -> std::result::Result<Pipeline, RegistrationError> {
        if self.filetypes.is_empty() {
            if let Some(extension) = self.engines.extensions().next() {
                return Err(RegistrationError::EngineWithoutFileTypes(
                    extension.to_string(),
                ));
            }
        }

        let mut extensions: Vec<String> = self
            .filetypes
            .extensions()
            .chain(self.engines.extensions())
            .map(str::to_string)
            .collect();
        extensions.sort();
        extensions.dedup();

        let mimetypes: Vec<String> = self.filetypes.mimetypes().map(str::to_string).collect();
        let filetypes = self.filetypes.finalize(self.default_filetype.as_deref())?;
        let engines = self.engines.finalize(mimetypes.iter().map(String::as_str));
        let loaders = self.loaders.finalize(extensions.iter().map(String::as_str));

        tracing::info!(
            filetypes = mimetypes.len(),
            engines = engines.extensions().count(),
            loaders = loaders.extensions().count(),
            "template pipeline finalized"
        );

        Ok(Pipeline {
            context: self.context,
            loaders,
            filetypes,
            engines,
            generation: self.generation,
        })
    }
}

/// A finalized, read-only template pipeline.
#[derive(Debug)]
pub struct Pipeline {
    context: EngineContext,
    loaders: LoaderIndex,
    filetypes: FileTypeIndex,
    engines: EngineIndex,
    generation: u64,
}

/// Everything needed to render one path, resolved from the registries.
pub struct Resolution {
    loader: Option<Arc<dyn Loader>>,
    loader_key: Option<String>,
    filetype: Arc<FileType>,
    filetype_key: Option<String>,
    chain: Vec<(String, Arc<dyn Renderer>)>,
}

impl Resolution {
    /// The loader supplying the content; `None` for caller-supplied content.
    pub fn loader(&self) -> Option<&Arc<dyn Loader>> {
        self.loader.as_ref()
    }

    /// The loader key that matched; `None` if the default loader was used.
    pub fn loader_key(&self) -> Option<&str> {
        self.loader_key.as_deref()
    }

    /// The target file type.
    pub fn filetype(&self) -> &Arc<FileType> {
        &self.filetype
    }

    /// The file type key that matched; `None` for the default file type.
    pub fn filetype_key(&self) -> Option<&str> {
        self.filetype_key.as_deref()
    }

    /// The renderers to apply, innermost first.
    pub fn chain(&self) -> &[(String, Arc<dyn Renderer>)] {
        &self.chain
    }

    /// The engine keys of the chain, innermost first.
    pub fn engine_keys(&self) -> impl Iterator<Item = &str> {
        self.chain.iter().map(|(key, _)| key.as_str())
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("loader_key", &self.loader_key)
            .field("filetype", &self.filetype.mimetype())
            .field("filetype_key", &self.filetype_key)
            .field("chain", &self.engine_keys().collect::<Vec<_>>())
            .finish()
    }
}

// Resolution without renderers; engines are only instantiated when rendering.
struct Plan {
    loader: Option<Arc<dyn Loader>>,
    loader_key: Option<String>,
    filetype: Arc<FileType>,
    filetype_key: Option<String>,
    engines: Vec<String>,
}

impl Pipeline {
    /// The settings handed to engines.
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Looks up a file type by mime type.
    pub fn filetype(&self, mimetype: &str) -> Option<&Arc<FileType>> {
        self.filetypes.get(mimetype)
    }

    /// The default file type, if one is configured.
    pub fn default_filetype(&self) -> Option<&Arc<FileType>> {
        self.filetypes.default_filetype()
    }

    /// Resolves loader, file type and renderer chain for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TplError::TemplateNotFound`] if no loader or no file type
    /// applies, and any error raised while building a renderer.
    pub fn resolve(&self, path: &str) -> Result<Resolution> {
        let plan = self.plan(path, true)?;
        if plan.loader.is_none() {
            return Err(TplError::TemplateNotFound(path.to_string()));
        }
        self.instantiate(plan)
    }

    /// Loads and renders the template at `path`.
    ///
    /// `variables` must serialize to a map (or to null for no variables).
    pub fn render<T>(&self, path: &str, variables: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let resolution = self.resolve(path)?;
        let loaded = match resolution.loader() {
            Some(loader) => loader.load(path)?,
            None => return Err(TplError::TemplateNotFound(path.to_string())),
        };
        self.execute(&resolution, path, loaded, variables)
    }

    /// Renders `content` as if it had been loaded from `path`.
    ///
    /// The path is only used to pick the file type and engines; no loader
    /// is consulted.
    pub fn render_content<T>(&self, content: &str, path: &str, variables: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let plan = self.plan(path, false)?;
        let resolution = self.instantiate(plan)?;
        self.execute(
            &resolution,
            path,
            LoadedTemplate::Inline(content.to_string()),
            variables,
        )
    }

    /// The mime type `path` renders to.
    pub fn mimetype(&self, path: &str) -> Result<String> {
        Ok(self.plan(path, true)?.filetype.mimetype().to_string())
    }

    /// A cache key for the output of `path`.
    ///
    /// The key changes when the template content, the resolved file type or
    /// engine chain, or the configuration the pipeline was built from changes.
    pub fn hash(&self, path: &str) -> Result<String> {
        let plan = self.plan(path, true)?;
        let loader = plan
            .loader
            .as_ref()
            .ok_or_else(|| TplError::TemplateNotFound(path.to_string()))?;
        let content = loader.hash(path)?;

        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.generation.to_le_bytes());
        hasher.update(plan.filetype.mimetype().as_bytes());
        hasher.update([0u8]);
        hasher.update(plan.engines.join(".").as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Every known template path, sorted.
    ///
    /// With a `mimetype`, only paths rendering to it are listed; otherwise
    /// every path that resolves to some file type. Paths with a component
    /// starting with `_` are hidden unless `include_hidden` is set.
    pub fn paths(&self, mimetype: Option<&str>, include_hidden: bool) -> Vec<String> {
        let mut paths: Vec<String> = self
            .loaders
            .paths()
            .into_iter()
            .filter(|path| include_hidden || !is_hidden(path))
            .filter(|path| match self.plan(path, true) {
                Ok(plan) => mimetype.map_or(true, |m| plan.filetype.mimetype() == m),
                Err(_) => false,
            })
            .collect();
        paths.sort();
        paths
    }

    fn plan(&self, path: &str, use_loader: bool) -> Result<Plan> {
        let suffixes = Suffixes::parse(path);
        let all = suffixes.segments();
        let mut segments = all;

        let (loader, loader_match) = match use_loader.then(|| self.loaders.resolve(&suffixes)) {
            Some(Some((loader, found))) => (Some(loader), found),
            _ => (None, None),
        };

        let mut chain = self.engines.resolve_chain(segments);
        if chain.is_empty() {
            if let Some(found) = &loader_match {
                segments = &segments[..segments.len() - found.consumed];
                chain = self.engines.resolve_chain(segments);
            }
        }

        let consumed: usize = chain.iter().map(|m| m.consumed).sum();
        let remaining = &segments[..segments.len() - consumed];
        let (filetype, filetype_key) = match self
            .filetypes
            .lookup(remaining)
            .or_else(|| self.filetypes.lookup(all))
        {
            Some((filetype, found)) => (filetype, Some(found.key)),
            None => match self.filetypes.default_filetype() {
                Some(filetype) => (Arc::clone(filetype), None),
                None => return Err(TplError::TemplateNotFound(path.to_string())),
            },
        };

        let plan = Plan {
            loader,
            loader_key: loader_match.map(|found| found.key),
            filetype,
            filetype_key,
            engines: chain.into_iter().map(|found| found.key).collect(),
        };
        tracing::debug!(
            path,
            loader = ?plan.loader_key,
            filetype = plan.filetype.mimetype(),
            filetype_key = ?plan.filetype_key,
            engines = ?plan.engines,
            "resolved template"
        );
        Ok(plan)
    }

    fn instantiate(&self, plan: Plan) -> Result<Resolution> {
        let chain = plan
            .engines
            .into_iter()
            .map(|key| {
                let renderer = self.engines.renderer(&key, &plan.filetype, &self.context)?;
                Ok((key, renderer))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Resolution {
            loader: plan.loader,
            loader_key: plan.loader_key,
            filetype: plan.filetype,
            filetype_key: plan.filetype_key,
            chain,
        })
    }

    fn execute<T>(
        &self,
        resolution: &Resolution,
        path: &str,
        source: LoadedTemplate,
        variables: &T,
    ) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let variables = merge_variables(&resolution.filetype, path, variables)?;
        let mut chain = resolution.chain.iter();

        let mut content = match (chain.next(), &source) {
            (None, _) => source.read()?,
            (Some((_, renderer)), LoadedTemplate::File(file)) => {
                renderer.render_file(file, &variables, Some(path))?
            }
            (Some((_, renderer)), LoadedTemplate::Inline(inline)) => {
                renderer.render_string(inline, &variables, Some(path))?
            }
        };
        for (_, renderer) in chain {
            content = renderer.render_string(&content, &variables, Some(path))?;
        }

        resolution.filetype.postprocess(content)
    }
}

/// Overlays the caller's variables on the file type's globals.
fn merge_variables<T>(filetype: &FileType, path: &str, variables: &T) -> Result<Variables>
where
    T: Serialize + ?Sized,
{
    let mut merged: Variables = filetype.globals().iter().cloned().collect();
    let value = serde_json::to_value(variables)
        .map_err(|e| TplError::render(path, format!("invalid variables: {e}")))?;
    match value {
        Value::Object(map) => merged.extend(map),
        Value::Null => {}
        other => {
            return Err(TplError::render(
                path,
                format!("variables must be a map, got {other}"),
            ))
        }
    }
    Ok(merged)
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|part| part.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InlineLoader;
    use serde_json::json;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_pipeline_is_send_sync() {
        assert_send_sync::<Pipeline>();
        assert_send_sync::<Resolution>();
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden("_base.html"));
        assert!(is_hidden("partials/_nav.html"));
        assert!(!is_hidden("pages/index.html"));
    }

    #[test]
    fn test_merge_variables_caller_wins() {
        let mut filetype = FileType::new("text/plain");
        filetype.add_global("site", "a").unwrap();
        filetype.add_global("lang", "en").unwrap();

        let merged = merge_variables(&filetype, "x", &json!({"site": "b"})).unwrap();
        assert_eq!(merged["site"], "b");
        assert_eq!(merged["lang"], "en");

        let merged = merge_variables(&filetype, "x", &()).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_variables_rejects_non_map() {
        let filetype = FileType::new("text/plain");
        let err = merge_variables(&filetype, "x", &[1, 2]).unwrap_err();
        assert!(matches!(err, TplError::Render { .. }));
    }

    #[test]
    fn test_finalize_engine_without_filetypes() {
        let mut builder = PipelineBuilder::default();
        builder
            .register_engine("tpl", crate::engine::SimpleEngine::new())
            .unwrap();
        let err = builder.finalize().unwrap_err();
        assert_eq!(err, RegistrationError::EngineWithoutFileTypes("tpl".into()));
    }

    #[test]
    fn test_finalize_unknown_default() {
        let mut builder = PipelineBuilder::default();
        builder.set_default_filetype("text/plain");
        assert!(matches!(
            builder.finalize(),
            Err(RegistrationError::UnknownDefaultFileType(_))
        ));
    }

    #[test]
    fn test_resolve_requires_loader() {
        let mut builder = PipelineBuilder::default();
        builder.filetype("text/plain").add_extension("txt").unwrap();
        let pipeline = builder.finalize().unwrap();

        assert!(pipeline.resolve("a.txt").unwrap_err().is_not_found());
        assert_eq!(pipeline.mimetype("a.txt").unwrap(), "text/plain");
    }

    #[test]
    fn test_loader_only_suffix_is_transparent() {
        let mut builder = PipelineBuilder::default();
        builder.filetype("text/plain").add_extension("tpl").unwrap();
        builder.filetype("text/xml").add_extension("xml").unwrap();
        builder
            .add_loader("xml", InlineLoader::from_entries(&[("f.tpl.xml", "{x}")]))
            .unwrap();
        builder
            .register_engine("tpl", crate::engine::SimpleEngine::new())
            .unwrap();
        let pipeline = builder.finalize().unwrap();

        let resolution = pipeline.resolve("f.tpl.xml").unwrap();
        assert_eq!(resolution.loader_key(), Some("xml"));
        assert_eq!(resolution.engine_keys().collect::<Vec<_>>(), vec!["tpl"]);
        assert_eq!(pipeline.render("f.tpl.xml", &json!({"x": 1})).unwrap(), "1");
    }

    #[test]
    fn test_keyed_loader_single_suffix_without_engines() {
        let mut builder = PipelineBuilder::default();
        builder
            .filetype("text/css")
            .add_extension("css")
            .unwrap()
            .add_postprocessor(|content| Ok(format!("{content}/* min */")));
        builder
            .add_loader("css", InlineLoader::from_entries(&[("a.css", "a {}")]))
            .unwrap();
        let pipeline = builder.finalize().unwrap();

        let resolution = pipeline.resolve("a.css").unwrap();
        assert_eq!(resolution.loader_key(), Some("css"));
        assert_eq!(resolution.filetype_key(), Some("css"));
        assert!(resolution.chain().is_empty());
        assert_eq!(pipeline.mimetype("a.css").unwrap(), "text/css");
        assert_eq!(pipeline.render("a.css", &()).unwrap(), "a {}/* min */");
        assert_eq!(pipeline.paths(Some("text/css"), false), vec!["a.css"]);
    }

    #[test]
    fn test_keyed_loader_single_suffix_prefers_extension_over_default() {
        let mut builder = PipelineBuilder::default();
        builder.filetype("text/plain");
        builder.filetype("text/css").add_extension("css").unwrap();
        builder.set_default_filetype("text/plain");
        builder
            .add_loader("css", InlineLoader::from_entries(&[("a.css", "a {}")]))
            .unwrap();
        let pipeline = builder.finalize().unwrap();

        assert_eq!(pipeline.mimetype("a.css").unwrap(), "text/css");
        assert_eq!(
            pipeline.resolve("a.css").unwrap().filetype().mimetype(),
            "text/css"
        );
    }
}
