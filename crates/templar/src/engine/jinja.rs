//! Jinja2-syntax engine backed by MiniJinja.
//!
//! [`MiniJinjaEngine`] builds one [`MiniJinjaRenderer`] per file type. Each
//! renderer owns its own MiniJinja [`Environment`], configured for the target
//! file type:
//!
//! - Undefined variables are errors, not empty strings.
//! - HTML and XML file types are auto-escaped; everything else is not.
//! - `{% include %}` and `{% extends %}` resolve against the template root
//!   folders.
//! - The file type's globals are registered as environment globals, so they
//!   are visible inside included templates too.
//!
//! # Example
//!
//! ```rust
//! use templar::{EngineContext, FileType, MiniJinjaEngine, Variables, Engine};
//!
//! let engine = MiniJinjaEngine::new();
//! let renderer = engine
//!     .create_renderer(&EngineContext::default(), &FileType::new("text/plain"))
//!     .unwrap();
//!
//! let mut variables = Variables::new();
//! variables.insert("name".into(), "World".into());
//! let output = renderer
//!     .render_string("Hello, {{ name }}!", &variables, None)
//!     .unwrap();
//! assert_eq!(output, "Hello, World!");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::{AutoEscape, Environment, Error, ErrorKind, UndefinedBehavior, Value};

use super::{Engine, EngineContext, Renderer, Variables};
use crate::error::{Result, TplError};
use crate::filetype::FileType;
use crate::loader::safe_join;

type Configure = Arc<dyn Fn(&mut Environment<'static>, &FileType) + Send + Sync>;

/// Engine producing MiniJinja renderers.
#[derive(Clone, Default)]
pub struct MiniJinjaEngine {
    embed_paths: bool,
    configure: Option<Configure>,
}

impl MiniJinjaEngine {
    /// Creates an engine with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps every rendered HTML template in `<!-- START path -->` and
    /// `<!-- END path -->` comments.
    pub fn with_embedded_paths(mut self, embed_paths: bool) -> Self {
        self.embed_paths = embed_paths;
        self
    }

    /// Runs `configure` on each new environment, e.g. to add filters or
    /// functions for specific file types.
    pub fn with_environment<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut Environment<'static>, &FileType) + Send + Sync + 'static,
    {
        self.configure = Some(Arc::new(configure));
        self
    }
}

impl fmt::Debug for MiniJinjaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiniJinjaEngine")
            .field("embed_paths", &self.embed_paths)
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

impl Engine for MiniJinjaEngine {
    fn create_renderer(
        &self,
        context: &EngineContext,
        filetype: &FileType,
    ) -> Result<Arc<dyn Renderer>> {
        let mut renderer = MiniJinjaRenderer::new(context, filetype);
        renderer.embed_paths = self.embed_paths && is_markup(filetype.mimetype());
        if let Some(configure) = &self.configure {
            configure(&mut renderer.env, filetype);
        }
        Ok(Arc::new(renderer))
    }
}

/// MiniJinja renderer bound to one file type.
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
    embed_paths: bool,
}

impl MiniJinjaRenderer {
    /// Builds the environment for `filetype`.
    pub fn new(context: &EngineContext, filetype: &FileType) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let escape = if is_markup(filetype.mimetype()) {
            AutoEscape::Html
        } else {
            AutoEscape::None
        };
        env.set_auto_escape_callback(move |_name: &str| escape.clone());

        let rootdirs = context.rootdirs().to_vec();
        env.set_loader(move |name: &str| load_include(&rootdirs, name));

        for (name, value) in filetype.globals() {
            env.add_global(name.clone(), Value::from_serialize(value));
        }
        register_filters(&mut env);

        Self {
            env,
            embed_paths: false,
        }
    }

    /// The underlying MiniJinja environment.
    pub fn environment(&self) -> &Environment<'static> {
        &self.env
    }

    fn render_source(
        &self,
        source: &str,
        variables: &Variables,
        path: Option<&str>,
        file: Option<&Path>,
    ) -> Result<String> {
        let name = path.unwrap_or("<string>");
        let ctx = Value::from_serialize(variables);
        if self.embed_paths {
            let source = embed_location(source, name, file);
            return Ok(self.env.render_named_str(name, &source, ctx)?);
        }
        Ok(self.env.render_named_str(name, source, ctx)?)
    }
}

impl Renderer for MiniJinjaRenderer {
    fn render_string(
        &self,
        content: &str,
        variables: &Variables,
        path: Option<&str>,
    ) -> Result<String> {
        self.render_source(content, variables, path, None)
    }

    fn render_file(&self, file: &Path, variables: &Variables, path: Option<&str>) -> Result<String> {
        let content = std::fs::read_to_string(file).map_err(|e| TplError::io(file, e))?;
        self.render_source(&content, variables, path, Some(file))
    }
}

fn is_markup(mimetype: &str) -> bool {
    matches!(
        mimetype,
        "text/html" | "application/xhtml+xml" | "text/xml" | "application/xml"
    )
}

fn embed_location(source: &str, name: &str, file: Option<&Path>) -> String {
    let location = match file {
        Some(file) => format!("{name} | {}", file.display()),
        None => name.to_string(),
    };
    format!("<!-- START {location} -->\n\n{source}\n\n<!-- END {location} -->")
}

fn load_include(rootdirs: &[PathBuf], name: &str) -> std::result::Result<Option<String>, Error> {
    for root in rootdirs {
        let Some(path) = safe_join(root, name) else {
            return Ok(None);
        };
        if path.is_file() {
            return std::fs::read_to_string(&path).map(Some).map_err(|e| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("could not read template '{}'", path.display()),
                )
                .with_source(e)
            });
        }
    }
    Ok(None)
}

/// Registers the built-in filters on a MiniJinja environment.
pub fn register_filters(env: &mut Environment<'static>) {
    // Usage: {{ content | nl }} outputs content followed by \n
    env.add_filter("nl", |value: Value| -> String { format!("{}\n", value) });
}
