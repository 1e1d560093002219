//! # Templar - Extension-Chain Template Rendering
//!
//! `templar` turns a template path into rendered output. The suffixes of the
//! path decide everything: which loader supplies the content, which file type
//! the output belongs to, and which engines transform it.
//!
//! ## Core Concepts
//!
//! - [`FileType`]: An output category identified by mime type, with extensions,
//!   globals and post-processors
//! - [`Loader`]: Fetches raw template content ([`FileSystemLoader`],
//!   [`InlineLoader`], [`ChainLoader`])
//! - [`Engine`]: Builds a [`Renderer`] for a file type ([`MiniJinjaEngine`],
//!   [`SimpleEngine`])
//! - [`PipelineBuilder`]: Mutable configuration, frozen by
//!   [`finalize`](PipelineBuilder::finalize)
//! - [`Pipeline`]: Resolves and renders paths; safe to share between threads
//!
//! ## Quick Start
//!
//! ```rust
//! use templar::{EngineContext, InlineLoader, MiniJinjaEngine, PipelineBuilder};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Page {
//!     title: String,
//! }
//!
//! let mut builder = PipelineBuilder::new(EngineContext::default());
//! builder.filetype("text/html").add_extension("html")?;
//! builder.add_loader(
//!     "jinja2",
//!     InlineLoader::from_entries(&[("index.html.jinja2", "<h1>{{ title }}</h1>")]),
//! )?;
//! builder.register_engine("jinja2", MiniJinjaEngine::new())?;
//! let pipeline = builder.finalize()?;
//!
//! let html = pipeline.render("index.html.jinja2", &Page { title: "A & B".into() })?;
//! assert_eq!(html, "<h1>A &amp; B</h1>");
//! # Ok::<(), templar::TplError>(())
//! ```
//!
//! ## Extension Chains
//!
//! A path like `site.css.jinja2` is resolved by trying extension keys from
//! most to least specific (`css.jinja2`, then `jinja2`). See [`resolve`] for
//! the candidate order and [`pipeline`] for how loaders, engines and file
//! types are combined.
//!
//! ## Configuration Files
//!
//! [`TplConfig`] deserializes root folders, the cache folder, the default file
//! type and an engine table from YAML; [`PipelineBuilder::from_config`] turns
//! it into a builder.

pub mod config;
pub mod engine;
mod error;
pub mod filetype;
pub mod loader;
pub mod pipeline;
pub mod resolve;

pub use config::TplConfig;
pub use engine::{
    Engine, EngineContext, MiniJinjaEngine, MiniJinjaRenderer, Renderer, SimpleEngine,
    SimpleRenderer, Variables,
};
pub use error::{RegistrationError, Result, TplError};
pub use filetype::{FileType, FileTypeRegistry, PostProcessor};
pub use loader::{
    content_hash, ChainLoader, FileSystemLoader, InlineLoader, LoadedTemplate, Loader,
};
pub use pipeline::{Pipeline, PipelineBuilder, Resolution};
pub use resolve::{ExtensionMatch, Suffixes};
