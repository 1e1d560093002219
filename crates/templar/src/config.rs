//! Pipeline configuration.
//!
//! [`TplConfig`] holds the settings a pipeline is built from. It deserializes
//! from YAML (or any serde format):
//!
//! ```yaml
//! rootdirs:
//!   - templates
//!   - vendor/templates
//! cachedir: .cache/templates
//! default_format: text/html
//! engines:
//!   jinja2: minijinja
//!   fmt: simple
//! ```
//!
//! `rootdir` is accepted as an alias for `rootdirs`, and either key takes a
//! single path or a list.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, TplError};

/// Settings for a [`PipelineBuilder`](crate::PipelineBuilder).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TplConfig {
    /// Template root folders, searched in order.
    #[serde(alias = "rootdir", deserialize_with = "one_or_many")]
    pub rootdirs: Vec<PathBuf>,

    /// Folder engines may use for compiled artifacts.
    pub cachedir: Option<PathBuf>,

    /// Mime type used for paths whose extensions select no file type.
    pub default_format: Option<String>,

    /// Extension to built-in engine name (`minijinja`, `simple`).
    pub engines: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

impl TplConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Adds a template root folder.
    pub fn with_rootdir(mut self, rootdir: impl Into<PathBuf>) -> Self {
        self.rootdirs.push(rootdir.into());
        self
    }

    /// Sets the cache folder.
    pub fn with_cachedir(mut self, cachedir: impl Into<PathBuf>) -> Self {
        self.cachedir = Some(cachedir.into());
        self
    }

    /// Sets the default file type.
    pub fn with_default_format(mut self, mimetype: impl Into<String>) -> Self {
        self.default_format = Some(mimetype.into());
        self
    }

    /// Maps `extension` to the built-in engine `name`.
    pub fn with_engine(mut self, extension: impl Into<String>, name: impl Into<String>) -> Self {
        self.engines.insert(extension.into(), name.into());
        self
    }

    /// Checks the root folders and creates the cache folder if needed.
    ///
    /// # Errors
    ///
    /// Returns [`TplError::Config`] if a root folder is not a directory, and
    /// [`TplError::Io`] if the cache folder cannot be created.
    pub fn validate(&self) -> Result<()> {
        if let Some(rootdir) = self.rootdirs.iter().find(|dir| !dir.is_dir()) {
            return Err(TplError::Config(format!(
                "template root '{}' is not a directory",
                rootdir.display()
            )));
        }
        if let Some(cachedir) = &self.cachedir {
            std::fs::create_dir_all(cachedir).map_err(|e| TplError::io(cachedir, e))?;
        }
        Ok(())
    }
}
