//! File types: the output category a rendered template belongs to.
//!
//! A [`FileType`] is identified by its mime type and owns:
//!
//! - the extensions that select it (`css`, `min.css`, ...),
//! - global variables offered to every template of that type,
//! - post-processors applied, in order, after the engine chain.
//!
//! During configuration file types live in a mutable [`FileTypeRegistry`].
//! [`FileTypeRegistry::get_or_create`] never fails: asking for an unknown mime
//! type creates an empty file type for it, so configuration code can write
//! `registry.get_or_create("text/css").add_extension("css")?` without a
//! separate registration step.
//!
//! Finalizing the registry produces a read-only [`FileTypeIndex`] that maps
//! extension keys back to their file types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{RegistrationError, Result};
use crate::resolve::{resolve_key, validate_extension, ExtensionMatch, Suffixes};

/// A content transformation applied after rendering.
pub type PostProcessor = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// An output file type, keyed by mime type.
#[derive(Clone)]
pub struct FileType {
    mimetype: String,
    extensions: Vec<String>,
    postprocessors: Vec<PostProcessor>,
    globals: Vec<(String, Value)>,
}

impl FileType {
    /// Creates an empty file type for `mimetype`.
    pub fn new(mimetype: impl Into<String>) -> Self {
        Self {
            mimetype: mimetype.into(),
            extensions: Vec::new(),
            postprocessors: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// The mime type identifying this file type.
    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    /// Registered extensions, without leading periods.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Registers an extension selecting this file type.
    ///
    /// Adding an extension twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidExtension`] for extensions with a
    /// leading period or empty segments.
    pub fn add_extension(
        &mut self,
        extension: impl Into<String>,
    ) -> std::result::Result<&mut Self, RegistrationError> {
        let extension = extension.into();
        validate_extension(&extension)?;
        if !self.extensions.contains(&extension) {
            self.extensions.push(extension);
        }
        Ok(self)
    }

    /// Appends a post-processor.
    pub fn add_postprocessor<F>(&mut self, postprocessor: F) -> &mut Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.postprocessors.push(Arc::new(postprocessor));
        self
    }

    /// Removes the most recently added post-processor.
    pub fn pop_postprocessor(&mut self) -> Option<PostProcessor> {
        self.postprocessors.pop()
    }

    /// Registered post-processors in application order.
    pub fn postprocessors(&self) -> &[PostProcessor] {
        &self.postprocessors
    }

    /// Registers a global variable for templates of this type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateGlobal`] if `name` is taken.
    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> std::result::Result<&mut Self, RegistrationError> {
        let name = name.into();
        if self.globals.iter().any(|(existing, _)| existing == &name) {
            return Err(RegistrationError::DuplicateGlobal {
                mimetype: self.mimetype.clone(),
                name,
            });
        }
        self.globals.push((name, value.into()));
        Ok(self)
    }

    /// Registered globals in registration order.
    pub fn globals(&self) -> &[(String, Value)] {
        &self.globals
    }

    /// Runs every post-processor over `content`.
    pub fn postprocess(&self, content: String) -> Result<String> {
        self.postprocessors
            .iter()
            .try_fold(content, |content, postprocessor| postprocessor(&content))
    }
}

impl fmt::Debug for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileType")
            .field("mimetype", &self.mimetype)
            .field("extensions", &self.extensions)
            .field("postprocessors", &self.postprocessors.len())
            .field(
                "globals",
                &self.globals.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Mutable file type registry used while configuring a pipeline.
#[derive(Debug, Default)]
pub struct FileTypeRegistry {
    types: Vec<FileType>,
}

impl FileTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the file type for `mimetype`, creating an empty one first if
    /// it does not exist yet.
    ///
    /// This is a side-effecting read: use [`get`](Self::get) to look up a
    /// file type without registering it.
    pub fn get_or_create(&mut self, mimetype: &str) -> &mut FileType {
        let index = match self.position(mimetype) {
            Some(index) => index,
            None => {
                self.types.push(FileType::new(mimetype));
                self.types.len() - 1
            }
        };
        &mut self.types[index]
    }

    /// Looks up a file type without creating it.
    pub fn get(&self, mimetype: &str) -> Option<&FileType> {
        self.types.iter().find(|t| t.mimetype == mimetype)
    }

    /// Whether a file type exists for `mimetype`.
    pub fn contains(&self, mimetype: &str) -> bool {
        self.position(mimetype).is_some()
    }

    /// Registered mime types in registration order.
    pub fn mimetypes(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.mimetype.as_str())
    }

    /// Every extension of every file type.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.types
            .iter()
            .flat_map(|t| t.extensions.iter().map(String::as_str))
    }

    /// Number of registered file types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no file types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn position(&self, mimetype: &str) -> Option<usize> {
        self.types.iter().position(|t| t.mimetype == mimetype)
    }

    /// Freezes the registry into a lookup index.
    ///
    /// # Errors
    ///
    /// Fails when two file types claim the same extension or when `default`
    /// names an unregistered mime type.
    pub fn finalize(
        self,
        default: Option<&str>,
    ) -> std::result::Result<FileTypeIndex, RegistrationError> {
        let mut by_mimetype = HashMap::new();
        let mut by_extension: HashMap<String, Arc<FileType>> = HashMap::new();

        for filetype in self.types {
            let filetype = Arc::new(filetype);
            for extension in &filetype.extensions {
                if let Some(existing) = by_extension.get(extension) {
                    return Err(RegistrationError::ConflictingExtension {
                        extension: extension.clone(),
                        first: existing.mimetype.clone(),
                        second: filetype.mimetype.clone(),
                    });
                }
                by_extension.insert(extension.clone(), Arc::clone(&filetype));
            }
            by_mimetype.insert(filetype.mimetype.clone(), filetype);
        }

        let default = match default {
            Some(mimetype) => Some(Arc::clone(by_mimetype.get(mimetype).ok_or_else(
                || RegistrationError::UnknownDefaultFileType(mimetype.to_string()),
            )?)),
            None => None,
        };

        Ok(FileTypeIndex {
            by_mimetype,
            by_extension,
            default,
        })
    }
}

/// Read-only file type lookup produced by [`FileTypeRegistry::finalize`].
#[derive(Debug, Clone)]
pub struct FileTypeIndex {
    by_mimetype: HashMap<String, Arc<FileType>>,
    by_extension: HashMap<String, Arc<FileType>>,
    default: Option<Arc<FileType>>,
}

impl FileTypeIndex {
    /// Looks up a file type by mime type.
    pub fn get(&self, mimetype: &str) -> Option<&Arc<FileType>> {
        self.by_mimetype.get(mimetype)
    }

    /// The configured default file type.
    pub fn default_filetype(&self) -> Option<&Arc<FileType>> {
        self.default.as_ref()
    }

    /// Whether `extension` selects a file type.
    pub fn contains_extension(&self, extension: &str) -> bool {
        self.by_extension.contains_key(extension)
    }

    /// Registered mime types.
    pub fn mimetypes(&self) -> impl Iterator<Item = &str> {
        self.by_mimetype.keys().map(String::as_str)
    }

    /// Registered extension keys.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(String::as_str)
    }

    /// Resolves the file type of `suffixes`.
    ///
    /// Returns the matched extension key alongside the file type; the key is
    /// `None` when the default file type was used. Returns `None` only if no
    /// candidate matches and no default is configured.
    pub fn resolve(&self, suffixes: &Suffixes<'_>) -> Option<(Arc<FileType>, Option<ExtensionMatch>)> {
        match self.lookup(suffixes.segments()) {
            Some((filetype, found)) => Some((filetype, Some(found))),
            None => self.default.clone().map(|filetype| (filetype, None)),
        }
    }

    /// Matches `segments` against file type extensions, without the default.
    pub fn lookup(&self, segments: &[&str]) -> Option<(Arc<FileType>, ExtensionMatch)> {
        let found = resolve_key(segments, |key| self.by_extension.contains_key(key))?;
        let filetype = Arc::clone(&self.by_extension[&found.key]);
        Some((filetype, found))
    }
}
