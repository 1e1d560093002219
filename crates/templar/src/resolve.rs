//! Extension chain resolution.
//!
//! A template path such as `pages/index.css.jinja2` carries a base name
//! (`pages/index`) and an ordered list of suffixes (`css`, `jinja2`). Loaders,
//! file types and engines are all keyed by *extension keys*: one or more
//! trailing suffixes joined by dots.
//!
//! # Candidate Order
//!
//! For the suffixes `s1.s2...sn` the candidates are tried most specific first:
//!
//! | Candidate | Suffixes consumed |
//! |-----------|-------------------|
//! | `s1.s2...sn` | all `n` |
//! | `s2...sn` | `n - 1` |
//! | ... | ... |
//! | `sn` | 1 |
//!
//! The first candidate a registry contains wins. Whether a miss falls back to a
//! default is up to the registry; this module only reports the match.
//!
//! # Engine Chains
//!
//! [`resolve_chain`] applies the same lookup repeatedly, each time dropping the
//! suffixes the previous match consumed, so `a.md.j2.simple` with engines for
//! `simple` and `j2` yields `[simple, j2]`: the suffix closest to the end of the
//! path comes first.

use crate::error::RegistrationError;

/// The suffixes of a template path.
///
/// Only the final path component is split, so dots in directory names never
/// produce suffixes. A single leading dot (as in `.htaccess`) belongs to the
/// base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suffixes<'a> {
    base: &'a str,
    segments: Vec<&'a str>,
}

impl<'a> Suffixes<'a> {
    /// Splits `path` into its base name and suffixes.
    pub fn parse(path: &'a str) -> Self {
        let name_start = path.rfind('/').map_or(0, |i| i + 1);
        let name = &path[name_start..];
        let first_dot = name
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '.')
            .map(|(i, _)| name_start + i);

        match first_dot {
            Some(dot) => Self {
                base: &path[..dot],
                segments: path[dot + 1..].split('.').collect(),
            },
            None => Self {
                base: path,
                segments: Vec::new(),
            },
        }
    }

    /// Everything before the first suffix, directories included.
    pub fn base(&self) -> &'a str {
        self.base
    }

    /// The suffixes in left-to-right order.
    pub fn segments(&self) -> &[&'a str] {
        &self.segments
    }

    /// Number of suffixes.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the path has no suffixes at all.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Candidate keys for the whole suffix list, most specific first.
    pub fn candidates(&self) -> impl Iterator<Item = String> + '_ {
        candidates(&self.segments)
    }

    /// Returns the first candidate accepted by `contains`.
    pub fn resolve<F>(&self, contains: F) -> Option<ExtensionMatch>
    where
        F: Fn(&str) -> bool,
    {
        resolve_key(&self.segments, contains)
    }
}

/// An extension key found in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionMatch {
    /// The matching key, e.g. `css.jinja2`.
    pub key: String,
    /// How many trailing suffixes the key covers.
    pub consumed: usize,
}

/// Generates the candidate keys for `segments`, most specific first.
pub fn candidates<'s>(segments: &'s [&'s str]) -> impl Iterator<Item = String> + 's {
    (0..segments.len()).map(move |i| segments[i..].join("."))
}

/// Tries every candidate of `segments` in order and returns the first hit.
pub fn resolve_key<F>(segments: &[&str], contains: F) -> Option<ExtensionMatch>
where
    F: Fn(&str) -> bool,
{
    candidates(segments)
        .zip((1..=segments.len()).rev())
        .find(|(key, _)| contains(key))
        .map(|(key, consumed)| ExtensionMatch { key, consumed })
}

/// Resolves successive matches, consuming the matched suffixes each time.
///
/// Stops when no suffixes remain or when the remaining suffixes have no match.
pub fn resolve_chain<F>(segments: &[&str], contains: F) -> Vec<ExtensionMatch>
where
    F: Fn(&str) -> bool,
{
    let mut chain = Vec::new();
    let mut remaining = segments;
    while let Some(found) = resolve_key(remaining, &contains) {
        remaining = &remaining[..remaining.len() - found.consumed];
        chain.push(found);
    }
    chain
}

/// Checks that `extension` can be used as an extension key.
pub fn validate_extension(extension: &str) -> Result<(), RegistrationError> {
    let reason = if extension.is_empty() {
        Some("extension is empty")
    } else if extension.starts_with('.') {
        Some("extensions are registered without a leading period")
    } else if extension.contains('/') {
        Some("extensions cannot contain path separators")
    } else if extension.split('.').any(str::is_empty) {
        Some("extension contains an empty segment")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RegistrationError::InvalidExtension {
            extension: extension.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn keys(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_splits_suffixes() {
        let suffixes = Suffixes::parse("myfile.css.jinja2");
        assert_eq!(suffixes.base(), "myfile");
        assert_eq!(suffixes.segments(), &["css", "jinja2"]);
    }

    #[test]
    fn test_parse_ignores_dots_in_directories() {
        let suffixes = Suffixes::parse("assets/v1.2/site.css");
        assert_eq!(suffixes.base(), "assets/v1.2/site");
        assert_eq!(suffixes.segments(), &["css"]);
    }

    #[test]
    fn test_parse_bare_name() {
        let suffixes = Suffixes::parse("myfile");
        assert!(suffixes.is_empty());
        assert_eq!(suffixes.base(), "myfile");
        assert_eq!(suffixes.candidates().count(), 0);
    }

    #[test]
    fn test_parse_leading_dot_is_part_of_base() {
        let suffixes = Suffixes::parse("conf/.htaccess.j2");
        assert_eq!(suffixes.base(), "conf/.htaccess");
        assert_eq!(suffixes.segments(), &["j2"]);
    }

    #[test]
    fn test_candidates_most_specific_first() {
        let suffixes = Suffixes::parse("a.b.c.d");
        let candidates: Vec<String> = suffixes.candidates().collect();
        assert_eq!(candidates, vec!["b.c.d", "c.d", "d"]);
    }

    #[test]
    fn test_resolve_prefers_longest_key() {
        let registered = keys(&["jinja2", "css.jinja2"]);
        let found = Suffixes::parse("myfile.css.jinja2")
            .resolve(|k| registered.contains(k))
            .unwrap();
        assert_eq!(found.key, "css.jinja2");
        assert_eq!(found.consumed, 2);
    }

    #[test]
    fn test_resolve_falls_through_to_last_suffix() {
        let registered = keys(&["jinja2"]);
        let found = Suffixes::parse("myfile.css.jinja2")
            .resolve(|k| registered.contains(k))
            .unwrap();
        assert_eq!(found.key, "jinja2");
        assert_eq!(found.consumed, 1);
    }

    #[test]
    fn test_resolve_never_matches_inner_suffix_alone() {
        let registered = keys(&["css"]);
        let found = Suffixes::parse("myfile.css.jinja2").resolve(|k| registered.contains(k));
        assert_eq!(found, None);
    }

    #[test]
    fn test_resolve_chain_consumes_right_to_left() {
        let registered = keys(&["j2", "simple"]);
        let chain = resolve_chain(&["md", "j2", "simple"], |k| registered.contains(k));
        let found: Vec<&str> = chain.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(found, vec!["simple", "j2"]);
    }

    #[test]
    fn test_resolve_chain_stops_at_first_gap() {
        let registered = keys(&["j2"]);
        let chain = resolve_chain(&["j2", "css", "j2"], |k| registered.contains(k));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].key, "j2");
    }

    #[test]
    fn test_resolve_chain_multi_part_key() {
        let registered = keys(&["css.j2", "j2"]);
        let chain = resolve_chain(&["css", "j2"], |k| registered.contains(k));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].key, "css.j2");
        assert_eq!(chain[0].consumed, 2);
    }

    #[test]
    fn test_validate_extension() {
        assert!(validate_extension("css").is_ok());
        assert!(validate_extension("css.jinja2").is_ok());
        assert!(matches!(
            validate_extension(".css"),
            Err(RegistrationError::InvalidExtension { .. })
        ));
        assert!(validate_extension("").is_err());
        assert!(validate_extension("css..j2").is_err());
        assert!(validate_extension("a/b").is_err());
    }

    proptest! {
        #[test]
        fn prop_candidates_are_all_trailing_joins(
            segments in prop::collection::vec("[a-z0-9]{1,6}", 0..6)
        ) {
            let path = format!("base.{}", segments.join("."));
            let path = if segments.is_empty() { "base".to_string() } else { path };
            let suffixes = Suffixes::parse(&path);
            let candidates: Vec<String> = suffixes.candidates().collect();

            prop_assert_eq!(candidates.len(), segments.len());
            for (i, candidate) in candidates.iter().enumerate() {
                prop_assert_eq!(candidate, &segments[i..].join("."));
            }
        }

        #[test]
        fn prop_resolve_returns_first_registered_candidate(
            segments in prop::collection::vec("[a-c]{1,2}", 1..5),
            registered in prop::collection::hash_set("[a-c]{1,2}(\\.[a-c]{1,2}){0,2}", 0..6)
        ) {
            let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
            let expected = candidates(&refs).find(|c| registered.contains(c));
            let found = resolve_key(&refs, |k| registered.contains(k)).map(|m| m.key);
            prop_assert_eq!(found, expected);
        }
    }
}
