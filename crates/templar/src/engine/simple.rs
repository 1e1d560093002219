//! Format-string style substitution engine.
//!
//! [`SimpleEngine`] renders `{variable}` placeholders and nothing else. It is
//! much lighter than MiniJinja and useful as a second stage after a full
//! engine, or for templates that only need a few values filled in.
//!
//! # Syntax
//!
//! - `{name}` - Simple variable substitution
//! - `{user.name}` - Nested property access via dot notation
//! - `{items.0}` - Array index access
//! - `{{` and `}}` - Escaped braces (renders as `{` and `}`)
//!
//! Unknown variables are left in place as `{name}`.
//!
//! # Example
//!
//! ```rust
//! use templar::{Renderer, SimpleRenderer, Variables};
//! use serde_json::json;
//!
//! let mut variables = Variables::new();
//! variables.insert("name".into(), json!("World"));
//! variables.insert("user".into(), json!({"email": "test@example.com"}));
//!
//! let output = SimpleRenderer
//!     .render_string("Hello, {name}! Contact: {user.email}", &variables, None)
//!     .unwrap();
//!
//! assert_eq!(output, "Hello, World! Contact: test@example.com");
//! ```

use std::sync::Arc;

use serde_json::Value;

use super::{Engine, EngineContext, Renderer, Variables};
use crate::error::{Result, TplError};
use crate::filetype::FileType;

/// Engine producing [`SimpleRenderer`]s.
///
/// The renderer does not depend on the file type, so every file type shares
/// one instance.
#[derive(Debug, Clone)]
pub struct SimpleEngine {
    renderer: Arc<SimpleRenderer>,
}

impl SimpleEngine {
    /// Creates a new SimpleEngine.
    pub fn new() -> Self {
        Self {
            renderer: Arc::new(SimpleRenderer),
        }
    }
}

impl Default for SimpleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SimpleEngine {
    fn create_renderer(&self, _: &EngineContext, _: &FileType) -> Result<Arc<dyn Renderer>> {
        Ok(self.renderer.clone())
    }
}

/// `{variable}` substitution renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleRenderer;

impl SimpleRenderer {
    /// Resolves a dotted path against the variables.
    ///
    /// Supports:
    /// - Simple keys: `name`
    /// - Nested objects: `user.profile.name`
    /// - Array indices: `items.0` or `items.0.name`
    fn resolve_path<'a>(variables: &'a Variables, path: &str) -> Option<&'a Value> {
        let mut parts = path.split('.');
        let mut current = variables.get(parts.next()?)?;

        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    arr.get(index)?
                }
                _ => return None,
            };
        }

        Some(current)
    }

    fn format_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            // For arrays and objects, use JSON representation
            Value::Array(_) | Value::Object(_) => value.to_string(),
        }
    }
}

impl Renderer for SimpleRenderer {
    fn render_string(
        &self,
        content: &str,
        variables: &Variables,
        path: Option<&str>,
    ) -> Result<String> {
        let location = path.unwrap_or("<string>");
        let mut output = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(at) = rest.find(['{', '}']) {
            output.push_str(&rest[..at]);
            let closing = rest[at..].starts_with('}');
            let after = &rest[at + 1..];

            // `}}` and `{{` are literal braces; a lone `}` is kept as is.
            if closing {
                output.push('}');
                rest = after.strip_prefix('}').unwrap_or(after);
                continue;
            }
            if let Some(after) = after.strip_prefix('{') {
                output.push('{');
                rest = after;
                continue;
            }

            let Some(end) = after.find('}') else {
                return Err(TplError::render(
                    location,
                    format!("Unclosed variable substitution: {{{after}"),
                ));
            };
            let name = after[..end].trim();
            if name.is_empty() {
                return Err(TplError::render(location, "Empty variable name in template"));
            }
            match Self::resolve_path(variables, name) {
                Some(value) => output.push_str(&Self::format_value(value)),
                None => {
                    output.push('{');
                    output.push_str(name);
                    output.push('}');
                }
            }
            rest = &after[end + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(template: &str, data: Value) -> Result<String> {
        let variables = match data {
            Value::Object(map) => map,
            _ => Variables::new(),
        };
        SimpleRenderer.render_string(template, &variables, Some("test.simple"))
    }

    #[test]
    fn test_simple_substitution() {
        let output = render("Hello, {name}!", json!({"name": "World"})).unwrap();
        assert_eq!(output, "Hello, World!");
    }

    #[test]
    fn test_multiple_variables() {
        let output = render("{first} {last}", json!({"first": "John", "last": "Doe"})).unwrap();
        assert_eq!(output, "John Doe");
    }

    #[test]
    fn test_nested_access() {
        let data = json!({
            "user": {
                "name": "Alice",
                "profile": {
                    "email": "alice@example.com"
                }
            }
        });

        let output = render("Name: {user.name}, Email: {user.profile.email}", data).unwrap();
        assert_eq!(output, "Name: Alice, Email: alice@example.com");
    }

    #[test]
    fn test_array_index() {
        let data = json!({
            "users": [
                {"name": "Alice"},
                {"name": "Bob"}
            ]
        });

        let output = render("{users.0.name} and {users.1.name}", data).unwrap();
        assert_eq!(output, "Alice and Bob");
    }

    #[test]
    fn test_scalar_values() {
        let data = json!({"count": 42, "price": 19.99, "active": true, "value": null});
        let output = render("{count} {price} {active} [{value}]", data).unwrap();
        assert_eq!(output, "42 19.99 true []");
    }

    #[test]
    fn test_escaped_braces() {
        let output = render("Use {{name}} for {name}", json!({"name": "test"})).unwrap();
        assert_eq!(output, "Use {name} for test");
    }

    #[test]
    fn test_missing_variable() {
        let output = render("Hello {missing}!", json!({"name": "test"})).unwrap();
        assert_eq!(output, "Hello {missing}!");
    }

    #[test]
    fn test_unclosed_variable() {
        let err = render("Hello {name", json!({})).unwrap_err();
        assert!(matches!(err, TplError::Render { ref path, .. } if path == "test.simple"));
        assert!(err.to_string().contains("Unclosed"));
    }

    #[test]
    fn test_empty_variable_name() {
        let err = render("Hello { }!", json!({})).unwrap_err();
        assert!(err.to_string().contains("Empty variable"));
    }

    #[test]
    fn test_whitespace_in_variable() {
        let output = render("Hello { name }!", json!({"name": "World"})).unwrap();
        assert_eq!(output, "Hello World!");
    }

    #[test]
    fn test_jinja_syntax_passes_through() {
        // {{i}} becomes {i} due to brace escaping
        let output = render(
            "{% for i in items %}{{i}}{% endfor %}",
            json!({"items": [1, 2, 3]}),
        )
        .unwrap();
        assert_eq!(output, "{% for i in items %}{i}{% endfor %}");
    }

    #[test]
    fn test_engine_shares_renderer() {
        let engine = SimpleEngine::new();
        let context = EngineContext::default();
        let css = engine
            .create_renderer(&context, &FileType::new("text/css"))
            .unwrap();
        let html = engine
            .create_renderer(&context, &FileType::new("text/html"))
            .unwrap();
        assert!(Arc::ptr_eq(&css, &html));
    }
}
