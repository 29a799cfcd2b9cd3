//! `{self.<attr>}` placeholder substitution.
//!
//! Configuration, manifests and variant names may reference attributes of
//! the node (or variant) that issues them: `{self.name}`, `{self.path.k8s}`,
//! `{self.ambassador_id}`, `{self.target.path.k8s}`, `{self.weight}`,
//! `{self.options.0.name}` and so on. Bare `{key}` placeholders are filled
//! from caller-supplied extras and left untouched when no extra matches, so
//! YAML flow mappings such as `config: {}` pass through unchanged.

use crate::node::NodeContext;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(self(?:\.[A-Za-z0-9_]+)*|[A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Unresolved placeholder '{placeholder}'")]
    Unresolved { placeholder: String },
}

/// Something `{self.<a>.<b>}` paths can be resolved against.
pub trait Scope {
    fn lookup(&self, segments: &[&str]) -> Option<String>;
}

/// Render `text` against `scope`, filling bare `{key}`s from `extras`.
pub fn render_in<S: Scope + ?Sized>(
    scope: &S,
    text: &str,
    extras: &[(&str, &str)],
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        out.push_str(text.get(last..whole.start()).unwrap_or_default());
        last = whole.end();

        if let Some(path) = inner.as_str().strip_prefix("self") {
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            let value = if segments.is_empty() {
                None
            } else {
                scope.lookup(&segments)
            };
            match value {
                Some(value) => out.push_str(&value),
                None => {
                    return Err(TemplateError::Unresolved {
                        placeholder: whole.as_str().to_string(),
                    })
                }
            }
        } else {
            match extras.iter().find(|(key, _)| *key == inner.as_str()) {
                Some((_, value)) => out.push_str(value),
                None => out.push_str(whole.as_str()),
            }
        }
    }

    out.push_str(text.get(last..).unwrap_or_default());
    Ok(out)
}

/// Render `text` against a node.
pub fn render(ctx: &NodeContext<'_>, text: &str, extras: &[(&str, &str)]) -> Result<String, TemplateError> {
    render_in(ctx, text, extras)
}

/// Text form of a JSON value as it appears in rendered templates.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Scope for NodeContext<'_> {
    fn lookup(&self, segments: &[&str]) -> Option<String> {
        let (first, rest) = segments.split_first()?;

        match (*first, rest) {
            ("name", []) => Some(self.name().to_string()),
            ("kind", []) => Some(self.node().kind().to_string()),
            ("path", []) | ("path", ["fqdn"]) => Some(self.path().fqdn()),
            ("path", ["k8s"]) | ("k8s", []) => Some(self.path().k8s()),
            ("ambassador_id", []) => Some(self.ambassador_id().to_string()),
            ("value", []) if self.option_value().is_some() => self.option_value().map(render_value),
            ("parent", rest) => self.parent()?.lookup(rest),
            ("options", [index, rest @ ..]) => {
                let index: usize = index.parse().ok()?;
                self.options().get(index)?.lookup(rest)
            }
            (key, []) if self.param_display(key).is_some() => self.param_display(key),
            (label, rest) if !rest.is_empty() => self.child(label)?.lookup(rest),
            _ => None,
        }
    }
}
