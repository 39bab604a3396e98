//! Plugin specifications and their normalization.
//!
//! Users write a plugin either as a bare string or as a table. Both shapes are
//! resolved here, once, into a canonical [`Spec`]; nothing downstream looks at
//! the input shape again.
//!
//! ```text
//! "nvim-lua/plenary.nvim"                 -> source, name "plenary.nvim"
//! "plenary.nvim"                          -> name of an installed module
//! { source = "org/a", depends = ["org/b"] }
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hooks::{HookEvent, Hooks, ShellHook};

/// Default expansion for `user/repo` shorthands.
pub const DEFAULT_URL_FORMAT: &str = "https://github.com/%s";

static SHORTHAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid regex"));

static SCP_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+@[A-Za-z0-9_.-]+:\S+$").expect("valid regex"));

static WINDOWS_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:[\\/]").expect("valid regex"));

/// A plugin reference as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecInput {
    /// `"user/repo"`, a full URL, or the name of an installed module
    Short(String),
    /// Structured form
    Table(SpecTable),
}

impl SpecInput {
    /// Short label for error messages.
    pub fn label(&self) -> String {
        match self {
            Self::Short(s) => s.clone(),
            Self::Table(t) => t
                .name
                .clone()
                .or_else(|| t.source.clone())
                .unwrap_or_else(|| "<table>".to_string()),
        }
    }
}

impl From<&str> for SpecInput {
    fn from(s: &str) -> Self {
        Self::Short(s.to_string())
    }
}

/// Table form of a plugin reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<SpecInput>,

    /// Shell commands keyed by hook event
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<HookEvent, String>,
}

/// Canonical, fully-resolved plugin specification.
#[derive(Debug, Clone, Default)]
pub struct Spec {
    /// Directory name under the package `opt` directory
    pub name: String,
    /// Clone URL or path; required at install time
    pub source: Option<String>,
    /// Branch, tag, commit or `HEAD`; `None` tracks the default branch
    pub checkout: Option<String>,
    /// Branch observed for awareness only
    pub monitor: Option<String>,
    pub depends: Vec<Spec>,
    pub hooks: Hooks,
}

impl Spec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_checkout(mut self, checkout: impl Into<String>) -> Self {
        self.checkout = Some(checkout.into());
        self
    }

    pub fn with_monitor(mut self, monitor: impl Into<String>) -> Self {
        self.monitor = Some(monitor.into());
        self
    }

    pub fn with_depends(mut self, depends: Vec<Spec>) -> Self {
        self.depends = depends;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Overlay fields set in a later occurrence of the same module.
    pub fn merge(&mut self, later: &Spec) {
        if later.source.is_some() {
            self.source.clone_from(&later.source);
        }
        if later.checkout.is_some() {
            self.checkout.clone_from(&later.checkout);
        }
        if later.monitor.is_some() {
            self.monitor.clone_from(&later.monitor);
        }
        if !later.depends.is_empty() {
            self.depends.clone_from(&later.depends);
        }
        self.hooks.merge(&later.hooks);
    }
}

/// Resolves [`SpecInput`] into [`Spec`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    url_format: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            url_format: DEFAULT_URL_FORMAT.to_string(),
        }
    }
}

impl Normalizer {
    /// Create a normalizer with a custom shorthand format (must contain `%s`).
    pub fn new(url_format: impl Into<String>) -> Result<Self> {
        let url_format = url_format.into();
        if !url_format.contains("%s") {
            return Err(Error::Config(format!(
                "default_url_format '{url_format}' has no %s placeholder"
            )));
        }
        Ok(Self { url_format })
    }

    pub fn url_format(&self) -> &str {
        &self.url_format
    }

    /// Normalize one input, recursing into `depends`.
    pub fn normalize(&self, input: &SpecInput) -> Result<Spec> {
        match input {
            SpecInput::Short(s) => self.normalize_str(s),
            SpecInput::Table(t) => self.normalize_table(t, input),
        }
    }

    /// Normalize a bare string.
    pub fn normalize_str(&self, raw: &str) -> Result<Spec> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid_spec(raw, "empty plugin reference"));
        }

        if looks_like_source(raw) {
            let source = self.expand_source(raw)?;
            let name = name_from_source(&source)
                .ok_or_else(|| Error::invalid_spec(raw, "cannot derive a name from the source"))?;
            validate_name(&name, raw)?;
            return Ok(Spec::new(name).with_source(source));
        }

        validate_name(raw, raw)?;
        Ok(Spec::new(raw))
    }

    fn normalize_table(&self, table: &SpecTable, input: &SpecInput) -> Result<Spec> {
        let label = input.label();

        let source = match table.source.as_deref() {
            Some(raw) => Some(self.expand_source(raw)?),
            None => None,
        };

        let name = match (&table.name, &source) {
            (Some(name), _) => name.trim().to_string(),
            (None, Some(src)) => name_from_source(src)
                .ok_or_else(|| Error::invalid_spec(&label, "cannot derive a name from the source"))?,
            (None, None) => {
                return Err(Error::invalid_spec(label, "neither name nor source given"));
            }
        };
        validate_name(&name, &label)?;

        let depends = table
            .depends
            .iter()
            .map(|dep| self.normalize(dep))
            .collect::<Result<Vec<_>>>()?;

        let mut hooks = Hooks::new();
        for (event, command) in &table.hooks {
            if command.trim().is_empty() {
                return Err(Error::invalid_spec(
                    &label,
                    format!("empty command for {event} hook"),
                ));
            }
            hooks.set(*event, ShellHook::new(*event, command.clone()));
        }

        Ok(Spec {
            name,
            source,
            checkout: git_ref(&label, "checkout", table.checkout.as_deref())?,
            monitor: git_ref(&label, "monitor", table.monitor.as_deref())?,
            depends,
            hooks,
        })
    }

    /// Expand a shorthand and validate the result.
    pub fn expand_source(&self, raw: &str) -> Result<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid_spec(raw, "empty source"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(Error::invalid_spec(raw, "source contains whitespace"));
        }

        if raw.contains("://") {
            let parsed = url::Url::parse(raw)
                .map_err(|e| Error::invalid_spec(raw, format!("unparsable URL: {e}")))?;
            if parsed.scheme() != "file" && parsed.host_str().is_none() {
                return Err(Error::invalid_spec(raw, "URL has no host"));
            }
            return Ok(raw.to_string());
        }

        if SCP_LIKE.is_match(raw) || is_local_path(raw) {
            return Ok(raw.to_string());
        }

        if SHORTHAND.is_match(raw) {
            return Ok(self.url_format.replace("%s", raw));
        }

        Err(Error::invalid_spec(
            raw,
            "expected user/repo, a URL, or a local path",
        ))
    }
}

/// Derive the module name from a source: last path segment without `.git`.
pub fn name_from_source(source: &str) -> Option<String> {
    let trimmed = source.trim_end_matches(['/', '\\']);
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn looks_like_source(raw: &str) -> bool {
    raw.contains('/') || raw.contains('\\') || SCP_LIKE.is_match(raw)
}

fn is_local_path(raw: &str) -> bool {
    raw.starts_with('/') || raw.starts_with('~') || raw.starts_with('.') || WINDOWS_PATH.is_match(raw)
}

fn validate_name(name: &str, input: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_spec(input, "empty name"));
    }
    if name == "." || name == ".." {
        return Err(Error::invalid_spec(input, format!("'{name}' is not a valid name")));
    }
    if name.contains(['/', '\\']) || name.chars().any(char::is_whitespace) {
        return Err(Error::invalid_spec(
            input,
            format!("name '{name}' must be a single path component"),
        ));
    }
    Ok(())
}

/// A trimmed ref name; blank means unset. Snapshot lines split on whitespace.
fn git_ref(input: &str, field: &str, value: Option<&str>) -> Result<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().any(char::is_whitespace) {
        return Err(Error::invalid_spec(
            input,
            format!("{field} '{value}' contains whitespace"),
        ));
    }
    Ok(Some(value.to_string()))
}
