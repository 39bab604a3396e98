//! Lifecycle hooks around install and checkout phases.
//!
//! A module can attach a hook to each of four events. Hooks run synchronously
//! on the orchestrating thread, outside the job pool, and receive an immutable
//! [`HookContext`]. An unset slot behaves as [`NoHook`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Events a hook can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreCheckout,
    PostCheckout,
}

impl HookEvent {
    /// All events in invocation order.
    pub const ALL: [HookEvent; 4] = [
        Self::PreInstall,
        Self::PostInstall,
        Self::PreCheckout,
        Self::PostCheckout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreInstall => "pre_install",
            Self::PostInstall => "post_install",
            Self::PreCheckout => "pre_checkout",
            Self::PostCheckout => "post_checkout",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown hook event '{s}'"))
    }
}

/// Immutable context handed to every hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// Module directory (may not exist yet for `pre_install`)
    pub path: PathBuf,
    /// Configured source, if any
    pub source: Option<String>,
    /// Module name
    pub name: String,
}

/// A lifecycle extension point.
pub trait Hook: Send + Sync + fmt::Debug {
    /// Run the hook. Failures are recorded against the module only.
    fn run(&self, ctx: &HookContext) -> Result<()>;
}

/// The default hook: does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHook;

impl Hook for NoHook {
    fn run(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
}

static NO_HOOK: NoHook = NoHook;

/// Hook that runs a shell command.
///
/// The command runs in the module directory when it exists, otherwise in its
/// parent. `PLUGSYNC_NAME`, `PLUGSYNC_PATH` and `PLUGSYNC_SOURCE` are exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellHook {
    pub command: String,
    event: HookEvent,
}

impl ShellHook {
    pub fn new(event: HookEvent, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            event,
        }
    }

    fn working_dir(path: &Path) -> Option<&Path> {
        if path.is_dir() {
            Some(path)
        } else {
            path.parent().filter(|p| p.is_dir())
        }
    }
}

impl Hook for ShellHook {
    fn run(&self, ctx: &HookContext) -> Result<()> {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.command);
            c
        };

        if let Some(dir) = Self::working_dir(&ctx.path) {
            cmd.current_dir(dir);
        }

        let output = cmd
            .env("PLUGSYNC_NAME", &ctx.name)
            .env("PLUGSYNC_PATH", &ctx.path)
            .env("PLUGSYNC_SOURCE", ctx.source.as_deref().unwrap_or_default())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::HookFailed {
                name: ctx.name.clone(),
                event: self.event.to_string(),
                message: format!("failed to spawn shell: {e}"),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::HookFailed {
            name: ctx.name.clone(),
            event: self.event.to_string(),
            message: if stderr.trim().is_empty() {
                format!("'{}' exited with {}", self.command, output.status)
            } else {
                stderr.trim().to_string()
            },
        })
    }
}

/// Hook backed by a closure, for library users embedding the engine.
pub struct FnHook<F>(F);

impl<F> FnHook<F>
where
    F: Fn(&HookContext) -> Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHook")
    }
}

impl<F> Hook for FnHook<F>
where
    F: Fn(&HookContext) -> Result<()> + Send + Sync,
{
    fn run(&self, ctx: &HookContext) -> Result<()> {
        (self.0)(ctx)
    }
}

/// The four hook slots of a module.
#[derive(Clone, Default)]
pub struct Hooks {
    slots: BTreeMap<HookEvent, Arc<dyn Hook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a hook, replacing any previous one for the event.
    pub fn set(&mut self, event: HookEvent, hook: impl Hook + 'static) {
        self.slots.insert(event, Arc::new(hook));
    }

    /// Builder form of [`Hooks::set`].
    pub fn with(mut self, event: HookEvent, hook: impl Hook + 'static) -> Self {
        self.set(event, hook);
        self
    }

    /// The hook for an event; [`NoHook`] when unset.
    pub fn get(&self, event: HookEvent) -> &dyn Hook {
        match self.slots.get(&event) {
            Some(hook) => hook.as_ref(),
            None => &NO_HOOK,
        }
    }

    pub fn is_set(&self, event: HookEvent) -> bool {
        self.slots.contains_key(&event)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Overwrite slots that are set in `other`.
    pub fn merge(&mut self, other: &Hooks) {
        for (event, hook) in &other.slots {
            self.slots.insert(*event, Arc::clone(hook));
        }
    }

    /// Invoke the hook for an event.
    pub fn invoke(&self, event: HookEvent, ctx: &HookContext) -> Result<()> {
        if self.is_set(event) {
            log::debug!("Running {} hook for {}", event, ctx.name);
        }
        self.get(event).run(ctx)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.slots.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(path: &Path) -> HookContext {
        HookContext {
            path: path.to_path_buf(),
            source: Some("https://github.com/org/demo".into()),
            name: "demo".into(),
        }
    }

    #[test]
    fn test_unset_hook_is_noop() {
        let hooks = Hooks::new();
        assert!(!hooks.is_set(HookEvent::PostInstall));
        assert!(
            hooks
                .invoke(HookEvent::PostInstall, &ctx(Path::new("/nonexistent")))
                .is_ok()
        );
    }

    #[test]
    fn test_merge_overwrites_set_slots_only() {
        static FIRST: AtomicUsize = AtomicUsize::new(0);
        static SECOND: AtomicUsize = AtomicUsize::new(0);

        let mut base = Hooks::new()
            .with(
                HookEvent::PreInstall,
                FnHook::new(|_: &HookContext| {
                    FIRST.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .with(HookEvent::PostInstall, NoHook);
        let later = Hooks::new().with(
            HookEvent::PreInstall,
            FnHook::new(|_: &HookContext| {
                SECOND.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        base.merge(&later);
        base.invoke(HookEvent::PreInstall, &ctx(Path::new("/tmp")))
            .unwrap();

        assert_eq!(FIRST.load(Ordering::SeqCst), 0);
        assert_eq!(SECOND.load(Ordering::SeqCst), 1);
        assert!(base.is_set(HookEvent::PostInstall));
    }

    #[test]
    fn test_event_names_round_trip() {
        for event in HookEvent::ALL {
            assert_eq!(event.as_str().parse::<HookEvent>().unwrap(), event);
        }
        assert!("post_update".parse::<HookEvent>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_hook_sees_context() {
        let dir = tempfile::tempdir().unwrap();
        let hook = ShellHook::new(
            HookEvent::PostInstall,
            "printf '%s' \"$PLUGSYNC_NAME\" > marker",
        );
        hook.run(&ctx(dir.path())).unwrap();

        let marker = std::fs::read_to_string(dir.path().join("marker")).unwrap();
        assert_eq!(marker, "demo");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_hook_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let hook = ShellHook::new(HookEvent::PreCheckout, "echo broken >&2; exit 3");
        let err = hook.run(&ctx(dir.path())).unwrap_err();

        match err {
            Error::HookFailed { event, message, .. } => {
                assert_eq!(event, "pre_checkout");
                assert_eq!(message, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
