//! Front-end callbacks.
//!
//! The engine never prompts on its own. A front end decides which entries of
//! a [`Plan`] to apply by implementing [`ConfirmCallback`].

use crate::error::Result;
use crate::plan::{Plan, Selection};

/// Reviews a plan before it is applied.
pub trait ConfirmCallback {
    /// Called with every computed plan, including ones with nothing to apply.
    fn preview(&mut self, _plan: &Plan) {}

    /// Return the entries to apply, or `None` to discard the plan.
    ///
    /// Only called when the plan has actionable entries.
    fn confirm(&mut self, plan: &Plan) -> Result<Option<Selection>>;
}

/// Applies every entry without asking.
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _plan: &Plan) -> Result<Option<Selection>> {
        Ok(Some(Selection::All))
    }
}

/// Discards every plan.
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _plan: &Plan) -> Result<Option<Selection>> {
        Ok(None)
    }
}
