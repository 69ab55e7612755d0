//! Change detection for link mutations
//!
//! A mutation only needs to raise the regeneration flag when it can alter what is
//! written to the sitemap. False positives are acceptable; false negatives are not.

use super::link::{Link, LinkConditions, LinkUpdates};

/// Decide whether saving `new` over `old` changes the sitemap output.
///
/// `old` is `None` when no prior record exists.
pub fn check_changed_link(new: &Link, old: Option<&Link>) -> bool {
    match old {
        None => new.is_visible(),
        Some(old) if !old.is_visible() => new.is_visible(),
        // Hiding a link leaves its stale entry until the next scheduled regeneration
        Some(old) => new.is_visible() && new != old,
    }
}

/// Narrow bulk conditions to the rows that are visible once `updates` are applied.
///
/// A row visible afterwards was either hidden before (it appears) or visible before (it
/// may have changed), so both cases raise the flag. Rows hidden afterwards never do.
/// Returns `None` when no matching row can be visible after the updates.
pub fn visible_after_updates(
    conditions: &LinkConditions,
    updates: &LinkUpdates,
) -> Option<LinkConditions> {
    let mut visible = conditions.clone();
    visible.status = visible_after(conditions.status, updates.status)?;
    visible.access = visible_after(conditions.access, updates.access)?;
    Some(visible)
}

/// Constraint on the current value of one visibility field so that it is set afterwards.
/// The outer `None` means the field cannot end up set.
fn visible_after(condition: Option<bool>, update: Option<bool>) -> Option<Option<bool>> {
    match (update, condition) {
        (Some(false), _) => None,
        (Some(true), condition) => Some(condition),
        (None, Some(false)) => None,
        (None, _) => Some(Some(true)),
    }
}
