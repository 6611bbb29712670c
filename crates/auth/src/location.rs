//! Active-location resolution.
//!
//! Two candidate sources exist for the tenant a request should be scoped to:
//! the location the user explicitly *selected* (branch picker) and the
//! *primary* location assigned at account creation. Selection always wins
//! when present and meaningful; primary is only a fallback. Every caller
//! that needs a location id goes through this one function.

use medidesk_core::LocationId;

/// Placeholder values a sloppy writer may have left in the selection slot.
const PLACEHOLDERS: &[&str] = &["null", "undefined"];

/// Resolve the active location id from the two candidate sources.
///
/// `selected` is the raw persisted selection (may carry accidental quoting
/// from storage); `primary` is the numeric primary-location attribute from
/// the user profile. Returns `None` when neither source yields a usable id —
/// callers must treat that as "no tenant context, do not scope the request",
/// never substitute a default.
pub fn resolve_active_location(
    selected: Option<&str>,
    primary: Option<i64>,
) -> Option<LocationId> {
    if let Some(raw) = selected {
        if let Some(id) = normalize_selection(raw) {
            return Some(id);
        }
    }
    primary.map(LocationId::from)
}

/// Strip accidental quoting and reject empty/placeholder selections.
fn normalize_selection(raw: &str) -> Option<LocationId> {
    let mut candidate = raw.trim();
    if candidate.len() >= 2 && candidate.starts_with('"') && candidate.ends_with('"') {
        candidate = candidate[1..candidate.len() - 1].trim();
    }
    if candidate.is_empty() {
        return None;
    }
    if PLACEHOLDERS
        .iter()
        .any(|p| candidate.eq_ignore_ascii_case(p))
    {
        return None;
    }
    Some(LocationId::new(candidate))
}
