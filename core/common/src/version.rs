//! Dotted-numeric version comparison.

use std::cmp::Ordering;

use crate::{Error, Result};

/// Check that `version` is a dotted list of non-empty tokens.
///
/// Tokens hold ASCII letters, digits, `-`, `+` and `_`, and the version
/// starts with a letter or digit. This keeps versions usable as path
/// components and command arguments.
pub fn validate_version(version: &str) -> Result<()> {
    let starts_well = version
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric());
    let tokens_ok = version.split('.').all(|token| {
        !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '_'))
    });
    if starts_well && tokens_ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid version '{}'", version)))
    }
}

/// Compare two dotted version strings component by component.
///
/// Missing trailing components count as zero, so `1.2` equals `1.2.0`.
/// A component that is not a plain decimal number also counts as zero.
/// Components may be arbitrarily long; they are compared by magnitude
/// without converting to a fixed-width integer.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = normalize(left.get(i).copied().unwrap_or("0"));
        let r = normalize(right.get(i).copied().unwrap_or("0"));
        let ord = l.len().cmp(&r.len()).then_with(|| l.cmp(r));
        if ord != Ordering::Equal {
            return ord;
        }
    }

    Ordering::Equal
}

/// Reduce a component to its canonical decimal digits.
fn normalize(component: &str) -> &str {
    let trimmed = component.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return "0";
    }
    let stripped = trimmed.trim_start_matches('0');
    if stripped.is_empty() {
        "0"
    } else {
        stripped
    }
}
