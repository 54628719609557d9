//! Interdomain names: `name@domain`.

use crate::error::{MeshError, Result};

pub const DOMAIN_SEPARATOR: char = '@';

/// Splits `name@domain` into its parts. A bare name has no domain.
///
/// # Errors
///
/// Returns `InvalidArgument` for more than one separator or an empty
/// local part or domain.
pub fn split(name: &str) -> Result<(&str, Option<&str>)> {
    let mut parts = name.splitn(3, DOMAIN_SEPARATOR);
    let local = parts.next().unwrap_or_default();
    let domain = parts.next();
    if parts.next().is_some() {
        return Err(MeshError::InvalidArgument(format!(
            "{name}: at most one '{DOMAIN_SEPARATOR}' is allowed"
        )));
    }
    match domain {
        None => Ok((local, None)),
        Some(domain) if local.is_empty() || domain.is_empty() => Err(
            MeshError::InvalidArgument(format!("{name}: empty name or domain")),
        ),
        Some(domain) => Ok((local, Some(domain))),
    }
}

/// Domain suffix of `name`, if any.
///
/// # Errors
///
/// See [`split`].
pub fn domain_of(name: &str) -> Result<Option<&str>> {
    split(name).map(|(_, domain)| domain)
}

/// `name` without its domain suffix. Malformed names come back unchanged.
#[must_use]
pub fn strip(name: &str) -> &str {
    match split(name) {
        Ok((local, _)) => local,
        Err(_) => name,
    }
}

/// `name@domain`, or `name` when `domain` is empty.
#[must_use]
pub fn join(name: &str, domain: &str) -> String {
    if domain.is_empty() {
        name.to_string()
    } else {
        format!("{name}{DOMAIN_SEPARATOR}{domain}")
    }
}

#[must_use]
pub fn is_interdomain(name: &str) -> bool {
    matches!(domain_of(name), Ok(Some(_)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
