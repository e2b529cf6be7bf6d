//! Platform version compatibility for persisted records.

use crate::error::{Error, Result};

/// Version stamped on every record this build writes
pub const PLATFORM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest major version whose records can still be loaded
pub const MIN_SUPPORTED_MAJOR: u64 = 1;

fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let core = version.split(['-', '+']).next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = match parts.next() {
        Some(minor) => minor.trim().parse().ok()?,
        None => 0,
    };
    Some((major, minor))
}

/// Check that a record written by `found` can be loaded by this build.
///
/// Older versions back to [`MIN_SUPPORTED_MAJOR`] load; records from a
/// newer major version, or with an unreadable version, are refused.
pub fn check_compatible(id: &str, found: &str) -> Result<()> {
    let incompatible = || Error::IncompatibleVersion {
        id: id.to_string(),
        found: found.to_string(),
        supported: PLATFORM_VERSION.to_string(),
    };

    let (found_major, _) = parse_major_minor(found).ok_or_else(incompatible)?;
    let (current_major, _) = parse_major_minor(PLATFORM_VERSION).ok_or_else(incompatible)?;

    if found_major > current_major || found_major < MIN_SUPPORTED_MAJOR {
        return Err(incompatible());
    }
    Ok(())
}
