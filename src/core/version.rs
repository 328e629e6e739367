//! Firmware version handling
//!
//! Versions found in NVM images come in several spellings ("6.07", "7.18",
//! "7.18.1"), so parsing is lenient and always yields a full semver version.

use std::sync::OnceLock;

use regex::Regex;
use semver::Version;

use crate::error::{NvmError, Result};

/// Newest NVM3 protocol file format this crate can read and write
pub const MAX_PROTOCOL_FILE_FORMAT: u8 = 5;

/// Parses `major[.minor[.patch]]`, filling missing components with 0
pub fn parse_version(version: &str) -> Result<Version> {
    let mut parts = [0u64; 3];
    let mut count = 0;
    for part in version.trim().split('.') {
        if count == parts.len() {
            return Err(invalid_version(version));
        }
        parts[count] = part.parse().map_err(|_| invalid_version(version))?;
        count += 1;
    }
    if count == 0 {
        return Err(invalid_version(version));
    }
    Ok(Version::new(parts[0], parts[1], parts[2]))
}

fn invalid_version(version: &str) -> NvmError {
    NvmError::InvalidJson(format!("Invalid version \"{}\"", version))
}

/// Protocol file format a given protocol (SDK) version writes
pub fn protocol_file_format(version: &Version) -> Result<u8> {
    if *version < Version::new(7, 0, 0) {
        return Err(NvmError::not_supported(format!(
            "Protocol version {} is too old for the NVM3 format",
            version
        )));
    }

    let format = if *version >= Version::new(7, 21, 0) {
        5
    } else if *version >= Version::new(7, 16, 0) {
        4
    } else if *version >= Version::new(7, 15, 3) {
        3
    } else if *version >= Version::new(7, 12, 0) {
        2
    } else if *version >= Version::new(7, 11, 0) {
        1
    } else {
        0
    };
    Ok(format)
}

/// Whether `version` is the "255.x.y" placeholder some firmware writes
/// instead of a real application version
pub fn is_sentinel_application_version(version: &str) -> bool {
    static SENTINEL: OnceLock<Regex> = OnceLock::new();
    SENTINEL
        .get_or_init(|| Regex::new(r"^255\.\d+\.\d+$").expect("valid regex"))
        .is_match(version)
}

/// Formats a 500-series "major.minor" version, e.g. "6.07"
pub fn format_version_500(major: u8, minor: u8) -> String {
    format!("{}.{:02}", major, minor)
}
