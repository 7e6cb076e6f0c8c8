// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Firmware version normalisation and comparison module

/// Firmware version reported when a discovery payload carries no `sw` field
pub const UNKNOWN_VERSION: &str = "unknown";

/// Strip any leading non-digit prefix from a version or release tag
/// (e.g. "v13.0.0" -> "13.0.0", "release-14.1" -> "14.1")
pub fn strip_version_prefix(s: &str) -> &str {
    s.trim().trim_start_matches(|c: char| !c.is_ascii_digit())
}

/// Returns true if a firmware report confirms the install target.
///
/// Both sides are compared without their prefix. A side that is nothing but
/// prefix (e.g. "unknown") never matches.
pub fn versions_match(reported: &str, target: &str) -> bool {
    let reported = strip_version_prefix(reported);
    let target = strip_version_prefix(target);
    !reported.is_empty() && reported == target
}

/// Installed version as shown to users, `None` while the firmware is unknown
pub fn display_version(installed: &str) -> Option<String> {
    let installed = installed.trim();
    if installed.is_empty() || installed == UNKNOWN_VERSION {
        return None;
    }
    Some(format!("v{installed}"))
}
