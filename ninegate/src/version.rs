// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse and canonicalize 9P version strings for negotiation.
// Author: Lukas Bower

//! Version string handling.
//!
//! The accepted spellings are `9P2000`, `9P2000.u`, `9P2000.L`, and
//! `9P2000.L.Google.N` for an extension number N. `9P2000.u` parses but is
//! not served. The canonical string for extension 0 is the bare `9P2000.L`:
//! Linux kernel clients match that exact string, so `.Google.0` must never be
//! echoed back.

use ninegate_codec::Dialect;

/// Highest `9P2000.L.Google.N` extension this server understands. Clients
/// asking for more negotiate down to this.
pub const HIGHEST_SUPPORTED_VERSION: u32 = 11;

/// Base protocol families distinguishable by version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseVersion {
    /// Classic 9P2000.
    P2000,
    /// 9P2000.u. Parsed, never served.
    P2000U,
    /// 9P2000.L.
    P2000L,
}

impl BaseVersion {
    /// The message-set dialect for this base version, if it is servable.
    #[must_use]
    pub fn dialect(self) -> Option<Dialect> {
        match self {
            BaseVersion::P2000 => Some(Dialect::P2000),
            BaseVersion::P2000U => None,
            BaseVersion::P2000L => Some(Dialect::P2000L),
        }
    }
}

/// Parse a client version string into its base and extension number.
///
/// Returns `None` for anything unrecognized; negotiation then answers
/// `unknown`.
#[must_use]
pub fn parse_version(s: &str) -> Option<(BaseVersion, u32)> {
    match s {
        "9P2000" => return Some((BaseVersion::P2000, 0)),
        "9P2000.u" => return Some((BaseVersion::P2000U, 0)),
        "9P2000.L" => return Some((BaseVersion::P2000L, 0)),
        _ => {}
    }
    let suffix = s.strip_prefix("9P2000.L.Google.")?;
    if suffix.is_empty() || suffix.starts_with('+') || suffix.starts_with('-') {
        return None;
    }
    let version: u32 = suffix.parse().ok()?;
    Some((BaseVersion::P2000L, version))
}

/// The canonical string for a negotiated version.
///
/// Extension 0 always renders as plain `9P2000.L`.
#[must_use]
pub fn version_string(base: BaseVersion, version: u32) -> String {
    match base {
        BaseVersion::P2000 => "9P2000".to_string(),
        BaseVersion::P2000U => "9P2000.u".to_string(),
        BaseVersion::P2000L => {
            if version == 0 {
                "9P2000.L".to_string()
            } else {
                format!("9P2000.L.Google.{version}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_round_trip() {
        for i in 0..1024u32 {
            let s = version_string(BaseVersion::P2000L, i);
            let (base, version) = parse_version(&s).expect("parse");
            assert_eq!(base, BaseVersion::P2000L);
            assert_eq!(version, i);
        }
    }

    #[test]
    fn google_zero_canonicalizes_to_bare_l() {
        let (base, version) = parse_version("9P2000.L.Google.0").expect("parse");
        assert_eq!(version_string(base, version), "9P2000.L");
    }

    #[test]
    fn strings_round_trip() {
        for s in [
            "9P2000",
            "9P2000.u",
            "9P2000.L",
            "9P2000.L.Google.1",
            "9P2000.L.Google.347823894",
        ] {
            let (base, version) = parse_version(s).expect("parse");
            assert_eq!(version_string(base, version), s);
        }
    }

    #[test]
    fn rejects_malformed_strings() {
        for s in [
            "9P",
            "9P.L",
            "9P200.L",
            "9P2001.L",
            "9P2000.L.Google.",
            "9P2000.L.Google.-1",
            "9P2000.L.Google.+1",
            "9P2000.L.Google.3546343826724305832",
            "9P2000.L.Google.1.2",
            "",
            "unknown",
        ] {
            assert!(parse_version(s).is_none(), "{s} should not parse");
        }
    }

    #[test]
    fn parse_results() {
        assert_eq!(parse_version("9P2000"), Some((BaseVersion::P2000, 0)));
        assert_eq!(parse_version("9P2000.u"), Some((BaseVersion::P2000U, 0)));
        assert_eq!(parse_version("9P2000.L"), Some((BaseVersion::P2000L, 0)));
        assert_eq!(
            parse_version("9P2000.L.Google.4"),
            Some((BaseVersion::P2000L, 4))
        );
    }
}
