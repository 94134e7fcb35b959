//! Facts captured at login, used to gate version-dependent behavior.
//!
//! Every place the client needs to branch on cluster version goes through
//! `SessionContext::is_at_least`, rather than comparing version strings
//! inline at each call site.

use crate::types::Guid;
use semver::Version;

#[derive(Debug, Clone)]
pub struct SessionUser {
    pub guid: Guid,
    pub username: String,
    pub privileges: Vec<String>,
}

/// Captured once at login and never mutated afterward.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub cluster_id: String,
    pub base_url: String,
    pub version: Version,
    pub timezone: String,
    pub is_cloud: bool,
    pub orgs_enabled: bool,
    pub user: SessionUser,
}

impl SessionContext {
    /// True if the connected platform's version is at least `version`
    /// (e.g. `"10.3.0"`). Every V1/V2 compatibility branch should be written
    /// against this rather than comparing version strings inline.
    pub fn is_at_least(&self, version: &str) -> bool {
        match Version::parse(version) {
            Ok(minimum) => self.version >= minimum,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(version: &str) -> SessionContext {
        SessionContext {
            cluster_id: "cluster-1".into(),
            base_url: "https://ts.example.com".into(),
            version: Version::parse(version).unwrap(),
            timezone: "UTC".into(),
            is_cloud: false,
            orgs_enabled: false,
            user: SessionUser {
                guid: Guid::from("user-guid"),
                username: "admin".into(),
                privileges: vec!["ADMINISTRATION".into()],
            },
        }
    }

    #[test]
    fn is_at_least_gates_compat_branches() {
        let session = session_at("10.3.0");
        assert!(session.is_at_least("10.3.0"));
        assert!(session.is_at_least("10.2.0"));
        assert!(!session.is_at_least("10.4.0"));
    }

    #[test]
    fn below_cutoff_falls_back_to_v1() {
        let session = session_at("9.9.0");
        assert!(!session.is_at_least("10.3.0"));
    }
}
