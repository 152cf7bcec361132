//! Role resolution.
//!
//! A session's permission level is derived from two independent fields on
//! the user record: the tenant-scoped platform role and the organization
//! membership role.  The result is never stored; it is recomputed for every
//! turn so a role change takes effect on the very next message.

use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tenant-scoped platform role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformRole {
    PlatformOperator,
    PlatformSuperuser,
    Standard,
}

impl PlatformRole {
    /// Parse a stored value. Anything unrecognized is `Standard`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "platform-operator" => Self::PlatformOperator,
            "platform-superuser" => Self::PlatformSuperuser,
            _ => Self::Standard,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlatformOperator => "platform-operator",
            Self::PlatformSuperuser => "platform-superuser",
            Self::Standard => "standard",
        }
    }
}

/// Organization membership role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Owner,
    Admin,
    Manager,
    Member,
}

impl OrgRole {
    /// Parse a stored value. Unrecognized values are `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Member => "member",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Effective role
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single resolved permission level for a session.
///
/// Variants are declared in hierarchy order, so `Ord` follows privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectiveRole {
    Base,
    TeamManager,
    TeamAdmin,
    TeamOwner,
    PlatformAdmin,
}

impl EffectiveRole {
    /// Every role, least privileged first.
    pub const ALL: [EffectiveRole; 5] = [
        EffectiveRole::Base,
        EffectiveRole::TeamManager,
        EffectiveRole::TeamAdmin,
        EffectiveRole::TeamOwner,
        EffectiveRole::PlatformAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::TeamManager => "team-manager",
            Self::TeamAdmin => "team-admin",
            Self::TeamOwner => "team-owner",
            Self::PlatformAdmin => "platform-admin",
        }
    }

    pub fn is_platform_admin(self) -> bool {
        self == Self::PlatformAdmin
    }
}

impl fmt::Display for EffectiveRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map `(platform role, org role)` to one effective role.
///
/// Platform operators and superusers are always `PlatformAdmin`, whatever
/// their org membership says.
pub fn resolve(platform: PlatformRole, org: Option<OrgRole>) -> EffectiveRole {
    match platform {
        PlatformRole::PlatformOperator | PlatformRole::PlatformSuperuser => {
            EffectiveRole::PlatformAdmin
        }
        PlatformRole::Standard => match org {
            Some(OrgRole::Owner) => EffectiveRole::TeamOwner,
            Some(OrgRole::Admin) => EffectiveRole::TeamAdmin,
            Some(OrgRole::Manager) => EffectiveRole::TeamManager,
            Some(OrgRole::Member) | None => EffectiveRole::Base,
        },
    }
}

/// [`resolve`] over raw stored strings. Missing or unknown values degrade
/// to the least privileged interpretation.
pub fn resolve_raw(platform: Option<&str>, org: Option<&str>) -> EffectiveRole {
    let platform = platform.map(PlatformRole::parse).unwrap_or(PlatformRole::Standard);
    let org = org.and_then(OrgRole::parse);
    resolve(platform, org)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn org_roles_map_directly() {
        let p = PlatformRole::Standard;
        assert_eq!(resolve(p, Some(OrgRole::Owner)), EffectiveRole::TeamOwner);
        assert_eq!(resolve(p, Some(OrgRole::Admin)), EffectiveRole::TeamAdmin);
        assert_eq!(resolve(p, Some(OrgRole::Manager)), EffectiveRole::TeamManager);
        assert_eq!(resolve(p, Some(OrgRole::Member)), EffectiveRole::Base);
        assert_eq!(resolve(p, None), EffectiveRole::Base);
    }

    #[test]
    fn platform_roles_dominate() {
        for org in [None, Some(OrgRole::Member), Some(OrgRole::Owner)] {
            assert_eq!(
                resolve(PlatformRole::PlatformSuperuser, org),
                EffectiveRole::PlatformAdmin
            );
            assert_eq!(
                resolve(PlatformRole::PlatformOperator, org),
                EffectiveRole::PlatformAdmin
            );
        }
    }

    #[test]
    fn raw_values_are_normalized() {
        assert_eq!(
            resolve_raw(Some("platform_superuser"), None),
            EffectiveRole::PlatformAdmin
        );
        assert_eq!(resolve_raw(Some("standard"), Some("ADMIN")), EffectiveRole::TeamAdmin);
        assert_eq!(resolve_raw(None, Some("captain")), EffectiveRole::Base);
        assert_eq!(resolve_raw(Some("root"), None), EffectiveRole::Base);
    }

    #[test]
    fn hierarchy_order() {
        assert!(EffectiveRole::Base < EffectiveRole::TeamManager);
        assert!(EffectiveRole::TeamManager < EffectiveRole::TeamAdmin);
        assert!(EffectiveRole::TeamAdmin < EffectiveRole::TeamOwner);
        assert!(EffectiveRole::TeamOwner < EffectiveRole::PlatformAdmin);
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&EffectiveRole::TeamManager).unwrap();
        assert_eq!(json, "\"team-manager\"");
    }

    proptest! {
        #[test]
        fn resolve_raw_is_total(platform in proptest::option::of(".*"), org in proptest::option::of(".*")) {
            let role = resolve_raw(platform.as_deref(), org.as_deref());
            prop_assert!(EffectiveRole::ALL.contains(&role));
        }

        #[test]
        fn superuser_always_platform_admin(org in proptest::option::of(".*")) {
            prop_assert_eq!(
                resolve_raw(Some("platform-superuser"), org.as_deref()),
                EffectiveRole::PlatformAdmin
            );
        }

        #[test]
        fn standard_users_never_reach_platform_admin(org in proptest::option::of(".*")) {
            prop_assert!(resolve_raw(Some("standard"), org.as_deref()) < EffectiveRole::PlatformAdmin);
        }
    }
}
