//! Role-scoped tool filtering.
//!
//! Each effective role declares its own allow-list. Higher roles happen to be
//! supersets today but nothing here relies on that: edit one row without
//! touching the others.

use bk_domain::role::EffectiveRole;
use bk_domain::trace::TraceEvent;

use crate::descriptor::{ToolCategory, ToolDescriptor};

use ToolCategory::*;

const BASE: &[ToolCategory] = &[RecordRead, RecordMutate, Generation, Account];
const TEAM_MANAGER: &[ToolCategory] = &[RecordRead, RecordMutate, Generation, Account, Organization];
const TEAM_ADMIN: &[ToolCategory] = &[RecordRead, RecordMutate, Generation, Account, Organization];
const TEAM_OWNER: &[ToolCategory] = &[RecordRead, RecordMutate, Generation, Account, Organization];
const PLATFORM_ADMIN: &[ToolCategory] =
    &[RecordRead, RecordMutate, Generation, Account, Organization, PlatformAdmin];

pub fn allowed_categories(role: EffectiveRole) -> &'static [ToolCategory] {
    match role {
        EffectiveRole::Base => BASE,
        EffectiveRole::TeamManager => TEAM_MANAGER,
        EffectiveRole::TeamAdmin => TEAM_ADMIN,
        EffectiveRole::TeamOwner => TEAM_OWNER,
        EffectiveRole::PlatformAdmin => PLATFORM_ADMIN,
    }
}

/// Keep only the descriptors whose category `role` may use.
pub fn filter(all: Vec<ToolDescriptor>, role: EffectiveRole) -> Vec<ToolDescriptor> {
    let allowed = allowed_categories(role);
    let offered = all.len();
    let kept: Vec<ToolDescriptor> =
        all.into_iter().filter(|d| allowed.contains(&d.category)).collect();

    TraceEvent::ToolsFiltered {
        effective_role: role.as_str().to_string(),
        offered,
        available: kept.len(),
    }
    .emit();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::descriptor::ToolHandler;
    use crate::outcome::{ToolFault, ToolOutcome};

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn call(&self, _input: Value) -> Result<ToolOutcome, ToolFault> {
            Ok(ToolOutcome::success("ok", Value::Null))
        }
    }

    fn one_per_category() -> Vec<ToolDescriptor> {
        ToolCategory::ALL
            .iter()
            .map(|c| ToolDescriptor {
                name: c.as_str(),
                description: "test",
                input_schema: json!({"type": "object"}),
                category: *c,
                handler: Arc::new(Noop),
            })
            .collect()
    }

    #[test]
    fn filtered_set_respects_allow_list_for_every_role() {
        for role in EffectiveRole::ALL {
            let allowed = allowed_categories(role);
            let kept = filter(one_per_category(), role);
            assert_eq!(kept.len(), allowed.len(), "role {role}");
            assert!(kept.iter().all(|d| allowed.contains(&d.category)), "role {role}");
        }
    }

    #[test]
    fn platform_tools_only_for_platform_admin() {
        for role in EffectiveRole::ALL {
            let has = filter(one_per_category(), role)
                .iter()
                .any(|d| d.category == ToolCategory::PlatformAdmin);
            assert_eq!(has, role == EffectiveRole::PlatformAdmin, "role {role}");
        }
    }

    #[test]
    fn base_users_cannot_manage_organizations() {
        assert!(!allowed_categories(EffectiveRole::Base).contains(&ToolCategory::Organization));
        assert!(allowed_categories(EffectiveRole::TeamManager).contains(&ToolCategory::Organization));
    }
}
