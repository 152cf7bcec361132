//! Authorization checks re-run inside every handler.
//!
//! The category filter decides which tools a session may see; these checks
//! decide which records a tool may touch.

use bk_domain::record::Brand;
use bk_domain::role::{EffectiveRole, OrgRole};

use crate::descriptor::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrandAccess {
    /// Out of scope. Reported to the model as not found.
    Hidden,
    ReadOnly,
    ReadWrite,
}

pub fn brand_access(ctx: &SessionContext, brand: &Brand) -> BrandAccess {
    if ctx.effective_role.is_platform_admin() {
        return BrandAccess::ReadWrite;
    }
    if brand.tenant_id != ctx.tenant_id {
        return BrandAccess::Hidden;
    }
    if brand.owner_id == ctx.user_id {
        return BrandAccess::ReadWrite;
    }
    let same_org = match (&brand.org_id, &ctx.org_id) {
        (Some(b), Some(c)) => b == c,
        _ => false,
    };
    if !same_org {
        return BrandAccess::Hidden;
    }
    if ctx.effective_role >= EffectiveRole::TeamManager {
        BrandAccess::ReadWrite
    } else {
        BrandAccess::ReadOnly
    }
}

pub fn can_read_brand(ctx: &SessionContext, brand: &Brand) -> bool {
    brand_access(ctx, brand) != BrandAccess::Hidden
}

pub fn can_mutate_brand(ctx: &SessionContext, brand: &Brand) -> bool {
    brand_access(ctx, brand) == BrandAccess::ReadWrite
}

/// Whether `caller` may grant or revoke membership at `role`.
///
/// Owners manage admins and below, admins manage managers and below.
/// Ownership itself is never assignable through the assistant.
pub fn can_assign(caller: EffectiveRole, role: OrgRole) -> bool {
    match role {
        OrgRole::Owner => false,
        OrgRole::Admin => caller >= EffectiveRole::TeamOwner,
        OrgRole::Manager | OrgRole::Member => caller >= EffectiveRole::TeamAdmin,
    }
}
