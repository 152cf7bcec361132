//! Organization membership tools.
//!
//! Listing needs manager or above. Every mutation needs admin or above, is
//! confirmation-gated and may only touch roles the caller is allowed to
//! assign (see [`can_assign`]).

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use bk_domain::record::{Invitation, User};
use bk_domain::role::{EffectiveRole, OrgRole};

use crate::args::{confirmed_property, parse_args};
use crate::authz::can_assign;
use crate::descriptor::{ToolCategory, ToolDescriptor, ToolEnv, ToolHandler};
use crate::outcome::{ToolFault, ToolOutcome};

fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

fn member_role(user: &User) -> OrgRole {
    user.org_role.as_deref().and_then(OrgRole::parse).unwrap_or(OrgRole::Member)
}

/// The caller's organization, provided their role reaches `min`.
fn caller_org(env: &ToolEnv, min: EffectiveRole) -> Result<&str, ToolOutcome> {
    if env.ctx.effective_role < min {
        return Err(ToolOutcome::unauthorized(
            "Your role does not allow managing organization members",
        ));
    }
    env.ctx
        .org_id
        .as_deref()
        .ok_or_else(|| ToolOutcome::invalid("You are not a member of an organization"))
}

/// Load a member of `org_id` that the caller may act on.
async fn managed_member(
    env: &ToolEnv,
    org_id: &str,
    user_id: &str,
) -> Result<Result<User, ToolOutcome>, ToolFault> {
    let target = env.services.store.get_user(user_id).await?;
    let Some(target) = target.filter(|u| u.org_id.as_deref() == Some(org_id)) else {
        return Ok(Err(ToolOutcome::not_found("Member")));
    };
    if target.id == env.ctx.user_id {
        return Ok(Err(ToolOutcome::conflict("You cannot change your own membership")));
    }
    let current = member_role(&target);
    if current == OrgRole::Owner {
        return Ok(Err(ToolOutcome::unauthorized("The organization owner cannot be changed")));
    }
    if !can_assign(env.ctx.effective_role, current) {
        return Ok(Err(ToolOutcome::unauthorized(format!(
            "Your role cannot manage members with the {} role",
            current.as_str()
        ))));
    }
    Ok(Ok(target))
}

// ── list_org_members ─────────────────────────────────────────────────

struct ListOrgMembers(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for ListOrgMembers {
    async fn call(&self, _input: Value) -> Result<ToolOutcome, ToolFault> {
        let env = &self.0;
        let org_id = match caller_org(env, EffectiveRole::TeamManager) {
            Ok(org) => org,
            Err(outcome) => return Ok(outcome),
        };
        let members: Vec<Value> = env
            .services
            .store
            .list_org_members(org_id)
            .await?
            .iter()
            .map(|u| {
                json!({
                    "userId": u.id,
                    "email": u.email,
                    "displayName": u.display_name,
                    "role": member_role(u).as_str(),
                })
            })
            .collect();
        Ok(ToolOutcome::success(
            format!("{} member(s)", members.len()),
            json!({ "members": members }),
        ))
    }
}

// ── invite_member ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteArgs {
    email: String,
    #[serde(default = "d_role")]
    role: OrgRole,
    #[serde(default)]
    confirmed: bool,
}

fn d_role() -> OrgRole {
    OrgRole::Member
}

struct InviteMember(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for InviteMember {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: InviteArgs = parse_args!(input);
        let env = &self.0;
        let org_id = match caller_org(env, EffectiveRole::TeamAdmin) {
            Ok(org) => org,
            Err(outcome) => return Ok(outcome),
        };
        let email = args.email.trim().to_ascii_lowercase();
        if !is_valid_email(&email) {
            return Ok(ToolOutcome::invalid("A valid email address is required"));
        }
        if !can_assign(env.ctx.effective_role, args.role) {
            return Ok(ToolOutcome::unauthorized(format!(
                "Your role cannot assign the {} role",
                args.role.as_str()
            )));
        }

        let store = &env.services.store;
        let existing = store.find_user_by_email(Some(&env.ctx.tenant_id), &email).await?;
        if let Some(user) = &existing {
            match user.org_id.as_deref() {
                Some(o) if o == org_id => {
                    return Ok(ToolOutcome::conflict(format!("{email} is already a member")));
                }
                Some(_) => {
                    return Ok(ToolOutcome::conflict(format!(
                        "{email} already belongs to another organization"
                    )));
                }
                None => {}
            }
        }

        if !args.confirmed {
            return Ok(ToolOutcome::confirm(
                "invite_member",
                format!("Add {email} to the organization as {}?", args.role.as_str()),
            ));
        }

        match existing {
            Some(user) => {
                if !store.set_org_membership(&user.id, Some(org_id), Some(args.role)).await? {
                    return Ok(ToolOutcome::not_found("User"));
                }
                tracing::info!(org_id, user_id = %user.id, role = args.role.as_str(), "member added");
                Ok(ToolOutcome::success(
                    format!("Added {email} as {}", args.role.as_str()),
                    json!({ "userId": user.id, "role": args.role.as_str() }),
                ))
            }
            None => {
                let invitation = Invitation {
                    id: format!("inv_{}", Uuid::new_v4().simple()),
                    org_id: org_id.to_string(),
                    email: email.clone(),
                    org_role: args.role.as_str().to_string(),
                    invited_by: env.ctx.user_id.clone(),
                    created_at: Utc::now(),
                };
                let id = invitation.id.clone();
                store.create_invitation(invitation).await?;
                tracing::info!(org_id, invitation_id = %id, "invitation created");
                Ok(ToolOutcome::success(
                    format!("Invitation sent to {email}"),
                    json!({ "invitationId": id, "role": args.role.as_str() }),
                ))
            }
        }
    }
}

// ── update_member_role ───────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleArgs {
    user_id: String,
    role: OrgRole,
    #[serde(default)]
    confirmed: bool,
}

struct UpdateMemberRole(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for UpdateMemberRole {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: RoleArgs = parse_args!(input);
        let env = &self.0;
        let org_id = match caller_org(env, EffectiveRole::TeamAdmin) {
            Ok(org) => org,
            Err(outcome) => return Ok(outcome),
        };
        if !can_assign(env.ctx.effective_role, args.role) {
            return Ok(ToolOutcome::unauthorized(format!(
                "Your role cannot assign the {} role",
                args.role.as_str()
            )));
        }
        let target = match managed_member(env, org_id, &args.user_id).await? {
            Ok(user) => user,
            Err(outcome) => return Ok(outcome),
        };
        let current = member_role(&target);
        if current == args.role {
            return Ok(ToolOutcome::conflict(format!(
                "{} already has the {} role",
                target.label(),
                current.as_str()
            )));
        }
        if !args.confirmed {
            return Ok(ToolOutcome::confirm(
                "update_member_role",
                format!(
                    "Change {} from {} to {}?",
                    target.label(),
                    current.as_str(),
                    args.role.as_str()
                ),
            ));
        }
        if !env.services.store.set_org_membership(&target.id, Some(org_id), Some(args.role)).await? {
            return Ok(ToolOutcome::not_found("Member"));
        }
        tracing::info!(org_id, user_id = %target.id, role = args.role.as_str(), "member role changed");
        Ok(ToolOutcome::success(
            format!("{} is now {}", target.label(), args.role.as_str()),
            json!({ "userId": target.id, "previousRole": current.as_str(), "role": args.role.as_str() }),
        ))
    }
}

// ── remove_member ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveArgs {
    user_id: String,
    #[serde(default)]
    confirmed: bool,
}

struct RemoveMember(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for RemoveMember {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: RemoveArgs = parse_args!(input);
        let env = &self.0;
        let org_id = match caller_org(env, EffectiveRole::TeamAdmin) {
            Ok(org) => org,
            Err(outcome) => return Ok(outcome),
        };
        let target = match managed_member(env, org_id, &args.user_id).await? {
            Ok(user) => user,
            Err(outcome) => return Ok(outcome),
        };
        if !args.confirmed {
            return Ok(ToolOutcome::confirm(
                "remove_member",
                format!("Remove {} from the organization?", target.label()),
            ));
        }
        if !env.services.store.set_org_membership(&target.id, None, None).await? {
            return Ok(ToolOutcome::not_found("Member"));
        }
        tracing::info!(org_id, user_id = %target.id, "member removed");
        Ok(ToolOutcome::success(
            format!("Removed {}", target.label()),
            json!({ "userId": target.id }),
        ))
    }
}

pub(crate) fn descriptors(env: &Arc<ToolEnv>) -> Vec<ToolDescriptor> {
    let role = json!({ "type": "string", "enum": ["admin", "manager", "member"] });
    vec![
        ToolDescriptor {
            name: "list_org_members",
            description: "List the members of the user's organization and their roles.",
            input_schema: json!({ "type": "object", "properties": {} }),
            category: ToolCategory::Organization,
            handler: Arc::new(ListOrgMembers(env.clone())),
        },
        ToolDescriptor {
            name: "invite_member",
            description: "Add an existing user to the organization or send an invitation by email. \
                          Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "email": { "type": "string" },
                    "role": role,
                    "confirmed": confirmed_property()
                },
                "required": ["email"]
            }),
            category: ToolCategory::Organization,
            handler: Arc::new(InviteMember(env.clone())),
        },
        ToolDescriptor {
            name: "update_member_role",
            description: "Change an organization member's role. Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "role": role,
                    "confirmed": confirmed_property()
                },
                "required": ["userId", "role"]
            }),
            category: ToolCategory::Organization,
            handler: Arc::new(UpdateMemberRole(env.clone())),
        },
        ToolDescriptor {
            name: "remove_member",
            description: "Remove a member from the organization. Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "confirmed": confirmed_property()
                },
                "required": ["userId"]
            }),
            category: ToolCategory::Organization,
            handler: Arc::new(RemoveMember(env.clone())),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ToolFailure;
    use crate::testutil::{fixture, handler};
    use bk_store::Directory;

    #[tokio::test]
    async fn owner_promotes_member_after_confirmation() {
        let fx = fixture();
        let update = handler(&fx.env_for("u-owner", None), "update_member_role");
        let args = json!({"userId": "u-member", "role": "manager"});
        let pending = update.call(args.clone()).await.unwrap();
        assert!(matches!(pending, ToolOutcome::PendingConfirmation { .. }));
        let before = fx.store.get_user("u-member").await.unwrap().unwrap();
        assert_eq!(before.org_role.as_deref(), Some("member"));

        let mut confirmed = args;
        confirmed["confirmed"] = json!(true);
        update.call(confirmed).await.unwrap();
        let after = fx.store.get_user("u-member").await.unwrap().unwrap();
        assert_eq!(after.org_role.as_deref(), Some("manager"));
    }

    #[tokio::test]
    async fn admin_cannot_touch_owner_or_grant_admin() {
        let fx = fixture();
        let env = fx.env_for("u-admin", None);
        let update = handler(&env, "update_member_role");
        let out = update
            .call(json!({"userId": "u-owner", "role": "member", "confirmed": true}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::Unauthorized { .. })));

        let out = update
            .call(json!({"userId": "u-member", "role": "admin", "confirmed": true}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn base_member_cannot_list() {
        let fx = fixture();
        let out = handler(&fx.member_env(None), "list_org_members").call(Value::Null).await.unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn unknown_email_creates_invitation() {
        let fx = fixture();
        let invite = handler(&fx.env_for("u-admin", None), "invite_member");
        let out = invite
            .call(json!({"email": "New@Example.com", "confirmed": true}))
            .await
            .unwrap();
        assert!(out.to_payload()["invitationId"].is_string());
        let invites = fx.store.invitations();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].email, "new@example.com");
    }

    #[tokio::test]
    async fn inviting_existing_member_conflicts() {
        let fx = fixture();
        let invite = handler(&fx.env_for("u-admin", None), "invite_member");
        let out = invite.call(json!({"email": "member@t1.test"})).await.unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::Conflict { .. })));
    }

    #[tokio::test]
    async fn remove_outside_org_is_not_found() {
        let fx = fixture();
        let remove = handler(&fx.env_for("u-owner", None), "remove_member");
        let out = remove.call(json!({"userId": "u-other", "confirmed": true})).await.unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::NotFound { .. })));
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("new@example.com"));
        assert!(!is_valid_email("new@example"));
        assert!(!is_valid_email("no spaces@example.com"));
        assert!(!is_valid_email("@example.com"));
    }
}
