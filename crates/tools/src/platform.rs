//! Platform-admin tools. Cross-tenant, so the handlers re-check the role.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use bk_domain::record::CreditType;
use bk_domain::trace::TraceEvent;

use crate::account::balances;
use crate::args::{confirmed_property, parse_args};
use crate::descriptor::{ToolCategory, ToolDescriptor, ToolEnv, ToolHandler};
use crate::outcome::{ToolFault, ToolOutcome};

const MAX_GRANT: u32 = 10_000;

fn require_platform_admin(env: &ToolEnv) -> Option<ToolOutcome> {
    (!env.ctx.effective_role.is_platform_admin())
        .then(|| ToolOutcome::unauthorized("Platform administrator access required"))
}

// ── lookup_user ──────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupArgs {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

struct LookupUser(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for LookupUser {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: LookupArgs = parse_args!(input);
        let env = &self.0;
        if let Some(denied) = require_platform_admin(env) {
            return Ok(denied);
        }
        let store = &env.services.store;
        let user = match (args.user_id.as_deref(), args.email.as_deref()) {
            (Some(id), _) => store.get_user(id).await?,
            (None, Some(email)) => store.find_user_by_email(None, email.trim()).await?,
            (None, None) => return Ok(ToolOutcome::invalid("Provide an email or a userId")),
        };
        let Some(user) = user else {
            return Ok(ToolOutcome::not_found("User"));
        };
        let credits = balances(env, &user.id).await?;
        Ok(ToolOutcome::success(
            format!("Found {}", user.label()),
            json!({
                "user": {
                    "userId": user.id,
                    "tenantId": user.tenant_id,
                    "email": user.email,
                    "displayName": user.display_name,
                    "organizationId": user.org_id,
                    "role": user.effective_role().as_str(),
                    "credits": credits,
                }
            }),
        ))
    }
}

// ── grant_credits ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantArgs {
    user_id: String,
    credit_type: String,
    amount: u32,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    confirmed: bool,
}

struct GrantCredits(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for GrantCredits {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: GrantArgs = parse_args!(input);
        let env = &self.0;
        if let Some(denied) = require_platform_admin(env) {
            return Ok(denied);
        }
        let Some(credit_type) = CreditType::parse(&args.credit_type) else {
            return Ok(ToolOutcome::invalid("creditType must be \"image\" or \"logo\""));
        };
        if args.amount == 0 || args.amount > MAX_GRANT {
            return Ok(ToolOutcome::invalid(format!("amount must be between 1 and {MAX_GRANT}")));
        }
        let store = &env.services.store;
        let Some(user) = store.get_user(&args.user_id).await? else {
            return Ok(ToolOutcome::not_found("User"));
        };
        if !args.confirmed {
            return Ok(ToolOutcome::confirm(
                "grant_credits",
                format!(
                    "Grant {} {} credit(s) to {}?",
                    args.amount,
                    credit_type.as_str(),
                    user.label()
                ),
            ));
        }

        let reason = match args.reason.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => format!("grant by {}: {r}", env.ctx.user_id),
            _ => format!("grant by {}", env.ctx.user_id),
        };
        let balance = store.credit(&user.id, credit_type, args.amount, &reason).await?;
        TraceEvent::CreditsGranted {
            user_id: user.id.clone(),
            credit_type: credit_type.as_str().to_string(),
            amount: args.amount,
            granted_by: env.ctx.user_id.clone(),
        }
        .emit();
        Ok(ToolOutcome::success(
            format!("Granted {} {} credit(s) to {}", args.amount, credit_type.as_str(), user.label()),
            json!({ "userId": user.id, "creditType": credit_type.as_str(), "balance": balance }),
        ))
    }
}

pub(crate) fn descriptors(env: &Arc<ToolEnv>) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "lookup_user",
            description: "Find any user on the platform by email or id, with role and balances.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "email": { "type": "string" },
                    "userId": { "type": "string" }
                }
            }),
            category: ToolCategory::PlatformAdmin,
            handler: Arc::new(LookupUser(env.clone())),
        },
        ToolDescriptor {
            name: "grant_credits",
            description: "Add image or logo credits to a user's balance. Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "creditType": { "type": "string", "enum": ["image", "logo"] },
                    "amount": { "type": "integer", "minimum": 1, "maximum": MAX_GRANT },
                    "reason": { "type": "string" },
                    "confirmed": confirmed_property()
                },
                "required": ["userId", "creditType", "amount"]
            }),
            category: ToolCategory::PlatformAdmin,
            handler: Arc::new(GrantCredits(env.clone())),
        },
    ]
}
