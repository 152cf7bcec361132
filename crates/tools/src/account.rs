//! Account tools. Always scoped to the calling user.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use bk_domain::record::CreditType;

use crate::args::parse_args;
use crate::descriptor::{ToolCategory, ToolDescriptor, ToolEnv, ToolHandler};
use crate::outcome::{ToolFault, ToolOutcome};

const MAX_HISTORY: usize = 50;

pub(crate) async fn balances(env: &ToolEnv, user_id: &str) -> Result<Value, ToolFault> {
    let mut out = Map::new();
    for ct in CreditType::ALL {
        let n = env.services.store.balance(user_id, ct).await?;
        out.insert(ct.as_str().to_string(), json!(n));
    }
    Ok(Value::Object(out))
}

struct GetAccount(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for GetAccount {
    async fn call(&self, _input: Value) -> Result<ToolOutcome, ToolFault> {
        let env = &self.0;
        let Some(user) = env.services.store.get_user(&env.ctx.user_id).await? else {
            return Ok(ToolOutcome::not_found("Account"));
        };
        let credits = balances(env, &user.id).await?;
        Ok(ToolOutcome::success(
            format!("Account for {}", user.label()),
            json!({
                "account": {
                    "email": user.email,
                    "displayName": user.display_name,
                    "role": env.ctx.effective_role.as_str(),
                    "organizationId": user.org_id,
                    "credits": credits,
                }
            }),
        ))
    }
}

struct GetCreditBalance(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for GetCreditBalance {
    async fn call(&self, _input: Value) -> Result<ToolOutcome, ToolFault> {
        let credits = balances(&self.0, &self.0.ctx.user_id).await?;
        let c = &self.0.services.credits;
        Ok(ToolOutcome::success(
            "Current credit balance",
            json!({
                "credits": credits,
                "costs": {
                    "image": c.unit_cost(CreditType::Image),
                    "logo": c.unit_cost(CreditType::Logo),
                }
            }),
        ))
    }
}

#[derive(Deserialize)]
struct HistoryArgs {
    #[serde(default = "d_limit")]
    limit: usize,
}

fn d_limit() -> usize {
    10
}

struct GetCreditHistory(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for GetCreditHistory {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: HistoryArgs = parse_args!(input);
        let limit = args.limit.clamp(1, MAX_HISTORY);
        let entries = self.0.services.store.ledger(&self.0.ctx.user_id, limit).await?;
        let rows: Vec<Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "creditType": e.credit_type.as_str(),
                    "amount": e.amount,
                    "reason": e.reason,
                    "timestamp": e.timestamp,
                })
            })
            .collect();
        Ok(ToolOutcome::success(
            format!("{} ledger entries", rows.len()),
            json!({ "entries": rows }),
        ))
    }
}

pub(crate) fn descriptors(env: &Arc<ToolEnv>) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "get_account",
            description: "Get the user's account details and credit balances.",
            input_schema: json!({ "type": "object", "properties": {} }),
            category: ToolCategory::Account,
            handler: Arc::new(GetAccount(env.clone())),
        },
        ToolDescriptor {
            name: "get_credit_balance",
            description: "Get the user's remaining image and logo credits and what each generation costs.",
            input_schema: json!({ "type": "object", "properties": {} }),
            category: ToolCategory::Account,
            handler: Arc::new(GetCreditBalance(env.clone())),
        },
        ToolDescriptor {
            name: "get_credit_history",
            description: "List recent credit grants, debits and refunds, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1, "maximum": MAX_HISTORY }
                }
            }),
            category: ToolCategory::Account,
            handler: Arc::new(GetCreditHistory(env.clone())),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixture, handler};

    #[tokio::test]
    async fn balance_lists_every_credit_type() {
        let fx = fixture();
        let out = handler(&fx.member_env(None), "get_credit_balance")
            .call(Value::Null)
            .await
            .unwrap();
        let p = out.to_payload();
        assert_eq!(p["credits"]["image"], 3);
        assert_eq!(p["credits"]["logo"], 0);
    }

    #[tokio::test]
    async fn account_reports_effective_role() {
        let fx = fixture();
        let out = handler(&fx.env_for("u-owner", None), "get_account").call(Value::Null).await.unwrap();
        assert_eq!(out.to_payload()["account"]["role"], "team-owner");
    }
}
