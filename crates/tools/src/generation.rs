//! Metered generation tools.
//!
//! Both tools share one interlock: check the balance, ask for confirmation
//! with the cost, debit atomically, then hand the job to the queue. A failed
//! hand-off refunds the debit before the fault propagates.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use bk_domain::record::{CreditType, DebitOutcome};
use bk_domain::trace::TraceEvent;

use crate::args::{confirmed_property, parse_args};
use crate::authz::BrandAccess;
use crate::descriptor::{ToolCategory, ToolDescriptor, ToolEnv, ToolHandler};
use crate::outcome::{ToolFailure, ToolFault, ToolOutcome};
use crate::record::visible_brand;

const MAX_PROMPT_CHARS: usize = 2000;

/// One paid job, fully described before any credit moves.
struct MeteredJob {
    tool: &'static str,
    job_type: String,
    credit_type: CreditType,
    cost: u32,
    description: String,
    payload: Value,
}

async fn run_metered(env: &ToolEnv, job: MeteredJob, confirmed: bool) -> Result<ToolOutcome, ToolFault> {
    let Some(queue) = env.services.jobs.clone() else {
        return Ok(ToolOutcome::Failed(ToolFailure::Unavailable {
            message: "Generation is temporarily unavailable. Please try again later.".into(),
        }));
    };
    let store = &env.services.store;
    let user_id = env.ctx.user_id.as_str();

    let balance = store.balance(user_id, job.credit_type).await?;
    if balance < job.cost {
        return Ok(refuse(user_id, job.credit_type, job.cost, balance));
    }

    if !confirmed {
        return Ok(ToolOutcome::confirm(
            job.tool,
            format!(
                "{} will use {} {} credit(s); you have {balance}. Confirm to proceed.",
                job.description,
                job.cost,
                job.credit_type.as_str()
            ),
        ));
    }

    let reason = format!("{} ({})", job.tool, env.ctx.chat_session_id);
    let remaining = match store.try_debit(user_id, job.credit_type, job.cost, &reason).await? {
        DebitOutcome::Debited { remaining } => remaining,
        DebitOutcome::Insufficient { required, remaining } => {
            return Ok(refuse(user_id, job.credit_type, required, remaining));
        }
    };
    TraceEvent::CreditsDebited {
        user_id: user_id.to_string(),
        credit_type: job.credit_type.as_str().to_string(),
        amount: job.cost,
        remaining,
    }
    .emit();

    match queue.enqueue(&job.job_type, job.payload).await {
        Ok(job_id) => {
            TraceEvent::JobEnqueued {
                job_id: job_id.clone(),
                job_type: job.job_type.clone(),
                user_id: user_id.to_string(),
            }
            .emit();
            Ok(ToolOutcome::success(
                format!("{} started", job.description),
                json!({
                    "jobId": job_id,
                    "creditsUsed": job.cost,
                    "creditType": job.credit_type.as_str(),
                    "remaining": remaining,
                }),
            ))
        }
        Err(e) => {
            tracing::error!(user_id, job_type = %job.job_type, error = %e, "job dispatch failed, refunding");
            store
                .credit(user_id, job.credit_type, job.cost, &format!("refund: {reason}"))
                .await?;
            TraceEvent::CreditsRefunded {
                user_id: user_id.to_string(),
                credit_type: job.credit_type.as_str().to_string(),
                amount: job.cost,
            }
            .emit();
            Err(ToolFault(e))
        }
    }
}

fn refuse(user_id: &str, credit_type: CreditType, required: u32, remaining: u32) -> ToolOutcome {
    TraceEvent::CreditsRefused {
        user_id: user_id.to_string(),
        credit_type: credit_type.as_str().to_string(),
        required,
        remaining,
    }
    .emit();
    ToolOutcome::Failed(ToolFailure::InsufficientBalance { credit_type, required, remaining })
}

// ── generate_images ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageArgs {
    #[serde(default)]
    brand_id: Option<String>,
    prompt: String,
    #[serde(default = "d_count")]
    count: u32,
    #[serde(default)]
    confirmed: bool,
}

fn d_count() -> u32 {
    1
}

struct GenerateImages(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for GenerateImages {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: ImageArgs = parse_args!(input);
        let env = &self.0;
        let max = env.services.credits.max_images_per_request;
        if args.count == 0 || args.count > max {
            return Ok(ToolOutcome::invalid(format!("count must be between 1 and {max}")));
        }
        let prompt = args.prompt.trim();
        if prompt.is_empty() || prompt.chars().count() > MAX_PROMPT_CHARS {
            return Ok(ToolOutcome::invalid(format!(
                "prompt must be between 1 and {MAX_PROMPT_CHARS} characters"
            )));
        }

        let brand = match visible_brand(env, args.brand_id.as_deref()).await? {
            Ok((brand, BrandAccess::ReadWrite)) => brand,
            Ok(_) => return Ok(ToolOutcome::unauthorized("You cannot generate assets for this brand")),
            Err(outcome) => return Ok(outcome),
        };

        let credits = &env.services.credits;
        let job = MeteredJob {
            tool: "generate_images",
            job_type: credits.image_job_type.clone(),
            credit_type: CreditType::Image,
            cost: credits.unit_cost(CreditType::Image).saturating_mul(args.count),
            description: format!("Generating {} image(s) for \"{}\"", args.count, brand.name),
            payload: json!({
                "userId": env.ctx.user_id,
                "brandId": brand.id,
                "chatSessionId": env.ctx.chat_session_id,
                "prompt": prompt,
                "count": args.count,
            }),
        };
        run_metered(env, job, args.confirmed).await
    }
}

// ── generate_logo ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoArgs {
    #[serde(default)]
    brand_id: Option<String>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    confirmed: bool,
}

struct GenerateLogo(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for GenerateLogo {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: LogoArgs = parse_args!(input);
        let env = &self.0;
        let brand = match visible_brand(env, args.brand_id.as_deref()).await? {
            Ok((brand, BrandAccess::ReadWrite)) => brand,
            Ok(_) => return Ok(ToolOutcome::unauthorized("You cannot generate assets for this brand")),
            Err(outcome) => return Ok(outcome),
        };

        let credits = &env.services.credits;
        let job = MeteredJob {
            tool: "generate_logo",
            job_type: credits.logo_job_type.clone(),
            credit_type: CreditType::Logo,
            cost: credits.unit_cost(CreditType::Logo),
            description: format!("Generating a logo for \"{}\"", brand.name),
            payload: json!({
                "userId": env.ctx.user_id,
                "brandId": brand.id,
                "chatSessionId": env.ctx.chat_session_id,
                "brandName": brand.name,
                "style": args.style,
            }),
        };
        run_metered(env, job, args.confirmed).await
    }
}

pub(crate) fn descriptors(env: &Arc<ToolEnv>) -> Vec<ToolDescriptor> {
    let max = env.services.credits.max_images_per_request;
    vec![
        ToolDescriptor {
            name: "generate_images",
            description: "Generate brand images from a prompt. Costs image credits; check the \
                          balance and tell the user the cost first. Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "brandId": { "type": "string" },
                    "prompt": { "type": "string", "description": "What the images should show" },
                    "count": { "type": "integer", "minimum": 1, "maximum": max },
                    "confirmed": confirmed_property()
                },
                "required": ["prompt"]
            }),
            category: ToolCategory::Generation,
            handler: Arc::new(GenerateImages(env.clone())),
        },
        ToolDescriptor {
            name: "generate_logo",
            description: "Generate a logo for a brand. Costs logo credits; check the balance and \
                          tell the user the cost first. Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "brandId": { "type": "string" },
                    "style": { "type": "string", "description": "Optional style hint, e.g. minimal, vintage" },
                    "confirmed": confirmed_property()
                }
            }),
            category: ToolCategory::Generation,
            handler: Arc::new(GenerateLogo(env.clone())),
        },
    ]
}
