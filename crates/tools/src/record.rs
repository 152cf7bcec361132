//! Brand tools: the active-record reads and confirmation-gated mutations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use bk_domain::record::{Brand, BrandPatch};

use crate::args::{confirmed_property, parse_args};
use crate::authz::{brand_access, BrandAccess};
use crate::descriptor::{ToolCategory, ToolDescriptor, ToolEnv, ToolHandler};
use crate::outcome::{ToolFault, ToolOutcome};

const MAX_NAME_CHARS: usize = 120;

/// Look up the requested brand, falling back to the session's active one,
/// and report anything out of scope as not found.
pub(crate) async fn visible_brand(
    env: &ToolEnv,
    requested: Option<&str>,
) -> Result<Result<(Brand, BrandAccess), ToolOutcome>, ToolFault> {
    let Some(id) = requested.or(env.ctx.active_record_id.as_deref()) else {
        return Ok(Err(ToolOutcome::invalid(
            "No brand specified and no brand is selected. Ask the user which brand to use.",
        )));
    };
    let Some(brand) = env.services.store.get_brand(id).await? else {
        return Ok(Err(ToolOutcome::not_found("Brand")));
    };
    match brand_access(&env.ctx, &brand) {
        BrandAccess::Hidden => Ok(Err(ToolOutcome::not_found("Brand"))),
        access => Ok(Ok((brand, access))),
    }
}

fn brand_json(b: &Brand) -> Value {
    json!({
        "id": b.id,
        "name": b.name,
        "tagline": b.tagline,
        "industry": b.industry,
        "description": b.description,
        "primaryColor": b.primary_color,
        "updatedAt": b.updated_at,
    })
}

// ── list_brands ──────────────────────────────────────────────────────

struct ListBrands(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for ListBrands {
    async fn call(&self, _input: Value) -> Result<ToolOutcome, ToolFault> {
        let env = &self.0;
        let scope = if env.ctx.effective_role.is_platform_admin() {
            None
        } else {
            Some(env.ctx.tenant_id.as_str())
        };
        let brands: Vec<Value> = env
            .services
            .store
            .list_brands(scope)
            .await?
            .iter()
            .filter(|b| brand_access(&env.ctx, b) != BrandAccess::Hidden)
            .map(brand_json)
            .collect();
        let message = match brands.len() {
            0 => "No brands found".to_string(),
            1 => "Found 1 brand".to_string(),
            n => format!("Found {n} brands"),
        };
        Ok(ToolOutcome::success(message, json!({ "count": brands.len(), "brands": brands })))
    }
}

// ── get_brand ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrandRef {
    #[serde(default)]
    brand_id: Option<String>,
}

struct GetBrand(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for GetBrand {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: BrandRef = parse_args!(input);
        let (brand, access) = match visible_brand(&self.0, args.brand_id.as_deref()).await? {
            Ok(found) => found,
            Err(outcome) => return Ok(outcome),
        };
        let mut data = brand_json(&brand);
        data["canEdit"] = json!(access == BrandAccess::ReadWrite);
        Ok(ToolOutcome::success(format!("Brand \"{}\"", brand.name), json!({ "brand": data })))
    }
}

// ── update_brand ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateArgs {
    #[serde(default)]
    brand_id: Option<String>,
    #[serde(flatten)]
    patch: BrandPatch,
    #[serde(default)]
    confirmed: bool,
}

struct UpdateBrand(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for UpdateBrand {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: UpdateArgs = parse_args!(input);
        if args.patch.is_empty() {
            return Ok(ToolOutcome::invalid("Nothing to update. Provide at least one field."));
        }
        if let Some(name) = &args.patch.name {
            let name = name.trim();
            if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
                return Ok(ToolOutcome::invalid(format!(
                    "Brand name must be between 1 and {MAX_NAME_CHARS} characters"
                )));
            }
        }

        let env = &self.0;
        let (brand, access) = match visible_brand(env, args.brand_id.as_deref()).await? {
            Ok(found) => found,
            Err(outcome) => return Ok(outcome),
        };
        if access != BrandAccess::ReadWrite {
            return Ok(ToolOutcome::unauthorized("You can view this brand but not edit it"));
        }

        let fields = args.patch.field_names();
        if !args.confirmed {
            let summary = describe_patch(&args.patch);
            return Ok(ToolOutcome::confirm(
                "update_brand",
                format!("Update brand \"{}\": {summary}. Confirm to apply.", brand.name),
            ));
        }

        let Some(updated) = env.services.store.update_brand(&brand.id, &args.patch).await? else {
            return Ok(ToolOutcome::not_found("Brand"));
        };
        tracing::info!(brand_id = %updated.id, fields = ?fields, user_id = %env.ctx.user_id, "brand updated");
        Ok(ToolOutcome::mutated(
            format!("Updated brand \"{}\"", updated.name),
            json!({ "brand": brand_json(&updated), "updatedFields": fields }),
            &updated.id,
            fields,
        ))
    }
}

fn describe_patch(patch: &BrandPatch) -> String {
    let mut parts = Vec::new();
    let mut push = |label: &str, value: &Option<String>| {
        if let Some(v) = value {
            parts.push(format!("{label} to \"{v}\""));
        }
    };
    push("name", &patch.name);
    push("tagline", &patch.tagline);
    push("industry", &patch.industry);
    push("description", &patch.description);
    push("primary color", &patch.primary_color);
    format!("set {}", parts.join(", "))
}

// ── delete_brand ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteArgs {
    #[serde(default)]
    brand_id: Option<String>,
    #[serde(default)]
    confirmed: bool,
}

struct DeleteBrand(Arc<ToolEnv>);

#[async_trait]
impl ToolHandler for DeleteBrand {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault> {
        let args: DeleteArgs = parse_args!(input);
        let env = &self.0;
        let (brand, access) = match visible_brand(env, args.brand_id.as_deref()).await? {
            Ok(found) => found,
            Err(outcome) => return Ok(outcome),
        };
        if access != BrandAccess::ReadWrite {
            return Ok(ToolOutcome::unauthorized("You can view this brand but not delete it"));
        }
        if !args.confirmed {
            return Ok(ToolOutcome::confirm(
                "delete_brand",
                format!(
                    "Permanently delete brand \"{}\" and all of its assets? This cannot be undone.",
                    brand.name
                ),
            ));
        }
        if !env.services.store.delete_brand(&brand.id).await? {
            return Ok(ToolOutcome::not_found("Brand"));
        }
        tracing::info!(brand_id = %brand.id, user_id = %env.ctx.user_id, "brand deleted");
        Ok(ToolOutcome::mutated(
            format!("Deleted brand \"{}\"", brand.name),
            json!({ "brandId": brand.id }),
            &brand.id,
            vec!["deleted".to_string()],
        ))
    }
}

// ── descriptors ──────────────────────────────────────────────────────

fn brand_id_property() -> Value {
    json!({
        "type": "string",
        "description": "Brand id. Defaults to the brand currently selected in the session."
    })
}

pub(crate) fn descriptors(env: &Arc<ToolEnv>) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_brands",
            description: "List the brands the user can access.",
            input_schema: json!({ "type": "object", "properties": {} }),
            category: ToolCategory::RecordRead,
            handler: Arc::new(ListBrands(env.clone())),
        },
        ToolDescriptor {
            name: "get_brand",
            description: "Get the details of one brand.",
            input_schema: json!({
                "type": "object",
                "properties": { "brandId": brand_id_property() }
            }),
            category: ToolCategory::RecordRead,
            handler: Arc::new(GetBrand(env.clone())),
        },
        ToolDescriptor {
            name: "update_brand",
            description: "Change a brand's name, tagline, industry, description or primary color. \
                          Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "brandId": brand_id_property(),
                    "name": { "type": "string" },
                    "tagline": { "type": "string" },
                    "industry": { "type": "string" },
                    "description": { "type": "string" },
                    "primaryColor": { "type": "string", "description": "Hex color such as #1A2B3C" },
                    "confirmed": confirmed_property()
                }
            }),
            category: ToolCategory::RecordMutate,
            handler: Arc::new(UpdateBrand(env.clone())),
        },
        ToolDescriptor {
            name: "delete_brand",
            description: "Permanently delete a brand. Requires confirmation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "brandId": brand_id_property(),
                    "confirmed": confirmed_property()
                }
            }),
            category: ToolCategory::RecordMutate,
            handler: Arc::new(DeleteBrand(env.clone())),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ToolFailure;
    use crate::testutil::{fixture, handler};
    use bk_store::Brands;

    #[tokio::test]
    async fn rename_requires_confirmation_then_applies_once() {
        let fx = fixture();
        let update = handler(&fx.member_env(Some("b-own")), "update_brand");

        let pending = update.call(json!({"name": "Solstice"})).await.unwrap();
        assert!(matches!(pending, ToolOutcome::PendingConfirmation { .. }));
        assert_eq!(fx.store.get_brand("b-own").await.unwrap().unwrap().name, "Lumen");

        let done = update.call(json!({"name": "Solstice", "confirmed": true})).await.unwrap();
        let mutation = done.mutation().unwrap();
        assert_eq!(mutation.record_id, "b-own");
        assert_eq!(mutation.fields, vec!["name".to_string()]);
        assert_eq!(fx.store.get_brand("b-own").await.unwrap().unwrap().name, "Solstice");
    }

    #[tokio::test]
    async fn confirmed_false_never_mutates() {
        let fx = fixture();
        let update = handler(&fx.member_env(Some("b-own")), "update_brand");
        let out = update.call(json!({"tagline": "x", "confirmed": false})).await.unwrap();
        assert!(matches!(out, ToolOutcome::PendingConfirmation { .. }));
        assert!(fx.store.get_brand("b-own").await.unwrap().unwrap().tagline.is_none());
    }

    #[tokio::test]
    async fn foreign_tenant_brand_is_not_found() {
        let fx = fixture();
        let get = handler(&fx.member_env(None), "get_brand");
        let out = get.call(json!({"brandId": "b-foreign"})).await.unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::NotFound { .. })));
    }

    #[tokio::test]
    async fn member_cannot_edit_org_brand() {
        let fx = fixture();
        let update = handler(&fx.member_env(None), "update_brand");
        let out = update
            .call(json!({"brandId": "b-org", "name": "Nope", "confirmed": true}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::Unauthorized { .. })));
        assert_eq!(fx.store.get_brand("b-org").await.unwrap().unwrap().name, "Orbit");
    }

    #[tokio::test]
    async fn list_is_scoped_to_tenant() {
        let fx = fixture();
        let list = handler(&fx.member_env(None), "list_brands");
        let out = list.call(Value::Null).await.unwrap();
        assert_eq!(out.to_payload()["count"], 2);
    }

    #[tokio::test]
    async fn missing_brand_without_active_record_asks_which() {
        let fx = fixture();
        let get = handler(&fx.member_env(None), "get_brand");
        let out = get.call(json!({})).await.unwrap();
        assert!(matches!(out, ToolOutcome::Failed(ToolFailure::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn delete_reports_deleted_field() {
        let fx = fixture();
        let delete = handler(&fx.member_env(Some("b-own")), "delete_brand");
        let out = delete.call(json!({"confirmed": true})).await.unwrap();
        assert_eq!(out.mutation().unwrap().fields, vec!["deleted".to_string()]);
        assert!(fx.store.get_brand("b-own").await.unwrap().is_none());
    }
}
