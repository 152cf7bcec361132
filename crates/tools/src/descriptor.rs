use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bk_domain::config::CreditsConfig;
use bk_domain::role::EffectiveRole;
use bk_domain::tool::ToolDefinition;
use bk_store::{JobQueue, Store};

use crate::outcome::{ToolFault, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Categories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    RecordRead,
    RecordMutate,
    Generation,
    Account,
    Organization,
    PlatformAdmin,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 6] = [
        ToolCategory::RecordRead,
        ToolCategory::RecordMutate,
        ToolCategory::Generation,
        ToolCategory::Account,
        ToolCategory::Organization,
        ToolCategory::PlatformAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecordRead => "record_read",
            Self::RecordMutate => "record_mutate",
            Self::Generation => "generation",
            Self::Account => "account",
            Self::Organization => "organization",
            Self::PlatformAdmin => "platform_admin",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session context & services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who is calling, closed over by every handler for its own checks.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: String,
    pub tenant_id: String,
    pub org_id: Option<String>,
    pub effective_role: EffectiveRole,
    pub active_record_id: Option<String>,
    pub chat_session_id: String,
}

/// Collaborators the handlers talk to.
///
/// The job queue is optional: without one, metered tools report
/// `unavailable` instead of charging credits.
#[derive(Clone)]
pub struct ToolServices {
    pub store: Arc<dyn Store>,
    pub jobs: Option<Arc<dyn JobQueue>>,
    pub credits: CreditsConfig,
}

impl ToolServices {
    pub fn new(store: Arc<dyn Store>, jobs: Option<Arc<dyn JobQueue>>, credits: CreditsConfig) -> Self {
        Self { store, jobs, credits }
    }

    pub fn can_dispatch_jobs(&self) -> bool {
        self.jobs.is_some()
    }
}

/// Everything a handler needs, shared by all handlers of one registry.
pub(crate) struct ToolEnv {
    pub ctx: SessionContext,
    pub services: ToolServices,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value) -> Result<ToolOutcome, ToolFault>;
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub category: ToolCategory,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// The model-facing definition.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: self.input_schema.clone(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}
