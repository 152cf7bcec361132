//! The capability registry.
//!
//! [`build_registry`] constructs every tool in the system with the caller's
//! context closed over; [`ToolSet::for_session`] narrows it to what the
//! caller's effective role may see.

use std::sync::Arc;

use bk_domain::tool::ToolDefinition;

use crate::descriptor::{SessionContext, ToolDescriptor, ToolEnv, ToolServices};
use crate::{account, filter, generation, organization, platform, record};

pub fn build_registry(ctx: SessionContext, services: ToolServices) -> Vec<ToolDescriptor> {
    let env = Arc::new(ToolEnv { ctx, services });
    all_descriptors(&env)
}

pub(crate) fn all_descriptors(env: &Arc<ToolEnv>) -> Vec<ToolDescriptor> {
    let mut all = record::descriptors(env);
    all.extend(generation::descriptors(env));
    all.extend(account::descriptors(env));
    all.extend(organization::descriptors(env));
    all.extend(platform::descriptors(env));
    all
}

/// The tools exposed to one turn.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: Vec<ToolDescriptor>,
}

impl ToolSet {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    /// Build the registry for `ctx` and keep what its role allows.
    pub fn for_session(ctx: SessionContext, services: ToolServices) -> Self {
        let role = ctx.effective_role;
        Self::new(filter::filter(build_registry(ctx, services), role))
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
