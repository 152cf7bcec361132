//! Shared fixture for handler tests.

use std::sync::Arc;

use chrono::Utc;

use bk_domain::config::CreditsConfig;
use bk_domain::record::{Brand, CreditType, User};
use bk_store::{InMemoryJobQueue, InMemoryStore, JobQueue, Store};

use crate::descriptor::{SessionContext, ToolEnv, ToolHandler, ToolServices};
use crate::registry::all_descriptors;

pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub jobs: Arc<InMemoryJobQueue>,
}

fn user(id: &str, tenant: &str, email: &str, platform: Option<&str>, org: Option<(&str, &str)>) -> User {
    User {
        id: id.into(),
        tenant_id: tenant.into(),
        email: email.into(),
        display_name: None,
        platform_role: platform.map(Into::into),
        org_id: org.map(|(o, _)| o.into()),
        org_role: org.map(|(_, r)| r.into()),
    }
}

fn brand(id: &str, name: &str, tenant: &str, owner: &str, org: Option<&str>) -> Brand {
    Brand {
        id: id.into(),
        tenant_id: tenant.into(),
        owner_id: owner.into(),
        org_id: org.map(Into::into),
        name: name.into(),
        tagline: None,
        industry: None,
        description: None,
        primary_color: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Tenant t1 has org o1 (owner, admin, member) and a platform operator;
/// tenant t2 has one unrelated user and brand. The member holds 3 image
/// credits and no logo credits.
pub(crate) fn fixture() -> Fixture {
    let store = InMemoryStore::new();
    store.insert_user(user("u-owner", "t1", "owner@t1.test", None, Some(("o1", "owner"))));
    store.insert_user(user("u-admin", "t1", "admin@t1.test", None, Some(("o1", "admin"))));
    store.insert_user(user("u-member", "t1", "member@t1.test", None, Some(("o1", "member"))));
    store.insert_user(user("u-ops", "t1", "ops@t1.test", Some("platform-operator"), None));
    store.insert_user(user("u-other", "t2", "other@t2.test", None, None));
    store.insert_brand(brand("b-own", "Lumen", "t1", "u-member", None));
    store.insert_brand(brand("b-org", "Orbit", "t1", "u-owner", Some("o1")));
    store.insert_brand(brand("b-foreign", "Faraway", "t2", "u-other", None));
    store.set_balance("u-member", CreditType::Image, 3);
    Fixture { store: Arc::new(store), jobs: Arc::new(InMemoryJobQueue::new()) }
}

impl Fixture {
    fn env(&self, user_id: &str, active: Option<&str>, jobs: Option<Arc<dyn JobQueue>>) -> Arc<ToolEnv> {
        let u = self.store.user(user_id).expect("fixture user");
        let ctx = SessionContext {
            user_id: u.id.clone(),
            tenant_id: u.tenant_id.clone(),
            org_id: u.org_id.clone(),
            effective_role: u.effective_role(),
            active_record_id: active.map(Into::into),
            chat_session_id: "s-test".into(),
        };
        let store: Arc<dyn Store> = self.store.clone();
        Arc::new(ToolEnv { ctx, services: ToolServices::new(store, jobs, CreditsConfig::default()) })
    }

    pub fn env_for(&self, user_id: &str, active: Option<&str>) -> Arc<ToolEnv> {
        let jobs: Arc<dyn JobQueue> = self.jobs.clone();
        self.env(user_id, active, Some(jobs))
    }

    pub fn env_without_jobs(&self, user_id: &str, active: Option<&str>) -> Arc<ToolEnv> {
        self.env(user_id, active, None)
    }

    pub fn member_env(&self, active: Option<&str>) -> Arc<ToolEnv> {
        self.env_for("u-member", active)
    }
}

/// The handler registered under `name`, unfiltered.
pub(crate) fn handler(env: &Arc<ToolEnv>, name: &str) -> Arc<dyn ToolHandler> {
    all_descriptors(env)
        .into_iter()
        .find(|d| d.name == name)
        .map(|d| d.handler)
        .unwrap_or_else(|| panic!("no tool named {name}"))
}
