use async_trait::async_trait;

use bk_domain::error::Result;
use bk_domain::record::{
    Brand, BrandPatch, ChatMessage, ChatSession, CreditType, DebitOutcome, Invitation,
    LedgerEntry, User,
};
use bk_domain::role::OrgRole;

/// Users and organization membership.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Look a user up by email, within one tenant or across all of them.
    async fn find_user_by_email(
        &self,
        tenant_id: Option<&str>,
        email: &str,
    ) -> Result<Option<User>>;

    async fn list_org_members(&self, org_id: &str) -> Result<Vec<User>>;

    /// Set or clear a user's org membership. Returns `false` if the user
    /// does not exist.
    async fn set_org_membership(
        &self,
        user_id: &str,
        org_id: Option<&str>,
        org_role: Option<OrgRole>,
    ) -> Result<bool>;

    async fn create_invitation(&self, invitation: Invitation) -> Result<()>;
}

/// The active-record table.
#[async_trait]
pub trait Brands: Send + Sync {
    async fn get_brand(&self, brand_id: &str) -> Result<Option<Brand>>;

    /// All brands in `tenant_id`, or every brand when `None`.
    async fn list_brands(&self, tenant_id: Option<&str>) -> Result<Vec<Brand>>;

    /// Apply `patch`, returning the updated brand or `None` if it is gone.
    async fn update_brand(&self, brand_id: &str, patch: &BrandPatch) -> Result<Option<Brand>>;

    async fn delete_brand(&self, brand_id: &str) -> Result<bool>;
}

/// Chat sessions and their append-only transcript.
#[async_trait]
pub trait Chat: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>>;

    async fn create_session(&self, session: ChatSession) -> Result<()>;

    /// Create the session if absent, otherwise refresh its bookkeeping.
    /// A `Some` active record replaces the pinned one.
    async fn upsert_session(
        &self,
        session_id: &str,
        user_id: &str,
        active_record_id: Option<&str>,
    ) -> Result<ChatSession>;

    async fn end_session(&self, session_id: &str) -> Result<bool>;

    /// Sessions owned by `user_id`, most recently active first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>>;

    async fn append_message(&self, message: ChatMessage) -> Result<()>;

    /// Up to `limit` messages, oldest first. With `before`, only messages
    /// strictly older than that message id are considered.
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<ChatMessage>>;
}

/// Metered credit balances.
#[async_trait]
pub trait Credits: Send + Sync {
    async fn balance(&self, user_id: &str, credit_type: CreditType) -> Result<u32>;

    /// Atomic conditional decrement: the balance never goes negative.
    async fn try_debit(
        &self,
        user_id: &str,
        credit_type: CreditType,
        amount: u32,
        reason: &str,
    ) -> Result<DebitOutcome>;

    /// Add credits (grants and refunds). Returns the new balance.
    async fn credit(
        &self,
        user_id: &str,
        credit_type: CreditType,
        amount: u32,
        reason: &str,
    ) -> Result<u32>;

    /// Ledger entries for `user_id`, newest first.
    async fn ledger(&self, user_id: &str, limit: usize) -> Result<Vec<LedgerEntry>>;
}

/// Everything the gateway needs from persistence.
pub trait Store: Directory + Brands + Chat + Credits {}

impl<T: Directory + Brands + Chat + Credits> Store for T {}
