//! In-memory store.
//!
//! Every table sits behind its own `parking_lot` lock. Credit balances and
//! the ledger share one mutex so a debit is a single critical section:
//! check, decrement and ledger append happen together or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use bk_domain::error::{Error, Result};
use bk_domain::record::{
    Brand, BrandPatch, ChatMessage, ChatSession, CreditType, DebitOutcome, Invitation,
    LedgerEntry, User,
};
use bk_domain::role::OrgRole;
use bk_domain::trace::TraceEvent;

use crate::seed::SeedData;
use crate::traits::{Brands, Chat, Credits, Directory};

#[derive(Default)]
struct CreditBook {
    balances: HashMap<(String, CreditType), u32>,
    ledger: Vec<LedgerEntry>,
}

#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, User>>,
    invitations: RwLock<Vec<Invitation>>,
    brands: RwLock<HashMap<String, Brand>>,
    sessions: RwLock<HashMap<String, ChatSession>>,
    /// Per-session transcript in append order.
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
    credits: Mutex<CreditBook>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for user in seed.users {
            store.insert_user(user);
        }
        for brand in seed.brands {
            store.insert_brand(brand);
        }
        {
            let mut book = store.credits.lock();
            for c in seed.credits {
                *book.balances.entry((c.user_id, c.credit_type)).or_insert(0) += c.amount;
            }
        }
        tracing::info!(
            users = store.users.read().len(),
            brands = store.brands.read().len(),
            "in-memory store seeded"
        );
        store
    }

    pub fn insert_user(&self, user: User) {
        self.users.write().insert(user.id.clone(), user);
    }

    pub fn insert_brand(&self, brand: Brand) {
        self.brands.write().insert(brand.id.clone(), brand);
    }

    /// Set a balance directly, without a ledger entry.
    pub fn set_balance(&self, user_id: &str, credit_type: CreditType, amount: u32) {
        self.credits
            .lock()
            .balances
            .insert((user_id.to_owned(), credit_type), amount);
    }

    /// Synchronous read of one user, for fixtures and bootstrap.
    pub fn user(&self, user_id: &str) -> Option<User> {
        self.users.read().get(user_id).cloned()
    }

    pub fn invitations(&self) -> Vec<Invitation> {
        self.invitations.read().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl Directory for InMemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn find_user_by_email(
        &self,
        tenant_id: Option<&str>,
        email: &str,
    ) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| {
                tenant_id.map_or(true, |t| u.tenant_id == t) && u.email.eq_ignore_ascii_case(email)
            })
            .cloned())
    }

    async fn list_org_members(&self, org_id: &str) -> Result<Vec<User>> {
        let mut members: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| u.org_id.as_deref() == Some(org_id))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(members)
    }

    async fn set_org_membership(
        &self,
        user_id: &str,
        org_id: Option<&str>,
        org_role: Option<OrgRole>,
    ) -> Result<bool> {
        let mut users = self.users.write();
        let Some(user) = users.get_mut(user_id) else {
            return Ok(false);
        };
        user.org_id = org_id.map(str::to_owned);
        user.org_role = org_role.map(|r| r.as_str().to_owned());
        Ok(true)
    }

    async fn create_invitation(&self, invitation: Invitation) -> Result<()> {
        self.invitations.write().push(invitation);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Brands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl Brands for InMemoryStore {
    async fn get_brand(&self, brand_id: &str) -> Result<Option<Brand>> {
        Ok(self.brands.read().get(brand_id).cloned())
    }

    async fn list_brands(&self, tenant_id: Option<&str>) -> Result<Vec<Brand>> {
        let mut brands: Vec<Brand> = self
            .brands
            .read()
            .values()
            .filter(|b| tenant_id.map_or(true, |t| b.tenant_id == t))
            .cloned()
            .collect();
        brands.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(brands)
    }

    async fn update_brand(&self, brand_id: &str, patch: &BrandPatch) -> Result<Option<Brand>> {
        let mut brands = self.brands.write();
        Ok(brands.get_mut(brand_id).map(|b| {
            patch.apply(b);
            b.clone()
        }))
    }

    async fn delete_brand(&self, brand_id: &str) -> Result<bool> {
        Ok(self.brands.write().remove(brand_id).is_some())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl Chat for InMemoryStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn create_session(&self, session: ChatSession) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.session_id) {
            return Err(Error::Store(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn upsert_session(
        &self,
        session_id: &str,
        user_id: &str,
        active_record_id: Option<&str>,
    ) -> Result<ChatSession> {
        // Lock order: messages before sessions, same as append_message.
        let messages = self.messages.read();
        let mut sessions = self.sessions.write();
        let transcript = messages.get(session_id);
        let now = Utc::now();

        let session = sessions.entry(session_id.to_owned()).or_insert_with(|| {
            let mut s = ChatSession::new(session_id, user_id);
            s.message_count = transcript.map_or(0, |t| t.len() as u64);
            s
        });
        if session.user_id != user_id {
            return Err(Error::Store(format!(
                "session {session_id} belongs to another user"
            )));
        }
        if let Some(record) = active_record_id {
            session.active_record_id = Some(record.to_owned());
        }
        session.last_message_at = Some(
            transcript
                .and_then(|t| t.last())
                .map_or(now, |m| m.created_at),
        );
        Ok(session.clone())
    }

    async fn end_session(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(s) => {
                if s.ended_at.is_none() {
                    s.ended_at = Some(Utc::now());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let mut out: Vec<ChatSession> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.last_message_at
                .unwrap_or(b.created_at)
                .cmp(&a.last_message_at.unwrap_or(a.created_at))
        });
        Ok(out)
    }

    async fn append_message(&self, message: ChatMessage) -> Result<()> {
        let mut messages = self.messages.write();
        let mut sessions = self.sessions.write();
        if let Some(s) = sessions.get_mut(&message.session_id) {
            s.message_count += 1;
            s.last_message_at = Some(message.created_at);
        }
        TraceEvent::TranscriptAppend {
            session_id: message.session_id.clone(),
            role: message.role.as_str().to_owned(),
        }
        .emit();
        messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read();
        let Some(transcript) = messages.get(session_id) else {
            return Ok(Vec::new());
        };
        let end = match before {
            Some(id) => match transcript.iter().position(|m| m.id == id) {
                Some(pos) => pos,
                None => return Ok(Vec::new()),
            },
            None => transcript.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(transcript[start..end].to_vec())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl Credits for InMemoryStore {
    async fn balance(&self, user_id: &str, credit_type: CreditType) -> Result<u32> {
        Ok(self
            .credits
            .lock()
            .balances
            .get(&(user_id.to_owned(), credit_type))
            .copied()
            .unwrap_or(0))
    }

    async fn try_debit(
        &self,
        user_id: &str,
        credit_type: CreditType,
        amount: u32,
        reason: &str,
    ) -> Result<DebitOutcome> {
        let mut book = self.credits.lock();
        let balance = book
            .balances
            .entry((user_id.to_owned(), credit_type))
            .or_insert(0);
        if *balance < amount {
            return Ok(DebitOutcome::Insufficient {
                required: amount,
                remaining: *balance,
            });
        }
        *balance -= amount;
        let remaining = *balance;
        book.ledger.push(LedgerEntry {
            user_id: user_id.to_owned(),
            credit_type,
            amount: -i64::from(amount),
            reason: reason.to_owned(),
            timestamp: Utc::now(),
        });
        Ok(DebitOutcome::Debited { remaining })
    }

    async fn credit(
        &self,
        user_id: &str,
        credit_type: CreditType,
        amount: u32,
        reason: &str,
    ) -> Result<u32> {
        let mut book = self.credits.lock();
        let balance = book
            .balances
            .entry((user_id.to_owned(), credit_type))
            .or_insert(0);
        *balance = balance.saturating_add(amount);
        let new_balance = *balance;
        book.ledger.push(LedgerEntry {
            user_id: user_id.to_owned(),
            credit_type,
            amount: i64::from(amount),
            reason: reason.to_owned(),
            timestamp: Utc::now(),
        });
        Ok(new_balance)
    }

    async fn ledger(&self, user_id: &str, limit: usize) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .credits
            .lock()
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
