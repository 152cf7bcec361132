//! Persisted records shared by the store, the tools and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::role::{self, EffectiveRole};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Users & brands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Raw platform role as stored; see [`role::PlatformRole::parse`].
    #[serde(default)]
    pub platform_role: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    /// Raw org membership role as stored; see [`role::OrgRole::parse`].
    #[serde(default)]
    pub org_role: Option<String>,
}

impl User {
    pub fn effective_role(&self) -> EffectiveRole {
        role::resolve_raw(self.platform_role.as_deref(), self.org_role.as_deref())
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// The "active record" a chat session can be pinned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: String,
    pub tenant_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Brand {
    /// Compact one-paragraph summary used in the system prompt.
    pub fn summary(&self) -> String {
        let mut out = format!("Brand \"{}\" (id {})", self.name, self.id);
        if let Some(t) = &self.tagline {
            out.push_str(&format!(", tagline \"{t}\""));
        }
        if let Some(i) = &self.industry {
            out.push_str(&format!(", industry {i}"));
        }
        if let Some(c) = &self.primary_color {
            out.push_str(&format!(", primary color {c}"));
        }
        if let Some(d) = &self.description {
            out.push_str(&format!(". {d}"));
        }
        out
    }
}

/// A partial update to a brand. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
}

impl BrandPatch {
    /// camelCase names of the fields this patch sets, in declaration order.
    pub fn field_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.name.is_some() {
            out.push("name".to_owned());
        }
        if self.tagline.is_some() {
            out.push("tagline".to_owned());
        }
        if self.industry.is_some() {
            out.push("industry".to_owned());
        }
        if self.description.is_some() {
            out.push("description".to_owned());
        }
        if self.primary_color.is_some() {
            out.push("primaryColor".to_owned());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    pub fn apply(&self, brand: &mut Brand) {
        if let Some(v) = &self.name {
            brand.name = v.clone();
        }
        if let Some(v) = &self.tagline {
            brand.tagline = Some(v.clone());
        }
        if let Some(v) = &self.industry {
            brand.industry = Some(v.clone());
        }
        if let Some(v) = &self.description {
            brand.description = Some(v.clone());
        }
        if let Some(v) = &self.primary_color {
            brand.primary_color = Some(v.clone());
        }
        brand.updated_at = Utc::now();
    }
}

/// A pending invitation for someone not yet in the tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub org_id: String,
    pub email: String,
    pub org_role: String,
    pub invited_by: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: String,
    pub active_record_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
    /// Set once the client explicitly ends the session.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            active_record_id: None,
            created_at: Utc::now(),
            last_message_at: None,
            message_count: 0,
            ended_at: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn base(session_id: &str, role: MessageRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role,
            content,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(session_id: &str, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::User, content.into())
    }

    pub fn assistant(session_id: &str, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::Assistant, content.into())
    }

    pub fn tool(
        session_id: &str,
        tool_name: &str,
        input: serde_json::Value,
        result: serde_json::Value,
    ) -> Self {
        let mut msg = Self::base(session_id, MessageRole::Tool, String::new());
        msg.tool_name = Some(tool_name.to_owned());
        msg.tool_input = Some(input);
        msg.tool_result = Some(result);
        msg
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditType {
    Image,
    Logo,
}

impl CreditType {
    pub const ALL: [CreditType; 2] = [CreditType::Image, CreditType::Logo];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Logo => "logo",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Some(Self::Image),
            "logo" | "logos" => Some(Self::Logo),
            _ => None,
        }
    }
}

/// One ledger line. Debits are negative, grants and refunds positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub user_id: String,
    pub credit_type: CreditType,
    pub amount: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of an atomic conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { remaining: u32 },
    Insufficient { required: u32, remaining: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brand() -> Brand {
        Brand {
            id: "b1".into(),
            tenant_id: "t1".into(),
            owner_id: "u1".into(),
            org_id: None,
            name: "Lumen".into(),
            tagline: None,
            industry: Some("coffee".into()),
            description: None,
            primary_color: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut b = brand();
        let patch = BrandPatch { name: Some("Solstice".into()), ..Default::default() };
        patch.apply(&mut b);
        assert_eq!(b.name, "Solstice");
        assert_eq!(b.industry.as_deref(), Some("coffee"));
        assert_eq!(patch.field_names(), vec!["name".to_owned()]);
    }

    #[test]
    fn empty_patch() {
        assert!(BrandPatch::default().is_empty());
    }

    #[test]
    fn user_role_resolution() {
        let user = User {
            id: "u1".into(),
            tenant_id: "t1".into(),
            email: "a@b.c".into(),
            display_name: None,
            platform_role: None,
            org_id: Some("o1".into()),
            org_role: Some("manager".into()),
        };
        assert_eq!(user.effective_role(), EffectiveRole::TeamManager);
        assert_eq!(user.label(), "a@b.c");
    }

    #[test]
    fn credit_type_parse() {
        assert_eq!(CreditType::parse("Images"), Some(CreditType::Image));
        assert_eq!(CreditType::parse("logo"), Some(CreditType::Logo));
        assert_eq!(CreditType::parse("video"), None);
    }

    #[test]
    fn summary_mentions_name_and_id() {
        let s = brand().summary();
        assert!(s.contains("\"Lumen\""));
        assert!(s.contains("b1"));
        assert!(s.contains("coffee"));
    }
}
