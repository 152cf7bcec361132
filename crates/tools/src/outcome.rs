//! Tool results.
//!
//! Expected business conditions (not found, unauthorized, short on credits,
//! awaiting confirmation) are values of [`ToolOutcome`] so the model can
//! explain them. Only infrastructure faults travel as [`ToolFault`].

use serde_json::{json, Map, Value};

use bk_domain::error::Error;
use bk_domain::record::CreditType;

/// A change applied to a record, reported so clients viewing it can refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMutation {
    pub record_id: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success {
        message: String,
        data: Value,
        mutation: Option<RecordMutation>,
    },
    /// The tool did nothing; the caller must re-invoke it with
    /// `confirmed: true` to proceed.
    PendingConfirmation { action: String, message: String },
    Failed(ToolFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolFailure {
    NotFound { what: String },
    Unauthorized { message: String },
    Conflict { message: String },
    InvalidInput { message: String },
    InsufficientBalance {
        credit_type: CreditType,
        required: u32,
        remaining: u32,
    },
    Unavailable { message: String },
}

/// Unexpected infrastructure failure inside a handler.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ToolFault(#[from] pub Error);

impl ToolOutcome {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self::Success { message: message.into(), data, mutation: None }
    }

    pub fn mutated(
        message: impl Into<String>,
        data: Value,
        record_id: &str,
        fields: Vec<String>,
    ) -> Self {
        Self::Success {
            message: message.into(),
            data,
            mutation: Some(RecordMutation { record_id: record_id.to_owned(), fields }),
        }
    }

    pub fn confirm(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PendingConfirmation { action: action.into(), message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Failed(ToolFailure::NotFound { what: what.into() })
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Failed(ToolFailure::Unauthorized { message: message.into() })
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Failed(ToolFailure::Conflict { message: message.into() })
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Failed(ToolFailure::InvalidInput { message: message.into() })
    }

    pub fn mutation(&self) -> Option<&RecordMutation> {
        match self {
            Self::Success { mutation, .. } => mutation.as_ref(),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// JSON handed back to the model.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Success { message, data, .. } => {
                let mut obj = Map::new();
                obj.insert("success".into(), Value::Bool(true));
                obj.insert("message".into(), Value::String(message.clone()));
                match data {
                    Value::Object(fields) => {
                        for (k, v) in fields {
                            obj.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                    Value::Null => {}
                    other => {
                        obj.insert("data".into(), other.clone());
                    }
                }
                Value::Object(obj)
            }
            Self::PendingConfirmation { action, message } => json!({
                "requiresConfirmation": true,
                "action": action,
                "message": message,
            }),
            Self::Failed(failure) => failure.to_payload(),
        }
    }
}

impl ToolFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Conflict { .. } => "conflict",
            Self::InvalidInput { .. } => "invalid_input",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::Unavailable { .. } => "unavailable",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotFound { what } => format!("{what} not found"),
            Self::Unauthorized { message }
            | Self::Conflict { message }
            | Self::InvalidInput { message }
            | Self::Unavailable { message } => message.clone(),
            Self::InsufficientBalance { credit_type, required, remaining } => format!(
                "Not enough {} credits: {required} required, {remaining} remaining",
                credit_type.as_str()
            ),
        }
    }

    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "error": self.message(),
            "code": self.code(),
        });
        if let Self::InsufficientBalance { credit_type, required, remaining } = self {
            payload["creditType"] = json!(credit_type.as_str());
            payload["required"] = json!(required);
            payload["remaining"] = json!(remaining);
            payload["shortfall"] = json!(required.saturating_sub(*remaining));
        }
        payload
    }
}
