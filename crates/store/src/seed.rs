use std::path::Path;

use serde::Deserialize;

use bk_domain::error::{Error, Result};
use bk_domain::record::{Brand, CreditType, User};

/// JSON fixture loaded into the in-memory store at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub brands: Vec<Brand>,
    #[serde(default)]
    pub credits: Vec<SeedCredit>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCredit {
    pub user_id: String,
    pub credit_type: CreditType,
    pub amount: u32,
}

impl SeedData {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading seed {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_fixture() {
        let raw = r#"{
            "users": [{"id": "u1", "tenantId": "t1", "email": "a@x.io", "orgId": "o1", "orgRole": "owner"}],
            "brands": [{"id": "b1", "tenantId": "t1", "ownerId": "u1", "name": "Lumen"}],
            "credits": [{"userId": "u1", "creditType": "image", "amount": 5}]
        }"#;
        let seed = SeedData::from_json(raw).unwrap();
        assert_eq!(seed.users[0].org_role.as_deref(), Some("owner"));
        assert_eq!(seed.brands[0].name, "Lumen");
        assert_eq!(seed.credits[0].credit_type, CreditType::Image);
    }

    #[test]
    fn missing_sections_default_empty() {
        let seed = SeedData::from_json("{}").unwrap();
        assert!(seed.users.is_empty() && seed.brands.is_empty() && seed.credits.is_empty());
    }
}
