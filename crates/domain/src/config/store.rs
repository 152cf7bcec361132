use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// In-memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON fixture with users, brands and credit balances loaded at startup.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}
