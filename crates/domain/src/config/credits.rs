use serde::{Deserialize, Serialize};

use crate::record::CreditType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metered generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsConfig {
    /// Credits charged per generated image.
    #[serde(default = "d_1")]
    pub image_cost: u32,
    /// Credits charged per logo batch.
    #[serde(default = "d_1")]
    pub logo_cost: u32,
    #[serde(default = "d_max_images")]
    pub max_images_per_request: u32,
    /// Job type names handed to the queue.
    #[serde(default = "d_image_job")]
    pub image_job_type: String,
    #[serde(default = "d_logo_job")]
    pub logo_job_type: String,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            image_cost: d_1(),
            logo_cost: d_1(),
            max_images_per_request: d_max_images(),
            image_job_type: d_image_job(),
            logo_job_type: d_logo_job(),
        }
    }
}

impl CreditsConfig {
    /// Unit cost for one credit type.
    pub fn unit_cost(&self, credit_type: CreditType) -> u32 {
        match credit_type {
            CreditType::Image => self.image_cost,
            CreditType::Logo => self.logo_cost,
        }
    }
}

fn d_1() -> u32 {
    1
}
fn d_max_images() -> u32 {
    4
}
fn d_image_job() -> String {
    "image-generation".into()
}
fn d_logo_job() -> String {
    "logo-generation".into()
}
