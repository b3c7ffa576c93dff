use serde::{Deserialize, Serialize};

// ── Command types ────────────────────────────────────────────────────

/// Result code reported for an accepted command.
pub const RESULT_SUCCESS: &str = "SUCCESS";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub result: String,
    #[serde(default)]
    pub result_code: Option<String>,
    #[serde(default)]
    pub result_detail: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.result.eq_ignore_ascii_case(RESULT_SUCCESS)
    }
}

// ── Image types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub os_display_name: Option<String>,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u32>,
    pub resource_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageList {
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageQuery {
    pub platform: String,
    pub architecture: String,
    pub cpu_count: u32,
    pub memory_mb: u32,
}

// ── Network types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    pub name: String,
    pub location: String,
    pub resource_path: String,
}

// ── Location types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location: String,
    pub display_name: String,
    pub max_cpu: u32,
    pub max_ram_mb: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationList {
    pub locations: Vec<Location>,
}
