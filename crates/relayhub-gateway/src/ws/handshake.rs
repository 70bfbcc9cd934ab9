//! Query-string parameters accepted on the `/ws` upgrade (§4.12).

use relayhub_core::Role;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ConnParams {
    pub token: Option<String>,
    pub session: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    pub pwd_question: Option<String>,
    pub pwd_answer: Option<String>,
    pub role_password: Option<String>,
    pub device_id: Option<String>,
}

fn default_name() -> String {
    "guest".to_string()
}

impl ConnParams {
    /// Parses `role`, defaulting to `Member` when absent or unrecognized.
    pub fn resolved_role(&self) -> Role {
        self.role.as_deref().and_then(|r| r.parse().ok()).unwrap_or(Role::Member)
    }
}
