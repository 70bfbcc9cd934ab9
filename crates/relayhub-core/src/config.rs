use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;
pub const ROOM_RING_CAP: usize = 1000;
pub const PENDING_PASSWORD_TTL_SECS: u64 = 5 * 60;
pub const REAPER_INTERVAL_SECS: u64 = 5 * 60;
pub const SUMMARY_THRESHOLD_CHARS: usize = 12_000;
pub const SUMMARY_MAX_AGE_SECS: u64 = 30 * 60;
pub const SUMMARY_MAX_COUNT: usize = 100;
pub const ASR_PENDING_AUDIO_CAP: usize = 500;
pub const DIALOG_AUDIO_BUFFER_CAP: usize = 250;
pub const DIALOG_TRANSCRIPT_RING_CAP: usize = 20;
pub const DIALOG_MAX_CONTEXT_FILES: usize = 10;
pub const DEFAULT_MAX_AGENT_ITERATIONS: usize = 10;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
pub const HEAP_WARNING_BYTES: u64 = 400 * 1024 * 1024;
pub const HEAP_CRITICAL_BYTES: u64 = 500 * 1024 * 1024;

/// Top-level config (config.toml + RELAYHUB_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
            },
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            blob: BlobConfig::default(),
            agent: AgentConfig::default(),
            voice: VoiceConfig::default(),
            reaper: ReaperConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Deployment-wide secrets gating `owner`/`admin` connects (§3), and whether
/// anonymous (tokenless) connections are accepted at all (§4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "bool_true")]
    pub allow_anonymous: bool,
    pub owner_role_password: Option<String>,
    pub admin_role_password: Option<String>,
    /// Shared secret used to verify bearer tokens; `None` disables token auth
    /// and every connection is treated as anonymous.
    pub jwt_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_anonymous: true,
            owner_role_password: None,
            admin_role_password: None,
            jwt_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default = "default_blob_root")]
    pub root: String,
    #[serde(default = "default_hmac_secret")]
    pub signing_secret: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: default_blob_root(),
            signing_secret: default_hmac_secret(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_auto_save_threshold")]
    pub auto_save_threshold: usize,
    #[serde(default = "default_auto_save_keep")]
    pub auto_save_keep_count: usize,
    #[serde(default = "default_model")]
    pub model: String,
    /// Read from `RELAYHUB_AGENT__API_KEY`; empty disables live LLM calls.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    /// Directories `read_file`/`list_files`/`search_files` may touch.
    #[serde(default = "default_allowed_read_paths")]
    pub allowed_read_paths: Vec<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_AGENT_ITERATIONS,
            auto_save_threshold: default_auto_save_threshold(),
            auto_save_keep_count: default_auto_save_keep(),
            model: default_model(),
            api_key: String::new(),
            base_url: default_anthropic_base_url(),
            allowed_read_paths: default_allowed_read_paths(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_wake_words")]
    pub default_wake_words: Vec<String>,
    #[serde(default = "default_upstream_endpoint")]
    pub upstream_ws_url: String,
    pub upstream_auth_token: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            default_wake_words: default_wake_words(),
            upstream_ws_url: default_upstream_endpoint(),
            upstream_auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_heap_warning")]
    pub heap_warning_bytes: u64,
    #[serde(default = "default_heap_critical")]
    pub heap_critical_bytes: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: REAPER_INTERVAL_SECS,
            heap_warning_bytes: HEAP_WARNING_BYTES,
            heap_critical_bytes: HEAP_CRITICAL_BYTES,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.relayhub/hub.db")
}
fn default_blob_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.relayhub/blobs")
}
fn default_hmac_secret() -> String {
    "change-me".to_string()
}
fn default_max_iterations() -> usize {
    DEFAULT_MAX_AGENT_ITERATIONS
}
fn default_auto_save_threshold() -> usize {
    60
}
fn default_auto_save_keep() -> usize {
    20
}
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_allowed_read_paths() -> Vec<String> {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    vec![format!("{home}/.relayhub/workspace")]
}
fn default_tool_timeout_secs() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}
fn default_wake_words() -> Vec<String> {
    vec!["AI", "ai", "Ai", "小爱", "小艾", "哎", "诶"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_upstream_endpoint() -> String {
    "wss://dialog.example.invalid/v1/stream".to_string()
}
fn default_reaper_interval() -> u64 {
    REAPER_INTERVAL_SECS
}
fn default_heap_warning() -> u64 {
    HEAP_WARNING_BYTES
}
fn default_heap_critical() -> u64 {
    HEAP_CRITICAL_BYTES
}

impl HubConfig {
    /// Load config from a TOML file with RELAYHUB_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `RELAYHUB_CONFIG`, then
    /// `./config.toml`. Missing file is not an error — defaults apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("RELAYHUB_CONFIG").ok())
            .unwrap_or_else(|| "config.toml".to_string());

        let config: HubConfig = Figment::from(figment::providers::Serialized::defaults(
            HubConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("RELAYHUB_").split("__"))
        .extract()
        .map_err(|e| crate::error::HubError::Config(e.to_string()))?;

        Ok(config)
    }
}
