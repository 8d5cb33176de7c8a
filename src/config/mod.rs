use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Artifact bucket name
    pub storage_bucket: String,

    /// S3-compatible endpoint URL
    pub storage_endpoint: String,

    /// Access key ID for the artifact bucket
    pub storage_access_key: String,

    /// Secret access key for the artifact bucket
    pub storage_secret_key: String,

    /// Public base URL under which uploaded artifacts are served
    /// (e.g., "https://cdn.example.com/offers")
    pub storage_public_base_url: String,

    /// Hard wall-clock budget for a single render, in milliseconds
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Explicit Chrome/Chromium executable path; autodetected when unset
    #[serde(default)]
    pub chrome_executable: Option<String>,

    /// Hosts allowed as webhook callback targets (comma-separated)
    #[serde(default)]
    pub webhook_allowlist: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_render_timeout_ms() -> u64 {
    45_000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
