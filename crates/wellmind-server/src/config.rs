use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler tick period. Schedules are evaluated at minute
    /// granularity, so values above 60 will skip fire times.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_machine_id")]
    pub machine_id: i32,
    #[serde(default = "default_node_id")]
    pub node_id: i32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_db_path() -> String {
    "data/wellmind.db".to_string()
}

fn default_gateway_url() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_max_batch_size() -> usize {
    100
}

fn default_tick_secs() -> u64 {
    60
}

fn default_machine_id() -> i32 {
    1
}

fn default_node_id() -> i32 {
    1
}

fn default_retention_days() -> u32 {
    30
}

fn default_http_port() -> u16 {
    8080
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            timeout_secs: default_gateway_timeout_secs(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            machine_id: default_machine_id(),
            node_id: default_node_id(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
