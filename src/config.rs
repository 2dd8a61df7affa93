use clap::Parser;
use ethers::types::Address;
use std::time::Duration;

/// Placeholder address deployments use for "no chatbot wallet".
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "A PolyX bot that answers on-chain posts mentioning it using AI"
)]
pub struct AppSettings {
    /// JSON-RPC endpoint of the chain hosting the PolyX contract
    #[arg(
        long,
        env = "AMOY_RPC_URL",
        default_value = "https://rpc-amoy.polygon.technology"
    )]
    pub rpc_url: String,

    /// Private key of the sponsor wallet that pays gas for bot comments
    #[arg(long, env = "SPONSOR_PRIVATE_KEY", hide_env_values = true)]
    pub sponsor_private_key: String,

    /// Address of the deployed PolyX contract
    #[arg(long, env = "POLYX_CONTRACT_ADDRESS")]
    pub contract_address: String,

    /// Chain id used when signing transactions (Polygon Amoy by default)
    #[arg(long, env = "CHAIN_ID", default_value_t = 80002)]
    pub chain_id: u64,

    /// Address the bot posts as. Unset or the zero address disables replies.
    #[arg(long, env = "CHATBOT_ADDRESS")]
    pub chatbot_address: Option<String>,

    /// Gemini API key. Without it every generation attempt fails.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model to use
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-1.5-flash")]
    pub gemini_model: String,

    /// Base URL of the Gemini REST API
    #[arg(
        long,
        env = "GEMINI_API_URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gemini_api_url: String,

    /// How long transient Gemini failures are retried, in seconds (0 disables retries)
    #[arg(long, env = "GEMINI_RETRY_WINDOW_SECS", default_value_t = 30)]
    pub gemini_retry_window_secs: u64,

    /// How often to poll the contract for new mentions, in milliseconds
    #[arg(long, env = "MENTION_MONITOR_INTERVAL_MS", default_value_t = 30000)]
    pub mention_monitor_interval_ms: u64,

    /// Address the operator HTTP surface listens on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3001")]
    pub bind_address: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            rpc_url: "https://rpc-amoy.polygon.technology".to_string(),
            sponsor_private_key: String::new(),
            contract_address: String::new(),
            chain_id: 80002,
            chatbot_address: None,
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            gemini_api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_retry_window_secs: 30,
            mention_monitor_interval_ms: 30000,
            bind_address: "0.0.0.0:3001".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl AppSettings {
    /// The address the bot comments as, if one is configured.
    pub fn bot_identity(&self) -> anyhow::Result<Option<Address>> {
        parse_bot_identity(self.chatbot_address.as_deref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.mention_monitor_interval_ms)
    }

    pub fn gemini_retry_window(&self) -> Duration {
        Duration::from_secs(self.gemini_retry_window_secs)
    }
}

/// Treats a missing, blank or zero address as "not configured".
fn parse_bot_identity(raw: Option<&str>) -> anyhow::Result<Option<Address>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(value) => value,
    };
    if raw.eq_ignore_ascii_case(ZERO_ADDRESS) {
        return Ok(None);
    }
    let address = raw
        .parse::<Address>()
        .map_err(|e| anyhow::anyhow!("CHATBOT_ADDRESS '{}' is not a valid address: {}", raw, e))?;
    Ok(Some(address))
}

/// Keeps only the first comma-separated token, trimmed. Deployments have
/// been seen with values like "gemini-1.5-flash, gemini-1.5-pro".
pub fn clean_model_name(value: &str) -> String {
    value.split(',').next().unwrap_or_default().trim().to_string()
}

fn validate_interval_ms(value: u64) -> Result<u64, String> {
    const MIN_INTERVAL_MS: u64 = 1000;

    if value < MIN_INTERVAL_MS {
        Err(format!(
            "mention_monitor_interval_ms must be at least {MIN_INTERVAL_MS}, got {value}"
        ))
    } else {
        Ok(value)
    }
}

fn validate_contract_address(value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.len() != 42 || !value.starts_with("0x") {
        return Err(format!(
            "contract_address must be a 0x-prefixed 42 character address, got '{}'",
            value
        ));
    }
    Ok(value.to_string())
}

fn validate_log_level(value: &str) -> Result<String, String> {
    match value.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_ascii_lowercase()),
        _ => Err(format!(
            "log_level must be one of trace, debug, info, warn, error, got '{}'",
            value
        )),
    }
}

pub fn validate_settings(mut settings: AppSettings) -> anyhow::Result<AppSettings> {
    settings.mention_monitor_interval_ms =
        validate_interval_ms(settings.mention_monitor_interval_ms).map_err(|e| anyhow::anyhow!(e))?;
    settings.contract_address =
        validate_contract_address(&settings.contract_address).map_err(|e| anyhow::anyhow!(e))?;
    settings.log_level = validate_log_level(&settings.log_level).map_err(|e| anyhow::anyhow!(e))?;
    settings.gemini_model = clean_model_name(&settings.gemini_model);
    if settings.gemini_model.is_empty() {
        anyhow::bail!("gemini_model must not be empty");
    }
    settings.gemini_api_key = settings
        .gemini_api_key
        .take()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());

    // Surface a malformed bot address at startup rather than on the first poll
    settings.bot_identity()?;

    Ok(settings)
}

pub fn load_config() -> anyhow::Result<AppSettings> {
    // Parse command line arguments and environment variables
    let app_settings = AppSettings::parse();
    validate_settings(app_settings)
}
