use clap::Parser;
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default location of the TOML config file
const DEFAULT_CONFIG_PATH: &str = "./peer-relay.toml";

/// Command-line arguments. Only flags the user actually passed are
/// serialized, so unset flags never mask the TOML or env layers.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "peer-relay-server", version, about = "WebSocket / SSE peer relay server")]
pub struct Cli {
    /// Port to listen on [default: 8001]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./peer-relay.toml]
    #[arg(long, env = "PEER_RELAY_CONFIG")]
    #[serde(skip)]
    pub config: Option<String>,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub generate_config: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Peer relay server configuration, resolved from every layer.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// Bind address
    pub bind_address: String,

    /// Enable structured JSON logging
    pub json_logs: bool,

    /// Print the config template and exit
    pub generate_config: bool,

    /// Session keep-alive settings (loaded from [session] section in TOML)
    #[serde(default)]
    pub session: Option<SessionConfig>,

    /// Rate limiting for POST /api/send (loaded from [rate_limit] section in TOML)
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Keep-alive timing for WebSocket sessions and push subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds between server-initiated WebSocket pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the WebSocket (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Seconds between SSE keep-alive comments (default: 15)
    #[serde(default = "default_sse_keep_alive")]
    pub sse_keep_alive_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            sse_keep_alive_secs: default_sse_keep_alive(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_sse_keep_alive() -> u64 {
    15
}

/// Per-IP rate limit on the HTTP send endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether the limiter is installed (default: true)
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Seconds to replenish one send token (default: 1)
    #[serde(default = "default_send_per_second")]
    pub send_per_second: u64,

    /// Burst size (default: 30)
    #[serde(default = "default_send_burst")]
    pub send_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            send_per_second: default_send_per_second(),
            send_burst: default_send_burst(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_send_per_second() -> u64 {
    1
}

fn default_send_burst() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8001,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            session: None,
            rate_limit: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PEER_RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::layered(Toml::file(config_path), &cli)
    }

    fn layered(toml: Data<Toml>, cli: &Cli) -> Result<Self, figment::Error> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed("PEER_RELAY_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject timings that tokio cannot schedule.
    fn validate(&self) -> Result<(), figment::Error> {
        let session = self.session();
        let zero = [
            ("session.ping_interval_secs", session.ping_interval_secs),
            ("session.pong_timeout_secs", session.pong_timeout_secs),
            ("session.sse_keep_alive_secs", session.sse_keep_alive_secs),
        ]
        .into_iter()
        .find(|(_, secs)| *secs == 0);

        match zero {
            Some((key, _)) => Err(figment::Error::from(format!("{} must be at least 1", key))),
            None => Ok(()),
        }
    }

    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        self.rate_limit.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Peer Relay Server Configuration
# Place this file at ./peer-relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (PEER_RELAY_PORT,
# PEER_RELAY_SESSION__PING_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8001)
# port = 8001

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# ---- Sessions ----
# [session]
# ping_interval_secs = 30   # WebSocket ping interval
# pong_timeout_secs = 10    # Close the WebSocket if no pong within this window
# sse_keep_alive_secs = 15  # SSE comment keep-alive interval

# ---- Rate limiting (POST /api/send, per client IP) ----
# [rate_limit]
# enabled = true
# send_per_second = 1   # Seconds to replenish one token
# send_burst = 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(config.port, 8001);
        assert_eq!(config.session().ping_interval_secs, 30);
        assert!(config.rate_limit().enabled);
    }

    #[test]
    fn test_toml_overrides_sections() {
        let toml = r#"
            port = 9000
            [session]
            pong_timeout_secs = 3
            [rate_limit]
            enabled = false
        "#;
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.session().pong_timeout_secs, 3);
        assert_eq!(config.session().ping_interval_secs, 30);
        assert!(!config.rate_limit().enabled);
    }

    const SAMPLE_TOML: &str = r#"
        port = 9000
        json_logs = true
        [session]
        pong_timeout_secs = 3
    "#;

    #[test]
    fn test_unset_cli_flags_keep_toml_values() {
        let cli = Cli::try_parse_from(["peer-relay-server"]).unwrap();
        let config = Config::layered(Toml::string(SAMPLE_TOML), &cli).unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.json_logs);
        assert_eq!(config.session().pong_timeout_secs, 3);
        assert_eq!(config.session().ping_interval_secs, 30);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_cli_flags_override_toml() {
        let cli = Cli::try_parse_from(["peer-relay-server", "--port", "9100"]).unwrap();
        let config = Config::layered(Toml::string(SAMPLE_TOML), &cli).unwrap();
        assert_eq!(config.port, 9100);
        assert!(config.json_logs);
        assert_eq!(config.session().pong_timeout_secs, 3);
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let cli = Cli::default();
        for key in ["ping_interval_secs", "pong_timeout_secs", "sse_keep_alive_secs"] {
            let toml = format!("[session]\n{} = 0\n", key);
            let err = Config::layered(Toml::string(&toml), &cli).unwrap_err();
            assert!(err.to_string().contains(key), "{}", err);
        }
    }
}
