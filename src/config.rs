//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). [`GatewayConfig::from_lookup`] accepts
//! any key/value source, which keeps configuration testable without
//! touching the process environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Emit JSON log lines instead of human-readable text.
    pub log_json: bool,

    /// Route of the JSON-RPC over HTTP endpoint.
    pub rpc_http_path: String,

    /// Path pattern of the JSON-RPC over WebSocket handler (`*` matches all).
    pub rpc_ws_path: String,

    /// Bearer token required on WebSocket upgrades, if any.
    pub ws_auth_token: Option<String>,

    /// Cross-origin policy.
    pub cors: CorsSettings,

    /// Credit-based rate limiter tunables.
    pub rate_limit: RateLimitSettings,

    /// Client address resolution behind reverse proxies.
    pub proxy: ProxySettings,

    /// Multipart upload and JSON body limits.
    pub uploads: UploadSettings,

    /// Seconds between WebSocket liveness sweeps.
    pub heartbeat_interval: Duration,

    /// Capacity of each connection's outbound frame queue.
    pub ws_outbound_buffer: usize,

    /// Capacity of the connection lifecycle broadcast channel.
    pub lifecycle_bus_capacity: usize,

    /// Name of the session cookie.
    pub session_cookie: String,
}

/// Cross-origin policy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsSettings {
    /// When `false`, every cross-origin request is rejected.
    pub enabled: bool,
    /// The service's own origin. Requests from it are never cross-origin.
    pub base_origin: String,
    /// Allowed origins. `*` allows any origin.
    pub origins: Vec<String>,
    /// Allowed HTTP methods for non-preflight requests.
    pub methods: Vec<String>,
    /// Headers advertised in `Access-Control-Allow-Headers`.
    pub allowed_headers: Vec<String>,
    /// Whether to send `Access-Control-Allow-Credentials: true`.
    pub credentials: bool,
    /// Status returned for short-circuited preflight requests.
    pub options_success_status: u16,
    /// Pass preflight requests on to the router instead of answering them.
    pub preflight_continue: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_origin: "http://localhost:3000".to_string(),
            origins: Vec::new(),
            methods: split_list("GET,HEAD,PUT,PATCH,POST,DELETE"),
            allowed_headers: split_list(
                "Content-Type,Authorization,Content-Length,X-Requested-With",
            ),
            credentials: false,
            options_success_status: 204,
            preflight_continue: false,
        }
    }
}

/// Rate limiter tunables. Credits are abstract units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Credits granted to an address on first sight.
    pub initial_credit: u64,
    /// Upper bound of an address's credit balance.
    pub max_credit: u64,
    /// Credits added to every non-banned entry per replenish tick.
    pub credit_addon: u64,
    /// Time between replenish ticks.
    pub addon_interval: Duration,
    /// Default cost of one request.
    pub request_cost: u64,
    /// Length of a ban.
    pub ban_period: Duration,
    /// Idle time after which a full entry is dropped from the ledger.
    pub inactive_time: Duration,
    /// Addresses exempt from accounting.
    pub whitelist: Vec<IpAddr>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            initial_credit: 200,
            max_credit: 200,
            credit_addon: 20,
            addon_interval: Duration::from_secs(10),
            request_cost: 1,
            ban_period: Duration::from_secs(900),
            inactive_time: Duration::from_secs(600),
            whitelist: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        }
    }
}

/// Reverse proxy settings for client address resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Peers whose forwarding headers are trusted.
    pub trusted_remotes: Vec<IpAddr>,
    /// Forwarding headers consulted, in order (lower-case names).
    pub allowed_headers: Vec<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            trusted_remotes: Vec::new(),
            allowed_headers: split_list("x-forwarded-for,x-real-ip"),
        }
    }
}

/// Request body limits and temp storage for uploaded files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    /// Maximum size of a single uploaded file, in bytes.
    pub file_size_limit: u64,
    /// Maximum size of an `application/json` body, in bytes.
    pub max_json_payload: usize,
    /// Maximum size of a whole RPC request body, in bytes.
    pub max_request_body: usize,
    /// Directory receiving uploaded files until the call completes.
    pub storage_tmp_dir: PathBuf,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            file_size_limit: 10 * 1024 * 1024,
            max_json_payload: 1_000_000,
            max_request_body: 64 * 1024 * 1024,
            storage_tmp_dir: std::env::temp_dir().join("rpc-gateway"),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` cannot be parsed as a
    /// [`SocketAddr`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()?;

        let log_json = lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json"));

        let cors_defaults = CorsSettings::default();
        let cors = CorsSettings {
            enabled: parse_bool(&lookup, "CORS_ENABLED", cors_defaults.enabled),
            base_origin: lookup("CORS_BASE_ORIGIN").unwrap_or(cors_defaults.base_origin),
            origins: lookup("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or(cors_defaults.origins),
            methods: lookup("CORS_METHODS")
                .map(|v| split_list(&v))
                .unwrap_or(cors_defaults.methods),
            allowed_headers: lookup("CORS_ALLOWED_HEADERS")
                .map(|v| split_list(&v))
                .unwrap_or(cors_defaults.allowed_headers),
            credentials: parse_bool(&lookup, "CORS_CREDENTIALS", cors_defaults.credentials),
            options_success_status: parse(
                &lookup,
                "CORS_OPTIONS_SUCCESS_STATUS",
                cors_defaults.options_success_status,
            ),
            preflight_continue: parse_bool(
                &lookup,
                "CORS_PREFLIGHT_CONTINUE",
                cors_defaults.preflight_continue,
            ),
        };

        let rl = RateLimitSettings::default();
        let rate_limit = RateLimitSettings {
            initial_credit: parse(&lookup, "RATE_LIMIT_INITIAL_CREDIT", rl.initial_credit),
            max_credit: parse(&lookup, "RATE_LIMIT_MAX_CREDIT", rl.max_credit),
            credit_addon: parse(&lookup, "RATE_LIMIT_CREDIT_ADDON", rl.credit_addon),
            addon_interval: parse_secs(&lookup, "RATE_LIMIT_ADDON_INTERVAL_SECS", rl.addon_interval),
            request_cost: parse(&lookup, "RATE_LIMIT_REQUEST_COST", rl.request_cost),
            ban_period: parse_secs(&lookup, "RATE_LIMIT_BAN_PERIOD_SECS", rl.ban_period),
            inactive_time: parse_secs(&lookup, "RATE_LIMIT_INACTIVE_SECS", rl.inactive_time),
            whitelist: lookup("RATE_LIMIT_WHITELIST")
                .map(|v| parse_ip_list(&v))
                .unwrap_or(rl.whitelist),
        };

        let proxy_defaults = ProxySettings::default();
        let proxy = ProxySettings {
            trusted_remotes: lookup("PROXY_TRUSTED_REMOTES")
                .map(|v| parse_ip_list(&v))
                .unwrap_or(proxy_defaults.trusted_remotes),
            allowed_headers: lookup("PROXY_ALLOWED_HEADERS")
                .map(|v| split_list(&v.to_ascii_lowercase()))
                .unwrap_or(proxy_defaults.allowed_headers),
        };

        let upload_defaults = UploadSettings::default();
        let uploads = UploadSettings {
            file_size_limit: parse(&lookup, "FILE_SIZE_LIMIT", upload_defaults.file_size_limit),
            max_json_payload: parse(&lookup, "MAX_JSON_PAYLOAD", upload_defaults.max_json_payload),
            max_request_body: parse(&lookup, "MAX_REQUEST_BODY", upload_defaults.max_request_body),
            storage_tmp_dir: lookup("STORAGE_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(upload_defaults.storage_tmp_dir),
        };

        // A zero period would stop the heartbeat from ever sweeping.
        let default_heartbeat = Duration::from_secs(10);
        let heartbeat_interval =
            match parse_secs(&lookup, "WS_HEARTBEAT_INTERVAL_SECS", default_heartbeat) {
                interval if interval.is_zero() => default_heartbeat,
                interval => interval,
            };

        Ok(Self {
            listen_addr,
            log_json,
            rpc_http_path: lookup("RPC_HTTP_PATH").unwrap_or_else(|| "/api".to_string()),
            rpc_ws_path: lookup("RPC_WS_PATH").unwrap_or_else(|| "*".to_string()),
            ws_auth_token: lookup("WS_AUTH_TOKEN").filter(|t| !t.is_empty()),
            cors,
            rate_limit,
            proxy,
            uploads,
            heartbeat_interval,
            ws_outbound_buffer: parse(&lookup, "WS_OUTBOUND_BUFFER", 256_usize).max(1),
            lifecycle_bus_capacity: parse(&lookup, "LIFECYCLE_BUS_CAPACITY", 1024_usize).max(1),
            session_cookie: lookup("SESSION_COOKIE").unwrap_or_else(|| "sid".to_string()),
        })
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3000)),
            log_json: false,
            rpc_http_path: "/api".to_string(),
            rpc_ws_path: "*".to_string(),
            ws_auth_token: None,
            cors: CorsSettings::default(),
            rate_limit: RateLimitSettings::default(),
            proxy: ProxySettings::default(),
            uploads: UploadSettings::default(),
            heartbeat_interval: Duration::from_secs(10),
            ws_outbound_buffer: 256,
            lifecycle_bus_capacity: 1024,
            session_cookie: "sid".to_string(),
        }
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable holding whole seconds.
fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

/// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`,
/// `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}

/// Splits a comma-separated list, trimming and dropping empty items.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a comma-separated list of IP addresses, skipping invalid items.
fn parse_ip_list(raw: &str) -> Vec<IpAddr> {
    split_list(raw)
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}
