//! Process configuration, loaded entirely from the environment.
//!
//! Unlike a connection-string-configured client driver, a transparent proxy
//! has no caller to hand it a `Config` builder — it is started as a
//! standalone process, so every knob in §6 is read from the environment
//! (optionally via a `.env` file) at startup, once, before the listener
//! binds.

use std::path::PathBuf;

/// Whether policy decisions are only recorded (`Log`) or actually applied
/// to the byte stream (`Enforce`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    /// Evaluate and record; never modify bytes.
    Log,
    /// Apply block/autocorrect effects to the forwarded stream.
    Enforce,
}

impl EnforcementMode {
    fn from_env_str(value: &str) -> Self {
        if value.eq_ignore_ascii_case("enforce") {
            Self::Enforce
        } else {
            Self::Log
        }
    }

    /// Whether this mode applies block/autocorrect effects.
    #[must_use]
    pub fn is_enforce(self) -> bool {
        matches!(self, Self::Enforce)
    }
}

/// TLS termination settings, named-interface only (see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Whether the proxy should terminate TLS on the client-facing socket.
    pub enabled: bool,
    /// Path to the PEM certificate chain, required when `enabled`.
    pub cert_path: Option<PathBuf>,
    /// Path to the PEM private key, required when `enabled`.
    pub key_path: Option<PathBuf>,
}

/// Full process configuration for one proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the client-facing listener binds to.
    pub listen_addr: String,
    /// Port the client-facing listener binds to.
    pub listen_port: u16,
    /// Upstream SQL Server host.
    pub sql_host: String,
    /// Upstream SQL Server port.
    pub sql_port: u16,

    /// Whether block/autocorrect decisions are applied or only logged.
    pub enforcement_mode: EnforcementMode,
    /// Gate for the heuristic latin-1 sniff fallback (§4.9).
    pub enable_sql_text_sniff: bool,
    /// Gate for the structured TDS framing + shallow-SQL-parse path (§4.2-4.8).
    pub enable_tds_parser: bool,
    /// Deployment tag matched against each rule's `apply_in_envs`.
    pub environment: String,

    /// Per-read-iteration CPU time budget, in milliseconds.
    pub time_budget_ms: u64,
    /// Maximum bytes a single rewritten output may occupy before it is discarded.
    pub max_rewrite_bytes: usize,

    /// Whether RPC autocorrect rewrites parameter bytes in place.
    pub rpc_autocorrect_inplace: bool,
    /// Whether a too-long autocorrected RPC value may be truncated to fit.
    pub rpc_truncate_on_autocorrect: bool,
    /// Whether to attempt a from-scratch RPC payload rebuild when in-place
    /// rewrite cannot apply.
    pub rpc_repack_builder: bool,

    /// Path to the rule catalog JSON file.
    pub rules_path: PathBuf,
    /// Optional path to the proc/param → TDS type map used by the repack builder.
    pub rpc_param_types_path: Option<PathBuf>,

    /// TLS termination settings.
    pub tls: TlsConfig,

    /// Path to the counters JSON file.
    pub metrics_path: PathBuf,
    /// Path to the newline-delimited JSON decision log.
    pub decisions_path: PathBuf,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

impl ProxyConfig {
    /// Load configuration from process environment variables.
    ///
    /// Does not read a `.env` file itself; call [`dotenvy::dotenv`] before
    /// this if that behavior is desired.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: env_string("PROXY_LISTEN_ADDR", "0.0.0.0"),
            listen_port: env_parsed("PROXY_LISTEN_PORT", 61433),
            sql_host: env_string("SQL_HOST", "localhost"),
            sql_port: env_parsed("SQL_PORT", 1433),

            enforcement_mode: EnforcementMode::from_env_str(&env_string(
                "ENFORCEMENT_MODE",
                "log",
            )),
            enable_sql_text_sniff: env_bool("ENABLE_SQL_TEXT_SNIFF", false),
            enable_tds_parser: env_bool("ENABLE_TDS_PARSER", false),
            environment: env_string("ENVIRONMENT", ""),

            time_budget_ms: env_parsed("TIME_BUDGET_MS", 25),
            max_rewrite_bytes: env_parsed("MAX_REWRITE_BYTES", 131_072),

            rpc_autocorrect_inplace: env_bool("RPC_AUTOCORRECT_INPLACE", true),
            rpc_truncate_on_autocorrect: env_bool("RPC_TRUNCATE_ON_AUTOCORRECT", false),
            rpc_repack_builder: env_bool("RPC_REPACK_BUILDER", false),

            rules_path: PathBuf::from(env_string("RULES_PATH", "config/rules.json")),
            rpc_param_types_path: env_path("RPC_PARAM_TYPES_PATH"),

            tls: TlsConfig {
                enabled: env_bool("TLS_TERMINATION", false),
                cert_path: env_path("TLS_CERT_PATH"),
                key_path: env_path("TLS_KEY_PATH"),
            },

            metrics_path: PathBuf::from(env_string(
                "METRICS_PATH",
                "data/metrics/metrics.json",
            )),
            decisions_path: PathBuf::from(env_string(
                "DECISIONS_PATH",
                "data/metrics/decisions.jsonl",
            )),
        }
    }

    /// The client-facing socket address, e.g. `0.0.0.0:61433`.
    #[must_use]
    pub fn listen_socket_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    /// The upstream socket address, e.g. `localhost:1433`.
    #[must_use]
    pub fn upstream_socket_addr(&self) -> String {
        format!("{}:{}", self.sql_host, self.sql_port)
    }

    /// Whether either structured-parse or heuristic-sniff policy evaluation
    /// is enabled at all.
    #[must_use]
    pub fn policy_enabled(&self) -> bool {
        self.enable_sql_text_sniff || self.enable_tds_parser
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforcement_mode_defaults_to_log() {
        assert_eq!(EnforcementMode::from_env_str("anything"), EnforcementMode::Log);
        assert!(!EnforcementMode::from_env_str("log").is_enforce());
    }

    #[test]
    fn enforcement_mode_parses_enforce_case_insensitively() {
        assert!(EnforcementMode::from_env_str("ENFORCE").is_enforce());
        assert!(EnforcementMode::from_env_str("Enforce").is_enforce());
    }

    #[test]
    fn socket_addr_formatting() {
        let config = ProxyConfig {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 61433,
            sql_host: "db.internal".to_string(),
            sql_port: 1433,
            enforcement_mode: EnforcementMode::Log,
            enable_sql_text_sniff: false,
            enable_tds_parser: false,
            environment: String::new(),
            time_budget_ms: 25,
            max_rewrite_bytes: 131_072,
            rpc_autocorrect_inplace: true,
            rpc_truncate_on_autocorrect: false,
            rpc_repack_builder: false,
            rules_path: PathBuf::from("config/rules.json"),
            rpc_param_types_path: None,
            tls: TlsConfig {
                enabled: false,
                cert_path: None,
                key_path: None,
            },
            metrics_path: PathBuf::from("data/metrics/metrics.json"),
            decisions_path: PathBuf::from("data/metrics/decisions.jsonl"),
        };
        assert_eq!(config.listen_socket_addr(), "127.0.0.1:61433");
        assert_eq!(config.upstream_socket_addr(), "db.internal:1433");
    }
}
