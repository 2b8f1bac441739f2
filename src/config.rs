use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `CLASSBOOK_*` environment variables.
/// Unset or unparsable values fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "classbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("CLASSBOOK_{name}"));
        let defaults = Self::default();
        Self {
            port: parse_var(var("PORT")).unwrap_or(defaults.port),
            bind: var("BIND").unwrap_or(defaults.bind),
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: var("PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(var("MAX_CONNECTIONS"))
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(var("COMPACT_THRESHOLD"))
                .filter(|&n: &u64| n > 0)
                .unwrap_or(defaults.compact_threshold),
            tls_cert: var("TLS_CERT"),
            tls_key: var("TLS_KEY"),
            metrics_port: parse_var(var("METRICS_PORT")),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}
