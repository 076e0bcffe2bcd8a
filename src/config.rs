use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `STAYD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "stayd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable numbers keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: get("STAYD_BIND").unwrap_or(d.bind),
            port: parsed(&get, "STAYD_PORT").unwrap_or(d.port),
            data_dir: get("STAYD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("STAYD_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&get, "STAYD_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&get, "STAYD_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: parsed(&get, "STAYD_METRICS_PORT"),
            tls_cert: get("STAYD_TLS_CERT"),
            tls_key: get("STAYD_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("STAYD_PORT", "6543"),
            ("STAYD_BIND", "127.0.0.1"),
            ("STAYD_DATA_DIR", "/var/lib/stayd"),
            ("STAYD_METRICS_PORT", "9100"),
            ("STAYD_COMPACT_THRESHOLD", "50"),
            ("STAYD_MAX_CONNECTIONS", " 32 "),
        ]));
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6543");
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/stayd"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.max_connections, 32);
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("STAYD_PORT", "not-a-port"),
            ("STAYD_MAX_CONNECTIONS", "-1"),
            ("STAYD_METRICS_PORT", ""),
        ]));
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.metrics_port, None);
    }
}
