use std::{path::PathBuf, time::Duration};

use crate::search::DEFAULT_SEARCH_CACHE_TTL;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9761";
pub const DEFAULT_RECENT_MONTHS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRuntime {
    Std,
    Axum,
}

impl TransportRuntime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Axum => "axum",
        }
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("axum") => Self::Axum,
            _ => Self::Std,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub http_workers: usize,
    pub transport_runtime: TransportRuntime,
    pub search_cache_ttl: Duration,
    pub recent_months: u32,
    pub views_snapshot: Option<PathBuf>,
    pub lims_snapshot: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            http_workers: default_http_workers(),
            transport_runtime: TransportRuntime::Std,
            search_cache_ttl: DEFAULT_SEARCH_CACHE_TTL,
            recent_months: DEFAULT_RECENT_MONTHS,
            views_snapshot: None,
            lims_snapshot: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_with_fallback("STATUS_FLOWCELLS_BIND", "FLOWCELLS_BIND")
                .unwrap_or(defaults.bind_addr),
            http_workers: parse_env_first::<usize>(&[
                "STATUS_FLOWCELLS_HTTP_WORKERS",
                "FLOWCELLS_HTTP_WORKERS",
            ])
            .filter(|workers| *workers > 0)
            .unwrap_or(defaults.http_workers),
            transport_runtime: TransportRuntime::parse(
                env_with_fallback(
                    "STATUS_FLOWCELLS_TRANSPORT_RUNTIME",
                    "FLOWCELLS_TRANSPORT_RUNTIME",
                )
                .as_deref(),
            ),
            search_cache_ttl: parse_env_first::<u64>(&[
                "STATUS_FLOWCELLS_SEARCH_CACHE_TTL_SECS",
                "FLOWCELLS_SEARCH_CACHE_TTL_SECS",
            ])
            .map(Duration::from_secs)
            .unwrap_or(defaults.search_cache_ttl),
            recent_months: parse_env_first::<u32>(&[
                "STATUS_FLOWCELLS_RECENT_MONTHS",
                "FLOWCELLS_RECENT_MONTHS",
            ])
            .filter(|months| *months > 0)
            .unwrap_or(defaults.recent_months),
            views_snapshot: env_with_fallback(
                "STATUS_FLOWCELLS_VIEWS_SNAPSHOT",
                "FLOWCELLS_VIEWS_SNAPSHOT",
            )
            .map(PathBuf::from),
            lims_snapshot: env_with_fallback(
                "STATUS_FLOWCELLS_LIMS_SNAPSHOT",
                "FLOWCELLS_LIMS_SNAPSHOT",
            )
            .map(PathBuf::from),
        }
    }
}

pub fn env_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .or_else(|| std::env::var(fallback).ok())
}

pub fn parse_env_first<T>(keys: &[&str]) -> Option<T>
where
    T: std::str::FromStr,
{
    for key in keys {
        if let Ok(value) = std::env::var(key)
            && let Ok(parsed) = value.trim().parse::<T>()
        {
            return Some(parsed);
        }
    }
    None
}

fn default_http_workers() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get().clamp(1, 32))
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[allow(unused_unsafe)]
    fn set_env_var_for_tests(key: &str, value: &str) {
        unsafe {
            std::env::set_var(key, value);
        }
    }

    #[allow(unused_unsafe)]
    fn remove_env_var_for_tests(key: &str) {
        unsafe {
            std::env::remove_var(key);
        }
    }

    const KEYS: &[&str] = &[
        "STATUS_FLOWCELLS_BIND",
        "FLOWCELLS_BIND",
        "STATUS_FLOWCELLS_HTTP_WORKERS",
        "STATUS_FLOWCELLS_TRANSPORT_RUNTIME",
        "STATUS_FLOWCELLS_SEARCH_CACHE_TTL_SECS",
        "FLOWCELLS_SEARCH_CACHE_TTL_SECS",
        "STATUS_FLOWCELLS_RECENT_MONTHS",
        "STATUS_FLOWCELLS_VIEWS_SNAPSHOT",
    ];

    #[test]
    fn from_env_uses_defaults_when_unset() {
        let _guard = env_lock().lock().unwrap();
        for key in KEYS {
            remove_env_var_for_tests(key);
        }
        let config = ServiceConfig::from_env();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.transport_runtime, TransportRuntime::Std);
        assert_eq!(config.search_cache_ttl, Duration::from_secs(180));
        assert_eq!(config.recent_months, 6);
        assert!(config.http_workers >= 1);
        assert_eq!(config.views_snapshot, None);
    }

    #[test]
    fn from_env_prefers_primary_keys_and_rejects_zero_values() {
        let _guard = env_lock().lock().unwrap();
        for key in KEYS {
            remove_env_var_for_tests(key);
        }
        set_env_var_for_tests("FLOWCELLS_BIND", "0.0.0.0:9000");
        set_env_var_for_tests("STATUS_FLOWCELLS_HTTP_WORKERS", "0");
        set_env_var_for_tests("STATUS_FLOWCELLS_TRANSPORT_RUNTIME", "axum");
        set_env_var_for_tests("STATUS_FLOWCELLS_SEARCH_CACHE_TTL_SECS", "30");
        set_env_var_for_tests("FLOWCELLS_SEARCH_CACHE_TTL_SECS", "99");
        set_env_var_for_tests("STATUS_FLOWCELLS_RECENT_MONTHS", "0");
        set_env_var_for_tests("STATUS_FLOWCELLS_VIEWS_SNAPSHOT", "/tmp/views.json");

        let config = ServiceConfig::from_env();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert!(config.http_workers >= 1);
        assert_eq!(config.transport_runtime, TransportRuntime::Axum);
        assert_eq!(config.search_cache_ttl, Duration::from_secs(30));
        assert_eq!(config.recent_months, DEFAULT_RECENT_MONTHS);
        assert_eq!(config.views_snapshot, Some(PathBuf::from("/tmp/views.json")));

        for key in KEYS {
            remove_env_var_for_tests(key);
        }
    }
}
