use std::env;
use std::str::FromStr;
use tracing::warn;

/// Storage backend the availability engine persists into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Supabase,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "supabase" => Ok(StoreBackend::Supabase),
            other => Err(format!("unknown availability store '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    pub max_recurrence_days: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_page_limit: 20,
            max_page_limit: 100,
            max_recurrence_days: 366,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub availability_store: StoreBackend,
    pub scheduling: SchedulingConfig,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = SchedulingConfig::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            availability_store: env::var("AVAILABILITY_STORE")
                .ok()
                .and_then(|raw| match raw.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        warn!("{}, using in-memory store", e);
                        None
                    }
                })
                .unwrap_or(StoreBackend::Memory),
            scheduling: SchedulingConfig {
                default_page_limit: parse_or("SCHEDULING_DEFAULT_PAGE_LIMIT", defaults.default_page_limit),
                max_page_limit: parse_or("SCHEDULING_MAX_PAGE_LIMIT", defaults.max_page_limit),
                max_recurrence_days: parse_or("SCHEDULING_MAX_RECURRENCE_DAYS", defaults.max_recurrence_days),
            },
            port: parse_or("PORT", 3000),
        };

        if config.availability_store == StoreBackend::Supabase && !config.is_configured() {
            warn!("Supabase store requested but application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Backend actually usable with the current settings.
    pub fn effective_store(&self) -> StoreBackend {
        match self.availability_store {
            StoreBackend::Supabase if self.is_configured() => StoreBackend::Supabase,
            _ => StoreBackend::Memory,
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_backend() {
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!(" Supabase ".parse::<StoreBackend>(), Ok(StoreBackend::Supabase));
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn falls_back_to_memory_when_supabase_unconfigured() {
        let config = AppConfig {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            availability_store: StoreBackend::Supabase,
            scheduling: SchedulingConfig::default(),
            port: 3000,
        };

        assert_eq!(config.effective_store(), StoreBackend::Memory);
    }
}
