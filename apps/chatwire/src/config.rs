use chat_proto::MetadataLevel;

pub const DEFAULT_API_URL: &str = "http://localhost:7071/api";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub subscription_key: Option<String>,
    pub thread: Option<String>,
    pub orchestrator: Option<String>,
    pub selected_route: Option<String>,
    pub redirect: Option<String>,
    pub metadata_level: MetadataLevel,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub debug: bool,
    pub log_filter: String,
    pub user_id: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let api_url = non_empty("CHATWIRE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let metadata_level = std::env::var("CHATWIRE_METADATA_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let retry_initial_ms = std::env::var("CHATWIRE_RETRY_INITIAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2_000);
        let retry_max_ms = std::env::var("CHATWIRE_RETRY_MAX_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30_000);
        let debug = std::env::var("CHATWIRE_DEBUG")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);
        let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(debug));
        let user_id = non_empty("CHATWIRE_USER_ID")
            .unwrap_or_else(|| format!("dl_{}", uuid::Uuid::new_v4().simple()));
        Self {
            api_url,
            subscription_key: non_empty("CHATWIRE_SUBSCRIPTION"),
            thread: non_empty("CHATWIRE_THREAD"),
            orchestrator: non_empty("CHATWIRE_ORCHESTRATOR"),
            selected_route: non_empty("CHATWIRE_SELECTED_ROUTE"),
            redirect: non_empty("CHATWIRE_REDIRECT"),
            metadata_level,
            retry_initial_ms,
            retry_max_ms,
            debug,
            log_filter,
            user_id,
        }
    }
}

pub fn default_filter(debug: bool) -> String {
    if debug {
        "info,chatwire=debug,delta=debug".into()
    } else {
        "warn".into()
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_values() {
        assert!(is_truthy("yes"));
        assert!(!is_truthy("0"));
        assert!(default_filter(true).contains("chatwire=debug"));
    }
}
