use log::warn;
use std::net::SocketAddr;
use std::sync::Arc;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,https://localhost:3000";

/// Limits applied by the hub to every connection.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Outbound buffer per connection. A full buffer drops messages for that client.
    pub client_channel_buffer: usize,
    pub rate_limit_messages: u32,
    pub rate_limit_window_ms: u64,
    pub max_message_size: usize,
    pub zombie_check_interval_secs: u64,
    /// Silence after which a connection counts as dead.
    pub zombie_timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            client_channel_buffer: 100,
            rate_limit_messages: 30,
            rate_limit_window_ms: 1000,
            max_message_size: 64 * 1024,
            zombie_check_interval_secs: 30,
            zombie_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub allowed_origins: Arc<Vec<String>>,
    pub limits: Limits,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| default_listen_addr().to_string());
        let origins = std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string());
        Self::from_values(&listen_addr, &origins)
    }

    fn from_values(listen_addr: &str, origins: &str) -> Self {
        let listen_addr = listen_addr.parse().unwrap_or_else(|e| {
            warn!("Invalid LISTEN_ADDR '{}' ({}), using {}", listen_addr, e, default_listen_addr());
            default_listen_addr()
        });
        Self { listen_addr, allowed_origins: Arc::new(parse_origins(origins)), limits: Limits::default() }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

pub fn is_origin_allowed(origin: &str, allowed: &[String]) -> bool {
    if allowed.iter().any(|o| o == "*") {
        warn!("SECURITY: Wildcard origin (*) configured - ALL origins allowed. This disables CORS protection!");
        return true;
    }
    allowed.iter().any(|o| o == origin)
}

/// CORS policy for the HTTP routes. `*` allows any origin; entries that are
/// not a bare `scheme://host[:port]` origin are skipped with a warning.
pub fn cors(allowed: &[String]) -> warp::cors::Builder {
    let builder = warp::cors().allow_methods(vec!["GET"]).allow_headers(vec!["content-type"]);
    if allowed.iter().any(|o| o == "*") {
        return builder.allow_any_origin();
    }
    let origins: Vec<&str> = allowed
        .iter()
        .map(String::as_str)
        .filter(|origin| {
            let valid = is_bare_origin(origin);
            if !valid {
                warn!("Ignoring invalid CORS origin '{}'", origin);
            }
            valid
        })
        .collect();
    builder.allow_origins(origins)
}

fn is_bare_origin(origin: &str) -> bool {
    match origin.parse::<warp::http::Uri>() {
        Ok(uri) => {
            uri.scheme().is_some()
                && uri.host().is_some()
                && uri.path_and_query().map_or(true, |p| p.as_str().is_empty() || p.as_str() == "/")
                && !origin.ends_with('/')
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::Filter;

    #[tokio::test]
    async fn test_wildcard_cors_allows_any_origin() {
        let config = ServerConfig::from_values("0.0.0.0:3000", "*");
        let route = warp::any().map(warp::reply).with(cors(&config.allowed_origins));
        let res = warp::test::request().header("origin", "http://anywhere.test").reply(&route).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["access-control-allow-origin"], "http://anywhere.test");
    }

    #[tokio::test]
    async fn test_cors_allow_list() {
        let config = ServerConfig::from_values("0.0.0.0:3000", "http://a.test,localhost:3000,http://b.test/path");
        let route = warp::any().map(warp::reply).with(cors(&config.allowed_origins));
        let ok = warp::test::request().header("origin", "http://a.test").reply(&route).await;
        assert_eq!(ok.status(), 200);
        let denied = warp::test::request().header("origin", "http://evil.test").reply(&route).await;
        assert_eq!(denied.status(), 403);
    }

    #[test]
    fn test_bare_origin() {
        assert!(is_bare_origin("http://localhost:3000"));
        assert!(is_bare_origin("https://a.test"));
        assert!(!is_bare_origin("localhost:3000"));
        assert!(!is_bare_origin("https://a.test/"));
        assert!(!is_bare_origin("https://a.test/app"));
        assert!(!is_bare_origin(""));
    }

    #[test]
    fn test_parse_origins_trims_and_skips_empty() {
        assert_eq!(
            parse_origins(" http://a.test , ,https://b.test,"),
            vec!["http://a.test".to_string(), "https://b.test".to_string()]
        );
    }

    #[test]
    fn test_origin_allowed() {
        let allowed = vec!["http://a.test".to_string()];
        assert!(is_origin_allowed("http://a.test", &allowed));
        assert!(!is_origin_allowed("http://evil.test", &allowed));
        assert!(is_origin_allowed("http://evil.test", &["*".to_string()]));
    }

    #[test]
    fn test_invalid_listen_addr_falls_back() {
        let config = ServerConfig::from_values("not-an-address", "http://a.test");
        assert_eq!(config.listen_addr, default_listen_addr());
        assert_eq!(config.allowed_origins.len(), 1);
    }

    #[test]
    fn test_custom_listen_addr() {
        let config = ServerConfig::from_values("127.0.0.1:8080", "");
        assert_eq!(config.listen_addr.port(), 8080);
        assert!(config.allowed_origins.is_empty());
    }
}
