use log::warn;

/// Fixed mail host; the service only talks to Microsoft mailboxes.
pub const IMAP_HOST: &str = "outlook.office365.com";

/// Well-known public client id used when `CLIENT_ID` is not set.
const DEFAULT_CLIENT_ID: &str = "9e5f94bc-e8a4-4e73-b8be-63364c29d753";
const DEFAULT_TENANT_ID: &str = "common";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_BODY_CHARS: usize = 400;

/// Process configuration, read from the environment exactly once at startup
/// and passed explicitly to whoever needs it. Core logic never touches the
/// environment itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub tenant_id: String,
    pub port: u16,
    /// Per-message body cap in characters (400 by default, 800 where richer
    /// digests are wanted).
    pub max_body_chars: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            client_id: env_or("CLIENT_ID", DEFAULT_CLIENT_ID),
            tenant_id: env_or("TENANT_ID", DEFAULT_TENANT_ID),
            port: env_parsed("PORT", DEFAULT_PORT),
            max_body_chars: env_parsed("MAX_BODY_CHARS", DEFAULT_MAX_BODY_CHARS),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("ignoring malformed {name}={raw:?}, using default");
                default
            }
        },
        Err(_) => default,
    }
}
