use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::warn;
use serde::Deserialize;

use crate::config::Config;

const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Exchanges a refresh token for a short-lived access token against the
/// tenant's OAuth2 token endpoint. One attempt per request, no retry, no
/// caching; the token lives exactly as long as the request that needed it.
pub struct TokenBroker {
    client: reqwest::blocking::Client,
    token_url: String,
    client_id: String,
}

impl TokenBroker {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            cfg.tenant_id
        );
        Self::with_token_url(token_url, cfg.client_id.clone())
    }

    fn with_token_url(token_url: String, client_id: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(TokenBroker {
            client,
            token_url,
            client_id,
        })
    }

    /// All failure causes (transport error, non-2xx status, malformed JSON,
    /// missing field) collapse into one error; the caller only learns that no
    /// token was obtained. Details go to the log, never into the response.
    pub fn exchange(&self, refresh_token: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .with_context(|| format!("requesting token from {}", self.token_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(
                "token endpoint returned {status}: {}",
                body.chars().take(200).collect::<String>()
            );
            return Err(anyhow!("token endpoint returned {status}"));
        }

        let payload: TokenResponse = response.json().context("decoding token JSON response")?;
        payload
            .access_token
            .ok_or_else(|| anyhow!("token response had no access_token field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_url_follows_the_tenant() {
        let cfg = Config {
            client_id: "client-123".to_string(),
            tenant_id: "consumers".to_string(),
            port: 8080,
            max_body_chars: 400,
        };
        let broker = TokenBroker::from_config(&cfg).unwrap();
        assert_eq!(
            broker.token_url,
            "https://login.microsoftonline.com/consumers/oauth2/v2.0/token"
        );
        assert_eq!(broker.client_id, "client-123");
    }

    #[test]
    fn non_success_status_collapses_to_one_error() {
        use std::io::Read as _;

        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr();
        let stub = std::thread::spawn(move || {
            let mut request = server.recv().unwrap();
            let mut form = String::new();
            request.as_reader().read_to_string(&mut form).unwrap();
            let reply = tiny_http::Response::from_string(r#"{"error":"invalid_grant"}"#)
                .with_status_code(400);
            request.respond(reply).unwrap();
            form
        });

        let url = format!("http://{addr}/common/oauth2/v2.0/token");
        let broker = TokenBroker::with_token_url(url, "client-123".to_string()).unwrap();
        let err = broker.exchange("stale-token").unwrap_err();
        assert!(err.to_string().contains("400"), "{err}");

        // the request that went out carried the grant form
        let form = stub.join().unwrap();
        assert!(form.contains("grant_type=refresh_token"));
        assert!(form.contains("refresh_token=stale-token"));
        assert!(form.contains("client_id=client-123"));
    }

    #[test]
    fn token_response_tolerates_missing_and_extra_fields() {
        let with: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","token_type":"Bearer","expires_in":3599}"#)
                .unwrap();
        assert_eq!(with.access_token.as_deref(), Some("abc"));

        let without: TokenResponse = serde_json::from_str(r#"{"token_type":"Bearer"}"#).unwrap();
        assert!(without.access_token.is_none());
    }
}
