use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{error, info, warn};
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server};
use url::Url;

use crate::config::Config;
use crate::error::ServiceError;
use crate::mail::filter::SubjectFilter;
use crate::retrieve::{self, DEFAULT_MAX_EMAILS, MAX_EMAILS, MIN_EMAILS, RetrieveRequest};

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Mail Digest API</title>
    <meta charset="UTF-8">
    <style>
        body { font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; background: #f5f5f5; }
        .container { background: white; padding: 30px; border-radius: 10px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }
        h1 { color: #2c3e50; text-align: center; }
        .api-info { background: #e3f2fd; border: 1px solid #bbdefb; padding: 20px; border-radius: 5px; margin: 20px 0; }
        code { background: #f8f9fa; padding: 5px 10px; border-radius: 3px; font-family: monospace; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Mail Digest API</h1>
        <div class="api-info">
            <h3>Usage</h3>
            <p><code>GET /get_emails?email_address=&lt;address&gt;&amp;refresh_token=&lt;token&gt;</code></p>
            <p>Optional: <code>subject_filter</code> (comma separates alternatives, space separates
            required terms), <code>max_emails</code> (1-50, default 10).</p>
            <p>The response is a plain-text digest of the most recent inbox and junk messages.</p>
            <p>Health check: <a href="/health">/health</a></p>
        </div>
    </div>
</body>
</html>
"#;

/// Accept requests until Ctrl-C. One request is handled at a time; every
/// request opens and fully tears down its own mail session, so there is no
/// shared state beyond the read-only configuration.
pub fn serve(cfg: Config) -> Result<()> {
    let addr = format!("0.0.0.0:{}", cfg.port);
    let server = Server::http(&addr).map_err(|e| anyhow!("binding {addr}: {e}"))?;
    info!("listening on http://{addr}");

    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        let Ok(maybe_request) = server.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };
        let Some(request) = maybe_request else {
            continue;
        };
        handle_request(&cfg, request);
    }

    info!("shutting down");
    Ok(())
}

fn handle_request(cfg: &Config, request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    info!("{method} {url}");

    if method != Method::Get {
        respond_json(request, 405, json!({"error": "method not allowed"}));
        return;
    }

    let path = url.split('?').next().unwrap_or("");
    match path {
        "/" => respond_html(request, INDEX_HTML),
        "/health" => respond_json(
            request,
            200,
            json!({
                "status": "ok",
                "service": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        ),
        "/get_emails" => handle_get_emails(cfg, request, &url),
        _ => respond_json(request, 404, json!({"error": "not found"})),
    }
}

fn handle_get_emails(cfg: &Config, request: Request, url: &str) {
    let req = match parse_request(url) {
        Ok(req) => req,
        Err(e) => {
            warn!("rejecting request: {e}");
            respond_json(request, e.status_code(), json!({"error": e.to_string()}));
            return;
        }
    };

    match retrieve::retrieve(cfg, &req) {
        Ok(digest) => respond_text(request, digest),
        Err(e) => {
            error!("request for {} failed: {e}", req.email_address);
            respond_json(request, e.status_code(), json!({"error": e.to_string()}));
        }
    }
}

/// Pull the retrieval parameters out of the request URL. Missing or blank
/// required parameters and non-numeric counts are parameter errors; the
/// range check on `max_emails` happens in the retrieval itself.
fn parse_request(url: &str) -> Result<RetrieveRequest, ServiceError> {
    let parsed = Url::parse(&format!("http://localhost{url}"))
        .map_err(|e| ServiceError::Parameter(format!("malformed query: {e}")))?;

    let mut email_address = None;
    let mut refresh_token = None;
    let mut subject_filter = String::new();
    let mut max_emails = DEFAULT_MAX_EMAILS;

    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "email_address" => email_address = Some(value.into_owned()),
            "refresh_token" => refresh_token = Some(value.into_owned()),
            "subject_filter" => subject_filter = value.into_owned(),
            "max_emails" => {
                max_emails = value.trim().parse().map_err(|_| {
                    ServiceError::Parameter(format!(
                        "max_emails must be a number between {MIN_EMAILS} and {MAX_EMAILS}, \
                         got {value:?}"
                    ))
                })?;
            }
            _ => {}
        }
    }

    let email_address = email_address
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ServiceError::Parameter("missing required parameter: email_address".to_string())
        })?;
    let refresh_token = refresh_token
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ServiceError::Parameter("missing required parameter: refresh_token".to_string())
        })?;

    Ok(RetrieveRequest {
        email_address,
        refresh_token,
        filter: SubjectFilter::parse(&subject_filter),
        max_emails,
    })
}

fn respond_text(request: Request, body: String) {
    let response = with_content_type(Response::from_string(body), "text/plain; charset=utf-8");
    send(request, response);
}

fn respond_html(request: Request, body: &str) {
    let response = with_content_type(Response::from_string(body), "text/html; charset=utf-8");
    send(request, response);
}

fn respond_json(request: Request, status: u16, body: serde_json::Value) {
    let response = with_content_type(
        Response::from_string(body.to_string()).with_status_code(status),
        "application/json; charset=utf-8",
    );
    send(request, response);
}

fn with_content_type(
    response: Response<Cursor<Vec<u8>>>,
    value: &str,
) -> Response<Cursor<Vec<u8>>> {
    match Header::from_bytes(&b"Content-Type"[..], value.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn send(request: Request, response: Response<Cursor<Vec<u8>>>) {
    if let Err(e) = request.respond(response) {
        warn!("failed to send response: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_query_parses() {
        let req = parse_request(
            "/get_emails?email_address=a%40b.com&refresh_token=tok&subject_filter=otp&max_emails=5",
        )
        .unwrap();
        assert_eq!(req.email_address, "a@b.com");
        assert_eq!(req.refresh_token, "tok");
        assert!(req.filter.is_active());
        assert!(req.filter.matches("your OTP"));
        assert_eq!(req.max_emails, 5);
    }

    #[test]
    fn optional_parameters_have_defaults() {
        let req = parse_request("/get_emails?email_address=a@b.com&refresh_token=tok").unwrap();
        assert!(!req.filter.is_active());
        assert_eq!(req.max_emails, DEFAULT_MAX_EMAILS);
    }

    #[test]
    fn missing_or_blank_required_parameters_are_rejected() {
        for url in [
            "/get_emails",
            "/get_emails?refresh_token=tok",
            "/get_emails?email_address=a@b.com",
            "/get_emails?email_address=&refresh_token=tok",
            "/get_emails?email_address=a@b.com&refresh_token=%20",
        ] {
            let err = parse_request(url).unwrap_err();
            assert_eq!(err.status_code(), 400, "{url}");
        }
    }

    #[test]
    fn non_numeric_max_emails_names_the_range() {
        let err = parse_request(
            "/get_emails?email_address=a@b.com&refresh_token=tok&max_emails=many",
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
        let msg = err.to_string();
        assert!(msg.contains('1') && msg.contains("50"), "{msg}");
    }

    #[test]
    fn percent_encoded_values_are_decoded() {
        let req = parse_request(
            "/get_emails?email_address=a%2Bb%40c.com&refresh_token=tok&subject_filter=one%20time",
        )
        .unwrap();
        assert_eq!(req.email_address, "a+b@c.com");
        assert!(req.filter.matches("one time codes"));
    }

    #[test]
    fn unknown_parameters_are_ignored() {
        let req = parse_request(
            "/get_emails?email_address=a@b.com&refresh_token=tok&debug=1&foo=bar",
        )
        .unwrap();
        assert_eq!(req.email_address, "a@b.com");
    }
}
