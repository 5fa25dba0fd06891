use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use log::debug;
use native_tls::TlsConnector;

use crate::error::ServiceError;

const IMAP_PORT: u16 = 993;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
// Bounds every read and write on the socket so a stalled server cannot hold
// a request forever.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

type TlsSession = imap::Session<native_tls::TlsStream<TcpStream>>;

/// Build canonical SASL XOAUTH2 auth string as bytes.
fn build_xoauth2_bytes(user: &str, access_token: &str) -> Vec<u8> {
    format!("user={user}\x01auth=Bearer {access_token}\x01\x01").into_bytes()
}

/// One-shot challenge/response: the server issues a single challenge and the
/// precomputed credential is returned regardless of its content.
struct OAuth2Authenticator {
    response: Vec<u8>,
}

impl imap::Authenticator for OAuth2Authenticator {
    type Response = Vec<u8>;
    fn process(&self, _challenge: &[u8]) -> Self::Response {
        self.response.clone()
    }
}

/// Outcome of selecting a folder; unknown names are an expected case, used
/// for the Junk / "Junk Email" naming fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Folder selected read-only; carries the server's message count.
    Selected(u32),
    NotFound,
}

/// The folder operations the retrieval logic needs. Implemented by the live
/// session and by fakes in tests.
pub trait Mailbox {
    fn select_readonly(&mut self, folder: &str) -> Result<SelectOutcome, ServiceError>;
    /// Message sequence numbers of the selected folder, ascending.
    fn search_all(&mut self) -> Result<Vec<u32>, ServiceError>;
    /// Raw RFC 822 bytes for one message, `None` if the server returned no body.
    fn fetch_raw(&mut self, seq: u32) -> Result<Option<Vec<u8>>, ServiceError>;
}

/// Unauthenticated TLS connection to the mail host.
pub struct ImapClient {
    host: String,
    client: imap::Client<native_tls::TlsStream<TcpStream>>,
}

impl ImapClient {
    /// Connect with explicit timeouts. The imap crate's own connect helper
    /// offers none, so the stream is built by hand and handed over.
    pub fn connect(host: &str) -> Result<Self, ServiceError> {
        let addr = (host, IMAP_PORT)
            .to_socket_addrs()
            .map_err(|e| ServiceError::Network(format!("resolving {host}: {e}")))?
            .next()
            .ok_or_else(|| ServiceError::Network(format!("no addresses for {host}")))?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| ServiceError::Network(format!("connecting to {host}: {e}")))?;
        stream
            .set_read_timeout(Some(SOCKET_TIMEOUT))
            .map_err(|e| ServiceError::Network(format!("setting read timeout: {e}")))?;
        stream
            .set_write_timeout(Some(SOCKET_TIMEOUT))
            .map_err(|e| ServiceError::Network(format!("setting write timeout: {e}")))?;

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| ServiceError::Network(format!("building TLS connector: {e}")))?;
        let tlsstream = tls
            .connect(host, stream)
            .map_err(|e| ServiceError::Network(format!("TLS handshake with {host}: {e}")))?;

        Ok(ImapClient {
            host: host.to_string(),
            client: imap::Client::new(tlsstream),
        })
    }

    /// Authenticate via SASL XOAUTH2 and enter the session state.
    pub fn authenticate(self, user: &str, access_token: &str) -> Result<ImapSession, ServiceError> {
        let ImapClient { host, client } = self;
        let payload = build_xoauth2_bytes(user, access_token);

        // Try RAW first; the imap crate base64-encodes the response itself.
        let auth_raw = OAuth2Authenticator {
            response: payload.clone(),
        };
        let client = match client.authenticate("XOAUTH2", &auth_raw) {
            Ok(session) => return Ok(ImapSession { session }),
            Err((e, returned_client)) => {
                debug!("XOAUTH2 raw attempt against {host} rejected: {e}");
                returned_client
            }
        };

        // Fallback BASE64 for servers that expect a pre-encoded response.
        let auth_b64 = OAuth2Authenticator {
            response: general_purpose::STANDARD.encode(&payload).into_bytes(),
        };
        match client.authenticate("XOAUTH2", &auth_b64) {
            Ok(session) => Ok(ImapSession { session }),
            Err((e, _)) => Err(classify_auth(e)),
        }
    }
}

/// Authenticated, read-only IMAP session. Must be closed on every exit path
/// so server-side session slots are not leaked.
pub struct ImapSession {
    session: TlsSession,
}

impl ImapSession {
    pub fn close(mut self) {
        if let Err(e) = self.session.logout() {
            debug!("LOGOUT failed: {e}");
        }
    }
}

impl Mailbox for ImapSession {
    fn select_readonly(&mut self, folder: &str) -> Result<SelectOutcome, ServiceError> {
        match self.session.examine(folder) {
            Ok(mailbox) => Ok(SelectOutcome::Selected(mailbox.exists)),
            Err(imap::Error::No(msg)) => {
                debug!("EXAMINE {folder}: {msg}");
                Ok(SelectOutcome::NotFound)
            }
            Err(e) => Err(classify(&format!("EXAMINE {folder}"), e)),
        }
    }

    fn search_all(&mut self) -> Result<Vec<u32>, ServiceError> {
        let mut seqs: Vec<u32> = self
            .session
            .search("ALL")
            .map_err(|e| classify("SEARCH ALL", e))?
            .into_iter()
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    fn fetch_raw(&mut self, seq: u32) -> Result<Option<Vec<u8>>, ServiceError> {
        let fetches = self
            .session
            .fetch(seq.to_string(), "(BODY.PEEK[])")
            .map_err(|e| classify(&format!("FETCH {seq}"), e))?;
        Ok(fetches.iter().next().and_then(|f| f.body()).map(|b| b.to_vec()))
    }
}

/// Transport-level failures abort the whole request; everything else is a
/// protocol error the caller may contain at folder or message scope.
fn classify(context: &str, err: imap::Error) -> ServiceError {
    match err {
        imap::Error::Io(e) => ServiceError::Network(format!("{context}: {e}")),
        imap::Error::ConnectionLost => {
            ServiceError::Network(format!("{context}: connection lost"))
        }
        imap::Error::TlsHandshake(e) => ServiceError::Network(format!("{context}: {e}")),
        imap::Error::Tls(e) => ServiceError::Network(format!("{context}: {e}")),
        imap::Error::No(msg) => ServiceError::Protocol(format!("{context}: server refused: {msg}")),
        imap::Error::Bad(msg) => ServiceError::Protocol(format!("{context}: bad command: {msg}")),
        other => ServiceError::Protocol(format!("{context}: {other}")),
    }
}

fn classify_auth(err: imap::Error) -> ServiceError {
    match err {
        imap::Error::Io(e) => ServiceError::Network(format!("XOAUTH2: {e}")),
        imap::Error::ConnectionLost => ServiceError::Network("XOAUTH2: connection lost".into()),
        imap::Error::TlsHandshake(e) => ServiceError::Network(format!("XOAUTH2: {e}")),
        imap::Error::Tls(e) => ServiceError::Network(format!("XOAUTH2: {e}")),
        other => ServiceError::Auth(format!("server rejected XOAUTH2 credentials: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xoauth2_string_has_the_sasl_shape() {
        let bytes = build_xoauth2_bytes("bob@example.com", "tok123");
        assert_eq!(
            bytes,
            b"user=bob@example.com\x01auth=Bearer tok123\x01\x01"
        );
    }

    #[test]
    fn authenticator_ignores_the_challenge() {
        use imap::Authenticator as _;
        let auth = OAuth2Authenticator {
            response: b"abc".to_vec(),
        };
        assert_eq!(auth.process(b"ignored"), b"abc");
        assert_eq!(auth.process(b""), b"abc");
    }

    #[test]
    fn transport_errors_classify_as_network() {
        let io = imap::Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(classify("FETCH 1", io).is_network());
        assert!(classify("SEARCH ALL", imap::Error::ConnectionLost).is_network());
    }

    #[test]
    fn server_rejections_classify_as_protocol() {
        let no = imap::Error::No("not allowed".to_string());
        let e = classify("EXAMINE X", no);
        assert!(!e.is_network());
        assert_eq!(e.status_code(), 500);

        let bad = imap::Error::Bad("syntax".to_string());
        assert!(!classify("SEARCH ALL", bad).is_network());
    }

    #[test]
    fn auth_rejections_classify_as_auth() {
        let e = classify_auth(imap::Error::No("AUTHENTICATE failed".to_string()));
        assert!(matches!(e, ServiceError::Auth(_)));
        let e = classify_auth(imap::Error::ConnectionLost);
        assert!(e.is_network());
    }
}
