use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::{Config, IMAP_HOST};
use crate::domain::email::DecodedEmail;
use crate::error::ServiceError;
use crate::mail::decoders::{decode_message, decode_subject};
use crate::mail::filter::SubjectFilter;
use crate::mail::session::{ImapClient, Mailbox, SelectOutcome};
use crate::oauth::TokenBroker;

pub const MIN_EMAILS: usize = 1;
pub const MAX_EMAILS: usize = 50;
pub const DEFAULT_MAX_EMAILS: usize = 10;

/// With an active filter most candidates are discarded, so the scan window
/// is widened to keep the quota reachable.
const FILTER_WINDOW_FACTOR: usize = 3;

const BLOCK_SEPARATOR: &str = "--------------------------------------------------";

#[derive(Debug)]
pub struct RetrieveRequest {
    pub email_address: String,
    pub refresh_token: String,
    pub filter: SubjectFilter,
    pub max_emails: usize,
}

/// Run one full retrieval: token exchange, mailbox session, folder scan,
/// digest assembly. The session is closed on every path once authentication
/// succeeded, including when the scan fails halfway.
pub fn retrieve(cfg: &Config, req: &RetrieveRequest) -> Result<String, ServiceError> {
    if req.max_emails < MIN_EMAILS || req.max_emails > MAX_EMAILS {
        return Err(ServiceError::Parameter(format!(
            "max_emails must be between {MIN_EMAILS} and {MAX_EMAILS}, got {}",
            req.max_emails
        )));
    }

    let access_token = obtain_token(cfg, &req.refresh_token)?;

    info!("connecting to {IMAP_HOST} as {}", req.email_address);
    let client = ImapClient::connect(IMAP_HOST)?;
    let mut session = client.authenticate(&req.email_address, &access_token)?;

    let outcome = scan_folders(&mut session, &req.filter, req.max_emails, cfg.max_body_chars);
    session.close();
    let blocks = outcome?;

    info!("retrieved {} messages", blocks.len());
    Ok(assemble_digest(&blocks, &req.filter, Utc::now()))
}

/// Every failure on the token path collapses into one generic outcome; the
/// details are logged but never reach the caller.
fn obtain_token(cfg: &Config, refresh_token: &str) -> Result<String, ServiceError> {
    let broker = TokenBroker::from_config(cfg).map_err(|e| {
        warn!("token broker setup failed: {e:#}");
        auth_failure()
    })?;
    broker.exchange(refresh_token).map_err(|e| {
        warn!("token exchange failed: {e:#}");
        auth_failure()
    })
}

fn auth_failure() -> ServiceError {
    ServiceError::Auth(
        "unable to obtain an access token; check that the refresh token is valid".to_string(),
    )
}

/// INBOX gets the whole quota; whatever is left goes to Junk, with
/// "Junk Email" as the fallback name when Junk is absent or yields nothing.
fn scan_folders<M: Mailbox>(
    mailbox: &mut M,
    filter: &SubjectFilter,
    max_emails: usize,
    max_body_chars: usize,
) -> Result<Vec<String>, ServiceError> {
    let mut blocks = scan_folder(mailbox, "INBOX", filter, max_emails, max_body_chars)?;

    let remaining = max_emails.saturating_sub(blocks.len());
    if remaining > 0 {
        let mut junk = scan_folder(mailbox, "Junk", filter, remaining, max_body_chars)?;
        if junk.is_empty() {
            junk = scan_folder(mailbox, "Junk Email", filter, remaining, max_body_chars)?;
        }
        blocks.extend(junk);
    }

    Ok(blocks)
}

/// Scan one folder up to `quota` retained messages. Transport errors abort;
/// anything scoped to the folder or to a single message is logged and
/// skipped.
fn scan_folder<M: Mailbox>(
    mailbox: &mut M,
    folder: &str,
    filter: &SubjectFilter,
    quota: usize,
    max_body_chars: usize,
) -> Result<Vec<String>, ServiceError> {
    let exists = match mailbox.select_readonly(folder) {
        Ok(SelectOutcome::Selected(n)) => n,
        Ok(SelectOutcome::NotFound) => {
            debug!("folder {folder} does not exist");
            return Ok(Vec::new());
        }
        Err(e) if e.is_network() => return Err(e),
        Err(e) => {
            warn!("skipping folder {folder}: {e}");
            return Ok(Vec::new());
        }
    };
    debug!("folder {folder}: {exists} messages on server");

    let seqs = match mailbox.search_all() {
        Ok(seqs) => seqs,
        Err(e) if e.is_network() => return Err(e),
        Err(e) => {
            warn!("skipping folder {folder}: {e}");
            return Ok(Vec::new());
        }
    };

    // Suffix of the ascending sequence list = the most recent messages.
    let window = if filter.is_active() {
        quota * FILTER_WINDOW_FACTOR
    } else {
        quota
    };
    let candidates = &seqs[seqs.len().saturating_sub(window)..];

    let mut blocks = Vec::new();
    for &seq in candidates {
        if blocks.len() >= quota {
            break;
        }
        let raw = match mailbox.fetch_raw(seq) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("{folder} message {seq}: server returned no body, skipping");
                continue;
            }
            Err(e) if e.is_network() => return Err(e),
            Err(e) => {
                warn!("{folder} message {seq}: {e}, skipping");
                continue;
            }
        };
        // Filter on the subject alone; rejected candidates never pay for
        // body decoding.
        let subject = match decode_subject(&raw) {
            Ok(subject) => subject,
            Err(e) => {
                warn!("{folder} message {seq}: unparseable, skipping: {e}");
                continue;
            }
        };
        if !filter.matches(&subject) {
            continue;
        }
        let email = match decode_message(&raw, max_body_chars) {
            Ok(email) => email,
            Err(e) => {
                warn!("{folder} message {seq}: undecodable, skipping: {e}");
                continue;
            }
        };
        blocks.push(render_block(folder, blocks.len() + 1, &email));
    }

    info!(
        "folder {folder}: retained {} of {} candidates",
        blocks.len(),
        candidates.len()
    );
    Ok(blocks)
}

fn render_block(folder: &str, number: usize, email: &DecodedEmail) -> String {
    format!(
        "\n--- Folder: {folder} ---\n\
         Number: {number}\n\
         Subject: {subject}\n\
         Date: {date}\n\
         From: {sender}\n\
         Body:\n{body}\n\
         \n{BLOCK_SEPARATOR}\n",
        subject = email.subject,
        date = email.date,
        sender = email.sender,
        body = email.body,
    )
}

fn assemble_digest(blocks: &[String], filter: &SubjectFilter, retrieved_at: DateTime<Utc>) -> String {
    if blocks.is_empty() {
        return if filter.is_active() {
            format!("No messages found (filter: \"{}\")", filter.raw())
        } else {
            "No messages found".to_string()
        };
    }

    let mut digest = format!("Total: {}\n", blocks.len());
    if filter.is_active() {
        digest.push_str(&format!("Filter: {}\n", filter.raw()));
    }
    digest.push_str(&format!(
        "Retrieved: {}\n",
        retrieved_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    digest.push_str(BLOCK_SEPARATOR);
    digest.push('\n');
    digest.push_str(&blocks.join("\n"));
    digest
}
