use anyhow::Result;
use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

use crate::domain::email::DecodedEmail;

const TRUNCATION_MARKER: &str = "...";
const HTML_RENDER_WIDTH: usize = 120;

/// One leaf of the MIME tree, reduced to what body assembly needs.
#[derive(Debug)]
enum Part {
    Text { bytes: Vec<u8>, charset: Option<String> },
    Html { bytes: Vec<u8>, charset: Option<String> },
    Attachment,
    Other,
}

/// Decode only the subject header, RFC 2047 decoded. Cheap enough to run on
/// every candidate so filter rejections never pay for body decoding.
pub fn decode_subject(raw: &[u8]) -> Result<String> {
    let mail = mailparse::parse_mail(raw)?;
    Ok(mail.headers.get_first_value("Subject").unwrap_or_default())
}

/// Turn one raw RFC 822 message into a normalized record.
///
/// Headers are RFC 2047 decoded (mailparse falls back to the literal text for
/// fragments it cannot decode). The body is assembled from every text part
/// that is not an attachment, HTML reduced to visible text, blank lines
/// dropped, and the result capped at `max_body_chars` characters.
pub fn decode_message(raw: &[u8], max_body_chars: usize) -> Result<DecodedEmail> {
    let mail = mailparse::parse_mail(raw)?;

    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let sender = mail.headers.get_first_value("From").unwrap_or_default();
    let date = mail.headers.get_first_value("Date").unwrap_or_default();

    let mut pieces = Vec::new();
    for part in collect_parts(&mail) {
        match part {
            Part::Text { bytes, charset } => {
                pieces.push(sniff_decode(&bytes, charset.as_deref()));
            }
            Part::Html { bytes, charset } => {
                pieces.push(strip_html(&sniff_decode(&bytes, charset.as_deref())));
            }
            Part::Attachment | Part::Other => {}
        }
    }
    let body = truncate_chars(&collapse_blank_lines(&pieces.join("\n")), max_body_chars);

    Ok(DecodedEmail {
        subject,
        sender,
        date,
        body,
    })
}

/// Flatten the MIME tree into leaf parts, depth-first.
fn collect_parts(mail: &ParsedMail<'_>) -> Vec<Part> {
    let mut parts = Vec::new();
    walk(mail, &mut parts);
    parts
}

fn walk(part: &ParsedMail<'_>, out: &mut Vec<Part>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk(sub, out);
        }
        return;
    }
    out.push(classify(part));
}

fn classify(part: &ParsedMail<'_>) -> Part {
    if matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    ) {
        return Part::Attachment;
    }
    let bytes = match part.get_body_raw() {
        Ok(bytes) => bytes,
        Err(_) => return Part::Other,
    };
    let charset = part.ctype.params.get("charset").cloned();
    match part.ctype.mimetype.as_str() {
        "text/plain" => Part::Text { bytes, charset },
        "text/html" => Part::Html { bytes, charset },
        _ => Part::Other,
    }
}

/// Decode part bytes to text. A declared charset that decodes cleanly wins;
/// otherwise the encoding is detected statistically. Undecodable sequences
/// come back as replacement characters, so this never fails.
fn sniff_decode(bytes: &[u8], declared: Option<&str>) -> String {
    if let Some(label) = declared
        && let Some(enc) = Encoding::for_label(label.trim().as_bytes())
    {
        let (text, _, malformed) = enc.decode(bytes);
        if !malformed {
            return text.into_owned();
        }
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let (text, _, _) = detector.guess(None, true).decode(bytes);
    text.into_owned()
}

fn strip_html(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), HTML_RENDER_WIDTH) {
        Ok(text) => text,
        Err(_) => html.to_string(),
    }
}

/// Drop empty and whitespace-only lines, rejoining the rest with single
/// newlines. Intentional blank-line spacing is lost; accepted.
fn collapse_blank_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut out: String = text.chars().take(cap).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
