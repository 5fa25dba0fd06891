/// One message after header decoding and body extraction. Header fields are
/// already RFC 2047 decoded; `body` is plain text, charset-decoded and capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEmail {
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
}
