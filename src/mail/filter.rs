/// Subject filter parsed from the `subject_filter` query parameter.
///
/// Matching is case-insensitive and picks exactly one mode per filter:
/// the whole filter as a substring of the subject; failing that, comma-
/// separated alternatives (any token may match); failing that, whitespace-
/// separated terms (every token must match). Commas win when both are
/// present, so `"security code,otp"` is two alternatives, one of which
/// happens to contain a space.
#[derive(Debug, Clone)]
pub struct SubjectFilter {
    raw: String,
    lowered: String,
}

impl SubjectFilter {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        SubjectFilter {
            raw: trimmed.to_string(),
            lowered: trimmed.to_lowercase(),
        }
    }

    /// An empty filter keeps everything and does not widen the scan window.
    pub fn is_active(&self) -> bool {
        !self.lowered.is_empty()
    }

    pub fn matches(&self, subject: &str) -> bool {
        if self.lowered.is_empty() {
            return true;
        }
        let subject = subject.to_lowercase();
        if subject.contains(&self.lowered) {
            return true;
        }
        if self.lowered.contains(',') {
            return self
                .lowered
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .any(|token| subject.contains(token));
        }
        if self.lowered.chars().any(char::is_whitespace) {
            return self
                .lowered
                .split_whitespace()
                .all(|token| subject.contains(token));
        }
        false
    }

    /// The filter text as the caller sent it, for echoing in responses.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_keeps_everything() {
        for raw in ["", "   ", "\t"] {
            let f = SubjectFilter::parse(raw);
            assert!(!f.is_active(), "{raw:?} should be inert");
            assert!(f.matches("anything at all"));
            assert!(f.matches(""));
        }
    }

    #[test]
    fn single_word_is_case_insensitive_substring() {
        let f = SubjectFilter::parse("Invoice");
        assert!(f.is_active());
        assert!(f.matches("Your INVOICE is ready"));
        assert!(f.matches("pro-forma invoices"));
        assert!(!f.matches("receipt"));
    }

    #[test]
    fn whole_filter_substring_wins_before_splitting() {
        let f = SubjectFilter::parse("one time password");
        assert!(f.matches("Your one time password is 123456"));
    }

    #[test]
    fn comma_means_any_alternative() {
        let f = SubjectFilter::parse("otp,verification");
        assert!(f.matches("Your OTP code"));
        assert!(f.matches("Verification required"));
        assert!(!f.matches("Weekly newsletter"));
        // OR law: matches(s, "a,b") == matches(s, "a") || matches(s, "b")
        for subject in ["OTP inside", "verification step", "neither"] {
            let a = SubjectFilter::parse("otp");
            let b = SubjectFilter::parse("verification");
            assert_eq!(
                f.matches(subject),
                a.matches(subject) || b.matches(subject),
                "OR law broken for {subject:?}"
            );
        }
    }

    #[test]
    fn whitespace_means_every_term() {
        let f = SubjectFilter::parse("account alert");
        // terms may appear in any order
        assert!(f.matches("alert for your account"));
        assert!(!f.matches("account statement"));
        // AND law: matches(s, "a b") == matches(s, "a") && matches(s, "b")
        for subject in ["alert account", "account only", "nothing"] {
            let a = SubjectFilter::parse("account");
            let b = SubjectFilter::parse("alert");
            assert_eq!(
                f.matches(subject),
                a.matches(subject) && b.matches(subject),
                "AND law broken for {subject:?}"
            );
        }
    }

    #[test]
    fn comma_takes_precedence_over_whitespace() {
        let f = SubjectFilter::parse("security code,otp");
        // "security code" is one alternative, matched as a whole substring
        assert!(f.matches("Microsoft security code enclosed"));
        assert!(f.matches("your otp"));
        // word-wise AND of "security"+"code" would have matched this one
        assert!(!f.matches("code of the security team"));
    }

    #[test]
    fn comma_tokens_are_trimmed_and_empties_dropped() {
        let f = SubjectFilter::parse("invoice, , receipt,");
        assert!(f.matches("INVOICE #42"));
        assert!(f.matches("your receipt"));
        assert!(!f.matches("totally unrelated"));
    }

    #[test]
    fn handles_non_ascii_terms() {
        let f = SubjectFilter::parse("OTP,验证码");
        assert!(f.matches("Your OTP code"));
        assert!(f.matches("您的验证码"));
        assert!(!f.matches("账单"));
        assert!(!f.matches("Weekly digest"));
    }
}
