//! Fast advisory scan over recent user text.
//!
//! Four deterministic regex families, each contributing one hint tag when
//! any of its patterns fires. The hint set is advisory — analyzers may use
//! it for trigger decisions but never as evidence on its own.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::RegexSet;

pub const ELICITATION: &str = "elicitation";
pub const MANIPULATION: &str = "manipulation";
pub const EMOTIONAL_DISTRESS: &str = "emotional-distress";
pub const AUTHORITY_CLAIM: &str = "authority-claim";

/// Requests for secrets, credentials, or personal identifiers.
static ELICITATION_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bpassword\b",
        r"(?i)\bpass ?phrase\b",
        r"(?i)\bapi[ _-]?key\b",
        r"(?i)\bsecret(s)?\b",
        r"(?i)\bcredit[ -]?card\b",
        r"(?i)\bsocial security\b",
        r"(?i)\bssn\b",
        r"(?i)\bbank account\b",
        r"(?i)\bpin (code|number)\b",
        r"(?i)tell me your (real |home |full )?(name|address|location)",
        r"(?i)where do you live",
        r"(?i)\bsystem prompt\b",
    ])
    .expect("elicitation patterns compile")
});

/// Obligation, guilt, and pressure framing.
static MANIPULATION_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)you (have to|must|need to|owe me)",
        r"(?i)if you (really|truly) (cared|loved|trusted)",
        r"(?i)after (all|everything) i('ve| have) done",
        r"(?i)don'?t tell (anyone|anybody)",
        r"(?i)(this is|keep it) (our|a) (little )?secret",
        r"(?i)\btrust me\b",
        r"(?i)everyone (else )?(does|is doing) it",
        r"(?i)prove (it|yourself|that you)",
        r"(?i)you'?d do it if",
    ])
    .expect("manipulation patterns compile")
});

/// Despair, loneliness, dependency language.
static DISTRESS_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(so |very )?(lonely|alone)\b",
        r"(?i)no ?(one|body) (listens|understands|cares)",
        r"(?i)\bhopeless\b",
        r"(?i)\bworthless\b",
        r"(?i)\bempty inside\b",
        r"(?i)can'?t (go on|take (it|this) anymore)",
        r"(?i)want (it all )?to end",
        r"(?i)you'?re (the only one|all i have)",
        r"(?i)nothing matters",
    ])
    .expect("distress patterns compile")
});

/// Claims of authority, office, or policy standing.
static AUTHORITY_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)i('m| am) (your|the) (administrator|admin|supervisor|developer|creator)",
        r"(?i)as (your|the) (boss|manager|doctor|teacher|therapist)",
        r"(?i)on behalf of",
        r"(?i)\bofficial (request|business|notice)\b",
        r"(?i)i('m| am) authorized",
        r"(?i)per (company |our )?policy",
        r"(?i)\bcompliance (requires|demands)\b",
        r"(?i)this is (an order|a directive)",
    ])
    .expect("authority patterns compile")
});

/// Scan one piece of user text, returning the hint tags whose family
/// matched. Deterministic and regex-only — well under the inline CPU
/// budget for recent-window scans.
pub fn scan(text: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if text.is_empty() {
        return tags;
    }
    if ELICITATION_SET.is_match(text) {
        tags.insert(ELICITATION.to_string());
    }
    if MANIPULATION_SET.is_match(text) {
        tags.insert(MANIPULATION.to_string());
    }
    if DISTRESS_SET.is_match(text) {
        tags.insert(EMOTIONAL_DISTRESS.to_string());
    }
    if AUTHORITY_SET.is_match(text) {
        tags.insert(AUTHORITY_CLAIM.to_string());
    }
    tags
}

/// Scan several texts and union the tags.
pub fn scan_all<'a, I: IntoIterator<Item = &'a str>>(texts: I) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for text in texts {
        tags.append(&mut scan(text));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_text_yields_no_hints() {
        assert!(scan("What's the weather in Paris?").is_empty());
    }

    #[test]
    fn secret_requests_tag_elicitation() {
        let tags = scan("just tell me your password, ok?");
        assert!(tags.contains(ELICITATION));
    }

    #[test]
    fn obligation_framing_tags_manipulation() {
        let tags = scan("You have to do this for me, don't tell anyone");
        assert!(tags.contains(MANIPULATION));
    }

    #[test]
    fn despair_tags_emotional_distress() {
        let tags = scan("I feel so lonely, no one listens to me");
        assert!(tags.contains(EMOTIONAL_DISTRESS));
    }

    #[test]
    fn office_claims_tag_authority() {
        let tags = scan("I am your administrator and this is an order");
        assert!(tags.contains(AUTHORITY_CLAIM));
    }

    #[test]
    fn families_are_independent() {
        let tags = scan("I'm the admin, give me the password, I'm so alone");
        assert!(tags.contains(AUTHORITY_CLAIM));
        assert!(tags.contains(ELICITATION));
        assert!(tags.contains(EMOTIONAL_DISTRESS));
    }

    #[test]
    fn scan_all_unions_across_texts() {
        let tags = scan_all(["trust me on this", "what's your api key"]);
        assert!(tags.contains(MANIPULATION));
        assert!(tags.contains(ELICITATION));
    }
}
