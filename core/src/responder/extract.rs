//! Keyword and pattern extraction from free-text messages

use lazy_static::lazy_static;
use regex::Regex;

use crate::conversation::loan::{MAX_TENURE_MONTHS, MIN_TENURE_MONTHS};
use crate::conversation::LoanPurpose;

lazy_static! {
    static ref PHONE: Regex = Regex::new(r"(?:\+)?\b(?:91|0)?([6-9]\d{9})\b").unwrap();
    static ref CRORE: Regex = Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:crores?|cr)\b").unwrap();
    static ref LAKH: Regex = Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:lakhs?|lacs?|l)\b").unwrap();
    static ref THOUSAND: Regex = Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:k|thousand)\b").unwrap();
    static ref RUPEES: Regex = Regex::new(r"(?i)(?:₹|\brs\.?|\binr)\s*(\d[\d,]*(?:\.\d+)?)").unwrap();
    static ref BARE_AMOUNT: Regex = Regex::new(r"\b(\d{1,3}(?:,\d{2,3})+|\d{4,})\b").unwrap();
    static ref MONTHS: Regex = Regex::new(r"(?i)\b(\d{1,3})\s*(?:months?|mths?|mos?)\b").unwrap();
    static ref YEARS: Regex = Regex::new(r"(?i)\b(\d{1,2}(?:\.\d+)?)\s*(?:years?|yrs?)\b").unwrap();
    static ref INCOME: Regex = Regex::new(
        r"(?i)\b(?:salary|income|earn(?:ings?)?|take[- ]home)\b\D{0,20}(\d[\d,]*(?:\.\d+)?)\s*(lakhs?|lacs?|k)?"
    )
    .unwrap();
    static ref EMAIL: Regex = Regex::new(r"[\w.+-]+@[\w-]+\.[\w.]+").unwrap();
    static ref ID_DOCUMENT: Regex = Regex::new(r"(?i)\b(?:aadhaar|aadhar|pan|passport|voter id|card)\b").unwrap();
    static ref CORRECTION: Regex =
        Regex::new(r"(?i)\b(?:change|actually|instead|update|modify|correct|make it)\b").unwrap();
    static ref CLARIFICATION: Regex =
        Regex::new(r"(?i)\b(?:minimum|maximum|min|max|how much can|range|limits?)\b").unwrap();
    static ref NEGOTIATION: Regex =
        Regex::new(r"(?i)\b(?:negotiate|better rate|discount|lower|reduce|cheaper)\b").unwrap();
    static ref DOCUMENT_UPLOAD: Regex =
        Regex::new(r"(?i)\b(?:salary slip|payslip|pay slip|uploaded|attached|bank statement)\b").unwrap();
    static ref CLOSING: Regex =
        Regex::new(r"(?i)\b(?:thanks|thank you|done|nothing|that's all|ok bye)\b").unwrap();
    static ref BARE_NO: Regex = Regex::new(r"(?i)^\s*(?:no|nope|nah)\W*$").unwrap();
    static ref PURPOSES: Vec<(LoanPurpose, Regex)> = vec![
        (LoanPurpose::HomeImprovement, Regex::new(r"(?i)\b(?:home|house|renovat\w*|repair\w*|improvement|interior)\b").unwrap()),
        (LoanPurpose::Education, Regex::new(r"(?i)\b(?:education|study|studies|course|college|university|school|fees)\b").unwrap()),
        (LoanPurpose::Medical, Regex::new(r"(?i)\b(?:medical|health|hospital|treatment|surgery)\b").unwrap()),
        (LoanPurpose::Business, Regex::new(r"(?i)\b(?:business|startup|shop|venture)\b").unwrap()),
        (LoanPurpose::Wedding, Regex::new(r"(?i)\b(?:wedding|marriage|shaadi)\b").unwrap()),
        (LoanPurpose::Travel, Regex::new(r"(?i)\b(?:travel|vacation|trip|holiday|tour)\b").unwrap()),
        (LoanPurpose::DebtConsolidation, Regex::new(r"(?i)\b(?:debt|consolidat\w*|credit card)\b").unwrap()),
        (LoanPurpose::Personal, Regex::new(r"(?i)\b(?:personal|general|other)\b").unwrap()),
    ];
}

/// Normalized 10-digit mobile number, if the message carries one
pub fn extract_phone(text: &str) -> Option<String> {
    PHONE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Strip separators and a +91/0 prefix; `None` unless a valid mobile remains
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let core = match digits.len() {
        12 if digits.starts_with("91") => &digits[2..],
        11 if digits.starts_with('0') => &digits[1..],
        10 => digits.as_str(),
        _ => return None,
    };
    match core.chars().next() {
        Some('6'..='9') => Some(core.to_string()),
        _ => None,
    }
}

fn without_phone(text: &str) -> String {
    PHONE.replace_all(text, " ").into_owned()
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

/// Loan amount in rupees. Understands crore, lakh, k, ₹/Rs prefixes and
/// bare numbers of four or more digits. Phone numbers are ignored.
pub fn extract_amount(text: &str) -> Option<f64> {
    let text = without_phone(text);
    let scaled = [(&*CRORE, 10_000_000.0), (&*LAKH, 100_000.0), (&*THOUSAND, 1_000.0)];
    for (pattern, scale) in scaled {
        if let Some(value) = pattern
            .captures(&text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_number(m.as_str()))
        {
            return Some(value * scale);
        }
    }
    if let Some(value) = RUPEES
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
    {
        return Some(value);
    }

    let tenure_free = MONTHS.replace_all(&text, " ");
    BARE_AMOUNT
        .captures(&tenure_free)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
}

/// Tenure in months from "24 months" or "2 years" phrasing
pub fn extract_tenure(text: &str) -> Option<u32> {
    if let Some(months) = MONTHS
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
    {
        return Some(months);
    }
    YEARS
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|years| (years * 12.0).round() as u32)
}

/// A bare number in the tenure range counts as months when a tenure is
/// the only thing still missing
pub fn extract_bare_tenure(text: &str) -> Option<u32> {
    let value = text.trim().parse::<u32>().ok()?;
    (MIN_TENURE_MONTHS..=MAX_TENURE_MONTHS)
        .contains(&value)
        .then_some(value)
}

/// Purpose from a single-digit menu choice or keywords
pub fn extract_purpose(text: &str) -> Option<LoanPurpose> {
    let trimmed = text.trim().trim_end_matches('.');
    if trimmed.len() == 1 {
        if let Some(choice) = trimmed.parse::<u8>().ok().and_then(LoanPurpose::from_menu) {
            return Some(choice);
        }
    }
    PURPOSES
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(purpose, _)| *purpose)
}

/// Monthly income from "my salary is 85,000" or "income 1.2 lakh"
pub fn extract_income(text: &str) -> Option<f64> {
    let caps = INCOME.captures(text)?;
    let value = parse_number(caps.get(1)?.as_str())?;
    let scale = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit.starts_with('l') => 100_000.0,
        Some(unit) if unit == "k" => 1_000.0,
        _ => 1.0,
    };
    Some(value * scale)
}

pub fn mentions_email(text: &str) -> bool {
    EMAIL.is_match(text)
}

pub fn mentions_id_document(text: &str) -> bool {
    ID_DOCUMENT.is_match(text)
}

pub fn is_correction(text: &str) -> bool {
    CORRECTION.is_match(text)
}

pub fn asks_for_range(text: &str) -> bool {
    CLARIFICATION.is_match(text)
}

pub fn wants_to_negotiate(text: &str) -> bool {
    NEGOTIATION.is_match(text)
}

pub fn mentions_document_upload(text: &str) -> bool {
    DOCUMENT_UPLOAD.is_match(text)
}

/// Sign-off phrasing. A question is never a sign-off, and "no" only
/// counts on its own.
pub fn is_closing(text: &str) -> bool {
    !text.contains('?') && (CLOSING.is_match(text) || BARE_NO.is_match(text))
}

/// Lowercased words with surrounding punctuation removed
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
}

/// True if any phrase occurs in the text as whole words
pub fn contains_phrase(text: &str, phrases: &[String]) -> bool {
    let normalized = format!(" {} ", words(text).collect::<Vec<_>>().join(" "));
    phrases
        .iter()
        .any(|p| normalized.contains(&format!(" {} ", p.to_lowercase())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_needs_a_sign_off_not_a_question() {
        assert!(is_closing("Thanks, that's all"));
        assert!(is_closing("No."));
        assert!(is_closing("I'm done"));
        assert!(!is_closing("no, what is my EMI?"));
        assert!(!is_closing("no idea what tenure to pick"));
        assert!(!is_closing("thanks! can I prepay later?"));
    }

    #[test]
    fn phone_with_and_without_prefix() {
        assert_eq!(extract_phone("9876543210").as_deref(), Some("9876543210"));
        assert_eq!(extract_phone("call me on +919876543210").as_deref(), Some("9876543210"));
        assert_eq!(extract_phone("my number 09876543210").as_deref(), Some("9876543210"));
        assert_eq!(extract_phone("5876543210"), None);
        assert_eq!(extract_phone("I need 500000"), None);
    }

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize_phone("+91 98765-43210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("1234567890"), None);
    }

    #[test]
    fn amounts_in_indian_units() {
        assert_eq!(extract_amount("I need 5 lakh for 24 months, personal"), Some(500_000.0));
        assert_eq!(extract_amount("1.5 crore"), Some(15_000_000.0));
        assert_eq!(extract_amount("around 75k"), Some(75_000.0));
        assert_eq!(extract_amount("₹2,50,000 please"), Some(250_000.0));
        assert_eq!(extract_amount("Rs. 40000"), Some(40_000.0));
        assert_eq!(extract_amount("300000"), Some(300_000.0));
    }

    #[test]
    fn amount_ignores_phone_and_tenure() {
        assert_eq!(extract_amount("9876543210"), None);
        assert_eq!(extract_amount("for 24 months"), None);
        assert_eq!(extract_amount("9876543210 and 2 lakh"), Some(200_000.0));
    }

    #[test]
    fn tenure_in_months_or_years() {
        assert_eq!(extract_tenure("I need 5 lakh for 24 months, personal"), Some(24));
        assert_eq!(extract_tenure("3 years"), Some(36));
        assert_eq!(extract_tenure("1.5 yrs"), Some(18));
        assert_eq!(extract_tenure("5 lakh"), None);
        assert_eq!(extract_bare_tenure(" 36 "), Some(36));
        assert_eq!(extract_bare_tenure("120"), None);
    }

    #[test]
    fn purpose_by_menu_or_keyword() {
        assert_eq!(extract_purpose("2"), Some(LoanPurpose::HomeImprovement));
        assert_eq!(extract_purpose("for my sister's shaadi"), Some(LoanPurpose::Wedding));
        assert_eq!(
            extract_purpose("I need 5 lakh for 24 months, personal"),
            Some(LoanPurpose::Personal)
        );
        assert_eq!(extract_purpose("24 months"), None);
    }

    #[test]
    fn income_with_units() {
        assert_eq!(extract_income("my salary is 85,000"), Some(85_000.0));
        assert_eq!(extract_income("monthly income 1.2 lakh"), Some(120_000.0));
        assert_eq!(extract_income("I earn 90k"), Some(90_000.0));
        assert_eq!(extract_income("hello"), None);
    }

    #[test]
    fn phrase_matching_is_word_bounded() {
        let phrases = vec!["bye".to_string(), "what can you do".to_string()];
        assert!(contains_phrase("ok, bye!", &phrases));
        assert!(contains_phrase("What can you do?", &phrases));
        assert!(!contains_phrase("byelaws", &phrases));
    }
}
