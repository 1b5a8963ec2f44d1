//! String hygiene shared by the data-access layer and HTTP intake.

use std::sync::LazyLock;

use regex::Regex;

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$";

/// `None` only if the pattern fails to compile, in which case no address
/// validates.
static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(EMAIL_PATTERN).ok());

/// Remove control characters with ordinals 1 through 31.
pub fn strip_control(input: &str) -> String {
  input.chars().filter(|c| !matches!(*c as u32, 1..=31)).collect()
}

/// Make a string safe for interpolation into a SQL literal: control
/// characters are removed and single quotes are doubled.
pub fn sql_escape(input: &str) -> String { strip_control(input).replace('\'', "''") }

/// Canonicalize a phone number to `NNN-NNN-NNNN` from its last ten digits.
///
/// Returns `None` when fewer than ten digits are present.
pub fn canonical_phone(input: &str) -> Option<String> {
  let digits: Vec<char> = input.chars().filter(char::is_ascii_digit).collect();
  if digits.len() < 10 {
    return None;
  }
  let last: String = digits[digits.len() - 10..].iter().collect();
  Some(format!("{}-{}-{}", &last[0..3], &last[3..6], &last[6..10]))
}

/// E.164 form (`+1NNNNNNNNNN`) of a North American number, for SMS providers.
pub fn e164(input: &str) -> Option<String> {
  canonical_phone(input).map(|p| format!("+1{}", p.replace('-', "")))
}

/// Conservative email check applied before any address is used.
pub fn is_valid_email(input: &str) -> bool {
  input.len() <= 254 && EMAIL.as_ref().is_some_and(|re| re.is_match(input))
}

/// Trim, lowercase and validate an email address.
pub fn normalize_email(input: &str) -> Option<String> {
  let email = input.trim().to_lowercase();
  is_valid_email(&email).then_some(email)
}

/// Treat blank strings as absent.
pub fn non_empty(input: Option<&str>) -> Option<String> {
  input.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn phone_formats_converge() {
    for input in ["(828) 874-0679", "828-874-0679", "+18288740679"] {
      assert_eq!(canonical_phone(input).as_deref(), Some("828-874-0679"), "{input}");
    }
  }

  #[test]
  fn short_phone_is_rejected() {
    assert_eq!(canonical_phone("874-0679"), None);
    assert_eq!(canonical_phone(""), None);
  }

  #[test]
  fn e164_prefixes_country_code() {
    assert_eq!(e164("828.874.0679").as_deref(), Some("+18288740679"));
  }

  #[test]
  fn sql_escape_doubles_quotes_and_strips_controls() {
    assert_eq!(sql_escape("O'Brien\t\n"), "O''Brien");
    assert_eq!(sql_escape("plain"), "plain");
  }

  #[test]
  fn email_pattern_compiles() {
    assert!(EMAIL.is_some());
  }

  #[test]
  fn email_validation() {
    assert!(is_valid_email("j@d.com"));
    assert!(is_valid_email("first.last+tag@garden-center.co.uk"));
    assert!(!is_valid_email("no-at-sign.com"));
    assert!(!is_valid_email("a@b"));
    assert!(!is_valid_email("a b@c.com"));
    assert_eq!(normalize_email("  Jane@Example.COM ").as_deref(), Some("jane@example.com"));
  }
}
