//! # proxy-normalize
//!
//! Pure value-normalization functions used by the policy engine's
//! `autocorrect` action. Each normalizer tries to recognize one kind of
//! literal (date, phone number, email, ...) and, on success, returns a
//! canonical rendering plus a short human-readable hint.
//!
//! [`suggest`] runs the fixed pipeline and returns the first normalizer that
//! recognizes the input. Order matters: a value that both looks like a date
//! and (coincidentally) parses as a decimal is reported as a date, because
//! `normalize_date` runs first.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

/// The kind of literal a normalizer recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Kind {
    /// `YYYY-MM-DD`.
    Date,
    /// `YYYY-MM-DDTHH:MM:SS`.
    DateTime,
    /// Swedish phone number in `+46…` form.
    PhoneSe,
    /// 5-digit postal code.
    Postal,
    /// Email address.
    Email,
    /// Decimal number with `.` separator.
    Decimal,
    /// Canonical lowercase UUID.
    Uuid,
    /// ISO 3166-1 alpha-2 country code.
    CountryIso,
    /// Swedish organisation number.
    OrgnrSe,
}

impl Kind {
    /// Short operator-facing hint describing the expected canonical form.
    #[must_use]
    pub fn hint(self) -> &'static str {
        match self {
            Kind::Date => "Use ISO dates (YYYY-MM-DD)",
            Kind::DateTime => "Use ISO 8601 (YYYY-MM-DDTHH:MM:SS)",
            Kind::PhoneSe => "Include country code (e.g., +46)",
            Kind::Postal => "Use 5 digits without spaces",
            Kind::Email => "Provide a valid email (local@domain)",
            Kind::Decimal => "Use dot as decimal separator (e.g., 1234.56)",
            Kind::Uuid => "Use canonical UUID (8-4-4-4-12, lowercase)",
            Kind::CountryIso => "Use ISO 3166-1 alpha-2 (e.g., SE)",
            Kind::OrgnrSe => "Use normalized organisation number format",
        }
    }
}

/// The result of a successful normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Which normalizer matched.
    pub kind: Kind,
    /// The canonical rendering of the input.
    pub normalized: String,
    /// A short hint suitable for a decision-log record.
    pub hint: &'static str,
}

/// Run the fixed normalizer pipeline, returning the first match.
///
/// Order: date, datetime, phone (SE), postal, email, decimal, uuid,
/// country code, organisation number (SE).
#[must_use]
pub fn suggest(value: &str) -> Option<Suggestion> {
    normalize_date(value)
        .or_else(|| normalize_datetime(value))
        .or_else(|| normalize_phone_se(value))
        .or_else(|| normalize_postal(value))
        .or_else(|| normalize_email(value))
        .or_else(|| normalize_decimal(value))
        .or_else(|| normalize_uuid(value))
        .or_else(|| normalize_country_iso(value))
        .or_else(|| normalize_orgnr_se(value))
        .map(|(normalized, kind)| Suggestion {
            kind,
            hint: kind.hint(),
            normalized,
        })
}

static DATE_DMY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})$").unwrap());
static DATE_ISO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap());

/// Recognize `D/M/Y`, `M/D/Y` (day-first) or `YYYY-MM-DD` and return ISO form.
#[must_use]
pub fn normalize_date(value: &str) -> Option<(String, Kind)> {
    let v = value.trim();
    if let Some(caps) = DATE_DMY_RE.captures(v) {
        let d = &caps[1];
        let m = &caps[2];
        let y = &caps[3];
        let y = if y.len() == 4 {
            y.to_string()
        } else {
            format!("20{y}")
        };
        return Some((format!("{y}-{m:0>2}-{d:0>2}"), Kind::Date));
    }
    if DATE_ISO_RE.is_match(v) {
        return Some((v.to_string(), Kind::Date));
    }
    None
}

/// Recognize a handful of common datetime layouts and return ISO 8601.
#[must_use]
pub fn normalize_datetime(value: &str) -> Option<(String, Kind)> {
    let v = value.trim().replace('/', "-");
    let mut v = v;

    // Zero-pad a single-digit month/day before matching, e.g. "2024-8-5 7:03".
    if let Some((date_part, rest)) = v.split_once(' ') {
        if let [y, m, d] = date_part.splitn(3, '-').collect::<Vec<_>>()[..] {
            if m.len() == 1 || d.len() == 1 {
                v = format!("{y}-{m:0>2}-{d:0>2} {rest}");
            }
        }
    } else if let [y, m, d] = v.splitn(3, '-').collect::<Vec<_>>()[..] {
        if m.len() == 1 || d.len() == 1 {
            v = format!("{y}-{m:0>2}-{d:0>2}");
        }
    }

    parse_datetime_candidates(&v).map(|s| (s, Kind::DateTime))
}

fn parse_datetime_candidates(v: &str) -> Option<String> {
    // "%Y-%m-%dT%H:%M:%S[.%f]" / "%Y-%m-%d %H:%M:%S[.%f]" / "...%H:%M" / "%d-%m-%Y %H:%M[:%S]"
    let (date_part, time_part, sep) = if let Some((d, t)) = v.split_once('T') {
        (d, t, 'T')
    } else if let Some((d, t)) = v.split_once(' ') {
        (d, t, ' ')
    } else {
        return None;
    };
    let _ = sep;

    let time_part = time_part.split('.').next().unwrap_or(time_part);
    let time_fields: Vec<&str> = time_part.split(':').collect();
    let (hh, mm, ss) = match time_fields.as_slice() {
        [h, m] => (*h, *m, "00"),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };

    let date_fields: Vec<&str> = date_part.split('-').collect();
    let (year, month, day) = if date_fields.len() == 3 && date_fields[0].len() == 4 {
        (date_fields[0], date_fields[1], date_fields[2])
    } else if date_fields.len() == 3 {
        // "%d-%m-%Y"
        (date_fields[2], date_fields[1], date_fields[0])
    } else {
        return None;
    };

    let y: i32 = year.parse().ok()?;
    let mo: u32 = month.parse().ok()?;
    let d: u32 = day.parse().ok()?;
    let h: u32 = hh.parse().ok()?;
    let mi: u32 = mm.parse().ok()?;
    let s: u32 = ss.parse().ok()?;
    if !(1..=12).contains(&mo) || !(1..=31).contains(&d) || h > 23 || mi > 59 || s > 59 {
        return None;
    }

    Some(format!(
        "{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}"
    ))
}

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Recognize a Swedish phone number in national or international form.
#[must_use]
pub fn normalize_phone_se(value: &str) -> Option<(String, Kind)> {
    let mut v = WHITESPACE_RE.replace_all(value, "").to_string();
    v = v.replace("(0)", "");
    if let Some(rest) = v.strip_prefix("00") {
        v = format!("+{rest}");
    }
    if let Some(rest) = v.strip_prefix('0') {
        v = format!("+46{rest}");
    }
    if v.starts_with("+46") {
        return Some((v, Kind::PhoneSe));
    }
    None
}

/// Recognize a 5-digit postal code, tolerating interior whitespace.
#[must_use]
pub fn normalize_postal(value: &str) -> Option<(String, Kind)> {
    let v = WHITESPACE_RE.replace_all(value, "").to_string();
    if v.len() == 5 && v.bytes().all(|b| b.is_ascii_digit()) {
        return Some((v, Kind::Postal));
    }
    None
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Recognize `local@domain.tld`, returning the lower-cased form.
#[must_use]
pub fn normalize_email(value: &str) -> Option<(String, Kind)> {
    let v = value.trim();
    if EMAIL_RE.is_match(v) {
        return Some((v.to_lowercase(), Kind::Email));
    }
    None
}

/// Recognize a decimal number, accepting a comma as the separator.
#[must_use]
pub fn normalize_decimal(value: &str) -> Option<(String, Kind)> {
    let mut v = value.trim().replace(' ', "").replace('_', "");
    if v.contains(',') && !v.contains('.') {
        v = v.replace(',', ".");
    }
    let d = Decimal::from_str(&v).ok()?;
    Some((d.normalize().to_string(), Kind::Decimal))
}

/// Recognize a UUID in any bracketed/unbracketed form; returns canonical form.
#[must_use]
pub fn normalize_uuid(value: &str) -> Option<(String, Kind)> {
    let v = value
        .trim()
        .to_lowercase()
        .trim_matches(|c| c == '{' || c == '}' || c == '(' || c == ')' || c == ' ')
        .to_string();
    let u = uuid::Uuid::parse_str(&v).ok()?;
    Some((u.to_string(), Kind::Uuid))
}

/// Recognize a 2-letter ISO code or a handful of common country names.
#[must_use]
pub fn normalize_country_iso(value: &str) -> Option<(String, Kind)> {
    let v = value.trim();
    if v.len() == 2 && v.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some((v.to_uppercase(), Kind::CountryIso));
    }
    let code = match v.to_lowercase().as_str() {
        "sweden" | "sverige" => "SE",
        "united states" | "usa" | "us" => "US",
        "united kingdom" | "uk" | "england" => "GB",
        "germany" | "deutschland" => "DE",
        "norway" | "norge" => "NO",
        "denmark" | "danmark" => "DK",
        "finland" | "suomi" => "FI",
        _ => return None,
    };
    Some((code.to_string(), Kind::CountryIso))
}

/// Recognize a Swedish organisation number, trimming a 16-century prefix.
#[must_use]
pub fn normalize_orgnr_se(value: &str) -> Option<(String, Kind)> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        return Some((digits, Kind::OrgnrSe));
    }
    if digits.len() == 12 && digits.starts_with("16") {
        return Some((digits[2..].to_string(), Kind::OrgnrSe));
    }
    None
}
