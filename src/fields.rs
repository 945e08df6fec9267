use crate::errors::{AppError, AppResult};
use crate::models::{scalar_text, value_kind, Acceptance, Assignee, Status};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const IDENTIFIER_FIELD: &str = "nr_ht";
pub const STATUS_FIELD: &str = "status";
pub const ASSIGNEE_FIELD: &str = "zustaendigkeit";
pub const ACCEPTANCE_FIELD: &str = "acceptance.wisag_formal_acceptance";
pub const REMARK_FIELD: &str = "bearbeitungsstand";

pub const DISPLAY_DATE_FIELD: &str = "datum_anzeige";
pub const DEADLINE_FIELD: &str = "termin_mangelbeseitigung";
pub const FOLLOW_UP_2_FIELD: &str = "nachfrist_2";
pub const FOLLOW_UP_3_FIELD: &str = "nachfrist_3";
pub const COMPLETION_NOTIFIED_FIELD: &str = "termin_freimeldung";
pub const REMEDIATED_FIELD: &str = "mangel_abgestellt_am";
pub const CONFIRMED_FIELD: &str = "bestaetigung_am";

pub const DATE_FIELDS: [&str; 7] = [
    DISPLAY_DATE_FIELD,
    DEADLINE_FIELD,
    FOLLOW_UP_2_FIELD,
    FOLLOW_UP_3_FIELD,
    COMPLETION_NOTIFIED_FIELD,
    REMEDIATED_FIELD,
    CONFIRMED_FIELD,
];

/// Every field with a dedicated rule. A registry missing any of these is rejected.
pub const KNOWN_FIELDS: [&str; 12] = [
    IDENTIFIER_FIELD,
    STATUS_FIELD,
    ASSIGNEE_FIELD,
    ACCEPTANCE_FIELD,
    REMARK_FIELD,
    DISPLAY_DATE_FIELD,
    DEADLINE_FIELD,
    FOLLOW_UP_2_FIELD,
    FOLLOW_UP_3_FIELD,
    COMPLETION_NOTIFIED_FIELD,
    REMEDIATED_FIELD,
    CONFIRMED_FIELD,
];

pub const DATE_FORMAT: &str = "%d.%m.%Y";

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{4})-([0-9]{2})-([0-9]{2})$").expect("valid iso date regex"));
static DMY_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{1,2})\.([0-9]{1,2})\.([0-9]{4})$").expect("valid dmy date regex")
});
static IDENTIFIER_DIGITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]{1,3}").expect("valid identifier regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Identifier,
    Date,
    Status,
    Assignee,
    Acceptance,
    /// Stored exactly as submitted.
    Free,
}

#[derive(Debug, Clone)]
pub struct FieldRegistry {
    rules: BTreeMap<String, FieldRule>,
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldRegistry {
    pub fn new() -> Self {
        let mut rules = vec![
            (IDENTIFIER_FIELD, FieldRule::Identifier),
            (STATUS_FIELD, FieldRule::Status),
            (ASSIGNEE_FIELD, FieldRule::Assignee),
            (ACCEPTANCE_FIELD, FieldRule::Acceptance),
            (REMARK_FIELD, FieldRule::Free),
        ];
        rules.extend(DATE_FIELDS.iter().map(|field| (*field, FieldRule::Date)));
        Self::from_rules(rules).expect("built-in rules cover every known field")
    }

    pub fn from_rules<'a>(rules: impl IntoIterator<Item = (&'a str, FieldRule)>) -> AppResult<Self> {
        let rules: BTreeMap<String, FieldRule> = rules
            .into_iter()
            .map(|(field, rule)| (field.to_string(), rule))
            .collect();

        let missing: BTreeSet<&str> = KNOWN_FIELDS
            .iter()
            .copied()
            .filter(|field| !rules.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Internal(format!(
                "field registry has no rule for: {}",
                missing.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        Ok(Self { rules })
    }

    pub fn rule_for(&self, field: &str) -> FieldRule {
        self.rules.get(field).copied().unwrap_or(FieldRule::Free)
    }

    /// Normalized form of `raw` for `field`; `Value::Null` means unset.
    pub fn normalize(&self, field: &str, raw: &Value) -> AppResult<Value> {
        match self.rule_for(field) {
            FieldRule::Free => Ok(raw.clone()),
            FieldRule::Identifier => normalize_identifier(&text_of(field, raw)?),
            FieldRule::Date => normalize_date(field, &text_of(field, raw)?),
            FieldRule::Status => normalize_status(&text_of(field, raw)?),
            FieldRule::Assignee => normalize_assignee(&text_of(field, raw)?),
            FieldRule::Acceptance => normalize_acceptance(&text_of(field, raw)?),
        }
    }
}

fn text_of(field: &str, raw: &Value) -> AppResult<String> {
    scalar_text(raw).ok_or_else(|| {
        AppError::Validation(format!(
            "{} expects a text value, got a {}",
            field,
            value_kind(raw)
        ))
    })
}

fn normalize_identifier(text: &str) -> AppResult<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    let Some(digits) = IDENTIFIER_DIGITS_RE.find(trimmed) else {
        return Ok(Value::from(trimmed));
    };
    let number: u32 = digits
        .as_str()
        .parse()
        .map_err(|_| AppError::Internal(format!("unparsable digit run '{}'", digits.as_str())))?;
    Ok(Value::from(format!("MAZ {:03}", number)))
}

fn normalize_date(field: &str, text: &str) -> AppResult<Value> {
    match parse_date(text) {
        Ok(Some(date)) => Ok(Value::from(format_date(date))),
        Ok(None) => Ok(Value::Null),
        Err(_) => Err(AppError::Validation(format!(
            "invalid date for {}: '{}'",
            field,
            text.trim()
        ))),
    }
}

fn normalize_status(text: &str) -> AppResult<Value> {
    if text.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is a required field", STATUS_FIELD)));
    }
    let status = Status::parse(text).ok_or_else(|| {
        AppError::Validation(format!(
            "invalid status '{}'; allowed: {}",
            text,
            Status::ALL.map(Status::as_str).join(", ")
        ))
    })?;
    Ok(Value::from(status.as_str()))
}

fn normalize_assignee(text: &str) -> AppResult<Value> {
    if text.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is a required field", ASSIGNEE_FIELD)));
    }
    let assignee = Assignee::parse(text).ok_or_else(|| {
        AppError::Validation(format!(
            "invalid assignee '{}'; allowed: {}",
            text,
            Assignee::ALL.map(Assignee::as_str).join(", ")
        ))
    })?;
    Ok(Value::from(assignee.as_str()))
}

fn normalize_acceptance(text: &str) -> AppResult<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    let acceptance = Acceptance::parse(trimmed).ok_or_else(|| {
        AppError::Validation(format!(
            "invalid value '{}' for {}; allowed: accepted, open, na",
            trimmed, ACCEPTANCE_FIELD
        ))
    })?;
    Ok(Value::from(acceptance.as_str()))
}

/// Parses `YYYY-MM-DD` or `D.M.YYYY`. Blank text is `Ok(None)`.
pub fn parse_date(text: &str) -> AppResult<Option<NaiveDate>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let parsed = if let Some(caps) = ISO_DATE_RE.captures(trimmed) {
        calendar_date(&caps[1], &caps[2], &caps[3])
    } else if let Some(caps) = DMY_DATE_RE.captures(trimmed) {
        calendar_date(&caps[3], &caps[2], &caps[1])
    } else {
        None
    };
    parsed.map(Some).ok_or_else(|| invalid_date(trimmed))
}

fn calendar_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn invalid_date(text: &str) -> AppError {
    AppError::Validation(format!("invalid date '{}'", text))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(field: &str, raw: &str) -> AppResult<Value> {
        FieldRegistry::new().normalize(field, &Value::from(raw))
    }

    #[test]
    fn identifier_takes_first_digit_run() {
        assert_eq!(normalize(IDENTIFIER_FIELD, "maz 7").unwrap(), Value::from("MAZ 007"));
        assert_eq!(normalize(IDENTIFIER_FIELD, "MAZ-0042").unwrap(), Value::from("MAZ 004"));
        assert_eq!(normalize(IDENTIFIER_FIELD, " ohne Nummer ").unwrap(), Value::from("ohne Nummer"));
        assert_eq!(normalize(IDENTIFIER_FIELD, "   ").unwrap(), Value::Null);
        assert_eq!(
            FieldRegistry::new()
                .normalize(IDENTIFIER_FIELD, &Value::from(12))
                .unwrap(),
            Value::from("MAZ 012")
        );
    }

    #[test]
    fn dates_are_rendered_canonically() {
        assert_eq!(normalize(DEADLINE_FIELD, "2024-03-15").unwrap(), Value::from("15.03.2024"));
        assert_eq!(normalize(DEADLINE_FIELD, "1.3.2024").unwrap(), Value::from("01.03.2024"));
        assert_eq!(normalize(CONFIRMED_FIELD, "").unwrap(), Value::Null);
        assert_eq!(
            FieldRegistry::new().normalize(FOLLOW_UP_2_FIELD, &Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn malformed_dates_name_the_raw_input() {
        let error = normalize(DEADLINE_FIELD, "15/03/2024").expect_err("slash format rejected");
        assert!(matches!(error, AppError::Validation(_)));
        assert!(error.reason().contains("15/03/2024"));

        let error = normalize(DEADLINE_FIELD, "31.02.2024").expect_err("no such day");
        assert!(error.reason().contains("31.02.2024"));
    }

    #[test]
    fn status_must_be_in_allowed_set() {
        assert_eq!(normalize(STATUS_FIELD, "Freigemeldet").unwrap(), Value::from("Freigemeldet"));

        let error = normalize(STATUS_FIELD, "Unknown").expect_err("unknown status");
        assert!(error.reason().contains("Keyed, In Bearbeitung, Freigemeldet, Formal abgenommen"));

        let error = normalize(STATUS_FIELD, "  ").expect_err("blank status");
        assert!(error.reason().contains("required"));
    }

    #[test]
    fn assignee_must_be_in_allowed_set() {
        assert_eq!(normalize(ASSIGNEE_FIELD, "Köster").unwrap(), Value::from("Köster"));
        let error = normalize(ASSIGNEE_FIELD, "Acme").expect_err("unknown assignee");
        assert!(error.reason().contains("HOCHTIEF"));
        assert!(normalize(ASSIGNEE_FIELD, "").is_err());
    }

    #[test]
    fn acceptance_is_case_insensitive() {
        assert_eq!(normalize(ACCEPTANCE_FIELD, " Accepted ").unwrap(), Value::from("accepted"));
        assert_eq!(normalize(ACCEPTANCE_FIELD, "NA").unwrap(), Value::from("na"));
        assert_eq!(normalize(ACCEPTANCE_FIELD, "").unwrap(), Value::Null);
        assert!(normalize(ACCEPTANCE_FIELD, "maybe").is_err());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let raw = Value::from("  anything goes  ");
        assert_eq!(FieldRegistry::new().normalize("beschreibung", &raw).unwrap(), raw);
    }

    #[test]
    fn structured_values_are_rejected_for_text_rules() {
        let raw: Value = serde_yaml::from_str("[1, 2]").unwrap();
        let error = FieldRegistry::new().normalize(STATUS_FIELD, &raw).expect_err("sequence");
        assert!(error.reason().contains("sequence"));
    }

    #[test]
    fn incomplete_registry_is_rejected() {
        let error = FieldRegistry::from_rules([(STATUS_FIELD, FieldRule::Status)])
            .expect_err("missing rules");
        assert!(matches!(error, AppError::Internal(_)));
        assert!(error.reason().contains(DEADLINE_FIELD));
    }
}
