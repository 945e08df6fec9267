use crate::errors::{AppError, AppResult};
use crate::fields::{
    parse_date, COMPLETION_NOTIFIED_FIELD, DEADLINE_FIELD, FOLLOW_UP_2_FIELD, FOLLOW_UP_3_FIELD,
};
use crate::models::{scalar_text, Document, Record, ID_FIELD};
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Deadlines {
    deadline: Option<NaiveDate>,
    follow_up_2: Option<NaiveDate>,
    follow_up_3: Option<NaiveDate>,
    completion_notified: Option<NaiveDate>,
}

impl Deadlines {
    fn from_record(record: &Record) -> AppResult<Self> {
        Ok(Self {
            deadline: stored_date(record, DEADLINE_FIELD)?,
            follow_up_2: stored_date(record, FOLLOW_UP_2_FIELD)?,
            follow_up_3: stored_date(record, FOLLOW_UP_3_FIELD)?,
            completion_notified: stored_date(record, COMPLETION_NOTIFIED_FIELD)?,
        })
    }

    fn latest_deadline(&self) -> Option<NaiveDate> {
        [self.deadline, self.follow_up_2, self.follow_up_3]
            .into_iter()
            .flatten()
            .max()
    }
}

/// Unset (absent, null, blank) is `None`; anything else must be a valid date.
fn stored_date(record: &Record, field: &str) -> AppResult<Option<NaiveDate>> {
    let Some(value) = record.get(field) else {
        return Ok(None);
    };
    let text = scalar_text(value).ok_or_else(|| {
        AppError::Validation(format!("{} holds a non-date value", field))
    })?;
    parse_date(&text).map_err(|_| {
        AppError::Validation(format!("{} holds an invalid date: '{}'", field, text.trim()))
    })
}

/// Runs every ordering rule against the full record state.
pub fn check_deadlines(record: &Record) -> AppResult<()> {
    let dates = Deadlines::from_record(record)?;

    if let Some(follow_up_2) = dates.follow_up_2 {
        let Some(deadline) = dates.deadline else {
            return Err(consistency(format!(
                "{} requires {} to be set first",
                FOLLOW_UP_2_FIELD, DEADLINE_FIELD
            )));
        };
        if follow_up_2 <= deadline {
            return Err(consistency(format!(
                "{} must be after {}",
                FOLLOW_UP_2_FIELD, DEADLINE_FIELD
            )));
        }
    }

    if let Some(follow_up_3) = dates.follow_up_3 {
        let Some(deadline) = dates.deadline else {
            return Err(consistency(format!(
                "{} requires {} to be set first",
                FOLLOW_UP_3_FIELD, DEADLINE_FIELD
            )));
        };
        match dates.follow_up_2 {
            Some(follow_up_2) if follow_up_3 <= follow_up_2 => {
                return Err(consistency(format!(
                    "{} must be after {}",
                    FOLLOW_UP_3_FIELD, FOLLOW_UP_2_FIELD
                )));
            }
            None if follow_up_3 <= deadline => {
                return Err(consistency(format!(
                    "{} must be after {}",
                    FOLLOW_UP_3_FIELD, DEADLINE_FIELD
                )));
            }
            _ => {}
        }
    }

    if let Some(completion_notified) = dates.completion_notified {
        let Some(latest) = dates.latest_deadline() else {
            return Err(consistency(format!(
                "{} needs at least one deadline",
                COMPLETION_NOTIFIED_FIELD
            )));
        };
        if completion_notified <= latest {
            return Err(consistency(format!(
                "{} must be after the latest deadline",
                COMPLETION_NOTIFIED_FIELD
            )));
        }
    }

    Ok(())
}

fn consistency(reason: String) -> AppError {
    AppError::Consistency(reason)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadlineViolation {
    pub record_id: String,
    pub code: &'static str,
    pub reason: String,
}

/// Checks every record in the document; records that are not mappings are skipped.
pub fn audit_document(document: &Document) -> Vec<DeadlineViolation> {
    document
        .records()
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let Some(record) = entry.as_mapping() else {
                tracing::warn!(index, "skipping record that is not a mapping");
                return None;
            };
            let error = check_deadlines(record).err()?;
            let record_id = record
                .get(ID_FIELD)
                .and_then(scalar_text)
                .unwrap_or_else(|| format!("#{}", index));
            Some(DeadlineViolation {
                record_id,
                code: error.code(),
                reason: error.reason().to_string(),
            })
        })
        .collect()
}
