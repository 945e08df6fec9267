use crate::deadlines::{audit_document, check_deadlines, DeadlineViolation};
use crate::errors::{AppError, AppResult};
use crate::fields::{FieldRegistry, REMARK_FIELD};
use crate::models::{scalar_text, ChangeEntry, Document, Record, RecordUpdate, ID_FIELD};
use crate::store::DocumentStore;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::{Mutex, MutexGuard};

pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
pub const MIN_REMARK_WORDS: usize = 10;

static REMARK_TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{2}\.[0-9]{2}\.[0-9]{4} [0-9]{2}:[0-9]{2}:[0-9]{2}$").expect("valid timestamp regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    pub record: Record,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub fingerprint: String,
    pub count: usize,
    pub rows: Vec<Value>,
}

/// Applies `patch` to a copy of `record`. The input record is never touched,
/// so a rejected patch needs no rollback.
pub fn attempt_patch(registry: &FieldRegistry, record: &Record, patch: &Mapping) -> AppResult<PatchOutcome> {
    let fields = patch
        .iter()
        .map(|(key, value)| field_name(key).map(|field| (field, value)))
        .collect::<AppResult<Vec<_>>>()?;

    if fields.iter().any(|(field, _)| field == ID_FIELD) {
        return Err(AppError::Forbidden(format!("field '{}' must not be changed", ID_FIELD)));
    }

    let mut next = record.clone();
    let mut changes = Vec::new();
    for (field, raw) in fields {
        let new_value = registry.normalize(&field, raw)?;
        let old_value = get_path(&next, &field).cloned().unwrap_or(Value::Null);
        if old_value == new_value {
            continue;
        }
        set_path(&mut next, &field, new_value.clone());
        changes.push(FieldChange {
            field,
            old_value,
            new_value,
        });
    }

    check_deadlines(&next)?;

    Ok(PatchOutcome { record: next, changes })
}

fn field_name(key: &Value) -> AppResult<String> {
    match key {
        Value::String(name) if !name.trim().is_empty() => Ok(name.clone()),
        _ => Err(AppError::Validation(format!(
            "patch keys must be field names, got {:?}",
            scalar_text(key).unwrap_or_default()
        ))),
    }
}

/// Dotted paths walk nested mappings; a plain name is a top-level field.
pub fn get_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = record.get(first)?;
    for part in parts {
        current = current.as_mapping()?.get(part)?;
    }
    Some(current)
}

/// Creates (or replaces non-mapping) intermediate containers as needed.
pub fn set_path(record: &mut Record, path: &str, value: Value) {
    let Some((head, rest)) = path.split_once('.') else {
        record.insert(Value::from(path), value);
        return;
    };
    let slot = record
        .entry(Value::from(head))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(child) = slot {
        set_path(child, rest, value);
    }
}

pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Serializes every load-mutate-persist cycle against one store.
pub struct Tracker<S: DocumentStore> {
    store: Mutex<S>,
    registry: FieldRegistry,
}

impl<S: DocumentStore> Tracker<S> {
    pub fn new(store: S) -> Self {
        Self::with_registry(store, FieldRegistry::new())
    }

    pub fn with_registry(store: S, registry: FieldRegistry) -> Self {
        Self {
            store: Mutex::new(store),
            registry,
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, S>> {
        self.store
            .lock()
            .map_err(|_| AppError::Internal("document store lock poisoned".to_string()))
    }

    pub fn summary(&self) -> AppResult<DocumentSummary> {
        let store = self.lock()?;
        let document = store.load()?;
        let rows = document.record_rows();
        Ok(DocumentSummary {
            fingerprint: store.fingerprint(),
            count: rows.len(),
            rows,
        })
    }

    pub fn fingerprint(&self) -> AppResult<String> {
        Ok(self.lock()?.fingerprint())
    }

    pub fn audit(&self) -> AppResult<Vec<DeadlineViolation>> {
        let document = self.lock()?.load()?;
        Ok(audit_document(&document))
    }

    pub fn update_record(&self, record_id: &str, patch: &Mapping) -> AppResult<RecordUpdate> {
        let mut store = self.lock()?;
        let mut document = store.load()?;
        let (index, current) = find_record(&document, record_id)?;

        let outcome = attempt_patch(&self.registry, &current, patch).inspect_err(|error| {
            tracing::warn!(record_id, error = %error, "record update rejected");
        })?;

        if outcome.changes.is_empty() {
            tracing::debug!(record_id, "patch produced no change");
            return Ok(RecordUpdate {
                record: outcome.record,
                changed: false,
            });
        }

        let timestamp = now_timestamp();
        document.records_mut()[index] = Value::Mapping(outcome.record.clone());
        for change in &outcome.changes {
            document.push_change(&ChangeEntry {
                timestamp: timestamp.clone(),
                record_id: record_id.to_string(),
                field: change.field.clone(),
                old_value: change.old_value.clone(),
                new_value: change.new_value.clone(),
                append: false,
            })?;
        }
        document.set_last_modified(&timestamp);
        let receipt = store.persist(&document)?;

        tracing::info!(
            record_id,
            fields = outcome.changes.len(),
            snapshot = %receipt.snapshot,
            "record updated"
        );
        Ok(RecordUpdate {
            record: outcome.record,
            changed: true,
        })
    }

    pub fn append_remark(
        &self,
        record_id: &str,
        field: &str,
        timestamp: &str,
        text: &str,
    ) -> AppResult<RecordUpdate> {
        if field != REMARK_FIELD {
            return Err(AppError::Forbidden(format!(
                "field '{}' is not permitted for append; only '{}' is",
                field, REMARK_FIELD
            )));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("remark text missing".to_string()));
        }
        let words = text.split_whitespace().count();
        if words < MIN_REMARK_WORDS {
            return Err(AppError::Validation(format!(
                "remark too short: {} words, at least {} required",
                words, MIN_REMARK_WORDS
            )));
        }
        let stamp = remark_timestamp(timestamp);
        let entry = format!("[{}] {}", stamp, text);

        let mut store = self.lock()?;
        let mut document = store.load()?;
        let (index, mut record) = find_record(&document, record_id)?;

        let previous = record
            .get(field)
            .map(remark_text)
            .transpose()?
            .unwrap_or_default()
            .trim_end()
            .to_string();
        let appended = if previous.is_empty() {
            entry
        } else {
            format!("{}\n{}", previous, entry)
        };
        record.insert(Value::from(field), Value::from(appended.clone()));

        let logged_at = now_timestamp();
        document.records_mut()[index] = Value::Mapping(record.clone());
        document.push_change(&ChangeEntry {
            timestamp: logged_at.clone(),
            record_id: record_id.to_string(),
            field: field.to_string(),
            old_value: Value::from(previous),
            new_value: Value::from(appended),
            append: true,
        })?;
        document.set_last_modified(&logged_at);
        let receipt = store.persist(&document)?;

        tracing::info!(record_id, field, snapshot = %receipt.snapshot, "remark appended");
        Ok(RecordUpdate { record, changed: true })
    }

    pub fn close(self) -> AppResult<S> {
        self.store
            .into_inner()
            .map_err(|_| AppError::Internal("document store lock poisoned".to_string()))
    }
}

fn find_record(document: &Document, record_id: &str) -> AppResult<(usize, Record)> {
    document
        .position_of(record_id)
        .and_then(|index| {
            document.records()[index]
                .as_mapping()
                .map(|record| (index, record.clone()))
        })
        .ok_or_else(|| AppError::NotFound(format!("record '{}' not found", record_id)))
}

/// Existing remark content as text; structured values are kept in their YAML form.
fn remark_text(value: &Value) -> AppResult<String> {
    match scalar_text(value) {
        Some(text) => Ok(text),
        None => serde_yaml::to_string(value).map_err(AppError::from),
    }
}

fn remark_timestamp(candidate: &str) -> String {
    let candidate = candidate.trim();
    if REMARK_TIMESTAMP_RE.is_match(candidate) {
        candidate.to_string()
    } else {
        now_timestamp()
    }
}
