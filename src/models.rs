use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use serde_yaml::{Mapping, Sequence, Value};

pub const RECORDS_KEY: &str = "defects";
pub const CHANGE_LOG_KEY: &str = "change_log";
pub const META_KEY: &str = "meta";
pub const LAST_MODIFIED_KEY: &str = "last_modified";
pub const ID_FIELD: &str = "id";

/// One tracked defect. Field order is the order the YAML file was authored in.
pub type Record = Mapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Keyed,
    InBearbeitung,
    Freigemeldet,
    FormalAbgenommen,
}

impl Status {
    pub const ALL: [Self; 4] = [
        Self::Keyed,
        Self::InBearbeitung,
        Self::Freigemeldet,
        Self::FormalAbgenommen,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyed => "Keyed",
            Self::InBearbeitung => "In Bearbeitung",
            Self::Freigemeldet => "Freigemeldet",
            Self::FormalAbgenommen => "Formal abgenommen",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assignee {
    Hochtief,
    Apleona,
    Wisag,
    Pwrd,
    Koester,
    Andere,
}

impl Assignee {
    pub const ALL: [Self; 6] = [
        Self::Hochtief,
        Self::Apleona,
        Self::Wisag,
        Self::Pwrd,
        Self::Koester,
        Self::Andere,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hochtief => "HOCHTIEF",
            Self::Apleona => "Apleona",
            Self::Wisag => "WISAG",
            Self::Pwrd => "pwrd",
            Self::Koester => "Köster",
            Self::Andere => "Andere",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|assignee| assignee.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    Open,
    NotApplicable,
}

impl Acceptance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Open => "open",
            Self::NotApplicable => "na",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "accepted" => Some(Self::Accepted),
            "open" => Some(Self::Open),
            "na" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

/// Audit entry for one field change. On-disk keys match the Tacheles file layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    #[serde(rename = "ts")]
    pub timestamp: String,
    #[serde(rename = "id")]
    pub record_id: String,
    pub field: String,
    #[serde(rename = "old")]
    pub old_value: Value,
    #[serde(rename = "new")]
    pub new_value: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub append: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The whole persisted state: records, change log, meta, plus any other
/// top-level keys the file carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Mapping,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self::from_value(Value::Null)
    }

    /// Coerces the three required sections into shape without disturbing
    /// the position of sections that are already valid.
    pub fn from_value(value: Value) -> Self {
        let mut root = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            other => {
                tracing::warn!(kind = value_kind(&other), "document root is not a mapping; starting empty");
                Mapping::new()
            }
        };

        for (key, is_valid, default) in [
            (RECORDS_KEY, Value::is_sequence as fn(&Value) -> bool, Value::Sequence(Sequence::new())),
            (CHANGE_LOG_KEY, Value::is_sequence, Value::Sequence(Sequence::new())),
            (META_KEY, Value::is_mapping, Value::Mapping(Mapping::new())),
        ] {
            let valid = root.get(key).map(is_valid).unwrap_or(false);
            if !valid {
                if root.contains_key(key) {
                    tracing::warn!(section = key, "document section has the wrong shape; resetting");
                }
                root.insert(Value::from(key), default);
            }
        }

        Self { root }
    }

    pub fn parse(text: &str) -> AppResult<Self> {
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(text)?
        };
        Ok(Self::from_value(value))
    }

    pub fn to_yaml(&self) -> AppResult<String> {
        serde_yaml::to_string(&self.root).map_err(AppError::from)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.root
    }

    pub fn records(&self) -> &Sequence {
        self.root
            .get(RECORDS_KEY)
            .and_then(Value::as_sequence)
            .expect("records section is normalized on construction")
    }

    pub fn records_mut(&mut self) -> &mut Sequence {
        self.root
            .get_mut(RECORDS_KEY)
            .and_then(Value::as_sequence_mut)
            .expect("records section is normalized on construction")
    }

    pub fn change_log(&self) -> &Sequence {
        self.root
            .get(CHANGE_LOG_KEY)
            .and_then(Value::as_sequence)
            .expect("change log section is normalized on construction")
    }

    pub fn meta(&self) -> &Mapping {
        self.root
            .get(META_KEY)
            .and_then(Value::as_mapping)
            .expect("meta section is normalized on construction")
    }

    fn meta_mut(&mut self) -> &mut Mapping {
        self.root
            .get_mut(META_KEY)
            .and_then(Value::as_mapping_mut)
            .expect("meta section is normalized on construction")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.meta().get(LAST_MODIFIED_KEY).and_then(Value::as_str)
    }

    pub fn set_last_modified(&mut self, timestamp: &str) {
        self.meta_mut()
            .insert(Value::from(LAST_MODIFIED_KEY), Value::from(timestamp));
    }

    pub fn push_change(&mut self, entry: &ChangeEntry) -> AppResult<()> {
        let value = serde_yaml::to_value(entry)?;
        self.root
            .get_mut(CHANGE_LOG_KEY)
            .and_then(Value::as_sequence_mut)
            .expect("change log section is normalized on construction")
            .push(value);
        Ok(())
    }

    /// Position of the record whose `id` renders as `record_id`.
    pub fn position_of(&self, record_id: &str) -> Option<usize> {
        self.records().iter().position(|entry| {
            entry
                .as_mapping()
                .and_then(|record| record.get(ID_FIELD))
                .map(|id| scalar_text(id).as_deref() == Some(record_id))
                .unwrap_or(false)
        })
    }

    pub fn find_record(&self, record_id: &str) -> Option<&Record> {
        self.position_of(record_id)
            .and_then(|index| self.records()[index].as_mapping())
    }

    pub fn record_rows(&self) -> Vec<Value> {
        self.records().clone()
    }
}

/// Textual form of a scalar YAML value; `None` for sequences, mappings and tags.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

/// JSON form of a stored value. Mapping keys that are not strings are
/// rendered as text, so `~: x` becomes `"null": "x"`.
pub fn json_value(value: &Value) -> AppResult<JsonValue> {
    match value {
        Value::Sequence(items) => items
            .iter()
            .map(json_value)
            .collect::<AppResult<Vec<_>>>()
            .map(JsonValue::Array),
        Value::Mapping(mapping) => json_object(mapping).map(JsonValue::Object),
        Value::Tagged(tagged) => json_value(&tagged.value),
        scalar => Ok(serde_json::to_value(scalar)?),
    }
}

pub fn json_object(mapping: &Mapping) -> AppResult<JsonMap<String, JsonValue>> {
    mapping
        .iter()
        .map(|(key, value)| -> AppResult<(String, JsonValue)> {
            Ok((key_text(key)?, json_value(value)?))
        })
        .collect()
}

fn key_text(key: &Value) -> AppResult<String> {
    match key {
        Value::Null => Ok("null".to_string()),
        Value::Tagged(tagged) => key_text(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => Ok(serde_json::to_string(&json_value(key)?)?),
        scalar => Ok(scalar_text(scalar).unwrap_or_default()),
    }
}

pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub record: Record,
    pub changed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRecordRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub patch: Value,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppendRemarkRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub ok: bool,
    pub fingerprint: String,
    pub count: usize,
    pub rows: Vec<JsonValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowResponse {
    pub ok: bool,
    pub fingerprint: String,
    pub row: JsonMap<String, JsonValue>,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub code: &'static str,
    pub error: String,
}
