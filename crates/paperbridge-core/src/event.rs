//! Inbound webhook events.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

pub const FIELD_CODER: &str = "coder";
pub const FIELD_SUPERVISOR: &str = "supervisor";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_IS_CORRECTION: &str = "is_correction";
pub const FIELD_ENTRY_ACCEPTED: &str = "entry_accepted";
pub const FIELD_CORRECTED_ENTRY_ID: &str = "corrected_entry_id";

/// A form submission relayed to a paper's issue.
///
/// The kind arrives as `kind` or `form_id`; a non-blank `kind` wins when
/// both are sent. Kind-specific fields are kept as raw JSON and read
/// through [`InboundEvent::text`] and [`InboundEvent::flag`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "WireEvent")]
pub struct InboundEvent {
    pub kind: String,
    pub paper_id: String,
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    form_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    paper_id: String,
    #[serde(flatten)]
    fields: Map<String, JsonValue>,
}

impl From<WireEvent> for InboundEvent {
    fn from(wire: WireEvent) -> Self {
        let kind = wire
            .kind
            .filter(|kind| !kind.trim().is_empty())
            .or(wire.form_id)
            .unwrap_or_default();
        Self {
            kind,
            paper_id: wire.paper_id,
            fields: wire.fields,
        }
    }
}

impl InboundEvent {
    #[must_use]
    pub fn new(kind: impl Into<String>, paper_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            paper_id: paper_id.into(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Field rendered as text; strings are trimmed, blanks are `None`.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            JsonValue::String(raw) => {
                Some(raw.trim().to_string()).filter(|raw| !raw.is_empty())
            }
            JsonValue::Number(number) => Some(number.to_string()),
            JsonValue::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    /// Field read as a yes/no flag. See [`parse_flag`].
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(parse_flag)
    }
}

/// `1`, `true` and `yes` (as string, number or bool) are true; everything
/// else, including absence, is false.
#[must_use]
pub fn parse_flag(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => {
            number.as_i64() == Some(1)
                || number.as_f64().is_some_and(|n| (n - 1.0).abs() < f64::EPSILON)
        }
        JsonValue::String(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        ),
        _ => false,
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(raw) => Ok(raw.trim().to_string()),
        JsonValue::Number(number) => Ok(number.to_string()),
        JsonValue::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "paper_id must be a string or number, got {other}"
        ))),
    }
}

/// The closed set of form kinds the router accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IdealStage1Entry,
    IdealStage1Check,
    IdealStage2Entry,
    IdealStage2Check,
}

impl EventKind {
    pub const ALL: [Self; 4] = [
        Self::IdealStage1Entry,
        Self::IdealStage1Check,
        Self::IdealStage2Entry,
        Self::IdealStage2Check,
    ];

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdealStage1Entry => "ideal_stage_1_entry",
            Self::IdealStage1Check => "ideal_stage_1_check",
            Self::IdealStage2Entry => "ideal_stage_2_entry",
            Self::IdealStage2Check => "ideal_stage_2_check",
        }
    }

    #[must_use]
    pub const fn stage(self) -> u8 {
        match self {
            Self::IdealStage1Entry | Self::IdealStage1Check => 1,
            Self::IdealStage2Entry | Self::IdealStage2Check => 2,
        }
    }

    #[must_use]
    pub const fn is_check(self) -> bool {
        matches!(self, Self::IdealStage1Check | Self::IdealStage2Check)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn form_id_is_an_alias_for_kind() {
        let event: InboundEvent = serde_json::from_value(json!({
            "form_id": "ideal_stage_1_check",
            "paper_id": " P1 ",
            "entry_accepted": "1"
        }))
        .expect("decodes");
        assert_eq!(event.kind, "ideal_stage_1_check");
        assert_eq!(event.paper_id, "P1");
        assert!(event.flag(FIELD_ENTRY_ACCEPTED));
    }

    #[test]
    fn kind_wins_when_both_keys_are_sent() {
        let event: InboundEvent = serde_json::from_value(json!({
            "kind": "ideal_stage_2_entry",
            "form_id": "ideal_stage_1_check",
            "paper_id": "P1"
        }))
        .expect("both keys decode");
        assert_eq!(event.kind, "ideal_stage_2_entry");
        assert!(!event.fields.contains_key("form_id"));

        let blank_kind: InboundEvent = serde_json::from_value(json!({
            "kind": " ",
            "form_id": "ideal_stage_1_check",
            "paper_id": "P1"
        }))
        .expect("decodes");
        assert_eq!(blank_kind.kind, "ideal_stage_1_check");
    }

    #[test]
    fn numeric_paper_id_is_accepted() {
        let event: InboundEvent =
            serde_json::from_value(json!({"kind": "x", "paper_id": 42})).expect("decodes");
        assert_eq!(event.paper_id, "42");
    }

    #[test]
    fn missing_kind_and_paper_id_default_to_blank() {
        let event: InboundEvent = serde_json::from_value(json!({})).expect("decodes");
        assert!(event.kind.is_empty());
        assert!(event.paper_id.is_empty());
    }

    #[test]
    fn structured_paper_id_is_rejected() {
        let result: Result<InboundEvent, _> =
            serde_json::from_value(json!({"kind": "x", "paper_id": ["P1"]}));
        assert!(result.is_err());
    }

    #[test]
    fn flag_forms() {
        let truthy = [
            json!(true),
            json!(1),
            json!("1"),
            json!("true"),
            json!(" YES "),
            json!(1.0),
        ];
        for truthy in truthy {
            assert!(parse_flag(&truthy), "{truthy} should be true");
        }
        let falsy = [
            json!(false),
            json!(0),
            json!(2),
            json!("0"),
            json!("no"),
            json!("accepted"),
            json!(null),
            json!([1]),
        ];
        for falsy in falsy {
            assert!(!parse_flag(&falsy), "{falsy} should be false");
        }
    }

    #[test]
    fn kinds_parse_only_the_closed_set() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("bogus"), None);
        assert_eq!(EventKind::parse("IDEAL_STAGE_1_ENTRY"), None);
        assert_eq!(EventKind::IdealStage2Check.stage(), 2);
        assert!(EventKind::IdealStage1Check.is_check());
        assert!(!EventKind::IdealStage2Entry.is_check());
    }

    #[test]
    fn text_reads_scalars() {
        let event = InboundEvent::new("k", "P1")
            .with_field(FIELD_CODER, " Ada ")
            .with_field(FIELD_CORRECTED_ENTRY_ID, 17)
            .with_field(FIELD_TIMESTAMP, "  ");
        assert_eq!(event.text(FIELD_CODER).as_deref(), Some("Ada"));
        assert_eq!(event.text(FIELD_CORRECTED_ENTRY_ID).as_deref(), Some("17"));
        assert_eq!(event.text(FIELD_TIMESTAMP), None);
        assert_eq!(event.text("absent"), None);
    }
}
