//! Pure rendering of dataset rows into issue payloads.
//!
//! The title format doubles as the fallback reconciliation key, so it must
//! stay stable for the lifetime of a deployment.

use crate::event::{
    EventKind, FIELD_CODER, FIELD_CORRECTED_ENTRY_ID, FIELD_ENTRY_ACCEPTED, FIELD_IS_CORRECTION,
    FIELD_SUPERVISOR, FIELD_TIMESTAMP, InboundEvent,
};
use crate::model::{DatasetRecord, RenderedIssue};

/// Placeholder for blank dataset cells.
pub const MISSING: &str = "N/A";

/// Prefix of the structured label that identifies a paper's issue.
pub const PAPER_LABEL_PREFIX: &str = "paper_id=";

/// Structured identifying label for `paper_id`.
#[must_use]
pub fn paper_label(paper_id: &str) -> String {
    format!("{PAPER_LABEL_PREFIX}{paper_id}")
}

/// Extract the paper id from a structured identifying label.
#[must_use]
pub fn paper_id_from_label(label: &str) -> Option<&str> {
    label
        .strip_prefix(PAPER_LABEL_PREFIX)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Extract the paper id from a rendered title (first whitespace token).
#[must_use]
pub fn paper_id_from_title(title: &str) -> Option<&str> {
    title.split_whitespace().next()
}

/// Render the issue title: `"{paper_id} {coder} + {supervisor}"`.
#[must_use]
pub fn title(record: &DatasetRecord) -> String {
    format!(
        "{} {} + {}",
        record.paper_id,
        or_missing(record.coder.as_deref()),
        or_missing(record.supervisor.as_deref())
    )
}

/// Render labels: the identifying label, then the raw ids, deduplicated.
#[must_use]
pub fn labels(record: &DatasetRecord) -> Vec<String> {
    let candidates = [
        Some(paper_label(&record.paper_id)),
        Some(record.paper_id.clone()),
        record.coder_id.clone(),
        record.supervisor_id.clone(),
    ];

    let mut labels: Vec<String> = Vec::with_capacity(candidates.len());
    for label in candidates.into_iter().flatten() {
        if !label.trim().is_empty() && !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

/// Render the issue body from every record field.
#[must_use]
pub fn body(record: &DatasetRecord) -> String {
    format!(
        "<b>Paper:</b> {} ({})  \n\
         <b>Coder:</b> {} ({})  \n\
         <b>Supervisor:</b> {} ({})  \n\
         <b>Case ID:</b> {}\n",
        or_missing(record.paper.as_deref()),
        record.paper_id,
        or_missing(record.coder.as_deref()),
        or_missing(record.coder_id.as_deref()),
        or_missing(record.supervisor.as_deref()),
        or_missing(record.supervisor_id.as_deref()),
        or_missing(record.paper_coder.as_deref()),
    )
}

/// Render the full issue payload for a dataset row.
#[must_use]
pub fn render(record: &DatasetRecord) -> RenderedIssue {
    RenderedIssue {
        title: title(record),
        body: body(record),
        labels: labels(record),
    }
}

/// Render the comment appended for a validated event.
///
/// Check forms branch on `entry_accepted`, entry forms on `is_correction`.
#[must_use]
pub fn render_comment(kind: EventKind, event: &InboundEvent) -> String {
    let timestamp = event.text(FIELD_TIMESTAMP);
    let at = or_missing(timestamp.as_deref());
    let stage = kind.stage();

    if kind.is_check() {
        let supervisor = event.text(FIELD_SUPERVISOR);
        let verdict = if event.flag(FIELD_ENTRY_ACCEPTED) {
            "Accepted."
        } else {
            "Requires revision."
        };
        format!(
            "<b>Stage {stage} check</b> by {} at {at}  \n\
             <b>Verdict:</b> {verdict}\n",
            or_missing(supervisor.as_deref()),
        )
    } else {
        let coder = event.text(FIELD_CODER);
        let submission = if event.flag(FIELD_IS_CORRECTION) {
            let corrected = event.text(FIELD_CORRECTED_ENTRY_ID);
            format!("Correction of entry {}.", or_missing(corrected.as_deref()))
        } else {
            "New submission.".to_string()
        };
        format!(
            "<b>Stage {stage} entry</b> by {} at {at}  \n\
             {submission}\n",
            or_missing(coder.as_deref()),
        )
    }
}

pub(crate) fn or_missing(value: Option<&str>) -> &str {
    match value {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => MISSING,
    }
}
