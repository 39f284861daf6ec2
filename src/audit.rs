//! Audit - append-only create/update history for templates and their instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use uuid::Uuid;

use crate::reconcile::{ImportReport, InstanceChange, TemplateInstance};
use crate::templates::{Template, TemplateId, TemplateRevision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    TemplateAdd,
    TemplateUpdate,
    InstanceAdd,
    InstanceUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub template_id: TemplateId,
    pub event: AuditEvent,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub before: Option<Template>,
    pub after: Template,
}

impl AuditEntry {
    pub fn added(template: &Template, author: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: template.id.clone(),
            event: AuditEvent::TemplateAdd,
            author: author.to_string(),
            created_at: Utc::now(),
            before: None,
            after: template.clone(),
        }
    }

    pub fn updated(revision: &TemplateRevision, author: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: revision.after.id.clone(),
            event: AuditEvent::TemplateUpdate,
            author: author.to_string(),
            created_at: Utc::now(),
            before: Some(revision.before.clone()),
            after: revision.after.clone(),
        }
    }
}

/// Audit of one template instance, written alongside each import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAuditEntry {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub workflow: String,
    pub event: AuditEvent,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub before: Option<TemplateInstance>,
    pub after: TemplateInstance,
}

impl InstanceAuditEntry {
    pub fn from_report(report: &ImportReport, author: &str) -> Self {
        let event = match report.change {
            InstanceChange::Created => AuditEvent::InstanceAdd,
            InstanceChange::Updated => AuditEvent::InstanceUpdate,
        };
        Self {
            id: Uuid::new_v4(),
            instance_id: report.instance.id,
            workflow: report.workflow.clone(),
            event,
            author: author.to_string(),
            created_at: report.instance.updated_at,
            before: report.previous.clone(),
            after: report.instance.clone(),
        }
    }
}

/// Append-only log. Entries stay in insertion (creation) order.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    instance_entries: Vec<InstanceAuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn spans(&self) -> HashMap<TemplateId, AuditSpan<'_>> {
        aggregate_audits(&self.entries)
    }

    pub fn record_import(&mut self, report: &ImportReport, author: &str) {
        self.instance_entries.push(InstanceAuditEntry::from_report(report, author));
    }

    pub fn instance_entries(&self) -> &[InstanceAuditEntry] {
        &self.instance_entries
    }

    pub fn instance_spans(&self) -> HashMap<Uuid, AuditSpan<'_, InstanceAuditEntry>> {
        aggregate_instance_audits(&self.instance_entries)
    }
}

/// First and last audit of one owner.
#[derive(Debug, PartialEq, Eq)]
pub struct AuditSpan<'a, E = AuditEntry> {
    pub first: &'a E,
    pub last: &'a E,
}

impl<E> Clone for AuditSpan<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for AuditSpan<'_, E> {}

/// Groups items by owner, keeping the first and last item of each group.
///
/// `items` must already be sorted by creation time; first/last are
/// positional and no reordering happens here.
pub fn group_first_last<'a, T, K, F>(items: &'a [T], owner: F) -> HashMap<K, (&'a T, &'a T)>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut groups: HashMap<K, (&'a T, &'a T)> = HashMap::new();
    for item in items {
        groups
            .entry(owner(item))
            .and_modify(|span| span.1 = item)
            .or_insert((item, item));
    }
    groups
}

/// Precondition: `entries` sorted by `created_at`, oldest first.
pub fn aggregate_audits(entries: &[AuditEntry]) -> HashMap<TemplateId, AuditSpan<'_>> {
    debug_assert!(
        entries.windows(2).all(|w| w[0].created_at <= w[1].created_at),
        "audit entries must be sorted by creation time"
    );
    group_first_last(entries, |e| e.template_id.clone())
        .into_iter()
        .map(|(id, (first, last))| (id, AuditSpan { first, last }))
        .collect()
}

/// Precondition: `entries` sorted by `created_at`, oldest first.
pub fn aggregate_instance_audits(
    entries: &[InstanceAuditEntry],
) -> HashMap<Uuid, AuditSpan<'_, InstanceAuditEntry>> {
    debug_assert!(
        entries.windows(2).all(|w| w[0].created_at <= w[1].created_at),
        "audit entries must be sorted by creation time"
    );
    group_first_last(entries, |e| e.instance_id)
        .into_iter()
        .map(|(id, (first, last))| (id, AuditSpan { first, last }))
        .collect()
}
