//! Persistence Seam - transactional artifact store
//!
//! A transaction stages writes and applies them on `commit`. Dropping it
//! without committing discards everything it staged.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use crate::documents::{ApplicationDocument, PipelineDocument, WorkflowDocument};
use crate::reconcile::TemplateInstance;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer committed the same workflow first.
    #[error("Concurrent update of workflow {workflow}")]
    Conflict { workflow: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

pub trait Store {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Transaction<'_>, StoreError>;

    /// Instance bound to a workflow, if the workflow was generated.
    fn instance(&self, workflow: &str) -> Result<Option<TemplateInstance>, StoreError>;

    fn instances_for_template(&self, template_id: &str) -> Result<Vec<TemplateInstance>, StoreError>;
}

pub trait StoreTransaction {
    fn instance(&self, workflow: &str) -> Result<Option<TemplateInstance>, StoreError>;

    fn put_pipeline(&mut self, doc: PipelineDocument) -> Result<(), StoreError>;

    fn put_application(&mut self, doc: ApplicationDocument) -> Result<(), StoreError>;

    /// Returns the identity of the stored workflow.
    fn put_workflow(&mut self, doc: WorkflowDocument) -> Result<String, StoreError>;

    /// Insert or replace the instance for `instance.workflow`.
    fn put_instance(&mut self, instance: TemplateInstance) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct State {
    revision: u64,
    workflow_revisions: HashMap<String, u64>,
    workflows: HashMap<String, WorkflowDocument>,
    pipelines: HashMap<String, PipelineDocument>,
    applications: HashMap<String, ApplicationDocument>,
    instances: HashMap<String, TemplateInstance>,
}

/// In-process store with optimistic, per-workflow conflict detection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    pub fn workflow(&self, name: &str) -> Result<Option<WorkflowDocument>, StoreError> {
        Ok(self.state()?.workflows.get(name).cloned())
    }

    pub fn pipeline(&self, name: &str) -> Result<Option<PipelineDocument>, StoreError> {
        Ok(self.state()?.pipelines.get(name).cloned())
    }

    pub fn application(&self, name: &str) -> Result<Option<ApplicationDocument>, StoreError> {
        Ok(self.state()?.applications.get(name).cloned())
    }

    pub fn workflow_count(&self) -> Result<usize, StoreError> {
        Ok(self.state()?.workflows.len())
    }

    pub fn pipeline_count(&self) -> Result<usize, StoreError> {
        Ok(self.state()?.pipelines.len())
    }

    pub fn instance_count(&self) -> Result<usize, StoreError> {
        Ok(self.state()?.instances.len())
    }

    /// Removes a workflow and, with it, its instance.
    pub fn delete_workflow(&self, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let removed = state.workflows.remove(name).is_some();
        if removed {
            state.instances.remove(name);
            state.revision += 1;
            let revision = state.revision;
            state.workflow_revisions.insert(name.to_string(), revision);
            debug!(workflow = name, "deleted workflow and its instance");
        }
        Ok(removed)
    }
}

impl Store for MemoryStore {
    type Transaction<'a> = MemoryTransaction<'a>;

    fn begin(&self) -> Result<MemoryTransaction<'_>, StoreError> {
        let base_revision = self.state()?.revision;
        Ok(MemoryTransaction {
            store: self,
            base_revision,
            staged: Staged::default(),
            finished: false,
        })
    }

    fn instance(&self, workflow: &str) -> Result<Option<TemplateInstance>, StoreError> {
        Ok(self.state()?.instances.get(workflow).cloned())
    }

    fn instances_for_template(&self, template_id: &str) -> Result<Vec<TemplateInstance>, StoreError> {
        let state = self.state()?;
        let mut found: Vec<_> = state
            .instances
            .values()
            .filter(|i| i.template_id == template_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.workflow.cmp(&b.workflow));
        Ok(found)
    }
}

#[derive(Debug, Default)]
struct Staged {
    workflows: Vec<WorkflowDocument>,
    pipelines: Vec<PipelineDocument>,
    applications: Vec<ApplicationDocument>,
    instances: Vec<TemplateInstance>,
}

impl Staged {
    fn touched_workflows(&self) -> impl Iterator<Item = &str> {
        self.workflows
            .iter()
            .map(|w| w.name.as_str())
            .chain(self.instances.iter().map(|i| i.workflow.as_str()))
    }
}

pub struct MemoryTransaction<'s> {
    store: &'s MemoryStore,
    base_revision: u64,
    staged: Staged,
    finished: bool,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn instance(&self, workflow: &str) -> Result<Option<TemplateInstance>, StoreError> {
        if let Some(staged) = self.staged.instances.iter().rev().find(|i| i.workflow == workflow) {
            return Ok(Some(staged.clone()));
        }
        self.store.instance(workflow)
    }

    fn put_pipeline(&mut self, doc: PipelineDocument) -> Result<(), StoreError> {
        self.staged.pipelines.push(doc);
        Ok(())
    }

    fn put_application(&mut self, doc: ApplicationDocument) -> Result<(), StoreError> {
        self.staged.applications.push(doc);
        Ok(())
    }

    fn put_workflow(&mut self, doc: WorkflowDocument) -> Result<String, StoreError> {
        if doc.name.trim().is_empty() {
            return Err(StoreError::Rejected("workflow name is empty".to_string()));
        }
        let id = doc.name.clone();
        self.staged.workflows.push(doc);
        Ok(id)
    }

    fn put_instance(&mut self, instance: TemplateInstance) -> Result<(), StoreError> {
        self.staged.instances.push(instance);
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        self.finished = true;

        let mut state = self.store.state()?;
        for name in staged.touched_workflows() {
            if state.workflow_revisions.get(name).copied().unwrap_or(0) > self.base_revision {
                warn!(workflow = name, "conflicting commit, rolling back");
                return Err(StoreError::Conflict {
                    workflow: name.to_string(),
                });
            }
        }

        state.revision += 1;
        let revision = state.revision;
        for name in staged.touched_workflows() {
            state.workflow_revisions.insert(name.to_string(), revision);
        }
        for doc in staged.pipelines {
            state.pipelines.insert(doc.name.clone(), doc);
        }
        for doc in staged.applications {
            state.applications.insert(doc.name.clone(), doc);
        }
        for doc in staged.workflows {
            state.workflows.insert(doc.name.clone(), doc);
        }
        for instance in staged.instances {
            state.instances.insert(instance.workflow.clone(), instance);
        }
        debug!(revision, "transaction committed");
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                workflows = self.staged.workflows.len(),
                pipelines = self.staged.pipelines.len(),
                "transaction rolled back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Mapping;

    fn workflow(name: &str) -> WorkflowDocument {
        WorkflowDocument {
            name: name.into(),
            body: Mapping::new(),
        }
    }

    fn pipeline(name: &str) -> PipelineDocument {
        PipelineDocument {
            name: name.into(),
            body: Mapping::new(),
        }
    }

    #[test]
    fn test_drop_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().unwrap();
            tx.put_pipeline(pipeline("build")).unwrap();
            tx.put_workflow(workflow("wf")).unwrap();
        }
        assert_eq!(store.workflow_count().unwrap(), 0);
        assert_eq!(store.pipeline_count().unwrap(), 0);
    }

    #[test]
    fn test_commit_applies_all() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.put_pipeline(pipeline("build")).unwrap();
        assert_eq!(tx.put_workflow(workflow("wf")).unwrap(), "wf");
        tx.commit().unwrap();
        assert!(store.workflow("wf").unwrap().is_some());
        assert!(store.pipeline("build").unwrap().is_some());
    }

    #[test]
    fn test_conflicting_writer_loses() {
        let store = MemoryStore::new();
        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        first.put_workflow(workflow("wf")).unwrap();
        second.put_workflow(workflow("wf")).unwrap();
        second.put_pipeline(pipeline("only-second")).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref workflow } if workflow == "wf"));
        assert!(store.pipeline("only-second").unwrap().is_none());
    }

    #[test]
    fn test_disjoint_writers_both_commit() {
        let store = MemoryStore::new();
        let mut a = store.begin().unwrap();
        let mut b = store.begin().unwrap();
        a.put_workflow(workflow("a")).unwrap();
        b.put_workflow(workflow("b")).unwrap();
        a.commit().unwrap();
        b.commit().unwrap();
        assert_eq!(store.workflow_count().unwrap(), 2);
    }

    #[test]
    fn test_empty_workflow_name_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        assert!(matches!(tx.put_workflow(workflow(" ")), Err(StoreError::Rejected(_))));
    }
}
