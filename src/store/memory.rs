//! In-process store for tests and dry runs
//!
//! Mimics the API server behaviors the reconcile loop depends on:
//! resourceVersion conflicts, `AlreadyExists` on duplicate creates, creation
//! timestamps and uids on create. Faults can be injected per operation.

use super::{NodeInventory, StoreError, WorkloadStore};
use crate::controller::clock::Clock;
use crate::crd::generation::{Generation, WORKLOAD_NAME_LABEL};
use crate::crd::time::from_chrono;
use crate::crd::workload::{Workload, WorkloadStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

type Key = (String, String);

#[derive(Default)]
struct State {
    workloads: BTreeMap<Key, Workload>,
    generations: BTreeMap<Key, Generation>,
    nodes: Vec<Node>,
    next_version: u64,
    failing_deletes: HashSet<String>,
    delete_calls: Vec<String>,
    status_conflicts: u32,
    unavailable: bool,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Thread-safe in-memory implementation of `WorkloadStore` and `NodeInventory`
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    // A poisoned lock only means another test thread panicked mid-call
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a workload as if a user had applied it
    pub fn insert_workload(&self, mut workload: Workload) -> Workload {
        let mut state = self.lock();
        let version = state.bump();
        let meta = &mut workload.metadata;
        meta.resource_version = Some(version.clone());
        meta.uid.get_or_insert_with(|| format!("uid-{version}"));
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = from_chrono(self.clock.now());
        }
        let k = key(
            &workload.namespace().unwrap_or_default(),
            &workload.name_any(),
        );
        state.workloads.insert(k, workload.clone());
        workload
    }

    /// Add a generation directly, keeping any creation timestamp already set
    pub fn insert_generation(&self, mut generation: Generation) -> Generation {
        let mut state = self.lock();
        let version = state.bump();
        let meta = &mut generation.metadata;
        meta.resource_version = Some(version.clone());
        meta.uid.get_or_insert_with(|| format!("uid-{version}"));
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = from_chrono(self.clock.now());
        }
        let k = key(
            &generation.namespace().unwrap_or_default(),
            &generation.name_any(),
        );
        state.generations.insert(k, generation.clone());
        generation
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.lock().nodes = nodes;
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.lock().workloads.get(&key(namespace, name)).cloned()
    }

    /// Overwrite stored metadata as an external writer would (bumps resourceVersion)
    pub fn set_annotation(&self, namespace: &str, name: &str, annotation: &str, value: &str) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(w) = state.workloads.get_mut(&key(namespace, name)) {
            w.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(annotation.to_string(), value.to_string());
            w.metadata.resource_version = Some(version);
        }
    }

    /// Replace a generation's status counters as the pod controller would
    pub fn set_generation_status(
        &self,
        namespace: &str,
        name: &str,
        status: crate::crd::generation::GenerationStatus,
    ) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(g) = state.generations.get_mut(&key(namespace, name)) {
            g.status = Some(status);
            g.metadata.resource_version = Some(version);
        }
    }

    /// Mark a generation as being deleted while it stays listed, as a
    /// finalizer would
    pub fn mark_terminating(&self, namespace: &str, name: &str) {
        let now = from_chrono(self.clock.now());
        let mut state = self.lock();
        let version = state.bump();
        if let Some(g) = state.generations.get_mut(&key(namespace, name)) {
            g.metadata.deletion_timestamp = now;
            g.metadata.resource_version = Some(version);
        }
    }

    pub fn generations(&self, namespace: &str) -> Vec<Generation> {
        self.lock()
            .generations
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, g)| g.clone())
            .collect()
    }

    /// Make every delete of `name` fail with `Unavailable`
    pub fn fail_deletes_of(&self, name: &str) {
        self.lock().failing_deletes.insert(name.to_string());
    }

    /// Names passed to `delete_generation`, in call order
    pub fn delete_calls(&self) -> Vec<String> {
        self.lock().delete_calls.clone()
    }

    /// Reject the next `count` status writes with a conflict
    pub fn conflict_next_status_updates(&self, count: u32) {
        self.lock().status_conflicts = count;
    }

    /// Fail every call with `Unavailable` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }
}

fn check_available(state: &State) -> Result<(), StoreError> {
    if state.unavailable {
        return Err(StoreError::Unavailable("memory store offline".to_string()));
    }
    Ok(())
}

fn check_version(stored: &Workload, incoming: &Workload) -> Result<(), StoreError> {
    if incoming.metadata.resource_version.is_some()
        && incoming.metadata.resource_version != stored.metadata.resource_version
    {
        return Err(StoreError::Conflict {
            kind: "Workload",
            name: stored.name_any(),
            message: "the object has been modified".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl WorkloadStore for MemoryStore {
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload, StoreError> {
        let state = self.lock();
        check_available(&state)?;
        state
            .workloads
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Workload",
                name: name.to_string(),
            })
    }

    async fn replace_workload(&self, workload: &Workload) -> Result<Workload, StoreError> {
        let mut state = self.lock();
        check_available(&state)?;
        let k = key(&workload.namespace().unwrap_or_default(), &workload.name_any());
        let stored = state.workloads.get(&k).ok_or_else(|| StoreError::NotFound {
            kind: "Workload",
            name: workload.name_any(),
        })?;
        check_version(stored, workload)?;

        let mut updated = workload.clone();
        updated.status = stored.status.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.workloads.insert(k, updated.clone());
        Ok(updated)
    }

    async fn update_workload_status(
        &self,
        workload: &Workload,
        status: &WorkloadStatus,
    ) -> Result<Workload, StoreError> {
        let mut state = self.lock();
        check_available(&state)?;
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            return Err(StoreError::Conflict {
                kind: "Workload",
                name: workload.name_any(),
                message: "injected conflict".to_string(),
            });
        }

        let k = key(&workload.namespace().unwrap_or_default(), &workload.name_any());
        let stored = state.workloads.get(&k).ok_or_else(|| StoreError::NotFound {
            kind: "Workload",
            name: workload.name_any(),
        })?;
        check_version(stored, workload)?;

        let mut updated = stored.clone();
        updated.status = Some(status.clone());
        updated.metadata.resource_version = Some(state.bump());
        state.workloads.insert(k, updated.clone());
        Ok(updated)
    }

    async fn list_generations(
        &self,
        namespace: &str,
        workload_name: &str,
    ) -> Result<Vec<Generation>, StoreError> {
        let state = self.lock();
        check_available(&state)?;
        Ok(state
            .generations
            .iter()
            .filter(|((ns, _), g)| {
                ns == namespace
                    && g.labels().get(WORKLOAD_NAME_LABEL).map(String::as_str)
                        == Some(workload_name)
            })
            .map(|(_, g)| g.clone())
            .collect())
    }

    async fn create_generation(&self, generation: &Generation) -> Result<Generation, StoreError> {
        {
            let state = self.lock();
            check_available(&state)?;
            let k = key(
                &generation.namespace().unwrap_or_default(),
                &generation.name_any(),
            );
            if state.generations.contains_key(&k) {
                return Err(StoreError::AlreadyExists {
                    kind: "Generation",
                    name: generation.name_any(),
                });
            }
        }
        Ok(self.insert_generation(generation.clone()))
    }

    async fn delete_generation(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        check_available(&state)?;
        state.delete_calls.push(name.to_string());
        if state.failing_deletes.contains(name) {
            return Err(StoreError::Unavailable(format!("delete of {name} failed")));
        }
        state
            .generations
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: "Generation",
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl NodeInventory for MemoryStore {
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let state = self.lock();
        check_available(&state)?;
        Ok(state.nodes.clone())
    }
}
