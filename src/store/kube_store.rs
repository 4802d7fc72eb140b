use super::{NodeInventory, StoreError, WorkloadStore};
use crate::crd::generation::{Generation, WORKLOAD_NAME_LABEL};
use crate::crd::workload::{Workload, WorkloadStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use tracing::debug;

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn workloads(&self, namespace: &str) -> Api<Workload> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn generations(&self, namespace: &str) -> Api<Generation> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a kube API error onto the store taxonomy by HTTP status code
fn map_kube_error(err: kube::Error, kind: &'static str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
            kind,
            name: name.to_string(),
            message: resp.message.clone(),
        },
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl WorkloadStore for KubeStore {
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload, StoreError> {
        self.workloads(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "Workload", name))
    }

    async fn replace_workload(&self, workload: &Workload) -> Result<Workload, StoreError> {
        let name = workload.name_any();
        let namespace = workload.namespace().unwrap_or_default();
        self.workloads(&namespace)
            .replace(&name, &PostParams::default(), workload)
            .await
            .map_err(|e| map_kube_error(e, "Workload", &name))
    }

    async fn update_workload_status(
        &self,
        workload: &Workload,
        status: &WorkloadStatus,
    ) -> Result<Workload, StoreError> {
        let name = workload.name_any();
        let namespace = workload.namespace().unwrap_or_default();

        // resourceVersion in a merge patch makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": workload.resource_version(),
            },
            "status": status,
        });

        self.workloads(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, "Workload", &name))
    }

    async fn list_generations(
        &self,
        namespace: &str,
        workload_name: &str,
    ) -> Result<Vec<Generation>, StoreError> {
        let params = ListParams::default().labels(&format!("{WORKLOAD_NAME_LABEL}={workload_name}"));
        let list = self
            .generations(namespace)
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "Generation", workload_name))?;

        debug!(
            workload = workload_name,
            namespace = namespace,
            count = list.items.len(),
            "Listed generations"
        );
        Ok(list.items)
    }

    async fn create_generation(&self, generation: &Generation) -> Result<Generation, StoreError> {
        let name = generation.name_any();
        let namespace = generation.namespace().unwrap_or_default();
        self.generations(&namespace)
            .create(&PostParams::default(), generation)
            .await
            .map_err(|e| map_kube_error(e, "Generation", &name))
    }

    async fn delete_generation(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.generations(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "Generation", name))
    }
}

#[async_trait]
impl NodeInventory for KubeStore {
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_kube_error(e, "Node", "*"))
    }
}
