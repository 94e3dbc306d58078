//! DataPlaneMirror: reconciles the target cluster's namespace, image-pull
//! secrets, and PVCs against the control-plane workspace spec (§4.9). Races
//! independently of admission — required before the execution layer can run
//! admitted workloads, but not gated by it.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::Result;
use crate::store::MirrorClient;
use crate::types::Workspace;

pub struct DataPlaneMirror<M: MirrorClient> {
    client: M,
}

impl<M: MirrorClient> DataPlaneMirror<M> {
    pub fn new(client: M) -> Self {
        DataPlaneMirror { client }
    }

    /// Idempotent create-or-update of everything a workspace's data plane
    /// needs: the namespace, each image-pull secret, and the PVCs derived
    /// from the workspace's volume specs. `previous_volume_ids` is the set
    /// the mirror last reconciled; volumes present there but absent now are
    /// deleted, new ones are created, unchanged ones are left alone.
    pub async fn reconcile_create_or_update(
        &self,
        cluster: &str,
        namespace: &str,
        workspace: &Workspace,
        previous_volume_ids: &HashSet<String>,
    ) -> Result<()> {
        self.client.ensure_namespace(cluster, namespace).await?;
        info!(cluster, namespace, "namespace ensured");

        for secret in &workspace.image_pull_secrets {
            // CopySecret is itself idempotent (create-or-noop); an update
            // path (by name + resource-version) is the caller's business
            // once it tracks versions, modeled here as update-on-every-sync
            // which the trait's idempotence makes safe to call repeatedly.
            self.client.copy_secret(cluster, secret, namespace).await?;
        }

        let current_volume_ids: HashSet<String> = workspace
            .volumes
            .iter()
            .map(|v| v.volume_id.clone())
            .collect();

        for volume in &workspace.volumes {
            if !previous_volume_ids.contains(&volume.volume_id) {
                self.client.create_pvc(cluster, volume, namespace).await?;
                info!(cluster, namespace, volume_id = volume.volume_id, "pvc created");
            }
        }

        for removed in previous_volume_ids.difference(&current_volume_ids) {
            self.client.delete_pvc(cluster, removed, namespace).await?;
            info!(cluster, namespace, volume_id = removed, "pvc deleted");
        }

        Ok(())
    }

    /// Tears down everything for a deleted workspace. Deletion tolerates
    /// "not found" as success (§4.9) — that's the `MirrorClient`
    /// implementor's contract, not something this layer re-checks.
    pub async fn reconcile_delete(
        &self,
        cluster: &str,
        namespace: &str,
        workspace: &Workspace,
    ) -> Result<()> {
        for volume in &workspace.volumes {
            self.client
                .delete_pvc(cluster, &volume.volume_id, namespace)
                .await?;
        }
        for secret in &workspace.image_pull_secrets {
            self.client.delete_secret(cluster, secret, namespace).await?;
        }
        self.client.delete_namespace(cluster, namespace).await?;
        warn!(cluster, namespace, "workspace data plane torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeSpec;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingClient {
        created_pvcs: Mutex<Vec<String>>,
        deleted_pvcs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MirrorClient for RecordingClient {
        async fn ensure_namespace(&self, _cluster: &str, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_namespace(&self, _cluster: &str, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn copy_secret(&self, _c: &str, _s: &str, _ns: &str) -> Result<()> {
            Ok(())
        }
        async fn update_secret(&self, _c: &str, _n: &str, _s: &str, _ns: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_secret(&self, _c: &str, _n: &str, _ns: &str) -> Result<()> {
            Ok(())
        }
        async fn create_pvc(&self, _c: &str, spec: &VolumeSpec, _ns: &str) -> Result<()> {
            self.created_pvcs.lock().unwrap().push(spec.volume_id.clone());
            Ok(())
        }
        async fn delete_pvc(&self, _c: &str, name: &str, _ns: &str) -> Result<()> {
            self.deleted_pvcs.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn workspace_with_volumes(volume_ids: &[&str]) -> Workspace {
        Workspace {
            id: crate::types::WorkspaceId(Uuid::new_v4()),
            cluster_id: crate::types::ClusterId(Uuid::new_v4()),
            node_flavor_id: crate::types::NodeFlavorId(Uuid::new_v4()),
            total_capacity: Default::default(),
            available_capacity: Default::default(),
            fifo: false,
            preempt_enabled: false,
            image_pull_secrets: vec![],
            volumes: volume_ids
                .iter()
                .map(|id| VolumeSpec {
                    volume_id: id.to_string(),
                    mount_path: "/mnt".to_string(),
                    size: Default::default(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn creates_new_volumes_and_deletes_removed_ones() {
        let client = RecordingClient::default();
        let mirror = DataPlaneMirror::new(client);
        let workspace = workspace_with_volumes(&["v2", "v3"]);
        let previous: HashSet<String> = ["v1", "v2"].iter().map(|s| s.to_string()).collect();

        mirror
            .reconcile_create_or_update("cluster-a", "ns-a", &workspace, &previous)
            .await
            .unwrap();

        let created = mirror.client.created_pvcs.lock().unwrap();
        assert_eq!(*created, vec!["v3".to_string()]);
        let deleted = mirror.client.deleted_pvcs.lock().unwrap();
        assert_eq!(*deleted, vec!["v1".to_string()]);
    }
}
