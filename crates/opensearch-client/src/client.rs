//! Typed operations over the engine's admin REST API

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::transport::{ConnectionConfig, EngineRequest, EngineResponse, HttpTransport, Method, Transport};
use crate::types::{
    ActionGroupPayload, CatShard, ClusterHealth, ClusterSettings, RoleMappingPayload, RolePayload,
    ScriptPayload, SnapshotRepository, TenantPayload, UserPayload, VersionedDocument,
};
use crate::ClientError;

/// Transient setting listing node names shards must move off
pub const EXCLUDE_NAME_SETTING: &str = "cluster.routing.allocation.exclude._name";
/// Transient setting gating shard allocation
pub const ALLOCATION_ENABLE_SETTING: &str = "cluster.routing.allocation.enable";

const SECURITY_API: &str = "/_plugins/_security/api";

/// Security plugin object families sharing one request shape
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityKind {
    /// `internalusers`
    User,
    /// `roles`
    Role,
    /// `rolesmapping`
    RoleMapping,
    /// `tenants`
    Tenant,
    /// `actiongroups`
    ActionGroup,
}

impl SecurityKind {
    fn segment(self) -> &'static str {
        match self {
            SecurityKind::User => "internalusers",
            SecurityKind::Role => "roles",
            SecurityKind::RoleMapping => "rolesmapping",
            SecurityKind::Tenant => "tenants",
            SecurityKind::ActionGroup => "actiongroups",
        }
    }

    fn path(self, name: &str) -> String {
        format!("{}/{}/{}", SECURITY_API, self.segment(), name)
    }
}

/// Shard allocation modes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardAllocation {
    /// Allocate every shard
    All,
    /// Allocate primaries only
    Primaries,
    /// Allocate nothing
    None,
}

impl ShardAllocation {
    fn as_str(self) -> &'static str {
        match self {
            ShardAllocation::All => "all",
            ShardAllocation::Primaries => "primaries",
            ShardAllocation::None => "none",
        }
    }
}

/// Client for one engine cluster
#[derive(Clone)]
pub struct OpenSearchClient {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for OpenSearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSearchClient").finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(operation: &str, response: &EngineResponse) -> Result<T, ClientError> {
    serde_json::from_str(&response.body).map_err(|e| ClientError::decode(operation, e))
}

fn to_body<T: Serialize>(operation: &str, payload: &T) -> Result<Value, ClientError> {
    serde_json::to_value(payload).map_err(|e| ClientError::decode(operation, e))
}

impl OpenSearchClient {
    /// Client over HTTPS
    pub fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new(config)?)))
    }

    /// Client over an arbitrary transport
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn send(&self, operation: &str, request: EngineRequest) -> Result<EngineResponse, ClientError> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ClientError::Status {
                operation: operation.to_string(),
                status: response.status,
                body: response.body,
            })
        }
    }

    /// Like `send` but maps 404 onto None
    async fn send_opt(
        &self,
        operation: &str,
        request: EngineRequest,
    ) -> Result<Option<EngineResponse>, ClientError> {
        match self.send(operation, request).await {
            Ok(r) => Ok(Some(r)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ---------------------------------------------------------------------
    // Cluster
    // ---------------------------------------------------------------------

    /// Whether the engine answers on `/`
    pub async fn ping(&self) -> bool {
        self.send("ping", EngineRequest::new(Method::Get, "/"))
            .await
            .is_ok()
    }

    /// Cluster health
    pub async fn cluster_health(&self) -> Result<ClusterHealth, ClientError> {
        let response = self
            .send("cluster_health", EngineRequest::new(Method::Get, "/_cluster/health"))
            .await?;
        decode("cluster_health", &response)
    }

    /// Cluster settings in flat form
    pub async fn cluster_settings(&self) -> Result<ClusterSettings, ClientError> {
        let response = self
            .send(
                "get_cluster_settings",
                EngineRequest::new(Method::Get, "/_cluster/settings?flat_settings=true"),
            )
            .await?;
        decode("get_cluster_settings", &response)
    }

    /// Write transient settings; a null value resets the setting
    pub async fn put_transient_settings(&self, settings: Value) -> Result<(), ClientError> {
        self.send(
            "put_cluster_settings",
            EngineRequest::new(Method::Put, "/_cluster/settings")
                .with_body(json!({ "transient": settings })),
        )
        .await?;
        Ok(())
    }

    /// Shard rows
    pub async fn cat_shards(&self) -> Result<Vec<CatShard>, ClientError> {
        let response = self
            .send(
                "cat_shards",
                EngineRequest::new(Method::Get, "/_cat/shards?h=node,index,shard&format=json"),
            )
            .await?;
        decode("cat_shards", &response)
    }

    /// Whether no shard is allocated to the node
    pub async fn node_has_no_shards(&self, node: &str) -> Result<bool, ClientError> {
        Ok(!self
            .cat_shards()
            .await?
            .iter()
            .any(|s| s.node.as_deref() == Some(node)))
    }

    /// Append a node to the allocation exclusion list
    ///
    /// Reads the current list and merges; returns false when the node was
    /// already excluded.
    pub async fn exclude_node(&self, node: &str) -> Result<bool, ClientError> {
        let mut nodes = self.excluded_nodes().await?;
        if nodes.iter().any(|n| n == node) {
            return Ok(false);
        }
        nodes.push(node.to_string());
        debug!(node, "Excluding node from shard allocation");
        self.put_transient_settings(json!({ EXCLUDE_NAME_SETTING: nodes.join(",") }))
            .await?;
        Ok(true)
    }

    /// Remove a node from the allocation exclusion list
    pub async fn include_node(&self, node: &str) -> Result<bool, ClientError> {
        let nodes = self.excluded_nodes().await?;
        if !nodes.iter().any(|n| n == node) {
            return Ok(false);
        }
        let remaining: Vec<_> = nodes.into_iter().filter(|n| n != node).collect();
        let value = if remaining.is_empty() {
            Value::Null
        } else {
            Value::String(remaining.join(","))
        };
        debug!(node, "Removing node from allocation exclusion");
        self.put_transient_settings(json!({ EXCLUDE_NAME_SETTING: value }))
            .await?;
        Ok(true)
    }

    /// Node names currently excluded from allocation
    pub async fn excluded_nodes(&self) -> Result<Vec<String>, ClientError> {
        Ok(self
            .cluster_settings()
            .await?
            .get_str(EXCLUDE_NAME_SETTING)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Set the shard allocation mode
    pub async fn set_shard_allocation(&self, mode: ShardAllocation) -> Result<(), ClientError> {
        let value = match mode {
            ShardAllocation::All => Value::Null,
            other => Value::String(other.as_str().to_string()),
        };
        self.put_transient_settings(json!({ ALLOCATION_ENABLE_SETTING: value }))
            .await
    }

    /// Current shard allocation mode
    pub async fn shard_allocation(&self) -> Result<ShardAllocation, ClientError> {
        let settings = self.cluster_settings().await?;
        Ok(match settings.get_str(ALLOCATION_ENABLE_SETTING).as_deref() {
            Some("none") => ShardAllocation::None,
            Some("primaries") => ShardAllocation::Primaries,
            _ => ShardAllocation::All,
        })
    }

    /// Flush every index
    pub async fn flush(&self) -> Result<(), ClientError> {
        self.send("flush", EngineRequest::new(Method::Post, "/_flush"))
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Security plugin
    // ---------------------------------------------------------------------

    async fn get_security<T: DeserializeOwned>(
        &self,
        kind: SecurityKind,
        name: &str,
    ) -> Result<Option<T>, ClientError> {
        let operation = format!("get_{}", kind.segment());
        let Some(response) = self
            .send_opt(&operation, EngineRequest::new(Method::Get, kind.path(name)))
            .await?
        else {
            return Ok(None);
        };
        let mut body: serde_json::Map<String, Value> = decode(&operation, &response)?;
        match body.remove(name) {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| ClientError::decode(&operation, e)),
            None => Ok(None),
        }
    }

    async fn put_security<T: Serialize>(
        &self,
        kind: SecurityKind,
        name: &str,
        payload: &T,
    ) -> Result<(), ClientError> {
        let operation = format!("put_{}", kind.segment());
        let body = to_body(&operation, payload)?;
        self.send(
            &operation,
            EngineRequest::new(Method::Put, kind.path(name)).with_body(body),
        )
        .await?;
        Ok(())
    }

    /// Delete a security object; false when it was already gone
    pub async fn delete_security(&self, kind: SecurityKind, name: &str) -> Result<bool, ClientError> {
        let operation = format!("delete_{}", kind.segment());
        Ok(self
            .send_opt(&operation, EngineRequest::new(Method::Delete, kind.path(name)))
            .await?
            .is_some())
    }

    /// Whether a security object exists
    pub async fn security_exists(&self, kind: SecurityKind, name: &str) -> Result<bool, ClientError> {
        Ok(self.get_security::<Value>(kind, name).await?.is_some())
    }

    /// Fetch an internal user
    pub async fn get_user(&self, name: &str) -> Result<Option<UserPayload>, ClientError> {
        self.get_security(SecurityKind::User, name).await
    }

    /// Create or replace an internal user
    pub async fn put_user(&self, name: &str, user: &UserPayload) -> Result<(), ClientError> {
        self.put_security(SecurityKind::User, name, user).await
    }

    /// Fetch a role
    pub async fn get_role(&self, name: &str) -> Result<Option<RolePayload>, ClientError> {
        self.get_security(SecurityKind::Role, name).await
    }

    /// Create or replace a role
    pub async fn put_role(&self, name: &str, role: &RolePayload) -> Result<(), ClientError> {
        self.put_security(SecurityKind::Role, name, role).await
    }

    /// Fetch a role mapping
    pub async fn get_role_mapping(&self, role: &str) -> Result<Option<RoleMappingPayload>, ClientError> {
        self.get_security(SecurityKind::RoleMapping, role).await
    }

    /// Create or replace a role mapping
    pub async fn put_role_mapping(
        &self,
        role: &str,
        mapping: &RoleMappingPayload,
    ) -> Result<(), ClientError> {
        self.put_security(SecurityKind::RoleMapping, role, mapping)
            .await
    }

    /// Fetch a tenant
    pub async fn get_tenant(&self, name: &str) -> Result<Option<TenantPayload>, ClientError> {
        self.get_security(SecurityKind::Tenant, name).await
    }

    /// Create or replace a tenant
    pub async fn put_tenant(&self, name: &str, tenant: &TenantPayload) -> Result<(), ClientError> {
        self.put_security(SecurityKind::Tenant, name, tenant).await
    }

    /// Fetch an action group
    pub async fn get_action_group(&self, name: &str) -> Result<Option<ActionGroupPayload>, ClientError> {
        self.get_security(SecurityKind::ActionGroup, name).await
    }

    /// Create or replace an action group
    pub async fn put_action_group(
        &self,
        name: &str,
        group: &ActionGroupPayload,
    ) -> Result<(), ClientError> {
        self.put_security(SecurityKind::ActionGroup, name, group)
            .await
    }

    // ---------------------------------------------------------------------
    // Templates and scripts
    // ---------------------------------------------------------------------

    async fn get_listed_template(
        &self,
        operation: &str,
        path: String,
        list_key: &str,
        item_key: &str,
        name: &str,
    ) -> Result<Option<Value>, ClientError> {
        let Some(response) = self
            .send_opt(operation, EngineRequest::new(Method::Get, path))
            .await?
        else {
            return Ok(None);
        };
        let body: Value = decode(operation, &response)?;
        Ok(body
            .get(list_key)
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .find(|i| i.get("name").and_then(Value::as_str) == Some(name))
            })
            .and_then(|i| i.get(item_key))
            .cloned())
    }

    /// Fetch an index template body
    pub async fn get_index_template(&self, name: &str) -> Result<Option<Value>, ClientError> {
        self.get_listed_template(
            "get_index_template",
            format!("/_index_template/{}", name),
            "index_templates",
            "index_template",
            name,
        )
        .await
    }

    /// Create or replace an index template
    pub async fn put_index_template(&self, name: &str, body: &Value) -> Result<(), ClientError> {
        self.send(
            "put_index_template",
            EngineRequest::new(Method::Put, format!("/_index_template/{}", name))
                .with_body(body.clone()),
        )
        .await?;
        Ok(())
    }

    /// Delete an index template; false when it was already gone
    pub async fn delete_index_template(&self, name: &str) -> Result<bool, ClientError> {
        Ok(self
            .send_opt(
                "delete_index_template",
                EngineRequest::new(Method::Delete, format!("/_index_template/{}", name)),
            )
            .await?
            .is_some())
    }

    /// Fetch a component template body
    pub async fn get_component_template(&self, name: &str) -> Result<Option<Value>, ClientError> {
        self.get_listed_template(
            "get_component_template",
            format!("/_component_template/{}", name),
            "component_templates",
            "component_template",
            name,
        )
        .await
    }

    /// Create or replace a component template
    pub async fn put_component_template(&self, name: &str, body: &Value) -> Result<(), ClientError> {
        self.send(
            "put_component_template",
            EngineRequest::new(Method::Put, format!("/_component_template/{}", name))
                .with_body(body.clone()),
        )
        .await?;
        Ok(())
    }

    /// Delete a component template; false when it was already gone
    pub async fn delete_component_template(&self, name: &str) -> Result<bool, ClientError> {
        Ok(self
            .send_opt(
                "delete_component_template",
                EngineRequest::new(Method::Delete, format!("/_component_template/{}", name)),
            )
            .await?
            .is_some())
    }

    /// Fetch a stored script
    pub async fn get_script(&self, id: &str) -> Result<Option<ScriptPayload>, ClientError> {
        let Some(response) = self
            .send_opt("get_script", EngineRequest::new(Method::Get, format!("/_scripts/{}", id)))
            .await?
        else {
            return Ok(None);
        };
        let body: Value = decode("get_script", &response)?;
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        body.get("script")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ClientError::decode("get_script", e))
    }

    /// Create or replace a stored script
    pub async fn put_script(&self, id: &str, script: &ScriptPayload) -> Result<(), ClientError> {
        let body = json!({ "script": to_body("put_script", script)? });
        self.send(
            "put_script",
            EngineRequest::new(Method::Put, format!("/_scripts/{}", id)).with_body(body),
        )
        .await?;
        Ok(())
    }

    /// Delete a stored script; false when it was already gone
    pub async fn delete_script(&self, id: &str) -> Result<bool, ClientError> {
        Ok(self
            .send_opt(
                "delete_script",
                EngineRequest::new(Method::Delete, format!("/_scripts/{}", id)),
            )
            .await?
            .is_some())
    }

    // ---------------------------------------------------------------------
    // Policies
    // ---------------------------------------------------------------------

    async fn get_versioned(
        &self,
        operation: &str,
        path: String,
        body_key: &str,
    ) -> Result<Option<VersionedDocument>, ClientError> {
        let Some(response) = self
            .send_opt(operation, EngineRequest::new(Method::Get, path))
            .await?
        else {
            return Ok(None);
        };
        let body: Value = decode(operation, &response)?;
        let field = |key: &str| {
            body.get(key)
                .and_then(Value::as_i64)
                .ok_or_else(|| ClientError::decode(operation, format!("missing {}", key)))
        };
        Ok(Some(VersionedDocument {
            seq_no: field("_seq_no")?,
            primary_term: field("_primary_term")?,
            body: body.get(body_key).cloned().unwrap_or(Value::Null),
        }))
    }

    /// Fetch an ISM policy with its concurrency guard
    pub async fn get_ism_policy(&self, id: &str) -> Result<Option<VersionedDocument>, ClientError> {
        self.get_versioned(
            "get_ism_policy",
            format!("/_plugins/_ism/policies/{}", id),
            "policy",
        )
        .await
    }

    /// Create an ISM policy
    pub async fn create_ism_policy(&self, id: &str, policy: &Value) -> Result<(), ClientError> {
        self.send(
            "create_ism_policy",
            EngineRequest::new(Method::Put, format!("/_plugins/_ism/policies/{}", id))
                .with_body(json!({ "policy": policy })),
        )
        .await?;
        Ok(())
    }

    /// Replace an ISM policy; fails with 409 when the guard is stale
    pub async fn update_ism_policy(
        &self,
        id: &str,
        seq_no: i64,
        primary_term: i64,
        policy: &Value,
    ) -> Result<(), ClientError> {
        self.send(
            "update_ism_policy",
            EngineRequest::new(
                Method::Put,
                format!(
                    "/_plugins/_ism/policies/{}?if_seq_no={}&if_primary_term={}",
                    id, seq_no, primary_term
                ),
            )
            .with_body(json!({ "policy": policy })),
        )
        .await?;
        Ok(())
    }

    /// Delete an ISM policy; false when it was already gone
    pub async fn delete_ism_policy(&self, id: &str) -> Result<bool, ClientError> {
        Ok(self
            .send_opt(
                "delete_ism_policy",
                EngineRequest::new(Method::Delete, format!("/_plugins/_ism/policies/{}", id)),
            )
            .await?
            .is_some())
    }

    /// Fetch a snapshot management policy with its concurrency guard
    pub async fn get_snapshot_policy(&self, name: &str) -> Result<Option<VersionedDocument>, ClientError> {
        self.get_versioned(
            "get_snapshot_policy",
            format!("/_plugins/_sm/policies/{}", name),
            "sm_policy",
        )
        .await
    }

    /// Create a snapshot management policy
    pub async fn create_snapshot_policy(&self, name: &str, policy: &Value) -> Result<(), ClientError> {
        self.send(
            "create_snapshot_policy",
            EngineRequest::new(Method::Post, format!("/_plugins/_sm/policies/{}", name))
                .with_body(policy.clone()),
        )
        .await?;
        Ok(())
    }

    /// Replace a snapshot management policy; fails with 409 when the guard is stale
    pub async fn update_snapshot_policy(
        &self,
        name: &str,
        seq_no: i64,
        primary_term: i64,
        policy: &Value,
    ) -> Result<(), ClientError> {
        self.send(
            "update_snapshot_policy",
            EngineRequest::new(
                Method::Put,
                format!(
                    "/_plugins/_sm/policies/{}?if_seq_no={}&if_primary_term={}",
                    name, seq_no, primary_term
                ),
            )
            .with_body(policy.clone()),
        )
        .await?;
        Ok(())
    }

    /// Delete a snapshot management policy; false when it was already gone
    pub async fn delete_snapshot_policy(&self, name: &str) -> Result<bool, ClientError> {
        Ok(self
            .send_opt(
                "delete_snapshot_policy",
                EngineRequest::new(Method::Delete, format!("/_plugins/_sm/policies/{}", name)),
            )
            .await?
            .is_some())
    }

    // ---------------------------------------------------------------------
    // Snapshot repositories
    // ---------------------------------------------------------------------

    /// Fetch a snapshot repository
    pub async fn get_snapshot_repository(
        &self,
        name: &str,
    ) -> Result<Option<SnapshotRepository>, ClientError> {
        let Some(response) = self
            .send_opt(
                "get_snapshot_repository",
                EngineRequest::new(Method::Get, format!("/_snapshot/{}", name)),
            )
            .await?
        else {
            return Ok(None);
        };
        let mut body: serde_json::Map<String, Value> = decode("get_snapshot_repository", &response)?;
        body.remove(name)
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ClientError::decode("get_snapshot_repository", e))
    }

    /// Create or replace a snapshot repository
    pub async fn put_snapshot_repository(
        &self,
        name: &str,
        repository: &SnapshotRepository,
    ) -> Result<(), ClientError> {
        let body = to_body("put_snapshot_repository", repository)?;
        self.send(
            "put_snapshot_repository",
            EngineRequest::new(Method::Put, format!("/_snapshot/{}", name)).with_body(body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeEngine;
    use crate::types::HealthStatus;

    fn client(engine: &Arc<FakeEngine>) -> OpenSearchClient {
        OpenSearchClient::with_transport(engine.clone())
    }

    #[tokio::test]
    async fn health_decodes() {
        let engine = Arc::new(FakeEngine::new());
        engine
            .set_health(ClusterHealth {
                status: HealthStatus::Green,
                number_of_nodes: 3,
                ..Default::default()
            })
            .await;
        let health = client(&engine).cluster_health().await.unwrap();
        assert_eq!(health.status, HealthStatus::Green);
        assert_eq!(health.number_of_nodes, 3);
    }

    #[tokio::test]
    async fn exclusion_merges_with_existing_list() {
        let engine = Arc::new(FakeEngine::new());
        let c = client(&engine);

        assert!(c.exclude_node("logs-data-2").await.unwrap());
        assert!(c.exclude_node("logs-data-1").await.unwrap());
        assert!(!c.exclude_node("logs-data-1").await.unwrap());
        assert_eq!(
            c.excluded_nodes().await.unwrap(),
            vec!["logs-data-2".to_string(), "logs-data-1".to_string()]
        );

        assert!(c.include_node("logs-data-2").await.unwrap());
        assert_eq!(c.excluded_nodes().await.unwrap(), vec!["logs-data-1".to_string()]);
        assert!(c.include_node("logs-data-1").await.unwrap());
        assert!(c.excluded_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shard_allocation_round_trips() {
        let engine = Arc::new(FakeEngine::new());
        let c = client(&engine);
        c.set_shard_allocation(ShardAllocation::Primaries).await.unwrap();
        assert_eq!(c.shard_allocation().await.unwrap(), ShardAllocation::Primaries);
        c.set_shard_allocation(ShardAllocation::All).await.unwrap();
        assert_eq!(c.shard_allocation().await.unwrap(), ShardAllocation::All);
    }

    #[tokio::test]
    async fn node_shards_are_filtered_by_name() {
        let engine = Arc::new(FakeEngine::new());
        engine
            .set_shards(vec![CatShard {
                node: Some("logs-data-0".to_string()),
                index: "events".to_string(),
                shard: "0".to_string(),
            }])
            .await;
        let c = client(&engine);
        assert!(!c.node_has_no_shards("logs-data-0").await.unwrap());
        assert!(c.node_has_no_shards("logs-data-2").await.unwrap());
    }

    #[tokio::test]
    async fn missing_security_objects_are_none() {
        let engine = Arc::new(FakeEngine::new());
        let c = client(&engine);
        assert!(c.get_role("reader").await.unwrap().is_none());
        assert!(!c.delete_security(SecurityKind::Role, "reader").await.unwrap());

        let role = RolePayload {
            cluster_permissions: vec!["cluster_monitor".to_string()],
            ..Default::default()
        };
        c.put_role("reader", &role).await.unwrap();
        assert_eq!(c.get_role("reader").await.unwrap(), Some(role));
        assert!(c.delete_security(SecurityKind::Role, "reader").await.unwrap());
    }

    #[tokio::test]
    async fn ism_update_carries_concurrency_guard() {
        let engine = Arc::new(FakeEngine::new());
        let c = client(&engine);
        let policy = json!({"default_state": "hot", "states": []});
        c.create_ism_policy("rollover", &policy).await.unwrap();

        let doc = c.get_ism_policy("rollover").await.unwrap().unwrap();
        c.update_ism_policy("rollover", doc.seq_no, doc.primary_term, &policy)
            .await
            .unwrap();

        let stale = c
            .update_ism_policy("rollover", doc.seq_no, doc.primary_term, &policy)
            .await
            .unwrap_err();
        assert!(stale.is_conflict());
    }

    #[tokio::test]
    async fn engine_errors_carry_status() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_next(503, "unavailable").await;
        let err = client(&engine).cluster_health().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }
}
