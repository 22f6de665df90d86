//! User-role bindings
//!
//! A binding adds its users and backend roles to the role mapping of every
//! role it lists. Role mappings are shared with other bindings and with
//! entries made by hand, so the controller only ever adds or strips the
//! entries it provisioned itself; the provisioned sets are kept in status.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use opensearch_client::{OpenSearchClient, SecurityKind};
use opensearch_common::crd::{OpensearchUserRoleBinding, UserRoleBindingStatus};
use opensearch_common::events::{actions, reasons};
use opensearch_common::kube_utils::{has_finalizer, is_deleting};
use opensearch_common::metrics;
use opensearch_common::reconcile::{derive_state, ReconcileResult, REQUEUE_PENDING, REQUEUE_STEADY};
use opensearch_common::Error;

use crate::context::Context;
use crate::engine_object::{
    bind, ensure_finalizer, failure_reason, owning_client, release_finalizer, settle, Binding,
};

const KIND: &str = "UserRoleBinding";

/// Entries one binding owns inside a role mapping
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Entries {
    users: BTreeSet<String>,
    backend_roles: BTreeSet<String>,
}

impl Entries {
    fn desired(binding: &OpensearchUserRoleBinding) -> Self {
        Self {
            users: binding.spec.users.iter().cloned().collect(),
            backend_roles: binding.spec.backend_roles.iter().cloned().collect(),
        }
    }

    fn provisioned(status: &UserRoleBindingStatus) -> Self {
        Self {
            users: status.provisioned_users.iter().cloned().collect(),
            backend_roles: status.provisioned_backend_roles.iter().cloned().collect(),
        }
    }

    /// Entries provisioned earlier that the binding no longer asks for
    fn stale(&self, desired: &Entries) -> Self {
        Self {
            users: self.users.difference(&desired.users).cloned().collect(),
            backend_roles: self
                .backend_roles
                .difference(&desired.backend_roles)
                .cloned()
                .collect(),
        }
    }
}

fn strip(values: &mut Vec<String>, owned: &BTreeSet<String>) {
    values.retain(|v| !owned.contains(v));
}

fn union(values: &mut Vec<String>, wanted: &BTreeSet<String>) {
    for v in wanted {
        if !values.contains(v) {
            values.push(v.clone());
        }
    }
}

/// Remove `owned` from a role mapping, deleting the mapping once it is empty
async fn release_role(
    client: &OpenSearchClient,
    role: &str,
    owned: &Entries,
) -> Result<bool, Error> {
    let Some(mut mapping) = client.get_role_mapping(role).await? else {
        return Ok(false);
    };
    let before = mapping.clone();
    strip(&mut mapping.users, &owned.users);
    strip(&mut mapping.backend_roles, &owned.backend_roles);

    if mapping.is_empty() {
        client.delete_security(SecurityKind::RoleMapping, role).await?;
        debug!(%role, "deleted empty role mapping");
        return Ok(true);
    }
    if mapping != before {
        client.put_role_mapping(role, &mapping).await?;
        return Ok(true);
    }
    Ok(false)
}

/// Bring one role mapping to the binding's entries; true when written
async fn provision_role(
    client: &OpenSearchClient,
    role: &str,
    desired: &Entries,
    stale: &Entries,
) -> Result<bool, Error> {
    let current = client.get_role_mapping(role).await?;
    let mut mapping = current.clone().unwrap_or_default();
    strip(&mut mapping.users, &stale.users);
    strip(&mut mapping.backend_roles, &stale.backend_roles);
    union(&mut mapping.users, &desired.users);
    union(&mut mapping.backend_roles, &desired.backend_roles);

    if current.as_ref() == Some(&mapping) {
        return Ok(false);
    }
    if mapping.is_empty() {
        if current.is_some() {
            client.delete_security(SecurityKind::RoleMapping, role).await?;
            return Ok(true);
        }
        return Ok(false);
    }
    client.put_role_mapping(role, &mapping).await?;
    Ok(true)
}

/// Values collected during a reconcile for the deferred status write
#[derive(Default)]
struct BindingOutcome {
    reason: Option<String>,
    managed_cluster: Option<String>,
    provisioned: bool,
}

/// Reconcile a user-role binding
#[instrument(skip(obj, ctx), fields(kind = KIND, name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<OpensearchUserRoleBinding>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let start = Instant::now();
    let result = if is_deleting(obj.as_ref()) {
        cleanup(&obj, &ctx).await
    } else {
        apply(&obj, &ctx).await
    };
    metrics::record_reconcile(
        KIND,
        start.elapsed().as_secs_f64(),
        result.as_ref().err().map(Error::is_retryable),
    );
    result.map(ReconcileResult::into_action)
}

async fn apply(obj: &OpensearchUserRoleBinding, ctx: &Context) -> Result<ReconcileResult, Error> {
    ensure_finalizer(obj, ctx).await?;

    let mut outcome = BindingOutcome {
        managed_cluster: obj
            .status
            .as_ref()
            .and_then(|s| s.common.managed_cluster.clone()),
        ..Default::default()
    };
    let result = sync(obj, ctx, &mut outcome).await;
    let result = settle(obj, ctx, result, &mut outcome.reason, failure_reason).await;
    write_status(obj, ctx, &result, &outcome).await?;
    result
}

async fn sync(
    obj: &OpensearchUserRoleBinding,
    ctx: &Context,
    outcome: &mut BindingOutcome,
) -> Result<ReconcileResult, Error> {
    let client = match bind(obj, &obj.spec.opensearch_ref, &mut outcome.managed_cluster, ctx).await? {
        Binding::Ready(client) => client,
        Binding::Waiting(reason) => {
            outcome.reason = Some(reason);
            return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
        }
    };

    let status = obj.status.clone().unwrap_or_default();
    let previous = Entries::provisioned(&status);
    let desired = Entries::desired(obj);
    let stale = previous.stale(&desired);

    let mut changed = Vec::new();
    for role in status
        .provisioned_roles
        .iter()
        .filter(|r| !obj.spec.roles.contains(r))
    {
        if release_role(&client, role, &previous).await? {
            changed.push(role.clone());
        }
    }
    for role in &obj.spec.roles {
        if provision_role(&client, role, &desired, &stale).await? {
            changed.push(role.clone());
        }
    }
    outcome.provisioned = true;

    if !changed.is_empty() {
        let note = format!("Updated role mappings {}", changed.join(", "));
        info!(roles = ?changed, "updated role mappings");
        ctx.publish(obj, EventType::Normal, reasons::API_UPDATED, actions::APPLY, note)
            .await;
    }
    Ok(ReconcileResult::requeue_after(REQUEUE_STEADY))
}

async fn write_status(
    obj: &OpensearchUserRoleBinding,
    ctx: &Context,
    result: &Result<ReconcileResult, Error>,
    outcome: &BindingOutcome,
) -> Result<(), Error> {
    if !ctx.options.update_status {
        return Ok(());
    }
    let reason = match result {
        Err(e) => Some(e.to_string()),
        Ok(_) => outcome.reason.clone(),
    };
    let state = derive_state(
        result.is_err(),
        result.as_ref().ok().and_then(|r| r.requeue_after),
        reason.as_deref(),
    );

    let namespace = obj.namespace().unwrap_or_default();
    let written = ctx
        .k8s
        .update_status::<OpensearchUserRoleBinding, _>(&namespace, &obj.name_any(), |fresh| {
            let status = fresh.status.get_or_insert_with(Default::default);
            if state.is_some() {
                status.common.state = state;
            }
            status.common.reason = reason.clone();
            status.common.managed_cluster = outcome.managed_cluster.clone();
            if outcome.provisioned {
                status.provisioned_roles = obj.spec.roles.clone();
                status.provisioned_users = obj.spec.users.clone();
                status.provisioned_backend_roles = obj.spec.backend_roles.clone();
            }
        })
        .await;

    if let Err(e) = written {
        error!(error = %e, "failed to write status");
        ctx.publish(
            obj,
            EventType::Warning,
            reasons::STATUS_UPDATE_ERROR,
            actions::UPDATE_STATUS,
            e.to_string(),
        )
        .await;
        return Err(e);
    }
    Ok(())
}

/// Strip every provisioned entry, then release the resource
async fn cleanup(obj: &OpensearchUserRoleBinding, ctx: &Context) -> Result<ReconcileResult, Error> {
    if !has_finalizer(obj) {
        return Ok(ReconcileResult::done());
    }
    let status = obj.status.clone().unwrap_or_default();
    let bound = status.common.managed_cluster.as_deref();
    if let Some(client) = owning_client(obj, &obj.spec.opensearch_ref, bound, ctx).await? {
        let owned = Entries::provisioned(&status);
        for role in &status.provisioned_roles {
            release_role(&client, role, &owned).await?;
        }
        if !status.provisioned_roles.is_empty() {
            ctx.publish(
                obj,
                EventType::Normal,
                reasons::API_UPDATED,
                actions::DELETE,
                format!("Released role mappings {}", status.provisioned_roles.join(", ")),
            )
            .await;
        }
    }
    release_finalizer(obj, ctx).await?;
    Ok(ReconcileResult::done())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{binding, Harness, NAMESPACE};
    use opensearch_client::transport::Method;
    use opensearch_client::types::RoleMappingPayload;
    use opensearch_common::crd::ResourceState;
    use serde_json::json;

    const ADMIN_MAPPING: &str = "/_plugins/_security/api/rolesmapping/all_access";
    const READ_MAPPING: &str = "/_plugins/_security/api/rolesmapping/readall";

    async fn mapping(h: &Harness, route: &str) -> Option<RoleMappingPayload> {
        h.engine
            .document(route)
            .await
            .map(|v| serde_json::from_value(v).expect("mapping should decode"))
    }

    #[tokio::test]
    async fn adds_entries_without_touching_foreign_ones() {
        let h = Harness::running().await;
        h.engine
            .seed(ADMIN_MAPPING, json!({"users": ["root"], "backend_roles": []}))
            .await;
        h.store
            .insert(&binding("ops", &["all_access", "readall"], &["alice"], &["ldap-ops"]))
            .await;

        h.reconcile_binding("ops").await.expect("reconcile should succeed");

        let admin = mapping(&h, ADMIN_MAPPING).await.expect("mapping kept");
        assert_eq!(admin.users, vec!["root", "alice"]);
        assert_eq!(admin.backend_roles, vec!["ldap-ops"]);
        let read = mapping(&h, READ_MAPPING).await.expect("mapping created");
        assert_eq!(read.users, vec!["alice"]);

        let status = h.binding("ops").await.status.expect("status written");
        assert_eq!(status.common.state, Some(ResourceState::Created));
        assert_eq!(status.provisioned_roles, vec!["all_access", "readall"]);
        assert_eq!(status.provisioned_users, vec!["alice"]);
    }

    #[tokio::test]
    async fn second_reconcile_writes_nothing() {
        let h = Harness::running().await;
        h.store
            .insert(&binding("ops", &["readall"], &["alice"], &[]))
            .await;
        h.reconcile_binding("ops").await.expect("first reconcile");
        h.engine.clear_requests().await;

        h.reconcile_binding("ops").await.expect("second reconcile");
        assert_eq!(h.engine.count(Method::Put, "/_plugins/_security").await, 0);
    }

    #[tokio::test]
    async fn dropped_role_is_stripped_and_empty_mapping_deleted() {
        let h = Harness::running().await;
        h.engine
            .seed(ADMIN_MAPPING, json!({"users": ["root"]}))
            .await;
        h.store
            .insert(&binding("ops", &["all_access", "readall"], &["alice"], &[]))
            .await;
        h.reconcile_binding("ops").await.expect("first reconcile");

        h.store
            .modify::<OpensearchUserRoleBinding>(NAMESPACE, "ops", |b| {
                b.spec.roles = vec!["missing".to_string()];
            })
            .await;
        h.reconcile_binding("ops").await.expect("second reconcile");

        let admin = mapping(&h, ADMIN_MAPPING).await.expect("foreign entries keep it");
        assert_eq!(admin.users, vec!["root"]);
        assert!(mapping(&h, READ_MAPPING).await.is_none());
        let status = h.binding("ops").await.status.expect("status written");
        assert_eq!(status.provisioned_roles, vec!["missing"]);
    }

    #[tokio::test]
    async fn removed_user_is_stripped_from_kept_roles() {
        let h = Harness::running().await;
        h.store
            .insert(&binding("ops", &["readall"], &["alice", "bob"], &[]))
            .await;
        h.reconcile_binding("ops").await.expect("first reconcile");

        h.store
            .modify::<OpensearchUserRoleBinding>(NAMESPACE, "ops", |b| {
                b.spec.users = vec!["bob".to_string()];
            })
            .await;
        h.reconcile_binding("ops").await.expect("second reconcile");

        let read = mapping(&h, READ_MAPPING).await.expect("mapping kept");
        assert_eq!(read.users, vec!["bob"]);
    }

    #[tokio::test]
    async fn deletion_releases_every_provisioned_entry() {
        let h = Harness::running().await;
        h.engine
            .seed(ADMIN_MAPPING, json!({"users": ["root"]}))
            .await;
        h.store
            .insert(&binding("ops", &["all_access", "readall"], &["alice"], &[]))
            .await;
        h.reconcile_binding("ops").await.expect("reconcile");

        h.delete_binding("ops").await;
        h.reconcile_binding("ops").await.expect("cleanup");

        assert_eq!(mapping(&h, ADMIN_MAPPING).await.expect("kept").users, vec!["root"]);
        assert!(mapping(&h, READ_MAPPING).await.is_none());
        assert!(h
            .store
            .fetch::<OpensearchUserRoleBinding>(NAMESPACE, "ops")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn waits_for_the_cluster() {
        let h = Harness::new();
        h.store
            .insert(&binding("ops", &["readall"], &["alice"], &[]))
            .await;

        let action = h.reconcile_binding("ops").await.expect("pending is not an error");
        assert_eq!(action, Action::requeue(REQUEUE_PENDING));
        let status = h.binding("ops").await.status.expect("status written");
        assert_eq!(status.common.state, Some(ResourceState::Pending));
        assert!(status.provisioned_roles.is_empty());
        assert!(h.events.has_reason(reasons::PENDING).await);
    }
}
