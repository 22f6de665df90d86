//! Fixtures shared by the in-engine object controller tests

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use serde_json::json;

use opensearch_client::fake::FakeEngine;
use opensearch_common::config::OperatorConfig;
use opensearch_common::crd::{
    ClusterPhase, ClusterSpec, ClusterStatus, CronExpression, CronSchedule, GeneralConfig,
    IndexTemplateSpec, IsmPolicySpec, IsmState, IsmTransition, OpenSearchCluster,
    OpenSearchISMPolicy, OpensearchIndexTemplate, OpensearchRef, OpensearchRole,
    OpensearchSnapshotPolicy, OpensearchUser, OpensearchUserRoleBinding, RoleSpec,
    SecretKeyRef, SnapshotConfig, SnapshotCreation, SnapshotPolicySpec, TemplateBody,
    UserRoleBindingSpec, UserSpec,
};
use opensearch_common::k8s::{K8s, Object};
use opensearch_common::reconcile::ReconcilerOptions;
use opensearch_common::store::Propagation;
use opensearch_common::testing::{InMemoryStore, RecordingEventPublisher};
use opensearch_common::Error;

use crate::context::Context;
use crate::engine_object::{reconcile, EngineObject};

pub const NAMESPACE: &str = "search";
pub const CLUSTER: &str = "logs";
pub const CLUSTER_UID: &str = "cluster-uid";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<FakeEngine>,
    pub events: Arc<RecordingEventPublisher>,
    pub ctx: Arc<Context>,
}

impl Harness {
    /// Harness without any cluster
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(FakeEngine::new());
        let events = Arc::new(RecordingEventPublisher::new());
        let ctx = Context::from_parts(
            K8s::new(store.clone()),
            events.clone(),
            Arc::new(OperatorConfig::default()),
            ReconcilerOptions::default().with_transport(engine.clone()),
        );
        Self {
            store,
            engine,
            events,
            ctx: Arc::new(ctx),
        }
    }

    /// Harness with a running cluster
    pub async fn running() -> Self {
        let h = Self::new();
        h.store.insert(&running(cluster())).await;
        h
    }

    pub async fn get<O: Object>(&self, name: &str) -> O {
        self.store
            .fetch::<O>(NAMESPACE, name)
            .await
            .expect("resource should be stored")
    }

    /// Reconcile the stored copy of a resource, as the controller would
    pub async fn reconcile<O: EngineObject>(&self, name: &str) -> Result<Action, Error> {
        reconcile(Arc::new(self.get::<O>(name).await), self.ctx.clone()).await
    }

    /// Request deletion; the finalizer keeps the resource until cleanup
    pub async fn delete<O: Object>(&self, name: &str) {
        self.ctx
            .k8s
            .delete::<O>(NAMESPACE, name, Propagation::Background)
            .await
            .expect("delete should succeed");
    }

    pub async fn binding(&self, name: &str) -> OpensearchUserRoleBinding {
        self.get(name).await
    }

    pub async fn reconcile_binding(&self, name: &str) -> Result<Action, Error> {
        crate::binding::reconcile(Arc::new(self.binding(name).await), self.ctx.clone()).await
    }

    pub async fn delete_binding(&self, name: &str) {
        self.delete::<OpensearchUserRoleBinding>(name).await;
    }
}

fn meta(name: &str, uid: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(uid.to_string()),
        ..Default::default()
    }
}

fn opensearch_ref() -> OpensearchRef {
    OpensearchRef {
        name: CLUSTER.to_string(),
    }
}

pub fn cluster() -> OpenSearchCluster {
    let mut cluster = OpenSearchCluster::new(
        CLUSTER,
        ClusterSpec {
            general: GeneralConfig {
                service_name: CLUSTER.to_string(),
                version: "2.11.0".to_string(),
                http_port: 9200,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    cluster.metadata = meta(CLUSTER, CLUSTER_UID);
    cluster
}

pub fn running(mut cluster: OpenSearchCluster) -> OpenSearchCluster {
    cluster.status = Some(ClusterStatus {
        phase: ClusterPhase::Running,
        initialized: true,
        version: Some(cluster.spec.general.version.clone()),
        ..Default::default()
    });
    cluster
}

pub fn password_secret(name: &str, key: &str, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(password.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn user(name: &str, secret: &str) -> OpensearchUser {
    let mut user = OpensearchUser::new(
        name,
        UserSpec {
            opensearch_ref: opensearch_ref(),
            password_from: SecretKeyRef {
                name: secret.to_string(),
                key: "password".to_string(),
            },
            opendistro_security_roles: vec!["readall".to_string()],
            backend_roles: Vec::new(),
            attributes: BTreeMap::new(),
        },
    );
    user.metadata = meta(name, &format!("{}-uid", name));
    user
}

pub fn role(name: &str) -> OpensearchRole {
    let mut role = OpensearchRole::new(
        name,
        RoleSpec {
            opensearch_ref: opensearch_ref(),
            cluster_permissions: vec!["cluster_monitor".to_string()],
            index_permissions: Vec::new(),
            tenant_permissions: Vec::new(),
        },
    );
    role.metadata = meta(name, &format!("{}-uid", name));
    role
}

pub fn binding(
    name: &str,
    roles: &[&str],
    users: &[&str],
    backend_roles: &[&str],
) -> OpensearchUserRoleBinding {
    let strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect();
    let mut binding = OpensearchUserRoleBinding::new(
        name,
        UserRoleBindingSpec {
            opensearch_ref: opensearch_ref(),
            roles: strings(roles),
            users: strings(users),
            backend_roles: strings(backend_roles),
        },
    );
    binding.metadata = meta(name, &format!("{}-uid", name));
    binding
}

pub fn index_template(name: &str) -> OpensearchIndexTemplate {
    let mut template = OpensearchIndexTemplate::new(
        name,
        IndexTemplateSpec {
            opensearch_ref: opensearch_ref(),
            index_patterns: vec!["logs-*".to_string()],
            template: Some(TemplateBody {
                settings: Some(json!({"number_of_shards": 1})),
                ..Default::default()
            }),
            priority: Some(100),
            ..Default::default()
        },
    );
    template.metadata = meta(name, &format!("{}-uid", name));
    template
}

pub fn ism_policy(name: &str) -> OpenSearchISMPolicy {
    let mut policy = OpenSearchISMPolicy::new(
        name,
        IsmPolicySpec {
            opensearch_ref: opensearch_ref(),
            policy_id: None,
            description: Some("roll over hot indices".to_string()),
            default_state: "hot".to_string(),
            states: vec![
                IsmState {
                    name: "hot".to_string(),
                    actions: vec![json!({"rollover": {"min_index_age": "1d"}})],
                    transitions: vec![IsmTransition {
                        state_name: "delete".to_string(),
                        conditions: Some(json!({"min_index_age": "7d"})),
                    }],
                },
                IsmState {
                    name: "delete".to_string(),
                    actions: vec![json!({"delete": {}})],
                    transitions: Vec::new(),
                },
            ],
            ism_template: Vec::new(),
            error_notification: None,
        },
    );
    policy.metadata = meta(name, &format!("{}-uid", name));
    policy
}

pub fn snapshot_policy(name: &str) -> OpensearchSnapshotPolicy {
    let mut policy = OpensearchSnapshotPolicy::new(
        name,
        SnapshotPolicySpec {
            opensearch_ref: opensearch_ref(),
            policy_name: name.to_string(),
            description: None,
            enabled: Some(true),
            snapshot_config: SnapshotConfig {
                repository: "backups".to_string(),
                ..Default::default()
            },
            creation: SnapshotCreation {
                schedule: CronSchedule {
                    cron: CronExpression {
                        expression: "0 2 * * *".to_string(),
                        timezone: "UTC".to_string(),
                    },
                },
                time_limit: None,
            },
            deletion: None,
            notification: None,
        },
    );
    policy.metadata = meta(name, &format!("{}-uid", name));
    policy
}
