//! In-memory engine for reconciler tests
//!
//! [`FakeEngine`] implements [`Transport`] over a document map keyed by
//! route, answers with the response shapes of the real admin API and
//! records every request so tests can assert on the writes a reconcile
//! performed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::transport::{EngineRequest, EngineResponse, Method, Transport};
use crate::types::{CatShard, ClusterHealth};
use crate::ClientError;

const SECURITY_PREFIX: &str = "/_plugins/_security/api/";
const ISM_PREFIX: &str = "/_plugins/_ism/policies/";
const SM_PREFIX: &str = "/_plugins/_sm/policies/";

#[derive(Clone, Debug)]
struct Stored {
    body: Value,
    seq_no: i64,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<String, Stored>,
    next_seq_no: i64,
    health: ClusterHealth,
    transient: Map<String, Value>,
    shards: Vec<CatShard>,
    requests: Vec<EngineRequest>,
    failures: Vec<(u16, String)>,
}

impl State {
    fn store(&mut self, route: &str, body: Value) {
        self.next_seq_no += 1;
        self.documents.insert(
            route.to_string(),
            Stored {
                body,
                seq_no: self.next_seq_no,
            },
        );
    }
}

/// Fields the ISM plugin adds to a policy it returns
fn with_ism_bookkeeping(doc: &mut Value, id: &str, updated: i64) {
    let Some(obj) = doc.as_object_mut() else {
        return;
    };
    obj.insert("policy_id".to_string(), json!(id));
    obj.insert("schema_version".to_string(), json!(17));
    obj.insert("last_updated_time".to_string(), json!(updated));
    obj.entry("error_notification").or_insert(Value::Null);
    if let Some(templates) = obj.get_mut("ism_template").and_then(Value::as_array_mut) {
        for template in templates.iter_mut().filter_map(Value::as_object_mut) {
            template.insert("last_updated_time".to_string(), json!(updated));
        }
    }
    if let Some(states) = obj.get_mut("states").and_then(Value::as_array_mut) {
        for state in states {
            let Some(actions) = state.get_mut("actions").and_then(Value::as_array_mut) else {
                continue;
            };
            for action in actions.iter_mut().filter_map(Value::as_object_mut) {
                action
                    .entry("retry")
                    .or_insert_with(|| json!({"count": 3, "backoff": "exponential", "delay": "1m"}));
            }
        }
    }
}

/// Fields the snapshot management plugin adds to a policy it returns
fn with_sm_bookkeeping(doc: &mut Value, name: &str, updated: i64) {
    let Some(obj) = doc.as_object_mut() else {
        return;
    };
    obj.insert("name".to_string(), json!(name));
    obj.insert("schema_version".to_string(), json!(17));
    obj.insert("last_updated_time".to_string(), json!(updated));
    obj.insert("enabled_time".to_string(), json!(updated));
    obj.insert(
        "schedule".to_string(),
        json!({"interval": {"start_time": updated, "period": 1, "unit": "Minutes"}}),
    );
    obj.entry("enabled").or_insert(json!(true));
}

/// In-memory engine
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

fn ok(body: Value) -> EngineResponse {
    EngineResponse::json(200, &body)
}

fn not_found(route: &str) -> EngineResponse {
    EngineResponse::json(404, &json!({"status": "NOT_FOUND", "message": format!("{} not found", route)}))
}

fn conflict(route: &str) -> EngineResponse {
    EngineResponse::json(
        409,
        &json!({"error": {"type": "version_conflict_engine_exception", "reason": route}}),
    )
}

fn last_segment(route: &str) -> &str {
    route.rsplit('/').next().unwrap_or(route)
}

impl FakeEngine {
    /// Empty engine reporting red health
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document as if it had been written with PUT
    pub async fn seed(&self, route: &str, body: Value) {
        self.state.lock().await.store(route, body);
    }

    /// Stored body at a route
    pub async fn document(&self, route: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .documents
            .get(route)
            .map(|s| s.body.clone())
    }

    /// Set the reported cluster health
    pub async fn set_health(&self, health: ClusterHealth) {
        self.state.lock().await.health = health;
    }

    /// Set the reported shard rows
    pub async fn set_shards(&self, shards: Vec<CatShard>) {
        self.state.lock().await.shards = shards;
    }

    /// Fail the next request with the given status
    pub async fn fail_next(&self, status: u16, body: &str) {
        self.state
            .lock()
            .await
            .failures
            .push((status, body.to_string()));
    }

    /// Current transient value of a setting
    pub async fn transient_setting(&self, key: &str) -> Option<Value> {
        self.state.lock().await.transient.get(key).cloned()
    }

    /// Every request received, in order
    pub async fn requests(&self) -> Vec<EngineRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Requests that could change engine state
    pub async fn writes(&self) -> Vec<EngineRequest> {
        self.requests()
            .await
            .into_iter()
            .filter(|r| r.method != Method::Get)
            .collect()
    }

    /// Number of requests with the method whose route starts with `prefix`
    pub async fn count(&self, method: Method, prefix: &str) -> usize {
        self.requests()
            .await
            .iter()
            .filter(|r| r.method == method && r.route().starts_with(prefix))
            .count()
    }

    /// Forget recorded requests
    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    fn handle(state: &mut State, request: &EngineRequest) -> EngineResponse {
        let route = request.route().to_string();
        let body = request.body.clone().unwrap_or(Value::Null);

        match (request.method, route.as_str()) {
            (Method::Get, "/") => ok(json!({"name": "fake", "version": {"number": "2.11.0"}})),
            (Method::Get, "/_cluster/health") => ok(json!(state.health)),
            (Method::Get, "/_cluster/settings") => {
                ok(json!({"persistent": {}, "transient": state.transient}))
            }
            (Method::Put, "/_cluster/settings") => {
                if let Some(Value::Object(t)) = body.get("transient") {
                    for (k, v) in t {
                        if v.is_null() {
                            state.transient.remove(k);
                        } else {
                            state.transient.insert(k.clone(), v.clone());
                        }
                    }
                }
                ok(json!({"acknowledged": true}))
            }
            (Method::Get, "/_cat/shards") => ok(json!(state.shards)),
            (Method::Post, "/_flush") => ok(json!({"_shards": {"failed": 0}})),
            (_, r) if r.starts_with(SECURITY_PREFIX) => Self::security(state, request, r, body),
            (_, r) if r.starts_with(ISM_PREFIX) || r.starts_with(SM_PREFIX) => {
                Self::versioned(state, request, r, body)
            }
            (_, r) if r.starts_with("/_index_template/") => {
                Self::listed(state, request, r, body, "index_templates", "index_template")
            }
            (_, r) if r.starts_with("/_component_template/") => Self::listed(
                state,
                request,
                r,
                body,
                "component_templates",
                "component_template",
            ),
            (_, r) if r.starts_with("/_scripts/") => Self::scripts(state, request, r, body),
            (_, r) if r.starts_with("/_snapshot/") => Self::keyed(state, request, r, body),
            _ => EngineResponse::json(400, &json!({"error": format!("unsupported {}", route)})),
        }
    }

    fn delete(state: &mut State, route: &str) -> EngineResponse {
        match state.documents.remove(route) {
            Some(_) => ok(json!({"status": "OK"})),
            None => not_found(route),
        }
    }

    fn security(state: &mut State, request: &EngineRequest, route: &str, body: Value) -> EngineResponse {
        match request.method {
            Method::Get => match state.documents.get(route) {
                Some(stored) => {
                    let mut shown = stored.body.clone();
                    if let Some(obj) = shown.as_object_mut() {
                        obj.remove("password");
                        obj.insert("reserved".to_string(), json!(false));
                        obj.insert("hidden".to_string(), json!(false));
                        obj.insert("static".to_string(), json!(false));
                    }
                    ok(json!({ last_segment(route): shown }))
                }
                None => not_found(route),
            },
            Method::Put => {
                let created = !state.documents.contains_key(route);
                state.store(route, body);
                EngineResponse::json(
                    if created { 201 } else { 200 },
                    &json!({"status": if created { "CREATED" } else { "OK" }}),
                )
            }
            Method::Delete => Self::delete(state, route),
            Method::Post => EngineResponse::json(405, &json!({})),
        }
    }

    fn versioned(state: &mut State, request: &EngineRequest, route: &str, body: Value) -> EngineResponse {
        let ism = route.starts_with(ISM_PREFIX);
        let id = last_segment(route).to_string();
        let guard = request
            .query_param("if_seq_no")
            .and_then(|s| s.parse::<i64>().ok());

        match request.method {
            Method::Get => match state.documents.get(route) {
                Some(stored) => {
                    let key = if ism { "policy" } else { "sm_policy" };
                    let mut doc = if ism {
                        stored.body.get("policy").cloned().unwrap_or(Value::Null)
                    } else {
                        stored.body.clone()
                    };
                    if ism {
                        with_ism_bookkeeping(&mut doc, &id, stored.seq_no);
                    } else {
                        with_sm_bookkeeping(&mut doc, &id, stored.seq_no);
                    }
                    ok(json!({
                        "_id": id,
                        "_version": stored.seq_no,
                        "_seq_no": stored.seq_no,
                        "_primary_term": 1,
                        key: doc,
                    }))
                }
                None => not_found(route),
            },
            Method::Put | Method::Post => {
                let existing = state.documents.get(route).map(|s| s.seq_no);
                let is_update = request.method == Method::Put && (!ism || guard.is_some());
                match (existing, is_update) {
                    (Some(_), false) => conflict(route),
                    (None, true) => not_found(route),
                    (Some(seq), true) if guard != Some(seq) => conflict(route),
                    _ => {
                        state.store(route, body);
                        ok(json!({"_id": id}))
                    }
                }
            }
            Method::Delete => Self::delete(state, route),
        }
    }

    fn listed(
        state: &mut State,
        request: &EngineRequest,
        route: &str,
        body: Value,
        list_key: &str,
        item_key: &str,
    ) -> EngineResponse {
        match request.method {
            Method::Get => match state.documents.get(route) {
                Some(stored) => ok(json!({
                    list_key: [{ "name": last_segment(route), item_key: stored.body }]
                })),
                None => not_found(route),
            },
            Method::Put | Method::Post => {
                state.store(route, body);
                ok(json!({"acknowledged": true}))
            }
            Method::Delete => Self::delete(state, route),
        }
    }

    fn scripts(state: &mut State, request: &EngineRequest, route: &str, body: Value) -> EngineResponse {
        let id = last_segment(route);
        match request.method {
            Method::Get => match state.documents.get(route) {
                Some(stored) => ok(json!({
                    "_id": id,
                    "found": true,
                    "script": stored.body.get("script").cloned().unwrap_or(Value::Null),
                })),
                None => EngineResponse::json(404, &json!({"_id": id, "found": false})),
            },
            Method::Put | Method::Post => {
                state.store(route, body);
                ok(json!({"acknowledged": true}))
            }
            Method::Delete => Self::delete(state, route),
        }
    }

    fn keyed(state: &mut State, request: &EngineRequest, route: &str, body: Value) -> EngineResponse {
        match request.method {
            Method::Get => match state.documents.get(route) {
                Some(stored) => ok(json!({ last_segment(route): stored.body })),
                None => not_found(route),
            },
            Method::Put | Method::Post => {
                state.store(route, body);
                ok(json!({"acknowledged": true}))
            }
            Method::Delete => Self::delete(state, route),
        }
    }
}

#[async_trait]
impl Transport for FakeEngine {
    async fn send(&self, request: EngineRequest) -> Result<EngineResponse, ClientError> {
        let mut state = self.state.lock().await;
        state.requests.push(request.clone());
        if !state.failures.is_empty() {
            let (status, body) = state.failures.remove(0);
            return Ok(EngineResponse { status, body });
        }
        Ok(Self::handle(&mut state, &request))
    }
}
