//! Index, component and search templates

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::{json, Map, Value};

use opensearch_client::compare::{payload_eq, semantic_eq};
use opensearch_client::types::ScriptPayload;
use opensearch_client::OpenSearchClient;
use opensearch_common::crd::{
    ComponentTemplateSpec, EngineObjectStatus, IndexAlias, IndexTemplateSpec,
    OpensearchComponentTemplate, OpensearchIndexTemplate, OpensearchRef, OpensearchSearchTemplate,
    TemplateBody,
};
use opensearch_common::Error;

use crate::body::{index_settings, without_nulls};
use crate::context::Context;
use crate::engine_object::EngineObject;

const DEFAULT_TIMESTAMP_FIELD: &str = "@timestamp";

fn alias_body(alias: &IndexAlias) -> Value {
    without_nulls(json!({
        "filter": alias.filter,
        "index_routing": alias.index_routing,
        "search_routing": alias.search_routing,
        "routing": alias.routing,
        "is_write_index": alias.is_write_index,
    }))
}

fn template_body(template: &TemplateBody) -> Value {
    let aliases: Map<String, Value> = template
        .aliases
        .iter()
        .map(|(name, alias)| (name.clone(), alias_body(alias)))
        .collect();
    let aliases = (!aliases.is_empty()).then_some(Value::Object(aliases));
    without_nulls(json!({
        "settings": template.settings.as_ref().map(index_settings),
        "mappings": template.mappings,
        "aliases": aliases,
    }))
}

/// Engine body of an index template
pub fn index_template_body(spec: &IndexTemplateSpec) -> Value {
    let data_stream = spec.data_stream.as_ref().map(|ds| {
        let field = ds.timestamp_field.as_deref().unwrap_or(DEFAULT_TIMESTAMP_FIELD);
        json!({ "timestamp_field": { "name": field } })
    });
    without_nulls(json!({
        "index_patterns": spec.index_patterns,
        "data_stream": data_stream,
        "template": spec.template.as_ref().map(template_body),
        "composed_of": spec.composed_of,
        "priority": spec.priority,
        "version": spec.version,
        "_meta": spec.meta,
    }))
}

/// Engine body of a component template
pub fn component_template_body(spec: &ComponentTemplateSpec) -> Value {
    without_nulls(json!({
        "template": template_body(&spec.template),
        "version": spec.version,
        "allow_auto_create": spec.allow_auto_create,
        "_meta": spec.meta,
    }))
}

#[async_trait]
impl EngineObject for OpensearchIndexTemplate {
    const KIND: &'static str = "IndexTemplate";
    type Payload = Value;
    type Current = Value;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn engine_name(&self) -> String {
        self.spec.name.clone().unwrap_or_else(|| self.name_any())
    }

    async fn desired(&self, _ctx: &Context) -> Result<Value, Error> {
        Ok(index_template_body(&self.spec))
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<Value>, Error> {
        Ok(client.get_index_template(name).await?)
    }

    fn in_sync(&self, current: &Value, desired: &Value) -> bool {
        semantic_eq(current, desired)
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        _current: Option<&Value>,
        desired: &Value,
    ) -> Result<(), Error> {
        Ok(client.put_index_template(name, desired).await?)
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_index_template(name).await?)
    }
}

#[async_trait]
impl EngineObject for OpensearchComponentTemplate {
    const KIND: &'static str = "ComponentTemplate";
    type Payload = Value;
    type Current = Value;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn engine_name(&self) -> String {
        self.spec.name.clone().unwrap_or_else(|| self.name_any())
    }

    async fn desired(&self, _ctx: &Context) -> Result<Value, Error> {
        Ok(component_template_body(&self.spec))
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<Value>, Error> {
        Ok(client.get_component_template(name).await?)
    }

    fn in_sync(&self, current: &Value, desired: &Value) -> bool {
        semantic_eq(current, desired)
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        _current: Option<&Value>,
        desired: &Value,
    ) -> Result<(), Error> {
        Ok(client.put_component_template(name, desired).await?)
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_component_template(name).await?)
    }
}

#[async_trait]
impl EngineObject for OpensearchSearchTemplate {
    const KIND: &'static str = "SearchTemplate";
    type Payload = ScriptPayload;
    type Current = ScriptPayload;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn engine_name(&self) -> String {
        self.spec.name.clone().unwrap_or_else(|| self.name_any())
    }

    async fn desired(&self, _ctx: &Context) -> Result<ScriptPayload, Error> {
        Ok(ScriptPayload {
            lang: self.spec.lang.clone(),
            source: self.spec.source.clone(),
        })
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<ScriptPayload>, Error> {
        Ok(client.get_script(name).await?)
    }

    fn in_sync(&self, current: &ScriptPayload, desired: &ScriptPayload) -> bool {
        payload_eq(current, desired)
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        _current: Option<&ScriptPayload>,
        desired: &ScriptPayload,
    ) -> Result<(), Error> {
        Ok(client.put_script(name, desired).await?)
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_script(name).await?)
    }
}
