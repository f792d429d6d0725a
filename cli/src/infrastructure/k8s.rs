//! Kubernetes adapters
//!
//! Reads `Environment` and `Release` resources, records promote steps on
//! `PipelineActivity` resources and looks up exposed service URLs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, PostParams},
    Client, Config,
};
use serde_json::{json, Value};
use tracing::debug;

use super::activity::{ActivityStore, PromoteStep};
use crate::domain::environment::{
    EnvironmentConfig, EnvironmentKind, EnvironmentProvider, PromotionStrategy,
};
use crate::domain::release::{IssueSummary, ReleaseNotes, ReleaseSource};

const GROUP: &str = "jenkins.io";
const VERSION: &str = "v1";

/// Annotation carrying the URL a service is exposed on
pub const EXPOSE_URL_ANNOTATION: &str = "fabric8.io/exposeUrl";

/// Service exposing the team chart repository
pub const CHART_MUSEUM_SERVICE: &str = "jenkins-x-chartmuseum";

const MARKER_PREFIX: &str = "promote.jenkins.io/";

/// Create Kubernetes client
pub async fn create_client() -> Result<Client> {
    let config = Config::infer()
        .await
        .context("Failed to infer kubeconfig")?;

    Client::try_from(config).context("Failed to create Kubernetes client")
}

fn resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(GROUP, VERSION, kind), plural)
}

fn spec(object: &DynamicObject) -> &Value {
    object.data.get("spec").unwrap_or(&Value::Null)
}

fn str_field<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

/// Environment described by an `Environment` resource spec
pub fn environment_from_spec(name: &str, spec: &Value) -> EnvironmentConfig {
    let mut env = EnvironmentConfig::new(name);
    env.label = str_field(spec, "/label").to_string();
    env.namespace = str_field(spec, "/namespace").to_string();
    env.git_url = str_field(spec, "/source/url").to_string();
    env.promotion_strategy = match str_field(spec, "/promotionStrategy") {
        "Auto" | "Automatic" => PromotionStrategy::Automatic,
        "Never" => PromotionStrategy::Never,
        _ => PromotionStrategy::Manual,
    };
    env.kind = match str_field(spec, "/kind") {
        "Development" => EnvironmentKind::Development,
        "Preview" => EnvironmentKind::Preview,
        _ => EnvironmentKind::Permanent,
    };
    env.remote_cluster = spec
        .get("remoteCluster")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    env.order = spec
        .get("order")
        .and_then(Value::as_i64)
        .and_then(|order| i32::try_from(order).ok())
        .unwrap_or(0);
    env
}

/// Environments from `Environment` resources in the team namespace
pub struct KubeEnvironments {
    client: Client,
    namespace: String,
}

impl KubeEnvironments {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &self.namespace,
            &resource("Environment", "environments"),
        )
    }
}

#[async_trait]
impl EnvironmentProvider for KubeEnvironments {
    async fn list_environments(&self) -> Result<Vec<EnvironmentConfig>> {
        let list = self
            .api()
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list environments in {}", self.namespace))?;

        let mut environments: Vec<EnvironmentConfig> = list
            .items
            .iter()
            .filter_map(|object| {
                let name = object.metadata.name.as_deref()?;
                Some(environment_from_spec(name, spec(object)))
            })
            .collect();
        environments.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key.cmp(&b.key)));
        debug!("Found {} environments", environments.len());
        Ok(environments)
    }

    async fn git_url_for_environment(&self, key: &str) -> Result<Option<String>> {
        let env = self
            .api()
            .get_opt(key)
            .await
            .with_context(|| format!("Failed to get environment {}", key))?;
        Ok(env
            .map(|object| str_field(spec(&object), "/source/url").to_string())
            .filter(|url| !url.is_empty()))
    }
}

/// Promote step for `environment` in a `PipelineActivity` spec
pub fn find_promote_step(spec: &Value, environment: &str) -> Result<Option<PromoteStep>> {
    let Some(steps) = spec.get("steps").and_then(Value::as_array) else {
        return Ok(None);
    };
    for step in steps {
        if step.get("kind").and_then(Value::as_str) != Some("Promote") {
            continue;
        }
        if let Some(promote) = step.get("promote") {
            if str_field(promote, "/environment") == environment {
                let parsed = serde_json::from_value(promote.clone())
                    .context("Failed to parse promote step")?;
                return Ok(Some(parsed));
            }
        }
    }
    Ok(None)
}

/// Insert or replace the promote step for the step's environment
pub fn upsert_promote_step(spec: &mut Value, step: &PromoteStep) -> Result<()> {
    let promote = serde_json::to_value(step).context("Failed to serialize promote step")?;
    if !spec.is_object() {
        *spec = json!({});
    }
    let steps = spec
        .as_object_mut()
        .context("PipelineActivity spec is not an object")?
        .entry("steps")
        .or_insert_with(|| json!([]));
    if !steps.is_array() {
        *steps = json!([]);
    }
    let steps = steps
        .as_array_mut()
        .context("PipelineActivity steps are not a list")?;

    let existing = steps.iter_mut().find(|s| {
        s.get("kind").and_then(Value::as_str) == Some("Promote")
            && s.get("promote")
                .map(|p| str_field(p, "/environment") == step.environment)
                .unwrap_or(false)
    });
    match existing {
        Some(existing) => existing["promote"] = promote,
        None => steps.push(json!({"kind": "Promote", "promote": promote})),
    }
    Ok(())
}

/// Promote steps stored on `PipelineActivity` resources
pub struct KubeActivityStore {
    client: Client,
    namespace: String,
    pipeline: String,
    build: String,
}

impl KubeActivityStore {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        pipeline: impl Into<String>,
        build: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            pipeline: pipeline.into(),
            build: build.into(),
        }
    }

    fn api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &self.namespace,
            &resource("PipelineActivity", "pipelineactivities"),
        )
    }

    /// Fetch the activity, creating an empty one when absent
    async fn get_or_create(&self, name: &str) -> Result<DynamicObject> {
        let api = self.api();
        if let Some(object) = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get pipeline activity {}", name))?
        {
            return Ok(object);
        }

        let object = DynamicObject::new(name, &resource("PipelineActivity", "pipelineactivities"))
            .within(&self.namespace)
            .data(json!({
                "spec": {
                    "pipeline": self.pipeline,
                    "build": self.build,
                    "steps": [],
                }
            }));
        api.create(&PostParams::default(), &object)
            .await
            .with_context(|| format!("Failed to create pipeline activity {}", name))
    }

    async fn replace(&self, name: &str, object: &DynamicObject) -> Result<()> {
        self.api()
            .replace(name, &PostParams::default(), object)
            .await
            .with_context(|| format!("Failed to update pipeline activity {}", name))?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for KubeActivityStore {
    async fn load_step(&self, activity: &str, environment: &str) -> Result<Option<PromoteStep>> {
        match self
            .api()
            .get_opt(activity)
            .await
            .with_context(|| format!("Failed to get pipeline activity {}", activity))?
        {
            Some(object) => find_promote_step(spec(&object), environment),
            None => Ok(None),
        }
    }

    async fn save_step(&self, activity: &str, step: &PromoteStep) -> Result<()> {
        let mut object = self.get_or_create(activity).await?;
        let spec = object
            .data
            .as_object_mut()
            .context("PipelineActivity is not an object")?
            .entry("spec")
            .or_insert_with(|| json!({}));
        upsert_promote_step(spec, step)?;
        self.replace(activity, &object).await
    }

    async fn has_marker(&self, activity: &str, marker: &str) -> Result<bool> {
        let key = format!("{}{}", MARKER_PREFIX, marker);
        let object = self
            .api()
            .get_opt(activity)
            .await
            .with_context(|| format!("Failed to get pipeline activity {}", activity))?;
        Ok(object
            .and_then(|o| o.metadata.annotations)
            .map(|annotations| annotations.get(&key).map(String::as_str) == Some("true"))
            .unwrap_or(false))
    }

    async fn set_marker(&self, activity: &str, marker: &str) -> Result<()> {
        let mut object = self.get_or_create(activity).await?;
        object
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(format!("{}{}", MARKER_PREFIX, marker), "true".to_string());
        self.replace(activity, &object).await
    }
}

/// Release notes described by a `Release` resource spec
pub fn release_notes_from_spec(spec: &Value) -> ReleaseNotes {
    let issues = spec
        .get("issues")
        .and_then(Value::as_array)
        .map(|issues| {
            issues
                .iter()
                .map(|issue| IssueSummary {
                    id: str_field(issue, "/id").to_string(),
                    url: str_field(issue, "/url").to_string(),
                    title: str_field(issue, "/title").to_string(),
                    state: str_field(issue, "/state").to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    ReleaseNotes {
        name: str_field(spec, "/name").to_string(),
        version: str_field(spec, "/version").to_string(),
        release_notes_url: str_field(spec, "/releaseNotesURL").to_string(),
        git_http_url: str_field(spec, "/gitHttpURL").to_string(),
        issues,
    }
}

/// Exposed URL annotated on a service
pub fn expose_url(service: &Service) -> Option<String> {
    service
        .metadata
        .annotations
        .as_ref()?
        .get(EXPOSE_URL_ANNOTATION)
        .map(|url| url.trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
}

/// Exposed URL of the service `name` in `namespace`
pub async fn service_url(client: &Client, namespace: &str, name: &str) -> Result<Option<String>> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let service = services
        .get_opt(name)
        .await
        .with_context(|| format!("Failed to get service {} in {}", name, namespace))?;
    Ok(service.as_ref().and_then(expose_url))
}

/// Releases and services read from the cluster
pub struct KubeReleases {
    client: Client,
}

impl KubeReleases {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReleaseSource for KubeReleases {
    async fn find_release(&self, namespace: &str, name: &str) -> Result<Option<ReleaseNotes>> {
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &resource("Release", "releases"),
        );
        let release = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get release {} in {}", name, namespace))?;
        Ok(release.map(|object| release_notes_from_spec(spec(&object))))
    }

    async fn application_url(&self, namespace: &str, services: &[String]) -> Result<Option<String>> {
        for name in services {
            if let Some(url) = service_url(&self.client, namespace, name).await? {
                return Ok(Some(url));
            }
        }
        Ok(None)
    }
}
