#![forbid(unsafe_code)]

use anyhow::{Context, bail};
use forge_core::symbol::encode_component;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Thin JSON client for the Forge server.
pub struct ForgeClient {
    client: Client,
    base_url: String,
}

impl ForgeClient {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        Self::decode(path, response).await
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        Self::decode(path, response).await
    }

    async fn decode(path: &str, response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let detail = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unexpected server error");
            bail!("{path}: {status}: {detail}");
        }
        Ok(body)
    }

    pub async fn health(&self) -> anyhow::Result<Value> {
        self.get("/health").await
    }

    pub async fn states(&self) -> anyhow::Result<Value> {
        self.get("/v1/states").await
    }

    pub async fn create_state(&self, name: &str, from_state: Option<&str>) -> anyhow::Result<Value> {
        let mut body = serde_json::json!({"name": name});
        if let Some(from_state) = from_state {
            body["from_state"] = Value::from(from_state);
        }
        self.post("/v1/states", &body).await
    }

    pub async fn state(&self, name: &str) -> anyhow::Result<Value> {
        self.get(&format!("/v1/states/{}", encode_component(name))).await
    }

    pub async fn state_conflicts(&self, name: &str) -> anyhow::Result<Value> {
        self.get(&format!("/v1/states/{}/conflicts", encode_component(name)))
            .await
    }

    pub async fn promote(&self, source: &str, target: &str, author: &str) -> anyhow::Result<Value> {
        self.post(
            &format!("/v1/states/{}/promote", encode_component(source)),
            &serde_json::json!({"target_state": target, "author": author}),
        )
        .await
    }

    pub async fn submit_change_set(&self, change_set: &Value) -> anyhow::Result<Value> {
        self.post("/v1/change-sets", change_set).await
    }

    pub async fn change_sets(&self, state: Option<&str>) -> anyhow::Result<Value> {
        match state {
            Some(state) => {
                self.get(&format!("/v1/change-sets?state={}", encode_component(state)))
                    .await
            }
            None => self.get("/v1/change-sets").await,
        }
    }

    pub async fn change_set(&self, id: &str) -> anyhow::Result<Value> {
        self.get(&format!("/v1/change-sets/{id}")).await
    }

    pub async fn op(&self, id: &str) -> anyhow::Result<Value> {
        self.get(&format!("/v1/ops/{id}")).await
    }

    pub async fn conflict(&self, id: &str) -> anyhow::Result<Value> {
        self.get(&format!("/v1/conflicts/{id}")).await
    }

    pub async fn resolve(&self, id: &str, op: &Value) -> anyhow::Result<Value> {
        self.post(
            &format!("/v1/conflicts/{id}/resolve"),
            &serde_json::json!({"op": op}),
        )
        .await
    }
}
