//! HTTP implementation of the orchestrator seam.
//!
//! A thin, typed client over the control plane's REST API. All bodies are
//! the serde types in [`crate::objects`]; errors map through
//! [`super::error`]. List calls follow pagination to exhaustion.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Certificate, Identity, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{KataboxError, KataboxResult};
use crate::objects::{
    Deployment, NetworkPolicy, ObjectList, Pod, PodMetrics, Secret,
};

use super::error::{map_http_error, map_http_status, map_transport_error, StatusBody};
use super::kubeconfig::{self, ClusterAccess};
use super::{exec, ExecChannel, ExecRequest, Orchestrator};

/// Page size for list calls.
const LIST_PAGE_LIMIT: u32 = 500;

/// Orchestrator client speaking the Kubernetes-compatible REST API.
pub struct HttpOrchestrator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrchestrator {
    /// Connect using a kubeconfig, probing standard locations when `path`
    /// is `None`.
    pub fn from_kubeconfig(path: Option<&Path>) -> KataboxResult<Self> {
        let access = kubeconfig::load(path)?;
        Self::new(access)
    }

    /// Build a client from resolved cluster access.
    pub fn new(access: ClusterAccess) -> KataboxResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &access.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| KataboxError::Config("token contains invalid characters".into()))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            // Exec sessions are long-lived; bound only connection setup.
            .connect_timeout(Duration::from_secs(10))
            .http1_only();

        if let Some(ca) = &access.ca_pem {
            let cert = Certificate::from_pem(ca)
                .map_err(|e| KataboxError::Config(format!("bad cluster CA: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &access.identity_pem {
            let identity = Identity::from_pem(identity)
                .map_err(|e| KataboxError::Config(format!("bad client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| KataboxError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: access.server.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn into_error(response: reqwest::Response) -> KataboxError {
        let status = response.status();
        match response.json::<StatusBody>().await {
            Ok(body) => map_http_error(status, &body),
            Err(_) => map_http_status(status, "unparsable error body"),
        }
    }

    async fn create<B: Serialize + Sync>(&self, path: &str, body: &B) -> KataboxResult<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::into_error(response).await)
        }
    }

    async fn get_opt<T: DeserializeOwned>(&self, path: &str) -> KataboxResult<Option<T>> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::into_error(response).await);
        }
        let value = response.json().await.map_err(map_transport_error)?;
        Ok(Some(value))
    }

    /// DELETE, reporting whether the object existed.
    async fn delete(&self, path: &str) -> KataboxResult<bool> {
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::into_error(response).await);
        }
        Ok(true)
    }

    /// Paginated list: follows `continue` tokens until the cursor is
    /// exhausted.
    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        label_selector: &str,
    ) -> KataboxResult<Vec<T>> {
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> =
                vec![("limit", LIST_PAGE_LIMIT.to_string())];
            if !label_selector.is_empty() {
                query.push(("labelSelector", label_selector.to_string()));
            }
            if let Some(token) = &continue_token {
                query.push(("continue", token.clone()));
            }

            let response = self
                .client
                .get(self.url(path))
                .query(&query)
                .send()
                .await
                .map_err(map_transport_error)?;
            if !response.status().is_success() {
                return Err(Self::into_error(response).await);
            }
            let page: ObjectList<T> = response.json().await.map_err(map_transport_error)?;
            items.extend(page.items);

            continue_token = page.metadata.and_then(|m| m.continue_token);
            if continue_token.as_deref().unwrap_or("").is_empty() {
                return Ok(items);
            }
        }
    }
}

fn deployments_path(namespace: &str) -> String {
    format!("/apis/apps/v1/namespaces/{}/deployments", namespace)
}

fn secrets_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{}/secrets", namespace)
}

fn network_policies_path(namespace: &str) -> String {
    format!(
        "/apis/networking.k8s.io/v1/namespaces/{}/networkpolicies",
        namespace
    )
}

fn pods_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{}/pods", namespace)
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn create_deployment(&self, namespace: &str, body: &Deployment) -> KataboxResult<()> {
        self.create(&deployments_path(namespace), body).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> KataboxResult<Option<Deployment>> {
        self.get_opt(&format!("{}/{}", deployments_path(namespace), name))
            .await
    }

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> KataboxResult<Vec<Deployment>> {
        let path = match namespace {
            Some(ns) => deployments_path(ns),
            None => "/apis/apps/v1/deployments".to_string(),
        };
        self.list(&path, label_selector).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> KataboxResult<bool> {
        self.delete(&format!("{}/{}", deployments_path(namespace), name))
            .await
    }

    async fn create_secret(&self, namespace: &str, body: &Secret) -> KataboxResult<()> {
        self.create(&secrets_path(namespace), body).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> KataboxResult<bool> {
        self.delete(&format!("{}/{}", secrets_path(namespace), name))
            .await
    }

    async fn create_network_policy(
        &self,
        namespace: &str,
        body: &NetworkPolicy,
    ) -> KataboxResult<()> {
        self.create(&network_policies_path(namespace), body).await
    }

    async fn delete_network_policy(&self, namespace: &str, name: &str) -> KataboxResult<bool> {
        self.delete(&format!("{}/{}", network_policies_path(namespace), name))
            .await
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> KataboxResult<Vec<Pod>> {
        self.list(&pods_path(namespace), label_selector).await
    }

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> KataboxResult<Option<PodMetrics>> {
        self.get_opt(&format!(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods/{}",
            namespace, pod
        ))
        .await
    }

    async fn exec(&self, request: ExecRequest) -> KataboxResult<ExecChannel> {
        let mut query: Vec<(&str, String)> = request
            .command
            .iter()
            .map(|arg| ("command", arg.clone()))
            .collect();
        query.push(("stdout", "true".into()));
        query.push(("stderr", "true".into()));
        query.push(("stdin", request.stdin.to_string()));
        query.push(("tty", request.tty.to_string()));

        let response = self
            .client
            .get(self.url(&format!(
                "{}/{}/exec",
                pods_path(&request.namespace),
                request.pod
            )))
            .query(&query)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, exec::websocket_key())
            .header(header::SEC_WEBSOCKET_PROTOCOL, exec::SUBPROTOCOL)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(Self::into_error(response).await);
        }

        let upgraded = response.upgrade().await.map_err(map_transport_error)?;
        Ok(exec::channel_from_stream(upgraded, request.stdin))
    }
}
