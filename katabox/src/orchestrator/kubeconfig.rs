//! Kubeconfig loading.
//!
//! Resolution order mirrors a k3s single-node install: an explicit path
//! wins, then the k3s system kubeconfig, then `~/.kube/config`, then the
//! in-cluster service account. Only the credential shapes the engine
//! needs are modeled: CA bundle, client certificate/key pair, and bearer
//! token.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::constants::filenames;
use crate::errors::{KataboxError, KataboxResult};

const IN_CLUSTER_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const IN_CLUSTER_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Resolved credentials for one control plane.
#[derive(Clone, Debug)]
pub struct ClusterAccess {
    /// Base URL, e.g. `https://127.0.0.1:6443`.
    pub server: String,
    /// PEM CA bundle to trust, when the kubeconfig pins one.
    pub ca_pem: Option<Vec<u8>>,
    /// PEM client certificate followed by its key, for mTLS auth.
    pub identity_pem: Option<Vec<u8>>,
    /// Bearer token, for token auth.
    pub token: Option<String>,
}

/// Load cluster access, probing the standard locations when `path` is
/// `None`.
pub fn load(path: Option<&Path>) -> KataboxResult<ClusterAccess> {
    if let Some(path) = path {
        return load_file(path);
    }

    let k3s = Path::new(filenames::K3S_KUBECONFIG);
    if k3s.exists() {
        return load_file(k3s);
    }

    if let Some(home) = dirs::home_dir() {
        let user_config = home.join(".kube").join("config");
        if user_config.exists() {
            return load_file(&user_config);
        }
    }

    load_in_cluster()
}

fn load_file(path: &Path) -> KataboxResult<ClusterAccess> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        KataboxError::Config(format!("cannot read kubeconfig {}: {}", path.display(), e))
    })?;
    let config: Kubeconfig = serde_yaml::from_str(&raw).map_err(|e| {
        KataboxError::Config(format!("malformed kubeconfig {}: {}", path.display(), e))
    })?;
    resolve(config, path.parent().unwrap_or_else(|| Path::new(".")))
}

fn load_in_cluster() -> KataboxResult<ClusterAccess> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST");
    let port = std::env::var("KUBERNETES_SERVICE_PORT");
    let (Ok(host), Ok(port)) = (host, port) else {
        return Err(KataboxError::Config(
            "no kubeconfig found and not running in-cluster".into(),
        ));
    };
    let token = std::fs::read_to_string(IN_CLUSTER_TOKEN)
        .map_err(|e| KataboxError::Config(format!("in-cluster token unreadable: {}", e)))?;
    let ca_pem = std::fs::read(IN_CLUSTER_CA).ok();
    Ok(ClusterAccess {
        server: format!("https://{}:{}", host, port),
        ca_pem,
        identity_pem: None,
        token: Some(token.trim().to_string()),
    })
}

fn resolve(config: Kubeconfig, base_dir: &Path) -> KataboxResult<ClusterAccess> {
    let context_name = config
        .current_context
        .as_deref()
        .or_else(|| config.contexts.first().map(|c| c.name.as_str()))
        .ok_or_else(|| KataboxError::Config("kubeconfig has no contexts".into()))?
        .to_string();

    let context = config
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .map(|c| &c.context)
        .ok_or_else(|| {
            KataboxError::Config(format!("kubeconfig context '{}' not found", context_name))
        })?;

    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| {
            KataboxError::Config(format!("kubeconfig cluster '{}' not found", context.cluster))
        })?;

    let user = config
        .users
        .iter()
        .find(|u| u.name == context.user)
        .map(|u| &u.user)
        .ok_or_else(|| {
            KataboxError::Config(format!("kubeconfig user '{}' not found", context.user))
        })?;

    let ca_pem = read_inline_or_file(
        cluster.certificate_authority_data.as_deref(),
        cluster.certificate_authority.as_deref(),
        base_dir,
        "certificate-authority",
    )?;

    let client_cert = read_inline_or_file(
        user.client_certificate_data.as_deref(),
        user.client_certificate.as_deref(),
        base_dir,
        "client-certificate",
    )?;
    let client_key = read_inline_or_file(
        user.client_key_data.as_deref(),
        user.client_key.as_deref(),
        base_dir,
        "client-key",
    )?;

    let identity_pem = match (client_cert, client_key) {
        (Some(mut cert), Some(key)) => {
            cert.extend_from_slice(b"\n");
            cert.extend_from_slice(&key);
            Some(cert)
        }
        (None, None) => None,
        _ => {
            return Err(KataboxError::Config(
                "kubeconfig user has a client certificate without a key (or vice versa)".into(),
            ));
        }
    };

    if identity_pem.is_none() && user.token.is_none() {
        return Err(KataboxError::Config(format!(
            "kubeconfig user '{}' carries no usable credentials",
            context.user
        )));
    }

    Ok(ClusterAccess {
        server: cluster.server.clone(),
        ca_pem,
        identity_pem,
        token: user.token.clone(),
    })
}

/// Inline base64 data wins over a file reference, matching kubeconfig
/// precedence.
fn read_inline_or_file(
    data: Option<&str>,
    file: Option<&str>,
    base_dir: &Path,
    what: &str,
) -> KataboxResult<Option<Vec<u8>>> {
    if let Some(data) = data {
        let decoded = BASE64
            .decode(data.trim())
            .map_err(|e| KataboxError::Config(format!("bad {} data: {}", what, e)))?;
        return Ok(Some(decoded));
    }
    if let Some(file) = file {
        let path = PathBuf::from(file);
        let path = if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        };
        let bytes = std::fs::read(&path).map_err(|e| {
            KataboxError::Config(format!("cannot read {} {}: {}", what, path.display(), e))
        })?;
        return Ok(Some(bytes));
    }
    Ok(None)
}

// --- wire model -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    server: String,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
    #[serde(rename = "certificate-authority", default)]
    certificate_authority: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-certificate", default)]
    client_certificate: Option<String>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
    #[serde(rename = "client-key", default)]
    client_key: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn b64(s: &str) -> String {
        BASE64.encode(s)
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_client_cert_config() {
        let config = format!(
            r#"
apiVersion: v1
current-context: default
clusters:
- name: default
  cluster:
    server: https://127.0.0.1:6443
    certificate-authority-data: {ca}
contexts:
- name: default
  context:
    cluster: default
    user: default
users:
- name: default
  user:
    client-certificate-data: {cert}
    client-key-data: {key}
"#,
            ca = b64("CA PEM"),
            cert = b64("CERT PEM"),
            key = b64("KEY PEM"),
        );
        let file = write_config(&config);
        let access = load(Some(file.path())).unwrap();
        assert_eq!(access.server, "https://127.0.0.1:6443");
        assert_eq!(access.ca_pem.as_deref(), Some(&b"CA PEM"[..]));
        let identity = String::from_utf8(access.identity_pem.unwrap()).unwrap();
        assert!(identity.starts_with("CERT PEM"));
        assert!(identity.ends_with("KEY PEM"));
        assert!(access.token.is_none());
    }

    #[test]
    fn test_load_token_config() {
        let config = r#"
apiVersion: v1
current-context: remote
clusters:
- name: remote
  cluster:
    server: https://cluster.example:6443
contexts:
- name: remote
  context:
    cluster: remote
    user: admin
users:
- name: admin
  user:
    token: sekrit
"#;
        let file = write_config(config);
        let access = load(Some(file.path())).unwrap();
        assert_eq!(access.token.as_deref(), Some("sekrit"));
        assert!(access.identity_pem.is_none());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = r#"
apiVersion: v1
current-context: default
clusters:
- name: default
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: default
  context:
    cluster: default
    user: default
users:
- name: default
  user: {}
"#;
        let file = write_config(config);
        assert!(matches!(
            load(Some(file.path())),
            Err(KataboxError::Config(_))
        ));
    }

    #[test]
    fn test_cert_without_key_rejected() {
        let config = format!(
            r#"
apiVersion: v1
current-context: default
clusters:
- name: default
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: default
  context:
    cluster: default
    user: default
users:
- name: default
  user:
    client-certificate-data: {cert}
"#,
            cert = b64("CERT PEM"),
        );
        let file = write_config(&config);
        assert!(matches!(
            load(Some(file.path())),
            Err(KataboxError::Config(_))
        ));
    }

    #[test]
    fn test_unreadable_path_is_config_error() {
        assert!(matches!(
            load(Some(Path::new("/nonexistent/kubeconfig"))),
            Err(KataboxError::Config(_))
        ));
    }
}
