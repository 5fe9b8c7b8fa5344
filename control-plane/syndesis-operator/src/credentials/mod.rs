//! Service-account token lookup.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

const TOKEN_SECRET_TYPE: &str = "kubernetes.io/service-account-token";
const SA_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("no token secret for service account {namespace}/{name}")]
    NoToken { namespace: String, name: String },
    #[error("token secret {0} is not valid utf-8")]
    Encoding(String),
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn service_account_token(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<String, CredentialError>;
}

/// Reads the token from the secret the platform generated for the account.
pub struct KubeTokenSource {
    client: Client,
}

impl KubeTokenSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn token_of(secret: &Secret) -> Result<Option<String>, CredentialError> {
    if secret.type_.as_deref() != Some(TOKEN_SECRET_TYPE) {
        return Ok(None);
    }
    let Some(raw) = secret.data.as_ref().and_then(|d| d.get("token")) else {
        return Ok(None);
    };
    let name = secret.metadata.name.clone().unwrap_or_default();
    let token = String::from_utf8(raw.0.clone())
        .map_err(|_| CredentialError::Encoding(name))?;
    Ok(Some(token).filter(|t| !t.is_empty()))
}

fn belongs_to(secret: &Secret, sa_name: &str) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SA_NAME_ANNOTATION))
        .is_some_and(|n| n == sa_name)
}

#[async_trait]
impl TokenSource for KubeTokenSource {
    async fn service_account_token(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<String, CredentialError> {
        let accounts: Api<ServiceAccount> =
            Api::namespaced(self.client.clone(), namespace);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let sa = accounts.get(name).await?;
        for reference in sa.secrets.unwrap_or_default() {
            let Some(secret_name) = reference.name else {
                continue;
            };
            if let Some(secret) = secrets.get_opt(&secret_name).await? {
                if let Some(token) = token_of(&secret)? {
                    return Ok(token);
                }
            }
        }

        let lp = ListParams::default()
            .fields(&format!("type={TOKEN_SECRET_TYPE}"));
        for secret in secrets.list(&lp).await?.items {
            if belongs_to(&secret, name) {
                if let Some(token) = token_of(&secret)? {
                    return Ok(token);
                }
            }
        }
        debug!(%namespace, %name, "service account token not generated yet");
        Err(CredentialError::NoToken {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

/// Fixed token, or a permanently missing one when `None`.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenSource(pub Option<String>);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn service_account_token(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<String, CredentialError> {
        self.0.clone().ok_or_else(|| CredentialError::NoToken {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}
