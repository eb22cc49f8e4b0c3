use crate::{
    artifact::{Artifact, ArtifactMetadata, ArtifactPage, PageRequest},
    azure::{AzureBlobStore, AzureCredentials},
    local::LocalDirStore,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid store URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{operation} returned status {status}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("Malformed blob listing: {0}")]
    Listing(#[from] quick_xml::DeError),
    #[error("Malformed artifact metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("Invalid artifact name: {0:?}")]
    InvalidName(String),
    #[error("Invalid storage credentials: {0}")]
    InvalidCredentials(String),
}

/// Key-value byte storage for annotated frames, addressed by artifact name.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Creates the backing container if needed. An existing container is not an error.
    async fn ensure_container(&self) -> Result<(), StoreError>;

    async fn put_artifact(
        &self,
        name: &str,
        content: Bytes,
        metadata: &ArtifactMetadata,
    ) -> Result<(), StoreError>;

    /// `Ok(None)` when no artifact with that name exists.
    async fn get_artifact(&self, name: &str) -> Result<Option<Artifact>, StoreError>;

    /// Lists artifacts in name order, metadata included, one page per call.
    async fn list_artifacts(&self, page: &PageRequest) -> Result<ArtifactPage, StoreError>;
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    Local {
        root: PathBuf,
    },
    Azure {
        endpoint: String,
        container: String,
        #[serde(default)]
        sas_token: String,
        #[serde(default)]
        account_name: Option<String>,
        #[serde(default)]
        account_key: Option<String>,
        #[serde(default = "default_api_version")]
        api_version: String,
    },
}

fn default_api_version() -> String {
    "2019-07-07".to_string()
}

pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config {
        StoreConfig::Local { root } => Ok(Arc::new(LocalDirStore::new(root.clone()))),
        StoreConfig::Azure {
            endpoint,
            container,
            sas_token,
            account_name,
            account_key,
            api_version,
        } => {
            let credentials = AzureCredentials::from_parts(
                account_name.as_deref(),
                account_key.as_deref(),
                sas_token,
            )?;
            Ok(Arc::new(AzureBlobStore::new(
                endpoint,
                container,
                credentials,
                api_version,
            )?))
        }
    }
}

/// Artifact names are flat: no separators, no parent references, no hidden files.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("19-Oct-2026-14-03-27.104233_annotated.jpg").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a/b.jpg").is_err());
        assert!(validate_name("a b.jpg").is_err());
    }

    #[test]
    fn test_store_config_deserialize() {
        let local: StoreConfig =
            serde_json::from_str(r#"{"backend": "local", "root": "./frames"}"#).unwrap();
        assert!(matches!(local, StoreConfig::Local { root } if root == PathBuf::from("./frames")));

        let azure: StoreConfig = serde_json::from_str(
            r#"{"backend": "azure", "endpoint": "http://localhost:11002/acct", "container": "frames"}"#,
        )
        .unwrap();
        match azure {
            StoreConfig::Azure {
                sas_token,
                account_name,
                api_version,
                ..
            } => {
                assert!(sas_token.is_empty());
                assert!(account_name.is_none());
                assert_eq!(api_version, "2019-07-07");
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_build_azure_store_with_account_key() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"backend": "azure", "endpoint": "http://azureblobstorageoniotedge:11002/edge",
                "container": "frames", "account_name": "edge", "account_key": "c2VjcmV0"}"#,
        )
        .unwrap();
        assert!(build_store(&config).is_ok());

        let missing_key: StoreConfig = serde_json::from_str(
            r#"{"backend": "azure", "endpoint": "http://azureblobstorageoniotedge:11002/edge",
                "container": "frames", "account_name": "edge"}"#,
        )
        .unwrap();
        assert!(matches!(
            build_store(&missing_key),
            Err(StoreError::InvalidCredentials(_))
        ));
    }
}
