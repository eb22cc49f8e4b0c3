mod artifact;
mod azure;
mod local;
mod store;

pub use artifact::{
    artifact_name, format_timestamp, Artifact, ArtifactMetadata, ArtifactPage, ArtifactSummary,
    PageRequest, ARTIFACT_SUFFIX, TIMESTAMP_FORMAT,
};
pub use azure::{AzureBlobStore, AzureCredentials};
pub use local::LocalDirStore;
pub use store::{build_store, validate_name, ObjectStore, StoreConfig, StoreError};
