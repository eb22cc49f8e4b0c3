use crate::{
    artifact::{Artifact, ArtifactMetadata, ArtifactPage, ArtifactSummary, PageRequest},
    store::{validate_name, ObjectStore, StoreError},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{io, path::PathBuf};
use tokio::fs;

const METADATA_SUFFIX: &str = ".json";

/// Directory-backed store: `<root>/<name>` holds the image, `<root>/<name>.json` its metadata.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn content_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, METADATA_SUFFIX))
    }

    async fn read_metadata(&self, name: &str) -> Result<Option<ArtifactMetadata>, StoreError> {
        match fs::read(self.metadata_path(name)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn artifact_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(METADATA_SUFFIX) || validate_name(&name).is_err() {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn ensure_container(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn put_artifact(
        &self,
        name: &str,
        content: Bytes,
        metadata: &ArtifactMetadata,
    ) -> Result<(), StoreError> {
        validate_name(name)?;
        fs::create_dir_all(&self.root).await?;

        let sidecar = serde_json::to_vec(metadata)?;

        // Hidden while partial so listings never see a half-written frame.
        let partial = self.root.join(format!(".{}.partial", name));
        fs::write(&partial, &content).await?;
        if let Err(e) = fs::rename(&partial, self.content_path(name)).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }

        // Metadata only follows a stored image.
        fs::write(self.metadata_path(name), sidecar).await?;

        tracing::debug!("Stored artifact {} ({} bytes)", name, content.len());
        Ok(())
    }

    async fn get_artifact(&self, name: &str) -> Result<Option<Artifact>, StoreError> {
        validate_name(name)?;
        let content = match fs::read(self.content_path(name)).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let metadata = self.read_metadata(name).await?;

        Ok(Some(Artifact {
            name: name.to_string(),
            content: Bytes::from(content),
            metadata,
        }))
    }

    async fn list_artifacts(&self, page: &PageRequest) -> Result<ArtifactPage, StoreError> {
        let names = self.artifact_names().await?;
        let mut remaining = names
            .into_iter()
            .filter(|name| {
                page.marker
                    .as_deref()
                    .map_or(true, |marker| name.as_str() > marker)
            })
            .peekable();

        let mut items = Vec::new();
        while items.len() < page.max_results {
            let Some(name) = remaining.next() else {
                break;
            };
            let size = fs::metadata(self.content_path(&name))
                .await
                .map(|m| m.len())
                .ok();
            let metadata = self.read_metadata(&name).await?;
            items.push(ArtifactSummary {
                name,
                size,
                metadata,
            });
        }

        let next_marker = match remaining.peek() {
            Some(_) => items.last().map(|item| item.name.clone()),
            None => None,
        };

        Ok(ArtifactPage { items, next_marker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metadata(objects: &[&str]) -> ArtifactMetadata {
        ArtifactMetadata::new("19-Oct-2026-14-03-27.104233".to_string(), objects.iter().copied())
    }

    #[tokio::test]
    async fn test_put_then_get() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalDirStore::new(dir.path().join("frames"));
        store.ensure_container().await?;

        let content = Bytes::from_static(b"\xff\xd8jpeg");
        store
            .put_artifact("a_annotated.jpg", content.clone(), &metadata(&["dog", "person"]))
            .await?;

        let artifact = store.get_artifact("a_annotated.jpg").await?.unwrap();
        assert_eq!(artifact.content, content);
        assert_eq!(artifact.metadata, Some(metadata(&["dog", "person"])));

        assert!(store.get_artifact("missing.jpg").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = LocalDirStore::new(dir.path().to_path_buf());

        let result = store
            .put_artifact("../escape.jpg", Bytes::new(), &metadata(&[]))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
        assert!(matches!(
            store.get_artifact("../escape.jpg").await,
            Err(StoreError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pages_in_name_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalDirStore::new(dir.path().to_path_buf());
        for name in ["c.jpg", "a.jpg", "b.jpg"] {
            store
                .put_artifact(name, Bytes::from_static(b"x"), &metadata(&["cat"]))
                .await?;
        }

        let first = store.list_artifacts(&PageRequest::first(2)).await?;
        let names: Vec<_> = first.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert_eq!(first.next_marker.as_deref(), Some("b.jpg"));
        assert_eq!(first.items[0].size, Some(1));
        assert_eq!(first.items[0].metadata, Some(metadata(&["cat"])));

        let second = store
            .list_artifacts(&PageRequest::after("b.jpg", 2))
            .await?;
        let names: Vec<_> = second.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["c.jpg"]);
        assert!(second.next_marker.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalDirStore::new(dir.path().join("never-created"));
        let page = store.list_artifacts(&PageRequest::first(10)).await?;
        assert_eq!(page, ArtifactPage::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_image_write_leaves_no_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let root = dir.path().join("frames");
        let store = LocalDirStore::new(root.clone());

        // A non-empty directory squatting on the image path makes the rename fail.
        std::fs::create_dir_all(root.join("a_annotated.jpg"))?;
        std::fs::write(root.join("a_annotated.jpg").join("occupied"), b"x")?;

        let result = store
            .put_artifact(
                "a_annotated.jpg",
                Bytes::from_static(b"\xff\xd8jpeg"),
                &metadata(&["dog"]),
            )
            .await;

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!root.join("a_annotated.jpg.json").exists());
        assert!(!root.join(".a_annotated.jpg.partial").exists());
        Ok(())
    }
}
