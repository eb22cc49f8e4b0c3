use crate::{
    artifact::{Artifact, ArtifactMetadata, ArtifactPage, ArtifactSummary, PageRequest},
    store::{validate_name, ObjectStore, StoreError},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, Method, Request, RequestBuilder, Response, StatusCode,
};
use serde::Deserialize;
use sha2::Sha256;
use std::{collections::BTreeMap, fmt};
use url::Url;

const META_TIMESTAMP: &str = "x-ms-meta-timestamp";
const META_OBJECTS: &str = "x-ms-meta-objects";
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// How requests to the blob service are authorised.
#[derive(Clone)]
pub enum AzureCredentials {
    Anonymous,
    /// Container or account SAS token, appended to every request URL.
    Sas(String),
    /// Storage account name and key, signed into an `Authorization: SharedKey` header.
    SharedKey { account: String, key: Vec<u8> },
}

impl AzureCredentials {
    /// An account name and key win over a SAS token; a name without a key is rejected.
    pub fn from_parts(
        account_name: Option<&str>,
        account_key: Option<&str>,
        sas_token: &str,
    ) -> Result<Self, StoreError> {
        match (account_name, account_key) {
            (Some(account), Some(key)) => {
                let key = BASE64.decode(key.trim()).map_err(|e| {
                    StoreError::InvalidCredentials(format!("account key is not base64: {}", e))
                })?;
                Ok(Self::SharedKey {
                    account: account.to_string(),
                    key,
                })
            }
            (None, None) => {
                let sas_token = sas_token.trim_start_matches('?');
                if sas_token.is_empty() {
                    Ok(Self::Anonymous)
                } else {
                    Ok(Self::Sas(sas_token.to_string()))
                }
            }
            _ => Err(StoreError::InvalidCredentials(
                "account_name and account_key must be set together".to_string(),
            )),
        }
    }
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Sas(_) => f.write_str("Sas(..)"),
            Self::SharedKey { account, .. } => write!(f, "SharedKey({})", account),
        }
    }
}

/// Azure Blob Storage (cloud or the IoT Edge module) over its REST API.
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    client: Client,
    container_url: Url,
    credentials: AzureCredentials,
    api_version: String,
}

impl AzureBlobStore {
    pub fn new(
        endpoint: &str,
        container: &str,
        credentials: AzureCredentials,
        api_version: &str,
    ) -> Result<Self, StoreError> {
        let container_url = Url::parse(&format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            container
        ))?;

        Ok(Self {
            client: Client::new(),
            container_url,
            credentials,
            api_version: api_version.to_string(),
        })
    }

    fn container_request_url(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.container_url.clone();
        self.with_query(&mut url, params);
        url
    }

    fn blob_url(&self, name: &str) -> Url {
        let mut url = self.container_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(name);
        }
        self.with_query(&mut url, &[]);
        url
    }

    fn with_query(&self, url: &mut Url, params: &[(&str, &str)]) {
        if let AzureCredentials::Sas(token) = &self.credentials {
            url.set_query(Some(token));
        }
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let mut request = builder
            .header("x-ms-version", &self.api_version)
            .header("x-ms-date", Utc::now().format(HTTP_DATE_FORMAT).to_string())
            .build()?;
        self.authorize(&mut request)?;
        Ok(self.client.execute(request).await?)
    }

    /// Adds the `Authorization` header when signing with the account key.
    /// Every `x-ms-*` header must already be set.
    fn authorize(&self, request: &mut Request) -> Result<(), StoreError> {
        let AzureCredentials::SharedKey { account, key } = &self.credentials else {
            return Ok(());
        };

        let to_sign = string_to_sign(request.method(), request.url(), request.headers(), account);
        let mut mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|e| StoreError::InvalidCredentials(e.to_string()))?;
        mac.update(to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let value = HeaderValue::from_str(&format!("SharedKey {}:{}", account, signature))
            .map_err(|e| StoreError::InvalidCredentials(e.to_string()))?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
        Ok(())
    }

    async fn unexpected(operation: &'static str, response: Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StoreError::UnexpectedStatus {
            operation,
            status,
            body,
        }
    }
}

/// Shared Key string-to-sign for the blob service (versions 2015-02-21 and later).
fn string_to_sign(method: &Method, url: &Url, headers: &HeaderMap, account: &str) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    };
    // A zero length is signed as an empty field.
    let content_length = match header("content-length") {
        "0" => "",
        length => length,
    };

    let mut to_sign = [
        method.as_str(),
        header("content-encoding"),
        header("content-language"),
        content_length,
        header("content-md5"),
        header("content-type"),
        header("date"),
        header("if-modified-since"),
        header("if-match"),
        header("if-none-match"),
        header("if-unmodified-since"),
        header("range"),
    ]
    .join("\n");
    to_sign.push('\n');

    let mut ms_headers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers {
        if name.as_str().starts_with("x-ms-") {
            if let Ok(value) = value.to_str() {
                ms_headers.entry(name.as_str()).or_default().push(value.trim());
            }
        }
    }
    for (name, values) in &ms_headers {
        to_sign.push_str(&format!("{}:{}\n", name, values.join(",")));
    }

    to_sign.push_str(&format!("/{}{}", account, url.path()));
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        to_sign.push_str(&format!("\n{}:{}", name, values.join(",")));
    }

    to_sign
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn ensure_container(&self) -> Result<(), StoreError> {
        let response = self
            .send(
                self.client
                    .put(self.container_request_url(&[("restype", "container")]))
                    .header(header::CONTENT_LENGTH, "0"),
            )
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                tracing::info!("Created container {}", self.container_url);
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            _ => Err(Self::unexpected("create container", response).await),
        }
    }

    async fn put_artifact(
        &self,
        name: &str,
        content: Bytes,
        metadata: &ArtifactMetadata,
    ) -> Result<(), StoreError> {
        validate_name(name)?;
        let response = self
            .send(
                self.client
                    .put(self.blob_url(name))
                    .header("x-ms-blob-type", "BlockBlob")
                    .header(META_TIMESTAMP, &metadata.timestamp)
                    .header(META_OBJECTS, metadata.objects_field())
                    .header(header::CONTENT_TYPE, "image/jpeg")
                    .header(header::CONTENT_LENGTH, content.len().to_string())
                    .body(content),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::unexpected("put blob", response).await);
        }
        Ok(())
    }

    async fn get_artifact(&self, name: &str) -> Result<Option<Artifact>, StoreError> {
        validate_name(name)?;
        let response = self.send(self.client.get(self.blob_url(name))).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::unexpected("get blob", response).await);
        }

        let headers = response.headers();
        let timestamp = headers
            .get(META_TIMESTAMP)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let objects = headers
            .get(META_OBJECTS)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let metadata = timestamp.map(|ts| ArtifactMetadata::from_fields(&ts, &objects));

        Ok(Some(Artifact {
            name: name.to_string(),
            content: response.bytes().await?,
            metadata,
        }))
    }

    async fn list_artifacts(&self, page: &PageRequest) -> Result<ArtifactPage, StoreError> {
        let max_results = page.max_results.to_string();
        let mut params = vec![
            ("restype", "container"),
            ("comp", "list"),
            ("include", "metadata"),
            ("maxresults", max_results.as_str()),
        ];
        if let Some(marker) = page.marker.as_deref() {
            params.push(("marker", marker));
        }

        let response = self
            .send(self.client.get(self.container_request_url(&params)))
            .await?;

        if !response.status().is_success() {
            return Err(Self::unexpected("list blobs", response).await);
        }

        parse_listing(&response.text().await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    entries: Vec<BlobEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobEntry {
    name: String,
    #[serde(default)]
    properties: Option<BlobProperties>,
    #[serde(default)]
    metadata: Option<BlobMetadata>,
}

#[derive(Debug, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BlobMetadata {
    timestamp: Option<String>,
    objects: Option<String>,
}

fn parse_listing(xml: &str) -> Result<ArtifactPage, StoreError> {
    let results: EnumerationResults = quick_xml::de::from_str(xml)?;

    let items = results
        .blobs
        .entries
        .into_iter()
        .map(|entry| {
            let metadata = entry.metadata.and_then(|meta| {
                meta.timestamp.map(|ts| {
                    ArtifactMetadata::from_fields(&ts, meta.objects.as_deref().unwrap_or_default())
                })
            });
            ArtifactSummary {
                name: entry.name,
                size: entry.properties.and_then(|p| p.content_length),
                metadata,
            }
        })
        .collect();

    Ok(ArtifactPage {
        items,
        next_marker: results.next_marker.filter(|marker| !marker.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="http://azureblobstorageoniotedge:11002/edge/" ContainerName="frames">
  <MaxResults>2</MaxResults>
  <Blobs>
    <Blob>
      <Name>19-Oct-2026-14-03-27.104233_annotated.jpg</Name>
      <Properties>
        <Content-Length>48213</Content-Length>
        <Content-Type>image/jpeg</Content-Type>
        <BlobType>BlockBlob</BlobType>
      </Properties>
      <Metadata>
        <timestamp>19-Oct-2026-14-03-27.104233</timestamp>
        <objects>person,dog</objects>
      </Metadata>
    </Blob>
    <Blob>
      <Name>legacy.jpg</Name>
      <Properties>
        <Content-Length>10</Content-Length>
      </Properties>
      <Metadata />
    </Blob>
  </Blobs>
  <NextMarker>2!80!MDAwMDE2IWxlZ2FjeS5qcGch</NextMarker>
</EnumerationResults>"#;

    #[test]
    fn test_parse_listing() {
        let page = parse_listing(LISTING).unwrap();

        assert_eq!(page.items.len(), 2);
        let first = &page.items[0];
        assert_eq!(first.name, "19-Oct-2026-14-03-27.104233_annotated.jpg");
        assert_eq!(first.size, Some(48213));
        let metadata = first.metadata.as_ref().unwrap();
        assert_eq!(metadata.timestamp, "19-Oct-2026-14-03-27.104233");
        assert_eq!(metadata.objects, vec!["dog", "person"]);

        assert_eq!(page.items[1].name, "legacy.jpg");
        assert!(page.items[1].metadata.is_none());
        assert_eq!(
            page.next_marker.as_deref(),
            Some("2!80!MDAwMDE2IWxlZ2FjeS5qcGch")
        );
    }

    #[test]
    fn test_parse_last_page() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ContainerName="frames"><Blobs /><NextMarker /></EnumerationResults>"#;
        let page = parse_listing(xml).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_request_urls() {
        let store = AzureBlobStore::new(
            "http://azureblobstorageoniotedge:11002/edge/",
            "frames",
            AzureCredentials::from_parts(None, None, "?sv=2019-07-07&sig=abc%2B").unwrap(),
            "2019-07-07",
        )
        .unwrap();

        assert_eq!(
            store.blob_url("a_annotated.jpg").as_str(),
            "http://azureblobstorageoniotedge:11002/edge/frames/a_annotated.jpg?sv=2019-07-07&sig=abc%2B"
        );
        assert_eq!(
            store
                .container_request_url(&[("restype", "container"), ("marker", "2!80!a=")])
                .as_str(),
            "http://azureblobstorageoniotedge:11002/edge/frames?sv=2019-07-07&sig=abc%2B&restype=container&marker=2%2180%21a%3D"
        );
    }

    const ACCOUNT_KEY: &str =
        "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

    fn shared_key_store() -> AzureBlobStore {
        AzureBlobStore::new(
            "http://azureblobstorageoniotedge:11002/edge",
            "frames",
            AzureCredentials::from_parts(Some("edge"), Some(ACCOUNT_KEY), "").unwrap(),
            "2019-07-07",
        )
        .unwrap()
    }

    fn put_request(store: &AzureBlobStore) -> Request {
        Client::new()
            .put(store.blob_url("a_annotated.jpg"))
            .header("x-ms-version", "2019-07-07")
            .header("x-ms-date", "Mon, 19 Oct 2026 14:03:27 GMT")
            .header("x-ms-blob-type", "BlockBlob")
            .header(META_TIMESTAMP, "19-Oct-2026-14-03-27.104233")
            .header(META_OBJECTS, "dog,person")
            .header(header::CONTENT_TYPE, "image/jpeg")
            .header(header::CONTENT_LENGTH, "11")
            .body(Bytes::from_static(b"\xff\xd8jpeg-frame"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_put_blob_string_to_sign() {
        let store = shared_key_store();
        let request = put_request(&store);

        assert_eq!(
            string_to_sign(request.method(), request.url(), request.headers(), "edge"),
            "PUT\n\n\n11\n\nimage/jpeg\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Mon, 19 Oct 2026 14:03:27 GMT\n\
             x-ms-meta-objects:dog,person\n\
             x-ms-meta-timestamp:19-Oct-2026-14-03-27.104233\n\
             x-ms-version:2019-07-07\n\
             /edge/edge/frames/a_annotated.jpg"
        );
    }

    #[test]
    fn test_shared_key_authorization_header() {
        let store = shared_key_store();
        let mut request = put_request(&store);
        store.authorize(&mut request).unwrap();

        assert_eq!(
            request.headers()[header::AUTHORIZATION],
            "SharedKey edge:eDLhTnT0SVZUepzjTsAcWAM3WjDh8keKTN+0V4fphEM="
        );
        assert!(request.url().query().is_none());
    }

    #[test]
    fn test_list_string_to_sign_includes_sorted_query() {
        let store = shared_key_store();
        let request = Client::new()
            .get(store.container_request_url(&[
                ("restype", "container"),
                ("comp", "list"),
                ("maxresults", "2"),
                ("marker", "2!80!a="),
            ]))
            .header("x-ms-version", "2019-07-07")
            .header("x-ms-date", "Mon, 19 Oct 2026 14:03:27 GMT")
            .header(header::CONTENT_LENGTH, "0")
            .build()
            .unwrap();

        assert_eq!(
            string_to_sign(request.method(), request.url(), request.headers(), "edge"),
            "GET\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Mon, 19 Oct 2026 14:03:27 GMT\n\
             x-ms-version:2019-07-07\n\
             /edge/edge/frames\n\
             comp:list\n\
             marker:2!80!a=\n\
             maxresults:2\n\
             restype:container"
        );
    }

    #[test]
    fn test_sas_and_anonymous_requests_are_not_signed() {
        for credentials in [
            AzureCredentials::from_parts(None, None, "sv=2019-07-07&sig=abc").unwrap(),
            AzureCredentials::from_parts(None, None, "").unwrap(),
        ] {
            let store = AzureBlobStore::new(
                "http://azureblobstorageoniotedge:11002/edge",
                "frames",
                credentials,
                "2019-07-07",
            )
            .unwrap();
            let mut request = put_request(&store);
            store.authorize(&mut request).unwrap();
            assert!(request.headers().get(header::AUTHORIZATION).is_none());
        }
    }

    #[test]
    fn test_credentials_from_parts() {
        assert!(matches!(
            AzureCredentials::from_parts(Some("edge"), Some(ACCOUNT_KEY), "sv=x"),
            Ok(AzureCredentials::SharedKey { .. })
        ));
        assert!(matches!(
            AzureCredentials::from_parts(Some("edge"), None, ""),
            Err(StoreError::InvalidCredentials(_))
        ));
        assert!(matches!(
            AzureCredentials::from_parts(Some("edge"), Some("not base64!"), ""),
            Err(StoreError::InvalidCredentials(_))
        ));
        assert_eq!(
            format!("{:?}", AzureCredentials::from_parts(None, None, "sig=secret").unwrap()),
            "Sas(..)"
        );
    }
}
