//! Document retrieval: API identifier to WSDL locations, location to bytes.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use crate::error::{DocumentError, DocumentResult};
use crate::http_client::{AsyncHttpClient, HttpClientConfig};

/// Where service definitions and the documents they reference come from
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Locations of every WSDL document that makes up the API's contract
    async fn fetch_service_definition(&self, api_id: &str) -> DocumentResult<Vec<String>>;

    /// Raw content of a WSDL or XSD document
    async fn fetch_bytes(&self, location: &str) -> DocumentResult<Vec<u8>>;
}

/// File-based API registry.
///
/// Layout: `<root>/<api_id>/<revision>/*.wsdl`, where the highest numeric
/// revision wins. A revision may instead hold its WSDL files under
/// `archives/`. Remote `http(s)` references are downloaded.
pub struct RegistryDocumentSource {
    root: PathBuf,
    http: AsyncHttpClient,
}

impl RegistryDocumentSource {
    pub fn new(root: impl Into<PathBuf>, http_config: HttpClientConfig) -> DocumentResult<Self> {
        Ok(Self {
            root: root.into(),
            http: AsyncHttpClient::new(http_config)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn api_dir(&self, api_id: &str) -> Option<PathBuf> {
        let mut components = Path::new(api_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.root.join(api_id)),
            _ => None,
        }
    }
}

#[async_trait]
impl DocumentSource for RegistryDocumentSource {
    async fn fetch_service_definition(&self, api_id: &str) -> DocumentResult<Vec<String>> {
        let api_dir = self
            .api_dir(api_id)
            .ok_or_else(|| DocumentError::ApiNotFound {
                path: api_id.to_string(),
            })?;

        if !tokio::fs::metadata(&api_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(DocumentError::ApiNotFound {
                path: api_dir.display().to_string(),
            });
        }

        let revision = latest_revision(&api_dir).await?;
        debug!(api_id, revision = %revision.display(), "Resolved API revision");

        let mut wsdls = wsdl_files(&revision).await?;
        if wsdls.is_empty() {
            let archives = revision.join("archives");
            if tokio::fs::metadata(&archives).await.is_ok() {
                wsdls = wsdl_files(&archives).await?;
            }
        }

        if wsdls.is_empty() {
            return Err(DocumentError::WsdlNotFound {
                api_id: api_id.to_string(),
                path: revision.display().to_string(),
            });
        }

        Ok(wsdls
            .into_iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect())
    }

    async fn fetch_bytes(&self, location: &str) -> DocumentResult<Vec<u8>> {
        if is_remote(location) {
            return self.http.download_document(location).await;
        }

        let path = if location.starts_with("file:") {
            Url::parse(location)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| DocumentError::NotFound {
                    location: location.to_string(),
                })?
        } else {
            PathBuf::from(location)
        };

        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DocumentError::NotFound {
                location: location.to_string(),
            },
            _ => DocumentError::Io(e),
        })
    }
}

/// Highest numeric child directory, or `api_dir` itself when there is none
async fn latest_revision(api_dir: &Path) -> DocumentResult<PathBuf> {
    let mut latest: Option<(u64, PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(api_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(revision) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        else {
            continue;
        };
        if latest.as_ref().is_none_or(|(current, _)| revision > *current) {
            latest = Some((revision, entry.path()));
        }
    }

    Ok(latest
        .map(|(_, path)| path)
        .unwrap_or_else(|| api_dir.to_path_buf()))
}

async fn wsdl_files(dir: &Path) -> DocumentResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_wsdl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wsdl"));
        if is_wsdl && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn has_scheme(location: &str) -> bool {
    is_remote(location) || location.starts_with("file:")
}

/// Resolve `reference` against the location of the document that contains it.
///
/// URLs are joined as URLs; filesystem paths are joined to the parent
/// directory of `base` and lexically normalized, so the same document is
/// always named the same way.
pub fn resolve_location(base: &str, reference: &str) -> String {
    if has_scheme(reference) {
        return reference.to_string();
    }

    if has_scheme(base) {
        return Url::parse(base)
            .and_then(|url| url.join(reference))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| reference.to_string());
    }

    let reference_path = Path::new(reference);
    if reference_path.is_absolute() {
        return normalize(reference_path).to_string_lossy().into_owned();
    }

    let base_path = Path::new(base.split('#').next().unwrap_or(base));
    match base_path.parent() {
        Some(parent) => normalize(&parent.join(reference_path))
            .to_string_lossy()
            .into_owned(),
        None => reference.to_string(),
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn source(root: &Path) -> RegistryDocumentSource {
        RegistryDocumentSource::new(root, HttpClientConfig::default()).unwrap()
    }

    #[test]
    fn test_resolve_relative_path() {
        assert_eq!(
            resolve_location("/registry/users/2/users.wsdl", "common.xsd"),
            "/registry/users/2/common.xsd"
        );
        assert_eq!(
            resolve_location("/registry/users/2/users.wsdl#types1", "../shared/./types.xsd"),
            "/registry/users/shared/types.xsd"
        );
    }

    #[test]
    fn test_resolve_absolute_references() {
        assert_eq!(
            resolve_location("/registry/users/2/users.wsdl", "/opt/xsd/a.xsd"),
            "/opt/xsd/a.xsd"
        );
        assert_eq!(
            resolve_location("/registry/users/2/users.wsdl", "http://example.com/a.xsd"),
            "http://example.com/a.xsd"
        );
    }

    #[test]
    fn test_resolve_against_url() {
        assert_eq!(
            resolve_location("http://example.com/svc/users.wsdl", "xsd/common.xsd"),
            "http://example.com/svc/xsd/common.xsd"
        );
        assert_eq!(
            resolve_location("http://example.com/svc/users.wsdl#types1", "../common.xsd"),
            "http://example.com/common.xsd"
        );
    }

    #[tokio::test]
    async fn test_highest_numeric_revision_wins() {
        let temp = TempDir::new().unwrap();
        for revision in ["1", "2", "10", "latest"] {
            let dir = temp.path().join("users").join(revision);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("users-{}.wsdl", revision)), "<x/>").unwrap();
        }

        let locations = source(temp.path())
            .fetch_service_definition("users")
            .await
            .unwrap();

        assert_eq!(locations.len(), 1);
        assert!(locations[0].ends_with("users-10.wsdl"));
    }

    #[tokio::test]
    async fn test_all_wsdls_of_revision_are_returned() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("orders").join("3");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.wsdl"), "<x/>").unwrap();
        fs::write(dir.join("a.WSDL"), "<x/>").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let locations = source(temp.path())
            .fetch_service_definition("orders")
            .await
            .unwrap();

        assert_eq!(locations.len(), 2);
        assert!(locations[0].ends_with("a.WSDL"));
        assert!(locations[1].ends_with("b.wsdl"));
    }

    #[tokio::test]
    async fn test_archive_folder_is_used_as_fallback() {
        let temp = TempDir::new().unwrap();
        let archives = temp.path().join("billing").join("1").join("archives");
        fs::create_dir_all(&archives).unwrap();
        fs::write(archives.join("billing.wsdl"), "<x/>").unwrap();

        let locations = source(temp.path())
            .fetch_service_definition("billing")
            .await
            .unwrap();
        assert!(locations[0].ends_with("archives/billing.wsdl"));
    }

    #[tokio::test]
    async fn test_api_without_revisions_uses_api_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("flat");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("flat.wsdl"), "<x/>").unwrap();

        let locations = source(temp.path())
            .fetch_service_definition("flat")
            .await
            .unwrap();
        assert!(locations[0].ends_with("flat.wsdl"));
    }

    #[tokio::test]
    async fn test_missing_api_and_missing_wsdl() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("empty").join("1")).unwrap();
        let registry = source(temp.path());

        assert!(matches!(
            registry.fetch_service_definition("unknown").await,
            Err(DocumentError::ApiNotFound { .. })
        ));
        assert!(matches!(
            registry.fetch_service_definition("../escape").await,
            Err(DocumentError::ApiNotFound { .. })
        ));
        assert!(matches!(
            registry.fetch_service_definition("empty").await,
            Err(DocumentError::WsdlNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_bytes_from_path_and_file_url() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("common.xsd");
        fs::write(&file, "<xs:schema/>").unwrap();
        let registry = source(temp.path());

        let by_path = registry
            .fetch_bytes(file.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(by_path, b"<xs:schema/>");

        let url = Url::from_file_path(&file).unwrap();
        let by_url = registry.fetch_bytes(url.as_str()).await.unwrap();
        assert_eq!(by_url, by_path);

        let missing = registry
            .fetch_bytes(temp.path().join("nope.xsd").to_str().unwrap())
            .await;
        assert!(matches!(missing, Err(DocumentError::NotFound { .. })));
    }
}
