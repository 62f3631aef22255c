use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use soap_validate::error::{DocumentError, DocumentResult};
use soap_validate::registry::DocumentSource;

/// In-memory registry for testing resolution without touching the filesystem.
///
/// Documents live under `/mem/<api>/`. Every call is counted, may be delayed
/// to widen race windows, and can be switched to fail like an unreachable
/// registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    apis: HashMap<String, Vec<String>>,
    documents: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    failing: AtomicBool,
    definition_fetches: AtomicUsize,
    byte_fetches: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `api` with its documents; files ending in `.wsdl` make up
    /// the service definition.
    pub fn with_api(mut self, api: &str, files: &[(&str, &str)]) -> Self {
        let mut wsdls = Vec::new();
        for (name, content) in files {
            let location = format!("/mem/{}/{}", api, name);
            if name.ends_with(".wsdl") {
                wsdls.push(location.clone());
            }
            self.documents.insert(location, content.as_bytes().to_vec());
        }
        self.apis.insert(api.to_string(), wsdls);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn definition_fetches(&self) -> usize {
        self.definition_fetches.load(Ordering::SeqCst)
    }

    pub fn byte_fetches(&self) -> usize {
        self.byte_fetches.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentSource for InMemoryRegistry {
    async fn fetch_service_definition(&self, api_id: &str) -> DocumentResult<Vec<String>> {
        self.definition_fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(DocumentError::HttpStatus {
                url: format!("mem://{}", api_id),
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }

        self.apis
            .get(api_id)
            .cloned()
            .ok_or_else(|| DocumentError::ApiNotFound {
                path: format!("/mem/{}", api_id),
            })
    }

    async fn fetch_bytes(&self, location: &str) -> DocumentResult<Vec<u8>> {
        self.byte_fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        self.documents
            .get(location)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound {
                location: location.to_string(),
            })
    }
}
