//! Schema resolution: API identifier plus analyzed message to compiled schema.
//!
//! Two memoizing levels sit in front of the expensive work. The service model
//! of an API is built once from the registry; the schema of a matched
//! operation is compiled once per API, service and operation. Both levels are
//! single-flight and neither caches failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use crate::analyzer::AnalyzedMessage;
use crate::cache::{ResolverCache, SchemaKey};
use crate::compiler::{CompiledSchema, SchemaCompiler};
use crate::error::{Result, SoapValidationError};
use crate::matcher::OperationMatcher;
use crate::registry::DocumentSource;
use crate::wsdl::{ServiceModel, WsdlServiceBuilder};

/// Build counters and cache occupancy of one resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    /// Service models built (cache misses that ran the builder)
    pub service_model_builds: u64,
    /// Schemas compiled (cache misses that ran the compiler)
    pub schema_compilations: u64,
    pub cached_service_models: u64,
    pub cached_schemas: u64,
}

pub struct SchemaResolver {
    cache: Arc<ResolverCache>,
    documents: Arc<dyn DocumentSource>,
    builder: WsdlServiceBuilder,
    compiler: SchemaCompiler,
    service_model_builds: AtomicU64,
    schema_compilations: AtomicU64,
}

impl SchemaResolver {
    pub fn new(cache: Arc<ResolverCache>, documents: Arc<dyn DocumentSource>) -> Self {
        Self {
            cache,
            documents,
            builder: WsdlServiceBuilder::new(),
            compiler: SchemaCompiler::new(),
            service_model_builds: AtomicU64::new(0),
            schema_compilations: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<ResolverCache> {
        &self.cache
    }

    /// Find the compiled schema for the operation `message` addresses.
    ///
    /// Fails with `NoService` when the API's contract cannot be loaded or
    /// declares no service, `NoMatch` when no operation fits, `Conflict` when
    /// action and body disagree, and `CompileError` when the schemas do not
    /// compile.
    pub async fn resolve(&self, api_id: &str, message: &AnalyzedMessage) -> Result<CompiledSchema> {
        let model = self.service_model(api_id).await?;
        if model.is_empty() {
            return Err(SoapValidationError::NoService {
                api_id: api_id.to_string(),
                reason: "the service definition declares no service".to_string(),
            });
        }

        let matched = OperationMatcher::find(
            model.services(),
            message.action(),
            Some(message.body_name()),
        )?
        .ok_or_else(|| SoapValidationError::NoMatch {
            api_id: api_id.to_string(),
            action: message.action().unwrap_or_default().to_string(),
            body: message.body_name().to_string(),
        })?;

        let key = SchemaKey::new(api_id, &matched);
        debug!(%key, "Resolving compiled schema");

        self.cache
            .schemas()
            .get_or_load(key.clone(), || async move {
                self.schema_compilations.fetch_add(1, Ordering::Relaxed);
                let compiler = self.compiler.clone();
                let schema = tokio::task::spawn_blocking(move || compiler.compile(&matched))
                    .await
                    .map_err(|e| SoapValidationError::Concurrency {
                        details: format!("Schema compilation task failed: {}", e),
                    })??;
                info!(%key, "Schema compiled and cached");
                Ok::<_, SoapValidationError>(schema)
            })
            .await
    }

    async fn service_model(&self, api_id: &str) -> Result<Arc<ServiceModel>> {
        self.cache
            .service_models()
            .get_or_load(api_id, || async {
                self.service_model_builds.fetch_add(1, Ordering::Relaxed);
                let no_service = |reason: String| SoapValidationError::NoService {
                    api_id: api_id.to_string(),
                    reason,
                };

                let locations = self
                    .documents
                    .fetch_service_definition(api_id)
                    .await
                    .map_err(|e| no_service(e.to_string()))?;
                debug!(api_id, sources = locations.len(), "Building service model");

                let model = self
                    .builder
                    .build_services(self.documents.as_ref(), &locations)
                    .await
                    .map_err(|e| no_service(e.to_string()))?;

                info!(api_id, services = model.services().len(), "Service model cached");
                Ok::<_, SoapValidationError>(Arc::new(model))
            })
            .await
    }

    pub async fn stats(&self) -> ResolverStats {
        ResolverStats {
            service_model_builds: self.service_model_builds.load(Ordering::Relaxed),
            schema_compilations: self.schema_compilations.load(Ordering::Relaxed),
            cached_service_models: self.cache.service_models().entry_count().await,
            cached_schemas: self.cache.schemas().entry_count().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisResult, SoapAnalyzer};
    use crate::error::{DocumentError, DocumentResult};
    use crate::message::MessageContext;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const WSDL: &str = r#"<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/"
    xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
    xmlns:xs="http://www.w3.org/2001/XMLSchema"
    xmlns:tns="urn:ping" targetNamespace="urn:ping">
  <wsdl:types>
    <xs:schema targetNamespace="urn:ping" elementFormDefault="qualified">
      <xs:element name="Ping" type="xs:string"/>
    </xs:schema>
  </wsdl:types>
  <wsdl:message name="PingIn"><wsdl:part name="body" element="tns:Ping"/></wsdl:message>
  <wsdl:portType name="PingPort"><wsdl:operation name="Ping"><wsdl:input message="tns:PingIn"/></wsdl:operation></wsdl:portType>
  <wsdl:binding name="PingBinding" type="tns:PingPort">
    <soap:binding transport="http://schemas.xmlsoap.org/soap/http"/>
    <wsdl:operation name="Ping"><soap:operation soapAction="urn:ping"/></wsdl:operation>
  </wsdl:binding>
  <wsdl:service name="PingService"><wsdl:port name="p" binding="tns:PingBinding"/></wsdl:service>
</wsdl:definitions>"#;

    struct StaticSource {
        apis: HashMap<&'static str, &'static str>,
    }

    #[async_trait]
    impl DocumentSource for StaticSource {
        async fn fetch_service_definition(&self, api_id: &str) -> DocumentResult<Vec<String>> {
            if self.apis.contains_key(api_id) {
                Ok(vec![format!("/registry/{}/1/service.wsdl", api_id)])
            } else {
                Err(DocumentError::ApiNotFound {
                    path: format!("/registry/{}", api_id),
                })
            }
        }

        async fn fetch_bytes(&self, location: &str) -> DocumentResult<Vec<u8>> {
            self.apis
                .iter()
                .find(|(api, _)| location.starts_with(&format!("/registry/{}/", api)))
                .map(|(_, wsdl)| wsdl.as_bytes().to_vec())
                .ok_or_else(|| DocumentError::NotFound {
                    location: location.to_string(),
                })
        }
    }

    fn resolver() -> SchemaResolver {
        let source = StaticSource {
            apis: HashMap::from([("ping", WSDL)]),
        };
        SchemaResolver::new(Arc::new(ResolverCache::default()), Arc::new(source))
    }

    fn analyzed(body: &str) -> AnalyzedMessage {
        let envelope = format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>{}</s:Body></s:Envelope>"#,
            body
        );
        match SoapAnalyzer::analyze(&MessageContext::new(envelope).unwrap()).unwrap() {
            AnalysisResult::Message(message) => message,
            AnalysisResult::Fault => panic!("unexpected fault sentinel"),
        }
    }

    #[tokio::test]
    async fn test_resolve_caches_model_and_schema() {
        let resolver = resolver();
        let message = analyzed(r#"<Ping xmlns="urn:ping">hi</Ping>"#);

        let first = resolver.resolve("ping", &message).await.unwrap();
        let second = resolver.resolve("ping", &message).await.unwrap();

        assert!(first.ptr_eq(&second));
        let stats = resolver.stats().await;
        assert_eq!(stats.service_model_builds, 1);
        assert_eq!(stats.schema_compilations, 1);
        assert_eq!(stats.cached_service_models, 1);
        assert_eq!(stats.cached_schemas, 1);
    }

    #[tokio::test]
    async fn test_unknown_api_is_no_service_and_not_cached() {
        let resolver = resolver();
        let message = analyzed(r#"<Ping xmlns="urn:ping">hi</Ping>"#);

        for _ in 0..2 {
            let err = resolver.resolve("missing", &message).await.unwrap_err();
            assert!(matches!(err, SoapValidationError::NoService { .. }));
        }
        assert_eq!(resolver.stats().await.service_model_builds, 2);
    }

    #[tokio::test]
    async fn test_unknown_body_is_no_match() {
        let resolver = resolver();
        let message = analyzed(r#"<Foo xmlns="urn:ping"/>"#);

        let err = resolver.resolve("ping", &message).await.unwrap_err();
        assert!(matches!(err, SoapValidationError::NoMatch { .. }));
        assert!(err.to_string().contains("no service found"));
        assert_eq!(resolver.stats().await.schema_compilations, 0);
    }

    #[tokio::test]
    async fn test_invalidation_forces_rebuild() {
        let resolver = resolver();
        let message = analyzed(r#"<Ping xmlns="urn:ping">hi</Ping>"#);

        let first = resolver.resolve("ping", &message).await.unwrap();
        resolver.cache().invalidate_api("ping").await;
        let second = resolver.resolve("ping", &message).await.unwrap();

        assert!(!first.ptr_eq(&second));
        let stats = resolver.stats().await;
        assert_eq!(stats.service_model_builds, 2);
        assert_eq!(stats.schema_compilations, 2);
    }
}
