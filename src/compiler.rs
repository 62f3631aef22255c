//! Schema compilation: every schema fragment of a service compiled into one
//! validate-only schema object.
//!
//! libxml2 compiles a single root document, so the namespace-keyed table is
//! materialized as files in a scratch directory and a generated root schema
//! imports each namespace from its file. Imports between table entries are
//! pointed at those files; any other relative location is made absolute
//! against the fragment's own source location.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use reqwest::Url;
use roxmltree::Node;
use tracing::{debug, info, warn};

use crate::error::{Result, SoapValidationError};
use crate::libxml2::{LibXml2Wrapper, XmlSchemaPtr};
use crate::matcher::MatchedOperation;
use crate::registry::resolve_location;
use crate::wsdl::{SchemaFragment, ServiceInfo};
use crate::xml::{XS_NS, serialize_element_with};

fn compile_error(details: impl fmt::Display) -> SoapValidationError {
    SoapValidationError::CompileError {
        details: details.to_string(),
    }
}

/// A compiled, read-only schema shared by every validation of one operation
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    inner: Arc<CompiledInner>,
}

#[derive(Debug)]
struct CompiledInner {
    schema: XmlSchemaPtr,
    namespaces: Vec<String>,
}

impl CompiledSchema {
    pub fn schema_ptr(&self) -> &XmlSchemaPtr {
        &self.inner.schema
    }

    /// Target namespaces that went into the compilation
    pub fn namespaces(&self) -> &[String] {
        &self.inner.namespaces
    }

    /// True when both handles come from the same compilation
    pub fn ptr_eq(&self, other: &CompiledSchema) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SchemaSource {
    system_id: String,
    document: String,
}

/// Namespace-keyed table of schema documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSet {
    sources: BTreeMap<String, SchemaSource>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `document` under `namespace`, replacing any earlier entry.
    pub fn insert(
        &mut self,
        namespace: impl Into<String>,
        system_id: impl Into<String>,
        document: impl Into<String>,
    ) {
        let namespace = namespace.into();
        let source = SchemaSource {
            system_id: system_id.into(),
            document: document.into(),
        };
        if self.sources.insert(namespace.clone(), source).is_some() {
            debug!(%namespace, "Schema namespace registered twice, keeping the later one");
        }
    }

    /// Register `document` unless `namespace` is already present.
    ///
    /// Returns whether it was inserted.
    pub fn insert_if_absent(
        &mut self,
        namespace: impl Into<String>,
        system_id: impl Into<String>,
        document: impl Into<String>,
    ) -> bool {
        let namespace = namespace.into();
        if self.sources.contains_key(&namespace) {
            return false;
        }
        self.insert(namespace, system_id, document);
        true
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.sources.contains_key(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Compile the whole table as one unit.
    pub fn compile(&self) -> Result<CompiledSchema> {
        if self.sources.is_empty() {
            return Err(compile_error("no schema to compile"));
        }

        let workdir = tempfile::Builder::new()
            .prefix("soap-validate-")
            .tempdir()
            .map_err(compile_error)?;

        let mut locations = BTreeMap::new();
        for (index, namespace) in self.sources.keys().enumerate() {
            let path = workdir.path().join(format!("schema{}.xsd", index));
            let url = Url::from_file_path(&path)
                .map_err(|_| compile_error(format!("invalid scratch path {}", path.display())))?;
            locations.insert(namespace.as_str(), (path, url));
        }

        let urls: BTreeMap<&str, &str> = locations
            .iter()
            .map(|(namespace, (_, url))| (*namespace, url.as_str()))
            .collect();

        for (namespace, source) in &self.sources {
            let document = localize_imports(source, &urls)?;
            if let Some((path, _)) = locations.get(namespace.as_str()) {
                std::fs::write(path, document).map_err(compile_error)?;
            }
        }

        let root = root_schema(&urls).map_err(compile_error)?;
        debug!(namespaces = self.sources.len(), "Parsing root schema");

        let schema = LibXml2Wrapper::new().parse_schema_from_memory(root.as_bytes())?;

        Ok(CompiledSchema {
            inner: Arc::new(CompiledInner {
                schema,
                namespaces: self.sources.keys().cloned().collect(),
            }),
        })
    }
}

/// Serialize `source` with every schema reference made loadable from disk
fn localize_imports(source: &SchemaSource, urls: &BTreeMap<&str, &str>) -> Result<String> {
    let doc = roxmltree::Document::parse(&source.document)
        .map_err(|e| compile_error(format!("{}: {}", source.system_id, e)))?;

    let rewrite = |node: Node<'_, '_>| -> Vec<(String, String)> {
        let is_import = node.has_tag_name((XS_NS, "import"));
        if is_import {
            let namespace = node.attribute("namespace").unwrap_or("");
            if let Some(url) = urls.get(namespace) {
                return vec![("schemaLocation".to_string(), url.to_string())];
            }
        }

        let is_reference = is_import
            || node.has_tag_name((XS_NS, "include"))
            || node.has_tag_name((XS_NS, "redefine"));
        match node.attribute("schemaLocation") {
            Some(location) if is_reference => vec![(
                "schemaLocation".to_string(),
                absolute_location(&source.system_id, location),
            )],
            _ => Vec::new(),
        }
    };

    serialize_element_with(doc.root_element(), &rewrite)
        .map_err(|e| compile_error(format!("{}: {}", source.system_id, e)))
}

fn absolute_location(system_id: &str, location: &str) -> String {
    let resolved = resolve_location(system_id, location);
    let path = Path::new(&resolved);
    if path.is_absolute() {
        if let Ok(url) = Url::from_file_path(path) {
            return url.to_string();
        }
    }
    resolved
}

/// `<xs:schema>` importing every namespace from its scratch file
fn root_schema(urls: &BTreeMap<&str, &str>) -> std::result::Result<String, quick_xml::Error> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut schema = BytesStart::new("xs:schema");
    schema.push_attribute(("xmlns:xs", XS_NS));
    writer.write_event(Event::Start(schema))?;

    for (namespace, url) in urls {
        let mut import = BytesStart::new("xs:import");
        if !namespace.is_empty() {
            import.push_attribute(("namespace", *namespace));
        }
        import.push_attribute(("schemaLocation", *url));
        writer.write_event(Event::Empty(import))?;
    }

    writer.write_event(Event::End(BytesEnd::new("xs:schema")))?;
    Ok(String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned())
}

/// Builds the schema table of a service and compiles it
#[derive(Debug, Clone, Default)]
pub struct SchemaCompiler;

impl SchemaCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Compile every schema attached to the matched operation's service
    pub fn compile(&self, matched: &MatchedOperation) -> Result<CompiledSchema> {
        let set = self.schema_set(matched.service())?;
        info!(
            service = %matched.service().name(),
            operation = %matched.operation().name(),
            namespaces = set.len(),
            "Compiling schema"
        );
        set.compile()
    }

    /// Namespace-keyed table of a service's schema fragments.
    ///
    /// Fragments declared by the service override each other in document
    /// order; documents reached only through imports never replace an entry.
    pub fn schema_set(&self, service: &ServiceInfo) -> Result<SchemaSet> {
        let mut set = SchemaSet::new();
        for fragment in service.schemas() {
            register(&mut set, fragment, true)?;
        }
        Ok(set)
    }
}

fn register(set: &mut SchemaSet, fragment: &SchemaFragment, declared: bool) -> Result<()> {
    if fragment.source_uri() == Some(XS_NS) || fragment.target_namespace() == Some(XS_NS) {
        return Ok(());
    }

    match fragment.target_namespace() {
        Some(namespace) => {
            let system_id = fragment.source_uri().unwrap_or(namespace);
            if declared {
                set.insert(namespace, system_id, fragment.document());
            } else if !set.insert_if_absent(namespace, system_id, fragment.document()) {
                return Ok(());
            }
            for external in fragment.externals() {
                register(set, external, false)?;
            }
            Ok(())
        }
        None if !fragment.externals().is_empty() => {
            for external in fragment.externals() {
                register(set, external, declared)?;
            }
            Ok(())
        }
        None if declared => Err(compile_error(format!(
            "schema without targetNamespace and no externals: {}",
            fragment.source_uri().unwrap_or("<unknown>")
        ))),
        None => {
            warn!(
                source = fragment.source_uri().unwrap_or("<unknown>"),
                "Skipping imported schema without targetNamespace"
            );
            Ok(())
        }
    }
}
