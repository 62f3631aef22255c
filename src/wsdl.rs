//! WSDL 1.1 service model and the builder that produces it.
//!
//! The model mirrors what the matcher and compiler need: services own their
//! bindings and the schema fragments of their contract, bindings own operations,
//! operations own the message parts of their input, output and faults.
//!
//! Building happens in two phases. Documents (WSDL imports and referenced XSD
//! files) are first fetched through a [`DocumentSource`]; the model is then
//! assembled synchronously from the loaded text.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use roxmltree::{Document, Node};
use tracing::{debug, info};

use crate::error::{WsdlError, WsdlResult};
use crate::message::SoapVersion;
use crate::registry::{DocumentSource, resolve_location};
use crate::xml::{
    QName, WSDL_NS, WSDL_SOAP11_NS, WSDL_SOAP12_NS, XS_NS, child_element, child_elements,
    resolve_qname, serialize_element,
};

/// All services described by the WSDL sources of one API
#[derive(Debug, Clone, Default)]
pub struct ServiceModel {
    services: Vec<Arc<ServiceInfo>>,
}

impl ServiceModel {
    pub fn new(services: Vec<Arc<ServiceInfo>>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[Arc<ServiceInfo>] {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceInfo {
    name: QName,
    bindings: Vec<BindingInfo>,
    schemas: Vec<Arc<SchemaFragment>>,
}

impl ServiceInfo {
    pub fn new(name: QName, bindings: Vec<BindingInfo>, schemas: Vec<Arc<SchemaFragment>>) -> Self {
        Self {
            name,
            bindings,
            schemas,
        }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn bindings(&self) -> &[BindingInfo] {
        &self.bindings
    }

    /// Schema fragments of the contract, in document order
    pub fn schemas(&self) -> &[Arc<SchemaFragment>] {
        &self.schemas
    }
}

#[derive(Debug, Clone)]
pub struct BindingInfo {
    name: QName,
    soap_version: Option<SoapVersion>,
    operations: Vec<Arc<OperationInfo>>,
}

impl BindingInfo {
    pub fn new(
        name: QName,
        soap_version: Option<SoapVersion>,
        operations: Vec<Arc<OperationInfo>>,
    ) -> Self {
        Self {
            name,
            soap_version,
            operations,
        }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    /// `None` for non-SOAP bindings
    pub fn soap_version(&self) -> Option<SoapVersion> {
        self.soap_version
    }

    pub fn operations(&self) -> &[Arc<OperationInfo>] {
        &self.operations
    }
}

/// A bound operation
#[derive(Debug, Clone)]
pub struct OperationInfo {
    name: QName,
    action: Option<String>,
    input: Option<MessageInfo>,
    output: Option<MessageInfo>,
    faults: Vec<MessageInfo>,
}

impl OperationInfo {
    pub fn new(name: QName, action: Option<&str>) -> Self {
        Self {
            name,
            action: action.filter(|a| !a.is_empty()).map(str::to_string),
            input: None,
            output: None,
            faults: Vec::new(),
        }
    }

    pub fn with_input(mut self, message: MessageInfo) -> Self {
        self.input = Some(message);
        self
    }

    pub fn with_output(mut self, message: MessageInfo) -> Self {
        self.output = Some(message);
        self
    }

    pub fn with_fault(mut self, message: MessageInfo) -> Self {
        self.faults.push(message);
        self
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    /// Declared SOAPAction; `None` when absent or empty
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn input(&self) -> Option<&MessageInfo> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&MessageInfo> {
        self.output.as_ref()
    }

    pub fn faults(&self) -> &[MessageInfo] {
        &self.faults
    }
}

#[derive(Debug, Clone)]
pub struct MessageInfo {
    name: QName,
    parts: Vec<MessagePart>,
}

impl MessageInfo {
    pub fn new(name: QName, parts: Vec<MessagePart>) -> Self {
        Self { name, parts }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePart {
    name: String,
    element: Option<QName>,
    type_name: Option<QName>,
}

impl MessagePart {
    /// Document/literal part referencing a global element
    pub fn element(name: impl Into<String>, element: QName) -> Self {
        Self {
            name: name.into(),
            element: Some(element),
            type_name: None,
        }
    }

    /// RPC-style part referencing a type
    pub fn typed(name: impl Into<String>, type_name: QName) -> Self {
        Self {
            name: name.into(),
            element: None,
            type_name: Some(type_name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_name(&self) -> Option<&QName> {
        self.element.as_ref()
    }

    pub fn type_name(&self) -> Option<&QName> {
        self.type_name.as_ref()
    }
}

/// One XML Schema document belonging to a contract.
///
/// Embedded `types` schemas carry every namespace binding that was in scope in
/// the WSDL. `externals` lists the documents pulled in through
/// `xs:import/@schemaLocation`, each one again a fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFragment {
    source_uri: Option<String>,
    target_namespace: Option<String>,
    document: String,
    externals: Vec<Arc<SchemaFragment>>,
}

impl SchemaFragment {
    pub fn new(
        source_uri: Option<&str>,
        target_namespace: Option<&str>,
        document: impl Into<String>,
        externals: Vec<Arc<SchemaFragment>>,
    ) -> Self {
        Self {
            source_uri: source_uri.map(str::to_string),
            target_namespace: target_namespace
                .filter(|ns| !ns.is_empty())
                .map(str::to_string),
            document: document.into(),
            externals,
        }
    }

    pub fn source_uri(&self) -> Option<&str> {
        self.source_uri.as_deref()
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn externals(&self) -> &[Arc<SchemaFragment>] {
        &self.externals
    }
}

/// Builds a [`ServiceModel`] from WSDL 1.1 documents
#[derive(Debug, Clone, Default)]
pub struct WsdlServiceBuilder;

impl WsdlServiceBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Load every document reachable from `locations` and assemble the model.
    ///
    /// All locations are treated as one contract: messages, port types and
    /// bindings may be declared in any of them.
    pub async fn build_services(
        &self,
        source: &dyn DocumentSource,
        locations: &[String],
    ) -> WsdlResult<ServiceModel> {
        let documents = load_documents(source, locations).await?;
        debug!(
            wsdl_documents = documents.wsdls.len(),
            schema_documents = documents.schemas.len(),
            "WSDL documents loaded"
        );

        let model = assemble(&documents)?;
        info!(services = model.services().len(), "Service model built");
        Ok(model)
    }
}

struct LoadedDocuments {
    wsdls: Vec<(String, String)>,
    schemas: HashMap<String, String>,
}

async fn load_documents(
    source: &dyn DocumentSource,
    locations: &[String],
) -> WsdlResult<LoadedDocuments> {
    let mut wsdls = Vec::new();
    let mut schemas = HashMap::new();
    let mut seen = HashSet::new();
    let mut pending_wsdls: VecDeque<String> = locations.iter().cloned().collect();
    let mut pending_schemas: VecDeque<String> = VecDeque::new();

    while let Some(location) = pending_wsdls.pop_front() {
        if !seen.insert(location.clone()) {
            continue;
        }
        let text = fetch_text(source, &location).await?;
        let (imports, schema_refs) = wsdl_references(&location, &text)?;
        pending_wsdls.extend(imports);
        pending_schemas.extend(schema_refs);
        wsdls.push((location, text));
    }

    while let Some(location) = pending_schemas.pop_front() {
        if schemas.contains_key(&location) {
            continue;
        }
        let text = fetch_text(source, &location).await?;
        pending_schemas.extend(schema_references(&location, &text)?);
        schemas.insert(location, text);
    }

    Ok(LoadedDocuments { wsdls, schemas })
}

async fn fetch_text(source: &dyn DocumentSource, location: &str) -> WsdlResult<String> {
    debug!(location, "Fetching document");
    let bytes = source
        .fetch_bytes(location)
        .await
        .map_err(|source| WsdlError::Document {
            location: location.to_string(),
            source,
        })?;
    let text = String::from_utf8(bytes).map_err(|_| WsdlError::Encoding {
        location: location.to_string(),
    })?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn parse<'input>(location: &str, text: &'input str) -> WsdlResult<Document<'input>> {
    Document::parse(text).map_err(|e| WsdlError::Xml {
        location: location.to_string(),
        details: e.to_string(),
    })
}

fn definitions<'a, 'input>(location: &str, doc: &'a Document<'input>) -> WsdlResult<Node<'a, 'input>> {
    let root = doc.root_element();
    if root.has_tag_name((WSDL_NS, "definitions")) {
        Ok(root)
    } else {
        Err(WsdlError::NotWsdl {
            location: location.to_string(),
        })
    }
}

/// `wsdl:import` locations and schema locations imported by embedded schemas
fn wsdl_references(location: &str, text: &str) -> WsdlResult<(Vec<String>, Vec<String>)> {
    let doc = parse(location, text)?;
    let root = definitions(location, &doc)?;

    let imports = child_elements(root, WSDL_NS, "import")
        .filter_map(|import| import.attribute("location"))
        .map(|reference| resolve_location(location, reference))
        .collect();

    let schema_refs = child_elements(root, WSDL_NS, "types")
        .flat_map(|types| child_elements(types, XS_NS, "schema"))
        .flat_map(|schema| schema_imports(location, schema))
        .collect();

    Ok((imports, schema_refs))
}

fn schema_references(location: &str, text: &str) -> WsdlResult<Vec<String>> {
    let doc = parse(location, text)?;
    Ok(schema_imports(location, doc.root_element()))
}

fn schema_imports(base: &str, schema: Node<'_, '_>) -> Vec<String> {
    child_elements(schema, XS_NS, "import")
        .filter_map(|import| import.attribute("schemaLocation"))
        .map(|reference| resolve_location(base, reference))
        .collect()
}

#[derive(Default)]
struct AbstractOperation {
    input: Option<QName>,
    output: Option<QName>,
    faults: Vec<QName>,
}

struct BindingDef {
    port_type: QName,
    soap_version: Option<SoapVersion>,
    operations: Vec<(String, Option<String>)>,
    location: String,
}

struct ServiceDef {
    name: QName,
    ports: Vec<QName>,
    location: String,
}

#[derive(Default)]
struct Definitions {
    messages: HashMap<QName, MessageInfo>,
    port_types: HashMap<QName, HashMap<String, AbstractOperation>>,
    bindings: HashMap<QName, BindingDef>,
    services: Vec<ServiceDef>,
    schemas: Vec<Arc<SchemaFragment>>,
}

fn assemble(documents: &LoadedDocuments) -> WsdlResult<ServiceModel> {
    let mut defs = Definitions::default();
    let mut externals = ExternalSchemas::new(&documents.schemas);

    for (location, text) in &documents.wsdls {
        let doc = parse(location, text)?;
        let root = definitions(location, &doc)?;
        let tns = root.attribute("targetNamespace");

        collect_schemas(location, root, &mut externals, &mut defs.schemas)?;
        collect_messages(location, root, tns, &mut defs.messages)?;
        collect_port_types(location, root, tns, &mut defs.port_types)?;
        collect_bindings(location, root, tns, &mut defs.bindings)?;
        collect_services(location, root, tns, &mut defs.services)?;
    }

    defs.into_model()
}

fn required<'a>(location: &str, node: Node<'a, '_>, attribute: &'static str) -> WsdlResult<&'a str> {
    node.attribute(attribute)
        .ok_or_else(|| WsdlError::MissingAttribute {
            location: location.to_string(),
            element: node.tag_name().name().to_string(),
            attribute,
        })
}

fn reference(location: &str, node: Node<'_, '_>, attribute: &'static str) -> WsdlResult<QName> {
    let value = required(location, node, attribute)?;
    resolve_qname(node, value).ok_or_else(|| WsdlError::UnresolvedReference {
        location: location.to_string(),
        reference: value.to_string(),
    })
}

fn collect_schemas(
    location: &str,
    root: Node<'_, '_>,
    externals: &mut ExternalSchemas<'_>,
    schemas: &mut Vec<Arc<SchemaFragment>>,
) -> WsdlResult<()> {
    let embedded = child_elements(root, WSDL_NS, "types")
        .flat_map(|types| child_elements(types, XS_NS, "schema"));

    for (index, schema) in embedded.enumerate() {
        let source_uri = format!("{}#types{}", location, index + 1);
        let document = serialize_element(schema).map_err(|e| WsdlError::Xml {
            location: source_uri.clone(),
            details: e.to_string(),
        })?;

        let mut imported = Vec::new();
        for import_location in schema_imports(location, schema) {
            if let Some(fragment) = externals.fragment(&import_location)? {
                imported.push(fragment);
            }
        }

        schemas.push(Arc::new(SchemaFragment::new(
            Some(&source_uri),
            schema.attribute("targetNamespace"),
            document,
            imported,
        )));
    }
    Ok(())
}

fn collect_messages(
    location: &str,
    root: Node<'_, '_>,
    tns: Option<&str>,
    messages: &mut HashMap<QName, MessageInfo>,
) -> WsdlResult<()> {
    for message in child_elements(root, WSDL_NS, "message") {
        let name = QName::new(tns, required(location, message, "name")?);
        let mut parts = Vec::new();
        for part in child_elements(message, WSDL_NS, "part") {
            let part_name = required(location, part, "name")?;
            if part.attribute("element").is_some() {
                parts.push(MessagePart::element(
                    part_name,
                    reference(location, part, "element")?,
                ));
            } else if part.attribute("type").is_some() {
                parts.push(MessagePart::typed(part_name, reference(location, part, "type")?));
            }
        }
        messages.insert(name.clone(), MessageInfo::new(name, parts));
    }
    Ok(())
}

fn collect_port_types(
    location: &str,
    root: Node<'_, '_>,
    tns: Option<&str>,
    port_types: &mut HashMap<QName, HashMap<String, AbstractOperation>>,
) -> WsdlResult<()> {
    for port_type in child_elements(root, WSDL_NS, "portType") {
        let name = QName::new(tns, required(location, port_type, "name")?);
        let mut operations = HashMap::new();

        for operation in child_elements(port_type, WSDL_NS, "operation") {
            let op_name = required(location, operation, "name")?;
            let mut abstract_op = AbstractOperation::default();
            if let Some(input) = child_element(operation, WSDL_NS, "input") {
                abstract_op.input = Some(reference(location, input, "message")?);
            }
            if let Some(output) = child_element(operation, WSDL_NS, "output") {
                abstract_op.output = Some(reference(location, output, "message")?);
            }
            for fault in child_elements(operation, WSDL_NS, "fault") {
                abstract_op.faults.push(reference(location, fault, "message")?);
            }
            operations.insert(op_name.to_string(), abstract_op);
        }

        port_types.insert(name, operations);
    }
    Ok(())
}

fn soap_action(operation: Node<'_, '_>) -> Option<String> {
    child_element(operation, WSDL_SOAP11_NS, "operation")
        .or_else(|| child_element(operation, WSDL_SOAP12_NS, "operation"))
        .and_then(|soap_op| soap_op.attribute("soapAction"))
        .map(str::to_string)
}

fn collect_bindings(
    location: &str,
    root: Node<'_, '_>,
    tns: Option<&str>,
    bindings: &mut HashMap<QName, BindingDef>,
) -> WsdlResult<()> {
    for binding in child_elements(root, WSDL_NS, "binding") {
        let name = QName::new(tns, required(location, binding, "name")?);
        let port_type = reference(location, binding, "type")?;

        let soap_version = if child_element(binding, WSDL_SOAP11_NS, "binding").is_some() {
            Some(SoapVersion::Soap11)
        } else if child_element(binding, WSDL_SOAP12_NS, "binding").is_some() {
            Some(SoapVersion::Soap12)
        } else {
            None
        };

        let operations = child_elements(binding, WSDL_NS, "operation")
            .map(|op| Ok((required(location, op, "name")?.to_string(), soap_action(op))))
            .collect::<WsdlResult<Vec<_>>>()?;

        bindings.insert(
            name,
            BindingDef {
                port_type,
                soap_version,
                operations,
                location: location.to_string(),
            },
        );
    }
    Ok(())
}

fn collect_services(
    location: &str,
    root: Node<'_, '_>,
    tns: Option<&str>,
    services: &mut Vec<ServiceDef>,
) -> WsdlResult<()> {
    for service in child_elements(root, WSDL_NS, "service") {
        let name = QName::new(tns, required(location, service, "name")?);
        let ports = child_elements(service, WSDL_NS, "port")
            .map(|port| reference(location, port, "binding"))
            .collect::<WsdlResult<Vec<_>>>()?;
        services.push(ServiceDef {
            name,
            ports,
            location: location.to_string(),
        });
    }
    Ok(())
}

impl Definitions {
    fn into_model(self) -> WsdlResult<ServiceModel> {
        let mut services = Vec::with_capacity(self.services.len());

        for service in &self.services {
            let mut bindings = Vec::new();
            let mut bound = HashSet::new();

            for binding_name in &service.ports {
                // Several ports may share one binding.
                if !bound.insert(binding_name.clone()) {
                    continue;
                }
                let binding = self.bindings.get(binding_name).ok_or_else(|| {
                    WsdlError::UnresolvedReference {
                        location: service.location.clone(),
                        reference: binding_name.to_string(),
                    }
                })?;
                bindings.push(self.bind(binding_name, binding)?);
            }

            debug!(service = %service.name, bindings = bindings.len(), "Service assembled");
            services.push(Arc::new(ServiceInfo::new(
                service.name.clone(),
                bindings,
                self.schemas.clone(),
            )));
        }

        Ok(ServiceModel::new(services))
    }

    fn bind(&self, name: &QName, binding: &BindingDef) -> WsdlResult<BindingInfo> {
        let unresolved = |reference: String| WsdlError::UnresolvedReference {
            location: binding.location.clone(),
            reference,
        };

        let port_type = self
            .port_types
            .get(&binding.port_type)
            .ok_or_else(|| unresolved(binding.port_type.to_string()))?;

        let mut operations = Vec::with_capacity(binding.operations.len());
        for (op_name, action) in &binding.operations {
            let abstract_op = port_type
                .get(op_name)
                .ok_or_else(|| unresolved(format!("{}#{}", binding.port_type, op_name)))?;

            let mut operation = OperationInfo::new(
                QName::new(binding.port_type.namespace(), op_name.as_str()),
                action.as_deref(),
            );
            if let Some(input) = &abstract_op.input {
                operation = operation.with_input(self.message(input, &unresolved)?);
            }
            if let Some(output) = &abstract_op.output {
                operation = operation.with_output(self.message(output, &unresolved)?);
            }
            for fault in &abstract_op.faults {
                operation = operation.with_fault(self.message(fault, &unresolved)?);
            }
            operations.push(Arc::new(operation));
        }

        Ok(BindingInfo::new(
            name.clone(),
            binding.soap_version,
            operations,
        ))
    }

    fn message(
        &self,
        name: &QName,
        unresolved: &dyn Fn(String) -> WsdlError,
    ) -> WsdlResult<MessageInfo> {
        self.messages
            .get(name)
            .cloned()
            .ok_or_else(|| unresolved(name.to_string()))
    }
}

/// Externally referenced schema documents, built once per location
struct ExternalSchemas<'a> {
    texts: &'a HashMap<String, String>,
    built: HashMap<String, Arc<SchemaFragment>>,
    in_progress: HashSet<String>,
}

impl<'a> ExternalSchemas<'a> {
    fn new(texts: &'a HashMap<String, String>) -> Self {
        Self {
            texts,
            built: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// `None` when `location` is already being built further up an import cycle.
    fn fragment(&mut self, location: &str) -> WsdlResult<Option<Arc<SchemaFragment>>> {
        if let Some(fragment) = self.built.get(location) {
            return Ok(Some(Arc::clone(fragment)));
        }
        if !self.in_progress.insert(location.to_string()) {
            return Ok(None);
        }

        let texts = self.texts;
        let text = texts
            .get(location)
            .ok_or_else(|| WsdlError::UnresolvedReference {
                location: location.to_string(),
                reference: location.to_string(),
            })?;
        let doc = parse(location, text)?;
        let root = doc.root_element();

        let mut imported = Vec::new();
        for import_location in schema_imports(location, root) {
            if let Some(fragment) = self.fragment(&import_location)? {
                imported.push(fragment);
            }
        }

        let fragment = Arc::new(SchemaFragment::new(
            Some(location),
            root.attribute("targetNamespace"),
            text.as_str(),
            imported,
        ));
        self.in_progress.remove(location);
        self.built
            .insert(location.to_string(), Arc::clone(&fragment));
        Ok(Some(fragment))
    }
}
