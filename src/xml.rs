//! XML helpers shared by the analyzer, the WSDL builder and the fault writer.
//!
//! Envelopes and WSDL documents are read with `roxmltree`; subtrees that have to
//! outlive the parsed document (the SOAP body, embedded schemas) are written back
//! out with `quick-xml` together with every namespace binding they depend on.

use std::fmt;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use roxmltree::Node;

pub const SOAP11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSDL_NS: &str = "http://schemas.xmlsoap.org/wsdl/";
pub const WSDL_SOAP11_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap/";
pub const WSDL_SOAP12_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap12/";
pub const XS_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace-qualified name, printed in Clark notation (`{uri}local`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    namespace: Option<String>,
    local: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            local: local.into(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Name of an element node as it appears in the parsed tree
    pub fn of(node: Node<'_, '_>) -> Self {
        let tag = node.tag_name();
        Self::new(tag.namespace(), tag.name())
    }

    /// True when `node` is an element with this name
    pub fn matches(&self, node: Node<'_, '_>) -> bool {
        node.is_element()
            && node.tag_name().name() == self.local
            && node.tag_name().namespace().filter(|ns| !ns.is_empty()) == self.namespace()
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Resolve a prefixed attribute value such as `tns:GetUser` against the
/// namespace bindings in scope at `node`.
///
/// Unprefixed values pick up the default namespace. Returns `None` when the
/// prefix is not bound.
pub fn resolve_qname(node: Node<'_, '_>, value: &str) -> Option<QName> {
    let value = value.trim();
    match value.split_once(':') {
        Some((prefix, local)) => {
            let uri = node.lookup_namespace_uri(Some(prefix))?;
            Some(QName::new(Some(uri), local))
        }
        None => Some(QName::new(node.lookup_namespace_uri(None), value)),
    }
}

/// First child element with the given namespace and local name
pub fn child_element<'a, 'input>(
    node: Node<'a, 'input>,
    namespace: &str,
    local: &str,
) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.has_tag_name((namespace, local)))
}

/// All child elements with the given namespace and local name
pub fn child_elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    namespace: &'a str,
    local: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |child| child.has_tag_name((namespace, local)))
}

/// An element subtree detached from the document it was parsed from.
///
/// `xml` is a standalone, well-formed document whose root is the element itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: QName,
    xml: String,
}

impl XmlElement {
    pub fn from_node(node: Node<'_, '_>) -> Result<Self, quick_xml::Error> {
        Ok(Self {
            name: QName::of(node),
            xml: serialize_element(node)?,
        })
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn as_str(&self) -> &str {
        &self.xml
    }

    pub fn into_string(self) -> String {
        self.xml
    }
}

/// Serialize an element and its descendants as a standalone document.
pub fn serialize_element(node: Node<'_, '_>) -> Result<String, quick_xml::Error> {
    serialize_element_with(node, &|_| Vec::new())
}

/// Serialize an element subtree, letting `rewrite` override attributes.
///
/// For every element, `rewrite` returns unqualified `(name, value)` pairs that
/// replace the attribute of that name or are appended when it is absent.
///
/// The root re-declares every namespace in scope at the source position so the
/// result parses on its own; descendants only declare bindings that differ
/// from their parent. Comments and processing instructions are dropped.
pub fn serialize_element_with(
    node: Node<'_, '_>,
    rewrite: &dyn Fn(Node<'_, '_>) -> Vec<(String, String)>,
) -> Result<String, quick_xml::Error> {
    let mut writer = Writer::new(Vec::new());
    write_node(&mut writer, node, &Scope::default(), rewrite)?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Prefix bindings already written to the output
#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: Vec<(Option<String>, String)>,
}

impl Scope {
    fn uri_for(&self, prefix: Option<&str>) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    fn bind(&mut self, prefix: Option<&str>, uri: &str) {
        self.bindings.push((prefix.map(str::to_string), uri.to_string()));
    }

    fn prefix_for_element(&self, uri: &str) -> Option<Option<String>> {
        if self.uri_for(None) == Some(uri) {
            return Some(None);
        }
        self.prefix_for_attribute(uri).map(Some)
    }

    fn prefix_for_attribute(&self, uri: &str) -> Option<String> {
        if uri == XML_NS {
            return Some("xml".to_string());
        }
        self.bindings
            .iter()
            .rev()
            .filter_map(|(p, _)| p.as_deref())
            .find(|p| self.uri_for(Some(p)) == Some(uri))
            .map(str::to_string)
    }
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

fn write_node<W: std::io::Write>(
    writer: &mut Writer<W>,
    node: Node<'_, '_>,
    parent: &Scope,
    rewrite: &dyn Fn(Node<'_, '_>) -> Vec<(String, String)>,
) -> Result<(), quick_xml::Error> {
    let mut scope = parent.clone();
    let mut declarations: Vec<(Option<String>, String)> = Vec::new();

    for ns in node.namespaces() {
        if ns.name() == Some("xml") {
            continue;
        }
        if scope.uri_for(ns.name()) != Some(ns.uri()) {
            scope.bind(ns.name(), ns.uri());
            declarations.push((ns.name().map(str::to_string), ns.uri().to_string()));
        }
    }

    let local = node.tag_name().name();
    let name = match node.tag_name().namespace().filter(|ns| !ns.is_empty()) {
        Some(uri) => match scope.prefix_for_element(uri) {
            Some(prefix) => qualified(prefix.as_deref(), local),
            None => {
                scope.bind(None, uri);
                declarations.push((None, uri.to_string()));
                local.to_string()
            }
        },
        None => {
            if scope.uri_for(None).is_some_and(|uri| !uri.is_empty()) {
                scope.bind(None, "");
                declarations.push((None, String::new()));
            }
            local.to_string()
        }
    };

    let mut start = BytesStart::new(name.clone());
    for (prefix, uri) in &declarations {
        let attr = match prefix {
            Some(prefix) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        };
        start.push_attribute((attr.as_str(), uri.as_str()));
    }
    let mut overrides = rewrite(node);
    for attribute in node.attributes() {
        let (attr_name, value) = match attribute.namespace() {
            Some(uri) => match scope.prefix_for_attribute(uri) {
                Some(prefix) => (
                    qualified(Some(&prefix), attribute.name()),
                    attribute.value().to_string(),
                ),
                None => continue,
            },
            None => {
                let value = match overrides.iter().position(|(n, _)| n == attribute.name()) {
                    Some(index) => overrides.remove(index).1,
                    None => attribute.value().to_string(),
                };
                (attribute.name().to_string(), value)
            }
        };
        start.push_attribute((attr_name.as_str(), value.as_str()));
    }
    for (attr_name, value) in &overrides {
        start.push_attribute((attr_name.as_str(), value.as_str()));
    }

    let has_content = node
        .children()
        .any(|child| child.is_element() || child.is_text());
    if !has_content {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in node.children() {
        if child.is_element() {
            write_node(writer, child, &scope, rewrite)?;
        } else if child.is_text() {
            let text = child.text().unwrap_or_default();
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE: &str = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:usr="http://example.com/users">
  <soapenv:Body>
    <!-- request -->
    <usr:GetUserRequest usr:trace="on">
      <usr:userId>42</usr:userId>
      <note xmlns="">a &amp; b</note>
    </usr:GetUserRequest>
  </soapenv:Body>
</soapenv:Envelope>"#;

    fn body_child(doc: &roxmltree::Document<'_>) -> XmlElement {
        let body = child_element(doc.root_element(), SOAP11_NS, "Body").unwrap();
        XmlElement::from_node(body.first_element_child().unwrap()).unwrap()
    }

    #[test]
    fn test_qname_display_uses_clark_notation() {
        let qualified = QName::new(Some("urn:x"), "Foo");
        assert_eq!(qualified.to_string(), "{urn:x}Foo");

        let unqualified = QName::new(Some(""), "Foo");
        assert_eq!(unqualified.namespace(), None);
        assert_eq!(unqualified.to_string(), "Foo");
    }

    #[test]
    fn test_resolve_qname_prefixed_and_default() {
        let doc = roxmltree::Document::parse(
            r#"<root xmlns="urn:default" xmlns:tns="urn:tns"><child/></root>"#,
        )
        .unwrap();
        let child = doc.root_element().first_element_child().unwrap();

        assert_eq!(
            resolve_qname(child, "tns:GetUser"),
            Some(QName::new(Some("urn:tns"), "GetUser"))
        );
        assert_eq!(
            resolve_qname(child, "Plain"),
            Some(QName::new(Some("urn:default"), "Plain"))
        );
        assert_eq!(resolve_qname(child, "missing:Foo"), None);
    }

    #[test]
    fn test_serialized_subtree_is_standalone() {
        let doc = roxmltree::Document::parse(ENVELOPE).unwrap();
        let element = body_child(&doc);

        assert_eq!(
            element.name(),
            &QName::new(Some("http://example.com/users"), "GetUserRequest")
        );

        let reparsed = roxmltree::Document::parse(element.as_str()).unwrap();
        let root = reparsed.root_element();
        assert!(root.has_tag_name(("http://example.com/users", "GetUserRequest")));
        assert_eq!(
            root.attribute(("http://example.com/users", "trace")),
            Some("on")
        );

        let user_id = root.first_element_child().unwrap();
        assert!(user_id.has_tag_name(("http://example.com/users", "userId")));
        assert_eq!(user_id.text(), Some("42"));

        let note = user_id.next_sibling_element().unwrap();
        assert_eq!(note.tag_name().namespace(), None);
        assert_eq!(note.text(), Some("a & b"));
    }

    #[test]
    fn test_comments_are_dropped() {
        let doc = roxmltree::Document::parse(ENVELOPE).unwrap();
        let body = child_element(doc.root_element(), SOAP11_NS, "Body").unwrap();
        let xml = serialize_element(body).unwrap();
        assert!(!xml.contains("request -->"));
        assert!(xml.contains("GetUserRequest"));
    }

    #[test]
    fn test_attribute_rewrite_hook() {
        let doc = roxmltree::Document::parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:import namespace="urn:a" schemaLocation="a.xsd"/></xs:schema>"#,
        )
        .unwrap();
        let xml = serialize_element_with(doc.root_element(), &|node| {
            if node.has_tag_name((XS_NS, "import")) {
                vec![
                    ("schemaLocation".to_string(), "file:///tmp/a.xsd".to_string()),
                    ("id".to_string(), "a".to_string()),
                ]
            } else {
                Vec::new()
            }
        })
        .unwrap();

        assert!(xml.contains(r#"schemaLocation="file:///tmp/a.xsd""#));
        assert!(!xml.contains("a.xsd\" "));
        assert!(xml.contains(r#"namespace="urn:a""#));
        assert!(xml.contains(r#"id="a""#));
    }
}
