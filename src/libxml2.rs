//! LibXML2 FFI Wrapper Module
//!
//! Safe wrappers around the two libxml2 facilities the pipeline needs:
//!
//! - **Schema compilation**: a set of XSD documents is turned into one
//!   validate-only `xmlSchema`, shared read-only behind an `Arc`.
//! - **Streaming validation**: an `xmlTextReader` bound to a compiled schema
//!   pulls a document node by node while every violation is collected through
//!   a structured error handler.
//!
//! ## Thread Safety
//!
//! According to the libxml2 documentation (http://xmlsoft.org/threads.html):
//!
//! - **Schema parsing** is NOT thread-safe and is serialized behind a
//!   process-wide lock.
//! - **Validation** is thread-safe for different documents; each reader owns its
//!   own validation context, so any number of validations can share one schema.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Once};

use libc::{c_char, c_int, c_uchar};

use crate::error::{LibXml2Error, LibXml2Result};

/// Global initialization flag for libxml2
///
/// libxml2's initialization functions are not thread-safe, so they run exactly
/// once behind `std::sync::Once`.
static LIBXML2_INIT: Once = Once::new();

/// Serializes `xmlSchemaParse` calls across threads.
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// `XML_FROM_PARSER` error domain
pub const XML_FROM_PARSER: i32 = 1;
/// `XML_FROM_SCHEMASP` error domain (schema parsing)
pub const XML_FROM_SCHEMASP: i32 = 16;
/// `XML_FROM_SCHEMASV` error domain (schema validation)
pub const XML_FROM_SCHEMASV: i32 = 17;

/// `XML_READER_TYPE_ELEMENT`
const XML_READER_TYPE_ELEMENT: c_int = 1;
/// `XML_PARSE_NONET`: never touch the network while reading payloads
const XML_PARSE_NONET: c_int = 1 << 11;

#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlTextReader {
    _private: [u8; 0],
}

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Schema parsing functions
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut libc::c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Streaming reader functions
    pub fn xmlReaderForMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlTextReader;
    pub fn xmlTextReaderSetSchema(reader: *mut XmlTextReader, schema: *mut XmlSchema) -> c_int;
    pub fn xmlTextReaderSetStructuredErrorHandler(
        reader: *mut XmlTextReader,
        f: XmlStructuredErrorFunc,
        arg: *mut libc::c_void,
    );
    pub fn xmlTextReaderRead(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderNodeType(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderConstLocalName(reader: *mut XmlTextReader) -> *const c_uchar;
    pub fn xmlTextReaderIsValid(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlFreeTextReader(reader: *mut XmlTextReader);
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut libc::c_void,
    pub node: *mut libc::c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut libc::c_void, error: *mut xmlError)>;

/// One structured error reported by libxml2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDiagnostic {
    pub domain: i32,
    pub code: i32,
    /// 1 = warning, 2 = error, 3 = fatal
    pub level: i32,
    pub message: String,
    /// 0 when unknown
    pub line: i32,
    /// 0 when unknown
    pub column: i32,
}

impl XmlDiagnostic {
    pub fn is_schema_validity(&self) -> bool {
        self.domain == XML_FROM_SCHEMASV
    }
}

/// Callback for libxml2 to report errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut libc::c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let diagnostics = unsafe { &mut *(user_data as *mut Vec<XmlDiagnostic>) };
    let error = unsafe { &*error };

    let message = if error.message.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(error.message) }
            .to_string_lossy()
            .trim()
            .to_string()
    };

    diagnostics.push(XmlDiagnostic {
        domain: error.domain,
        code: error.code,
        level: error.level,
        message,
        line: error.line,
        column: error.int2,
    });
}

/// Thread-safe wrapper for libxml2 schema pointer with proper resource management
///
/// - The schema is freed when the last clone is dropped
/// - The schema can be shared across threads (libxml2 schemas are read-only after parsing)
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 documentation states that xmlSchema structures are thread-safe for reading
// See: http://xmlsoft.org/threads.html
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` and must not be freed elsewhere.
    unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "libxml2 returned no schema".to_string(),
            });
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlSchema {
        self.inner.ptr
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }

    /// True when both handles refer to the same compiled schema
    pub fn ptr_eq(&self, other: &XmlSchemaPtr) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// Entry point to libxml2; creating one initializes the library once per process.
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse an XML schema document held in memory.
    ///
    /// `xs:import`/`xs:include` locations inside the document must be absolute,
    /// since an in-memory schema has no base URI. Parse errors are collected
    /// and reported together in `SchemaParseFailed`.
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        let size = c_int::try_from(schema_data.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: schema_data.len(),
        })?;
        if size == 0 {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "empty schema document".to_string(),
            });
        }

        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut diagnostics: Vec<XmlDiagnostic> = Vec::new();
        let diagnostics_ptr = &mut diagnostics as *mut Vec<XmlDiagnostic> as *mut libc::c_void;

        let schema_ptr = unsafe {
            let parser_ctxt =
                xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                diagnostics_ptr,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);
            schema_ptr
        };

        if schema_ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: summarize(&diagnostics, |d| d.level >= 2)
                    .unwrap_or_else(|| "schema could not be compiled".to_string()),
            });
        }

        unsafe { XmlSchemaPtr::from_raw(schema_ptr) }
    }

    /// Open `document` for streaming validation against `schema`.
    pub fn schema_reader<'a>(
        &self,
        schema: &XmlSchemaPtr,
        document: &'a [u8],
    ) -> LibXml2Result<SchemaValidatingReader<'a>> {
        SchemaValidatingReader::new(schema, document)
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(
    diagnostics: &[XmlDiagnostic],
    keep: impl Fn(&XmlDiagnostic) -> bool,
) -> Option<String> {
    let messages: Vec<&str> = diagnostics
        .iter()
        .filter(|d| keep(d))
        .map(|d| d.message.as_str())
        .filter(|m| !m.is_empty())
        .collect();
    (!messages.is_empty()).then(|| messages.join("; "))
}

/// Pull parser over an in-memory document with a compiled schema attached.
///
/// Schema violations never stop the reader; they accumulate and are handed
/// out by [`SchemaValidatingReader::into_diagnostics`]. Well-formedness errors
/// make [`SchemaValidatingReader::read`] fail.
pub struct SchemaValidatingReader<'a> {
    reader: *mut XmlTextReader,
    diagnostics: *mut Vec<XmlDiagnostic>,
    _schema: XmlSchemaPtr,
    _input: PhantomData<&'a [u8]>,
}

impl<'a> SchemaValidatingReader<'a> {
    pub fn new(schema: &XmlSchemaPtr, document: &'a [u8]) -> LibXml2Result<Self> {
        let size = c_int::try_from(document.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: document.len(),
        })?;
        let url = CString::new("payload.xml").map_err(|_| LibXml2Error::MemoryAllocation)?;

        let reader = unsafe {
            xmlReaderForMemory(
                document.as_ptr() as *const c_char,
                size,
                url.as_ptr(),
                std::ptr::null(),
                XML_PARSE_NONET,
            )
        };
        if reader.is_null() {
            return Err(LibXml2Error::ValidationContextCreationFailed);
        }

        let diagnostics = Box::into_raw(Box::new(Vec::<XmlDiagnostic>::new()));
        let this = Self {
            reader,
            diagnostics,
            _schema: schema.clone(),
            _input: PhantomData,
        };

        // The schema has to be attached before the first read.
        let code = unsafe { xmlTextReaderSetSchema(this.reader, this._schema.as_ptr()) };
        if code != 0 {
            return Err(LibXml2Error::SchemaAttachFailed { code });
        }
        unsafe {
            xmlTextReaderSetStructuredErrorHandler(
                this.reader,
                Some(structured_error_callback),
                this.diagnostics as *mut libc::c_void,
            );
        }

        Ok(this)
    }

    /// Advance to the next node. `Ok(false)` at end of input.
    pub fn read(&mut self) -> LibXml2Result<bool> {
        match unsafe { xmlTextReaderRead(self.reader) } {
            1 => Ok(true),
            0 => Ok(false),
            _ => {
                let diagnostics = unsafe { &*self.diagnostics };
                Err(LibXml2Error::InvalidXml {
                    details: summarize(diagnostics, |d| !d.is_schema_validity())
                        .unwrap_or_else(|| "malformed XML payload".to_string()),
                })
            }
        }
    }

    /// True when the reader sits on a start tag with the given local name
    pub fn is_start_element_named(&self, local_name: &str) -> bool {
        unsafe {
            if xmlTextReaderNodeType(self.reader) != XML_READER_TYPE_ELEMENT {
                return false;
            }
            let name = xmlTextReaderConstLocalName(self.reader);
            !name.is_null() && CStr::from_ptr(name as *const c_char).to_bytes() == local_name.as_bytes()
        }
    }

    /// libxml2's own verdict: `Some(true)` valid, `Some(false)` invalid,
    /// `None` when validation could not run.
    pub fn is_valid(&self) -> Option<bool> {
        match unsafe { xmlTextReaderIsValid(self.reader) } {
            1 => Some(true),
            0 => Some(false),
            _ => None,
        }
    }

    /// Everything reported so far, in report order
    pub fn into_diagnostics(self) -> Vec<XmlDiagnostic> {
        std::mem::take(unsafe { &mut *self.diagnostics })
    }
}

impl Drop for SchemaValidatingReader<'_> {
    fn drop(&mut self) {
        unsafe {
            xmlFreeTextReader(self.reader);
            drop(Box::from_raw(self.diagnostics));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="id" type="xs:int"/>
            </xs:sequence>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

    fn drain(reader: &mut SchemaValidatingReader<'_>) -> LibXml2Result<()> {
        while reader.read()? {}
        Ok(())
    }

    #[test]
    fn test_schema_parsing_success() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        assert!(schema.is_valid());
    }

    #[test]
    fn test_schema_parsing_reports_details() {
        let wrapper = LibXml2Wrapper::new();
        let broken = br#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:element name="a" type="xs:nope"/></xs:schema>"#;

        match wrapper.parse_schema_from_memory(broken) {
            Err(LibXml2Error::SchemaParseFailed { details }) => assert!(!details.is_empty()),
            other => panic!("Expected SchemaParseFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_schema_parsing_empty_data() {
        let wrapper = LibXml2Wrapper::new();
        assert!(wrapper.parse_schema_from_memory(&[]).is_err());
    }

    #[test]
    fn test_valid_document_has_no_diagnostics() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();

        let document = b"<root><id>7</id></root>";
        let mut reader = wrapper.schema_reader(&schema, document).unwrap();
        drain(&mut reader).unwrap();

        assert_eq!(reader.is_valid(), Some(true));
        assert!(reader.into_diagnostics().is_empty());
    }

    #[test]
    fn test_invalid_document_collects_every_violation() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();

        let document = b"<root>\n<id>seven</id>\n<extra/>\n</root>";
        let mut reader = wrapper.schema_reader(&schema, document).unwrap();
        drain(&mut reader).unwrap();

        assert_eq!(reader.is_valid(), Some(false));
        let diagnostics = reader.into_diagnostics();
        assert!(diagnostics.len() >= 2, "got {:?}", diagnostics);
        assert!(diagnostics.iter().all(XmlDiagnostic::is_schema_validity));
        assert!(diagnostics.iter().any(|d| d.line == 2));
    }

    #[test]
    fn test_malformed_document_fails_read() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();

        let document = b"<root><id>1</id></wrong>";
        let mut reader = wrapper.schema_reader(&schema, document).unwrap();

        match drain(&mut reader) {
            Err(LibXml2Error::InvalidXml { details }) => assert!(!details.is_empty()),
            other => panic!("Expected InvalidXml, got {:?}", other),
        }
    }

    #[test]
    fn test_start_element_detection() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();

        let document = b"<root><id>1</id></root>";
        let mut reader = wrapper.schema_reader(&schema, document).unwrap();

        let mut seen_id = false;
        while reader.read().unwrap() {
            seen_id |= reader.is_start_element_named("id");
        }
        assert!(seen_id);
    }

    #[test]
    fn test_concurrent_validation_with_shared_schema() {
        use rayon::prelude::*;

        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();

        let results: Vec<bool> = (0..32)
            .into_par_iter()
            .map(|i| {
                let document = if i % 2 == 0 {
                    format!("<root><id>{}</id></root>", i)
                } else {
                    "<root><id>x</id></root>".to_string()
                };
                let mut reader = SchemaValidatingReader::new(&schema, document.as_bytes()).unwrap();
                while reader.read().unwrap() {}
                reader.into_diagnostics().is_empty()
            })
            .collect();

        for (i, valid) in results.iter().enumerate() {
            assert_eq!(*valid, i % 2 == 0);
        }
    }

    #[test]
    fn test_schema_ptr_cloning() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        let cloned = schema.clone();

        assert!(schema.ptr_eq(&cloned));
        assert_eq!(schema.as_ptr(), cloned.as_ptr());
    }
}
