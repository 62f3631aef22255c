use std::fs;
use std::path::Path;

pub const USERS_NS: &str = "http://example.com/users";
pub const COMMON_NS: &str = "http://example.com/common";

/// User service contract: GetUser and DeleteUser over SOAP 1.1, with an
/// embedded schema that imports a shared address type from `common.xsd`.
pub const USERS_WSDL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/"
    xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
    xmlns:xs="http://www.w3.org/2001/XMLSchema"
    xmlns:tns="http://example.com/users"
    targetNamespace="http://example.com/users">
  <wsdl:types>
    <xs:schema targetNamespace="http://example.com/users"
        xmlns:cmn="http://example.com/common"
        elementFormDefault="qualified">
      <xs:import namespace="http://example.com/common" schemaLocation="common.xsd"/>
      <xs:element name="GetUserRequest">
        <xs:complexType>
          <xs:sequence>
            <xs:element name="id" type="xs:int"/>
          </xs:sequence>
        </xs:complexType>
      </xs:element>
      <xs:element name="GetUserResponse">
        <xs:complexType>
          <xs:sequence>
            <xs:element name="name" type="xs:string"/>
            <xs:element name="email" type="xs:string"/>
            <xs:element name="address" type="cmn:Address" minOccurs="0"/>
          </xs:sequence>
        </xs:complexType>
      </xs:element>
      <xs:element name="DeleteUserRequest">
        <xs:complexType>
          <xs:sequence>
            <xs:element name="id" type="xs:int"/>
          </xs:sequence>
        </xs:complexType>
      </xs:element>
      <xs:element name="DeleteUserResponse">
        <xs:complexType>
          <xs:sequence>
            <xs:element name="deleted" type="xs:boolean"/>
          </xs:sequence>
        </xs:complexType>
      </xs:element>
      <xs:element name="UserFault">
        <xs:complexType>
          <xs:sequence>
            <xs:element name="message" type="xs:string"/>
          </xs:sequence>
        </xs:complexType>
      </xs:element>
    </xs:schema>
  </wsdl:types>

  <wsdl:message name="GetUserInput"><wsdl:part name="body" element="tns:GetUserRequest"/></wsdl:message>
  <wsdl:message name="GetUserOutput"><wsdl:part name="body" element="tns:GetUserResponse"/></wsdl:message>
  <wsdl:message name="DeleteUserInput"><wsdl:part name="body" element="tns:DeleteUserRequest"/></wsdl:message>
  <wsdl:message name="DeleteUserOutput"><wsdl:part name="body" element="tns:DeleteUserResponse"/></wsdl:message>
  <wsdl:message name="UserFaultMessage"><wsdl:part name="fault" element="tns:UserFault"/></wsdl:message>

  <wsdl:portType name="UserPortType">
    <wsdl:operation name="GetUser">
      <wsdl:input message="tns:GetUserInput"/>
      <wsdl:output message="tns:GetUserOutput"/>
      <wsdl:fault name="UserFault" message="tns:UserFaultMessage"/>
    </wsdl:operation>
    <wsdl:operation name="DeleteUser">
      <wsdl:input message="tns:DeleteUserInput"/>
      <wsdl:output message="tns:DeleteUserOutput"/>
    </wsdl:operation>
  </wsdl:portType>

  <wsdl:binding name="UserBinding" type="tns:UserPortType">
    <soap:binding style="document" transport="http://schemas.xmlsoap.org/soap/http"/>
    <wsdl:operation name="GetUser">
      <soap:operation soapAction="GetUser"/>
      <wsdl:input><soap:body use="literal"/></wsdl:input>
      <wsdl:output><soap:body use="literal"/></wsdl:output>
      <wsdl:fault name="UserFault"><soap:fault name="UserFault" use="literal"/></wsdl:fault>
    </wsdl:operation>
    <wsdl:operation name="DeleteUser">
      <soap:operation soapAction="DeleteUser"/>
      <wsdl:input><soap:body use="literal"/></wsdl:input>
      <wsdl:output><soap:body use="literal"/></wsdl:output>
    </wsdl:operation>
  </wsdl:binding>

  <wsdl:service name="UserService">
    <wsdl:port name="UserPort" binding="tns:UserBinding">
      <soap:address location="http://localhost:8080/users"/>
    </wsdl:port>
  </wsdl:service>
</wsdl:definitions>
"#;

pub const COMMON_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    targetNamespace="http://example.com/common"
    elementFormDefault="qualified">
  <xs:complexType name="Address">
    <xs:sequence>
      <xs:element name="street" type="xs:string"/>
      <xs:element name="city" type="xs:string"/>
    </xs:sequence>
  </xs:complexType>
</xs:schema>
"#;

/// Contract whose schema does not compile (unknown type reference)
pub const BROKEN_WSDL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/"
    xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
    xmlns:xs="http://www.w3.org/2001/XMLSchema"
    xmlns:tns="urn:broken"
    targetNamespace="urn:broken">
  <wsdl:types>
    <xs:schema targetNamespace="urn:broken" xmlns:tns="urn:broken">
      <xs:element name="Ping" type="tns:Missing"/>
    </xs:schema>
  </wsdl:types>
  <wsdl:message name="PingInput"><wsdl:part name="body" element="tns:Ping"/></wsdl:message>
  <wsdl:portType name="PingPortType">
    <wsdl:operation name="Ping"><wsdl:input message="tns:PingInput"/></wsdl:operation>
  </wsdl:portType>
  <wsdl:binding name="PingBinding" type="tns:PingPortType">
    <soap:binding transport="http://schemas.xmlsoap.org/soap/http"/>
    <wsdl:operation name="Ping"><soap:operation soapAction="Ping"/></wsdl:operation>
  </wsdl:binding>
  <wsdl:service name="PingService">
    <wsdl:port name="PingPort" binding="tns:PingBinding"/>
  </wsdl:service>
</wsdl:definitions>
"#;

pub fn soap11(body: &str) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:usr="{}"><soapenv:Header/><soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"#,
        USERS_NS, body
    )
}

pub fn soap12(body: &str) -> String {
    format!(
        r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:usr="{}"><env:Body>{}</env:Body></env:Envelope>"#,
        USERS_NS, body
    )
}

pub fn get_user_request(id: &str) -> String {
    format!("<usr:GetUserRequest><usr:id>{}</usr:id></usr:GetUserRequest>", id)
}

pub const GET_USER_REQUEST_WITHOUT_ID: &str = "<usr:GetUserRequest/>";

pub const DELETE_USER_REQUEST: &str =
    "<usr:DeleteUserRequest><usr:id>7</usr:id></usr:DeleteUserRequest>";

pub fn get_user_response_with_address(city: &str) -> String {
    format!(
        r#"<usr:GetUserResponse xmlns:cmn="{}"><usr:name>Ada</usr:name><usr:email>ada@example.com</usr:email><usr:address><cmn:street>Main St 1</cmn:street><cmn:city>{}</cmn:city></usr:address></usr:GetUserResponse>"#,
        COMMON_NS, city
    )
}

pub const GET_USER_RESPONSE_WITHOUT_CITY: &str = r#"<usr:GetUserResponse xmlns:cmn="http://example.com/common"><usr:name>Ada</usr:name><usr:email>ada@example.com</usr:email><usr:address><cmn:street>Main St 1</cmn:street></usr:address></usr:GetUserResponse>"#;

/// The user contract with its `<wsdl:service>` section removed
pub fn users_wsdl_without_service() -> String {
    let start = USERS_WSDL.find("  <wsdl:service").unwrap();
    let end = USERS_WSDL.find("</wsdl:definitions>").unwrap();
    format!("{}{}", &USERS_WSDL[..start], &USERS_WSDL[end..])
}

/// Lay out `<root>/<api>/<revision>/` with the given files
pub fn write_revision(root: &Path, api: &str, revision: &str, files: &[(&str, &str)]) {
    let dir = root.join(api).join(revision);
    fs::create_dir_all(&dir).unwrap();
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

/// Registry holding the user service under API `users`
pub fn users_registry(root: &Path) {
    write_revision(
        root,
        "users",
        "1",
        &[("users.wsdl", USERS_WSDL), ("common.xsd", COMMON_XSD)],
    );
}
