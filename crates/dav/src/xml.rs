//! WebDAV request and response bodies.

use std::time::Instant;

use http::StatusCode;
use xml::namespace::Namespace;
use xml::writer::EmitterConfig;
use xmltree::{Element, XMLNode};

use crate::error::DavError;
use crate::lock::{Lock, LockScope};
use crate::path;

pub const DAV_NS: &str = "DAV:";
const DAV_PREFIX: &str = "D";

/// A property name, qualified by its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyName {
    pub namespace: String,
    pub name: String,
}

impl PropertyName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn dav(name: &str) -> Self {
        Self::new(DAV_NS, name)
    }

    pub fn of(element: &Element) -> Self {
        Self::new(element.namespace.clone().unwrap_or_default(), element.name.clone())
    }

    pub fn is_dav(&self) -> bool {
        self.namespace == DAV_NS
    }

    /// An empty element carrying this name.
    pub fn to_element(&self) -> Element {
        if self.is_dav() {
            return dav_element(&self.name);
        }
        let mut element = Element::new(&self.name);
        if !self.namespace.is_empty() {
            let mut namespaces = Namespace::empty();
            namespaces.put("", self.namespace.as_str());
            element.namespace = Some(self.namespace.clone());
            element.namespaces = Some(namespaces);
        }
        element
    }
}

pub fn dav_element(name: &str) -> Element {
    let mut element = Element::new(name);
    element.prefix = Some(DAV_PREFIX.to_owned());
    element.namespace = Some(DAV_NS.to_owned());
    element
}

pub fn dav_text(name: &str, text: impl Into<String>) -> Element {
    let mut element = dav_element(name);
    element.children.push(XMLNode::Text(text.into()));
    element
}

fn dav_parent(name: &str, children: impl IntoIterator<Item = Element>) -> Element {
    let mut element = dav_element(name);
    element.children.extend(children.into_iter().map(XMLNode::Element));
    element
}

fn is_dav(element: &Element, name: &str) -> bool {
    element.name == name && element.namespace.as_deref() == Some(DAV_NS)
}

fn elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(XMLNode::as_element)
}

/// Parses a request body, `None` when it is empty.
pub fn parse_document(body: &[u8]) -> Result<Option<Element>, DavError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Element::parse(body).map(Some).map_err(|e| DavError::Xml(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propfind {
    AllProp,
    PropName,
    Prop(Vec<PropertyName>),
}

/// Reads a `propfind` body; no body at all asks for every property.
pub fn parse_propfind(document: Option<&Element>) -> Result<Propfind, DavError> {
    let Some(root) = document else {
        return Ok(Propfind::AllProp);
    };
    if !is_dav(root, "propfind") {
        return Err(DavError::Xml(format!("expected DAV:propfind, found {}", root.name)));
    }

    for child in elements(root) {
        if is_dav(child, "allprop") {
            return Ok(Propfind::AllProp);
        } else if is_dav(child, "propname") {
            return Ok(Propfind::PropName);
        } else if is_dav(child, "prop") {
            return Ok(Propfind::Prop(elements(child).map(PropertyName::of).collect()));
        }
    }
    Err(DavError::Xml("propfind names no properties".to_owned()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set(Element),
    Remove(PropertyName),
}

/// Reads a `propertyupdate` body, keeping the document order of the instructions.
pub fn parse_proppatch(root: &Element) -> Result<Vec<PatchOp>, DavError> {
    if !is_dav(root, "propertyupdate") {
        return Err(DavError::Xml(format!("expected DAV:propertyupdate, found {}", root.name)));
    }

    let mut ops = Vec::new();
    for instruction in elements(root) {
        let set = is_dav(instruction, "set");
        if !set && !is_dav(instruction, "remove") {
            continue;
        }
        for prop in elements(instruction).filter(|e| is_dav(e, "prop")) {
            for property in elements(prop) {
                ops.push(if set { PatchOp::Set(property.clone()) } else { PatchOp::Remove(PropertyName::of(property)) });
            }
        }
    }
    if ops.is_empty() {
        return Err(DavError::Xml("propertyupdate changes nothing".to_owned()));
    }
    Ok(ops)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub scope: LockScope,
    /// the serialized `owner` element
    pub owner: Option<String>,
}

pub fn parse_lockinfo(root: &Element) -> Result<LockInfo, DavError> {
    if !is_dav(root, "lockinfo") {
        return Err(DavError::Xml(format!("expected DAV:lockinfo, found {}", root.name)));
    }

    let mut scope = None;
    let mut owner = None;
    for child in elements(root) {
        if is_dav(child, "lockscope") {
            scope = elements(child).find_map(|s| {
                if is_dav(s, "exclusive") {
                    Some(LockScope::Exclusive)
                } else if is_dav(s, "shared") {
                    Some(LockScope::Shared)
                } else {
                    None
                }
            });
        } else if is_dav(child, "locktype") && !elements(child).any(|t| is_dav(t, "write")) {
            return Err(DavError::Xml("only write locks are supported".to_owned()));
        } else if is_dav(child, "owner") {
            owner = Some(serialize_fragment(child)?);
        }
    }

    let scope = scope.ok_or_else(|| DavError::Xml("lockinfo has no lockscope".to_owned()))?;
    Ok(LockInfo { scope, owner })
}

pub fn status_line(status: StatusCode) -> String {
    format!("HTTP/1.1 {} {}", status.as_u16(), status.canonical_reason().unwrap_or_default())
}

/// A `207 Multi-Status` body under construction.
#[derive(Debug, Clone)]
pub struct MultiStatus {
    root: Element,
}

impl Default for MultiStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiStatus {
    pub fn new() -> Self {
        Self { root: dav_element("multistatus") }
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.root.children.len()
    }

    /// A response carrying a plain status for `href`.
    pub fn add_status(&mut self, href: &str, status: StatusCode) {
        let response = dav_parent("response", [dav_text("href", href), dav_text("status", status_line(status))]);
        self.root.children.push(XMLNode::Element(response));
    }

    /// A response grouping the properties of `href` by status; empty groups are left out.
    pub fn add_propstats(&mut self, href: &str, propstats: Vec<(StatusCode, Vec<Element>)>) {
        let mut response = dav_parent("response", [dav_text("href", href)]);
        for (status, props) in propstats.into_iter().filter(|(_, props)| !props.is_empty()) {
            let propstat = dav_parent("propstat", [dav_parent("prop", props), dav_text("status", status_line(status))]);
            response.children.push(XMLNode::Element(propstat));
        }
        self.root.children.push(XMLNode::Element(response));
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, DavError> {
        document(self.root.clone())
    }
}

/// Serializes a whole response body with `root` declaring the DAV prefix.
pub fn document(mut root: Element) -> Result<Vec<u8>, DavError> {
    let mut namespaces = root.namespaces.take().unwrap_or_else(Namespace::empty);
    namespaces.put(DAV_PREFIX, DAV_NS);
    root.namespaces = Some(namespaces);

    let mut out = Vec::new();
    let config = EmitterConfig::new().perform_indent(false).write_document_declaration(true);
    root.write_with_config(&mut out, config).map_err(|e| DavError::Xml(e.to_string()))?;
    Ok(out)
}

/// Serializes an element without a document declaration.
pub fn serialize_fragment(element: &Element) -> Result<String, DavError> {
    let mut out = Vec::new();
    let config = EmitterConfig::new().perform_indent(false).write_document_declaration(false);
    element.write_with_config(&mut out, config).map_err(|e| DavError::Xml(e.to_string()))?;
    String::from_utf8(out).map_err(|e| DavError::Xml(e.to_string()))
}

/// The `activelock` description of `lock`.
pub fn active_lock(lock: &Lock, mount: &str, now: Instant) -> Element {
    let scope = match lock.scope {
        LockScope::Exclusive => "exclusive",
        LockScope::Shared => "shared",
    };
    let mut active = dav_parent(
        "activelock",
        [
            dav_parent("locktype", [dav_element("write")]),
            dav_parent("lockscope", [dav_element(scope)]),
            dav_text("depth", lock.depth.to_string()),
        ],
    );
    if let Some(owner) = lock.owner.as_deref().and_then(|owner| Element::parse(owner.as_bytes()).ok()) {
        active.children.push(XMLNode::Element(owner));
    }
    active.children.push(XMLNode::Element(dav_text("timeout", lock.remaining(now).to_string())));
    active.children.push(XMLNode::Element(dav_parent("locktoken", [dav_text("href", lock.token.as_str())])));
    if let Some(root) = lock.root() {
        active.children.push(XMLNode::Element(dav_parent("lockroot", [dav_text("href", path::href(mount, root, false))])));
    }
    active
}

pub fn lock_discovery<'a>(locks: impl IntoIterator<Item = &'a Lock>, mount: &str, now: Instant) -> Element {
    dav_parent("lockdiscovery", locks.into_iter().map(|lock| active_lock(lock, mount, now)))
}

/// Exclusive and shared write locks are both supported everywhere.
pub fn supported_lock() -> Element {
    let entry = |scope| dav_parent("lockentry", [dav_parent("lockscope", [dav_element(scope)]), dav_parent("locktype", [dav_element("write")])]);
    dav_parent("supportedlock", [entry("exclusive"), entry("shared")])
}

/// The `prop` body answering a `LOCK`.
pub fn lock_response(lock: &Lock, mount: &str, now: Instant) -> Result<Vec<u8>, DavError> {
    document(dav_parent("prop", [lock_discovery([lock], mount, now)]))
}
