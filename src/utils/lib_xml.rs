use std::fmt;

use itertools::Itertools;
use log::{error, info, warn};
use quick_xml::events::{attributes::AttrError, BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use thiserror::Error;

use crate::api::caiso::_api_caiso_core::OASIS_REPORT_NS;

use super::lib_table::TabularRecord;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attribute(#[from] AttrError),

    #[error("Malformed document: {0}")]
    Malformed(&'static str),
}

/// Text encodings to try, in order of preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

pub const ENCODINGS: [TextEncoding; 2] = [TextEncoding::Utf8, TextEncoding::Latin1];

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                String::from_utf8(bytes.to_vec()).ok()
            }
            TextEncoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "utf-8"),
            TextEncoding::Latin1 => write!(f, "latin-1"),
        }
    }
}

/// Decode with the first encoding in [`ENCODINGS`] that works.
pub fn decode_text(bytes: &[u8]) -> Option<(TextEncoding, String)> {
    ENCODINGS
        .iter()
        .find_map(|enc| enc.decode(bytes).map(|s| (*enc, s)))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    pub namespace: Option<String>,
    pub local_name: String,
    pub attributes: Vec<(String, String)>,
    /// Text before the first child element.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// All elements below this one, in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        let mut pending: Vec<&Element> = self.children.iter().rev().collect();
        while let Some(element) = pending.pop() {
            out.push(element);
            pending.extend(element.children.iter().rev());
        }
        out
    }

    fn from_start(namespace: Option<String>, e: &BytesStart) -> Result<Element, XmlError> {
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Element {
            namespace,
            local_name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            attributes,
            ..Element::default()
        })
    }
}

fn attach(
    stack: &mut [(Element, bool)],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some((parent, has_children)) => {
            *has_children = true;
            parent.children.push(element);
        }
        None => {
            if root.is_some() {
                return Err(XmlError::Malformed("junk after document element"));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

fn push_text(stack: &mut [(Element, bool)], text: &str) {
    if let Some((element, false)) = stack.last_mut() {
        element.text.push_str(text);
    }
}

/// Deepest nesting [`parse_tree`] accepts.  OASIS reports are about ten
/// levels deep.
pub const MAX_DEPTH: usize = 256;

/// Parse a document into an element tree, namespaces resolved.
pub fn parse_tree(xml: &str) -> Result<Element, XmlError> {
    let mut reader = NsReader::from_str(xml);
    // (element, has seen a child element)
    let mut stack: Vec<(Element, bool)> = Vec::new();
    let mut root: Option<Element> = None;
    loop {
        let (ns, event) = reader.read_resolved_event()?;
        let namespace = match ns {
            ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
            _ => None,
        };
        match event {
            Event::Start(e) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(XmlError::Malformed("document too deep"));
                }
                stack.push((Element::from_start(namespace, &e)?, false))
            }
            Event::Empty(e) => {
                let element = Element::from_start(namespace, &e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let (element, _) = stack
                    .pop()
                    .ok_or(XmlError::Malformed("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => push_text(&mut stack, &t.unescape()?),
            Event::CData(c) => push_text(&mut stack, &String::from_utf8_lossy(&c.into_inner())),
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(XmlError::Malformed("unexpected end of document"));
    }
    root.ok_or(XmlError::Malformed("no element found"))
}

/// Which elements hold one row of data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowRule {
    /// Elements with this local name in this namespace (`None` means no namespace).
    Tag {
        namespace: Option<&'static str>,
        local_name: &'static str,
    },
    /// Every element below the root.
    AnyDescendant,
}

const fn ns_tag(local_name: &'static str) -> RowRule {
    RowRule::Tag {
        namespace: Some(OASIS_REPORT_NS),
        local_name,
    }
}

const fn tag(local_name: &'static str) -> RowRule {
    RowRule::Tag {
        namespace: None,
        local_name,
    }
}

/// Tried in order, the first rule with a match wins.  The last one always
/// matches and produces mostly noise.
pub const ROW_RULES: [RowRule; 9] = [
    ns_tag("REPORT_DATA"),
    tag("REPORT_DATA"),
    ns_tag("DataRow"),
    tag("DataRow"),
    ns_tag("row"),
    tag("row"),
    ns_tag("record"),
    tag("record"),
    RowRule::AnyDescendant,
];

impl RowRule {
    pub fn matches(&self, element: &Element) -> bool {
        match self {
            RowRule::Tag {
                namespace,
                local_name,
            } => element.local_name == *local_name && element.namespace.as_deref() == *namespace,
            RowRule::AnyDescendant => true,
        }
    }
}

impl fmt::Display for RowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRule::Tag {
                namespace: Some(ns),
                local_name,
            } => write!(f, ".//{{{}}}{}", ns, local_name),
            RowRule::Tag {
                namespace: None,
                local_name,
            } => write!(f, ".//{}", local_name),
            RowRule::AnyDescendant => write!(f, ".//*"),
        }
    }
}

/// Evaluate `rules` in order against the descendants of `root`.  Returns the
/// winning rule and its matches, or `None` if nothing matched.
pub fn select_rows<'a, 'r>(
    root: &'a Element,
    rules: &'r [RowRule],
) -> Option<(&'r RowRule, Vec<&'a Element>)> {
    let all = root.descendants();
    rules.iter().find_map(|rule| {
        let matched: Vec<&Element> = all.iter().copied().filter(|e| rule.matches(e)).collect();
        if matched.is_empty() {
            None
        } else {
            Some((rule, matched))
        }
    })
}

/// Flatten one element: its attributes, its own text as `text`, and one
/// field per child.  A child without text but with attributes is stored as
/// a json object of its attributes.
pub fn flatten(element: &Element) -> TabularRecord {
    let mut record = TabularRecord::new();
    for (k, v) in &element.attributes {
        record.insert(k.as_str(), v.as_str());
    }
    let text = element.text.trim();
    if !text.is_empty() {
        record.insert("text", text);
    }
    for child in &element.children {
        let text = child.text.trim();
        if !text.is_empty() {
            record.insert(child.local_name.as_str(), text);
        } else if !child.attributes.is_empty() {
            let map: serde_json::Map<String, serde_json::Value> = child
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            record.insert(
                child.local_name.as_str(),
                serde_json::Value::Object(map).to_string(),
            );
        }
    }
    record
}

/// Find the data rows of a document and flatten them.  Empty records are
/// dropped.
pub fn parse_records(xml: &str) -> Result<Vec<TabularRecord>, XmlError> {
    let root = parse_tree(xml)?;
    let (rule, elements) = match select_rows(&root, &ROW_RULES) {
        Some(x) => x,
        None => {
            warn!("No elements found below the document root");
            return Ok(Vec::new());
        }
    };
    if *rule == RowRule::AnyDescendant {
        warn!("No standard data elements found, attempting to extract all elements");
    } else {
        info!("Found data using path: {}", rule);
    }
    let records: Vec<TabularRecord> = elements
        .into_iter()
        .map(flatten)
        .filter(|r| !r.is_empty())
        .collect();
    if records.is_empty() {
        warn!("No records extracted from XML");
    } else {
        let columns = records.iter().flat_map(|r| r.names()).unique().count();
        info!(
            "Extracted {} records with {} columns",
            records.len(),
            columns
        );
    }
    Ok(records)
}

/// Decode and parse one file.  Never fails: problems are logged and the
/// file contributes no rows.
pub fn records_from_bytes(name: &str, bytes: &[u8]) -> Vec<TabularRecord> {
    let (encoding, xml) = match decode_text(bytes) {
        Some(x) => x,
        None => {
            warn!("Could not decode {} with any encoding", name);
            return Vec::new();
        }
    };
    info!("Successfully read {} with {} encoding", name, encoding);
    match parse_records(&xml) {
        Ok(records) => records,
        Err(e) => {
            error!("Error parsing {}: {}", name, e);
            Vec::new()
        }
    }
}
