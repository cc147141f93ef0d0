//! Prompt schema loading and document validation.
//!
//! Understands the subset of XML Schema the prompt schema is written in:
//! global and local `xs:element` declarations typed `xs:string` or carrying an
//! inline `xs:complexType` with a single `xs:sequence`, `minOccurs`/`maxOccurs`
//! (including `unbounded`), `targetNamespace` and `elementFormDefault`.

use crate::error::{PromptError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use std::path::{Path, PathBuf};

const XS_NAMESPACE: &[u8] = b"http://www.w3.org/2001/XMLSchema";

/// Path of the schema shipped with this crate.
pub fn bundled_schema_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("schema")
        .join("prompt.xsd")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ContentModel {
    Text,
    Sequence(Vec<ElementDecl>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ElementDecl {
    name: String,
    min_occurs: u32,
    /// `None` means unbounded.
    max_occurs: Option<u32>,
    content: ContentModel,
}

#[derive(Debug, Clone)]
pub struct PromptSchema {
    namespace: Option<String>,
    qualified: bool,
    roots: Vec<ElementDecl>,
}

impl PromptSchema {
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| PromptError::Schema(format!("read {}: {e}", path.display())))?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self> {
        let tree = read_schema_tree(source)?;
        if !tree.is("schema") {
            return Err(PromptError::Schema(format!(
                "expected xs:schema root, found {}",
                tree.local
            )));
        }

        let mut roots = Vec::new();
        for child in tree.children.iter().filter(|c| !c.is("annotation")) {
            if !child.is("element") {
                return Err(unsupported(child));
            }
            roots.push(element_decl(child)?);
        }
        if roots.is_empty() {
            return Err(PromptError::Schema(
                "schema declares no elements".to_string(),
            ));
        }

        Ok(Self {
            namespace: tree.attr("targetNamespace").map(str::to_string),
            qualified: tree.attr("elementFormDefault") == Some("qualified"),
            roots,
        })
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Validates `document`, reporting any violation as [`PromptError::InvalidPrompt`].
    pub fn validate(&self, document: &str) -> Result<()> {
        self.check(document).map_err(|reason| {
            tracing::debug!(%reason, "prompt document rejected by schema");
            PromptError::InvalidPrompt
        })
    }

    fn check(&self, document: &str) -> std::result::Result<(), String> {
        let root = read_document_tree(document)?;
        if root.namespace.as_deref() != self.namespace.as_deref() {
            return Err(format!(
                "root <{}> is in namespace {:?}, expected {:?}",
                root.name, root.namespace, self.namespace
            ));
        }
        let decl = self
            .roots
            .iter()
            .find(|d| d.name == root.name)
            .ok_or_else(|| format!("no global declaration for <{}>", root.name))?;
        self.check_element(decl, &root)
    }

    fn check_element(
        &self,
        decl: &ElementDecl,
        element: &DocElement,
    ) -> std::result::Result<(), String> {
        let decls = match &decl.content {
            ContentModel::Text => {
                return match element.children.first() {
                    Some(child) => Err(format!(
                        "<{}> may only hold text, found <{}>",
                        element.name, child.name
                    )),
                    None => Ok(()),
                };
            }
            ContentModel::Sequence(decls) => decls,
        };

        if element.has_text {
            return Err(format!("character data is not allowed in <{}>", element.name));
        }

        let local_namespace = if self.qualified {
            self.namespace.as_deref()
        } else {
            None
        };

        let mut children = element.children.iter().peekable();
        for child_decl in decls {
            let mut count = 0u32;
            while let Some(child) = children.peek() {
                if child.name != child_decl.name
                    || child_decl.max_occurs.is_some_and(|max| count >= max)
                {
                    break;
                }
                if child.namespace.as_deref() != local_namespace {
                    return Err(format!(
                        "<{}> is in namespace {:?}, expected {:?}",
                        child.name, child.namespace, local_namespace
                    ));
                }
                self.check_element(child_decl, child)?;
                count += 1;
                children.next();
            }
            if count < child_decl.min_occurs {
                return Err(format!(
                    "<{}> requires at least {} <{}>",
                    element.name, child_decl.min_occurs, child_decl.name
                ));
            }
        }

        match children.next() {
            Some(extra) => Err(format!(
                "unexpected <{}> in <{}>",
                extra.name, element.name
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct SchemaNode {
    in_xs_namespace: bool,
    local: String,
    attrs: Vec<(String, String)>,
    children: Vec<SchemaNode>,
}

impl SchemaNode {
    fn is(&self, local: &str) -> bool {
        self.in_xs_namespace && self.local == local
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn unsupported(node: &SchemaNode) -> PromptError {
    PromptError::Schema(format!("unsupported schema construct <{}>", node.local))
}

fn element_decl(node: &SchemaNode) -> Result<ElementDecl> {
    let name = node
        .attr("name")
        .ok_or_else(|| PromptError::Schema("xs:element without a name".to_string()))?;

    let min_occurs = match node.attr("minOccurs") {
        Some(v) => parse_occurs(name, v)?,
        None => 1,
    };
    let max_occurs = match node.attr("maxOccurs") {
        Some("unbounded") => None,
        Some(v) => Some(parse_occurs(name, v)?),
        None => Some(1),
    };

    let complex = node.children.iter().find(|c| c.is("complexType"));
    let content = match (node.attr("type"), complex) {
        (Some(_), Some(_)) => {
            return Err(PromptError::Schema(format!(
                "element {name} has both a type and an inline complexType"
            )));
        }
        (Some(ty), None) if is_string_type(ty) => ContentModel::Text,
        (Some(ty), None) => {
            return Err(PromptError::Schema(format!(
                "element {name} uses unsupported type {ty}"
            )));
        }
        (None, Some(complex)) => ContentModel::Sequence(sequence_of(complex)?),
        (None, None) => ContentModel::Text,
    };

    Ok(ElementDecl {
        name: name.to_string(),
        min_occurs,
        max_occurs,
        content,
    })
}

fn sequence_of(complex: &SchemaNode) -> Result<Vec<ElementDecl>> {
    let mut out = Vec::new();
    for group in complex.children.iter().filter(|c| !c.is("annotation")) {
        if !group.is("sequence") {
            return Err(unsupported(group));
        }
        for item in group.children.iter().filter(|c| !c.is("annotation")) {
            if !item.is("element") {
                return Err(unsupported(item));
            }
            out.push(element_decl(item)?);
        }
    }
    Ok(out)
}

fn parse_occurs(name: &str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| {
        PromptError::Schema(format!("element {name} has invalid occurrence bound {value:?}"))
    })
}

fn is_string_type(ty: &str) -> bool {
    ty.rsplit(':').next() == Some("string")
}

fn read_schema_tree(source: &str) -> Result<SchemaNode> {
    let mut reader = NsReader::from_str(source);
    let mut stack: Vec<SchemaNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_resolved_event()? {
            (ns, Event::Start(e)) => {
                let in_xs = is_xs(&ns);
                stack.push(schema_node(in_xs, &e)?);
            }
            (ns, Event::Empty(e)) => {
                let in_xs = is_xs(&ns);
                let node = schema_node(in_xs, &e)?;
                attach(&mut stack, &mut root, node);
            }
            (_, Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| PromptError::Schema("unbalanced schema document".to_string()))?;
                attach(&mut stack, &mut root, node);
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    root.ok_or_else(|| PromptError::Schema("schema document is empty".to_string()))
}

fn is_xs(ns: &ResolveResult<'_>) -> bool {
    matches!(ns, ResolveResult::Bound(n) if n.as_ref() == XS_NAMESPACE)
}

fn schema_node(in_xs_namespace: bool, e: &BytesStart<'_>) -> Result<SchemaNode> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(SchemaNode {
        in_xs_namespace,
        local: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        attrs,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [SchemaNode], root: &mut Option<SchemaNode>, node: SchemaNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

#[derive(Debug)]
struct DocElement {
    namespace: Option<String>,
    name: String,
    has_text: bool,
    children: Vec<DocElement>,
}

fn read_document_tree(document: &str) -> std::result::Result<DocElement, String> {
    let mut reader = NsReader::from_str(document);
    let mut stack: Vec<DocElement> = Vec::new();
    let mut root: Option<DocElement> = None;

    loop {
        let (ns, event) = reader
            .read_resolved_event()
            .map_err(|e| format!("malformed document: {e}"))?;
        match event {
            Event::Start(e) => {
                let element = doc_element(&ns, &e)?;
                if stack.is_empty() && root.is_some() {
                    return Err("document has more than one root element".to_string());
                }
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = doc_element(&ns, &e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => return Err("document has more than one root element".to_string()),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| "unbalanced document".to_string())?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(t) => {
                check_chars(&t)?;
                if let Some(current) = stack.last_mut() {
                    if !t.iter().all(u8::is_ascii_whitespace) {
                        current.has_text = true;
                    }
                } else if !t.iter().all(u8::is_ascii_whitespace) {
                    return Err("character data outside the root element".to_string());
                }
            }
            Event::CData(c) => {
                check_chars(&c)?;
                match stack.last_mut() {
                    Some(current) => {
                        if !c.iter().all(u8::is_ascii_whitespace) {
                            current.has_text = true;
                        }
                    }
                    None => return Err("CDATA outside the root element".to_string()),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("document ended inside an element".to_string());
    }
    root.ok_or_else(|| "document has no root element".to_string())
}

/// Rejects text outside the XML 1.0 `Char` production.
fn check_chars(raw: &[u8]) -> std::result::Result<(), String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("character data is not utf-8: {e}"))?;
    match text.chars().find(|&c| !is_xml_char(c)) {
        Some(c) => Err(format!("character U+{:04X} is not allowed in XML", u32::from(c))),
        None => Ok(()),
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn doc_element(ns: &ResolveResult<'_>, e: &BytesStart<'_>) -> std::result::Result<DocElement, String> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let namespace = match ns {
        ResolveResult::Bound(n) => Some(String::from_utf8_lossy(n.as_ref()).into_owned()),
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(prefix) => {
            return Err(format!(
                "<{name}> uses undeclared prefix {}",
                String::from_utf8_lossy(prefix)
            ));
        }
    };
    Ok(DocElement {
        namespace,
        name,
        has_text: false,
        children: Vec::new(),
    })
}
