use crate::error::{PromptError, Result};
use crate::schema::{PromptSchema, bundled_schema_path};
use crate::types::{Request, non_blank, trim_blank};
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, Event};
use std::path::Path;
use std::sync::Arc;

pub const PROMPT_NAMESPACE: &str = "https://static.elliotjreed.com";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str =
    "https://static.elliotjreed.com https://static.elliotjreed.com/prompt.xsd";

/// Where the request's role text ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePlacement {
    /// Written as the `<role>` element of the document.
    Document,
    /// Left out of the document; the caller sends it some other way.
    Omitted,
}

/// Renders the textual fields of a [`Request`] as a schema-checked XML prompt.
///
/// Every field is written as CDATA so user text reaches the model verbatim,
/// markup-like substrings included.
#[derive(Debug, Clone)]
pub struct PromptSerializer {
    schema: Arc<PromptSchema>,
}

impl PromptSerializer {
    pub fn new(schema: PromptSchema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn from_schema_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(PromptSchema::load(path)?))
    }

    /// Serializer checking against the schema file shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_schema_path(bundled_schema_path())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(role = ?role))]
    pub fn serialize(&self, request: &Request, role: RolePlacement) -> Result<String> {
        let document = render(request, role)?;
        self.schema.validate(&document)?;
        tracing::debug!(bytes = document.len(), "prompt document serialized");
        Ok(document)
    }
}

fn render(request: &Request, role: RolePlacement) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    write(&mut writer, Event::Decl(BytesDecl::new("1.0", None, None)))?;
    writer.get_mut().push(b'\n');

    let root = BytesStart::new("prompt").with_attributes([
        ("xmlns", PROMPT_NAMESPACE),
        ("xmlns:xsi", XSI_NAMESPACE),
        ("xsi:schemaLocation", SCHEMA_LOCATION),
    ]);
    write(&mut writer, Event::Start(root))?;

    let role_text = match role {
        RolePlacement::Document => request.role.as_deref(),
        RolePlacement::Omitted => None,
    };
    let fields = [
        ("role", role_text),
        ("context", request.context.as_deref()),
        ("instructions", request.instructions.as_deref()),
        ("user_input", request.input.as_deref()),
        ("data", request.data.as_deref()),
    ];
    for (tag, value) in fields {
        if let Some(text) = non_blank(value) {
            write_verbatim(&mut writer, tag, text)?;
        }
    }

    if !request.examples.is_empty() {
        write(&mut writer, Event::Start(BytesStart::new("examples")))?;
        for example in &request.examples {
            write(&mut writer, Event::Start(BytesStart::new("example")))?;
            write_verbatim(&mut writer, "example_prompt", trim_blank(&example.prompt))?;
            write_verbatim(&mut writer, "example_response", trim_blank(&example.response))?;
            write(&mut writer, Event::End(BytesEnd::new("example")))?;
        }
        write(&mut writer, Event::End(BytesEnd::new("examples")))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("prompt")))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes)
        .map_err(|e| PromptError::InvalidRequest(format!("prompt document is not utf-8: {e}")))
}

fn write_verbatim(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(tag)))?;
    for section in cdata_sections(text) {
        write(writer, Event::CData(BytesCData::new(section)))?;
    }
    write(writer, Event::End(BytesEnd::new(tag)))
}

/// Splits `text` so no section contains the CDATA terminator `]]>`.
///
/// Concatenating the sections yields `text` again.
fn cdata_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find("]]>") {
        sections.push(&rest[..idx + 2]);
        rest = &rest[idx + 2..];
    }
    sections.push(rest);
    sections
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| PromptError::InvalidRequest(format!("write prompt document: {e}")))
}
