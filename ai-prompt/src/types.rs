use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
}

/// One typed content block of a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub text: String,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Text,
            text: text.into(),
        }
    }
}

/// A single conversation turn. Adapters never produce one with an empty
/// block list.
///
/// A plain string turn is stored as one text block, so it renders to the same
/// wire shape as a one-element block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub role: Role,
    pub contents: Vec<Content>,
}

impl History {
    pub fn new(role: Role, contents: Vec<Content>) -> Self {
        Self { role, contents }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            contents: vec![Content::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Concatenated text of every block, used by flat-string wire formats.
    pub fn joined_text(&self) -> String {
        join_text(&self.contents)
    }
}

/// A few-shot prompt/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub prompt: String,
    pub response: String,
}

impl Example {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }
}

pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_MAXIMUM_TOKENS: u32 = 2000;

/// A structured prompt plus the conversation it continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub role: Option<String>,
    pub context: Option<String>,
    pub instructions: Option<String>,
    pub input: Option<String>,
    pub data: Option<String>,
    pub temperature: f64,
    pub maximum_tokens: u32,
    pub examples: Vec<Example>,
    pub history: Vec<History>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            role: None,
            context: None,
            instructions: None,
            input: None,
            data: None,
            temperature: DEFAULT_TEMPERATURE,
            maximum_tokens: DEFAULT_MAXIMUM_TOKENS,
            examples: Vec::new(),
            history: Vec::new(),
        }
    }
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_maximum_tokens(mut self, maximum_tokens: u32) -> Self {
        self.maximum_tokens = maximum_tokens;
        self
    }

    pub fn with_example(mut self, example: Example) -> Self {
        self.examples.push(example);
        self
    }

    pub fn with_examples(mut self, examples: Vec<Example>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_history(mut self, history: Vec<History>) -> Self {
        self.history = history;
        self
    }

    /// The role text, trimmed, or `None` when absent or blank.
    pub fn system_role(&self) -> Option<&str> {
        non_blank(self.role.as_deref())
    }
}

/// Characters stripped from both ends of prompt text. Only ASCII blanks, so
/// text made of other Unicode spaces (e.g. NBSP) is kept.
const BLANKS: &[char] = &[' ', '\t', '\n', '\r', '\0', '\u{B}'];

pub(crate) fn trim_blank(value: &str) -> &str {
    value.trim_matches(BLANKS)
}

/// Trims `value` and drops it when nothing is left.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(trim_blank).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The normalized reply of either provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub model: String,
    pub role: Role,
    pub contents: Vec<Content>,
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
    /// Prior history, the user turn that was sent, and the assistant turn received.
    pub history: Vec<History>,
}

impl Response {
    pub fn text(&self) -> String {
        join_text(&self.contents)
    }
}

fn join_text(contents: &[Content]) -> String {
    contents
        .iter()
        .filter(|c| c.content_type == ContentType::Text)
        .map(|c| c.text.as_str())
        .collect()
}
