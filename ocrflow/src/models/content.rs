use quick_xml::escape::escape;
use serde::Serialize;

use crate::error::Result;

/// One structural event pushed to a [`ContentSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContentEvent {
    Start {
        name: String,
        attributes: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Characters {
        text: String,
    },
}

/// Streaming receiver for extracted content.
///
/// Events arrive well nested: every `start_element` is matched by an
/// `end_element` with the same name.
pub trait ContentSink: Send {
    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()>;

    fn end_element(&mut self, name: &str) -> Result<()>;

    fn characters(&mut self, text: &str) -> Result<()>;
}

impl ContentSink for Vec<ContentEvent> {
    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        self.push(ContentEvent::Start {
            name: name.to_string(),
            attributes: attributes.to_vec(),
        });
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.push(ContentEvent::End {
            name: name.to_string(),
        });
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.push(ContentEvent::Characters {
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Serializes events back into an XHTML fragment.
#[derive(Debug, Default)]
pub struct XhtmlWriter {
    buffer: String,
}

impl XhtmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl ContentSink for XhtmlWriter {
    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        self.buffer.push('<');
        self.buffer.push_str(name);
        for (key, value) in attributes {
            self.buffer.push(' ');
            self.buffer.push_str(key);
            self.buffer.push_str("=\"");
            self.buffer.push_str(&escape(value.as_str()));
            self.buffer.push('"');
        }
        self.buffer.push('>');
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.buffer.push_str("</");
        self.buffer.push_str(name);
        self.buffer.push('>');
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.buffer.push_str(&escape(text));
        Ok(())
    }
}

/// Keeps only character data, dropping all markup.
#[derive(Debug, Default)]
pub struct TextCollector {
    text: String,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl ContentSink for TextCollector {
    fn start_element(&mut self, _name: &str, _attributes: &[(String, String)]) -> Result<()> {
        Ok(())
    }

    fn end_element(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.text.push_str(text);
        Ok(())
    }
}
