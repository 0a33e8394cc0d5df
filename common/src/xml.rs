use quick_xml::{events::Event, Reader};
use thiserror::Error;

pub const DOCUMENT_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("document is not valid utf-8")]
    NotUtf8,
    #[error("xml syntax error: {0}")]
    Syntax(String),
    #[error("element <{0}> is never closed")]
    Unclosed(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("document has more than one root element")]
    MultipleRoots,
    #[error("text found outside the root element")]
    TextOutsideRoot,
}

impl From<quick_xml::Error> for XmlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Syntax(err.to_string())
    }
}

/// One element of a structured-text document: name, attributes, trimmed text
/// content and child elements in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn leaf(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.child(XmlNode::new(name).text(text))
    }

    pub fn push(&mut self, child: XmlNode) {
        self.children.push(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text_content(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn child_named(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Resolves a slash-delimited path such as `event/info/Temperature`. The
    /// first segment names this node itself.
    pub fn navigate(&self, path: &str) -> Option<&XmlNode> {
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        if segments.next()? != self.name {
            return None;
        }
        segments.try_fold(self, |node, segment| node.child_named(segment))
    }

    /// Trimmed text at `path`; missing and empty leaves both read as absent.
    pub fn value(&self, path: &str) -> Option<&str> {
        let text = self.navigate(path)?.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn parse(raw: &[u8]) -> Result<XmlNode, XmlError> {
        let source = std::str::from_utf8(raw).map_err(|_| XmlError::NotUtf8)?;
        let mut reader = Reader::from_str(source);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    if stack.is_empty() && root.is_some() {
                        return Err(XmlError::MultipleRoots);
                    }
                    stack.push(node_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let node = node_from_start(&start)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack.pop().ok_or_else(|| {
                        XmlError::Syntax("closing tag without an open element".to_string())
                    })?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    append_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let bytes = data.into_inner();
                    let text = std::str::from_utf8(&bytes).map_err(|_| XmlError::NotUtf8)?;
                    append_text(&mut stack, text.trim())?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(XmlError::Unclosed(open.name));
        }
        root.ok_or(XmlError::NoRoot)
    }

    pub fn to_document(&self) -> String {
        let mut out = String::from(DOCUMENT_HEADER);
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&quick_xml::escape::escape(value.as_str()));
            out.push('"');
        }
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&quick_xml::escape::escape(self.text.as_str()));
        for child in &self.children {
            child.write_into(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn node_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode, XmlError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| XmlError::NotUtf8)?
        .to_string();
    let mut node = XmlNode::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|_| XmlError::NotUtf8)?
            .to_string();
        let value = attr.unescape_value()?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None if root.is_some() => Err(XmlError::MultipleRoots),
        None => {
            *root = Some(node);
            Ok(())
        }
    }
}

fn append_text(stack: &mut [XmlNode], text: &str) -> Result<(), XmlError> {
    if text.is_empty() {
        return Ok(());
    }
    let node = stack.last_mut().ok_or(XmlError::TextOutsideRoot)?;
    node.text.push_str(text);
    Ok(())
}
