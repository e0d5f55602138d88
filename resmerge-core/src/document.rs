//! Lossless `<resources>` document model.
//!
//! A resource file is split into the text before the root element, the root
//! open/close tags, the root's children and the text after the root. Every
//! child keeps its exact source bytes, so a document that is not edited
//! serializes back byte-for-byte. Edits only remove or append whole children.
//!
//! Offsets come from `quick_xml::Reader::buffer_position`; the reader only
//! drives tokenization and well-formedness checks (mismatched end tags,
//! unclosed elements).

use std::fmt;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Root element every Android values file must use.
pub const ROOT_TAG: &str = "resources";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";
const DEFAULT_INDENT: &str = "    ";

/// A nested `<item>` of a style or array declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemNode {
    /// The item's `name` attribute (styles); arrays have none.
    pub name: Option<String>,
    /// Raw inner text of the item.
    pub inner: String,
}

/// One direct child element of the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementNode {
    /// Tag name as written (`string`, `color`, `string-array`, ...)
    pub tag: String,
    /// The `name` attribute, unescaped
    pub name: Option<String>,
    /// The `parent` attribute (styles)
    pub parent: Option<String>,
    /// `translatable="false"` turns this off
    pub translatable: bool,
    /// Exact source bytes of the element, start tag to end tag
    pub raw: String,
    /// Raw bytes between the start and end tag
    pub inner: String,
    /// Nested `<item>` children
    pub items: Vec<ItemNode>,
    /// Namespace declarations from the owning root that `raw` relies on
    pub namespaces: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    /// Whitespace, comments, processing instructions, CDATA at root level
    Markup(String),
    Element(ElementNode),
}

/// Well-formedness failure with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentError {
    pub message: String,
    pub offset: usize,
}

impl DocumentError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    /// 1-indexed (line, column) of the error inside `src`.
    pub fn line_column(&self, src: &str) -> (usize, usize) {
        let upto = &src[..self.offset.min(src.len())];
        let line = upto.matches('\n').count() + 1;
        let column = upto.rfind('\n').map_or(upto.len(), |nl| upto.len() - nl - 1) + 1;
        (line, column)
    }
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.offset)
    }
}

/// A parsed resource file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDocument {
    prolog: String,
    root_open: String,
    children: Vec<Node>,
    root_close: String,
    epilog: String,
    /// Original `<resources/>` bytes, kept while the root stays empty
    self_closing_raw: Option<String>,
    namespaces: Vec<(String, String)>,
}

impl ResourceDocument {
    /// Minimal valid document used for target files that do not exist yet.
    pub fn empty() -> Self {
        Self {
            prolog: XML_DECLARATION.to_string(),
            root_open: format!("<{ROOT_TAG}>"),
            children: vec![Node::Markup("\n".to_string())],
            root_close: format!("</{ROOT_TAG}>"),
            epilog: "\n".to_string(),
            self_closing_raw: None,
            namespaces: Vec::new(),
        }
    }

    /// Parse a document. Fails on malformed XML or a root other than `<resources>`.
    pub fn parse(src: &str) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(src);
        let mut root: Option<(String, usize)> = None;
        let mut namespaces = Vec::new();
        let mut children: Vec<Node> = Vec::new();
        let mut cursor = 0usize;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| DocumentError::new(e.to_string(), reader.error_position() as usize))?;
            let end = reader.buffer_position() as usize;

            match event {
                Event::Start(e) => {
                    let start = tag_start(src, end);
                    if root.is_none() {
                        let tag = tag_name(&e);
                        check_root(&tag, start)?;
                        namespaces = namespace_declarations(&e, start)?;
                        root = Some((tag, start));
                        cursor = end;
                    } else {
                        push_markup(&mut children, &src[cursor..start]);
                        let node = read_element(&mut reader, src, &e, start, end, &namespaces)?;
                        cursor = start + node.raw.len();
                        children.push(Node::Element(node));
                    }
                }
                Event::Empty(e) => {
                    let start = tag_start(src, end);
                    if root.is_none() {
                        let tag = tag_name(&e);
                        check_root(&tag, start)?;
                        let raw = &src[start..end];
                        let open = raw.trim_end_matches("/>").trim_end();
                        ensure_nothing_after_root(&mut reader)?;
                        return Ok(Self {
                            prolog: src[..start].to_string(),
                            root_open: format!("{open}>"),
                            children: Vec::new(),
                            root_close: format!("</{tag}>"),
                            epilog: src[end..].to_string(),
                            self_closing_raw: Some(raw.to_string()),
                            namespaces: namespace_declarations(&e, start)?,
                        });
                    }
                    push_markup(&mut children, &src[cursor..start]);
                    let node = element_from_start(&e, start, src[start..end].to_string(), &namespaces)?;
                    cursor = end;
                    children.push(Node::Element(node));
                }
                Event::End(_) => {
                    let start = tag_start(src, end);
                    let Some((_, root_start)) = root else {
                        return Err(DocumentError::new("end tag before any root element", start));
                    };
                    push_markup(&mut children, &src[cursor..start]);
                    ensure_nothing_after_root(&mut reader)?;
                    return Ok(Self {
                        prolog: src[..root_start].to_string(),
                        root_open: src[root_start..tag_end(src, root_start)].to_string(),
                        children,
                        root_close: src[start..end].to_string(),
                        epilog: src[end..].to_string(),
                        self_closing_raw: None,
                        namespaces,
                    });
                }
                Event::Eof => {
                    let message = if root.is_some() {
                        "unexpected end of document: <resources> is not closed"
                    } else {
                        "no root element"
                    };
                    return Err(DocumentError::new(message, src.len()));
                }
                // Text, comments, declarations: captured through offsets.
                _ => {}
            }
        }
    }

    /// All child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &ElementNode> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(el) => Some(el),
            Node::Markup(_) => None,
        })
    }

    /// Remove every child element matching `pred`, together with the
    /// indentation that preceded it. Returns the number removed.
    pub fn remove_where<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&ElementNode) -> bool,
    {
        let mut removed = 0;
        let mut i = 0;
        while i < self.children.len() {
            let hit = matches!(&self.children[i], Node::Element(el) if pred(el));
            if !hit {
                i += 1;
                continue;
            }
            self.children.remove(i);
            removed += 1;
            if i > 0 {
                if let Node::Markup(text) = &mut self.children[i - 1] {
                    strip_trailing_line(text);
                    if text.is_empty() {
                        self.children.remove(i - 1);
                        i -= 1;
                    }
                }
            }
        }
        if removed > 0 {
            self.coalesce();
        }
        removed
    }

    /// Append an element as the last child, matching the file's indentation.
    /// Namespace declarations the element needs are added to the root.
    pub fn append(&mut self, node: ElementNode) {
        for (prefix, uri) in &node.namespaces {
            self.declare_namespace(prefix, uri);
        }
        let indent = self.indent();
        let newline = self.line_ending();
        let tail = match self.children.last_mut() {
            Some(Node::Markup(text)) => {
                let keep = text.trim_end().len();
                let tail = text.split_off(keep);
                if text.is_empty() {
                    self.children.pop();
                }
                tail
            }
            _ => String::new(),
        };
        self.children.push(Node::Markup(format!("{newline}{indent}")));
        self.children.push(Node::Element(node));
        self.children
            .push(Node::Markup(if tail.contains('\n') { tail } else { newline.to_string() }));
        self.self_closing_raw = None;
    }

    /// Serialize back to text.
    pub fn to_xml_string(&self) -> String {
        if let Some(raw) = &self.self_closing_raw {
            return format!("{}{}{}", self.prolog, raw, self.epilog);
        }
        let mut out = String::with_capacity(self.prolog.len() + 256);
        out.push_str(&self.prolog);
        out.push_str(&self.root_open);
        for child in &self.children {
            match child {
                Node::Markup(text) => out.push_str(text),
                Node::Element(el) => out.push_str(&el.raw),
            }
        }
        out.push_str(&self.root_close);
        out.push_str(&self.epilog);
        out
    }

    /// `\r\n` when the file already uses it anywhere, else `\n`.
    fn line_ending(&self) -> &'static str {
        let markup = self.children.iter().filter_map(|n| match n {
            Node::Markup(text) => Some(text.as_str()),
            Node::Element(_) => None,
        });
        let crlf = [self.prolog.as_str(), self.root_open.as_str(), self.epilog.as_str()]
            .into_iter()
            .chain(markup)
            .any(|text| text.contains("\r\n"));
        if crlf {
            "\r\n"
        } else {
            "\n"
        }
    }

    fn indent(&self) -> String {
        let mut prev: Option<&str> = None;
        for child in &self.children {
            match child {
                Node::Markup(text) => prev = Some(text),
                Node::Element(_) => {
                    if let Some(line) = prev.and_then(|t| t.rsplit('\n').next()) {
                        if !line.is_empty() && line.trim().is_empty() {
                            return line.to_string();
                        }
                    }
                    prev = None;
                }
            }
        }
        DEFAULT_INDENT.to_string()
    }

    fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        if self.namespaces.iter().any(|(p, _)| p == prefix) {
            return;
        }
        let insert_at = self.root_open.len().saturating_sub(1);
        self.root_open
            .insert_str(insert_at, &format!(" xmlns:{prefix}=\"{uri}\""));
        self.namespaces.push((prefix.to_string(), uri.to_string()));
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<Node> = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            match (merged.last_mut(), child) {
                (Some(Node::Markup(prev)), Node::Markup(text)) => prev.push_str(&text),
                (_, child) => merged.push(child),
            }
        }
        self.children = merged;
    }
}

fn check_root(tag: &str, at: usize) -> Result<(), DocumentError> {
    if tag == ROOT_TAG {
        Ok(())
    } else {
        Err(DocumentError::new(
            format!("root element is <{tag}>, expected <{ROOT_TAG}>"),
            at,
        ))
    }
}

/// Only comments and whitespace may follow the root element.
fn ensure_nothing_after_root(reader: &mut Reader<&[u8]>) -> Result<(), DocumentError> {
    loop {
        let event = reader
            .read_event()
            .map_err(|e| DocumentError::new(e.to_string(), reader.error_position() as usize))?;
        match event {
            Event::Eof => return Ok(()),
            Event::Start(_) | Event::Empty(_) | Event::End(_) => {
                return Err(DocumentError::new(
                    "markup after the root element",
                    reader.buffer_position() as usize,
                ));
            }
            _ => {}
        }
    }
}

/// Reads the rest of an element whose start tag was just consumed.
fn read_element(
    reader: &mut Reader<&[u8]>,
    src: &str,
    start_tag: &BytesStart,
    start: usize,
    open_end: usize,
    namespaces: &[(String, String)],
) -> Result<ElementNode, DocumentError> {
    let mut depth = 1usize;
    let mut items = Vec::new();
    let mut open_item: Option<(Option<String>, usize)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DocumentError::new(e.to_string(), reader.error_position() as usize))?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                depth += 1;
                if depth == 2 && e.name().as_ref() == b"item" {
                    open_item = Some((attribute(&e, b"name", end)?, end));
                }
            }
            Event::Empty(e) => {
                if depth == 1 && e.name().as_ref() == b"item" {
                    items.push(ItemNode {
                        name: attribute(&e, b"name", end)?,
                        inner: String::new(),
                    });
                }
            }
            Event::End(_) => {
                let close_start = tag_start(src, end);
                depth -= 1;
                if depth == 1 {
                    if let Some((name, inner_start)) = open_item.take() {
                        items.push(ItemNode {
                            name,
                            inner: src[inner_start..close_start].to_string(),
                        });
                    }
                }
                if depth == 0 {
                    let mut node =
                        element_from_start(start_tag, start, src[start..end].to_string(), namespaces)?;
                    node.inner = src[open_end..close_start].to_string();
                    node.items = items;
                    return Ok(node);
                }
            }
            Event::Eof => {
                return Err(DocumentError::new(
                    format!("unclosed <{}> element", tag_name(start_tag)),
                    start,
                ));
            }
            _ => {}
        }
    }
}

fn element_from_start(
    e: &BytesStart,
    at: usize,
    raw: String,
    namespaces: &[(String, String)],
) -> Result<ElementNode, DocumentError> {
    let mut name = None;
    let mut parent = None;
    let mut translatable = true;
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DocumentError::new(err.to_string(), at))?;
        let value = attr
            .unescape_value()
            .map_err(|err| DocumentError::new(err.to_string(), at))?;
        match attr.key.as_ref() {
            b"name" => name = Some(value.into_owned()),
            b"parent" => parent = Some(value.into_owned()),
            b"translatable" => translatable = value != "false",
            _ => {}
        }
    }
    let used = namespaces
        .iter()
        .filter(|(prefix, _)| raw.contains(&format!("{prefix}:")))
        .cloned()
        .collect();
    Ok(ElementNode {
        tag: tag_name(e),
        name,
        parent,
        translatable,
        raw,
        inner: String::new(),
        items: Vec::new(),
        namespaces: used,
    })
}

fn attribute(e: &BytesStart, key: &[u8], at: usize) -> Result<Option<String>, DocumentError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DocumentError::new(err.to_string(), at))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| DocumentError::new(err.to_string(), at))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn namespace_declarations(e: &BytesStart, at: usize) -> Result<Vec<(String, String)>, DocumentError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DocumentError::new(err.to_string(), at))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if let Some(prefix) = key.strip_prefix("xmlns:") {
            let value = attr
                .unescape_value()
                .map_err(|err| DocumentError::new(err.to_string(), at))?;
            out.push((prefix.to_string(), value.into_owned()));
        }
    }
    Ok(out)
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Offset of the `<` opening the tag that ends at `end`.
fn tag_start(src: &str, end: usize) -> usize {
    src[..end].rfind('<').unwrap_or(0)
}

/// Offset just past the `>` closing the tag that starts at `start`.
fn tag_end(src: &str, start: usize) -> usize {
    let mut quote: Option<char> = None;
    for (i, c) in src[start..].char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return start + i + 1,
            _ => {}
        }
    }
    src.len()
}

fn push_markup(children: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Markup(prev)) = children.last_mut() {
        prev.push_str(text);
    } else {
        children.push(Node::Markup(text.to_string()));
    }
}

/// Drop trailing spaces/tabs and one line break.
fn strip_trailing_line(text: &mut String) {
    let keep = text.trim_end_matches([' ', '\t']).len();
    text.truncate(keep);
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
}
