use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured capture of a page, as produced by a snapshot provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub root: DocumentNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentNode {
    Element(Element),
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Lower-case tag name.
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<DocumentNode>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn child(mut self, node: impl Into<DocumentNode>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(DocumentNode::Text { text: text.into() })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

impl From<Element> for DocumentNode {
    fn from(e: Element) -> Self {
        DocumentNode::Element(e)
    }
}

/// What the reducer made of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    Link,
    Input,
    TextArea,
    Select,
    Checkbox,
    Radio,
    /// Generic element made clickable through a role or handler.
    Clickable,
}

/// Interactive element kept in a compact snapshot, addressable by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageElement {
    pub id: u32,
    pub kind: ElementKind,
    pub tag: String,
    pub label: String,
}

/// Reduced page handed to the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactSnapshot {
    pub text: String,
    pub elements: Vec<PageElement>,
}

impl CompactSnapshot {
    pub fn element(&self, id: u32) -> Option<&PageElement> {
        self.elements.iter().find(|e| e.id == id)
    }
}
