use std::sync::OnceLock;

use regex::Regex;

use crate::page::traits::SnapshotReducer;
use crate::page::types::{CompactSnapshot, Document, DocumentNode, Element, ElementKind, PageElement};

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "head", "meta", "link", "iframe",
];

/// Attributes worth showing the model, in output order.
const KEPT_ATTRIBUTES: &[&str] = &[
    "type",
    "name",
    "role",
    "aria-label",
    "placeholder",
    "title",
    "alt",
    "value",
];

const CLICKABLE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "radio", "menuitem", "option", "tab", "switch", "combobox",
    "textbox",
];

fn whitespace() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").ok()).as_ref()
}

fn collapse(text: &str) -> String {
    match whitespace() {
        Some(re) => re.replace_all(text, " ").trim().to_string(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Default reducer: one line per interactive element or text run, hidden and
/// non-visual nodes dropped, interactive elements numbered in document order.
#[derive(Debug, Clone, Default)]
pub struct CompactReducer;

impl SnapshotReducer for CompactReducer {
    fn reduce(&self, document: &Document) -> CompactSnapshot {
        let mut walker = Walker::default();
        walker.walk(&document.root, false);
        tracing::debug!(
            elements = walker.elements.len(),
            lines = walker.lines.len(),
            "snapshot reduced"
        );
        CompactSnapshot {
            text: walker.lines.join("\n"),
            elements: walker.elements,
        }
    }
}

#[derive(Default)]
struct Walker {
    next_id: u32,
    lines: Vec<String>,
    elements: Vec<PageElement>,
}

impl Walker {
    /// `inside` is true below an interactive element, whose text already
    /// went into that element's line.
    fn walk(&mut self, node: &DocumentNode, inside: bool) {
        match node {
            DocumentNode::Text { text } => {
                if !inside {
                    let text = collapse(text);
                    if !text.is_empty() {
                        self.lines.push(text);
                    }
                }
            }
            DocumentNode::Element(el) => {
                if is_hidden(el) {
                    return;
                }
                if let Some(kind) = interactive_kind(el) {
                    self.emit(el, kind);
                    for child in &el.children {
                        self.walk(child, true);
                    }
                } else {
                    for child in &el.children {
                        self.walk(child, inside);
                    }
                }
            }
        }
    }

    fn emit(&mut self, el: &Element, kind: ElementKind) {
        let id = self.next_id;
        self.next_id += 1;

        let mut label = String::new();
        own_text(el, &mut label);
        let label = collapse(&label);

        let mut line = format!("<{} id={}", el.tag, id);
        for name in KEPT_ATTRIBUTES {
            if let Some(value) = el.get(name).map(collapse).filter(|v| !v.is_empty()) {
                line.push_str(&format!(" {name}=\"{}\"", value.replace('"', "'")));
            }
        }
        if matches!(kind, ElementKind::Input | ElementKind::Checkbox | ElementKind::Radio) {
            line.push('>');
        } else {
            line.push_str(&format!(">{label}</{}>", el.tag));
        }
        self.lines.push(line);

        self.elements.push(PageElement {
            id,
            kind,
            tag: el.tag.clone(),
            label,
        });
    }
}

/// Text under `el`, skipping nested interactive subtrees.
fn own_text(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            DocumentNode::Text { text } => {
                out.push(' ');
                out.push_str(text);
            }
            DocumentNode::Element(inner) => {
                if !is_hidden(inner) && interactive_kind(inner).is_none() {
                    own_text(inner, out);
                }
            }
        }
    }
}

fn is_hidden(el: &Element) -> bool {
    SKIPPED_TAGS.contains(&el.tag.as_str())
        || el.attributes.contains_key("hidden")
        || el.get("aria-hidden") == Some("true")
        || el.get("type") == Some("hidden")
}

fn interactive_kind(el: &Element) -> Option<ElementKind> {
    let kind = match el.tag.as_str() {
        "button" => ElementKind::Button,
        "a" if el.attributes.contains_key("href") => ElementKind::Link,
        "textarea" => ElementKind::TextArea,
        "select" => ElementKind::Select,
        "input" => match el.get("type").unwrap_or("text") {
            "checkbox" => ElementKind::Checkbox,
            "radio" => ElementKind::Radio,
            "submit" | "button" | "reset" => ElementKind::Button,
            _ => ElementKind::Input,
        },
        _ => {
            let role = el.get("role").unwrap_or_default();
            if CLICKABLE_ROLES.contains(&role)
                || el.attributes.contains_key("onclick")
                || el.get("contenteditable") == Some("true")
            {
                ElementKind::Clickable
            } else {
                return None;
            }
        }
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Document {
        let body = Element::new("body")
            .child(Element::new("script").text("var x = 1;"))
            .child(Element::new("h1").text("  Senior   Engineer \n"))
            .child(
                Element::new("form")
                    .child(
                        Element::new("input")
                            .attr("type", "text")
                            .attr("name", "full_name")
                            .attr("placeholder", "Full name"),
                    )
                    .child(Element::new("input").attr("type", "hidden").attr("name", "csrf"))
                    .child(
                        Element::new("button")
                            .attr("type", "submit")
                            .child(Element::new("span").text("Apply")),
                    ),
            )
            .child(Element::new("div").attr("aria-hidden", "true").text("secret"))
            .child(Element::new("a").attr("href", "/jobs").text("Back to jobs"));
        Document {
            url: Some("https://jobs.example/x".into()),
            title: Some("Job X".into()),
            root: Element::new("html").child(body).into(),
        }
    }

    #[test]
    fn keeps_text_and_numbers_interactive_elements() {
        let snapshot = CompactReducer.reduce(&page());
        assert_eq!(
            snapshot.text,
            [
                "Senior Engineer",
                r#"<input id=0 type="text" name="full_name" placeholder="Full name">"#,
                r#"<button id=1 type="submit">Apply</button>"#,
                "<a id=2>Back to jobs</a>",
            ]
            .join("\n")
        );
        assert_eq!(snapshot.elements.len(), 3);
        assert_eq!(snapshot.element(1).unwrap().kind, ElementKind::Button);
        assert_eq!(snapshot.element(1).unwrap().label, "Apply");
        assert!(!snapshot.text.contains("secret"));
        assert!(!snapshot.text.contains("var x"));
    }

    #[test]
    fn ids_are_stable_for_identical_input() {
        assert_eq!(CompactReducer.reduce(&page()), CompactReducer.reduce(&page()));
    }

    #[test]
    fn ids_are_unique() {
        let snapshot = CompactReducer.reduce(&page());
        let mut ids: Vec<u32> = snapshot.elements.iter().map(|e| e.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), snapshot.elements.len());
    }

    #[test]
    fn role_makes_generic_elements_clickable() {
        let doc = Document {
            url: None,
            title: None,
            root: Element::new("div")
                .attr("role", "button")
                .text("Continue")
                .into(),
        };
        let snapshot = CompactReducer.reduce(&doc);
        assert_eq!(snapshot.text, r#"<div id=0 role="button">Continue</div>"#);
        assert_eq!(snapshot.elements[0].kind, ElementKind::Clickable);
    }

    #[test]
    fn document_deserializes_from_provider_json() {
        let json = r#"{
            "root": {"type": "element", "tag": "button", "children": [{"type": "text", "text": "Apply"}]}
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(CompactReducer.reduce(&doc).text, "<button id=0>Apply</button>");
    }
}
