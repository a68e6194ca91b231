//! Parsed documents exposed to extraction programs.
//!
//! A program only ever sees [`DomNode`] handles. Each handle shares the
//! parsed document and names its element by position in document order, so
//! selecting inside an element never re-parses markup out of context.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::rc::Rc;

use scraper::{ElementRef, Html, Selector};

use super::SandboxError;
use super::value::runtime;

#[derive(Debug)]
pub struct DomNode {
    document: Rc<Html>,
    /// Position among the document's descendants; `None` is the document itself.
    index: Option<usize>,
    text: OnceCell<String>,
}

impl DomNode {
    pub fn parse(html: &str) -> Rc<Self> {
        Rc::new(Self { document: Rc::new(Html::parse_document(html)), index: None, text: OnceCell::new() })
    }

    fn child(&self, index: usize) -> Rc<Self> {
        Rc::new(Self { document: Rc::clone(&self.document), index: Some(index), text: OnceCell::new() })
    }

    fn element(&self) -> Option<ElementRef<'_>> {
        let index = self.index?;
        self.document.tree.root().descendants().nth(index).and_then(ElementRef::wrap)
    }

    pub fn same_element(&self, other: &DomNode) -> bool {
        Rc::ptr_eq(&self.document, &other.document) && self.index == other.index
    }

    /// Elements under this node matching `css`, in document order.
    pub fn select(&self, css: &str, limit: Option<usize>) -> Result<Vec<Rc<Self>>, SandboxError> {
        let selector = Selector::parse(css).map_err(|e| runtime("ValueError", format!("invalid selector {css:?}: {e:?}")))?;
        let limit = limit.unwrap_or(usize::MAX);

        let matches: Vec<ElementRef<'_>> = match self.element() {
            Some(scope) => scope.select(&selector).filter(|el| el.id() != scope.id()).take(limit).collect(),
            None if self.index.is_some() => Vec::new(),
            None => self.document.select(&selector).take(limit).collect(),
        };
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let mut wanted = HashMap::with_capacity(matches.len());
        for (slot, el) in matches.iter().enumerate() {
            wanted.insert(el.id(), slot);
        }

        let mut positions = vec![0; matches.len()];
        let mut found = 0;
        for (index, node) in self.document.tree.root().descendants().enumerate() {
            if let Some(&slot) = wanted.get(&node.id()) {
                positions[slot] = index;
                found += 1;
                if found == matches.len() {
                    break;
                }
            }
        }

        Ok(positions.into_iter().map(|index| self.child(index)).collect())
    }

    pub fn select_one(&self, css: &str) -> Result<Option<Rc<Self>>, SandboxError> {
        Ok(self.select(css, Some(1))?.into_iter().next())
    }

    /// Visible text with whitespace runs collapsed.
    pub fn text(&self) -> String {
        self.text
            .get_or_init(|| {
                let raw: Vec<&str> = match self.element() {
                    Some(el) => el.text().collect(),
                    None => self.document.root_element().text().collect(),
                };
                raw.iter().flat_map(|chunk| chunk.split_whitespace()).collect::<Vec<_>>().join(" ")
            })
            .clone()
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.element().and_then(|el| el.value().attr(name).map(str::to_string))
    }

    pub fn attrs(&self) -> Vec<(String, String)> {
        self.element()
            .map(|el| el.value().attrs().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            .unwrap_or_default()
    }

    pub fn tag(&self) -> String {
        match self.element() {
            Some(el) => el.value().name().to_string(),
            None => "[document]".to_string(),
        }
    }

    /// Outer HTML of the element, or the whole document.
    pub fn html(&self) -> String {
        match self.element() {
            Some(el) => el.html(),
            None => self.document.html(),
        }
    }

    /// Approximate work for a selection, in evaluator steps.
    pub fn select_cost(&self) -> u64 {
        (self.document.tree.root().descendants().count() / 64) as u64 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
            <ul id="items">
                <li class="item"><a href="/one">One</a> <span>first</span></li>
                <li class="item"><a href="/two">Two</a></li>
            </ul>
            <table><tr><td class="cell">A</td></tr></table>
        </body></html>
    "#;

    #[test]
    fn test_select_in_document_order() {
        let doc = DomNode::parse(PAGE);
        let items = doc.select("li.item", None).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text(), "One first");
        assert_eq!(items[1].text(), "Two");
    }

    #[test]
    fn test_select_scoped_to_element() {
        let doc = DomNode::parse(PAGE);
        let items = doc.select("li", None).unwrap();
        let links = items[1].select("a", None).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].attr("href").as_deref(), Some("/two"));
    }

    #[test]
    fn test_select_excludes_scope_itself() {
        let doc = DomNode::parse(PAGE);
        let list = doc.select_one("ul").unwrap().unwrap();
        assert!(list.select("ul", None).unwrap().is_empty());
    }

    #[test]
    fn test_table_context_preserved() {
        let doc = DomNode::parse(PAGE);
        let row = doc.select_one("tr").unwrap().unwrap();
        let cell = row.select_one("td.cell").unwrap().unwrap();
        assert_eq!(cell.text(), "A");
        assert_eq!(cell.tag(), "td");
    }

    #[test]
    fn test_invalid_selector() {
        let doc = DomNode::parse(PAGE);
        assert!(matches!(doc.select("li[", None), Err(SandboxError::Runtime { .. })));
    }

    #[test]
    fn test_same_element() {
        let doc = DomNode::parse(PAGE);
        let a = doc.select_one("#items").unwrap().unwrap();
        let b = doc.select_one("ul").unwrap().unwrap();
        assert!(a.same_element(&b));
    }

    #[test]
    fn test_missing_attribute() {
        let doc = DomNode::parse(PAGE);
        let li = doc.select_one("li").unwrap().unwrap();
        assert!(li.attr("href").is_none());
        assert_eq!(li.attrs(), vec![("class".to_string(), "item".to_string())]);
    }
}
