//! Allow-list boundary for author markup.
//!
//! Policy depth is deliberately shallow: the card host only needs to know
//! which tags and attributes survive. Disallowed elements are dropped with
//! their subtrees, disallowed attributes are dropped silently.

use std::collections::BTreeSet;

/// Tags and attributes that survive sanitization.
#[derive(Debug, Clone)]
pub struct AllowList {
    tags: BTreeSet<&'static str>,
    attrs: BTreeSet<&'static str>,
}

impl Default for AllowList {
    fn default() -> Self {
        let tags = [
            "a", "b", "br", "div", "em", "h1", "h2", "h3", "h4", "h5", "h6", "i", "img", "li",
            "ol", "p", "span", "strong", "u", "ul",
        ];
        let attrs = [
            "alt",
            "class",
            "data-field",
            "data-key",
            "height",
            "href",
            "src",
            "title",
            "width",
        ];
        Self {
            tags: tags.into_iter().collect(),
            attrs: attrs.into_iter().collect(),
        }
    }
}

impl AllowList {
    pub fn allows_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn allows_attr(&self, name: &str) -> bool {
        // Inline event hooks never survive, regardless of list contents.
        if name.starts_with("on") {
            return false;
        }
        self.attrs.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_is_not_allowed() {
        let list = AllowList::default();
        assert!(!list.allows_tag("script"));
        assert!(!list.allows_tag("style"));
        assert!(list.allows_tag("img"));
    }

    #[test]
    fn event_attributes_are_always_stripped() {
        let list = AllowList::default();
        assert!(!list.allows_attr("onclick"));
        assert!(list.allows_attr("src"));
        assert!(!list.allows_attr("srcdoc"));
    }
}
