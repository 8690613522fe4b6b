//! Author markup parsing.
//!
//! Cards accept a small XHTML-ish markup subset. Parsing is streaming via
//! `quick-xml`; the sanitizer allow-list is consulted while building arena
//! nodes, so disallowed content never exists in the document at all.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::core::{Document, NodeId};
use crate::error::{CardError, Result};
use crate::sanitize::AllowList;

/// Parse `html` into child nodes of `parent`.
///
/// On error the parent may hold a partial subtree; callers that need
/// all-or-nothing semantics parse into a scratch node and swap on success.
pub fn parse_into(
    doc: &mut Document,
    parent: NodeId,
    html: &str,
    allow: &AllowList,
) -> Result<()> {
    let mut reader = Reader::from_reader(html.as_bytes());
    reader.config_mut().trim_text(true);

    let mut buf = Vec::with_capacity(64);
    let mut stack: Vec<NodeId> = vec![parent];
    // Depth of the disallowed subtree we are currently discarding.
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                let tag = reader
                    .decoder()
                    .decode(start.name().as_ref())
                    .map_err(|err| CardError::Markup(err.to_string()))?
                    .to_ascii_lowercase();
                if skip_depth > 0 || !allow.allows_tag(&tag) {
                    skip_depth += 1;
                    continue;
                }
                let element = doc.create_element(tag);
                apply_attributes(doc, element, &reader, &start, allow)?;
                let top = *stack.last().unwrap_or(&parent);
                doc.append_child(top, element);
                stack.push(element);
            }
            Ok(Event::Empty(start)) => {
                if skip_depth > 0 {
                    continue;
                }
                let tag = reader
                    .decoder()
                    .decode(start.name().as_ref())
                    .map_err(|err| CardError::Markup(err.to_string()))?
                    .to_ascii_lowercase();
                if !allow.allows_tag(&tag) {
                    continue;
                }
                let element = doc.create_element(tag);
                apply_attributes(doc, element, &reader, &start, allow)?;
                let top = *stack.last().unwrap_or(&parent);
                doc.append_child(top, element);
            }
            Ok(Event::End(_)) => {
                if skip_depth > 0 {
                    skip_depth -= 1;
                } else if stack.len() > 1 {
                    stack.pop();
                }
            }
            Ok(Event::Text(text)) => {
                if skip_depth > 0 {
                    continue;
                }
                let decoded = reader
                    .decoder()
                    .decode(&text)
                    .map_err(|err| CardError::Markup(err.to_string()))?;
                let trimmed = decoded.trim();
                if !trimmed.is_empty() {
                    let node = doc.create_text(trimmed);
                    let top = *stack.last().unwrap_or(&parent);
                    doc.append_child(top, node);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(CardError::Markup(err.to_string())),
        }
        buf.clear();
    }

    Ok(())
}

fn apply_attributes(
    doc: &mut Document,
    element: NodeId,
    reader: &Reader<&[u8]>,
    start: &quick_xml::events::BytesStart<'_>,
    allow: &AllowList,
) -> Result<()> {
    for attr in start.attributes().flatten() {
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(|err| CardError::Markup(err.to_string()))?
            .to_ascii_lowercase();
        if !allow.allows_attr(&key) {
            continue;
        }
        let value = reader
            .decoder()
            .decode(&attr.value)
            .map_err(|err| CardError::Markup(err.to_string()))?;
        if key == "class" {
            for class in value.split_whitespace() {
                doc.add_class(element, class);
            }
        } else {
            doc.set_attr(element, key, value.into_owned());
        }
    }
    Ok(())
}
