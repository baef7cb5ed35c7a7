use super::*;
use crate::script::{STACK_GROWTH, STACK_RED_ZONE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScriptSource {
    Inline(String),
    External(String),
}

#[derive(Debug)]
pub(crate) struct ParseOutput {
    pub(crate) dom: Dom,
    pub(crate) scripts: Vec<ScriptSource>,
}

pub(crate) fn decode_html_character_references(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }

    fn decode_numeric(value: &str) -> Option<char> {
        let codepoint =
            if let Some(hex) = value.strip_prefix('x').or_else(|| value.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                value.parse::<u32>().ok()?
            };
        char::from_u32(codepoint)
    }

    fn decode_named(value: &str) -> Option<char> {
        match value {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{00A0}'),
            "copy" => Some('©'),
            "reg" => Some('®'),
            "trade" => Some('™'),
            "hellip" => Some('…'),
            "mdash" => Some('—'),
            "ndash" => Some('–'),
            "ldquo" => Some('“'),
            "rdquo" => Some('”'),
            "lsquo" => Some('‘'),
            "rsquo" => Some('’'),
            "laquo" => Some('«'),
            "raquo" => Some('»'),
            "middot" => Some('·'),
            "times" => Some('×'),
            "divide" => Some('÷'),
            "deg" => Some('°'),
            "euro" => Some('€'),
            "pound" => Some('£'),
            "larr" => Some('←'),
            "rarr" => Some('→'),
            _ => None,
        }
    }

    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let entity_end = tail
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '#'))
            .map(|(idx, _)| idx)
            .unwrap_or(tail.len());
        let raw = &tail[..entity_end];
        let decoded = if let Some(numeric) = raw.strip_prefix('#') {
            decode_numeric(numeric)
        } else {
            decode_named(raw)
        };
        match decoded {
            Some(ch) if !raw.is_empty() => {
                out.push(ch);
                let consumed = if tail[entity_end..].starts_with(';') {
                    entity_end + 1
                } else {
                    entity_end
                };
                rest = &tail[consumed..];
            }
            _ => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeShape {
    /// A whole page: `html`, `head` and `body` always exist.
    Document,
    /// `innerHTML` content, parsed as-is.
    Fragment,
}

/// The `html`, `head` and `body` elements of a document, created on demand
/// when the markup leaves their tags out.
#[derive(Debug, Default)]
struct DocumentSkeleton {
    html: Option<NodeId>,
    head: Option<NodeId>,
    body: Option<NodeId>,
}

impl DocumentSkeleton {
    fn html(&mut self, dom: &mut Dom) -> NodeId {
        if let Some(html) = self.html {
            return html;
        }
        let html = dom.create_element(dom.root, "html".into(), HashMap::new());
        self.html = Some(html);
        html
    }

    fn head(&mut self, dom: &mut Dom) -> NodeId {
        if let Some(head) = self.head {
            return head;
        }
        let html = self.html(dom);
        let head = dom.create_element(html, "head".into(), HashMap::new());
        self.head = Some(head);
        head
    }

    fn body(&mut self, dom: &mut Dom) -> NodeId {
        if let Some(body) = self.body {
            return body;
        }
        self.head(dom);
        let html = self.html(dom);
        let body = dom.create_element(html, "body".into(), HashMap::new());
        self.body = Some(body);
        body
    }

    fn head_is_open(&self, stack: &[NodeId]) -> bool {
        self.head.is_some_and(|head| stack.contains(&head))
    }

    /// Content outside any element, or still inside `head`, belongs in `body`.
    fn needs_body(&self, stack: &[NodeId]) -> bool {
        self.body.is_none() || stack.len() <= 2 || self.head_is_open(stack)
    }

    fn enter_body(&mut self, dom: &mut Dom, stack: &mut Vec<NodeId>) {
        let body = self.body(dom);
        let html = self.html(dom);
        *stack = vec![dom.root, html, body];
    }

    /// Rewires the open-element stack before `tag` is inserted. Returns `true`
    /// when the tag names a skeleton element and must not be created again.
    fn place_start_tag(
        &mut self,
        dom: &mut Dom,
        stack: &mut Vec<NodeId>,
        tag: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<bool> {
        match tag {
            "html" => {
                let html = self.html(dom);
                merge_missing_attrs(dom, html, attrs)?;
                if stack.len() == 1 {
                    stack.push(html);
                }
                Ok(true)
            }
            "head" => {
                if self.head.is_none() && self.body.is_none() {
                    let html = self.html(dom);
                    let head = self.head(dom);
                    *stack = vec![dom.root, html, head];
                }
                Ok(true)
            }
            "body" => {
                self.enter_body(dom, stack);
                if let Some(body) = self.body {
                    merge_missing_attrs(dom, body, attrs)?;
                }
                Ok(true)
            }
            _ if self.body.is_none() && is_head_content_tag(tag) => {
                if !self.head_is_open(stack) {
                    let html = self.html(dom);
                    let head = self.head(dom);
                    *stack = vec![dom.root, html, head];
                }
                Ok(false)
            }
            _ => {
                if self.needs_body(stack) {
                    self.enter_body(dom, stack);
                }
                Ok(false)
            }
        }
    }
}

fn merge_missing_attrs(dom: &mut Dom, node: NodeId, attrs: &HashMap<String, String>) -> Result<()> {
    for (name, value) in attrs {
        if !dom.has_attr(node, name) {
            dom.set_attr(node, name, value)?;
        }
    }
    Ok(())
}

fn is_head_content_tag(tag: &str) -> bool {
    matches!(
        tag,
        "title" | "meta" | "link" | "style" | "script" | "base" | "noscript" | "template"
    )
}

/// Parses a whole page. Missing `html`, `head` and `body` tags are implied the
/// way browsers imply them.
pub(crate) fn parse_html(html: &str) -> Result<ParseOutput> {
    parse_markup(html, TreeShape::Document)
}

fn parse_markup(html: &str, shape: TreeShape) -> Result<ParseOutput> {
    let mut dom = Dom::new();
    let mut scripts = Vec::new();
    let mut skeleton = DocumentSkeleton::default();

    let mut stack = vec![dom.root];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            if let Some(end) = find_subslice(bytes, i + 4, b"-->") {
                i = end + 3;
            } else {
                return Err(Error::HtmlParse("unclosed HTML comment".into()));
            }
            continue;
        }

        if bytes[i] == b'<'
            && bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'/' || *b == b'!')
        {
            if starts_with_at(bytes, i, b"</") {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;

                let open = stack
                    .iter()
                    .rposition(|node| dom.has_tag(*node, &tag));
                if let Some(open) = open {
                    stack.truncate(open.max(1));
                }
                continue;
            }

            if starts_with_at(bytes, i, b"<!") {
                i = parse_declaration_tag(html, i)?;
                continue;
            }

            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;
            if shape == TreeShape::Document
                && skeleton.place_start_tag(&mut dom, &mut stack, &tag, &attrs)?
            {
                continue;
            }
            close_optional_start_tags(&dom, &mut stack, &tag);

            let executable_script = tag == "script"
                && is_executable_script_type(attrs.get("type").map(String::as_str));
            let script_src = attrs.get("src").cloned();

            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            let node = dom.create_element(parent, tag.clone(), attrs);

            if is_raw_text_tag(&tag) && !self_closing {
                let close = find_case_insensitive_end_tag(bytes, i, tag.as_bytes())
                    .ok_or_else(|| Error::HtmlParse(format!("unclosed <{tag}>")))?;
                let body = html.get(i..close).unwrap_or_default();
                if !body.is_empty() {
                    let text = if tag == "title" || tag == "textarea" {
                        decode_html_character_references(body)
                    } else {
                        body.to_string()
                    };
                    dom.create_text(node, text);
                }
                if executable_script {
                    match script_src {
                        Some(src) => scripts.push(ScriptSource::External(src)),
                        None if !body.trim().is_empty() => {
                            scripts.push(ScriptSource::Inline(body.to_string()))
                        }
                        None => {}
                    }
                }
                let (_, after_end) = parse_end_tag(html, close)?;
                i = after_end;
                continue;
            }

            if executable_script {
                if let Some(src) = script_src {
                    scripts.push(ScriptSource::External(src));
                }
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        i += 1;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            let blank = text.trim().is_empty();
            if shape == TreeShape::Document && skeleton.needs_body(&stack) {
                if blank {
                    continue;
                }
                skeleton.enter_body(&mut dom, &mut stack);
            }
            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            // Whitespace between the document and its root element is dropped.
            if parent == dom.root && blank {
                continue;
            }
            let decoded = decode_html_character_references(text);
            if !decoded.is_empty() {
                dom.create_text(parent, decoded);
            }
        }
    }

    if shape == TreeShape::Document {
        skeleton.body(&mut dom);
    }
    dom.initialize_form_control_values();
    Ok(ParseOutput { dom, scripts })
}

/// Parses an HTML fragment under `parent`, as `innerHTML` assignment does.
/// Scripts inside fragments are inserted but never executed.
pub(crate) fn parse_fragment_into(dom: &mut Dom, parent: NodeId, html: &str) -> Result<()> {
    let ParseOutput { dom: fragment, .. } = parse_markup(html, TreeShape::Fragment)?;
    copy_subtree_children(&fragment, fragment.root, dom, parent);
    Ok(())
}

fn copy_subtree_children(src: &Dom, src_parent: NodeId, dst: &mut Dom, dst_parent: NodeId) {
    for child in src.children(src_parent) {
        let copied = match &src.nodes[child.0].node_type {
            NodeType::Text(text) => dst.create_text(dst_parent, text.clone()),
            NodeType::Element(element) => {
                let node =
                    dst.create_element(dst_parent, element.tag_name.clone(), element.attrs.clone());
                if let Some(copied) = dst.element_mut(node) {
                    copied.value = element.value.clone();
                    copied.checked = element.checked;
                    copied.disabled = element.disabled;
                }
                node
            }
            NodeType::Document => continue,
        };
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            copy_subtree_children(src, *child, dst, copied)
        });
    }
}

fn close_optional_start_tags(dom: &Dom, stack: &mut Vec<NodeId>, tag: &str) {
    let closes: &[&str] = match tag {
        "li" => &["li"],
        "dt" | "dd" => &["dt", "dd"],
        "option" => &["option"],
        "tr" => &["tr", "td", "th"],
        "td" | "th" => &["td", "th"],
        _ if is_paragraph_terminator_tag(tag) => &["p"],
        _ => &[],
    };
    let Some(top) = stack.last().copied() else {
        return;
    };
    if stack.len() > 1 && closes.iter().any(|close| dom.has_tag(top, close)) {
        stack.pop();
        if tag == "tr" {
            if let Some(top) = stack.last().copied() {
                if stack.len() > 1 && dom.has_tag(top, "tr") {
                    stack.pop();
                }
            }
        }
    }
}

fn is_paragraph_terminator_tag(tag: &str) -> bool {
    matches!(
        tag,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "div"
            | "dl"
            | "fieldset"
            | "figure"
            | "footer"
            | "form"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "header"
            | "hr"
            | "main"
            | "nav"
            | "ol"
            | "p"
            | "pre"
            | "section"
            | "table"
            | "ul"
    )
}

fn is_executable_script_type(raw_type: Option<&str>) -> bool {
    let Some(raw_type) = raw_type else {
        return true;
    };
    let normalized = raw_type.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "" | "text/javascript" | "application/javascript" | "text/ecmascript" | "module"
    )
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "title" | "textarea")
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse(format!("unclosed start tag <{tag}>")));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'>') {
            self_closing = true;
            i += 2;
            break;
        }

        if !is_attr_name_char(bytes[i]) {
            // Skip junk fragments such as stray quotes the way browsers recover.
            i += 1;
            continue;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        skip_ws(bytes, &mut i);

        let value = if bytes.get(i) == Some(&b'=') {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            String::new()
        };

        attrs.entry(name).or_insert(value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_declaration_tag(html: &str, at: usize) -> Result<usize> {
    let bytes = html.as_bytes();
    let mut i = at + 2;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'>' => return Ok(i + 1),
            None => {}
        }
        i += 1;
    }

    Err(Error::HtmlParse("unclosed declaration tag".into()))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed quoted attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?;
        *i += 1;
        return Ok(decode_html_character_references(value));
    }

    let start = *i;
    while *i < bytes.len()
        && !bytes[*i].is_ascii_whitespace()
        && bytes[*i] != b'>'
        && !(bytes[*i] == b'/' && bytes.get(*i + 1) == Some(&b'>'))
    {
        *i += 1;
    }

    let value = html
        .get(start..*i)
        .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?;
    Ok(decode_html_character_references(value))
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn is_attr_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':' || b == b'@'
}

pub(crate) fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes
        .get(at..at + needle.len())
        .is_some_and(|window| window == needle)
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut i = from;
    while i + 2 + tag.len() <= bytes.len() {
        if bytes[i] == b'<'
            && bytes[i + 1] == b'/'
            && bytes[i + 2..i + 2 + tag.len()].eq_ignore_ascii_case(tag)
        {
            let after = bytes.get(i + 2 + tag.len()).copied();
            if after.is_none_or(|b| b == b'>' || b.is_ascii_whitespace()) {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}
