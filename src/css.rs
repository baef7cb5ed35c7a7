use super::*;
use crate::dom::{css_name_to_js_prop, js_prop_to_css_name};
use crate::script::{STACK_GROWTH, STACK_RED_ZONE};

const DEFAULT_FONT_SIZE_PX: f64 = 16.0;

const INHERITED_PROPERTIES: &[&str] = &[
    "color",
    "cursor",
    "direction",
    "font-family",
    "font-size",
    "font-style",
    "font-variant",
    "font-weight",
    "letter-spacing",
    "line-height",
    "list-style-position",
    "list-style-type",
    "text-align",
    "text-indent",
    "text-transform",
    "visibility",
    "white-space",
    "word-spacing",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Declaration {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) important: bool,
}

#[derive(Debug, Clone)]
struct StyleRule {
    selectors: Vec<(Vec<SelectorPart>, Specificity)>,
    declarations: Vec<Declaration>,
}

/// Author style rules of one document, in source order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Stylesheet {
    rules: Vec<StyleRule>,
}

impl Stylesheet {
    pub(crate) fn parse(src: &str) -> Self {
        let src = strip_css_comments(src);
        let mut rules = Vec::new();
        let bytes = src.as_bytes();
        let mut i = 0usize;

        while i < bytes.len() {
            let Some(open) = src[i..].find('{').map(|pos| pos + i) else {
                break;
            };
            let prelude = src[i..open].trim();
            let Some(close) = find_block_end(bytes, open) else {
                break;
            };
            let body = &src[open + 1..close];
            i = close + 1;

            // At-rule blocks (@media, @supports, @font-face, @keyframes) do not
            // apply to the fixed viewport and are skipped whole.
            if prelude.starts_with('@') {
                continue;
            }
            // Statement at-rules such as `@import url(x);` may prefix a prelude.
            let prelude = prelude.rsplit(';').next().unwrap_or(prelude).trim();
            if prelude.is_empty() {
                continue;
            }

            let selectors = split_selector_groups(prelude)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|group| {
                    let chain = parse_selector_chain(&group).ok()?;
                    let specificity = chain_specificity(&chain);
                    Some((chain, specificity))
                })
                .collect::<Vec<_>>();
            if selectors.is_empty() {
                continue;
            }

            let declarations = parse_style_declarations(body);
            rules.push(StyleRule {
                selectors,
                declarations,
            });
        }

        Self { rules }
    }

    pub(crate) fn append(&mut self, other: Stylesheet) {
        self.rules.extend(other.rules);
    }

    pub(crate) fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn cascaded_declarations(&self, dom: &Dom, node_id: NodeId) -> HashMap<String, String> {
        let mut matched: Vec<(bool, bool, Specificity, usize, &Declaration)> = Vec::new();
        let mut order = 0usize;
        for rule in &self.rules {
            let best = rule
                .selectors
                .iter()
                .filter(|(chain, _)| dom.matches_selector_chain(node_id, chain))
                .map(|(_, specificity)| *specificity)
                .max();
            let Some(specificity) = best else {
                order += rule.declarations.len();
                continue;
            };
            for decl in &rule.declarations {
                matched.push((decl.important, false, specificity, order, decl));
                order += 1;
            }
        }

        let inline = dom
            .attr(node_id, "style")
            .map(|style| parse_style_declarations(&style))
            .unwrap_or_default();
        for decl in &inline {
            matched.push((decl.important, true, Specificity::default(), order, decl));
            order += 1;
        }

        matched.sort_by(|a, b| (a.0, a.1, a.2, a.3).cmp(&(b.0, b.1, b.2, b.3)));

        let mut out = HashMap::new();
        for (_, _, _, _, decl) in matched {
            for (name, value) in expand_shorthand(&decl.name, &decl.value) {
                out.insert(name, value);
            }
        }
        out
    }
}

/// Resolved style of one element, as `getComputedStyle` reports it.
#[derive(Debug, Clone)]
pub(crate) struct ComputedStyle {
    /// The element first, then each ancestor element up to the root.
    layers: Vec<StyleLayer>,
}

#[derive(Debug, Clone)]
struct StyleLayer {
    tag: String,
    hidden: bool,
    cascaded: HashMap<String, String>,
}

impl ComputedStyle {
    pub(crate) fn for_node(dom: &Dom, sheet: &Stylesheet, node_id: NodeId) -> Option<Self> {
        dom.element(node_id)?;
        let mut layers = Vec::new();
        let mut cursor = Some(node_id);
        while let Some(current) = cursor {
            let Some(element) = dom.element(current) else {
                break;
            };
            layers.push(StyleLayer {
                tag: element.tag_name.clone(),
                hidden: element.attrs.contains_key("hidden"),
                cascaded: sheet.cascaded_declarations(dom, current),
            });
            cursor = dom.parent_element(current);
        }
        Some(Self { layers })
    }

    /// Looks a property up by CSS name (`background-color`) or camelCase
    /// script name (`backgroundColor`).
    pub(crate) fn get(&self, property: &str) -> String {
        let name = if property.contains('-') || property.chars().all(|c| !c.is_ascii_uppercase()) {
            property.to_ascii_lowercase()
        } else {
            js_prop_to_css_name(property)
        };
        self.resolve(0, &name)
    }

    pub(crate) fn property_names(&self) -> Vec<String> {
        let mut names = self.layers[0]
            .cascaded
            .keys()
            .map(|name| css_name_to_js_prop(name))
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn has_parent(&self, level: usize) -> bool {
        level + 1 < self.layers.len()
    }

    fn resolve(&self, level: usize, name: &str) -> String {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.resolve_at(level, name))
    }

    fn resolve_at(&self, level: usize, name: &str) -> String {
        let layer = &self.layers[level];
        match layer.cascaded.get(name).map(|value| value.trim()) {
            Some("inherit") => self.inherited(level, name),
            Some("initial") => initial_value(name, &layer.tag, false),
            Some("unset") if INHERITED_PROPERTIES.contains(&name) => self.inherited(level, name),
            Some("unset") => initial_value(name, &layer.tag, false),
            Some(value) => self.normalize(level, name, value),
            None if INHERITED_PROPERTIES.contains(&name) && self.has_parent(level) => {
                if let Some(tag_default) = tag_inherited_override(name, &layer.tag) {
                    return tag_default;
                }
                self.inherited(level, name)
            }
            None => initial_value(name, &layer.tag, layer.hidden),
        }
    }

    fn inherited(&self, level: usize, name: &str) -> String {
        if self.has_parent(level) {
            self.resolve(level + 1, name)
        } else {
            let layer = &self.layers[level];
            initial_value(name, &layer.tag, layer.hidden)
        }
    }

    fn parent_font_size(&self, level: usize) -> f64 {
        if !self.has_parent(level) {
            return DEFAULT_FONT_SIZE_PX;
        }
        parse_px(&self.resolve(level + 1, "font-size")).unwrap_or(DEFAULT_FONT_SIZE_PX)
    }

    fn font_size(&self, level: usize) -> f64 {
        parse_px(&self.resolve(level, "font-size")).unwrap_or(DEFAULT_FONT_SIZE_PX)
    }

    fn normalize(&self, level: usize, name: &str, value: &str) -> String {
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if name == "color" || name.ends_with("-color") {
            return normalize_color(&value).unwrap_or(value);
        }
        match name {
            "font-weight" => normalize_font_weight(&value),
            "font-size" => {
                let parent_size = self.parent_font_size(level);
                font_size_px(&value, parent_size)
                    .map(format_px)
                    .unwrap_or(value)
            }
            "display" | "visibility" | "position" | "float" | "text-align" | "font-style"
            | "text-transform" | "cursor" => value.to_ascii_lowercase(),
            _ => {
                let font_size = if value.contains("em") { self.font_size(level) } else { 0.0 };
                value
                    .split(' ')
                    .map(|token| normalize_length(token, font_size))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }
}

pub(crate) fn parse_style_declarations(src: &str) -> Vec<Declaration> {
    let mut out = Vec::new();
    let bytes = src.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut paren_depth = 0usize;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let ch = bytes[i];
        match (quote, ch) {
            (Some(_), b'\\') => {
                i += 2;
                continue;
            }
            (Some(q), _) if ch == q => quote = None,
            (Some(_), _) => {}
            (None, b'\'') | (None, b'"') => quote = Some(ch),
            (None, b'(') => paren_depth += 1,
            (None, b')') => paren_depth = paren_depth.saturating_sub(1),
            (None, b';') if paren_depth == 0 => {
                push_style_declaration(&src[start..i], &mut out);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < src.len() {
        push_style_declaration(&src[start..], &mut out);
    }
    out
}

fn push_style_declaration(raw_decl: &str, out: &mut Vec<Declaration>) {
    let decl = raw_decl.trim();
    let Some((name, value)) = decl.split_once(':') else {
        return;
    };
    let name = name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return;
    }
    let mut value = value.trim();
    let mut important = false;
    if let Some(pos) = value.to_ascii_lowercase().rfind("!important") {
        important = true;
        value = value[..pos].trim();
    }
    if value.is_empty() {
        return;
    }
    out.push(Declaration {
        name,
        value: value.to_string(),
        important,
    });
}

fn strip_css_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn find_block_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (idx, b) in bytes.iter().copied().enumerate().skip(open) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn expand_shorthand(name: &str, value: &str) -> Vec<(String, String)> {
    let parts = value.split_whitespace().collect::<Vec<_>>();
    match name {
        "margin" | "padding" => {
            let [top, right, bottom, left] = match parts.as_slice() {
                [all] => [*all; 4],
                [vertical, horizontal] => [*vertical, *horizontal, *vertical, *horizontal],
                [top, horizontal, bottom] => [*top, *horizontal, *bottom, *horizontal],
                [top, right, bottom, left, ..] => [*top, *right, *bottom, *left],
                [] => return Vec::new(),
            };
            vec![
                (format!("{name}-top"), top.to_string()),
                (format!("{name}-right"), right.to_string()),
                (format!("{name}-bottom"), bottom.to_string()),
                (format!("{name}-left"), left.to_string()),
            ]
        }
        "background" => {
            let color = parts
                .iter()
                .find(|part| normalize_color(part).is_some())
                .map(|part| part.to_string())
                .unwrap_or_else(|| "transparent".to_string());
            vec![("background-color".to_string(), color)]
        }
        "border" | "border-top" | "border-right" | "border-bottom" | "border-left" => {
            let sides: &[&str] = match name {
                "border" => &["top", "right", "bottom", "left"],
                other => &[&other[7..]],
            };
            let mut width = "medium".to_string();
            let mut style = "none".to_string();
            let mut color = "currentcolor".to_string();
            for part in &parts {
                if normalize_color(part).is_some() {
                    color = part.to_string();
                } else if is_border_style(part) {
                    style = part.to_string();
                } else {
                    width = part.to_string();
                }
            }
            let mut out = Vec::new();
            for side in sides {
                out.push((format!("border-{side}-width"), width.clone()));
                out.push((format!("border-{side}-style"), style.clone()));
                out.push((format!("border-{side}-color"), color.clone()));
            }
            out
        }
        _ => vec![(name.to_string(), value.to_string())],
    }
}

fn is_border_style(value: &str) -> bool {
    matches!(
        value,
        "none" | "hidden" | "dotted" | "dashed" | "solid" | "double" | "groove" | "ridge" | "inset"
            | "outset"
    )
}

fn tag_inherited_override(name: &str, tag: &str) -> Option<String> {
    match (name, tag) {
        ("font-weight", "b" | "strong" | "th" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6") => {
            Some("700".to_string())
        }
        ("font-style", "em" | "i" | "cite" | "var" | "dfn") => Some("italic".to_string()),
        ("font-size", "h1") => Some("32px".to_string()),
        ("font-size", "h2") => Some("24px".to_string()),
        ("font-size", "h3") => Some("18.72px".to_string()),
        ("font-size", "h5") => Some("13.28px".to_string()),
        ("font-size", "h6") => Some("10.72px".to_string()),
        ("color", "a") => Some("rgb(0, 0, 238)".to_string()),
        ("list-style-type", "ol") => Some("decimal".to_string()),
        _ => None,
    }
}

fn initial_value(name: &str, tag: &str, hidden: bool) -> String {
    if let Some(value) = tag_inherited_override(name, tag) {
        return value;
    }
    let value = match name {
        "display" if hidden => "none",
        "display" => default_display(tag),
        "color" => "rgb(0, 0, 0)",
        "background-color" => "rgba(0, 0, 0, 0)",
        "font-size" => "16px",
        "font-weight" => "400",
        "font-style" | "font-variant" => "normal",
        "font-family" => "Times New Roman",
        "line-height" | "letter-spacing" | "word-spacing" | "white-space" => "normal",
        "text-align" => "start",
        "text-transform" => "none",
        "text-indent" => "0px",
        "text-decoration" | "text-decoration-line" if tag == "a" || tag == "u" => "underline",
        "text-decoration" | "text-decoration-line" => "none",
        "visibility" => "visible",
        "opacity" => "1",
        "position" => "static",
        "float" | "clear" => "none",
        "width" | "height" | "top" | "right" | "bottom" | "left" | "z-index" | "cursor" => "auto",
        "list-style-type" => "disc",
        "list-style-position" => "outside",
        "direction" => "ltr",
        "overflow" => "visible",
        "box-sizing" => "content-box",
        "margin-top" | "margin-bottom" if tag == "p" => "16px",
        "margin-top" | "margin-right" | "margin-bottom" | "margin-left" if tag == "body" => "8px",
        name if name.starts_with("margin-") || name.starts_with("padding-") => "0px",
        name if name.starts_with("border-") && name.ends_with("-style") => "none",
        name if name.starts_with("border-") && name.ends_with("-width") => "0px",
        name if name.starts_with("border-") && name.ends_with("-color") => "rgb(0, 0, 0)",
        _ => "",
    };
    value.to_string()
}

fn default_display(tag: &str) -> &'static str {
    match tag {
        "head" | "script" | "style" | "title" | "meta" | "link" | "template" | "base"
        | "noscript" => "none",
        "li" => "list-item",
        "table" => "table",
        "tr" => "table-row",
        "td" | "th" => "table-cell",
        "thead" => "table-header-group",
        "tbody" => "table-row-group",
        "tfoot" => "table-footer-group",
        "caption" => "table-caption",
        "input" | "button" | "select" | "textarea" => "inline-block",
        "html" | "body" | "div" | "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "ul" | "ol"
        | "dl" | "dd" | "dt" | "header" | "footer" | "main" | "nav" | "section" | "article"
        | "aside" | "figure" | "figcaption" | "form" | "fieldset" | "blockquote" | "pre"
        | "address" | "hr" | "details" | "summary" | "legend" | "hgroup" => "block",
        _ => "inline",
    }
}

fn normalize_font_weight(value: &str) -> String {
    match value.to_ascii_lowercase().as_str() {
        "normal" => "400".to_string(),
        "bold" => "700".to_string(),
        "bolder" => "700".to_string(),
        "lighter" => "100".to_string(),
        other => other.to_string(),
    }
}

fn font_size_px(value: &str, parent_px: f64) -> Option<f64> {
    let value = value.trim().to_ascii_lowercase();
    let keyword = match value.as_str() {
        "xx-small" => Some(9.0),
        "x-small" => Some(10.0),
        "small" => Some(13.0),
        "medium" => Some(16.0),
        "large" => Some(18.0),
        "x-large" => Some(24.0),
        "xx-large" => Some(32.0),
        "smaller" => Some(parent_px / 1.2),
        "larger" => Some(parent_px * 1.2),
        _ => None,
    };
    if keyword.is_some() {
        return keyword;
    }
    if let Some(number) = value.strip_suffix("rem") {
        return number.trim().parse::<f64>().ok().map(|n| n * DEFAULT_FONT_SIZE_PX);
    }
    if let Some(number) = value.strip_suffix("em") {
        return number.trim().parse::<f64>().ok().map(|n| n * parent_px);
    }
    if let Some(number) = value.strip_suffix('%') {
        return number.trim().parse::<f64>().ok().map(|n| n / 100.0 * parent_px);
    }
    parse_px(&value)
}

fn normalize_length(token: &str, font_size: f64) -> String {
    if token == "0" {
        return "0px".to_string();
    }
    if let Some(number) = token.strip_suffix("rem") {
        if let Ok(n) = number.parse::<f64>() {
            return format_px(n * DEFAULT_FONT_SIZE_PX);
        }
    } else if let Some(number) = token.strip_suffix("em") {
        if let Ok(n) = number.parse::<f64>() {
            return format_px(n * font_size);
        }
    }
    token.to_string()
}

pub(crate) fn parse_px(value: &str) -> Option<f64> {
    value.trim().strip_suffix("px")?.trim().parse::<f64>().ok()
}

fn format_px(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    format!("{}px", crate::script::format_number(rounded))
}

/// Normalizes any supported color notation to `rgb(r, g, b)` or `rgba(r, g, b, a)`.
pub(crate) fn normalize_color(value: &str) -> Option<String> {
    let value = value.trim().to_ascii_lowercase();
    let (r, g, b, a) = if let Some(hex) = value.strip_prefix('#') {
        parse_hex_color(hex)?
    } else if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts = args
            .split([',', '/', ' '])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        if parts.len() < 3 {
            return None;
        }
        let channel = |raw: &str| -> Option<u8> {
            if let Some(pct) = raw.strip_suffix('%') {
                let pct = pct.parse::<f64>().ok()?;
                Some((pct.clamp(0.0, 100.0) * 2.55).round() as u8)
            } else {
                Some(raw.parse::<f64>().ok()?.clamp(0.0, 255.0).round() as u8)
            }
        };
        let alpha = match parts.get(3) {
            Some(raw) => match raw.strip_suffix('%') {
                Some(pct) => pct.parse::<f64>().ok()? / 100.0,
                None => raw.parse::<f64>().ok()?,
            },
            None => 1.0,
        };
        (channel(parts[0])?, channel(parts[1])?, channel(parts[2])?, alpha.clamp(0.0, 1.0))
    } else {
        named_color(&value)?
    };

    if (a - 1.0).abs() < f64::EPSILON {
        Some(format!("rgb({r}, {g}, {b})"))
    } else {
        let alpha = (a * 1000.0).round() / 1000.0;
        Some(format!(
            "rgba({r}, {g}, {b}, {})",
            crate::script::format_number(alpha)
        ))
    }
}

fn parse_hex_color(hex: &str) -> Option<(u8, u8, u8, f64)> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let digit = |idx: usize| u8::from_str_radix(&hex[idx..idx + 1], 16).ok().map(|v| v * 17);
    let pair = |idx: usize| u8::from_str_radix(&hex[idx..idx + 2], 16).ok();
    match hex.len() {
        3 => Some((digit(0)?, digit(1)?, digit(2)?, 1.0)),
        4 => Some((digit(0)?, digit(1)?, digit(2)?, f64::from(digit(3)?) / 255.0)),
        6 => Some((pair(0)?, pair(2)?, pair(4)?, 1.0)),
        8 => Some((pair(0)?, pair(2)?, pair(4)?, f64::from(pair(6)?) / 255.0)),
        _ => None,
    }
}

fn named_color(name: &str) -> Option<(u8, u8, u8, f64)> {
    let rgb = match name {
        "transparent" => return Some((0, 0, 0, 0.0)),
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "orange" => (255, 165, 0),
        "purple" => (128, 0, 128),
        "fuchsia" | "magenta" => (255, 0, 255),
        "aqua" | "cyan" => (0, 255, 255),
        "gray" | "grey" => (128, 128, 128),
        "silver" => (192, 192, 192),
        "maroon" => (128, 0, 0),
        "navy" => (0, 0, 128),
        "olive" => (128, 128, 0),
        "teal" => (0, 128, 128),
        "pink" => (255, 192, 203),
        "brown" => (165, 42, 42),
        "gold" => (255, 215, 0),
        "indigo" => (75, 0, 130),
        "violet" => (238, 130, 238),
        "tomato" => (255, 99, 71),
        "coral" => (255, 127, 80),
        "crimson" => (220, 20, 60),
        "salmon" => (250, 128, 114),
        "khaki" => (240, 230, 140),
        "beige" => (245, 245, 220),
        "ivory" => (255, 255, 240),
        "lavender" => (230, 230, 250),
        "tan" => (210, 180, 140),
        "skyblue" => (135, 206, 235),
        "steelblue" => (70, 130, 180),
        "royalblue" => (65, 105, 225),
        "darkblue" => (0, 0, 139),
        "darkred" => (139, 0, 0),
        "darkgreen" => (0, 100, 0),
        "darkgray" | "darkgrey" => (169, 169, 169),
        "lightgray" | "lightgrey" => (211, 211, 211),
        "lightblue" => (173, 216, 230),
        "lightgreen" => (144, 238, 144),
        "hotpink" => (255, 105, 180),
        "rebeccapurple" => (102, 51, 153),
        "whitesmoke" => (245, 245, 245),
        _ => return None,
    };
    Some((rgb.0, rgb.1, rgb.2, 1.0))
}
