use super::*;
use crate::css::{ComputedStyle, parse_style_declarations};
use crate::dom::{css_name_to_js_prop, dataset_key_to_attr_name, js_prop_to_css_name};
use crate::html::parse_fragment_into;
use crate::page::{Listener, Page};

const EVENT_TARGET_METHODS: &[&str] = &["addEventListener", "removeEventListener", "dispatchEvent"];

const NODE_METHODS: &[&str] = &[
    "appendChild", "append", "prepend", "insertBefore", "removeChild", "remove", "replaceChildren",
    "contains", "hasChildNodes", "cloneNode", "querySelector", "querySelectorAll",
    "getElementsByClassName", "getElementsByTagName",
];

const DOCUMENT_METHODS: &[&str] = &[
    "getElementById", "getElementsByName", "createElement", "createTextNode", "hasFocus",
];

const ELEMENT_METHODS: &[&str] = &[
    "getAttribute", "setAttribute", "removeAttribute", "hasAttribute", "toggleAttribute",
    "matches", "closest", "click", "focus", "blur", "submit", "reset", "select",
    "scrollIntoView", "insertAdjacentHTML", "insertAdjacentText", "getBoundingClientRect",
];

/// Attributes reflected as plain string properties.
const REFLECTED_ATTRS: &[(&str, &str)] = &[
    ("id", "id"),
    ("className", "class"),
    ("name", "name"),
    ("href", "href"),
    ("src", "src"),
    ("alt", "alt"),
    ("title", "title"),
    ("lang", "lang"),
    ("placeholder", "placeholder"),
    ("htmlFor", "for"),
    ("rel", "rel"),
    ("action", "action"),
    ("method", "method"),
    ("target", "target"),
    ("role", "role"),
    ("min", "min"),
    ("max", "max"),
    ("step", "step"),
    ("pattern", "pattern"),
    ("defaultValue", "value"),
];

const BOOLEAN_ATTRS: &[(&str, &str)] = &[
    ("hidden", "hidden"),
    ("required", "required"),
    ("readOnly", "readonly"),
    ("multiple", "multiple"),
    ("autofocus", "autofocus"),
    ("open", "open"),
    ("defaultChecked", "checked"),
];

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or(Value::Undefined)
}

fn nodes_value(nodes: impl IntoIterator<Item = NodeId>) -> Value {
    Value::array(nodes.into_iter().map(Value::Node).collect())
}

fn optional_node(node: Option<NodeId>) -> Value {
    node.map(Value::Node).unwrap_or(Value::Null)
}

fn handler_event_type(key: &str) -> Option<&str> {
    key.strip_prefix("on").filter(|rest| {
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase())
    })
}

fn dom_error(err: Error) -> Abrupt {
    match err {
        Error::UnsupportedSelector(selector) => Abrupt::Throw(Value::error(
            ErrorKind::SyntaxError,
            format!("'{selector}' is not a valid selector."),
        )),
        other => Abrupt::Throw(Value::error(ErrorKind::Error, other.to_string())),
    }
}

fn serialize_style(decls: &[crate::css::Declaration]) -> String {
    decls
        .iter()
        .map(|decl| {
            if decl.important {
                format!("{}: {} !important;", decl.name, decl.value)
            } else {
                format!("{}: {};", decl.name, decl.value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn style_property_name(key: &str) -> String {
    match key {
        "cssFloat" => "float".to_string(),
        _ if key.contains('-') => key.to_ascii_lowercase(),
        _ => js_prop_to_css_name(key),
    }
}

impl Page {
    pub(crate) fn host_get(&mut self, object: &Value, key: &str) -> Eval<Value> {
        match object {
            Value::Window => Ok(self.window_get(key)),
            Value::Node(node) => self.node_get(*node, key),
            Value::InlineStyle(node) => Ok(self.inline_style_get(*node, object, key)),
            Value::ComputedStyle(node) => Ok(match key {
                "getPropertyValue" => Value::method(object.clone(), key),
                "length" => Value::Number(
                    self.computed_style(*node)
                        .map_or(0, |cs| cs.property_names().len()) as f64,
                ),
                _ => Value::String(
                    self.computed_style(*node)
                        .map(|cs| cs.get(key))
                        .unwrap_or_default(),
                ),
            }),
            Value::ClassList(node) => {
                let names = self.dom.class_names(*node);
                Ok(match key {
                    "length" => Value::Number(names.len() as f64),
                    "value" => Value::String(names.join(" ")),
                    "add" | "remove" | "toggle" | "contains" | "item" | "replace" | "forEach"
                    | "toString" => Value::method(object.clone(), key),
                    _ => match key.parse::<usize>() {
                        Ok(idx) => names
                            .get(idx)
                            .cloned()
                            .map(Value::String)
                            .unwrap_or(Value::Undefined),
                        Err(_) => Value::Undefined,
                    },
                })
            }
            Value::Dataset(node) => Ok(self
                .dom
                .attr(*node, &dataset_key_to_attr_name(key))
                .map(Value::String)
                .unwrap_or(Value::Undefined)),
            Value::Event(event) => Ok(self.event_get(event, object, key)),
            _ => Ok(Value::Undefined),
        }
    }

    pub(crate) fn host_set(&mut self, object: &Value, key: &str, value: Value) -> Eval<()> {
        match object {
            Value::Window => {
                if let Some(event_type) = handler_event_type(key) {
                    self.set_handler_prop(EventTarget::Window, event_type, value);
                    return Ok(());
                }
                match self.globals.assign(key, value.clone()) {
                    Ok(true) | Err(()) => {}
                    Ok(false) => self.globals.declare(key, value, true),
                }
                Ok(())
            }
            Value::Node(node) => self.node_set(*node, key, value),
            Value::InlineStyle(node) => {
                if key == "cssText" {
                    self.dom
                        .set_attr(*node, "style", &value.to_js_string())
                        .map_err(dom_error)?;
                } else {
                    let text =
                        if value.is_nullish() { String::new() } else { value.to_js_string() };
                    self.write_inline_style(*node, &style_property_name(key), &text)?;
                }
                Ok(())
            }
            Value::Dataset(node) => self
                .dom
                .set_attr(*node, &dataset_key_to_attr_name(key), &value.to_js_string())
                .map_err(dom_error),
            Value::ClassList(node) if key == "value" => self
                .dom
                .set_attr(*node, "class", &value.to_js_string())
                .map_err(dom_error),
            Value::Event(event) => {
                let mut event = event.borrow_mut();
                match key {
                    "type" | "target" | "currentTarget" | "bubbles" | "cancelable" | "eventPhase"
                    | "isTrusted" | "defaultPrevented" => {}
                    "returnValue" if !value.truthy() && event.cancelable => {
                        event.default_prevented = true;
                    }
                    "cancelBubble" if value.truthy() => event.propagation_stopped = true,
                    _ => event.extra.set(key, value),
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn host_call(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        match receiver {
            Value::Window => self.window_call(name, args),
            Value::Node(node) => self.node_call(*node, name, args),
            Value::InlineStyle(node) => {
                let property = style_property_name(&arg(&args, 0).to_js_string());
                match name {
                    "getPropertyValue" => {
                        Ok(Value::String(self.inline_style_value(*node, &property)))
                    }
                    "setProperty" => {
                        let value = arg(&args, 1);
                        let text =
                            if value.is_nullish() { String::new() } else { value.to_js_string() };
                        self.write_inline_style(*node, &property, &text)?;
                        Ok(Value::Undefined)
                    }
                    _ => {
                        let previous = self.inline_style_value(*node, &property);
                        self.write_inline_style(*node, &property, "")?;
                        Ok(Value::String(previous))
                    }
                }
            }
            Value::ComputedStyle(node) => {
                let property = arg(&args, 0).to_js_string();
                Ok(Value::String(
                    self.computed_style(*node)
                        .map(|cs| cs.get(&property))
                        .unwrap_or_default(),
                ))
            }
            Value::ClassList(node) => self.class_list_call(*node, name, args),
            Value::Event(event) => {
                let mut event = event.borrow_mut();
                match name {
                    "preventDefault" => {
                        if event.cancelable {
                            event.default_prevented = true;
                        }
                    }
                    "stopPropagation" => event.propagation_stopped = true,
                    _ => {
                        event.propagation_stopped = true;
                        event.immediate_propagation_stopped = true;
                    }
                }
                Ok(Value::Undefined)
            }
            other => throw(
                ErrorKind::TypeError,
                format!("{}.{name} is not a function", other.to_js_string()),
            ),
        }
    }

    pub(crate) fn dataset_keys(&self, node: NodeId) -> Vec<String> {
        let mut keys = self
            .dom
            .element(node)
            .map(|element| {
                element
                    .attrs
                    .keys()
                    .filter_map(|name| name.strip_prefix("data-"))
                    .map(css_name_to_js_prop)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub(crate) fn query_one(&self, root: NodeId, selector: &str) -> Eval<Option<NodeId>> {
        self.dom.query_selector_from(root, selector).map_err(dom_error)
    }

    pub(crate) fn query_all(&self, root: NodeId, selector: &str) -> Eval<Vec<NodeId>> {
        self.dom.query_selector_all_from(root, selector).map_err(dom_error)
    }

    fn computed_style(&self, node: NodeId) -> Option<ComputedStyle> {
        ComputedStyle::for_node(&self.dom, &self.stylesheet, node)
    }

    fn window_get(&mut self, key: &str) -> Value {
        let viewport = self.options.viewport;
        match key {
            "document" => Value::Node(self.dom.root),
            "window" | "self" | "globalThis" | "top" | "parent" => Value::Window,
            "innerWidth" | "outerWidth" => Value::Number(f64::from(viewport.width)),
            "innerHeight" | "outerHeight" => Value::Number(f64::from(viewport.height)),
            "devicePixelRatio" => Value::Number(1.0),
            "scrollX" | "scrollY" | "pageXOffset" | "pageYOffset" => Value::Number(0.0),
            "scrollTo" | "scroll" | "scrollBy" => Value::method(Value::Window, key),
            _ if EVENT_TARGET_METHODS.contains(&key) => Value::method(Value::Window, key),
            _ => {
                if let Some(event_type) = handler_event_type(key) {
                    return self
                        .handler_props
                        .get(&(EventTarget::Window, event_type.to_string()))
                        .cloned()
                        .unwrap_or(Value::Null);
                }
                self.global_value(key).unwrap_or(Value::Undefined)
            }
        }
    }

    fn window_call(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "addEventListener" | "removeEventListener" | "dispatchEvent" => {
                self.event_target_call(EventTarget::Window, name, args)
            }
            _ => Ok(Value::Undefined),
        }
    }

    fn node_get(&mut self, node: NodeId, key: &str) -> Eval<Value> {
        let is_document = node == self.dom.root;
        let is_element = self.dom.is_element(node);

        if is_document {
            match key {
                "title" => return Ok(Value::String(self.dom.document_title())),
                "body" => return Ok(optional_node(self.dom.body())),
                "head" => return Ok(optional_node(self.dom.head())),
                "documentElement" => return Ok(optional_node(self.dom.document_element())),
                "readyState" => return Ok(Value::string(self.ready_state)),
                "activeElement" => {
                    return Ok(optional_node(self.dom.active_element.or_else(|| self.dom.body())));
                }
                "defaultView" => return Ok(Value::Window),
                "nodeType" => return Ok(Value::Number(9.0)),
                "nodeName" => return Ok(Value::string("#document")),
                "textContent" => return Ok(Value::Null),
                _ if DOCUMENT_METHODS.contains(&key) => {
                    return Ok(Value::method(Value::Node(node), key));
                }
                _ => {}
            }
        }

        if let Some(value) = self.node_tree_get(node, key) {
            return Ok(value);
        }

        if !is_element {
            if let NodeType::Text(text) = &self.dom.nodes[node.0].node_type {
                return Ok(match key {
                    "data" | "nodeValue" | "wholeText" | "textContent" => {
                        Value::String(text.clone())
                    }
                    "length" => Value::Number(text.chars().count() as f64),
                    "nodeType" => Value::Number(3.0),
                    "nodeName" => Value::string("#text"),
                    _ => self.expando(node, key),
                });
            }
        }

        if let Some(event_type) = handler_event_type(key) {
            return Ok(self
                .event_handler(EventTarget::Node(node), event_type)
                .unwrap_or(Value::Null));
        }

        if !is_element {
            return Ok(self.expando(node, key));
        }
        self.element_get(node, key)
    }

    /// Properties shared by every node kind.
    fn node_tree_get(&self, node: NodeId, key: &str) -> Option<Value> {
        let dom = &self.dom;
        let siblings = |offset: isize| -> Value {
            let Some(parent) = dom.parent(node) else {
                return Value::Null;
            };
            let children = dom.children(parent);
            children
                .iter()
                .position(|id| *id == node)
                .and_then(|pos| pos.checked_add_signed(offset))
                .and_then(|pos| children.get(pos).copied())
                .map(Value::Node)
                .unwrap_or(Value::Null)
        };
        Some(match key {
            "parentNode" => optional_node(dom.parent(node)),
            "parentElement" => optional_node(dom.parent_element(node)),
            "childNodes" => nodes_value(dom.children(node).to_vec()),
            "children" => nodes_value(dom.child_elements(node)),
            "firstChild" => optional_node(dom.children(node).first().copied()),
            "lastChild" => optional_node(dom.children(node).last().copied()),
            "firstElementChild" => optional_node(dom.child_elements(node).first().copied()),
            "lastElementChild" => optional_node(dom.child_elements(node).last().copied()),
            "childElementCount" => Value::Number(dom.child_elements(node).len() as f64),
            "nextSibling" => siblings(1),
            "previousSibling" => siblings(-1),
            "nextElementSibling" => optional_node(dom.next_element_sibling(node)),
            "previousElementSibling" => optional_node(dom.previous_element_sibling(node)),
            "isConnected" => Value::Bool(dom.is_connected(node)),
            "ownerDocument" => Value::Node(dom.root),
            _ if EVENT_TARGET_METHODS.contains(&key) || NODE_METHODS.contains(&key) => {
                Value::method(Value::Node(node), key)
            }
            _ => return None,
        })
    }

    fn element_get(&mut self, node: NodeId, key: &str) -> Eval<Value> {
        let Some(element) = self.dom.element(node) else {
            return Ok(Value::Undefined);
        };
        let tag = element.tag_name.clone();
        if let Some((_, attr)) = REFLECTED_ATTRS.iter().find(|(prop, _)| *prop == key) {
            return Ok(Value::String(self.dom.attr(node, attr).unwrap_or_default()));
        }
        if let Some((_, attr)) = BOOLEAN_ATTRS.iter().find(|(prop, _)| *prop == key) {
            return Ok(Value::Bool(self.dom.has_attr(node, attr)));
        }
        Ok(match key {
            "tagName" | "nodeName" => Value::String(tag.to_ascii_uppercase()),
            "localName" => Value::String(tag),
            "nodeType" => Value::Number(1.0),
            "classList" => Value::ClassList(node),
            "dataset" => Value::Dataset(node),
            "style" => Value::InlineStyle(node),
            "textContent" => Value::String(self.dom.text_content(node)),
            "innerText" => Value::String(self.dom.inner_text(node)),
            "innerHTML" => Value::String(self.dom.inner_html(node)),
            "outerHTML" => Value::String(self.dom.outer_html(node)),
            "value" => Value::String(self.dom.form_value(node)),
            "checked" => Value::Bool(element.checked),
            "disabled" => Value::Bool(element.disabled),
            "selected" => Value::Bool(self.dom.has_attr(node, "selected")),
            "type" => Value::String(match self.dom.attr(node, "type") {
                Some(kind) => kind.to_ascii_lowercase(),
                None if tag == "input" => "text".to_string(),
                None if tag == "button" => "submit".to_string(),
                None if tag == "select" => "select-one".to_string(),
                None => String::new(),
            }),
            "tabIndex" => Value::Number(
                self.dom
                    .attr(node, "tabindex")
                    .and_then(|raw| raw.trim().parse::<f64>().ok())
                    .unwrap_or(
                        if matches!(tag.as_str(), "a" | "button" | "input" | "select" | "textarea")
                        {
                            0.0
                        } else {
                            -1.0
                        },
                    ),
            ),
            "form" => optional_node(self.dom.closest(node, "form").map_err(dom_error)?),
            "options" => nodes_value(self.select_options(node)),
            "selectedIndex" => {
                let value = self.dom.form_value(node);
                let options = self.select_options(node);
                Value::Number(
                    options
                        .iter()
                        .position(|option| self.option_value(*option) == value)
                        .map(|idx| idx as f64)
                        .unwrap_or(-1.0),
                )
            }
            "offsetWidth" | "offsetHeight" | "clientWidth" | "clientHeight" | "scrollWidth"
            | "scrollHeight" | "offsetTop" | "offsetLeft" | "scrollTop" | "scrollLeft" => {
                Value::Number(0.0)
            }
            _ if ELEMENT_METHODS.contains(&key) => Value::method(Value::Node(node), key),
            _ => self.expando(node, key),
        })
    }

    fn select_options(&self, node: NodeId) -> Vec<NodeId> {
        let mut options = Vec::new();
        self.dom.collect_elements_descendants_dfs(node, &mut options);
        options.retain(|id| self.dom.has_tag(*id, "option"));
        options
    }

    fn option_value(&self, option: NodeId) -> String {
        self.dom
            .attr(option, "value")
            .unwrap_or_else(|| self.dom.text_content(option).trim().to_string())
    }

    fn expando(&self, node: NodeId, key: &str) -> Value {
        self.expandos
            .get(&(node, key.to_string()))
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    fn node_set(&mut self, node: NodeId, key: &str, value: Value) -> Eval<()> {
        if let Some(event_type) = handler_event_type(key) {
            self.set_handler_prop(EventTarget::Node(node), event_type, value);
            return Ok(());
        }
        if node == self.dom.root {
            if key == "title" {
                return self
                    .dom
                    .set_document_title(&value.to_js_string())
                    .map_err(dom_error);
            }
            self.expandos.insert((node, key.to_string()), value);
            return Ok(());
        }
        if !self.dom.is_element(node) {
            if matches!(key, "data" | "nodeValue" | "textContent") {
                return self
                    .dom
                    .set_text_content(node, &value.to_js_string())
                    .map_err(dom_error);
            }
            self.expandos.insert((node, key.to_string()), value);
            return Ok(());
        }

        if let Some((_, attr)) = REFLECTED_ATTRS.iter().find(|(prop, _)| *prop == key) {
            return self
                .dom
                .set_attr(node, attr, &value.to_js_string())
                .map_err(dom_error);
        }
        if let Some((_, attr)) = BOOLEAN_ATTRS.iter().find(|(prop, _)| *prop == key) {
            return self.toggle_attr(node, attr, value.truthy()).map(|_| ());
        }
        match key {
            "textContent" | "innerText" => self
                .dom
                .set_text_content(node, &value.to_js_string())
                .map_err(dom_error),
            "innerHTML" => {
                self.dom.clear_children(node);
                parse_fragment_into(&mut self.dom, node, &value.to_js_string()).map_err(dom_error)
            }
            "value" => self
                .dom
                .set_form_value(node, &value.to_js_string())
                .map_err(dom_error),
            "checked" => {
                let checked = value.truthy();
                if let Some(element) = self.dom.element_mut(node) {
                    element.checked = checked;
                }
                if checked && self.is_input_of_type(node, "radio") {
                    self.dom.uncheck_radio_group_peers(node);
                }
                Ok(())
            }
            "disabled" => self.toggle_attr(node, "disabled", value.truthy()).map(|_| ()),
            "selected" => self.toggle_attr(node, "selected", value.truthy()).map(|_| ()),
            "style" => self
                .dom
                .set_attr(node, "style", &value.to_js_string())
                .map_err(dom_error),
            "type" => self
                .dom
                .set_attr(node, "type", &value.to_js_string())
                .map_err(dom_error),
            "selectedIndex" => {
                let idx = value.to_number();
                let options = self.select_options(node);
                let chosen = (idx >= 0.0).then(|| options.get(idx as usize)).flatten();
                if let Some(chosen) = chosen {
                    let option_value = self.option_value(*chosen);
                    self.dom.set_form_value(node, &option_value).map_err(dom_error)?;
                }
                Ok(())
            }
            "tagName" | "nodeName" | "nodeType" | "children" | "parentNode" | "parentElement"
            | "classList" | "dataset" => Ok(()),
            _ => {
                self.expandos.insert((node, key.to_string()), value);
                Ok(())
            }
        }
    }

    fn toggle_attr(&mut self, node: NodeId, attr: &str, on: bool) -> Eval<bool> {
        let result = if on {
            self.dom.set_attr(node, attr, "")
        } else {
            self.dom.remove_attr(node, attr)
        };
        result.map_err(dom_error)?;
        Ok(on)
    }

    fn is_input_of_type(&self, node: NodeId, kind: &str) -> bool {
        self.dom.has_tag(node, "input")
            && self
                .dom
                .attr(node, "type")
                .is_some_and(|value| value.eq_ignore_ascii_case(kind))
    }

    fn node_call(&mut self, node: NodeId, name: &str, args: Vec<Value>) -> Eval<Value> {
        let first = arg(&args, 0);
        let node_arg = |value: &Value, method: &str| -> Eval<NodeId> {
            match value {
                Value::Node(child) => Ok(*child),
                other => throw(
                    ErrorKind::TypeError,
                    format!(
                        "Failed to execute '{method}' on 'Node': parameter 1 ({}) is not of \
                         type 'Node'.",
                        other.to_js_string()
                    ),
                ),
            }
        };
        match name {
            "addEventListener" | "removeEventListener" | "dispatchEvent" => {
                self.event_target_call(EventTarget::Node(node), name, args)
            }
            "querySelector" => Ok(optional_node(self.query_one(node, &first.to_js_string())?)),
            "querySelectorAll" => Ok(nodes_value(self.query_all(node, &first.to_js_string())?)),
            "getElementById" => {
                Ok(optional_node(self.dom.get_element_by_id(&first.to_js_string())))
            }
            "getElementsByClassName" => {
                let wanted = first
                    .to_js_string()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                let mut all = Vec::new();
                self.dom.collect_elements_descendants_dfs(node, &mut all);
                all.retain(|id| {
                    let names = self.dom.class_names(*id);
                    !wanted.is_empty() && wanted.iter().all(|w| names.contains(w))
                });
                Ok(nodes_value(all))
            }
            "getElementsByTagName" => {
                let tag = first.to_js_string();
                let mut all = Vec::new();
                self.dom.collect_elements_descendants_dfs(node, &mut all);
                if tag != "*" {
                    all.retain(|id| self.dom.has_tag(*id, &tag));
                }
                Ok(nodes_value(all))
            }
            "getElementsByName" => {
                let wanted = first.to_js_string();
                let mut all = self.dom.all_element_nodes();
                all.retain(|id| self.dom.attr(*id, "name").as_deref() == Some(wanted.as_str()));
                Ok(nodes_value(all))
            }
            "createElement" => Ok(Value::Node(
                self.dom
                    .create_detached_element(first.to_js_string().to_ascii_lowercase()),
            )),
            "createTextNode" => {
                Ok(Value::Node(self.dom.create_detached_text(first.to_js_string())))
            }
            "hasFocus" => Ok(Value::Bool(true)),
            "appendChild" => {
                let child = node_arg(&first, name)?;
                self.dom.append_child(node, child).map_err(dom_error)?;
                Ok(first)
            }
            "append" | "prepend" => {
                let reference = if name == "prepend" {
                    self.dom.children(node).first().copied()
                } else {
                    None
                };
                for item in args {
                    let child = match item {
                        Value::Node(child) => child,
                        other => self.dom.create_detached_text(other.to_js_string()),
                    };
                    self.dom.insert_before(node, child, reference).map_err(dom_error)?;
                }
                Ok(Value::Undefined)
            }
            "insertBefore" => {
                let child = node_arg(&first, name)?;
                let reference = match arg(&args, 1) {
                    Value::Node(reference) => Some(reference),
                    _ => None,
                };
                self.dom.insert_before(node, child, reference).map_err(dom_error)?;
                Ok(first)
            }
            "removeChild" => {
                let child = node_arg(&first, name)?;
                self.dom.remove_child(node, child).map_err(dom_error)?;
                Ok(first)
            }
            "remove" => {
                self.dom.detach(node);
                Ok(Value::Undefined)
            }
            "replaceChildren" => {
                self.dom.clear_children(node);
                for item in args {
                    let child = match item {
                        Value::Node(child) => child,
                        other => self.dom.create_detached_text(other.to_js_string()),
                    };
                    self.dom.append_child(node, child).map_err(dom_error)?;
                }
                Ok(Value::Undefined)
            }
            "contains" => Ok(Value::Bool(match first {
                Value::Node(other) => other == node || self.dom.is_descendant_of(other, node),
                _ => false,
            })),
            "hasChildNodes" => Ok(Value::Bool(!self.dom.children(node).is_empty())),
            "cloneNode" => Ok(Value::Node(self.dom.clone_node(node, first.truthy()))),
            "getAttribute" => Ok(self
                .dom
                .attr(node, &first.to_js_string())
                .map(Value::String)
                .unwrap_or(Value::Null)),
            "setAttribute" => {
                let attr = first.to_js_string();
                let value = arg(&args, 1).to_js_string();
                self.dom.set_attr(node, &attr, &value).map_err(dom_error)?;
                Ok(Value::Undefined)
            }
            "removeAttribute" => {
                self.dom
                    .remove_attr(node, &first.to_js_string())
                    .map_err(dom_error)?;
                Ok(Value::Undefined)
            }
            "hasAttribute" => Ok(Value::Bool(self.dom.has_attr(node, &first.to_js_string()))),
            "toggleAttribute" => {
                let attr = first.to_js_string();
                let on = match arg(&args, 1) {
                    Value::Undefined => !self.dom.has_attr(node, &attr),
                    force => force.truthy(),
                };
                Ok(Value::Bool(self.toggle_attr(node, &attr, on)?))
            }
            "matches" => Ok(Value::Bool(
                self.dom
                    .matches_selector(node, &first.to_js_string())
                    .map_err(dom_error)?,
            )),
            "closest" => Ok(optional_node(
                self.dom
                    .closest(node, &first.to_js_string())
                    .map_err(dom_error)?,
            )),
            "click" => {
                self.click(node)?;
                Ok(Value::Undefined)
            }
            "focus" => {
                self.focus(node)?;
                Ok(Value::Undefined)
            }
            "blur" => {
                self.blur(node)?;
                Ok(Value::Undefined)
            }
            "insertAdjacentHTML" | "insertAdjacentText" => {
                let position = first.to_js_string().to_ascii_lowercase();
                let content = arg(&args, 1).to_js_string();
                let holder = self.dom.create_detached_element("div".into());
                if name == "insertAdjacentHTML" {
                    parse_fragment_into(&mut self.dom, holder, &content).map_err(dom_error)?;
                } else {
                    self.dom.create_text(holder, content);
                }
                let (parent, reference) = match position.as_str() {
                    "beforebegin" => (self.dom.parent(node), Some(node)),
                    "afterbegin" => (Some(node), self.dom.children(node).first().copied()),
                    "beforeend" => (Some(node), None),
                    "afterend" => {
                        let parent = self.dom.parent(node);
                        let next = parent.and_then(|parent| {
                            let siblings = self.dom.children(parent);
                            let pos = siblings.iter().position(|id| *id == node)?;
                            siblings.get(pos + 1).copied()
                        });
                        (parent, next)
                    }
                    _ => {
                        return throw(
                            ErrorKind::SyntaxError,
                            format!(
                                "The value provided ('{position}') is not one of 'beforeBegin', \
                                 'afterBegin', 'beforeEnd', or 'afterEnd'."
                            ),
                        );
                    }
                };
                if let Some(parent) = parent {
                    for child in self.dom.children(holder).to_vec() {
                        self.dom.insert_before(parent, child, reference).map_err(dom_error)?;
                    }
                }
                Ok(Value::Undefined)
            }
            "getBoundingClientRect" => {
                let mut rect = ObjectValue::default();
                for key in ["x", "y", "top", "left", "right", "bottom", "width", "height"] {
                    rect.set(key, Value::Number(0.0));
                }
                Ok(Value::object(rect))
            }
            // No navigation, selection or scrolling on this surface.
            _ => Ok(Value::Undefined),
        }
    }

    fn event_target_call(
        &mut self,
        target: EventTarget,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let first = arg(&args, 0);
        let callback = arg(&args, 1);
        let (capture, once) = match arg(&args, 2) {
            Value::Object(options) => {
                let options = options.borrow();
                (
                    options.get("capture").is_some_and(Value::truthy),
                    options.get("once").is_some_and(Value::truthy),
                )
            }
            other => (other.truthy(), false),
        };
        match name {
            "addEventListener" => {
                if !callback.is_callable() {
                    return Ok(Value::Undefined);
                }
                let event_type = first.to_js_string();
                let listeners = self.listeners.entry(target).or_default();
                let duplicate = listeners.iter().any(|listener| {
                    listener.event_type == event_type
                        && listener.capture == capture
                        && listener.callback.strict_equals(&callback)
                });
                if !duplicate {
                    listeners.push(Listener {
                        event_type,
                        callback,
                        capture,
                        once,
                    });
                }
                Ok(Value::Undefined)
            }
            "removeEventListener" => {
                let event_type = first.to_js_string();
                if let Some(listeners) = self.listeners.get_mut(&target) {
                    if let Some(pos) = listeners.iter().position(|listener| {
                        listener.event_type == event_type
                            && listener.capture == capture
                            && listener.callback.strict_equals(&callback)
                    }) {
                        listeners.remove(pos);
                    }
                }
                Ok(Value::Undefined)
            }
            _ => {
                let Value::Event(event) = first else {
                    return throw(
                        ErrorKind::TypeError,
                        "Failed to execute 'dispatchEvent': parameter 1 is not of type 'Event'.",
                    );
                };
                let not_canceled = match target {
                    EventTarget::Node(node) => self.dispatch_with_activation(node, &event)?,
                    EventTarget::Window => self.dispatch_event(target, &event)?,
                };
                Ok(Value::Bool(not_canceled))
            }
        }
    }

    fn class_list_call(&mut self, node: NodeId, name: &str, args: Vec<Value>) -> Eval<Value> {
        let mut names = self.dom.class_names(node);
        let tokens = args.iter().map(Value::to_js_string).collect::<Vec<_>>();
        if matches!(name, "add" | "remove" | "toggle" | "contains" | "replace")
            && tokens
                .iter()
                .take(2)
                .any(|token| token.is_empty() || token.contains(char::is_whitespace))
        {
            return throw(
                ErrorKind::SyntaxError,
                "The token provided must not be empty and must not contain whitespace.",
            );
        }
        let result = match name {
            "add" => {
                for token in tokens {
                    if !names.contains(&token) {
                        names.push(token);
                    }
                }
                Value::Undefined
            }
            "remove" => {
                names.retain(|existing| !tokens.contains(existing));
                Value::Undefined
            }
            "toggle" => {
                let token = tokens.first().cloned().unwrap_or_default();
                let present = names.contains(&token);
                let want = match args.get(1) {
                    Some(Value::Undefined) | None => !present,
                    Some(force) => force.truthy(),
                };
                names.retain(|existing| *existing != token);
                if want {
                    names.push(token);
                }
                Value::Bool(want)
            }
            "contains" => return Ok(Value::Bool(tokens.first().is_some_and(|t| names.contains(t)))),
            "item" => {
                let idx = arg(&args, 0).to_number();
                return Ok((idx >= 0.0)
                    .then(|| names.get(idx as usize).cloned())
                    .flatten()
                    .map(Value::String)
                    .unwrap_or(Value::Null));
            }
            "replace" => {
                let old = tokens.first().cloned().unwrap_or_default();
                let new = tokens.get(1).cloned().unwrap_or_default();
                let Some(pos) = names.iter().position(|existing| *existing == old) else {
                    return Ok(Value::Bool(false));
                };
                names[pos] = new.clone();
                let mut seen = HashSet::new();
                names.retain(|existing| seen.insert(existing.clone()));
                Value::Bool(true)
            }
            "forEach" => {
                let callback = arg(&args, 0);
                for (idx, token) in names.into_iter().enumerate() {
                    self.call_function(
                        &callback,
                        Value::Undefined,
                        vec![
                            Value::String(token),
                            Value::Number(idx as f64),
                            Value::ClassList(node),
                        ],
                    )?;
                }
                return Ok(Value::Undefined);
            }
            _ => return Ok(Value::String(names.join(" "))),
        };
        self.dom.set_class_names(node, &names).map_err(dom_error)?;
        Ok(result)
    }

    fn inline_style_get(&self, node: NodeId, object: &Value, key: &str) -> Value {
        match key {
            "cssText" => Value::String(self.dom.attr(node, "style").unwrap_or_default()),
            "length" => Value::Number(self.inline_declarations(node).len() as f64),
            "getPropertyValue" | "setProperty" | "removeProperty" => {
                Value::method(object.clone(), key)
            }
            _ => Value::String(self.inline_style_value(node, &style_property_name(key))),
        }
    }

    fn inline_declarations(&self, node: NodeId) -> Vec<crate::css::Declaration> {
        self.dom
            .attr(node, "style")
            .map(|style| parse_style_declarations(&style))
            .unwrap_or_default()
    }

    fn inline_style_value(&self, node: NodeId, property: &str) -> String {
        self.inline_declarations(node)
            .into_iter()
            .rev()
            .find(|decl| decl.name == property)
            .map(|decl| decl.value)
            .unwrap_or_default()
    }

    fn write_inline_style(&mut self, node: NodeId, property: &str, value: &str) -> Eval<()> {
        let mut decls = self.inline_declarations(node);
        let value = value.trim();
        match decls.iter_mut().find(|decl| decl.name == property) {
            Some(decl) if !value.is_empty() => {
                decl.value = value.to_string();
                decl.important = false;
            }
            Some(_) => decls.retain(|decl| decl.name != property),
            None if !value.is_empty() => decls.push(crate::css::Declaration {
                name: property.to_string(),
                value: value.to_string(),
                important: false,
            }),
            None => return Ok(()),
        }
        self.dom
            .set_attr(node, "style", &serialize_style(&decls))
            .map_err(dom_error)
    }

    fn event_get(&self, event: &Rc<RefCell<EventValue>>, object: &Value, key: &str) -> Value {
        let event = event.borrow();
        match key {
            "type" => Value::String(event.event_type.clone()),
            "target" | "srcElement" => {
                event.target.map(EventTarget::to_value).unwrap_or(Value::Null)
            }
            "currentTarget" => event
                .current_target
                .map(EventTarget::to_value)
                .unwrap_or(Value::Null),
            "bubbles" => Value::Bool(event.bubbles),
            "cancelable" => Value::Bool(event.cancelable),
            "defaultPrevented" => Value::Bool(event.default_prevented),
            "returnValue" => Value::Bool(!event.default_prevented),
            "cancelBubble" => Value::Bool(event.propagation_stopped),
            "eventPhase" => Value::Number(f64::from(event.phase)),
            "isTrusted" => Value::Bool(event.is_trusted),
            "timeStamp" => Value::Number(self.now_ms()),
            "preventDefault" | "stopPropagation" | "stopImmediatePropagation" => {
                Value::method(object.clone(), key)
            }
            _ => event.extra.get(key).cloned().unwrap_or(Value::Undefined),
        }
    }

    /// Builds an event from a type and an init dictionary; `flag_default`
    /// seeds `bubbles` and `cancelable` when the dictionary omits them.
    pub(crate) fn new_event(
        &mut self,
        event_type: &str,
        init: &Value,
        flag_default: bool,
    ) -> Eval<Value> {
        let mut event = EventValue::new(event_type, flag_default, flag_default);
        if let Value::Object(obj) = init {
            for (key, value) in obj.borrow().entries() {
                match key.as_str() {
                    "bubbles" => event.bubbles = value.truthy(),
                    "cancelable" => event.cancelable = value.truthy(),
                    _ => event.extra.set(key, value),
                }
            }
        }
        Ok(Value::Event(Rc::new(RefCell::new(event))))
    }

    fn set_handler_prop(&mut self, target: EventTarget, event_type: &str, value: Value) {
        let key = (target, event_type.to_string());
        if value.is_callable() {
            self.handler_props.insert(key, value);
        } else {
            self.handler_props.insert(key, Value::Null);
        }
    }

    /// The `on<type>` handler of a target: a property assignment wins over the
    /// inline attribute.
    fn event_handler(&mut self, target: EventTarget, event_type: &str) -> Option<Value> {
        if let Some(handler) = self.handler_props.get(&(target, event_type.to_string())) {
            return handler.is_callable().then(|| handler.clone());
        }
        let EventTarget::Node(node) = target else {
            return None;
        };
        let body = self.dom.attr(node, &format!("on{event_type}"))?;
        let handler = self.compile_handler(&body)?;
        self.handler_props
            .insert((target, event_type.to_string()), handler.clone());
        Some(handler)
    }

    fn event_path(&self, target: EventTarget) -> Vec<EventTarget> {
        let EventTarget::Node(node) = target else {
            return vec![EventTarget::Window];
        };
        let mut path = vec![target];
        let mut cursor = self.dom.parent(node);
        while let Some(current) = cursor {
            path.push(EventTarget::Node(current));
            cursor = self.dom.parent(current);
        }
        if path.last() == Some(&EventTarget::Node(self.dom.root)) {
            path.push(EventTarget::Window);
        }
        path
    }

    /// Dispatches through capture, target and bubble phases. Returns `false`
    /// when a listener cancelled the event.
    pub(crate) fn dispatch_event(
        &mut self,
        target: EventTarget,
        event: &Rc<RefCell<EventValue>>,
    ) -> Eval<bool> {
        let path = self.event_path(target);
        {
            let mut event = event.borrow_mut();
            event.target = Some(target);
            event.propagation_stopped = false;
            event.immediate_propagation_stopped = false;
        }
        let stopped = |event: &Rc<RefCell<EventValue>>| event.borrow().propagation_stopped;

        for current in path.iter().skip(1).rev() {
            self.invoke_listeners(*current, event, 1)?;
            if stopped(event) {
                break;
            }
        }
        if !stopped(event) {
            self.invoke_listeners(target, event, 2)?;
        }
        if event.borrow().bubbles {
            for current in path.iter().skip(1) {
                if stopped(event) {
                    break;
                }
                self.invoke_listeners(*current, event, 3)?;
            }
        }

        let mut event = event.borrow_mut();
        event.current_target = None;
        event.phase = 0;
        Ok(!event.default_prevented)
    }

    fn invoke_listeners(
        &mut self,
        current: EventTarget,
        event: &Rc<RefCell<EventValue>>,
        phase: u8,
    ) -> Eval<()> {
        let event_type = event.borrow().event_type.clone();
        let matching = self
            .listeners
            .get(&current)
            .map(|listeners| {
                listeners
                    .iter()
                    .filter(|listener| {
                        listener.event_type == event_type
                            && match phase {
                                1 => listener.capture,
                                3 => !listener.capture,
                                _ => true,
                            }
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        {
            let mut event = event.borrow_mut();
            event.current_target = Some(current);
            event.phase = phase;
        }

        for listener in matching {
            if listener.once {
                if let Some(listeners) = self.listeners.get_mut(&current) {
                    listeners.retain(|existing| {
                        !(existing.event_type == listener.event_type
                            && existing.capture == listener.capture
                            && existing.callback.strict_equals(&listener.callback))
                    });
                }
            }
            let result = self.call_function(
                &listener.callback,
                current.to_value(),
                vec![Value::Event(Rc::clone(event))],
            );
            self.report_listener_error(result);
            if event.borrow().immediate_propagation_stopped {
                return Ok(());
            }
        }

        if phase != 1 {
            if let Some(handler) = self.event_handler(current, &event_type) {
                let result = self.call_function(
                    &handler,
                    current.to_value(),
                    vec![Value::Event(Rc::clone(event))],
                );
                if let Ok(Value::Bool(false)) = result {
                    let mut event = event.borrow_mut();
                    if event.cancelable {
                        event.default_prevented = true;
                    }
                }
                self.report_listener_error(result);
            }
        }
        Ok(())
    }

    /// Listener exceptions are reported, never propagated to the dispatcher.
    fn report_listener_error(&mut self, result: Eval<Value>) {
        if let Err(Abrupt::Throw(thrown)) = result {
            self.page_debug(describe_thrown(&thrown));
        }
    }

    fn fire(
        &mut self,
        node: NodeId,
        event_type: &str,
        bubbles: bool,
        cancelable: bool,
    ) -> Eval<bool> {
        let event = Rc::new(RefCell::new(EventValue::new(event_type, bubbles, cancelable)));
        self.dispatch_event(EventTarget::Node(node), &event)
    }

    pub(crate) fn click(&mut self, node: NodeId) -> Eval<()> {
        if self.dom.element(node).is_some_and(|element| element.disabled) {
            return Ok(());
        }
        let mut event = EventValue::new("click", true, true);
        event.extra.set("detail", Value::Number(1.0));
        event.extra.set("button", Value::Number(0.0));
        self.dispatch_with_activation(node, &Rc::new(RefCell::new(event)))?;
        Ok(())
    }

    /// Dispatches `event` at `node`, running click activation behavior for
    /// checkboxes, radios, labels and submit buttons.
    fn dispatch_with_activation(
        &mut self,
        node: NodeId,
        event: &Rc<RefCell<EventValue>>,
    ) -> Eval<bool> {
        if event.borrow().event_type != "click" {
            return self.dispatch_event(EventTarget::Node(node), event);
        }
        if self.dom.element(node).is_some_and(|element| element.disabled) {
            return Ok(true);
        }

        let checkbox = self.is_input_of_type(node, "checkbox");
        let radio = self.is_input_of_type(node, "radio");
        let mut restore = Vec::new();
        if checkbox || radio {
            let group = if radio { self.radio_group(node) } else { vec![node] };
            for member in group {
                if let Some(element) = self.dom.element(member) {
                    restore.push((member, element.checked));
                }
            }
            let next = if checkbox {
                !self.dom.element(node).is_some_and(|element| element.checked)
            } else {
                true
            };
            if let Some(element) = self.dom.element_mut(node) {
                element.checked = next;
            }
            if radio {
                self.dom.uncheck_radio_group_peers(node);
            }
        }

        let not_canceled = self.dispatch_event(EventTarget::Node(node), event)?;

        if !not_canceled {
            for (member, checked) in restore {
                if let Some(element) = self.dom.element_mut(member) {
                    element.checked = checked;
                }
            }
            return Ok(false);
        }

        let changed = restore.iter().any(|(member, before)| {
            self.dom.element(*member).is_some_and(|element| element.checked != *before)
        });
        if changed {
            self.fire(node, "input", true, false)?;
            self.fire(node, "change", true, false)?;
        }

        if self.dom.has_tag(node, "label") {
            if let Some(control) = self.labelled_control(node) {
                let clicked_inside = event
                    .borrow()
                    .target
                    .is_some_and(|target| target == EventTarget::Node(control));
                if !clicked_inside {
                    self.click(control)?;
                }
            }
        }

        if self.is_submit_button(node) {
            if let Some(form) = self.dom.closest(node, "form").map_err(dom_error)? {
                self.fire(form, "submit", true, true)?;
            }
        }
        Ok(true)
    }

    fn radio_group(&self, node: NodeId) -> Vec<NodeId> {
        let Some(name) = self.dom.attr(node, "name") else {
            return vec![node];
        };
        self.dom
            .all_element_nodes()
            .into_iter()
            .filter(|other| {
                self.is_input_of_type(*other, "radio")
                    && self.dom.attr(*other, "name").as_deref() == Some(name.as_str())
            })
            .collect()
    }

    fn labelled_control(&self, label: NodeId) -> Option<NodeId> {
        if let Some(id) = self.dom.attr(label, "for") {
            return self.dom.get_element_by_id(&id);
        }
        let mut descendants = Vec::new();
        self.dom.collect_elements_descendants_dfs(label, &mut descendants);
        descendants.into_iter().find(|candidate| {
            ["input", "select", "textarea", "button"]
                .iter()
                .any(|tag| self.dom.has_tag(*candidate, tag))
        })
    }

    fn is_submit_button(&self, node: NodeId) -> bool {
        let kind = self.dom.attr(node, "type").map(|kind| kind.to_ascii_lowercase());
        if self.dom.has_tag(node, "button") {
            return matches!(kind.as_deref(), None | Some("submit"));
        }
        self.dom.has_tag(node, "input") && matches!(kind.as_deref(), Some("submit" | "image"))
    }

    pub(crate) fn focus(&mut self, node: NodeId) -> Eval<()> {
        if self.dom.active_element == Some(node) || !self.dom.is_connected(node) {
            return Ok(());
        }
        if let Some(previous) = self.dom.active_element {
            self.blur(previous)?;
        }
        self.dom.active_element = Some(node);
        self.fire(node, "focus", false, false)?;
        self.fire(node, "focusin", true, false)?;
        Ok(())
    }

    pub(crate) fn blur(&mut self, node: NodeId) -> Eval<()> {
        if self.dom.active_element != Some(node) {
            return Ok(());
        }
        self.dom.active_element = None;
        self.fire(node, "blur", false, false)?;
        self.fire(node, "focusout", true, false)?;
        Ok(())
    }
}
