use super::*;
use crate::script::{STACK_GROWTH, STACK_RED_ZONE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
    pub(crate) value: String,
    pub(crate) checked: bool,
    pub(crate) disabled: bool,
}

impl Element {
    fn new(tag_name: String, attrs: HashMap<String, String>) -> Self {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let checked = attrs.contains_key("checked");
        let disabled = attrs.contains_key("disabled");
        Self {
            tag_name,
            attrs,
            value,
            checked,
            disabled,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Dom {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) active_element: Option<NodeId>,
}

impl Dom {
    pub(crate) fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            active_element: None,
        }
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        self.create_node(Some(parent), NodeType::Element(Element::new(tag_name, attrs)))
    }

    pub(crate) fn create_detached_element(&mut self, tag_name: String) -> NodeId {
        self.create_node(None, NodeType::Element(Element::new(tag_name, HashMap::new())))
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn create_detached_text(&mut self, text: String) -> NodeId {
        self.create_node(None, NodeType::Text(text))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes.get(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn is_element(&self, node_id: NodeId) -> bool {
        self.element(node_id).is_some()
    }

    pub(crate) fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    pub(crate) fn has_tag(&self, node_id: NodeId, tag: &str) -> bool {
        self.tag_name(node_id)
            .is_some_and(|name| name.eq_ignore_ascii_case(tag))
    }

    pub(crate) fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(node_id.0)?.parent
    }

    pub(crate) fn parent_element(&self, node_id: NodeId) -> Option<NodeId> {
        self.parent(node_id).filter(|parent| self.is_element(*parent))
    }

    pub(crate) fn children(&self, node_id: NodeId) -> &[NodeId] {
        self.nodes
            .get(node_id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn is_descendant_of(&self, node_id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node_id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub(crate) fn is_connected(&self, node_id: NodeId) -> bool {
        node_id == self.root || self.is_descendant_of(node_id, self.root)
    }

    pub(crate) fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|element| element.attrs.get(&name.to_ascii_lowercase()).cloned())
    }

    pub(crate) fn has_attr(&self, node_id: NodeId, name: &str) -> bool {
        self.element(node_id)
            .is_some_and(|element| element.attrs.contains_key(&name.to_ascii_lowercase()))
    }

    pub(crate) fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::ScriptRuntime("setAttribute target is not an element".into()))?;
        match name.as_str() {
            "value" => element.value = value.to_string(),
            "checked" => element.checked = true,
            "disabled" => element.disabled = true,
            _ => {}
        }
        element.attrs.insert(name, value.to_string());
        Ok(())
    }

    pub(crate) fn remove_attr(&mut self, node_id: NodeId, name: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let element = self.element_mut(node_id).ok_or_else(|| {
            Error::ScriptRuntime("removeAttribute target is not an element".into())
        })?;
        match name.as_str() {
            "checked" => element.checked = false,
            "disabled" => element.disabled = false,
            _ => {}
        }
        element.attrs.remove(&name);
        Ok(())
    }

    pub(crate) fn text_content(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node_id, false, &mut out);
        out
    }

    /// Rendered text approximation: skips `script`, `style` and `template` content.
    pub(crate) fn inner_text(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node_id, true, &mut out);
        out
    }

    fn collect_text(&self, node_id: NodeId, rendered_only: bool, out: &mut String) {
        let mut pending = vec![node_id];
        while let Some(current) = pending.pop() {
            let Some(node) = self.nodes.get(current.0) else {
                continue;
            };
            match &node.node_type {
                NodeType::Text(text) => out.push_str(text),
                NodeType::Element(element)
                    if rendered_only
                        && matches!(
                            element.tag_name.as_str(),
                            "script" | "style" | "template"
                        ) => {}
                _ => pending.extend(node.children.iter().rev()),
            }
        }
    }

    pub(crate) fn set_text_content(&mut self, node_id: NodeId, text: &str) -> Result<()> {
        match self.nodes.get_mut(node_id.0).map(|node| &mut node.node_type) {
            Some(NodeType::Text(existing)) => {
                *existing = text.to_string();
                return Ok(());
            }
            Some(_) => {}
            None => return Err(Error::ScriptRuntime("unknown node".into())),
        }
        self.clear_children(node_id);
        if !text.is_empty() {
            self.create_text(node_id, text.to_string());
        }
        Ok(())
    }

    pub(crate) fn clear_children(&mut self, node_id: NodeId) {
        let children = std::mem::take(&mut self.nodes[node_id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if parent == child || self.is_descendant_of(parent, child) {
            return Err(Error::ScriptRuntime(
                "appendChild would create a cycle in the document".into(),
            ));
        }
        if matches!(self.nodes[child.0].node_type, NodeType::Document) {
            return Err(Error::ScriptRuntime("cannot append the document".into()));
        }
        self.detach(child);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Inserts `child` before `reference` under `parent`; appends when
    /// `reference` is `None`.
    pub(crate) fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        let Some(reference) = reference else {
            return self.append_child(parent, child);
        };
        if self.parent(reference) != Some(parent) {
            return Err(Error::ScriptRuntime(
                "insertBefore reference is not a child of this node".into(),
            ));
        }
        if reference == child {
            return Ok(());
        }
        self.append_child(parent, child)?;
        let children = &mut self.nodes[parent.0].children;
        children.retain(|id| *id != child);
        let pos = children
            .iter()
            .position(|id| *id == reference)
            .unwrap_or(children.len());
        children.insert(pos, child);
        Ok(())
    }

    /// Copies `node_id` (and its subtree when `deep`) into a new detached node.
    pub(crate) fn clone_node(&mut self, node_id: NodeId, deep: bool) -> NodeId {
        let copy = match self.nodes[node_id.0].node_type.clone() {
            NodeType::Element(element) => {
                let copy = self.create_detached_element(element.tag_name.clone());
                if let Some(target) = self.element_mut(copy) {
                    *target = element;
                }
                copy
            }
            NodeType::Text(text) => self.create_detached_text(text),
            NodeType::Document => self.create_detached_element("div".into()),
        };
        if deep {
            for child in self.children(node_id).to_vec() {
                let child_copy = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                    self.clone_node(child, true)
                });
                self.nodes[child_copy.0].parent = Some(copy);
                self.nodes[copy.0].children.push(child_copy);
            }
        }
        copy
    }

    pub(crate) fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(Error::ScriptRuntime(
                "removeChild target is not a child of this node".into(),
            ));
        }
        self.detach(child);
        Ok(())
    }

    pub(crate) fn detach(&mut self, node_id: NodeId) {
        if let Some(parent) = self.nodes[node_id.0].parent.take() {
            self.nodes[parent.0].children.retain(|id| *id != node_id);
        }
        if self
            .active_element
            .is_some_and(|active| active == node_id || self.is_descendant_of(active, node_id))
        {
            self.active_element = None;
        }
    }

    /// Pushes `node_id` (when it is an element) and every element below it,
    /// in document order.
    pub(crate) fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        let mut pending = vec![node_id];
        while let Some(current) = pending.pop() {
            if self.is_element(current) {
                out.push(current);
            }
            pending.extend(self.children(current).iter().rev());
        }
    }

    pub(crate) fn collect_elements_descendants_dfs(
        &self,
        node_id: NodeId,
        out: &mut Vec<NodeId>,
    ) {
        for child in self.children(node_id) {
            self.collect_elements_dfs(*child, out);
        }
    }

    pub(crate) fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements_dfs(self.root, &mut out);
        out
    }

    pub(crate) fn child_elements(&self, node_id: NodeId) -> Vec<NodeId> {
        self.children(node_id)
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
            .collect()
    }

    pub(crate) fn next_element_sibling(&self, node_id: NodeId) -> Option<NodeId> {
        let parent = self.parent(node_id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|id| *id == node_id)?;
        siblings[pos + 1..]
            .iter()
            .copied()
            .find(|id| self.is_element(*id))
    }

    pub(crate) fn previous_element_sibling(&self, node_id: NodeId) -> Option<NodeId> {
        let parent = self.parent(node_id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|id| *id == node_id)?;
        siblings[..pos]
            .iter()
            .rev()
            .copied()
            .find(|id| self.is_element(*id))
    }

    pub(crate) fn document_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .iter()
            .copied()
            .find(|id| self.is_element(*id))
    }

    fn html_child(&self, tag: &str) -> Option<NodeId> {
        let html = self.document_element()?;
        self.child_elements(html)
            .into_iter()
            .find(|child| self.has_tag(*child, tag))
    }

    pub(crate) fn head(&self) -> Option<NodeId> {
        self.html_child("head")
    }

    pub(crate) fn body(&self) -> Option<NodeId> {
        self.html_child("body")
    }

    pub(crate) fn document_title(&self) -> String {
        self.all_element_nodes()
            .into_iter()
            .find(|node| self.has_tag(*node, "title"))
            .map(|node| {
                self.text_content(node)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    pub(crate) fn set_document_title(&mut self, title: &str) -> Result<()> {
        let existing = self
            .all_element_nodes()
            .into_iter()
            .find(|node| self.has_tag(*node, "title"));
        let title_node = match existing {
            Some(node) => node,
            None => {
                let parent = self
                    .head()
                    .or_else(|| self.document_element())
                    .unwrap_or(self.root);
                self.create_element(parent, "title".to_string(), HashMap::new())
            }
        };
        self.set_text_content(title_node, title)
    }

    pub(crate) fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.all_element_nodes()
            .into_iter()
            .find(|node| self.attr(*node, "id").as_deref() == Some(id))
    }

    pub(crate) fn query_selector_all_from(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;
        let mut candidates = Vec::new();
        self.collect_elements_descendants_dfs(scope, &mut candidates);
        Ok(candidates
            .into_iter()
            .filter(|node| groups.iter().any(|chain| self.matches_selector_chain(*node, chain)))
            .collect())
    }

    pub(crate) fn query_selector_from(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> Result<Option<NodeId>> {
        Ok(self.query_selector_all_from(scope, selector)?.into_iter().next())
    }

    pub(crate) fn matches_selector(&self, node_id: NodeId, selector: &str) -> Result<bool> {
        let groups = parse_selector_groups(selector)?;
        Ok(groups
            .iter()
            .any(|chain| self.matches_selector_chain(node_id, chain)))
    }

    pub(crate) fn closest(&self, node_id: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let groups = parse_selector_groups(selector)?;
        let mut cursor = Some(node_id);
        while let Some(current) = cursor {
            if self.is_element(current)
                && groups
                    .iter()
                    .any(|chain| self.matches_selector_chain(current, chain))
            {
                return Ok(Some(current));
            }
            cursor = self.parent(current);
        }
        Ok(None)
    }

    pub(crate) fn class_names(&self, node_id: NodeId) -> Vec<String> {
        self.attr(node_id, "class")
            .map(|value| value.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub(crate) fn set_class_names(&mut self, node_id: NodeId, names: &[String]) -> Result<()> {
        self.set_attr(node_id, "class", &names.join(" "))
    }

    /// Current value of a form control. `select` reports its selected option.
    pub(crate) fn form_value(&self, node_id: NodeId) -> String {
        if self.has_tag(node_id, "select") {
            let mut options = Vec::new();
            self.collect_elements_descendants_dfs(node_id, &mut options);
            options.retain(|id| self.has_tag(*id, "option"));
            let selected = options
                .iter()
                .copied()
                .find(|id| self.element(*id).is_some_and(|e| e.attrs.contains_key("selected")))
                .or_else(|| options.first().copied());
            return selected
                .map(|option| {
                    self.attr(option, "value")
                        .unwrap_or_else(|| self.text_content(option).trim().to_string())
                })
                .unwrap_or_default();
        }
        self.element(node_id)
            .map(|element| element.value.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_form_value(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self.has_tag(node_id, "select") {
            let mut options = Vec::new();
            self.collect_elements_descendants_dfs(node_id, &mut options);
            options.retain(|id| self.has_tag(*id, "option"));
            for option in options {
                let option_value = self
                    .attr(option, "value")
                    .unwrap_or_else(|| self.text_content(option).trim().to_string());
                if let Some(element) = self.element_mut(option) {
                    if option_value == value {
                        element.attrs.insert("selected".into(), String::new());
                    } else {
                        element.attrs.remove("selected");
                    }
                }
            }
            return Ok(());
        }
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::ScriptRuntime("value target is not an element".into()))?;
        element.value = value.to_string();
        Ok(())
    }

    pub(crate) fn initialize_form_control_values(&mut self) {
        for node in self.all_element_nodes() {
            if self.has_tag(node, "textarea") {
                let text = self.text_content(node);
                if let Some(element) = self.element_mut(node) {
                    element.value = text;
                }
            }
        }
    }

    /// Unchecks the other radio buttons sharing `node_id`'s group name.
    pub(crate) fn uncheck_radio_group_peers(&mut self, node_id: NodeId) {
        let Some(name) = self.attr(node_id, "name") else {
            return;
        };
        for other in self.all_element_nodes() {
            if other == node_id || !self.has_tag(other, "input") {
                continue;
            }
            let is_peer = self.attr(other, "type").as_deref() == Some("radio")
                && self.attr(other, "name").as_deref() == Some(name.as_str());
            if is_peer {
                if let Some(element) = self.element_mut(other) {
                    element.checked = false;
                }
            }
        }
    }

    pub(crate) fn inner_html(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node_id) {
            self.write_outer_html(*child, &mut out);
        }
        out
    }

    pub(crate) fn outer_html(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        self.write_outer_html(node_id, &mut out);
        out
    }

    fn write_outer_html(&self, node_id: NodeId, out: &mut String) {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            self.write_node_html(node_id, out)
        })
    }

    fn write_node_html(&self, node_id: NodeId, out: &mut String) {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                for child in self.children(node_id) {
                    self.write_outer_html(*child, out);
                }
            }
            NodeType::Text(text) => {
                let raw_parent = self
                    .parent(node_id)
                    .is_some_and(|parent| {
                        self.has_tag(parent, "script") || self.has_tag(parent, "style")
                    });
                if raw_parent {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_html_text(text));
                }
            }
            NodeType::Element(element) => {
                out.push('<');
                out.push_str(&element.tag_name);
                let mut attrs = element.attrs.iter().collect::<Vec<_>>();
                attrs.sort_by(|a, b| a.0.cmp(b.0));
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&value.replace('&', "&amp;").replace('"', "&quot;"));
                    out.push('"');
                }
                out.push('>');
                if crate::html::is_void_tag(&element.tag_name) {
                    return;
                }
                for child in self.children(node_id) {
                    self.write_outer_html(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
            }
        }
    }
}

pub(crate) fn escape_html_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
    out
}

pub(crate) fn js_prop_to_css_name(prop: &str) -> String {
    let mut out = String::new();
    for ch in prop.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub(crate) fn css_name_to_js_prop(name: &str) -> String {
    let mut out = String::new();
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '-' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

pub(crate) fn dataset_key_to_attr_name(key: &str) -> String {
    format!("data-{}", js_prop_to_css_name(key))
}
