use super::*;
use crate::channel::{Signal, SignalSender};
use crate::context::SurfaceOptions;
use crate::css::Stylesheet;
use crate::html::{ScriptSource, parse_html};
use crate::script::*;
use crate::sequencer::InjectedTest;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reason reported when a test script throws instead of signalling.
pub(crate) const SCRIPT_ERROR_REASON: &str = "Double check the Javascript";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CapabilityKind {
    Select,
    SelectAll,
    Css,
    Event,
    Pass,
    Fail,
    Debug,
}

impl CapabilityKind {
    pub(crate) const ALL: [Self; 7] = [
        Self::Select,
        Self::SelectAll,
        Self::Css,
        Self::Event,
        Self::Pass,
        Self::Fail,
        Self::Debug,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Select => "$",
            Self::SelectAll => "$$",
            Self::Css => "css",
            Self::Event => "ev",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Debug => "debug",
        }
    }
}

/// Signal route for one injected test. The first `pass`/`fail` settles it;
/// later control signals from the same test are dropped.
#[derive(Debug)]
pub(crate) struct Dispatch {
    index: usize,
    sender: SignalSender,
    settled: Cell<bool>,
}

impl Dispatch {
    fn new(index: usize, sender: SignalSender) -> Self {
        Self {
            index,
            sender,
            settled: Cell::new(false),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.get()
    }

    fn control(&self, signal: Signal) {
        if self.settled.replace(true) {
            tracing::warn!(
                label = %self.sender.label(),
                test = self.index,
                ?signal,
                "dropping control signal from an already settled test"
            );
            return;
        }
        self.sender.send(signal);
    }

    fn debug(&self, message: String) {
        self.sender.send(Signal::Debug(message));
    }

    fn report_exception(&self, message: String) {
        self.debug(message);
        self.control(Signal::Fail(SCRIPT_ERROR_REASON.to_string()));
    }
}

/// One capability function handed to a test script, bound to its dispatch.
#[derive(Debug, Clone)]
pub(crate) struct Capability {
    kind: CapabilityKind,
    dispatch: Rc<Dispatch>,
}

impl Capability {
    pub(crate) fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub(crate) fn same_binding(&self, other: &Capability) -> bool {
        self.kind == other.kind && Rc::ptr_eq(&self.dispatch, &other.dispatch)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Listener {
    pub(crate) event_type: String,
    pub(crate) callback: Value,
    pub(crate) capture: bool,
    pub(crate) once: bool,
}

#[derive(Debug)]
struct Timer {
    id: u32,
    due_ms: f64,
    callback: Value,
    args: Vec<Value>,
    interval_ms: Option<f64>,
    dispatch: Option<Rc<Dispatch>>,
}

/// The loaded document and its script runtime. Lives on a single surface
/// thread and is never shared.
pub(crate) struct Page {
    pub(crate) dom: Dom,
    pub(crate) stylesheet: Stylesheet,
    pub(crate) globals: Scope,
    pub(crate) steps: u64,
    pub(crate) step_limit: u64,
    pub(crate) call_depth: usize,
    pub(crate) listeners: HashMap<EventTarget, Vec<Listener>>,
    pub(crate) handler_props: HashMap<(EventTarget, String), Value>,
    /// Script-assigned properties on nodes that have no DOM meaning.
    pub(crate) expandos: HashMap<(NodeId, String), Value>,
    pub(crate) options: SurfaceOptions,
    pub(crate) ready_state: &'static str,
    timers: Vec<Timer>,
    next_timer_id: u32,
    clock_ms: f64,
    epoch_ms: f64,
    rng_state: u64,
    sideband: SignalSender,
    current_dispatch: Option<Rc<Dispatch>>,
    abort: Arc<AtomicBool>,
    page_dir: PathBuf,
    scripts: Vec<ScriptSource>,
}

impl Page {
    /// Reads and parses the page at `path` and its linked stylesheets. Page
    /// scripts have not run yet.
    pub(crate) fn open(
        path: &Path,
        options: SurfaceOptions,
        sideband: SignalSender,
        abort: Arc<AtomicBool>,
    ) -> Result<Self> {
        let html = std::fs::read_to_string(path)
            .map_err(|err| Error::ResourceNotFound(format!("{}: {err}", path.display())))?;
        let parsed = parse_html(&html)?;
        let page_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as f64)
            .unwrap_or(0.0);

        let mut page = Self {
            dom: parsed.dom,
            stylesheet: Stylesheet::default(),
            globals: Scope::global(),
            steps: 0,
            step_limit: options.script_step_limit,
            call_depth: 0,
            listeners: HashMap::new(),
            handler_props: HashMap::new(),
            expandos: HashMap::new(),
            options,
            ready_state: "loading",
            timers: Vec::new(),
            next_timer_id: 1,
            clock_ms: 0.0,
            epoch_ms,
            rng_state: (epoch_ms as u64) ^ 0x9E37_79B9_7F4A_7C15,
            sideband,
            current_dispatch: None,
            abort,
            page_dir,
            scripts: parsed.scripts,
        };
        page.stylesheet = page.collect_stylesheets();
        Ok(page)
    }

    fn collect_stylesheets(&mut self) -> Stylesheet {
        let mut sheet = Stylesheet::default();
        for node in self.dom.all_element_nodes() {
            if self.dom.has_tag(node, "style") {
                sheet.append(Stylesheet::parse(&self.dom.text_content(node)));
                continue;
            }
            let is_stylesheet_link = self.dom.has_tag(node, "link")
                && self.dom.attr(node, "rel").is_some_and(|rel| {
                    rel.split_whitespace()
                        .any(|token| token.eq_ignore_ascii_case("stylesheet"))
                });
            if !is_stylesheet_link {
                continue;
            }
            let Some(href) = self.dom.attr(node, "href") else {
                continue;
            };
            match self.read_local(&href) {
                Some(css) => sheet.append(Stylesheet::parse(&css)),
                None => self.page_debug(format!("Failed to load stylesheet “{href}”")),
            }
        }
        tracing::debug!(rules = sheet.rule_count(), "collected author styles");
        sheet
    }

    /// Resolves a page-relative reference to a file inside the page directory.
    fn read_local(&self, reference: &str) -> Option<String> {
        let reference = reference.split(['?', '#']).next().unwrap_or_default();
        if reference.contains("://") || reference.starts_with("//") || reference.is_empty() {
            return None;
        }
        let relative = reference.trim_start_matches('/');
        std::fs::read_to_string(self.page_dir.join(relative)).ok()
    }

    /// Runs page scripts in document order and fires `DOMContentLoaded`.
    pub(crate) fn finish_parsing(&mut self) {
        let scripts = std::mem::take(&mut self.scripts);
        for script in scripts {
            let source = match script {
                ScriptSource::Inline(source) => source,
                ScriptSource::External(src) => match self.read_local(&src) {
                    Some(source) => source,
                    None => {
                        self.page_debug(format!("Failed to load script “{src}”"));
                        continue;
                    }
                },
            };
            self.steps = 0;
            let globals = self.globals.clone();
            if let Err(Abrupt::Throw(thrown)) = self.eval_source(&source, &globals) {
                self.page_debug(describe_thrown(&thrown));
            }
        }
        self.ready_state = "interactive";
        let root = self.dom.root;
        self.fire_simple_event(EventTarget::Node(root), "DOMContentLoaded", true);
    }

    /// Fires `load` on the window and lets timers due within the settle window run.
    pub(crate) fn finish_loading(&mut self) {
        self.ready_state = "complete";
        self.fire_simple_event(EventTarget::Window, "load", false);
        let settle_until = self.clock_ms + self.options.settle_delay_ms as f64;
        self.run_timers(|page, timer| timer.due_ms <= settle_until && !page.is_aborted());
        if self.clock_ms < settle_until {
            self.clock_ms = settle_until;
        }
    }

    fn fire_simple_event(&mut self, target: EventTarget, event_type: &str, bubbles: bool) {
        self.steps = 0;
        let event = Rc::new(RefCell::new(EventValue::new(event_type, bubbles, false)));
        event.borrow_mut().is_trusted = true;
        if let Err(Abrupt::Throw(thrown)) = self.dispatch_event(target, &event) {
            self.page_debug(describe_thrown(&thrown));
        }
    }

    /// Runs one injected test inside the capability scope and its error
    /// boundary, then lets its timers run until it settles.
    pub(crate) fn run_test(&mut self, test: &InjectedTest) {
        let dispatch = Rc::new(Dispatch::new(test.index, self.sideband.clone()));
        let scope = self.globals.strict_child();
        for kind in CapabilityKind::ALL {
            let capability = Capability {
                kind,
                dispatch: Rc::clone(&dispatch),
            };
            scope.declare(kind.name(), Value::Capability(capability), false);
        }

        tracing::debug!(label = %self.sideband.label(), test = test.index, "running injected test");
        self.steps = 0;
        self.current_dispatch = Some(Rc::clone(&dispatch));
        let result = self.eval_source(&test.source, &scope);
        self.current_dispatch = None;
        if let Err(Abrupt::Throw(thrown)) = result {
            dispatch.report_exception(describe_thrown(&thrown));
        }

        let limit = self.options.timer_step_limit;
        let mut ran = 0usize;
        self.run_timers(|page, _| {
            ran += 1;
            ran <= limit && !dispatch.is_settled() && !page.is_aborted()
        });
        if !dispatch.is_settled() {
            tracing::debug!(
                test = test.index,
                pending_timers = self.timers.len(),
                "injected test finished without signalling"
            );
        }
    }

    /// Runs timers in due order while `keep_going` accepts the next one.
    fn run_timers(&mut self, mut keep_going: impl FnMut(&Self, &Timer) -> bool) {
        loop {
            let Some(next) = self
                .timers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.due_ms.total_cmp(&b.due_ms).then(a.id.cmp(&b.id)))
                .map(|(idx, _)| idx)
            else {
                return;
            };
            let page: &Self = self;
            if !keep_going(page, &page.timers[next]) {
                return;
            }
            let mut timer = self.timers.remove(next);
            self.clock_ms = self.clock_ms.max(timer.due_ms);

            self.steps = 0;
            let previous = std::mem::replace(&mut self.current_dispatch, timer.dispatch.clone());
            let result = if timer.callback.is_callable() {
                self.call_function(&timer.callback, Value::Window, timer.args.clone())
                    .map(|_| ())
            } else {
                let source = timer.callback.to_js_string();
                let globals = self.globals.clone();
                self.eval_source(&source, &globals)
            };
            self.current_dispatch = previous;

            if let Err(Abrupt::Throw(thrown)) = result {
                let message = describe_thrown(&thrown);
                match &timer.dispatch {
                    Some(dispatch) => dispatch.report_exception(message),
                    None => self.page_debug(message),
                }
            }

            if let Some(interval) = timer.interval_ms {
                timer.due_ms = self.clock_ms + interval;
                self.timers.push(timer);
            }
        }
    }

    pub(crate) fn schedule_timer(
        &mut self,
        callback: Value,
        delay: f64,
        args: Vec<Value>,
        repeat: bool,
    ) -> Eval<u32> {
        let delay = if delay.is_finite() { delay.max(0.0) } else { 0.0 };
        let id = self.next_timer_id;
        self.next_timer_id = self.next_timer_id.wrapping_add(1).max(1);
        self.timers.push(Timer {
            id,
            due_ms: self.clock_ms + delay,
            callback,
            args,
            // Zero-delay intervals would never let the clock move.
            interval_ms: repeat.then_some(delay.max(1.0)),
            dispatch: self.current_dispatch.clone(),
        });
        Ok(id)
    }

    pub(crate) fn clear_timer(&mut self, id: f64) {
        self.timers.retain(|timer| f64::from(timer.id) != id);
    }

    pub(crate) fn now_ms(&self) -> f64 {
        (self.epoch_ms + self.clock_ms).floor()
    }

    pub(crate) fn next_random(&mut self) -> f64 {
        // xorshift64*
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        let bits = x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
        bits as f64 / (1u64 << 53) as f64
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Forwards a page-level diagnostic (script error, missing asset) on the
    /// debug sideband.
    pub(crate) fn page_debug(&self, message: String) {
        tracing::debug!(label = %self.sideband.label(), %message, "page diagnostic");
        self.sideband.send(Signal::Debug(message));
    }

    pub(crate) fn call_capability(
        &mut self,
        capability: &Capability,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let first = args.first().cloned().unwrap_or(Value::Undefined);
        let dispatch = &capability.dispatch;
        match capability.kind {
            CapabilityKind::Pass => {
                dispatch.control(Signal::Pass);
                Ok(Value::Undefined)
            }
            CapabilityKind::Fail => {
                let reason = match first {
                    Value::Undefined => String::new(),
                    other => other.to_js_string(),
                };
                dispatch.control(Signal::Fail(reason));
                Ok(Value::Undefined)
            }
            CapabilityKind::Debug => {
                let message = args
                    .iter()
                    .map(|value| self.console_format(value))
                    .collect::<Vec<_>>()
                    .join(" ");
                dispatch.debug(message);
                Ok(Value::Undefined)
            }
            CapabilityKind::Select | CapabilityKind::SelectAll => {
                let selector = first.to_js_string();
                let root = match args.get(1) {
                    None | Some(Value::Undefined | Value::Null) => self.dom.root,
                    Some(Value::Node(node)) => *node,
                    Some(_) => {
                        return throw(
                            ErrorKind::TypeError,
                            format!("{}: second argument must be an element", capability.name()),
                        );
                    }
                };
                if capability.kind == CapabilityKind::Select {
                    Ok(self
                        .query_one(root, &selector)?
                        .map(Value::Node)
                        .unwrap_or(Value::Null))
                } else {
                    let nodes = self.query_all(root, &selector)?;
                    Ok(Value::array(nodes.into_iter().map(Value::Node).collect()))
                }
            }
            CapabilityKind::Css => match first {
                Value::Node(node) if self.dom.is_element(node) => Ok(Value::ComputedStyle(node)),
                other => throw(
                    ErrorKind::TypeError,
                    format!("css: {} is not an element", other.to_js_string()),
                ),
            },
            CapabilityKind::Event => {
                let init = args.get(1).cloned().unwrap_or(Value::Undefined);
                self.new_event(&first.to_js_string(), &init, true)
            }
        }
    }
}
