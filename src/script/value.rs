use super::*;
use crate::js_regex::JsRegex;
use crate::page::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    SyntaxError,
}

impl ErrorKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::ReferenceError => "ReferenceError",
            Self::RangeError => "RangeError",
            Self::SyntaxError => "SyntaxError",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Error" => Self::Error,
            "TypeError" => Self::TypeError,
            "ReferenceError" => Self::ReferenceError,
            "RangeError" => Self::RangeError,
            "SyntaxError" => Self::SyntaxError,
            _ => return None,
        })
    }
}

/// Longest string, in UTF-8 bytes, that scripts may build.
pub(crate) const MAX_STRING_LENGTH: usize = 1 << 28;
/// Arrays are stored densely, so their length is capped well below 2^32 - 1.
pub(crate) const MAX_ARRAY_LENGTH: usize = 1 << 24;

pub(crate) fn check_string_length(len: usize) -> Eval<()> {
    if len > MAX_STRING_LENGTH {
        return throw(ErrorKind::RangeError, "Invalid string length");
    }
    Ok(())
}

/// Validates a requested array length before anything is allocated for it.
pub(crate) fn array_length(len: f64) -> Eval<usize> {
    if !(0.0..=f64::from(u32::MAX)).contains(&len) || len.fract() != 0.0 {
        return throw(ErrorKind::RangeError, "Invalid array length");
    }
    if len > MAX_ARRAY_LENGTH as f64 {
        return throw(
            ErrorKind::RangeError,
            format!("Array length {len} exceeds the supported maximum of {MAX_ARRAY_LENGTH}"),
        );
    }
    Ok(len as usize)
}

/// Global functions, constructors and namespaces provided by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Native {
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    SetTimeout,
    SetInterval,
    ClearTimeout,
    ClearInterval,
    Alert,
    Confirm,
    Prompt,
    GetComputedStyle,
    EncodeUriComponent,
    DecodeUriComponent,
    Math,
    Json,
    Console,
    Object,
    Array,
    Number,
    String,
    Boolean,
    Date,
    RegExp,
    Error(ErrorKind),
    Event,
}

impl Native {
    pub(crate) fn from_global(name: &str) -> Option<Self> {
        Some(match name {
            "parseInt" => Self::ParseInt,
            "parseFloat" => Self::ParseFloat,
            "isNaN" => Self::IsNaN,
            "isFinite" => Self::IsFinite,
            "setTimeout" => Self::SetTimeout,
            "setInterval" => Self::SetInterval,
            "clearTimeout" => Self::ClearTimeout,
            "clearInterval" => Self::ClearInterval,
            "alert" => Self::Alert,
            "confirm" => Self::Confirm,
            "prompt" => Self::Prompt,
            "getComputedStyle" => Self::GetComputedStyle,
            "encodeURIComponent" => Self::EncodeUriComponent,
            "decodeURIComponent" => Self::DecodeUriComponent,
            "Math" => Self::Math,
            "JSON" => Self::Json,
            "console" => Self::Console,
            "Object" => Self::Object,
            "Array" => Self::Array,
            "Number" => Self::Number,
            "String" => Self::String,
            "Boolean" => Self::Boolean,
            "Date" => Self::Date,
            "RegExp" => Self::RegExp,
            "Event" | "CustomEvent" | "KeyboardEvent" | "MouseEvent" | "InputEvent"
            | "FocusEvent" | "SubmitEvent" => Self::Event,
            other => Self::Error(ErrorKind::from_name(other)?),
        })
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::ParseInt => "parseInt",
            Self::ParseFloat => "parseFloat",
            Self::IsNaN => "isNaN",
            Self::IsFinite => "isFinite",
            Self::SetTimeout => "setTimeout",
            Self::SetInterval => "setInterval",
            Self::ClearTimeout => "clearTimeout",
            Self::ClearInterval => "clearInterval",
            Self::Alert => "alert",
            Self::Confirm => "confirm",
            Self::Prompt => "prompt",
            Self::GetComputedStyle => "getComputedStyle",
            Self::EncodeUriComponent => "encodeURIComponent",
            Self::DecodeUriComponent => "decodeURIComponent",
            Self::Math => "Math",
            Self::Json => "JSON",
            Self::Console => "console",
            Self::Object => "Object",
            Self::Array => "Array",
            Self::Number => "Number",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::RegExp => "RegExp",
            Self::Error(kind) => kind.name(),
            Self::Event => "Event",
        }
    }

    fn is_namespace(self) -> bool {
        matches!(self, Self::Math | Self::Json | Self::Console)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EventTarget {
    Node(NodeId),
    Window,
}

impl EventTarget {
    pub(crate) fn to_value(self) -> Value {
        match self {
            Self::Node(node) => Value::Node(node),
            Self::Window => Value::Window,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EventValue {
    pub(crate) event_type: String,
    pub(crate) target: Option<EventTarget>,
    pub(crate) current_target: Option<EventTarget>,
    pub(crate) bubbles: bool,
    pub(crate) cancelable: bool,
    pub(crate) default_prevented: bool,
    pub(crate) propagation_stopped: bool,
    pub(crate) immediate_propagation_stopped: bool,
    pub(crate) phase: u8,
    pub(crate) is_trusted: bool,
    pub(crate) extra: ObjectValue,
}

impl EventValue {
    pub(crate) fn new(event_type: impl Into<String>, bubbles: bool, cancelable: bool) -> Self {
        Self {
            event_type: event_type.into(),
            target: None,
            current_target: None,
            bubbles,
            cancelable,
            default_prevented: false,
            propagation_stopped: false,
            immediate_propagation_stopped: false,
            phase: 0,
            is_trusted: false,
            extra: ObjectValue::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ObjectClass {
    #[default]
    Plain,
    Error,
}

/// Ordered property bag backing plain objects and error instances.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectValue {
    pub(crate) class: ObjectClass,
    props: Vec<(String, Value)>,
}

impl ObjectValue {
    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub(crate) fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.props.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.props.push((key, value));
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        let before = self.props.len();
        self.props.retain(|(k, _)| k != key);
        before != self.props.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.props.iter().any(|(k, _)| k == key)
    }

    /// Keys in property order: integer-like keys ascending, then insertion order.
    pub(crate) fn keys(&self) -> Vec<String> {
        let mut indices = self
            .props
            .iter()
            .filter_map(|(k, _)| k.parse::<u32>().ok().filter(|n| n.to_string() == *k))
            .collect::<Vec<_>>();
        indices.sort_unstable();
        let mut out = indices.iter().map(u32::to_string).collect::<Vec<_>>();
        let named = self
            .props
            .iter()
            .filter(|(k, _)| !out.contains(k))
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        out.extend(named);
        out
    }

    pub(crate) fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).cloned().map(|value| (key, value)))
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct Closure {
    pub(crate) def: Rc<FunctionDef>,
    pub(crate) env: Scope,
    pub(crate) this: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct RegExpValue {
    pub(crate) regex: JsRegex,
    pub(crate) last_index: Cell<usize>,
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectValue>>),
    Function(Rc<Closure>),
    Native(Native),
    /// A host or built-in method read off its receiver, e.g. `el.remove`.
    Method(Rc<(Value, String)>),
    Node(NodeId),
    Window,
    InlineStyle(NodeId),
    ComputedStyle(NodeId),
    ClassList(NodeId),
    Dataset(NodeId),
    Event(Rc<RefCell<EventValue>>),
    RegExp(Rc<RegExpValue>),
    Date(f64),
    Capability(Capability),
}

impl Value {
    pub(crate) fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub(crate) fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub(crate) fn object(props: ObjectValue) -> Self {
        Self::Object(Rc::new(RefCell::new(props)))
    }

    pub(crate) fn method(this: Value, name: impl Into<String>) -> Self {
        Self::Method(Rc::new((this, name.into())))
    }

    pub(crate) fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut obj = ObjectValue {
            class: ObjectClass::Error,
            ..ObjectValue::default()
        };
        let message = message.into();
        obj.set("name", Value::string(kind.name()));
        obj.set("message", Value::string(message.clone()));
        obj.set(
            "stack",
            Value::string(format!("{}: {message}", kind.name())),
        );
        Self::object(obj)
    }

    pub(crate) fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub(crate) fn is_callable(&self) -> bool {
        match self {
            Self::Function(_) | Self::Method(_) | Self::Capability(_) => true,
            Self::Native(native) => !native.is_namespace(),
            _ => false,
        }
    }

    pub(crate) fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub(crate) fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            value if value.is_callable() => "function",
            _ => "object",
        }
    }

    pub(crate) fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Date(ms) => *ms,
            Self::Array(_) => string_to_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    pub(crate) fn to_int32(&self) -> i32 {
        to_int32(self.to_number())
    }

    /// Best-effort primitive string conversion; host objects get their
    /// `[object X]` tag.
    pub(crate) fn to_js_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            Self::Array(items) => {
                let mut out = String::new();
                join_array(items, &mut Vec::new(), &mut out);
                out
            }
            Self::Object(obj) => {
                let obj = obj.borrow();
                if obj.class == ObjectClass::Error {
                    let name = obj
                        .get("name")
                        .map(Value::to_js_string)
                        .unwrap_or_else(|| "Error".to_string());
                    let message = obj.get("message").map(Value::to_js_string).unwrap_or_default();
                    if message.is_empty() {
                        name
                    } else {
                        format!("{name}: {message}")
                    }
                } else {
                    "[object Object]".to_string()
                }
            }
            Self::Function(closure) => match &closure.def.name {
                Some(name) => format!("function {name}() {{ [code] }}"),
                None => "function () { [code] }".to_string(),
            },
            Self::Native(native) if native.is_namespace() => {
                format!("[object {}]", native.name())
            }
            Self::Native(native) => format!("function {}() {{ [native code] }}", native.name()),
            Self::Method(method) => format!("function {}() {{ [native code] }}", method.1),
            Self::Capability(cap) => format!("function {}() {{ [native code] }}", cap.name()),
            Self::Node(_) => "[object HTMLElement]".to_string(),
            Self::Window => "[object Window]".to_string(),
            Self::InlineStyle(_) | Self::ComputedStyle(_) => {
                "[object CSSStyleDeclaration]".to_string()
            }
            Self::ClassList(_) => "[object DOMTokenList]".to_string(),
            Self::Dataset(_) => "[object DOMStringMap]".to_string(),
            Self::Event(_) => "[object Event]".to_string(),
            Self::RegExp(re) => re.regex.to_string(),
            Self::Date(ms) => format_date_string(*ms),
        }
    }

    pub(crate) fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => {
                a.1 == b.1 && a.0.strict_equals(&b.0)
            }
            (Self::Native(a), Self::Native(b)) => a == b,
            (Self::Node(a), Self::Node(b))
            | (Self::InlineStyle(a), Self::InlineStyle(b))
            | (Self::ComputedStyle(a), Self::ComputedStyle(b))
            | (Self::ClassList(a), Self::ClassList(b))
            | (Self::Dataset(a), Self::Dataset(b)) => a == b,
            (Self::Window, Self::Window) => true,
            (Self::Event(a), Self::Event(b)) => Rc::ptr_eq(a, b),
            (Self::RegExp(a), Self::RegExp(b)) => Rc::ptr_eq(a, b),
            (Self::Capability(a), Self::Capability(b)) => a.same_binding(b),
            _ => false,
        }
    }

    pub(crate) fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Self::Number(_), Self::String(_))
            | (Self::String(_), Self::Number(_))
            | (Self::Bool(_), _)
            | (_, Self::Bool(_)) => self.to_number() == other.to_number(),
            (Self::String(_) | Self::Number(_), Self::Array(_) | Self::Object(_))
            | (Self::Array(_) | Self::Object(_), Self::String(_) | Self::Number(_)) => {
                self.to_js_string() == other.to_js_string()
            }
            _ => self.strict_equals(other),
        }
    }

    /// SameValueZero, used by `includes` and `indexOf`-style lookups.
    pub(crate) fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

pub(crate) fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = match trimmed.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&trimmed[2..], radix)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        other if other.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c)) => {
            other.parse::<f64>().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let n = n.trunc().rem_euclid(4_294_967_296.0);
    if n >= 2_147_483_648.0 {
        (n - 4_294_967_296.0) as i32
    } else {
        n as i32
    }
}

pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// Formats a number the way `String(n)` does.
// An array that is already being joined renders as "", as in browsers.
/// String form of `item` as an element of `container`, where a reference back
/// to `container` renders as the empty string.
pub(crate) fn element_to_string(container: &Rc<RefCell<Vec<Value>>>, item: &Value) -> String {
    match item {
        Value::Array(inner) => {
            let mut out = String::new();
            join_array(inner, &mut vec![Rc::as_ptr(container)], &mut out);
            out
        }
        other if other.is_nullish() => String::new(),
        other => other.to_js_string(),
    }
}

fn join_array(
    items: &Rc<RefCell<Vec<Value>>>,
    visiting: &mut Vec<*const RefCell<Vec<Value>>>,
    out: &mut String,
) {
    let ptr = Rc::as_ptr(items);
    if visiting.contains(&ptr) {
        return;
    }
    visiting.push(ptr);
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
        for (idx, item) in items.borrow().iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            match item {
                Value::Array(inner) => join_array(inner, visiting, out),
                other if other.is_nullish() => {}
                other => out.push_str(&other.to_js_string()),
            }
            if out.len() > MAX_STRING_LENGTH {
                break;
            }
        }
    });
    visiting.pop();
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let formatted = format!("{n:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => formatted,
        };
    }
    format!("{n}")
}

const MS_PER_DAY: f64 = 86_400_000.0;

/// Splits epoch milliseconds into UTC civil fields:
/// (year, month0, day, weekday, hours, minutes, seconds, millis).
pub(crate) fn civil_from_ms(ms: f64) -> (i64, u32, u32, u32, u32, u32, u32, u32) {
    let days = (ms / MS_PER_DAY).floor() as i64;
    let ms_of_day = ms.rem_euclid(MS_PER_DAY) as u64;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    let weekday = (days + 4).rem_euclid(7) as u32;
    (
        year,
        month - 1,
        day,
        weekday,
        (ms_of_day / 3_600_000) as u32,
        (ms_of_day / 60_000 % 60) as u32,
        (ms_of_day / 1000 % 60) as u32,
        (ms_of_day % 1000) as u32,
    )
}

pub(crate) fn ms_from_civil(
    year: i64,
    month0: i64,
    day: i64,
    h: f64,
    m: f64,
    s: f64,
    ms: f64,
) -> f64 {
    let year = year + month0.div_euclid(12);
    let month = month0.rem_euclid(12) + 1;
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;
    days as f64 * MS_PER_DAY + h * 3_600_000.0 + m * 60_000.0 + s * 1000.0 + ms
}

pub(crate) fn format_iso_date(ms: f64) -> String {
    let (year, month0, day, _, h, m, s, millis) = civil_from_ms(ms);
    format!(
        "{year:04}-{:02}-{day:02}T{h:02}:{m:02}:{s:02}.{millis:03}Z",
        month0 + 1
    )
}

fn format_date_string(ms: f64) -> String {
    if ms.is_nan() {
        return "Invalid Date".to_string();
    }
    const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let (year, month0, day, weekday, h, m, s, _) = civil_from_ms(ms);
    format!(
        "{} {} {day:02} {year:04} {h:02}:{m:02}:{s:02} GMT+0000 (Coordinated Universal Time)",
        DAYS[weekday as usize], MONTHS[month0 as usize]
    )
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug)]
struct ScopeData {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Scope>,
    function_scope: bool,
    strict: bool,
}

/// Lexical environment chain. Cloning shares the same frame.
#[derive(Debug, Clone)]
pub(crate) struct Scope(Rc<ScopeData>);

impl Scope {
    pub(crate) fn global() -> Self {
        Self(Rc::new(ScopeData {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            function_scope: true,
            strict: false,
        }))
    }

    pub(crate) fn child(&self, function_scope: bool) -> Self {
        Self(Rc::new(ScopeData {
            vars: RefCell::new(HashMap::new()),
            parent: Some(self.clone()),
            function_scope,
            strict: self.0.strict,
        }))
    }

    /// A function-level frame whose code, and every closure created in it,
    /// runs in strict mode.
    pub(crate) fn strict_child(&self) -> Self {
        Self(Rc::new(ScopeData {
            vars: RefCell::new(HashMap::new()),
            parent: Some(self.clone()),
            function_scope: true,
            strict: true,
        }))
    }

    pub(crate) fn is_strict(&self) -> bool {
        self.0.strict
    }

    pub(crate) fn is_global(&self) -> bool {
        self.0.parent.is_none()
    }

    pub(crate) fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.0
            .vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub(crate) fn has_own(&self, name: &str) -> bool {
        self.0.vars.borrow().contains_key(name)
    }

    /// Declares a `var` in the nearest function frame unless it already exists there.
    pub(crate) fn declare_var(&self, name: &str) {
        let mut scope = self.clone();
        while !scope.0.function_scope {
            let Some(parent) = scope.0.parent.clone() else {
                break;
            };
            scope = parent;
        }
        if !scope.has_own(name) {
            scope.declare(name, Value::Undefined, true);
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(binding) = current.0.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            scope = current.0.parent.as_ref();
        }
        None
    }

    /// Rebinds an existing name. `Ok(false)` when no frame declares it;
    /// `Err(())` when the binding is `const`.
    pub(crate) fn assign(&self, name: &str, value: Value) -> std::result::Result<bool, ()> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(binding) = current.0.vars.borrow_mut().get_mut(name) {
                if !binding.mutable {
                    return Err(());
                }
                binding.value = value;
                return Ok(true);
            }
            scope = current.0.parent.as_ref();
        }
        Ok(false)
    }

    pub(crate) fn root(&self) -> Scope {
        let mut scope = self.clone();
        while let Some(parent) = scope.0.parent.clone() {
            scope = parent;
        }
        scope
    }
}
