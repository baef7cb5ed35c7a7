use super::*;
use crate::js_regex::JsRegex;
use crate::page::Page;
use unicode_normalization::UnicodeNormalization;

const STRING_METHODS: &[&str] = &[
    "at", "charAt", "charCodeAt", "codePointAt", "concat", "endsWith", "includes", "indexOf",
    "lastIndexOf", "localeCompare", "match", "normalize", "padEnd", "padStart", "repeat",
    "replace", "replaceAll", "search", "slice", "split", "startsWith", "substr", "substring",
    "toLowerCase", "toUpperCase", "toLocaleLowerCase", "toLocaleUpperCase", "toString", "trim",
    "trimEnd", "trimStart", "valueOf",
];

const ARRAY_METHODS: &[&str] = &[
    "at", "concat", "every", "fill", "filter", "find", "findIndex", "findLast", "findLastIndex",
    "flat", "flatMap", "forEach", "includes", "indexOf", "join", "lastIndexOf", "map", "pop",
    "push", "reduce", "reduceRight", "reverse", "shift", "slice", "some", "sort", "splice",
    "toString", "unshift", "item",
];

const NUMBER_METHODS: &[&str] =
    &["toFixed", "toString", "toLocaleString", "valueOf", "toPrecision"];

const DATE_METHODS: &[&str] = &[
    "getTime", "valueOf", "getFullYear", "getMonth", "getDate", "getDay", "getHours",
    "getMinutes", "getSeconds", "getMilliseconds", "getUTCFullYear", "getUTCMonth", "getUTCDate",
    "getUTCDay", "getUTCHours", "getUTCMinutes", "getUTCSeconds", "getTimezoneOffset",
    "toISOString", "toJSON", "toString", "toDateString", "toLocaleDateString",
    "toLocaleTimeString", "toLocaleString",
];

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or(Value::Undefined)
}

/// Resolves a relative index argument (negative counts from the end) into `0..=len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn js_round(n: f64) -> f64 {
    if !n.is_finite() || n.fract() == 0.0 {
        return n;
    }
    (n + 0.5).floor()
}

fn format_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    if n.abs() >= 1e21 {
        return format_number(n);
    }
    let factor = 10f64.powi(digits as i32);
    let scaled = (n.abs() * factor).round() / factor;
    let signed = if n < 0.0 && scaled != 0.0 { -scaled } else { scaled };
    format!("{signed:.digits$}")
}

fn format_grouped(n: f64) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    let rounded = (n.abs() * 1000.0).round() / 1000.0;
    let text = format_number(rounded);
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text, None),
    };
    let mut grouped = String::new();
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(&frac);
    }
    if n < 0.0 && rounded != 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn parse_int(input: &str, radix: Option<u32>) -> f64 {
    let mut s = input.trim_start();
    let negative = s.starts_with('-');
    if s.starts_with('-') || s.starts_with('+') {
        s = &s[1..];
    }
    let mut radix = radix.unwrap_or(0);
    if (radix == 0 || radix == 16) && (s.starts_with("0x") || s.starts_with("0X")) {
        radix = 16;
        s = &s[2..];
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits = s
        .chars()
        .take_while(|c| c.is_digit(radix))
        .collect::<String>();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits.chars().fold(0f64, |acc, c| {
        acc * f64::from(radix) + f64::from(c.to_digit(radix).unwrap_or(0))
    });
    if negative { -value } else { value }
}

fn parse_float(input: &str) -> f64 {
    let s = input.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if s.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let bytes = s.as_bytes();
    let mut end = 0usize;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        match bytes[end] {
            b'+' | b'-' if end == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[end - 1], b'e' | b'E') => {}
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }
    let mut candidate = &s[..end];
    while !candidate.is_empty() {
        if let Ok(value) = candidate.parse::<f64>() {
            return value;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    f64::NAN
}

fn encode_uri_component(input: &str) -> String {
    let mut out = String::new();
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_uri_component(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn regex_error(err: crate::js_regex::RegexError) -> Abrupt {
    Abrupt::Throw(Value::error(ErrorKind::SyntaxError, err.to_string()))
}

fn json_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => {
            let mut obj = ObjectValue::default();
            for (key, value) in map {
                obj.set(key, json_to_value(value));
            }
            Value::object(obj)
        }
    }
}

fn parse_date_string(input: &str) -> f64 {
    let input = input.trim();
    let (date_part, time_part) = match input.split_once(['T', ' ']) {
        Some((d, t)) => (d, Some(t.trim_end_matches('Z'))),
        None => (input, None),
    };
    let fields = date_part
        .split('-')
        .map(|p| p.parse::<i64>().ok())
        .collect::<Option<Vec<_>>>();
    let Some(fields) = fields else {
        return f64::NAN;
    };
    let (year, month, day) = match fields.as_slice() {
        [y] => (*y, 1, 1),
        [y, m] => (*y, *m, 1),
        [y, m, d] => (*y, *m, *d),
        _ => return f64::NAN,
    };
    let mut hms = [0f64; 3];
    if let Some(time) = time_part {
        for (slot, part) in hms.iter_mut().zip(time.split(':')) {
            match part.parse::<f64>() {
                Ok(v) => *slot = v,
                Err(_) => return f64::NAN,
            }
        }
    }
    let seconds = hms[2].trunc();
    let millis = ((hms[2] - seconds) * 1000.0).round();
    ms_from_civil(year, month - 1, day, hms[0], hms[1], seconds, millis)
}

impl Page {
    pub(crate) fn new_regexp(&mut self, pattern: &str, flags: &str) -> Eval<Value> {
        match JsRegex::new(pattern, flags) {
            Ok(regex) => Ok(Value::RegExp(Rc::new(RegExpValue {
                regex,
                last_index: Cell::new(0),
            }))),
            Err(err) => throw(
                ErrorKind::SyntaxError,
                format!("Invalid regular expression: /{pattern}/: {err}"),
            ),
        }
    }

    pub(crate) fn get_property(&mut self, object: &Value, key: &str) -> Eval<Value> {
        match object {
            Value::Undefined | Value::Null => throw(
                ErrorKind::TypeError,
                format!(
                    "Cannot read properties of {} (reading '{key}')",
                    object.to_js_string()
                ),
            ),
            Value::String(s) => Ok(match key {
                "length" => Value::Number(s.chars().count() as f64),
                _ if STRING_METHODS.contains(&key) => Value::method(object.clone(), key),
                _ => match key.parse::<usize>() {
                    Ok(idx) => s
                        .chars()
                        .nth(idx)
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or(Value::Undefined),
                    Err(_) => Value::Undefined,
                },
            }),
            Value::Number(_) if NUMBER_METHODS.contains(&key) => {
                Ok(Value::method(object.clone(), key))
            }
            Value::Bool(_) if key == "toString" || key == "valueOf" => {
                Ok(Value::method(object.clone(), key))
            }
            Value::Number(_) | Value::Bool(_) => Ok(Value::Undefined),
            Value::Array(items) => Ok(match key {
                "length" => Value::Number(items.borrow().len() as f64),
                _ if ARRAY_METHODS.contains(&key) => Value::method(object.clone(), key),
                _ => match key.parse::<usize>() {
                    Ok(idx) => items.borrow().get(idx).cloned().unwrap_or(Value::Undefined),
                    Err(_) => Value::Undefined,
                },
            }),
            Value::Object(obj) => {
                if let Some(value) = obj.borrow().get(key) {
                    return Ok(value.clone());
                }
                Ok(match key {
                    "hasOwnProperty" | "toString" | "valueOf" => Value::method(object.clone(), key),
                    _ => Value::Undefined,
                })
            }
            Value::Function(closure) => Ok(match key {
                "name" => Value::string(closure.def.name.clone().unwrap_or_default()),
                "length" => Value::Number(closure.def.params.len() as f64),
                "call" | "apply" | "bind" | "toString" => Value::method(object.clone(), key),
                _ => Value::Undefined,
            }),
            Value::Native(native) => Ok(self.native_static(*native, object, key)),
            Value::Method(method) => Ok(match key {
                "name" => Value::string(method.1.clone()),
                "call" | "apply" | "bind" => Value::method(object.clone(), key),
                _ => Value::Undefined,
            }),
            Value::Capability(capability) => Ok(match key {
                "name" => Value::string(capability.name()),
                _ => Value::Undefined,
            }),
            Value::RegExp(re) => Ok(match key {
                "source" => Value::string(re.regex.source()),
                "flags" => Value::string(re.regex.flags()),
                "global" => Value::Bool(re.regex.is_global()),
                "ignoreCase" => Value::Bool(re.regex.flags().contains('i')),
                "multiline" => Value::Bool(re.regex.flags().contains('m')),
                "lastIndex" => Value::Number(re.last_index.get() as f64),
                "test" | "exec" | "toString" => Value::method(object.clone(), key),
                _ => Value::Undefined,
            }),
            Value::Date(_) if DATE_METHODS.contains(&key) => Ok(Value::method(object.clone(), key)),
            Value::Date(_) => Ok(Value::Undefined),
            Value::Node(_)
            | Value::Window
            | Value::InlineStyle(_)
            | Value::ComputedStyle(_)
            | Value::ClassList(_)
            | Value::Dataset(_)
            | Value::Event(_) => self.host_get(object, key),
        }
    }

    pub(crate) fn set_property(&mut self, object: &Value, key: &str, value: Value) -> Eval<()> {
        match object {
            Value::Undefined | Value::Null => throw(
                ErrorKind::TypeError,
                format!(
                    "Cannot set properties of {} (setting '{key}')",
                    object.to_js_string()
                ),
            ),
            Value::Object(obj) => {
                obj.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    items.resize(array_length(len)?, Value::Undefined);
                } else if let Ok(idx) = key.parse::<usize>() {
                    if idx >= items.len() {
                        items.resize(array_length(idx as f64 + 1.0)?, Value::Undefined);
                    }
                    items[idx] = value;
                }
                Ok(())
            }
            Value::RegExp(re) if key == "lastIndex" => {
                re.last_index.set(value.to_number().max(0.0) as usize);
                Ok(())
            }
            Value::Node(_)
            | Value::Window
            | Value::InlineStyle(_)
            | Value::ComputedStyle(_)
            | Value::ClassList(_)
            | Value::Dataset(_)
            | Value::Event(_) => self.host_set(object, key, value),
            _ => Ok(()),
        }
    }

    /// Dispatches a method read off `receiver` by name.
    pub(crate) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        match receiver {
            Value::String(s) => self.string_method(s, name, args),
            Value::Number(n) => self.number_method(*n, name, &args),
            Value::Bool(b) => Ok(match name {
                "valueOf" => Value::Bool(*b),
                _ => Value::string(b.to_string()),
            }),
            Value::Array(items) => self.array_method(items, name, args),
            Value::Object(obj) => Ok(match name {
                "hasOwnProperty" => {
                    let key = self.property_key(&arg(&args, 0));
                    Value::Bool(obj.borrow().contains(&key))
                }
                "valueOf" => receiver.clone(),
                _ => Value::String(receiver.to_js_string()),
            }),
            Value::Function(_) | Value::Method(_) | Value::Native(_) | Value::Capability(_)
                if matches!(name, "call" | "apply" | "bind") =>
            {
                self.function_method(receiver, name, args)
            }
            Value::Function(_) => Ok(Value::String(receiver.to_js_string())),
            Value::Native(native) => self.native_method(*native, name, args),
            Value::RegExp(re) => self.regexp_method(re, name, args),
            Value::Date(ms) => Ok(self.date_method(*ms, name)),
            Value::Node(_)
            | Value::Window
            | Value::InlineStyle(_)
            | Value::ComputedStyle(_)
            | Value::ClassList(_)
            | Value::Dataset(_)
            | Value::Event(_) => self.host_call(receiver, name, args),
            other => throw(
                ErrorKind::TypeError,
                format!("{}.{name} is not a function", other.to_js_string()),
            ),
        }
    }

    fn function_method(&mut self, func: &Value, name: &str, args: Vec<Value>) -> Eval<Value> {
        let this = arg(&args, 0);
        match name {
            "call" => self.call_function(func, this, args.into_iter().skip(1).collect()),
            "apply" => {
                let list = match arg(&args, 1) {
                    Value::Undefined | Value::Null => Vec::new(),
                    other => self.iterate(&other)?,
                };
                self.call_function(func, this, list)
            }
            _ => match func {
                Value::Function(closure) => Ok(Value::Function(Rc::new(Closure {
                    def: Rc::clone(&closure.def),
                    env: closure.env.clone(),
                    this: Some(this),
                }))),
                other => Ok(other.clone()),
            },
        }
    }

    fn native_static(&mut self, native: Native, object: &Value, key: &str) -> Value {
        let number = |n: f64| Value::Number(n);
        match (native, key) {
            (_, "name") => Value::string(native.name()),
            (Native::Math, "PI") => number(std::f64::consts::PI),
            (Native::Math, "E") => number(std::f64::consts::E),
            (Native::Math, "LN2") => number(std::f64::consts::LN_2),
            (Native::Math, "LN10") => number(std::f64::consts::LN_10),
            (Native::Math, "SQRT2") => number(std::f64::consts::SQRT_2),
            (
                Native::Math,
                "abs" | "floor" | "ceil" | "round" | "trunc" | "sign" | "sqrt" | "cbrt" | "pow"
                | "min" | "max" | "random" | "sin" | "cos" | "tan" | "atan" | "atan2" | "log"
                | "log10" | "log2" | "exp" | "hypot",
            ) => Value::method(object.clone(), key),
            (Native::Json, "stringify" | "parse") => Value::method(object.clone(), key),
            (
                Native::Console,
                "log" | "info" | "warn" | "error" | "debug" | "table" | "trace" | "clear" | "dir",
            ) => Value::method(object.clone(), key),
            (
                Native::Object,
                "keys" | "values" | "entries" | "assign" | "freeze" | "fromEntries" | "create",
            ) => Value::method(object.clone(), key),
            (Native::Array, "isArray" | "from" | "of") => Value::method(object.clone(), key),
            (Native::Number, "MAX_SAFE_INTEGER") => number(9_007_199_254_740_991.0),
            (Native::Number, "MIN_SAFE_INTEGER") => number(-9_007_199_254_740_991.0),
            (Native::Number, "EPSILON") => number(f64::EPSILON),
            (Native::Number, "MAX_VALUE") => number(f64::MAX),
            (Native::Number, "MIN_VALUE") => number(5e-324),
            (Native::Number, "POSITIVE_INFINITY") => number(f64::INFINITY),
            (Native::Number, "NEGATIVE_INFINITY") => number(f64::NEG_INFINITY),
            (Native::Number, "NaN") => number(f64::NAN),
            (Native::Number, "isInteger" | "isFinite" | "isNaN" | "parseFloat" | "parseInt") => {
                Value::method(object.clone(), key)
            }
            (Native::String, "fromCharCode") => Value::method(object.clone(), key),
            (Native::Date, "now" | "parse") => Value::method(object.clone(), key),
            _ => Value::Undefined,
        }
    }

    pub(crate) fn call_native(&mut self, native: Native, args: Vec<Value>) -> Eval<Value> {
        let first = arg(&args, 0);
        match native {
            Native::ParseInt => {
                let radix = match arg(&args, 1) {
                    Value::Undefined => None,
                    other => match other.to_int32() {
                        0 => None,
                        r => Some(r as u32),
                    },
                };
                Ok(Value::Number(parse_int(&first.to_js_string(), radix)))
            }
            Native::ParseFloat => Ok(Value::Number(parse_float(&first.to_js_string()))),
            Native::IsNaN => Ok(Value::Bool(first.to_number().is_nan())),
            Native::IsFinite => Ok(Value::Bool(first.to_number().is_finite())),
            Native::SetTimeout | Native::SetInterval => {
                let delay = arg(&args, 1).to_number();
                let extra = args.iter().skip(2).cloned().collect();
                let id = self.schedule_timer(first, delay, extra, native == Native::SetInterval)?;
                Ok(Value::Number(f64::from(id)))
            }
            Native::ClearTimeout | Native::ClearInterval => {
                self.clear_timer(first.to_number());
                Ok(Value::Undefined)
            }
            Native::Alert => {
                tracing::trace!(
                    target: "page_functionality::console",
                    text = %first.to_js_string(),
                    "alert"
                );
                Ok(Value::Undefined)
            }
            Native::Confirm => Ok(Value::Bool(false)),
            Native::Prompt => Ok(Value::Null),
            Native::GetComputedStyle => match first {
                Value::Node(node) if self.dom.is_element(node) => Ok(Value::ComputedStyle(node)),
                _ => throw(
                    ErrorKind::TypeError,
                    "Failed to execute 'getComputedStyle' on 'Window': parameter 1 is not of \
                     type 'Element'.",
                ),
            },
            Native::EncodeUriComponent => {
                Ok(Value::String(encode_uri_component(&first.to_js_string())))
            }
            Native::DecodeUriComponent => match decode_uri_component(&first.to_js_string()) {
                Some(decoded) => Ok(Value::String(decoded)),
                None => throw(ErrorKind::Error, "URI malformed"),
            },
            Native::Number => Ok(Value::Number(match first {
                Value::Undefined if args.is_empty() => 0.0,
                other => other.to_number(),
            })),
            Native::String => Ok(Value::String(match first {
                Value::Undefined if args.is_empty() => String::new(),
                other => other.to_js_string(),
            })),
            Native::Boolean => Ok(Value::Bool(first.truthy())),
            Native::Array | Native::Object | Native::RegExp | Native::Error(_) | Native::Event => {
                self.construct_native(native, args)
            }
            Native::Date => Ok(Value::String(Value::Date(self.now_ms()).to_js_string())),
            Native::Math | Native::Json | Native::Console => throw(
                ErrorKind::TypeError,
                format!("{} is not a function", native.name()),
            ),
        }
    }

    pub(crate) fn construct_native(&mut self, native: Native, args: Vec<Value>) -> Eval<Value> {
        let first = arg(&args, 0);
        match native {
            Native::Error(kind) => {
                let message = match first {
                    Value::Undefined => String::new(),
                    other => other.to_js_string(),
                };
                Ok(Value::error(kind, message))
            }
            Native::Array => match (args.len(), &first) {
                (1, Value::Number(n)) => {
                    Ok(Value::array(vec![Value::Undefined; array_length(*n)?]))
                }
                _ => Ok(Value::array(args)),
            },
            Native::Object => Ok(match first {
                Value::Undefined | Value::Null => Value::object(ObjectValue::default()),
                other => other,
            }),
            Native::Date => {
                let ms = match args.as_slice() {
                    [] => self.now_ms(),
                    [Value::String(s)] => parse_date_string(s),
                    [single] => single.to_number(),
                    [year, month, rest @ ..] => {
                        let field = |idx: usize, default: f64| {
                            rest.get(idx).map(Value::to_number).unwrap_or(default)
                        };
                        ms_from_civil(
                            year.to_number() as i64,
                            month.to_number() as i64,
                            field(0, 1.0) as i64,
                            field(1, 0.0),
                            field(2, 0.0),
                            field(3, 0.0),
                            field(4, 0.0),
                        )
                    }
                };
                Ok(Value::Date(ms))
            }
            Native::RegExp => {
                let (pattern, default_flags) = match &first {
                    Value::RegExp(re) => {
                        (re.regex.source().to_string(), re.regex.flags().to_string())
                    }
                    other => (other.to_js_string(), String::new()),
                };
                let flags = match arg(&args, 1) {
                    Value::Undefined => default_flags,
                    other => other.to_js_string(),
                };
                self.new_regexp(&pattern, &flags)
            }
            Native::Event => {
                if matches!(first, Value::Undefined) {
                    return throw(
                        ErrorKind::TypeError,
                        "Failed to construct 'Event': 1 argument required, but only 0 present.",
                    );
                }
                self.new_event(&first.to_js_string(), &arg(&args, 1), false)
            }
            Native::Number | Native::String | Native::Boolean => self.call_native(native, args),
            _ => throw(
                ErrorKind::TypeError,
                format!("{} is not a constructor", native.name()),
            ),
        }
    }

    fn native_method(&mut self, native: Native, name: &str, args: Vec<Value>) -> Eval<Value> {
        let first = arg(&args, 0);
        match native {
            Native::Math => Ok(Value::Number(self.math_method(name, &args))),
            Native::Json => match name {
                "stringify" => {
                    let indent = match arg(&args, 2) {
                        Value::Number(n) => " ".repeat(n.clamp(0.0, 10.0) as usize),
                        Value::String(s) => s.chars().take(10).collect(),
                        _ => String::new(),
                    };
                    let mut out = String::new();
                    let mut writer = JsonWriter::new(&indent, false);
                    if self.json_stringify(&first, &mut writer, "", &mut out)? {
                        Ok(Value::String(out))
                    } else {
                        Ok(Value::Undefined)
                    }
                }
                _ => match serde_json::from_str::<serde_json::Value>(&first.to_js_string()) {
                    Ok(json) => Ok(json_to_value(json)),
                    Err(err) => throw(ErrorKind::SyntaxError, format!("JSON.parse: {err}")),
                },
            },
            Native::Console => {
                let message = args
                    .iter()
                    .map(|value| self.console_format(value))
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::trace!(target: "page_functionality::console", method = name, %message);
                Ok(Value::Undefined)
            }
            Native::Object => self.object_static(name, args),
            Native::Array => match name {
                "isArray" => Ok(Value::Bool(matches!(first, Value::Array(_)))),
                "of" => Ok(Value::array(args)),
                _ => {
                    let items = match &first {
                        Value::Object(obj) => {
                            let len =
                                obj.borrow().get("length").map(Value::to_number).unwrap_or(0.0);
                            (0..array_length(len.max(0.0).trunc())?)
                                .map(|idx| {
                                    obj.borrow()
                                        .get(&idx.to_string())
                                        .cloned()
                                        .unwrap_or(Value::Undefined)
                                })
                                .collect()
                        }
                        Value::Undefined | Value::Null => {
                            return throw(
                                ErrorKind::TypeError,
                                format!("{} is not iterable", first.to_js_string()),
                            );
                        }
                        other => self.iterate(other)?,
                    };
                    let mapper = arg(&args, 1);
                    if mapper.is_callable() {
                        let mut out = Vec::with_capacity(items.len());
                        for (idx, item) in items.into_iter().enumerate() {
                            out.push(self.call_function(
                                &mapper,
                                Value::Undefined,
                                vec![item, Value::Number(idx as f64)],
                            )?);
                        }
                        Ok(Value::array(out))
                    } else {
                        Ok(Value::array(items))
                    }
                }
            },
            Native::Number => Ok(match name {
                "isInteger" => Value::Bool(
                    matches!(first, Value::Number(n) if n.is_finite() && n.fract() == 0.0),
                ),
                "isFinite" => Value::Bool(matches!(first, Value::Number(n) if n.is_finite())),
                "isNaN" => Value::Bool(matches!(first, Value::Number(n) if n.is_nan())),
                "parseFloat" => Value::Number(parse_float(&first.to_js_string())),
                _ => return self.call_native(Native::ParseInt, args),
            }),
            Native::String => Ok(Value::String(
                args.iter()
                    .filter_map(|code| char::from_u32(u32::from(code.to_number() as u16)))
                    .collect(),
            )),
            Native::Date => Ok(Value::Number(match name {
                "now" => self.now_ms(),
                _ => parse_date_string(&first.to_js_string()),
            })),
            other => throw(
                ErrorKind::TypeError,
                format!("{}.{name} is not a function", other.name()),
            ),
        }
    }

    fn math_method(&mut self, name: &str, args: &[Value]) -> f64 {
        let x = arg(args, 0).to_number();
        let y = arg(args, 1).to_number();
        match name {
            "abs" => x.abs(),
            "floor" => x.floor(),
            "ceil" => x.ceil(),
            "round" => js_round(x),
            "trunc" => x.trunc(),
            "sign" if x.is_nan() || x == 0.0 => x,
            "sign" => x.signum(),
            "sqrt" => x.sqrt(),
            "cbrt" => x.cbrt(),
            "pow" => x.powf(y),
            "sin" => x.sin(),
            "cos" => x.cos(),
            "tan" => x.tan(),
            "atan" => x.atan(),
            "atan2" => x.atan2(y),
            "log" => x.ln(),
            "log10" => x.log10(),
            "log2" => x.log2(),
            "exp" => x.exp(),
            "hypot" => args
                .iter()
                .map(|v| v.to_number().powi(2))
                .sum::<f64>()
                .sqrt(),
            "min" | "max" => {
                let want_min = name == "min";
                let mut acc = if want_min { f64::INFINITY } else { f64::NEG_INFINITY };
                for value in args {
                    let n = value.to_number();
                    if n.is_nan() {
                        return f64::NAN;
                    }
                    acc = if want_min { acc.min(n) } else { acc.max(n) };
                }
                acc
            }
            _ => self.next_random(),
        }
    }

    fn object_static(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        let first = arg(&args, 0);
        match name {
            "keys" | "values" | "entries" => {
                if first.is_nullish() {
                    return throw(
                        ErrorKind::TypeError,
                        "Cannot convert undefined or null to object",
                    );
                }
                let mut out = Vec::new();
                for key in self.own_keys(&first) {
                    let entry = match name {
                        "keys" => Value::String(key),
                        "values" => self.get_property(&first, &key)?,
                        _ => {
                            let value = self.get_property(&first, &key)?;
                            Value::array(vec![Value::String(key), value])
                        }
                    };
                    out.push(entry);
                }
                Ok(Value::array(out))
            }
            "assign" => {
                for source in args.iter().skip(1) {
                    for key in self.own_keys(source) {
                        let value = self.get_property(source, &key)?;
                        self.set_property(&first, &key, value)?;
                    }
                }
                Ok(first)
            }
            "fromEntries" => {
                let mut obj = ObjectValue::default();
                for entry in self.iterate(&first)? {
                    let key = self.get_property(&entry, "0")?;
                    let value = self.get_property(&entry, "1")?;
                    obj.set(self.property_key(&key), value);
                }
                Ok(Value::object(obj))
            }
            "create" => Ok(Value::object(ObjectValue::default())),
            _ => Ok(first),
        }
    }

    fn string_method(&mut self, s: &str, name: &str, args: Vec<Value>) -> Eval<Value> {
        let chars = s.chars().collect::<Vec<_>>();
        let len = chars.len();
        let first = arg(&args, 0);
        let second = arg(&args, 1);
        let substring = |from: usize, to: usize| -> String {
            chars[from.min(len)..to.min(len).max(from.min(len))].iter().collect()
        };
        let find_from = |needle: &str, from: usize| -> Option<usize> {
            let byte_from = s.char_indices().nth(from).map(|(b, _)| b).unwrap_or(s.len());
            s[byte_from..]
                .find(needle)
                .map(|b| s[..byte_from + b].chars().count())
        };
        Ok(match name {
            "at" => {
                let idx = first.to_number().trunc();
                let idx = if idx < 0.0 { len as f64 + idx } else { idx };
                if idx < 0.0 {
                    Value::Undefined
                } else {
                    chars
                        .get(idx as usize)
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or(Value::Undefined)
                }
            }
            "charAt" => Value::String(
                chars
                    .get(first.to_number().max(0.0) as usize)
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            ),
            "charCodeAt" | "codePointAt" => {
                let idx = if matches!(first, Value::Undefined) { 0.0 } else { first.to_number() };
                match chars.get(idx as usize).filter(|_| idx >= 0.0) {
                    Some(c) if name == "codePointAt" => Value::Number(f64::from(u32::from(*c))),
                    Some(c) => {
                        let mut buf = [0u16; 2];
                        Value::Number(f64::from(c.encode_utf16(&mut buf)[0]))
                    }
                    None if name == "codePointAt" => Value::Undefined,
                    None => Value::Number(f64::NAN),
                }
            }
            "concat" => {
                let mut out = s.to_string();
                for value in &args {
                    let part = value.to_js_string();
                    check_string_length(out.len().saturating_add(part.len()))?;
                    out.push_str(&part);
                }
                Value::String(out)
            }
            "includes" => {
                let from = relative_index(&second, len, 0);
                Value::Bool(find_from(&first.to_js_string(), from).is_some())
            }
            "indexOf" => {
                let from = relative_index(&second, len, 0);
                Value::Number(
                    find_from(&first.to_js_string(), from)
                        .map(|i| i as f64)
                        .unwrap_or(-1.0),
                )
            }
            "lastIndexOf" => Value::Number(
                s.rfind(&first.to_js_string())
                    .map(|b| s[..b].chars().count() as f64)
                    .unwrap_or(-1.0),
            ),
            "startsWith" => {
                let from = relative_index(&second, len, 0);
                Value::Bool(substring(from, len).starts_with(&first.to_js_string()))
            }
            "endsWith" => {
                let to = relative_index(&second, len, len);
                Value::Bool(substring(0, to).ends_with(&first.to_js_string()))
            }
            "slice" => {
                let from = relative_index(&first, len, 0);
                let to = relative_index(&second, len, len);
                Value::String(substring(from, to))
            }
            "substring" => {
                let clamp = |v: &Value, default: usize| {
                    if matches!(v, Value::Undefined) {
                        default
                    } else {
                        let n = v.to_number();
                        if n.is_nan() { 0 } else { n.clamp(0.0, len as f64) as usize }
                    }
                };
                let (a, b) = (clamp(&first, 0), clamp(&second, len));
                Value::String(substring(a.min(b), a.max(b)))
            }
            "substr" => {
                let from = relative_index(&first, len, 0);
                let count = if matches!(second, Value::Undefined) {
                    len
                } else {
                    second.to_number().max(0.0) as usize
                };
                Value::String(substring(from, from.saturating_add(count)))
            }
            "toUpperCase" | "toLocaleUpperCase" => Value::String(s.to_uppercase()),
            "toLowerCase" | "toLocaleLowerCase" => Value::String(s.to_lowercase()),
            "trim" => Value::string(s.trim()),
            "trimStart" => Value::string(s.trim_start()),
            "trimEnd" => Value::string(s.trim_end()),
            "repeat" => {
                let count = first.to_number();
                if count < 0.0 || count.is_infinite() {
                    return throw(
                        ErrorKind::RangeError,
                        format!("Invalid count value: {}", format_number(count)),
                    );
                }
                let count = count as usize;
                check_string_length(s.len().saturating_mul(count))?;
                Value::String(s.repeat(count))
            }
            "padStart" | "padEnd" => {
                let target = first.to_number().max(0.0) as usize;
                let filler = match second {
                    Value::Undefined => " ".to_string(),
                    other => other.to_js_string(),
                };
                if target <= len || filler.is_empty() {
                    Value::string(s)
                } else {
                    let needed = target - len;
                    let filler_chars = filler.chars().count();
                    let pad_bytes = (needed / filler_chars)
                        .saturating_mul(filler.len())
                        .saturating_add(filler.len());
                    check_string_length(s.len().saturating_add(pad_bytes))?;
                    let pad = filler.chars().cycle().take(needed).collect::<String>();
                    if name == "padStart" {
                        Value::String(format!("{pad}{s}"))
                    } else {
                        Value::String(format!("{s}{pad}"))
                    }
                }
            }
            "localeCompare" => {
                let other = first.to_js_string();
                let ord = s
                    .to_lowercase()
                    .cmp(&other.to_lowercase())
                    .then_with(|| s.cmp(other.as_str()));
                Value::Number(match ord {
                    std::cmp::Ordering::Less => -1.0,
                    std::cmp::Ordering::Equal => 0.0,
                    std::cmp::Ordering::Greater => 1.0,
                })
            }
            "normalize" => {
                let form = match first {
                    Value::Undefined => "NFC".to_string(),
                    other => other.to_js_string(),
                };
                Value::String(match form.as_str() {
                    "NFC" => s.nfc().collect(),
                    "NFD" => s.nfd().collect(),
                    "NFKC" => s.nfkc().collect(),
                    "NFKD" => s.nfkd().collect(),
                    _ => {
                        return throw(
                            ErrorKind::RangeError,
                            "The normalization form should be one of NFC, NFD, NFKC, NFKD.",
                        );
                    }
                })
            }
            "split" => return self.string_split(s, &first, &second),
            "replace" | "replaceAll" => {
                return self.string_replace(s, name == "replaceAll", &first, &second);
            }
            "match" => return self.string_match(s, &first),
            "search" => {
                let re = self.coerce_regexp(&first)?;
                let found = re
                    .regex
                    .captures_from_pos(s, 0)
                    .map_err(regex_error)?;
                Value::Number(
                    found
                        .and_then(|caps| caps.get(0).map(|m| s[..m.start()].chars().count() as f64))
                        .unwrap_or(-1.0),
                )
            }
            _ => Value::string(s),
        })
    }

    fn coerce_regexp(&mut self, value: &Value) -> Eval<Rc<RegExpValue>> {
        match value {
            Value::RegExp(re) => Ok(Rc::clone(re)),
            other => {
                let source = other.to_js_string();
                match self.new_regexp(&source, "")? {
                    Value::RegExp(re) => Ok(re),
                    _ => throw(ErrorKind::SyntaxError, "Invalid regular expression"),
                }
            }
        }
    }

    fn string_split(&mut self, s: &str, separator: &Value, limit: &Value) -> Eval<Value> {
        let limit = match limit {
            Value::Undefined => usize::MAX,
            other => to_uint32(other.to_number()) as usize,
        };
        let parts: Vec<String> = match separator {
            Value::Undefined => vec![s.to_string()],
            Value::RegExp(re) => re.regex.split_all(s).map_err(|err| {
                Abrupt::Throw(Value::error(ErrorKind::SyntaxError, err.to_string()))
            })?,
            other => {
                let sep = other.to_js_string();
                if sep.is_empty() {
                    s.chars().map(|c| c.to_string()).collect()
                } else {
                    s.split(sep.as_str()).map(str::to_string).collect()
                }
            }
        };
        Ok(Value::array(
            parts.into_iter().take(limit).map(Value::String).collect(),
        ))
    }

    fn string_replace(
        &mut self,
        s: &str,
        all: bool,
        pattern: &Value,
        replacement: &Value,
    ) -> Eval<Value> {
        // Collect (start, end, groups) for every match to replace.
        let mut matches: Vec<(usize, usize, Vec<Option<String>>)> = Vec::new();
        match pattern {
            Value::RegExp(re) => {
                if all && !re.regex.is_global() {
                    return throw(
                        ErrorKind::TypeError,
                        "replaceAll must be called with a global RegExp",
                    );
                }
                let found = if re.regex.is_global() {
                    re.regex.captures_all(s).map_err(regex_error)?
                } else {
                    re.regex
                        .captures_from_pos(s, 0)
                        .map_err(regex_error)?
                        .into_iter()
                        .collect()
                };
                for caps in found {
                    let Some(whole) = caps.get(0) else { continue };
                    let groups = (0..caps.len())
                        .map(|idx| caps.get(idx).map(|m| m.as_str().to_string()))
                        .collect();
                    matches.push((whole.start(), whole.end(), groups));
                }
            }
            other => {
                let needle = other.to_js_string();
                if all && !needle.is_empty() {
                    for (start, part) in s.match_indices(needle.as_str()) {
                        matches.push((start, start + part.len(), vec![Some(part.to_string())]));
                    }
                } else if let Some(start) = s.find(needle.as_str()) {
                    matches.push((start, start + needle.len(), vec![Some(needle.clone())]));
                }
            }
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0usize;
        for (start, end, groups) in matches {
            out.push_str(&s[last..start]);
            if replacement.is_callable() {
                let mut call_args = groups
                    .iter()
                    .map(|g| g.clone().map(Value::String).unwrap_or(Value::Undefined))
                    .collect::<Vec<_>>();
                call_args.push(Value::Number(s[..start].chars().count() as f64));
                call_args.push(Value::string(s));
                let result = self.call_function(replacement, Value::Undefined, call_args)?;
                out.push_str(&result.to_js_string());
            } else {
                expand_replacement(&replacement.to_js_string(), s, start, end, &groups, &mut out);
            }
            last = end;
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    fn string_match(&mut self, s: &str, pattern: &Value) -> Eval<Value> {
        let re = self.coerce_regexp(pattern)?;
        if re.regex.is_global() {
            let all = re.regex.captures_all(s).map_err(regex_error)?;
            if all.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(Value::array(
                all.iter()
                    .filter_map(|caps| caps.get(0).map(|m| Value::string(m.as_str())))
                    .collect(),
            ));
        }
        let found = re.regex.captures_from_pos(s, 0).map_err(regex_error)?;
        Ok(match found {
            Some(caps) => captures_to_array(&caps),
            None => Value::Null,
        })
    }

    fn regexp_method(&mut self, re: &Rc<RegExpValue>, name: &str, args: Vec<Value>) -> Eval<Value> {
        let input = arg(&args, 0).to_js_string();
        match name {
            "toString" => Ok(Value::String(re.regex.to_string())),
            "test" | "exec" => {
                let sticky = re.regex.is_global() || re.regex.flags().contains('y');
                let start = if sticky { re.last_index.get() } else { 0 };
                // lastIndex counts characters; the backend wants a byte offset.
                let byte_start = match input.char_indices().nth(start) {
                    Some((byte, _)) => byte,
                    None if start == input.chars().count() => input.len(),
                    None => input.len() + 1,
                };
                let found = re.regex.captures_from_pos(&input, byte_start).map_err(regex_error)?;
                match found {
                    Some(caps) => {
                        if sticky {
                            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
                            let mut next = input[..end].chars().count();
                            if caps.get(0).is_some_and(|m| m.start() == m.end()) {
                                next += 1;
                            }
                            re.last_index.set(next);
                        }
                        if name == "test" {
                            Ok(Value::Bool(true))
                        } else {
                            Ok(captures_to_array(&caps))
                        }
                    }
                    None => {
                        if sticky {
                            re.last_index.set(0);
                        }
                        Ok(if name == "test" { Value::Bool(false) } else { Value::Null })
                    }
                }
            }
            other => throw(
                ErrorKind::TypeError,
                format!("{}.{other} is not a function", re.regex),
            ),
        }
    }

    fn number_method(&mut self, n: f64, name: &str, args: &[Value]) -> Eval<Value> {
        let first = arg(args, 0);
        Ok(Value::String(match name {
            "toFixed" => {
                let digits = first.to_number();
                let digits = if digits.is_nan() { 0.0 } else { digits };
                if !(0.0..=100.0).contains(&digits) {
                    return throw(
                        ErrorKind::RangeError,
                        "toFixed() digits argument must be between 0 and 100",
                    );
                }
                format_fixed(n, digits as usize)
            }
            "toPrecision" if !matches!(first, Value::Undefined) => {
                let precision = first.to_number().clamp(1.0, 100.0) as usize;
                if n == 0.0 || !n.is_finite() {
                    format_number(n)
                } else {
                    let magnitude = n.abs().log10().floor() as i32;
                    let decimals = (precision as i32 - 1 - magnitude).max(0) as usize;
                    format_fixed(n, decimals)
                }
            }
            "toLocaleString" => format_grouped(n),
            "valueOf" => return Ok(Value::Number(n)),
            _ => match first {
                Value::Undefined => format_number(n),
                radix => {
                    let radix = radix.to_number() as u32;
                    if !(2..=36).contains(&radix) {
                        return throw(
                            ErrorKind::RangeError,
                            "toString() radix must be between 2 and 36",
                        );
                    }
                    if radix == 10 || n.fract() != 0.0 || !n.is_finite() {
                        format_number(n)
                    } else {
                        format_radix(n, radix)
                    }
                }
            },
        }))
    }

    fn date_method(&mut self, ms: f64, name: &str) -> Value {
        if ms.is_nan() && name != "toString" {
            return Value::Number(f64::NAN);
        }
        let (year, month0, day, weekday, h, m, s, millis) = civil_from_ms(ms);
        let number = |n: f64| Value::Number(n);
        match name {
            "getTime" | "valueOf" => number(ms),
            "getFullYear" | "getUTCFullYear" => number(year as f64),
            "getMonth" | "getUTCMonth" => number(f64::from(month0)),
            "getDate" | "getUTCDate" => number(f64::from(day)),
            "getDay" | "getUTCDay" => number(f64::from(weekday)),
            "getHours" | "getUTCHours" => number(f64::from(h)),
            "getMinutes" | "getUTCMinutes" => number(f64::from(m)),
            "getSeconds" | "getUTCSeconds" => number(f64::from(s)),
            "getMilliseconds" => number(f64::from(millis)),
            "getTimezoneOffset" => number(0.0),
            "toISOString" | "toJSON" => Value::String(format_iso_date(ms)),
            "toLocaleDateString" => Value::String(format!("{}/{day}/{year}", month0 + 1)),
            "toLocaleTimeString" => Value::String(format_locale_time(h, m, s)),
            "toLocaleString" => Value::String(format!(
                "{}/{day}/{year}, {}",
                month0 + 1,
                format_locale_time(h, m, s)
            )),
            "toDateString" => {
                let full = Value::Date(ms).to_js_string();
                Value::String(full.split(' ').take(4).collect::<Vec<_>>().join(" "))
            }
            _ => Value::String(Value::Date(ms).to_js_string()),
        }
    }

    fn array_method(
        &mut self,
        items: &Rc<RefCell<Vec<Value>>>,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let this = Value::Array(Rc::clone(items));
        let first = arg(&args, 0);
        let second = arg(&args, 1);
        let len = items.borrow().len();
        let snapshot = || items.borrow().clone();

        match name {
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
            "shift" => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Ok(Value::Undefined)
                } else {
                    Ok(items.remove(0))
                }
            }
            "unshift" => {
                let mut items = items.borrow_mut();
                for (idx, value) in args.into_iter().enumerate() {
                    items.insert(idx, value);
                }
                Ok(Value::Number(items.len() as f64))
            }
            "at" | "item" => {
                let idx = first.to_number().trunc();
                let idx = if idx < 0.0 && name == "at" { len as f64 + idx } else { idx };
                if idx < 0.0 {
                    Ok(Value::Undefined)
                } else {
                    Ok(items.borrow().get(idx as usize).cloned().unwrap_or(Value::Undefined))
                }
            }
            "slice" => {
                let from = relative_index(&first, len, 0);
                let to = relative_index(&second, len, len);
                let items = items.borrow();
                Ok(Value::array(
                    items.get(from..to.max(from)).unwrap_or_default().to_vec(),
                ))
            }
            "splice" => {
                let start = relative_index(&first, len, 0);
                let delete_count = match (&first, &second) {
                    (Value::Undefined, _) => 0,
                    (_, Value::Undefined) if args.len() < 2 => len - start,
                    (_, count) => (count.to_number().max(0.0) as usize).min(len - start),
                };
                let inserted = args.into_iter().skip(2);
                let removed = items
                    .borrow_mut()
                    .splice(start..start + delete_count, inserted)
                    .collect();
                Ok(Value::array(removed))
            }
            "concat" => {
                let mut out = snapshot();
                for value in args {
                    match value {
                        Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                        other => out.push(other),
                    }
                }
                Ok(Value::array(out))
            }
            "join" | "toString" => {
                let sep = match first {
                    Value::Undefined => ",".to_string(),
                    other if name == "join" => other.to_js_string(),
                    _ => ",".to_string(),
                };
                let parts = snapshot()
                    .iter()
                    .map(|v| element_to_string(items, v))
                    .collect::<Vec<_>>();
                let total = parts
                    .iter()
                    .fold(sep.len().saturating_mul(parts.len()), |acc, part| {
                        acc.saturating_add(part.len())
                    });
                check_string_length(total)?;
                Ok(Value::String(parts.join(&sep)))
            }
            "reverse" => {
                items.borrow_mut().reverse();
                Ok(this)
            }
            "indexOf" | "lastIndexOf" | "includes" => {
                let values = snapshot();
                let found = if name == "lastIndexOf" {
                    values.iter().rposition(|v| v.strict_equals(&first))
                } else {
                    let from = relative_index(&second, len, 0);
                    values
                        .iter()
                        .enumerate()
                        .skip(from)
                        .find(|(_, v)| {
                            if name == "includes" {
                                v.same_value_zero(&first)
                            } else {
                                v.strict_equals(&first)
                            }
                        })
                        .map(|(idx, _)| idx)
                };
                Ok(if name == "includes" {
                    Value::Bool(found.is_some())
                } else {
                    Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
                })
            }
            "fill" => {
                let from = relative_index(&second, len, 0);
                let to = relative_index(&arg(&args, 2), len, len);
                for slot in items.borrow_mut().iter_mut().take(to).skip(from) {
                    *slot = first.clone();
                }
                Ok(this)
            }
            "flat" => {
                let depth = match first {
                    Value::Undefined => 1,
                    other => other.to_number().max(0.0) as usize,
                };
                let mut out = Vec::new();
                flatten(&snapshot(), depth, &mut Vec::new(), &mut out)?;
                Ok(Value::array(out))
            }
            "forEach" | "map" | "filter" | "find" | "findIndex" | "findLast" | "findLastIndex"
            | "some" | "every" | "flatMap" => {
                if !first.is_callable() {
                    return throw(
                        ErrorKind::TypeError,
                        format!("{} is not a function", first.to_js_string()),
                    );
                }
                let values = snapshot();
                let indices: Vec<usize> = if name.starts_with("findLast") {
                    (0..values.len()).rev().collect()
                } else {
                    (0..values.len()).collect()
                };
                let mut out = Vec::new();
                for idx in indices {
                    let item = values[idx].clone();
                    let result = self.call_function(
                        &first,
                        second.clone(),
                        vec![item.clone(), Value::Number(idx as f64), this.clone()],
                    )?;
                    match name {
                        "map" => out.push(result),
                        "flatMap" => match result {
                            Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                            other => out.push(other),
                        },
                        "filter" if result.truthy() => out.push(item),
                        "find" | "findLast" if result.truthy() => return Ok(item),
                        "findIndex" | "findLastIndex" if result.truthy() => {
                            return Ok(Value::Number(idx as f64));
                        }
                        "some" if result.truthy() => return Ok(Value::Bool(true)),
                        "every" if !result.truthy() => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match name {
                    "forEach" => Value::Undefined,
                    "find" | "findLast" => Value::Undefined,
                    "findIndex" | "findLastIndex" => Value::Number(-1.0),
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    _ => Value::array(out),
                })
            }
            "reduce" | "reduceRight" => {
                if !first.is_callable() {
                    return throw(
                        ErrorKind::TypeError,
                        format!("{} is not a function", first.to_js_string()),
                    );
                }
                let values = snapshot();
                let mut order: Vec<usize> = (0..values.len()).collect();
                if name == "reduceRight" {
                    order.reverse();
                }
                let mut order = order.into_iter();
                let mut acc = if args.len() >= 2 {
                    second
                } else {
                    match order.next() {
                        Some(idx) => values[idx].clone(),
                        None => {
                            return throw(
                                ErrorKind::TypeError,
                                "Reduce of empty array with no initial value",
                            );
                        }
                    }
                };
                for idx in order {
                    acc = self.call_function(
                        &first,
                        Value::Undefined,
                        vec![acc, values[idx].clone(), Value::Number(idx as f64), this.clone()],
                    )?;
                }
                Ok(acc)
            }
            "sort" => {
                let values = snapshot();
                let sorted = self.merge_sort(values, &first)?;
                *items.borrow_mut() = sorted;
                Ok(this)
            }
            other => throw(
                ErrorKind::TypeError,
                format!("array.{other} is not a function"),
            ),
        }
    }

    fn sort_less_or_equal(&mut self, a: &Value, b: &Value, comparator: &Value) -> Eval<bool> {
        match (a, b) {
            (Value::Undefined, _) => return Ok(matches!(b, Value::Undefined)),
            (_, Value::Undefined) => return Ok(true),
            _ => {}
        }
        if comparator.is_callable() {
            let result =
                self.call_function(comparator, Value::Undefined, vec![a.clone(), b.clone()])?;
            let n = result.to_number();
            return Ok(n <= 0.0 || n.is_nan());
        }
        let (a, b) = (a.to_js_string(), b.to_js_string());
        Ok(a.encode_utf16().cmp(b.encode_utf16()).is_le())
    }

    fn merge_sort(&mut self, values: Vec<Value>, comparator: &Value) -> Eval<Vec<Value>> {
        if values.len() <= 1 {
            return Ok(values);
        }
        let mut values = values;
        let right = values.split_off(values.len() / 2);
        let left = self.merge_sort(values, comparator)?;
        let right = self.merge_sort(right, comparator)?;
        let mut out = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let take_left = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) => self.sort_less_or_equal(a, b, comparator)?,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_left { left.next() } else { right.next() };
            out.extend(next);
        }
        Ok(out)
    }

    /// Appends the JSON text for `value`; `false` when it has no JSON form.
    fn json_stringify(
        &mut self,
        value: &Value,
        writer: &mut JsonWriter<'_>,
        current: &str,
        out: &mut String,
    ) -> Eval<bool> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            self.json_write(value, writer, current, out)
        })
    }

    fn json_write(
        &mut self,
        value: &Value,
        writer: &mut JsonWriter<'_>,
        current: &str,
        out: &mut String,
    ) -> Eval<bool> {
        self.tick()?;
        check_string_length(out.len())?;
        let inner = format!("{current}{}", writer.indent);
        let (open_sep, item_sep, close_sep, colon) = if writer.indent.is_empty() {
            (String::new(), ",".to_string(), String::new(), ":")
        } else {
            (
                format!("\n{inner}"),
                format!(",\n{inner}"),
                format!("\n{current}"),
                ": ",
            )
        };
        match value {
            Value::Undefined | Value::Function(_) | Value::Native(_) | Value::Method(_)
            | Value::Capability(_) => return Ok(false),
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) if n.is_finite() => out.push_str(&format_number(*n)),
            Value::Number(_) => out.push_str("null"),
            Value::String(s) => out.push_str(&json_quote(s)),
            Value::Date(ms) => out.push_str(&json_quote(&format_iso_date(*ms))),
            Value::Array(items) => {
                let snapshot = items.borrow().clone();
                if snapshot.is_empty() {
                    out.push_str("[]");
                    return Ok(true);
                }
                if !writer.enter(Rc::as_ptr(items).cast())? {
                    out.push_str(CIRCULAR);
                    return Ok(true);
                }
                out.push('[');
                out.push_str(&open_sep);
                for (idx, item) in snapshot.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(&item_sep);
                    }
                    if !self.json_stringify(item, writer, &inner, out)? {
                        out.push_str("null");
                    }
                }
                out.push_str(&close_sep);
                out.push(']');
                writer.visiting.pop();
            }
            Value::Object(obj) => {
                if !writer.enter(Rc::as_ptr(obj).cast())? {
                    out.push_str(CIRCULAR);
                    return Ok(true);
                }
                let entries = obj.borrow().entries();
                let mut wrote_any = false;
                out.push('{');
                for (key, item) in entries {
                    let mut rendered = String::new();
                    if !self.json_stringify(&item, writer, &inner, &mut rendered)? {
                        continue;
                    }
                    out.push_str(if wrote_any { &item_sep } else { &open_sep });
                    out.push_str(&json_quote(&key));
                    out.push_str(colon);
                    out.push_str(&rendered);
                    check_string_length(out.len())?;
                    wrote_any = true;
                }
                if wrote_any {
                    out.push_str(&close_sep);
                }
                out.push('}');
                writer.visiting.pop();
            }
            Value::RegExp(_) | Value::Event(_) | Value::InlineStyle(_) | Value::ComputedStyle(_)
            | Value::ClassList(_) | Value::Dataset(_) | Value::Node(_) | Value::Window => {
                out.push_str("{}")
            }
        }
        Ok(true)
    }

    pub(crate) fn console_format(&mut self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                let mut out = String::new();
                let mut writer = JsonWriter::new("", true);
                match self.json_stringify(value, &mut writer, "", &mut out) {
                    Ok(true) => out,
                    _ => value.to_js_string(),
                }
            }
            Value::Node(node) => match self.dom.tag_name(*node) {
                Some(tag) => format!("<{tag}>"),
                None => "#document".to_string(),
            },
            other => other.to_js_string(),
        }
    }
}

const CIRCULAR: &str = "[Circular]";

/// State for one serialization pass: the indent unit and the containers on
/// the current path.
struct JsonWriter<'a> {
    indent: &'a str,
    visiting: Vec<*const ()>,
    /// Render cycles as `[Circular]` instead of throwing.
    lenient: bool,
}

impl<'a> JsonWriter<'a> {
    fn new(indent: &'a str, lenient: bool) -> Self {
        Self {
            indent,
            visiting: Vec::new(),
            lenient,
        }
    }

    /// Pushes `container` onto the path; `false` when it is already there and
    /// cycles are rendered rather than rejected.
    fn enter(&mut self, container: *const ()) -> Eval<bool> {
        if !self.visiting.contains(&container) {
            self.visiting.push(container);
            return Ok(true);
        }
        if self.lenient {
            return Ok(false);
        }
        throw(ErrorKind::TypeError, "Converting circular structure to JSON")
    }
}

fn flatten(
    values: &[Value],
    depth: usize,
    visiting: &mut Vec<*const RefCell<Vec<Value>>>,
    out: &mut Vec<Value>,
) -> Eval<()> {
    for value in values {
        match value {
            Value::Array(inner) if depth > 0 => {
                let ptr = Rc::as_ptr(inner);
                if visiting.contains(&ptr) {
                    return throw(ErrorKind::RangeError, "Maximum call stack size exceeded");
                }
                visiting.push(ptr);
                let items = inner.borrow().clone();
                stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                    flatten(&items, depth - 1, visiting, out)
                })?;
                visiting.pop();
            }
            other => out.push(other.clone()),
        }
        if out.len() > MAX_ARRAY_LENGTH {
            return throw(ErrorKind::RangeError, "Invalid array length");
        }
    }
    Ok(())
}

fn captures_to_array(caps: &crate::js_regex::Captures) -> Value {
    Value::array(
        (0..caps.len())
            .map(|idx| {
                caps.get(idx)
                    .map(|m| Value::string(m.as_str()))
                    .unwrap_or(Value::Undefined)
            })
            .collect(),
    )
}

fn expand_replacement(
    template: &str,
    input: &str,
    start: usize,
    end: usize,
    groups: &[Option<String>],
    out: &mut String,
) {
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('&') => {
                chars.next();
                out.push_str(&input[start..end]);
            }
            Some('`') => {
                chars.next();
                out.push_str(&input[..start]);
            }
            Some('\'') => {
                chars.next();
                out.push_str(&input[end..]);
            }
            Some(d) if d.is_ascii_digit() => {
                chars.next();
                let mut idx = d.to_digit(10).unwrap_or(0) as usize;
                if let Some(next) = chars.peek().and_then(|c| c.to_digit(10)) {
                    let two = idx * 10 + next as usize;
                    if two < groups.len() {
                        idx = two;
                        chars.next();
                    }
                }
                if idx > 0 && idx < groups.len() {
                    if let Some(group) = &groups[idx] {
                        out.push_str(group);
                    }
                } else {
                    out.push('$');
                    out.push(d);
                }
            }
            _ => out.push('$'),
        }
    }
}

fn format_radix(n: f64, radix: u32) -> String {
    let negative = n < 0.0;
    let mut value = n.abs() as u64;
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % u64::from(radix)) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        value /= u64::from(radix);
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn format_locale_time(h: u32, m: u32, s: u32) -> String {
    let suffix = if h < 12 { "AM" } else { "PM" };
    let hour = match h % 12 {
        0 => 12,
        other => other,
    };
    format!("{hour}:{m:02}:{s:02} {suffix}")
}
