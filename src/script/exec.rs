use super::*;
use crate::page::Page;

const MAX_CALL_DEPTH: usize = 4_000;
pub(crate) const STACK_RED_ZONE: usize = 128 * 1024;
pub(crate) const STACK_GROWTH: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub(crate) enum Abrupt {
    Throw(Value),
    /// A `?.` link met a nullish value; caught by the enclosing chain.
    ShortCircuit,
}

pub(crate) type Eval<T> = std::result::Result<T, Abrupt>;

#[derive(Debug)]
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy)]
enum BindMode {
    Declare { mutable: bool },
    Var,
    Assign,
}

impl BindMode {
    fn for_kind(kind: VarKind) -> Self {
        match kind {
            VarKind::Var => Self::Var,
            VarKind::Let => Self::Declare { mutable: true },
            VarKind::Const => Self::Declare { mutable: false },
        }
    }
}

pub(crate) fn throw<T>(kind: ErrorKind, message: impl Into<String>) -> Eval<T> {
    Err(Abrupt::Throw(Value::error(kind, message)))
}

/// Renders a thrown value the way consoles print uncaught errors.
pub(crate) fn describe_thrown(value: &Value) -> String {
    match value {
        Value::Object(obj) if obj.borrow().class == ObjectClass::Error => value.to_js_string(),
        Value::String(s) => s.clone(),
        other => format!("Uncaught {}", other.to_js_string()),
    }
}

fn pattern_names(pattern: &Pattern, out: &mut Vec<String>) {
    match pattern {
        Pattern::Ident(name) => out.push(name.clone()),
        Pattern::Array { items, rest } => {
            for item in items.iter().flatten() {
                pattern_names(item, out);
            }
            if let Some(rest) = rest {
                pattern_names(rest, out);
            }
        }
        Pattern::Object { props, rest } => {
            for (_, value) in props {
                pattern_names(value, out);
            }
            if let Some(rest) = rest {
                pattern_names(rest, out);
            }
        }
        Pattern::Default(inner, _) => pattern_names(inner, out),
        Pattern::Target(_) => {}
    }
}

fn hoist_vars(stmts: &[Stmt], scope: &Scope) {
    for stmt in stmts {
        hoist_vars_in(stmt, scope);
    }
}

fn hoist_vars_in(stmt: &Stmt, scope: &Scope) {
    match stmt {
        Stmt::VarDecl {
            kind: VarKind::Var,
            decls,
        } => {
            let mut names = Vec::new();
            for (pattern, _) in decls {
                pattern_names(pattern, &mut names);
            }
            for name in names {
                scope.declare_var(&name);
            }
        }
        Stmt::If {
            then, otherwise, ..
        } => {
            hoist_vars_in(then, scope);
            if let Some(otherwise) = otherwise {
                hoist_vars_in(otherwise, scope);
            }
        }
        Stmt::Block(body) => hoist_vars(body, scope),
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => hoist_vars_in(body, scope),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                hoist_vars_in(init, scope);
            }
            hoist_vars_in(body, scope);
        }
        Stmt::ForOf {
            kind, target, body, ..
        }
        | Stmt::ForIn {
            kind, target, body, ..
        } => {
            if *kind == Some(VarKind::Var) {
                let mut names = Vec::new();
                pattern_names(target, &mut names);
                for name in names {
                    scope.declare_var(&name);
                }
            }
            hoist_vars_in(body, scope);
        }
        Stmt::Switch { cases, .. } => {
            for (_, body) in cases {
                hoist_vars(body, scope);
            }
        }
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            hoist_vars(block, scope);
            if let Some(handler) = handler {
                hoist_vars(handler, scope);
            }
            if let Some(finalizer) = finalizer {
                hoist_vars(finalizer, scope);
            }
        }
        _ => {}
    }
}

impl Page {
    pub(crate) fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        if self.is_aborted() {
            return throw(ErrorKind::Error, "Execution context was destroyed");
        }
        if self.steps > self.step_limit {
            return throw(
                ErrorKind::RangeError,
                "Script exceeded its execution step budget (possible infinite loop)",
            );
        }
        Ok(())
    }

    pub(crate) fn run_program(&mut self, program: &Program, scope: &Scope) -> Eval<()> {
        hoist_vars(&program.body, scope);
        match self.exec_block_in(&program.body, scope)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break | Flow::Continue => throw(
                ErrorKind::SyntaxError,
                "Illegal break or continue statement",
            ),
        }
    }

    fn declare_functions(&mut self, stmts: &[Stmt], scope: &Scope) {
        for stmt in stmts {
            if let Stmt::FunctionDecl(def) = stmt {
                let closure = self.make_closure(def, scope);
                if let Some(name) = &def.name {
                    scope.declare(name, closure, true);
                }
            }
        }
    }

    fn make_closure(&self, def: &Rc<FunctionDef>, scope: &Scope) -> Value {
        Value::Function(Rc::new(Closure {
            def: Rc::clone(def),
            env: scope.clone(),
            this: None,
        }))
    }

    fn exec_block_in(&mut self, stmts: &[Stmt], scope: &Scope) -> Eval<Flow> {
        self.declare_functions(stmts, scope);
        for stmt in stmts {
            let flow = self.exec_stmt(stmt, scope)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> Eval<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Empty | Stmt::FunctionDecl(_) => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                self.eval_expr(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::VarDecl { kind, decls } => {
                for (pattern, init) in decls {
                    match init {
                        Some(init) => {
                            let value = self.eval_named(init, pattern, scope)?;
                            self.bind_pattern(pattern, value, scope, BindMode::for_kind(*kind))?;
                        }
                        None if *kind == VarKind::Var => {}
                        None => {
                            self.bind_pattern(
                                pattern,
                                Value::Undefined,
                                scope,
                                BindMode::for_kind(*kind),
                            )?;
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_expr(cond, scope)?.truthy() {
                    self.exec_stmt(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(body) => {
                let block_scope = scope.child(false);
                self.exec_block_in(body, &block_scope)
            }
            Stmt::While { cond, body } => {
                while self.eval_expr(cond, scope)?.truthy() {
                    match self.exec_stmt(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    self.tick()?;
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    match self.exec_stmt(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval_expr(cond, scope)?.truthy() {
                        break;
                    }
                    self.tick()?;
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => self.exec_for(init.as_deref(), cond.as_ref(), update.as_ref(), body, scope),
            Stmt::ForOf {
                kind,
                target,
                iterable,
                body,
            } => {
                let iterable = self.eval_expr(iterable, scope)?;
                let items = self.iterate(&iterable)?;
                self.exec_for_each(*kind, target, items, body, scope)
            }
            Stmt::ForIn {
                kind,
                target,
                object,
                body,
            } => {
                let object = self.eval_expr(object, scope)?;
                let keys = self
                    .own_keys(&object)
                    .into_iter()
                    .map(Value::String)
                    .collect();
                self.exec_for_each(*kind, target, keys, body, scope)
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval_expr(discriminant, scope)?;
                let switch_scope = scope.child(false);
                let mut matched = None;
                for (idx, (test, _)) in cases.iter().enumerate() {
                    if let Some(test) = test {
                        if self.eval_expr(test, &switch_scope)?.strict_equals(&value) {
                            matched = Some(idx);
                            break;
                        }
                    }
                }
                let start = matched.or_else(|| cases.iter().position(|(test, _)| test.is_none()));
                let Some(start) = start else {
                    return Ok(Flow::Normal);
                };
                for (_, body) in &cases[start..] {
                    match self.exec_block_in(body, &switch_scope)? {
                        Flow::Normal => {}
                        Flow::Break => return Ok(Flow::Normal),
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval_expr(expr, scope)?;
                Err(Abrupt::Throw(value))
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block_in(block, &scope.child(false));
                if let (Err(Abrupt::Throw(thrown)), Some(handler)) = (&result, handler) {
                    let catch_scope = scope.child(false);
                    let thrown = thrown.clone();
                    result = match param {
                        Some(param) => self
                            .bind_pattern(
                                param,
                                thrown,
                                &catch_scope,
                                BindMode::Declare { mutable: true },
                            )
                            .and_then(|()| self.exec_block_in(handler, &catch_scope)),
                        None => self.exec_block_in(handler, &catch_scope),
                    };
                }
                if let Some(finalizer) = finalizer {
                    match self.exec_block_in(finalizer, &scope.child(false))? {
                        Flow::Normal => {}
                        overriding => return Ok(overriding),
                    }
                }
                result
            }
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &Scope,
    ) -> Eval<Flow> {
        let loop_scope = scope.child(false);
        let mut per_iteration = Vec::new();
        if let Some(init) = init {
            if let Stmt::VarDecl {
                kind: VarKind::Let | VarKind::Const,
                decls,
            } = init
            {
                for (pattern, _) in decls {
                    pattern_names(pattern, &mut per_iteration);
                }
            }
            self.exec_stmt(init, &loop_scope)?;
        }

        // Each iteration gets fresh copies of `let` bindings so closures
        // created in the body capture that iteration's values.
        let copy_scope = |from: &Scope| {
            let next = scope.child(false);
            for name in &per_iteration {
                next.declare(name, from.lookup(name).unwrap_or(Value::Undefined), true);
            }
            next
        };
        let mut iteration = if per_iteration.is_empty() {
            loop_scope.clone()
        } else {
            copy_scope(&loop_scope)
        };

        loop {
            if let Some(cond) = cond {
                if !self.eval_expr(cond, &iteration)?.truthy() {
                    break;
                }
            }
            match self.exec_stmt(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if !per_iteration.is_empty() {
                iteration = copy_scope(&iteration);
            }
            if let Some(update) = update {
                self.eval_expr(update, &iteration)?;
            }
            self.tick()?;
        }
        Ok(Flow::Normal)
    }

    fn exec_for_each(
        &mut self,
        kind: Option<VarKind>,
        target: &Pattern,
        items: Vec<Value>,
        body: &Stmt,
        scope: &Scope,
    ) -> Eval<Flow> {
        for item in items {
            let iteration = scope.child(false);
            let mode = kind.map(BindMode::for_kind).unwrap_or(BindMode::Assign);
            self.bind_pattern(target, item, &iteration, mode)?;
            match self.exec_stmt(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            self.tick()?;
        }
        Ok(Flow::Normal)
    }

    pub(crate) fn iterate(&mut self, value: &Value) -> Eval<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
            Value::ClassList(node) => Ok(self
                .dom
                .class_names(*node)
                .into_iter()
                .map(Value::String)
                .collect()),
            other => throw(
                ErrorKind::TypeError,
                format!("{} is not iterable", self.describe_value(other)),
            ),
        }
    }

    pub(crate) fn own_keys(&self, value: &Value) -> Vec<String> {
        match value {
            Value::Object(obj) => obj.borrow().keys(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
            Value::String(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
            Value::Dataset(node) => self.dataset_keys(*node),
            _ => Vec::new(),
        }
    }

    fn describe_value(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!("\"{s}\""),
            other => other.to_js_string(),
        }
    }

    /// Evaluates an initializer, naming anonymous functions after their binding.
    fn eval_named(&mut self, expr: &Expr, pattern: &Pattern, scope: &Scope) -> Eval<Value> {
        if let (Expr::Function(def), Pattern::Ident(name)) = (expr, pattern) {
            if def.name.is_none() {
                let mut named = (**def).clone();
                named.name = Some(name.clone());
                return Ok(self.make_closure(&Rc::new(named), scope));
            }
        }
        self.eval_expr(expr, scope)
    }

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Value,
        scope: &Scope,
        mode: BindMode,
    ) -> Eval<()> {
        match pattern {
            Pattern::Ident(name) => match mode {
                BindMode::Declare { mutable } => {
                    scope.declare(name, value, mutable);
                    Ok(())
                }
                BindMode::Var => {
                    scope.declare_var(name);
                    self.assign_name(name, value, scope)
                }
                BindMode::Assign => self.assign_name(name, value, scope),
            },
            Pattern::Default(inner, default) => {
                let value = if matches!(value, Value::Undefined) {
                    self.eval_named(default, inner, scope)?
                } else {
                    value
                };
                self.bind_pattern(inner, value, scope, mode)
            }
            Pattern::Array { items, rest } => {
                if value.is_nullish() {
                    return throw(
                        ErrorKind::TypeError,
                        format!("{} is not iterable", value.to_js_string()),
                    );
                }
                let values = self.iterate(&value)?;
                for (idx, item) in items.iter().enumerate() {
                    if let Some(item) = item {
                        let element = values.get(idx).cloned().unwrap_or(Value::Undefined);
                        self.bind_pattern(item, element, scope, mode)?;
                    }
                }
                if let Some(rest) = rest {
                    let remaining = values.get(items.len()..).unwrap_or_default().to_vec();
                    self.bind_pattern(rest, Value::array(remaining), scope, mode)?;
                }
                Ok(())
            }
            Pattern::Object { props, rest } => {
                if value.is_nullish() {
                    return throw(
                        ErrorKind::TypeError,
                        format!(
                            "Cannot destructure '{}' as it is {}.",
                            value.to_js_string(),
                            value.to_js_string()
                        ),
                    );
                }
                let mut used = Vec::new();
                for (key, target) in props {
                    let key = self.prop_key(key, scope)?;
                    let element = self.get_property(&value, &key)?;
                    used.push(key);
                    self.bind_pattern(target, element, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let mut remaining = ObjectValue::default();
                    if let Value::Object(obj) = &value {
                        for (key, item) in obj.borrow().entries() {
                            if !used.contains(&key) {
                                remaining.set(key, item);
                            }
                        }
                    }
                    self.bind_pattern(rest, Value::object(remaining), scope, mode)?;
                }
                Ok(())
            }
            Pattern::Target(expr) => self.assign_to_expr(expr, value, scope),
        }
    }

    fn assign_name(&mut self, name: &str, value: Value, scope: &Scope) -> Eval<()> {
        match scope.assign(name, value.clone()) {
            Ok(true) => Ok(()),
            Ok(false) if scope.is_strict() => {
                throw(ErrorKind::ReferenceError, format!("{name} is not defined"))
            }
            Ok(false) => {
                // Sloppy-mode implicit global.
                self.globals.declare(name, value, true);
                Ok(())
            }
            Err(()) => throw(ErrorKind::TypeError, "Assignment to constant variable."),
        }
    }

    fn assign_to_expr(&mut self, expr: &Expr, value: Value, scope: &Scope) -> Eval<()> {
        match expr {
            Expr::Ident(name) => self.assign_name(name, value, scope),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval_expr(object, scope)?;
                self.set_property(&object, property, value)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval_expr(object, scope)?;
                let key = self.eval_expr(index, scope)?;
                let key = self.property_key(&key);
                self.set_property(&object, &key, value)
            }
            _ => throw(ErrorKind::SyntaxError, "Invalid left-hand side in assignment"),
        }
    }

    fn prop_key(&mut self, key: &PropKey, scope: &Scope) -> Eval<String> {
        match key {
            PropKey::Static(name) => Ok(name.clone()),
            PropKey::Computed(expr) => {
                let value = self.eval_expr(expr, scope)?;
                Ok(self.property_key(&value))
            }
        }
    }

    pub(crate) fn property_key(&self, value: &Value) -> String {
        value.to_js_string()
    }

    pub(crate) fn eval_expr(&mut self, expr: &Expr, scope: &Scope) -> Eval<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.eval_expr_inner(expr, scope))
    }

    fn eval_expr_inner(&mut self, expr: &Expr, scope: &Scope) -> Eval<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        TemplateSegment::Str(s) => out.push_str(s),
                        TemplateSegment::Expr(expr) => {
                            let value = self.eval_expr(expr, scope)?.to_js_string();
                            check_string_length(out.len().saturating_add(value.len()))?;
                            out.push_str(&value);
                        }
                    }
                }
                Ok(Value::String(out))
            }
            Expr::Regex { pattern, flags } => self.new_regexp(pattern, flags),
            Expr::Array(items) => {
                let values = self.eval_items(items, scope)?;
                Ok(Value::array(values))
            }
            Expr::Object(props) => {
                let mut obj = ObjectValue::default();
                for prop in props {
                    match prop {
                        PropDef::Value(key, value) => {
                            let key = self.prop_key(key, scope)?;
                            let value = match value {
                                Expr::Function(def) if def.name.is_none() => {
                                    let mut named = (**def).clone();
                                    named.name = Some(key.clone());
                                    self.make_closure(&Rc::new(named), scope)
                                }
                                other => self.eval_expr(other, scope)?,
                            };
                            obj.set(key, value);
                        }
                        PropDef::Spread(expr) => {
                            let source = self.eval_expr(expr, scope)?;
                            for key in self.own_keys(&source) {
                                let value = self.get_property(&source, &key)?;
                                obj.set(key, value);
                            }
                        }
                    }
                }
                Ok(Value::object(obj))
            }
            Expr::Ident(name) => self.lookup_identifier(name, scope),
            Expr::This => Ok(scope.lookup("this").unwrap_or(Value::Window)),
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval_expr(object, scope)?;
                if *optional && object.is_nullish() {
                    return Err(Abrupt::ShortCircuit);
                }
                self.get_property(&object, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let object = self.eval_expr(object, scope)?;
                if *optional && object.is_nullish() {
                    return Err(Abrupt::ShortCircuit);
                }
                let key = self.eval_expr(index, scope)?;
                if let (Value::Array(items), Value::Number(n)) = (&object, &key) {
                    if n.fract() == 0.0 && *n >= 0.0 {
                        return Ok(items
                            .borrow()
                            .get(*n as usize)
                            .cloned()
                            .unwrap_or(Value::Undefined));
                    }
                }
                let key = self.property_key(&key);
                self.get_property(&object, &key)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                let (this, func) = self.eval_callee(callee, scope)?;
                if *optional && func.is_nullish() {
                    return Err(Abrupt::ShortCircuit);
                }
                let args = self.eval_items(args, scope)?;
                if !func.is_callable() {
                    return throw(
                        ErrorKind::TypeError,
                        format!("{} is not a function", callee_description(callee)),
                    );
                }
                self.call_function(&func, this, args)
            }
            Expr::New { callee, args } => {
                let constructor = self.eval_expr(callee, scope)?;
                let args = self.eval_items(args, scope)?;
                self.construct(&constructor, args, callee)
            }
            Expr::Unary { op, arg } => self.eval_unary(*op, arg, scope),
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let old = self.eval_expr(target, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign_to_expr(target, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval_expr(left, scope)?;
                let right = self.eval_expr(right, scope)?;
                self.binary_op(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval_expr(left, scope)?;
                let short_circuits = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.eval_expr(right, scope)
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval_expr(test, scope)?.truthy() {
                    self.eval_expr(then, scope)
                } else {
                    self.eval_expr(otherwise, scope)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value, scope),
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval_expr(item, scope)?;
                }
                Ok(last)
            }
            Expr::Function(def) => Ok(self.make_closure(def, scope)),
            Expr::OptionalChain(inner) => match self.eval_expr(inner, scope) {
                Err(Abrupt::ShortCircuit) => Ok(Value::Undefined),
                other => other,
            },
            Expr::Await(inner) => self.eval_expr(inner, scope),
        }
    }

    fn eval_items(&mut self, items: &[ArrayItem], scope: &Scope) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ArrayItem::Item(expr) => values.push(self.eval_expr(expr, scope)?),
                ArrayItem::Spread(expr) => {
                    let source = self.eval_expr(expr, scope)?;
                    values.extend(self.iterate(&source)?);
                }
                ArrayItem::Hole => values.push(Value::Undefined),
            }
        }
        Ok(values)
    }

    fn lookup_identifier(&mut self, name: &str, scope: &Scope) -> Eval<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        match self.global_value(name) {
            Some(value) => Ok(value),
            None => throw(ErrorKind::ReferenceError, format!("{name} is not defined")),
        }
    }

    /// Names every script sees without declaring them.
    pub(crate) fn global_value(&self, name: &str) -> Option<Value> {
        Some(match name {
            "undefined" => Value::Undefined,
            "NaN" => Value::Number(f64::NAN),
            "Infinity" => Value::Number(f64::INFINITY),
            "document" => Value::Node(self.dom.root),
            "window" | "globalThis" | "self" => Value::Window,
            other => {
                if let Some(value) = self.globals.lookup(other) {
                    return Some(value);
                }
                Value::Native(Native::from_global(other)?)
            }
        })
    }

    fn eval_callee(&mut self, callee: &Expr, scope: &Scope) -> Eval<(Value, Value)> {
        match callee {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval_expr(object, scope)?;
                if *optional && object.is_nullish() {
                    return Err(Abrupt::ShortCircuit);
                }
                let func = self.get_property(&object, property)?;
                Ok((object, func))
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let object = self.eval_expr(object, scope)?;
                if *optional && object.is_nullish() {
                    return Err(Abrupt::ShortCircuit);
                }
                let key = self.eval_expr(index, scope)?;
                let key = self.property_key(&key);
                let func = self.get_property(&object, &key)?;
                Ok((object, func))
            }
            other => Ok((Value::Undefined, self.eval_expr(other, scope)?)),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, arg: &Expr, scope: &Scope) -> Eval<Value> {
        match op {
            UnaryOp::TypeOf => {
                if let Expr::Ident(name) = arg {
                    if scope.lookup(name).is_none() && self.global_value(name).is_none() {
                        return Ok(Value::string("undefined"));
                    }
                }
                let value = self.eval_expr(arg, scope)?;
                Ok(Value::string(value.type_of()))
            }
            UnaryOp::Delete => {
                match arg {
                    Expr::Member {
                        object, property, ..
                    } => {
                        let object = self.eval_expr(object, scope)?;
                        self.delete_property(&object, property);
                    }
                    Expr::Index { object, index, .. } => {
                        let object = self.eval_expr(object, scope)?;
                        let key = self.eval_expr(index, scope)?;
                        let key = self.property_key(&key);
                        self.delete_property(&object, &key);
                    }
                    _ => {}
                }
                Ok(Value::Bool(true))
            }
            _ => {
                let value = self.eval_expr(arg, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::BitNot => Value::Number(f64::from(!value.to_int32())),
                    UnaryOp::Void => Value::Undefined,
                    UnaryOp::TypeOf | UnaryOp::Delete => Value::Undefined,
                })
            }
        }
    }

    fn delete_property(&mut self, object: &Value, key: &str) {
        match object {
            Value::Object(obj) => {
                obj.borrow_mut().remove(key);
            }
            Value::Array(items) => {
                if let Ok(idx) = key.parse::<usize>() {
                    if let Some(slot) = items.borrow_mut().get_mut(idx) {
                        *slot = Value::Undefined;
                    }
                }
            }
            Value::Dataset(node) => {
                let attr = crate::dom::dataset_key_to_attr_name(key);
                let _ = self.dom.remove_attr(*node, &attr);
            }
            Value::Window => {
                self.globals.declare(key, Value::Undefined, true);
            }
            _ => {}
        }
    }

    fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &Pattern,
        value: &Expr,
        scope: &Scope,
    ) -> Eval<Value> {
        let read_target = |page: &mut Self| -> Eval<Value> {
            match target {
                Pattern::Ident(name) => page.lookup_identifier(name, scope),
                Pattern::Target(expr) => page.eval_expr(expr, scope),
                _ => throw(ErrorKind::SyntaxError, "Invalid left-hand side in assignment"),
            }
        };
        let result = match op {
            AssignOp::Assign => self.eval_named(value, target, scope)?,
            AssignOp::Arith(bin) => {
                let current = read_target(self)?;
                let rhs = self.eval_expr(value, scope)?;
                self.binary_op(bin, &current, &rhs)?
            }
            AssignOp::Logical(logical) => {
                let current = read_target(self)?;
                let keep = match logical {
                    LogicalOp::And => !current.truthy(),
                    LogicalOp::Or => current.truthy(),
                    LogicalOp::Nullish => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval_expr(value, scope)?
            }
        };
        self.bind_pattern(target, result.clone(), scope, BindMode::Assign)?;
        Ok(result)
    }

    pub(crate) fn binary_op(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Eval<Value> {
        let num = |v: f64| Ok(Value::Number(v));
        match op {
            BinaryOp::Add => {
                let left = to_primitive(left);
                let right = to_primitive(right);
                if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                    let mut out = left.to_js_string();
                    let right = right.to_js_string();
                    check_string_length(out.len().saturating_add(right.len()))?;
                    out.push_str(&right);
                    Ok(Value::String(out))
                } else {
                    num(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Sub => num(left.to_number() - right.to_number()),
            BinaryOp::Mul => num(left.to_number() * right.to_number()),
            BinaryOp::Div => num(left.to_number() / right.to_number()),
            BinaryOp::Rem => num(left.to_number() % right.to_number()),
            BinaryOp::Pow => num(left.to_number().powf(right.to_number())),
            BinaryOp::Eq => Ok(Value::Bool(left.loose_equals(right))),
            BinaryOp::NotEq => Ok(Value::Bool(!left.loose_equals(right))),
            BinaryOp::StrictEq => Ok(Value::Bool(left.strict_equals(right))),
            BinaryOp::StrictNotEq => Ok(Value::Bool(!left.strict_equals(right))),
            BinaryOp::Lt => Ok(Value::Bool(compare(left, right, |o| o.is_lt()))),
            BinaryOp::Gt => Ok(Value::Bool(compare(left, right, |o| o.is_gt()))),
            BinaryOp::LtEq => Ok(Value::Bool(compare(left, right, |o| o.is_le()))),
            BinaryOp::GtEq => Ok(Value::Bool(compare(left, right, |o| o.is_ge()))),
            BinaryOp::BitAnd => num(f64::from(left.to_int32() & right.to_int32())),
            BinaryOp::BitOr => num(f64::from(left.to_int32() | right.to_int32())),
            BinaryOp::BitXor => num(f64::from(left.to_int32() ^ right.to_int32())),
            BinaryOp::Shl => num(f64::from(
                left.to_int32()
                    .wrapping_shl(to_uint32(right.to_number()) & 31),
            )),
            BinaryOp::Shr => num(f64::from(
                left.to_int32()
                    .wrapping_shr(to_uint32(right.to_number()) & 31),
            )),
            BinaryOp::UShr => num(f64::from(
                to_uint32(left.to_number()).wrapping_shr(to_uint32(right.to_number()) & 31),
            )),
            BinaryOp::In => {
                let key = self.property_key(left);
                Ok(Value::Bool(self.has_property(right, &key)?))
            }
            BinaryOp::InstanceOf => Ok(Value::Bool(self.instance_of(left, right)?)),
        }
    }

    fn has_property(&mut self, object: &Value, key: &str) -> Eval<bool> {
        match object {
            Value::Object(obj) => Ok(obj.borrow().contains(key)),
            Value::Array(items) => Ok(key == "length"
                || key
                    .parse::<usize>()
                    .is_ok_and(|idx| idx < items.borrow().len())),
            Value::Undefined
            | Value::Null
            | Value::Bool(_)
            | Value::Number(_)
            | Value::String(_) => {
                throw(
                    ErrorKind::TypeError,
                    format!(
                        "Cannot use 'in' operator to search for '{key}' in {}",
                        object.to_js_string()
                    ),
                )
            }
            other => Ok(!matches!(self.get_property(other, key)?, Value::Undefined)),
        }
    }

    fn instance_of(&mut self, value: &Value, constructor: &Value) -> Eval<bool> {
        let Value::Native(native) = constructor else {
            if constructor.is_callable() {
                return Ok(false);
            }
            return throw(
                ErrorKind::TypeError,
                "Right-hand side of 'instanceof' is not callable",
            );
        };
        Ok(match (native, value) {
            (Native::Array, Value::Array(_)) => true,
            (Native::Object, value) => !matches!(
                value,
                Value::Undefined
                    | Value::Null
                    | Value::Bool(_)
                    | Value::Number(_)
                    | Value::String(_)
            ),
            (Native::Error(kind), Value::Object(obj)) => {
                let obj = obj.borrow();
                obj.class == ObjectClass::Error
                    && (*kind == ErrorKind::Error
                        || obj.get("name").map(Value::to_js_string).as_deref() == Some(kind.name()))
            }
            (Native::Date, Value::Date(_)) => true,
            (Native::RegExp, Value::RegExp(_)) => true,
            (Native::Event, Value::Event(_)) => true,
            _ => false,
        })
    }

    pub(crate) fn call_function(
        &mut self,
        func: &Value,
        this: Value,
        args: Vec<Value>,
    ) -> Eval<Value> {
        self.tick()?;
        match func {
            Value::Function(closure) => self.call_closure(closure, this, args),
            Value::Native(native) => self.call_native(*native, args),
            Value::Method(method) => {
                let (receiver, name) = &**method;
                self.call_method(receiver, name, args)
            }
            Value::Capability(capability) => self.call_capability(capability, args),
            other => throw(
                ErrorKind::TypeError,
                format!("{} is not a function", other.to_js_string()),
            ),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Rc<Closure>,
        this: Value,
        args: Vec<Value>,
    ) -> Eval<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return throw(ErrorKind::RangeError, "Maximum call stack size exceeded");
        }
        self.call_depth += 1;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            self.call_closure_inner(closure, this, args)
        });
        self.call_depth -= 1;
        result
    }

    fn call_closure_inner(
        &mut self,
        closure: &Rc<Closure>,
        this: Value,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let def = &closure.def;
        let scope = closure.env.child(!def.is_arrow);
        if !def.is_arrow {
            let this = closure.this.clone().unwrap_or(this);
            scope.declare("this", this, false);
            scope.declare("arguments", Value::array(args.clone()), true);
        }
        for (idx, param) in def.params.iter().enumerate() {
            let arg = args.get(idx).cloned().unwrap_or(Value::Undefined);
            self.bind_pattern(param, arg, &scope, BindMode::Declare { mutable: true })?;
        }
        if let Some(rest) = &def.rest {
            let remaining = args.get(def.params.len()..).unwrap_or_default().to_vec();
            self.bind_pattern(
                rest,
                Value::array(remaining),
                &scope,
                BindMode::Declare { mutable: true },
            )?;
        }
        match &def.body {
            FunctionBody::Expr(expr) => self.eval_expr(expr, &scope),
            FunctionBody::Block(body) => {
                hoist_vars(body, &scope);
                match self.exec_block_in(body, &scope)? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }

    fn construct(&mut self, constructor: &Value, args: Vec<Value>, callee: &Expr) -> Eval<Value> {
        match constructor {
            Value::Native(native) => self.construct_native(*native, args),
            Value::Function(closure) if !closure.def.is_arrow => {
                let instance = Value::object(ObjectValue::default());
                let result = self.call_closure(closure, instance.clone(), args)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) => result,
                    _ => instance,
                })
            }
            _ => throw(
                ErrorKind::TypeError,
                format!("{} is not a constructor", callee_description(callee)),
            ),
        }
    }

    /// Runs `source` as a classic script in `scope`. Parse failures surface
    /// as a thrown `SyntaxError`.
    pub(crate) fn eval_source(&mut self, source: &str, scope: &Scope) -> Eval<()> {
        let program = match parse_program(source) {
            Ok(program) => program,
            Err(err) => {
                let message = match err {
                    Error::ScriptParse(message) => message,
                    other => other.to_string(),
                };
                return throw(ErrorKind::SyntaxError, message);
            }
        };
        self.run_program(&program, scope)
    }

    /// Compiles an inline `on<event>` attribute body into a handler function.
    pub(crate) fn compile_handler(&mut self, body: &str) -> Option<Value> {
        let source = format!("(function (event) {{\n{body}\n}})");
        let program = parse_program(&source).ok()?;
        let [Stmt::Expr(Expr::Function(def))] = program.body.as_slice() else {
            return None;
        };
        Some(self.make_closure(def, &self.globals.clone()))
    }
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            value.clone()
        }
        other => Value::String(other.to_js_string()),
    }
}

fn compare(left: &Value, right: &Value, pick: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let left = to_primitive_number_hint(left);
    let right = to_primitive_number_hint(right);
    if let (Value::String(a), Value::String(b)) = (&left, &right) {
        return pick(a.encode_utf16().cmp(b.encode_utf16()));
    }
    let (a, b) = (left.to_number(), right.to_number());
    a.partial_cmp(&b).is_some_and(pick)
}

fn to_primitive_number_hint(value: &Value) -> Value {
    match value {
        Value::Date(ms) => Value::Number(*ms),
        other => to_primitive(other),
    }
}

fn callee_description(callee: &Expr) -> String {
    match callee {
        Expr::Ident(name) => name.clone(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{property}", callee_description(object)),
        Expr::Index { object, .. } => format!("{}[...]", callee_description(object)),
        Expr::Call { callee, .. } => format!("{}(...)", callee_description(callee)),
        Expr::This => "this".to_string(),
        Expr::OptionalChain(inner) => callee_description(inner),
        _ => "expression".to_string(),
    }
}
