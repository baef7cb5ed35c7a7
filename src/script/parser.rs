use super::*;

/// Deepest syntactic nesting a script may use; deeper sources are rejected
/// as syntax errors rather than exhausting the stack.
const MAX_NESTING: usize = 4_000;

const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof",
    "new", "return", "super", "switch", "throw", "try", "typeof", "var", "void", "while", "with",
];

pub(crate) fn parse_program(src: &str) -> Result<Program> {
    let mut parser = Parser::new(tokenize(src)?);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.parse_statement()?);
    }
    Ok(Program { body })
}

fn parse_expression_source(src: &str, depth: usize) -> Result<Expr> {
    let mut parser = Parser::new(tokenize(src)?);
    parser.depth = depth;
    let expr = parser.parse_expression()?;
    if !parser.at_eof() {
        return Err(parser.error("unexpected token in template substitution"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    no_in: bool,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            no_in: false,
            depth: 0,
        }
    }

    fn current(&self) -> &Spanned {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + offset).min(last)].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == punct)
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Ident(ident) if ident == name)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.is_ident(name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{punct}'")))
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let found = match self.peek() {
            Token::Eof => "end of input".to_string(),
            Token::Punct(p) => format!("'{p}'"),
            Token::Ident(name) => format!("'{name}'"),
            Token::Num(n) => format!("number {n}"),
            Token::Str(_) | Token::Template(_) => "string".to_string(),
            Token::Regex { .. } => "regular expression".to_string(),
        };
        Error::ScriptParse(format!(
            "{}, found {found} (line {})",
            message.into(),
            self.current().line
        ))
    }

    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting is too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `parse` one nesting level deeper, growing the stack when needed.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.descend()?;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || parse(self));
        self.depth -= 1;
        result
    }

    fn consume_semicolon(&mut self) -> Result<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        if self.is_punct("}") || self.at_eof() || self.current().newline_before {
            return Ok(());
        }
        Err(self.error("expected ';'"))
    }

    fn binding_name(&mut self) -> Result<String> {
        match self.peek().clone() {
            Token::Ident(name) if !RESERVED_WORDS.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn property_name(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            Token::Str(s) => Ok(s),
            Token::Num(n) => Ok(format_number(n)),
            _ => {
                self.pos -= 1;
                Err(self.error("expected property name"))
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt> {
        if self.eat_punct("{") {
            return Ok(Stmt::Block(self.parse_block_body()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        let Token::Ident(word) = self.peek().clone() else {
            return self.parse_expression_statement();
        };
        match word.as_str() {
            "var" | "const" => {
                self.pos += 1;
                let kind = if word == "var" { VarKind::Var } else { VarKind::Const };
                let stmt = self.parse_var_declarations(kind)?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
            "let" if matches!(self.peek_at(1), Token::Ident(_))
                || matches!(self.peek_at(1), Token::Punct("[" | "{")) =>
            {
                self.pos += 1;
                let stmt = self.parse_var_declarations(VarKind::Let)?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
            "function" => {
                self.pos += 1;
                Ok(Stmt::FunctionDecl(Rc::new(self.parse_function_rest(true)?)))
            }
            "async" if matches!(self.peek_at(1), Token::Ident(name) if name == "function") => {
                self.pos += 2;
                Ok(Stmt::FunctionDecl(Rc::new(self.parse_function_rest(true)?)))
            }
            "if" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let cond = self.parse_expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.eat_ident("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            "while" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let cond = self.parse_expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { cond, body })
            }
            "do" => {
                self.pos += 1;
                let body = Box::new(self.parse_statement()?);
                if !self.eat_ident("while") {
                    return Err(self.error("expected 'while'"));
                }
                self.expect_punct("(")?;
                let cond = self.parse_expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body, cond })
            }
            "for" => {
                self.pos += 1;
                self.parse_for()
            }
            "return" => {
                self.pos += 1;
                let value = if self.is_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                    || self.current().newline_before
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            "break" => {
                self.pos += 1;
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.pos += 1;
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.pos += 1;
                if self.current().newline_before {
                    return Err(self.error("illegal newline after throw"));
                }
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            "try" => {
                self.pos += 1;
                self.parse_try()
            }
            "switch" => {
                self.pos += 1;
                self.parse_switch()
            }
            "class" => Err(self.error("class declarations are not supported")),
            "import" | "export" => Err(self.error("modules are not supported")),
            "debugger" => {
                self.pos += 1;
                self.consume_semicolon()?;
                Ok(Stmt::Empty)
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.error("expected '}'"));
            }
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_braced_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_punct("{")?;
        self.parse_block_body()
    }

    fn parse_var_declarations(&mut self, kind: VarKind) -> Result<Stmt> {
        let mut decls = Vec::new();
        loop {
            let pattern = self.parse_binding_pattern()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if init.is_none() && kind == VarKind::Const && !self.no_in {
                return Err(self.error("missing initializer in const declaration"));
            }
            decls.push((pattern, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::VarDecl { kind, decls })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect_punct("(")?;
        let kind = match self.peek() {
            Token::Ident(word) if word == "var" => Some(VarKind::Var),
            Token::Ident(word) if word == "let" => Some(VarKind::Let),
            Token::Ident(word) if word == "const" => Some(VarKind::Const),
            _ => None,
        };

        let saved_no_in = self.no_in;
        self.no_in = true;
        let init = if let Some(kind) = kind {
            self.pos += 1;
            let pattern = self.parse_binding_pattern()?;
            if let Some(stmt) = self.parse_for_in_of_rest(Some(kind), pattern.clone())? {
                self.no_in = saved_no_in;
                return Ok(stmt);
            }
            let first_init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            let mut decls = vec![(pattern, first_init)];
            while self.eat_punct(",") {
                let pattern = self.parse_binding_pattern()?;
                let init = if self.eat_punct("=") {
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                decls.push((pattern, init));
            }
            Some(Box::new(Stmt::VarDecl { kind, decls }))
        } else if self.is_punct(";") {
            None
        } else {
            let expr = self.parse_expression()?;
            if self.is_ident("of") || self.is_ident("in") {
                let pattern = self.expr_to_pattern(expr)?;
                if let Some(stmt) = self.parse_for_in_of_rest(None, pattern)? {
                    self.no_in = saved_no_in;
                    return Ok(stmt);
                }
                return Err(self.error("invalid for statement"));
            }
            Some(Box::new(Stmt::Expr(expr)))
        };
        self.no_in = saved_no_in;

        self.expect_punct(";")?;
        let cond = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn parse_for_in_of_rest(
        &mut self,
        kind: Option<VarKind>,
        target: Pattern,
    ) -> Result<Option<Stmt>> {
        let is_of = self.is_ident("of");
        if !is_of && !self.is_ident("in") {
            return Ok(None);
        }
        self.pos += 1;
        self.no_in = false;
        let source = if is_of {
            self.parse_assignment()?
        } else {
            self.parse_expression()?
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Some(if is_of {
            Stmt::ForOf {
                kind,
                target,
                iterable: source,
                body,
            }
        } else {
            Stmt::ForIn {
                kind,
                target,
                object: source,
                body,
            }
        }))
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let block = self.parse_braced_block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_ident("catch") {
            if self.eat_punct("(") {
                param = Some(self.parse_binding_pattern()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.parse_braced_block()?);
        }
        let finalizer = if self.eat_ident("finally") {
            Some(self.parse_braced_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn parse_switch(&mut self) -> Result<Stmt> {
        self.expect_punct("(")?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_ident("case") {
                Some(self.parse_expression()?)
            } else if self.eat_ident("default") {
                None
            } else {
                return Err(self.error("expected 'case' or 'default'"));
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !self.is_ident("case") && !self.is_ident("default") && !self.is_punct("}") {
                if self.at_eof() {
                    return Err(self.error("expected '}'"));
                }
                body.push(self.parse_statement()?);
            }
            cases.push((test, body));
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    fn parse_binding_pattern(&mut self) -> Result<Pattern> {
        if self.eat_punct("[") {
            let mut items = Vec::new();
            let mut rest = None;
            while !self.eat_punct("]") {
                if self.eat_punct(",") {
                    items.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.parse_binding_pattern()?));
                    self.expect_punct("]")?;
                    break;
                }
                items.push(Some(self.parse_binding_element()?));
                if !self.is_punct("]") {
                    self.expect_punct(",")?;
                }
            }
            return Ok(Pattern::Array { items, rest });
        }
        if self.eat_punct("{") {
            let mut props = Vec::new();
            let mut rest = None;
            while !self.eat_punct("}") {
                if self.eat_punct("...") {
                    rest = Some(Box::new(Pattern::Ident(self.binding_name()?)));
                    self.expect_punct("}")?;
                    break;
                }
                let key = if self.eat_punct("[") {
                    let expr = self.parse_assignment()?;
                    self.expect_punct("]")?;
                    PropKey::Computed(Box::new(expr))
                } else {
                    PropKey::Static(self.property_name()?)
                };
                let value = if self.eat_punct(":") {
                    self.parse_binding_element()?
                } else {
                    let PropKey::Static(name) = &key else {
                        return Err(self.error("expected ':'"));
                    };
                    let pattern = Pattern::Ident(name.clone());
                    if self.eat_punct("=") {
                        Pattern::Default(Box::new(pattern), Box::new(self.parse_assignment()?))
                    } else {
                        pattern
                    }
                };
                props.push((key, value));
                if !self.is_punct("}") {
                    self.expect_punct(",")?;
                }
            }
            return Ok(Pattern::Object { props, rest });
        }
        Ok(Pattern::Ident(self.binding_name()?))
    }

    fn parse_binding_element(&mut self) -> Result<Pattern> {
        let pattern = self.parse_binding_pattern()?;
        if self.eat_punct("=") {
            let default = self.parse_assignment()?;
            return Ok(Pattern::Default(Box::new(pattern), Box::new(default)));
        }
        Ok(pattern)
    }

    fn expr_to_pattern(&self, expr: Expr) -> Result<Pattern> {
        match expr {
            Expr::Ident(name) => Ok(Pattern::Ident(name)),
            Expr::Member { optional: false, .. } | Expr::Index { optional: false, .. } => {
                Ok(Pattern::Target(Box::new(expr)))
            }
            Expr::Array(items) => {
                let mut out = Vec::new();
                let mut rest = None;
                for item in items {
                    match item {
                        ArrayItem::Hole => out.push(None),
                        ArrayItem::Item(expr) => out.push(Some(self.expr_to_pattern(expr)?)),
                        ArrayItem::Spread(expr) => {
                            rest = Some(Box::new(self.expr_to_pattern(expr)?));
                        }
                    }
                }
                Ok(Pattern::Array { items: out, rest })
            }
            Expr::Object(props) => {
                let mut out = Vec::new();
                let mut rest = None;
                for prop in props {
                    match prop {
                        PropDef::Value(key, value) => out.push((key, self.expr_to_pattern(value)?)),
                        PropDef::Spread(expr) => {
                            rest = Some(Box::new(self.expr_to_pattern(expr)?));
                        }
                    }
                }
                Ok(Pattern::Object { props: out, rest })
            }
            Expr::Assign {
                op: AssignOp::Assign,
                target,
                value,
            } => Ok(Pattern::Default(target, value)),
            _ => Err(self.error("invalid assignment target")),
        }
    }

    pub(super) fn parse_expression(&mut self) -> Result<Expr> {
        let first = self.parse_assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.parse_assignment_inner())
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        if self.is_ident("yield") {
            return Err(self.error("generators are not supported"));
        }

        let left = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Punct("=") => AssignOp::Assign,
            Token::Punct("+=") => AssignOp::Arith(BinaryOp::Add),
            Token::Punct("-=") => AssignOp::Arith(BinaryOp::Sub),
            Token::Punct("*=") => AssignOp::Arith(BinaryOp::Mul),
            Token::Punct("/=") => AssignOp::Arith(BinaryOp::Div),
            Token::Punct("%=") => AssignOp::Arith(BinaryOp::Rem),
            Token::Punct("**=") => AssignOp::Arith(BinaryOp::Pow),
            Token::Punct("<<=") => AssignOp::Arith(BinaryOp::Shl),
            Token::Punct(">>=") => AssignOp::Arith(BinaryOp::Shr),
            Token::Punct(">>>=") => AssignOp::Arith(BinaryOp::UShr),
            Token::Punct("&=") => AssignOp::Arith(BinaryOp::BitAnd),
            Token::Punct("|=") => AssignOp::Arith(BinaryOp::BitOr),
            Token::Punct("^=") => AssignOp::Arith(BinaryOp::BitXor),
            Token::Punct("&&=") => AssignOp::Logical(LogicalOp::And),
            Token::Punct("||=") => AssignOp::Logical(LogicalOp::Or),
            Token::Punct("??=") => AssignOp::Logical(LogicalOp::Nullish),
            _ => return Ok(left),
        };
        self.pos += 1;
        let target = match op {
            AssignOp::Assign => self.expr_to_pattern(left)?,
            _ => match left {
                Expr::Ident(name) => Pattern::Ident(name),
                expr @ (Expr::Member { .. } | Expr::Index { .. }) => {
                    Pattern::Target(Box::new(expr))
                }
                _ => return Err(self.error("invalid assignment target")),
            },
        };
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn try_parse_arrow(&mut self) -> Result<Option<Expr>> {
        let start = self.pos;
        if self.is_ident("async")
            && !self.tokens.get(self.pos + 1).is_some_and(|t| t.newline_before)
            && (matches!(self.peek_at(1), Token::Punct("("))
                || (matches!(self.peek_at(1), Token::Ident(_))
                    && matches!(self.peek_at(2), Token::Punct("=>"))))
        {
            self.pos += 1;
        }

        let params = match self.peek().clone() {
            Token::Ident(name)
                if matches!(self.peek_at(1), Token::Punct("=>"))
                    && !RESERVED_WORDS.contains(&name.as_str()) =>
            {
                self.pos += 1;
                (vec![Pattern::Ident(name)], None)
            }
            Token::Punct("(") if self.paren_followed_by_arrow() => {
                self.pos += 1;
                self.parse_params_rest()?
            }
            _ => {
                self.pos = start;
                return Ok(None);
            }
        };
        self.expect_punct("=>")?;

        let body = if self.eat_punct("{") {
            FunctionBody::Block(self.parse_block_body()?)
        } else {
            let saved = self.no_in;
            self.no_in = false;
            let expr = self.parse_assignment()?;
            self.no_in = saved;
            FunctionBody::Expr(Box::new(expr))
        };
        Ok(Some(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params: params.0,
            rest: params.1,
            body,
            is_arrow: true,
        }))))
    }

    fn paren_followed_by_arrow(&self) -> bool {
        let mut depth = 0usize;
        for (offset, spanned) in self.tokens[self.pos..].iter().enumerate() {
            match &spanned.token {
                Token::Punct("(" | "[" | "{") => depth += 1,
                Token::Punct(")" | "]" | "}") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(self.pos + offset + 1).map(|t| &t.token),
                            Some(Token::Punct("=>"))
                        );
                    }
                }
                Token::Eof => return false,
                _ => {}
            }
        }
        false
    }

    /// Parses a parameter list after the opening `(`, consuming the `)`.
    fn parse_params_rest(&mut self) -> Result<(Vec<Pattern>, Option<Pattern>)> {
        let mut params = Vec::new();
        let mut rest = None;
        while !self.eat_punct(")") {
            if self.eat_punct("...") {
                rest = Some(self.parse_binding_pattern()?);
                self.eat_punct(",");
                self.expect_punct(")")?;
                break;
            }
            params.push(self.parse_binding_element()?);
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        Ok((params, rest))
    }

    fn parse_function_rest(&mut self, require_name: bool) -> Result<FunctionDef> {
        if self.eat_punct("*") {
            return Err(self.error("generators are not supported"));
        }
        let name = if matches!(self.peek(), Token::Ident(_)) && !self.is_punct("(") {
            Some(self.binding_name()?)
        } else if require_name {
            return Err(self.error("function declaration requires a name"));
        } else {
            None
        };
        self.parse_function_tail(name)
    }

    fn parse_function_tail(&mut self, name: Option<String>) -> Result<FunctionDef> {
        self.expect_punct("(")?;
        let saved = self.no_in;
        self.no_in = false;
        let (params, rest) = self.parse_params_rest()?;
        let body = FunctionBody::Block(self.parse_braced_block()?);
        self.no_in = saved;
        Ok(FunctionDef {
            name,
            params,
            rest,
            body,
            is_arrow: false,
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let saved = self.no_in;
        self.no_in = false;
        let then = self.parse_assignment()?;
        self.no_in = saved;
        self.expect_punct(":")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary_operator(&self) -> Option<(u8, InfixOp)> {
        let op = match self.peek() {
            Token::Punct("??") => (1, InfixOp::Logical(LogicalOp::Nullish)),
            Token::Punct("||") => (1, InfixOp::Logical(LogicalOp::Or)),
            Token::Punct("&&") => (2, InfixOp::Logical(LogicalOp::And)),
            Token::Punct("|") => (3, InfixOp::Binary(BinaryOp::BitOr)),
            Token::Punct("^") => (4, InfixOp::Binary(BinaryOp::BitXor)),
            Token::Punct("&") => (5, InfixOp::Binary(BinaryOp::BitAnd)),
            Token::Punct("==") => (6, InfixOp::Binary(BinaryOp::Eq)),
            Token::Punct("!=") => (6, InfixOp::Binary(BinaryOp::NotEq)),
            Token::Punct("===") => (6, InfixOp::Binary(BinaryOp::StrictEq)),
            Token::Punct("!==") => (6, InfixOp::Binary(BinaryOp::StrictNotEq)),
            Token::Punct("<") => (7, InfixOp::Binary(BinaryOp::Lt)),
            Token::Punct(">") => (7, InfixOp::Binary(BinaryOp::Gt)),
            Token::Punct("<=") => (7, InfixOp::Binary(BinaryOp::LtEq)),
            Token::Punct(">=") => (7, InfixOp::Binary(BinaryOp::GtEq)),
            Token::Ident(word) if word == "instanceof" => {
                (7, InfixOp::Binary(BinaryOp::InstanceOf))
            }
            Token::Ident(word) if word == "in" && !self.no_in => (7, InfixOp::Binary(BinaryOp::In)),
            Token::Punct("<<") => (8, InfixOp::Binary(BinaryOp::Shl)),
            Token::Punct(">>") => (8, InfixOp::Binary(BinaryOp::Shr)),
            Token::Punct(">>>") => (8, InfixOp::Binary(BinaryOp::UShr)),
            Token::Punct("+") => (9, InfixOp::Binary(BinaryOp::Add)),
            Token::Punct("-") => (9, InfixOp::Binary(BinaryOp::Sub)),
            Token::Punct("*") => (10, InfixOp::Binary(BinaryOp::Mul)),
            Token::Punct("/") => (10, InfixOp::Binary(BinaryOp::Div)),
            Token::Punct("%") => (10, InfixOp::Binary(BinaryOp::Rem)),
            Token::Punct("**") => (11, InfixOp::Binary(BinaryOp::Pow)),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let depth = self.depth;
        let mut left = self.parse_unary()?;
        while let Some((prec, op)) = self.binary_operator() {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            self.descend()?;
            // `**` is right-associative; everything else binds left.
            let next_min = if prec == 11 { prec } else { prec + 1 };
            let right = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                self.parse_binary(next_min)
            })?;
            left = match op {
                InfixOp::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                InfixOp::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Punct("!") => Some(UnaryOp::Not),
            Token::Punct("-") => Some(UnaryOp::Neg),
            Token::Punct("+") => Some(UnaryOp::Plus),
            Token::Punct("~") => Some(UnaryOp::BitNot),
            Token::Ident(word) if word == "typeof" => Some(UnaryOp::TypeOf),
            Token::Ident(word) if word == "void" => Some(UnaryOp::Void),
            Token::Ident(word) if word == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let arg = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
            });
        }
        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.pos += 1;
            let target = self.parse_unary()?;
            self.check_update_target(&target)?;
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }
        if self.is_ident("await") {
            self.pos += 1;
            let arg = self.parse_unary()?;
            return Ok(Expr::Await(Box::new(arg)));
        }
        self.parse_postfix()
    }

    fn check_update_target(&self, target: &Expr) -> Result<()> {
        match target {
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. } => Ok(()),
            _ => Err(self.error("invalid update target")),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.current().newline_before {
            let increment = self.is_punct("++");
            self.check_update_target(&expr)?;
            self.pos += 1;
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<ArrayItem>> {
        let saved = self.no_in;
        self.no_in = false;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            if self.eat_punct("...") {
                args.push(ArrayItem::Spread(self.parse_assignment()?));
            } else {
                args.push(ArrayItem::Item(self.parse_assignment()?));
            }
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        self.no_in = saved;
        Ok(args)
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut expr = if self.eat_ident("new") {
            let callee = self.parse_new_callee()?;
            let args = if self.eat_punct("(") {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            Expr::New {
                callee: Box::new(callee),
                args,
            }
        } else {
            self.parse_primary()?
        };

        let mut has_optional = false;
        loop {
            if self.is_punct(".")
                || self.is_punct("?.")
                || self.is_punct("[")
                || self.is_punct("(")
            {
                self.descend()?;
            }
            if self.eat_punct(".") {
                let property = self.member_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                has_optional = true;
                if self.eat_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let index = self.parse_bracket_index()?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.member_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.parse_bracket_index()?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.eat_punct("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else if matches!(self.peek(), Token::Template(_)) {
                return Err(self.error("tagged templates are not supported"));
            } else {
                break;
            }
        }
        self.depth = depth;
        if has_optional {
            expr = Expr::OptionalChain(Box::new(expr));
        }
        Ok(expr)
    }

    fn parse_bracket_index(&mut self) -> Result<Expr> {
        let saved = self.no_in;
        self.no_in = false;
        let index = self.parse_expression()?;
        self.no_in = saved;
        self.expect_punct("]")?;
        Ok(index)
    }

    fn member_name(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            _ => {
                self.pos -= 1;
                Err(self.error("expected property name after '.'"))
            }
        }
    }

    fn parse_new_callee(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.member_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("[") {
                let index = self.parse_bracket_index()?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Num(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Template(parts) => {
                let mut segments = Vec::with_capacity(parts.len());
                for part in parts {
                    segments.push(match part {
                        TemplatePart::Str(s) => TemplateSegment::Str(s),
                        TemplatePart::Expr(src) => {
                            TemplateSegment::Expr(parse_expression_source(&src, self.depth)?)
                        }
                    });
                }
                Ok(Expr::Template(segments))
            }
            Token::Regex { pattern, flags } => Ok(Expr::Regex { pattern, flags }),
            Token::Punct("(") => {
                let saved = self.no_in;
                self.no_in = false;
                let expr = self.parse_expression()?;
                self.no_in = saved;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => self.parse_array_literal(),
            Token::Punct("{") => self.parse_object_literal(),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "this" => Ok(Expr::This),
                "function" => Ok(Expr::Function(Rc::new(self.parse_function_rest(false)?))),
                "async" if self.is_ident("function") => {
                    self.pos += 1;
                    Ok(Expr::Function(Rc::new(self.parse_function_rest(false)?)))
                }
                "class" => {
                    self.pos -= 1;
                    Err(self.error("class expressions are not supported"))
                }
                other if RESERVED_WORDS.contains(&other) => {
                    self.pos -= 1;
                    Err(self.error("unexpected keyword"))
                }
                _ => Ok(Expr::Ident(word)),
            },
            _ => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr> {
        let saved = self.no_in;
        self.no_in = false;
        let mut items = Vec::new();
        while !self.eat_punct("]") {
            if self.eat_punct(",") {
                items.push(ArrayItem::Hole);
                continue;
            }
            if self.eat_punct("...") {
                items.push(ArrayItem::Spread(self.parse_assignment()?));
            } else {
                items.push(ArrayItem::Item(self.parse_assignment()?));
            }
            if !self.is_punct("]") {
                self.expect_punct(",")?;
            }
        }
        self.no_in = saved;
        Ok(Expr::Array(items))
    }

    fn parse_object_literal(&mut self) -> Result<Expr> {
        let saved = self.no_in;
        self.no_in = false;
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                props.push(PropDef::Spread(self.parse_assignment()?));
            } else {
                if (self.is_ident("get") || self.is_ident("set"))
                    && !matches!(self.peek_at(1), Token::Punct("(" | ":" | "," | "}"))
                {
                    return Err(self.error("accessor properties are not supported"));
                }
                if self.is_ident("async")
                    && !matches!(self.peek_at(1), Token::Punct("(" | ":" | "," | "}"))
                {
                    self.pos += 1;
                }
                let key = if self.eat_punct("[") {
                    let expr = self.parse_assignment()?;
                    self.expect_punct("]")?;
                    PropKey::Computed(Box::new(expr))
                } else {
                    PropKey::Static(self.property_name()?)
                };
                let value = if self.eat_punct(":") {
                    self.parse_assignment()?
                } else if self.is_punct("(") {
                    let name = match &key {
                        PropKey::Static(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    Expr::Function(Rc::new(self.parse_function_tail(name)?))
                } else {
                    let PropKey::Static(name) = &key else {
                        return Err(self.error("expected ':'"));
                    };
                    if self.is_punct("=") {
                        // Only valid as a destructuring target: `({ a = 1 } = obj)`.
                        self.pos += 1;
                        let default = self.parse_assignment()?;
                        Expr::Assign {
                            op: AssignOp::Assign,
                            target: Box::new(Pattern::Ident(name.clone())),
                            value: Box::new(default),
                        }
                    } else {
                        Expr::Ident(name.clone())
                    }
                };
                props.push(PropDef::Value(key, value));
            }
            if !self.is_punct("}") {
                self.expect_punct(",")?;
            }
        }
        self.no_in = saved;
        Ok(Expr::Object(props))
    }
}

/// Binary operators build `Expr::Binary`; short-circuiting ones build `Expr::Logical`.
#[derive(Debug, Clone, Copy)]
enum InfixOp {
    Binary(BinaryOp),
    Logical(LogicalOp),
}
