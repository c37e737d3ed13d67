//! Single-pass Pratt-parsing compiler: no AST, no separate resolver pass.
//! Each grammar rule both parses its piece of the grammar and emits the
//! bytecode for it directly into the function currently being compiled,
//! resolving locals/upvalues/globals as it goes.

use crate::error::{CompileError, CompileErrors};
use crate::rules::{Precedence, get_rule};
use crate::scanner::{Scanner, Token, TokenKind};
use lox_core::Value;
use lox_runtime::chunk::OpCode;
use lox_runtime::heap::Heap;
use lox_runtime::objects::{LoxFunction, obj_ref};

const MAX_LOCALS: usize = u8::MAX as usize + 1;
const MAX_UPVALUES: usize = u8::MAX as usize + 1;
const MAX_PARAMS: usize = 255;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

struct Local<'src> {
    name: Token<'src>,
    /// `-1` means declared but not yet defined: the name is in scope for
    /// shadowing checks but cannot be read yet (guards `var a = a;`).
    depth: i32,
    is_captured: bool,
}

struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Per-function compile state, chained through `enclosing` the way nested
/// `fun` declarations nest lexically. Mirrors clox's `Compiler` struct;
/// named `FunctionScope` here to free up `Compiler` for the parser itself.
struct FunctionScope<'src> {
    enclosing: Option<Box<FunctionScope<'src>>>,
    function: *mut LoxFunction,
    function_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FunctionScope<'src> {
    fn new(
        enclosing: Option<Box<FunctionScope<'src>>>,
        function: *mut LoxFunction,
        function_type: FunctionType,
    ) -> FunctionScope<'src> {
        // Slot 0 is reserved: `this` for methods/initializers, or the
        // callee itself (unnamed) for plain functions and the script.
        let reserved_name = if function_type == FunctionType::Method
            || function_type == FunctionType::Initializer
        {
            "this"
        } else {
            ""
        };
        FunctionScope {
            enclosing,
            function,
            function_type,
            locals: vec![Local {
                name: Token {
                    kind: TokenKind::Identifier,
                    lexeme: reserved_name,
                    line: 0,
                },
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassScope {
    enclosing: Option<Box<ClassScope>>,
    has_superclass: bool,
}

pub struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: *mut Heap,
    scope: Box<FunctionScope<'src>>,
    class_scope: Option<Box<ClassScope>>,
    /// `PRINT_CODE`: disassemble each function's chunk as its compiler
    /// finishes with it, the way `endCompiler` does in clox.
    print_code: bool,
}

/// Compile `source` into a top-level `<script>` function, ready to hand to
/// `VM::run`. All interned strings and the function graph are allocated
/// through `heap`, so compile-time allocation participates in the same
/// collector as runtime allocation (see the `collect_if_needed` calls
/// below). Set `print_code` to disassemble every compiled function as its
/// compiler finishes with it, the way clox's `endCompiler` does.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    print_code: bool,
) -> Result<*mut LoxFunction, CompileErrors> {
    let function = heap.new_function(None);
    let scope = Box::new(FunctionScope::new(None, function, FunctionType::Script));
    let mut parser = Parser {
        scanner: Scanner::new(source),
        current: Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 0,
        },
        previous: Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 0,
        },
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        heap: heap as *mut Heap,
        scope,
        class_scope: None,
        print_code,
    };

    parser.advance();
    while !parser.check(TokenKind::Eof) {
        parser.declaration();
    }
    parser.consume(TokenKind::Eof, "Expect end of expression.");
    let (function, _) = parser.end_compiler();

    if parser.had_error {
        Err(CompileErrors(parser.errors))
    } else {
        Ok(function)
    }
}

impl<'src> Parser<'src> {
    fn heap(&mut self) -> &mut Heap {
        unsafe { &mut *self.heap }
    }

    fn chunk(&mut self) -> &mut lox_runtime::chunk::Chunk {
        unsafe { &mut (*self.scope.function).chunk }
    }

    /// Collection safepoint for allocations made while compiling. Only
    /// called right after a freshly allocated object (identifier/literal
    /// string, finished nested function) has been stored in a chunk's
    /// constant pool, so every object reachable only through the current
    /// function chain is already rooted by the time this may collect.
    fn collect_if_needed(&mut self) {
        if !self.heap().should_collect() {
            return;
        }
        let mut functions: Vec<*mut LoxFunction> = Vec::new();
        {
            let mut cur: &FunctionScope<'src> = &self.scope;
            loop {
                functions.push(cur.function);
                match &cur.enclosing {
                    Some(enclosing) => cur = &**enclosing,
                    None => break,
                }
            }
        }
        self.heap().collect_garbage(|h| {
            for f in &functions {
                h.mark_object(obj_ref(*f));
            }
        });
    }

    // -- Token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let text = if token.kind == TokenKind::Eof {
            format!("Error at end: {message}")
        } else if token.kind == TokenKind::Error {
            message.to_string()
        } else {
            format!("Error at '{}': {message}", token.lexeme)
        };
        self.errors.push(CompileError::new(token.line, text));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // -- Emission -----------------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.chunk().write_op(op, line);
    }

    fn emit_ops(&mut self, a: OpCode, b: u8) {
        self.emit_op(a);
        self.emit_byte(b);
    }

    fn emit_constant(&mut self, value: Value) {
        match self.chunk().add_constant(value) {
            Some(index) => self.emit_ops(OpCode::Constant, index),
            None => self.error("Too many constants in one chunk."),
        }
    }

    fn make_identifier_constant(&mut self, name: &str) -> u8 {
        let ptr = self.heap().copy_string(name);
        let value = Value::obj(obj_ref(ptr));
        match self.chunk().add_constant(value) {
            Some(index) => {
                self.collect_if_needed();
                index
            }
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.chunk().patch_short(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    fn emit_return(&mut self) {
        if self.scope.function_type == FunctionType::Initializer {
            self.emit_ops(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    /// Finish the function currently being compiled and pop back to its
    /// enclosing scope (a no-op at the top level, which has none). Returns
    /// the finished function together with its upvalue descriptors, since
    /// those describe how the *enclosing* scope's `OP_CLOSURE` operands
    /// should be emitted once we're back there.
    fn end_compiler(&mut self) -> (*mut LoxFunction, Vec<UpvalueDesc>) {
        self.emit_return();
        let function = self.scope.function;
        if self.print_code && !self.had_error {
            let name = match unsafe { (*function).name } {
                Some(n) => unsafe { (*n).as_str().to_string() },
                None => "<script>".to_string(),
            };
            lox_runtime::debug::disassemble_chunk(unsafe { &(*function).chunk }, &name);
        }
        let upvalues = std::mem::take(&mut self.scope.upvalues);
        if let Some(enclosing) = self.scope.enclosing.take() {
            self.scope = enclosing;
        }
        (function, upvalues)
    }

    // -- Scopes and locals --------------------------------------------------

    fn begin_scope(&mut self) {
        self.scope.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope.scope_depth -= 1;
        while let Some(local) = self.scope.locals.last() {
            if local.depth <= self.scope.scope_depth {
                break;
            }
            if self.scope.locals.last().unwrap().is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.scope.locals.pop();
        }
    }

    fn identifiers_equal(a: Token, b: Token) -> bool {
        a.lexeme == b.lexeme
    }

    fn resolve_local(scope: &FunctionScope<'src>, name: Token<'src>) -> Option<u8> {
        for (i, local) in scope.locals.iter().enumerate().rev() {
            if Self::identifiers_equal(local.name, name) {
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(
        scope: &mut FunctionScope<'src>,
        name: Token<'src>,
        overflowed: &mut bool,
    ) -> Option<u8> {
        let enclosing = scope.enclosing.as_mut()?;
        if let Some(local_index) = Self::resolve_local(&**enclosing, name) {
            enclosing.locals[local_index as usize].is_captured = true;
            return Some(Self::add_upvalue(scope, local_index, true, overflowed));
        }
        if let Some(upvalue_index) = Self::resolve_upvalue(&mut **enclosing, name, overflowed) {
            return Some(Self::add_upvalue(scope, upvalue_index, false, overflowed));
        }
        None
    }

    fn add_upvalue(
        scope: &mut FunctionScope<'src>,
        index: u8,
        is_local: bool,
        overflowed: &mut bool,
    ) -> u8 {
        for (i, up) in scope.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if scope.upvalues.len() >= MAX_UPVALUES {
            *overflowed = true;
            return (MAX_UPVALUES - 1) as u8;
        }
        scope.upvalues.push(UpvalueDesc { index, is_local });
        unsafe {
            (*scope.function).upvalue_count = scope.upvalues.len();
        }
        (scope.upvalues.len() - 1) as u8
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.scope.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.scope.locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.scope.scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let mut duplicate = false;
        for local in self.scope.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.scope.scope_depth {
                break;
            }
            if Self::identifiers_equal(local.name, name) {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.scope.scope_depth == 0 {
            return;
        }
        let depth = self.scope.scope_depth;
        if let Some(local) = self.scope.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.scope.scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.to_string();
        self.make_identifier_constant(&name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.scope.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_ops(OpCode::DefineGlobal, global);
    }

    // -- Declarations ---------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.make_identifier_constant(class_name.lexeme);
        self.declare_variable();
        self.emit_ops(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.class_scope = Some(Box::new(ClassScope {
            enclosing: self.class_scope.take(),
            has_superclass: false,
        }));

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if Self::identifiers_equal(class_name, self.previous) {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(Token {
                kind: TokenKind::Super,
                lexeme: "super",
                line: class_name.line,
            });
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            self.class_scope.as_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let had_superclass = self.class_scope.as_ref().unwrap().has_superclass;
        if had_superclass {
            self.end_scope();
        }
        self.class_scope = self.class_scope.take().unwrap().enclosing;
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let constant = self.make_identifier_constant(name);
        let function_type = if name == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type);
        self.emit_ops(OpCode::Method, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        let name_str = self.previous.lexeme.to_string();
        let name = self.heap().copy_string(&name_str);
        let function = self.heap().new_function(Some(name));

        let placeholder = Box::new(FunctionScope::new(None, function, function_type));
        let enclosing = std::mem::replace(&mut self.scope, placeholder);
        self.scope.enclosing = Some(enclosing);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = unsafe { (*self.scope.function).arity };
                if arity as usize >= MAX_PARAMS {
                    self.error("Can't have more than 255 parameters.");
                } else {
                    unsafe {
                        (*self.scope.function).arity += 1;
                    }
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (compiled, upvalues) = self.end_compiler();
        let index = self.make_constant_function(compiled);
        self.emit_ops(OpCode::Closure, index);
        for up in upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(up.index);
        }
    }

    fn make_constant_function(&mut self, function: *mut LoxFunction) -> u8 {
        let value = Value::obj(obj_ref(function));
        match self.chunk().add_constant(value) {
            Some(index) => {
                self.collect_if_needed();
                index
            }
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    // -- Statements -------------------------------------------------------

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.scope.function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.scope.function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    // -- Expressions ------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = get_rule(self.previous.kind).prefix;
        let Some(prefix) = prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind).infix;
            if let Some(infix) = infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(f64::NAN);
        self.emit_constant(Value::number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let raw = self.previous.lexeme;
        let text = &raw[1..raw.len() - 1];
        let ptr = self.heap().copy_string(text);
        self.emit_constant(Value::obj(obj_ref(ptr)));
        self.collect_if_needed();
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(rule.precedence.next());
        match operator {
            TokenKind::BangEqual => self.emit_ops_simple(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops_simple(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops_simple(OpCode::Greater, OpCode::Not),
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!(),
        }
    }

    fn emit_ops_simple(&mut self, a: OpCode, b: OpCode) {
        self.emit_op(a);
        self.emit_op(b);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_ops(OpCode::Call, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count >= 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme.to_string();
        let constant = self.make_identifier_constant(&name);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_ops(OpCode::SetProperty, constant);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_ops(OpCode::Invoke, constant);
            self.emit_byte(arg_count);
        } else {
            self.emit_ops(OpCode::GetProperty, constant);
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn this(&mut self, _can_assign: bool) {
        if self.class_scope.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let name = self.previous;
        self.named_variable(name, false);
    }

    fn super_(&mut self, _can_assign: bool) {
        let error_msg = match &self.class_scope {
            None => Some("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                Some("Can't use 'super' in a class with no superclass.")
            }
            _ => None,
        };
        if let Some(msg) = error_msg {
            self.error(msg);
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method = self.previous.lexeme.to_string();
        let name_constant = self.make_identifier_constant(&method);

        let this_token = Token {
            kind: TokenKind::This,
            lexeme: "this",
            line: self.previous.line,
        };
        let super_token = Token {
            kind: TokenKind::Super,
            lexeme: "super",
            line: self.previous.line,
        };
        self.named_variable(this_token, false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(super_token, false);
            self.emit_ops(OpCode::SuperInvoke, name_constant);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(super_token, false);
            self.emit_ops(OpCode::GetSuper, name_constant);
        }
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let local_slot = Self::resolve_local(&self.scope, name);
        if let Some(slot) = local_slot {
            if self.scope.locals[slot as usize].depth == -1 {
                self.error("Can't read local variable in its own initializer.");
            }
        }
        let (get_op, set_op, arg) = if let Some(slot) = local_slot {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else {
            let mut overflowed = false;
            let upvalue_slot = Self::resolve_upvalue(&mut self.scope, name, &mut overflowed);
            if overflowed {
                self.error("Too many closure variables in function.");
            }
            if let Some(slot) = upvalue_slot {
                (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
            } else {
                let constant = self.make_identifier_constant(name.lexeme);
                (OpCode::GetGlobal, OpCode::SetGlobal, constant)
            }
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_ops(set_op, arg);
        } else {
            self.emit_ops(get_op, arg);
        }
    }
}
