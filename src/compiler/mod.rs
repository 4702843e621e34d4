//! AST to bytecode.
//!
//! One [`CompilationScope`] per function body being compiled, each paired with
//! a [`SymbolTable`] chained to its parent's. Forward jumps are emitted with a
//! placeholder target and backpatched once the target offset is known.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::*;
use crate::code::{self, CodeError, Instructions, Opcode, STEP_POSTFIX, STEP_PREFIX};
use crate::object::{CompiledFunction, HashKey, Object};

pub mod symbol_table;

pub use symbol_table::{Symbol, SymbolError, SymbolScope, SymbolTable};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("undefined identifier: {name}")]
    UnresolvedIdentifier { name: String, span: Span },
    #[error("'{name}' is already defined in this scope")]
    DuplicateDefinition { name: String, span: Span },
    #[error("not implemented: {what}")]
    NotImplemented { what: String, span: Span },
    #[error("cannot assign to '{name}': {scope:?} bindings are read-only")]
    InvalidAssignment { name: String, scope: SymbolScope, span: Span },
    #[error("too many arguments in call: {count} (max 255)")]
    TooManyArguments { count: usize, span: Span },
    #[error("too many local bindings in one function (max 256)")]
    TooManyLocals { span: Span },
    #[error("too many constants (max 65536)")]
    TooManyConstants,
    #[error(transparent)]
    Code(#[from] CodeError),
    #[error("internal compiler error: {0}")]
    Internal(&'static str),
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::UnresolvedIdentifier { span, .. }
            | CompileError::DuplicateDefinition { span, .. }
            | CompileError::NotImplemented { span, .. }
            | CompileError::InvalidAssignment { span, .. }
            | CompileError::TooManyArguments { span, .. }
            | CompileError::TooManyLocals { span } => Some(*span),
            CompileError::TooManyConstants | CompileError::Code(_) | CompileError::Internal(_) => None,
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Placeholder jump target, overwritten by `change_operand`.
const PLACEHOLDER: usize = 9999;
const MAX_CONSTANTS: usize = u16::MAX as usize + 1;
const MAX_LOCALS: usize = u8::MAX as usize + 1;
const MAX_ARGS: usize = u8::MAX as usize;

/// Compiled program: main instruction stream plus the constant pool.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

/// Listing of the main stream followed by the constant pool; function
/// constants are disassembled in place, indented.
impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== main ==")?;
        f.write_str(&code::disassemble(&self.instructions))?;
        if self.constants.is_empty() {
            return Ok(());
        }
        writeln!(f, "== constants ==")?;
        for (i, constant) in self.constants.iter().enumerate() {
            writeln!(f, "{:04} {}", i, constant)?;
            if let Object::CompiledFunction(function) = constant {
                for line in code::disassemble(&function.instructions).lines() {
                    writeln!(f, "     {}", line)?;
                }
            }
        }
        Ok(())
    }
}

/// Everything a compiler carries from one REPL input to the next.
#[derive(Debug, Clone, Default)]
pub struct CompilerState {
    pub symbol_table: SymbolTable,
    pub constants: Vec<Object>,
    constant_index: HashMap<HashKey, usize>,
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    constant_index: HashMap<HashKey, usize>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler::with_state(CompilerState::default())
    }

    /// Continue from an earlier compiler's globals and constant pool.
    pub fn with_state(state: CompilerState) -> Self {
        Compiler {
            constants: state.constants,
            constant_index: state.constant_index,
            symbol_table: state.symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    pub fn into_state(self) -> CompilerState {
        CompilerState {
            symbol_table: self.symbol_table,
            constants: self.constants,
            constant_index: self.constant_index,
        }
    }

    pub fn compile(&mut self, program: &Program) -> Result<()> {
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }
        debug!(
            instructions = self.current_instructions().len(),
            constants = self.constants.len(),
            "compiled program"
        );
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_instructions().clone(),
            constants: self.constants.clone(),
        }
    }

    // ---- Statements ----

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, &[])?;
            }
            Stmt::Let { name, value, span } => {
                self.compile_expr(value)?;
                let symbol = self.symbol_table.define(name).map_err(|_| CompileError::DuplicateDefinition {
                    name: name.clone(),
                    span: *span,
                })?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index])?,
                    _ => {
                        if symbol.index >= MAX_LOCALS {
                            return Err(CompileError::TooManyLocals { span: *span });
                        }
                        self.emit(Opcode::SetLocal, &[symbol.index])?
                    }
                };
            }
            Stmt::Return { value, span } => {
                if self.scopes.len() == 1 {
                    return Err(CompileError::NotImplemented {
                        what: "return outside of a function".into(),
                        span: *span,
                    });
                }
                match value {
                    Some(value) => {
                        self.compile_expr(value)?;
                        self.emit(Opcode::ReturnValue, &[])?;
                    }
                    None => {
                        self.emit(Opcode::Return, &[])?;
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<()> {
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// Compile an `if` branch so it leaves exactly one value on the stack.
    fn compile_branch(&mut self, block: &Block) -> Result<()> {
        self.compile_block(block)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        } else {
            self.emit(Opcode::Null, &[])?;
        }
        Ok(())
    }

    // ---- Expressions ----

    fn compile_expr(&mut self, expr: &ExprNode) -> Result<()> {
        let span = expr.span;
        match &expr.node {
            Expr::Integer(n) => self.emit_constant(Object::Integer(*n))?,
            Expr::Double(n) => self.emit_constant(Object::Double(*n))?,
            Expr::Str(s) => self.emit_constant(Object::string(s.as_str()))?,
            Expr::Boolean(true) => {
                self.emit(Opcode::True, &[])?;
            }
            Expr::Boolean(false) => {
                self.emit(Opcode::False, &[])?;
            }
            Expr::Null => {
                self.emit(Opcode::Null, &[])?;
            }

            Expr::Ident(name) => {
                let symbol = self.resolve(name, span)?;
                self.load_symbol(&symbol)?;
            }

            Expr::Prefix { op, operand } => match op {
                PrefixOp::Minus => {
                    self.compile_expr(operand)?;
                    self.emit(Opcode::Minus, &[])?;
                }
                PrefixOp::Bang => {
                    self.compile_expr(operand)?;
                    self.emit(Opcode::Bang, &[])?;
                }
                PrefixOp::Increment => self.compile_step(Opcode::Increment, operand, false)?,
                PrefixOp::Decrement => self.compile_step(Opcode::Decrement, operand, false)?,
            },

            Expr::Postfix { op, operand } => {
                let opcode = match op {
                    PostfixOp::Increment => Opcode::Increment,
                    PostfixOp::Decrement => Opcode::Decrement,
                };
                self.compile_step(opcode, operand, true)?;
            }

            Expr::Infix { op, left, right } => self.compile_infix(*op, left, right)?,

            Expr::Conditional { condition, consequence, alternative } => {
                self.compile_expr(condition)?;
                let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[PLACEHOLDER])?;
                self.compile_expr(consequence)?;
                let jump = self.emit(Opcode::Jump, &[PLACEHOLDER])?;
                self.patch_jump(jump_not_truthy)?;
                self.compile_expr(alternative)?;
                self.patch_jump(jump)?;
            }

            Expr::If { condition, consequence, alternative } => {
                self.compile_expr(condition)?;
                let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[PLACEHOLDER])?;
                self.compile_branch(consequence)?;
                let jump = self.emit(Opcode::Jump, &[PLACEHOLDER])?;
                self.patch_jump(jump_not_truthy)?;
                match alternative {
                    Some(alternative) => self.compile_branch(alternative)?,
                    None => {
                        self.emit(Opcode::Null, &[])?;
                    }
                }
                self.patch_jump(jump)?;
            }

            Expr::While { condition, body } => {
                let loop_start = self.current_instructions().len();
                self.compile_expr(condition)?;
                let exit = self.emit(Opcode::JumpNotTruthy, &[PLACEHOLDER])?;
                self.compile_block(body)?;
                self.emit(Opcode::Jump, &[loop_start])?;
                self.patch_jump(exit)?;
                self.emit(Opcode::Null, &[])?;
            }

            Expr::Function { name, params, body } => self.compile_function(name.as_deref(), params, body, span)?,

            Expr::Call { function, args } => {
                if args.len() > MAX_ARGS {
                    return Err(CompileError::TooManyArguments { count: args.len(), span });
                }
                self.compile_expr(function)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Opcode::Call, &[args.len()])?;
            }

            Expr::Assign { target, value } => match &target.node {
                Expr::Ident(name) => {
                    let symbol = self.resolve(name, target.span)?;
                    let assign = assign_opcode(&symbol, target.span)?;
                    self.compile_expr(value)?;
                    self.emit(assign, &[symbol.index])?;
                }
                Expr::Index { left, index } => {
                    self.compile_expr(left)?;
                    self.compile_expr(index)?;
                    self.compile_expr(value)?;
                    self.emit(Opcode::SetIndex, &[])?;
                }
                other => {
                    return Err(CompileError::NotImplemented {
                        what: format!("assignment to {}", other),
                        span: target.span,
                    });
                }
            },

            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(Opcode::Array, &[items.len()])?;
            }

            Expr::Map(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2])?;
            }

            Expr::Index { left, index } => {
                self.compile_expr(left)?;
                self.compile_expr(index)?;
                self.emit(Opcode::Index, &[])?;
            }
        }
        Ok(())
    }

    /// Compile `expr` and convert it to a boolean the way `&&` and `||` do,
    /// so the short-circuit jump agrees with the combining opcode.
    fn compile_boolean(&mut self, expr: &ExprNode) -> Result<()> {
        self.compile_expr(expr)?;
        self.emit(Opcode::True, &[])?;
        self.emit(Opcode::And, &[])?;
        Ok(())
    }

    fn compile_infix(&mut self, op: InfixOp, left: &ExprNode, right: &ExprNode) -> Result<()> {
        let opcode = match op {
            InfixOp::Add => Opcode::Add,
            InfixOp::Subtract => Opcode::Sub,
            InfixOp::Multiply => Opcode::Mul,
            InfixOp::Divide => Opcode::Div,
            InfixOp::GreaterThan => Opcode::GreaterThan,
            InfixOp::Equals => Opcode::Equal,
            InfixOp::NotEquals => Opcode::NotEqual,
            // `a < b` is `b > a`
            InfixOp::LessThan => {
                self.compile_expr(right)?;
                self.compile_expr(left)?;
                self.emit(Opcode::GreaterThan, &[])?;
                return Ok(());
            }
            InfixOp::And => {
                // left; true; and; JNT F; true; right; and; jump END; F: false; END:
                self.compile_boolean(left)?;
                let to_false = self.emit(Opcode::JumpNotTruthy, &[PLACEHOLDER])?;
                self.emit(Opcode::True, &[])?;
                self.compile_expr(right)?;
                self.emit(Opcode::And, &[])?;
                let to_end = self.emit(Opcode::Jump, &[PLACEHOLDER])?;
                self.patch_jump(to_false)?;
                self.emit(Opcode::False, &[])?;
                self.patch_jump(to_end)?;
                return Ok(());
            }
            InfixOp::Or => {
                // left; true; and; JNT R; true; jump END; R: false; right; or; END:
                self.compile_boolean(left)?;
                let to_right = self.emit(Opcode::JumpNotTruthy, &[PLACEHOLDER])?;
                self.emit(Opcode::True, &[])?;
                let to_end = self.emit(Opcode::Jump, &[PLACEHOLDER])?;
                self.patch_jump(to_right)?;
                self.emit(Opcode::False, &[])?;
                self.compile_expr(right)?;
                self.emit(Opcode::Or, &[])?;
                self.patch_jump(to_end)?;
                return Ok(());
            }
        };
        self.compile_expr(left)?;
        self.compile_expr(right)?;
        self.emit(opcode, &[])?;
        Ok(())
    }

    /// `++x`, `x--` and friends. On an identifier the new value is written
    /// back; postfix forms then drop it so the old value remains.
    fn compile_step(&mut self, opcode: Opcode, operand: &ExprNode, postfix: bool) -> Result<()> {
        let fixity = if postfix { STEP_POSTFIX } else { STEP_PREFIX };
        match &operand.node {
            Expr::Ident(name) => {
                let symbol = self.resolve(name, operand.span)?;
                let assign = assign_opcode(&symbol, operand.span)?;
                self.load_symbol(&symbol)?;
                self.emit(opcode, &[fixity])?;
                self.emit(assign, &[symbol.index])?;
            }
            _ => {
                self.compile_expr(operand)?;
                self.emit(opcode, &[fixity])?;
            }
        }
        if postfix {
            self.emit(Opcode::Pop, &[])?;
        }
        Ok(())
    }

    fn compile_function(&mut self, name: Option<&str>, params: &[String], body: &Block, span: Span) -> Result<()> {
        self.enter_scope();
        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for param in params {
            self.symbol_table.define(param).map_err(|_| CompileError::DuplicateDefinition {
                name: param.clone(),
                span,
            })?;
        }

        self.compile_block(body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return()?;
        }
        if !self.last_instruction_is(Opcode::ReturnValue) && !self.last_instruction_is(Opcode::Return) {
            self.emit(Opcode::Return, &[])?;
        }

        let free_symbols = self.symbol_table.free_symbols.clone();
        let num_locals = self.symbol_table.num_definitions();
        if num_locals > MAX_LOCALS {
            return Err(CompileError::TooManyLocals { span });
        }
        let instructions = self.leave_scope()?;

        for symbol in &free_symbols {
            self.load_symbol(symbol)?;
        }

        let function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: params.len(),
            name: name.map(str::to_string),
        };
        trace!(name = ?function.name, num_locals, free = free_symbols.len(), "compiled function");
        let index = self.add_constant_raw(Object::CompiledFunction(Rc::new(function)))?;
        self.emit(Opcode::Closure, &[index, free_symbols.len()])?;
        Ok(())
    }

    // ---- Symbols ----

    fn resolve(&mut self, name: &str, span: Span) -> Result<Symbol> {
        self.symbol_table
            .resolve(name)
            .ok_or_else(|| CompileError::UnresolvedIdentifier { name: name.to_string(), span })
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<()> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index])?,
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index])?,
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index])?,
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index])?,
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[])?,
        };
        Ok(())
    }

    // ---- Constants ----

    fn emit_constant(&mut self, value: Object) -> Result<()> {
        let index = self.add_constant(value)?;
        self.emit(Opcode::Constant, &[index])?;
        Ok(())
    }

    /// Add a literal, reusing the slot of an identical earlier literal.
    fn add_constant(&mut self, value: Object) -> Result<usize> {
        let Some(key) = value.hash_key() else {
            return self.add_constant_raw(value);
        };
        if let Some(&index) = self.constant_index.get(&key) {
            return Ok(index);
        }
        let index = self.add_constant_raw(value)?;
        self.constant_index.insert(key, index);
        Ok(index)
    }

    fn add_constant_raw(&mut self, value: Object) -> Result<usize> {
        if self.constants.len() >= MAX_CONSTANTS {
            return Err(CompileError::TooManyConstants);
        }
        self.constants.push(value);
        Ok(self.constants.len() - 1)
    }

    // ---- Emission ----

    fn scope(&self) -> &CompilationScope {
        // `scopes` always holds the main scope
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        let top = self.scopes.len() - 1;
        &mut self.scopes[top]
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scope().instructions
    }

    fn emit(&mut self, opcode: Opcode, operands: &[usize]) -> Result<usize> {
        let ins = code::make(opcode, operands)?;
        let scope = self.scope_mut();
        let position = scope.instructions.len();
        scope.instructions.extend_from_slice(&ins);
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction { opcode, position });
        Ok(position)
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        self.scope().last.is_some_and(|last| last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last {
            scope.instructions.truncate(last.position);
            scope.last = scope.previous;
        }
    }

    fn replace_last_pop_with_return(&mut self) -> Result<()> {
        let ins = code::make(Opcode::ReturnValue, &[])?;
        let scope = self.scope_mut();
        if let Some(last) = scope.last.as_mut() {
            scope.instructions[last.position..last.position + ins.len()].copy_from_slice(&ins);
            last.opcode = Opcode::ReturnValue;
        }
        Ok(())
    }

    /// Re-encode the instruction at `position` with a new operand.
    fn change_operand(&mut self, position: usize, operand: usize) -> Result<()> {
        let opcode = Opcode::try_from(self.current_instructions()[position])?;
        let ins = code::make(opcode, &[operand])?;
        self.scope_mut().instructions[position..position + ins.len()].copy_from_slice(&ins);
        Ok(())
    }

    /// Point the jump at `position` to the next instruction to be emitted.
    fn patch_jump(&mut self, position: usize) -> Result<()> {
        let target = self.current_instructions().len();
        self.change_operand(position, target)
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
        trace!(depth = self.scopes.len(), "enter scope");
    }

    fn leave_scope(&mut self) -> Result<Instructions> {
        if self.scopes.len() == 1 {
            return Err(CompileError::Internal("cannot leave the main scope"));
        }
        let scope = self.scopes.pop().ok_or(CompileError::Internal("scope stack is empty"))?;
        let table = std::mem::take(&mut self.symbol_table);
        self.symbol_table = table
            .into_outer()
            .ok_or(CompileError::Internal("function scope without an enclosing table"))?;
        trace!(depth = self.scopes.len(), "leave scope");
        Ok(scope.instructions)
    }
}

fn assign_opcode(symbol: &Symbol, span: Span) -> Result<Opcode> {
    match symbol.scope {
        SymbolScope::Global => Ok(Opcode::AssignGlobal),
        SymbolScope::Local => Ok(Opcode::AssignLocal),
        SymbolScope::Free => Ok(Opcode::AssignFree),
        SymbolScope::Builtin | SymbolScope::Function => Err(CompileError::InvalidAssignment {
            name: symbol.name.clone(),
            scope: symbol.scope,
            span,
        }),
    }
}

/// Compile a whole program with a fresh compiler.
pub fn compile(program: &Program) -> Result<Bytecode> {
    let mut compiler = Compiler::new();
    compiler.compile(program)?;
    Ok(compiler.bytecode())
}
