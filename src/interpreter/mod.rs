use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::ast::{Block, Expr, ExprNode, InfixOp, PostfixOp, PrefixOp, Program, Span, Stmt};
use crate::object::builtins;
use crate::object::ops::{self, BinaryOp, Step};
use crate::object::{Function, MapEntry, MapStore, Object, implicit_bool, truthy};

/// Nested calls allowed before evaluation gives up.
pub const MAX_CALL_DEPTH: usize = 128;

#[derive(Debug, thiserror::Error)]
#[error("Runtime error: {message}")]
pub struct RuntimeError {
    pub message: String,
    pub span: Option<Span>,
}

impl RuntimeError {
    fn new(msg: impl Into<String>, span: Span) -> Self {
        RuntimeError { message: msg.into(), span: Some(span) }
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

pub type Env = Rc<RefCell<Environment>>;

/// One scope of bindings. Function calls get a fresh scope enclosing the
/// function's defining environment; blocks share their enclosing scope.
#[derive(Default)]
pub struct Environment {
    store: HashMap<String, Object>,
    outer: Option<Env>,
}

impl Environment {
    pub fn new() -> Env {
        Rc::new(RefCell::new(Environment::default()))
    }

    pub fn enclosed(outer: &Env) -> Env {
        Rc::new(RefCell::new(Environment { store: HashMap::new(), outer: Some(Rc::clone(outer)) }))
    }

    pub fn get(&self, name: &str) -> Option<Object> {
        match self.store.get(name) {
            Some(value) => Some(value.clone()),
            None => self.outer.as_ref()?.borrow().get(name),
        }
    }

    pub fn define(&mut self, name: &str, value: Object) {
        self.store.insert(name.to_string(), value);
    }

    /// Rebind the nearest existing binding. Returns false when `name` is unbound.
    pub fn assign(&mut self, name: &str, value: Object) -> bool {
        if let Some(slot) = self.store.get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.outer {
            Some(outer) => outer.borrow_mut().assign(name, value),
            None => false,
        }
    }
}

/// Signal that a body produced an early return
enum Flow {
    Value(Object),
    Return(Object),
}

impl Flow {
    fn into_value(self) -> Object {
        match self {
            Flow::Value(v) | Flow::Return(v) => v,
        }
    }
}

/// Tree-walking evaluator with a global environment that persists across
/// [`Interpreter::eval_program`] calls.
pub struct Interpreter {
    globals: Env,
    depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

pub fn eval(program: &Program) -> Result<Object> {
    Interpreter::new().eval_program(program)
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter { globals: Environment::new(), depth: 0 }
    }

    /// Evaluate every statement; the result is the value of the last one.
    /// A top-level `return` ends the program early with its value.
    pub fn eval_program(&mut self, program: &Program) -> Result<Object> {
        self.depth = 0;
        let env = Rc::clone(&self.globals);
        let result = self.eval_statements(&env, &program.statements)?.into_value();
        debug!(result = %result, "evaluated program");
        Ok(result)
    }

    fn eval_statements(&mut self, env: &Env, stmts: &[Stmt]) -> Result<Flow> {
        let mut last = Object::Null;
        for stmt in stmts {
            match stmt {
                Stmt::Let { name, value, .. } => {
                    let value = self.eval_expr(env, value)?;
                    env.borrow_mut().define(name, value);
                    last = Object::Null;
                }
                Stmt::Return { value, .. } => {
                    let value = match value {
                        Some(expr) => self.eval_expr(env, expr)?,
                        None => Object::Null,
                    };
                    return Ok(Flow::Return(value));
                }
                Stmt::Expr(expr) => last = self.eval_expr(env, expr)?,
            }
        }
        Ok(Flow::Value(last))
    }

    fn eval_block(&mut self, env: &Env, block: &Block) -> Result<Flow> {
        self.eval_statements(env, &block.statements)
    }

    fn eval_expr(&mut self, env: &Env, node: &ExprNode) -> Result<Object> {
        let span = node.span;
        match &node.node {
            Expr::Ident(name) => lookup(env, name, span),
            Expr::Integer(n) => Ok(Object::Integer(*n)),
            Expr::Double(n) => Ok(Object::Double(*n)),
            Expr::Str(s) => Ok(Object::string(s.as_str())),
            Expr::Boolean(b) => Ok(Object::Boolean(*b)),
            Expr::Null => Ok(Object::Null),

            Expr::Prefix { op, operand } => match op {
                PrefixOp::Minus => {
                    let value = self.eval_expr(env, operand)?;
                    check(ops::negate(&value), span)
                }
                PrefixOp::Bang => {
                    let value = self.eval_expr(env, operand)?;
                    Ok(ops::bang(&value))
                }
                PrefixOp::Increment => self.eval_step(env, Step::Increment, operand, false, span),
                PrefixOp::Decrement => self.eval_step(env, Step::Decrement, operand, false, span),
            },
            Expr::Postfix { op, operand } => {
                let step = match op {
                    PostfixOp::Increment => Step::Increment,
                    PostfixOp::Decrement => Step::Decrement,
                };
                self.eval_step(env, step, operand, true, span)
            }

            Expr::Infix { op, left, right } => {
                let left = self.eval_expr(env, left)?;
                let (bin, swapped) = match op {
                    InfixOp::And | InfixOp::Or => {
                        let is_and = *op == InfixOp::And;
                        if implicit_bool(&left) != is_and {
                            return Ok(Object::Boolean(!is_and));
                        }
                        let right = self.eval_expr(env, right)?;
                        return Ok(Object::Boolean(implicit_bool(&right)));
                    }
                    InfixOp::Add => (BinaryOp::Add, false),
                    InfixOp::Subtract => (BinaryOp::Sub, false),
                    InfixOp::Multiply => (BinaryOp::Mul, false),
                    InfixOp::Divide => (BinaryOp::Div, false),
                    InfixOp::GreaterThan => (BinaryOp::GreaterThan, false),
                    InfixOp::LessThan => (BinaryOp::GreaterThan, true),
                    InfixOp::Equals => (BinaryOp::Equal, false),
                    InfixOp::NotEquals => (BinaryOp::NotEqual, false),
                };
                let right = self.eval_expr(env, right)?;
                let result = if swapped { ops::binary(bin, &right, &left) } else { ops::binary(bin, &left, &right) };
                match result {
                    Ok(value) => check(value, span),
                    Err(fault) => Err(RuntimeError::new(fault.to_string(), span)),
                }
            }

            Expr::Conditional { condition, consequence, alternative } => {
                let condition = self.eval_expr(env, condition)?;
                if truthy(&condition) {
                    self.eval_expr(env, consequence)
                } else {
                    self.eval_expr(env, alternative)
                }
            }
            Expr::If { condition, consequence, alternative } => {
                let condition = self.eval_expr(env, condition)?;
                let branch = if truthy(&condition) { Some(consequence) } else { alternative.as_ref() };
                match branch {
                    Some(block) => self.eval_branch(env, block),
                    None => Ok(Object::Null),
                }
            }
            Expr::While { condition, body } => {
                loop {
                    let test = self.eval_expr(env, condition)?;
                    if !truthy(&test) {
                        break;
                    }
                    self.eval_branch(env, body)?;
                }
                Ok(Object::Null)
            }

            Expr::Function { name, params, body } => Ok(Object::Function(Rc::new(Function {
                name: name.clone(),
                params: params.clone(),
                body: body.clone(),
                env: Rc::clone(env),
            }))),
            Expr::Call { function, args } => {
                let callee = self.eval_expr(env, function)?;
                let args = args.iter().map(|arg| self.eval_expr(env, arg)).collect::<Result<Vec<_>>>()?;
                self.apply(callee, args, span)
            }

            Expr::Assign { target, value } => self.eval_assign(env, target, value, span),

            Expr::Array(items) => {
                let items = items.iter().map(|item| self.eval_expr(env, item)).collect::<Result<Vec<_>>>()?;
                Ok(Object::array(items))
            }
            Expr::Map(pairs) => {
                let mut store = MapStore::with_capacity(pairs.len());
                for (key_expr, value_expr) in pairs {
                    let key = self.eval_expr(env, key_expr)?;
                    let hash = key.hash_key().ok_or_else(|| {
                        RuntimeError::new(format!("unusable as map key: {}", key.kind()), key_expr.span)
                    })?;
                    let value = self.eval_expr(env, value_expr)?;
                    store.insert(hash, MapEntry { key, value });
                }
                Ok(Object::map(store))
            }
            Expr::Index { left, index } => {
                let container = self.eval_expr(env, left)?;
                let index = self.eval_expr(env, index)?;
                check(ops::index(&container, &index), span)
            }
        }
    }

    /// Blocks inside `if`/`while` share the enclosing scope. A `return`
    /// inside them is not propagated past the branch.
    fn eval_branch(&mut self, env: &Env, block: &Block) -> Result<Object> {
        Ok(self.eval_block(env, block)?.into_value())
    }

    fn eval_step(&mut self, env: &Env, step: Step, operand: &ExprNode, postfix: bool, span: Span) -> Result<Object> {
        let old = self.eval_expr(env, operand)?;
        let new = check(ops::step(step, postfix, &old), span)?;
        if let Expr::Ident(name) = &operand.node {
            assign(env, name, new.clone(), operand.span)?;
        }
        Ok(if postfix { old } else { new })
    }

    fn eval_assign(&mut self, env: &Env, target: &ExprNode, value: &ExprNode, span: Span) -> Result<Object> {
        match &target.node {
            Expr::Ident(name) => {
                let value = self.eval_expr(env, value)?;
                assign(env, name, value.clone(), target.span)?;
                Ok(value)
            }
            Expr::Index { left, index } => {
                let container = self.eval_expr(env, left)?;
                let index = self.eval_expr(env, index)?;
                let value = self.eval_expr(env, value)?;
                check(ops::set_index(&container, &index, value), span)
            }
            _ => Err(RuntimeError::new("invalid assignment target", target.span)),
        }
    }

    fn apply(&mut self, callee: Object, args: Vec<Object>, span: Span) -> Result<Object> {
        match callee {
            Object::Function(function) => {
                if args.len() != function.params.len() {
                    return Err(RuntimeError::new(
                        format!("wrong number of arguments: want={}, got={}", function.params.len(), args.len()),
                        span,
                    ));
                }
                if self.depth >= MAX_CALL_DEPTH {
                    return Err(RuntimeError::new("stack overflow", span));
                }
                let scope = Environment::enclosed(&function.env);
                for (param, arg) in function.params.iter().zip(args) {
                    scope.borrow_mut().define(param, arg);
                }
                self.depth += 1;
                let result = self.eval_block(&scope, &function.body);
                self.depth -= 1;
                Ok(result?.into_value())
            }
            Object::Builtin(builtin) => check((builtin.func)(&args), span),
            other => Err(RuntimeError::new(format!("calling non-function: {}", other.kind()), span)),
        }
    }
}

fn lookup(env: &Env, name: &str, span: Span) -> Result<Object> {
    if let Some(value) = env.borrow().get(name) {
        return Ok(value);
    }
    builtins::lookup(name)
        .map(Object::Builtin)
        .ok_or_else(|| RuntimeError::new(format!("identifier not found: {}", name), span))
}

fn assign(env: &Env, name: &str, value: Object, span: Span) -> Result<()> {
    if env.borrow_mut().assign(name, value) {
        return Ok(());
    }
    if builtins::lookup(name).is_some() {
        return Err(RuntimeError::new(format!("cannot assign to builtin: {}", name), span));
    }
    Err(RuntimeError::new(format!("identifier not found: {}", name), span))
}

/// Error values abort evaluation.
fn check(value: Object, span: Span) -> Result<Object> {
    match value {
        Object::Error(message) => Err(RuntimeError::new(message.to_string(), span)),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};

    fn parse_program(source: &str) -> Program {
        let (program, errors) = parser::parse(lexer::lex(source).unwrap());
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        program
    }

    fn run_str(source: &str) -> Object {
        eval(&parse_program(source)).unwrap_or_else(|e| panic!("{} for {:?}", e, source))
    }

    fn run_err(source: &str) -> RuntimeError {
        eval(&parse_program(source)).unwrap_err()
    }

    fn int(n: i64) -> Object {
        Object::Integer(n)
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(run_str("1 + 2"), int(3));
        assert_eq!(run_str("(5 + 10 * 2 + 15 / 3) * 2 + -10"), int(50));
        assert_eq!(run_str("1.5 + 1"), Object::Double(2.5));
        assert_eq!(run_str(r#""mon" + "key""#), Object::string("monkey"));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(run_str("1 < 2"), Object::Boolean(true));
        assert_eq!(run_str("2 < 1"), Object::Boolean(false));
        assert_eq!(run_str("true == 1"), Object::Boolean(true));
        assert_eq!(run_str("!0"), Object::Boolean(true));
        assert_eq!(run_str("1 && 2"), Object::Boolean(true));
        assert_eq!(run_str("null || null"), Object::Boolean(false));
        assert_eq!(run_str("true && 0"), Object::Boolean(true));
        assert_eq!(run_str("0 || null"), Object::Boolean(true));
        assert_eq!(run_str("0 == true"), Object::Boolean(true));
        assert_eq!(run_str("0 != true"), Object::Boolean(false));
        assert_eq!(run_str("false && (1 / 0)"), Object::Boolean(false));
        assert_eq!(run_str("true || (1 / 0)"), Object::Boolean(true));
    }

    #[test]
    fn conditionals_and_loops() {
        assert_eq!(run_str("if (false) { 10 }"), Object::Null);
        assert_eq!(run_str("if (1 > 2) { 10 } else { 20 }"), int(20));
        assert_eq!(run_str("1 > 2 ? 3 : 4"), int(4));
        assert_eq!(run_str("let i = 0; let sum = 0; while (i < 5) { sum = sum + i; i++; } sum"), int(10));
        assert_eq!(run_str("while (false) { 1 }"), Object::Null);
    }

    #[test]
    fn increment_and_decrement() {
        assert_eq!(run_str("let a = 1; a++"), int(1));
        assert_eq!(run_str("let a = 1; a++; a"), int(2));
        assert_eq!(run_str("let a = 1; ++a"), int(2));
        assert_eq!(run_str("let a = 1; a--; --a"), int(-1));
    }

    #[test]
    fn functions_and_closures() {
        assert_eq!(run_str("let add = fn(a, b) { a + b }; add(1, 2)"), int(3));
        assert_eq!(
            run_str("let newFunc = fn(x) { return fn(y) { x + y; }; }; let addFive = newFunc(5); addFive(10);"),
            int(15)
        );
        assert_eq!(run_str("let fact = fn(n) { n < 2 ? 1 : n * fact(n - 1) }; fact(5)"), int(120));
        assert_eq!(run_str("let f = fn() { if (true) { return 1; } 2 }; f()"), int(1));
        assert_eq!(run_str("let f = fn() { }; f()"), Object::Null);
    }

    #[test]
    fn captured_variables_are_shared() {
        let source = "let counter = fn() { let n = 0; fn() { n = n + 1; n } }; let c = counter(); c(); c(); c()";
        assert_eq!(run_str(source), int(3));
    }

    #[test]
    fn locals_shadow_globals() {
        assert_eq!(run_str("let a = 1; let f = fn() { let a = 2; a }; f(); a"), int(1));
        assert_eq!(run_str("let a = 1; let f = fn() { a = 2; }; f(); a"), int(2));
    }

    #[test]
    fn collections() {
        assert_eq!(run_str("[1, 2, 3][1]"), int(2));
        assert_eq!(run_str(r#"{"a": 1}["a"]"#), int(1));
        assert_eq!(run_str("let a = [1, 2]; a[1] = 5; a[1]"), int(5));
        assert_eq!(run_str("len(push([1], 2))"), int(2));
    }

    #[test]
    fn top_level_return_ends_program() {
        assert_eq!(run_str("1; return 2; 3"), int(2));
    }

    #[test]
    fn error_values_abort() {
        assert_eq!(run_err("1 + true").message, "type mismatch: Integer + Boolean");
        assert_eq!(run_err("[][0]").message, "index out of range: 0");
        assert_eq!(run_err("len(1)").message, "argument to len not supported, got Integer");
        assert_eq!(run_err("1 / 0").message, "integer division by zero");
        assert_eq!(run_err("1()").message, "calling non-function: Integer");
        assert_eq!(run_err("missing").message, "identifier not found: missing");
        assert_eq!(run_err("x = 1").message, "identifier not found: x");
        assert_eq!(run_err("len = 1").message, "cannot assign to builtin: len");
        assert_eq!(run_err("fn(a) { a }()").message, "wrong number of arguments: want=1, got=0");
        assert_eq!(run_err("{[1]: 2}").message, "unusable as map key: Array");
    }

    #[test]
    fn error_span_points_at_expression() {
        let err = run_err("let a = 1;\nmissing");
        let span = err.span.unwrap();
        assert_eq!(span.start, 11);
        assert_eq!(span.end, 18);
    }

    #[test]
    fn unbounded_recursion_is_reported() {
        assert_eq!(run_err("let f = fn() { f() }; f()").message, "stack overflow");
    }

    #[test]
    fn globals_persist_between_programs() {
        let mut interp = Interpreter::new();
        interp.eval_program(&parse_program("let a = 40;")).unwrap();
        interp.eval_program(&parse_program("let b = fn() { a + 2 };")).unwrap();
        assert_eq!(interp.eval_program(&parse_program("b()")).unwrap(), int(42));
    }
}
