use std::rc::Rc;

use tracing::{debug, trace};

use crate::code::{CodeError, Opcode, STEP_POSTFIX, read_u8, read_u16};
use crate::compiler::Bytecode;
use crate::object::ops::{self, BinaryOp, OpFault, Step};
use crate::object::{BUILTINS, Closure, CompiledFunction, MapEntry, MapStore, Object, truthy};

mod frame;

pub use frame::Frame;

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("wrong number of arguments: want={want}, got={got}")]
    ArityMismatch { want: usize, got: usize },
    #[error(transparent)]
    Code(#[from] CodeError),
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("unknown builtin index: {index}")]
    UnknownBuiltin { index: usize },
    #[error("constant {index} is not a function")]
    NotAFunction { index: usize },
    #[error("constant index {index} out of range")]
    BadConstant { index: usize },
    #[error("global index {index} out of range")]
    BadGlobal { index: usize },
    #[error("return from the outermost frame")]
    ReturnFromMain,
}

impl From<OpFault> for VmError {
    fn from(fault: OpFault) -> Self {
        match fault {
            OpFault::DivisionByZero => VmError::DivisionByZero,
        }
    }
}

type VmResult<T> = Result<T, VmError>;

fn binary_op(op: Opcode) -> Option<BinaryOp> {
    Some(match op {
        Opcode::Add => BinaryOp::Add,
        Opcode::Sub => BinaryOp::Sub,
        Opcode::Mul => BinaryOp::Mul,
        Opcode::Div => BinaryOp::Div,
        Opcode::GreaterThan => BinaryOp::GreaterThan,
        Opcode::Equal => BinaryOp::Equal,
        Opcode::NotEqual => BinaryOp::NotEqual,
        Opcode::And => BinaryOp::And,
        Opcode::Or => BinaryOp::Or,
        _ => return None,
    })
}

/// Stack machine executing one [`Bytecode`].
///
/// Popped slots are not cleared, so after a run `stack[sp]` still holds the
/// value of the last expression statement (see [`Vm::last_popped`]).
pub struct Vm {
    constants: Vec<Object>,
    stack: Vec<Object>,
    sp: usize,
    globals: Vec<Object>,
    frames: Vec<Frame>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Vm::with_globals(bytecode, Vec::new())
    }

    /// Run against globals left behind by an earlier VM (REPL continuation).
    pub fn with_globals(bytecode: Bytecode, globals: Vec<Object>) -> Self {
        let main = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
            name: None,
        };
        let main = Rc::new(Closure::new(Rc::new(main), Vec::new()));
        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(main, 0));
        Vm {
            constants: bytecode.constants,
            stack: vec![Object::Null; STACK_SIZE],
            sp: 0,
            globals,
            frames,
        }
    }

    pub fn stack_top(&self) -> Option<&Object> {
        if self.sp == 0 { None } else { self.stack.get(self.sp - 1) }
    }

    pub fn last_popped(&self) -> Object {
        self.stack.get(self.sp).cloned().unwrap_or(Object::Null)
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    // ---- Stack ----

    fn push(&mut self, obj: Object) -> VmResult<()> {
        if self.sp >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.sp] = obj;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Object> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    fn peek(&self) -> VmResult<Object> {
        self.stack_top().cloned().ok_or(VmError::StackUnderflow)
    }

    /// Take the top `count` values off the stack, bottom first.
    fn pop_many(&mut self, count: usize) -> VmResult<Vec<Object>> {
        let start = self.sp.checked_sub(count).ok_or(VmError::StackUnderflow)?;
        let items = self.stack[start..self.sp].to_vec();
        self.sp = start;
        Ok(items)
    }

    fn set_global(&mut self, index: usize, value: Object) -> VmResult<()> {
        if index >= GLOBALS_SIZE {
            return Err(VmError::BadGlobal { index });
        }
        if index >= self.globals.len() {
            self.globals.resize(index + 1, Object::Null);
        }
        self.globals[index] = value;
        Ok(())
    }

    fn current_frame(&self) -> &Frame {
        // frames always holds the main frame while running
        &self.frames[self.frames.len() - 1]
    }

    // ---- Execution ----

    pub fn run(&mut self) -> VmResult<()> {
        let mut closure = Rc::clone(&self.current_frame().closure);
        let mut ip = self.current_frame().ip;
        let mut base = self.current_frame().base_pointer;

        loop {
            if ip >= closure.function.instructions.len() {
                if self.frames.len() == 1 {
                    break;
                }
                // Ran off the end of a function body: implicit `return;`
                self.return_from_call(Object::Null)?;
                (closure, ip, base) = self.resume();
                continue;
            }

            let ins = &closure.function.instructions;
            let op = Opcode::try_from(ins[ip])?;
            ip += 1;

            match op {
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::GreaterThan
                | Opcode::Equal
                | Opcode::NotEqual
                | Opcode::And
                | Opcode::Or => self.execute_binary(op)?,
                Opcode::Constant => {
                    let index = read_u16(ins, ip) as usize;
                    ip += 2;
                    let constant = self.constants.get(index).cloned().ok_or(VmError::BadConstant { index })?;
                    self.push(constant)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::True => self.push(Object::Boolean(true))?,
                Opcode::False => self.push(Object::Boolean(false))?,
                Opcode::Null => self.push(Object::Null)?,
                Opcode::Minus => {
                    let operand = self.pop()?;
                    self.push(ops::negate(&operand))?;
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(ops::bang(&operand))?;
                }
                Opcode::Increment | Opcode::Decrement => {
                    let postfix = read_u8(ins, ip) as usize == STEP_POSTFIX;
                    ip += 1;
                    let step = if op == Opcode::Increment { Step::Increment } else { Step::Decrement };
                    let old = self.pop()?;
                    let new = ops::step(step, postfix, &old);
                    if postfix {
                        self.push(old)?;
                    }
                    self.push(new)?;
                }
                Opcode::Jump => {
                    ip = read_u16(ins, ip) as usize;
                }
                Opcode::JumpNotTruthy => {
                    let target = read_u16(ins, ip) as usize;
                    ip += 2;
                    let condition = self.pop()?;
                    if !truthy(&condition) {
                        ip = target;
                    }
                }

                Opcode::GetGlobal => {
                    let index = read_u16(ins, ip) as usize;
                    ip += 2;
                    let value = self.globals.get(index).cloned().unwrap_or(Object::Null);
                    self.push(value)?;
                }
                Opcode::SetGlobal => {
                    let index = read_u16(ins, ip) as usize;
                    ip += 2;
                    let value = self.pop()?;
                    self.set_global(index, value)?;
                }
                Opcode::AssignGlobal => {
                    let index = read_u16(ins, ip) as usize;
                    ip += 2;
                    let value = self.peek()?;
                    self.set_global(index, value)?;
                }
                Opcode::GetLocal => {
                    let slot = base + read_u8(ins, ip) as usize;
                    ip += 1;
                    let value = self.stack[slot].clone();
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let slot = base + read_u8(ins, ip) as usize;
                    ip += 1;
                    self.stack[slot] = self.pop()?;
                }
                Opcode::AssignLocal => {
                    let slot = base + read_u8(ins, ip) as usize;
                    ip += 1;
                    self.stack[slot] = self.peek()?;
                }
                Opcode::GetFree => {
                    let index = read_u8(ins, ip) as usize;
                    ip += 1;
                    let value = closure.free.borrow()[index].clone();
                    self.push(value)?;
                }
                Opcode::AssignFree => {
                    let index = read_u8(ins, ip) as usize;
                    ip += 1;
                    closure.free.borrow_mut()[index] = self.peek()?;
                }
                Opcode::GetBuiltin => {
                    let index = read_u8(ins, ip) as usize;
                    ip += 1;
                    let builtin = BUILTINS.get(index).ok_or(VmError::UnknownBuiltin { index })?;
                    self.push(Object::Builtin(builtin))?;
                }

                Opcode::Array => {
                    let count = read_u16(ins, ip) as usize;
                    ip += 2;
                    let items = self.pop_many(count)?;
                    self.push(Object::array(items))?;
                }
                Opcode::Hash => {
                    let count = read_u16(ins, ip) as usize;
                    ip += 2;
                    let items = self.pop_many(count)?;
                    self.push(build_map(items))?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let container = self.pop()?;
                    self.push(ops::index(&container, &index))?;
                }
                Opcode::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let container = self.pop()?;
                    self.push(ops::set_index(&container, &index, value))?;
                }

                Opcode::Call => {
                    let argc = read_u8(ins, ip) as usize;
                    ip += 1;
                    self.save_ip(ip);
                    self.call(argc)?;
                    (closure, ip, base) = self.resume();
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    self.return_from_call(value)?;
                    (closure, ip, base) = self.resume();
                }
                Opcode::Return => {
                    self.return_from_call(Object::Null)?;
                    (closure, ip, base) = self.resume();
                }
                Opcode::Closure => {
                    let index = read_u16(ins, ip) as usize;
                    let num_free = read_u8(ins, ip + 2) as usize;
                    ip += 3;
                    self.push_closure(index, num_free)?;
                }
                Opcode::CurrentClosure => {
                    self.push(Object::Closure(Rc::clone(&closure)))?;
                }

            }
        }

        self.save_ip(ip);
        debug!(sp = self.sp, globals = self.globals.len(), "vm halted");
        Ok(())
    }

    fn execute_binary(&mut self, op: Opcode) -> VmResult<()> {
        let bin = binary_op(op).ok_or(CodeError::UnknownOpcode { op: op as u8 })?;
        let right = self.pop()?;
        let left = self.pop()?;
        let result = ops::binary(bin, &left, &right)?;
        self.push(result)
    }

    fn save_ip(&mut self, ip: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = ip;
        }
    }

    /// State of the frame now on top, after a call or return.
    fn resume(&self) -> (Rc<Closure>, usize, usize) {
        let frame = self.current_frame();
        (Rc::clone(&frame.closure), frame.ip, frame.base_pointer)
    }

    fn call(&mut self, argc: usize) -> VmResult<()> {
        let callee_slot = self.sp.checked_sub(1 + argc).ok_or(VmError::StackUnderflow)?;
        let callee = self.stack[callee_slot].clone();
        match callee {
            Object::Closure(closure) => {
                let function = &closure.function;
                if argc != function.num_parameters {
                    return Err(VmError::ArityMismatch { want: function.num_parameters, got: argc });
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(VmError::StackOverflow);
                }
                let base_pointer = self.sp - argc;
                let new_sp = base_pointer + function.num_locals;
                if new_sp > STACK_SIZE {
                    return Err(VmError::StackOverflow);
                }
                for slot in &mut self.stack[self.sp..new_sp] {
                    *slot = Object::Null;
                }
                trace!(name = ?function.name, argc, depth = self.frames.len() + 1, "call");
                self.sp = new_sp;
                self.frames.push(Frame::new(closure, base_pointer));
            }
            Object::Builtin(builtin) => {
                let result = (builtin.func)(&self.stack[self.sp - argc..self.sp]);
                trace!(name = builtin.name, argc, "builtin call");
                self.sp = callee_slot;
                self.push(result)?;
            }
            other => {
                self.sp = callee_slot;
                self.push(Object::error(format!("calling non-function: {}", other.kind())))?;
            }
        }
        Ok(())
    }

    /// Pop the current frame, discard its callee/args/locals, and push `value`.
    fn return_from_call(&mut self, value: Object) -> VmResult<()> {
        if self.frames.len() == 1 {
            return Err(VmError::ReturnFromMain);
        }
        let frame = self.frames.pop().ok_or(VmError::ReturnFromMain)?;
        self.sp = frame.base_pointer.checked_sub(1).ok_or(VmError::StackUnderflow)?;
        self.push(value)
    }

    fn push_closure(&mut self, index: usize, num_free: usize) -> VmResult<()> {
        let function = match self.constants.get(index) {
            Some(Object::CompiledFunction(function)) => Rc::clone(function),
            Some(_) => return Err(VmError::NotAFunction { index }),
            None => return Err(VmError::BadConstant { index }),
        };
        let free = self.pop_many(num_free)?;
        trace!(name = ?function.name, free = free.len(), "closure");
        self.push(Object::Closure(Rc::new(Closure::new(function, free))))
    }
}

/// Build a map from interleaved key/value stack items.
fn build_map(items: Vec<Object>) -> Object {
    let mut store = MapStore::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        let Some(hash) = key.hash_key() else {
            return Object::error(format!("unusable as map key: {}", key.kind()));
        };
        store.insert(hash, MapEntry { key, value });
    }
    Object::map(store)
}

/// Run compiled bytecode to completion and return the last popped value.
pub fn run(bytecode: Bytecode) -> VmResult<Object> {
    let mut vm = Vm::new(bytecode);
    vm.run()?;
    Ok(vm.last_popped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler, lexer, parser};

    fn compile(source: &str) -> Bytecode {
        let (program, errors) = parser::parse(lexer::lex(source).unwrap());
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        compiler::compile(&program).unwrap_or_else(|e| panic!("compile error for {:?}: {}", source, e))
    }

    fn run_source(source: &str) -> Object {
        run(compile(source)).unwrap_or_else(|e| panic!("vm error for {:?}: {}", source, e))
    }

    fn run_err(source: &str) -> VmError {
        run(compile(source)).unwrap_err()
    }

    fn check(cases: &[(&str, Object)]) {
        for (source, expected) in cases {
            assert_eq!(run_source(source), *expected, "source: {}", source);
        }
    }

    fn int(n: i64) -> Object {
        Object::Integer(n)
    }

    fn ints(values: &[i64]) -> Object {
        Object::array(values.iter().map(|n| int(*n)).collect())
    }

    #[test]
    fn integer_arithmetic() {
        check(&[
            ("1", int(1)),
            ("1 + 2", int(3)),
            ("1 - 2", int(-1)),
            ("4 / 2", int(2)),
            ("50 / 2 * 2 + 10 - 5", int(55)),
            ("5 * (2 + 10)", int(60)),
            ("-50 + 100 + -50", int(0)),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", int(50)),
        ]);
    }

    #[test]
    fn double_arithmetic() {
        check(&[
            ("1.5 + 1", Object::Double(2.5)),
            ("1 / 2.0", Object::Double(0.5)),
            ("-0.5 * 4", Object::Double(-2.0)),
            ("2.5 > 2", Object::Boolean(true)),
        ]);
    }

    #[test]
    fn boolean_expressions() {
        check(&[
            ("true", Object::Boolean(true)),
            ("1 < 2", Object::Boolean(true)),
            ("1 > 2", Object::Boolean(false)),
            ("1 == 1", Object::Boolean(true)),
            ("1 != 1", Object::Boolean(false)),
            ("true == false", Object::Boolean(false)),
            ("(1 < 2) == true", Object::Boolean(true)),
            ("!true", Object::Boolean(false)),
            ("!5", Object::Boolean(false)),
            ("!!5", Object::Boolean(true)),
            ("!0", Object::Boolean(true)),
            ("!(if (false) { 5; })", Object::Boolean(true)),
        ]);
    }

    #[test]
    fn logical_operators() {
        check(&[
            ("true && true", Object::Boolean(true)),
            ("true && false", Object::Boolean(false)),
            ("false || true", Object::Boolean(true)),
            ("false || false", Object::Boolean(false)),
            ("1 && 2", Object::Boolean(true)),
            ("true && 0", Object::Boolean(true)),
            ("0 && true", Object::Boolean(true)),
            ("false || 0", Object::Boolean(true)),
            ("0 || 5", Object::Boolean(true)),
            ("null || null", Object::Boolean(false)),
            ("null && true", Object::Boolean(false)),
            ("0 == true", Object::Boolean(true)),
            ("0 != true", Object::Boolean(false)),
            ("null == false", Object::Boolean(true)),
        ]);
    }

    #[test]
    fn and_short_circuits() {
        assert_eq!(run_source("false && (1 / 0)"), Object::Boolean(false));
        assert_eq!(run_source("true || (1 / 0)"), Object::Boolean(true));
        assert_eq!(
            run_source("let n = 0; let bump = fn() { n = n + 1; true }; false && bump(); n"),
            int(0)
        );
    }

    #[test]
    fn conditionals() {
        check(&[
            ("if (true) { 10 }", int(10)),
            ("if (true) { 10 } else { 20 }", int(10)),
            ("if (false) { 10; } else { 20; }", int(20)),
            ("if (1) { 10 }", int(10)),
            ("if (1 > 2) { 10 }", Object::Null),
            ("if (false) { 10; }", Object::Null),
            ("if ((if (false) { 10 })) { 10 } else { 20 }", int(20)),
            ("if (true) { let a = 1; }", Object::Null),
            ("1 > 2 ? 3 : 4", int(4)),
            ("true ? false ? 1 : 2 : 3", int(2)),
        ]);
    }

    #[test]
    fn conditionals_keep_stack_balanced() {
        for source in ["if (false) { 10; }", "if (false) { 10; } else { 20; }", "if (true) { }"] {
            let mut vm = Vm::new(compile(source));
            vm.run().unwrap();
            assert_eq!(vm.sp, 0, "source: {}", source);
            assert!(vm.stack_top().is_none());
        }
    }

    #[test]
    fn global_let_statements() {
        check(&[
            ("let one = 1; one", int(1)),
            ("let one = 1; let two = 2; one + two", int(3)),
            ("let one = 1; let two = one + one; one + two", int(3)),
        ]);
    }

    #[test]
    fn assignment() {
        check(&[
            ("let a = 1; a = 2; a", int(2)),
            ("let a = 1; a = a + 41", int(42)),
            ("let a = 1; let b = 2; a = b = 3; a + b", int(6)),
            ("let f = fn() { let x = 1; x = x * 5; x }; f()", int(5)),
        ]);
    }

    #[test]
    fn increment_and_decrement() {
        check(&[
            ("let a = 1; a++;", int(1)),
            ("let a = 1; a++; a", int(2)),
            ("let a = 1; ++a;", int(2)),
            ("let a = 1; --a; a", int(0)),
            ("let a = 1; a--", int(1)),
            ("let d = 1.5; d++; d", Object::Double(2.5)),
            ("let f = fn() { let i = 0; i++; i++; i }; f()", int(2)),
            ("let f = fn() { let i = 5; --i }; f()", int(4)),
            ("5++", int(5)),
            ("++5", int(6)),
        ]);
        assert_eq!(run_source("let b = true; ++b"), Object::error("unsupported prefix: ++Boolean"));
    }

    #[test]
    fn while_loops() {
        check(&[
            ("let i = 0; let sum = 0; while (i < 5) { sum = sum + i; i++; } sum", int(10)),
            ("while (false) { }", Object::Null),
            ("let i = 3; while (i > 0) { i = i - 1 }; i", int(0)),
        ]);
    }

    #[test]
    fn string_expressions() {
        check(&[
            (r#""monkey""#, Object::string("monkey")),
            (r#""mon" + "key""#, Object::string("monkey")),
            (r#""mon" + "key" + "banana""#, Object::string("monkeybanana")),
            (r#""a" == "a""#, Object::Boolean(true)),
        ]);
    }

    #[test]
    fn array_literals_and_indexing() {
        check(&[
            ("[]", ints(&[])),
            ("[1, 2, 3]", ints(&[1, 2, 3])),
            ("[1 + 2, 3 * 4, 5 + 6]", ints(&[3, 12, 11])),
            ("[1, 2, 3][1]", int(2)),
            ("[[1, 1, 1]][0][0]", int(1)),
            ("let a = [1, 2]; a[0] = 5; a", ints(&[5, 2])),
            ("let a = [1, 2]; let b = a; b[1] = 7; a[1]", int(7)),
        ]);
        assert_eq!(run_source("[][0]"), Object::error("index out of range: 0"));
        assert_eq!(run_source("[1, 2, 3][-1]"), Object::error("index out of range: -1"));
    }

    #[test]
    fn map_literals_and_indexing() {
        check(&[
            ("{1: 2, 2: 3}[2]", int(3)),
            ("{1: 1, 2: 2}[1]", int(1)),
            (r#"let m = {}; m["x"] = 1; m["x"]"#, int(1)),
            (r#"len({"a": 1, "b": 2})"#, int(2)),
            ("{true: 5}[true]", int(5)),
        ]);
        assert_eq!(run_source(r#"{}["a"]"#), Object::error("key doesn't exist: \"a\""));
        assert_eq!(run_source("{[1]: 2}"), Object::error("unusable as map key: Array"));
        assert_eq!(run_source("{}[[]]"), Object::error("unusable as map key: Array"));
    }

    #[test]
    fn calling_functions() {
        check(&[
            ("let fivePlusTen = fn() { 5 + 10; }; fivePlusTen();", int(15)),
            ("let one = fn() { 1; }; let two = fn() { 2; }; one() + two()", int(3)),
            ("let early = fn() { return 99; 100; }; early();", int(99)),
            ("let noReturn = fn() { }; noReturn();", Object::Null),
            ("let bare = fn() { return; }; bare();", Object::Null),
            ("let identity = fn(a) { a; }; identity(4);", int(4)),
            ("let sum = fn(a, b) { a + b; }; sum(1, 2);", int(3)),
            (
                "let sum = fn(a, b) { let c = a + b; c; }; let outer = fn() { sum(1, 2) + sum(3, 4); }; outer();",
                int(10),
            ),
            ("fn(x) { x * 2 }(21)", int(42)),
        ]);
    }

    #[test]
    fn first_class_functions() {
        check(&[(
            "let returnsOne = fn() { 1; }; let returnsOneReturner = fn() { returnsOne; }; returnsOneReturner()();",
            int(1),
        )]);
    }

    #[test]
    fn locals_shadow_globals() {
        check(&[(
            "let a = 1; let f = fn() { let a = 2; a }; f(); a",
            int(1),
        )]);
        check(&[(
            "let g = 50; let minusOne = fn() { let num = 1; g - num; }; let minusTwo = fn() { let num = 2; g - num; }; minusOne() + minusTwo();",
            int(97),
        )]);
    }

    #[test]
    fn wrong_argument_count_is_fatal() {
        match run_err("fn() { 1; }(1);") {
            VmError::ArityMismatch { want, got } => assert_eq!((want, got), (0, 1)),
            other => panic!("expected arity mismatch, got {:?}", other),
        }
        assert!(matches!(run_err("fn(a, b) { a + b; }(1);"), VmError::ArityMismatch { want: 2, got: 1 }));
    }

    #[test]
    fn calling_non_function_is_error_value() {
        assert_eq!(run_source("1()"), Object::error("calling non-function: Integer"));
        assert_eq!(run_source(r#""f"(1, 2)"#), Object::error("calling non-function: String"));
    }

    #[test]
    fn builtin_functions() {
        check(&[
            (r#"len("")"#, int(0)),
            (r#"len("four")"#, int(4)),
            ("len([1, 2, 3])", int(3)),
            ("len([])", int(0)),
            (r#"puts("hello", "world!")"#, Object::Null),
            ("first([1, 2, 3])", int(1)),
            ("first([])", Object::Null),
            ("last([1, 2, 3])", int(3)),
            ("rest([1, 2, 3])", ints(&[2, 3])),
            ("rest([])", Object::Null),
            ("push([], 1)", ints(&[1])),
            ("let f = fn(xs) { len(xs) }; f([1, 2])", int(2)),
        ]);
        assert_eq!(run_source("len(1)"), Object::error("argument to len not supported, got Integer"));
        assert_eq!(
            run_source(r#"len("one", "two")"#),
            Object::error("wrong number of arguments to len: got 2, want 1")
        );
    }

    #[test]
    fn closures() {
        check(&[
            (
                "let newFunc = fn(x) { return fn(y) { x + y; }; }; let addFive = newFunc(5); addFive(10);",
                int(15),
            ),
            (
                "let newAdder = fn(a, b) { fn(c) { a + b + c } }; let adder = newAdder(1, 2); adder(8);",
                int(11),
            ),
            (
                "let newAdderOuter = fn(a, b) { let c = a + b; fn(d) { let e = d + c; fn(f) { e + f; }; }; }; \
                 let newAdderInner = newAdderOuter(1, 2); let adder = newAdderInner(3); adder(8);",
                int(14),
            ),
            (
                "let newClosure = fn(a, b) { let one = fn() { a; }; let two = fn() { b; }; fn() { one() + two(); }; }; \
                 let closure = newClosure(9, 90); closure();",
                int(99),
            ),
        ]);
    }

    #[test]
    fn captured_variables_are_mutable_per_closure() {
        check(&[
            (
                "let counter = fn() { let n = 0; fn() { n = n + 1; n } }; let c = counter(); c(); c(); c()",
                int(3),
            ),
            (
                "let counter = fn() { let n = 0; fn() { n++ } }; let c = counter(); c(); c()",
                int(1),
            ),
            (
                "let counter = fn() { let n = 0; fn() { n++ } }; let a = counter(); let b = counter(); a(); a(); b()",
                int(0),
            ),
        ]);
    }

    #[test]
    fn recursive_functions() {
        check(&[
            (
                "let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(1);",
                int(0),
            ),
            (
                "let wrapper = fn() { let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(1); }; wrapper();",
                int(0),
            ),
            ("let fact = fn(n) { n < 2 ? 1 : n * fact(n - 1) }; fact(5)", int(120)),
        ]);
    }

    #[test]
    fn recursive_fibonacci() {
        let source = "let fibonacci = fn(x) { \
                        if (x == 0) { return 0; } \
                        if (x == 1) { return 1; } \
                        fibonacci(x - 1) + fibonacci(x - 2); \
                      }; fibonacci(15);";
        assert_eq!(run_source(source), int(610));
    }

    #[test]
    fn recoverable_errors_flow_as_values() {
        assert_eq!(run_source("let x = [][0]; 5"), int(5));
        assert_eq!(run_source("1 + true"), Object::error("type mismatch: Integer + Boolean"));
        assert_eq!(run_source("true + false"), Object::error("unsupported infix: Boolean + Boolean"));
        assert_eq!(run_source("-true"), Object::error("unsupported prefix: -Boolean"));
        assert_eq!(run_source("let e = 1 + true; e * 2"), Object::error("type mismatch: Integer + Boolean"));
    }

    #[test]
    fn integer_division_by_zero_is_fatal() {
        assert!(matches!(run_err("1 / 0"), VmError::DivisionByZero));
    }

    #[test]
    fn unbounded_recursion_overflows() {
        assert!(matches!(run_err("let f = fn() { f() }; f();"), VmError::StackOverflow));
    }

    #[test]
    fn last_popped_after_overflow_is_null() {
        let mut vm = Vm::new(compile("let f = fn(n) { f(n) }; f(1);"));
        assert!(matches!(vm.run(), Err(VmError::StackOverflow)));
        assert_eq!(vm.last_popped(), Object::Null);
    }

    #[test]
    fn local_may_shadow_a_captured_name() {
        let source = "let outer = fn() { let x = 1; fn() { let y = x; let x = 2; y + x } }; outer()()";
        assert_eq!(run_source(source), int(3));
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let bytecode = Bytecode { instructions: vec![250], constants: vec![] };
        assert!(matches!(run(bytecode), Err(VmError::Code(CodeError::UnknownOpcode { op: 250 }))));
    }

    #[test]
    fn globals_carry_into_next_vm() {
        let mut state = compiler::CompilerState::default();
        let mut globals = Vec::new();
        for (source, expected) in [("let a = 40;", Object::Null), ("let b = a + 2;", Object::Null), ("b", int(42))] {
            let (program, _) = parser::parse(lexer::lex(source).unwrap());
            let mut compiler = compiler::Compiler::with_state(state);
            compiler.compile(&program).unwrap();
            let mut vm = Vm::with_globals(compiler.bytecode(), globals);
            state = compiler.into_state();
            vm.run().unwrap();
            assert_eq!(vm.last_popped(), expected, "source: {}", source);
            globals = vm.into_globals();
        }
    }
}
