//! Runtime values shared by the bytecode VM and the tree-walking evaluator.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Block;
use crate::code::Instructions;
use crate::interpreter::Env;

pub mod builtins;
pub mod ops;

pub use builtins::{BUILTINS, Builtin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Integer,
    Double,
    Boolean,
    String,
    Null,
    Array,
    Map,
    CompiledFunction,
    Closure,
    Builtin,
    Function,
    Error,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Type-tagged, exact identity of a hashable value.
///
/// Doubles hash by bit pattern so `1` and `1.0` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Double(u64),
    Boolean(bool),
    Str(Rc<str>),
    Null,
}

/// A map slot keeps the original key object for display and iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub key: Object,
    pub value: Object,
}

pub type MapStore = IndexMap<HashKey, MapEntry>;

/// A function body as emitted by the compiler; stored in the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
    pub name: Option<String>,
}

/// A compiled function paired with the values it captured.
#[derive(Debug)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: RefCell<Vec<Object>>,
}

impl Closure {
    pub fn new(function: Rc<CompiledFunction>, free: Vec<Object>) -> Self {
        Closure { function, free: RefCell::new(free) }
    }
}

/// A function value in the tree-walking evaluator, closing over its defining environment.
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Block,
    pub env: Env,
}

// The environment may contain this very function; keep Debug shallow.
impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Object {
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Str(Rc<str>),
    Null,
    Array(Rc<RefCell<Vec<Object>>>),
    Map(Rc<RefCell<MapStore>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(&'static Builtin),
    Function(Rc<Function>),
    /// Recoverable runtime error; flows through the program like any other value.
    Error(Rc<str>),
}

impl Object {
    pub fn string(s: impl Into<Rc<str>>) -> Object {
        Object::Str(s.into())
    }

    pub fn array(items: Vec<Object>) -> Object {
        Object::Array(Rc::new(RefCell::new(items)))
    }

    pub fn map(store: MapStore) -> Object {
        Object::Map(Rc::new(RefCell::new(store)))
    }

    pub fn error(message: impl Into<String>) -> Object {
        Object::Error(Rc::from(message.into()))
    }

    pub fn kind(&self) -> ObjectType {
        match self {
            Object::Integer(_) => ObjectType::Integer,
            Object::Double(_) => ObjectType::Double,
            Object::Boolean(_) => ObjectType::Boolean,
            Object::Str(_) => ObjectType::String,
            Object::Null => ObjectType::Null,
            Object::Array(_) => ObjectType::Array,
            Object::Map(_) => ObjectType::Map,
            Object::CompiledFunction(_) => ObjectType::CompiledFunction,
            Object::Closure(_) => ObjectType::Closure,
            Object::Builtin(_) => ObjectType::Builtin,
            Object::Function(_) => ObjectType::Function,
            Object::Error(_) => ObjectType::Error,
        }
    }

    /// Map-key identity; `None` for unhashable values.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Object::Integer(n) => Some(HashKey::Integer(*n)),
            Object::Double(n) => Some(HashKey::Double(n.to_bits())),
            Object::Boolean(b) => Some(HashKey::Boolean(*b)),
            Object::Str(s) => Some(HashKey::Str(Rc::clone(s))),
            Object::Null => Some(HashKey::Null),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Object::Error(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }
}

/// Null is falsy, booleans are themselves, integer zero is falsy, everything else is truthy.
pub fn truthy(obj: &Object) -> bool {
    match obj {
        Object::Null => false,
        Object::Boolean(b) => *b,
        Object::Integer(n) => *n != 0,
        _ => true,
    }
}

/// Boolean-context conversion used by `&&`, `||` and `==` against a boolean:
/// null is false, booleans are themselves, every other value is true.
pub fn implicit_bool(obj: &Object) -> bool {
    match obj {
        Object::Null => false,
        Object::Boolean(b) => *b,
        _ => true,
    }
}

/// Structural equality for tests and constant comparison; the language's `==`
/// lives in [`ops::equals`].
impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Double(a), Object::Double(b)) => a.to_bits() == b.to_bits(),
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Null, Object::Null) => true,
            (Object::Array(a), Object::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Object::Map(a), Object::Map(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Object::CompiledFunction(a), Object::CompiledFunction(b)) => a == b,
            (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
            (Object::Builtin(a), Object::Builtin(b)) => a.name == b.name,
            (Object::Function(a), Object::Function(b)) => Rc::ptr_eq(a, b),
            (Object::Error(a), Object::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Object {
    fn from(n: i64) -> Self {
        Object::Integer(n)
    }
}

impl From<f64> for Object {
    fn from(n: f64) -> Self {
        Object::Double(n)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Boolean(b)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Object::string(s)
    }
}

fn write_function_header(f: &mut fmt::Formatter<'_>, name: &Option<String>) -> fmt::Result {
    match name {
        Some(name) => write!(f, "fn<{}>", name),
        None => write!(f, "fn"),
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(n) => write!(f, "{}", n),
            Object::Double(n) => write!(f, "{:?}", n),
            Object::Boolean(b) => write!(f, "{}", b),
            Object::Str(s) => write!(f, "{:?}", s),
            Object::Null => write!(f, "null"),
            Object::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Object::Map(store) => {
                write!(f, "{{")?;
                for (i, entry) in store.borrow().values().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", entry.key, entry.value)?;
                }
                write!(f, "}}")
            }
            Object::CompiledFunction(func) => {
                write_function_header(f, &func.name)?;
                write!(f, "/{} [compiled]", func.num_parameters)
            }
            Object::Closure(closure) => {
                write_function_header(f, &closure.function.name)?;
                write!(f, "/{} [closure]", closure.function.num_parameters)
            }
            Object::Builtin(builtin) => write!(f, "builtin {}", builtin.name),
            Object::Function(func) => {
                write_function_header(f, &func.name)?;
                write!(f, "({}) {}", func.params.join(", "), func.body)
            }
            Object::Error(message) => write!(f, "Error: {}", message),
        }
    }
}
