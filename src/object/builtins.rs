use std::fmt;
use std::io::Write;

use super::Object;

pub type BuiltinFn = fn(&[Object]) -> Object;

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

/// Positional registry. The compiler bakes these indices into `OpGetBuiltin`,
/// so entries are only ever appended.
pub static BUILTINS: &[Builtin] = &[
    Builtin { name: "len", func: len },
    Builtin { name: "puts", func: puts },
    Builtin { name: "first", func: first },
    Builtin { name: "last", func: last },
    Builtin { name: "rest", func: rest },
    Builtin { name: "push", func: push },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

fn arity(name: &str, args: &[Object], want: usize) -> Option<Object> {
    if args.len() == want {
        None
    } else {
        Some(Object::error(format!(
            "wrong number of arguments to {}: got {}, want {}",
            name,
            args.len(),
            want
        )))
    }
}

fn len(args: &[Object]) -> Object {
    if let Some(err) = arity("len", args, 1) {
        return err;
    }
    match &args[0] {
        Object::Str(s) => Object::Integer(s.chars().count() as i64),
        Object::Array(items) => Object::Integer(items.borrow().len() as i64),
        Object::Map(store) => Object::Integer(store.borrow().len() as i64),
        other => Object::error(format!("argument to len not supported, got {}", other.kind())),
    }
}

fn puts(args: &[Object]) -> Object {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for arg in args {
        // Output errors are not observable from the language
        let _ = match arg {
            Object::Str(s) => writeln!(out, "{}", s),
            other => writeln!(out, "{}", other),
        };
    }
    Object::Null
}

/// Apply `f` to the single array argument of builtin `name`.
fn with_array(name: &str, args: &[Object], want: usize, f: impl FnOnce(&[Object]) -> Object) -> Object {
    if let Some(err) = arity(name, args, want) {
        return err;
    }
    match &args[0] {
        Object::Array(items) => f(items.borrow().as_slice()),
        other => Object::error(format!("argument to {} must be Array, got {}", name, other.kind())),
    }
}

fn first(args: &[Object]) -> Object {
    with_array("first", args, 1, |items| items.first().cloned().unwrap_or(Object::Null))
}

fn last(args: &[Object]) -> Object {
    with_array("last", args, 1, |items| items.last().cloned().unwrap_or(Object::Null))
}

fn rest(args: &[Object]) -> Object {
    with_array("rest", args, 1, |items| match items.split_first() {
        Some((_, tail)) => Object::array(tail.to_vec()),
        None => Object::Null,
    })
}

fn push(args: &[Object]) -> Object {
    with_array("push", args, 2, |items| {
        let mut extended = items.to_vec();
        extended.push(args[1].clone());
        Object::array(extended)
    })
}
