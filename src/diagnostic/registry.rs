/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str, // one line, used by the JSON renderer's consumers
    pub long: &'static str,  // full explanation for --explain
}

/// Every stable diagnostic code.
pub static REGISTRY: &[ErrorEntry] = &[
    // ---- Lexer ----
    ErrorEntry {
        code: "MK-L001",
        short: "unrecognized input",
        long: r#"## MK-L001: unrecognized input

The source contains text that is not part of any Monkey token.

**Common causes:**
- A single `&` or `|` where `&&` or `||` was meant
- A string literal with no closing `"`
- An integer literal larger than a signed 64-bit value

**Example:**

    let ok = a & b;

**Fix:**

    let ok = a && b;
"#,
    },
    // ---- Parser ----
    ErrorEntry {
        code: "MK-P001",
        short: "expected expression",
        long: r#"## MK-P001: expected expression

A token that cannot start an expression appeared where a value was needed.

**Example:**

    let x = ;
"#,
    },
    ErrorEntry {
        code: "MK-P002",
        short: "expected expression, reached end of input",
        long: r#"## MK-P002: expected expression, reached end of input

The source ended where a value was still needed, usually after a binary
operator or a `let name =`.

**Example:**

    1 +
"#,
    },
    ErrorEntry {
        code: "MK-P003",
        short: "unexpected token",
        long: r#"## MK-P003: unexpected token

A specific token was required here, most often a closing `)`, `]` or `}`,
or the `:` of a `cond ? a : b` expression.

**Example:**

    if (x > 1 { x }
"#,
    },
    ErrorEntry {
        code: "MK-P004",
        short: "unexpected end of input",
        long: r#"## MK-P004: unexpected end of input

The source ended before a construct was closed.

**Example:**

    let f = fn(x) { x
"#,
    },
    ErrorEntry {
        code: "MK-P005",
        short: "expected identifier",
        long: r#"## MK-P005: expected identifier

`let` and function parameter lists must name a binding.

**Example:**

    let 5 = x;
    fn(1, b) { b }
"#,
    },
    ErrorEntry {
        code: "MK-P006",
        short: "expected identifier, reached end of input",
        long: r#"## MK-P006: expected identifier, reached end of input

The source ended right after `let` or inside a parameter list.
"#,
    },
    ErrorEntry {
        code: "MK-P007",
        short: "invalid assignment target",
        long: r#"## MK-P007: invalid assignment target

Only a name or an index expression can appear on the left of `=`.

**Example:**

    1 = 2;
    f() = 3;

**Valid targets:**

    x = 2;
    items[0] = 3;
    table["key"] = 4;
"#,
    },
    ErrorEntry {
        code: "MK-P008",
        short: "unexpected token after expression",
        long: r#"## MK-P008: unexpected token after expression

A complete expression was followed by a token that cannot continue it.
"#,
    },
    // ---- Compiler ----
    ErrorEntry {
        code: "MK-C001",
        short: "undefined identifier",
        long: r#"## MK-C001: undefined identifier

A name is used that no `let`, parameter, enclosing function or builtin
defines. Names must be declared before the code that uses them.

**Example:**

    let y = x + 1;

**Fix:**

    let x = 1;
    let y = x + 1;
"#,
    },
    ErrorEntry {
        code: "MK-C002",
        short: "duplicate definition",
        long: r#"## MK-C002: duplicate definition

`let` declared a name that already exists in the same scope. This also
applies across REPL inputs. To change a binding, assign to it.

**Example:**

    let a = 1;
    let a = 2;

**Fix:**

    let a = 1;
    a = 2;
"#,
    },
    ErrorEntry {
        code: "MK-C003",
        short: "construct not supported by the compiler",
        long: r#"## MK-C003: construct not supported by the compiler

The bytecode compiler does not support this construct. The most common
case is `return` outside of a function body. The tree-walking engine
(`--engine eval`) accepts a top-level `return` and stops the program.
"#,
    },
    ErrorEntry {
        code: "MK-C004",
        short: "binding cannot be assigned",
        long: r#"## MK-C004: binding cannot be assigned

Builtins and a function's own name inside its body are read-only.

**Example:**

    len = 5;
    let f = fn() { f = 1; };
"#,
    },
    ErrorEntry {
        code: "MK-C005",
        short: "too many call arguments",
        long: r#"## MK-C005: too many call arguments

A call passes more than 255 arguments, which does not fit the call
instruction's one-byte operand.
"#,
    },
    ErrorEntry {
        code: "MK-C006",
        short: "too many locals",
        long: r#"## MK-C006: too many locals

A function body defines more than 256 parameters and local bindings.
"#,
    },
    ErrorEntry {
        code: "MK-C007",
        short: "constant pool full",
        long: r#"## MK-C007: constant pool full

The program needs more than 65536 distinct constants.
"#,
    },
    ErrorEntry {
        code: "MK-C008",
        short: "internal compiler error",
        long: r#"## MK-C008: internal compiler error

The compiler produced an instruction it could not encode. This is a
bug in the compiler, not in the program.
"#,
    },
    // ---- VM ----
    ErrorEntry {
        code: "MK-V001",
        short: "stack overflow",
        long: r#"## MK-V001: stack overflow

The operand stack (2048 slots) or call depth (1024 frames) was exhausted,
usually by recursion without a base case.

**Example:**

    let f = fn() { f() };
    f();
"#,
    },
    ErrorEntry {
        code: "MK-V002",
        short: "stack underflow",
        long: r#"## MK-V002: stack underflow

An instruction popped from an empty stack. Bytecode from the compiler
never does this; it indicates malformed bytecode.
"#,
    },
    ErrorEntry {
        code: "MK-V003",
        short: "wrong number of arguments",
        long: r#"## MK-V003: wrong number of arguments

A function was called with a different number of arguments than it
declares parameters.

**Example:**

    let add = fn(a, b) { a + b };
    add(1);
"#,
    },
    ErrorEntry {
        code: "MK-V004",
        short: "integer division by zero",
        long: r#"## MK-V004: integer division by zero

Both operands of `/` were integers and the divisor was zero. Division
involving a double follows floating-point rules instead.
"#,
    },
    ErrorEntry {
        code: "MK-V005",
        short: "malformed bytecode",
        long: r#"## MK-V005: malformed bytecode

The VM met an unknown opcode, an out-of-range constant, global or builtin
index, or a return from the top-level frame. Bytecode from the compiler
never does this.
"#,
    },
    // ---- Evaluator ----
    ErrorEntry {
        code: "MK-R001",
        short: "runtime error",
        long: r#"## MK-R001: runtime error

The tree-walking engine stopped. Unlike the VM, it treats every error
value (type mismatch, bad index, builtin misuse) as fatal, and also
reports undefined names and calls with the wrong number of arguments.
"#,
    },
    ErrorEntry {
        code: "MK-E001",
        short: "program produced an error value",
        long: r#"## MK-E001: program produced an error value

The last expression evaluated to an error value. Error values come from
operators on unsupported types, bad index operations, calling a
non-function and builtin misuse. They do not stop the VM; they are
reported when they reach the end of the program.

**Example:**

    1 + true

yields `Error: type mismatch: Integer + Boolean`.
"#,
    },
];

/// Look up an error entry by code (e.g. `"MK-C001"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_code() {
        let e = lookup("MK-C001").expect("MK-C001 should be in registry");
        assert_eq!(e.code, "MK-C001");
        assert!(!e.short.is_empty());
        assert!(e.long.contains("MK-C001"));
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("MK-XXXX").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let len_before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), len_before, "duplicate codes in registry");
    }

    #[test]
    fn long_form_is_headed_by_its_code() {
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(entry.long.starts_with(&format!("## {}:", entry.code)), "{} has a mismatched heading", entry.code);
        }
    }
}
