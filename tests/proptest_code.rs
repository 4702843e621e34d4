//! Property-based tests for instruction encoding and for agreement between
//! the two execution engines.

use monkey::code::{Opcode, make, read_operands};
use monkey::object::Object;
use monkey::{compiler, interpreter, lexer, parser, vm};
use proptest::prelude::*;

// =============================================================================
// Helpers
// =============================================================================

fn operands_for(op: Opcode, wide: u16, narrow: u8) -> Vec<usize> {
    op.definition()
        .operand_widths
        .iter()
        .map(|width| if *width == 2 { wide as usize } else { narrow as usize })
        .collect()
}

fn run_both(source: &str) -> (Object, Object) {
    let (program, errors) = parser::parse(lexer::lex(source).unwrap());
    assert!(errors.is_empty(), "parse errors for {:?}: {:?}", source, errors);
    let bytecode = compiler::compile(&program).unwrap();
    let from_vm = vm::run(bytecode).unwrap();
    let from_eval = interpreter::eval(&program).unwrap();
    (from_vm, from_eval)
}

fn arb_small_int() -> impl Strategy<Value = i64> {
    -1_000_000i64..1_000_000i64
}

// =============================================================================
// Encoding
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn read_operands_inverts_make(index in 0..Opcode::ALL.len(), wide in any::<u16>(), narrow in any::<u8>()) {
        let op = Opcode::ALL[index];
        let operands = operands_for(op, wide, narrow);
        let ins = make(op, &operands).unwrap();
        let def = op.definition();

        prop_assert_eq!(ins[0], op as u8);
        prop_assert_eq!(ins.len(), 1 + def.operand_widths.iter().sum::<usize>());
        let (decoded, read) = read_operands(&def, &ins[1..]).unwrap();
        prop_assert_eq!(decoded, operands);
        prop_assert_eq!(read, ins.len() - 1);
    }

    #[test]
    fn too_wide_operands_are_rejected(index in 0..Opcode::ALL.len(), extra in 1usize..1000) {
        let op = Opcode::ALL[index];
        let widths = op.definition().operand_widths;
        prop_assume!(!widths.is_empty());
        let mut operands: Vec<usize> = widths.iter().map(|_| 0).collect();
        operands[0] = (1usize << (8 * widths[0])) - 1 + extra;
        prop_assert!(make(op, &operands).is_err());
    }
}

// =============================================================================
// Engines agree
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn integer_arithmetic_matches(a in arb_small_int(), b in arb_small_int(), c in 1i64..1000) {
        let source = format!("({a}) + ({b}) * ({c}) - ({b}) / ({c})");
        let expected = Object::Integer(a + b * c - b / c);
        let (from_vm, from_eval) = run_both(&source);
        prop_assert_eq!(&from_vm, &expected);
        prop_assert_eq!(&from_eval, &expected);
    }

    #[test]
    fn comparisons_match(a in arb_small_int(), b in arb_small_int()) {
        let source = format!("[({a}) < ({b}), ({a}) > ({b}), ({a}) == ({b}), ({a}) != ({b})]");
        let expected = Object::array(vec![
            Object::Boolean(a < b),
            Object::Boolean(a > b),
            Object::Boolean(a == b),
            Object::Boolean(a != b),
        ]);
        let (from_vm, from_eval) = run_both(&source);
        prop_assert_eq!(&from_vm, &expected);
        prop_assert_eq!(&from_eval, &expected);
    }

    #[test]
    fn loop_with_closure_counter_matches(n in 0i64..50) {
        let source = format!(
            "let make = fn() {{ let total = 0; fn(x) {{ total = total + x; total }} }}; \
             let add = make(); let i = 0; let last = 0; \
             while (i < {n}) {{ last = add(i); i++; }} last"
        );
        let expected = Object::Integer((0..n).sum::<i64>());
        let (from_vm, from_eval) = run_both(&source);
        prop_assert_eq!(&from_vm, &expected);
        prop_assert_eq!(&from_eval, &expected);
    }
}
