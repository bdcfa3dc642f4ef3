//! End-to-end tests over the parse-then-lower pipeline.

use std::collections::HashMap;
use std::rc::Rc;

use f90front::ast::{BinaryOpKind, Expr, ProgramUnit, Stmt, Target, TypeKind};
use f90front::diag::Reporter;
use f90front::errors::CompileError;

fn analyze_ok(source: &str) -> ProgramUnit {
    let mut reporter = Reporter::quiet("test.f90", source);
    match f90front::analyze_with(source, &mut reporter) {
        Some(unit) => unit,
        None => panic!("unexpected diagnostics: {:#?}", reporter.errors()),
    }
}

fn analyze_err(source: &str) -> Vec<CompileError> {
    let mut reporter = Reporter::quiet("test.f90", source);
    assert!(
        f90front::analyze_with(source, &mut reporter).is_none(),
        "expected diagnostics for {:?}",
        source
    );
    reporter.take_errors()
}

fn only_assignment_value(unit: &ProgramUnit) -> &Expr {
    match unit.statements() {
        [Stmt::Assign(a)] => &a.value,
        other => panic!("expected a single assignment, got {:#?}", other),
    }
}

#[test]
fn mixed_arithmetic_widens_the_integer_side() {
    let unit = analyze_ok("program t\nx = 1 + 2.5\nend\n");
    match only_assignment_value(&unit) {
        Expr::Binary { op, lhs, rhs } => {
            assert_eq!(*op, BinaryOpKind::Add);
            assert!(matches!(lhs.as_ref(), Expr::IntToFp(_)));
            assert!(matches!(rhs.as_ref(), Expr::Fp32(_)));
        }
        other => panic!("expected binary add, got {:#?}", other),
    }
}

#[test]
fn integer_value_widens_on_assignment_to_real() {
    let unit = analyze_ok("program t\nreal :: x\nx = 3\nend\n");
    assert!(matches!(only_assignment_value(&unit), Expr::IntToFp(_)));
}

#[test]
fn narrowing_assignment_is_rejected() {
    let errors = analyze_err("program t\ninteger :: i\ni = 1.5\nend\n");
    assert!(errors[0].message.contains("cannot assign real to integer"));
}

#[test]
fn subscripts_linearize_column_major() {
    // a(2, 3, 1) in a 10 x 3 x 2 array: ((1-1)*3 + (3-1))*10 + (2-1) = 21
    let unit = analyze_ok("program t\ninteger :: a(10, 3, 2)\nn = a(2, 3, 1)\nend\n");
    match only_assignment_value(&unit) {
        Expr::ArrayElement { offset, .. } => assert_eq!(offset.fold_i32(), Some(21)),
        other => panic!("expected array element, got {:#?}", other),
    }
}

#[test]
fn lower_bounds_shift_the_linear_offset() {
    // b(0, 5) in b(0:4, 5): (5-1)*5 + (0-0) = 20
    let unit = analyze_ok("program t\ninteger :: b(0:4, 5)\nn = b(0, 5)\nend\n");
    match only_assignment_value(&unit) {
        Expr::ArrayElement { offset, .. } => assert_eq!(offset.fold_i32(), Some(20)),
        other => panic!("expected array element, got {:#?}", other),
    }
}

#[test]
fn dimension_statement_declares_the_shape() {
    let unit = analyze_ok("program t\ndimension a(4)\na(2) = 1.0\nend\n");
    let var = unit.variable("a").unwrap();
    assert_eq!(var.borrow().shape().unwrap().extent(0), Some(4));
    assert_eq!(var.borrow().type_kind(), Some(TypeKind::Fp32));
}

#[test]
fn rank_mismatch_is_rejected() {
    let errors = analyze_err("program t\ninteger :: a(4, 4)\nn = a(1)\nend\n");
    assert!(errors[0].message.contains("rank"), "{:?}", errors);
}

#[test]
fn non_constant_array_bound_is_rejected() {
    let errors = analyze_err("program t\ninteger :: n\ninteger :: a(n)\nend\n");
    assert!(
        errors[0].message.contains("constant integer expression"),
        "{:?}",
        errors
    );
}

#[test]
fn subtraction_chains_group_left_to_right() {
    let unit = analyze_ok("program t\nn = 10 - 3 - 2\nend\n");
    assert_eq!(only_assignment_value(&unit).fold_i32(), Some(5));
}

#[test]
fn division_chains_group_left_to_right() {
    let unit = analyze_ok("program t\nn = 100 / 5 / 2\nend\n");
    assert_eq!(only_assignment_value(&unit).fold_i32(), Some(10));
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let unit = analyze_ok("program t\nn = 2 + 3 * 4\nend\n");
    assert_eq!(only_assignment_value(&unit).fold_i32(), Some(14));
}

#[test]
fn parentheses_override_precedence() {
    let unit = analyze_ok("program t\nn = (2 + 3) * 4\nend\n");
    assert_eq!(only_assignment_value(&unit).fold_i32(), Some(20));
}

#[test]
fn undeclared_names_get_implicit_types() {
    let unit = analyze_ok("program t\nindex = 1\nvalue = 2.0\nend\n");
    let index = unit.variable("index").unwrap();
    let value = unit.variable("value").unwrap();
    assert_eq!(index.borrow().type_kind(), Some(TypeKind::I32));
    assert_eq!(value.borrow().type_kind(), Some(TypeKind::Fp32));
}

#[test]
fn declared_and_implicit_variables_share_one_interned_type() {
    let unit = analyze_ok("program t\ninteger :: m\nn = m + 1\nend\n");
    let integer = unit.ty("integer").unwrap();
    let m = unit.variable("m").unwrap();
    let n = unit.variable("n").unwrap();
    assert!(Rc::ptr_eq(m.borrow().ty().unwrap(), integer));
    assert!(Rc::ptr_eq(n.borrow().ty().unwrap(), integer));
}

#[test]
fn every_mention_of_a_name_shares_one_variable() {
    let unit = analyze_ok("program t\ni = 1\nj = i + i\nend\n");
    let i = unit.variable("i").unwrap();
    match unit.statements() {
        [Stmt::Assign(first), Stmt::Assign(second)] => {
            match &first.target {
                Target::Variable(var) => assert!(Rc::ptr_eq(var, i)),
                other => panic!("expected variable target, got {:#?}", other),
            }
            match &second.value {
                Expr::Binary { lhs, rhs, .. } => {
                    match (lhs.as_ref(), rhs.as_ref()) {
                        (Expr::VarRef(a), Expr::VarRef(b)) => {
                            assert!(Rc::ptr_eq(a, i));
                            assert!(Rc::ptr_eq(b, i));
                        }
                        other => panic!("expected variable refs, got {:#?}", other),
                    }
                }
                other => panic!("expected binary add, got {:#?}", other),
            }
        }
        other => panic!("expected two assignments, got {:#?}", other),
    }
}

#[test]
fn do_construct_lowers_to_pretest_form() {
    let unit = analyze_ok("program t\ndo i = 1, 10, 2\nn = i\nend do\nend\n");
    let i = unit.variable("i").unwrap();
    match unit.statements() {
        [Stmt::Do(d)] => {
            assert!(matches!(d.initial.value, Expr::Int32(1)));
            match &d.condition {
                Expr::Binary { op, lhs, rhs } => {
                    assert_eq!(*op, BinaryOpKind::Le);
                    match lhs.as_ref() {
                        Expr::VarRef(var) => assert!(Rc::ptr_eq(var, i)),
                        other => panic!("expected do-variable, got {:#?}", other),
                    }
                    assert!(matches!(rhs.as_ref(), Expr::Int32(10)));
                }
                other => panic!("expected comparison, got {:#?}", other),
            }
            match &d.increment.value {
                Expr::Binary { op, rhs, .. } => {
                    assert_eq!(*op, BinaryOpKind::Add);
                    assert!(matches!(rhs.as_ref(), Expr::Int32(2)));
                }
                other => panic!("expected increment, got {:#?}", other),
            }
            assert_eq!(d.body.statements().len(), 1);
        }
        other => panic!("expected a do construct, got {:#?}", other),
    }
}

#[test]
fn if_lowers_to_a_then_block_and_empty_else() {
    let unit = analyze_ok("program t\nif (i .gt. 0) n = 1\nend\n");
    match unit.statements() {
        [Stmt::If(cons)] => {
            assert_eq!(cons.condition.type_kind(), TypeKind::Logical);
            assert_eq!(cons.then_block.statements().len(), 1);
            assert!(cons.else_block.is_empty());
        }
        other => panic!("expected an if construct, got {:#?}", other),
    }
}

#[test]
fn non_logical_if_condition_is_rejected() {
    let errors = analyze_err("program t\nif (1 + 2) n = 1\nend\n");
    assert!(errors[0].message.contains("logical"), "{:?}", errors);
}

#[test]
fn character_literals_keep_their_case() {
    let unit = analyze_ok("program t\ncharacter(5) :: c\nc = 'Hello'\nprint *, 'World'\nend\n");
    assert_eq!(unit.string_literals(), ["Hello", "World"]);
}

#[test]
fn character_length_defaults_to_one() {
    let unit = analyze_ok("program t\ncharacter :: c\nc = 'x'\nend\n");
    let c = unit.variable("c").unwrap();
    assert_eq!(c.borrow().char_len().unwrap().fold_i32(), Some(1));
}

#[test]
fn conflicting_declarations_are_rejected() {
    let errors = analyze_err("program t\ninteger :: x\nreal :: x\nend\n");
    assert!(errors[0].message.contains("conflicting"), "{:?}", errors);
}

#[test]
fn arithmetic_on_logical_values_is_rejected() {
    let errors = analyze_err("program t\nn = .true. + 1\nend\n");
    assert!(!errors.is_empty());
}

// Small integer-only evaluator, just enough to observe loop behavior.
fn eval(e: &Expr, env: &HashMap<String, i32>) -> i32 {
    match e {
        Expr::Int32(v) => *v,
        // values stay integral here; the cast only changes the static type
        Expr::IntToFp(inner) => eval(inner, env),
        Expr::VarRef(var) => env[var.borrow().name()],
        Expr::Binary { op, lhs, rhs } => {
            let (l, r) = (eval(lhs, env), eval(rhs, env));
            match op {
                BinaryOpKind::Add => l + r,
                BinaryOpKind::Sub => l - r,
                BinaryOpKind::Mul => l * r,
                BinaryOpKind::Div => l / r,
                other => panic!("unsupported operator {:?}", other),
            }
        }
        other => panic!("unsupported expression {:#?}", other),
    }
}

fn eval_cond(e: &Expr, env: &HashMap<String, i32>) -> bool {
    match e {
        Expr::Binary { op, lhs, rhs } => {
            let (l, r) = (eval(lhs, env), eval(rhs, env));
            match op {
                BinaryOpKind::Le => l <= r,
                BinaryOpKind::Lt => l < r,
                BinaryOpKind::Ge => l >= r,
                BinaryOpKind::Gt => l > r,
                BinaryOpKind::Eq => l == r,
                BinaryOpKind::Ne => l != r,
                other => panic!("not a comparison: {:?}", other),
            }
        }
        other => panic!("unsupported condition {:#?}", other),
    }
}

fn run(stmts: &[Stmt], env: &mut HashMap<String, i32>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign(a) => {
                let value = eval(&a.value, env);
                let name = a.target.var().borrow().name().to_string();
                env.insert(name, value);
            }
            Stmt::Do(d) => {
                let value = eval(&d.initial.value, env);
                let name = d.initial.target.var().borrow().name().to_string();
                env.insert(name.clone(), value);
                while eval_cond(&d.condition, env) {
                    run(d.body.statements(), env);
                    let next = eval(&d.increment.value, env);
                    env.insert(name.clone(), next);
                }
            }
            Stmt::If(cons) => {
                if eval_cond(&cons.condition, env) {
                    run(cons.then_block.statements(), env);
                }
            }
            other => panic!("unsupported statement {:#?}", other),
        }
    }
}

#[test]
fn lowered_do_loop_sums_its_range() {
    let unit = analyze_ok(
        "program t\ntotal = 0\ndo i = 1, 10\ntotal = total + i\nend do\nend\n",
    );
    let mut env = HashMap::new();
    run(unit.statements(), &mut env);
    assert_eq!(env["total"], 55);
}

#[test]
fn lowered_do_loop_honors_the_stride() {
    let unit = analyze_ok(
        "program t\ntotal = 0\ndo i = 1, 10, 3\ntotal = total + 1\nend do\nend\n",
    );
    let mut env = HashMap::new();
    run(unit.statements(), &mut env);
    // 1, 4, 7, 10
    assert_eq!(env["total"], 4);
}

#[test]
fn descending_range_runs_zero_times() {
    let unit = analyze_ok(
        "program t\ntotal = 0\ndo i = 5, 1\ntotal = total + 1\nend do\nend\n",
    );
    let mut env = HashMap::new();
    run(unit.statements(), &mut env);
    assert_eq!(env["total"], 0);
    assert_eq!(env["i"], 5);
}
