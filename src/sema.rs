//! Semantic lowering: resolves names, assigns types, inserts widening
//! conversions, and rewrites array subscripts into linear element offsets.
//!
//! Lowering walks the whole tree even after an error so one pass reports as
//! many problems as possible; an erroneous subtree simply produces no
//! statement. The typed unit is only handed out when the reporter stayed
//! clean.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{
    self, BinaryOpKind, Bound, Expr, Shape, Target, Type, TypeKind, VarHandle,
};
use crate::cst::{self, Constant, Op, Span};
use crate::diag::Reporter;
use crate::errors::CompileErrorKind;

pub struct SymbolTable {
    variables: HashMap<String, VarHandle>,
    types: HashMap<String, Rc<Type>>,
}

impl SymbolTable {
    fn new() -> Self {
        Self {
            variables: HashMap::new(),
            types: HashMap::new(),
        }
    }

    /// Returns the unique handle for `name`, creating an untyped variable on
    /// first sight. Every mention of a name shares one handle.
    pub fn get_or_create(&mut self, name: &str) -> VarHandle {
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(ast::Variable::new(name))))
            .clone()
    }

    fn intern_type(&mut self, name: &str, kind: TypeKind) -> Rc<Type> {
        self.types
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(Type::new(kind)))
            .clone()
    }
}

/// Default type for an undeclared name: first letter i through n means
/// integer, anything else real.
fn implicit_type_of(name: &str) -> (&'static str, TypeKind) {
    match name.as_bytes().first() {
        Some(b'i'..=b'n') => ("integer", TypeKind::I32),
        _ => ("real", TypeKind::Fp32),
    }
}

/// Lowers a parsed program through a caller-supplied diagnostics sink.
/// Returns `None` when lowering added any diagnostic.
pub fn lower_with(program: &cst::Program, reporter: &mut Reporter<'_>) -> Option<ast::ProgramUnit> {
    let errors_before = reporter.errors().len();
    let mut lowerer = Lowerer {
        symbols: SymbolTable::new(),
        strings: Vec::new(),
        reporter,
    };
    let unit = lowerer.lower_unit(program);
    if lowerer.reporter.errors().len() > errors_before {
        None
    } else {
        Some(unit)
    }
}

struct Lowerer<'a, 'r> {
    symbols: SymbolTable,
    strings: Vec<String>,
    reporter: &'a mut Reporter<'r>,
}

impl Lowerer<'_, '_> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.reporter
            .error(CompileErrorKind::Semantic, span, message);
    }

    fn lower_unit(&mut self, program: &cst::Program) -> ast::ProgramUnit {
        log::debug!("lowering program unit '{}'", program.name);
        for spec in &program.specifications {
            self.lower_specification(spec);
        }
        let mut statements = Vec::new();
        for exec in &program.executables {
            if let Some(stmt) = self.lower_executable(exec) {
                statements.push(stmt);
            }
        }
        self.finalize_types();
        let SymbolTable { variables, types } = std::mem::replace(&mut self.symbols, SymbolTable::new());
        ast::ProgramUnit::new(
            program.name.clone(),
            statements,
            variables,
            types,
            std::mem::take(&mut self.strings),
        )
    }

    /// Gives every variable the parser saw but no declaration typed its
    /// implicit type.
    fn finalize_types(&mut self) {
        let untyped: Vec<VarHandle> = self
            .symbols
            .variables
            .values()
            .filter(|v| v.borrow().type_kind().is_none())
            .cloned()
            .collect();
        for var in untyped {
            self.ensure_type(&var);
        }
    }

    fn ensure_type(&mut self, var: &VarHandle) {
        if var.borrow().type_kind().is_some() {
            return;
        }
        let name = var.borrow().name().to_string();
        let (type_name, kind) = implicit_type_of(&name);
        log::trace!("implicitly typing {} as {}", name, type_name);
        let ty = self.symbols.intern_type(type_name, kind);
        var.borrow_mut().set_type(ty);
    }

    // ---- specifications --------------------------------------------------

    fn lower_specification(&mut self, spec: &cst::Specification) {
        match spec {
            cst::Specification::TypeDeclaration {
                type_name,
                len,
                entities,
                span,
            } => self.lower_type_declaration(type_name, len.as_ref(), entities, span),
            cst::Specification::Dimension { specs, .. } => {
                for spec in specs {
                    let var = self.symbols.get_or_create(&spec.array_name);
                    if let Some(shape) = self.lower_shape(&spec.array_spec) {
                        if var.borrow().shape().is_some() {
                            self.error(
                                spec.span.clone(),
                                format!("{} already has a dimension", spec.array_name),
                            );
                        } else {
                            var.borrow_mut().set_shape(shape);
                        }
                    }
                }
            }
        }
    }

    fn lower_type_declaration(
        &mut self,
        type_name: &str,
        len: Option<&cst::Expression>,
        entities: &[cst::EntityDecl],
        span: &Span,
    ) {
        let kind = match type_name {
            "integer" => TypeKind::I32,
            "real" => TypeKind::Fp32,
            "logical" => TypeKind::Logical,
            "character" => TypeKind::Character,
            _ => {
                self.error(span.clone(), format!("unsupported type {}", type_name));
                return;
            }
        };
        let ty = self.symbols.intern_type(type_name, kind);

        // one length expression, shared by every entity of the declaration
        let char_len = if kind == TypeKind::Character {
            Some(match len {
                Some(exp) => match self.lower_expr(exp) {
                    Some(lowered) if lowered.fold_i32().is_some() => lowered,
                    Some(_) => {
                        self.error(
                            exp.span(),
                            "character length must be a constant integer expression",
                        );
                        Expr::Int32(1)
                    }
                    None => Expr::Int32(1),
                },
                None => Expr::Int32(1),
            })
        } else {
            None
        };

        for entity in entities {
            let var = self.symbols.get_or_create(&entity.name);
            let conflicting = {
                let mut v = var.borrow_mut();
                match v.type_kind() {
                    Some(existing) if existing != kind => true,
                    Some(_) => false,
                    None => {
                        v.set_type(ty.clone());
                        if let Some(len) = &char_len {
                            v.set_char_len(len.clone());
                        }
                        false
                    }
                }
            };
            if conflicting {
                self.error(
                    entity.span.clone(),
                    format!("conflicting type declaration for {}", entity.name),
                );
                continue;
            }
            if let Some(dims) = &entity.array_spec {
                if let Some(shape) = self.lower_shape(dims) {
                    if var.borrow().shape().is_some() {
                        self.error(
                            entity.span.clone(),
                            format!("{} already has a dimension", entity.name),
                        );
                    } else {
                        var.borrow_mut().set_shape(shape);
                    }
                }
            }
        }
    }

    fn lower_shape(&mut self, dims: &[cst::DimBounds]) -> Option<Shape> {
        let mut bounds = Vec::new();
        let mut ok = true;
        for dim in dims {
            let lower = match &dim.lower {
                Some(exp) => self.lower_bound_expr(exp),
                None => Some(Expr::Int32(1)),
            };
            let upper = self.lower_bound_expr(&dim.upper);
            match (lower, upper) {
                (Some(lower), Some(upper)) => bounds.push(Bound { lower, upper }),
                _ => ok = false,
            }
        }
        if ok {
            Some(Shape::new(bounds))
        } else {
            None
        }
    }

    fn lower_bound_expr(&mut self, exp: &cst::Expression) -> Option<Expr> {
        let lowered = self.lower_expr(exp)?;
        if lowered.fold_i32().is_none() {
            self.error(
                exp.span(),
                "array bound must be a constant integer expression",
            );
            return None;
        }
        Some(lowered)
    }

    // ---- executable constructs -------------------------------------------

    fn lower_executable(&mut self, exec: &cst::ExecutableConstruct) -> Option<ast::Stmt> {
        match exec {
            cst::ExecutableConstruct::Assignment(a) => {
                self.lower_assignment(a).map(ast::Stmt::Assign)
            }
            cst::ExecutableConstruct::Print { elements, .. } => {
                let mut lowered = Vec::new();
                let mut ok = true;
                for exp in elements {
                    match self.lower_expr(exp) {
                        Some(e) => lowered.push(e),
                        None => ok = false,
                    }
                }
                ok.then(|| ast::Stmt::Output { elements: lowered })
            }
            cst::ExecutableConstruct::If {
                condition, action, ..
            } => {
                // lower both halves before bailing so each reports its own
                // problems
                let cond = self.lower_expr(condition);
                let stmt = self.lower_executable(action);
                let cond = cond?;
                if cond.type_kind() != TypeKind::Logical {
                    self.error(
                        condition.span(),
                        "if-stmt condition must be a logical expression",
                    );
                    return None;
                }
                let mut then_block = ast::Block::default();
                then_block.push(stmt?);
                Some(ast::Stmt::If(ast::IfConstruct {
                    condition: cond,
                    then_block,
                    else_block: ast::Block::default(),
                }))
            }
            cst::ExecutableConstruct::DoWithCounter(d) => self.lower_do(d).map(ast::Stmt::Do),
        }
    }

    fn lower_assignment(&mut self, a: &cst::Assignment) -> Option<ast::Assignment> {
        let target = self.lower_designator(&a.target);
        let value = self.lower_expr(&a.value);
        let target = target?;
        let value = self.coerce_to(target.type_kind(), value?, &a.value.span())?;
        Some(ast::Assignment { target, value })
    }

    fn lower_designator(&mut self, d: &cst::Designator) -> Option<Target> {
        let var = self.symbols.get_or_create(&d.name);
        self.ensure_type(&var);
        match &d.subscripts {
            None => {
                if var.borrow().shape().is_some() {
                    self.error(
                        d.span.clone(),
                        format!("{} is an array and requires subscripts", d.name),
                    );
                    return None;
                }
                Some(Target::Variable(var))
            }
            Some(subscripts) => {
                let offset = self.linearize(&var, subscripts, &d.span)?;
                Some(Target::ArrayElement {
                    var,
                    offset: Box::new(offset),
                })
            }
        }
    }

    /// Rewrites a subscript list into one zero-based linear offset. Column
    /// major: the first subscript varies fastest, so the fold runs from the
    /// last dimension inward, scaling by each inner dimension's extent.
    fn linearize(
        &mut self,
        var: &VarHandle,
        subscripts: &[cst::Expression],
        span: &Span,
    ) -> Option<Expr> {
        let shape = var.borrow().shape().cloned();
        let shape = match shape {
            Some(shape) => shape,
            None => {
                let name = var.borrow().name().to_string();
                self.error(span.clone(), format!("{} is not declared as an array", name));
                return None;
            }
        };
        if subscripts.len() != shape.rank() {
            let name = var.borrow().name().to_string();
            self.error(
                span.clone(),
                format!(
                    "{} has rank {} but {} subscripts were given",
                    name,
                    shape.rank(),
                    subscripts.len()
                ),
            );
            return None;
        }

        let mut zero_based = Vec::new();
        let mut ok = true;
        for (dim, subscript) in subscripts.iter().enumerate() {
            match self.lower_expr(subscript) {
                Some(index) => {
                    if index.type_kind() != TypeKind::I32 {
                        self.error(
                            subscript.span(),
                            "array subscript must be an integer expression",
                        );
                        ok = false;
                        continue;
                    }
                    zero_based.push(Expr::sub(index, shape.lower(dim).clone()));
                }
                None => ok = false,
            }
        }
        if !ok {
            return None;
        }

        let mut acc = zero_based.pop()?;
        for dim in (0..shape.rank() - 1).rev() {
            let extent = match shape.extent(dim) {
                Some(extent) => extent,
                None => {
                    self.error(span.clone(), "array extent is not a constant");
                    return None;
                }
            };
            let index = zero_based.pop()?;
            acc = Expr::add(Expr::mul(acc, Expr::Int32(extent)), index);
        }
        Some(acc)
    }

    /// Desugars the counted loop into pretest form. The continuation test is
    /// `var <= limit`, checked before every iteration, so a limit below the
    /// initial value yields zero iterations.
    fn lower_do(&mut self, d: &cst::DoConstruct) -> Option<ast::DoConstruct> {
        let var = self.symbols.get_or_create(&d.variable);
        self.ensure_type(&var);
        let var_kind = var.borrow().type_kind().unwrap_or(TypeKind::I32);
        if !var_kind.is_numeric() {
            self.error(
                d.variable_span.clone(),
                "do-variable must be integer or real",
            );
            return None;
        }
        if var.borrow().shape().is_some() {
            self.error(d.variable_span.clone(), "do-variable must be scalar");
            return None;
        }

        let start = self.lower_expr(&d.start);
        let limit = self.lower_expr(&d.end);
        let stride = match &d.stride {
            Some(exp) => self.lower_expr(exp),
            None => Some(Expr::Int32(1)),
        };

        let start = self.coerce_to(var_kind, start?, &d.start.span())?;
        let initial = ast::Assignment {
            target: Target::Variable(var.clone()),
            value: start,
        };

        let stride_span = d.stride.as_ref().map_or_else(|| d.span.clone(), |e| e.span());
        let (step_lhs, step_rhs) =
            self.coerce_operands(Expr::VarRef(var.clone()), stride?, &stride_span)?;
        let step = self.coerce_to(var_kind, Expr::add(step_lhs, step_rhs), &stride_span)?;
        let increment = ast::Assignment {
            target: Target::Variable(var.clone()),
            value: step,
        };

        let (cond_lhs, cond_rhs) =
            self.coerce_operands(Expr::VarRef(var.clone()), limit?, &d.end.span())?;
        let condition = Expr::le(cond_lhs, cond_rhs);

        let mut body = ast::Block::default();
        for exec in &d.body {
            if let Some(stmt) = self.lower_executable(exec) {
                body.push(stmt);
            }
        }
        Some(ast::DoConstruct {
            initial,
            condition,
            increment,
            body,
        })
    }

    // ---- expressions -----------------------------------------------------

    fn lower_expr(&mut self, exp: &cst::Expression) -> Option<Expr> {
        match exp {
            cst::Expression::Constant { value, span } => self.lower_constant(value, span),
            cst::Expression::Variable { name, span } => {
                let var = self.symbols.get_or_create(name);
                self.ensure_type(&var);
                if var.borrow().shape().is_some() {
                    self.error(
                        span.clone(),
                        format!("{} is an array and requires subscripts", name),
                    );
                    return None;
                }
                Some(Expr::VarRef(var))
            }
            cst::Expression::ArrayElement {
                name,
                subscripts,
                span,
            } => {
                let var = self.symbols.get_or_create(name);
                self.ensure_type(&var);
                let offset = self.linearize(&var, subscripts, span)?;
                Some(Expr::ArrayElement {
                    var,
                    offset: Box::new(offset),
                })
            }
            cst::Expression::Operator {
                operands,
                operators,
                span,
            } => {
                let mut acc = self.lower_expr(&operands[0])?;
                for (op, operand) in operators.iter().zip(&operands[1..]) {
                    let rhs = self.lower_expr(operand)?;
                    acc = self.lower_binary(*op, acc, rhs, span)?;
                }
                Some(acc)
            }
        }
    }

    fn lower_binary(&mut self, op: Op, lhs: Expr, rhs: Expr, span: &Span) -> Option<Expr> {
        let op = binary_op_kind(op);
        let (lhs, rhs) = self.coerce_operands(lhs, rhs, span)?;
        let kind = lhs.type_kind();
        if op.is_arithmetic() {
            if !kind.is_numeric() {
                self.error(
                    span.clone(),
                    format!("operands of arithmetic operator must be numeric, not {}", kind),
                );
                return None;
            }
        } else {
            match kind {
                TypeKind::Character => {
                    self.error(span.clone(), "character operands cannot be compared");
                    return None;
                }
                TypeKind::Logical
                    if !matches!(op, BinaryOpKind::Eq | BinaryOpKind::Ne) =>
                {
                    self.error(
                        span.clone(),
                        "logical operands support only equality comparison",
                    );
                    return None;
                }
                _ => {}
            }
        }
        Some(Expr::binary(op, lhs, rhs))
    }

    /// Brings two operands to a common type, widening the integer side when
    /// the other is real.
    fn coerce_operands(&mut self, lhs: Expr, rhs: Expr, span: &Span) -> Option<(Expr, Expr)> {
        let (lk, rk) = (lhs.type_kind(), rhs.type_kind());
        if lk == rk {
            return Some((lhs, rhs));
        }
        match (lk, rk) {
            (TypeKind::I32, TypeKind::Fp32) => Some((Expr::widen(lhs), rhs)),
            (TypeKind::Fp32, TypeKind::I32) => Some((lhs, Expr::widen(rhs))),
            _ => {
                self.error(
                    span.clone(),
                    format!("operand types {} and {} are incompatible", lk, rk),
                );
                None
            }
        }
    }

    /// Coerces a value to an expected type. Only integer-to-real widening is
    /// allowed; everything else is a type mismatch.
    fn coerce_to(&mut self, expected: TypeKind, value: Expr, span: &Span) -> Option<Expr> {
        let got = value.type_kind();
        if got == expected {
            return Some(value);
        }
        if expected == TypeKind::Fp32 && got == TypeKind::I32 {
            return Some(Expr::widen(value));
        }
        self.error(
            span.clone(),
            format!("type mismatch: cannot assign {} to {}", got, expected),
        );
        None
    }

    fn lower_constant(&mut self, value: &Constant, span: &Span) -> Option<Expr> {
        match value {
            Constant::Int(text) => match text.parse::<i32>() {
                Ok(value) => Some(Expr::Int32(value)),
                Err(_) => {
                    self.error(span.clone(), "integer constant out of range");
                    None
                }
            },
            Constant::Real(text) => match text.parse::<f32>() {
                Ok(value) => Some(Expr::Fp32(value)),
                Err(_) => {
                    self.error(span.clone(), "invalid real constant");
                    None
                }
            },
            Constant::Logical(value) => Some(Expr::Logical(*value)),
            Constant::Character(text) => {
                if !self.strings.iter().any(|s| s == text) {
                    self.strings.push(text.clone());
                }
                Some(Expr::Character(text.clone()))
            }
        }
    }
}

fn binary_op_kind(op: Op) -> BinaryOpKind {
    match op {
        Op::Add => BinaryOpKind::Add,
        Op::Sub => BinaryOpKind::Sub,
        Op::Mul => BinaryOpKind::Mul,
        Op::Div => BinaryOpKind::Div,
        Op::Eq => BinaryOpKind::Eq,
        Op::Ne => BinaryOpKind::Ne,
        Op::Lt => BinaryOpKind::Lt,
        Op::Le => BinaryOpKind::Le,
        Op::Gt => BinaryOpKind::Gt,
        Op::Ge => BinaryOpKind::Ge,
    }
}
