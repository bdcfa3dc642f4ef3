//! Typed abstract syntax tree produced by semantic lowering.
//!
//! Variables are interned: every reference to a name resolves to the same
//! [`VarHandle`], so cloning an expression duplicates structure but keeps
//! variable identity. Conversions are explicit — an [`Expr::IntToFp`] node
//! marks every spot where an integer value widens to floating point — and
//! array accesses carry a precomputed linear element offset instead of the
//! original subscript list.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type VarHandle = Rc<RefCell<Variable>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Logical,
    I32,
    Fp32,
    Character,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Logical => "logical",
            TypeKind::I32 => "integer",
            TypeKind::Fp32 => "real",
            TypeKind::Character => "character",
        };
        f.write_str(name)
    }
}

impl TypeKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, TypeKind::I32 | TypeKind::Fp32)
    }
}

/// An interned type; one instance per type name in a program unit.
#[derive(Debug, PartialEq, Eq)]
pub struct Type {
    kind: TypeKind,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }
}

#[derive(Debug)]
pub struct Variable {
    name: String,
    ty: Option<Rc<Type>>,
    shape: Option<Shape>,
    char_len: Option<Expr>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            shape: None,
            char_len: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> Option<&Rc<Type>> {
        self.ty.as_ref()
    }

    /// `None` until a declaration or the implicit-typing fallback assigns
    /// one; lowering guarantees every variable is typed before the unit is
    /// handed out.
    pub fn type_kind(&self) -> Option<TypeKind> {
        self.ty.as_ref().map(|t| t.kind())
    }

    pub fn set_type(&mut self, ty: Rc<Type>) {
        self.ty = Some(ty);
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.shape = Some(shape);
    }

    pub fn char_len(&self) -> Option<&Expr> {
        self.char_len.as_ref()
    }

    pub fn set_char_len(&mut self, len: Expr) {
        self.char_len = Some(len);
    }
}

/// Declared bounds of one array dimension. Both bounds are constant
/// expressions; lowering rejects anything it cannot fold.
#[derive(Debug, Clone)]
pub struct Bound {
    pub lower: Expr,
    pub upper: Expr,
}

#[derive(Debug, Clone)]
pub struct Shape {
    bounds: Vec<Bound>,
}

impl Shape {
    pub fn new(bounds: Vec<Bound>) -> Self {
        Self { bounds }
    }

    pub fn rank(&self) -> usize {
        self.bounds.len()
    }

    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    pub fn lower(&self, dim: usize) -> &Expr {
        &self.bounds[dim].lower
    }

    pub fn upper(&self, dim: usize) -> &Expr {
        &self.bounds[dim].upper
    }

    /// Element count of one dimension, folded from the declared bounds.
    pub fn extent(&self, dim: usize) -> Option<i32> {
        let lower = self.lower(dim).fold_i32()?;
        let upper = self.upper(dim).fold_i32()?;
        Some(upper - lower + 1)
    }

    /// Total element count across all dimensions.
    pub fn element_count(&self) -> Option<i32> {
        let mut count = 1i32;
        for dim in 0..self.rank() {
            count = count.checked_mul(self.extent(dim)?)?;
        }
        Some(count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOpKind {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// Both operands are guaranteed to have the same type kind.
    Binary {
        op: BinaryOpKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Explicit integer-to-real widening.
    IntToFp(Box<Expr>),
    VarRef(VarHandle),
    /// Array access by zero-based linear element offset, column major.
    ArrayElement { var: VarHandle, offset: Box<Expr> },
    Int32(i32),
    Fp32(f32),
    Logical(bool),
    Character(String),
}

impl Expr {
    pub fn binary(op: BinaryOpKind, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Self::binary(BinaryOpKind::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Self::binary(BinaryOpKind::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Self::binary(BinaryOpKind::Mul, lhs, rhs)
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Expr {
        Self::binary(BinaryOpKind::Div, lhs, rhs)
    }

    pub fn le(lhs: Expr, rhs: Expr) -> Expr {
        Self::binary(BinaryOpKind::Le, lhs, rhs)
    }

    pub fn widen(inner: Expr) -> Expr {
        Expr::IntToFp(Box::new(inner))
    }

    /// Result type of the expression. Binary arithmetic keeps its operand
    /// type; comparisons yield logical.
    pub fn type_kind(&self) -> TypeKind {
        match self {
            Expr::Binary { op, lhs, .. } => {
                if op.is_arithmetic() {
                    lhs.type_kind()
                } else {
                    TypeKind::Logical
                }
            }
            Expr::IntToFp(_) => TypeKind::Fp32,
            Expr::VarRef(var) | Expr::ArrayElement { var, .. } => {
                var.borrow().type_kind().unwrap_or(TypeKind::I32)
            }
            Expr::Int32(_) => TypeKind::I32,
            Expr::Fp32(_) => TypeKind::Fp32,
            Expr::Logical(_) => TypeKind::Logical,
            Expr::Character(_) => TypeKind::Character,
        }
    }

    /// Folds an integer constant expression; `None` when the expression
    /// involves a variable, a non-integer value, or overflows.
    pub fn fold_i32(&self) -> Option<i32> {
        match self {
            Expr::Int32(value) => Some(*value),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.fold_i32()?;
                let rhs = rhs.fold_i32()?;
                match op {
                    BinaryOpKind::Add => lhs.checked_add(rhs),
                    BinaryOpKind::Sub => lhs.checked_sub(rhs),
                    BinaryOpKind::Mul => lhs.checked_mul(rhs),
                    BinaryOpKind::Div => lhs.checked_div(rhs),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Assignment target.
#[derive(Debug, Clone)]
pub enum Target {
    Variable(VarHandle),
    ArrayElement { var: VarHandle, offset: Box<Expr> },
}

impl Target {
    pub fn var(&self) -> &VarHandle {
        match self {
            Target::Variable(var) | Target::ArrayElement { var, .. } => var,
        }
    }

    pub fn type_kind(&self) -> TypeKind {
        self.var().borrow().type_kind().unwrap_or(TypeKind::I32)
    }
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub target: Target,
    pub value: Expr,
}

#[derive(Debug, Default)]
pub struct Block {
    statements: Vec<Stmt>,
}

impl Block {
    pub fn push(&mut self, stmt: Stmt) {
        self.statements.push(stmt);
    }

    pub fn statements(&self) -> &[Stmt] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Debug)]
pub struct IfConstruct {
    pub condition: Expr,
    pub then_block: Block,
    pub else_block: Block,
}

/// Counted loop in pretest form: `initial` runs once, then `body` and
/// `increment` repeat while `condition` holds. A loop whose limit is below
/// its initial value therefore runs zero times.
#[derive(Debug)]
pub struct DoConstruct {
    pub initial: Assignment,
    pub condition: Expr,
    pub increment: Assignment,
    pub body: Block,
}

#[derive(Debug)]
pub enum Stmt {
    Assign(Assignment),
    Output { elements: Vec<Expr> },
    If(IfConstruct),
    Do(DoConstruct),
}

#[derive(Debug)]
pub struct ProgramUnit {
    name: String,
    statements: Vec<Stmt>,
    variables: HashMap<String, VarHandle>,
    types: HashMap<String, Rc<Type>>,
    string_literals: Vec<String>,
}

impl ProgramUnit {
    pub(crate) fn new(
        name: String,
        statements: Vec<Stmt>,
        variables: HashMap<String, VarHandle>,
        types: HashMap<String, Rc<Type>>,
        string_literals: Vec<String>,
    ) -> Self {
        Self {
            name,
            statements,
            variables,
            types,
            string_literals,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statements(&self) -> &[Stmt] {
        &self.statements
    }

    pub fn variable(&self, name: &str) -> Option<&VarHandle> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &VarHandle> {
        self.variables.values()
    }

    pub fn ty(&self, name: &str) -> Option<&Rc<Type>> {
        self.types.get(name)
    }

    /// Distinct character literals in order of first appearance.
    pub fn string_literals(&self) -> &[String] {
        &self.string_literals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_handles_nested_arithmetic() {
        let e = Expr::add(Expr::mul(Expr::Int32(3), Expr::Int32(4)), Expr::Int32(2));
        assert_eq!(e.fold_i32(), Some(14));
    }

    #[test]
    fn fold_gives_up_on_variables() {
        let var = Rc::new(RefCell::new(Variable::new("i")));
        let e = Expr::add(Expr::VarRef(var), Expr::Int32(1));
        assert_eq!(e.fold_i32(), None);
    }

    #[test]
    fn fold_rejects_overflow() {
        let e = Expr::add(Expr::Int32(i32::MAX), Expr::Int32(1));
        assert_eq!(e.fold_i32(), None);
    }

    #[test]
    fn shape_extent_honors_lower_bounds() {
        let shape = Shape::new(vec![
            Bound {
                lower: Expr::Int32(0),
                upper: Expr::Int32(4),
            },
            Bound {
                lower: Expr::Int32(1),
                upper: Expr::Int32(3),
            },
        ]);
        assert_eq!(shape.extent(0), Some(5));
        assert_eq!(shape.extent(1), Some(3));
        assert_eq!(shape.element_count(), Some(15));
    }

    #[test]
    fn clone_preserves_variable_identity() {
        let var = Rc::new(RefCell::new(Variable::new("x")));
        let e = Expr::add(Expr::VarRef(var.clone()), Expr::Int32(1));
        let copy = e.clone();
        match (&e, &copy) {
            (Expr::Binary { lhs: a, .. }, Expr::Binary { lhs: b, .. }) => {
                match (a.as_ref(), b.as_ref()) {
                    (Expr::VarRef(a), Expr::VarRef(b)) => assert!(Rc::ptr_eq(a, b)),
                    _ => panic!("expected variable references"),
                }
            }
            _ => panic!("expected binary nodes"),
        }
    }
}
