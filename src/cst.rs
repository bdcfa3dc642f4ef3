//! Concrete syntax tree.
//!
//! Nodes mirror the grammar productions one to one and carry no type
//! information; the lowerer in [`crate::sema`] resolves names and types and
//! discards this tree. Byte spans into the original source ride along so
//! semantic diagnostics can still point at the offending text.

use std::ops::Range;

pub type Span = Range<usize>;

#[derive(Debug)]
pub struct Program {
    pub name: String,
    pub specifications: Vec<Specification>,
    pub executables: Vec<ExecutableConstruct>,
}

#[derive(Debug)]
pub enum Specification {
    /// `integer :: a, b(10)` / `character(5) :: c` / `real x`
    TypeDeclaration {
        type_name: String,
        /// Length expression of a `character(len)` spec.
        len: Option<Expression>,
        entities: Vec<EntityDecl>,
        span: Span,
    },
    /// `dimension a(10, 3), b(0:4)`
    Dimension { specs: Vec<DimensionSpec>, span: Span },
}

#[derive(Debug)]
pub struct EntityDecl {
    pub name: String,
    pub array_spec: Option<Vec<DimBounds>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct DimensionSpec {
    pub array_name: String,
    pub array_spec: Vec<DimBounds>,
    pub span: Span,
}

/// One dimension of an explicit-shape spec: `lower:upper`, or a bare
/// `upper` whose lower bound defaults to 1 during lowering.
#[derive(Debug)]
pub struct DimBounds {
    pub lower: Option<Expression>,
    pub upper: Expression,
}

#[derive(Debug)]
pub enum ExecutableConstruct {
    Assignment(Assignment),
    Print {
        elements: Vec<Expression>,
        span: Span,
    },
    If {
        condition: Expression,
        action: Box<ExecutableConstruct>,
        span: Span,
    },
    DoWithCounter(DoConstruct),
}

#[derive(Debug)]
pub struct Assignment {
    pub target: Designator,
    pub value: Expression,
    pub span: Span,
}

/// Assignment target: a plain variable or an array element.
#[derive(Debug)]
pub struct Designator {
    pub name: String,
    pub subscripts: Option<Vec<Expression>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct DoConstruct {
    pub construct_name: Option<String>,
    pub variable: String,
    pub variable_span: Span,
    pub start: Expression,
    pub end: Expression,
    pub stride: Option<Expression>,
    pub body: Vec<ExecutableConstruct>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
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

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(String),
    Real(String),
    Logical(bool),
    Character(String),
}

#[derive(Debug)]
pub enum Expression {
    /// A run of same-precedence operations, operands and operators kept as
    /// parallel ordered lists (`operands.len() == operators.len() + 1`).
    /// Folding into binary nodes happens in lowering, left to right.
    Operator {
        operands: Vec<Expression>,
        operators: Vec<Op>,
        span: Span,
    },
    Variable {
        name: String,
        span: Span,
    },
    ArrayElement {
        name: String,
        subscripts: Vec<Expression>,
        span: Span,
    },
    Constant {
        value: Constant,
        span: Span,
    },
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Operator { span, .. }
            | Expression::Variable { span, .. }
            | Expression::ArrayElement { span, .. }
            | Expression::Constant { span, .. } => span.clone(),
        }
    }
}

impl ExecutableConstruct {
    pub fn span(&self) -> Span {
        match self {
            ExecutableConstruct::Assignment(a) => a.span.clone(),
            ExecutableConstruct::Print { span, .. }
            | ExecutableConstruct::If { span, .. } => span.clone(),
            ExecutableConstruct::DoWithCounter(d) => d.span.clone(),
        }
    }
}
