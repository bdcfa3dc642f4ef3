//! Recursive-descent parser producing the concrete syntax tree.
//!
//! One function per grammar production. A production either matches (cursor
//! advanced past its text), misses (`Ok(None)` with the cursor restored so
//! the next candidate can retry), or hard-fails after committing
//! (`Err(Recovered)`: the error is reported and the rest of the line is
//! discarded, so later lines still get parsed). Ambiguous prefixes — a name
//! that may open an assignment, an array-element assignment, or a construct
//! label — are resolved by saving the cursor on a LIFO stack and restoring
//! it when the committing token (`=`, `:`) does not follow. Markers never
//! survive a line boundary: statements do not continue across lines.

use crate::cst::{self, Op};
use crate::diag::Reporter;
use crate::errors::{CompileError, CompileErrorKind};
use crate::line::Line;

/// A hard parse error that was already reported; the current line has been
/// skipped and parsing may resume on the next one.
struct Recovered;

type ParseResult<T> = Result<Option<T>, Recovered>;

/// Caret sizing for a report, per error shape.
enum ErrKind {
    /// Underline everything from the cursor to the end of the line.
    EndOfLine,
    /// Underline the name at the cursor (peeked, not consumed).
    Name,
    /// Underline a single character.
    Char,
}

const MULT_OPS: &[(&str, Op)] = &[("*", Op::Mul), ("/", Op::Div)];

const ADD_OPS: &[(&str, Op)] = &[("+", Op::Add), ("-", Op::Sub)];

const REL_OPS: &[(&str, Op)] = &[
    (".eq.", Op::Eq),
    (".ne.", Op::Ne),
    (".lt.", Op::Lt),
    (".le.", Op::Le),
    (".gt.", Op::Gt),
    (".ge.", Op::Ge),
    ("==", Op::Eq),
    ("/=", Op::Ne),
    ("<=", Op::Le),
    (">=", Op::Ge),
    ("<", Op::Lt),
    (">", Op::Gt),
];

pub struct Parser<'a, 'r> {
    lines: Vec<Line>,
    row: usize,
    saved_ofs_stack: Vec<usize>,
    source_len: usize,
    end_seen: bool,
    reporter: &'a mut Reporter<'r>,
}

/// Parses one compilation unit, reporting to stderr. Returns the error list
/// instead of a tree when any diagnostic fired.
pub fn parse(source: &str, filename: &str) -> Result<cst::Program, Vec<CompileError>> {
    let mut reporter = Reporter::stderr(filename, source);
    match parse_with(source, &mut reporter) {
        Some(program) => Ok(program),
        None => Err(reporter.take_errors()),
    }
}

/// Like [`parse`], but reporting through a caller-supplied sink. Returns
/// `None` when any diagnostic fired: an erroneous tree must never reach
/// lowering or code generation.
pub fn parse_with(source: &str, reporter: &mut Reporter<'_>) -> Option<cst::Program> {
    let mut parser = Parser::new(source, reporter);
    log::debug!("parsing {} source lines", parser.lines.len());
    let program = parser.parse_main_program();
    debug_assert!(parser.saved_ofs_stack.is_empty());
    if parser.reporter.has_errors() {
        None
    } else {
        Some(program)
    }
}

impl<'a, 'r> Parser<'a, 'r> {
    fn new(source: &str, reporter: &'a mut Reporter<'r>) -> Self {
        Self {
            lines: preprocess(source),
            row: 0,
            saved_ofs_stack: Vec::new(),
            source_len: source.len(),
            end_seen: false,
            reporter,
        }
    }

    // ---- cursor plumbing -------------------------------------------------

    fn is_eof(&self) -> bool {
        self.row >= self.lines.len()
    }

    /// Byte offset of the cursor in the whole source.
    fn pos(&self) -> usize {
        if self.is_eof() {
            self.source_len
        } else {
            let line = &self.lines[self.row];
            line.offset() + line.column()
        }
    }

    fn skip_this_line(&mut self) {
        debug_assert!(self.saved_ofs_stack.is_empty());
        if self.row < self.lines.len() {
            self.row += 1;
        }
    }

    fn skip_blank_lines(&mut self) {
        while !self.is_eof() && self.lines[self.row].is_end_of_line() {
            self.skip_this_line();
        }
    }

    fn save_ofs(&mut self) {
        let column = if self.is_eof() {
            0
        } else {
            self.lines[self.row].column()
        };
        self.saved_ofs_stack.push(column);
    }

    fn restore_ofs(&mut self) {
        if let Some(column) = self.saved_ofs_stack.pop() {
            if !self.is_eof() {
                self.lines[self.row].set_column(column);
            }
        }
    }

    fn discard_saved_ofs(&mut self) {
        self.saved_ofs_stack.pop();
    }

    // ---- lexical forwarding (all silent on failure) ----------------------

    fn skip_blanks(&mut self) {
        if !self.is_eof() {
            self.lines[self.row].skip_blanks();
        }
    }

    fn read_name(&mut self) -> String {
        if self.is_eof() {
            String::new()
        } else {
            self.lines[self.row].read_name()
        }
    }

    fn read_token(&mut self, tok: &str) -> bool {
        !self.is_eof() && self.lines[self.row].read_token(tok)
    }

    fn read_operator(&mut self, op: &str) -> bool {
        !self.is_eof() && self.lines[self.row].read_operator(op)
    }

    fn read_one_blank(&mut self) -> bool {
        !self.is_eof() && self.lines[self.row].read_one_blank()
    }

    fn is_end_of_line(&mut self) -> bool {
        self.is_eof() || self.lines[self.row].is_end_of_line()
    }

    fn peek_name_start(&mut self) -> bool {
        if self.is_eof() {
            return false;
        }
        let line = &mut self.lines[self.row];
        let save = line.column();
        line.skip_blanks();
        let ok = line
            .content()
            .as_bytes()
            .get(line.column())
            .map_or(false, |c| c.is_ascii_alphabetic());
        line.set_column(save);
        ok
    }

    // ---- diagnostics -----------------------------------------------------

    fn caret_span(&mut self, kind: ErrKind) -> cst::Span {
        if self.is_eof() {
            return if self.source_len > 0 {
                self.source_len - 1..self.source_len
            } else {
                0..0
            };
        }
        let line = &mut self.lines[self.row];
        let (at, len) = match kind {
            ErrKind::EndOfLine => (
                line.offset() + line.column(),
                line.content().len().saturating_sub(line.column()),
            ),
            ErrKind::Name => {
                // anchor past any leading blanks so the caret sits under the
                // name itself
                let save = line.column();
                line.skip_blanks();
                let at = line.offset() + line.column();
                let name = line.read_name();
                line.set_column(save);
                (at, name.len())
            }
            ErrKind::Char => (line.offset() + line.column(), 1),
        };
        let len = len.max(1);
        let end = (at + len).min(self.source_len);
        at..end.max(at)
    }

    fn error(&mut self, msg: &str, kind: ErrKind) {
        let span = self.caret_span(kind);
        self.reporter.error(CompileErrorKind::Parse, span, msg);
    }

    /// Reports, drops any pending backtrack markers, and discards the rest
    /// of the current line.
    fn recover(&mut self, msg: &str, kind: ErrKind) -> Recovered {
        self.error(msg, kind);
        self.saved_ofs_stack.clear();
        self.skip_this_line();
        Recovered
    }

    fn assert_end_of_line(&mut self) -> bool {
        if self.is_end_of_line() {
            true
        } else {
            self.skip_blanks();
            self.error("unexpected token in end of line", ErrKind::EndOfLine);
            false
        }
    }

    /// Closes out a line-terminated statement: trailing junk is reported and
    /// the line dropped, otherwise the cursor rests at end of line.
    fn end_statement(&mut self) {
        if !self.assert_end_of_line() {
            self.skip_this_line();
        }
    }

    // ---- expression sub-grammar (soft: no reporting in here) -------------

    fn read_any_operator(&mut self, ops: &[(&str, Op)]) -> Option<Op> {
        for (text, op) in ops {
            if self.read_operator(text) {
                return Some(*op);
            }
        }
        None
    }

    fn read_constant(&mut self) -> Option<cst::Expression> {
        if self.is_eof() {
            return None;
        }
        self.skip_blanks();
        let start = self.pos();
        let value = self.lines[self.row].read_real_constant();
        if !value.is_empty() {
            return Some(cst::Expression::Constant {
                value: cst::Constant::Real(value),
                span: start..self.pos(),
            });
        }
        let value = self.lines[self.row].read_int_constant();
        if !value.is_empty() {
            return Some(cst::Expression::Constant {
                value: cst::Constant::Int(value),
                span: start..self.pos(),
            });
        }
        if let Some(value) = self.lines[self.row].read_logical_constant() {
            return Some(cst::Expression::Constant {
                value: cst::Constant::Logical(value),
                span: start..self.pos(),
            });
        }
        if let Some(value) = self.lines[self.row].read_character_constant() {
            return Some(cst::Expression::Constant {
                value: cst::Constant::Character(value),
                span: start..self.pos(),
            });
        }
        None
    }

    // mult-operand := name | array-element | constant | ( expression )
    fn parse_mult_operand(&mut self) -> Option<cst::Expression> {
        self.skip_blanks();
        let start = self.pos();
        self.save_ofs();
        let name = self.read_name();
        if !name.is_empty() {
            if self.read_token("(") {
                let subscripts = self.parse_expression_list();
                match subscripts {
                    Some(subscripts) if self.read_token(")") => {
                        self.discard_saved_ofs();
                        return Some(cst::Expression::ArrayElement {
                            name,
                            subscripts,
                            span: start..self.pos(),
                        });
                    }
                    _ => {
                        self.restore_ofs();
                        return None;
                    }
                }
            }
            self.discard_saved_ofs();
            return Some(cst::Expression::Variable {
                name,
                span: start..self.pos(),
            });
        }
        self.restore_ofs();
        if let Some(constant) = self.read_constant() {
            return Some(constant);
        }
        self.save_ofs();
        if !self.read_token("(") {
            self.discard_saved_ofs();
            return None;
        }
        if let Some(exp) = self.parse_expression() {
            if self.read_token(")") {
                self.discard_saved_ofs();
                return Some(exp);
            }
        }
        self.restore_ofs();
        None
    }

    // add-operand := mult-operand { mult-op mult-operand }
    fn parse_add_operand(&mut self) -> Option<cst::Expression> {
        self.skip_blanks();
        let start = self.pos();
        let mut operands = vec![self.parse_mult_operand()?];
        let mut operators = Vec::new();
        while let Some(op) = self.read_any_operator(MULT_OPS) {
            let operand = self.parse_mult_operand()?;
            operators.push(op);
            operands.push(operand);
        }
        Some(collapse(operands, operators, start..self.pos()))
    }

    // level-2-expr := add-operand { add-op add-operand }
    //
    // Iterating here (instead of recursing into level-2 for the remainder)
    // makes chains like a - b - c group left to right when the operand list
    // is folded during lowering.
    fn parse_level2_expr(&mut self) -> Option<cst::Expression> {
        self.skip_blanks();
        let start = self.pos();
        let mut operands = vec![self.parse_add_operand()?];
        let mut operators = Vec::new();
        while let Some(op) = self.read_any_operator(ADD_OPS) {
            let operand = self.parse_add_operand()?;
            operators.push(op);
            operands.push(operand);
        }
        Some(collapse(operands, operators, start..self.pos()))
    }

    // level-4-expr := level-2-expr { rel-op level-2-expr }
    fn parse_expression(&mut self) -> Option<cst::Expression> {
        self.skip_blanks();
        let start = self.pos();
        let mut operands = vec![self.parse_level2_expr()?];
        let mut operators = Vec::new();
        while let Some(op) = self.read_any_operator(REL_OPS) {
            let operand = self.parse_level2_expr()?;
            operators.push(op);
            operands.push(operand);
        }
        Some(collapse(operands, operators, start..self.pos()))
    }

    fn parse_expression_list(&mut self) -> Option<Vec<cst::Expression>> {
        let mut items = vec![self.parse_expression()?];
        while self.read_token(",") {
            items.push(self.parse_expression()?);
        }
        Some(items)
    }

    fn expect_expression(&mut self, msg: &str) -> Result<cst::Expression, Recovered> {
        match self.parse_expression() {
            Some(exp) => Ok(exp),
            None => Err(self.recover(msg, ErrKind::EndOfLine)),
        }
    }

    // ---- specification part ----------------------------------------------

    fn parse_declaration_construct(&mut self) -> ParseResult<cst::Specification> {
        if let Some(spec) = self.parse_type_declaration()? {
            return Ok(Some(spec));
        }
        self.parse_dimension_statement()
    }

    fn parse_type_declaration(&mut self) -> ParseResult<cst::Specification> {
        self.skip_blank_lines();
        if self.is_eof() {
            return Ok(None);
        }
        self.skip_blanks();
        let start = self.pos();
        self.save_ofs();
        let type_name = if self.read_token("integer") {
            "integer"
        } else if self.read_token("real") {
            "real"
        } else if self.read_token("logical") {
            "logical"
        } else if self.read_token("character") {
            "character"
        } else {
            self.discard_saved_ofs();
            return Ok(None);
        };

        let mut len = None;
        if type_name == "character" && self.read_token("(") {
            // nothing else in the grammar looks like `character(`
            self.discard_saved_ofs();
            self.save_ofs();
            if self.read_token("len") && self.read_token("=") {
                self.discard_saved_ofs();
            } else {
                self.restore_ofs();
            }
            let exp = self.expect_expression("missing length in character type-spec")?;
            if !self.read_token(")") {
                return Err(self.recover("\")\" is expected in character type-spec", ErrKind::Char));
            }
            len = Some(exp);
            if !self.read_token("::") && !self.read_one_blank() {
                return Err(self.recover("missing \"::\" in type-declaration", ErrKind::Char));
            }
        } else if self.read_token("::") {
            self.discard_saved_ofs();
        } else {
            // blank-separated form commits only when a name follows, so a
            // variable that merely starts with a type keyword still parses
            // as an assignment target
            if !self.read_one_blank() || !self.peek_name_start() {
                self.restore_ofs();
                return Ok(None);
            }
            self.discard_saved_ofs();
        }

        let mut entities = Vec::new();
        loop {
            self.skip_blanks();
            let entity_start = self.pos();
            let name = self.read_name();
            if name.is_empty() {
                return Err(self.recover("missing variable name in type-declaration", ErrKind::Char));
            }
            let mut array_spec = None;
            if self.read_token("(") {
                array_spec = Some(self.parse_explicit_shape_spec()?);
            }
            entities.push(cst::EntityDecl {
                name,
                array_spec,
                span: entity_start..self.pos(),
            });
            if !self.read_token(",") {
                break;
            }
        }
        let span = start..self.pos();
        self.end_statement();
        Ok(Some(cst::Specification::TypeDeclaration {
            type_name: type_name.to_string(),
            len,
            entities,
            span,
        }))
    }

    fn parse_dimension_statement(&mut self) -> ParseResult<cst::Specification> {
        self.skip_blank_lines();
        if self.is_eof() {
            return Ok(None);
        }
        self.skip_blanks();
        let start = self.pos();
        self.save_ofs();
        if !self.read_token("dimension") {
            self.discard_saved_ofs();
            return Ok(None);
        }
        self.skip_blanks();
        let mut item_start = self.pos();
        let mut array_name = self.read_name();
        if array_name.is_empty() || !self.read_token("(") {
            self.restore_ofs();
            return Ok(None);
        }
        self.discard_saved_ofs();
        let mut specs = Vec::new();
        loop {
            let array_spec = self.parse_explicit_shape_spec()?;
            specs.push(cst::DimensionSpec {
                array_name,
                array_spec,
                span: item_start..self.pos(),
            });
            if !self.read_token(",") {
                break;
            }
            self.skip_blanks();
            item_start = self.pos();
            array_name = self.read_name();
            if array_name.is_empty() {
                return Err(self.recover("missing array name in dimension-statement", ErrKind::Char));
            }
            if !self.read_token("(") {
                return Err(self.recover("\"(\" is expected in dimension-statement", ErrKind::Char));
            }
        }
        let span = start..self.pos();
        self.end_statement();
        Ok(Some(cst::Specification::Dimension { specs, span }))
    }

    /// Explicit-shape dimension list; the cursor sits just past the opening
    /// parenthesis. Each dimension is `lower:upper` or a bare `upper`.
    fn parse_explicit_shape_spec(&mut self) -> Result<Vec<cst::DimBounds>, Recovered> {
        let mut dims = Vec::new();
        loop {
            let first = self.expect_expression("missing array bound in explicit-shape-spec")?;
            if self.read_token(":") {
                let upper = self.expect_expression("missing upper bound in explicit-shape-spec")?;
                dims.push(cst::DimBounds {
                    lower: Some(first),
                    upper,
                });
            } else {
                dims.push(cst::DimBounds {
                    lower: None,
                    upper: first,
                });
            }
            if !self.read_token(",") {
                break;
            }
        }
        if !self.read_token(")") {
            return Err(self.recover("\")\" is expected in explicit-shape-spec", ErrKind::Char));
        }
        Ok(dims)
    }

    // ---- executable constructs -------------------------------------------

    fn parse_assignment_stmt(&mut self) -> ParseResult<cst::ExecutableConstruct> {
        self.skip_blanks();
        let start = self.pos();
        self.save_ofs();
        let name = self.read_name();
        if name.is_empty() {
            self.restore_ofs();
            return Ok(None);
        }
        let mut subscripts = None;
        if self.read_token("(") {
            let list = self.parse_expression_list();
            if list.is_none() || !self.read_token(")") {
                self.restore_ofs();
                return Ok(None);
            }
            subscripts = list;
        }
        let target_span = start..self.pos();
        if !self.read_token("=") {
            // some other name-led statement; the next candidate re-reads it
            self.restore_ofs();
            return Ok(None);
        }
        self.discard_saved_ofs();
        let value = self.expect_expression("missing expression on right side of assignment")?;
        let span = start..self.pos();
        Ok(Some(cst::ExecutableConstruct::Assignment(cst::Assignment {
            target: cst::Designator {
                name,
                subscripts,
                span: target_span,
            },
            value,
            span,
        })))
    }

    fn parse_print_stmt(&mut self) -> ParseResult<cst::ExecutableConstruct> {
        self.skip_blanks();
        let start = self.pos();
        self.save_ofs();
        if !self.read_token("print") || !self.read_token("*") {
            self.restore_ofs();
            return Ok(None);
        }
        self.discard_saved_ofs();
        if !self.read_token(",") {
            return Err(self.recover("\",\" is expected in print-stmt", ErrKind::Char));
        }
        let mut elements = vec![self.expect_expression("missing output item in print-stmt")?];
        while self.read_token(",") {
            elements.push(self.expect_expression("missing output item in print-stmt")?);
        }
        Ok(Some(cst::ExecutableConstruct::Print {
            elements,
            span: start..self.pos(),
        }))
    }

    fn parse_if_stmt(&mut self) -> ParseResult<cst::ExecutableConstruct> {
        self.skip_blanks();
        let start = self.pos();
        self.save_ofs();
        if !self.read_token("if") || !self.read_token("(") {
            self.restore_ofs();
            return Ok(None);
        }
        self.discard_saved_ofs();
        let condition = self.expect_expression("missing logical-expr in if-stmt")?;
        if !self.read_token(")") {
            return Err(self.recover("\")\" is expected in if-stmt", ErrKind::Char));
        }
        let action = match self.parse_action_stmt()? {
            Some(action) => action,
            None => return Err(self.recover("missing action-stmt in if-stmt", ErrKind::EndOfLine)),
        };
        Ok(Some(cst::ExecutableConstruct::If {
            condition,
            action: Box::new(action),
            span: start..self.pos(),
        }))
    }

    fn parse_action_stmt(&mut self) -> ParseResult<cst::ExecutableConstruct> {
        if let Some(stmt) = self.parse_assignment_stmt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.parse_print_stmt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.parse_if_stmt()? {
            return Ok(Some(stmt));
        }
        Ok(None)
    }

    fn parse_do_construct(&mut self) -> ParseResult<cst::ExecutableConstruct> {
        self.skip_blank_lines();
        if self.is_eof() {
            return Ok(None);
        }
        self.skip_blanks();
        let start = self.pos();

        // `name :` commits to a construct label; otherwise re-read from the
        // original position and try the do keyword itself
        let mut construct_name = None;
        self.save_ofs();
        let label = self.read_name();
        if !label.is_empty() && self.read_token(":") {
            self.discard_saved_ofs();
            construct_name = Some(label);
        } else {
            self.restore_ofs();
        }

        if !self.read_token("do") {
            if construct_name.is_some() {
                return Err(self.recover("\"do\" is expected after construct-name", ErrKind::Char));
            }
            return Ok(None);
        }
        if !self.read_one_blank() {
            return Err(self.recover("missing whitespace in do-stmt", ErrKind::Char));
        }
        self.skip_blanks();
        let variable_start = self.pos();
        let variable = self.read_name();
        if variable.is_empty() {
            return Err(self.recover("missing do-variable in do-stmt", ErrKind::Char));
        }
        let variable_span = variable_start..self.pos();
        if !self.read_token("=") {
            return Err(self.recover("\"=\" is expected in do-stmt", ErrKind::Char));
        }
        let start_expr = self.expect_expression("missing initial value in do-stmt")?;
        if !self.read_token(",") {
            return Err(self.recover("\",\" is expected in do-stmt", ErrKind::Char));
        }
        let end_expr = self.expect_expression("missing limit value in do-stmt")?;
        let stride = if self.read_token(",") {
            Some(self.expect_expression("missing stride value in do-stmt")?)
        } else {
            None
        };
        let header_end = self.pos();
        self.end_statement();

        let mut body = Vec::new();
        loop {
            self.skip_blank_lines();
            if self.is_eof() {
                self.error("missing end-do-stmt in do-construct", ErrKind::Char);
                break;
            }
            match self.parse_executable_construct() {
                Ok(Some(stmt)) => body.push(stmt),
                Err(Recovered) => {}
                Ok(None) => {
                    if self.parse_end_do_stmt(construct_name.as_deref()) {
                        break;
                    }
                    // a stray END here belongs to the enclosing unit; leave
                    // it in place and report the unterminated construct
                    self.save_ofs();
                    let at_end_keyword = self.read_token("end");
                    self.restore_ofs();
                    if at_end_keyword {
                        self.error("missing end-do-stmt in do-construct", ErrKind::EndOfLine);
                        break;
                    }
                    self.error("unexpected token in do-construct", ErrKind::EndOfLine);
                    self.skip_this_line();
                }
            }
        }
        Ok(Some(cst::ExecutableConstruct::DoWithCounter(
            cst::DoConstruct {
                construct_name,
                variable,
                variable_span,
                start: start_expr,
                end: end_expr,
                stride,
                body,
                span: start..header_end,
            },
        )))
    }

    /// Speculative: returns false with the cursor untouched when the line is
    /// not an end-do-stmt. Construct-name problems are reported but the END
    /// still terminates the construct.
    fn parse_end_do_stmt(&mut self, expected: Option<&str>) -> bool {
        self.save_ofs();
        if !self.read_token("end") || !self.read_token("do") {
            self.restore_ofs();
            return false;
        }
        self.discard_saved_ofs();
        if let Some(name) = expected {
            if self.is_end_of_line() {
                self.error("missing construct-name in end-do-stmt", ErrKind::EndOfLine);
                self.skip_this_line();
                return true;
            }
            if !self.read_token(name) {
                self.error(
                    "construct-name is different from the corresponding do-stmt",
                    ErrKind::Name,
                );
                self.skip_this_line();
                return true;
            }
        }
        self.end_statement();
        true
    }

    fn parse_executable_construct(&mut self) -> ParseResult<cst::ExecutableConstruct> {
        self.skip_blank_lines();
        if self.is_eof() {
            return Ok(None);
        }
        if let Some(stmt) = self.parse_action_stmt()? {
            self.end_statement();
            return Ok(Some(stmt));
        }
        self.parse_do_construct()
    }

    // ---- program unit ----------------------------------------------------

    fn parse_program_stmt(&mut self) -> String {
        self.skip_blank_lines();
        if self.is_eof() {
            self.error("missing program-stmt", ErrKind::Char);
            return String::new();
        }
        if !self.read_token("program") {
            // leave the line for the declaration/statement parsers so the
            // rest of the unit still produces diagnostics
            self.error("missing program-stmt", ErrKind::EndOfLine);
            return String::new();
        }
        if !self.read_one_blank() {
            self.error("missing whitespace after program keyword", ErrKind::Char);
            self.skip_this_line();
            return String::new();
        }
        let name = self.read_name();
        if name.is_empty() {
            self.error("missing program name in program-stmt", ErrKind::Char);
            self.skip_this_line();
            return String::new();
        }
        self.end_statement();
        name
    }

    /// Returns true when parsing of the unit should stop: a proper END was
    /// consumed, or the source ran out. A non-END line is reported, skipped,
    /// and parsing of the remaining lines continues.
    fn parse_end_program_stmt(&mut self, name: &str) -> bool {
        self.skip_blank_lines();
        if self.is_eof() {
            if !self.end_seen {
                self.error("missing end-program-stmt", ErrKind::Char);
            }
            return true;
        }
        if !self.read_token("end") {
            self.error("unexpected token in program body", ErrKind::EndOfLine);
            self.skip_this_line();
            return false;
        }
        self.end_seen = true;
        if self.is_end_of_line() {
            self.skip_this_line();
            return true;
        }
        if !self.read_one_blank() {
            self.error("unexpected token in end-program-stmt", ErrKind::Char);
            self.skip_this_line();
            return true;
        }
        if !self.read_token("program") {
            self.error("unexpected token in end-program-stmt", ErrKind::Char);
            self.skip_this_line();
            return true;
        }
        if self.is_end_of_line() {
            self.skip_this_line();
            return true;
        }
        if !self.read_one_blank() {
            self.error("unexpected token in end-program-stmt", ErrKind::Char);
            self.skip_this_line();
            return true;
        }
        if name.is_empty() {
            self.end_statement();
            return true;
        }
        if !self.read_token(name) {
            self.error(
                "name is different from the corresponding program-stmt",
                ErrKind::Name,
            );
            self.skip_this_line();
            // keep going: later lines may still be statements worth checking
            return false;
        }
        self.end_statement();
        true
    }

    fn parse_main_program(&mut self) -> cst::Program {
        let name = self.parse_program_stmt();
        let mut program = cst::Program {
            name: name.clone(),
            specifications: Vec::new(),
            executables: Vec::new(),
        };
        loop {
            match self.parse_declaration_construct() {
                Ok(Some(spec)) => program.specifications.push(spec),
                Ok(None) => break,
                Err(Recovered) => {}
            }
        }
        loop {
            loop {
                match self.parse_executable_construct() {
                    Ok(Some(stmt)) => program.executables.push(stmt),
                    Ok(None) => break,
                    Err(Recovered) => {}
                }
            }
            if self.parse_end_program_stmt(&name) {
                break;
            }
            if self.is_eof() {
                break;
            }
        }
        program
    }
}

fn collapse(mut operands: Vec<cst::Expression>, operators: Vec<Op>, span: cst::Span) -> cst::Expression {
    if operators.is_empty() {
        operands.pop().unwrap_or(cst::Expression::Operator {
            operands: Vec::new(),
            operators: Vec::new(),
            span,
        })
    } else {
        cst::Expression::Operator {
            operands,
            operators,
            span,
        }
    }
}

fn preprocess(source: &str) -> Vec<Line> {
    let bytes = source.as_bytes();
    let mut lines = Vec::new();
    let mut head = 0;
    for (tail, byte) in bytes.iter().enumerate() {
        if *byte == b'\n' {
            let mut text = &source[head..tail];
            if let Some(stripped) = text.strip_suffix('\r') {
                text = stripped;
            }
            lines.push(Line::new(head, text));
            head = tail + 1;
        }
    }
    if head < source.len() {
        lines.push(Line::new(head, &source[head..]));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cst::{Constant, ExecutableConstruct, Expression};

    fn run(source: &str) -> (cst::Program, Vec<CompileError>, bool) {
        let mut reporter = Reporter::quiet("test.f90", source);
        let mut parser = Parser::new(source, &mut reporter);
        let program = parser.parse_main_program();
        let stack_empty = parser.saved_ofs_stack.is_empty();
        (program, reporter.take_errors(), stack_empty)
    }

    #[test]
    fn backtrack_stack_is_empty_after_every_statement() {
        let sources = [
            "program t\nx = 1\nend program t\n",
            "program t\ni = 1 + 2\nif (i .eq. 3) print *, i\nend\n",
            "program t\nloop1 : do i = 1, 3\nx = i\nend do loop1\nend\n",
            // malformed inputs exercise the recovery paths
            "program t\nx = \nend\n",
            "program t\nif (x > 1 y = 2\nend\n",
            "program\nx = 1\n",
        ];
        for source in sources {
            let (_, _, stack_empty) = run(source);
            assert!(stack_empty, "leftover markers while parsing {:?}", source);
        }
    }

    #[test]
    fn assignment_and_print_share_a_name_prefix() {
        let (program, errors, _) = run("program t\nprint = 1\nprint *, print\nend\n");
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(program.executables.len(), 2);
        assert!(matches!(
            program.executables[0],
            ExecutableConstruct::Assignment(_)
        ));
        assert!(matches!(
            program.executables[1],
            ExecutableConstruct::Print { .. }
        ));
    }

    #[test]
    fn construct_name_requires_colon() {
        let (program, errors, _) = run(
            "program t\nouter : do i = 1, 2\ninner : do j = 1, 2\nx = i\nend do inner\nend do outer\nend\n",
        );
        assert!(errors.is_empty(), "{:?}", errors);
        match &program.executables[0] {
            ExecutableConstruct::DoWithCounter(d) => {
                assert_eq!(d.construct_name.as_deref(), Some("outer"));
                match &d.body[0] {
                    ExecutableConstruct::DoWithCounter(inner) => {
                        assert_eq!(inner.construct_name.as_deref(), Some("inner"));
                    }
                    other => panic!("expected nested do, got {:?}", other),
                }
            }
            other => panic!("expected do construct, got {:?}", other),
        }
    }

    #[test]
    fn operator_lists_stay_flat_per_precedence_level() {
        let (program, errors, _) = run("program t\nx = 1 - 2 - 3\nend\n");
        assert!(errors.is_empty(), "{:?}", errors);
        match &program.executables[0] {
            ExecutableConstruct::Assignment(a) => match &a.value {
                Expression::Operator {
                    operands,
                    operators,
                    ..
                } => {
                    assert_eq!(operands.len(), 3);
                    assert_eq!(operators, &[Op::Sub, Op::Sub]);
                }
                other => panic!("expected operator node, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn real_constant_wins_over_int_prefix() {
        let (program, errors, _) = run("program t\nx = 2.5\nend\n");
        assert!(errors.is_empty(), "{:?}", errors);
        match &program.executables[0] {
            ExecutableConstruct::Assignment(a) => match &a.value {
                Expression::Constant { value, .. } => {
                    assert_eq!(value, &Constant::Real("2.5".to_string()));
                }
                other => panic!("expected constant, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn missing_paren_in_if_recovers_at_line_granularity() {
        let (_, errors, stack_empty) = run("program t\nif (x > 1 y = 2\nz = 3\nend\n");
        assert!(stack_empty);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("if-stmt"));
    }

    #[test]
    fn end_program_name_mismatch_is_reported_once() {
        let (_, errors, _) = run("program bar\nx = 1\nend program foo\n");
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(errors[0]
            .message
            .contains("different from the corresponding program-stmt"));
    }

    #[test]
    fn name_mismatch_caret_covers_the_name() {
        let source = "program bar\nx = 1\nend program  foo\n";
        let (_, errors, _) = run(source);
        assert_eq!(errors.len(), 1, "{:?}", errors);
        let at = source.find("foo").unwrap();
        assert_eq!(errors[0].span, at..at + 3);
    }

    #[test]
    fn errors_on_separate_lines_are_all_reported() {
        let (_, errors, _) = run("program t\nx = \ny = \nz = 1\nend\n");
        assert_eq!(errors.len(), 2, "{:?}", errors);
    }
}
