//! FILENAME: parser/src/formula.rs
//! PURPOSE: The public formula object — parses, evaluates, and canonically
//! prints a formula expression.
//! CONTEXT: `Formula` is the single entry point other crates use; `Expr`,
//! `Parser`, and the lexer stay crate-internal implementation detail.

use position::Position;

use crate::ast::{BinOp, Expr};
use crate::parser::{parse as parse_expr, ParseError, ParseResult};
use crate::value::{format_number, CellValue, EvalOutcome, FormulaError, SheetView};

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    ast: Expr,
}

impl Formula {
    /// Parses formula source (without the leading `=` sigil).
    pub fn parse(src: &str) -> ParseResult<Formula> {
        let ast = parse_expr(src)?;
        Ok(Formula { ast })
    }

    /// Evaluates the formula against the given sheet view.
    pub fn evaluate(&self, sheet: &dyn SheetView) -> EvalOutcome {
        eval(&self.ast, sheet)
    }

    /// The canonical printed form of the formula (possibly re-parenthesized
    /// relative to the original source).
    pub fn expression(&self) -> String {
        print_expr(&self.ast, 0)
    }

    /// Every valid position referenced in the formula, ascending, deduped.
    pub fn referenced_cells(&self) -> Vec<Position> {
        let mut positions = Vec::new();
        collect_refs(&self.ast, &mut positions);
        positions.retain(|p| p.is_valid());
        positions.sort();
        positions.dedup();
        positions
    }
}

fn collect_refs(expr: &Expr, out: &mut Vec<Position>) {
    match expr {
        Expr::Number(_) => {}
        Expr::CellRef { pos, .. } => out.push(*pos),
        Expr::Neg(inner) | Expr::Pos(inner) => collect_refs(inner, out),
        Expr::BinaryOp(left, _, right) => {
            collect_refs(left, out);
            collect_refs(right, out);
        }
    }
}

fn eval(expr: &Expr, sheet: &dyn SheetView) -> EvalOutcome {
    match expr {
        Expr::Number(n) => EvalOutcome::Number(*n),
        Expr::CellRef { pos, .. } => {
            if !pos.is_valid() {
                return EvalOutcome::Error(FormulaError::Ref);
            }
            match sheet.cell_value(*pos) {
                CellValue::Number(n) => EvalOutcome::Number(n),
                CellValue::Error(e) => EvalOutcome::Error(e),
                CellValue::Text(s) if s.trim().is_empty() => EvalOutcome::Number(0.0),
                CellValue::Text(s) => match s.trim().parse::<f64>() {
                    Ok(n) => EvalOutcome::Number(n),
                    Err(_) => EvalOutcome::Error(FormulaError::Value),
                },
            }
        }
        Expr::Pos(inner) => eval(inner, sheet),
        Expr::Neg(inner) => match eval(inner, sheet) {
            EvalOutcome::Number(n) => EvalOutcome::Number(-n),
            err => err,
        },
        Expr::BinaryOp(left, op, right) => {
            let lv = eval(left, sheet);
            let rv = eval(right, sheet);
            let (l, r) = match (lv, rv) {
                (EvalOutcome::Error(e), _) => return EvalOutcome::Error(e),
                (_, EvalOutcome::Error(e)) => return EvalOutcome::Error(e),
                (EvalOutcome::Number(l), EvalOutcome::Number(r)) => (l, r),
            };
            match op {
                BinOp::Add => EvalOutcome::Number(l + r),
                BinOp::Sub => EvalOutcome::Number(l - r),
                BinOp::Mul => EvalOutcome::Number(l * r),
                BinOp::Div => {
                    if r == 0.0 {
                        EvalOutcome::Error(FormulaError::Div0)
                    } else {
                        EvalOutcome::Number(l / r)
                    }
                }
            }
        }
    }
}

/// Precedence-climbing pretty printer. The right operand of a binary op is
/// always printed at `prec + 1`, so a right-nested subtraction or division
/// keeps its explicit parentheses (`1-(2-3)` prints back unchanged) even
/// though left-leaning chains at the same precedence (`1-2-3`) never need
/// them. Source parenthesization that was purely redundant (grouping
/// associative operators) is not preserved — only parens load-bearing for
/// correctness survive the round trip.
fn print_expr(expr: &Expr, min_prec: u8) -> String {
    match expr {
        Expr::Number(n) => format_number(*n),
        Expr::CellRef { literal, .. } => literal.clone(),
        Expr::Pos(inner) => format!("+{}", print_expr(inner, 3)),
        Expr::Neg(inner) => format!("-{}", print_expr(inner, 3)),
        Expr::BinaryOp(left, op, right) => {
            let prec = op.precedence();
            let s = format!(
                "{}{}{}",
                print_expr(left, prec),
                op,
                print_expr(right, prec + 1)
            );
            if prec < min_prec {
                format!("({})", s)
            } else {
                s
            }
        }
    }
}

