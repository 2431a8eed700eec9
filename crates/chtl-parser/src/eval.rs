//! Unit-aware evaluation of style expressions.

use crate::expr::{BinaryOp, Expr};
use crate::value::StyleValue;
use crate::CompileError;

/// Resolves `selector.property` references against already materialized elements.
pub trait PropertyLookup {
    fn lookup(&self, selector: &str, property: &str) -> Option<StyleValue>;
}

/// Expression evaluator.
pub struct Evaluator<'a> {
    lookup: &'a dyn PropertyLookup,
}

impl<'a> Evaluator<'a> {
    pub fn new(lookup: &'a dyn PropertyLookup) -> Self {
        Self { lookup }
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<StyleValue, CompileError> {
        match expr {
            Expr::Literal { raw } => Ok(StyleValue::from_literal(raw)),

            Expr::PropertyRef { selector, property } => self
                .lookup
                .lookup(selector, property)
                .ok_or_else(|| CompileError::PropertyNotFound {
                    selector: selector.clone(),
                    property: property.clone(),
                }),

            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => match self.evaluate(cond)? {
                StyleValue::Bool(true) => self.evaluate(then),
                StyleValue::Bool(false) => match otherwise {
                    Some(otherwise) => self.evaluate(otherwise),
                    None => Ok(StyleValue::Empty),
                },
                other => Err(CompileError::type_mismatch(format!(
                    "condition must be a boolean, got {} `{other}`",
                    other.type_name()
                ))),
            },

            Expr::Binary { left, op, right } => match op {
                BinaryOp::And | BinaryOp::Or => self.logical(left, *op, right),
                _ => {
                    let left = self.evaluate(left)?;
                    let right = self.evaluate(right)?;
                    binary(left, *op, right)
                }
            },
        }
    }

    /// `&&` and `||`, short-circuiting.
    fn logical(&self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<StyleValue, CompileError> {
        let left = expect_bool(self.evaluate(left)?, op)?;
        match (op, left) {
            (BinaryOp::And, false) => Ok(StyleValue::Bool(false)),
            (BinaryOp::Or, true) => Ok(StyleValue::Bool(true)),
            _ => Ok(StyleValue::Bool(expect_bool(self.evaluate(right)?, op)?)),
        }
    }
}

fn expect_bool(value: StyleValue, op: BinaryOp) -> Result<bool, CompileError> {
    match value {
        StyleValue::Bool(b) => Ok(b),
        other => Err(CompileError::type_mismatch(format!(
            "`{op}` needs booleans, got {} `{other}`",
            other.type_name()
        ))),
    }
}

/// Apply a non-logical binary operator to two evaluated operands.
pub fn binary(left: StyleValue, op: BinaryOp, right: StyleValue) -> Result<StyleValue, CompileError> {
    use StyleValue::{Bool, Numeric, Str};

    match (&left, &right) {
        (Numeric { value: a, unit: ua }, Numeric { value: b, unit: ub }) => {
            numeric(*a, ua, op, *b, ub, &left, &right)
        }

        // An earlier unit mismatch keeps accumulating into the same calc().
        _ if matches!(op, BinaryOp::Add | BinaryOp::Sub)
            && (is_calc(&left) || is_calc(&right))
            && calc_operand(&left) && calc_operand(&right) =>
        {
            Ok(Str(calc(&left, op, &right)))
        }

        (Str(a), Str(b)) if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) => {
            Ok(Bool((a == b) == (op == BinaryOp::Eq)))
        }
        (Bool(a), Bool(b)) if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) => {
            Ok(Bool((a == b) == (op == BinaryOp::Eq)))
        }

        _ => Err(CompileError::type_mismatch(format!(
            "cannot apply `{op}` to {} `{left}` and {} `{right}`",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn numeric(
    a: f64,
    ua: &str,
    op: BinaryOp,
    b: f64,
    ub: &str,
    left: &StyleValue,
    right: &StyleValue,
) -> Result<StyleValue, CompileError> {
    // `+ - %` and comparisons: identical units, or one side unitless.
    let shared = if ua == ub || ub.is_empty() {
        Some(ua)
    } else if ua.is_empty() {
        Some(ub)
    } else {
        None
    };
    let mismatch = || CompileError::UnitMismatch {
        left: left.to_css(),
        op: op.symbol().to_string(),
        right: right.to_css(),
    };

    let value = match op {
        BinaryOp::Add | BinaryOp::Sub => match shared {
            Some(unit) => {
                let value = if op == BinaryOp::Add { a + b } else { a - b };
                StyleValue::numeric(value, unit)
            }
            None => StyleValue::Str(calc(left, op, right)),
        },
        BinaryOp::Rem => {
            let unit = shared.ok_or_else(mismatch)?;
            if b == 0.0 {
                return Err(CompileError::DivisionByZero);
            }
            StyleValue::numeric(a % b, unit)
        }
        BinaryOp::Mul | BinaryOp::Div => {
            if !ua.is_empty() && !ub.is_empty() {
                return Err(mismatch());
            }
            let unit = if ua.is_empty() { ub } else { ua };
            if op == BinaryOp::Div {
                if b == 0.0 {
                    return Err(CompileError::DivisionByZero);
                }
                StyleValue::numeric(a / b, unit)
            } else {
                StyleValue::numeric(a * b, unit)
            }
        }
        BinaryOp::Pow => {
            if !ub.is_empty() {
                return Err(mismatch());
            }
            StyleValue::numeric(a.powf(b), ua)
        }
        BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte => {
            shared.ok_or_else(mismatch)?;
            StyleValue::Bool(match op {
                BinaryOp::Gt => a > b,
                BinaryOp::Lt => a < b,
                BinaryOp::Gte => a >= b,
                _ => a <= b,
            })
        }
        BinaryOp::Eq | BinaryOp::NotEq => {
            shared.ok_or_else(mismatch)?;
            StyleValue::Bool((a == b) == (op == BinaryOp::Eq))
        }
        BinaryOp::And | BinaryOp::Or => {
            return Err(CompileError::type_mismatch(format!(
                "`{op}` needs booleans, got numbers"
            )))
        }
    };
    Ok(value)
}

fn is_calc(value: &StyleValue) -> bool {
    matches!(value, StyleValue::Str(s) if s.starts_with("calc(") && s.ends_with(')'))
}

fn calc_operand(value: &StyleValue) -> bool {
    matches!(value, StyleValue::Numeric { .. }) || is_calc(value)
}

/// `calc(a OP b)`, flattening operands that are already calc() expressions.
fn calc(left: &StyleValue, op: BinaryOp, right: &StyleValue) -> String {
    let inner = |value: &StyleValue| {
        let css = value.to_css();
        if is_calc(value) {
            css["calc(".len()..css.len() - 1].to_string()
        } else {
            css
        }
    };
    let right = if op == BinaryOp::Sub && is_calc(right) {
        format!("({})", inner(right))
    } else {
        inner(right)
    };
    format!("calc({} {op} {right})", inner(left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprParser;
    use chtl_lexer::Lexer;
    use pretty_assertions::assert_eq;

    struct Boxes;

    impl PropertyLookup for Boxes {
        fn lookup(&self, selector: &str, property: &str) -> Option<StyleValue> {
            match (selector, property) {
                ("box", "width") => Some(StyleValue::numeric(200.0, "px")),
                ("#main", "visible") => Some(StyleValue::Bool(true)),
                _ => None,
            }
        }
    }

    fn eval(source: &str) -> Result<StyleValue, CompileError> {
        let tokens = Lexer::tokenize(source).unwrap();
        let expr = ExprParser::parse(&tokens).unwrap();
        Evaluator::new(&Boxes).evaluate(&expr)
    }

    fn ok(source: &str) -> StyleValue {
        eval(source).unwrap()
    }

    // =========================================================================
    // Units
    // =========================================================================

    #[test]
    fn test_same_unit_addition() {
        assert_eq!(ok("100px + 50px"), StyleValue::numeric(150.0, "px"));
    }

    #[test]
    fn test_unitless_adopts_unit() {
        assert_eq!(ok("10 + 5em"), StyleValue::numeric(15.0, "em"));
        assert_eq!(ok("100px * 2"), StyleValue::numeric(200.0, "px"));
        assert_eq!(ok("100px / 4"), StyleValue::numeric(25.0, "px"));
    }

    #[test]
    fn test_mismatched_addition_degrades_to_calc() {
        assert_eq!(ok("100px + 50s"), StyleValue::Str("calc(100px + 50s)".into()));
        assert_eq!(
            ok("100% - 20px - 1em"),
            StyleValue::Str("calc(100% - 20px - 1em)".into())
        );
    }

    #[test]
    fn test_two_units_multiplication_rejected() {
        assert!(matches!(eval("2px * 3px"), Err(CompileError::UnitMismatch { .. })));
    }

    #[test]
    fn test_power_and_remainder() {
        assert_eq!(ok("2 ** 3"), StyleValue::numeric(8.0, ""));
        assert_eq!(ok("3px ** 2"), StyleValue::numeric(9.0, "px"));
        assert_eq!(ok("10px % 4"), StyleValue::numeric(2.0, "px"));
        assert!(matches!(eval("2 ** 2px"), Err(CompileError::UnitMismatch { .. })));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval("10px / 0"), Err(CompileError::DivisionByZero));
        assert_eq!(eval("10 % 0"), Err(CompileError::DivisionByZero));
    }

    // =========================================================================
    // Comparison and logic
    // =========================================================================

    #[test]
    fn test_comparisons() {
        assert_eq!(ok("100px > 50px"), StyleValue::Bool(true));
        assert_eq!(ok("1 >= 2"), StyleValue::Bool(false));
        assert_eq!(ok("red == red"), StyleValue::Bool(true));
        assert_eq!(ok("true != false"), StyleValue::Bool(true));
    }

    #[test]
    fn test_comparison_unit_mismatch_is_fatal() {
        assert_eq!(
            eval("1px > 1s"),
            Err(CompileError::UnitMismatch {
                left: "1px".into(),
                op: ">".into(),
                right: "1s".into(),
            })
        );
    }

    #[test]
    fn test_mixed_equality_is_type_mismatch() {
        assert!(matches!(eval("red == true"), Err(CompileError::TypeMismatch { .. })));
    }

    #[test]
    fn test_logical_requires_booleans() {
        assert!(matches!(eval("1 && true"), Err(CompileError::TypeMismatch { .. })));
    }

    #[test]
    fn test_logical_short_circuit() {
        assert_eq!(ok("false && a.missing"), StyleValue::Bool(false));
        assert_eq!(ok("true || a.missing"), StyleValue::Bool(true));
    }

    // =========================================================================
    // Conditionals and references
    // =========================================================================

    #[test]
    fn test_ternary_skips_unselected_branch() {
        assert_eq!(ok("0 > 1 ? A.missing : 5"), StyleValue::numeric(5.0, ""));
        assert_eq!(ok("1 > 0 ? 5 : A.missing"), StyleValue::numeric(5.0, ""));
    }

    #[test]
    fn test_selected_missing_reference_fails() {
        assert_eq!(
            eval("1 > 0 ? A.missing : 5"),
            Err(CompileError::PropertyNotFound {
                selector: "A".into(),
                property: "missing".into(),
            })
        );
    }

    #[test]
    fn test_ternary_chain_and_empty_branch() {
        assert_eq!(ok("1 > 2 ? red, 2 > 1 ? blue : green"), StyleValue::Str("blue".into()));
        assert_eq!(ok("1 > 2 ? red"), StyleValue::Empty);
    }

    #[test]
    fn test_nested_ternary() {
        assert_eq!(ok("1 > 0 ? 2 > 1 ? red : blue : green"), StyleValue::Str("red".into()));
        assert_eq!(ok("1 > 0 ? 2 < 1 ? red : blue : green"), StyleValue::Str("blue".into()));
        assert_eq!(ok("1 < 0 ? 2 > 1 ? red : blue : green"), StyleValue::Str("green".into()));
    }

    #[test]
    fn test_non_boolean_condition() {
        assert!(matches!(eval("5 ? a : b"), Err(CompileError::TypeMismatch { .. })));
    }

    #[test]
    fn test_property_reference_arithmetic() {
        assert_eq!(ok("box.width / 2"), StyleValue::numeric(100.0, "px"));
        assert_eq!(ok("#main.visible ? block : none"), StyleValue::Str("block".into()));
    }
}
