//! Rule: Constant Folding
//!
//! 플랜 시점에 평가 가능한 상수 표현식을 접습니다 (1 + 2 → 3).
//! 항상 참으로 접힌 필터 술어는 버려지고, 빈 필터는 자식으로 대체됩니다.

use crate::error::OpalResult;
use crate::sql::planner::{
    ArithmeticOp, ComparisonOp, ConjunctionOp, Expr, LogicalOperator, OperatorKind, ScalarValue,
};

use super::OptimizationRule;

/// 상수 표현식을 플랜 시점에 평가 (1 + 2 → 3)
pub struct ConstantFoldingRule;

impl OptimizationRule for ConstantFoldingRule {
    fn name(&self) -> &str {
        "ConstantFolding"
    }

    fn apply(&self, plan: LogicalOperator) -> OpalResult<LogicalOperator> {
        Ok(self.fold(plan))
    }
}

impl ConstantFoldingRule {
    fn fold(&self, mut plan: LogicalOperator) -> LogicalOperator {
        plan.children = plan.children.into_iter().map(|c| self.fold(c)).collect();
        plan.expressions = plan
            .expressions
            .into_iter()
            .map(|e| self.fold_expr(e))
            .collect();

        if matches!(plan.kind, OperatorKind::Filter) {
            // conjuncts folded to TRUE contribute nothing
            plan.expressions
                .retain(|e| !matches!(e, Expr::Literal(ScalarValue::Boolean(true))));
            if plan.expressions.is_empty() && plan.children.len() == 1 {
                if let Some(child) = plan.children.pop() {
                    return child;
                }
            }
        }
        plan
    }

    /// Fold constant expressions bottom-up: Literal op Literal → Literal
    fn fold_expr(&self, expr: Expr) -> Expr {
        match expr {
            Expr::Comparison { op, left, right } => {
                let left = self.fold_expr(*left);
                let right = self.fold_expr(*right);
                if let (Expr::Literal(lv), Expr::Literal(rv)) = (&left, &right)
                    && let Some(result) = eval_comparison(lv, op, rv)
                {
                    return Expr::Literal(ScalarValue::Boolean(result));
                }
                Expr::Comparison {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            Expr::Arithmetic { op, left, right } => {
                let left = self.fold_expr(*left);
                let right = self.fold_expr(*right);
                if let (Expr::Literal(lv), Expr::Literal(rv)) = (&left, &right)
                    && let Some(result) = eval_arithmetic(lv, op, rv)
                {
                    return Expr::Literal(result);
                }
                Expr::Arithmetic {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            Expr::Conjunction { op, children } => {
                let children: Vec<Expr> =
                    children.into_iter().map(|c| self.fold_expr(c)).collect();
                self.fold_conjunction(op, children)
            }
            Expr::Not(child) => {
                let child = self.fold_expr(*child);
                if let Expr::Literal(ScalarValue::Boolean(b)) = child {
                    return Expr::Literal(ScalarValue::Boolean(!b));
                }
                Expr::Not(Box::new(child))
            }
            other => other,
        }
    }

    /// AND/OR의 리터럴 단락 평가
    fn fold_conjunction(&self, op: ConjunctionOp, children: Vec<Expr>) -> Expr {
        let (absorbing, neutral) = match op {
            ConjunctionOp::And => (false, true),
            ConjunctionOp::Or => (true, false),
        };
        if children
            .iter()
            .any(|c| matches!(c, Expr::Literal(ScalarValue::Boolean(b)) if *b == absorbing))
        {
            return Expr::Literal(ScalarValue::Boolean(absorbing));
        }
        let mut remaining: Vec<Expr> = children
            .into_iter()
            .filter(|c| !matches!(c, Expr::Literal(ScalarValue::Boolean(b)) if *b == neutral))
            .collect();
        match remaining.len() {
            0 => Expr::Literal(ScalarValue::Boolean(neutral)),
            1 => remaining.remove(0),
            _ => Expr::Conjunction {
                op,
                children: remaining,
            },
        }
    }
}

fn eval_comparison(left: &ScalarValue, op: ComparisonOp, right: &ScalarValue) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (left, right) {
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => a.partial_cmp(b)?,
        (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a.cmp(b),
        (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
        _ => return None,
    };
    match op {
        ComparisonOp::Equal => Some(ordering == Ordering::Equal),
        ComparisonOp::NotEqual => Some(ordering != Ordering::Equal),
        ComparisonOp::LessThan => Some(ordering == Ordering::Less),
        ComparisonOp::LessThanOrEqual => Some(ordering != Ordering::Greater),
        ComparisonOp::GreaterThan => Some(ordering == Ordering::Greater),
        ComparisonOp::GreaterThanOrEqual => Some(ordering != Ordering::Less),
        // pattern matching needs runtime evaluation
        ComparisonOp::Like | ComparisonOp::NotLike => None,
    }
}

fn eval_arithmetic(
    left: &ScalarValue,
    op: ArithmeticOp,
    right: &ScalarValue,
) -> Option<ScalarValue> {
    match (left, right) {
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => {
            let result = match op {
                ArithmeticOp::Add => a.checked_add(*b)?,
                ArithmeticOp::Subtract => a.checked_sub(*b)?,
                ArithmeticOp::Multiply => a.checked_mul(*b)?,
                ArithmeticOp::Divide => a.checked_div(*b)?,
                ArithmeticOp::Modulo => a.checked_rem(*b)?,
            };
            Some(ScalarValue::Int64(result))
        }
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => {
            let result = match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Subtract => a - b,
                ArithmeticOp::Multiply => a * b,
                ArithmeticOp::Divide => a / b,
                ArithmeticOp::Modulo => a % b,
            };
            Some(ScalarValue::Float64(result))
        }
        _ => None,
    }
}
