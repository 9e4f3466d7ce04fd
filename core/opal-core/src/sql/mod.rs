// SQL 모듈 진입점
pub mod optimizer;
pub mod planner;

pub use optimizer::{
    DEFAULT_PAIR_BUDGET, ConstantFoldingRule, JoinOrderOptimizer, JoinOrderRule, OptimizationRule,
    QueryOptimizer,
};
pub use planner::{
    ArithmeticOp, ComparisonOp, ConjunctionOp, Expr, JoinCondition, JoinType, LogicalOperator,
    OperatorKind, ScalarValue,
};
