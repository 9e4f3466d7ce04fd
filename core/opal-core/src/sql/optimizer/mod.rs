//! SQL 쿼리 옵티마이저 — 규칙 기반 파이프라인
//!
//! LogicalOperator 플랜을 규칙 순서대로 변환합니다.
//! 핵심 규칙: ConstantFolding, JoinOrder (비용 기반 조인 순서 재배열)

mod constant_folding;
pub mod join_order;


use crate::error::OpalResult;
use crate::sql::planner::LogicalOperator;

pub use constant_folding::ConstantFoldingRule;
pub use join_order::{DEFAULT_PAIR_BUDGET, JoinOrderOptimizer};

/// 최적화 규칙 트레이트
pub trait OptimizationRule: Send + Sync {
    /// 규칙 이름
    fn name(&self) -> &str;

    /// LogicalOperator 플랜에 규칙 적용
    fn apply(&self, plan: LogicalOperator) -> OpalResult<LogicalOperator>;
}

/// 조인 순서 재배열 규칙
///
/// JoinOrderOptimizer는 호출당 1회용이므로 매 적용마다 새 인스턴스를
/// 만듭니다.
pub struct JoinOrderRule;

impl OptimizationRule for JoinOrderRule {
    fn name(&self) -> &str {
        "JoinOrder"
    }

    fn apply(&self, plan: LogicalOperator) -> OpalResult<LogicalOperator> {
        JoinOrderOptimizer::new().optimize(plan)
    }
}

/// 쿼리 옵티마이저
pub struct QueryOptimizer {
    rules: Vec<Box<dyn OptimizationRule>>,
}

impl QueryOptimizer {
    /// 기본 최적화 규칙으로 생성
    pub fn new() -> Self {
        Self {
            rules: vec![Box::new(ConstantFoldingRule), Box::new(JoinOrderRule)],
        }
    }

    /// 모든 규칙 적용
    pub fn optimize(&self, plan: LogicalOperator) -> OpalResult<LogicalOperator> {
        let mut optimized = plan;
        for rule in &self.rules {
            optimized = rule.apply(optimized)?;
        }
        Ok(optimized)
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
