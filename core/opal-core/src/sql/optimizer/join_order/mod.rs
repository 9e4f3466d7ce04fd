//! 조인 순서 최적화기 — 비용 기반 DPccp 열거
//!
//! 플랜에서 내부 조인/크로스 프로덕트로 이어진 재배열 가능 영역을 찾아
//! 베이스 관계들로 분해하고, 필터에서 조인 술어 하이퍼그래프를 유도한 뒤,
//! csg-cmp 쌍의 정확한 동적 계획법(예산 초과 시 그리디 폴백)으로 가장
//! 싼 조인 트리를 고릅니다. 고른 트리로 원래 영역을 외과적으로
//! 재봉합하고, 남은 술어는 필터로 내려놓습니다.
//!
//! 비내부 조인, 집계, 집합 연산은 재배열 경계입니다 — 각자 새
//! 최적화기 인스턴스로 따로 최적화되고, 경계 아래 전체가 하나의 불투명한
//! 베이스 관계로 취급됩니다.

mod enumerator;
mod query_graph;
mod relation_set;
mod resolver;


pub use enumerator::JoinNode;
pub use query_graph::QueryGraph;
pub use relation_set::{RelationSet, SetId, SetManager};

use std::collections::HashSet;

use ahash::AHashMap;

use crate::error::{OpalError, OpalResult};
use crate::sql::planner::{ConjunctionOp, Expr, JoinCondition, JoinType, LogicalOperator, OperatorKind};

use resolver::{collect_table_indexes, push_filter, resolve_join_conditions};

/// 기본 열거 예산 — 쌍 방출 횟수가 이 값에 닿으면 그리디로 전환합니다
pub const DEFAULT_PAIR_BUDGET: usize = 10_000;

/// 재배열 영역의 베이스 관계
///
/// `path`는 플랜 루트에서 이 관계를 이루는 연산자 체인의 최상단까지의
/// 자식 인덱스 경로입니다. 재작성 시 분리(detach)에 쓰이고 버려집니다.
#[derive(Debug)]
struct Relation {
    path: Vec<usize>,
}

/// 추출된 필터 하나의 관계 집합 정보
///
/// `left_set`/`right_set`은 비교 표현식의 양 피연산자가 모두 비지 않은
/// 바인딩을 가질 때만 채워집니다.
#[derive(Debug)]
struct FilterInfo {
    filter_index: usize,
    set: SetId,
    left_set: Option<SetId>,
    right_set: Option<SetId>,
}

/// 비용 기반 조인 순서 최적화기 — 인스턴스당 plan 하나, 1회용
pub struct JoinOrderOptimizer {
    set_manager: SetManager,
    query_graph: QueryGraph,
    relations: Vec<Relation>,
    /// 베이스 테이블 인덱스 → 관계 id
    relation_mapping: AHashMap<usize, usize>,
    /// 추출된 필터 표현식 — 조건/필터로 소비되면 None
    filters: Vec<Option<Expr>>,
    filter_infos: Vec<FilterInfo>,
    /// RelationSet별 최선의 조인 트리
    plans: AHashMap<SetId, JoinNode>,
    pairs: usize,
    pair_budget: usize,
}

impl JoinOrderOptimizer {
    pub fn new() -> Self {
        Self::with_pair_budget(DEFAULT_PAIR_BUDGET)
    }

    /// 열거 예산을 지정해 생성 — 그리디 경로를 결정적으로 타게 하는
    /// 테스트용 훅이기도 합니다
    pub fn with_pair_budget(pair_budget: usize) -> Self {
        Self {
            set_manager: SetManager::new(),
            query_graph: QueryGraph::new(),
            relations: Vec::new(),
            relation_mapping: AHashMap::new(),
            filters: Vec::new(),
            filter_infos: Vec::new(),
            plans: AHashMap::new(),
            pairs: 0,
            pair_budget,
        }
    }

    /// 플랜의 조인 영역을 재배열한 동등한 플랜을 돌려줍니다
    ///
    /// 재배열할 것이 없으면 조인 조건 해석만 거친 플랜이 그대로
    /// 돌아옵니다. 에러는 최적화기 불변식 위반(로직 버그)뿐입니다.
    pub fn optimize(mut self, mut plan: LogicalOperator) -> OpalResult<LogicalOperator> {
        let mut filter_operators: Vec<Vec<usize>> = Vec::new();
        let reorderable =
            self.extract_join_relations(&mut plan, Vec::new(), &mut filter_operators)?;
        if !reorderable || self.relations.len() <= 1 {
            tracing::debug!(
                relations = self.relations.len(),
                "plan region is not reorderable"
            );
            return Ok(resolve_join_conditions(plan));
        }

        // move every filter out of the collected operators into the global
        // filter table
        self.extract_filters(&mut plan, &filter_operators);
        self.build_query_graph();

        // seed the memo with the single-relation plans
        for i in 0..self.relations.len() {
            let set = self.set_manager.get_relation(i);
            let cardinality = operator_at(&plan, &self.relations[i].path).estimate_cardinality();
            self.plans.insert(set, JoinNode::leaf(set, cardinality));
        }

        self.solve_join_order();

        let total = self.set_manager.get_relation_set(0..self.relations.len());
        if !self.plans.contains_key(&total) {
            // the query graph was disjoint: force connectivity with cross
            // product edges and solve once more
            tracing::debug!("no complete join plan found, retrying with cross product edges");
            self.generate_cross_products();
            self.solve_join_order();
            if !self.plans.contains_key(&total) {
                return Err(OpalError::Internal(
                    "no join plan covers all relations after cross product generation".to_string(),
                ));
            }
        }

        let rewritten = self.rewrite_plan(plan, total)?;
        Ok(resolve_join_conditions(rewritten))
    }

    /// 재배열 영역 인식 (사전 순회)
    ///
    /// 베이스 관계를 등록하고 필터/내부 조인의 경로를 모읍니다. false는
    /// "이 영역은 재배열 불가"를 뜻합니다 — 그 경우에도 경계 아래는 이미
    /// 새 최적화기로 처리된 뒤입니다.
    fn extract_join_relations(
        &mut self,
        plan: &mut LogicalOperator,
        mut path: Vec<usize>,
        filter_operators: &mut Vec<Vec<usize>>,
    ) -> OpalResult<bool> {
        enum NodeClass {
            SetOperation,
            OpaqueJoin,
            InnerJoin,
            CrossProduct,
            Leaf { table_index: usize },
            SubqueryLeaf { table_index: usize },
            Stop,
        }

        let input_path = path.clone();
        // descend through single-child operators; subquery wrappers stop the
        // descent because their child is a separate optimization region
        loop {
            let op = operator_at_mut(plan, &path);
            if op.children.len() != 1 || matches!(op.kind, OperatorKind::Subquery { .. }) {
                break;
            }
            if matches!(op.kind, OperatorKind::Filter) {
                filter_operators.push(path.clone());
            }
            if matches!(op.kind, OperatorKind::Aggregate) {
                // filters must not move through a group-by
                Self::optimize_children(op)?;
                return Ok(false);
            }
            path.push(0);
        }

        let class = match &operator_at(plan, &path).kind {
            OperatorKind::Union | OperatorKind::Except | OperatorKind::Intersect => {
                NodeClass::SetOperation
            }
            OperatorKind::Join { join_type, .. } if *join_type != JoinType::Inner => {
                NodeClass::OpaqueJoin
            }
            OperatorKind::Join { .. } => NodeClass::InnerJoin,
            OperatorKind::CrossProduct => NodeClass::CrossProduct,
            OperatorKind::Scan { table_index, .. }
            | OperatorKind::TableFunction { table_index, .. } => NodeClass::Leaf {
                table_index: *table_index,
            },
            OperatorKind::Subquery { table_index } => NodeClass::SubqueryLeaf {
                table_index: *table_index,
            },
            _ => NodeClass::Stop,
        };

        match class {
            NodeClass::SetOperation => {
                Self::optimize_children(operator_at_mut(plan, &path))?;
                Ok(false)
            }
            NodeClass::OpaqueJoin => {
                // a non-inner join cannot be reordered across: conditions may
                // not move through it (an outer join manufactures NULLs).
                // optimize each side on its own and expose the whole subtree
                // as one opaque base relation covering every table below it.
                let op = operator_at_mut(plan, &path);
                Self::optimize_children(op)?;
                let mut bindings = HashSet::new();
                collect_table_indexes(op, &mut bindings);
                let relation_id = self.relations.len();
                for table_index in bindings {
                    self.relation_mapping.insert(table_index, relation_id);
                }
                self.relations.push(Relation { path: input_path });
                Ok(true)
            }
            NodeClass::Leaf { table_index } => {
                self.register_relation(table_index, input_path);
                Ok(true)
            }
            NodeClass::SubqueryLeaf { table_index } => {
                Self::optimize_children(operator_at_mut(plan, &path))?;
                self.register_relation(table_index, input_path);
                Ok(true)
            }
            NodeClass::InnerJoin | NodeClass::CrossProduct => {
                if matches!(class, NodeClass::InnerJoin) {
                    // inner join: its raw predicates join the global filter pool
                    filter_operators.push(path.clone());
                }
                let mut left_path = path.clone();
                left_path.push(0);
                let mut right_path = path;
                right_path.push(1);
                if !self.extract_join_relations(plan, left_path, filter_operators)? {
                    return Ok(false);
                }
                if !self.extract_join_relations(plan, right_path, filter_operators)? {
                    return Ok(false);
                }
                Ok(true)
            }
            NodeClass::Stop => Ok(false),
        }
    }

    /// 경계 연산자의 자식들을 각각 새 최적화기로 처리
    fn optimize_children(op: &mut LogicalOperator) -> OpalResult<()> {
        let children = std::mem::take(&mut op.children);
        op.children = children
            .into_iter()
            .map(|child| JoinOrderOptimizer::new().optimize(child))
            .collect::<OpalResult<Vec<_>>>()?;
        Ok(())
    }

    fn register_relation(&mut self, table_index: usize, path: Vec<usize>) {
        let relation_id = self.relations.len();
        self.relation_mapping.insert(table_index, relation_id);
        self.relations.push(Relation { path });
    }

    /// 수집된 연산자들에서 필터를 모두 꺼내 전역 목록으로 옮깁니다
    ///
    /// 재최적화 입력을 위해 내부 조인의 기존 조건도 비교 표현식으로 되돌려
    /// 함께 꺼냅니다. 최상위 AND 결합은 개별 술어로 쪼갭니다.
    fn extract_filters(&mut self, plan: &mut LogicalOperator, filter_operators: &[Vec<usize>]) {
        for path in filter_operators {
            let op = operator_at_mut(plan, path);
            if let OperatorKind::Join { conditions, .. } = &mut op.kind {
                for condition in conditions.drain(..) {
                    self.filters.push(Some(Expr::Comparison {
                        op: condition.comparison,
                        left: Box::new(condition.left),
                        right: Box::new(condition.right),
                    }));
                }
            }
            for expr in op.expressions.drain(..) {
                push_conjuncts(expr, &mut self.filters);
            }
        }
    }

    /// 표현식이 참조하는 관계 id 집합 추출
    ///
    /// 상관 참조(depth > 0), 실행 시점 참조, 상관 서브쿼리, 미등록 테이블
    /// 인덱스는 표현식 전체를 재배열 불가로 만듭니다 — bindings를 비우고
    /// false를 돌려줍니다. 그런 필터는 잔여 필터로만 쓰입니다.
    fn extract_bindings(&self, expr: &Expr, bindings: &mut HashSet<usize>) -> bool {
        match expr {
            Expr::ColumnRef { depth, .. } if *depth > 0 => {
                bindings.clear();
                false
            }
            Expr::ColumnRef { table_index, .. } => match self.relation_mapping.get(table_index) {
                Some(&relation) => {
                    bindings.insert(relation);
                    true
                }
                None => {
                    bindings.clear();
                    false
                }
            },
            Expr::BoundRef(_) => {
                bindings.clear();
                false
            }
            Expr::Subquery { correlated: true } => {
                bindings.clear();
                false
            }
            _ => {
                for child in expr.children() {
                    if !self.extract_bindings(child, bindings) {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// 필터마다 FilterInfo를 만들고 조인 술어가 될 수 있는 비교에서
    /// 하이퍼엣지를 유도합니다
    ///
    /// 양쪽 바인딩이 겹치는 비교(`a.x = a.y + b.y`)는 차집합으로 쪼개어
    /// 엣지를 만듭니다 — 차집합이 비면 엣지는 생기지 않고 순수 잔여
    /// 필터로 남습니다.
    fn build_query_graph(&mut self) {
        for index in 0..self.filters.len() {
            let Some(filter) = self.filters[index].take() else {
                continue;
            };
            let mut bindings = HashSet::new();
            self.extract_bindings(&filter, &mut bindings);
            let set = self.set_manager.get_relation_set(bindings.iter().copied());
            let mut info = FilterInfo {
                filter_index: index,
                set,
                left_set: None,
                right_set: None,
            };

            if let Expr::Comparison { left, right, .. } = &filter {
                let mut left_bindings = HashSet::new();
                let mut right_bindings = HashSet::new();
                self.extract_bindings(left, &mut left_bindings);
                self.extract_bindings(right, &mut right_bindings);
                if !left_bindings.is_empty() && !right_bindings.is_empty() {
                    let left_set = self
                        .set_manager
                        .get_relation_set(left_bindings.iter().copied());
                    let right_set = self
                        .set_manager
                        .get_relation_set(right_bindings.iter().copied());
                    info.left_set = Some(left_set);
                    info.right_set = Some(right_set);
                    if left_set != right_set {
                        if left_bindings.is_disjoint(&right_bindings) {
                            self.query_graph.create_edge(left_set, right_set, Some(index));
                            self.query_graph.create_edge(right_set, left_set, Some(index));
                        } else {
                            let right_difference =
                                self.set_manager.difference(right_set, left_set);
                            let left_difference =
                                self.set_manager.difference(left_set, right_set);
                            // LEFT ↔ RIGHT \ LEFT
                            if self.set_manager.set(right_difference).count() > 0 {
                                self.query_graph
                                    .create_edge(left_set, right_difference, Some(index));
                                self.query_graph
                                    .create_edge(right_difference, left_set, Some(index));
                            }
                            // LEFT \ RIGHT ↔ RIGHT
                            if self.set_manager.set(left_difference).count() > 0 {
                                self.query_graph
                                    .create_edge(left_difference, right_set, Some(index));
                                self.query_graph
                                    .create_edge(right_set, left_difference, Some(index));
                            }
                        }
                    }
                }
            }

            self.filter_infos.push(info);
            self.filters[index] = Some(filter);
        }
    }

    /// 고른 조인 트리로 플랜을 재작성
    ///
    /// 베이스 관계들을 원래 트리에서 분리하고, 메모의 트리대로 조인
    /// 영역을 다시 세운 뒤, 원래 플랜의 최상위 조인 자리에 봉합합니다.
    fn rewrite_plan(&mut self, mut plan: LogicalOperator, total: SetId) -> OpalResult<LogicalOperator> {
        let root_is_join = plan.children.len() > 1;

        // detach every relation, deepest path first so earlier removals do
        // not shift the paths still pending
        let mut extracted: Vec<Option<LogicalOperator>> =
            (0..self.relations.len()).map(|_| None).collect();
        let mut order: Vec<usize> = (0..self.relations.len()).collect();
        order.sort_by(|&a, &b| self.relations[b].path.cmp(&self.relations[a].path));
        for i in order {
            let path = self.relations[i].path.clone();
            extracted[i] = Some(detach_at(&mut plan, &path)?);
        }

        let (_, mut join_tree) = self.generate_joins(&mut extracted, total)?;

        // final pushdown: whatever was not consumed as a join condition or a
        // contained residual wraps the new region
        for i in 0..self.filters.len() {
            if let Some(expr) = self.filters[i].take() {
                join_tree = push_filter(join_tree, expr);
            }
        }

        if root_is_join {
            return Ok(join_tree);
        }
        splice_join_region(&mut plan, join_tree)?;
        Ok(plan)
    }

    /// 메모의 JoinNode 트리에서 실제 연산자 트리를 재귀적으로 생성
    fn generate_joins(
        &mut self,
        extracted: &mut [Option<LogicalOperator>],
        node: SetId,
    ) -> OpalResult<(SetId, LogicalOperator)> {
        let plan_node = self
            .plans
            .get(&node)
            .cloned()
            .ok_or_else(|| OpalError::Internal("memo entry missing during join generation".to_string()))?;

        let (result_relation, mut result_operator) = match plan_node.children {
            Some((left_set, right_set)) => {
                let (left_relation, left_op) = self.generate_joins(extracted, left_set)?;
                let (right_relation, right_op) = self.generate_joins(extracted, right_set)?;
                let result_relation = self.set_manager.union(left_relation, right_relation);

                if plan_node.filters.is_empty() {
                    (result_relation, LogicalOperator::cross_product(left_op, right_op))
                } else {
                    let mut conditions = Vec::new();
                    for &filter in &plan_node.filters {
                        let info = &self.filter_infos[filter];
                        let (Some(left_set), Some(right_set)) = (info.left_set, info.right_set)
                        else {
                            continue;
                        };
                        // which recursively built child covers which operand
                        // side decides the orientation
                        let forward = self.set_manager.is_subset(left_relation, left_set)
                            && self.set_manager.is_subset(right_relation, right_set);
                        let backward = self.set_manager.is_subset(left_relation, right_set)
                            && self.set_manager.is_subset(right_relation, left_set);
                        if !forward && !backward {
                            // overlap-split predicate fitting neither side:
                            // leave it for residual pushdown below
                            continue;
                        }
                        let Some(expr) = self.filters[info.filter_index].take() else {
                            continue;
                        };
                        match expr {
                            Expr::Comparison { op, left, right } => {
                                let (cond_left, cond_right, comparison) = if forward {
                                    (left, right, op)
                                } else {
                                    (right, left, op.flip())
                                };
                                conditions.push(JoinCondition {
                                    left: *cond_left,
                                    right: *cond_right,
                                    comparison,
                                });
                            }
                            other => {
                                self.filters[info.filter_index] = Some(other);
                            }
                        }
                    }
                    let join = LogicalOperator {
                        kind: OperatorKind::Join {
                            join_type: JoinType::Inner,
                            conditions,
                        },
                        children: vec![left_op, right_op],
                        expressions: Vec::new(),
                    };
                    (result_relation, join)
                }
            }
            None => {
                let set = self.set_manager.set(node);
                let relation_id = set.relations[0];
                let op = extracted[relation_id].take().ok_or_else(|| {
                    OpalError::Internal("base relation consumed twice during join generation".to_string())
                })?;
                (node, op)
            }
        };

        // residual pushdown: a still-unconsumed filter fully contained in
        // this subtree can no longer serve any join above it
        for i in 0..self.filter_infos.len() {
            let info = &self.filter_infos[i];
            let filter_index = info.filter_index;
            if self.filters[filter_index].is_none() {
                continue;
            }
            // empty-set infos (poisoned residuals) wait for the final pushdown
            if self.set_manager.set(info.set).count() == 0 {
                continue;
            }
            if !self.set_manager.is_subset(result_relation, info.set) {
                continue;
            }
            if let Some(expr) = self.filters[filter_index].take() {
                result_operator = attach_residual(result_operator, expr);
            }
        }

        Ok((result_relation, result_operator))
    }
}

impl Default for JoinOrderOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// 잔여 비교는 가능한 한 조인의 원시 표현식 목록으로 들어가 최종 해석에서
/// 조건이 되고, 그 외에는 필터로 감쌉니다
fn attach_residual(mut op: LogicalOperator, expr: Expr) -> LogicalOperator {
    if expr.is_comparison() {
        if matches!(op.kind, OperatorKind::Join { .. }) {
            op.expressions.push(expr);
            return op;
        }
        let filter_over_join = matches!(op.kind, OperatorKind::Filter)
            && matches!(
                op.children.first().map(|c| &c.kind),
                Some(OperatorKind::Join { .. })
            );
        if filter_over_join {
            op.children[0].expressions.push(expr);
            return op;
        }
    }
    push_filter(op, expr)
}

/// 최상위 AND 결합을 개별 술어로 쪼개 전역 필터 목록에 추가
fn push_conjuncts(expr: Expr, filters: &mut Vec<Option<Expr>>) {
    match expr {
        Expr::Conjunction {
            op: ConjunctionOp::And,
            children,
        } => {
            for child in children {
                push_conjuncts(child, filters);
            }
        }
        other => filters.push(Some(other)),
    }
}

fn operator_at<'a>(root: &'a LogicalOperator, path: &[usize]) -> &'a LogicalOperator {
    let mut op = root;
    for &index in path {
        op = &op.children[index];
    }
    op
}

fn operator_at_mut<'a>(root: &'a mut LogicalOperator, path: &[usize]) -> &'a mut LogicalOperator {
    let mut op = root;
    for &index in path {
        op = &mut op.children[index];
    }
    op
}

/// 경로가 가리키는 서브트리를 부모의 자식 목록에서 분리해 소유권을 얻습니다
fn detach_at(root: &mut LogicalOperator, path: &[usize]) -> OpalResult<LogicalOperator> {
    let Some((&last, parent_path)) = path.split_last() else {
        return Err(OpalError::Internal(
            "base relation at the plan root cannot be detached".to_string(),
        ));
    };
    let parent = operator_at_mut(root, parent_path);
    if last >= parent.children.len() {
        return Err(OpalError::Internal(
            "relation slot missing from its parent operator".to_string(),
        ));
    }
    Ok(parent.children.remove(last))
}

/// 단일 자식 체인을 따라 내려가 최상위 조인/크로스 프로덕트를 새 조인
/// 영역으로 교체
fn splice_join_region(op: &mut LogicalOperator, join_tree: LogicalOperator) -> OpalResult<()> {
    if op.children.len() != 1 {
        return Err(OpalError::Internal(
            "join region not found below the plan root".to_string(),
        ));
    }
    if matches!(
        op.children[0].kind,
        OperatorKind::Join { .. } | OperatorKind::CrossProduct
    ) {
        op.children[0] = join_tree;
        return Ok(());
    }
    splice_join_region(&mut op.children[0], join_tree)
}
