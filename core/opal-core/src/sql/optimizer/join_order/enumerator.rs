//! csg-cmp 쌍 열거 — DPccp 동적 계획법과 그리디 폴백
//!
//! Moerkotte & Neumann의 "Dynamic Programming Strikes Back"를 따라 쿼리
//! 그래프의 연결 부분그래프/보완 쌍을 정확히 열거합니다. 방출 횟수가
//! 예산을 넘으면 열거를 중단하고 Greedy Operator Ordering으로 전환합니다.

use std::collections::HashSet;

use super::JoinOrderOptimizer;
use super::relation_set::SetId;

/// 메모 항목 — 특정 RelationSet에 대해 지금까지 찾은 최선의 조인 트리
#[derive(Debug, Clone)]
pub struct JoinNode {
    pub set: SetId,
    /// 이 노드를 만든 연결의 필터 인덱스들 — 내부 노드인데 비어 있으면
    /// 크로스 프로덕트
    pub filters: Vec<usize>,
    /// (left, right) 자식 집합 id — 리프면 None
    ///
    /// 자식은 메모를 가리키는 집합 id이므로, 하위 집합의 플랜이 더 좋은
    /// 것으로 교체되면 재구성은 자동으로 교체본을 봅니다.
    pub children: Option<(SetId, SetId)>,
    pub cardinality: u64,
    pub cost: u64,
}

impl JoinNode {
    /// 베이스 관계 하나짜리 리프 — 비용 0
    pub fn leaf(set: SetId, cardinality: u64) -> Self {
        Self {
            set,
            filters: Vec::new(),
            children: None,
            cardinality,
            cost: 0,
        }
    }
}

impl JoinOrderOptimizer {
    /// 두 부분 플랜을 조인한 새 트리 노드
    ///
    /// 카디널리티가 작은 쪽이 오른쪽(빌드 측)이 되도록 맞춥니다. 필터가
    /// 없으면 크로스 프로덕트로 보고 곱을, 있으면 외래 키 조인을 가정해
    /// 두 입력의 최댓값을 기대 카디널리티로 씁니다.
    fn create_join_tree(&self, set: SetId, filters: &[usize], left: SetId, right: SetId) -> JoinNode {
        let left_plan = &self.plans[&left];
        let right_plan = &self.plans[&right];
        let (left, right, left_plan, right_plan) = if left_plan.cardinality < right_plan.cardinality
        {
            (right, left, right_plan, left_plan)
        } else {
            (left, right, left_plan, right_plan)
        };
        let cardinality = if filters.is_empty() {
            left_plan.cardinality.saturating_mul(right_plan.cardinality)
        } else {
            left_plan.cardinality.max(right_plan.cardinality)
        };
        let cost = cardinality
            .saturating_add(left_plan.cost)
            .saturating_add(right_plan.cost);
        JoinNode {
            set,
            filters: filters.to_vec(),
            children: Some((left, right)),
            cardinality,
            cost,
        }
    }

    /// 쌍을 메모에 반영하고 합쳐진 집합의 id를 돌려줍니다
    ///
    /// 엄격히 더 싼 플랜만 기존 항목을 교체합니다 — 비용이 같으면 먼저
    /// 발견된 플랜이 이깁니다.
    pub(super) fn emit_pair(&mut self, left: SetId, right: SetId, filters: &[usize]) -> SetId {
        let new_set = self.set_manager.union(left, right);
        let new_plan = self.create_join_tree(new_set, filters, left, right);
        let improved = match self.plans.get(&new_set) {
            Some(existing) => new_plan.cost < existing.cost,
            None => true,
        };
        if improved {
            self.plans.insert(new_set, new_plan);
        }
        new_set
    }

    /// 예산을 소모하며 쌍을 방출 — 예산이 바닥나면 false를 돌려
    /// 열거 전체를 조기 종료시킵니다
    fn try_emit_pair(&mut self, left: SetId, right: SetId, filters: &[usize]) -> bool {
        self.pairs += 1;
        if self.pairs >= self.pair_budget {
            return false;
        }
        self.emit_pair(left, right, filters);
        true
    }

    fn emit_csg(&mut self, node: SetId) -> bool {
        // exclude everything inside the subgraph and every relation below
        // its minimum member
        let node_set = self.set_manager.set(node);
        let mut exclusion: HashSet<usize> = HashSet::new();
        if let Some(min) = node_set.min_relation() {
            exclusion.extend(0..min);
        }
        exclusion.extend(node_set.relations.iter().copied());

        let neighbors = self
            .query_graph
            .get_neighbors(&self.set_manager, node, &exclusion);
        for neighbor in neighbors {
            let neighbor_set = self.set_manager.get_relation(neighbor);
            // get_neighbors only reports the minimum element of each target,
            // so the connection has to be re-checked before emitting
            if let Some(filters) =
                self.query_graph
                    .get_connection(&self.set_manager, node, neighbor_set)
                && !self.try_emit_pair(node, neighbor_set, &filters)
            {
                return false;
            }
            if !self.enumerate_cmp_recursive(node, neighbor_set, &exclusion) {
                return false;
            }
        }
        true
    }

    /// 보완측(complement)을 이웃 하나씩 넓혀 가며 left와의 쌍을 방출
    fn enumerate_cmp_recursive(
        &mut self,
        left: SetId,
        right: SetId,
        exclusion: &HashSet<usize>,
    ) -> bool {
        let neighbors = self
            .query_graph
            .get_neighbors(&self.set_manager, right, exclusion);
        if neighbors.is_empty() {
            return true;
        }
        let mut union_sets = Vec::with_capacity(neighbors.len());
        for &neighbor in &neighbors {
            let neighbor_set = self.set_manager.get_relation(neighbor);
            let combined = self.set_manager.union(right, neighbor_set);
            if self.plans.contains_key(&combined)
                && let Some(filters) =
                    self.query_graph
                        .get_connection(&self.set_manager, left, combined)
                && !self.try_emit_pair(left, combined, &filters)
            {
                return false;
            }
            union_sets.push(combined);
        }
        for (i, &neighbor) in neighbors.iter().enumerate() {
            let mut next_exclusion = exclusion.clone();
            next_exclusion.insert(neighbor);
            if !self.enumerate_cmp_recursive(left, union_sets[i], &next_exclusion) {
                return false;
            }
        }
        true
    }

    /// 연결 부분그래프(csg)를 이웃 하나씩 넓혀 가며 emit_csg를 호출
    fn enumerate_csg_recursive(&mut self, node: SetId, exclusion: &HashSet<usize>) -> bool {
        let neighbors = self
            .query_graph
            .get_neighbors(&self.set_manager, node, exclusion);
        if neighbors.is_empty() {
            return true;
        }
        let mut union_sets = Vec::with_capacity(neighbors.len());
        for &neighbor in &neighbors {
            let neighbor_set = self.set_manager.get_relation(neighbor);
            let combined = self.set_manager.union(node, neighbor_set);
            if self.plans.contains_key(&combined) && !self.emit_csg(combined) {
                return false;
            }
            union_sets.push(combined);
        }
        for (i, &neighbor) in neighbors.iter().enumerate() {
            let mut next_exclusion = exclusion.clone();
            next_exclusion.insert(neighbor);
            if !self.enumerate_csg_recursive(union_sets[i], &next_exclusion) {
                return false;
            }
        }
        true
    }

    /// 정확한 DPccp 열거 — 예산 초과로 중단되면 false
    fn solve_join_order_exactly(&mut self) -> bool {
        // every relation is considered as a start node once, in descending
        // id order
        for i in (0..self.relations.len()).rev() {
            let start_node = self.set_manager.get_relation(i);
            if !self.emit_csg(start_node) {
                return false;
            }
            let exclusion: HashSet<usize> = (0..i).collect();
            if !self.enumerate_csg_recursive(start_node, &exclusion) {
                return false;
            }
        }
        true
    }

    /// Greedy Operator Ordering — 매 단계 가장 싼 연결 가능한 쌍을 합칩니다
    ///
    /// 모든 쌍 평가가 emit_pair를 거치므로 메모의 "지금까지 최선" 의미는
    /// 유지됩니다. 관계 수 r에 대해 전체 O(r³)입니다.
    fn solve_join_order_approximately(&mut self) {
        let mut fragments: Vec<SetId> = (0..self.relations.len())
            .map(|i| self.set_manager.get_relation(i))
            .collect();
        while fragments.len() > 1 {
            let mut best: Option<(usize, usize, u64)> = None;
            for i in 0..fragments.len() {
                for j in (i + 1)..fragments.len() {
                    let connection = self.query_graph.get_connection(
                        &self.set_manager,
                        fragments[i],
                        fragments[j],
                    );
                    if let Some(filters) = connection {
                        let joined = self.emit_pair(fragments[i], fragments[j], &filters);
                        let cost = self.plans[&joined].cost;
                        if best.is_none_or(|(_, _, best_cost)| cost < best_cost) {
                            best = Some((i, j, cost));
                        }
                    }
                }
            }
            let (best_left, best_right) = match best {
                Some((i, j, _)) => (i, j),
                None => {
                    // nothing connects: force a cross product between the two
                    // smallest fragments
                    let mut order: Vec<usize> = (0..fragments.len()).collect();
                    order.sort_by_key(|&i| (self.plans[&fragments[i]].cardinality, i));
                    let (i, j) = (order[0].min(order[1]), order[0].max(order[1]));
                    let (left, right) = (fragments[i], fragments[j]);
                    self.query_graph.create_edge(left, right, None);
                    self.query_graph.create_edge(right, left, None);
                    self.emit_pair(left, right, &[]);
                    (i, j)
                }
            };
            let combined = self
                .set_manager
                .union(fragments[best_left], fragments[best_right]);
            // remove the larger index first so the smaller one stays valid
            fragments.remove(best_right);
            fragments.remove(best_left);
            fragments.push(combined);
        }
    }

    /// 정확한 열거를 먼저 시도하고, 중단되면 그리디로 마무리
    pub(super) fn solve_join_order(&mut self) {
        if !self.solve_join_order_exactly() {
            tracing::debug!(
                pairs = self.pairs,
                budget = self.pair_budget,
                "join enumeration budget exhausted, falling back to greedy ordering"
            );
            self.solve_join_order_approximately();
        }
    }

    /// 모든 관계 쌍 사이에 크로스 프로덕트 엣지를 깔아 연결성을 강제
    pub(super) fn generate_cross_products(&mut self) {
        for i in 0..self.relations.len() {
            for j in 0..self.relations.len() {
                if i != j {
                    let left = self.set_manager.get_relation(i);
                    let right = self.set_manager.get_relation(j);
                    self.query_graph.create_edge(left, right, None);
                }
            }
        }
    }
}
