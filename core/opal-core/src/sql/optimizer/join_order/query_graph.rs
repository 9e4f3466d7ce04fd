//! 쿼리 그래프 — RelationSet 간의 방향 하이퍼엣지 인덱스
//!
//! 엣지는 `from` 집합을 키로 저장되며, 호출자는 항상 양방향으로 엣지를
//! 추가합니다. 이웃 조회는 대상 집합의 최소 관계 id만 돌려주는데, 이것이
//! csg-cmp 쌍을 정확히 한 번씩만 방문하게 하는 DPccp의 장치입니다 —
//! 호출자는 id를 다시 집합으로 확장한 뒤 `get_connection`으로 연결성을
//! 재확인해야 합니다.

use std::collections::{BTreeSet, HashSet};

use ahash::AHashMap;

use super::relation_set::{SetId, SetManager};

/// 하이퍼엣지 — `filter`가 None이면 크로스 프로덕트 엣지
#[derive(Debug, Clone)]
struct QueryEdge {
    neighbor: SetId,
    filter: Option<usize>,
}

/// 조인 순서 열거가 사용하는 쿼리 그래프
#[derive(Debug, Default)]
pub struct QueryGraph {
    edges: AHashMap<SetId, Vec<QueryEdge>>,
}

impl QueryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `from → to` 하이퍼엣지 추가 — `filter`는 전역 필터 목록의 인덱스
    pub fn create_edge(&mut self, from: SetId, to: SetId, filter: Option<usize>) {
        self.edges
            .entry(from)
            .or_default()
            .push(QueryEdge { neighbor: to, filter });
    }

    /// `node`의 이웃 — 어떤 엣지의 `from ⊆ node`이고 대상 집합이 제외
    /// 집합(및 `node` 자신)과 겹치지 않을 때, 그 대상 집합의 최소 관계
    /// id를 모아 오름차순으로 돌려줍니다.
    pub fn get_neighbors(
        &self,
        manager: &SetManager,
        node: SetId,
        exclusion: &HashSet<usize>,
    ) -> Vec<usize> {
        let node_set = manager.set(node);
        let mut result: BTreeSet<usize> = BTreeSet::new();
        for (&from, edges) in &self.edges {
            if !manager.is_subset(node, from) {
                continue;
            }
            for edge in edges {
                let target = manager.set(edge.neighbor);
                if target
                    .relations
                    .iter()
                    .any(|r| exclusion.contains(r) || node_set.contains(*r))
                {
                    continue;
                }
                if let Some(min) = target.min_relation() {
                    result.insert(min);
                }
            }
        }
        result.into_iter().collect()
    }

    /// `a`와 `b`를 잇는 연결 — `from ⊆ a`, `to ⊆ b`인 모든 엣지의 필터
    /// 인덱스를 모읍니다 (양방향이 저장되므로 대칭 케이스도 여기서
    /// 잡힙니다).
    ///
    /// `Some(vec![])`은 크로스 프로덕트 엣지로만 연결됨을 뜻하고, `None`은
    /// 연결되지 않음을 뜻합니다.
    pub fn get_connection(
        &self,
        manager: &SetManager,
        a: SetId,
        b: SetId,
    ) -> Option<Vec<usize>> {
        let mut connected = false;
        let mut filters: Vec<usize> = Vec::new();
        for (&from, edges) in &self.edges {
            if !manager.is_subset(a, from) {
                continue;
            }
            for edge in edges {
                if manager.is_subset(b, edge.neighbor) {
                    connected = true;
                    if let Some(filter) = edge.filter {
                        filters.push(filter);
                    }
                }
            }
        }
        if !connected {
            return None;
        }
        filters.sort_unstable();
        filters.dedup();
        Some(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn singleton(manager: &mut SetManager, relation: usize) -> SetId {
        manager.get_relation(relation)
    }

    #[test]
    fn test_neighbors_exclusion() {
        let mut manager = SetManager::new();
        let a = singleton(&mut manager, 0);
        let b = singleton(&mut manager, 1);
        let c = singleton(&mut manager, 2);
        let mut graph = QueryGraph::new();
        graph.create_edge(a, b, Some(0));
        graph.create_edge(b, a, Some(0));
        graph.create_edge(a, c, Some(1));
        graph.create_edge(c, a, Some(1));

        let no_exclusion = HashSet::from([0]);
        assert_eq!(graph.get_neighbors(&manager, a, &no_exclusion), vec![1, 2]);

        let exclude_b = HashSet::from([0, 1]);
        assert_eq!(graph.get_neighbors(&manager, a, &exclude_b), vec![2]);
    }

    #[test]
    fn test_neighbors_return_minimum_of_target() {
        let mut manager = SetManager::new();
        let a = singleton(&mut manager, 0);
        let bc = manager.get_relation_set([1, 2]);
        let mut graph = QueryGraph::new();
        graph.create_edge(a, bc, Some(0));
        graph.create_edge(bc, a, Some(0));

        let exclusion = HashSet::from([0]);
        assert_eq!(graph.get_neighbors(&manager, a, &exclusion), vec![1]);
    }

    #[test]
    fn test_neighbors_via_subset_key() {
        // an edge registered on {0} must be visible to the composite {0, 1}
        let mut manager = SetManager::new();
        let a = singleton(&mut manager, 0);
        let c = singleton(&mut manager, 2);
        let ab = manager.get_relation_set([0, 1]);
        let mut graph = QueryGraph::new();
        graph.create_edge(a, c, Some(0));
        graph.create_edge(c, a, Some(0));

        let exclusion = HashSet::from([0, 1]);
        assert_eq!(graph.get_neighbors(&manager, ab, &exclusion), vec![2]);
    }

    #[test]
    fn test_connection_collects_all_filters() {
        let mut manager = SetManager::new();
        let a = singleton(&mut manager, 0);
        let b = singleton(&mut manager, 1);
        let mut graph = QueryGraph::new();
        graph.create_edge(a, b, Some(3));
        graph.create_edge(b, a, Some(3));
        graph.create_edge(a, b, Some(1));
        graph.create_edge(b, a, Some(1));

        assert_eq!(graph.get_connection(&manager, a, b), Some(vec![1, 3]));
        // symmetric lookup sees the reverse edges
        assert_eq!(graph.get_connection(&manager, b, a), Some(vec![1, 3]));
    }

    #[test]
    fn test_connection_cross_product_edge() {
        let mut manager = SetManager::new();
        let a = singleton(&mut manager, 0);
        let b = singleton(&mut manager, 1);
        let c = singleton(&mut manager, 2);
        let mut graph = QueryGraph::new();
        graph.create_edge(a, b, None);
        graph.create_edge(b, a, None);

        assert_eq!(graph.get_connection(&manager, a, b), Some(vec![]));
        assert_eq!(graph.get_connection(&manager, a, c), None);
    }
}
