use proptest::prelude::*;
use studio_core::WorkItem;

/// Strategy for generating work item identifiers
pub fn work_item_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Strategy for generating acyclic edge sets over `n` nodes; edges always
/// point from a lower to a higher index
pub fn acyclic_edges_strategy(n: usize) -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..n, 0..n), 0..n * 2).prop_map(|pairs| {
        let mut edges: Vec<(usize, usize)> = pairs
            .into_iter()
            .filter(|(a, b)| a != b)
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    })
}

/// Strategy for generating a DAG of work items `n0..nN`; item `b` depends on
/// item `a` for every edge `(a, b)`
pub fn work_item_dag_strategy() -> impl Strategy<Value = Vec<WorkItem>> {
    (2usize..12).prop_flat_map(|n| {
        acyclic_edges_strategy(n).prop_map(move |edges| {
            (0..n)
                .map(|i| {
                    let deps = edges
                        .iter()
                        .filter(|(_, to)| *to == i)
                        .map(|(from, _)| format!("n{from}"));
                    WorkItem::new(format!("n{i}"), format!("node {i}")).with_dependencies(deps)
                })
                .collect()
        })
    })
}

/// Strategy for generating reservation sequences: (work item index, cpu, memory)
pub fn reservation_requests_strategy() -> impl Strategy<Value = Vec<(usize, u64, u64)>> {
    prop::collection::vec((0usize..8, 0u64..60, 0u64..120), 1..24)
}
