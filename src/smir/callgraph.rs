//! Call-graph closure

use super::ty::TypeId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Static call edges keyed by the caller's function type
pub type CallEdges = BTreeMap<TypeId, BTreeSet<TypeId>>;

/// Every node reachable from `start` (start nodes included).
///
/// Nodes absent from `edges` are sinks.
pub fn closure(start: impl IntoIterator<Item = TypeId>, edges: &CallEdges) -> BTreeSet<TypeId> {
    let mut reached = BTreeSet::new();
    let mut work: VecDeque<TypeId> = VecDeque::new();

    for ty in start {
        if reached.insert(ty) {
            work.push_back(ty);
        }
    }

    while let Some(ty) = work.pop_front() {
        let Some(callees) = edges.get(&ty) else {
            continue;
        };
        for callee in callees {
            if reached.insert(*callee) {
                work.push_back(*callee);
            }
        }
    }

    reached
}

/// A witness path from any start node to `to`, if one exists
pub fn path_to(start: &BTreeSet<TypeId>, to: TypeId, edges: &CallEdges) -> Option<Vec<TypeId>> {
    let mut parent: BTreeMap<TypeId, Option<TypeId>> = BTreeMap::new();
    let mut work: VecDeque<TypeId> = VecDeque::new();
    for ty in start {
        parent.insert(*ty, None);
        work.push_back(*ty);
    }
    while let Some(ty) = work.pop_front() {
        if ty == to {
            let mut path = vec![ty];
            let mut cur = ty;
            while let Some(Some(prev)) = parent.get(&cur) {
                path.push(*prev);
                cur = *prev;
            }
            path.reverse();
            return Some(path);
        }
        for callee in edges.get(&ty).into_iter().flatten() {
            if !parent.contains_key(callee) {
                parent.insert(*callee, Some(ty));
                work.push_back(*callee);
            }
        }
    }
    None
}
