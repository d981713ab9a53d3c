//! 依赖图
//!
//! 实体之间的父/子边保存在实体自身上；这里提供在整张表上的遍历：
//! 祖先/后代闭包、重新绑定前的环检测、失效传播与规范顺序。

use crate::entity::{Entity, EntityId, HierarchyIndex};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

pub type EntityMap = BTreeMap<EntityId, Entity>;

/// `start` 中各实体及其全部祖先
pub fn ancestors_inclusive(
    entities: &EntityMap,
    start: impl IntoIterator<Item = EntityId>,
) -> BTreeSet<EntityId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<EntityId> = start.into_iter().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(entity) = entities.get(&id) {
            stack.extend(entity.parents.iter().copied());
        }
    }
    seen
}

/// 所有（传递）依赖 `id` 的实体，不含 `id` 本身
pub fn descendants(entities: &EntityMap, id: EntityId) -> BTreeSet<EntityId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<EntityId> = entities
        .get(&id)
        .map(|e| e.children.iter().copied().collect())
        .unwrap_or_default();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(entity) = entities.get(&current) {
            stack.extend(entity.children.iter().copied());
        }
    }
    seen
}

/// 以 `new_parents` 作为 `id` 的父实体是否会成环
///
/// 成环时返回途经的那个父实体。
pub fn find_cycle(
    entities: &EntityMap,
    id: EntityId,
    new_parents: &BTreeSet<EntityId>,
) -> Option<EntityId> {
    new_parents
        .iter()
        .copied()
        .find(|parent| ancestors_inclusive(entities, [*parent]).contains(&id))
}

/// 标记 `id` 及其所有后代为过期
///
/// 遇到已过期的后代即停止向下传播。返回新标记的实体数。
pub fn invalidate(entities: &mut EntityMap, id: EntityId) -> usize {
    let mut marked = 0;
    let mut stack = match entities.get_mut(&id) {
        Some(entity) => {
            if !entity.stale {
                entity.stale = true;
                marked += 1;
            }
            entity.children.iter().copied().collect::<Vec<_>>()
        }
        None => return 0,
    };
    while let Some(current) = stack.pop() {
        if let Some(entity) = entities.get_mut(&current) {
            if entity.stale {
                continue;
            }
            entity.stale = true;
            marked += 1;
            stack.extend(entity.children.iter().copied());
        }
    }
    marked
}

/// 规范顺序：按层级编号升序，但父实体总在子实体之前
pub fn canonical_order(entities: &EntityMap) -> Vec<EntityId> {
    let mut pending: BTreeMap<EntityId, usize> = entities
        .iter()
        .map(|(id, e)| {
            let count = e.parents.iter().filter(|p| entities.contains_key(p)).count();
            (*id, count)
        })
        .collect();

    let mut ready: BinaryHeap<Reverse<(HierarchyIndex, EntityId)>> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| Reverse((entities[id].hierarchy, *id)))
        .collect();

    let mut order = Vec::with_capacity(entities.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id);
        for child in &entities[&id].children {
            if let Some(count) = pending.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse((entities[child].hierarchy, *child)));
                }
            }
        }
    }

    if order.len() < entities.len() {
        // 只有在图被破坏（存在环）时才会发生
        tracing::warn!(
            "dependency graph has a cycle, {} entities left unordered",
            entities.len() - order.len()
        );
        let placed: BTreeSet<EntityId> = order.iter().copied().collect();
        let mut rest: Vec<&Entity> = entities.values().filter(|e| !placed.contains(&e.id)).collect();
        rest.sort_by_key(|e| e.hierarchy);
        order.extend(rest.into_iter().map(|e| e.id));
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Arg, Construction, Constructor};

    fn point(id: u64, major: u64) -> Entity {
        Entity::new(
            EntityId(id),
            format!("P{}", id),
            HierarchyIndex::new(major),
            Construction::new(Constructor::Point, vec![Arg::Number(0.0), Arg::Number(0.0)]),
        )
    }

    fn link(map: &mut EntityMap, parent: u64, child: u64) {
        map.get_mut(&EntityId(child)).unwrap().parents.insert(EntityId(parent));
        map.get_mut(&EntityId(parent)).unwrap().children.insert(EntityId(child));
    }

    /// 1 → 2 → 3，以及独立的 4
    fn chain() -> EntityMap {
        let mut map: EntityMap = (1..=4).map(|i| (EntityId(i), point(i, i))).collect();
        link(&mut map, 1, 2);
        link(&mut map, 2, 3);
        for e in map.values_mut() {
            e.stale = false;
        }
        map
    }

    #[test]
    fn test_closures() {
        let map = chain();
        assert_eq!(
            ancestors_inclusive(&map, [EntityId(3)]),
            BTreeSet::from([EntityId(1), EntityId(2), EntityId(3)])
        );
        assert_eq!(descendants(&map, EntityId(1)), BTreeSet::from([EntityId(2), EntityId(3)]));
        assert!(descendants(&map, EntityId(4)).is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let map = chain();
        assert_eq!(find_cycle(&map, EntityId(1), &BTreeSet::from([EntityId(3)])), Some(EntityId(3)));
        assert_eq!(find_cycle(&map, EntityId(1), &BTreeSet::from([EntityId(1)])), Some(EntityId(1)));
        assert_eq!(find_cycle(&map, EntityId(3), &BTreeSet::from([EntityId(4)])), None);
    }

    #[test]
    fn test_invalidate_stops_at_stale() {
        let mut map = chain();
        assert_eq!(invalidate(&mut map, EntityId(1)), 3);
        assert_eq!(invalidate(&mut map, EntityId(1)), 0);
        assert!(!map[&EntityId(4)].stale);
    }

    #[test]
    fn test_canonical_order_respects_parents() {
        let mut map = chain();
        // 旧实体 1 重新绑定为依赖新实体 4
        link(&mut map, 4, 1);
        assert_eq!(
            canonical_order(&map),
            vec![EntityId(4), EntityId(1), EntityId(2), EntityId(3)]
        );
    }
}
