//! 实体注册表
//!
//! 名称 → 实体的存储，负责：
//! - 命名规则与自动命名
//! - 把原始值强制转换为构造定义
//! - 原地更新（保留实体身份和依赖者）与环检测
//! - 子部件工厂缓存 `(宿主, 序号)`
//! - 批量删除的顺序与依赖检查
//! - 过期实体的重新计算
//!
//! 每个修改操作结束时注册表中都没有过期实体。

use crate::constructors::{self, NameResolver, ParamKind};
use crate::definition::{Arg, Category, Construction, Constructor, ShapeSource};
use crate::entity::{style_keys, Entity, EntityId, HierarchyIndex, Style, StyleValue};
use crate::error::{NameIssue, SheetError, SheetResult};
use crate::expr::builtins::{constant, Builtin};
use crate::expr::formula::{Formula, FormulaContext};
use crate::expr::value::Value;
use crate::geometry::Shape;
use crate::graph::{self, EntityMap};
use crate::naming::{self, NameLookup, WINDOW_NAMES};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};

/// 匿名占位名称，同时指代最近创建的实体
pub const ANONYMOUS: &str = "_";

/// 可在实体上调用的方法：(名称, 规范名称)
const METHODS: &[(&str, &str)] = &[
    ("rename", "rename"),
    ("renommer", "rename"),
    ("style", "style"),
    ("hide", "hide"),
    ("cacher", "hide"),
    ("show", "show"),
    ("montrer", "show"),
    ("delete", "delete"),
    ("supprimer", "delete"),
    ("redefine", "redefine"),
    ("redefinir", "redefine"),
];

/// 实体注册表
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: EntityMap,
    names: FxHashMap<String, EntityId>,
    next_id: u64,
    next_major: u64,
    /// 子部件工厂缓存
    parts: FxHashMap<(EntityId, usize), EntityId>,
    /// 显式保护的名称
    protected: FxHashSet<String>,
    /// 容错模式（载入旧文档时使用）
    tolerant: bool,
    /// 容错模式下被改名的名称：旧名 → 新名
    renamed: FxHashMap<String, String>,
    style_defaults: BTreeMap<Category, Style>,
    /// 自上次 `take_changed` 以来结构是否变化
    changed: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_style_defaults(style_defaults: BTreeMap<Category, Style>) -> Self {
        Self {
            style_defaults,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // ------------------------------------------------------------------
    // 查找
    // ------------------------------------------------------------------

    /// 解析名称：修饰符转写、`_`、容错改名表
    pub fn resolve(&self, name: &str) -> Option<EntityId> {
        if name == ANONYMOUS {
            return self.last_created();
        }
        let name = naming::convert_decorations(name);
        if let Some(id) = self.renamed.get(&name).and_then(|n| self.names.get(n)) {
            return Some(*id);
        }
        self.names.get(&name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn get(&self, name: &str) -> SheetResult<&Entity> {
        self.resolve(name)
            .and_then(|id| self.entities.get(&id))
            .ok_or_else(|| SheetError::NotFound(name.to_string()))
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    fn entity_or_err(&self, id: EntityId) -> SheetResult<&Entity> {
        self.entities
            .get(&id)
            .ok_or_else(|| SheetError::NotFound(format!("#{}", id.0)))
    }

    /// 最近创建的实体（层级编号最大者）
    pub fn last_created(&self) -> Option<EntityId> {
        self.entities.values().max_by_key(|e| e.hierarchy).map(|e| e.id)
    }

    /// 按规范顺序排列的实体
    pub fn ordered(&self) -> Vec<&Entity> {
        graph::canonical_order(&self.entities)
            .into_iter()
            .filter_map(|id| self.entities.get(&id))
            .collect()
    }

    /// 实体样式叠加在类别默认样式之上
    pub fn effective_style(&self, id: EntityId) -> Style {
        let Some(entity) = self.entities.get(&id) else {
            return Style::new();
        };
        let mut style = self
            .style_defaults
            .get(&entity.category())
            .cloned()
            .unwrap_or_default();
        style.extend(entity.style.iter().map(|(k, v)| (k.clone(), v.clone())));
        style
    }

    /// 取出并复位“结构已变化”标记
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    // ------------------------------------------------------------------
    // 模式与保护
    // ------------------------------------------------------------------

    /// 进入/退出容错模式；退出时清空临时改名表
    pub fn set_tolerant(&mut self, tolerant: bool) {
        self.tolerant = tolerant;
        if !tolerant {
            self.renamed.clear();
        }
    }

    pub fn is_tolerant(&self) -> bool {
        self.tolerant
    }

    pub fn protect(&mut self, name: impl Into<String>) {
        self.protected.insert(name.into());
    }

    pub fn unprotect(&mut self, name: &str) {
        self.protected.remove(name);
    }

    /// 视窗伪名称、常量和内建函数天然受保护
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
            || WINDOW_NAMES.contains(&name)
            || constant(name).is_some()
            || Builtin::from_name(name).is_some()
    }

    // ------------------------------------------------------------------
    // 赋值
    // ------------------------------------------------------------------

    /// `name = value`
    ///
    /// 已有名称尝试原地更新；否则（非容错模式下）报名称已占用。
    pub fn set(&mut self, name: &str, value: Value) -> SheetResult<EntityId> {
        let name = if name.is_empty() {
            ANONYMOUS.to_string()
        } else {
            naming::convert_decorations(name)
        };

        if let Value::Lazy(items) = value {
            if name != ANONYMOUS {
                return Err(SheetError::type_error(format!(
                    "a sequence can only be assigned to '{}'",
                    ANONYMOUS
                )));
            }
            let mut last = None;
            for item in items {
                last = Some(self.set(ANONYMOUS, item)?);
            }
            return last.ok_or_else(|| SheetError::type_error("empty sequence"));
        }

        if let Value::Entity(id) = value {
            if self.names.get(&name) == Some(&id) {
                return Ok(id);
            }
        }

        let construction = self.coerce(&name, value)?;
        self.insert(&name, construction)
    }

    /// 按结构把值转换为构造定义
    fn coerce(&self, name: &str, value: Value) -> SheetResult<Construction> {
        let number = |n: f64| Construction::new(Constructor::Variable, vec![Arg::Number(n)]);
        match value {
            Value::New(construction) => Ok(*construction),
            Value::Number(n) => Ok(number(n)),
            Value::Bool(b) => Ok(number(if b { 1.0 } else { 0.0 })),
            Value::Text(s) => constructors::build(Constructor::Variable, vec![Value::Text(s)], vec![], self),
            Value::Complex(re, im) => Ok(Construction::new(
                Constructor::Point,
                vec![Arg::Number(re), Arg::Number(im)],
            )),
            Value::Vector(x, y) => Ok(Construction::new(
                Constructor::Vector,
                vec![Arg::Number(x), Arg::Number(y)],
            )),
            Value::Constructor(constructor) => constructors::build(constructor, vec![], vec![], self),
            Value::Entity(id) => self.copy_definition(id),
            Value::Tuple(items) | Value::List(items) => {
                if matches!(items.len(), 1 | 3) && matches!(items.first(), Some(Value::Text(_))) {
                    return constructors::build(Constructor::Text, items, vec![], self);
                }
                if items.len() == 2 {
                    let constructor = if prefers_vector(name) {
                        Constructor::Vector
                    } else {
                        Constructor::Point
                    };
                    return constructors::build(constructor, items, vec![], self);
                }
                Err(SheetError::type_error(format!(
                    "cannot build an entity from a sequence of {} items",
                    items.len()
                )))
            }
            other => Err(SheetError::type_error(format!(
                "cannot build an entity from {}",
                other.type_name()
            ))),
        }
    }

    /// 已命名实体的副本；子部件复制为自由点
    fn copy_definition(&self, id: EntityId) -> SheetResult<Construction> {
        let entity = self.entity_or_err(id)?;
        if entity.definition.constructor == Constructor::Vertex {
            let p = entity
                .value
                .as_ref()
                .and_then(|s| s.as_point())
                .ok_or_else(|| SheetError::eval(format!("'{}' does not exist", entity.name)))?;
            return Ok(Construction::new(
                Constructor::Point,
                vec![Arg::Number(p.x), Arg::Number(p.y)],
            ));
        }
        Ok(entity.definition.clone())
    }

    /// 登记构造定义
    pub fn insert(&mut self, name: &str, construction: Construction) -> SheetResult<EntityId> {
        if construction.constructor == Constructor::Vertex {
            if let Some(part) = self.cached_part(&construction) {
                return self.adopt_part(part, name, construction.style);
            }
        }

        if name != ANONYMOUS {
            if let Some(&existing) = self.names.get(name) {
                let entity = &self.entities[&existing];
                if !entity.owns_parts()
                    && !entity.is_part()
                    && entity.definition.compatible_with(&construction)
                {
                    self.update_in_place(existing, construction)?;
                    return Ok(existing);
                }
                if self.tolerant {
                    let fresh = naming::generate_name(name, construction.category(), self)?;
                    tracing::warn!("'{}' is already used, renamed to '{}'", name, fresh);
                    self.renamed.insert(name.to_string(), fresh.clone());
                    return self.create(Some(fresh), construction);
                }
                return Err(SheetError::name(name, NameIssue::AlreadyUsed));
            }
        }

        let explicit = if name == ANONYMOUS {
            None
        } else {
            Some(naming::validate(name, construction.category(), self)?)
        };
        self.create(explicit, construction)
    }

    /// 创建新实体；`name` 为 `None` 时自动命名
    fn create(&mut self, name: Option<String>, mut construction: Construction) -> SheetResult<EntityId> {
        let nested = self.register_nested(&mut construction)?;
        let result = self.commit_new(name, construction);
        if result.is_err() {
            self.rollback(&nested);
        }
        result
    }

    /// 先把嵌套构造登记为匿名实体
    fn register_nested(&mut self, construction: &mut Construction) -> SheetResult<Vec<EntityId>> {
        let mut created = Vec::new();
        for arg in construction.args.iter_mut() {
            if let Arg::New(_) = arg {
                let Arg::New(inner) = std::mem::replace(arg, Arg::Number(0.0)) else {
                    continue;
                };
                match self.insert(ANONYMOUS, *inner) {
                    Ok(id) => {
                        *arg = Arg::Entity(id);
                        created.push(id);
                    }
                    Err(err) => {
                        self.rollback(&created);
                        return Err(err);
                    }
                }
            }
        }
        Ok(created)
    }

    fn rollback(&mut self, created: &[EntityId]) {
        let batch = self.expand_batch(created.iter().copied().collect());
        for id in self.descending(&batch) {
            self.remove_entity(id);
        }
    }

    /// 新定义读取的父实体必须存在且有值
    fn check_parents(&self, parents: &BTreeSet<EntityId>) -> SheetResult<()> {
        for id in parents {
            let parent = self.entity_or_err(*id)?;
            if !parent.exists() {
                return Err(SheetError::eval(format!("'{}' does not exist", parent.name)));
            }
        }
        Ok(())
    }

    /// 计算新定义的值：类型错误拒绝，几何退化则以“不存在”状态接受
    fn evaluate_definition(&self, construction: &Construction) -> SheetResult<Result<Shape, String>> {
        match construction.compute(self) {
            Ok(shape) => Ok(Ok(shape)),
            Err(SheetError::Evaluation(message)) => Ok(Err(message)),
            Err(err) => Err(err),
        }
    }

    fn commit_new(&mut self, name: Option<String>, mut construction: Construction) -> SheetResult<EntityId> {
        let category = construction.category();
        let parents = construction.parents();
        self.check_parents(&parents)?;
        let value = self.evaluate_definition(&construction)?;

        let auto = name.is_none();
        let name = match name {
            Some(name) => name,
            None => naming::generate_name(construction.constructor.name_prefix(), category, self)?,
        };

        self.next_id += 1;
        self.next_major += 1;
        let id = EntityId::new(self.next_id);
        let style = std::mem::take(&mut construction.style);
        let mut entity = Entity::new(id, name.clone(), HierarchyIndex::new(self.next_major), construction);
        if auto {
            entity.set_style(style_keys::SHOW_LABEL, StyleValue::Bool(false));
        }
        if name.starts_with('_') {
            entity.set_style(style_keys::VISIBLE, StyleValue::Bool(false));
        }
        entity.style.extend(style);
        Self::store_value(&mut entity, value);

        for parent in &parents {
            if let Some(p) = self.entities.get_mut(parent) {
                p.children.insert(id);
            }
        }
        self.names.insert(name.clone(), id);
        self.entities.insert(id, entity);
        self.changed = true;
        tracing::debug!("created '{}' ({})", name, category);

        if let Err(err) = self.create_parts(id) {
            self.rollback(&[id]);
            return Err(err);
        }
        Ok(id)
    }

    fn store_value(entity: &mut Entity, value: Result<Shape, String>) {
        entity.stale = false;
        match value {
            Ok(shape) => {
                entity.value = Some(shape);
                entity.last_error = None;
            }
            Err(message) => {
                tracing::warn!("'{}' does not exist: {}", entity.name, message);
                entity.value = None;
                entity.last_error = Some(message);
            }
        }
    }

    // ------------------------------------------------------------------
    // 子部件
    // ------------------------------------------------------------------

    /// 正多边形的顶点子部件（第一个顶点就是定义用的点，不另建）
    fn create_parts(&mut self, owner: EntityId) -> SheetResult<()> {
        let Some(sides) = self.entities.get(&owner).and_then(|e| e.definition.regular_sides()) else {
            return Ok(());
        };
        let hierarchy = self.entities[&owner].hierarchy;
        for n in 1..sides {
            let construction = Construction::new(
                Constructor::Vertex,
                vec![Arg::Entity(owner), Arg::Number(n as f64)],
            );
            let name = naming::generate_name(Constructor::Vertex.name_prefix(), Category::Point, self)?;
            let value = self.evaluate_definition(&construction)?;

            self.next_id += 1;
            let id = EntityId::new(self.next_id);
            let mut part = Entity::new(id, name.clone(), hierarchy.child(n - 1), construction);
            part.owner = Some((owner, n));
            part.set_style(style_keys::SHOW_LABEL, StyleValue::Bool(false));
            Self::store_value(&mut part, value);

            if let Some(o) = self.entities.get_mut(&owner) {
                o.children.insert(id);
                o.parts.push(id);
            }
            self.names.insert(name, id);
            self.parts.insert((owner, n), id);
            self.entities.insert(id, part);
        }
        Ok(())
    }

    fn cached_part(&self, construction: &Construction) -> Option<EntityId> {
        match construction.args.as_slice() {
            [Arg::Entity(owner), Arg::Number(n)] if *n >= 0.0 && n.fract() == 0.0 => {
                self.parts.get(&(*owner, *n as usize)).copied()
            }
            _ => None,
        }
    }

    /// 对已有子部件的赋值：改名并合并样式
    fn adopt_part(&mut self, part: EntityId, name: &str, style: Style) -> SheetResult<EntityId> {
        if name != ANONYMOUS {
            match self.names.get(name) {
                Some(&id) if id == part => {}
                Some(_) => return Err(SheetError::name(name, NameIssue::AlreadyUsed)),
                None => self.rename(part, name)?,
            }
        }
        if let Some(entity) = self.entities.get_mut(&part) {
            entity.style.extend(style);
        }
        self.changed = true;
        Ok(part)
    }

    // ------------------------------------------------------------------
    // 原地更新
    // ------------------------------------------------------------------

    /// 重新定义实体（保留身份与依赖者）；类别必须不变
    pub fn redefine(&mut self, id: EntityId, construction: Construction) -> SheetResult<()> {
        let entity = self.entity_or_err(id)?;
        if entity.category() != construction.category() {
            return Err(SheetError::type_error(format!(
                "'{}' is a {}, cannot redefine it as a {}",
                entity.name,
                entity.category(),
                construction.category()
            )));
        }
        if entity.owns_parts()
            || entity.is_part()
            || matches!(
                construction.constructor,
                Constructor::Vertex | Constructor::RegularPolygon
            )
        {
            return Err(SheetError::type_error(format!("'{}' cannot be redefined", entity.name)));
        }
        self.update_in_place(id, construction)
    }

    fn update_in_place(&mut self, id: EntityId, mut construction: Construction) -> SheetResult<()> {
        let nested = self.register_nested(&mut construction)?;
        let result = self.rebind(id, construction);
        if result.is_err() {
            self.rollback(&nested);
        }
        result
    }

    /// 替换定义：先做环检测与校验，全部通过后才提交
    fn rebind(&mut self, id: EntityId, mut construction: Construction) -> SheetResult<()> {
        let parents = construction.parents();
        if let Some(via) = graph::find_cycle(&self.entities, id, &parents) {
            return Err(SheetError::CircularDependency {
                name: self.name_of(id),
                via: self.name_of(via),
            });
        }
        self.check_parents(&parents)?;
        let value = self.evaluate_definition(&construction)?;

        let style = std::mem::take(&mut construction.style);
        let old_parents = self.entities[&id].parents.clone();
        for removed in old_parents.difference(&parents) {
            if let Some(p) = self.entities.get_mut(removed) {
                p.children.remove(&id);
            }
        }
        for added in parents.difference(&old_parents) {
            if let Some(p) = self.entities.get_mut(added) {
                p.children.insert(id);
            }
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.definition = construction;
            entity.parents = parents;
            entity.style.extend(style);
        }

        let marked = graph::invalidate(&mut self.entities, id);
        // 自身的值已经算好，只需重算依赖者
        if let Some(entity) = self.entities.get_mut(&id) {
            Self::store_value(entity, value);
        }
        let recomputed = self.recompute_stale();
        tracing::debug!(
            "redefined '{}': {} marked stale, {} recomputed",
            self.name_of(id),
            marked,
            recomputed
        );
        self.changed = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // 重命名、样式
    // ------------------------------------------------------------------

    /// 改名；依赖者通过 `EntityId` 引用，不受影响
    pub fn rename(&mut self, id: EntityId, new_name: &str) -> SheetResult<()> {
        let entity = self.entity_or_err(id)?;
        let old = entity.name.clone();
        let category = entity.category();
        let new_name = naming::convert_decorations(new_name);
        if new_name == old {
            return Ok(());
        }
        if self.names.contains_key(&new_name) {
            return Err(SheetError::name(new_name, NameIssue::AlreadyUsed));
        }
        let new_name = naming::validate(&new_name, category, self)?;

        self.names.remove(&old);
        self.names.insert(new_name.clone(), id);
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.name = new_name.clone();
        }
        // 函数公式的文本含有名称
        graph::invalidate(&mut self.entities, id);
        self.recompute_stale();
        self.changed = true;
        tracing::info!("renamed '{}' to '{}'", old, new_name);
        Ok(())
    }

    pub fn set_style(&mut self, id: EntityId, style: Style) -> SheetResult<()> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or_else(|| SheetError::NotFound(format!("#{}", id.0)))?;
        for (key, value) in style {
            entity.style.insert(style_keys::canonical(&key).to_string(), value);
        }
        self.changed = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // 删除
    // ------------------------------------------------------------------

    /// 批量删除；所有依赖者都必须在同一批中
    pub fn delete(&mut self, names: &[String]) -> SheetResult<Vec<String>> {
        let mut batch = BTreeSet::new();
        for name in names {
            let converted = naming::convert_decorations(name);
            if self.is_protected(&converted) {
                return Err(SheetError::Protected(converted));
            }
            let id = self
                .resolve(&converted)
                .ok_or_else(|| SheetError::NotFound(converted.clone()))?;
            batch.insert(id);
        }
        self.delete_ids(batch)
    }

    pub fn delete_ids(&mut self, ids: BTreeSet<EntityId>) -> SheetResult<Vec<String>> {
        let batch = self.expand_batch(ids);
        for id in &batch {
            let outside: BTreeSet<String> = graph::descendants(&self.entities, *id)
                .into_iter()
                .filter(|d| !batch.contains(d))
                .map(|d| self.name_of(d))
                .collect();
            if !outside.is_empty() {
                return Err(SheetError::DependentsRemain {
                    name: self.name_of(*id),
                    dependents: outside.into_iter().collect(),
                });
            }
        }

        let mut deleted = Vec::with_capacity(batch.len());
        for id in self.descending(&batch) {
            if let Some(entity) = self.remove_entity(id) {
                deleted.push(entity.name);
            }
        }
        tracing::debug!("deleted {}", deleted.join(", "));
        Ok(deleted)
    }

    /// 删除子部件即删除其宿主；删除宿主连同全部子部件
    fn expand_batch(&self, mut batch: BTreeSet<EntityId>) -> BTreeSet<EntityId> {
        loop {
            let mut extra = Vec::new();
            for id in &batch {
                if let Some(entity) = self.entities.get(id) {
                    if let Some((owner, _)) = entity.owner {
                        extra.push(owner);
                    }
                    extra.extend(entity.parts.iter().copied());
                }
            }
            let before = batch.len();
            batch.extend(extra);
            if batch.len() == before {
                return batch;
            }
        }
    }

    /// 按层级编号降序
    fn descending(&self, batch: &BTreeSet<EntityId>) -> Vec<EntityId> {
        let mut ordered: Vec<&Entity> = batch.iter().filter_map(|id| self.entities.get(id)).collect();
        ordered.sort_by(|a, b| b.hierarchy.cmp(&a.hierarchy));
        ordered.into_iter().map(|e| e.id).collect()
    }

    fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        if self.names.get(&entity.name) == Some(&id) {
            self.names.remove(&entity.name);
        }
        for parent in &entity.parents {
            if let Some(p) = self.entities.get_mut(parent) {
                p.children.remove(&id);
            }
        }
        for child in &entity.children {
            if let Some(c) = self.entities.get_mut(child) {
                c.parents.remove(&id);
            }
        }
        if let Some((owner, n)) = entity.owner {
            self.parts.remove(&(owner, n));
            if let Some(o) = self.entities.get_mut(&owner) {
                o.parts.retain(|p| *p != id);
            }
        }
        self.parts.retain(|(owner, _), _| *owner != id);
        self.changed = true;
        Some(entity)
    }

    /// 删除无用的隐藏实体：隐藏且没有可见实体依赖它
    pub fn cleanup(&mut self) -> Vec<String> {
        let hidden: BTreeSet<EntityId> = self
            .entities
            .values()
            .filter(|e| !e.is_visible() && !self.protected.contains(&e.name))
            .map(|e| e.id)
            .collect();
        let useless: BTreeSet<EntityId> = hidden
            .iter()
            .copied()
            .filter(|id| graph::descendants(&self.entities, *id).is_subset(&hidden))
            .filter(|id| match self.entities[id].owner {
                Some((owner, _)) => hidden.contains(&owner),
                None => true,
            })
            .collect();
        if useless.is_empty() {
            return Vec::new();
        }
        match self.delete_ids(useless) {
            Ok(deleted) => deleted,
            Err(err) => {
                tracing::warn!("cleanup skipped: {}", err);
                Vec::new()
            }
        }
    }

    /// 清空（计数器复位，保护名单保留）
    pub fn clear(&mut self) {
        self.entities.clear();
        self.names.clear();
        self.parts.clear();
        self.renamed.clear();
        self.next_id = 0;
        self.next_major = 0;
        self.changed = true;
    }

    // ------------------------------------------------------------------
    // 重新计算
    // ------------------------------------------------------------------

    /// 标记实体及其后代过期
    pub fn invalidate(&mut self, id: EntityId) -> usize {
        graph::invalidate(&mut self.entities, id)
    }

    /// 按拓扑顺序重新计算所有过期实体；单个失败只令该实体“不存在”
    pub fn recompute_stale(&mut self) -> usize {
        let mut count = 0;
        for id in graph::canonical_order(&self.entities) {
            if !self.entities.get(&id).is_some_and(|e| e.stale) {
                continue;
            }
            let result = self.entities[&id].definition.compute(self);
            if let Some(entity) = self.entities.get_mut(&id) {
                Self::store_value(entity, result.map_err(|e| e.to_string()));
            }
            count += 1;
        }
        count
    }

    // ------------------------------------------------------------------
    // 属性
    // ------------------------------------------------------------------

    pub fn attribute(&self, id: EntityId, attr: &str) -> SheetResult<Value> {
        let entity = self.entity_or_err(id)?;
        match attr {
            "name" => return Ok(Value::Text(entity.name.clone())),
            "exists" => return Ok(Value::Bool(entity.exists())),
            _ => {}
        }
        if let Some((_, method)) = METHODS.iter().find(|(name, _)| *name == attr) {
            return Ok(Value::Method(id, method.to_string()));
        }
        if let Some(value) = entity.style.get(style_keys::canonical(attr)) {
            return Ok(style_to_value(value));
        }

        let shape = entity
            .value
            .as_ref()
            .ok_or_else(|| SheetError::eval(format!("'{}' does not exist", entity.name)))?;
        let pair = |x: f64, y: f64| Value::Tuple(vec![Value::Number(x), Value::Number(y)]);
        let value = match (shape, attr) {
            (Shape::Scalar(v), "value" | "val") => Value::Number(*v),
            (Shape::Point(p), "x") => Value::Number(p.x),
            (Shape::Point(p), "y") => Value::Number(p.y),
            (Shape::Point(p), "xy") => pair(p.x, p.y),
            (Shape::Vector(v), "x") => Value::Number(v.x),
            (Shape::Vector(v), "y") => Value::Number(v.y),
            (Shape::Vector(v), "xy") => pair(v.x, v.y),
            (Shape::Vector(v), "norm") => Value::Number(v.norm()),
            (Shape::Segment(s), "length" | "longueur") => Value::Number(s.length()),
            (Shape::Segment(s), "midpoint") => pair(s.midpoint().x, s.midpoint().y),
            (Shape::Line(l), "equation") => {
                let (a, b, c) = l.equation();
                Value::Tuple(vec![Value::Number(a), Value::Number(b), Value::Number(c)])
            }
            (Shape::Circle(c), "radius" | "rayon") => Value::Number(c.radius),
            (Shape::Circle(c), "center" | "centre") => pair(c.center.x, c.center.y),
            (Shape::Circle(c), "perimeter") => Value::Number(c.circumference()),
            (Shape::Circle(c), "area") => Value::Number(c.area()),
            (Shape::Text(t), "text" | "texte") => Value::Text(t.content.clone()),
            (Shape::Text(t), "x") => Value::Number(t.position.x),
            (Shape::Text(t), "y") => Value::Number(t.position.y),
            (Shape::Polygon(p), "perimeter") => Value::Number(p.perimeter()),
            (Shape::Polygon(p), "sides") => Value::Number(p.vertex_count() as f64),
            (Shape::Function(f) | Shape::Curve(f), "expression") => Value::Text(f.clone()),
            _ => {
                return Err(SheetError::type_error(format!(
                    "'{}' ({}) has no attribute '{}'",
                    entity.name,
                    entity.category(),
                    attr
                )))
            }
        };
        Ok(value)
    }

    /// 属性赋值：`A.x = 3`、`k.value = "2*t"`、`A.color = "red"` ...
    pub fn assign_attribute(&mut self, id: EntityId, attr: &str, value: Value) -> SheetResult<()> {
        if attr == "name" {
            return match value {
                Value::Text(name) => self.rename(id, &name),
                other => Err(SheetError::type_error(format!(
                    "a name must be text, got {}",
                    other.type_name()
                ))),
            };
        }
        if style_keys::is_known(attr) {
            let style = Style::from([(attr.to_string(), value_to_style(value)?)]);
            return self.set_style(id, style);
        }

        let entity = self.entity_or_err(id)?;
        let mut definition = entity.definition.clone();
        definition.style.clear();
        let slots: &[usize] = match (definition.constructor, attr) {
            (Constructor::Point | Constructor::Vector, "x") => &[0],
            (Constructor::Point | Constructor::Vector, "y") => &[1],
            (Constructor::Point | Constructor::Vector, "xy") => &[0, 1],
            (Constructor::Variable, "value" | "val") => &[0],
            (Constructor::Text, "text" | "texte") => &[0],
            (Constructor::Text, "x") => &[1],
            (Constructor::Text, "y") => &[2],
            (Constructor::Circle, "radius" | "rayon") => &[1],
            _ => {
                return Err(SheetError::type_error(format!(
                    "cannot set attribute '{}' of '{}'",
                    attr, entity.name
                )))
            }
        };

        let values = if slots.len() == 2 {
            let items = value.into_items()?;
            if items.len() != 2 {
                return Err(SheetError::type_error("expected a pair of coordinates"));
            }
            items
        } else {
            vec![value]
        };
        let kind = match definition.constructor {
            Constructor::Variable => ParamKind::VariableValue,
            Constructor::Text if attr != "x" && attr != "y" => ParamKind::Text,
            _ => ParamKind::Operand,
        };
        for (slot, value) in slots.iter().zip(values) {
            let arg = constructors::convert(value, kind, self)?;
            if let Some(target) = definition.args.get_mut(*slot) {
                *target = arg;
            }
        }
        self.update_in_place(id, definition)
    }

    /// 参与运算时的纯值
    pub fn plain_value(&self, id: EntityId) -> Option<Value> {
        match self.entities.get(&id)?.value.as_ref()? {
            Shape::Scalar(v) => Some(Value::Number(*v)),
            Shape::Vector(v) => Some(Value::Vector(v.x, v.y)),
            Shape::Text(t) => Some(Value::Text(t.content.clone())),
            _ => None,
        }
    }

    pub fn point_of(&self, id: EntityId) -> Option<(f64, f64)> {
        let p = self.entities.get(&id)?.value.as_ref()?.as_point()?;
        Some((p.x, p.y))
    }

    /// 调用函数实体
    pub fn call(&self, id: EntityId, args: Vec<Value>) -> SheetResult<Value> {
        match args.as_slice() {
            [arg] => {
                let x = arg.as_number().ok_or_else(|| {
                    SheetError::type_error(format!("expected a number, got {}", arg.type_name()))
                })?;
                Ok(Value::Number(self.call_function(id, x)?))
            }
            _ => Err(SheetError::type_error(format!(
                "'{}' takes exactly one argument",
                self.name_of(id)
            ))),
        }
    }

    /// `名称 (类别)` 列表，隐藏实体带标记
    pub fn inventory(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .entities
            .values()
            .map(|e| {
                if e.is_visible() {
                    format!("{} ({})", e.name, e.category())
                } else {
                    format!("{} ({} invisible)", e.name, e.category())
                }
            })
            .collect();
        lines.sort();
        lines
    }

    /// 规范文本中的实体行
    pub fn canonical_lines(&self) -> Vec<String> {
        let names = |id: EntityId| self.name_of(id);
        self.ordered()
            .into_iter()
            .map(|e| format!("{} = {}", e.name, e.definition.render_with_style(&names, &e.style)))
            .collect()
    }
}

/// 名称全部小写（且至少含一个字母）时二元组视为向量
fn prefers_vector(name: &str) -> bool {
    name.chars().any(|c| c.is_alphabetic()) && !name.chars().any(|c| c.is_uppercase())
}

pub fn style_to_value(value: &StyleValue) -> Value {
    match value {
        StyleValue::Bool(b) => Value::Bool(*b),
        StyleValue::Number(n) => Value::Number(*n),
        StyleValue::Text(s) => Value::Text(s.clone()),
    }
}

pub fn value_to_style(value: Value) -> SheetResult<StyleValue> {
    match value {
        Value::Bool(b) => Ok(StyleValue::Bool(b)),
        Value::Number(n) => Ok(StyleValue::Number(n)),
        Value::Text(s) => Ok(StyleValue::Text(s)),
        other => Err(SheetError::type_error(format!(
            "style values must be bool, number or text, got {}",
            other.type_name()
        ))),
    }
}

impl NameLookup for Registry {
    fn category_of(&self, name: &str) -> Option<Category> {
        self.names
            .get(name)
            .and_then(|id| self.entities.get(id))
            .map(|e| e.category())
    }

    fn all_names(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }
}

impl NameResolver for Registry {
    fn resolve(&self, name: &str) -> Option<EntityId> {
        Registry::resolve(self, name)
    }
}

impl FormulaContext for Registry {
    fn scalar(&self, id: EntityId) -> SheetResult<f64> {
        match self.shape_of(id)? {
            Shape::Scalar(v) => Ok(*v),
            other => Err(SheetError::type_error(format!(
                "'{}' is a {}, not a number",
                self.name_of(id),
                other.type_name()
            ))),
        }
    }

    fn numeric_attribute(&self, id: EntityId, attr: &str) -> SheetResult<f64> {
        let value = self.attribute(id, attr)?;
        value.as_number().ok_or_else(|| {
            SheetError::type_error(format!("'{}.{}' is not a number", self.name_of(id), attr))
        })
    }

    fn call_function(&self, id: EntityId, x: f64) -> SheetResult<f64> {
        let entity = self.entity_or_err(id)?;
        match (entity.category(), entity.definition.args.first()) {
            (Category::Function, Some(Arg::Formula(formula))) => {
                if !entity.exists() {
                    return Err(SheetError::eval(format!("'{}' does not exist", entity.name)));
                }
                formula.evaluate(self, Some(x))
            }
            _ => Err(SheetError::type_error(format!("'{}' is not a function", entity.name))),
        }
    }
}

impl ShapeSource for Registry {
    fn shape_of(&self, id: EntityId) -> SheetResult<&Shape> {
        let entity = self.entity_or_err(id)?;
        entity
            .value
            .as_ref()
            .ok_or_else(|| SheetError::eval(format!("'{}' does not exist", entity.name)))
    }

    fn name_of(&self, id: EntityId) -> String {
        self.entities
            .get(&id)
            .map_or_else(|| format!("#{}", id.0), |e| e.name.clone())
    }
}

impl Registry {
    fn name_of(&self, id: EntityId) -> String {
        ShapeSource::name_of(self, id)
    }

    /// 解析公式文本（自由变量 `free` 之外的名称必须已存在）
    pub fn parse_formula(&self, text: &str, free: &[&str]) -> SheetResult<Formula> {
        Formula::parse(text, &|name| Registry::resolve(self, name), free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(x: f64, y: f64) -> Value {
        Value::Tuple(vec![Value::Number(x), Value::Number(y)])
    }

    fn point_xy(registry: &Registry, name: &str) -> (f64, f64) {
        let id = registry.resolve(name).unwrap();
        registry.point_of(id).unwrap()
    }

    fn new(constructor: Constructor, args: Vec<Arg>) -> Value {
        Value::New(Box::new(Construction::new(constructor, args)))
    }

    #[test]
    fn test_set_and_get_points() {
        let mut r = Registry::new();
        r.set("A", pair(1.0, 5.0)).unwrap();
        r.set("B", pair(-2.0, 3.0)).unwrap();
        assert_eq!(point_xy(&r, "A"), (1.0, 5.0));
        assert_eq!(point_xy(&r, "B"), (-2.0, 3.0));
        assert_eq!(r.get("B").unwrap().category(), Category::Point);
        assert!(matches!(r.get("C"), Err(SheetError::NotFound(_))));
    }

    #[test]
    fn test_coercion_by_shape() {
        let mut r = Registry::new();
        r.set("k", Value::Number(2.0)).unwrap();
        r.set("u", pair(1.0, 0.0)).unwrap();
        r.set("Z", Value::Complex(3.0, -1.0)).unwrap();
        r.set("msg", Value::Tuple(vec![Value::Text("hello".into())])).unwrap();
        r.set("k2", Value::Text("k + 1".into())).unwrap();
        assert_eq!(r.get("k").unwrap().category(), Category::Variable);
        assert_eq!(r.get("u").unwrap().category(), Category::Vector);
        assert_eq!(point_xy(&r, "Z"), (3.0, -1.0));
        assert_eq!(r.get("msg").unwrap().category(), Category::Text);
        assert_eq!(r.get("k2").unwrap().value, Some(Shape::Scalar(3.0)));
        assert!(matches!(r.set("w", Value::None), Err(SheetError::Type(_))));
    }

    #[test]
    fn test_anonymous_names() {
        let mut r = Registry::new();
        let id = r.set("_", pair(0.0, 0.0)).unwrap();
        let entity = r.entity(id).unwrap();
        assert_eq!(entity.name, "M1");
        assert_eq!(entity.style.get(style_keys::SHOW_LABEL), Some(&StyleValue::Bool(false)));
        assert_eq!(r.resolve("_"), Some(id));

        let hidden = r.set("_tmp", Value::Number(1.0)).unwrap();
        assert!(!r.entity(hidden).unwrap().is_visible());

        let seq = Value::Lazy(vec![pair(1.0, 1.0), pair(2.0, 2.0)]);
        r.set("_", seq).unwrap();
        assert!(r.contains("M2") && r.contains("M3"));
    }

    #[test]
    fn test_name_already_used() {
        let mut r = Registry::new();
        r.set("A", pair(1.0, 1.0)).unwrap();
        // 兼容定义：原地更新
        let id = r.set("A", pair(2.0, 3.0)).unwrap();
        assert_eq!(r.resolve("A"), Some(id));
        assert_eq!(point_xy(&r, "A"), (2.0, 3.0));
        // 类别不同：拒绝
        assert!(matches!(
            r.set("A", Value::Number(1.0)),
            Err(SheetError::Name { issue: NameIssue::AlreadyUsed, .. })
        ));

        r.set_tolerant(true);
        let renamed = r.set("A", Value::Number(1.0)).unwrap();
        assert_eq!(r.entity(renamed).unwrap().name, "A1");
        // 载入期间旧名称指向改名后的实体
        assert_eq!(r.resolve("A"), Some(renamed));
        r.set_tolerant(false);
        assert_eq!(r.resolve("A"), Some(id));
    }

    #[test]
    fn test_in_place_update_keeps_dependents() {
        let mut r = Registry::new();
        let a = r.set("A", pair(0.0, 0.0)).unwrap();
        r.set("B", pair(4.0, 0.0)).unwrap();
        let m = r
            .set(
                "M",
                new(
                    Constructor::Midpoint,
                    vec![Arg::Entity(a), Arg::Entity(r.resolve("B").unwrap())],
                ),
            )
            .unwrap();
        assert_eq!(r.point_of(m), Some((2.0, 0.0)));
        r.set("A", pair(2.0, 2.0)).unwrap();
        assert_eq!(r.resolve("A"), Some(a));
        assert_eq!(r.point_of(m), Some((3.0, 1.0)));
        assert!(!r.entity(m).unwrap().stale);
    }

    #[test]
    fn test_rebind_stores_value_and_recomputes_dependents() {
        let mut r = Registry::new();
        r.set("k", Value::Number(2.0)).unwrap();
        let q = r.set("q", Value::Text("k * 3".into())).unwrap();
        let w = r.set("w", Value::Text("q + 1".into())).unwrap();

        r.set("q", Value::Text("k * 5".into())).unwrap();
        assert_eq!(r.resolve("q"), Some(q));
        assert_eq!(r.entity(q).unwrap().value, Some(Shape::Scalar(10.0)));
        assert_eq!(r.entity(w).unwrap().value, Some(Shape::Scalar(11.0)));
        assert!(!r.entity(q).unwrap().stale && !r.entity(w).unwrap().stale);

        // 新定义求值失败：实体保留但不存在，依赖者随之不存在
        r.set("q", Value::Text("1 / (k - 2)".into())).unwrap();
        let entity = r.entity(q).unwrap();
        assert!(!entity.exists() && !entity.stale);
        assert!(entity.last_error.is_some());
        assert!(!r.entity(w).unwrap().exists());
    }

    #[test]
    fn test_circular_definition_rejected() {
        let mut r = Registry::new();
        r.set("a", Value::Number(1.0)).unwrap();
        r.set("b", Value::Text("a + 1".into())).unwrap();
        let a = r.resolve("a").unwrap();
        let err = r.set("a", Value::Text("b * 2".into())).unwrap_err();
        assert!(matches!(err, SheetError::CircularDependency { .. }));
        assert_eq!(r.entity(a).unwrap().value, Some(Shape::Scalar(1.0)));
        assert_eq!(r.get("b").unwrap().value, Some(Shape::Scalar(2.0)));
    }

    #[test]
    fn test_failed_recompute_marks_non_existent() {
        let mut r = Registry::new();
        r.set("k", Value::Number(2.0)).unwrap();
        r.set("q", Value::Text("1/k".into())).unwrap();
        r.set("k", Value::Number(0.0)).unwrap();
        let q = r.get("q").unwrap();
        assert!(!q.exists());
        assert!(q.last_error.is_some());
        // 新定义不能读取不存在的实体
        assert!(matches!(r.set("w", Value::Text("q + 1".into())), Err(SheetError::Evaluation(_))));
        assert!(!r.contains("w"));
        r.set("k", Value::Number(4.0)).unwrap();
        assert_eq!(r.get("q").unwrap().value, Some(Shape::Scalar(0.25)));
    }

    #[test]
    fn test_nested_rollback() {
        let mut r = Registry::new();
        let bad = new(
            Constructor::Segment,
            vec![
                Arg::New(Box::new(Construction::new(
                    Constructor::Point,
                    vec![Arg::Number(0.0), Arg::Number(0.0)],
                ))),
                Arg::Number(3.0),
            ],
        );
        assert!(r.set("s", bad).is_err());
        assert!(r.is_empty());

        let circle = r.set("c", Value::Constructor(Constructor::Circle)).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r.last_created(), Some(circle));
    }

    #[test]
    fn test_delete_rules() {
        let mut r = Registry::new();
        let a = r.set("A", pair(0.0, 0.0)).unwrap();
        let b = r.set("B", pair(1.0, 1.0)).unwrap();
        r.set("s", new(Constructor::Segment, vec![Arg::Entity(a), Arg::Entity(b)]))
            .unwrap();

        let err = r.delete(&["A".to_string()]).unwrap_err();
        assert!(matches!(err, SheetError::DependentsRemain { ref dependents, .. } if dependents == &["s".to_string()]));
        assert!(r.contains("A"));

        let deleted = r
            .delete(&["A".to_string(), "B".to_string(), "s".to_string()])
            .unwrap();
        assert_eq!(deleted, vec!["s".to_string(), "B".to_string(), "A".to_string()]);
        assert!(r.is_empty());

        assert!(matches!(r.delete(&["xmin".to_string()]), Err(SheetError::Protected(_))));
        r.set("P", pair(0.0, 0.0)).unwrap();
        r.protect("P");
        assert!(matches!(r.delete(&["P".to_string()]), Err(SheetError::Protected(_))));
    }

    #[test]
    fn test_regular_polygon_parts() {
        let mut r = Registry::new();
        let o = r.set("O", pair(0.0, 0.0)).unwrap();
        let f = r.set("F", pair(1.0, 0.0)).unwrap();
        let poly = r
            .set(
                "ABCDEF",
                new(
                    Constructor::RegularPolygon,
                    vec![Arg::Entity(o), Arg::Entity(f), Arg::Number(6.0)],
                ),
            )
            .unwrap();
        assert_eq!(r.entity(poly).unwrap().parts.len(), 5);
        for n in 1..=5 {
            assert!(r.contains(&format!("S{}", n)));
        }
        let (x, y) = point_xy(&r, "S3");
        assert!((x + 1.0).abs() < 1e-9 && y.abs() < 1e-9);

        // 同一 (宿主, 序号) 返回已有子部件并改名
        let s5 = r.resolve("S5").unwrap();
        let vertex = new(Constructor::Vertex, vec![Arg::Entity(poly), Arg::Number(5.0)]);
        assert_eq!(r.set("A", vertex).unwrap(), s5);
        assert!(!r.contains("S5"));

        // 删除子部件即删除整个多边形
        let deleted = r.delete(&["A".to_string()]).unwrap();
        assert_eq!(deleted.len(), 6);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_rename_preserves_identity() {
        let mut r = Registry::new();
        r.set("k", Value::Number(3.0)).unwrap();
        r.set("g", new(
            Constructor::Function,
            vec![Arg::Formula(r.parse_formula("k*x", &["x"]).unwrap())],
        ))
        .unwrap();
        let k = r.resolve("k").unwrap();
        r.rename(k, "speed").unwrap();
        assert_eq!(r.resolve("speed"), Some(k));
        assert!(!r.contains("k"));
        let g = r.resolve("g").unwrap();
        assert_eq!(r.call(g, vec![Value::Number(2.0)]).unwrap(), Value::Number(6.0));
        assert_eq!(r.canonical_lines()[1], "g = Function(\"speed * x\")");
        assert!(r.rename(g, "f1").is_ok());
        assert!(matches!(r.rename(k, "f2"), Err(SheetError::Name { .. })));
    }

    #[test]
    fn test_attributes() {
        let mut r = Registry::new();
        let a = r.set("A", pair(1.0, 2.0)).unwrap();
        assert_eq!(r.attribute(a, "x").unwrap(), Value::Number(1.0));
        assert_eq!(r.attribute(a, "renommer").unwrap(), Value::Method(a, "rename".into()));
        r.assign_attribute(a, "xy", pair(5.0, 6.0)).unwrap();
        assert_eq!(r.point_of(a), Some((5.0, 6.0)));
        r.assign_attribute(a, "couleur", Value::Text("red".into())).unwrap();
        assert_eq!(r.attribute(a, "color").unwrap(), Value::Text("red".into()));

        let b = r.set("B", pair(0.0, 0.0)).unwrap();
        let m = r
            .set("M", new(Constructor::Midpoint, vec![Arg::Entity(a), Arg::Entity(b)]))
            .unwrap();
        assert!(matches!(r.assign_attribute(m, "x", Value::Number(1.0)), Err(SheetError::Type(_))));
    }

    #[test]
    fn test_cleanup_and_inventory() {
        let mut r = Registry::new();
        let hidden = r.set("_H", pair(0.0, 0.0)).unwrap();
        r.set("_U", pair(1.0, 0.0)).unwrap();
        let used = r.resolve("_U").unwrap();
        r.set("s", new(Constructor::Segment, vec![Arg::Entity(used), Arg::Entity(hidden)]))
            .unwrap();
        assert_eq!(
            r.inventory(),
            vec!["_H (point invisible)", "_U (point invisible)", "s (segment)"]
        );
        assert!(r.cleanup().is_empty());
        let s = r.resolve("s").unwrap();
        r.set_style(s, Style::from([("visible".to_string(), StyleValue::Bool(false))]))
            .unwrap();
        assert_eq!(r.cleanup().len(), 3);
    }
}
