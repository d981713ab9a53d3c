//! 工作表
//!
//! 协调注册表、历史管理器与解释器，对外提供：
//! - `execute`：执行一条（或一段多行）命令，无论成败都会归档历史、刷新标记并运行回调
//! - `undo` / `redo`：清空后重放快照文本
//! - `save` / `load`：规范文本
//! - 视窗参数（可见范围、网格、坐标轴）
//! - 宏与协作式停止标记
//!
//! 两个独立的刷新标记：结构变化（需要完整重算）与仅需重绘（如视窗变化）。

use crate::config::{ViewSettings, WorksheetConfig};
use crate::constructors;
use crate::definition::Constructor;
use crate::entity::{style_keys, Entity, EntityId, Style, StyleValue};
use crate::error::{NameIssue, SheetError, SheetResult};
use crate::expr::ast::format_number;
use crate::expr::builtins::Builtin;
use crate::expr::eval::{Evaluator, Namespace};
use crate::expr::parser::parse_expression;
use crate::expr::value::Value;
use crate::geometry::Shape;
use crate::history::{Archived, History};
use crate::interpreter::{self, Interpreter};
use crate::naming::{VIEW_PARAMETERS, WINDOW_NAMES};
use crate::registry::{self, Registry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 缩放操作的历史合并签名
pub const ZOOM_SIGNATURE: &str = "zoom";

/// 宏
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub code: String,
    /// 载入文档后自动运行
    pub autostart: bool,
    /// 跳过简写改写，按原文执行
    pub advanced_mode: bool,
}

impl Macro {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }
}

/// 协作式停止标记，可跨线程克隆
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 供渲染器拉取的可绘制对象
#[derive(Debug, Clone, PartialEq)]
pub struct Drawable {
    pub id: EntityId,
    pub name: String,
    pub shape: Shape,
    /// 叠加了类别默认值的样式
    pub style: Style,
    /// 隐藏对象（仅在 `show_hidden` 时出现，以淡色绘制）
    pub hidden: bool,
}

/// 传给命令回调的事件
#[derive(Debug, Clone, Copy)]
pub struct CommandEvent<'a> {
    pub command: &'a str,
    pub succeeded: bool,
}

type Action = Box<dyn FnMut(&CommandEvent<'_>) + Send>;

/// 重放快照文本的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// 遇到第一个错误即停止
    Strict,
    /// 名称冲突时自动改名，跳过出错的行
    Tolerant,
}

/// 工作表
pub struct Worksheet {
    config: WorksheetConfig,
    registry: Registry,
    history: History,
    interpreter: Interpreter,
    view: ViewSettings,
    macros: BTreeMap<String, Macro>,
    actions: Vec<Action>,
    stop: StopHandle,
    /// 结构变化，需要完整重算
    needs_recompute: bool,
    /// 需要重绘
    needs_redraw: bool,
    /// 自上次保存以来是否修改过
    modified: bool,
}

impl Default for Worksheet {
    fn default() -> Self {
        Self::new()
    }
}

impl Worksheet {
    pub fn new() -> Self {
        Self::with_config(WorksheetConfig::default())
    }

    pub fn with_config(config: WorksheetConfig) -> Self {
        let mut sheet = Self {
            registry: Registry::with_style_defaults(config.style_defaults.clone()),
            history: History::new(config.history_capacity),
            interpreter: Interpreter::new(config.debug),
            view: config.view.clone(),
            config,
            macros: BTreeMap::new(),
            actions: Vec::new(),
            stop: StopHandle::default(),
            needs_recompute: true,
            needs_redraw: true,
            modified: false,
        };
        let text = sheet.canonical_text();
        sheet.history.reset(text);
        sheet
    }

    pub fn config(&self) -> &WorksheetConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 直接操作注册表；调用者负责随后调用 [`Worksheet::archive`]
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn view(&self) -> &ViewSettings {
        &self.view
    }

    pub fn get(&self, name: &str) -> SheetResult<&Entity> {
        self.registry.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    // ------------------------------------------------------------------
    // 命令
    // ------------------------------------------------------------------

    /// 执行命令，返回显示文本
    pub fn execute(&mut self, command: &str) -> SheetResult<String> {
        self.execute_with(command, false)
    }

    /// 命令开始前发出的停止请求在第一个检查点生效；命令结束后清除
    fn execute_with(&mut self, command: &str, raw: bool) -> SheetResult<String> {
        let result = self.run_command(command, raw);
        self.stop.reset();
        if let Err(err) = &result {
            tracing::debug!("command {:?} failed: {}", command, err);
        }
        self.after_command(command, result.is_ok());
        result
    }

    fn run_command(&mut self, command: &str, raw: bool) -> SheetResult<String> {
        let normalized = self.interpreter.prepare(command, raw)?;
        let outcome = Interpreter::run(self, &normalized)?;
        Ok(interpreter::display_outcome(&outcome, &self.registry))
    }

    /// 每条顶层命令之后：刷新标记、归档历史、运行回调
    fn after_command(&mut self, command: &str, succeeded: bool) {
        self.refresh_flags();
        self.archive(None);
        let event = CommandEvent { command, succeeded };
        let mut actions = std::mem::take(&mut self.actions);
        for action in actions.iter_mut() {
            action(&event);
        }
        actions.append(&mut self.actions);
        self.actions = actions;
    }

    fn refresh_flags(&mut self) {
        if self.registry.take_changed() {
            self.needs_recompute = true;
            self.needs_redraw = true;
        }
    }

    /// 把当前状态归档到历史
    pub fn archive(&mut self, signature: Option<&str>) {
        self.refresh_flags();
        let text = self.canonical_text();
        if self.history.archive(text, signature) != Archived::Unchanged {
            self.modified = true;
        }
    }

    /// 注册每条顶层命令之后运行的回调
    pub fn on_command(&mut self, action: impl FnMut(&CommandEvent<'_>) + Send + 'static) {
        self.actions.push(Box::new(action));
    }

    // ------------------------------------------------------------------
    // 历史
    // ------------------------------------------------------------------

    /// 撤销；没有可撤销的状态时返回 `false`
    pub fn undo(&mut self) -> SheetResult<bool> {
        let Some(text) = self.history.undo() else {
            tracing::info!("nothing to undo");
            return Ok(false);
        };
        self.restore(&text)?;
        tracing::info!("undo ({} states left)", self.history.len());
        Ok(true)
    }

    /// 重做；没有可重做的状态时返回 `false`
    pub fn redo(&mut self) -> SheetResult<bool> {
        let Some(text) = self.history.redo() else {
            tracing::info!("nothing to redo");
            return Ok(false);
        };
        self.restore(&text)?;
        tracing::info!("redo");
        Ok(true)
    }

    fn restore(&mut self, text: &str) -> SheetResult<()> {
        self.modified = true;
        self.replay(text, Replay::Strict).map(|_| ())
    }

    /// 清空后逐行执行规范文本；返回跳过的行数
    fn replay(&mut self, text: &str, mode: Replay) -> SheetResult<usize> {
        self.registry.clear();
        self.view = self.config.view.clone();
        self.registry.set_tolerant(mode == Replay::Tolerant);

        let mut skipped = 0;
        let mut result = Ok(());
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(err) = self.run_command(line, false) {
                if mode == Replay::Tolerant && !err.is_fatal() {
                    tracing::warn!("skipped {:?}: {}", line, err);
                    skipped += 1;
                    continue;
                }
                result = Err(err);
                break;
            }
        }

        self.registry.set_tolerant(false);
        self.registry.take_changed();
        self.needs_recompute = true;
        self.needs_redraw = true;
        result.map(|_| skipped)
    }

    // ------------------------------------------------------------------
    // 保存与载入
    // ------------------------------------------------------------------

    /// 规范文本：视窗参数块、空行、按规范顺序的实体行
    pub fn canonical_text(&self) -> String {
        let mut lines = self.parameter_lines();
        lines.push(String::new());
        lines.extend(self.registry.canonical_lines());
        lines.join("\n")
    }

    pub fn save(&self) -> String {
        self.canonical_text()
    }

    /// 清空并载入规范文本；历史从载入后的状态重新开始
    pub fn load(&mut self, text: &str) -> SheetResult<()> {
        let result = self.replay(text, Replay::Strict);
        self.reset_history();
        tracing::info!("loaded {} entities", self.registry.len());
        result.map(|_| ())
    }

    /// 以容错模式载入旧文档：冲突的名称自动改名，出错的行被跳过
    pub fn load_tolerant(&mut self, text: &str) -> SheetResult<usize> {
        let result = self.replay(text, Replay::Tolerant);
        self.reset_history();
        if let Ok(skipped) = &result {
            tracing::info!(
                "loaded {} entities ({} lines skipped)",
                self.registry.len(),
                skipped
            );
        }
        result
    }

    fn reset_history(&mut self) {
        let text = self.canonical_text();
        self.history.reset(text);
        self.modified = false;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_saved(&mut self) {
        self.modified = false;
    }

    // ------------------------------------------------------------------
    // 刷新标记与绘制
    // ------------------------------------------------------------------

    pub fn mark_dirty(&mut self) {
        self.needs_recompute = true;
        self.needs_redraw = true;
    }

    pub fn needs_recompute(&self) -> bool {
        self.needs_recompute
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    /// 按规范顺序列出存在的对象并复位刷新标记
    pub fn drawables(&mut self) -> Vec<Drawable> {
        if self.needs_recompute {
            self.registry.recompute_stale();
        }
        let show_hidden = self.view.show_hidden;
        let drawables = self
            .registry
            .ordered()
            .into_iter()
            .filter(|e| e.is_visible() || show_hidden)
            .filter_map(|e| {
                e.value.as_ref().map(|shape| Drawable {
                    id: e.id,
                    name: e.name.clone(),
                    shape: shape.clone(),
                    style: self.registry.effective_style(e.id),
                    hidden: !e.is_visible(),
                })
            })
            .collect();
        self.needs_recompute = false;
        self.needs_redraw = false;
        drawables
    }

    /// `名称 (类别)` 列表
    pub fn inventory(&self) -> Vec<String> {
        self.registry.inventory()
    }

    /// 删除无用的隐藏对象
    pub fn cleanup(&mut self) -> Vec<String> {
        let deleted = self.registry.cleanup();
        self.archive(None);
        deleted
    }

    // ------------------------------------------------------------------
    // 视窗
    // ------------------------------------------------------------------

    /// 以窗口中心缩放；连续缩放在历史中合并为一条
    pub fn zoom(&mut self, factor: f64) -> SheetResult<()> {
        self.view.zoom(factor, self.config.tolerance)?;
        self.needs_redraw = true;
        self.archive(Some(ZOOM_SIGNATURE));
        Ok(())
    }

    fn parameter_lines(&self) -> Vec<String> {
        let v = &self.view;
        let (xmin, xmax, ymin, ymax) = v.window;
        vec![
            format!(
                "window = ({}, {}, {}, {})",
                format_number(xmin),
                format_number(xmax),
                format_number(ymin),
                format_number(ymax)
            ),
            format!("grid = ({}, {})", format_number(v.grid.0), format_number(v.grid.1)),
            format!("show_axes = {}", StyleValue::Bool(v.show_axes)),
            format!("show_grid = {}", StyleValue::Bool(v.show_grid)),
            format!("show_hidden = {}", StyleValue::Bool(v.show_hidden)),
        ]
    }

    /// 视窗参数与视窗边界伪名称的值
    fn view_value(&self, name: &str) -> Option<Value> {
        let v = &self.view;
        let value = match name {
            "xmin" => Value::Number(v.xmin()),
            "xmax" => Value::Number(v.xmax()),
            "ymin" => Value::Number(v.ymin()),
            "ymax" => Value::Number(v.ymax()),
            "dpx" => Value::Number(v.dpx()),
            "dpy" => Value::Number(v.dpy()),
            "window" => Value::Tuple(
                [v.window.0, v.window.1, v.window.2, v.window.3]
                    .into_iter()
                    .map(Value::Number)
                    .collect(),
            ),
            "grid" => Value::Tuple(vec![Value::Number(v.grid.0), Value::Number(v.grid.1)]),
            "show_axes" => Value::Bool(v.show_axes),
            "show_grid" => Value::Bool(v.show_grid),
            "show_hidden" => Value::Bool(v.show_hidden),
            _ => return None,
        };
        Some(value)
    }

    fn set_view_parameter(&mut self, name: &str, value: Value) -> SheetResult<()> {
        match name {
            "window" => {
                let n = self.numbers(value, 4)?;
                self.view.set_window((n[0], n[1], n[2], n[3]), self.config.tolerance)?;
            }
            "grid" => {
                let n = self.numbers(value, 2)?;
                self.view.set_grid((n[0], n[1]))?;
            }
            "show_axes" => self.view.show_axes = value.truthy(),
            "show_grid" => self.view.show_grid = value.truthy(),
            "show_hidden" => self.view.show_hidden = value.truthy(),
            other => {
                return Err(SheetError::InvalidParameter(format!(
                    "unknown view parameter '{}'",
                    other
                )))
            }
        }
        self.needs_redraw = true;
        Ok(())
    }

    fn numbers(&self, value: Value, count: usize) -> SheetResult<Vec<f64>> {
        let items = value.into_items()?;
        if items.len() != count {
            return Err(SheetError::InvalidParameter(format!(
                "expected {} numbers, got {}",
                count,
                items.len()
            )));
        }
        items
            .into_iter()
            .map(|item| {
                let plain = match item {
                    Value::Entity(id) => self.registry.plain_value(id).unwrap_or(Value::None),
                    other => other,
                };
                plain.as_number().ok_or_else(|| {
                    SheetError::type_error(format!("expected a number, got {}", plain.type_name()))
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // 宏与停止标记
    // ------------------------------------------------------------------

    pub fn macros(&self) -> &BTreeMap<String, Macro> {
        &self.macros
    }

    pub fn add_macro(&mut self, name: impl Into<String>, macro_: Macro) {
        self.macros.insert(name.into(), macro_);
    }

    pub fn remove_macro(&mut self, name: &str) -> Option<Macro> {
        self.macros.remove(name)
    }

    /// 整体替换宏（载入文档时使用）
    pub fn set_macros(&mut self, macros: BTreeMap<String, Macro>) {
        self.macros = macros;
    }

    /// 作为一条顶层命令执行宏
    pub fn run_macro(&mut self, name: &str) -> SheetResult<String> {
        let macro_ = self
            .macros
            .get(name)
            .cloned()
            .ok_or_else(|| SheetError::NotFound(format!("macro '{}'", name)))?;
        tracing::info!("running macro '{}'", name);
        self.execute_with(&macro_.code, macro_.advanced_mode)
    }

    /// 运行所有自动启动的宏；单个宏失败只记录警告
    pub fn run_autostart_macros(&mut self) -> usize {
        let names: Vec<String> = self
            .macros
            .iter()
            .filter(|(_, m)| m.autostart)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            if let Err(err) = self.run_macro(name) {
                tracing::warn!("autostart macro '{}' failed: {}", name, err);
            }
        }
        names.len()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// 宏循环中的检查点：按配置暂停，停止标记置位时返回 `Cancelled`
    pub fn checkpoint(&self) -> SheetResult<()> {
        if let Some(pause) = self.config.pause_duration() {
            std::thread::sleep(pause);
        }
        if self.stop.is_stopped() {
            tracing::info!("macro interrupted");
            return Err(SheetError::Cancelled);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 实体方法
    // ------------------------------------------------------------------

    fn entity_method(
        &mut self,
        id: EntityId,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SheetResult<Value> {
        match method {
            "rename" => {
                let name = single_text(&args, "rename")?;
                self.registry.rename(id, &name)?;
                if !kwargs.is_empty() {
                    self.registry.set_style(id, style_from(kwargs)?)?;
                }
            }
            "style" => {
                if !kwargs.is_empty() {
                    self.registry.set_style(id, style_from(kwargs)?)?;
                    return Ok(Value::None);
                }
                let style = self.registry.effective_style(id);
                return match args.as_slice() {
                    [] => Ok(Value::Text(
                        style
                            .iter()
                            .map(|(k, v)| format!("{}={}", k, v))
                            .collect::<Vec<_>>()
                            .join(", "),
                    )),
                    [Value::Text(key)] => Ok(style
                        .get(style_keys::canonical(key))
                        .map_or(Value::None, registry::style_to_value)),
                    _ => Err(SheetError::type_error("style() expects a key or keyword arguments")),
                };
            }
            "hide" | "show" => {
                let visible = StyleValue::Bool(method == "show");
                let style = Style::from([(style_keys::VISIBLE.to_string(), visible)]);
                self.registry.set_style(id, style)?;
            }
            "delete" => {
                let name = self
                    .registry
                    .entity(id)
                    .map(|e| e.name.clone())
                    .ok_or_else(|| SheetError::NotFound(format!("#{}", id.0)))?;
                self.registry.delete(&[name])?;
            }
            "redefine" => {
                let text = single_text(&args, "redefine")?;
                let normalized = self.interpreter.prepare(&text, false)?;
                let expr = parse_expression(&normalized)?;
                let construction = match Evaluator::new(self).eval(&expr)? {
                    Value::New(construction) => *construction,
                    value @ (Value::Number(_) | Value::Text(_)) => constructors::build(
                        Constructor::Variable,
                        vec![value],
                        vec![],
                        &self.registry,
                    )?,
                    other => {
                        return Err(SheetError::type_error(format!(
                            "redefine() expects a construction, got {}",
                            other.type_name()
                        )))
                    }
                };
                self.registry.redefine(id, construction)?;
            }
            other => {
                return Err(SheetError::type_error(format!("unknown method '{}'", other)));
            }
        }
        Ok(Value::None)
    }
}

fn single_text(args: &[Value], method: &str) -> SheetResult<String> {
    match args {
        [Value::Text(text)] => Ok(text.clone()),
        _ => Err(SheetError::type_error(format!(
            "{}() expects a single text argument",
            method
        ))),
    }
}

fn style_from(kwargs: Vec<(String, Value)>) -> SheetResult<Style> {
    kwargs
        .into_iter()
        .map(|(key, value)| Ok((key, registry::value_to_style(value)?)))
        .collect()
}

impl Namespace for Worksheet {
    fn lookup(&self, name: &str) -> SheetResult<Option<Value>> {
        if let Some(value) = self.view_value(name) {
            return Ok(Some(value));
        }
        Ok(self.registry.resolve(name).map(Value::Entity))
    }

    fn attribute(&self, id: EntityId, name: &str) -> SheetResult<Value> {
        self.registry.attribute(id, name)
    }

    fn plain_value(&self, id: EntityId) -> Option<Value> {
        self.registry.plain_value(id)
    }

    fn point_of(&self, id: EntityId) -> Option<(f64, f64)> {
        self.registry.point_of(id)
    }

    fn call_entity(&mut self, id: EntityId, args: Vec<Value>) -> SheetResult<Value> {
        self.registry.call(id, args)
    }

    fn call_method(
        &mut self,
        id: EntityId,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SheetResult<Value> {
        self.entity_method(id, method, args, kwargs)
    }

    fn construct(
        &mut self,
        constructor: Constructor,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SheetResult<Value> {
        constructors::build(constructor, args, kwargs, &self.registry)
            .map(|construction| Value::New(Box::new(construction)))
    }

    fn assign(&mut self, name: &str, value: Value) -> SheetResult<()> {
        if VIEW_PARAMETERS.contains(&name) {
            return self.set_view_parameter(name, value);
        }
        if WINDOW_NAMES.contains(&name) {
            return Err(SheetError::name(name, NameIssue::Reserved));
        }
        self.registry.set(name, value).map(|_| ())
    }

    fn assign_attribute(&mut self, id: EntityId, attr: &str, value: Value) -> SheetResult<()> {
        self.registry.assign_attribute(id, attr, value)
    }

    fn delete(&mut self, names: &[String]) -> SheetResult<()> {
        self.registry.delete(names).map(|_| ())
    }

    fn helper(&mut self, helper: Builtin) -> SheetResult<Value> {
        match helper {
            Builtin::Pause => {
                self.checkpoint()?;
                Ok(Value::None)
            }
            Builtin::Clear => {
                self.registry.clear();
                Ok(Value::None)
            }
            Builtin::Cleanup => Ok(Value::List(
                self.registry.cleanup().into_iter().map(Value::Text).collect(),
            )),
            other => Err(SheetError::type_error(format!(
                "{}() is not a worksheet helper",
                other.name()
            ))),
        }
    }
}
