//! 撤销/重做历史
//!
//! 保存整张工作表的规范文本快照。连续同类编辑（带相同合并签名，
//! 如滚轮缩放）合并为一条记录。两个栈都有容量上限，超出时丢弃最旧的记录。

use rustc_hash::FxHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

/// 历史快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
    pub hash: u64,
    /// 合并签名
    pub signature: Option<String>,
}

impl Snapshot {
    pub fn new(text: String, signature: Option<&str>) -> Self {
        let mut hasher = FxHasher::default();
        text.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            text,
            signature: signature.map(str::to_string),
        }
    }

    fn same_text(&self, text: &str, hash: u64) -> bool {
        self.hash == hash && self.text == text
    }
}

/// `archive` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archived {
    /// 与最近的快照相同
    Unchanged,
    /// 替换了签名相同的最近快照
    Coalesced,
    Appended,
}

/// 历史管理器
#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<Snapshot>,
    redo: VecDeque<Snapshot>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 撤销栈中的快照数（含当前状态）
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.len() > 1
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// 当前快照
    pub fn current(&self) -> Option<&Snapshot> {
        self.undo.back()
    }

    /// 清空历史，仅保留 `text` 作为初始状态
    pub fn reset(&mut self, text: String) {
        self.undo.clear();
        self.redo.clear();
        self.undo.push_back(Snapshot::new(text, None));
    }

    /// 记录一个新状态
    pub fn archive(&mut self, text: String, signature: Option<&str>) -> Archived {
        let snapshot = Snapshot::new(text, signature);
        if let Some(last) = self.undo.back_mut() {
            if last.same_text(&snapshot.text, snapshot.hash) {
                return Archived::Unchanged;
            }
            if signature.is_some() && last.signature.as_deref() == signature {
                *last = snapshot;
                self.redo.clear();
                return Archived::Coalesced;
            }
        }
        self.undo.push_back(snapshot);
        self.redo.clear();
        Self::trim(&mut self.undo, self.capacity);
        Archived::Appended
    }

    /// 回到上一个状态；返回需要恢复的文本
    pub fn undo(&mut self) -> Option<String> {
        if !self.can_undo() {
            return None;
        }
        let current = self.undo.pop_back()?;
        self.redo.push_back(current);
        Self::trim(&mut self.redo, self.capacity);
        self.undo.back().map(|s| s.text.clone())
    }

    /// 重做最近撤销的状态；返回需要恢复的文本
    pub fn redo(&mut self) -> Option<String> {
        let snapshot = self.redo.pop_back()?;
        let text = snapshot.text.clone();
        self.undo.push_back(snapshot);
        Self::trim(&mut self.undo, self.capacity);
        Some(text)
    }

    fn trim(stack: &mut VecDeque<Snapshot>, capacity: usize) {
        while stack.len() > capacity {
            stack.pop_front();
        }
    }
}
