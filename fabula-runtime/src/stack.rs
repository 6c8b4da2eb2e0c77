//! # Stack 模块
//!
//! 显式执行栈：可暂停、可恢复、可存档、可热更新的执行位置。
//!
//! ## 设计说明
//!
//! 执行位置**只**存在于栈中。每个帧持有一段代码（节点列表）和一个
//! 程序计数器；栈顶是活动帧，栈底是根帧。嵌套控制流（if 分支、菜单
//! 选项块）通过压入新帧实现，帧耗尽后自动弹出。
//!
//! 帧还记录了自己的代码在脚本源中的节点路径，存档据此在读档时
//! 重新定位代码块。

use crate::diff::{diff, Change};
use crate::error::StackError;
use crate::node::{Node, NodePath};

/// 执行帧
///
/// 不变量：`0 <= pc <= code.len()`；`pc == code.len()` 表示帧已耗尽。
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 代码块在脚本源中的路径
    path: NodePath,
    /// 代码块
    code: Vec<Node>,
    /// 程序计数器
    pc: usize,
}

impl Frame {
    /// 创建新帧，`pc` 置零
    pub fn new(path: NodePath, code: Vec<Node>) -> Self {
        Self { path, code, pc: 0 }
    }

    /// 从存档恢复帧，`pc` 截断到代码长度以内
    pub fn restored(path: NodePath, code: Vec<Node>, pc: usize) -> Self {
        let pc = pc.min(code.len());
        Self { path, code, pc }
    }

    /// 代码块路径
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// 代码块
    pub fn code(&self) -> &[Node] {
        &self.code
    }

    /// 程序计数器
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// 是否已耗尽
    pub fn is_exhausted(&self) -> bool {
        self.pc >= self.code.len()
    }

    /// 重定位程序计数器（jump 指令使用，只允许落在代码范围内）
    pub fn jump_to(&mut self, index: usize) {
        self.pc = index.min(self.code.len());
    }

    /// 用新代码替换本帧代码，并平移 `pc` 使其尽量指向同一条逻辑指令
    ///
    /// 算法：对新旧代码做行级差分，沿差分游走并维护一个指向旧代码的
    /// 游标（初值 0，目标为原 `pc`）。游标到达原 `pc` 前：
    ///
    /// - `Removed`：`pc` 减一
    /// - `Inserted`：`pc` 加一
    /// - `Kept`：游标前进
    ///
    /// 游标一到达原 `pc` 立即停止。效果：编辑发生在 `pc` 之前时
    /// `pc` 平移到新代码中的对应位置；当前指令本身被替换时，从该
    /// 位置的第一条新插入指令恢复执行；编辑发生在 `pc` 之后时
    /// `pc` 不变。最终 `pc` 截断到新代码长度以内。
    pub fn patch(&mut self, new_code: Vec<Node>) {
        let original_pc = self.pc;
        let changes = diff(&self.code, &new_code);

        let mut pc = original_pc;
        let mut cursor = 0usize;
        for change in &changes {
            if cursor >= original_pc {
                break;
            }
            match change {
                Change::Kept { .. } => cursor += 1,
                Change::Removed { .. } => pc = pc.saturating_sub(1),
                Change::Inserted { .. } => pc += 1,
            }
        }

        self.pc = pc.min(new_code.len());
        self.code = new_code;
    }
}

/// 执行栈
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stack {
    /// 帧列表，下标 0 为根帧，末尾为活动帧
    frames: Vec<Frame>,
}

impl Stack {
    /// 创建空栈
    pub fn new() -> Self {
        Self::default()
    }

    /// 压入新帧
    ///
    /// 同一路径的代码块不允许重复在栈：这意味着引擎内部出现了
    /// 非法的重入，是程序员错误。
    pub fn push(&mut self, path: NodePath, code: Vec<Node>) -> Result<(), StackError> {
        self.push_frame(Frame::new(path, code))
    }

    /// 压入已构造的帧（读档恢复使用）
    pub fn push_frame(&mut self, frame: Frame) -> Result<(), StackError> {
        if self.frames.iter().any(|f| f.path == frame.path) {
            return Err(StackError::DuplicateFrame {
                path: frame.path.clone(),
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    /// 查看当前指令，不前进
    ///
    /// 会越过已耗尽的帧向下查找，但不弹出任何帧。
    pub fn peek(&self) -> Option<(&NodePath, usize, &Node)> {
        for frame in self.frames.iter().rev() {
            if !frame.is_exhausted() {
                return Some((&frame.path, frame.pc, &frame.code[frame.pc]));
            }
        }
        None
    }

    /// 取出当前指令并前进
    ///
    /// 返回 `(帧路径, 指令下标, 指令)`。前进后耗尽的帧被弹出。
    pub fn pull(&mut self) -> Option<(NodePath, usize, Node)> {
        loop {
            let frame = self.frames.last_mut()?;
            if frame.is_exhausted() {
                self.frames.pop();
                continue;
            }

            let index = frame.pc;
            let node = frame.code[index].clone();
            let path = frame.path.clone();
            frame.pc += 1;
            if frame.is_exhausted() {
                self.frames.pop();
            }
            return Some((path, index, node));
        }
    }

    /// 是否没有任何帧能产出指令
    pub fn is_empty(&self) -> bool {
        self.peek().is_none()
    }

    /// 清空所有帧
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// 在栈底插回根帧
    ///
    /// 根帧耗尽弹出后又发生 jump 时使用；嵌套帧保持在上方继续执行。
    pub fn insert_root(&mut self, frame: Frame) -> Result<(), StackError> {
        if self.frames.iter().any(|f| f.path == frame.path) {
            return Err(StackError::DuplicateFrame {
                path: frame.path.clone(),
            });
        }
        self.frames.insert(0, frame);
        Ok(())
    }

    /// 帧列表，根帧在前（存档使用）
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// 根帧的可变引用（jump 指令使用）
    pub fn root_mut(&mut self) -> Option<&mut Frame> {
        self.frames.first_mut()
    }
}
