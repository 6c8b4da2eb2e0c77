//! # Parser 模块
//!
//! YAML 前端：把脚本文本解析为节点树，并附带源码位置映射。
//!
//! ## 架构
//!
//! ```text
//! 原始文本 → [loader: 带标记事件流] → (根节点, 位置表) → [文档模式校验] → Document
//! ```
//!
//! ## 文档模式
//!
//! 顶层是一个映射：
//!
//! ```yaml
//! config:        # 可选，宿主自定义
//!   title: ...
//! script:        # 必填，指令列表
//!   - print: "你好"
//!   - label: start
//! ```
//!
//! 每条指令是单键映射，键为指令名。两个自定义标签 `!exp` 与 `!fmt`
//! 把标量包装为表达式/模板节点。
//!
//! ## 位置映射
//!
//! [`SourceMap::trace`] 以**相对于 script 列表**的节点路径反查
//! `(行, 列)`，与脚本错误、存档帧携带的路径使用同一坐标系。

mod loader;

use std::collections::HashMap;

use crate::error::ParseError;
use crate::node::{Node, NodePath, PathSeg};

/// 源码位置（行列均从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

/// 节点路径 → 源码位置 的映射
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    positions: HashMap<NodePath, SourcePos>,
}

impl SourceMap {
    /// 反查路径对应的源码位置
    pub fn trace(&self, path: &NodePath) -> Option<SourcePos> {
        self.positions.get(path).copied()
    }

    /// 已记录的位置数量
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// 解析后的脚本文档
#[derive(Debug, Clone)]
pub struct Document {
    /// 宿主自定义配置（原样透传）
    pub config: Option<Node>,
    /// 脚本指令列表
    pub script: Vec<Node>,
    /// 源码位置映射（script 相对路径）
    source_map: SourceMap,
}

impl Document {
    /// 源码位置映射
    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    /// 反查脚本内路径对应的源码位置
    pub fn trace(&self, path: &NodePath) -> Option<SourcePos> {
        self.source_map.trace(path)
    }
}

/// 脚本解析器
pub struct Parser;

impl Parser {
    /// 解析脚本文本
    ///
    /// # 返回
    ///
    /// 校验过模式的 [`Document`]，或带位置的解析错误
    pub fn parse(text: &str) -> Result<Document, ParseError> {
        let (root, positions) = loader::load(text)?;
        validate_document(root, positions)
    }
}

/// 在位置表中查路径，查不到退回文档开头
fn position_of(positions: &HashMap<NodePath, SourcePos>, path: &NodePath) -> SourcePos {
    positions
        .get(path)
        .copied()
        .unwrap_or(SourcePos { line: 1, column: 1 })
}

fn schema_error(
    positions: &HashMap<NodePath, SourcePos>,
    path: &NodePath,
    message: impl Into<String>,
) -> ParseError {
    let pos = position_of(positions, path);
    ParseError::Schema {
        line: pos.line,
        column: pos.column,
        message: message.into(),
    }
}

fn validate_document(
    root: Node,
    positions: HashMap<NodePath, SourcePos>,
) -> Result<Document, ParseError> {
    let root_path = NodePath::root();
    let mut map = match root {
        Node::Map(map) => map,
        other => {
            return Err(schema_error(
                &positions,
                &root_path,
                format!("文档顶层必须是映射，实际为 {}", other.type_name()),
            ));
        }
    };

    for key in map.keys() {
        if key != "config" && key != "script" {
            return Err(schema_error(
                &positions,
                &root_path.child_key(key.clone()),
                format!("未知的顶层键 '{}'（只允许 config 与 script）", key),
            ));
        }
    }

    let config = map.shift_remove("config");
    let script_path = root_path.child_key("script");
    let script = match map.shift_remove("script") {
        Some(Node::List(items)) => items,
        Some(other) => {
            return Err(schema_error(
                &positions,
                &script_path,
                format!("script 必须是指令列表，实际为 {}", other.type_name()),
            ));
        }
        None => {
            return Err(schema_error(&positions, &root_path, "缺少顶层键 'script'"));
        }
    };

    // 每条指令必须是单键映射
    for (index, node) in script.iter().enumerate() {
        if node.as_command().is_none() {
            return Err(schema_error(
                &positions,
                &script_path.child_index(index),
                format!(
                    "第 {} 条指令必须是单键映射（键为指令名），实际为 {}",
                    index + 1,
                    node.type_name()
                ),
            ));
        }
    }

    // 位置表换算到 script 相对路径
    let mut relative = HashMap::new();
    for (path, pos) in positions {
        let segments = path.segments();
        if let Some((PathSeg::Key(head), rest)) = segments.split_first() {
            if head == "script" {
                relative.insert(NodePath::from_segments(rest.to_vec()), pos);
            }
        }
    }

    Ok(Document {
        config,
        script,
        source_map: SourceMap { positions: relative },
    })
}
