//! # Save 模块
//!
//! 存档数据模型。
//!
//! ## 设计原则
//!
//! - 存档是 UTF-8 JSON 字符串，结构即对外契约
//! - 信封带版本号：major 不同即不兼容，minor 允许向后兼容的新字段
//! - 标签值（表达式/模板）通过 `__class` 判别字段往返（见 [`crate::node`]）
//!
//! ## 存档结构
//!
//! ```json
//! { "version": { "major": 1, "minor": 0 },
//!   "scope": { "变量名": "值", ... },
//!   "stack": [
//!     { "path": [], "code": [...], "programCounter": 1 },
//!     ... ] }
//! ```
//!
//! `path` 是帧代码块在脚本源中的节点路径，根帧为 `[]`；读档时据此
//! 在当前脚本源中重新定位代码并做热更新对齐。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodePath};
use crate::stack::Frame;

/// 存档格式版本
pub const SAVE_VERSION_MAJOR: u32 = 1;
pub const SAVE_VERSION_MINOR: u32 = 0;

/// 存档版本信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveVersion {
    pub major: u32,
    pub minor: u32,
}

impl SaveVersion {
    /// 当前版本
    pub fn current() -> Self {
        Self {
            major: SAVE_VERSION_MAJOR,
            minor: SAVE_VERSION_MINOR,
        }
    }

    /// 检查是否兼容
    ///
    /// 兼容规则：major 必须相同，minor 可以不同。
    pub fn is_compatible(&self) -> bool {
        self.major == SAVE_VERSION_MAJOR
    }
}

impl Default for SaveVersion {
    fn default() -> Self {
        Self::current()
    }
}

/// 存档中的一帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFrame {
    /// 代码块在脚本源中的路径
    pub path: NodePath,
    /// 存档时刻的代码块
    pub code: Vec<Node>,
    /// 程序计数器
    #[serde(rename = "programCounter")]
    pub program_counter: usize,
}

impl From<&Frame> for SavedFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            path: frame.path().clone(),
            code: frame.code().to_vec(),
            program_counter: frame.pc(),
        }
    }
}

/// 存档数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveData {
    /// 存档格式版本
    #[serde(default)]
    pub version: SaveVersion,
    /// 变量作用域
    pub scope: HashMap<String, Node>,
    /// 执行栈，根帧在前
    pub stack: Vec<SavedFrame>,
}

impl SaveData {
    /// 从运行状态构造
    pub fn new(scope: HashMap<String, Node>, frames: &[Frame]) -> Self {
        Self {
            version: SaveVersion::current(),
            scope,
            stack: frames.iter().map(SavedFrame::from).collect(),
        }
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从 JSON 字符串反序列化并检查版本兼容性
    ///
    /// 结构损坏或版本不兼容均返回 `None`，由调用方映射为脚本错误。
    pub fn from_json(json: &str) -> Option<Self> {
        let data: SaveData = serde_json::from_str(json).ok()?;
        if !data.version.is_compatible() {
            return None;
        }
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(SaveVersion::current().is_compatible());
        assert!(SaveVersion { major: 1, minor: 9 }.is_compatible());
        assert!(!SaveVersion { major: 2, minor: 0 }.is_compatible());
    }

    #[test]
    fn test_round_trip_with_tagged_values() {
        let mut scope = HashMap::new();
        scope.insert("x".to_string(), Node::Int(1));

        let frame = Frame::new(
            NodePath::root(),
            vec![
                Node::command("print", Node::Fmt("{{x}}".to_string())),
                Node::command("set", Node::Exp("x + 1".to_string())),
            ],
        );
        let data = SaveData::new(scope, &[frame]);

        let json = data.to_json().unwrap();
        assert!(json.contains("\"programCounter\":0"));
        assert!(json.contains("\"__class\":\"ScriptFmt\""));

        let back = SaveData::from_json(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_broken_json_rejected() {
        assert!(SaveData::from_json("不是 JSON").is_none());
        assert!(SaveData::from_json("{\"scope\": {}}").is_none());
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let json = r#"{"version": {"major": 99, "minor": 0}, "scope": {}, "stack": []}"#;
        assert!(SaveData::from_json(json).is_none());
    }

    #[test]
    fn test_unknown_class_in_code_rejected() {
        let json = r#"{"version": {"major": 1, "minor": 0}, "scope": {},
            "stack": [{"path": [], "code": [{"__class": "Weird", "source": "x"}], "programCounter": 0}]}"#;
        assert!(SaveData::from_json(json).is_none());
    }
}
