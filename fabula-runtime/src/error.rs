//! # Error 模块
//!
//! 定义 fabula-runtime 中使用的错误类型。
//!
//! ## 错误分层
//!
//! - [`ParseError`]：YAML 解析 / 结构校验失败，携带源码 `(行, 列)`
//! - [`ScriptError`]：解释执行期失败，携带节点路径（可经 SourceMap 反查位置）
//! - [`StackError`]：执行栈不变量被破坏（程序员错误），对宿主以脚本错误呈现
//! - [`EvalError`]：表达式求值失败（见 [`crate::expr`]），并入脚本错误

use thiserror::Error;

use crate::expr::EvalError;
use crate::node::NodePath;

/// 解析错误
///
/// 所有变体都携带 1-based 的 `(line, column)` 源码位置。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// YAML 词法/语法错误（来自底层扫描器）
    #[error("第 {line} 行第 {column} 列：YAML 语法错误 - {message}")]
    Scan {
        line: usize,
        column: usize,
        message: String,
    },

    /// 文档结构不符合脚本模式
    #[error("第 {line} 行第 {column} 列：结构错误 - {message}")]
    Schema {
        line: usize,
        column: usize,
        message: String,
    },

    /// 未知的自定义标签（只支持 !exp 与 !fmt）
    #[error("第 {line} 行第 {column} 列：未知标签 '!{tag}'")]
    UnknownTag {
        line: usize,
        column: usize,
        tag: String,
    },

    /// 自定义标签只能作用于标量
    #[error("第 {line} 行第 {column} 列：标签 '!{tag}' 只能作用于标量")]
    TagOnCollection {
        line: usize,
        column: usize,
        tag: String,
    },

    /// 别名引用了不存在的锚点
    #[error("第 {line} 行第 {column} 列：别名引用了未定义的锚点")]
    UnknownAnchor { line: usize, column: usize },
}

impl ParseError {
    /// 错误的源码位置 `(line, column)`
    pub fn position(&self) -> (usize, usize) {
        match self {
            Self::Scan { line, column, .. }
            | Self::Schema { line, column, .. }
            | Self::UnknownTag { line, column, .. }
            | Self::TagOnCollection { line, column, .. }
            | Self::UnknownAnchor { line, column } => (*line, *column),
        }
    }
}

/// 脚本错误的具体种类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptErrorKind {
    /// 未知指令
    ///
    /// 消息格式是对外契约的一部分，保持英文原样。
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    /// 指令节点本身不合法（不是单键映射）
    #[error("指令必须是单键映射，实际为 {actual}")]
    MalformedCommand { actual: String },

    /// 指令参数不符合模式
    #[error("参数不合法：{message}")]
    InvalidArgs { message: String },

    /// 跳转目标不存在
    #[error("标签 '{label}' 未找到")]
    UnknownLabel { label: String },

    /// 菜单选项不存在
    #[error("菜单选项 '{id}' 不存在")]
    UnknownChoice { id: String },

    /// 当前没有激活的菜单
    #[error("当前没有激活的菜单")]
    NoMenu,

    /// 脚本主动抛出（throw 指令）
    #[error("{message}")]
    Thrown { message: String },

    /// 存档损坏或不兼容
    ///
    /// 消息格式是对外契约的一部分，保持英文原样。
    #[error("Error loading save - it may be broken or unsupported.")]
    BrokenSave,

    /// 存档序列化失败
    #[error("存档序列化失败：{message}")]
    SaveFailed { message: String },

    /// 表达式求值失败
    #[error("表达式求值失败：{0}")]
    Eval(#[from] EvalError),

    /// 执行栈不变量被破坏
    #[error("执行栈错误：{0}")]
    Stack(#[from] StackError),
}

/// 脚本错误
///
/// 携带出错指令在脚本源中的节点路径，宿主可配合
/// [`crate::parser::SourceMap::trace`] 反查 `(行, 列)`。
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}（位于 {path}）")]
pub struct ScriptError {
    /// 错误种类
    pub kind: ScriptErrorKind,
    /// 出错指令的节点路径（无法定位时为空路径）
    pub path: NodePath,
}

impl ScriptError {
    /// 创建不带位置的脚本错误
    pub fn new(kind: impl Into<ScriptErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            path: NodePath::root(),
        }
    }

    /// 创建带节点路径的脚本错误
    pub fn at(kind: impl Into<ScriptErrorKind>, path: NodePath) -> Self {
        Self {
            kind: kind.into(),
            path,
        }
    }

    /// 如果尚未定位，补上节点路径
    pub fn locate(mut self, path: &NodePath) -> Self {
        if self.path.is_empty() {
            self.path = path.clone();
        }
        self
    }
}

impl From<ScriptErrorKind> for ScriptError {
    fn from(kind: ScriptErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<EvalError> for ScriptError {
    fn from(err: EvalError) -> Self {
        Self::new(ScriptErrorKind::Eval(err))
    }
}

impl From<StackError> for ScriptError {
    fn from(err: StackError) -> Self {
        Self::new(ScriptErrorKind::Stack(err))
    }
}

/// 执行栈错误
///
/// 这些错误意味着引擎内部不变量被破坏，属于程序员错误而非脚本作者错误。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StackError {
    /// 同一代码块被重复压栈
    #[error("代码块 {path} 已在栈上")]
    DuplicateFrame { path: NodePath },
}

/// fabula-runtime 统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// 解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),

    /// 脚本错误
    #[error("脚本错误: {0}")]
    Script(#[from] ScriptError),
}

impl From<ScriptErrorKind> for EngineError {
    fn from(kind: ScriptErrorKind) -> Self {
        Self::Script(ScriptError::new(kind))
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodePath;

    #[test]
    fn test_script_error_locate() {
        let err = ScriptError::new(ScriptErrorKind::UnknownCommand {
            command: "foo".to_string(),
        });
        assert!(err.path.is_empty());

        let path = NodePath::root().child_index(2);
        let located = err.locate(&path);
        assert_eq!(located.path, path);

        // 已定位的错误不会被覆盖
        let other = NodePath::root().child_index(9);
        let relocated = located.locate(&other);
        assert_eq!(relocated.path, path);
    }

    #[test]
    fn test_pinned_messages() {
        // 两条消息是对外契约，必须保持原文
        let err = ScriptErrorKind::UnknownCommand {
            command: "foo".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown command: foo");

        let err = ScriptErrorKind::BrokenSave;
        assert_eq!(
            err.to_string(),
            "Error loading save - it may be broken or unsupported."
        );
    }

    #[test]
    fn test_parse_error_position() {
        let err = ParseError::Schema {
            line: 3,
            column: 5,
            message: "x".to_string(),
        };
        assert_eq!(err.position(), (3, 5));
    }
}
