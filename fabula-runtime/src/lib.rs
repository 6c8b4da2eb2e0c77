//! # Fabula Runtime
//!
//! 视觉小说引擎的核心解释器库。
//!
//! ## 架构概述
//!
//! `fabula-runtime` 是纯逻辑核心，不依赖任何 IO 或渲染引擎。
//! 脚本以 YAML 书写，解释器逐条执行指令、维护可变作用域、向宿主
//! 推送语义事件，并支持跨会话存档与脚本热更新：
//!
//! ```text
//! YAML 文本 ──► Parser ──► Document {script, source_map}
//!                              │
//!                              ▼
//! Host ◄── 事件流/演出状态 ── Scene / Script ──► save()/load()/patch()
//!     └── next()/pick()/jump() ──┘
//! ```
//!
//! ## 核心类型
//!
//! - [`Node`]：脚本树的动态值（含 `!exp` 表达式与 `!fmt` 模板标签）
//! - [`Script`]：通用指令解释器（控制流、变量、事件、存档、热更新）
//! - [`Scene`]：叙事方言（页面、菜单、音频、立绘与演出状态）
//! - [`Stack`] / [`Frame`]：执行位置唯一存在的地方
//! - [`Scope`]：变量环境与表达式/模板渲染
//!
//! ## 使用示例
//!
//! ```ignore
//! use fabula_runtime::{Parser, Scene};
//!
//! let doc = Parser::parse(yaml_text)?;
//! let mut scene = Scene::from_document(&doc);
//!
//! scene.subscribe(|event| {
//!     // play / stop / wait / step / 自定义事件
//! });
//!
//! // 宿主按用户输入驱动
//! scene.next()?;
//! if let Some(entries) = scene.menu_entries() {
//!     scene.pick(&entries[0].id)?;
//! }
//!
//! // 存档随时可取，跨脚本版本可恢复
//! let save = scene.save()?;
//! scene.load(&save)?;
//! ```
//!
//! ## 模块结构
//!
//! - [`node`]：脚本树值类型与节点路径
//! - [`parser`]：YAML 前端（自定义标签、源码位置映射）
//! - [`expr`]：表达式引擎（词法、语法、求值、受限语句）
//! - [`scope`]：变量作用域与模板渲染
//! - [`stack`]：执行栈与热更新对齐
//! - [`diff`]：数组差分
//! - [`save`]：存档信封
//! - [`event`]：事件流与订阅
//! - [`runtime`]：解释器（[`Script`] 与 [`Scene`]）
//! - [`diagnostic`]：脚本静态检查
//! - [`error`]：错误类型定义

pub mod diagnostic;
pub mod diff;
pub mod error;
pub mod event;
pub mod expr;
pub mod node;
pub mod parser;
pub mod save;
pub mod scope;
pub mod stack;

pub mod runtime;

// 重导出核心类型
pub use diagnostic::{analyze, Diagnostic, DiagnosticLevel, DiagnosticResult};
pub use error::{EngineError, EngineResult, ParseError, ScriptError, ScriptErrorKind, StackError};
pub use event::{Event, SubscriptionId};
pub use expr::EvalError;
pub use node::{Node, NodePath, PathSeg};
pub use parser::{Document, Parser, SourceMap, SourcePos};
pub use save::{SaveData, SaveVersion};
pub use scope::Scope;
pub use stack::{Frame, Stack};

pub use runtime::scene::{MenuEntry, Scene};
pub use runtime::script::Script;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // 验证所有公共类型都可以正常使用
        let _node = Node::command("print", "你好");
        let _path = NodePath::root().child_index(0);
        let _event = Event::new("step", ());
        let _scope = Scope::new();
        let _script = Script::new(Vec::new());
        let _scene = Scene::new(Vec::new());
    }
}
