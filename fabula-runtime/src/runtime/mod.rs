//! # Runtime 模块
//!
//! 解释器本体。
//!
//! - [`script`]：通用指令解释器（控制流、变量、事件、存档、热更新）
//! - [`scene`]：叙事方言（页面、菜单、音频、立绘与演出状态）

pub mod scene;
pub mod script;
