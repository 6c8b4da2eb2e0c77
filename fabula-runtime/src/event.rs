//! # Event 模块
//!
//! 解释器向宿主推送的语义事件流。
//!
//! ## 设计原则
//!
//! - **声明式**：事件描述"发生了什么"，不描述"怎么呈现"
//! - **同步派发**：`emit` 返回前按注册顺序调用完所有订阅者
//! - 订阅者只读事件，不得重入解释器（借用规则天然保证）

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// 每次成功执行一条指令后发出的事件类型
pub const EVENT_STEP: &str = "step";
/// 音频播放事件类型
pub const EVENT_PLAY: &str = "play";
/// 音频停止事件类型
pub const EVENT_STOP: &str = "stop";
/// 定时等待事件类型
pub const EVENT_WAIT: &str = "wait";

/// 解释器事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 事件类型
    #[serde(rename = "type")]
    pub kind: String,
    /// 事件数据，形状随类型而定
    pub data: Node,
}

impl Event {
    /// 创建事件
    pub fn new(kind: impl Into<String>, data: impl Into<Node>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }
}

/// 订阅者句柄，用于退订
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 事件监听器
pub type Listener = Box<dyn FnMut(&Event)>;

/// 订阅者注册表
///
/// 按注册顺序派发；退订以句柄定位，迭代期间的退订对后续事件生效。
#[derive(Default)]
pub struct Subscribers {
    entries: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl Subscribers {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器，返回退订句柄
    pub fn subscribe(&mut self, listener: impl FnMut(&Event) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(listener)));
        id
    }

    /// 退订。句柄无效时静默忽略
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    /// 按注册顺序派发事件
    pub fn emit(&mut self, event: &Event) {
        for (_, listener) in &mut self.entries {
            listener(event);
        }
    }

    /// 当前订阅者数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否没有订阅者
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// print 指令的日志落点
pub type LogSink = Box<dyn FnMut(&str)>;

/// 默认日志落点：转发到 tracing
pub fn default_log_sink() -> LogSink {
    Box::new(|message| {
        tracing::info!(target: "fabula::script", "{}", message);
    })
}
