//! # Scene 模块
//!
//! 叙事方言：在通用解释器之上维护演出状态与菜单。
//!
//! ## 保留变量
//!
//! 全部演出状态都放在作用域的保留键下，因此随存档一起往返：
//!
//! - `state`：演出状态 `{name, text, background{image, position, color},
//!   sprites[], loop}`
//! - `yield`：真值时 [`Scene::next`] 的驱动循环交还控制权
//! - `menu`：当前菜单（`{id, label, path}` 列表）或 `null`
//!
//! ## 驱动方式
//!
//! 宿主在用户输入（点击、选择、计时器到期）时调用
//! [`Scene::next`] / [`Scene::pick`] / [`Scene::jump`]；
//! 解释器同步执行到下一个让出点。

use indexmap::IndexMap;

use crate::error::{EngineResult, ScriptError, ScriptErrorKind};
use crate::event::{Event, LogSink, SubscriptionId, EVENT_PLAY, EVENT_STOP, EVENT_WAIT};
use crate::node::{Node, NodePath};
use crate::parser::Document;

use super::script::{invalid_args, Script};

/// 演出状态的保留键
pub const STATE_KEY: &str = "state";
/// 让出标记的保留键
pub const YIELD_KEY: &str = "yield";
/// 菜单的保留键
pub const MENU_KEY: &str = "menu";

/// 菜单项（对宿主暴露的视图）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    /// 选项标识（标签的 camelCase 形式）
    pub id: String,
    /// 选项显示文本
    pub label: String,
}

/// 叙事方言解释器
///
/// 包装 [`Script`] 并在核心指令集之前拦截
/// `page` / `menu` / `play` / `stop` / `wait` / `show` / `hide`。
#[derive(Debug)]
pub struct Scene {
    script: Script,
}

impl Scene {
    /// 以指令列表构造场景
    pub fn new(source: Vec<Node>) -> Self {
        let mut script = Script::new(source);
        script.set_var(STATE_KEY, initial_state());
        script.set_var(YIELD_KEY, true);
        script.set_var(MENU_KEY, ());
        Self { script }
    }

    /// 从解析后的文档构造
    pub fn from_document(doc: &Document) -> Self {
        Self::new(doc.script.clone())
    }

    /// 脚本是否执行完毕
    pub fn is_done(&self) -> bool {
        self.script.is_done()
    }

    /// 读取变量
    pub fn get_var(&self, name: &str) -> Node {
        self.script.get_var(name)
    }

    /// 写入变量
    ///
    /// 订阅者可用 `set_var("yield", true)` 中止正在运行的 `next()` 循环。
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Node>) {
        self.script.set_var(name, value);
    }

    /// 当前演出状态
    pub fn state(&self) -> Node {
        self.script.get_var(STATE_KEY)
    }

    /// 注册事件监听器
    pub fn subscribe(&mut self, listener: impl FnMut(&Event) + 'static) -> SubscriptionId {
        self.script.subscribe(listener)
    }

    /// 退订
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.script.unsubscribe(id);
    }

    /// 替换 print 指令的日志落点
    pub fn set_log_sink(&mut self, sink: LogSink) {
        self.script.set_log_sink(sink);
    }

    /// 序列化当前状态（演出状态与菜单随作用域一起存档）
    pub fn save(&self) -> EngineResult<String> {
        self.script.save()
    }

    /// 从存档恢复
    pub fn load(&mut self, json: &str) -> EngineResult<()> {
        self.script.load(json)
    }

    /// 热更新脚本源
    pub fn patch(&mut self, new_source: Vec<Node>) -> EngineResult<()> {
        self.script.patch(new_source)
    }

    /// 跳转到根层标签
    pub fn jump(&mut self, label: &str) -> EngineResult<()> {
        self.script.jump(label)
    }

    /// 执行单条指令（方言指令集生效）
    pub fn step(&mut self) -> EngineResult<()> {
        self.script.step_with(dispatch)
    }

    /// 推进到下一个让出点
    ///
    /// 菜单激活时是空操作（必须先 [`Scene::pick`]）。开始时清空
    /// `name`/`text`，然后连续执行指令直到某条指令让出或脚本结束。
    pub fn next(&mut self) -> EngineResult<()> {
        if self.menu_entries().is_some() {
            return Ok(());
        }

        self.script.set_var(YIELD_KEY, false);
        update_state(&mut self.script, |state| {
            state.insert("name".to_string(), Node::Str(String::new()));
            state.insert("text".to_string(), Node::Str(String::new()));
        });

        while !self.yielded() && !self.script.is_done() {
            self.script.step_with(dispatch)?;
        }
        Ok(())
    }

    /// 选择菜单项
    ///
    /// 清除菜单，把选项的指令块压为新帧，然后继续 [`Scene::next`]。
    pub fn pick(&mut self, id: &str) -> EngineResult<()> {
        let entries = match self.script.get_var(MENU_KEY) {
            Node::List(entries) => entries,
            _ => return Err(ScriptError::new(ScriptErrorKind::NoMenu).into()),
        };

        let entry = entries
            .iter()
            .find_map(|entry| {
                let map = entry.as_map()?;
                if map.get("id")?.as_str() == Some(id) {
                    Some(map)
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                ScriptError::new(ScriptErrorKind::UnknownChoice { id: id.to_string() })
            })?;

        let path = entry
            .get("path")
            .and_then(NodePath::from_node)
            .ok_or_else(|| invalid_args("菜单项缺少有效的代码块路径"))?;
        let code = self
            .script
            .block_at(&path)
            .ok_or_else(|| invalid_args("菜单项指向的代码块在当前脚本中不存在"))?;

        self.script.set_var(MENU_KEY, ());
        if !code.is_empty() {
            self.script
                .stack_mut()
                .push(path, code)
                .map_err(ScriptError::from)?;
        }
        self.next()
    }

    /// 当前激活的菜单项，没有菜单时返回 `None`
    pub fn menu_entries(&self) -> Option<Vec<MenuEntry>> {
        match self.script.get_var(MENU_KEY) {
            Node::List(entries) => Some(
                entries
                    .iter()
                    .filter_map(|entry| {
                        let map = entry.as_map()?;
                        Some(MenuEntry {
                            id: map.get("id")?.as_str()?.to_string(),
                            label: map.get("label")?.as_str()?.to_string(),
                        })
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    fn yielded(&self) -> bool {
        self.script.get_var(YIELD_KEY).truthy()
    }
}

/// 初始演出状态
fn initial_state() -> Node {
    let mut background = IndexMap::new();
    background.insert("image".to_string(), Node::Null);
    background.insert("position".to_string(), Node::Str("center".to_string()));
    background.insert("color".to_string(), Node::Str("#333".to_string()));

    let mut state = IndexMap::new();
    state.insert("name".to_string(), Node::Str(String::new()));
    state.insert("text".to_string(), Node::Str(String::new()));
    state.insert("background".to_string(), Node::Map(background));
    state.insert("sprites".to_string(), Node::List(Vec::new()));
    state.insert("loop".to_string(), Node::Null);
    Node::Map(state)
}

/// 修改演出状态（读出-变换-写回）
fn update_state(script: &mut Script, f: impl FnOnce(&mut IndexMap<String, Node>)) {
    let mut state = match script.get_var(STATE_KEY) {
        Node::Map(map) => map,
        _ => match initial_state() {
            Node::Map(map) => map,
            _ => IndexMap::new(),
        },
    };
    f(&mut state);
    script.set_var(STATE_KEY, Node::Map(state));
}

//=============================================================================
// 方言指令集
//=============================================================================

fn dispatch(
    script: &mut Script,
    name: &str,
    args: &Node,
    path: &NodePath,
) -> Result<bool, ScriptError> {
    match name {
        "page" => exec_page(script, args)?,
        "menu" => exec_menu(script, args, path)?,
        "play" => exec_play(script, args)?,
        "stop" => exec_stop(script, args)?,
        "wait" => exec_wait(script, args)?,
        "show" => exec_show(script, args)?,
        "hide" => exec_hide(script, args)?,
        _ => return Ok(false),
    }
    Ok(true)
}

fn exec_page(script: &mut Script, args: &Node) -> Result<(), ScriptError> {
    let resolved = script.resolve(args)?;
    validate_page(&resolved)?;

    let mut state = script.get_var(STATE_KEY);
    if state.as_map().is_none() {
        state = initial_state();
    }
    deep_merge(&mut state, &resolved);
    script.set_var(STATE_KEY, state);

    // 紧随其后的 menu 指令与本页无缝衔接，不让出
    let next_is_menu = script.stack().peek().map_or(false, |(_, _, node)| {
        node.as_command().map_or(false, |(name, _)| name == "menu")
    });
    if !next_is_menu {
        script.set_var(YIELD_KEY, true);
    }
    Ok(())
}

/// 深合并：映射按键递归，列表与标量整体覆盖
fn deep_merge(target: &mut Node, patch: &Node) {
    match (target, patch) {
        (Node::Map(target_map), Node::Map(patch_map)) => {
            for (key, value) in patch_map {
                let merged = match target_map.get_mut(key) {
                    Some(slot) if slot.as_map().is_some() && value.as_map().is_some() => {
                        deep_merge(slot, value);
                        true
                    }
                    _ => false,
                };
                if !merged {
                    target_map.insert(key.clone(), value.clone());
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// 严格的深部分校验：只允许演出状态模式中出现的键与类型
fn validate_page(args: &Node) -> Result<(), ScriptError> {
    let map = args
        .as_map()
        .ok_or_else(|| invalid_args("page 需要映射参数（演出状态的部分字段）"))?;

    for (key, value) in map {
        match key.as_str() {
            "name" | "text" => {
                if value.as_str().is_none() {
                    return Err(invalid_args(format!("page.{} 必须是字符串", key)));
                }
            }
            "background" => validate_background(value)?,
            "sprites" => {
                let items = value
                    .as_list()
                    .ok_or_else(|| invalid_args("page.sprites 必须是列表"))?;
                for item in items {
                    validate_sprite(item, "page.sprites 的元素")?;
                }
            }
            "loop" => {
                if !value.is_null() && value.as_map().is_none() {
                    return Err(invalid_args("page.loop 必须是映射或 null"));
                }
            }
            other => {
                return Err(invalid_args(format!("page 不认识的字段 '{}'", other)));
            }
        }
    }
    Ok(())
}

fn validate_background(value: &Node) -> Result<(), ScriptError> {
    let map = value
        .as_map()
        .ok_or_else(|| invalid_args("page.background 必须是映射"))?;
    for (key, value) in map {
        match key.as_str() {
            "image" => {
                if !value.is_null() && value.as_str().is_none() {
                    return Err(invalid_args("page.background.image 必须是字符串或 null"));
                }
            }
            "position" | "color" => {
                if value.as_str().is_none() {
                    return Err(invalid_args(format!(
                        "page.background.{} 必须是字符串",
                        key
                    )));
                }
            }
            other => {
                return Err(invalid_args(format!(
                    "page.background 不认识的字段 '{}'",
                    other
                )));
            }
        }
    }
    Ok(())
}

fn validate_sprite(value: &Node, what: &str) -> Result<(), ScriptError> {
    let map = value
        .as_map()
        .ok_or_else(|| invalid_args(format!("{} 必须是映射", what)))?;
    match map.get("id") {
        Some(Node::Str(_)) => Ok(()),
        _ => Err(invalid_args(format!("{} 缺少字符串 id", what))),
    }
}

fn exec_menu(script: &mut Script, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
    let map = args
        .as_map()
        .ok_or_else(|| invalid_args("menu 需要 标签 → 指令块 的映射"))?;

    script.set_var(YIELD_KEY, true);

    let mut entries = Vec::with_capacity(map.len());
    let mut seen = std::collections::HashSet::new();
    for (label, block) in map {
        block
            .as_list()
            .ok_or_else(|| invalid_args(format!("menu 项 '{}' 必须是指令块", label)))?;

        let id = camel_case_id(label);
        if !seen.insert(id.clone()) {
            return Err(invalid_args(format!("menu 项 '{}' 的 id '{}' 重复", label, id)));
        }

        let mut entry = IndexMap::new();
        entry.insert("id".to_string(), Node::Str(id));
        entry.insert("label".to_string(), Node::Str(label.clone()));
        entry.insert(
            "path".to_string(),
            path.child_key("menu").child_key(label.clone()).to_node(),
        );
        entries.push(Node::Map(entry));
    }

    script.set_var(MENU_KEY, Node::List(entries));
    Ok(())
}

fn exec_play(script: &mut Script, args: &Node) -> Result<(), ScriptError> {
    let resolved = script.resolve(args)?;
    let map = resolved
        .as_map()
        .ok_or_else(|| invalid_args("play 需要映射参数 {path, volume?, rate?, loop?}"))?;

    for (key, value) in map {
        match key.as_str() {
            "path" => {
                if value.as_str().is_none() {
                    return Err(invalid_args("play.path 必须是字符串"));
                }
            }
            "volume" | "rate" => {
                if value.as_f64().is_none() {
                    return Err(invalid_args(format!("play.{} 必须是数值", key)));
                }
            }
            "loop" => {
                if !matches!(value, Node::Bool(_)) {
                    return Err(invalid_args("play.loop 必须是布尔值"));
                }
            }
            other => {
                return Err(invalid_args(format!("play 不认识的字段 '{}'", other)));
            }
        }
    }
    if map.get("path").is_none() {
        return Err(invalid_args("play 缺少 path 字段"));
    }

    let looping = map.get("loop").map_or(false, Node::truthy);
    script.emit(EVENT_PLAY, resolved.clone());
    if looping {
        update_state(script, |state| {
            state.insert("loop".to_string(), resolved);
        });
    }
    Ok(())
}

fn exec_stop(script: &mut Script, args: &Node) -> Result<(), ScriptError> {
    let resolved = script.resolve(args)?;
    match &resolved {
        Node::Null => {}
        Node::Map(map) => {
            for (key, value) in map {
                if key != "fade" {
                    return Err(invalid_args(format!("stop 不认识的字段 '{}'", key)));
                }
                if value.as_f64().is_none() {
                    return Err(invalid_args("stop.fade 必须是数值"));
                }
            }
        }
        other => {
            return Err(invalid_args(format!(
                "stop 需要映射参数 {{fade?}}，实际为 {}",
                other.type_name()
            )));
        }
    }

    update_state(script, |state| {
        state.insert("loop".to_string(), Node::Null);
    });
    script.emit(EVENT_STOP, resolved);
    Ok(())
}

fn exec_wait(script: &mut Script, args: &Node) -> Result<(), ScriptError> {
    let resolved = script.resolve(args)?;
    let map = resolved
        .as_map()
        .ok_or_else(|| invalid_args("wait 需要映射参数 {seconds}"))?;
    for key in map.keys() {
        if key != "seconds" {
            return Err(invalid_args(format!("wait 不认识的字段 '{}'", key)));
        }
    }
    match map.get("seconds") {
        Some(value) if value.as_f64().is_some() => {}
        _ => return Err(invalid_args("wait 缺少数值字段 seconds")),
    }

    // 计时由宿主负责：收到事件后在延时结束时再次调用 next()
    script.emit(EVENT_WAIT, resolved);
    script.set_var(YIELD_KEY, true);
    Ok(())
}

fn exec_show(script: &mut Script, args: &Node) -> Result<(), ScriptError> {
    let resolved = script.resolve(args)?;
    validate_sprite(&resolved, "show 的参数")?;
    let id = sprite_id(&resolved);

    update_state(script, |state| {
        let mut sprites = match state.get("sprites") {
            Some(Node::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        // 按 id 去重后置于最前
        sprites.retain(|sprite| sprite_id(sprite) != id);
        sprites.insert(0, resolved);
        state.insert("sprites".to_string(), Node::List(sprites));
    });
    Ok(())
}

fn exec_hide(script: &mut Script, args: &Node) -> Result<(), ScriptError> {
    let resolved = script.resolve(args)?;
    let map = resolved
        .as_map()
        .ok_or_else(|| invalid_args("hide 需要映射参数 {id}"))?;
    for key in map.keys() {
        if key != "id" {
            return Err(invalid_args(format!("hide 不认识的字段 '{}'", key)));
        }
    }
    let id = match map.get("id") {
        Some(Node::Str(id)) => id.clone(),
        _ => return Err(invalid_args("hide 缺少字符串 id")),
    };

    update_state(script, |state| {
        if let Some(Node::List(sprites)) = state.get_mut("sprites") {
            sprites.retain(|sprite| sprite_id(sprite) != Some(id.clone()));
        }
    });
    Ok(())
}

fn sprite_id(sprite: &Node) -> Option<String> {
    sprite
        .as_map()?
        .get("id")?
        .as_str()
        .map(str::to_string)
}

/// 标签转 camelCase 选项 id
///
/// 在字母数字边界分词，首词全小写，后续词首字母大写；
/// 小写后紧跟大写也视作分词点。
pub(crate) fn camel_case_id(label: &str) -> String {
    let mut out = String::new();
    let mut new_word = false;
    let mut prev_lower = false;

    for c in label.chars() {
        if !c.is_alphanumeric() {
            if !out.is_empty() {
                new_word = true;
            }
            prev_lower = false;
            continue;
        }

        let boundary = new_word || (prev_lower && c.is_uppercase());
        if !out.is_empty() && boundary {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        new_word = false;
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    out
}
