//! # Script 模块
//!
//! 通用指令解释器：组合作用域、执行栈与事件流。
//!
//! ## 执行模型
//!
//! ```text
//! step() = pull 一条指令 → 派发执行 → 成功后发出 step 事件
//! ```
//!
//! 控制流指令压入新帧（if 分支）或重定位根帧计数器（jump）；
//! 执行位置只存在于栈中，因此随时可以存档、读档与热更新。
//!
//! ## 指令集
//!
//! | 指令 | 参数 | 语义 |
//! |---|---|---|
//! | `if` | `{cond, then?, else?}` | 条件为真压入 then 块，否则压入 else 块 |
//! | `label` | 字符串 | 空操作，jump 的目标 |
//! | `jump` | 字符串 | 根帧计数器跳到同名 label |
//! | `eval` | 字符串 | 执行受限赋值语句块（`this.x = ...`） |
//! | `print` | 标量 | 解析后写入宿主日志落点 |
//! | `throw` | 标量 | 以解析后的文本抛出脚本错误 |
//! | `set` | `{name, value}` | 写入作用域变量 |
//! | `emit` | `{type, data?}` | 向订阅者发出自定义事件 |
//!
//! 方言（如 [`super::scene`]）通过 [`Script::step_with`] 在核心指令
//! 之前拦截自己的指令。

use crate::error::{EngineError, EngineResult, ScriptError, ScriptErrorKind};
use crate::event::{default_log_sink, Event, LogSink, SubscriptionId, Subscribers, EVENT_STEP};
use crate::node::{Node, NodePath};
use crate::parser::Document;
use crate::save::SaveData;
use crate::scope::Scope;
use crate::stack::{Frame, Stack};

/// 方言拦截钩子
///
/// 返回 `Ok(true)` 表示指令已被方言处理；`Ok(false)` 交还核心指令集。
pub(crate) type DialectHook = fn(&mut Script, &str, &Node, &NodePath) -> Result<bool, ScriptError>;

fn no_dialect(_: &mut Script, _: &str, _: &Node, _: &NodePath) -> Result<bool, ScriptError> {
    Ok(false)
}

/// 通用指令解释器
pub struct Script {
    /// 脚本源（恒为列表节点，空路径即指向它）
    source: Node,
    /// 执行栈
    stack: Stack,
    /// 变量作用域
    scope: Scope,
    /// 事件订阅者
    subscribers: Subscribers,
    /// print 指令的日志落点
    log: LogSink,
}

impl Script {
    /// 以指令列表构造解释器，并把它压为根帧
    pub fn new(source: Vec<Node>) -> Self {
        let mut stack = Stack::new();
        if let Err(err) = stack.push(NodePath::root(), source.clone()) {
            unreachable!("空栈压入根帧失败: {err}");
        }
        Self {
            source: Node::List(source),
            stack,
            scope: Scope::new(),
            subscribers: Subscribers::new(),
            log: default_log_sink(),
        }
    }

    /// 从解析后的文档构造
    pub fn from_document(doc: &Document) -> Self {
        Self::new(doc.script.clone())
    }

    /// 脚本是否执行完毕
    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// 读取变量，未定义返回 `null`
    pub fn get_var(&self, name: &str) -> Node {
        self.scope.get(name)
    }

    /// 写入变量
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Node>) {
        self.scope.set(name, value);
    }

    /// 作用域（只读）
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// 执行栈（只读，方言与测试使用）
    pub(crate) fn stack(&self) -> &Stack {
        &self.stack
    }

    /// 执行栈（可变，方言压入菜单块使用）
    pub(crate) fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// 按路径在脚本源中取指令块
    pub(crate) fn block_at(&self, path: &NodePath) -> Option<Vec<Node>> {
        self.source
            .locate(path)
            .and_then(Node::as_list)
            .map(<[Node]>::to_vec)
    }

    /// 替换 print 指令的日志落点
    pub fn set_log_sink(&mut self, sink: LogSink) {
        self.log = sink;
    }

    /// 注册事件监听器，返回退订句柄
    pub fn subscribe(&mut self, listener: impl FnMut(&Event) + 'static) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    /// 退订
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    /// 向所有订阅者同步发出事件
    pub fn emit(&mut self, kind: impl Into<String>, data: impl Into<Node>) {
        let event = Event::new(kind, data);
        self.subscribers.emit(&event);
    }

    //-------------------------------------------------------------------------
    // 存档 / 读档 / 热更新
    //-------------------------------------------------------------------------

    /// 序列化当前状态为 JSON 存档
    pub fn save(&self) -> EngineResult<String> {
        let data = self.save_data();
        data.to_json().map_err(|err| {
            EngineError::from(ScriptErrorKind::SaveFailed {
                message: err.to_string(),
            })
        })
    }

    fn save_data(&self) -> SaveData {
        SaveData::new(self.scope.dump().clone(), self.stack.frames())
    }

    /// 从 JSON 存档恢复状态
    ///
    /// 事务性：任何结构或引用检查失败都不会改动现有状态。
    /// 路径在当前脚本源中已不存在的帧被静默丢弃；找到的帧先以
    /// 存档代码恢复，再用当前代码热更新对齐计数器。
    pub fn load(&mut self, json: &str) -> EngineResult<()> {
        let data = SaveData::from_json(json)
            .ok_or_else(|| EngineError::from(ScriptErrorKind::BrokenSave))?;
        self.load_data(data)
    }

    fn load_data(&mut self, data: SaveData) -> EngineResult<()> {
        let scope = Scope::from_map(data.scope);
        let mut stack = Stack::new();

        for saved in data.stack {
            let current = match self.source.locate(&saved.path).and_then(Node::as_list) {
                Some(code) => code.to_vec(),
                None => {
                    tracing::warn!(
                        target: "fabula::script",
                        path = %saved.path,
                        "存档帧的代码块在当前脚本中不存在，丢弃"
                    );
                    continue;
                }
            };
            let mut frame = Frame::restored(saved.path, saved.code, saved.program_counter);
            frame.patch(current);
            stack
                .push_frame(frame)
                .map_err(|_| EngineError::from(ScriptErrorKind::BrokenSave))?;
        }

        self.scope = scope;
        self.stack = stack;
        Ok(())
    }

    /// 热更新脚本源
    ///
    /// 等价于 `save(); source = new_source; load()`：作用域保持不变，
    /// 所有帧按新旧代码的差分平移计数器。
    pub fn patch(&mut self, new_source: Vec<Node>) -> EngineResult<()> {
        let data = self.save_data();
        self.source = Node::List(new_source);
        self.load_data(data)
    }

    //-------------------------------------------------------------------------
    // 执行
    //-------------------------------------------------------------------------

    /// 执行一条指令
    ///
    /// 脚本已结束时是空操作。成功后发出 `step` 事件（数据为指令的
    /// 节点路径）；失败时错误携带该路径，且不发出 `step`。
    pub fn step(&mut self) -> EngineResult<()> {
        self.step_with(no_dialect)
    }

    /// 带方言钩子的执行（方言实现使用）
    pub(crate) fn step_with(&mut self, dialect: DialectHook) -> EngineResult<()> {
        let (frame_path, index, node) = match self.stack.pull() {
            Some(pulled) => pulled,
            None => return Ok(()),
        };
        let path = frame_path.child_index(index);

        self.exec(&node, &path, dialect)
            .map_err(|err| EngineError::Script(err.locate(&path)))?;

        let event = Event::new(EVENT_STEP, path.to_node());
        self.subscribers.emit(&event);
        Ok(())
    }

    /// 跳转到根层的同名 label
    ///
    /// 重定位根帧的程序计数器；栈为空时先重新压入根帧。
    pub fn jump(&mut self, label: &str) -> EngineResult<()> {
        self.jump_inner(label).map_err(EngineError::Script)
    }

    fn jump_inner(&mut self, label: &str) -> Result<(), ScriptError> {
        let index = self.find_label(label).ok_or_else(|| {
            ScriptError::new(ScriptErrorKind::UnknownLabel {
                label: label.to_string(),
            })
        })?;

        // 根帧 = 代码为脚本源本身的帧（空路径）。栈为空或根帧已被
        // 弹出时，把它压回栈底再重定位。
        let has_root = self
            .stack
            .frames()
            .first()
            .map_or(false, |frame| frame.path().is_empty());
        if !has_root {
            let code = self.source_code().to_vec();
            self.stack.insert_root(Frame::new(NodePath::root(), code))?;
        }
        if let Some(root) = self.stack.root_mut() {
            root.jump_to(index);
        }
        tracing::debug!(target: "fabula::script", label, index, "jump");
        Ok(())
    }

    fn find_label(&self, label: &str) -> Option<usize> {
        self.source_code().iter().position(|node| {
            node.as_command()
                .map_or(false, |(name, args)| name == "label" && args.as_str() == Some(label))
        })
    }

    fn source_code(&self) -> &[Node] {
        match &self.source {
            Node::List(items) => items,
            // 构造时恒为列表
            _ => &[],
        }
    }

    /// 解析参数中的标签值：表达式求值、模板渲染，递归进入容器
    pub(crate) fn resolve(&self, node: &Node) -> Result<Node, ScriptError> {
        match node {
            Node::Exp(src) => Ok(self.scope.render_expression(src)?),
            Node::Fmt(src) => Ok(Node::Str(self.scope.render_template(src)?)),
            Node::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.resolve(item)?);
                }
                Ok(Node::List(out))
            }
            Node::Map(map) => {
                let mut out = indexmap::IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve(value)?);
                }
                Ok(Node::Map(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// 解析为标量并取其字符串形式（print/throw 等指令用）
    fn resolve_text(&self, node: &Node, command: &str) -> Result<String, ScriptError> {
        let value = self.resolve(node)?;
        match value {
            Node::List(_) | Node::Map(_) => Err(invalid_args(format!(
                "{} 需要标量参数，实际为 {}",
                command,
                value.type_name()
            ))),
            other => Ok(other.display_string()),
        }
    }

    fn exec(&mut self, node: &Node, path: &NodePath, dialect: DialectHook) -> Result<(), ScriptError> {
        let (name, args) = node.as_command().ok_or_else(|| {
            ScriptError::new(ScriptErrorKind::MalformedCommand {
                actual: node.type_name().to_string(),
            })
        })?;
        tracing::debug!(target: "fabula::script", command = name, path = %path, "exec");

        // 方言优先
        if dialect(self, name, args, path)? {
            return Ok(());
        }

        match name {
            "if" => self.exec_if(args, path),
            "label" => {
                args.as_str()
                    .ok_or_else(|| invalid_args("label 需要字符串参数"))?;
                Ok(())
            }
            "jump" => {
                let label = args
                    .as_str()
                    .ok_or_else(|| invalid_args("jump 需要字符串参数"))?;
                self.jump_inner(label)
            }
            "eval" => {
                let src = args
                    .as_str()
                    .ok_or_else(|| invalid_args("eval 需要字符串参数"))?;
                self.scope.execute(src)?;
                Ok(())
            }
            "print" => {
                let message = self.resolve_text(args, "print")?;
                (self.log)(&message);
                Ok(())
            }
            "throw" => {
                let message = self.resolve_text(args, "throw")?;
                Err(ScriptError::new(ScriptErrorKind::Thrown { message }))
            }
            "set" => self.exec_set(args),
            "emit" => self.exec_emit(args),
            other => Err(ScriptError::new(ScriptErrorKind::UnknownCommand {
                command: other.to_string(),
            })),
        }
    }

    fn exec_if(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let map = args
            .as_map()
            .ok_or_else(|| invalid_args("if 需要映射参数 {cond, then?, else?}"))?;
        for key in map.keys() {
            if key != "cond" && key != "then" && key != "else" {
                return Err(invalid_args(format!("if 不认识的参数 '{}'", key)));
            }
        }
        let cond = map
            .get("cond")
            .ok_or_else(|| invalid_args("if 缺少 cond 参数"))?;

        let truthy = self.resolve(cond)?.truthy();
        let branch_key = if truthy { "then" } else { "else" };

        if let Some(branch) = map.get(branch_key) {
            let code = branch.as_list().ok_or_else(|| {
                invalid_args(format!("if.{} 必须是指令列表", branch_key))
            })?;
            if !code.is_empty() {
                let branch_path = path.child_key("if").child_key(branch_key);
                self.stack.push(branch_path, code.to_vec())?;
            }
        }
        Ok(())
    }

    fn exec_set(&mut self, args: &Node) -> Result<(), ScriptError> {
        let map = args
            .as_map()
            .ok_or_else(|| invalid_args("set 需要映射参数 {name, value}"))?;
        for key in map.keys() {
            if key != "name" && key != "value" {
                return Err(invalid_args(format!("set 不认识的参数 '{}'", key)));
            }
        }
        let name = map
            .get("name")
            .and_then(Node::as_str)
            .ok_or_else(|| invalid_args("set 的 name 必须是字符串"))?
            .to_string();
        let value = map
            .get("value")
            .ok_or_else(|| invalid_args("set 缺少 value 参数"))?;

        let value = self.resolve(value)?;
        self.scope.set(name, value);
        Ok(())
    }

    fn exec_emit(&mut self, args: &Node) -> Result<(), ScriptError> {
        let map = args
            .as_map()
            .ok_or_else(|| invalid_args("emit 需要映射参数 {type, data?}"))?;
        for key in map.keys() {
            if key != "type" && key != "data" {
                return Err(invalid_args(format!("emit 不认识的参数 '{}'", key)));
            }
        }
        let kind = map
            .get("type")
            .and_then(Node::as_str)
            .ok_or_else(|| invalid_args("emit 的 type 必须是字符串"))?
            .to_string();
        let data = match map.get("data") {
            Some(data) => self.resolve(data)?,
            None => Node::Null,
        };

        self.emit(kind, data);
        Ok(())
    }
}

pub(crate) fn invalid_args(message: impl Into<String>) -> ScriptError {
    ScriptError::new(ScriptErrorKind::InvalidArgs {
        message: message.into(),
    })
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("stack", &self.stack)
            .field("scope", &self.scope)
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// 捕获 print 输出的测试落点
    fn capture_log(script: &mut Script) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        script.set_log_sink(Box::new(move |message| {
            sink.borrow_mut().push(message.to_string());
        }));
        log
    }

    fn prints(names: &[&str]) -> Vec<Node> {
        names.iter().map(|n| Node::command("print", *n)).collect()
    }

    #[test]
    fn test_fresh_script_done_iff_empty() {
        assert!(Script::new(Vec::new()).is_done());
        assert!(!Script::new(prints(&["A"])).is_done());
    }

    #[test]
    fn test_sequential_print() {
        let mut script = Script::new(prints(&["A", "B", "C"]));
        let log = capture_log(&mut script);

        let steps = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&steps);
        script.subscribe(move |event| {
            if event.kind == "step" {
                *counter.borrow_mut() += 1;
            }
        });

        script.step().unwrap();
        script.step().unwrap();
        script.step().unwrap();

        assert_eq!(*log.borrow(), vec!["A", "B", "C"]);
        assert!(script.is_done());
        assert_eq!(*steps.borrow(), 3);

        // 结束后 step 是空操作，也不再发事件
        script.step().unwrap();
        assert_eq!(*steps.borrow(), 3);
    }

    #[test]
    fn test_if_else_with_expression() {
        let branch = |label: &str| vec![Node::command("print", label)];
        let source = vec![Node::command("if", {
            let mut map = indexmap::IndexMap::new();
            map.insert("cond".to_string(), Node::Exp("x > 0".to_string()));
            map.insert("then".to_string(), Node::List(branch("P")));
            map.insert("else".to_string(), Node::List(branch("N")));
            Node::Map(map)
        })];

        let mut script = Script::new(source.clone());
        let log = capture_log(&mut script);
        script.set_var("x", 1i64);
        script.step().unwrap();
        script.step().unwrap();
        assert_eq!(*log.borrow(), vec!["P"]);
        assert!(script.is_done());

        let mut script = Script::new(source);
        let log = capture_log(&mut script);
        script.set_var("x", -1i64);
        script.step().unwrap();
        script.step().unwrap();
        assert_eq!(*log.borrow(), vec!["N"]);
        assert!(script.is_done());
    }

    #[test]
    fn test_jump_resolution() {
        let source = vec![
            Node::command("label", "start"),
            Node::command("jump", "hello"),
            Node::command("label", "world"),
            Node::command("print", "W"),
            Node::command("jump", "start"),
            Node::command("label", "hello"),
            Node::command("print", "H"),
            Node::command("jump", "world"),
        ];
        let mut script = Script::new(source);
        let log = capture_log(&mut script);

        // label start / jump hello / label hello / print H
        for _ in 0..4 {
            script.step().unwrap();
        }
        assert_eq!(*log.borrow(), vec!["H"]);

        // jump world / label world / print W
        for _ in 0..3 {
            script.step().unwrap();
        }
        assert_eq!(*log.borrow(), vec!["H", "W"]);

        // jump start / label start：控制权回到开头
        script.step().unwrap();
        script.step().unwrap();
        assert!(!script.is_done());
    }

    #[test]
    fn test_unknown_label_is_error() {
        let mut script = Script::new(vec![Node::command("jump", "nowhere")]);
        let err = script.step().unwrap_err();
        match err {
            EngineError::Script(err) => {
                assert!(matches!(err.kind, ScriptErrorKind::UnknownLabel { .. }));
                assert_eq!(err.path.to_string(), "$[0]");
            }
            other => panic!("应为脚本错误: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command() {
        let mut script = Script::new(vec![Node::command("frobnicate", 1i64)]);

        let steps = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&steps);
        script.subscribe(move |_| *counter.borrow_mut() += 1);

        let err = script.step().unwrap_err();
        match err {
            EngineError::Script(err) => {
                assert_eq!(err.kind.to_string(), "Unknown command: frobnicate");
            }
            other => panic!("应为脚本错误: {:?}", other),
        }
        // 失败的 step 不发事件
        assert_eq!(*steps.borrow(), 0);
    }

    #[test]
    fn test_set_and_eval_commands() {
        let source = vec![
            Node::command("set", {
                let mut map = indexmap::IndexMap::new();
                map.insert("name".to_string(), Node::Str("x".to_string()));
                map.insert("value".to_string(), Node::Exp("1 + 1".to_string()));
                Node::Map(map)
            }),
            Node::command("eval", "this.y = x * 10"),
        ];
        let mut script = Script::new(source);
        script.step().unwrap();
        script.step().unwrap();

        assert_eq!(script.get_var("x"), Node::Int(2));
        assert_eq!(script.get_var("y"), Node::Int(20));
    }

    #[test]
    fn test_throw_command() {
        let mut script = Script::new(vec![Node::command("throw", Node::Fmt("坏了: {{x}}".to_string()))]);
        script.set_var("x", 7i64);

        let err = script.step().unwrap_err();
        match err {
            EngineError::Script(err) => {
                assert_eq!(err.kind.to_string(), "坏了: 7");
            }
            other => panic!("应为脚本错误: {:?}", other),
        }
    }

    #[test]
    fn test_emit_command_and_unsubscribe() {
        let mut script = Script::new(vec![Node::command("emit", {
            let mut map = indexmap::IndexMap::new();
            map.insert("type".to_string(), Node::Str("custom".to_string()));
            map.insert("data".to_string(), Node::Exp("x".to_string()));
            Node::Map(map)
        })]);
        script.set_var("x", 5i64);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = script.subscribe(move |event| {
            sink.borrow_mut().push((event.kind.clone(), event.data.clone()));
        });

        script.step().unwrap();
        {
            let seen = seen.borrow();
            // custom 事件在 step 事件之前（emit 在指令内发生）
            assert_eq!(seen[0], ("custom".to_string(), Node::Int(5)));
            assert_eq!(seen[1].0, "step");
        }

        script.unsubscribe(id);
        script.emit("after", ());
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_invalid_args_message() {
        let mut script = Script::new(vec![Node::command("set", "不是映射")]);
        let err = script.step().unwrap_err();
        match err {
            EngineError::Script(err) => {
                assert!(matches!(err.kind, ScriptErrorKind::InvalidArgs { .. }));
            }
            other => panic!("应为脚本错误: {:?}", other),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut script = Script::new(prints(&["A", "B", "C"]));
        let log = capture_log(&mut script);
        script.set_var("x", 42i64);
        script.step().unwrap();

        let save = script.save().unwrap();

        // 继续执行
        script.step().unwrap();
        assert_eq!(*log.borrow(), vec!["A", "B"]);

        // 读档回到 step 一次之后
        script.load(&save).unwrap();
        assert_eq!(script.get_var("x"), Node::Int(42));
        let log = capture_log(&mut script);
        script.step().unwrap();
        script.step().unwrap();
        assert_eq!(*log.borrow(), vec!["B", "C"]);
        assert!(script.is_done());
    }

    #[test]
    fn test_load_idempotent() {
        let mut script = Script::new(prints(&["A", "B"]));
        script.step().unwrap();
        let save = script.save().unwrap();

        script.load(&save).unwrap();
        let once = script.save().unwrap();
        script.load(&save).unwrap();
        let twice = script.save().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_load_broken_save_is_transactional() {
        let mut script = Script::new(prints(&["A", "B"]));
        script.set_var("x", 1i64);
        script.step().unwrap();

        let err = script.load("{\"垃圾\": true}").unwrap_err();
        match err {
            EngineError::Script(err) => {
                assert_eq!(
                    err.kind.to_string(),
                    "Error loading save - it may be broken or unsupported."
                );
            }
            other => panic!("应为脚本错误: {:?}", other),
        }

        // 状态未被破坏
        assert_eq!(script.get_var("x"), Node::Int(1));
        let log = capture_log(&mut script);
        script.step().unwrap();
        assert_eq!(*log.borrow(), vec!["B"]);
    }

    #[test]
    fn test_save_patch_load_across_scripts() {
        // 场景 4：旧版执行一步后的存档在扩写后的新版上继续
        let mut old = Script::new(prints(&["A", "B", "C"]));
        let log = capture_log(&mut old);
        old.step().unwrap();
        assert_eq!(*log.borrow(), vec!["A"]);
        let save = old.save().unwrap();

        let mut new = Script::new(prints(&["A", "B", "C1", "C2", "D"]));
        let log = capture_log(&mut new);
        new.load(&save).unwrap();
        while !new.is_done() {
            new.step().unwrap();
        }
        assert_eq!(*log.borrow(), vec!["B", "C1", "C2", "D"]);
    }

    #[test]
    fn test_patch_preserves_current_instruction() {
        let mut script = Script::new(prints(&["A", "B", "C"]));
        let log = capture_log(&mut script);
        script.step().unwrap();

        // 编辑只影响 pc 之后的指令
        script.patch(prints(&["A", "B", "X"])).unwrap();
        script.step().unwrap();
        assert_eq!(*log.borrow(), vec!["A", "B"]);

        // 编辑发生在 pc 之前，pc 平移
        script.patch(prints(&["新", "A", "B", "X"])).unwrap();
        script.step().unwrap();
        assert_eq!(*log.borrow(), vec!["A", "B", "X"]);
        assert!(script.is_done());
    }

    #[test]
    fn test_patch_keeps_nested_frame() {
        // 嵌套帧的路径在新源中依然存在时，热更新保留它
        let then_block = vec![
            Node::command("print", "T1"),
            Node::command("print", "T2"),
        ];
        let make_source = |tail: &str| {
            vec![
                Node::command("if", {
                    let mut map = indexmap::IndexMap::new();
                    map.insert("cond".to_string(), Node::Bool(true));
                    map.insert("then".to_string(), Node::List(then_block.clone()));
                    Node::Map(map)
                }),
                Node::command("print", tail),
            ]
        };

        let mut script = Script::new(make_source("尾"));
        let log = capture_log(&mut script);
        script.step().unwrap(); // if → 压入 then 帧
        script.step().unwrap(); // T1
        assert_eq!(*log.borrow(), vec!["T1"]);

        script.patch(make_source("新尾")).unwrap();
        script.step().unwrap(); // T2
        script.step().unwrap(); // 新尾
        assert_eq!(*log.borrow(), vec!["T1", "T2", "新尾"]);
    }

    #[test]
    fn test_load_drops_vanished_frames() {
        // 存档中有嵌套帧，新源里该路径不存在 → 帧被静默丢弃
        let source = vec![Node::command("if", {
            let mut map = indexmap::IndexMap::new();
            map.insert("cond".to_string(), Node::Bool(true));
            map.insert(
                "then".to_string(),
                Node::List(prints(&["T1", "T2"])),
            );
            Node::Map(map)
        })];
        let mut script = Script::new(source);
        script.step().unwrap(); // 压入 then 帧
        let save = script.save().unwrap();

        let mut other = Script::new(prints(&["A"]));
        other.load(&save).unwrap();
        let log = capture_log(&mut other);
        while !other.is_done() {
            other.step().unwrap();
        }
        // 只剩根帧（已在 if 之后耗尽），then 帧被丢弃
        assert_eq!(*log.borrow(), Vec::<String>::new());
    }

    #[test]
    fn test_jump_from_nested_frame_reroots() {
        // 根帧耗尽弹出后，嵌套块里的 jump 把根帧压回栈底再重定位
        let source = vec![
            Node::command("label", "top"),
            Node::command("if", {
                let mut map = indexmap::IndexMap::new();
                map.insert("cond".to_string(), Node::Exp("x == 0".to_string()));
                map.insert(
                    "then".to_string(),
                    Node::List(vec![
                        Node::command("set", {
                            let mut set = indexmap::IndexMap::new();
                            set.insert("name".to_string(), Node::Str("x".to_string()));
                            set.insert("value".to_string(), Node::Int(1));
                            Node::Map(set)
                        }),
                        Node::command("jump", "top"),
                    ]),
                );
                Node::Map(map)
            }),
        ];

        let mut script = Script::new(source);
        script.set_var("x", 0i64);

        let mut guard = 0;
        while !script.is_done() {
            script.step().unwrap();
            guard += 1;
            assert!(guard < 20, "脚本没有收敛");
        }
        assert_eq!(script.get_var("x"), Node::Int(1));
    }

    #[test]
    fn test_infinite_jump_loop_never_raises() {
        let source = vec![
            Node::command("label", "loop"),
            Node::command("jump", "loop"),
        ];
        let mut script = Script::new(source);
        for _ in 0..100 {
            script.step().unwrap();
        }
        assert!(!script.is_done());
    }
}
