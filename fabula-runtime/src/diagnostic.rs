//! # 诊断模块
//!
//! 脚本静态检查 API，不依赖 IO 与解释器。
//!
//! ## 设计原则
//!
//! - 纯函数 API，输入是解析后的指令列表
//! - 诊断分级：Error（必须修复）、Warn（建议修复）、Info（信息提示）
//! - 诊断携带节点路径，宿主可配合 [`crate::parser::SourceMap::trace`]
//!   换算为源码行列

use std::collections::{HashMap, HashSet};

use crate::node::{Node, NodePath};

/// 诊断级别
///
/// 按严重程度排序，宿主可以用 `>=` 做阈值过滤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    /// 仅供参考，不影响脚本执行
    Info,
    /// 能执行，但多半是作者笔误
    Warn,
    /// 执行到相应指令必然失败
    Error,
}

impl DiagnosticLevel {
    /// 显示名称
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 诊断条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 诊断级别
    pub level: DiagnosticLevel,
    /// 相关指令的节点路径（如果可定位）
    pub path: Option<NodePath>,
    /// 诊断消息
    pub message: String,
    /// 诊断详情（可选）
    pub detail: Option<String>,
}

impl Diagnostic {
    /// 创建错误诊断
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            path: None,
            message: message.into(),
            detail: None,
        }
    }

    /// 创建警告诊断
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warn,
            path: None,
            message: message.into(),
            detail: None,
        }
    }

    /// 设置路径
    pub fn with_path(mut self, path: NodePath) -> Self {
        self.path = Some(path);
        self
    }

    /// 设置详情
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.level)?;
        if let Some(path) = &self.path {
            write!(f, " {}", path)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\n  | {}", detail)?;
        }
        Ok(())
    }
}

/// 诊断结果
#[derive(Debug, Clone, Default)]
pub struct DiagnosticResult {
    /// 诊断条目列表
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticResult {
    /// 创建空结果
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加诊断
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// 错误数量
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    /// 警告数量
    pub fn warn_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warn)
            .count()
    }

    /// 是否有错误
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// 跳转引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpTarget {
    /// 目标标签
    pub label: String,
    /// jump 指令的节点路径
    pub path: NodePath,
}

/// 收集根层定义的所有标签（标签名 → 指令下标）
pub fn collect_labels(source: &[Node]) -> HashMap<String, usize> {
    let mut labels = HashMap::new();
    for (index, node) in source.iter().enumerate() {
        if let Some(("label", Node::Str(name))) = node.as_command() {
            labels.entry(name.clone()).or_insert(index);
        }
    }
    labels
}

/// 收集所有跳转引用，递归进入 if 分支与 menu 选项块
pub fn collect_jump_targets(source: &[Node]) -> Vec<JumpTarget> {
    let mut targets = Vec::new();
    collect_jumps_in_block(source, &NodePath::root(), &mut targets);
    targets
}

fn collect_jumps_in_block(block: &[Node], base: &NodePath, out: &mut Vec<JumpTarget>) {
    for (index, node) in block.iter().enumerate() {
        let (name, args) = match node.as_command() {
            Some(command) => command,
            None => continue,
        };
        let path = base.child_index(index);

        match (name, args) {
            ("jump", Node::Str(label)) => {
                out.push(JumpTarget {
                    label: label.clone(),
                    path,
                });
            }
            ("if", Node::Map(map)) => {
                for branch in ["then", "else"] {
                    if let Some(Node::List(inner)) = map.get(branch) {
                        let inner_path = path.child_key("if").child_key(branch);
                        collect_jumps_in_block(inner, &inner_path, out);
                    }
                }
            }
            ("menu", Node::Map(map)) => {
                for (label, entry) in map {
                    if let Node::List(inner) = entry {
                        let inner_path = path.child_key("menu").child_key(label.clone());
                        collect_jumps_in_block(inner, &inner_path, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// 收集 play 指令引用的音频路径（宿主预加载用）
///
/// 只收集字面字符串；表达式/模板在运行期才有值，跳过。
pub fn collect_audio_references(source: &[Node]) -> Vec<String> {
    let mut refs = Vec::new();
    collect_audio_in_block(source, &mut refs);
    refs
}

fn collect_audio_in_block(block: &[Node], out: &mut Vec<String>) {
    for node in block {
        let (name, args) = match node.as_command() {
            Some(command) => command,
            None => continue,
        };
        match (name, args) {
            ("play", Node::Map(map)) => {
                if let Some(Node::Str(path)) = map.get("path") {
                    if !out.contains(path) {
                        out.push(path.clone());
                    }
                }
            }
            ("if", Node::Map(map)) => {
                for branch in ["then", "else"] {
                    if let Some(Node::List(inner)) = map.get(branch) {
                        collect_audio_in_block(inner, out);
                    }
                }
            }
            ("menu", Node::Map(map)) => {
                for entry in map.values() {
                    if let Node::List(inner) = entry {
                        collect_audio_in_block(inner, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// 分析脚本，返回诊断结果
///
/// 执行以下检查：
///
/// - 未定义的跳转目标（错误）
/// - 重复定义的标签（警告）
/// - 菜单选项 id 冲突（错误，运行期会失败）
/// - 空菜单（警告，运行期无法选择）
pub fn analyze(source: &[Node]) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();

    // 标签重复定义
    let mut seen_labels = HashSet::new();
    for (index, node) in source.iter().enumerate() {
        if let Some(("label", Node::Str(name))) = node.as_command() {
            if !seen_labels.insert(name.clone()) {
                result.push(
                    Diagnostic::warn(format!("标签 '{}' 重复定义", name))
                        .with_path(NodePath::root().child_index(index)),
                );
            }
        }
    }

    // 未定义的跳转目标
    let labels = collect_labels(source);
    for target in collect_jump_targets(source) {
        if !labels.contains_key(&target.label) {
            result.push(
                Diagnostic::error(format!("未定义的跳转目标 '{}'", target.label))
                    .with_detail("jump 引用了不存在的根层 label".to_string())
                    .with_path(target.path),
            );
        }
    }

    // 菜单检查
    check_menus_in_block(source, &NodePath::root(), &mut result);

    result
}

fn check_menus_in_block(block: &[Node], base: &NodePath, result: &mut DiagnosticResult) {
    for (index, node) in block.iter().enumerate() {
        let (name, args) = match node.as_command() {
            Some(command) => command,
            None => continue,
        };
        let path = base.child_index(index);

        match (name, args) {
            ("menu", Node::Map(map)) => {
                if map.is_empty() {
                    result.push(
                        Diagnostic::warn("菜单没有任何选项，运行期将无法继续")
                            .with_path(path.clone()),
                    );
                }
                let mut ids = HashSet::new();
                for (label, entry) in map {
                    let id = crate::runtime::scene::camel_case_id(label);
                    if !ids.insert(id.clone()) {
                        result.push(
                            Diagnostic::error(format!(
                                "菜单选项 '{}' 的 id '{}' 与其他选项冲突",
                                label, id
                            ))
                            .with_path(path.clone()),
                        );
                    }
                    if let Node::List(inner) = entry {
                        let inner_path = path.child_key("menu").child_key(label.clone());
                        check_menus_in_block(inner, &inner_path, result);
                    }
                }
            }
            ("if", Node::Map(map)) => {
                for branch in ["then", "else"] {
                    if let Some(Node::List(inner)) = map.get(branch) {
                        let inner_path = path.child_key("if").child_key(branch);
                        check_menus_in_block(inner, &inner_path, result);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn map(entries: Vec<(&str, Node)>) -> Node {
        let mut out = IndexMap::new();
        for (key, value) in entries {
            out.insert(key.to_string(), value);
        }
        Node::Map(out)
    }

    fn sample_source() -> Vec<Node> {
        vec![
            Node::command("label", "start"),
            Node::command(
                "if",
                map(vec![
                    ("cond", Node::Exp("x > 0".to_string())),
                    (
                        "then",
                        Node::List(vec![Node::command("jump", "missing")]),
                    ),
                ]),
            ),
            Node::command(
                "menu",
                map(vec![
                    ("去 A", Node::List(vec![Node::command("jump", "start")])),
                    ("去 B", Node::List(Vec::new())),
                ]),
            ),
            Node::command(
                "play",
                map(vec![("path", Node::Str("bgm/theme.ogg".to_string()))]),
            ),
        ]
    }

    #[test]
    fn test_collect_labels() {
        let labels = collect_labels(&sample_source());
        assert_eq!(labels.get("start"), Some(&0));
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn test_collect_jump_targets_recurses() {
        let targets = collect_jump_targets(&sample_source());
        let labels: Vec<&str> = targets.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["missing", "start"]);

        // if 分支内的 jump 带完整路径
        assert_eq!(targets[0].path.to_string(), "$[1].if.then[0]");
        assert_eq!(targets[1].path.to_string(), "$[2].menu.去 A[0]");
    }

    #[test]
    fn test_analyze_reports_missing_target() {
        let result = analyze(&sample_source());
        assert!(result.has_errors());
        let error = result
            .diagnostics
            .iter()
            .find(|d| d.level == DiagnosticLevel::Error)
            .unwrap();
        assert!(error.message.contains("missing"));
    }

    #[test]
    fn test_analyze_clean_script() {
        let source = vec![
            Node::command("label", "start"),
            Node::command("print", "你好"),
            Node::command("jump", "start"),
        ];
        let result = analyze(&source);
        assert!(result.is_empty());
    }

    #[test]
    fn test_analyze_duplicate_labels() {
        let source = vec![
            Node::command("label", "x"),
            Node::command("label", "x"),
        ];
        let result = analyze(&source);
        assert_eq!(result.warn_count(), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_analyze_menu_issues() {
        let source = vec![Node::command(
            "menu",
            map(vec![
                ("Label A", Node::List(Vec::new())),
                ("label a", Node::List(Vec::new())),
            ]),
        )];
        let result = analyze(&source);
        // 两个标签 camelCase 后 id 冲突
        assert!(result.has_errors());

        let empty = vec![Node::command("menu", map(Vec::new()))];
        let result = analyze(&empty);
        assert_eq!(result.warn_count(), 1);
    }

    #[test]
    fn test_collect_audio_references() {
        let refs = collect_audio_references(&sample_source());
        assert_eq!(refs, vec!["bgm/theme.ogg".to_string()]);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error("坏了")
            .with_path(NodePath::root().child_index(3))
            .with_detail("细节");
        let text = diag.to_string();
        assert!(text.contains("ERROR"));
        assert!(text.contains("$[3]"));
        assert!(text.contains("细节"));
    }
}
