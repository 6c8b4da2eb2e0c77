//! # Scope 模块
//!
//! 变量环境与表达式/模板渲染。
//!
//! ## 设计说明
//!
//! - 变量是动态类型的 [`Node`]；读取未定义变量返回 `null`，从不报错
//! - 表达式渲染时每个变量名都可以直接引用；保留名 `vars`（及 `this`）
//!   暴露整个映射，供非法标识符用 `vars["..."]` 访问
//! - 模板是对 `{{ 表达式 }}` 片段的非贪婪文本替换

use std::collections::HashMap;

use crate::expr::{self, EvalContext, EvalContextMut, EvalError};
use crate::node::Node;

/// 变量作用域
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    vars: HashMap<String, Node>,
}

impl Scope {
    /// 创建空作用域
    pub fn new() -> Self {
        Self::default()
    }

    /// 从映射构造（读档使用）
    pub fn from_map(vars: HashMap<String, Node>) -> Self {
        Self { vars }
    }

    /// 读取变量，未定义返回 `null`
    pub fn get(&self, name: &str) -> Node {
        self.vars.get(name).cloned().unwrap_or(Node::Null)
    }

    /// 写入变量
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Node>) {
        self.vars.insert(name.into(), value.into());
    }

    /// 整个映射（存档使用）
    pub fn dump(&self) -> &HashMap<String, Node> {
        &self.vars
    }

    /// 清空所有变量
    pub fn clear(&mut self) {
        self.vars.clear();
    }

    /// 把 `src` 当作单个表达式求值，返回任意节点值
    pub fn render_expression(&self, src: &str) -> Result<Node, EvalError> {
        let expr = expr::parse_expression(src)?;
        expr::evaluate(&expr, self)
    }

    /// 渲染模板：替换每个非贪婪匹配的 `{{ 表达式 }}` 片段
    ///
    /// 没有配对 `}}` 的 `{{` 原样保留；第一个内部求值失败即返回错误。
    pub fn render_template(&self, src: &str) -> Result<String, EvalError> {
        let mut out = String::with_capacity(src.len());
        let mut rest = src;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let value = self.render_expression(&after[..end])?;
                    out.push_str(&value.display_string());
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                    break;
                }
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    /// 执行受限赋值语句块（eval 指令）
    pub fn execute(&mut self, src: &str) -> Result<(), EvalError> {
        expr::execute_block(src, self)
    }
}

impl EvalContext for Scope {
    fn get_var(&self, name: &str) -> Option<Node> {
        self.vars.get(name).cloned()
    }

    fn vars(&self) -> Node {
        // 快照按键排序，保证确定性
        let mut keys: Vec<_> = self.vars.keys().collect();
        keys.sort();
        let mut map = indexmap::IndexMap::with_capacity(keys.len());
        for key in keys {
            map.insert(key.clone(), self.vars[key].clone());
        }
        Node::Map(map)
    }
}

impl EvalContextMut for Scope {
    fn set_var(&mut self, name: &str, value: Node) {
        self.vars.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unknown_is_null() {
        let scope = Scope::new();
        assert_eq!(scope.get("missing"), Node::Null);
    }

    #[test]
    fn test_set_get_clear() {
        let mut scope = Scope::new();
        scope.set("x", 1i64);
        scope.set("name", "Ava");
        assert_eq!(scope.get("x"), Node::Int(1));
        assert_eq!(scope.get("name"), Node::Str("Ava".to_string()));

        scope.clear();
        assert_eq!(scope.get("x"), Node::Null);
        assert!(scope.dump().is_empty());
    }

    #[test]
    fn test_render_expression() {
        let mut scope = Scope::new();
        scope.set("x", 2i64);
        assert_eq!(scope.render_expression("x * 3").unwrap(), Node::Int(6));
        assert_eq!(
            scope.render_expression("x > 0").unwrap(),
            Node::Bool(true)
        );

        // 表达式内未定义的顶层标识符是错误
        assert!(scope.render_expression("y + 1").is_err());
        // 语法错误
        assert!(scope.render_expression("x +").is_err());
    }

    #[test]
    fn test_render_template() {
        let mut scope = Scope::new();
        scope.set("name", "Ava");
        scope.set("n", 3i64);

        assert_eq!(
            scope.render_template("你好 {{name}}，第 {{n}} 次").unwrap(),
            "你好 Ava，第 3 次"
        );
        // 表达式片段
        assert_eq!(scope.render_template("{{n * 2}}").unwrap(), "6");
        // 无占位符原样返回
        assert_eq!(scope.render_template("纯文本").unwrap(), "纯文本");
        // 未配对的 {{ 原样保留
        assert_eq!(scope.render_template("a {{ b").unwrap(), "a {{ b");
    }

    #[test]
    fn test_render_template_multiline_and_non_greedy() {
        let mut scope = Scope::new();
        scope.set("a", 1i64);
        scope.set("b", 2i64);

        // 非贪婪：两个占位符各自独立
        assert_eq!(scope.render_template("{{a}}-{{b}}").unwrap(), "1-2");
        // 跨行文本
        assert_eq!(
            scope.render_template("x\n{{a}}\ny").unwrap(),
            "x\n1\ny"
        );
    }

    #[test]
    fn test_template_stringify_law() {
        // renderTemplate("{{X}}") == stringify(renderExpression("X"))
        let mut scope = Scope::new();
        scope.set("s", "字符串");
        scope.set("i", 42i64);
        scope.set("f", 1.5f64);
        scope.set("b", true);
        scope.set("nil", ());

        for name in ["s", "i", "f", "b", "nil"] {
            let template = scope.render_template(&format!("{{{{{}}}}}", name)).unwrap();
            let value = scope.render_expression(name).unwrap();
            assert_eq!(template, value.display_string());
        }
    }

    #[test]
    fn test_template_error_propagates() {
        let scope = Scope::new();
        assert!(scope.render_template("前缀 {{missing}} 后缀").is_err());
    }

    #[test]
    fn test_execute_mutates_scope() {
        let mut scope = Scope::new();
        scope.set("x", 1i64);
        scope.execute("this.x = x + 1; this.greeting = \"hi\"").unwrap();
        assert_eq!(scope.get("x"), Node::Int(2));
        assert_eq!(scope.get("greeting"), Node::Str("hi".to_string()));
    }
}
