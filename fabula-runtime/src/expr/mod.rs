//! # 表达式模块
//!
//! 脚本逻辑系统的表达式引擎：词法、语法与求值。
//!
//! ## 设计原则
//!
//! - 求值是**确定性**的纯函数，不依赖 IO 或真实时间
//! - 语义向 JavaScript 靠拢（脚本作者按 JS 直觉书写）：
//!   短路逻辑返回操作数本身、`+` 遇字符串做拼接、除法总是浮点、
//!   缺失的属性/下标读出 `null`
//! - 顶层未定义标识符是错误；属性缺失不是
//!
//! ## 受限语句语法
//!
//! `eval` 指令不执行宿主语言代码，只接受受控的赋值语句序列
//! （`this.X = 表达式`，`;` 或换行分隔），见 [`execute_block`]。

mod lexer;
mod parser;

use thiserror::Error;

use crate::node::Node;

pub use parser::{parse_expression, parse_program};

/// 表达式求值错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// 语法错误
    #[error("表达式位置 {pos}：{message}")]
    Parse { pos: usize, message: String },

    /// 顶层变量未定义
    #[error("变量 '{name}' 未定义")]
    UndefinedVariable { name: String },

    /// 类型不匹配
    #[error("类型不匹配：期望 {expected}，实际 {actual}（{context}）")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
        context: String,
    },

    /// 赋值目标不合法
    #[error("无法赋值：{message}")]
    BadAssignment { message: String },
}

/// 表达式 AST
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// 字面量
    Literal(Node),
    /// 标识符（`this` / `vars` 指向整个作用域）
    Ident(String),
    /// 属性访问 `a.b`
    Member(Box<Expr>, String),
    /// 下标访问 `a[i]`
    Index(Box<Expr>, Box<Expr>),
    /// 一元运算
    Unary(UnaryOp, Box<Expr>),
    /// 二元运算
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// 列表字面量
    List(Vec<Expr>),
    /// 对象字面量
    Object(Vec<(String, Expr)>),
}

/// 一元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `+`
    Pos,
    /// `!`
    Not,
}

/// 二元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// 赋值目标的一段
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSeg {
    /// `.name`
    Member(String),
    /// `[表达式]`
    Index(Expr),
}

/// 赋值语句：`this<path> = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    /// `this` / `vars` 之后的目标路径（非空）
    pub path: Vec<TargetSeg>,
    /// 右侧表达式
    pub value: Expr,
}

/// 求值上下文：提供变量查找
pub trait EvalContext {
    /// 读取变量，未定义返回 None
    fn get_var(&self, name: &str) -> Option<Node>;

    /// 整个作用域的映射快照（`vars` / `this` 标识符求值用）
    fn vars(&self) -> Node;
}

/// 可变求值上下文：语句块执行用
pub trait EvalContextMut: EvalContext {
    /// 写入变量
    fn set_var(&mut self, name: &str, value: Node);
}

/// 对表达式求值
pub fn evaluate<C: EvalContext>(expr: &Expr, ctx: &C) -> Result<Node, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Ident(name) => {
            if name == "vars" || name == "this" {
                return Ok(ctx.vars());
            }
            ctx.get_var(name)
                .ok_or_else(|| EvalError::UndefinedVariable { name: name.clone() })
        }

        Expr::Member(object, name) => {
            let object = evaluate(object, ctx)?;
            member(&object, name)
        }

        Expr::Index(object, index) => {
            let object = evaluate(object, ctx)?;
            let index = evaluate(index, ctx)?;
            indexed(&object, &index)
        }

        Expr::Unary(op, inner) => {
            let value = evaluate(inner, ctx)?;
            unary(*op, value)
        }

        Expr::Binary(BinOp::And, left, right) => {
            // 短路：返回操作数本身
            let left = evaluate(left, ctx)?;
            if !left.truthy() {
                return Ok(left);
            }
            evaluate(right, ctx)
        }

        Expr::Binary(BinOp::Or, left, right) => {
            let left = evaluate(left, ctx)?;
            if left.truthy() {
                return Ok(left);
            }
            evaluate(right, ctx)
        }

        Expr::Binary(op, left, right) => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            binary(*op, left, right)
        }

        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, ctx)?);
            }
            Ok(Node::List(values))
        }

        Expr::Object(entries) => {
            let mut map = indexmap::IndexMap::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate(value, ctx)?);
            }
            Ok(Node::Map(map))
        }
    }
}

/// 将表达式求值为真值（if 指令的条件用）
pub fn evaluate_truthy<C: EvalContext>(expr: &Expr, ctx: &C) -> Result<bool, EvalError> {
    Ok(evaluate(expr, ctx)?.truthy())
}

/// 执行赋值语句块（eval 指令）
pub fn execute_block<C: EvalContextMut>(src: &str, ctx: &mut C) -> Result<(), EvalError> {
    let program = parse_program(src)?;
    for assign in &program {
        run_assign(assign, ctx)?;
    }
    Ok(())
}

fn run_assign<C: EvalContextMut>(assign: &Assign, ctx: &mut C) -> Result<(), EvalError> {
    // 目标路径的每一段先解析为具体键
    let mut keys = Vec::with_capacity(assign.path.len());
    for seg in &assign.path {
        keys.push(match seg {
            TargetSeg::Member(name) => AssignKey::Key(name.clone()),
            TargetSeg::Index(expr) => match evaluate(expr, &*ctx)? {
                Node::Str(s) => AssignKey::Key(s),
                Node::Int(i) if i >= 0 => AssignKey::Index(i as usize),
                other => {
                    return Err(EvalError::BadAssignment {
                        message: format!("下标必须是字符串或非负整数，实际为 {}", other.type_name()),
                    });
                }
            },
        });
    }

    let value = evaluate(&assign.value, &*ctx)?;

    // 第一段决定作用域变量名，其余段写入该变量的内部
    let (root, rest) = match keys.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };
    let root_name = match root {
        AssignKey::Key(name) => name.clone(),
        AssignKey::Index(_) => {
            return Err(EvalError::BadAssignment {
                message: "作用域变量名必须是字符串".to_string(),
            });
        }
    };

    if rest.is_empty() {
        ctx.set_var(&root_name, value);
        return Ok(());
    }

    let mut current = ctx.get_var(&root_name).unwrap_or(Node::Null);
    assign_into(&mut current, rest, value)?;
    ctx.set_var(&root_name, current);
    Ok(())
}

enum AssignKey {
    Key(String),
    Index(usize),
}

fn assign_into(target: &mut Node, keys: &[AssignKey], value: Node) -> Result<(), EvalError> {
    let (key, rest) = match keys.split_first() {
        Some(split) => split,
        None => {
            *target = value;
            return Ok(());
        }
    };

    match (target, key) {
        (Node::Map(map), AssignKey::Key(k)) => {
            let slot = map.entry(k.clone()).or_insert(Node::Null);
            assign_into(slot, rest, value)
        }
        (Node::List(items), AssignKey::Index(i)) => {
            if *i < items.len() {
                assign_into(&mut items[*i], rest, value)
            } else if *i == items.len() && rest.is_empty() {
                items.push(value);
                Ok(())
            } else {
                Err(EvalError::BadAssignment {
                    message: format!("列表下标 {} 超出范围（长度 {}）", i, items.len()),
                })
            }
        }
        (other, _) => Err(EvalError::BadAssignment {
            message: format!("无法对 {} 内部赋值", other.type_name()),
        }),
    }
}

//=============================================================================
// 运算符语义
//=============================================================================

fn member(object: &Node, name: &str) -> Result<Node, EvalError> {
    match object {
        Node::Map(map) => Ok(map.get(name).cloned().unwrap_or(Node::Null)),
        Node::List(items) if name == "length" => Ok(Node::Int(items.len() as i64)),
        Node::Str(s) if name == "length" => Ok(Node::Int(s.chars().count() as i64)),
        // 其余容器属性按缺失处理
        Node::List(_) | Node::Str(_) => Ok(Node::Null),
        other => Err(EvalError::TypeMismatch {
            expected: "Map",
            actual: other.type_name().to_string(),
            context: format!("属性 '{}'", name),
        }),
    }
}

fn indexed(object: &Node, index: &Node) -> Result<Node, EvalError> {
    match (object, index) {
        (Node::Map(map), Node::Str(key)) => Ok(map.get(key).cloned().unwrap_or(Node::Null)),
        (Node::List(items), Node::Int(i)) => {
            if *i < 0 {
                return Ok(Node::Null);
            }
            Ok(items.get(*i as usize).cloned().unwrap_or(Node::Null))
        }
        (Node::Str(s), Node::Int(i)) => {
            if *i < 0 {
                return Ok(Node::Null);
            }
            Ok(s.chars()
                .nth(*i as usize)
                .map(|c| Node::Str(c.to_string()))
                .unwrap_or(Node::Null))
        }
        (object, index) => Err(EvalError::TypeMismatch {
            expected: "Map/List",
            actual: format!("{}[{}]", object.type_name(), index.type_name()),
            context: "下标访问".to_string(),
        }),
    }
}

fn unary(op: UnaryOp, value: Node) -> Result<Node, EvalError> {
    match op {
        UnaryOp::Not => Ok(Node::Bool(!value.truthy())),
        UnaryOp::Neg => match value {
            Node::Int(n) => Ok(Node::Int(-n)),
            Node::Float(n) => Ok(Node::Float(-n)),
            other => Err(numeric_mismatch(&other, "一元 '-'")),
        },
        UnaryOp::Pos => match value {
            Node::Int(_) | Node::Float(_) => Ok(value),
            other => Err(numeric_mismatch(&other, "一元 '+'")),
        },
    }
}

fn binary(op: BinOp, left: Node, right: Node) -> Result<Node, EvalError> {
    match op {
        BinOp::Add => add(left, right),
        BinOp::Sub => arith(left, right, "'-'", |a, b| a.checked_sub(b), |a, b| a - b),
        BinOp::Mul => arith(left, right, "'*'", |a, b| a.checked_mul(b), |a, b| a * b),
        BinOp::Div => {
            // 除法总是浮点（JS 语义）
            let l = as_number(&left, "'/'")?;
            let r = as_number(&right, "'/'")?;
            Ok(Node::Float(l / r))
        }
        BinOp::Rem => match (&left, &right) {
            (Node::Int(a), Node::Int(b)) if *b != 0 => Ok(Node::Int(a % b)),
            _ => {
                let l = as_number(&left, "'%'")?;
                let r = as_number(&right, "'%'")?;
                Ok(Node::Float(l % r))
            }
        },
        BinOp::Eq => Ok(Node::Bool(loose_eq(&left, &right))),
        BinOp::Ne => Ok(Node::Bool(!loose_eq(&left, &right))),
        BinOp::Lt => compare(left, right, "'<'", |o| o == std::cmp::Ordering::Less),
        BinOp::Le => compare(left, right, "'<='", |o| o != std::cmp::Ordering::Greater),
        BinOp::Gt => compare(left, right, "'>'", |o| o == std::cmp::Ordering::Greater),
        BinOp::Ge => compare(left, right, "'>='", |o| o != std::cmp::Ordering::Less),
        // And / Or 在 evaluate 中短路处理
        BinOp::And | BinOp::Or => unreachable!("逻辑运算符在求值器中短路处理"),
    }
}

fn add(left: Node, right: Node) -> Result<Node, EvalError> {
    match (&left, &right) {
        (Node::Int(a), Node::Int(b)) => Ok(a
            .checked_add(*b)
            .map(Node::Int)
            .unwrap_or(Node::Float(*a as f64 + *b as f64))),
        (Node::Str(_), _) | (_, Node::Str(_)) => Ok(Node::Str(format!(
            "{}{}",
            left.display_string(),
            right.display_string()
        ))),
        _ => {
            let l = as_number(&left, "'+'")?;
            let r = as_number(&right, "'+'")?;
            Ok(Node::Float(l + r))
        }
    }
}

fn arith(
    left: Node,
    right: Node,
    context: &'static str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Node, EvalError> {
    match (&left, &right) {
        (Node::Int(a), Node::Int(b)) => Ok(int_op(*a, *b)
            .map(Node::Int)
            .unwrap_or(Node::Float(float_op(*a as f64, *b as f64)))),
        _ => {
            let l = as_number(&left, context)?;
            let r = as_number(&right, context)?;
            Ok(Node::Float(float_op(l, r)))
        }
    }
}

fn compare(
    left: Node,
    right: Node,
    context: &'static str,
    check: fn(std::cmp::Ordering) -> bool,
) -> Result<Node, EvalError> {
    let ordering = match (&left, &right) {
        (Node::Str(a), Node::Str(b)) => a.cmp(b),
        _ => {
            let l = as_number(&left, context)?;
            let r = as_number(&right, context)?;
            l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal)
        }
    };
    Ok(Node::Bool(check(ordering)))
}

/// 宽相等：数值跨 Int/Float 比较，容器按结构递归
fn loose_eq(left: &Node, right: &Node) -> bool {
    match (left, right) {
        (Node::Int(a), Node::Float(b)) | (Node::Float(b), Node::Int(a)) => *a as f64 == *b,
        (Node::List(a), Node::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (Node::Map(a), Node::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| loose_eq(v, other)))
        }
        _ => left == right,
    }
}

fn as_number(value: &Node, context: &'static str) -> Result<f64, EvalError> {
    value
        .as_f64()
        .ok_or_else(|| numeric_mismatch(value, context))
}

fn numeric_mismatch(value: &Node, context: &str) -> EvalError {
    EvalError::TypeMismatch {
        expected: "数值",
        actual: value.type_name().to_string(),
        context: context.to_string(),
    }
}
