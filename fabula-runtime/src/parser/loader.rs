//! # YAML 装载器
//!
//! 基于 yaml-rust2 的带标记事件流构建节点树，同时记录每个节点的
//! 源码位置，并识别两个自定义标签：
//!
//! - `!exp` → [`Node::Exp`]
//! - `!fmt` → [`Node::Fmt`]

use std::collections::HashMap;

use indexmap::IndexMap;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser as YamlParser, Tag};
use yaml_rust2::scanner::{Marker, TScalarStyle};

use super::SourcePos;
use crate::error::ParseError;
use crate::node::{Node, NodePath};

/// YAML 1.2 核心模式的标准标签前缀
const CORE_TAG_PREFIX: &str = "tag:yaml.org,2002:";

/// 装载一段 YAML 文本，返回根节点与按路径索引的位置表
pub(crate) fn load(text: &str) -> Result<(Node, HashMap<NodePath, SourcePos>), ParseError> {
    let mut parser = YamlParser::new_from_str(text);
    let mut loader = Loader::default();
    let result = parser.load(&mut loader, true);

    // 装载器内部记录的错误比扫描错误更具体，优先返回
    if let Some(err) = loader.error {
        return Err(err);
    }
    if let Err(scan) = result {
        return Err(ParseError::Scan {
            line: scan.marker().line(),
            column: scan.marker().col() + 1,
            message: scan.info().to_string(),
        });
    }

    let root = loader.root.ok_or(ParseError::Schema {
        line: 1,
        column: 1,
        message: "文档为空".to_string(),
    })?;

    Ok((root, loader.positions))
}

fn pos(mark: Marker) -> SourcePos {
    SourcePos {
        line: mark.line(),
        column: mark.col() + 1,
    }
}

/// 构建中的容器
enum Builder {
    Seq {
        path: NodePath,
        items: Vec<Node>,
        anchor: usize,
    },
    Map {
        path: NodePath,
        entries: IndexMap<String, Node>,
        pending_key: Option<String>,
        anchor: usize,
    },
}

#[derive(Default)]
struct Loader {
    stack: Vec<Builder>,
    root: Option<Node>,
    anchors: HashMap<usize, Node>,
    positions: HashMap<NodePath, SourcePos>,
    error: Option<ParseError>,
}

impl Loader {
    /// 下一个节点将被插入的路径
    fn next_path(&self) -> Option<NodePath> {
        match self.stack.last() {
            None => Some(NodePath::root()),
            Some(Builder::Seq { path, items, .. }) => Some(path.child_index(items.len())),
            Some(Builder::Map {
                path,
                pending_key: Some(key),
                ..
            }) => Some(path.child_key(key.clone())),
            // 正在等待键：当前事件本身是键，没有路径
            Some(Builder::Map {
                pending_key: None, ..
            }) => None,
        }
    }

    /// 是否正在等待映射键
    fn expecting_key(&self) -> bool {
        matches!(
            self.stack.last(),
            Some(Builder::Map {
                pending_key: None,
                ..
            })
        )
    }

    fn fail(&mut self, err: ParseError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// 把构建完成的节点插入父容器（或作为文档根）
    fn insert(&mut self, node: Node, anchor: usize, mark: Marker) {
        if anchor > 0 {
            self.anchors.insert(anchor, node.clone());
        }
        match self.stack.last_mut() {
            None => {
                if self.root.is_some() {
                    self.fail(ParseError::Schema {
                        line: mark.line(),
                        column: mark.col() + 1,
                        message: "只支持单个 YAML 文档".to_string(),
                    });
                    return;
                }
                self.root = Some(node);
            }
            Some(Builder::Seq { items, .. }) => items.push(node),
            Some(Builder::Map {
                entries,
                pending_key,
                ..
            }) => match pending_key.take() {
                Some(key) => {
                    entries.insert(key, node);
                }
                None => {
                    // expecting_key 检查在事件入口完成，这里不应出现
                    self.fail(ParseError::Schema {
                        line: mark.line(),
                        column: mark.col() + 1,
                        message: "内部状态错误：缺少映射键".to_string(),
                    });
                }
            },
        }
    }

    /// 解析标量：应用标签与 YAML 1.2 核心模式的类型推断
    fn resolve_scalar(
        &self,
        value: String,
        style: TScalarStyle,
        tag: Option<Tag>,
        mark: Marker,
    ) -> Result<Node, ParseError> {
        if let Some(tag) = tag {
            if tag.handle == "!" {
                return match tag.suffix.as_str() {
                    "exp" => Ok(Node::Exp(value)),
                    "fmt" => Ok(Node::Fmt(value)),
                    other => Err(ParseError::UnknownTag {
                        line: mark.line(),
                        column: mark.col() + 1,
                        tag: other.to_string(),
                    }),
                };
            }
            if tag.handle == "!!" || tag.handle == CORE_TAG_PREFIX {
                return Ok(match tag.suffix.as_str() {
                    "str" => Node::Str(value),
                    "null" => Node::Null,
                    _ => plain_scalar(value),
                });
            }
            return Err(ParseError::UnknownTag {
                line: mark.line(),
                column: mark.col() + 1,
                tag: format!("{}{}", tag.handle, tag.suffix),
            });
        }

        if style == TScalarStyle::Plain {
            Ok(plain_scalar(value))
        } else {
            Ok(Node::Str(value))
        }
    }

    fn handle_scalar(&mut self, value: String, style: TScalarStyle, aid: usize, tag: Option<Tag>, mark: Marker) {
        // 映射键：必须是无自定义标签的标量
        if self.expecting_key() {
            if let Some(tag) = &tag {
                if tag.handle == "!" {
                    self.fail(ParseError::Schema {
                        line: mark.line(),
                        column: mark.col() + 1,
                        message: format!("映射键不能携带标签 '!{}'", tag.suffix),
                    });
                    return;
                }
            }
            let duplicate = match self.stack.last() {
                Some(Builder::Map { entries, .. }) => entries.contains_key(&value),
                _ => false,
            };
            if duplicate {
                self.fail(ParseError::Schema {
                    line: mark.line(),
                    column: mark.col() + 1,
                    message: format!("重复的键 '{}'", value),
                });
                return;
            }
            if let Some(Builder::Map { pending_key, .. }) = self.stack.last_mut() {
                *pending_key = Some(value);
            }
            return;
        }

        let node = match self.resolve_scalar(value, style, tag, mark) {
            Ok(node) => node,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        if let Some(path) = self.next_path() {
            self.positions.insert(path, pos(mark));
        }
        self.insert(node, aid, mark);
    }

    fn handle_collection_start(&mut self, is_map: bool, aid: usize, tag: Option<Tag>, mark: Marker) {
        if let Some(tag) = &tag {
            if tag.handle == "!" {
                self.fail(ParseError::TagOnCollection {
                    line: mark.line(),
                    column: mark.col() + 1,
                    tag: tag.suffix.clone(),
                });
                return;
            }
        }
        if self.expecting_key() {
            self.fail(ParseError::Schema {
                line: mark.line(),
                column: mark.col() + 1,
                message: "映射键必须是标量".to_string(),
            });
            return;
        }

        let path = match self.next_path() {
            Some(path) => path,
            None => return,
        };
        self.positions.insert(path.clone(), pos(mark));

        if is_map {
            self.stack.push(Builder::Map {
                path,
                entries: IndexMap::new(),
                pending_key: None,
                anchor: aid,
            });
        } else {
            self.stack.push(Builder::Seq {
                path,
                items: Vec::new(),
                anchor: aid,
            });
        }
    }

    fn handle_collection_end(&mut self, mark: Marker) {
        let (node, anchor) = match self.stack.pop() {
            Some(Builder::Seq { items, anchor, .. }) => (Node::List(items), anchor),
            Some(Builder::Map { entries, anchor, .. }) => (Node::Map(entries), anchor),
            None => return,
        };
        self.insert(node, anchor, mark);
    }

    fn handle_alias(&mut self, aid: usize, mark: Marker) {
        let node = match self.anchors.get(&aid) {
            Some(node) => node.clone(),
            None => {
                self.fail(ParseError::UnknownAnchor {
                    line: mark.line(),
                    column: mark.col() + 1,
                });
                return;
            }
        };
        if self.expecting_key() {
            self.fail(ParseError::Schema {
                line: mark.line(),
                column: mark.col() + 1,
                message: "映射键必须是标量".to_string(),
            });
            return;
        }
        if let Some(path) = self.next_path() {
            self.positions.insert(path, pos(mark));
        }
        self.insert(node, 0, mark);
    }
}

impl MarkedEventReceiver for Loader {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        if self.error.is_some() {
            return;
        }
        match ev {
            Event::Scalar(value, style, aid, tag) => {
                self.handle_scalar(value, style, aid, tag, mark);
            }
            Event::SequenceStart(aid, tag) => {
                self.handle_collection_start(false, aid, tag, mark);
            }
            Event::MappingStart(aid, tag) => {
                self.handle_collection_start(true, aid, tag, mark);
            }
            Event::SequenceEnd | Event::MappingEnd => {
                self.handle_collection_end(mark);
            }
            Event::Alias(aid) => {
                self.handle_alias(aid, mark);
            }
            // 流/文档边界事件不参与构建
            _ => {}
        }
    }
}

/// YAML 1.2 核心模式的普通标量类型推断
fn plain_scalar(value: String) -> Node {
    match value.as_str() {
        "" | "~" | "null" | "Null" | "NULL" => return Node::Null,
        "true" | "True" | "TRUE" => return Node::Bool(true),
        "false" | "False" | "FALSE" => return Node::Bool(false),
        ".inf" | "+.inf" | ".Inf" | "+.Inf" | ".INF" | "+.INF" => {
            return Node::Float(f64::INFINITY);
        }
        "-.inf" | "-.Inf" | "-.INF" => return Node::Float(f64::NEG_INFINITY),
        ".nan" | ".NaN" | ".NAN" => return Node::Float(f64::NAN),
        _ => {}
    }

    if let Ok(n) = value.parse::<i64>() {
        return Node::Int(n);
    }
    if let Some(hex) = value.strip_prefix("0x") {
        if let Ok(n) = i64::from_str_radix(hex, 16) {
            return Node::Int(n);
        }
    }
    if let Some(oct) = value.strip_prefix("0o") {
        if let Ok(n) = i64::from_str_radix(oct, 8) {
            return Node::Int(n);
        }
    }
    if looks_numeric(&value) {
        if let Ok(n) = value.parse::<f64>() {
            return Node::Float(n);
        }
    }
    Node::Str(value)
}

/// 是否形如数字开头（避免把 "inf"、"nan" 一类字符串交给浮点解析）
fn looks_numeric(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') | Some('.') => {
            matches!(chars.next(), Some(c) if c.is_ascii_digit())
        }
        _ => false,
    }
}
