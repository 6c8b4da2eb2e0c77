//! # Node 模块
//!
//! 定义脚本树的值类型与节点路径。
//!
//! ## 设计说明
//!
//! 脚本是动态类型的：解析器产出的每个值都是一个 [`Node`]。
//! 除 JSON 原语与容器外，还有两个带标签的标量变体：
//!
//! - [`Node::Exp`]：表达式（YAML 中写作 `!exp "..."`），执行时求值
//! - [`Node::Fmt`]：模板（YAML 中写作 `!fmt "..."`），执行时渲染
//!
//! 两者在 JSON 存档中以 `__class` 判别字段保持往返（见序列化实现）。
//!
//! [`NodePath`] 以键/下标序列唯一定位脚本源中的一个节点，是存档、
//! 脚本错误与源码映射三方共用的坐标系。

use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// JSON 存档中标记标签值的判别字段
pub const CLASS_KEY: &str = "__class";
/// 表达式标签的类名
pub const CLASS_EXP: &str = "ScriptExp";
/// 模板标签的类名
pub const CLASS_FMT: &str = "ScriptFmt";
/// 标签值的载荷字段
const CLASS_PAYLOAD: &str = "source";

/// 脚本树节点
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// 空值
    Null,
    /// 布尔值
    Bool(bool),
    /// 整数
    Int(i64),
    /// 浮点数
    Float(f64),
    /// 字符串
    Str(String),
    /// 列表
    List(Vec<Node>),
    /// 映射（保持作者书写顺序）
    Map(IndexMap<String, Node>),
    /// 表达式标签（`!exp`）
    Exp(String),
    /// 模板标签（`!fmt`）
    Fmt(String),
}

impl Node {
    /// 类型名，用于错误消息
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "Null",
            Node::Bool(_) => "Bool",
            Node::Int(_) => "Int",
            Node::Float(_) => "Float",
            Node::Str(_) => "String",
            Node::List(_) => "List",
            Node::Map(_) => "Map",
            Node::Exp(_) => "Exp",
            Node::Fmt(_) => "Fmt",
        }
    }

    /// 是否为空值
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// 按字符串取值
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    /// 按列表取值
    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    /// 按映射取值
    pub fn as_map(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    /// 按映射取可变值
    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<String, Node>> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    /// 按数值取值（整数会被提升为浮点）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Int(n) => Some(*n as f64),
            Node::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// 真值判定
    ///
    /// `null`、`false`、`0`、`0.0`、`""` 为假，其余为真。
    pub fn truthy(&self) -> bool {
        match self {
            Node::Null => false,
            Node::Bool(b) => *b,
            Node::Int(n) => *n != 0,
            Node::Float(n) => *n != 0.0,
            Node::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// 模板替换使用的字符串形式
    ///
    /// 标量按字面渲染（字符串不加引号），容器渲染为 JSON。
    pub fn display_string(&self) -> String {
        match self {
            Node::Null => "null".to_string(),
            Node::Bool(b) => b.to_string(),
            Node::Int(n) => n.to_string(),
            Node::Float(n) => n.to_string(),
            Node::Str(s) => s.clone(),
            _ => serde_json::to_string(self).unwrap_or_default(),
        }
    }

    /// 将节点视作指令：恰好单键的映射，返回 `(指令名, 参数)`
    pub fn as_command(&self) -> Option<(&str, &Node)> {
        let map = self.as_map()?;
        if map.len() != 1 {
            return None;
        }
        map.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    /// 构造指令节点（测试与宿主侧拼装脚本用）
    pub fn command(name: impl Into<String>, args: impl Into<Node>) -> Node {
        let mut map = IndexMap::new();
        map.insert(name.into(), args.into());
        Node::Map(map)
    }

    /// 沿路径定位子节点
    pub fn locate(&self, path: &NodePath) -> Option<&Node> {
        let mut current = self;
        for seg in path.segments() {
            current = match (current, seg) {
                (Node::List(items), PathSeg::Index(i)) => items.get(*i)?,
                (Node::Map(map), PathSeg::Key(k)) => map.get(k)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::Null
    }
}

impl From<()> for Node {
    fn from(_: ()) -> Self {
        Node::Null
    }
}

impl From<bool> for Node {
    fn from(v: bool) -> Self {
        Node::Bool(v)
    }
}

impl From<i64> for Node {
    fn from(v: i64) -> Self {
        Node::Int(v)
    }
}

impl From<f64> for Node {
    fn from(v: f64) -> Self {
        Node::Float(v)
    }
}

impl From<&str> for Node {
    fn from(v: &str) -> Self {
        Node::Str(v.to_string())
    }
}

impl From<String> for Node {
    fn from(v: String) -> Self {
        Node::Str(v)
    }
}

impl From<Vec<Node>> for Node {
    fn from(v: Vec<Node>) -> Self {
        Node::List(v)
    }
}

impl From<IndexMap<String, Node>> for Node {
    fn from(v: IndexMap<String, Node>) -> Self {
        Node::Map(v)
    }
}

//=============================================================================
// 序列化：标签值以 __class 判别字段往返 JSON
//=============================================================================

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Int(n) => serializer.serialize_i64(*n),
            Node::Float(n) => serializer.serialize_f64(*n),
            Node::Str(s) => serializer.serialize_str(s),
            Node::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Node::Exp(src) => serialize_tagged(serializer, CLASS_EXP, src),
            Node::Fmt(src) => serialize_tagged(serializer, CLASS_FMT, src),
        }
    }
}

fn serialize_tagged<S: Serializer>(
    serializer: S,
    class: &str,
    source: &str,
) -> Result<S::Ok, S::Error> {
    let mut out = serializer.serialize_map(Some(2))?;
    out.serialize_entry(CLASS_KEY, class)?;
    out.serialize_entry(CLASS_PAYLOAD, source)?;
    out.end()
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("任意 JSON 值")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Node, E> {
        Ok(Node::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Node, E> {
        Ok(Node::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Node, E> {
        if v <= i64::MAX as u64 {
            Ok(Node::Int(v as i64))
        } else {
            Ok(Node::Float(v as f64))
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Node, E> {
        Ok(Node::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Node, E> {
        Ok(Node::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Node, E> {
        Ok(Node::Str(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Node, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Node>()? {
            items.push(item);
        }
        Ok(Node::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Node, A::Error> {
        let mut map = IndexMap::new();
        while let Some((key, value)) = access.next_entry::<String, Node>()? {
            map.insert(key, value);
        }

        // 带 __class 判别字段的映射还原为标签值
        let class = match map.get(CLASS_KEY) {
            Some(Node::Str(class)) => class.clone(),
            Some(_) => {
                return Err(de::Error::custom("__class 必须是字符串"));
            }
            None => return Ok(Node::Map(map)),
        };

        let payload = match map.get(CLASS_PAYLOAD) {
            Some(Node::Str(src)) => src.clone(),
            _ => {
                return Err(de::Error::custom(format!(
                    "{} 缺少字符串载荷字段 '{}'",
                    class, CLASS_PAYLOAD
                )));
            }
        };

        match class.as_str() {
            CLASS_EXP => Ok(Node::Exp(payload)),
            CLASS_FMT => Ok(Node::Fmt(payload)),
            other => Err(de::Error::custom(format!("未注册的类型标记: {}", other))),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Node, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

//=============================================================================
// 节点路径
//=============================================================================

/// 路径片段：映射键或列表下标
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSeg {
    /// 映射键
    Key(String),
    /// 列表下标
    Index(usize),
}

impl From<&str> for PathSeg {
    fn from(v: &str) -> Self {
        PathSeg::Key(v.to_string())
    }
}

impl From<String> for PathSeg {
    fn from(v: String) -> Self {
        PathSeg::Key(v)
    }
}

impl From<usize> for PathSeg {
    fn from(v: usize) -> Self {
        PathSeg::Index(v)
    }
}

impl Serialize for PathSeg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PathSeg::Key(k) => serializer.serialize_str(k),
            PathSeg::Index(i) => serializer.serialize_u64(*i as u64),
        }
    }
}

struct PathSegVisitor;

impl<'de> Visitor<'de> for PathSegVisitor {
    type Value = PathSeg;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("字符串键或整数下标")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<PathSeg, E> {
        Ok(PathSeg::Index(v as usize))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<PathSeg, E> {
        if v < 0 {
            return Err(de::Error::custom("路径下标不能为负数"));
        }
        Ok(PathSeg::Index(v as usize))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PathSeg, E> {
        Ok(PathSeg::Key(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<PathSeg, E> {
        Ok(PathSeg::Key(v))
    }
}

impl<'de> Deserialize<'de> for PathSeg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<PathSeg, D::Error> {
        deserializer.deserialize_any(PathSegVisitor)
    }
}

/// 节点路径
///
/// 空路径表示脚本根列表本身。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<PathSeg>);

impl NodePath {
    /// 根路径
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// 从片段序列构造
    pub fn from_segments(segments: Vec<PathSeg>) -> Self {
        Self(segments)
    }

    /// 路径片段
    pub fn segments(&self) -> &[PathSeg] {
        &self.0
    }

    /// 是否为根路径
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 追加片段（原地）
    pub fn push(&mut self, seg: impl Into<PathSeg>) {
        self.0.push(seg.into());
    }

    /// 追加片段，返回新路径
    pub fn child(&self, seg: impl Into<PathSeg>) -> Self {
        let mut next = self.clone();
        next.push(seg);
        next
    }

    /// 追加键片段，返回新路径
    pub fn child_key(&self, key: impl Into<String>) -> Self {
        self.child(PathSeg::Key(key.into()))
    }

    /// 追加下标片段，返回新路径
    pub fn child_index(&self, index: usize) -> Self {
        self.child(PathSeg::Index(index))
    }

    /// 转换为节点表示（键为字符串、下标为整数的列表）
    pub fn to_node(&self) -> Node {
        Node::List(
            self.0
                .iter()
                .map(|seg| match seg {
                    PathSeg::Key(k) => Node::Str(k.clone()),
                    PathSeg::Index(i) => Node::Int(*i as i64),
                })
                .collect(),
        )
    }

    /// 从节点表示还原路径
    pub fn from_node(node: &Node) -> Option<Self> {
        let items = node.as_list()?;
        let mut segments = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Node::Str(k) => segments.push(PathSeg::Key(k.clone())),
                Node::Int(i) if *i >= 0 => segments.push(PathSeg::Index(*i as usize)),
                _ => return None,
            }
        }
        Some(Self(segments))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for seg in &self.0 {
            match seg {
                PathSeg::Key(k) => write!(f, ".{}", k)?,
                PathSeg::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> Node {
        let mut inner = IndexMap::new();
        inner.insert("cond".to_string(), Node::Exp("x > 0".to_string()));
        inner.insert(
            "then".to_string(),
            Node::List(vec![Node::command("print", "P")]),
        );
        Node::command("if", Node::Map(inner))
    }

    #[test]
    fn test_truthy() {
        assert!(!Node::Null.truthy());
        assert!(!Node::Bool(false).truthy());
        assert!(!Node::Int(0).truthy());
        assert!(!Node::Float(0.0).truthy());
        assert!(!Node::Str(String::new()).truthy());

        assert!(Node::Bool(true).truthy());
        assert!(Node::Int(-1).truthy());
        assert!(Node::Str("x".to_string()).truthy());
        assert!(Node::List(vec![]).truthy());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Node::Null.display_string(), "null");
        assert_eq!(Node::Bool(true).display_string(), "true");
        assert_eq!(Node::Int(42).display_string(), "42");
        assert_eq!(Node::Float(3.0).display_string(), "3");
        assert_eq!(Node::Float(1.5).display_string(), "1.5");
        assert_eq!(Node::Str("hi".to_string()).display_string(), "hi");
        assert_eq!(
            Node::List(vec![Node::Int(1), Node::Int(2)]).display_string(),
            "[1,2]"
        );
    }

    #[test]
    fn test_as_command() {
        let node = Node::command("print", "hello");
        let (name, args) = node.as_command().unwrap();
        assert_eq!(name, "print");
        assert_eq!(args.as_str(), Some("hello"));

        // 双键映射不是指令
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Node::Int(1));
        map.insert("b".to_string(), Node::Int(2));
        assert!(Node::Map(map).as_command().is_none());

        assert!(Node::Str("x".to_string()).as_command().is_none());
    }

    #[test]
    fn test_locate() {
        let node = sample_map();
        let path = NodePath::root().child_key("if").child_key("then").child_index(0);
        let target = node.locate(&path).unwrap();
        assert_eq!(target.as_command().unwrap().0, "print");

        // 不存在的路径
        let missing = NodePath::root().child_key("if").child_key("else");
        assert!(node.locate(&missing).is_none());

        // 空路径定位到自身
        assert_eq!(node.locate(&NodePath::root()), Some(&node));
    }

    #[test]
    fn test_tagged_value_json_round_trip() {
        let node = Node::List(vec![
            Node::Exp("x > 0".to_string()),
            Node::Fmt("hello {{name}}".to_string()),
            Node::Str("plain".to_string()),
        ]);

        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"__class\":\"ScriptExp\""));
        assert!(json.contains("\"__class\":\"ScriptFmt\""));

        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let json = r#"{"__class": "Mystery", "source": "x"}"#;
        let result: Result<Node, _> = serde_json::from_str(json);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Mystery"));
    }

    #[test]
    fn test_plain_map_passes_through() {
        let json = r#"{"a": 1, "b": [true, null], "c": {"d": 1.5}}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        let map = node.as_map().unwrap();
        assert_eq!(map.get("a"), Some(&Node::Int(1)));
        assert_eq!(
            map.get("b"),
            Some(&Node::List(vec![Node::Bool(true), Node::Null]))
        );
    }

    #[test]
    fn test_path_serde_round_trip() {
        let path = NodePath::root()
            .child_index(2)
            .child_key("menu")
            .child_key("Label A")
            .child_index(0);

        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"[2,"menu","Label A",0]"#);

        let back: NodePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_path_node_round_trip() {
        let path = NodePath::root().child_index(1).child_key("if").child_key("then");
        let node = path.to_node();
        assert_eq!(NodePath::from_node(&node), Some(path));

        // 含非法片段的列表无法还原
        let bad = Node::List(vec![Node::Bool(true)]);
        assert_eq!(NodePath::from_node(&bad), None);
    }

    #[test]
    fn test_path_display() {
        let path = NodePath::root().child_index(2).child_key("if").child_key("then");
        assert_eq!(path.to_string(), "$[2].if.then");
        assert_eq!(NodePath::root().to_string(), "$");
    }
}
