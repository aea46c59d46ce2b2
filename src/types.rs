//! slotframe 核心数据类型
//!
//! 分组路径、对象标识和输入记录

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 工作槽编号
pub type SlotIndex = usize;

/// 分组路径分隔符
pub const PATH_SEPARATOR: char = '/';

/// 分组路径
///
/// 有序的路径段序列，空序列即根分组。排序后遍历保证写出顺序确定。
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupPath(Vec<String>);

impl GroupPath {
    /// 根分组
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// 由路径段构造, 空段被忽略; 段内的分隔符继续拆开
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            segments
                .into_iter()
                .flat_map(|s| {
                    s.as_ref()
                        .split(PATH_SEPARATOR)
                        .map(|part| part.trim().to_string())
                        .collect::<Vec<_>>()
                })
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// 解析 `a/b/c` 形式的路径
    pub fn parse(path: &str) -> Self {
        Self::from_segments(path.split(PATH_SEPARATOR))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// 追加一个子路径段
    pub fn child(&self, segment: &str) -> Self {
        Self::from_segments(self.0.iter().map(String::as_str).chain([segment]))
    }

    /// 所有段都能安全地用作目录名
    pub fn is_plain(&self) -> bool {
        self.0.iter().all(|s| is_plain_segment(s))
    }
}

/// 非空, 不是 `.` 或 `..`, 不含分隔符
pub fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(PATH_SEPARATOR)
        && !segment.contains('\\')
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<&str> for GroupPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// 结果对象标识: 分组 + 叶子名
///
/// 分组在创建对象时显式给出，而不是事后从名字里切出来。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub group: GroupPath,
    pub name: String,
}

impl ObjectKey {
    /// 名字里带分隔符时, 分隔符之前的部分并入分组
    pub fn new(group: impl Into<GroupPath>, name: &str) -> Self {
        let group = group.into();
        match name.rfind(PATH_SEPARATOR) {
            Some(pos) => Self {
                group: group.child(&name[..pos]),
                name: name[pos + 1..].to_string(),
            },
            None => Self {
                group,
                name: name.to_string(),
            },
        }
    }

    /// 根分组下的对象
    pub fn root(name: &str) -> Self {
        Self::new(GroupPath::root(), name)
    }

    /// 解析 `dir/sub/name`: 最后一个分隔符之前是分组，没有分隔符就是根分组
    pub fn parse(path: &str) -> Self {
        match path.rfind(PATH_SEPARATOR) {
            Some(pos) => Self::new(GroupPath::parse(&path[..pos]), &path[pos + 1..]),
            None => Self::root(path),
        }
    }

    /// 完整路径, 用作槽内索引
    pub fn full_path(&self) -> String {
        if self.group.is_root() {
            self.name.clone()
        } else {
            format!("{}/{}", self.group, self.name)
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

impl From<&str> for ObjectKey {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// 输入记录
///
/// 外部事件源交给插件的一条记录: 字段名 → JSON 值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// 数值字段
    pub fn f64(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    /// 数值数组字段; 非数值元素读作 NaN 以保持下标对齐
    pub fn f64s(&self, field: &str) -> Vec<f64> {
        match self.0.get(field) {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| v.as_f64().unwrap_or(f64::NAN))
                .collect(),
            Some(value) => value.as_f64().into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_path_parse() {
        assert!(GroupPath::parse("").is_root());
        assert_eq!(GroupPath::parse("energy/cross").segments(), &["energy", "cross"]);
        // 空段被忽略
        assert_eq!(GroupPath::parse("/energy//cross/"), GroupPath::parse("energy/cross"));
        assert_eq!(GroupPath::parse("energy").child("cross").to_string(), "energy/cross");
    }

    #[test]
    fn test_object_key_parse() {
        let key = ObjectKey::parse("crossE");
        assert!(key.group.is_root());
        assert_eq!(key.name, "crossE");

        let key = ObjectKey::parse("timing/cross/crossT");
        assert_eq!(key.group.to_string(), "timing/cross");
        assert_eq!(key.name, "crossT");
        assert_eq!(key.full_path(), "timing/cross/crossT");
    }

    #[test]
    fn test_name_with_separator_joins_group() {
        let key = ObjectKey::new("a", "b/c");
        assert_eq!(key, ObjectKey::new("a/b", "c"));
        assert_eq!(key.group.segments(), &["a", "b"]);
        assert_eq!(key.name, "c");
        assert_eq!(GroupPath::from_segments(["a/b", "c"]), GroupPath::parse("a/b/c"));
    }

    #[test]
    fn test_plain_segments() {
        assert!(GroupPath::parse("energy/cross").is_plain());
        assert!(GroupPath::root().is_plain());
        assert!(!GroupPath::parse("../escaped").is_plain());
        assert!(!GroupPath::parse("energy/./cross").is_plain());
        assert!(!is_plain_segment(""));
        assert!(!is_plain_segment("a\\b"));
        assert!(is_plain_segment("crossE"));
    }

    #[test]
    fn test_group_ordering_is_deterministic() {
        let mut groups = vec![GroupPath::parse("b"), GroupPath::root(), GroupPath::parse("a/z")];
        groups.sort();
        assert_eq!(groups[0], GroupPath::root());
        assert_eq!(groups[1].to_string(), "a/z");
    }

    #[test]
    fn test_record_getters() {
        let record: Record = serde_json::from_value(json!({
            "amplitude": [1.0, 2.5, null],
            "timestamp": 42,
            "detector": "clover"
        }))
        .unwrap();

        assert_eq!(record.f64("timestamp"), Some(42.0));
        let amplitudes = record.f64s("amplitude");
        assert_eq!(amplitudes.len(), 3);
        assert!(amplitudes[2].is_nan());
        assert_eq!(record.f64s("timestamp"), vec![42.0]);
        assert!(record.f64s("missing").is_empty());
        assert_eq!(record.str("detector"), Some("clover"));
    }
}
