use std::fmt;

use serde_json::Value;

use crate::geometry::{Color, Point3};

pub const DATASET_GROUP: &str = "Dataset";
pub const FEATURE_GROUP: &str = "Feature";
pub const GEOJSON_GROUP: &str = "GeoJSON";
pub const MEASUREMENT_GROUP: &str = "Measurement";
pub const IFC_GROUP: &str = "IFC";
pub const CITYJSON_GROUP: &str = "CityJSON";
pub const PLY_GROUP: &str = "PLY";

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Point(Point3),
    Color(Color),
}

impl AttributeValue {
    /// 仅接受基本类型（字符串、数值、布尔）；对象、数组与 null 返回 `None`。
    pub fn from_primitive(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => Some(match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => Self::Number(number.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// 任意 JSON 值；复合值以紧凑 JSON 文本保留。
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Array(_) | Value::Object(_) => Self::Text(value.to_string()),
            other => Self::from_primitive(other).unwrap_or(Self::Null),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
            Self::Point(point) => write!(f, "{point}"),
            Self::Color(color) => write!(f, "{color}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(Self::Integer)
            .unwrap_or(Self::Number(value as f64))
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Point3> for AttributeValue {
    fn from(value: Point3) -> Self {
        Self::Point(value)
    }
}

impl From<Color> for AttributeValue {
    fn from(value: Color) -> Self {
        Self::Color(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
}

/// 按插入顺序保存的属性分组。`Dataset` 分组始终存在且排在首位。
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeGroups {
    groups: Vec<(String, Vec<Attribute>)>,
}

impl AttributeGroups {
    pub fn new() -> Self {
        Self {
            groups: vec![(DATASET_GROUP.to_string(), Vec::new())],
        }
    }

    /// 获取分组，不存在时追加到末尾。
    pub fn group_mut(&mut self, name: &str) -> &mut Vec<Attribute> {
        let index = match self.groups.iter().position(|(group, _)| group == name) {
            Some(index) => index,
            None => {
                self.groups.push((name.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[index].1
    }

    pub fn push(&mut self, group: &str, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.group_mut(group).push(Attribute {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&[Attribute]> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, attributes)| attributes.as_slice())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Attribute])> {
        self.groups
            .iter()
            .map(|(name, attributes)| (name.as_str(), attributes.as_slice()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Default for AttributeGroups {
    fn default() -> Self {
        Self::new()
    }
}

/// 拾取结果经分类后得到的统一属性表。
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub parent: String,
    pub point: Point3,
    pub attributes: AttributeGroups,
}

impl Feature {
    pub fn attribute(&self, group: &str, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .get(group)?
            .iter()
            .find(|attribute| attribute.key == key)
            .map(|attribute| &attribute.value)
    }
}
