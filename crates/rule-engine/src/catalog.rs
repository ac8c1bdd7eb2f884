//! 属性目录
//!
//! 进程启动时加载一次，之后只读。所有组件通过属性名查询元数据，
//! 用于值校验（最大长度、数值类型）以及默认值回填。

use crate::error::{Result, RuleError};
use crate::models::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// 属性元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    /// 值的最大字符数，0 表示不限制
    #[serde(default)]
    pub max_length: usize,
    #[serde(default)]
    pub is_numeric: bool,
    #[serde(default)]
    pub default_value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, max_length: usize, is_numeric: bool) -> Self {
        Self {
            name: name.into(),
            max_length,
            is_numeric,
            default_value: String::new(),
        }
    }

    pub fn string(name: impl Into<String>, max_length: usize) -> Self {
        Self::new(name, max_length, false)
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, 0, true)
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = default_value.into();
        self
    }

    /// 校验值是否满足该属性的约束
    ///
    /// 空字符串视为"未填写"，不做数值校验。
    pub fn validate(&self, value: &str) -> Result<()> {
        if self.max_length > 0 && value.chars().count() > self.max_length {
            return Err(RuleError::InvalidValue {
                attribute: self.name.clone(),
                reason: format!("长度超过上限 {}", self.max_length),
            });
        }

        if self.is_numeric && !value.is_empty() && value.trim().parse::<f64>().is_err() {
            return Err(RuleError::InvalidValue {
                attribute: self.name.clone(),
                reason: format!("'{}' 不是有效数值", value),
            });
        }

        Ok(())
    }
}

/// 属性目录
#[derive(Debug, Clone, Default)]
pub struct AttributeCatalog {
    attributes: HashMap<String, Attribute>,
}

impl AttributeCatalog {
    /// 从属性列表构建目录，属性名必须唯一
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        let mut map = HashMap::with_capacity(attributes.len());

        for attribute in attributes {
            if attribute.name.trim().is_empty() {
                return Err(RuleError::ParseError("属性名不能为空".to_string()));
            }
            if map.contains_key(&attribute.name) {
                return Err(RuleError::ParseError(format!(
                    "属性名重复: {}",
                    attribute.name
                )));
            }
            map.insert(attribute.name.clone(), attribute);
        }

        Ok(Self { attributes: map })
    }

    /// 从 JSON 数组加载
    pub fn from_json(json: &str) -> Result<Self> {
        let attributes: Vec<Attribute> = serde_json::from_str(json)?;
        Self::new(attributes)
    }

    /// 从 JSON 文件加载
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&content)?;

        info!(path = %path.display(), attributes = catalog.len(), "属性目录已加载");
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// 获取属性，不存在时返回 UnknownAttribute
    pub fn require(&self, name: &str, path: &str) -> Result<&Attribute> {
        self.attributes
            .get(name)
            .ok_or_else(|| RuleError::UnknownAttribute {
                attribute: name.to_string(),
                path: path.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// 按名称排序的属性名列表
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 以默认值构建一条记录（新记录的初始状态）
    pub fn default_record(&self) -> Record {
        self.attributes
            .values()
            .map(|a| (a.name.clone(), a.default_value.clone()))
            .collect()
    }
}
