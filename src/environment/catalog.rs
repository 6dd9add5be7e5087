//! 操作目录：环境在会话开始时提供的全部领域与操作说明

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_param_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: Option<Value>,
}

impl ReturnSpec {
    pub fn described(description: &str) -> Self {
        Self {
            description: description.to_string(),
            schema: None,
        }
    }
}

/// 单个操作说明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub returns: ReturnSpec,
    #[serde(default)]
    pub example: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationCatalog {
    #[serde(default)]
    pub domains: Vec<DomainSpec>,
}

impl OperationCatalog {
    pub fn domain(&self, name: &str) -> Option<&DomainSpec> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn operation(&self, domain: &str, operation: &str) -> Option<&OperationSpec> {
        self.domain(domain)?
            .operations
            .iter()
            .find(|op| op.name == operation)
    }

    pub fn operation_count(&self) -> usize {
        self.domains.iter().map(|d| d.operations.len()).sum()
    }
}

impl OperationSpec {
    /// 未提供示例时按参数列表生成一个调用示例
    pub fn example_or_default(&self, domain: &str) -> Value {
        if let Some(example) = &self.example {
            return example.clone();
        }
        let params: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| (p.name.clone(), Value::String(format!("<{}>", p.kind))))
            .collect();
        serde_json::json!({
            "action": "call_operation",
            "operation_name": format!("{domain}.{}", self.name),
            "parameters": params,
        })
    }
}
