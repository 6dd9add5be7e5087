//! 工具发现网关
//!
//! agent 一开始看不到任何操作，只能经由保留领域 `api_docs` 的三个元操作逐步发现：
//! list_domains → list_operations(domain) → describe_operation(domain, operation)。
//! 网关在会话开始时由环境提供的目录构建一次，之后无状态、幂等。

use serde::Serialize;
use serde_json::Value;

use crate::core::EvalError;
use crate::environment::{DomainSpec, OperationCatalog, OperationSpec, ParameterSpec, ReturnSpec};

pub const META_DOMAIN: &str = "api_docs";

/// 元操作
#[derive(Debug, Clone, PartialEq)]
pub enum MetaOperation {
    ListDomains,
    ListOperations { domain: String },
    DescribeOperation { domain: String, operation: String },
}

impl MetaOperation {
    /// 非 `api_docs.*` 返回 None；是元操作但参数不全时返回 Some(Err)
    pub fn parse(operation_name: &str, parameters: &Value) -> Option<Result<Self, EvalError>> {
        let op = operation_name.trim().strip_prefix(META_DOMAIN)?.strip_prefix('.')?;
        let arg = |keys: &[&str]| -> Result<String, EvalError> {
            keys.iter()
                .find_map(|k| parameters.get(*k).and_then(Value::as_str))
                .map(str::to_string)
                .ok_or_else(|| {
                    EvalError::OperationExecution(format!(
                        "{operation_name} requires parameter '{}'",
                        keys[0]
                    ))
                })
        };
        let parsed = match op {
            "list_domains" | "show_app_descriptions" => Ok(MetaOperation::ListDomains),
            "list_operations" | "show_api_descriptions" => arg(&["domain", "app_name"])
                .map(|domain| MetaOperation::ListOperations { domain }),
            "describe_operation" | "show_api_doc" => arg(&["domain", "app_name"]).and_then(|domain| {
                arg(&["operation", "api_name"])
                    .map(|operation| MetaOperation::DescribeOperation { domain, operation })
            }),
            other => Err(EvalError::NotFound(format!(
                "operation '{other}' in domain '{META_DOMAIN}'"
            ))),
        };
        Some(parsed)
    }
}

/// 列表项：名字 + 一句话说明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub name: String,
    pub description: String,
}

pub struct DiscoveryGateway {
    catalog: OperationCatalog,
}

impl DiscoveryGateway {
    /// 元领域排在最前，其余按环境目录顺序
    pub fn new(catalog: OperationCatalog) -> Self {
        let mut domains = vec![meta_domain_spec()];
        domains.extend(catalog.domains.into_iter().filter(|d| d.name != META_DOMAIN));
        Self {
            catalog: OperationCatalog { domains },
        }
    }

    pub fn list_domains(&self) -> Vec<Summary> {
        self.catalog
            .domains
            .iter()
            .map(|d| Summary {
                name: d.name.clone(),
                description: d.description.clone(),
            })
            .collect()
    }

    /// 操作名不带领域前缀
    pub fn list_operations(&self, domain: &str) -> Result<Vec<Summary>, EvalError> {
        let spec = self
            .catalog
            .domain(domain)
            .ok_or_else(|| EvalError::NotFound(format!("domain '{domain}'")))?;
        Ok(spec
            .operations
            .iter()
            .map(|op| Summary {
                name: op.name.clone(),
                description: op.description.clone(),
            })
            .collect())
    }

    /// 完整说明，保证带一个调用示例
    pub fn describe_operation(&self, domain: &str, operation: &str) -> Result<OperationSpec, EvalError> {
        if self.catalog.domain(domain).is_none() {
            return Err(EvalError::NotFound(format!("domain '{domain}'")));
        }
        let spec = self.catalog.operation(domain, operation).ok_or_else(|| {
            EvalError::NotFound(format!("operation '{operation}' in domain '{domain}'"))
        })?;
        let mut spec = spec.clone();
        spec.example = Some(spec.example_or_default(domain));
        Ok(spec)
    }

    pub fn dispatch(&self, op: &MetaOperation) -> Result<Value, EvalError> {
        let value = match op {
            MetaOperation::ListDomains => serde_json::to_value(self.list_domains()),
            MetaOperation::ListOperations { domain } => {
                serde_json::to_value(self.list_operations(domain)?)
            }
            MetaOperation::DescribeOperation { domain, operation } => {
                serde_json::to_value(self.describe_operation(domain, operation)?)
            }
        };
        value.map_err(|e| EvalError::OperationExecution(e.to_string()))
    }

    /// 元操作说明（写入系统说明）
    pub fn meta_operations_help(&self) -> String {
        let meta = self.catalog.domain(META_DOMAIN).map(|d| d.operations.as_slice()).unwrap_or(&[]);
        meta.iter()
            .map(|op| {
                let params: Vec<String> = op.parameters.iter().map(|p| p.name.clone()).collect();
                format!("- {META_DOMAIN}.{}({}): {}", op.name, params.join(", "), op.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn domain_count(&self) -> usize {
        self.catalog.domains.len()
    }
}

fn param(name: &str, description: &str) -> ParameterSpec {
    ParameterSpec {
        name: name.into(),
        kind: "string".into(),
        required: true,
        description: description.into(),
    }
}

fn meta_domain_spec() -> DomainSpec {
    DomainSpec {
        name: META_DOMAIN.into(),
        description: "Discover the domains and operations available in this task.".into(),
        operations: vec![
            OperationSpec {
                name: "list_domains".into(),
                description: "List every domain with a one-line description.".into(),
                parameters: vec![],
                returns: ReturnSpec::described("list of {name, description}"),
                example: None,
            },
            OperationSpec {
                name: "list_operations".into(),
                description: "List the operations of one domain (names without the domain prefix).".into(),
                parameters: vec![param("domain", "domain name from list_domains")],
                returns: ReturnSpec::described("list of {name, description}"),
                example: None,
            },
            OperationSpec {
                name: "describe_operation".into(),
                description: "Full specification of one operation: parameters, return shape and an example.".into(),
                parameters: vec![
                    param("domain", "domain name"),
                    param("operation", "operation name from list_operations"),
                ],
                returns: ReturnSpec::described("operation specification"),
                example: None,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> OperationCatalog {
        serde_json::from_value(json!({
            "domains": [
                {"name": "spotify", "description": "Music streaming", "operations": [
                    {"name": "login", "description": "Log in", "parameters": [
                        {"name": "username", "required": true},
                        {"name": "password", "required": true}
                    ]},
                    {"name": "show_playlist_library", "description": "Paginated playlists",
                     "example": {"action": "call_operation", "operation_name": "spotify.show_playlist_library", "parameters": {"page_index": 0}}}
                ]},
                {"name": "venmo", "description": "Payments", "operations": []}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_list_domains_in_order() {
        let gw = DiscoveryGateway::new(catalog());
        let names: Vec<String> = gw.list_domains().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["api_docs", "spotify", "venmo"]);
    }

    #[test]
    fn test_list_operations_unprefixed() {
        let gw = DiscoveryGateway::new(catalog());
        let ops = gw.list_operations("spotify").unwrap();
        assert_eq!(ops[0].name, "login");
        assert_eq!(ops[1].name, "show_playlist_library");
        assert_eq!(gw.list_operations("venmo").unwrap(), vec![]);
    }

    #[test]
    fn test_describe_operation_has_example() {
        let gw = DiscoveryGateway::new(catalog());
        let spec = gw.describe_operation("spotify", "login").unwrap();
        assert_eq!(spec.parameters.len(), 2);
        assert_eq!(spec.example.unwrap()["operation_name"], "spotify.login");

        let spec = gw.describe_operation("spotify", "show_playlist_library").unwrap();
        assert_eq!(spec.example.unwrap()["parameters"]["page_index"], 0);
    }

    #[test]
    fn test_not_found() {
        let gw = DiscoveryGateway::new(catalog());
        assert!(matches!(gw.list_operations("gmail"), Err(EvalError::NotFound(_))));
        assert!(matches!(
            gw.describe_operation("spotify", "logout"),
            Err(EvalError::NotFound(_))
        ));
    }

    #[test]
    fn test_dispatch_is_idempotent() {
        let gw = DiscoveryGateway::new(catalog());
        let op = MetaOperation::DescribeOperation {
            domain: "spotify".into(),
            operation: "login".into(),
        };
        assert_eq!(gw.dispatch(&op).unwrap(), gw.dispatch(&op).unwrap());
    }

    #[test]
    fn test_parse_meta_operations_and_aliases() {
        assert!(MetaOperation::parse("spotify.login", &json!({})).is_none());
        assert_eq!(
            MetaOperation::parse("api_docs.list_domains", &json!({})).unwrap().unwrap(),
            MetaOperation::ListDomains
        );
        assert_eq!(
            MetaOperation::parse("api_docs.show_api_doc", &json!({"app_name": "spotify", "api_name": "login"}))
                .unwrap()
                .unwrap(),
            MetaOperation::DescribeOperation {
                domain: "spotify".into(),
                operation: "login".into()
            }
        );
        assert!(matches!(
            MetaOperation::parse("api_docs.list_operations", &json!({})).unwrap(),
            Err(EvalError::OperationExecution(_))
        ));
        assert!(matches!(
            MetaOperation::parse("api_docs.teleport", &json!({})).unwrap(),
            Err(EvalError::NotFound(_))
        ));
    }

    #[test]
    fn test_meta_domain_is_self_describing() {
        let gw = DiscoveryGateway::new(catalog());
        let ops = gw.list_operations(META_DOMAIN).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(gw.meta_operations_help().contains("api_docs.describe_operation(domain, operation)"));
    }
}
