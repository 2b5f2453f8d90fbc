//! トップレベルノードのパース

use super::value::{bool_prop, first_string, kdl_to_json, parse_parts, parse_value, positional, string_prop};
use crate::error::{Result, StackError};
use crate::model::{ConfigDecl, DependsDecl, NodeDef, OutputDecl, ProviderBackend, ProviderDecl};
use kdl::KdlNode;
use std::collections::BTreeMap;
use terrace_cloud::NodeRole;

/// config ブロックをパース
///
/// ```kdl
/// config {
///     location "westeurope"
///     admin-password secret=#true
/// }
/// ```
pub fn parse_config_block(node: &KdlNode) -> Result<Vec<ConfigDecl>> {
    let Some(children) = node.children() else {
        return Ok(Vec::new());
    };

    children
        .nodes()
        .iter()
        .map(|child| {
            let key = child.name().value().to_string();
            let secret = bool_prop(child, "secret");
            let default = positional(child).first().map(|e| kdl_to_json(e.value()));
            if secret && default.is_some() {
                return Err(StackError::SecretDefault(key));
            }
            Ok(ConfigDecl {
                key,
                default,
                secret,
            })
        })
        .collect()
}

/// provider ノードをパース
///
/// `kind="mock"` か `command="..."` のどちらかが必要。子ノードの `args` と
/// `env` は予約済みで、それ以外はプロバイダー設定として渡される。
pub fn parse_provider(node: &KdlNode) -> Result<ProviderDecl> {
    let prefix = first_string(node)
        .ok_or_else(|| StackError::InvalidStack("provider requires a name".to_string()))?
        .to_string();

    let mut args = Vec::new();
    let mut env = BTreeMap::new();
    let mut settings = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "args" => {
                    args = child
                        .entries()
                        .iter()
                        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
                        .collect();
                }
                "env" => {
                    if let Some(vars) = child.children() {
                        for var in vars.nodes() {
                            if let Some(value) = first_string(var) {
                                env.insert(var.name().value().to_string(), value.to_string());
                            }
                        }
                    }
                }
                other => {
                    settings.insert(other.to_string(), parse_value(child)?);
                }
            }
        }
    }

    let backend = match (string_prop(node, "kind"), string_prop(node, "command")) {
        (_, Some(command)) => ProviderBackend::Command {
            command: command.to_string(),
            args,
        },
        (Some("mock"), None) => ProviderBackend::Mock,
        (Some(other), None) => {
            return Err(StackError::InvalidProvider {
                prefix,
                message: format!("未知の kind '{other}' です (mock または command= を指定)"),
            });
        }
        (None, None) => {
            return Err(StackError::InvalidProvider {
                prefix,
                message: "kind=\"mock\" か command= を指定してください".to_string(),
            });
        }
    };

    Ok(ProviderDecl {
        prefix,
        backend,
        env,
        settings,
    })
}

/// resource / invoke ノードをパース
///
/// ```kdl
/// resource "vm" type="azure:compute:VirtualMachine" count=2 {
///     name { $format "vm-{}" { - { $index } } }
///     depends-on "rg"
/// }
/// invoke "keys" function="azure:storage:listKeys" { ... }
/// ```
pub fn parse_node(node: &KdlNode, role: NodeRole) -> Result<NodeDef> {
    let (label, kind_key) = match role {
        NodeRole::Resource => ("resource", "type"),
        NodeRole::Invoke => ("invoke", "function"),
    };

    let name = first_string(node)
        .ok_or_else(|| StackError::InvalidStack(format!("{label} requires a name")))?
        .to_string();
    let kind = string_prop(node, kind_key)
        .ok_or_else(|| StackError::InvalidStack(format!("{label} '{name}' requires {kind_key}=")))?
        .to_string();

    let count = match node.get("count") {
        None => None,
        Some(value) => match value.as_integer() {
            Some(n) if (1..=i128::from(u32::MAX)).contains(&n) => Some(n as u32),
            _ => {
                return Err(StackError::InvalidValue {
                    node: name,
                    message: "count は 1 以上の整数で指定してください".to_string(),
                });
            }
        },
    };
    if count.is_some() && role == NodeRole::Invoke {
        return Err(StackError::InvalidStack(format!(
            "invoke '{name}' には count を指定できません"
        )));
    }

    let mut properties = BTreeMap::new();
    let mut depends_on = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends-on" => {
                    depends_on.extend(
                        child
                            .entries()
                            .iter()
                            .filter_map(|e| e.value().as_string().map(|s| s.to_string())),
                    );
                }
                key => {
                    properties.insert(key.to_string(), parse_value(child)?);
                }
            }
        }
    }

    Ok(NodeDef {
        name,
        kind,
        role,
        count,
        properties,
        depends_on,
    })
}

/// `depends-on "node" "dep1" "dep2"` をパース
pub fn parse_depends(node: &KdlNode) -> Result<DependsDecl> {
    let names: Vec<String> = positional(node)
        .iter()
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect();
    match names.split_first() {
        Some((target, on)) if !on.is_empty() => Ok(DependsDecl {
            node: target.clone(),
            on: on.to_vec(),
        }),
        _ => Err(StackError::InvalidStack(
            "depends-on にはノード名と依存先が必要です".to_string(),
        )),
    }
}

/// output ノードをパース
///
/// ```kdl
/// output "rgName" { $ref "rg" "name" }
/// output "region" "westeurope"
/// output "password" secret=#true { $secret "admin-password" }
/// ```
pub fn parse_output(node: &KdlNode) -> Result<OutputDecl> {
    let args = positional(node);
    let Some((first, rest)) = args.split_first() else {
        return Err(StackError::InvalidStack("output requires a name".to_string()));
    };
    let name = first
        .value()
        .as_string()
        .ok_or_else(|| StackError::InvalidStack("output requires a name".to_string()))?
        .to_string();

    let value = parse_parts(&name, rest, node.children())?;
    Ok(OutputDecl {
        secret: bool_prop(node, "secret"),
        name,
        value,
    })
}
