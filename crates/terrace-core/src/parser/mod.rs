//! KDLパーサー
//!
//! スタック定義ファイルをパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。

mod node;
mod value;

use node::{parse_config_block, parse_depends, parse_node, parse_output, parse_provider};
pub use value::parse_value;

use crate::error::{Result, StackError};
use crate::model::StackDefinition;
use kdl::KdlDocument;
use std::fs;
use std::path::Path;
use terrace_cloud::NodeRole;

/// KDLファイルをパースしてStackDefinitionを生成
pub fn parse_stack_file<P: AsRef<Path>>(path: P) -> Result<StackDefinition> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| StackError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let name = path
        .canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_stack_string(&content, name)
}

/// KDL文字列をパース
pub fn parse_stack_string(content: &str, default_name: String) -> Result<StackDefinition> {
    let doc: KdlDocument = content.parse()?;
    let mut stack = StackDefinition {
        name: default_name,
        ..Default::default()
    };

    for node in doc.nodes() {
        match node.name().value() {
            "stack" => {
                if let Some(name) = value::first_string(node) {
                    stack.name = name.to_string();
                }
            }
            "config" => {
                for decl in parse_config_block(node)? {
                    if stack.config(&decl.key).is_some() {
                        return Err(StackError::InvalidStack(format!(
                            "設定値 '{}' が重複しています",
                            decl.key
                        )));
                    }
                    stack.configs.push(decl);
                }
            }
            "provider" => {
                let provider = parse_provider(node)?;
                if stack.providers.iter().any(|p| p.prefix == provider.prefix) {
                    return Err(StackError::InvalidStack(format!(
                        "プロバイダー '{}' が重複しています",
                        provider.prefix
                    )));
                }
                stack.providers.push(provider);
            }
            "resource" => stack.nodes.push(parse_node(node, NodeRole::Resource)?),
            "invoke" => stack.nodes.push(parse_node(node, NodeRole::Invoke)?),
            "depends-on" => stack.depends.push(parse_depends(node)?),
            "output" => stack.outputs.push(parse_output(node)?),
            other => {
                tracing::warn!("Unknown top-level node ignored: {}", other);
            }
        }
    }

    tracing::debug!(
        name = %stack.name,
        nodes = stack.nodes.len(),
        outputs = stack.outputs.len(),
        "Parsed stack definition"
    );
    Ok(stack)
}
