//! プロパティ値のパース
//!
//! ```kdl
//! location "westeurope"                 // リテラル
//! tags "a" "b"                          // 引数が複数ならリスト
//! ports { - 80; - 443 }                 // `-` の子ノードはリスト
//! sku { name "Standard_LRS"; tier 2 }   // その他の子ノードはマップ
//! rg { $ref "rg" "name" }               // `$` で始まる単独の子ノードは特殊形式
//! ```

use crate::error::{Result, StackError};
use crate::model::ValueExpr;
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde_json::Value;
use std::collections::BTreeMap;

/// 名前なし引数
pub(crate) fn positional(node: &KdlNode) -> Vec<&KdlEntry> {
    node.entries().iter().filter(|e| e.name().is_none()).collect()
}

/// 最初の名前なし引数（文字列）
pub(crate) fn first_string<'a>(node: &'a KdlNode) -> Option<&'a str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// 文字列プロパティ
pub(crate) fn string_prop<'a>(node: &'a KdlNode, key: &str) -> Option<&'a str> {
    node.get(key).and_then(|v| v.as_string())
}

/// 真偽値プロパティ（未指定は false）
pub(crate) fn bool_prop(node: &KdlNode, key: &str) -> bool {
    node.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// KDL のスカラーを JSON に変換
pub(crate) fn kdl_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        match i64::try_from(i) {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(i.to_string()),
        }
    } else if let Some(f) = value.as_float() {
        Value::from(f)
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else {
        Value::Null
    }
}

/// プロパティノードの値をパース
pub fn parse_value(node: &KdlNode) -> Result<ValueExpr> {
    let owner = node.name().value();
    parse_parts(owner, &positional(node), node.children())
}

/// 引数と子ノードから値を組み立てる
///
/// `output "name" ...` のように先頭引数が名前のノードでも使えるよう、
/// 引数は呼び出し側で切り出して渡す。
pub(crate) fn parse_parts(
    owner: &str,
    args: &[&KdlEntry],
    children: Option<&KdlDocument>,
) -> Result<ValueExpr> {
    let nodes = children.map(|c| c.nodes()).unwrap_or_default();

    if !nodes.is_empty() {
        if !args.is_empty() {
            return Err(invalid(owner, "値と子ノードは同時に指定できません"));
        }
        if nodes.len() == 1 && nodes[0].name().value().starts_with('$') {
            return parse_special(&nodes[0]);
        }
        if nodes.iter().all(|n| n.name().value() == "-") {
            return nodes
                .iter()
                .map(parse_value)
                .collect::<Result<Vec<_>>>()
                .map(ValueExpr::List);
        }

        let mut map = BTreeMap::new();
        for child in nodes {
            let key = child.name().value();
            if key == "-" || key.starts_with('$') {
                return Err(invalid(
                    owner,
                    &format!("'{key}' はマップのキーとして使えません"),
                ));
            }
            map.insert(key.to_string(), parse_value(child)?);
        }
        return Ok(ValueExpr::Map(map));
    }

    Ok(match args {
        [] if children.is_some() => ValueExpr::Map(BTreeMap::new()),
        [] => ValueExpr::Literal(Value::Null),
        [single] => ValueExpr::Literal(kdl_to_json(single.value())),
        many => ValueExpr::List(
            many.iter()
                .map(|e| ValueExpr::Literal(kdl_to_json(e.value())))
                .collect(),
        ),
    })
}

/// `$ref` / `$config` / `$secret` / `$format` / `$index`
fn parse_special(node: &KdlNode) -> Result<ValueExpr> {
    let form = node.name().value();
    let args: Vec<&str> = positional(node)
        .iter()
        .filter_map(|e| e.value().as_string())
        .collect();

    match form {
        "$ref" => match args.as_slice() {
            [target, attribute] => Ok(ValueExpr::Ref {
                node: target.to_string(),
                attribute: attribute.to_string(),
            }),
            _ => Err(invalid(form, "$ref にはノード名と属性名が必要です")),
        },
        "$config" => match args.as_slice() {
            [key] => Ok(ValueExpr::Config(key.to_string())),
            _ => Err(invalid(form, "$config にはキーが1つ必要です")),
        },
        "$secret" => match args.as_slice() {
            [key] => Ok(ValueExpr::Secret(key.to_string())),
            _ => Err(invalid(form, "$secret にはキーが1つ必要です")),
        },
        "$format" => {
            let [template] = args.as_slice() else {
                return Err(invalid(form, "$format にはテンプレート文字列が1つ必要です"));
            };
            let args = match node.children() {
                Some(children) => children
                    .nodes()
                    .iter()
                    .map(|n| {
                        if n.name().value() == "-" {
                            parse_value(n)
                        } else {
                            Err(invalid(form, "$format の引数は `-` で指定してください"))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            Ok(ValueExpr::Format {
                template: template.to_string(),
                args,
            })
        }
        "$index" => Ok(ValueExpr::Index),
        other => Err(invalid(other, "未知の特殊形式です")),
    }
}

fn invalid(node: &str, message: &str) -> StackError {
    StackError::InvalidValue {
        node: node.to_string(),
        message: message.to_string(),
    }
}
