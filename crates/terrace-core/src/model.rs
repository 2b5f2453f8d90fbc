//! スタック定義モデル
//!
//! KDLファイルから読み込んだ宣言をそのまま保持する。参照の解決や
//! グラフ構築は [`crate::loader`] が行う。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use terrace_cloud::NodeRole;

/// スタック定義全体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackDefinition {
    /// スタック名（`stack "name"`、未指定ならディレクトリ名）
    pub name: String,

    /// 設定値の宣言
    pub configs: Vec<ConfigDecl>,

    /// プロバイダー（kind の接頭辞ごと）
    pub providers: Vec<ProviderDecl>,

    /// resource / invoke ノード（宣言順）
    pub nodes: Vec<NodeDef>,

    /// トップレベルの `depends-on`
    pub depends: Vec<DependsDecl>,

    /// エクスポート
    pub outputs: Vec<OutputDecl>,
}

impl StackDefinition {
    pub fn node(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn config(&self, key: &str) -> Option<&ConfigDecl> {
        self.configs.iter().find(|c| c.key == key)
    }

    /// 展開後のノード数
    pub fn instance_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.count.map_or(1, |c| c as usize))
            .sum()
    }
}

/// 設定値の宣言
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDecl {
    pub key: String,

    /// スタックファイル上のデフォルト値
    pub default: Option<Value>,

    /// シークレット（デフォルト値不可、平文の設定ファイル不可）
    pub secret: bool,
}

/// プロバイダーの実体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProviderBackend {
    /// インメモリのモック
    Mock,
    /// 外部コマンドに委譲
    Command { command: String, args: Vec<String> },
}

/// プロバイダー宣言
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDecl {
    /// 担当する kind の接頭辞（`azure:network:VirtualNetwork` なら `azure`）
    pub prefix: String,

    pub backend: ProviderBackend,

    /// コマンドに渡す環境変数
    pub env: BTreeMap<String, String>,

    /// プロバイダー固有の設定（リソース参照は不可）
    pub settings: BTreeMap<String, ValueExpr>,
}

/// resource / invoke ノード
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    /// ノード名（count 指定時は `name-1` .. `name-N` に展開）
    pub name: String,

    /// リソース型、または invoke の関数名
    pub kind: String,

    pub role: NodeRole,

    pub count: Option<u32>,

    pub properties: BTreeMap<String, ValueExpr>,

    /// 値を参照しない順序依存
    pub depends_on: Vec<String>,
}

/// `depends-on "node" "dep" ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependsDecl {
    pub node: String,
    pub on: Vec<String>,
}

/// `output "name" { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub secret: bool,
    pub value: ValueExpr,
}

/// プロパティ値の式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueExpr {
    Literal(Value),
    List(Vec<ValueExpr>),
    Map(BTreeMap<String, ValueExpr>),

    /// `$ref "node" "attribute"`
    Ref { node: String, attribute: String },

    /// `$config "key"`
    Config(String),

    /// `$secret "key"`
    Secret(String),

    /// `$format "template" { - ... }`
    Format {
        template: String,
        args: Vec<ValueExpr>,
    },

    /// `$index`（count 展開時の 1 始まりの番号）
    Index,
}

impl ValueExpr {
    /// 参照しているノード名
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ValueExpr::Ref { node, .. } => out.push(node),
            ValueExpr::List(items) => items.iter().for_each(|i| i.collect_references(out)),
            ValueExpr::Map(entries) => entries.values().for_each(|i| i.collect_references(out)),
            ValueExpr::Format { args, .. } => args.iter().for_each(|i| i.collect_references(out)),
            ValueExpr::Literal(_) | ValueExpr::Config(_) | ValueExpr::Secret(_) | ValueExpr::Index => {}
        }
    }
}
