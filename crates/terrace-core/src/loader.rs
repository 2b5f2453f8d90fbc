//! スタックローダー
//!
//! [`StackDefinition`] と設定値から依存グラフ・エクスポート表・プロバイダー設定を組み立てる。
//!
//! すべてのノードを先に宣言してから入力を配線するため、ファイル上の記述順は
//! 結果に影響しない。循環参照は `finalize` で検出される。

use crate::error::{Result, StackError};
use crate::model::{NodeDef, ProviderBackend, StackDefinition, ValueExpr};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use terrace_cloud::{
    Deferred, DependencyGraph, ExportTable, GraphBuilder, Input, Inputs, NoOutputs, NodeRef,
    NodeRole, Properties, REDACTED,
};
use terrace_config::{ConfigError, StackConfig};
use tracing::{debug, info, instrument};

/// 構築済みのスタック
pub struct LoadedStack {
    pub name: String,
    pub graph: DependencyGraph,
    pub exports: ExportTable,
    pub providers: Vec<ResolvedProvider>,
}

/// 設定値を解決したプロバイダー宣言
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub prefix: String,
    pub backend: ProviderBackend,
    pub env: BTreeMap<String, String>,
    pub settings: Properties,
}

/// ローダー
pub struct StackLoader<'a> {
    config: &'a StackConfig,
    lenient_secrets: bool,
}

impl<'a> StackLoader<'a> {
    pub fn new(config: &'a StackConfig) -> Self {
        Self {
            config,
            lenient_secrets: false,
        }
    }

    /// 未設定のシークレットを `[secret]` で代用する（validate 用）
    pub fn lenient_secrets(mut self, lenient: bool) -> Self {
        self.lenient_secrets = lenient;
        self
    }

    #[instrument(skip_all, fields(stack = %definition.name))]
    pub fn load(&self, definition: &StackDefinition) -> Result<LoadedStack> {
        let configs = self.resolve_configs(definition)?;
        let mut builder = GraphBuilder::new();

        // 1. 全ノードを宣言
        let mut instances: Vec<(NodeRef, &NodeDef, Option<u32>)> = Vec::new();
        let mut groups: HashMap<String, Vec<NodeRef>> = HashMap::new();
        for def in &definition.nodes {
            match def.count {
                None => {
                    let node = declare(&mut builder, def, def.name.clone())?;
                    instances.push((node, def, None));
                }
                Some(count) => {
                    let members = groups.entry(def.name.clone()).or_default();
                    for index in 1..=count {
                        let node = declare(&mut builder, def, format!("{}-{index}", def.name))?;
                        members.push(node.clone());
                        instances.push((node, def, Some(index)));
                    }
                }
            }
        }
        debug!(nodes = instances.len(), "Declared nodes");

        // 2. 入力と順序依存を配線
        let mut wiring = Wiring {
            builder: &mut builder,
            groups: &groups,
            configs: &configs,
        };
        for (node, def, index) in &instances {
            let scope = Scope {
                owner: node.id(),
                index: *index,
            };
            for (name, expr) in &def.properties {
                let input = wiring.to_input(expr, &scope)?;
                wiring.builder.set_input(node, name.as_str(), input)?;
            }
            for target in &def.depends_on {
                wiring.add_dependency(node, target, &scope)?;
            }
        }
        for decl in &definition.depends {
            let targets = wiring.lookup(&decl.node, &decl.node)?;
            for node in &targets {
                let scope = Scope {
                    owner: node.id(),
                    index: None,
                };
                for target in &decl.on {
                    wiring.add_dependency(node, target, &scope)?;
                }
            }
        }

        // 3. エクスポート
        let mut exports = ExportTable::new();
        for output in &definition.outputs {
            let scope = Scope {
                owner: &output.name,
                index: None,
            };
            let input = wiring.to_input(&output.value, &scope)?;
            if output.secret {
                exports.insert_secret(output.name.as_str(), input)?;
            } else {
                exports.insert(output.name.as_str(), input)?;
            }
        }

        // 4. プロバイダー設定（リソース参照は不可）
        let mut providers = Vec::with_capacity(definition.providers.len());
        for decl in &definition.providers {
            let scope = Scope {
                owner: &decl.prefix,
                index: None,
            };
            let mut settings = Properties::new();
            for (key, expr) in &decl.settings {
                if !expr.references().is_empty() {
                    return Err(StackError::InvalidProvider {
                        prefix: decl.prefix.clone(),
                        message: format!("設定 '{key}' でリソースは参照できません"),
                    });
                }
                let value = wiring.to_input(expr, &scope)?.evaluate(&NoOutputs)?;
                settings.insert(key.clone(), value);
            }
            providers.push(ResolvedProvider {
                prefix: decl.prefix.clone(),
                backend: decl.backend.clone(),
                env: decl.env.clone(),
                settings,
            });
        }

        let graph = builder.finalize()?;
        info!(
            nodes = graph.len(),
            outputs = exports.len(),
            "Stack loaded successfully"
        );

        Ok(LoadedStack {
            name: definition.name.clone(),
            graph,
            exports,
            providers,
        })
    }

    /// 宣言された設定値をすべて解決
    fn resolve_configs(&self, definition: &StackDefinition) -> Result<HashMap<String, Resolved>> {
        let mut resolved = HashMap::new();
        for decl in &definition.configs {
            let value = if decl.secret {
                if decl.default.is_some() {
                    return Err(StackError::SecretDefault(decl.key.clone()));
                }
                match self.config.secret(&decl.key) {
                    Ok(secret) => Resolved::Secret(secret.into_inner()),
                    Err(ConfigError::MissingSecret { .. }) if self.lenient_secrets => {
                        Resolved::Secret(Value::String(REDACTED.to_string()))
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                Resolved::Plain(self.config.require(&decl.key, decl.default.as_ref())?)
            };
            resolved.insert(decl.key.clone(), value);
        }
        Ok(resolved)
    }
}

/// 設定値とシークレットをロードしてグラフを構築
pub fn load_stack(definition: &StackDefinition, config: &StackConfig) -> Result<LoadedStack> {
    StackLoader::new(config).load(definition)
}

enum Resolved {
    Plain(Value),
    Secret(Value),
}

fn declare(builder: &mut GraphBuilder, def: &NodeDef, id: String) -> Result<NodeRef> {
    let node = match def.role {
        NodeRole::Resource => builder.declare(def.kind.as_str(), id, Inputs::new())?,
        NodeRole::Invoke => builder.invoke(def.kind.as_str(), id, Inputs::new())?,
    };
    Ok(node)
}

/// 式を評価する位置
struct Scope<'s> {
    owner: &'s str,
    /// count 展開時の番号
    index: Option<u32>,
}

impl Scope<'_> {
    fn substitute(&self, text: &str) -> String {
        match self.index {
            Some(index) => text.replace("{index}", &index.to_string()),
            None => text.to_string(),
        }
    }
}

struct Wiring<'b> {
    builder: &'b mut GraphBuilder,
    groups: &'b HashMap<String, Vec<NodeRef>>,
    configs: &'b HashMap<String, Resolved>,
}

impl Wiring<'_> {
    /// ノード名を解決（count 付きノードの名前は全メンバー）
    fn lookup(&self, owner: &str, name: &str) -> Result<Vec<NodeRef>> {
        if let Some(node) = self.builder.get(name) {
            return Ok(vec![node]);
        }
        match self.groups.get(name) {
            Some(members) => Ok(members.clone()),
            None => Err(StackError::UnknownReference {
                node: owner.to_string(),
                reference: name.to_string(),
            }),
        }
    }

    fn add_dependency(&mut self, node: &NodeRef, target: &str, scope: &Scope<'_>) -> Result<()> {
        let target = scope.substitute(target);
        for on in self.lookup(scope.owner, &target)? {
            self.builder.depends_on(node, &on)?;
        }
        Ok(())
    }

    fn to_input(&self, expr: &ValueExpr, scope: &Scope<'_>) -> Result<Input> {
        Ok(match expr {
            ValueExpr::Literal(Value::String(s)) => Input::Literal(Value::String(scope.substitute(s))),
            ValueExpr::Literal(value) => Input::Literal(value.clone()),
            ValueExpr::List(items) => Input::List(
                items
                    .iter()
                    .map(|i| self.to_input(i, scope))
                    .collect::<Result<Vec<_>>>()?,
            ),
            ValueExpr::Map(entries) => Input::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.to_input(v, scope)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
            ValueExpr::Ref { node, attribute } => {
                let target = scope.substitute(node);
                let name = self.builder.get(&target);
                match name {
                    Some(producer) => Input::Deferred(producer.output(attribute)),
                    None => {
                        let members = self.lookup(scope.owner, &target)?;
                        Input::Deferred(Deferred::combine(
                            members.iter().map(|m| m.output(attribute)),
                        ))
                    }
                }
            }
            ValueExpr::Config(key) => match self.configs.get(key) {
                Some(Resolved::Plain(value)) => Input::Literal(value.clone()),
                Some(Resolved::Secret(value)) => Input::Secret(value.clone()),
                None => return Err(StackError::UndeclaredConfig(key.clone())),
            },
            ValueExpr::Secret(key) => match self.configs.get(key) {
                Some(Resolved::Secret(value)) => Input::Secret(value.clone()),
                Some(Resolved::Plain(_)) => return Err(StackError::NotSecret(key.clone())),
                None => return Err(StackError::UndeclaredConfig(key.clone())),
            },
            ValueExpr::Format { template, args } => {
                let args = args
                    .iter()
                    .map(|a| self.to_input(a, scope).map(into_deferred))
                    .collect::<Result<Vec<_>>>()?;
                Input::Deferred(Deferred::format(scope.substitute(template), args))
            }
            ValueExpr::Index => match scope.index {
                Some(index) => Input::Literal(Value::from(index)),
                None => return Err(StackError::IndexOutsideCount(scope.owner.to_string())),
            },
        })
    }
}

/// 入力を1つの遅延値にまとめる
fn into_deferred(input: Input) -> Deferred {
    match input {
        Input::Literal(value) => Deferred::constant(value),
        Input::Secret(value) => Deferred::secret(value),
        Input::Deferred(deferred) => deferred,
        Input::List(items) => Deferred::combine(items.into_iter().map(into_deferred)),
        Input::Map(entries) => {
            let keys: Vec<String> = entries.keys().cloned().collect();
            Deferred::combine(entries.into_values().map(into_deferred)).map(move |values| {
                let values = match values {
                    Value::Array(values) => values,
                    _ => Vec::new(),
                };
                Value::Object(keys.iter().cloned().zip(values).collect())
            })
        }
    }
}
