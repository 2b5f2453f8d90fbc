//! Deferred values
//!
//! A [`Deferred`] stands for a value that is only known after its producer
//! node has been realized: an assigned IP, a generated name, a connection
//! string. Deferred values compose without evaluating anything eagerly:
//!
//! - [`Deferred::map`] applies a pure transform once the source resolves
//! - [`Deferred::combine`] joins several deferred values into an ordered list
//! - [`Deferred::format`] fills `{}` placeholders from deferred arguments
//!
//! Resolution is performed by the resolver after every producer has reached
//! `Realized`. A resolved value is cached and never changes afterwards.
//!
//! A value built from a [`Deferred::secret`] stays secret through every
//! composition and is never shown by `Display` or `Debug`.

use crate::error::{CloudError, Result};
use crate::registry::NodeRef;
use crate::value::{Properties, REDACTED};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Lookup of realized outputs by producer
pub trait OutputSource {
    /// Outputs of `node`, or `None` if it has not been realized
    fn outputs(&self, node: &NodeRef) -> Option<&Properties>;
}

/// An output source where nothing has been realized yet
pub struct NoOutputs;

impl OutputSource for NoOutputs {
    fn outputs(&self, _node: &NodeRef) -> Option<&Properties> {
        None
    }
}

/// A value known only after its producers are realized
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<Inner>,
}

struct Inner {
    source: Source,
    secret: bool,
    cache: OnceLock<Value>,
}

enum Source {
    Constant(Value),
    Output { producer: NodeRef, path: Vec<String> },
    Map { source: Deferred, transform: Transform },
    Combine(Vec<Deferred>),
}

impl Deferred {
    fn from_source(source: Source) -> Self {
        let secret = match &source {
            Source::Constant(_) | Source::Output { .. } => false,
            Source::Map { source, .. } => source.is_secret(),
            Source::Combine(items) => items.iter().any(Deferred::is_secret),
        };
        Self {
            inner: Arc::new(Inner {
                source,
                secret,
                cache: OnceLock::new(),
            }),
        }
    }

    /// The value of `attribute` on `producer`
    ///
    /// Dotted attributes (`primaryEndpoints.web`) select nested fields; numeric
    /// segments index into arrays.
    pub(crate) fn output(producer: NodeRef, attribute: &str) -> Self {
        let path = attribute.split('.').map(str::to_string).collect();
        Self::from_source(Source::Output { producer, path })
    }

    /// A deferred value that is already known
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::from_source(Source::Constant(value.into()))
    }

    /// A known value that must never be printed or persisted in plain text
    pub fn secret(value: impl Into<Value>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source: Source::Constant(value.into()),
                secret: true,
                cache: OnceLock::new(),
            }),
        }
    }

    /// Whether any part of this value comes from a secret
    pub fn is_secret(&self) -> bool {
        self.inner.secret
    }

    /// Apply `transform` to the resolved value
    pub fn map<F>(&self, transform: F) -> Deferred
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self::from_source(Source::Map {
            source: self.clone(),
            transform: Arc::new(transform),
        })
    }

    /// Ordered list of every input's resolved value
    pub fn combine<I>(items: I) -> Deferred
    where
        I: IntoIterator<Item = Deferred>,
    {
        Self::from_source(Source::Combine(items.into_iter().collect()))
    }

    /// Fill `{}` placeholders in `template` with the resolved arguments, in order
    ///
    /// String values are inserted without quotes, anything else as JSON.
    pub fn format<I>(template: impl Into<String>, args: I) -> Deferred
    where
        I: IntoIterator<Item = Deferred>,
    {
        let template = template.into();
        Self::combine(args).map(move |values| {
            let values = match values {
                Value::Array(values) => values,
                other => vec![other],
            };
            Value::String(fill_template(&template, &values))
        })
    }

    /// Nodes this value reads from (deduplicated, first-seen order)
    pub fn producers(&self) -> Vec<NodeRef> {
        let mut out = Vec::new();
        self.collect_producers(&mut out);
        out
    }

    fn collect_producers(&self, out: &mut Vec<NodeRef>) {
        match &self.inner.source {
            Source::Constant(_) => {}
            Source::Output { producer, .. } => {
                if !out.contains(producer) {
                    out.push(producer.clone());
                }
            }
            Source::Map { source, .. } => source.collect_producers(out),
            Source::Combine(items) => items.iter().for_each(|d| d.collect_producers(out)),
        }
    }

    /// Cached value, if this deferred has been resolved
    pub fn get(&self) -> Option<&Value> {
        self.inner.cache.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.cache.get().is_some()
    }

    /// Resolve against realized outputs and cache the result
    ///
    /// Fails with [`CloudError::PrematureResolution`] if a producer has not
    /// been realized yet.
    pub fn resolve(&self, source: &dyn OutputSource) -> Result<Value> {
        if let Some(value) = self.inner.cache.get() {
            return Ok(value.clone());
        }
        let value = self.compute(source, true)?;
        Ok(self.inner.cache.get_or_init(|| value).clone())
    }

    /// Compute the value without touching any cache (used for previews)
    pub fn evaluate(&self, source: &dyn OutputSource) -> Result<Value> {
        if let Some(value) = self.inner.cache.get() {
            return Ok(value.clone());
        }
        self.compute(source, false)
    }

    fn compute(&self, source: &dyn OutputSource, cache: bool) -> Result<Value> {
        let step = |d: &Deferred| {
            if cache {
                d.resolve(source)
            } else {
                d.evaluate(source)
            }
        };

        match &self.inner.source {
            Source::Constant(value) => Ok(value.clone()),
            Source::Output { producer, path } => {
                let outputs =
                    source
                        .outputs(producer)
                        .ok_or_else(|| CloudError::PrematureResolution {
                            producer: producer.id().to_string(),
                            attribute: path.join("."),
                        })?;
                lookup(outputs, path)
                    .cloned()
                    .ok_or_else(|| CloudError::MissingOutput {
                        producer: producer.id().to_string(),
                        attribute: path.join("."),
                    })
            }
            Source::Map { source: inner, transform } => Ok(transform(step(inner)?)),
            Source::Combine(items) => items
                .iter()
                .map(step)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

fn lookup<'a>(outputs: &'a Properties, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = outputs.get(first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn fill_template(template: &str, values: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = values.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.source {
            Source::Constant(_) if self.is_secret() => write!(f, "{REDACTED}"),
            Source::Constant(value) => write!(f, "{value}"),
            Source::Output { producer, path } => write!(f, "{}.{}", producer.id(), path.join(".")),
            Source::Map { source, .. } => write!(f, "map({source})"),
            Source::Combine(items) => {
                write!(f, "combine(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("source", &self.to_string())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::GraphBuilder;
    use crate::value::Inputs;
    use serde_json::json;
    use std::collections::HashMap;

    /// Test double: outputs keyed by node id
    #[derive(Default)]
    struct FakeOutputs(HashMap<String, Properties>);

    impl FakeOutputs {
        fn with(mut self, id: &str, outputs: Value) -> Self {
            let Value::Object(map) = outputs else {
                panic!("outputs must be an object");
            };
            self.0.insert(id.to_string(), map);
            self
        }
    }

    impl OutputSource for FakeOutputs {
        fn outputs(&self, node: &NodeRef) -> Option<&Properties> {
            self.0.get(node.id())
        }
    }

    fn two_nodes() -> (NodeRef, NodeRef) {
        let mut builder = GraphBuilder::new();
        let rg = builder.declare("test:rg", "rg", Inputs::new()).unwrap();
        let sa = builder.declare("test:sa", "sa", Inputs::new()).unwrap();
        (rg, sa)
    }

    #[test]
    fn test_resolve_before_realization_is_premature() {
        let (rg, _) = two_nodes();
        let name = rg.output("name");

        let err = name.resolve(&NoOutputs).unwrap_err();
        assert!(matches!(err, CloudError::PrematureResolution { .. }));
        assert!(!name.is_resolved());
    }

    #[test]
    fn test_map_is_lazy_and_cached() {
        let (rg, _) = two_nodes();
        let upper = rg
            .output("name")
            .map(|v| json!(v.as_str().unwrap_or_default().to_uppercase()));
        assert!(!upper.is_resolved());

        let outputs = FakeOutputs::default().with("rg", json!({"name": "paas_group"}));
        assert_eq!(upper.resolve(&outputs).unwrap(), json!("PAAS_GROUP"));

        // 一度解決された値は以後変わらない
        let later = FakeOutputs::default().with("rg", json!({"name": "other"}));
        assert_eq!(upper.resolve(&later).unwrap(), json!("PAAS_GROUP"));
        assert_eq!(upper.get(), Some(&json!("PAAS_GROUP")));
    }

    #[test]
    fn test_evaluate_does_not_cache() {
        let (rg, _) = two_nodes();
        let name = rg.output("name");
        let outputs = FakeOutputs::default().with("rg", json!({"name": "preview"}));

        assert_eq!(name.evaluate(&outputs).unwrap(), json!("preview"));
        assert!(!name.is_resolved());
    }

    #[test]
    fn test_combine_waits_for_every_producer() {
        let (rg, sa) = two_nodes();
        let both = Deferred::combine([rg.output("id"), sa.output("id")]);
        assert_eq!(both.producers().len(), 2);

        let partial = FakeOutputs::default().with("rg", json!({"id": "rg-1"}));
        assert!(both.resolve(&partial).is_err());
        assert!(!both.is_resolved());

        let full = partial.with("sa", json!({"id": "sa-1"}));
        assert_eq!(both.resolve(&full).unwrap(), json!(["rg-1", "sa-1"]));
    }

    #[test]
    fn test_nested_attribute_path() {
        let (_, sa) = two_nodes();
        let web = sa.output("primaryEndpoints.web");
        let first_key = sa.output("keys.0.value");
        let outputs = FakeOutputs::default().with(
            "sa",
            json!({
                "primaryEndpoints": {"web": "https://sa.web.core.windows.net/"},
                "keys": [{"value": "k1"}, {"value": "k2"}]
            }),
        );

        assert_eq!(
            web.resolve(&outputs).unwrap(),
            json!("https://sa.web.core.windows.net/")
        );
        assert_eq!(first_key.resolve(&outputs).unwrap(), json!("k1"));
    }

    #[test]
    fn test_missing_attribute() {
        let (rg, _) = two_nodes();
        let outputs = FakeOutputs::default().with("rg", json!({"name": "x"}));
        let err = rg.output("location").resolve(&outputs).unwrap_err();
        assert!(matches!(err, CloudError::MissingOutput { ref attribute, .. } if attribute == "location"));
    }

    #[test]
    fn test_format_fills_placeholders_in_order() {
        let (rg, sa) = two_nodes();
        let label = Deferred::format(
            "{}-nic-{}",
            [rg.output("name"), Deferred::constant(2), sa.output("name")],
        );
        let outputs = FakeOutputs::default()
            .with("rg", json!({"name": "vm"}))
            .with("sa", json!({"name": "unused"}));

        // 余った引数は無視される
        assert_eq!(label.resolve(&outputs).unwrap(), json!("vm-nic-2"));
        assert_eq!(label.producers().len(), 2);
    }

    #[test]
    fn test_secret_survives_composition() {
        let (rg, _) = two_nodes();
        let conn = Deferred::format(
            "Server={};Password={}",
            [rg.output("host"), Deferred::secret("hunter2")],
        );
        assert!(conn.is_secret());
        assert!(!rg.output("host").is_secret());
        assert!(!Deferred::constant("public").is_secret());

        let outputs = FakeOutputs::default().with("rg", json!({"host": "db.local"}));
        assert_eq!(
            conn.resolve(&outputs).unwrap(),
            json!("Server=db.local;Password=hunter2")
        );

        // 解決後も表示には出ない
        assert!(!conn.to_string().contains("hunter2"));
        assert!(!format!("{conn:?}").contains("hunter2"));
        assert!(conn.to_string().contains(REDACTED));
    }

    #[test]
    fn test_display_names_source() {
        let (rg, _) = two_nodes();
        assert_eq!(rg.output("name").to_string(), "rg.name");
        assert_eq!(Deferred::combine([rg.output("id")]).to_string(), "combine(rg.id)");
    }
}
