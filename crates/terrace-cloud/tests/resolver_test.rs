//! End-to-end behaviour of the resolver against the in-memory provider

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use terrace_cloud::{
    CancelToken, CloudError, Deferred, ExportTable, GraphBuilder, Input, Inputs, MockOperation,
    MockProvider, NodeOutcome, NodeState, Properties, ProviderAdapter, Resolver, RunOptions,
    StackState, run,
};

fn chain_graph() -> terrace_cloud::DependencyGraph {
    let mut builder = GraphBuilder::new();
    let net = builder.declare("test:network", "net", Inputs::new()).unwrap();
    builder
        .declare("test:vm", "vm", Inputs::new().with("vmNetId", net.output("id")))
        .unwrap();
    builder.finalize().unwrap()
}

#[tokio::test]
async fn test_network_id_flows_into_vm() {
    let mut graph = chain_graph();
    let mock = MockProvider::new().with_outputs("net", json!({"id": "abc"}));

    let report = run(&mut graph, &mock).await;
    assert!(report.is_success());

    let calls = mock.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].id, "net");
    assert_eq!(calls[1].id, "vm");
    assert_eq!(calls[1].inputs["vmNetId"], json!("abc"));
    assert_eq!(graph.outputs_of("vm").unwrap()["vmNetId"], json!("abc"));
}

#[tokio::test]
async fn test_cycle_realizes_nothing() {
    let mut builder = GraphBuilder::new();
    let a = builder.declare("test:a", "a", Inputs::new()).unwrap();
    let b = builder
        .declare("test:b", "b", Inputs::new().with("a", a.output("id")))
        .unwrap();
    builder.set_input(&a, "b", b.output("id")).unwrap();

    let err = builder.finalize().unwrap_err();
    assert!(matches!(err, CloudError::CyclicDependency(_)));
    assert!(err.is_construction_error());
}

#[tokio::test]
async fn test_second_run_performs_no_realizations() {
    let mut graph = chain_graph();
    let mock = MockProvider::new();

    assert!(run(&mut graph, &mock).await.is_success());
    assert_eq!(mock.realize_count(), 2);

    let second = run(&mut graph, &mock).await;
    assert!(second.is_success());
    assert_eq!(mock.realize_count(), 2);
    assert!(second.nodes.iter().all(|n| n.outcome == NodeOutcome::Unchanged));
}

#[tokio::test]
async fn test_dependencies_complete_before_dependents_start() {
    let mut builder = GraphBuilder::new();
    let rg = builder.declare("test:rg", "rg", Inputs::new()).unwrap();
    let vnet = builder
        .declare("test:vnet", "vnet", Inputs::new().with("rg", rg.output("name")))
        .unwrap();
    let subnet = builder
        .declare("test:subnet", "subnet", Inputs::new().with("vnet", vnet.output("name")))
        .unwrap();
    builder
        .declare(
            "test:nic",
            "nic",
            Inputs::new()
                .with("subnet", subnet.output("id"))
                .with("rg", rg.output("name")),
        )
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new()
        .delay("rg", Duration::from_millis(20))
        .delay("vnet", Duration::from_millis(10));
    let report = Resolver::new(&mock)
        .with_options(RunOptions::default().with_parallelism(8))
        .run(&mut graph)
        .await;

    assert!(report.is_success());
    assert_eq!(
        mock.ids(MockOperation::Realize),
        vec!["rg", "vnet", "subnet", "nic"]
    );
}

#[tokio::test]
async fn test_independent_nodes_follow_declaration_order() {
    let mut builder = GraphBuilder::new();
    for id in ["zeta", "alpha", "mid"] {
        builder.declare("test:node", id, Inputs::new()).unwrap();
    }
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new();
    Resolver::new(&mock)
        .with_options(RunOptions::default().with_parallelism(1))
        .run(&mut graph)
        .await;
    assert_eq!(mock.ids(MockOperation::Realize), vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn test_fan_in_combine() {
    let mut builder = GraphBuilder::new();
    let a = builder.declare("test:a", "a", Inputs::new()).unwrap();
    let b = builder.declare("test:b", "b", Inputs::new()).unwrap();
    let c = builder.declare("test:c", "c", Inputs::new()).unwrap();
    let all = Deferred::combine([a.output("id"), b.output("id"), c.output("id")]);
    builder
        .declare("test:d", "d", Inputs::new().with("members", all))
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new();
    let report = run(&mut graph, &mock).await;
    assert!(report.is_success());
    assert_eq!(
        graph.outputs_of("d").unwrap()["members"],
        json!(["a_id", "b_id", "c_id"])
    );
}

#[tokio::test]
async fn test_fan_in_with_failed_member_is_skipped() {
    let mut builder = GraphBuilder::new();
    let a = builder.declare("test:a", "a", Inputs::new()).unwrap();
    let b = builder.declare("test:b", "b", Inputs::new()).unwrap();
    let c = builder.declare("test:c", "c", Inputs::new()).unwrap();
    let all = Deferred::combine([a.output("id"), b.output("id"), c.output("id")]);
    builder
        .declare("test:d", "d", Inputs::new().with("members", all))
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new().fail_on("b", "quota exceeded");
    let report = run(&mut graph, &mock).await;

    assert!(!report.is_success());
    assert_eq!(report.outcome("a"), Some(&NodeOutcome::Created));
    assert_eq!(report.outcome("c"), Some(&NodeOutcome::Created));
    assert_eq!(
        report.outcome("b"),
        Some(&NodeOutcome::Failed("Provider error: quota exceeded".into()))
    );
    assert_eq!(
        graph.state("d"),
        Some(&NodeState::Skipped { blocked_by: "b".into() })
    );
    assert!(!mock.ids(MockOperation::Realize).contains(&"d".to_string()));
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_chain() {
    let mut builder = GraphBuilder::new();
    let x1 = builder.declare("test:x", "x1", Inputs::new()).unwrap();
    let x2 = builder
        .declare("test:x", "x2", Inputs::new().with("up", x1.output("id")))
        .unwrap();
    builder
        .declare("test:x", "x3", Inputs::new().with("up", x2.output("id")))
        .unwrap();
    let y1 = builder.declare("test:y", "y1", Inputs::new()).unwrap();
    builder
        .declare("test:y", "y2", Inputs::new().with("up", y1.output("id")))
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new().fail_on("x1", "boom");
    let report = run(&mut graph, &mock).await;

    let summary = report.summary();
    assert_eq!((summary.created, summary.failed, summary.skipped), (2, 1, 2));
    assert_eq!(
        report.outcome("x3"),
        Some(&NodeOutcome::Skipped { blocked_by: "x1".into() })
    );
    assert!(graph.state("y2").unwrap().is_realized());
}

#[tokio::test]
async fn test_map_and_format_transform_outputs() {
    let mut builder = GraphBuilder::new();
    let net = builder.declare("test:network", "net", Inputs::new()).unwrap();
    let upper = net
        .output("id")
        .map(|v| Value::String(v.as_str().unwrap_or_default().to_uppercase()));
    let label = Deferred::format("{}/vm", [net.output("name")]);
    builder
        .declare(
            "test:vm",
            "vm",
            Inputs::new().with("netId", upper).with("label", label),
        )
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new().with_outputs("net", json!({"id": "abc"}));
    run(&mut graph, &mock).await;

    let vm = graph.outputs_of("vm").unwrap();
    assert_eq!(vm["netId"], json!("ABC"));
    assert_eq!(vm["label"], json!("net/vm"));
}

#[tokio::test]
async fn test_missing_output_fails_consumer() {
    let mut builder = GraphBuilder::new();
    let net = builder.declare("test:network", "net", Inputs::new()).unwrap();
    builder
        .declare(
            "test:vm",
            "vm",
            Inputs::new().with("endpoint", net.output("primaryEndpoints.web")),
        )
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new();
    let report = run(&mut graph, &mock).await;

    assert!(graph.state("net").unwrap().is_realized());
    match report.outcome("vm") {
        Some(NodeOutcome::Failed(cause)) => assert!(cause.contains("primaryEndpoints.web")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(mock.realize_count(), 1);
}

#[tokio::test]
async fn test_exports_resolve_after_run() {
    let mut builder = GraphBuilder::new();
    let rg = builder
        .declare("test:rg", "rg", Inputs::new().with("location", "westeurope"))
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mut exports = ExportTable::new();
    exports.insert("resourceGroup", rg.output("name")).unwrap();
    exports.insert("location", rg.output("location")).unwrap();

    assert!(matches!(
        graph.export(&exports),
        Err(CloudError::UnresolvedExport { .. })
    ));

    run(&mut graph, &MockProvider::new()).await;
    let values = tokio_test::assert_ok!(graph.export(&exports));
    assert_eq!(values["resourceGroup"], json!("rg"));
    assert_eq!(values["location"], json!("westeurope"));
}

#[tokio::test]
async fn test_export_of_skipped_producer_is_unresolved() {
    let mut builder = GraphBuilder::new();
    let net = builder.declare("test:network", "net", Inputs::new()).unwrap();
    let vm = builder
        .declare("test:vm", "vm", Inputs::new().with("netId", net.output("id")))
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mut exports = ExportTable::new();
    exports.insert("vmId", vm.output("id")).unwrap();

    run(&mut graph, &MockProvider::new().fail_on("net", "boom")).await;
    let err = tokio_test::assert_err!(graph.export(&exports));
    assert!(matches!(
        err,
        CloudError::UnresolvedExport { ref name, ref producer } if name == "vmId" && producer == "vm"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_node() {
    let mut graph = chain_graph();
    let mock = MockProvider::new().delay("net", Duration::from_secs(3600));

    let report = Resolver::new(&mock)
        .with_options(RunOptions::default().with_timeout(Duration::from_secs(5)))
        .run(&mut graph)
        .await;

    assert!(matches!(report.outcome("net"), Some(NodeOutcome::Failed(c)) if c.contains("within")));
    assert_eq!(
        report.outcome("vm"),
        Some(&NodeOutcome::Skipped { blocked_by: "net".into() })
    );
}

#[tokio::test]
async fn test_cancel_before_start() {
    let mut graph = chain_graph();
    let mock = MockProvider::new();
    let token = CancelToken::new();
    token.cancel();

    let report = Resolver::new(&mock).with_cancel(token).run(&mut graph).await;
    assert!(report.cancelled);
    assert!(report.nodes.iter().all(|n| n.outcome == NodeOutcome::NotStarted));
    assert_eq!(mock.realize_count(), 0);
}

/// Cancels the run while realizing a given node
struct CancelOn {
    inner: MockProvider,
    trigger: &'static str,
    token: CancelToken,
}

#[async_trait]
impl ProviderAdapter for CancelOn {
    fn name(&self) -> &str {
        "cancel-on"
    }

    async fn realize(
        &self,
        kind: &str,
        id: &str,
        inputs: &Properties,
    ) -> terrace_cloud::Result<Properties> {
        if id == self.trigger {
            self.token.cancel();
        }
        self.inner.realize(kind, id, inputs).await
    }
}

#[tokio::test]
async fn test_cancel_lets_in_flight_finish() {
    let mut builder = GraphBuilder::new();
    for id in ["a", "b", "c"] {
        builder.declare("test:node", id, Inputs::new()).unwrap();
    }
    let mut graph = builder.finalize().unwrap();

    let token = CancelToken::new();
    let provider = CancelOn {
        inner: MockProvider::new(),
        trigger: "a",
        token: token.clone(),
    };
    let report = Resolver::new(&provider)
        .with_options(RunOptions::default().with_parallelism(1))
        .with_cancel(token)
        .run(&mut graph)
        .await;

    assert!(report.cancelled);
    assert_eq!(report.outcome("a"), Some(&NodeOutcome::Created));
    assert_eq!(report.outcome("b"), Some(&NodeOutcome::NotStarted));
    assert_eq!(graph.state("c"), Some(&NodeState::Pending));
}

/// Records the highest number of concurrent realizations
#[derive(Default)]
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ProviderAdapter for ConcurrencyProbe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn realize(
        &self,
        _kind: &str,
        _id: &str,
        inputs: &Properties,
    ) -> terrace_cloud::Result<Properties> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(inputs.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallelism_bound() {
    let mut builder = GraphBuilder::new();
    for i in 0..6 {
        builder
            .declare("test:node", format!("n{i}"), Inputs::new())
            .unwrap();
    }
    let mut graph = builder.finalize().unwrap();

    let probe = ConcurrencyProbe::default();
    let report = Resolver::new(&probe)
        .with_options(RunOptions::default().with_parallelism(2))
        .run(&mut graph)
        .await;

    assert!(report.is_success());
    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
}

fn stack(location: &str) -> terrace_cloud::DependencyGraph {
    let mut builder = GraphBuilder::new();
    let rg = builder
        .declare("test:rg", "rg", Inputs::new().with("location", location))
        .unwrap();
    builder
        .declare("test:vnet", "vnet", Inputs::new().with("rg", rg.output("name")))
        .unwrap();
    builder.finalize().unwrap()
}

#[tokio::test]
async fn test_persisted_state_makes_runs_idempotent() {
    let mut state = StackState::new();
    let mock = MockProvider::new();

    let mut first = stack("westeurope");
    let report = Resolver::new(&mock).with_state(&mut state).run(&mut first).await;
    assert_eq!(report.outcome("rg"), Some(&NodeOutcome::Created));
    assert_eq!(state.len(), 2);
    assert_eq!(state.get_resource("vnet").unwrap().dependencies, vec!["rg"]);

    let mut second = stack("westeurope");
    let report = Resolver::new(&mock).with_state(&mut state).run(&mut second).await;
    assert!(report.nodes.iter().all(|n| n.outcome == NodeOutcome::Unchanged));
    assert_eq!(mock.realize_count(), 2);
    assert_eq!(second.outputs_of("vnet").unwrap()["rg"], json!("rg"));

    let mut third = stack("northeurope");
    let report = Resolver::new(&mock).with_state(&mut state).run(&mut third).await;
    assert_eq!(report.outcome("rg"), Some(&NodeOutcome::Updated));
    assert_eq!(report.outcome("vnet"), Some(&NodeOutcome::Unchanged));
    assert_eq!(mock.realize_count(), 3);
}

#[tokio::test]
async fn test_invoke_nodes_are_read_and_not_persisted() {
    let mut builder = GraphBuilder::new();
    let sa = builder.declare("test:storage", "sa", Inputs::new()).unwrap();
    let keys = builder
        .invoke("test:listKeys", "keys", Inputs::new().with("account", sa.output("name")))
        .unwrap();
    builder
        .declare("test:app", "app", Inputs::new().with("key", keys.output("id")))
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mut state = StackState::new();
    let mock = MockProvider::new();
    let report = Resolver::new(&mock).with_state(&mut state).run(&mut graph).await;

    assert_eq!(report.outcome("keys"), Some(&NodeOutcome::Read));
    assert_eq!(mock.ids(MockOperation::Invoke), vec!["keys"]);
    assert!(state.get_resource("keys").is_none());
    assert_eq!(state.get_resource("app").unwrap().dependencies, vec!["sa"]);
}

#[tokio::test]
async fn test_secret_inputs_reach_provider_but_not_state() {
    let mut builder = GraphBuilder::new();
    builder
        .declare(
            "test:db",
            "db",
            Inputs::new().with("password", Input::secret("hunter2")),
        )
        .unwrap();
    let mut graph = builder.finalize().unwrap();

    let mut state = StackState::new();
    let mock = MockProvider::new().with_outputs("db", json!({"password": null}));
    Resolver::new(&mock).with_state(&mut state).run(&mut graph).await;

    assert_eq!(mock.calls()[0].inputs["password"], json!("hunter2"));
    let persisted = serde_json::to_string(&state).unwrap();
    assert!(!persisted.contains("hunter2"));
}

#[tokio::test]
async fn test_explicit_depends_on_orders_without_data() {
    let mut builder = GraphBuilder::new();
    let app = builder.declare("test:app", "app", Inputs::new()).unwrap();
    let db = builder.declare("test:db", "db", Inputs::new()).unwrap();
    builder.depends_on(&app, &db).unwrap();
    let mut graph = builder.finalize().unwrap();

    let mock = MockProvider::new();
    run(&mut graph, &mock).await;
    assert_eq!(mock.ids(MockOperation::Realize), vec!["db", "app"]);
}
