//! Core node types running inside a deployed registry

use std::sync::Arc;

use flow_nodes::register_core_nodes;
use flow_runtime::{
    DeployType, FlowConfigBuilder, FlowError, FlowRegistry, MemoryFlowStorage, Message,
    NodeTypeRegistry, RuntimeServices, StatusPayload,
};
use parking_lot::Mutex;
use serde_json::json;

type Received = Arc<Mutex<Vec<(String, Message)>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn types(received: &Received) -> Arc<NodeTypeRegistry> {
    let types = Arc::new(NodeTypeRegistry::new());
    register_core_nodes(&types);

    let r = received.clone();
    types.register_fn("test", "recorder", move |node| {
        let r = r.clone();
        node.on_input(move |node, msg| {
            r.lock().push((node.alias().unwrap_or(node.id()).to_string(), msg));
            Ok(())
        });
        Ok(())
    });
    types.register_fn("test", "fail", |node| {
        node.on_input(|_, msg| Err(FlowError::handler("failed on purpose", Some(msg))));
        Ok(())
    });
    types.register_fn("test", "reporter", |node| {
        node.on_input(|node, msg| {
            node.status(StatusPayload::text("working").with_shape("dot"));
            node.send(msg);
            Ok(())
        });
        Ok(())
    });
    types
}

async fn deploy(config: Vec<flow_runtime::NodeConfig>) -> (FlowRegistry, Received) {
    init_logging();
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let services = RuntimeServices::new(types(&received), Arc::new(MemoryFlowStorage::new()));
    let registry = FlowRegistry::new(services);
    registry
        .set_flows(config, DeployType::Full, true)
        .await
        .unwrap();
    registry.start_flows().await;
    (registry, received)
}

fn received_by(received: &Received, id: &str) -> Vec<Message> {
    received
        .lock()
        .iter()
        .filter(|(to, _)| to == id)
        .map(|(_, msg)| msg.clone())
        .collect()
}

#[tokio::test]
async fn test_catch_forwards_errors() {
    let config = FlowConfigBuilder::new()
        .add_tab("t1", "Main")
        .add_node("f", "fail")
        .add_node("c", "catch")
        .add_node("out", "recorder")
        .wire("c", 0, "out")
        .build();
    let (registry, received) = deploy(config).await;

    let mut msg = Message::with_payload(42);
    msg.set_msg_id("m1");
    registry.get_node("f").unwrap().receive(msg);

    let caught = received_by(&received, "out");
    assert_eq!(caught.len(), 1);
    assert_eq!(caught[0].msg_id(), Some("m1"));
    assert_eq!(caught[0].payload(), Some(&json!(42)));
    assert_eq!(caught[0].get("error").unwrap()["message"], json!("failed on purpose"));
    assert_eq!(caught[0].get("error").unwrap()["source"]["id"], json!("f"));
}

#[tokio::test]
async fn test_scoped_catch_ignores_other_nodes() {
    let config = FlowConfigBuilder::new()
        .add_tab("t1", "Main")
        .add_node("f1", "fail")
        .add_node("f2", "fail")
        .add_node("c", "catch")
        .with_prop("scope", json!(["f2"]))
        .add_node("out", "recorder")
        .wire("c", 0, "out")
        .build();
    let (registry, received) = deploy(config).await;

    registry.get_node("f1").unwrap().receive(Message::new());
    assert!(received_by(&received, "out").is_empty());

    registry.get_node("f2").unwrap().receive(Message::new());
    assert_eq!(received_by(&received, "out").len(), 1);
}

#[tokio::test]
async fn test_status_node_reports_source() {
    let config = FlowConfigBuilder::new()
        .add_tab("t1", "Main")
        .add_node("r", "reporter")
        .with_prop("name", "worker")
        .add_node("s", "status")
        .add_node("out", "recorder")
        .wire("s", 0, "out")
        .build();
    let (registry, received) = deploy(config).await;

    registry.get_node("r").unwrap().receive(Message::new());

    let reports = received_by(&received, "out");
    assert_eq!(reports.len(), 1);
    let status = reports[0].get("status").unwrap();
    assert_eq!(status["text"], json!("working"));
    assert_eq!(status["shape"], json!("dot"));
    assert_eq!(
        status["source"],
        json!({"id": "r", "type": "reporter", "name": "worker"})
    );
}

#[tokio::test]
async fn test_link_crosses_tabs() {
    let config = FlowConfigBuilder::new()
        .add_tab("t1", "Sender")
        .add_node("lo", "link out")
        .with_prop("links", json!(["li"]))
        .add_tab("t2", "Receiver")
        .add_node("li", "link in")
        .add_node("out", "recorder")
        .wire("li", 0, "out")
        .build();
    let (registry, received) = deploy(config).await;

    registry
        .get_node("lo")
        .unwrap()
        .receive(Message::with_payload("across"));

    let delivered = received_by(&received, "out");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload(), Some(&json!("across")));
}

#[tokio::test]
async fn test_catch_inside_subflow_handles_interior_errors() {
    let config = FlowConfigBuilder::new()
        .add_subflow("sf", "Guarded")
        .add_node("f", "fail")
        .add_node("c", "catch")
        .add_node("inner_out", "recorder")
        .wire("c", 0, "inner_out")
        .subflow_input(0, "f")
        .add_tab("t1", "Main")
        .add_subflow_instance("ref", "sf")
        .add_node("c_outer", "catch")
        .add_node("outer_out", "recorder")
        .wire("c_outer", 0, "outer_out")
        .build();
    let (registry, received) = deploy(config).await;

    registry.get_node("ref").unwrap().receive(Message::new());

    assert_eq!(received_by(&received, "inner_out").len(), 1);
    assert!(received_by(&received, "outer_out").is_empty());
}
