//! Demo workload: random -> timestamp -> branch_a | branch_b, looping until `max_steps`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use retrace_core::fingerprint::CallArgs;
use retrace_core::graph::{END, GraphBuilder, GraphError, NodeHandle, RouteHandle, StateGraph};
use retrace_core::instrument::{Instrumentor, ToolInstrument};
use retrace_core::topology::{RecordedGraph, record_graph_build};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

/// Shared random source for the `random` tool
pub type SharedRng = Arc<Mutex<StdRng>>;

pub fn rng(seed: Option<u64>) -> SharedRng {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Arc::new(Mutex::new(rng))
}

pub fn initial_state(max_steps: u32) -> Value {
    json!({
        "step": 0,
        "random_value": null,
        "timestamp": null,
        "path": [],
        "max_steps": max_steps,
    })
}

/// Node executions needed for `max_steps` iterations of the loop
pub fn recursion_limit(max_steps: u32) -> usize {
    3 * max_steps.max(1) as usize + 1
}

/// Declare the demo graph, recording its topology
pub fn build(inst: &Instrumentor, rng: SharedRng) -> Result<(StateGraph, RecordedGraph), GraphError> {
    let random_tool = inst.tool("random").function("demo::tool_random");
    let timestamp_tool = inst.tool("timestamp").function("demo::tool_timestamp");

    let random = NodeHandle::named("demo::node_random", move |state| {
        random_node(random_tool.clone(), rng.clone(), state)
    });
    let timestamp = NodeHandle::named("demo::node_timestamp", move |state| {
        timestamp_node(timestamp_tool.clone(), state)
    });

    record_graph_build(StateGraph::new(), |g| {
        g.add_node("random", inst.instrument_node("random", random))?;
        g.add_node("timestamp", inst.instrument_node("timestamp", timestamp))?;
        for branch in ["branch_a", "branch_b"] {
            let node = NodeHandle::named(format!("demo::node_{}", branch), move |state| {
                branch_node(branch, state)
            });
            g.add_node(branch, inst.instrument_node(branch, node))?;
        }

        g.set_entry_point("random")?;
        g.add_edge("random", "timestamp")?;
        g.add_conditional_edges(
            "timestamp",
            RouteHandle::named("demo::choose_branch", choose_branch),
            labels(&[("branch_a", "branch_a"), ("branch_b", "branch_b")]),
        )?;
        for branch in ["branch_a", "branch_b"] {
            g.add_conditional_edges(
                branch,
                RouteHandle::named("demo::route_after_branch", route_after_branch),
                labels(&[("continue", "random"), ("end", END)]),
            )?;
        }
        Ok(())
    })
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(label, target)| (label.to_string(), target.to_string()))
        .collect()
}

async fn random_node(tool: ToolInstrument, rng: SharedRng, mut state: Value) -> Result<Value, GraphError> {
    let value: f64 = tool
        .call(CallArgs::new(), || async move {
            let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Ok::<_, Infallible>(rng.random::<f64>())
        })
        .await
        .map_err(|e| GraphError::node_failed("random", e))?;
    state["random_value"] = json!(value);
    push_path(&mut state, "random");
    Ok(state)
}

async fn timestamp_node(tool: ToolInstrument, mut state: Value) -> Result<Value, GraphError> {
    let ts: f64 = tool
        .call(CallArgs::new(), || async {
            Ok::<_, Infallible>(chrono::Utc::now().timestamp_millis() as f64 / 1000.0)
        })
        .await
        .map_err(|e| GraphError::node_failed("timestamp", e))?;
    state["timestamp"] = json!(ts);
    push_path(&mut state, "timestamp");
    Ok(state)
}

async fn branch_node(branch: &'static str, mut state: Value) -> Result<Value, GraphError> {
    let step = state["step"].as_u64().unwrap_or(0) + 1;
    state["step"] = json!(step);
    push_path(&mut state, branch);
    Ok(state)
}

fn push_path(state: &mut Value, step: &str) {
    if let Some(path) = state["path"].as_array_mut() {
        path.push(json!(step));
    }
}

fn choose_branch(state: &Value) -> String {
    let value = state["random_value"].as_f64().unwrap_or(0.0);
    if value >= 0.5 { "branch_a" } else { "branch_b" }.to_string()
}

fn route_after_branch(state: &Value) -> String {
    let step = state["step"].as_u64().unwrap_or(0);
    let max_steps = state["max_steps"].as_u64().unwrap_or(3);
    if step >= max_steps { "end" } else { "continue" }.to_string()
}
