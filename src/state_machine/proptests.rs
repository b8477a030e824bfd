//! Property-based tests for the flow engine
//!
//! These tests verify key invariants hold across arbitrary inputs.

use super::*;
use crate::flows::advisory;
use crate::flows::catalog::StaticCatalog;
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// Replies a human (or collaborator) might send at any point
fn arb_reply() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        4 => (1u8..6).prop_map(|n| Some(n.to_string())),
        2 => Just(Some(advisory::LANGUAGE_SELECTED.to_string())),
        1 => Just(None),
        1 => "[a-z ]{0,12}".prop_map(Some),
        1 => Just(Some(r#"{"chunks": [{"chunk": "Section 138"}]}"#.to_string())),
        1 => Just(Some(r#"{"chunks": []}"#.to_string())),
        1 => Just(Some(
            r#"{"r_name": "R", "r_phone": "1", "r_email": "r@x", "c_name": "C", "c_phone": "2",
                "c_email": "c@x", "c_address": "A", "c_city": "P", "dispute_details": "d"}"#
                .to_string()
        )),
        1 => Just(Some(
            r#"{"r_name": "R", "r_phone": "1", "r_email": "r@x", "c_name": "C", "c_phone": "2",
                "c_email": "c@x", "c_address": "A", "c_city": "P", "dispute_details": "d",
                "history": "x", "providers": 3, "pending_choice": "nowhere"}"#
                .to_string()
        )),
    ]
}

fn arb_signal() -> impl Strategy<Value = TurnSignal> {
    prop_oneof![
        3 => Just(TurnSignal::Continue),
        2 => Just(TurnSignal::AwaitInput),
        2 => Just(TurnSignal::AwaitCallback),
        1 => Just(TurnSignal::Busy),
        1 => Just(TurnSignal::Idle),
    ]
}

// ============================================================================
// Test Helpers
// ============================================================================

fn advisory_flow() -> Arc<Flow> {
    advisory::build(Arc::new(StaticCatalog::sample()), DEFAULT_MAX_HOPS).unwrap()
}

/// zero → s0 → s1 → … → s(n-1) → s0, leaving for `end` on "stop"
fn ring_flow(signals: Vec<TurnSignal>) -> Arc<Flow> {
    let names: Vec<String> = (0..signals.len()).map(|i| format!("s{i}")).collect();
    let mut chain = vec!["zero".to_string()];
    chain.extend(names.iter().cloned());
    chain.push(names[0].clone());

    let mut graph = GraphBuilder::new("zero", "end");
    graph
        .add_chain(chain.as_slice())
        .add_guarded_edge(names[names.len() - 1].as_str(), "end", Guard::input_eq("stop"));

    let mut builder = Flow::builder("ring", graph).max_hops(16);
    for (name, signal) in names.iter().zip(signals) {
        builder.hooks_mut().on_enter(name.as_str(), move |_| Ok(signal));
    }
    builder.hooks_mut().on_enter("end", |_| Ok(TurnSignal::Continue));
    builder.build().unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    // A successful turn always leaves the session suspended or ended
    #[test]
    fn prop_turn_ends_suspended_or_terminal(
        signals in proptest::collection::vec(arb_signal(), 1..6),
        inputs in proptest::collection::vec(prop_oneof![Just("go"), Just("stop")], 1..10),
    ) {
        let flow = ring_flow(signals);
        let mut session = flow.new_session();

        for input in inputs {
            match flow.process_turn(&mut session, Some(input.to_string()), &mut Vec::new()) {
                Ok(report) => {
                    prop_assert!(!report.visited.is_empty());
                    prop_assert_eq!(report.signal, session.signal);
                    prop_assert!(report.ended || session.signal.is_suspend());
                    prop_assert_eq!(report.ended, flow.graph().is_terminal(&session.state));
                    if report.ended {
                        break;
                    }
                }
                Err(EngineError::InvalidSignal { signal, .. }) => {
                    prop_assert!(!signal.is_hook_result());
                    break;
                }
                Err(EngineError::RunawayTurn { hops, .. }) => {
                    prop_assert_eq!(hops, 16);
                    break;
                }
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }
    }

    // The bundled flow never hits a missing edge or a failed precondition
    #[test]
    fn prop_advisory_flow_handles_any_reply(
        replies in proptest::collection::vec(arb_reply(), 1..40),
    ) {
        let flow = advisory_flow();
        let mut session = flow.new_session();

        for reply in replies {
            if flow.graph().is_terminal(&session.state) {
                session = flow.new_session();
            }
            let report = flow.process_turn(&mut session, reply, &mut Vec::new());
            prop_assert!(report.is_ok(), "turn failed at {}: {:?}", session.state, report);
            let report = report.unwrap();
            prop_assert!(report.ended || session.signal.is_suspend());
        }
    }

    // A restored session replays the same inputs exactly like the live one
    #[test]
    fn prop_snapshot_replay_matches_live(
        prefix in proptest::collection::vec(arb_reply(), 0..15),
        suffix in proptest::collection::vec(arb_reply(), 1..15),
    ) {
        let flow = advisory_flow();
        let mut live = flow.new_session();
        for reply in prefix {
            if flow.process_turn(&mut live, reply, &mut Vec::new()).is_err() {
                break;
            }
        }

        let snapshot = live.save();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: Snapshot = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(&decoded, &snapshot);

        let mut restored = Session::restore(decoded);
        prop_assert_eq!(restored.signal, TurnSignal::Idle);
        prop_assert!(restored.input.is_none());
        prop_assert_eq!(&restored.save(), &snapshot);

        for reply in suffix {
            let mut live_out = Vec::new();
            let mut restored_out = Vec::new();
            let a = flow.process_turn(&mut live, reply.clone(), &mut live_out);
            let b = flow.process_turn(&mut restored, reply, &mut restored_out);
            match (a, b) {
                (Ok(a), Ok(b)) => {
                    prop_assert_eq!(a.visited, b.visited);
                    prop_assert_eq!(live_out.len(), restored_out.len());
                }
                (Err(_), Err(_)) => break,
                (a, b) => prop_assert!(false, "diverged: {:?} vs {:?}", a, b),
            }
        }

        // Dispute references are freshly generated on each registration
        let comparable = |s: &Session| {
            let mut vars = s.variables.clone();
            vars.remove("dispute_reference");
            (s.state.clone(), vars)
        };
        prop_assert_eq!(comparable(&live), comparable(&restored));
    }

    // The most recently declared matching guard wins, the fallback only when none match
    #[test]
    fn prop_latest_matching_guard_wins(
        keys in proptest::collection::vec("[a-c]", 0..6),
        input in "[a-d]",
    ) {
        let mut graph = GraphBuilder::new("zero", "end");
        graph.add_chain(&["zero", "hub", "end"]);
        for (i, key) in keys.iter().enumerate() {
            let dest = format!("d{i}");
            graph
                .add_guarded_edge("hub", dest.as_str(), Guard::input_eq(key))
                .add_edge(dest.as_str(), "end");
        }
        let graph = graph.build().unwrap();

        let vars = Variables::new();
        let ctx = TurnContext::new(Some(input.as_str()), &vars);
        let edge = resolve(&graph, &StateId::from("hub"), &ctx).unwrap();

        let expected = keys
            .iter()
            .rposition(|k| *k == input)
            .map_or_else(|| "end".to_string(), |i| format!("d{i}"));
        prop_assert_eq!(edge.dest.as_str(), expected.as_str());
        prop_assert_eq!(edge.is_fallback(), expected == "end");
    }
}

#[test]
fn test_advisory_graph_is_well_formed() {
    let flow = advisory_flow();
    let graph = flow.graph();
    let reachable = graph.reachable_states();

    assert!(reachable.contains(graph.terminal()));
    for state in graph.states() {
        if graph.is_terminal(state) {
            assert!(graph.outgoing(state).is_empty());
        } else {
            assert!(!graph.outgoing(state).is_empty(), "dead end at {state}");
            let fallbacks = graph.outgoing(state).iter().filter(|e| e.is_fallback()).count();
            assert!(fallbacks <= 1);
        }
    }
}
