//! Property suites over randomized plans and adapter behavior.
//!
//! Every generated execution is driven to rest and then checked against
//! the engine's core invariants: FSM soundness of the audit stream,
//! exactly one terminal state change, and monotonic sequences.

use crate::prelude::*;
use cdr_adapters::ScriptedOutcome;
use cdr_core::test_support::plan_of;
use cdr_core::{
    ActionClass, AdapterVerdict, ExecutionStatus, SlaClass, StepStatus,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Behavior {
    Ok,
    Transient,
    Permanent,
    Auth,
}

fn behavior() -> impl Strategy<Value = Behavior> {
    prop_oneof![
        3 => Just(Behavior::Ok),
        1 => Just(Behavior::Transient),
        1 => Just(Behavior::Permanent),
        1 => Just(Behavior::Auth),
    ]
}

fn parse_exec_status(s: &str) -> Option<ExecutionStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

fn parse_step_status(s: &str) -> Option<StepStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

async fn run_case(behaviors: Vec<Behavior>, partial_allowed: bool) {
    let s = spec();
    let assets: Vec<String> = (0..behaviors.len()).map(|i| format!("asset-{i}")).collect();
    let step_defs: Vec<(&str, ActionClass)> = assets
        .iter()
        .map(|a| (a.as_str(), ActionClass::Read))
        .collect();
    let mut plan = plan_of(&step_defs, SlaClass::Medium);
    plan.partial_allowed = partial_allowed;

    for (asset, behavior) in assets.iter().zip(&behaviors) {
        match behavior {
            Behavior::Ok => {}
            Behavior::Transient => s.adapter.script(
                asset,
                ScriptedOutcome::Fail {
                    verdict: AdapterVerdict::Transient,
                },
            ),
            Behavior::Permanent => s.adapter.script(
                asset,
                ScriptedOutcome::Fail {
                    verdict: AdapterVerdict::Permanent,
                },
            ),
            Behavior::Auth => s.adapter.script(
                asset,
                ScriptedOutcome::Fail {
                    verdict: AdapterVerdict::Auth,
                },
            ),
        }
    }

    let id = s.submit(plan);
    let terminal = s.drive(&id).await;
    assert!(terminal.is_terminal());

    let events = s.store.events_since(&id, 0);

    // Sequences are strictly increasing without gaps
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, index as u64 + 1);
    }

    // At most one terminal execution state change
    let terminal_rows = events
        .iter()
        .filter(|e| {
            e.step_id.is_none()
                && e.to_status
                    .as_deref()
                    .and_then(parse_exec_status)
                    .map(|status| status.is_terminal())
                    .unwrap_or(false)
        })
        .count();
    assert_eq!(terminal_rows, 1);

    // Every recorded edge is a legal state-machine edge
    for event in &events {
        let (Some(from), Some(to)) = (&event.from_status, &event.to_status) else {
            continue;
        };
        if event.step_id.is_some() {
            let (Some(from), Some(to)) = (parse_step_status(from), parse_step_status(to)) else {
                panic!("unparseable step edge {from} -> {to}");
            };
            assert!(
                StepStatus::can_transition(from, to),
                "illegal step edge {from} -> {to}"
            );
        } else {
            let (Some(from), Some(to)) = (parse_exec_status(from), parse_exec_status(to)) else {
                panic!("unparseable execution edge {from} -> {to}");
            };
            assert!(
                ExecutionStatus::can_transition(from, to),
                "illegal execution edge {from} -> {to}"
            );
        }
    }

    // No lock survives a settled execution
    assert!(s.store.list_locks().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_plans_settle_soundly(
        behaviors in proptest::collection::vec(behavior(), 1..4),
        partial_allowed in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .expect("runtime");
        runtime.block_on(run_case(behaviors, partial_allowed));
    }
}
