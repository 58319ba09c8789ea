// tests/run_status.rs

use reqwest::StatusCode;

use dbx_tester::exec::databricks::{classify_failure, parse_run_status};
use dbx_tester::exec::{RunStatus, RunnerError};
use dbx_tester::types::{LifecycleState, NodeStatus, ProcessState, ResultState};

#[test]
fn lifecycle_and_result_collapse_into_node_status() {
    assert_eq!(RunStatus::running().node_status(), NodeStatus::Running);

    let queued = RunStatus {
        lifecycle: LifecycleState::Queued,
        result: None,
    };
    assert_eq!(queued.node_status(), NodeStatus::Running);

    assert_eq!(
        RunStatus::terminated(ResultState::Success).node_status(),
        NodeStatus::Success
    );
    assert_eq!(
        RunStatus::terminated(ResultState::Canceled).node_status(),
        NodeStatus::Canceled
    );
    assert_eq!(
        RunStatus::terminated(ResultState::UpstreamCanceled).node_status(),
        NodeStatus::Canceled
    );
    for result in [
        ResultState::Failed,
        ResultState::Timedout,
        ResultState::SuccessWithFailures,
        ResultState::UpstreamFailed,
    ] {
        assert_eq!(RunStatus::terminated(result).node_status(), NodeStatus::Failed);
    }

    let crashed = RunStatus {
        lifecycle: LifecycleState::InternalError,
        result: None,
    };
    assert_eq!(crashed.node_status(), NodeStatus::Failed);
}

#[test]
fn runs_get_body_is_parsed() {
    let body = r#"{
        "run_id": 455644833,
        "state": {
            "life_cycle_state": "TERMINATED",
            "result_state": "SUCCESS",
            "state_message": ""
        },
        "tasks": []
    }"#;

    let status = parse_run_status(body).unwrap();
    assert_eq!(status, RunStatus::terminated(ResultState::Success));

    let pending = parse_run_status(r#"{"state": {"life_cycle_state": "PENDING"}}"#).unwrap();
    assert_eq!(pending.lifecycle, LifecycleState::Pending);
    assert_eq!(pending.result, None);
}

#[test]
fn unknown_platform_states_do_not_break_parsing() {
    let status = parse_run_status(
        r#"{"state": {"life_cycle_state": "SOMETHING_NEW", "result_state": "ALSO_NEW"}}"#,
    )
    .unwrap();
    assert_eq!(status.lifecycle, LifecycleState::Unknown);
    assert_eq!(status.result, Some(ResultState::Unknown));
    assert_eq!(status.node_status(), NodeStatus::Failed);

    assert!(parse_run_status("not json").is_err());
}

#[test]
fn http_failures_are_classified() {
    assert!(matches!(
        classify_failure(StatusCode::NOT_FOUND, "gone".to_string()),
        RunnerError::NotFound(_)
    ));
    assert!(matches!(
        classify_failure(StatusCode::TOO_MANY_REQUESTS, String::new()),
        RunnerError::Unavailable(_)
    ));
    assert!(matches!(
        classify_failure(StatusCode::BAD_GATEWAY, String::new()),
        RunnerError::Unavailable(_)
    ));
    assert!(matches!(
        classify_failure(StatusCode::BAD_REQUEST, "bad params".to_string()),
        RunnerError::Rejected(msg) if msg.contains("bad params")
    ));
}

#[test]
fn process_state_machine_only_moves_forward() {
    use ProcessState::*;

    assert!(Pending.can_transition_to(Running));
    assert!(Running.can_transition_to(Success));
    assert!(Running.can_transition_to(Failed));
    assert!(Running.can_transition_to(Canceled));
    assert!(Pending.can_transition_to(Canceled));
    assert!(Failed.can_transition_to(Canceled));

    assert!(!Success.can_transition_to(Canceled));
    assert!(!Canceled.can_transition_to(Running));
    assert!(!Failed.can_transition_to(Running));
    assert!(!Pending.can_transition_to(Success));

    assert_eq!(format!("{:<8}|", Failed), "FAILED  |");
}
