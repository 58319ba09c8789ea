// tests/process_manager.rs

use dbx_tester::config::Settings;
use dbx_tester::dag::{DependencyGraphBuilder, Job, NodeIndex};
use dbx_tester::engine::{MemoryLogSink, ProcessManager};
use dbx_tester::errors::DbxTesterError;
use dbx_tester::types::{NodeStatus, ProcessState};
use dbx_tester_test_utils::builders::{job, job_after};
use dbx_tester_test_utils::fake_runner::{
    ScriptedJobRunner, canceled, failed, running, succeeded, transient,
};
use dbx_tester_test_utils::{init_tracing, with_timeout};

type Manager = ProcessManager<ScriptedJobRunner, MemoryLogSink>;

fn manager_with(runner: &ScriptedJobRunner) -> Manager {
    ProcessManager::new(runner.clone(), MemoryLogSink::new(), Settings::default())
}

/// X and Y are entry points, Z depends on both.
///
/// Node indices: Z = 0, X = 1, Y = 2. Job ids: X = 1, Y = 2, Z = 3.
fn fan_in() -> (Job, ScriptedJobRunner) {
    let x = job("x");
    let y = job("y");
    let z = job_after("z", &[&x, &y]);
    let runner = ScriptedJobRunner::new()
        .with_job("x", 1)
        .with_job("y", 2)
        .with_job("z", 3);
    (z, runner)
}

async fn start(manager: &mut Manager, root: &Job) -> String {
    let graph = DependencyGraphBuilder::build(root).unwrap();
    let id = manager.register_process(graph).await.unwrap();
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Pending);
    manager.init(&id).await.unwrap();
    id
}

#[tokio::test]
async fn fan_in_succeeds_once_every_node_succeeds() {
    init_tracing();
    let (root, runner) = fan_in();
    let runner = runner.with_script(1, vec![running(), succeeded()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &root).await;
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Running);
    assert_eq!(runner.starts(), vec![1, 2]);

    // X still running, Y done: Z must wait.
    let report = manager.monitor().await;
    assert!(report.started.is_empty());
    assert_eq!(runner.starts(), vec![1, 2]);

    // X done: Z is unblocked.
    let report = manager.monitor().await;
    assert_eq!(report.started, vec![(id.clone(), NodeIndex(0))]);
    assert_eq!(runner.starts(), vec![1, 2, 3]);
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Running);

    // Z done: the process succeeds and is retired.
    let report = manager.monitor().await;
    let transition = report.transition_of(&id).unwrap();
    assert_eq!(transition.from, ProcessState::Running);
    assert_eq!(transition.to, ProcessState::Success);
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Success);
    assert!(manager.process(&id).is_none());
    assert!(!manager.has_running());

    let records = manager.sink().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].final_state, ProcessState::Success);
    assert!(records[0].nodes.iter().all(|n| n.run_id.is_some()));
    assert!(records[0].finished_at.is_some());
}

#[tokio::test]
async fn failed_entry_point_fails_process_and_blocks_dependents() {
    init_tracing();
    let (root, runner) = fan_in();
    let runner = runner
        .with_script(1, vec![failed()])
        .with_script(2, vec![running()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &root).await;
    let report = manager.monitor().await;

    assert_eq!(report.transition_of(&id).unwrap().to, ProcessState::Failed);
    assert!(report.started.is_empty());
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Failed);

    // Later ticks never touch a failed process.
    let polls_before = runner.poll_count();
    manager.monitor().await;
    manager.monitor().await;
    assert_eq!(runner.poll_count(), polls_before);
    assert_eq!(runner.starts(), vec![1, 2]);

    // The sibling is not canceled by the failure itself.
    assert!(runner.cancels().is_empty());

    let process = manager.process(&id).unwrap();
    assert_eq!(process.node_status(NodeIndex(1)), Some(NodeStatus::Failed));
    assert_eq!(process.node_status(NodeIndex(2)), Some(NodeStatus::Running));
    assert!(process.run_handle(NodeIndex(0)).is_none());

    let records = manager.sink().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].final_state, ProcessState::Failed);
}

#[tokio::test]
async fn canceled_head_of_chain_cancels_process() {
    init_tracing();
    let a = job("a");
    let b = job_after("b", &[&a]);
    let c = job_after("c", &[&b]);
    let runner = ScriptedJobRunner::new()
        .with_job("a", 1)
        .with_job("b", 2)
        .with_job("c", 3)
        .with_script(1, vec![running(), canceled()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &c).await;
    assert_eq!(runner.starts(), vec![1]);

    manager.monitor().await;
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Running);

    let report = manager.monitor().await;
    assert_eq!(report.transition_of(&id).unwrap().to, ProcessState::Canceled);
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Canceled);

    manager.monitor().await;
    assert_eq!(runner.starts(), vec![1]);
    assert!(runner.cancels().is_empty());
}

#[tokio::test]
async fn independent_processes_do_not_affect_each_other() {
    init_tracing();
    let broken = job("broken");
    let healthy = job("healthy");
    let runner = ScriptedJobRunner::new()
        .with_job("broken", 1)
        .with_job("healthy", 2)
        .with_script(1, vec![failed()])
        .with_script(2, vec![running(), running(), succeeded()]);
    let mut manager = manager_with(&runner);

    let first = start(&mut manager, &broken).await;
    let second = start(&mut manager, &healthy).await;
    assert_ne!(first, second);

    manager.monitor().await;
    assert_eq!(manager.state(&first).unwrap(), ProcessState::Failed);
    assert_eq!(manager.state(&second).unwrap(), ProcessState::Running);

    manager.monitor().await;
    assert_eq!(manager.state(&second).unwrap(), ProcessState::Running);

    manager.monitor().await;
    assert_eq!(manager.state(&first).unwrap(), ProcessState::Failed);
    assert_eq!(manager.state(&second).unwrap(), ProcessState::Success);
}

#[tokio::test]
async fn transient_poll_error_leaves_cache_untouched() {
    init_tracing();
    let only = job("only");
    let runner = ScriptedJobRunner::new()
        .with_job("only", 1)
        .with_script(1, vec![transient("503 Service Unavailable"), succeeded()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &only).await;

    let report = manager.monitor().await;
    assert_eq!(report.poll_errors, 1);
    assert!(report.transitions.is_empty());
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Running);
    let process = manager.process(&id).unwrap();
    assert!(process.run(NodeIndex::ROOT).unwrap().status.is_none());

    let report = manager.monitor().await;
    assert_eq!(report.poll_errors, 0);
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Success);
}

#[tokio::test]
async fn terminal_nodes_are_never_polled_or_started_again() {
    init_tracing();
    let (root, runner) = fan_in();
    let runner = runner.with_script(2, vec![running()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &root).await;
    for _ in 0..4 {
        manager.monitor().await;
    }

    let x_handle = manager
        .process(&id)
        .unwrap()
        .run_handle(NodeIndex(1))
        .cloned()
        .unwrap();
    let x_polls = runner.polls().iter().filter(|h| **h == x_handle).count();
    assert_eq!(x_polls, 1);
    assert_eq!(runner.start_count(1), 1);
    assert_eq!(runner.start_count(3), 0);

    runner.script_runs(2, vec![succeeded()]);
    manager.monitor().await;
    manager.monitor().await;

    assert_eq!(manager.state(&id).unwrap(), ProcessState::Success);
    assert_eq!(runner.start_count(1), 1);
    assert_eq!(runner.start_count(2), 1);
    assert_eq!(runner.start_count(3), 1);
}

#[tokio::test]
async fn failure_in_same_tick_blocks_newly_ready_nodes() {
    init_tracing();
    // Z depends on X only; W depends on Y. Y fails in the tick where X succeeds.
    let x = job("x");
    let y = job("y");
    let z = job_after("z", &[&x]);
    let w = job_after("w", &[&y]);
    let root = job_after("root", &[&z, &w]);
    let runner = ScriptedJobRunner::new()
        .with_job("x", 1)
        .with_job("y", 2)
        .with_job("z", 3)
        .with_job("w", 4)
        .with_job("root", 5)
        .with_script(2, vec![failed()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &root).await;
    let report = manager.monitor().await;

    assert_eq!(manager.state(&id).unwrap(), ProcessState::Failed);
    assert!(report.started.is_empty());
    assert_eq!(runner.start_count(3), 0);
}

#[tokio::test]
async fn rejected_entry_start_fails_process_during_init() {
    init_tracing();
    let only = job("only");
    let runner = ScriptedJobRunner::new()
        .with_job("only", 1)
        .with_rejected_start(1);
    let mut manager = manager_with(&runner);

    let graph = DependencyGraphBuilder::build(&only).unwrap();
    let id = manager.register_process(graph).await.unwrap();
    manager.init(&id).await.unwrap();

    assert_eq!(manager.state(&id).unwrap(), ProcessState::Failed);
    let run = manager.process(&id).unwrap().run(NodeIndex::ROOT).unwrap();
    assert!(run.handle.is_none());
    assert!(run.error.as_deref().unwrap().contains("cannot be started"));

    let records = manager.sink().records();
    assert_eq!(records[0].nodes[0].error, run.error);
}

#[tokio::test]
async fn rejected_downstream_start_is_not_retried() {
    init_tracing();
    let a = job("a");
    let b = job_after("b", &[&a]);
    let c = job_after("c", &[&b]);
    let runner = ScriptedJobRunner::new()
        .with_job("a", 1)
        .with_job("b", 2)
        .with_job("c", 3)
        .with_rejected_start(2);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &c).await;
    let report = manager.monitor().await;

    assert_eq!(report.transition_of(&id).unwrap().to, ProcessState::Failed);
    manager.monitor().await;
    assert_eq!(runner.start_count(2), 1);
    assert_eq!(runner.start_count(3), 0);
}

#[tokio::test]
async fn missing_job_fails_registration() {
    init_tracing();
    let known = job("known");
    let root = job_after("ghost", &[&known]);
    let runner = ScriptedJobRunner::new().with_job("known", 1);
    let mut manager = manager_with(&runner);

    let graph = DependencyGraphBuilder::build(&root).unwrap();
    match manager.register_process(graph).await {
        Err(DbxTesterError::JobNotFound(msg)) => assert!(msg.contains("ghost")),
        other => panic!("Expected JobNotFound, got: {:?}", other),
    }
    assert_eq!(manager.process_ids().count(), 0);
    assert!(runner.starts().is_empty());
}

#[tokio::test]
async fn jobs_by_id_are_verified() {
    let runner = ScriptedJobRunner::new().with_job_id(42);
    let mut manager = manager_with(&runner);

    let present = Job::by_id(42).build().unwrap();
    let graph = DependencyGraphBuilder::build(&present).unwrap();
    assert!(manager.register_process(graph).await.is_ok());

    let absent = Job::by_id(43).build().unwrap();
    let graph = DependencyGraphBuilder::build(&absent).unwrap();
    assert!(matches!(
        manager.register_process(graph).await,
        Err(DbxTesterError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn stop_cancels_in_flight_nodes_only() {
    init_tracing();
    let (root, runner) = fan_in();
    let runner = runner.with_script(2, vec![running()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &root).await;
    manager.monitor().await;

    let y_handle = manager
        .process(&id)
        .unwrap()
        .run_handle(NodeIndex(2))
        .cloned()
        .unwrap();

    with_timeout(manager.stop(&id)).await.unwrap();

    assert_eq!(manager.state(&id).unwrap(), ProcessState::Canceled);
    assert_eq!(runner.cancels(), vec![y_handle]);

    let log = manager.process_log(&id).unwrap();
    assert!(log.nodes[2].cancel_requested);
    assert!(!log.nodes[1].cancel_requested);

    // Stopping again is a no-op.
    manager.stop(&id).await.unwrap();
    assert_eq!(runner.cancels().len(), 1);
    assert_eq!(manager.sink().records().len(), 1);
}

#[tokio::test]
async fn stop_moves_failed_process_to_canceled() {
    init_tracing();
    let (root, runner) = fan_in();
    let runner = runner
        .with_script(1, vec![failed()])
        .with_script(2, vec![running()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &root).await;
    manager.monitor().await;
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Failed);

    manager.stop(&id).await.unwrap();
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Canceled);
    assert_eq!(runner.cancels().len(), 1);
}

#[tokio::test]
async fn cancel_in_flight_cancels_siblings_of_failed_process() {
    init_tracing();
    let (root, runner) = fan_in();
    let runner = runner
        .with_script(1, vec![failed()])
        .with_script(2, vec![running()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &root).await;
    manager.monitor().await;
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Failed);

    let y_handle = manager.process(&id).unwrap().run_handle(NodeIndex(2)).cloned().unwrap();
    assert_eq!(manager.cancel_in_flight(&id).await.unwrap(), 1);
    assert_eq!(runner.cancels(), vec![y_handle]);
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Failed);

    let records = manager.sink().records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].final_state, ProcessState::Failed);
    assert!(records[1].nodes[2].cancel_requested);
    assert!(!records[1].nodes[1].cancel_requested);
}

#[tokio::test]
async fn cancel_in_flight_requires_failed_process() {
    init_tracing();
    let only = job("only");
    let runner = ScriptedJobRunner::new()
        .with_job("only", 1)
        .with_script(1, vec![running()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &only).await;
    let result = manager.cancel_in_flight(&id).await;

    assert!(matches!(
        result,
        Err(DbxTesterError::InvalidProcessOperation { .. })
    ));
    assert!(runner.cancels().is_empty());
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Running);
}

#[tokio::test]
async fn cancel_errors_do_not_block_stop() {
    init_tracing();
    let only = job("only");
    let runner = ScriptedJobRunner::new()
        .with_job("only", 1)
        .with_script(1, vec![running()])
        .with_failing_cancel();
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &only).await;
    manager.stop(&id).await.unwrap();

    assert_eq!(manager.state(&id).unwrap(), ProcessState::Canceled);
    assert_eq!(runner.cancels().len(), 1);
}

#[tokio::test]
async fn stop_all_stops_pending_and_running_processes() {
    init_tracing();
    let running_job = job("slow");
    let pending_job = job("idle");
    let runner = ScriptedJobRunner::new()
        .with_job("slow", 1)
        .with_job("idle", 2)
        .with_script(1, vec![running()]);
    let mut manager = manager_with(&runner);

    let running_id = start(&mut manager, &running_job).await;
    let graph = DependencyGraphBuilder::build(&pending_job).unwrap();
    let pending_id = manager.register_process(graph).await.unwrap();

    let stopped = manager.stop_all().await;

    assert_eq!(stopped.len(), 2);
    assert_eq!(manager.state(&running_id).unwrap(), ProcessState::Canceled);
    assert_eq!(manager.state(&pending_id).unwrap(), ProcessState::Canceled);
    assert!(!manager.has_running());
}

#[tokio::test]
async fn misuse_of_the_manager_api_is_an_error() {
    init_tracing();
    let only = job("only");
    let runner = ScriptedJobRunner::new()
        .with_job("only", 1)
        .with_script(1, vec![running(), succeeded()]);
    let mut manager = manager_with(&runner);

    assert!(matches!(
        manager.init("nope").await,
        Err(DbxTesterError::UnknownProcess(_))
    ));
    assert!(matches!(manager.state("nope"), Err(DbxTesterError::UnknownProcess(_))));

    let id = start(&mut manager, &only).await;
    assert!(matches!(
        manager.init(&id).await,
        Err(DbxTesterError::InvalidProcessOperation { .. })
    ));
    assert!(matches!(
        manager.acknowledge(&id),
        Err(DbxTesterError::InvalidProcessOperation { .. })
    ));

    manager.monitor().await;
    manager.monitor().await;
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Success);

    // Retired processes can no longer be stopped.
    assert!(matches!(
        manager.stop(&id).await,
        Err(DbxTesterError::InvalidProcessOperation { .. })
    ));
}

#[tokio::test]
async fn acknowledge_removes_finished_processes() {
    init_tracing();
    let only = job("only");
    let runner = ScriptedJobRunner::new()
        .with_job("only", 1)
        .with_script(1, vec![failed()]);
    let mut manager = manager_with(&runner);

    let id = start(&mut manager, &only).await;
    manager.monitor().await;

    let log = manager.acknowledge(&id).unwrap();
    assert_eq!(log.final_state, ProcessState::Failed);
    assert_eq!(log.name, "only");
    assert!(manager.process(&id).is_none());
    assert_eq!(manager.state(&id).unwrap(), ProcessState::Failed);

    assert!(matches!(
        manager.acknowledge(&id),
        Err(DbxTesterError::InvalidProcessOperation { .. })
    ));
}

#[tokio::test]
async fn cluster_id_is_forwarded_unless_the_job_sets_one() {
    init_tracing();
    let plain = job("plain");
    let pinned = Job::by_name("pinned")
        .param("cluster_id", "own-cluster")
        .build()
        .unwrap();
    let root = job_after("root", &[&plain, &pinned]);
    let runner = ScriptedJobRunner::new()
        .with_job("plain", 1)
        .with_job("pinned", 2)
        .with_job("root", 3);
    let settings = Settings {
        cluster_id: Some("shared-cluster".to_string()),
        ..Settings::default()
    };
    let mut manager = ProcessManager::new(runner.clone(), MemoryLogSink::new(), settings);

    start(&mut manager, &root).await;

    let params = runner.start_params();
    assert_eq!(params[0].0, 1);
    assert_eq!(params[0].1.get("cluster_id").map(String::as_str), Some("shared-cluster"));
    assert_eq!(params[1].0, 2);
    assert_eq!(params[1].1.get("cluster_id").map(String::as_str), Some("own-cluster"));
}
