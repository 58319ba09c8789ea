// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{PlanFile, load_and_validate};
use crate::dag::{DependencyGraphBuilder, ExecutionGraph};
use crate::engine::{LogSink, ProcessId, ProcessManager, Runtime, RuntimeOptions, sink_for};
use crate::exec::{DatabricksJobRunner, JobRunner};
use crate::types::ProcessState;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan loading and validation
/// - graph building for every selected test
/// - the Databricks runner and the log sink
/// - process registration, the tick driver and Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let plan = load_and_validate(&args.config)?;
    let tests = plan.resolve_tests(&args.tests)?;

    let mut graphs: Vec<(String, ExecutionGraph)> = Vec::with_capacity(tests.len());
    for (name, root) in tests {
        let graph = DependencyGraphBuilder::build(&root)?;
        graphs.push((name, graph));
    }

    if args.dry_run {
        print_dry_run(&plan, &graphs);
        return Ok(());
    }

    let mut settings = plan.settings().clone();
    if let Some(poll_interval) = args.poll_interval {
        if poll_interval.is_zero() {
            anyhow::bail!("--poll-interval must be greater than zero");
        }
        settings.poll_interval = poll_interval;
    }

    let runner = DatabricksJobRunner::from_workspace(plan.workspace())?;
    let sink = sink_for(settings.log_path.as_deref());
    let options = RuntimeOptions {
        poll_interval: settings.poll_interval,
        deadline: args.deadline,
    };
    let mut manager = ProcessManager::new(runner, sink, settings);

    // Register everything before starting anything, so a missing job aborts
    // the whole run without leaving remote runs behind.
    let mut processes: Vec<(String, ProcessId)> = Vec::with_capacity(graphs.len());
    for (name, graph) in graphs {
        let id = manager.register_process(graph).await?;
        processes.push((name, id));
    }

    for (name, id) in processes.iter() {
        info!(test = %name, process = %id, "starting test");
        manager.init(id).await?;
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let mut manager = Runtime::new(manager, options).run(shutdown).await;
    let canceled = manager.cancel_failed_in_flight().await;
    if canceled > 0 {
        info!(runs = canceled, "canceled runs left behind by failed tests");
    }
    report(&manager, &processes)
}

/// Print one line per test and fail if any test did not succeed.
fn report<R: JobRunner, S: LogSink>(
    manager: &ProcessManager<R, S>,
    processes: &[(String, ProcessId)],
) -> Result<()> {
    let mut unsuccessful = 0usize;

    for (name, id) in processes {
        let state = manager.state(id)?;
        println!("{name:<32} {state:<8} {id}");

        if state != ProcessState::Success {
            unsuccessful += 1;
            if let Some(process) = manager.process(id) {
                for (index, job) in process.graph().nodes() {
                    let Some(run) = process.run(index) else {
                        continue;
                    };
                    if let Some(error) = &run.error {
                        println!("    {} ({}): {error}", job.key(), job.target());
                    } else if let Some(status) = run.status {
                        println!(
                            "    {} ({}): {:?} {:?}",
                            job.key(),
                            job.target(),
                            status.lifecycle,
                            status.result
                        );
                    }
                }
            }
        }
    }

    if unsuccessful > 0 {
        anyhow::bail!("{unsuccessful} of {} test(s) did not succeed", processes.len());
    }
    Ok(())
}

/// Simple dry-run output: print settings and every test's execution graph.
fn print_dry_run(plan: &PlanFile, graphs: &[(String, ExecutionGraph)]) {
    let settings = plan.settings();
    println!("dbx-tester dry-run");
    if let Some(cluster_id) = &settings.cluster_id {
        println!("  settings.cluster_id = {cluster_id}");
    }
    let paths = [
        ("repo_path", &settings.repo_path),
        ("test_path", &settings.test_path),
        ("test_cache_path", &settings.test_cache_path),
        ("log_path", &settings.log_path),
    ];
    for (key, path) in paths {
        if let Some(path) = path {
            println!("  settings.{key} = {}", path.display());
        }
    }
    println!("  settings.poll_interval = {:?}", settings.poll_interval);
    println!();

    println!("tests ({}):", graphs.len());
    for (name, graph) in graphs {
        println!("  - {name} ({} nodes)", graph.len());
        for (index, job) in graph.nodes() {
            println!("      [{index}] {} -> {}", job.key(), job.target());
            let deps = graph.dependencies_of(index);
            if !deps.is_empty() {
                let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
                println!("          depends_on: [{}]", deps.join(", "));
            }
            if !job.params().is_empty() {
                println!("          params: {:?}", job.params());
            }
            if graph.aggregator() == Some(index) {
                println!("          trigger: wait (aggregator)");
            }
        }
        let entry: Vec<String> = graph.entry_points().iter().map(ToString::to_string).collect();
        println!("      entry points: [{}]", entry.join(", "));
    }

    debug!("dry-run complete (no execution)");
}
