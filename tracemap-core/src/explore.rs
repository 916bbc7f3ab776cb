use crate::merge::{MergeStats, SharedGraph};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracemap_probe::{ProbeRunner, ProbeTask};
use tracing::{debug, info, warn};

/// Options for configuring an exploration run
pub struct ExploreOptions {
    pub targets: Vec<String>,
    pub tasks: Vec<ProbeTask>,
    pub show_progress_bars: bool,
}

/// Callback for reporting exploration progress
pub type ExploreProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExploreSummary {
    pub targets: usize,
    pub tasks_run: usize,
    /// Tasks whose probe produced no records (failure, timeout, no output)
    pub tasks_empty: usize,
    pub stats: MergeStats,
}

/// Probe every target with every task and merge the results into `graph`.
///
/// Targets go one at a time in the given order. All tasks for a target run
/// concurrently and each merges as soon as its probe finishes; the next
/// target starts only when every task of the current one is done.
pub async fn execute_exploration(
    graph: &SharedGraph,
    explorer_id: &str,
    runner: &ProbeRunner,
    options: ExploreOptions,
    progress_callback: Option<ExploreProgressCallback>,
) -> ExploreSummary {
    let ExploreOptions {
        targets,
        tasks,
        show_progress_bars,
    } = options;

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new(targets.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    } else {
        None
    };

    let mut summary = ExploreSummary {
        targets: targets.len(),
        ..Default::default()
    };

    for (idx, target) in targets.iter().enumerate() {
        if let Some(ref pb) = progress_bar {
            pb.set_message(format!("Investigating {}", target));
        }
        if let Some(ref callback) = progress_callback {
            callback(format!(
                "Probing target {}/{}: {}",
                idx + 1,
                targets.len(),
                target
            ));
        }

        let handles: Vec<_> = tasks
            .iter()
            .cloned()
            .map(|task| {
                let graph = graph.clone();
                let runner = runner.clone();
                let target = target.clone();
                let explorer_id = explorer_id.to_string();
                tokio::spawn(async move {
                    let (protocol, hops) = runner.run_task(&target, &task).await;
                    if hops.is_empty() {
                        return None;
                    }
                    Some(graph.merge(&explorer_id, &protocol, &hops).await)
                })
            })
            .collect();

        for result in join_all(handles).await {
            summary.tasks_run += 1;
            match result {
                Ok(Some(stats)) => {
                    debug!("Merged probe of {}: {:?}", target, stats);
                    summary.stats.absorb(stats);
                }
                Ok(None) => summary.tasks_empty += 1,
                Err(e) => {
                    warn!("Probe task for {} failed: {}", target, e);
                    summary.tasks_empty += 1;
                }
            }
        }

        if let Some(ref pb) = progress_bar {
            pb.inc(1);
        }
    }

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!("Explored {} targets", summary.targets));
    }

    info!(
        "Exploration complete: {} tasks, {} empty, {} new nodes, {} new edges",
        summary.tasks_run,
        summary.tasks_empty,
        summary.stats.nodes_added,
        summary.stats.edges_added
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Graph, NodeGroup};
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn test_failed_probes_leave_graph_untouched() {
        let mut graph = Graph::new();
        graph.ensure_node("e", "e", NodeGroup::Explorer);
        let shared = SharedGraph::new(graph.clone());
        let runner = ProbeRunner::new().with_program("tracemap-definitely-not-installed");
        let options = ExploreOptions {
            targets: vec!["example.com".to_string(), "example.org".to_string()],
            tasks: tracemap_probe::build_probe_tasks(1, true, &[443]),
            show_progress_bars: false,
        };

        let messages = Arc::new(StdMutex::new(Vec::new()));
        let messages_clone = messages.clone();
        let callback: ExploreProgressCallback = Arc::new(move |msg: String| {
            messages_clone.lock().unwrap().push(msg);
        });

        let summary = execute_exploration(&shared, "e", &runner, options, Some(callback)).await;

        assert_eq!(summary.targets, 2);
        assert_eq!(summary.tasks_run, 6);
        assert_eq!(summary.tasks_empty, 6);
        assert_eq!(summary.stats, MergeStats::default());
        assert_eq!(shared.into_inner().await, graph);
        assert_eq!(
            *messages.lock().unwrap(),
            vec![
                "Probing target 1/2: example.com".to_string(),
                "Probing target 2/2: example.org".to_string()
            ]
        );
    }
}
