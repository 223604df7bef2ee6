//! Topological ordering of jobs with rule-based cycle breaking.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::{Direction, algo::tarjan_scc, graphmap::DiGraphMap};

use crate::{ArrowKind, Job, JobId};

fn rank(kind: ArrowKind) -> u8 {
    match kind {
        ArrowKind::Build | ArrowKind::BuildAgainst => 3,
        ArrowKind::Runtime => 2,
        ArrowKind::Post => 1,
    }
}

/// Orders `jobs` into a sequence respecting every arrow, breaking cycles
/// where the rules permit.
///
/// Cycle breaking prefers post arrows, then runtime arrows running from a
/// job not named in `installed_jobs` into one that is (the sink's package
/// already has a version on disk to satisfy runtime needs meanwhile), then
/// the runtime arrow between the last-emitted pair. Build arrows are never
/// broken; a cycle held together by them makes its jobs unorderable.
/// Broken arrows are removed from the jobs themselves, so the surviving
/// arrow set completely determines the returned order, which is stable on
/// insertion order.
pub fn order_jobs(jobs: &mut [Job], installed_jobs: &BTreeSet<usize>) -> (Vec<JobId>, Vec<JobId>) {
    let mut graph: DiGraphMap<usize, ArrowKind> = DiGraphMap::new();
    for job in jobs.iter() {
        graph.add_node(job.id.0);
    }
    for job in jobs.iter() {
        for arrow in &job.arrows {
            if arrow.from == job.id {
                continue;
            }
            let kind = match graph.edge_weight(arrow.from.0, job.id.0) {
                Some(existing) if rank(*existing) >= rank(arrow.kind) => *existing,
                _ => arrow.kind,
            };
            graph.add_edge(arrow.from.0, job.id.0, kind);
        }
    }

    let mut unorderable: BTreeSet<usize> = BTreeSet::new();
    let mut removed_pairs: Vec<(usize, usize)> = Vec::new();

    let order = loop {
        if let Some(order) = stable_topological(&graph, &unorderable) {
            break order;
        }

        let mut progressed = false;
        for scc in tarjan_scc(&graph) {
            if scc.len() < 2 || scc.iter().any(|node| unorderable.contains(node)) {
                continue;
            }
            let members: BTreeSet<usize> = scc.iter().copied().collect();
            let mut internal: Vec<(usize, usize, ArrowKind)> = Vec::new();
            for &node in &members {
                for succ in graph.neighbors_directed(node, Direction::Outgoing) {
                    if members.contains(&succ) {
                        if let Some(kind) = graph.edge_weight(node, succ) {
                            internal.push((node, succ, *kind));
                        }
                    }
                }
            }
            internal.sort();

            let post: Vec<(usize, usize)> = internal
                .iter()
                .filter(|(_, _, kind)| *kind == ArrowKind::Post)
                .map(|(from, to, _)| (*from, *to))
                .collect();
            if !post.is_empty() {
                for (from, to) in post {
                    log::debug!("breaking post arrow {from} -> {to} to untangle a cycle");
                    graph.remove_edge(from, to);
                    removed_pairs.push((from, to));
                }
                progressed = true;
                continue;
            }

            let runtime: Vec<(usize, usize)> = internal
                .iter()
                .filter(|(_, _, kind)| *kind == ArrowKind::Runtime)
                .map(|(from, to, _)| (*from, *to))
                .collect();
            if !runtime.is_empty() {
                // Not-yet-installed source, already-installed sink.
                let into_installed: Vec<(usize, usize)> = runtime
                    .iter()
                    .copied()
                    .filter(|(from, to)| {
                        installed_jobs.contains(to) && !installed_jobs.contains(from)
                    })
                    .collect();
                let broken = if into_installed.is_empty() {
                    // The run edge between the last-emitted pair.
                    vec![*runtime.iter().max_by_key(|(from, to)| (*to, *from)).unwrap_or(&runtime[0])]
                } else {
                    into_installed
                };
                for (from, to) in broken {
                    log::debug!("breaking runtime arrow {from} -> {to} to untangle a cycle");
                    graph.remove_edge(from, to);
                    removed_pairs.push((from, to));
                }
                progressed = true;
                continue;
            }

            // Only rigid arrows remain; the cycle cannot be broken.
            log::warn!("cycle of build arrows over jobs {members:?}; marking them unorderable");
            for &node in &members {
                unorderable.insert(node);
            }
            progressed = true;
        }

        if !progressed {
            // No multi-node component is left to untangle, yet ordering
            // failed; treat everything unordered as unorderable.
            let ordered: BTreeSet<usize> = stable_topological(&graph, &unorderable)
                .unwrap_or_default()
                .iter()
                .map(|id| id.0)
                .collect();
            for job in jobs.iter() {
                if !ordered.contains(&job.id.0) {
                    unorderable.insert(job.id.0);
                }
            }
            break stable_topological(&graph, &unorderable).unwrap_or_default();
        }
    };

    for job in jobs.iter_mut() {
        let id = job.id;
        job.arrows.retain(|arrow| {
            arrow.from != id
                && (arrow.kind.is_rigid() || !removed_pairs.contains(&(arrow.from.0, id.0)))
        });
    }

    (
        order,
        unorderable.into_iter().map(JobId).collect(),
    )
}

/// Kahn's algorithm, always emitting the smallest ready job id first.
///
/// Returns `None` when a cycle prevents completion.
fn stable_topological(
    graph: &DiGraphMap<usize, ArrowKind>,
    unorderable: &BTreeSet<usize>,
) -> Option<Vec<JobId>> {
    let mut indegree: BTreeMap<usize, usize> = BTreeMap::new();
    for node in graph.nodes() {
        if unorderable.contains(&node) {
            continue;
        }
        let degree = graph
            .neighbors_directed(node, Direction::Incoming)
            .filter(|pred| !unorderable.contains(pred))
            .count();
        indegree.insert(node, degree);
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(indegree.len());

    while let Some(&node) = ready.iter().next() {
        ready.remove(&node);
        order.push(JobId(node));
        for succ in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(degree) = indegree.get_mut(&succ) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(succ);
                }
            }
        }
    }

    (order.len() == indegree.len()).then_some(order)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use espm_types::{PackageId, RepositoryName, Version};
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;
    use crate::{Arrow, JobKind};

    fn job(id: usize, arrows: &[(usize, ArrowKind)]) -> Job {
        let origin = Arc::new(
            PackageId::builder(
                format!("cat/job{id}").parse().unwrap(),
                Version::new("1").unwrap(),
                RepositoryName::new("test").unwrap(),
            )
            .build(),
        );
        Job {
            id: JobId(id),
            kind: JobKind::Fetch { origin },
            resolution_index: 0,
            arrows: arrows
                .iter()
                .map(|(from, kind)| Arrow {
                    from: JobId(*from),
                    kind: *kind,
                })
                .collect(),
        }
    }

    fn ids(order: &[JobId]) -> Vec<usize> {
        order.iter().map(|id| id.0).collect()
    }

    #[rstest]
    fn chain_is_ordered() {
        let mut jobs = vec![
            job(0, &[(1, ArrowKind::Build)]),
            job(1, &[(2, ArrowKind::Build)]),
            job(2, &[]),
        ];
        let (order, unorderable) = order_jobs(&mut jobs, &BTreeSet::new());
        assert_eq!(ids(&order), vec![2, 1, 0]);
        assert!(unorderable.is_empty());
    }

    #[rstest]
    fn independent_jobs_keep_insertion_order() {
        let mut jobs = vec![job(0, &[]), job(1, &[]), job(2, &[])];
        let (order, _) = order_jobs(&mut jobs, &BTreeSet::new());
        assert_eq!(ids(&order), vec![0, 1, 2]);
    }

    /// A runtime cycle is broken at the last-emitted pair; build arrows
    /// survive.
    #[rstest]
    fn runtime_cycle_breaks() {
        let mut jobs = vec![
            job(0, &[(1, ArrowKind::Runtime)]),
            job(1, &[(0, ArrowKind::Runtime)]),
        ];
        let (order, unorderable) = order_jobs(&mut jobs, &BTreeSet::new());
        assert_eq!(order.len(), 2);
        assert!(unorderable.is_empty());
        // The broken arrow is gone from the jobs themselves.
        let arrows: usize = jobs.iter().map(|job| job.arrows.len()).sum();
        assert_eq!(arrows, 1);
    }

    #[rstest]
    fn post_arrows_break_before_runtime() {
        let mut jobs = vec![
            job(0, &[(1, ArrowKind::Runtime)]),
            job(1, &[(0, ArrowKind::Post)]),
        ];
        let (order, _) = order_jobs(&mut jobs, &BTreeSet::new());
        // With the post arrow broken, the runtime arrow forces 1 before 0.
        assert_eq!(ids(&order), vec![1, 0]);
        assert!(jobs[1].arrows.is_empty());
        assert_eq!(jobs[0].arrows.len(), 1);
    }

    #[rstest]
    fn build_cycles_are_unorderable() {
        let mut jobs = vec![
            job(0, &[(1, ArrowKind::Build)]),
            job(1, &[(0, ArrowKind::Build)]),
            job(2, &[]),
        ];
        let (order, unorderable) = order_jobs(&mut jobs, &BTreeSet::new());
        assert_eq!(ids(&order), vec![2]);
        assert_eq!(ids(&unorderable), vec![0, 1]);
    }

    /// A runtime edge whose sink already has a version on disk is
    /// sacrificed before any other.
    #[rstest]
    fn runtime_edges_into_installed_sinks_break_first() -> TestResult {
        // 0 -> 1 -> 2 -> 0 cycle of runtime arrows; job 2's package is
        // already installed, so the edge into it goes.
        let mut jobs = vec![
            job(0, &[(2, ArrowKind::Runtime)]),
            job(1, &[(0, ArrowKind::Runtime)]),
            job(2, &[(1, ArrowKind::Runtime)]),
        ];
        let installed: BTreeSet<usize> = [2].into_iter().collect();
        let (order, _) = order_jobs(&mut jobs, &installed);
        assert_eq!(order.len(), 3);
        // The arrow 1 -> 2 was broken; the others survive.
        assert!(jobs[2].arrows.is_empty());
        assert_eq!(jobs[0].arrows.len(), 1);
        assert_eq!(jobs[1].arrows.len(), 1);
        Ok(())
    }
}
