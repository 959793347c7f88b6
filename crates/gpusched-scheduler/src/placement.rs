//! Placement scoring and accelerator selection

use gpusched_core::{AcceleratorInfo, NodeAcceleratorState, SchedulingDecision, ScoringConfig};
use tracing::debug;

use crate::gpu_cache::{GpuSnapshot, GpuStateCache};

/// Multiplier applied to a group that occupies a contiguous index run on an
/// interconnect-enabled node
pub const CONTIGUOUS_RUN_MULTIPLIER: f64 = 1.5;

/// Candidate accelerator set on one node
#[derive(Debug)]
struct GroupCandidate {
    indices: Vec<u32>,
    score: f64,
    contiguous: bool,
}

/// Picks the best node and accelerators for a request
///
/// Owns the GPU state cache. Equal scores keep the first candidate seen in
/// node-name order, then accelerator-index order.
pub struct PlacementEngine {
    cache: GpuStateCache,
    scoring: ScoringConfig,
}

impl PlacementEngine {
    pub fn new(cache: GpuStateCache, scoring: ScoringConfig) -> Self {
        Self { cache, scoring }
    }

    pub fn cache(&self) -> &GpuStateCache {
        &self.cache
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Score one accelerator on `node`
    ///
    /// A non-finite utilization reading counts as fully busy.
    pub fn score_accelerator(&self, gpu: &AcceleratorInfo, node: &NodeAcceleratorState) -> f64 {
        let utilization = if gpu.utilization.is_finite() {
            gpu.utilization.clamp(0.0, 100.0)
        } else {
            100.0
        };
        let mut score = self.scoring.free_memory_weight * gpu.free_fraction()
            + self.scoring.utilization_weight * (100.0 - utilization);

        if !self.scoring.preferred_class.is_empty()
            && gpu.product.contains(&self.scoring.preferred_class)
        {
            score += self.scoring.class_bonus;
        }
        if node.interconnect {
            score += self.scoring.interconnect_bonus;
        }
        score
    }

    /// Place `requested` accelerators in groups of `group_size` using fresh state
    ///
    /// Returns `None` when nothing is requested or no node can take the request.
    pub async fn place(&self, requested: u32, group_size: u32) -> Option<SchedulingDecision> {
        if requested == 0 {
            return None;
        }
        let snapshot = self.cache.get_state().await;
        self.place_in(&snapshot, requested, group_size)
    }

    /// Place against a given snapshot without touching the cache
    pub fn place_in(
        &self,
        snapshot: &GpuSnapshot,
        requested: u32,
        group_size: u32,
    ) -> Option<SchedulingDecision> {
        if requested == 0 {
            return None;
        }

        let decision = if group_size <= 1 {
            self.place_single(snapshot, requested)
        } else {
            self.place_group(snapshot, requested, group_size)
        };

        if decision.is_none() {
            debug!(
                requested = requested,
                group_size = group_size,
                nodes = snapshot.len(),
                "No feasible placement"
            );
        }
        decision
    }

    fn place_single(&self, snapshot: &GpuSnapshot, requested: u32) -> Option<SchedulingDecision> {
        let mut best: Option<(&NodeAcceleratorState, &AcceleratorInfo, f64)> = None;

        for node in snapshot.nodes.values() {
            if node.free_count < requested {
                continue;
            }
            for gpu in node.free_accelerators() {
                let score = self.score_accelerator(gpu, node);
                if !score.is_finite() {
                    continue;
                }
                if best.map_or(true, |(_, _, top)| score > top) {
                    best = Some((node, gpu, score));
                }
            }
        }

        best.map(|(node, gpu, score)| SchedulingDecision {
            node: node.node_name.clone(),
            accelerators: vec![gpu.index],
            score,
            reason: format!(
                "Single GPU {} with {}MB free",
                gpu.index, gpu.memory_free_mb
            ),
        })
    }

    fn place_group(
        &self,
        snapshot: &GpuSnapshot,
        requested: u32,
        group_size: u32,
    ) -> Option<SchedulingDecision> {
        let needed = requested.max(group_size);
        let mut best: Option<(&NodeAcceleratorState, GroupCandidate)> = None;

        for node in snapshot.nodes.values() {
            if node.free_count < needed {
                continue;
            }
            let Some(candidate) = self.select_group(node, group_size as usize) else {
                continue;
            };
            if !candidate.score.is_finite() {
                continue;
            }
            if best
                .as_ref()
                .map_or(true, |(_, top)| candidate.score > top.score)
            {
                best = Some((node, candidate));
            }
        }

        best.map(|(node, candidate)| {
            let reason = if candidate.contiguous {
                format!(
                    "{} contiguous GPUs {:?} on interconnect node {}",
                    group_size, candidate.indices, node.node_name
                )
            } else {
                format!(
                    "{} GPUs {:?} on node {}",
                    group_size, candidate.indices, node.node_name
                )
            };
            SchedulingDecision {
                node: node.node_name.clone(),
                accelerators: candidate.indices,
                score: candidate.score,
                reason,
            }
        })
    }

    /// Choose `group_size` free accelerators on `node`
    fn select_group(&self, node: &NodeAcceleratorState, group_size: usize) -> Option<GroupCandidate> {
        let free: Vec<&AcceleratorInfo> = node.free_accelerators().collect();
        if group_size == 0 || free.len() < group_size {
            return None;
        }

        if node.interconnect && group_size > 1 {
            if let Some(start) = contiguous_run(&free, group_size) {
                let run = &free[start..start + group_size];
                return Some(GroupCandidate {
                    indices: run.iter().map(|g| g.index).collect(),
                    score: self.sum_scores(run, node) * CONTIGUOUS_RUN_MULTIPLIER,
                    contiguous: true,
                });
            }
        }

        let first = &free[..group_size];
        Some(GroupCandidate {
            indices: first.iter().map(|g| g.index).collect(),
            score: self.sum_scores(first, node),
            contiguous: false,
        })
    }

    fn sum_scores(&self, gpus: &[&AcceleratorInfo], node: &NodeAcceleratorState) -> f64 {
        gpus.iter().map(|g| self.score_accelerator(g, node)).sum()
    }
}

/// Start of the first window of `len` free accelerators with consecutive indices
fn contiguous_run(free: &[&AcceleratorInfo], len: usize) -> Option<usize> {
    if len < 2 {
        return None;
    }
    free.windows(len)
        .position(|w| w.windows(2).all(|pair| pair[1].index == pair[0].index + 1))
}
