//! Coordinator of a matching pass. The engine is an explicit state
//! machine driven by [`DupeEngine::step`]: each call performs one
//! bounded unit of work and returns, so an embedding event loop stays
//! responsive while a pass runs. [`DupeEngine::run`] loops to completion
//! for batch callers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::consolidate::consolidate;
use crate::core::criteria::MatchConfig;
use crate::core::graph;
use crate::core::item::{FileRef, ItemId, ItemStore};
use crate::core::matcher::{scan_single_set, scan_two_sets};
use crate::core::similarity::SimilarityData;
use crate::services::pool::{PoolError, SearchMatch, SimilarityPool};
use crate::services::provider::AttributeProvider;

/// Matches merged into the graph per `step()` while in the merge state.
const MERGE_CHUNK: usize = 64;
/// How long one `step()` blocks on the pool before reporting progress.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a matching pass is already running")]
    Busy,
    #[error("unknown or removed item id")]
    UnknownItem,
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Setup,
    Queueing,
    Comparing,
    Merging,
    Ranking,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchProgress {
    pub phase: MatchPhase,
    pub processed: usize,
    pub total: usize,
}

/// One published duplicate entry: the item handle plus the metadata a
/// presentation layer needs without going back to the store.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub item: ItemId,
    pub path: String,
    pub rank: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub id: String,
    pub parent: GroupMember,
    pub children: Vec<GroupMember>,
    pub group_rank: f64,
}

/// Whether the engine expects further `step()` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Running,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupPhase {
    Checksums,
    Dimensions,
    Similarity,
}

enum EngineState {
    Idle,
    Setup {
        phase: SetupPhase,
        queue: VecDeque<ItemId>,
        total: usize,
        processed: usize,
    },
    /// Similarity pass: one needle job queued per step.
    Scan {
        queue: VecDeque<ItemId>,
        scanned: Vec<ItemId>,
        pool: SimilarityPool,
    },
    /// Exact-criteria pass: the whole array scan runs in one step.
    ScanExact,
    Wait {
        pool: SimilarityPool,
    },
    Merge {
        matches: VecDeque<SearchMatch>,
        total: usize,
    },
    Rank,
}

pub struct DupeEngine {
    store: ItemStore,
    config: MatchConfig,
    provider: Box<dyn AttributeProvider>,
    state: EngineState,
    dupes: Vec<ItemId>,
    groups: Vec<DuplicateGroup>,
    abort: Arc<AtomicBool>,
    progress: Option<UnboundedSender<MatchProgress>>,
    pending_adds: Vec<(FileRef, bool)>,
}

impl DupeEngine {
    pub fn new(provider: Box<dyn AttributeProvider>) -> Self {
        Self {
            store: ItemStore::new(),
            config: MatchConfig::default(),
            provider,
            state: EngineState::Idle,
            dupes: Vec::new(),
            groups: Vec::new(),
            abort: Arc::new(AtomicBool::new(false)),
            progress: None,
            pending_adds: Vec::new(),
        }
    }

    pub fn with_progress_sender(mut self, sender: UnboundedSender<MatchProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, EngineState::Idle)
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    /// Consolidated groups from the last completed pass.
    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    /// Shared cancellation token. Setting it from any thread makes the
    /// next `step()` wind the pass down exactly as [`DupeEngine::stop`]
    /// would.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    fn send_progress(&self, phase: MatchPhase, processed: usize, total: usize) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(MatchProgress {
                phase,
                processed,
                total,
            });
        }
    }

    /// Register files in the primary set. While a pass is active the
    /// files are deferred and ingested when the pass completes, which
    /// then triggers a fresh pass over the grown collection.
    pub fn add_files(&mut self, files: Vec<FileRef>) {
        self.add(files, false);
    }

    /// Register files in the secondary set; a non-empty secondary set
    /// switches passes to two-set matching.
    pub fn add_second_files(&mut self, files: Vec<FileRef>) {
        self.add(files, true);
    }

    fn add(&mut self, files: Vec<FileRef>, second: bool) {
        if self.is_idle() {
            for file in files {
                self.store.insert(file, second);
            }
        } else {
            log::debug!("pass active, deferring {} added files", files.len());
            self.pending_adds
                .extend(files.into_iter().map(|file| (file, second)));
        }
    }

    /// Begin a matching pass. Fails with [`EngineError::Busy`] while a
    /// previous pass is still stepping.
    pub fn start_match(&mut self, config: MatchConfig) -> Result<(), EngineError> {
        if !self.is_idle() {
            return Err(EngineError::Busy);
        }
        log::info!(
            "starting match pass over {} files, criteria {:?}",
            self.store.len(),
            config.criteria
        );
        self.config = config;
        self.abort.store(false, Ordering::SeqCst);
        self.groups.clear();
        self.dupes.clear();
        self.state = self.first_setup_state();
        Ok(())
    }

    /// Abort the current pass: signal the pool, drain in-flight jobs and
    /// discard their results. The store and the last published groups
    /// are left untouched.
    pub fn stop(&mut self) {
        self.abort.store(true, Ordering::SeqCst);
        match std::mem::replace(&mut self.state, EngineState::Idle) {
            EngineState::Scan { pool, .. } | EngineState::Wait { pool } => {
                pool.abort();
                pool.wait();
                log::info!("match pass aborted, {} jobs drained", pool.completed());
            }
            EngineState::Idle => {}
            _ => log::info!("match pass aborted"),
        }
        let pending = std::mem::take(&mut self.pending_adds);
        for (file, second) in pending {
            self.store.insert(file, second);
        }
    }

    /// Drop every file and every result.
    pub fn clear(&mut self) {
        self.stop();
        self.store.clear();
        self.dupes.clear();
        self.groups.clear();
    }

    /// Run the pass to completion.
    pub fn run(&mut self) {
        while self.step() == StepOutcome::Running {}
    }

    /// Perform one bounded unit of work.
    pub fn step(&mut self) -> StepOutcome {
        if self.abort.load(Ordering::SeqCst) && !self.is_idle() {
            log::debug!("cancellation requested, stopping pass");
            self.stop();
            return StepOutcome::Idle;
        }
        let state = std::mem::replace(&mut self.state, EngineState::Idle);
        match state {
            EngineState::Idle => StepOutcome::Idle,
            EngineState::Setup {
                phase,
                mut queue,
                total,
                mut processed,
            } => {
                if let Some(id) = queue.pop_front() {
                    self.fetch_attribute(id, phase);
                    processed += 1;
                    self.send_progress(MatchPhase::Setup, processed, total);
                    self.state = EngineState::Setup {
                        phase,
                        queue,
                        total,
                        processed,
                    };
                } else if let Some(next) = self.next_setup_phase(phase) {
                    self.state = self.setup_state(next);
                } else {
                    self.state = self.scan_state();
                }
                StepOutcome::Running
            }
            EngineState::Scan {
                mut queue,
                mut scanned,
                mut pool,
            } => {
                if let Some(needle) = queue.pop_front() {
                    self.queue_needle(needle, &scanned, &mut pool);
                    scanned.push(needle);
                    let total = queue.len() + scanned.len();
                    self.send_progress(MatchPhase::Queueing, scanned.len(), total);
                    self.state = EngineState::Scan {
                        queue,
                        scanned,
                        pool,
                    };
                } else {
                    self.state = EngineState::Wait { pool };
                }
                StepOutcome::Running
            }
            EngineState::ScanExact => {
                if self.two_set_mode() {
                    scan_two_sets(&mut self.store, self.config.criteria, true);
                } else {
                    scan_single_set(&mut self.store, self.config.criteria);
                }
                self.state = EngineState::Rank;
                StepOutcome::Running
            }
            EngineState::Wait { mut pool } => {
                if pool.wait_for(WAIT_SLICE) {
                    let matches: VecDeque<SearchMatch> = pool.take_results().into();
                    let total = matches.len();
                    self.send_progress(MatchPhase::Merging, 0, total);
                    self.state = EngineState::Merge { matches, total };
                } else {
                    self.send_progress(
                        MatchPhase::Comparing,
                        pool.completed(),
                        pool.submitted(),
                    );
                    self.state = EngineState::Wait { pool };
                }
                StepOutcome::Running
            }
            EngineState::Merge { mut matches, total } => {
                for _ in 0..MERGE_CHUNK {
                    let Some(m) = matches.pop_front() else {
                        break;
                    };
                    // Stale ids from removed items fail the generation
                    // check in the store and are dropped here.
                    if self.store.contains(m.a)
                        && self.store.contains(m.b)
                        && !graph::edge_exists(&self.store, m.a, m.b)
                    {
                        graph::link(&mut self.store, m.a, m.b, m.rank);
                    }
                }
                self.send_progress(MatchPhase::Merging, total - matches.len(), total);
                self.state = if matches.is_empty() {
                    EngineState::Rank
                } else {
                    EngineState::Merge { matches, total }
                };
                StepOutcome::Running
            }
            EngineState::Rank => {
                self.send_progress(MatchPhase::Ranking, 0, 1);
                let second = self.two_set_mode();
                self.dupes = consolidate(&mut self.store, &self.config, second);
                self.publish_groups();
                self.send_progress(MatchPhase::Complete, 1, 1);
                log::info!("match pass complete: {} groups", self.groups.len());
                self.state = EngineState::Idle;

                if self.pending_adds.is_empty() {
                    StepOutcome::Idle
                } else {
                    let pending = std::mem::take(&mut self.pending_adds);
                    log::debug!("ingesting {} deferred files, re-matching", pending.len());
                    for (file, second) in pending {
                        self.store.insert(file, second);
                    }
                    self.state = self.first_setup_state();
                    StepOutcome::Running
                }
            }
        }
    }

    /// Remove one file. Outside a pass this maintains the published
    /// groups in O(degree of the removed item); during a pass the id is
    /// also purged from the work queues so no new work references it.
    pub fn remove(&mut self, id: ItemId) -> Result<(), EngineError> {
        if !self.store.contains(id) {
            return Err(EngineError::UnknownItem);
        }

        match &mut self.state {
            EngineState::Setup { queue, .. } => queue.retain(|x| *x != id),
            EngineState::Scan { queue, scanned, .. } => {
                queue.retain(|x| *x != id);
                scanned.retain(|x| *x != id);
            }
            EngineState::Merge { matches, .. } => {
                matches.retain(|m| m.a != id && m.b != id);
            }
            _ => {}
        }

        let degree = self.store.get(id).map_or(0, |item| item.group.len());
        if degree == 0 {
            self.store.remove(id);
            self.rebuild_groups();
            return Ok(());
        }

        match graph::find_parent(&self.store, &self.dupes, id) {
            Some(root) if root == id => {
                if degree >= 2 {
                    // Promote the strongest child to root.
                    if let Some(new_root) = graph::highest_rank_neighbor(&self.store, id) {
                        graph::reparent(&mut self.store, &mut self.dupes, id, new_root);
                    }
                } else {
                    graph::clear(&mut self.store, id, true);
                    self.dupes.retain(|x| *x != id);
                }
            }
            Some(root) => {
                // The root's edge count decides before the unlink: a
                // two-member group dissolves entirely.
                let root_degree = self.store.get(root).map_or(0, |item| item.group.len());
                if root_degree < 2 {
                    graph::clear(&mut self.store, root, true);
                    self.dupes.retain(|x| *x != root);
                } else {
                    graph::unlink(&mut self.store, id, root);
                    graph::update_group_rank(&mut self.store, root);
                }
            }
            None => {
                // Mid-pass raw graph edges; no published group to fix up.
                graph::clear(&mut self.store, id, true);
            }
        }

        self.store.remove(id);
        self.rebuild_groups();
        Ok(())
    }

    fn two_set_mode(&self) -> bool {
        !self.store.secondary().is_empty()
    }

    fn all_ids(&self) -> Vec<ItemId> {
        self.store
            .primary()
            .iter()
            .chain(self.store.secondary())
            .copied()
            .collect()
    }

    fn first_setup_state(&mut self) -> EngineState {
        match self.next_setup_phase_from_start() {
            Some(phase) => self.setup_state(phase),
            None => self.scan_state(),
        }
    }

    fn next_setup_phase_from_start(&self) -> Option<SetupPhase> {
        let mask = self.config.criteria;
        if mask.needs_checksum() {
            Some(SetupPhase::Checksums)
        } else {
            self.next_setup_phase(SetupPhase::Checksums)
        }
    }

    fn next_setup_phase(&self, current: SetupPhase) -> Option<SetupPhase> {
        let mask = self.config.criteria;
        match current {
            SetupPhase::Checksums if mask.needs_dimensions() => Some(SetupPhase::Dimensions),
            SetupPhase::Checksums | SetupPhase::Dimensions if mask.needs_similarity() => {
                Some(SetupPhase::Similarity)
            }
            _ => None,
        }
    }

    fn setup_state(&self, phase: SetupPhase) -> EngineState {
        let queue: VecDeque<ItemId> = self
            .all_ids()
            .into_iter()
            .filter(|&id| {
                self.store.get(id).map_or(false, |item| match phase {
                    SetupPhase::Checksums => item.checksum.is_none(),
                    SetupPhase::Dimensions => item.dimensions().is_none(),
                    SetupPhase::Similarity => item.simd.is_none(),
                })
            })
            .collect();
        log::debug!("setup {:?}: {} files to fetch", phase, queue.len());
        let total = queue.len();
        EngineState::Setup {
            phase,
            queue,
            total,
            processed: 0,
        }
    }

    fn fetch_attribute(&mut self, id: ItemId, phase: SetupPhase) {
        let Some(item) = self.store.get(id) else {
            return;
        };
        let file = item.file.clone();
        match phase {
            SetupPhase::Checksums => match self.provider.checksum(file.meta()) {
                Ok(sum) => {
                    if let Some(item) = self.store.get_mut(id) {
                        item.checksum = sum;
                    }
                }
                Err(err) => log::warn!("checksum unavailable for {}: {err}", file.path()),
            },
            SetupPhase::Dimensions => match self.provider.dimensions(file.meta()) {
                Ok(Some((width, height))) => {
                    if let Some(item) = self.store.get_mut(id) {
                        item.width = width;
                        item.height = height;
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("dimensions unavailable for {}: {err}", file.path()),
            },
            SetupPhase::Similarity => match self.provider.similarity_data(file.meta()) {
                Ok(simd) => {
                    if let Some(item) = self.store.get_mut(id) {
                        item.simd = simd;
                    }
                }
                Err(err) => {
                    log::warn!("similarity data unavailable for {}: {err}", file.path())
                }
            },
        }
    }

    fn scan_state(&mut self) -> EngineState {
        if !self.config.criteria.is_similarity_only() {
            return EngineState::ScanExact;
        }

        let ids = self.all_ids();
        graph::reset_all(&mut self.store, &ids);
        let pool = match SimilarityPool::new(
            self.config.pool_threads,
            self.config.similarity_threshold(),
        ) {
            Ok(pool) => pool,
            Err(err) => {
                // Extremely unlikely; degrade to an empty pass.
                log::warn!("worker pool unavailable: {err}");
                return EngineState::Rank;
            }
        };
        EngineState::Scan {
            queue: self.store.primary().to_vec().into(),
            scanned: Vec::new(),
            pool,
        }
    }

    /// Submit one similarity job: the needle against every already
    /// scanned primary item (single set) or the whole secondary set.
    fn queue_needle(&self, needle: ItemId, scanned: &[ItemId], pool: &mut SimilarityPool) {
        let Some(simd) = self.store.get(needle).and_then(|item| item.simd.clone()) else {
            return;
        };
        let candidates: Vec<(ItemId, Arc<SimilarityData>)> = if self.two_set_mode() {
            self.collect_descriptors(self.store.secondary())
        } else {
            self.collect_descriptors(scanned)
        };
        if candidates.is_empty() {
            return;
        }
        pool.submit((needle, simd), candidates);
    }

    fn collect_descriptors(&self, ids: &[ItemId]) -> Vec<(ItemId, Arc<SimilarityData>)> {
        ids.iter()
            .filter_map(|&id| {
                self.store
                    .get(id)
                    .and_then(|item| item.simd.clone())
                    .map(|simd| (id, simd))
            })
            .collect()
    }

    fn publish_groups(&mut self) {
        self.groups = self
            .dupes
            .iter()
            .filter_map(|&root| {
                let item = self.store.get(root)?;
                let children = item
                    .group
                    .iter()
                    .filter_map(|edge| {
                        let child = self.store.get(edge.other)?;
                        Some(GroupMember {
                            item: edge.other,
                            path: child.file.path().to_string(),
                            rank: edge.rank,
                        })
                    })
                    .collect();
                Some(DuplicateGroup {
                    id: format!("grp_{}", Uuid::new_v4().simple()),
                    parent: GroupMember {
                        item: root,
                        path: item.file.path().to_string(),
                        rank: item.group_rank,
                    },
                    children,
                    group_rank: item.group_rank,
                })
            })
            .collect();
    }

    /// Re-publish after incremental maintenance, dropping groups that
    /// dissolved. Group ids are regenerated; consumers treat them as
    /// snapshot-scoped.
    fn rebuild_groups(&mut self) {
        self.dupes.retain(|&root| {
            self.store
                .get(root)
                .map_or(false, |item| !item.group.is_empty())
        });
        let roots = self.dupes.clone();
        for root in roots {
            graph::update_group_rank(&mut self.store, root);
        }
        self.publish_groups();
    }
}
