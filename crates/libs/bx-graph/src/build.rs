//! The build loop.
//!
//! [`Builder::run_build`] drives a loaded graph to completion through a
//! [`CommandRunner`]: it starts ready edges while the runner admits more
//! work, parks on the runner's wait point otherwise, and feeds every
//! completion back into the plan.
//!
//! Remote dispatch is best-effort. A remote edge that has not completed is
//! re-issued locally once the local side runs dry, and whichever result
//! arrives second is dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::plan::Plan;
use crate::prelude::*;
use crate::state::{Edge, EdgeId, State};

/// Where a command was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Local,
    Remote,
}

/// Final status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure(i32),
    Interrupted,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    /// Numeric form used by the status mirror.
    pub fn as_i32(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure(code) => *code,
            ExitStatus::Interrupted => -2,
        }
    }
}

/// Result of one executed command, local or remote.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub edge_id: EdgeId,
    pub status: ExitStatus,
    /// Merged stdout and stderr of the command.
    pub output: String,
    /// Which side produced this result.
    pub origin: Dispatch,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// The dispatch contract the build loop calls into.
///
/// Implementations decide where an edge runs and own the machinery that
/// executes it; the build loop owns ordering, retries, and plan bookkeeping.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Whether another edge may be started anywhere right now.
    fn can_run_more(&self) -> bool;

    /// Dispatches an edge. Returns where it went, or `None` when the local
    /// dispatch could not be started (directory creation, response file, or
    /// spawn failure); the caller then fails the edge.
    fn start_command(&mut self, edge: &Edge, force_local: bool) -> Option<Dispatch>;

    /// Waits for the next completed command delivered to the build loop.
    /// Returns `None` when the build was interrupted.
    async fn wait_for_command(&mut self) -> Option<CommandResult>;

    /// Whether any locally dispatched command is still tracked.
    fn has_pending_local_commands(&self) -> bool;

    /// Kills local work and discards outstanding remote bookkeeping.
    fn abort(&mut self);

    /// Status hook, invoked when an edge is dispatched.
    fn build_edge_started(&mut self, _edge: &Edge) {}

    /// Status hook, invoked once per finished edge.
    fn build_edge_finished(&mut self, _result: &CommandResult) {}
}

/// Drives a graph to completion through a [`CommandRunner`].
pub struct Builder {
    state: Arc<State>,
    plan: Plan,
    /// Remote-dispatched edges that have not finished, in dispatch order.
    remote_inflight: VecDeque<EdgeId>,
    /// Remote edges that were re-issued locally.
    locally_rerun: HashSet<EdgeId>,
    failures: usize,
}

impl Builder {
    pub fn new(state: Arc<State>) -> Self {
        Self {
            state,
            plan: Plan::new(),
            remote_inflight: VecDeque::new(),
            locally_rerun: HashSet::new(),
            failures: 0,
        }
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Whether a remote edge has (also) been run on the local side, either
    /// because a retry was issued or because it already finished. Late
    /// remote completions for such edges are dropped.
    pub fn has_remote_command_run_locally(&self, edge_id: EdgeId) -> bool {
        self.locally_rerun.contains(&edge_id) || self.plan.is_finished(edge_id)
    }

    /// Builds the given targets, blocking until the graph is complete or
    /// the build fails.
    pub async fn run_build<R: CommandRunner>(
        &mut self,
        targets: &[String],
        runner: &mut R,
    ) -> Result<()> {
        for target in targets {
            self.plan.want_target(&self.state, target)?;
        }
        if !self.plan.more_to_do() {
            info!("Nothing to build");
            return Ok(());
        }
        info!("Building {} edge(s)", self.plan.wanted_count());

        while self.plan.more_to_do() {
            if self.failures == 0 && runner.can_run_more() {
                if let Some(edge_id) = self.plan.pop_ready() {
                    // Console edges own the terminal and always run here.
                    let force_local = self.state.edge(edge_id).use_console;
                    self.start_edge(edge_id, force_local, runner);
                    continue;
                }
                if let Some(edge_id) = self.pick_local_retry(runner) {
                    debug!("Re-issuing remote edge {edge_id} locally");
                    self.start_edge(edge_id, true, runner);
                    continue;
                }
            }
            if self.failures > 0 && !runner.has_pending_local_commands() {
                break;
            }

            match runner.wait_for_command().await {
                Some(result) => {
                    if result.origin == Dispatch::Remote
                        && self.has_remote_command_run_locally(result.edge_id)
                    {
                        debug!("Dropping stale remote result for edge {}", result.edge_id);
                        continue;
                    }
                    self.finish_command(result, runner);
                }
                None => {
                    runner.abort();
                    self.remote_inflight.clear();
                    return Err(Error::Interrupted);
                }
            }
        }

        if self.failures > 0 {
            runner.abort();
            self.remote_inflight.clear();
            return Err(Error::BuildFailed {
                failures: self.failures,
            });
        }
        Ok(())
    }

    /// Applies a completed command to the plan. Finishing an edge that is
    /// already finished is a no-op.
    pub fn finish_command<R: CommandRunner>(&mut self, result: CommandResult, runner: &mut R) {
        if self.plan.is_finished(result.edge_id) {
            return;
        }
        if !result.success() {
            self.failures += 1;
            error!(
                "Command failed ({:?}): {}",
                result.status,
                self.state.edge(result.edge_id).command
            );
            if !result.output.is_empty() {
                error!("{}", result.output.trim_end());
            }
        }
        self.plan.edge_finished(&self.state, result.edge_id);
        self.remote_inflight.retain(|&id| id != result.edge_id);
        self.locally_rerun.remove(&result.edge_id);
        runner.build_edge_finished(&result);
    }

    /// Oldest remote edge eligible for a local retry. Retries are issued
    /// one at a time, only while the local executor is idle.
    fn pick_local_retry<R: CommandRunner>(&self, runner: &R) -> Option<EdgeId> {
        if runner.has_pending_local_commands() {
            return None;
        }
        self.remote_inflight
            .iter()
            .copied()
            .find(|id| !self.locally_rerun.contains(id))
    }

    fn start_edge<R: CommandRunner>(&mut self, edge_id: EdgeId, force_local: bool, runner: &mut R) {
        let state = Arc::clone(&self.state);
        let edge = state.edge(edge_id);
        runner.build_edge_started(edge);

        match runner.start_command(edge, force_local) {
            Some(Dispatch::Remote) => {
                self.remote_inflight.push_back(edge_id);
            }
            Some(Dispatch::Local) => {
                if self.remote_inflight.contains(&edge_id) {
                    self.locally_rerun.insert(edge_id);
                }
            }
            None => {
                let result = CommandResult {
                    edge_id,
                    status: ExitStatus::Failure(-1),
                    output: format!("failed to start command: {}", edge.command),
                    origin: Dispatch::Local,
                };
                self.finish_command(result, runner);
            }
        }
    }
}
