//! The master build driver.
//!
//! Implements the graph engine's [`CommandRunner`] contract: admission
//! decisions, local and remote dispatch, and result demultiplexing. All
//! driver state lives here and is only ever touched from the build-loop
//! task; the RPC listener, the fetch pool, and the ctrl-c watcher report in
//! through the driver event channel, which the build loop drains while it
//! is parked in `wait_for_command`.
//!
//! Remote execution is best-effort. A slave that fails a command, or whose
//! artifacts cannot be fetched and verified, never fails the build; the
//! edge simply stays outstanding until the build loop re-runs it locally.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bx_graph::{Builder, CommandResult, CommandRunner, Dispatch, Edge, EdgeId, ExitStatus, State};
use bx_io::process::ExitCode;
use bx_io::subprocess_set::{SubprocessId, SubprocessSet};
use bx_proto::message::{MasterMessage, RunCommandRequest, SlaveMessage, SlaveSystemInfo};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::fetch::Fetcher;
use crate::prelude::*;
use crate::registry::{SlaveInfo, SlaveRegistry};
use crate::webui::WebEvent;

/// Events posted to the driver by the RPC listener, the fetch pool, and the
/// signal watcher.
#[derive(Debug)]
pub enum DriverEvent {
    SlaveConnected {
        connection_id: u64,
        address: SocketAddr,
        tx: mpsc::UnboundedSender<MasterMessage>,
    },
    SlaveMessage {
        connection_id: u64,
        message: SlaveMessage,
    },
    SlaveClosed {
        connection_id: u64,
    },
    /// A remote edge's outputs were fetched and verified.
    OutputsFetched {
        result: CommandResult,
    },
    /// Ctrl-C; the build loop aborts.
    Interrupted,
}

/// What handling one event means for the build loop.
enum EventOutcome {
    Nothing,
    Completed(CommandResult),
    Interrupted,
}

/// One live slave connection, admitted or not.
struct Connection {
    address: SocketAddr,
    tx: mpsc::UnboundedSender<MasterMessage>,
}

/// The master-side implementation of the runner contract.
pub struct MasterDriver {
    state: Arc<State>,
    /// Local parallelism budget; tracked local subprocesses never exceed it.
    local_parallelism: usize,
    subprocs: SubprocessSet,
    subproc_to_edge: HashMap<SubprocessId, EdgeId>,
    /// Every live connection, keyed by connection id.
    connections: HashMap<u64, Connection>,
    registry: SlaveRegistry,
    /// Remote-dispatched edges that have not finished, keyed by wire id.
    outstanding: HashMap<u64, EdgeId>,
    pending_remote_commands: usize,
    events: mpsc::Receiver<DriverEvent>,
    web: mpsc::UnboundedSender<WebEvent>,
    fetcher: Fetcher,
    is_building: bool,
}

impl MasterDriver {
    pub fn new(
        state: Arc<State>,
        local_parallelism: usize,
        events: mpsc::Receiver<DriverEvent>,
        web: mpsc::UnboundedSender<WebEvent>,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            state,
            local_parallelism: local_parallelism.max(1),
            subprocs: SubprocessSet::new(),
            subproc_to_edge: HashMap::new(),
            connections: HashMap::new(),
            registry: SlaveRegistry::new(),
            outstanding: HashMap::new(),
            pending_remote_commands: 0,
            events,
            web,
            fetcher,
            is_building: false,
        }
    }

    /// Pumps driver events until `amount` slaves are registered. Used by
    /// `--max-slave-amount` to defer the build start.
    pub async fn wait_for_slaves(&mut self, amount: usize) -> Result<()> {
        info!("Waiting for {amount} slave(s) to register");
        while self.registry.len() < amount {
            match self.events.recv().await {
                None => return Err(Error::EventChannelClosed),
                Some(event) => match self.handle_event(event) {
                    EventOutcome::Interrupted => return Err(Error::Interrupted),
                    _ => {}
                },
            }
        }
        Ok(())
    }

    /// Starts the build once per process lifetime.
    ///
    /// Returns `Ok(false)` without doing anything when a build has already
    /// been started.
    pub async fn start_build(&mut self, builder: &mut Builder, targets: &[String]) -> Result<bool> {
        if self.is_building {
            return Ok(false);
        }
        self.is_building = true;

        let initial = serde_json::json!({
            "targets": targets,
            "slaves": self.registry.len(),
        });
        let _ = self.web.send(WebEvent::InitialStatus(initial.to_string()));

        builder.run_build(targets, self).await?;
        Ok(true)
    }

    fn local_can_run_more(&self) -> bool {
        self.subprocs.tracked() < self.local_parallelism
    }

    fn remote_can_run_more(&self) -> bool {
        !self.registry.is_empty() && self.pending_remote_commands < self.registry.total_capacity()
    }

    fn start_command_locally(&mut self, edge: &Edge) -> Option<Dispatch> {
        for output in &edge.outputs {
            if let Some(parent) = std::path::Path::new(output).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(err) = std::fs::create_dir_all(parent) {
                        error!("Failed to create directory for output {output} - {err}");
                        return None;
                    }
                }
            }
        }
        if let Some(rspfile) = &edge.rspfile {
            let content = edge.rspfile_content.as_deref().unwrap_or_default();
            if let Err(err) = std::fs::write(rspfile, content) {
                error!("Failed to write response file {rspfile} - {err}");
                return None;
            }
        }
        match self.subprocs.add(&edge.command, edge.use_console) {
            Ok(id) => {
                self.subproc_to_edge.insert(id, edge.id);
                Some(Dispatch::Local)
            }
            Err(err) => {
                error!("Failed to spawn command for edge {} - {err}", edge.id);
                None
            }
        }
    }

    fn start_command_remotely(&mut self, edge: &Edge) -> Option<Dispatch> {
        let Some(connection_id) = self.registry.most_available() else {
            return self.start_command_locally(edge);
        };
        let Some(connection) = self.connections.get(&connection_id) else {
            return self.start_command_locally(edge);
        };

        let request = RunCommandRequest {
            edge_id: edge.id as u64,
            output_paths: edge.outputs.clone(),
            rspfile_path: edge.rspfile.clone(),
            rspfile_content: edge.rspfile_content.clone(),
            command: edge.command.clone(),
        };
        if connection
            .tx
            .send(MasterMessage::RunCommand(request))
            .is_err()
        {
            warn!("Slave {connection_id} went away mid-dispatch, running locally");
            return self.start_command_locally(edge);
        }

        debug!("Edge {} dispatched to slave {connection_id}", edge.id);
        self.outstanding.insert(edge.id as u64, edge.id);
        self.pending_remote_commands += 1;
        Some(Dispatch::Remote)
    }

    fn on_system_info(&mut self, connection_id: u64, info: SlaveSystemInfo) {
        if self.registry.contains(connection_id) {
            return;
        }
        if info.os_name != std::env::consts::OS || info.os_arch != std::env::consts::ARCH {
            let reason = format!(
                "Different system name or architecture, system info of master: \"{}, {}\".",
                std::env::consts::OS,
                std::env::consts::ARCH
            );
            warn!("Rejecting slave {connection_id}: {reason}");
            if let Some(connection) = self.connections.remove(&connection_id) {
                // Dropping the sender after Quit closes the connection.
                let _ = connection.tx.send(MasterMessage::Quit { reason });
            }
            return;
        }

        let Some(connection) = self.connections.get(&connection_id) else {
            warn!("SystemInfo from unknown connection {connection_id}");
            return;
        };
        let slave = SlaveInfo::from_handshake(connection_id, connection.address.ip(), &info);
        info!(
            "Slave {connection_id} joined with {} processor(s), remote capacity now {}",
            info.num_processors,
            self.registry.total_capacity() + slave.capacity()
        );
        self.registry.insert(slave);
    }

    fn on_remote_command_done(
        &mut self,
        connection_id: u64,
        edge_id: u64,
        exit_code: i32,
        output: String,
        output_md5s: Vec<String>,
    ) {
        self.pending_remote_commands = self.pending_remote_commands.saturating_sub(1);

        // A failed remote command may still pass locally; leave the edge
        // for the build loop to re-run.
        if !ExitCode::from_i32(exit_code).success() {
            debug!(
                "Remote edge {edge_id} failed on slave {connection_id} ({exit_code}), \
                 leaving it for a local run"
            );
            return;
        }

        let Some(graph_edge) = self.outstanding.remove(&edge_id) else {
            debug!("Completion for unknown or abandoned edge {edge_id}");
            return;
        };
        let edge = self.state.edge(graph_edge);
        if edge.outputs.len() != output_md5s.len() {
            warn!(
                "Slave {connection_id} reported {} digest(s) for {} output(s) of edge {edge_id}",
                output_md5s.len(),
                edge.outputs.len()
            );
            return;
        }
        let Some(slave) = self.registry.get(connection_id) else {
            warn!("Completion from unregistered slave {connection_id}");
            return;
        };

        let targets: Vec<(String, String)> = edge
            .outputs
            .iter()
            .cloned()
            .zip(output_md5s)
            .collect();
        let result = CommandResult {
            edge_id: graph_edge,
            status: ExitStatus::Success,
            output,
            origin: Dispatch::Remote,
        };
        self.fetcher.spawn_fetch(slave.artifact_host(), targets, result);
    }

    fn handle_event(&mut self, event: DriverEvent) -> EventOutcome {
        match event {
            DriverEvent::SlaveConnected {
                connection_id,
                address,
                tx,
            } => {
                self.connections
                    .insert(connection_id, Connection { address, tx });
                EventOutcome::Nothing
            }
            DriverEvent::SlaveClosed { connection_id } => {
                self.connections.remove(&connection_id);
                if self.registry.remove(connection_id).is_some() {
                    info!(
                        "Slave {connection_id} left, remote capacity now {}",
                        self.registry.total_capacity()
                    );
                }
                EventOutcome::Nothing
            }
            DriverEvent::SlaveMessage {
                connection_id,
                message,
            } => {
                match message {
                    SlaveMessage::SystemInfo(info) => self.on_system_info(connection_id, info),
                    SlaveMessage::StatusUpdate(status) => {
                        if !self.registry.update_status(connection_id, &status) {
                            debug!("Ignoring status update from unregistered {connection_id}");
                        }
                    }
                    SlaveMessage::CommandDone {
                        edge_id,
                        exit_code,
                        output,
                        output_md5s,
                    } => self.on_remote_command_done(
                        connection_id,
                        edge_id,
                        exit_code,
                        output,
                        output_md5s,
                    ),
                }
                EventOutcome::Nothing
            }
            DriverEvent::OutputsFetched { result } => EventOutcome::Completed(result),
            DriverEvent::Interrupted => EventOutcome::Interrupted,
        }
    }
}

impl CommandRunner for MasterDriver {
    fn can_run_more(&self) -> bool {
        self.local_can_run_more() || self.remote_can_run_more()
    }

    fn start_command(&mut self, edge: &Edge, force_local: bool) -> Option<Dispatch> {
        // No slave registered and a saturated remote pool both route local;
        // in-flight remote work stays under the aggregate capacity.
        if force_local || !self.remote_can_run_more() {
            self.start_command_locally(edge)
        } else {
            self.start_command_remotely(edge)
        }
    }

    async fn wait_for_command(&mut self) -> Option<CommandResult> {
        enum Next {
            Local(Option<bx_io::subprocess_set::FinishedProcess>),
            Event(Option<DriverEvent>),
        }

        loop {
            let has_local = !self.subprocs.is_empty();
            let next = tokio::select! {
                finished = self.subprocs.wait_next(), if has_local => Next::Local(finished),
                event = self.events.recv() => Next::Event(event),
            };

            match next {
                Next::Local(Some(finished)) => {
                    let Some(edge_id) = self.subproc_to_edge.remove(&finished.id) else {
                        continue;
                    };
                    let status = match finished.exit {
                        ExitCode::Success => ExitStatus::Success,
                        ExitCode::Failure(code) => ExitStatus::Failure(code),
                        ExitCode::Killed => ExitStatus::Interrupted,
                    };
                    return Some(CommandResult {
                        edge_id,
                        status,
                        output: finished.output,
                        origin: Dispatch::Local,
                    });
                }
                Next::Local(None) => continue,
                Next::Event(None) => return None,
                Next::Event(Some(event)) => match self.handle_event(event) {
                    EventOutcome::Completed(result) => return Some(result),
                    EventOutcome::Interrupted => return None,
                    EventOutcome::Nothing => {}
                },
            }
        }
    }

    fn has_pending_local_commands(&self) -> bool {
        !self.subproc_to_edge.is_empty()
    }

    fn abort(&mut self) {
        self.subprocs.clear();
        self.subproc_to_edge.clear();
        self.outstanding.clear();
        self.pending_remote_commands = 0;
    }

    fn build_edge_finished(&mut self, result: &CommandResult) {
        // A locally re-run edge can finish while its remote twin is still
        // outstanding; reap the entry so a late completion is dropped.
        self.outstanding.remove(&(result.edge_id as u64));

        let document = serde_json::json!({
            "id": result.edge_id,
            "result": result.status.as_i32(),
            "output": result.output,
        });
        let _ = self.web.send(WebEvent::CommandResult(document.to_string()));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bx_graph::BuildManifest;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_state(toml: &str) -> Arc<State> {
        Arc::new(State::from_manifest(BuildManifest::from_toml(toml).unwrap()).unwrap())
    }

    struct TestDriver {
        driver: MasterDriver,
        events_tx: mpsc::Sender<DriverEvent>,
        web_rx: mpsc::UnboundedReceiver<WebEvent>,
    }

    fn make_driver(state: Arc<State>, local_parallelism: usize, build_dir: PathBuf) -> TestDriver {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (web_tx, web_rx) = mpsc::unbounded_channel();
        let fetcher = Fetcher::new(events_tx.clone(), build_dir);
        TestDriver {
            driver: MasterDriver::new(state, local_parallelism, events_rx, web_tx, fetcher),
            events_tx,
            web_rx,
        }
    }

    fn matching_info(num_processors: u32, artifact_port: u16) -> SlaveSystemInfo {
        SlaveSystemInfo {
            os_name: std::env::consts::OS.to_string(),
            os_arch: std::env::consts::ARCH.to_string(),
            num_processors,
            parallelism: num_processors,
            artifact_port,
        }
    }

    /// Registers a slave connection directly with the driver and returns
    /// the receiving end of its outgoing queue.
    fn connect_slave(
        driver: &mut MasterDriver,
        connection_id: u64,
        info: SlaveSystemInfo,
    ) -> mpsc::UnboundedReceiver<MasterMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        driver.handle_event(DriverEvent::SlaveConnected {
            connection_id,
            address: "127.0.0.1:50000".parse().unwrap(),
            tx,
        });
        driver.handle_event(DriverEvent::SlaveMessage {
            connection_id,
            message: SlaveMessage::SystemInfo(info),
        });
        rx
    }

    #[tokio::test]
    async fn admits_matching_slave() {
        let mut test = make_driver(test_state(""), 2, PathBuf::from("."));
        connect_slave(&mut test.driver, 1, matching_info(4, 8080));

        assert_eq!(test.driver.registry.len(), 1);
        assert_eq!(test.driver.registry.total_capacity(), 6);
    }

    #[tokio::test]
    async fn rejects_mismatched_slave_with_one_quit() {
        let mut test = make_driver(test_state(""), 2, PathBuf::from("."));
        let mut info = matching_info(4, 8080);
        info.os_name = "definitely-not-this-os".to_string();
        let mut rx = connect_slave(&mut test.driver, 1, info);

        assert!(test.driver.registry.is_empty());
        assert!(!test.driver.connections.contains_key(&1));

        match rx.try_recv() {
            Ok(MasterMessage::Quit { reason }) => {
                assert!(reason.contains("Different system name or architecture"));
            }
            other => panic!("Expected Quit, got {other:?}"),
        }
        // Exactly one message, then the channel is closed.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ignores_status_updates_before_handshake() {
        let mut test = make_driver(test_state(""), 2, PathBuf::from("."));
        let (tx, _rx) = mpsc::unbounded_channel();
        test.driver.handle_event(DriverEvent::SlaveConnected {
            connection_id: 1,
            address: "127.0.0.1:50000".parse().unwrap(),
            tx,
        });
        test.driver.handle_event(DriverEvent::SlaveMessage {
            connection_id: 1,
            message: SlaveMessage::StatusUpdate(bx_proto::message::SlaveStatus {
                load_average: 1.0,
                running_commands: 1,
                available_physical_memory: 1,
            }),
        });
        assert!(test.driver.registry.is_empty());
    }

    #[tokio::test]
    async fn remote_admission_is_bounded_by_capacity() {
        let mut test = make_driver(test_state(""), 2, PathBuf::from("."));
        assert!(!test.driver.remote_can_run_more());

        connect_slave(&mut test.driver, 1, matching_info(4, 8080));
        assert!(test.driver.remote_can_run_more());

        test.driver.pending_remote_commands = 5;
        assert!(test.driver.remote_can_run_more());
        test.driver.pending_remote_commands = 6;
        assert!(!test.driver.remote_can_run_more());
    }

    #[tokio::test]
    async fn remote_dispatch_tracks_the_edge() {
        let state = test_state(
            r#"
            [[edges]]
            outputs = ["out/a.o"]
            command = "cc -c a.c -o out/a.o"
            rspfile = "a.rsp"
            rspfile_content = "flags"
        "#,
        );
        let mut test = make_driver(Arc::clone(&state), 2, PathBuf::from("."));
        let mut rx = connect_slave(&mut test.driver, 1, matching_info(4, 8080));

        let edge = state.edge(0).clone();
        let dispatch = test.driver.start_command(&edge, false);
        assert_eq!(dispatch, Some(Dispatch::Remote));
        assert_eq!(test.driver.pending_remote_commands, 1);
        assert!(test.driver.outstanding.contains_key(&0));

        match rx.try_recv() {
            Ok(MasterMessage::RunCommand(request)) => {
                assert_eq!(request.edge_id, 0);
                assert_eq!(request.output_paths, vec!["out/a.o"]);
                assert_eq!(request.rspfile_path.as_deref(), Some("a.rsp"));
                assert_eq!(request.rspfile_content.as_deref(), Some("flags"));
            }
            other => panic!("Expected RunCommand, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn saturated_remote_pool_routes_local() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().display();
        let state = test_state(&format!(
            r#"
            [[edges]]
            outputs = ["{base}/a.o"]
            command = "true"
        "#
        ));
        let mut test = make_driver(Arc::clone(&state), 2, dir.path().to_path_buf());
        let mut rx = connect_slave(&mut test.driver, 1, matching_info(4, 8080));

        test.driver.pending_remote_commands = 6;
        let edge = state.edge(0).clone();
        assert_eq!(test.driver.start_command(&edge, false), Some(Dispatch::Local));
        assert!(rx.try_recv().is_err());
        test.driver.abort();
    }

    #[tokio::test]
    async fn remote_failure_leaves_edge_outstanding() {
        let state = test_state(
            r#"
            [[edges]]
            outputs = ["a.o"]
            command = "compile"
        "#,
        );
        let mut test = make_driver(Arc::clone(&state), 2, PathBuf::from("."));
        connect_slave(&mut test.driver, 1, matching_info(4, 8080));

        let edge = state.edge(0).clone();
        test.driver.start_command(&edge, false);

        test.driver.handle_event(DriverEvent::SlaveMessage {
            connection_id: 1,
            message: SlaveMessage::CommandDone {
                edge_id: 0,
                exit_code: 1,
                output: "boom".into(),
                output_md5s: vec![String::new()],
            },
        });

        assert_eq!(test.driver.pending_remote_commands, 0);
        assert!(test.driver.outstanding.contains_key(&0));
    }

    #[tokio::test]
    async fn misaligned_digests_drop_the_completion() {
        let state = test_state(
            r#"
            [[edges]]
            outputs = ["a.o", "b.o"]
            command = "generate"
        "#,
        );
        let mut test = make_driver(Arc::clone(&state), 2, PathBuf::from("."));
        connect_slave(&mut test.driver, 1, matching_info(4, 8080));

        let edge = state.edge(0).clone();
        test.driver.start_command(&edge, false);
        test.driver.handle_event(DriverEvent::SlaveMessage {
            connection_id: 1,
            message: SlaveMessage::CommandDone {
                edge_id: 0,
                exit_code: 0,
                output: String::new(),
                output_md5s: vec!["aaaa".into()],
            },
        });

        // No fetch was queued; the edge is no longer outstanding but will
        // come back through the local retry path.
        assert!(!test.driver.outstanding.contains_key(&0));
    }

    #[tokio::test]
    async fn abort_clears_local_and_outstanding_state() {
        let state = test_state(
            r#"
            [[edges]]
            outputs = ["a.o"]
            command = "sleep 30"
        "#,
        );
        let mut test = make_driver(Arc::clone(&state), 2, PathBuf::from("."));
        connect_slave(&mut test.driver, 1, matching_info(4, 8080));

        let edge = state.edge(0).clone();
        test.driver.start_command(&edge, false);
        test.driver.start_command(&edge, true);
        assert!(test.driver.has_pending_local_commands());

        test.driver.abort();
        assert!(!test.driver.has_pending_local_commands());
        assert!(test.driver.outstanding.is_empty());
        assert_eq!(test.driver.pending_remote_commands, 0);
    }

    #[tokio::test]
    async fn zero_slaves_builds_two_targets_locally() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().display();
        let state = test_state(&format!(
            r#"
            [[edges]]
            outputs = ["{base}/a.o"]
            command = "printf alpha > '{base}/a.o'"

            [[edges]]
            outputs = ["{base}/b.o"]
            command = "printf beta > '{base}/b.o'"
        "#
        ));
        let mut test = make_driver(Arc::clone(&state), 2, dir.path().to_path_buf());
        let mut builder = Builder::new(Arc::clone(&state));

        let targets = state.default_nodes().unwrap();
        let started = timeout(
            Duration::from_secs(10),
            test.driver.start_build(&mut builder, &targets),
        )
        .await
        .expect("Build should finish")
        .unwrap();
        assert!(started);

        assert_eq!(
            std::fs::read(dir.path().join("a.o")).unwrap(),
            b"alpha"
        );
        assert_eq!(std::fs::read(dir.path().join("b.o")).unwrap(), b"beta");

        // Initial status first, then one result per edge.
        match test.web_rx.try_recv() {
            Ok(WebEvent::InitialStatus(json)) => assert!(json.contains("targets")),
            other => panic!("Expected initial status, got {other:?}"),
        }
        let mut results = 0;
        while let Ok(event) = test.web_rx.try_recv() {
            if matches!(event, WebEvent::CommandResult(_)) {
                results += 1;
            }
        }
        assert_eq!(results, 2);
    }

    #[tokio::test]
    async fn start_build_is_latched_once() {
        let state = test_state("");
        let mut test = make_driver(Arc::clone(&state), 2, PathBuf::from("."));
        let mut builder = Builder::new(Arc::clone(&state));

        let first = test.driver.start_build(&mut builder, &[]).await.unwrap();
        let second = test.driver.start_build(&mut builder, &[]).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn failed_local_command_fails_the_build() {
        let state = test_state(
            r#"
            [[edges]]
            outputs = ["a.o"]
            command = "exit 7"
        "#,
        );
        let mut test = make_driver(Arc::clone(&state), 2, PathBuf::from("."));
        let mut builder = Builder::new(Arc::clone(&state));

        let result = timeout(
            Duration::from_secs(10),
            test.driver.start_build(&mut builder, &["a.o".to_string()]),
        )
        .await
        .expect("Build should finish");
        assert!(matches!(
            result,
            Err(Error::Graph(bx_graph::error::Error::BuildFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn wait_for_slaves_pumps_the_event_channel() {
        let mut test = make_driver(test_state(""), 2, PathBuf::from("."));

        let events_tx = test.events_tx.clone();
        tokio::spawn(async move {
            let (tx, _rx) = mpsc::unbounded_channel();
            events_tx
                .send(DriverEvent::SlaveConnected {
                    connection_id: 1,
                    address: "127.0.0.1:50000".parse().unwrap(),
                    tx,
                })
                .await
                .unwrap();
            events_tx
                .send(DriverEvent::SlaveMessage {
                    connection_id: 1,
                    message: SlaveMessage::SystemInfo(matching_info(4, 8080)),
                })
                .await
                .unwrap();
        });

        timeout(Duration::from_secs(5), test.driver.wait_for_slaves(1))
            .await
            .expect("Registration should arrive")
            .unwrap();
        assert_eq!(test.driver.registry.len(), 1);
    }

    #[tokio::test]
    async fn fetched_outputs_complete_the_wait() {
        let state = test_state(
            r#"
            [[edges]]
            outputs = ["a.o"]
            command = "compile"
        "#,
        );
        let mut test = make_driver(Arc::clone(&state), 2, PathBuf::from("."));

        let result = CommandResult {
            edge_id: 0,
            status: ExitStatus::Success,
            output: "remote log".into(),
            origin: Dispatch::Remote,
        };
        test.events_tx
            .send(DriverEvent::OutputsFetched { result })
            .await
            .unwrap();

        let completed = timeout(Duration::from_secs(5), test.driver.wait_for_command())
            .await
            .expect("Wait should complete")
            .expect("Should yield the fetched result");
        assert_eq!(completed.edge_id, 0);
        assert_eq!(completed.origin, Dispatch::Remote);
    }

    /// End-to-end remote flow: dispatch, slave completion, artifact fetch
    /// with verification, and graph finish.
    #[tokio::test]
    async fn remote_completion_fetches_artifacts_and_finishes_the_edge() {
        use axum::routing::get;
        use md5::{Digest, Md5};

        // The "slave" working tree with the produced artifact.
        let slave_dir = tempfile::tempdir().unwrap();
        std::fs::write(slave_dir.path().join("remote.o"), b"remote object").unwrap();
        let slave_root = slave_dir.path().to_path_buf();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let artifact_port = listener.local_addr().unwrap().port();
        let app = axum::Router::new().route(
            "/{*path}",
            get(move |axum::extract::Path(path): axum::extract::Path<String>| {
                let root = slave_root.clone();
                async move {
                    tokio::fs::read(root.join(path))
                        .await
                        .map_err(|_| axum::http::StatusCode::NOT_FOUND)
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let master_dir = tempfile::tempdir().unwrap();
        let state = test_state(
            r#"
            [[edges]]
            outputs = ["remote.o"]
            command = "compile remote.o"
        "#,
        );
        let mut test = make_driver(Arc::clone(&state), 2, master_dir.path().to_path_buf());
        let mut slave_rx = connect_slave(&mut test.driver, 1, matching_info(4, artifact_port));

        // Dispatch goes remote.
        let edge = state.edge(0).clone();
        assert_eq!(test.driver.start_command(&edge, false), Some(Dispatch::Remote));
        match slave_rx.try_recv() {
            Ok(MasterMessage::RunCommand(request)) => assert_eq!(request.edge_id, 0),
            other => panic!("Expected RunCommand, got {other:?}"),
        }

        // The slave reports success with the true digest.
        let md5 = format!("{:x}", Md5::digest(b"remote object"));
        test.driver.handle_event(DriverEvent::SlaveMessage {
            connection_id: 1,
            message: SlaveMessage::CommandDone {
                edge_id: 0,
                exit_code: 0,
                output: "compiled".into(),
                output_md5s: vec![md5],
            },
        });
        assert!(!test.driver.outstanding.contains_key(&0));

        // The fetch pool pulls the artifact and posts the completion.
        let completed = timeout(Duration::from_secs(10), test.driver.wait_for_command())
            .await
            .expect("Fetch should complete")
            .expect("Should yield the remote result");
        assert_eq!(completed.edge_id, 0);
        assert_eq!(completed.origin, Dispatch::Remote);
        assert!(completed.success());

        assert_eq!(
            std::fs::read(master_dir.path().join("remote.o")).unwrap(),
            b"remote object"
        );
    }
}
