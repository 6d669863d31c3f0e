//! The supervised task: a cloneable handle plus a control loop that
//! owns the child process and the lifecycle state machine.
//!
//! All mutation happens on the control loop. Handles talk to it over
//! an unbounded command channel and observe it through a state watch
//! and a broadcast of [`TaskEvent`]s, so no lock is ever held across
//! an await and callers can never observe a torn state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deskhand_types::TaskEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::ChildSpec;
use crate::error::TaskError;
use crate::probe::HealthProbe;
use crate::state::TaskState;

/// How many trailing child output lines to keep for error reports.
const DIAGNOSTIC_LINES: usize = 50;

/// All lifecycle timing knobs in one place.
///
/// Defaults match the production cadence; tests compress them.
#[derive(Debug, Clone, Copy)]
pub struct TaskTimings {
    /// Interval between startup probe attempts.
    pub startup_poll: Duration,
    /// How many probe attempts before startup is declared failed.
    pub startup_attempts: u32,
    /// Recheck interval once the task is running.
    pub steady_poll: Duration,
    /// How long to wait after the first kill before escalating.
    pub stop_grace: Duration,
    /// How long to wait after the forced kill before giving up.
    pub stop_force: Duration,
}

impl Default for TaskTimings {
    fn default() -> Self {
        Self {
            startup_poll: Duration::from_secs(1),
            startup_attempts: 30,
            steady_poll: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
            stop_force: Duration::from_secs(5),
        }
    }
}

/// Deferred action executed once the task reaches `Running`, given the
/// probed service address. At most one is pending at a time.
pub type OpenAction = Box<dyn FnOnce(&str) + Send>;

enum Command {
    Start { reply: oneshot::Sender<()> },
    Stop { reply: oneshot::Sender<()> },
    OpenWhenRunning { action: OpenAction },
}

/// Handle to a supervised background process.
///
/// Cheap to clone; every clone talks to the same control loop. Dropping
/// all clones closes the command channel, which shuts the child down.
#[derive(Clone)]
pub struct SupervisedTask {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<TaskEvent>,
    state: watch::Receiver<TaskState>,
    cancel: CancellationToken,
}

impl SupervisedTask {
    /// Spawn the control loop for `spec`, initially `Stopped`.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        spec: ChildSpec,
        probe: Arc<dyn HealthProbe>,
        timings: TaskTimings,
    ) -> Self {
        let name: Arc<str> = name.into().into();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(32);
        let (state_tx, state_rx) = watch::channel(TaskState::Stopped);
        let cancel = CancellationToken::new();

        let controller = Controller {
            name: name.clone(),
            spec,
            probe,
            timings,
            commands: command_rx,
            events: event_tx.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            pending_open: None,
        };
        tokio::spawn(controller.run());

        Self {
            name,
            commands: command_tx,
            events: event_tx,
            state: state_rx,
            cancel,
        }
    }

    /// The task's name, used in logs and error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// A watch over state transitions, for callers that want to react
    /// to changes rather than poll.
    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    /// Subscribe to lifecycle events. Only events emitted after this
    /// call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Begin startup, returning once the control loop has accepted the
    /// request (not once the task is running -- watch events for that).
    ///
    /// A task that is already starting or running logs a warning and
    /// succeeds without doing anything; one that is mid-shutdown
    /// returns [`TaskError::Busy`].
    pub async fn start(&self) -> Result<(), TaskError> {
        let state = self.state();
        if state.is_active() {
            warn!(task = %self.name, %state, "start requested but task is already active");
            return Ok(());
        }
        if state == TaskState::Stopping {
            return Err(TaskError::Busy(self.name.to_string()));
        }
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Start { reply })
            .map_err(|_| TaskError::ControlGone(self.name.to_string()))?;
        done.await
            .map_err(|_| TaskError::ControlGone(self.name.to_string()))
    }

    /// Shut the task down, returning once it has stopped. Bounded by
    /// the grace and force windows; a no-op if the task is not active.
    pub async fn stop(&self) -> Result<(), TaskError> {
        if matches!(self.state(), TaskState::Stopped | TaskState::Errored) {
            return Ok(());
        }
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .map_err(|_| TaskError::ControlGone(self.name.to_string()))?;
        done.await
            .map_err(|_| TaskError::ControlGone(self.name.to_string()))
    }

    /// Register `action` to run once the task is `Running`, handed the
    /// probed service address. Runs immediately if already running;
    /// otherwise it replaces any previously pending action and fires
    /// exactly once.
    pub fn open_when_running<F>(&self, action: F) -> Result<(), TaskError>
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.commands
            .send(Command::OpenWhenRunning { action: Box::new(action) })
            .map_err(|_| TaskError::ControlGone(self.name.to_string()))
    }

    /// Tear the control loop down, stopping any live child on the way
    /// out. After this the handle only returns [`TaskError::ControlGone`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SupervisedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedTask")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Tail buffer over the child's stdout/stderr, kept for error reports.
struct DiagnosticBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    readers: Vec<JoinHandle<()>>,
}

impl DiagnosticBuffer {
    /// Take the child's output pipes and drain them continuously. The
    /// readers run for the child's whole lifetime so a chatty child is
    /// never blocked on a full pipe.
    fn attach(child: &mut Child) -> Self {
        let lines: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(Self::drain(stdout, lines.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(Self::drain(stderr, lines.clone()));
        }
        Self { lines, readers }
    }

    fn drain<R>(stream: R, lines: Arc<Mutex<VecDeque<String>>>) -> JoinHandle<()>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let mut buf = match lines.lock() {
                    Ok(buf) => buf,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if buf.len() == DIAGNOSTIC_LINES {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        })
    }

    /// Wait for the pipes to close, then return the captured tail.
    /// Only meaningful after the child has exited.
    async fn collect(self) -> String {
        for reader in self.readers {
            let _ = reader.await;
        }
        let buf = match self.lines.lock() {
            Ok(buf) => buf,
            Err(poisoned) => poisoned.into_inner(),
        };
        buf.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Outcome of one select in the startup phase.
enum StartupTurn {
    Cancelled,
    Exited(std::io::Result<std::process::ExitStatus>),
    Poll,
}

/// Outcome of one select in the running phase.
enum RunningTurn {
    Cancelled,
    Exited(std::io::Result<std::process::ExitStatus>),
    Recheck,
    Command(Option<Command>),
}

struct Controller {
    name: Arc<str>,
    spec: ChildSpec,
    probe: Arc<dyn HealthProbe>,
    timings: TaskTimings,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<TaskEvent>,
    state: watch::Sender<TaskState>,
    cancel: CancellationToken,
    pending_open: Option<OpenAction>,
}

impl Controller {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    None => break,
                    Some(Command::Start { reply }) => {
                        let _ = reply.send(());
                        self.run_session().await;
                    }
                    Some(Command::Stop { reply }) => {
                        // Already stopped; acknowledge and stay idle.
                        let _ = reply.send(());
                    }
                    Some(Command::OpenWhenRunning { action }) => {
                        self.pending_open = Some(action);
                    }
                },
            }
        }
        debug!(task = %self.name, "control loop exiting");
    }

    fn set_state(&self, state: TaskState) {
        debug!(task = %self.name, %state, "state transition");
        self.state.send_replace(state);
    }

    fn emit(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }

    /// One full lifecycle: spawn, probe to readiness, supervise, stop.
    /// Always leaves the state at `Stopped`.
    async fn run_session(&mut self) {
        self.set_state(TaskState::Starting);
        info!(task = %self.name, program = self.spec.program(), "starting");

        let mut child = match self.spec.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(task = %self.name, %err, "failed to spawn child");
                self.fail(format!("failed to spawn '{}': {err}", self.spec.program()));
                return;
            }
        };
        let diagnostics = DiagnosticBuffer::attach(&mut child);

        match self.await_readiness(&mut child).await {
            Readiness::Ready => {}
            Readiness::Cancelled => {
                self.stop_child(&mut child).await;
                self.set_state(TaskState::Stopped);
                self.emit(TaskEvent::Stopped);
                return;
            }
            Readiness::ChildExited(status) => {
                let tail = diagnostics.collect().await;
                let status = match status {
                    Ok(status) => status.to_string(),
                    Err(err) => format!("wait failed: {err}"),
                };
                self.fail(compose_failure(
                    format!("'{}' exited during startup ({status})", self.spec.program()),
                    &tail,
                ));
                return;
            }
            Readiness::TimedOut => {
                // The child is alive but never answered; put it down
                // before reporting.
                self.stop_child(&mut child).await;
                self.fail(format!(
                    "'{}' did not become ready after {} attempts",
                    self.spec.program(),
                    self.timings.startup_attempts,
                ));
                return;
            }
        }

        let address = self.probe.address();
        self.set_state(TaskState::Running);
        info!(task = %self.name, %address, "running");
        self.emit(TaskEvent::Started { address: address.clone() });
        if let Some(action) = self.pending_open.take() {
            action(&address);
        }

        self.supervise(&mut child, &address).await;
    }

    /// Poll the probe until the service answers, the child dies, the
    /// attempt budget runs out, or the whole task is cancelled.
    async fn await_readiness(&mut self, child: &mut Child) -> Readiness {
        for attempt in 1..=self.timings.startup_attempts {
            let turn = tokio::select! {
                _ = self.cancel.cancelled() => StartupTurn::Cancelled,
                status = child.wait() => StartupTurn::Exited(status),
                _ = tokio::time::sleep(self.timings.startup_poll) => StartupTurn::Poll,
            };
            match turn {
                StartupTurn::Cancelled => return Readiness::Cancelled,
                StartupTurn::Exited(status) => return Readiness::ChildExited(status),
                StartupTurn::Poll => {
                    if self.probe.check().await {
                        debug!(task = %self.name, attempt, "probe passed");
                        return Readiness::Ready;
                    }
                    debug!(task = %self.name, attempt, "probe not yet ready");
                }
            }
        }
        Readiness::TimedOut
    }

    /// Steady state: watch for exit, recheck on a slow cadence, and
    /// serve handle commands.
    async fn supervise(&mut self, child: &mut Child, address: &str) {
        let mut recheck = tokio::time::interval_at(
            tokio::time::Instant::now() + self.timings.steady_poll,
            self.timings.steady_poll,
        );
        loop {
            let turn = tokio::select! {
                _ = self.cancel.cancelled() => RunningTurn::Cancelled,
                status = child.wait() => RunningTurn::Exited(status),
                _ = recheck.tick() => RunningTurn::Recheck,
                cmd = self.commands.recv() => RunningTurn::Command(cmd),
            };
            match turn {
                RunningTurn::Cancelled | RunningTurn::Command(None) => {
                    self.stop_child(child).await;
                    self.set_state(TaskState::Stopped);
                    self.emit(TaskEvent::Stopped);
                    return;
                }
                RunningTurn::Exited(status) => {
                    let status = match status {
                        Ok(status) => status.to_string(),
                        Err(err) => format!("wait failed: {err}"),
                    };
                    warn!(task = %self.name, %status, "child exited unexpectedly");
                    self.set_state(TaskState::Stopped);
                    self.emit(TaskEvent::Stopped);
                    return;
                }
                RunningTurn::Recheck => {
                    if self.probe.check().await {
                        debug!(task = %self.name, "recheck passed");
                    } else {
                        warn!(task = %self.name, "recheck failed; service unresponsive");
                    }
                }
                RunningTurn::Command(Some(Command::Start { reply })) => {
                    warn!(task = %self.name, "start requested but task is already running");
                    let _ = reply.send(());
                }
                RunningTurn::Command(Some(Command::Stop { reply })) => {
                    self.stop_child(child).await;
                    self.set_state(TaskState::Stopped);
                    self.emit(TaskEvent::Stopped);
                    let _ = reply.send(());
                    return;
                }
                RunningTurn::Command(Some(Command::OpenWhenRunning { action })) => {
                    action(address);
                }
            }
        }
    }

    /// Two-phase shutdown: kill and wait out the grace window, then
    /// escalate and wait out the force window. Never blocks longer
    /// than grace + force.
    async fn stop_child(&mut self, child: &mut Child) {
        self.set_state(TaskState::Stopping);
        if let Err(err) = child.start_kill() {
            // Typically the child is already gone.
            debug!(task = %self.name, %err, "kill signal not delivered");
        }
        if tokio::time::timeout(self.timings.stop_grace, child.wait())
            .await
            .is_ok()
        {
            return;
        }
        warn!(task = %self.name, "child ignored shutdown; forcing");
        if tokio::time::timeout(self.timings.stop_force, child.kill())
            .await
            .is_err()
        {
            error!(task = %self.name, "child survived forced kill");
        }
    }

    /// Report a failure and settle: `Errored` with exactly one error
    /// event, then `Stopped`.
    fn fail(&self, message: String) {
        error!(task = %self.name, %message, "task failed");
        self.set_state(TaskState::Errored);
        self.emit(TaskEvent::Error { message });
        self.set_state(TaskState::Stopped);
    }
}

enum Readiness {
    Ready,
    Cancelled,
    ChildExited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
}

fn compose_failure(summary: String, tail: &str) -> String {
    if tail.is_empty() {
        summary
    } else {
        format!("{summary}\nlast output:\n{tail}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct ReadyProbe;

    #[async_trait]
    impl HealthProbe for ReadyProbe {
        async fn check(&self) -> bool {
            true
        }
        fn address(&self) -> String {
            "http://127.0.0.1:9/".into()
        }
    }

    struct NeverProbe;

    #[async_trait]
    impl HealthProbe for NeverProbe {
        async fn check(&self) -> bool {
            false
        }
        fn address(&self) -> String {
            "http://127.0.0.1:9/".into()
        }
    }

    /// Fails the first `n` checks, then succeeds.
    struct FlakyProbe {
        remaining: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyProbe {
        fn new(failures: u32) -> Self {
            Self {
                remaining: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        async fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }
        fn address(&self) -> String {
            "http://127.0.0.1:9/".into()
        }
    }

    fn fast_timings() -> TaskTimings {
        TaskTimings {
            startup_poll: Duration::from_millis(20),
            startup_attempts: 30,
            steady_poll: Duration::from_millis(50),
            stop_grace: Duration::from_millis(300),
            stop_force: Duration::from_millis(300),
        }
    }

    fn long_lived() -> ChildSpec {
        ChildSpec::new("sleep").arg("30")
    }

    async fn wait_for(task: &SupervisedTask, want: TaskState) {
        let mut watch = task.watch_state();
        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("control loop dropped the state channel");
    }

    async fn next_event(events: &mut broadcast::Receiver<TaskEvent>) -> TaskEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn starts_runs_and_stops() {
        let task = SupervisedTask::new(
            "t",
            long_lived(),
            Arc::new(ReadyProbe),
            fast_timings(),
        );
        let mut events = task.subscribe();
        assert_eq!(task.state(), TaskState::Stopped);

        task.start().await.unwrap();
        wait_for(&task, TaskState::Running).await;
        match next_event(&mut events).await {
            TaskEvent::Started { address } => assert_eq!(address, "http://127.0.0.1:9/"),
            other => panic!("expected Started, got {other:?}"),
        }

        task.stop().await.unwrap();
        assert_eq!(task.state(), TaskState::Stopped);
        assert!(matches!(next_event(&mut events).await, TaskEvent::Stopped));
        task.shutdown();
    }

    #[tokio::test]
    async fn startup_waits_out_a_slow_probe() {
        let probe = Arc::new(FlakyProbe::new(2));
        let task = SupervisedTask::new("t", long_lived(), probe.clone(), fast_timings());
        task.start().await.unwrap();
        wait_for(&task, TaskState::Running).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        task.shutdown();
    }

    #[tokio::test]
    async fn probe_exhaustion_errors_once_and_settles_stopped() {
        let timings = TaskTimings {
            startup_attempts: 3,
            ..fast_timings()
        };
        let task = SupervisedTask::new("t", long_lived(), Arc::new(NeverProbe), timings);
        let mut events = task.subscribe();
        task.start().await.unwrap();

        match next_event(&mut events).await {
            TaskEvent::Error { message } => assert!(message.contains("3 attempts")),
            other => panic!("expected Error, got {other:?}"),
        }
        wait_for(&task, TaskState::Stopped).await;
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        task.shutdown();
    }

    #[tokio::test]
    async fn child_exit_during_startup_reports_its_output() {
        let spec = ChildSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let task = SupervisedTask::new("t", spec, Arc::new(NeverProbe), fast_timings());
        let mut events = task.subscribe();
        task.start().await.unwrap();

        match next_event(&mut events).await {
            TaskEvent::Error { message } => {
                assert!(message.contains("exited during startup"), "{message}");
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("expected Error, got {other:?}"),
        }
        wait_for(&task, TaskState::Stopped).await;
        task.shutdown();
    }

    #[tokio::test]
    async fn spawn_failure_errors_without_hanging() {
        let spec = ChildSpec::new("deskhand-no-such-binary-xyz");
        let task = SupervisedTask::new("t", spec, Arc::new(ReadyProbe), fast_timings());
        let mut events = task.subscribe();
        task.start().await.unwrap();
        match next_event(&mut events).await {
            TaskEvent::Error { message } => assert!(message.contains("failed to spawn")),
            other => panic!("expected Error, got {other:?}"),
        }
        wait_for(&task, TaskState::Stopped).await;
        task.shutdown();
    }

    #[tokio::test]
    async fn start_while_running_is_a_no_op() {
        let task = SupervisedTask::new("t", long_lived(), Arc::new(ReadyProbe), fast_timings());
        let mut events = task.subscribe();
        task.start().await.unwrap();
        wait_for(&task, TaskState::Running).await;
        assert!(matches!(
            next_event(&mut events).await,
            TaskEvent::Started { .. }
        ));

        task.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(task.state(), TaskState::Running);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        task.shutdown();
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_no_op() {
        let task = SupervisedTask::new("t", long_lived(), Arc::new(ReadyProbe), fast_timings());
        task.stop().await.unwrap();
        assert_eq!(task.state(), TaskState::Stopped);
        task.shutdown();
    }

    #[tokio::test]
    async fn unexpected_exit_while_running_is_noticed() {
        // Child lives just long enough to pass the probe, then dies.
        let spec = ChildSpec::new("sh").args(["-c", "sleep 0.2"]);
        let task = SupervisedTask::new("t", spec, Arc::new(ReadyProbe), fast_timings());
        let mut events = task.subscribe();
        task.start().await.unwrap();
        wait_for(&task, TaskState::Running).await;
        assert!(matches!(
            next_event(&mut events).await,
            TaskEvent::Started { .. }
        ));

        wait_for(&task, TaskState::Stopped).await;
        assert!(matches!(next_event(&mut events).await, TaskEvent::Stopped));
        task.shutdown();
    }

    #[tokio::test]
    async fn deferred_open_fires_exactly_once_with_the_address() {
        let probe = Arc::new(FlakyProbe::new(2));
        let task = SupervisedTask::new("t", long_lived(), probe, fast_timings());
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(String::new()));

        let (fired2, seen2) = (fired.clone(), seen.clone());
        task.open_when_running(move |address| {
            fired2.fetch_add(1, Ordering::SeqCst);
            *seen2.lock().unwrap() = address.to_string();
        })
        .unwrap();

        task.start().await.unwrap();
        wait_for(&task, TaskState::Running).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(&*seen.lock().unwrap(), "http://127.0.0.1:9/");

        // While running, a new action fires immediately.
        let fired3 = fired.clone();
        task.open_when_running(move |_| {
            fired3.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        task.shutdown();
    }

    #[tokio::test]
    async fn shutdown_makes_the_handle_report_control_gone() {
        let task = SupervisedTask::new("t", long_lived(), Arc::new(ReadyProbe), fast_timings());
        task.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(task.start().await, Err(TaskError::ControlGone(_))));
    }
}
