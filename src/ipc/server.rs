use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use super::dispatch::{self, Command, NavRequest, Origin};
use super::pipeline::{LiveStatus, run_pipeline};
use super::runtime::socket_path;
use crate::config::{DaemonConfigState, Profile};
use crate::navigator::PageSnapshot;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut state = DaemonState::new()?;
    info!(
        "daemon: active profile '{}' for {}",
        state.cfg.active_name,
        whoami::username()
    );

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    let (nav_tx, nav_rx) = dispatch::queue();
    let (page_tx, page_rx) = mpsc::channel::<PageSnapshot>();

    // gesture thread
    let mut gesture_thread =
        GestureThread::start(state.cfg.profile.clone(), nav_tx.clone(), nav_rx, page_tx)?;

    let _watcher = watch_profiles(&state.cfg.profiles_dir, tx_req.clone())?;
    listen_for_signals(tx_req.clone())?;

    let mut relay = Relay::new(state.cfg.profile.relay.enabled);
    if let Some(id) = relay.session() {
        info!("relay: session {id}");
    }

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let ctx = ClientCtx {
                cfg: state.clone_shallow().cfg,
                socket: sock.clone(),
                session: relay.session().map(str::to_string),
                subscribers: relay.subscriber_count(),
                status: gesture_thread.status.clone(),
                tx_req: tx_req.clone(),
                nav_tx: nav_tx.clone(),
            };
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, ctx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        while let Ok(snap) = page_rx.try_recv() {
            relay.broadcast(snap);
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => {
                    if let Err(e) = state.cfg.reload() {
                        error!("reload failed: {e}");
                    } else {
                        gesture_thread.update_profile(state.cfg.profile.clone());
                        info!("profile reloaded");
                    }
                }
                IpcMsg::ProfileChanged(paths) => {
                    let active = state.cfg.active_path();
                    if paths.iter().any(|p| p == &active) {
                        debug!("active profile touched on disk");
                        if let Err(e) = state.cfg.reload() {
                            warn!("ignoring edited profile: {e}");
                        } else {
                            gesture_thread.update_profile(state.cfg.profile.clone());
                            info!("profile reloaded after edit");
                        }
                    }
                }
                IpcMsg::UseProfile(name) => {
                    if let Err(e) = state.cfg.set_active(&name) {
                        error!("use profile failed: {e}");
                    } else {
                        gesture_thread.update_profile(state.cfg.profile.clone());
                        info!("switched active profile to {}", state.cfg.active_name);
                    }
                }
                IpcMsg::SetRelay(enabled, reply) => {
                    let session = relay.set_enabled(enabled);
                    match &session {
                        Some(id) => info!("relay: session {id}"),
                        None => info!("relay: disabled"),
                    }
                    let _ = reply.send(session);
                }
                IpcMsg::Subscribe(given, stream) => {
                    let snap = gesture_thread.page();
                    relay.subscribe(&given, stream, snap);
                }
                IpcMsg::SetCamera(enabled) => {
                    gesture_thread.set_camera(enabled);
                    info!("camera {}", if enabled { "on" } else { "off" });
                }
                IpcMsg::Shutdown => {
                    gesture_thread.stop();
                    let _ = std::fs::remove_file(&sock);
                    info!("daemon: shut down");
                    return Ok(());
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

struct ClientCtx {
    cfg: DaemonConfigState,
    socket: PathBuf,
    session: Option<String>,
    subscribers: usize,
    status: Arc<Mutex<LiveStatus>>,
    tx_req: Sender<IpcMsg>,
    nav_tx: Sender<NavRequest>,
}

fn handle_client(mut stream: UnixStream, ctx: ClientCtx) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    if op == "subscribe" {
        let given = req.get("session").and_then(|v| v.as_str()).unwrap_or("");
        stream.set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT))?;
        // checked against the live session by the daemon loop
        ctx.tx_req
            .send(IpcMsg::Subscribe(given.to_string(), stream))
            .map_err(|_| anyhow!("daemon is shutting down"))?;
        return Ok(());
    }

    let resp = respond(&req, &ctx);
    writeln!(stream, "{resp}")?;
    Ok(())
}

fn respond(req: &serde_json::Value, ctx: &ClientCtx) -> serde_json::Value {
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");
    match op {
        "status" => {
            let live = ctx.status.lock().map(|s| s.clone()).ok();
            serde_json::json!({"ok": true, "data": {
                "active_profile": ctx.cfg.active_name,
                "socket": ctx.socket,
                "session": ctx.session,
                "relay_enabled": ctx.session.is_some(),
                "remote_connected": ctx.subscribers > 0,
                "live": live,
            }})
        }
        "command" => {
            let given = req.get("session").and_then(|v| v.as_str()).unwrap_or("");
            if !session_matches(ctx.session.as_deref(), given) {
                return failure("unknown or inactive session");
            }
            let action = req.get("action").and_then(|v| v.as_str()).unwrap_or("");
            match action.parse::<Command>() {
                Ok(command @ (Command::Next | Command::Prev)) => {
                    queue(ctx, NavRequest::Command {
                        origin: Origin::Remote,
                        command,
                    })
                }
                Ok(other) => failure(&format!("remote cannot send {other:?}")),
                Err(e) => failure(&e.to_string()),
            }
        }
        "page" => {
            if let Some(page) = req.get("page").and_then(|v| v.as_u64()) {
                return match u32::try_from(page) {
                    Ok(page) => queue(ctx, NavRequest::GoTo(page)),
                    Err(_) => failure(&format!("page out of range: {page}")),
                };
            }
            let action = req.get("action").and_then(|v| v.as_str()).unwrap_or("");
            match action.parse::<Command>() {
                Ok(command) => queue(ctx, NavRequest::Command {
                    origin: Origin::Manual,
                    command,
                }),
                Err(e) => failure(&e.to_string()),
            }
        }
        "deck" => match req.get("pages").and_then(|v| v.as_u64()) {
            Some(pages) => match u32::try_from(pages) {
                Ok(pages) => queue(ctx, NavRequest::LoadDeck(pages)),
                Err(_) => failure(&format!("page count out of range: {pages}")),
            },
            None => failure("deck needs a page count"),
        },
        "relay" => {
            let enabled = req.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
            let (tx, rx) = mpsc::channel();
            if ctx.tx_req.send(IpcMsg::SetRelay(enabled, tx)).is_err() {
                return failure("daemon is shutting down");
            }
            match rx.recv_timeout(REPLY_TIMEOUT) {
                Ok(session) => serde_json::json!({"ok": true, "data": {"session": session}}),
                Err(_) => failure("daemon did not answer"),
            }
        }
        "camera" => {
            let enabled = req.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
            if ctx.tx_req.send(IpcMsg::SetCamera(enabled)).is_err() {
                return failure("daemon is shutting down");
            }
            serde_json::json!({"ok": true, "data": {"camera": enabled}})
        }
        "reload" => {
            let _ = ctx.tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": ctx.cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let _ = ctx.tx_req.send(IpcMsg::UseProfile(name.to_string()));
            serde_json::json!({"ok": true, "data": {"active_profile": name}})
        }
        "list" => {
            let list = ctx.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": ctx.cfg.active_name}})
        }
        "doctor" => {
            let report = ctx.cfg.doctor_report(&ctx.socket);
            serde_json::json!({"ok": true, "data": report})
        }
        "shutdown" => {
            let _ = ctx.tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => failure(&format!("unknown op: {op}")),
    }
}

fn queue(ctx: &ClientCtx, req: NavRequest) -> serde_json::Value {
    match ctx.nav_tx.send(req) {
        Ok(()) => serde_json::json!({"ok": true, "data": "queued"}),
        Err(_) => failure("navigation is stopped"),
    }
}

fn failure(msg: &str) -> serde_json::Value {
    serde_json::json!({"ok": false, "error": msg})
}

fn session_matches(active: Option<&str>, given: &str) -> bool {
    active.is_some_and(|id| id.eq_ignore_ascii_case(given.trim()))
}

fn new_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..6].to_ascii_uppercase()
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RelayEvent {
    Sync(PageSnapshot),
}

/// Session-keyed fan-out of page snapshots to remote mirrors.
struct Relay {
    session: Option<String>,
    subscribers: Vec<UnixStream>,
}

impl Relay {
    fn new(enabled: bool) -> Self {
        Self {
            session: enabled.then(new_session_id),
            subscribers: Vec::new(),
        }
    }

    fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Enabling always mints a fresh session id. Remotes joined under the
    /// previous id are dropped either way.
    fn set_enabled(&mut self, enabled: bool) -> Option<String> {
        self.session = enabled.then(new_session_id);
        if !self.subscribers.is_empty() {
            info!("relay: dropping {} remote(s) of the old session", self.subscribers.len());
            self.subscribers.clear();
        }
        self.session.clone()
    }

    /// Attach `stream` if `given` names the current session.
    fn subscribe(&mut self, given: &str, mut stream: UnixStream, current: PageSnapshot) -> bool {
        if !session_matches(self.session(), given) {
            let _ = writeln!(stream, "{}", failure("unknown or inactive session"));
            return false;
        }
        if send_event(&mut stream, &RelayEvent::Sync(current)).is_err() {
            return false;
        }
        info!("relay: remote connected");
        self.subscribers.push(stream);
        true
    }

    fn broadcast(&mut self, snap: PageSnapshot) {
        let before = self.subscribers.len();
        let event = RelayEvent::Sync(snap);
        self.subscribers
            .retain_mut(|s| send_event(s, &event).is_ok());
        if self.subscribers.len() < before {
            info!("relay: {} remote(s) left", before - self.subscribers.len());
        }
    }
}

fn send_event(stream: &mut UnixStream, event: &RelayEvent) -> Result<()> {
    let line = serde_json::to_string(event)? + "\n";
    stream.write_all(line.as_bytes())?;
    Ok(())
}

struct DaemonState {
    pub cfg: DaemonConfigState,
}

impl DaemonState {
    fn new() -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        Ok(Self { cfg })
    }
    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
        }
    }
}

enum IpcMsg {
    Reload,
    ProfileChanged(Vec<PathBuf>),
    UseProfile(String),
    SetRelay(bool, Sender<Option<String>>),
    Subscribe(String, UnixStream),
    SetCamera(bool),
    Shutdown,
}

fn watch_profiles(dir: &Path, tx: Sender<IpcMsg>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) if ev.kind.is_modify() || ev.kind.is_create() => {
                let _ = tx.send(IpcMsg::ProfileChanged(ev.paths));
            }
            Ok(_) => {}
            Err(e) => warn!("profile watch error: {e}"),
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn listen_for_signals(tx: Sender<IpcMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: signal {sig}, shutting down");
            let _ = tx.send(IpcMsg::Shutdown);
        }
    });
    Ok(())
}

struct GestureThread {
    profile: Arc<Mutex<Profile>>,
    status: Arc<Mutex<LiveStatus>>,
    running: Arc<AtomicBool>,
    camera: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl GestureThread {
    fn start(
        profile: Profile,
        nav_tx: Sender<NavRequest>,
        nav_rx: mpsc::Receiver<NavRequest>,
        page_tx: Sender<PageSnapshot>,
    ) -> Result<Self> {
        let status = Arc::new(Mutex::new(LiveStatus::new(profile.deck.total_pages)));
        let profile_arc = Arc::new(Mutex::new(profile));
        let running = Arc::new(AtomicBool::new(true));
        let camera = Arc::new(AtomicBool::new(true));

        let prof_clone = profile_arc.clone();
        let status_clone = status.clone();
        let running_clone = running.clone();
        let camera_clone = camera.clone();
        let handle = thread::Builder::new()
            .name("gesture".into())
            .spawn(move || {
                if let Err(e) = run_pipeline(
                    prof_clone,
                    nav_tx,
                    nav_rx,
                    page_tx,
                    status_clone,
                    running_clone,
                    camera_clone,
                ) {
                    error!("gesture pipeline failed: {e}");
                }
            })?;
        Ok(Self {
            profile: profile_arc,
            status,
            running,
            camera,
            handle: Some(handle),
        })
    }

    fn update_profile(&mut self, new_profile: Profile) {
        if let Ok(mut p) = self.profile.lock() {
            *p = new_profile;
        }
    }

    /// Picked up by the pipeline on its next loop turn.
    fn set_camera(&self, enabled: bool) {
        self.camera.store(enabled, Ordering::SeqCst);
    }

    fn page(&self) -> PageSnapshot {
        match self.status.lock() {
            Ok(s) => s.page,
            Err(poisoned) => poisoned.into_inner().page,
        }
    }

    /// Returns once the pipeline has finished its last tick.
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
