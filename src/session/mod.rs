//! The shared co-browsing session.
//!
//! One [`Session`] owns the control queue, the navigation model, the single
//! shared page, the command worker and the frame streamer. The transport layer
//! only talks to the session through the methods on [`Session`].

mod broadcaster;
mod input;
mod navigation;
mod page;
mod scheduler;
mod serializer;
mod streamer;

pub use broadcaster::{Outbound, SessionStateBroadcaster};
pub use input::ClientViewport;
pub use navigation::NavigationState;
pub use scheduler::{ControlScheduler, ParticipantId, QueueChange};
pub use serializer::{ClientCommand, CommandSerializer, KeyInput, PointerInput};
pub use streamer::FrameStreamer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{
    BrowserEngine, EngineError, EngineEvent, PageEvent, PageHandle, PageId, Viewport, BLANK_URL,
};
use crate::models::SendMessage;
use page::{SharedPage, Subscription};

const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("refusing to navigate to own address: {0}")]
    SelfNavigation(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed capture resolution.
    pub viewport: Viewport,
    /// Start page, also loaded for an empty address input.
    pub home_url: String,
    pub navigate_home_on_start: bool,
    pub search_url: String,
    /// host[:port] the session itself is served from.
    pub public_host: String,
    pub user_agent: Option<String>,
    pub frame_interval: Duration,
    pub frame_quality: u8,
    pub screenshot_timeout: Duration,
    pub navigation_timeout: Duration,
    pub page_recovery_delay: Duration,
    pub stream_restart_cooldown: Duration,
    pub recheck_control_on_execute: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport {
                width: 1280,
                height: 720,
            },
            home_url: "https://www.google.com".to_string(),
            navigate_home_on_start: true,
            search_url: "https://www.google.com/search".to_string(),
            public_host: "localhost:3000".to_string(),
            user_agent: None,
            frame_interval: Duration::from_millis(100),
            frame_quality: 60,
            screenshot_timeout: Duration::from_millis(2000),
            navigation_timeout: Duration::from_millis(30_000),
            page_recovery_delay: Duration::from_millis(1000),
            stream_restart_cooldown: Duration::from_millis(1000),
            recheck_control_on_execute: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CommandStats {
    pub executed: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

/// Point-in-time view of the observable session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub ordered_ids: Vec<ParticipantId>,
    pub holder: Option<ParticipantId>,
    pub current_url: Option<String>,
    pub history: Vec<String>,
    pub forward: Vec<String>,
    pub navigating: bool,
    pub streaming: bool,
}

#[derive(Debug, Clone)]
pub struct SessionDiagnostics {
    pub participants: usize,
    pub connections: usize,
    pub history_depth: usize,
    pub forward_depth: usize,
    pub frames_sent: u64,
    pub capture_failures: u64,
    pub commands_executed: u64,
    pub commands_failed: u64,
    pub commands_dropped: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// State shared by the worker, the streamer and the page listeners.
pub(crate) struct SessionCore {
    pub config: SessionConfig,
    engine: Arc<dyn BrowserEngine>,
    pub scheduler: Mutex<ControlScheduler>,
    pub navigation: Mutex<NavigationState>,
    viewports: Mutex<HashMap<ParticipantId, ClientViewport>>,
    pub page: SharedPage,
    pub broadcaster: SessionStateBroadcaster,
    pub streamer: FrameStreamer,
    pub stats: CommandStats,
    started_at: DateTime<Utc>,
}

impl SessionCore {
    pub fn new(config: SessionConfig, engine: Arc<dyn BrowserEngine>) -> Arc<Self> {
        Arc::new(Self {
            config,
            engine,
            scheduler: Mutex::new(ControlScheduler::new()),
            navigation: Mutex::new(NavigationState::new()),
            viewports: Mutex::new(HashMap::new()),
            page: SharedPage::new(),
            broadcaster: SessionStateBroadcaster::new(BROADCAST_CAPACITY),
            streamer: FrameStreamer::new(),
            stats: CommandStats::default(),
            started_at: Utc::now(),
        })
    }

    pub fn is_holder(&self, participant: &ParticipantId) -> bool {
        self.scheduler.lock().is_holder(participant)
    }

    /// Make `page` the shared page: foreground it, apply the capture viewport,
    /// move the event listener over and close whatever page it replaces.
    pub async fn adopt_page(self: &Arc<Self>, page: Arc<dyn PageHandle>) {
        let id = page.id();
        if page.is_closed() {
            debug!("Not adopting page {}: already closed", id);
            return;
        }
        if self.page.is_current(&id) {
            return;
        }
        info!("Adopting page {}", id);

        if let Err(e) = page.bring_to_front().await {
            warn!("Failed to bring page {} to front: {}", id, e);
        }
        if let Err(e) = page.set_viewport(self.config.viewport).await {
            warn!("Failed to set viewport on page {}: {}", id, e);
        }
        if let Some(user_agent) = &self.config.user_agent {
            if let Err(e) = page.set_user_agent(user_agent).await {
                warn!("Failed to set user agent on page {}: {}", id, e);
            }
        }

        let listener = self.spawn_page_listener(&page);
        if let Some(previous) = self.page.replace(page.clone(), listener) {
            if !previous.is_closed() {
                debug!("Closing replaced page {}", previous.id());
                if let Err(e) = previous.close().await {
                    warn!("Failed to close page {}: {}", previous.id(), e);
                }
            }
        }
        // An adopted page arrives already loaded, so its address is a visit.
        if let Ok(url) = page.url().await {
            self.navigation.lock().record_visit(&url);
        }
        self.sync_url(&page).await;
    }

    fn spawn_page_listener(self: &Arc<Self>, page: &Arc<dyn PageHandle>) -> Subscription {
        let mut events = page.subscribe();
        let core = Arc::downgrade(self);
        let page = page.clone();
        Subscription::new(tokio::spawn(async move {
            let id = page.id();
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Page {} listener skipped {} events", id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(core) = core.upgrade() else { break };
                match event {
                    PageEvent::FrameNavigated(url) => core.on_frame_navigated(&page, &url).await,
                    PageEvent::Closed => {
                        core.on_page_closed(&id);
                        break;
                    }
                }
            }
        }))
    }

    /// Page-initiated main-frame navigations drive history.
    ///
    /// Commanded navigations land their own history entry, so events seen
    /// while one is in flight are ignored, and an event only counts if the
    /// page is still at that address once no navigation has opened since.
    async fn on_frame_navigated(&self, page: &Arc<dyn PageHandle>, url: &str) {
        if url == BLANK_URL || !self.page.is_current(&page.id()) {
            return;
        }
        let epoch = {
            let navigation = self.navigation.lock();
            if navigation.is_navigating() || navigation.current_url() == Some(url) {
                return;
            }
            navigation.epoch()
        };
        match page.url().await {
            Ok(actual) if actual == url => {}
            Ok(actual) => {
                debug!("Dropping stale navigation to {} (page is at {})", url, actual);
                return;
            }
            Err(e) => {
                debug!("Could not confirm navigation to {}: {}", url, e);
                return;
            }
        }
        {
            let mut navigation = self.navigation.lock();
            if navigation.epoch() != epoch {
                return;
            }
            if navigation.record_visit(url) {
                debug!("History now ends at {}", url);
            }
        }
        self.broadcaster.loading(true, None);
        self.broadcaster.url(url);
    }

    fn on_page_closed(self: &Arc<Self>, id: &PageId) {
        if !self.page.is_current(id) {
            return;
        }
        warn!("Shared page {} closed", id);
        self.streamer.halt_and_restart(self);
    }

    /// Adopt any other open page. Returns false when the engine has none.
    pub async fn recover_page(self: &Arc<Self>) -> bool {
        let pages = match self.engine.pages().await {
            Ok(pages) => pages,
            Err(e) => {
                warn!("Failed to list pages for recovery: {}", e);
                return false;
            }
        };
        match pages.into_iter().find(|page| !page.is_closed()) {
            Some(page) => {
                info!("Recovering onto page {}", page.id());
                self.adopt_page(page).await;
                self.page.live().is_some()
            }
            None => {
                debug!("No open page to recover onto");
                false
            }
        }
    }

    /// Tell everyone where the page is. History is left alone.
    pub async fn sync_url(&self, page: &Arc<dyn PageHandle>) {
        let url = match page.url().await {
            Ok(url) => {
                self.navigation.lock().set_current_url(&url);
                Some(url)
            }
            Err(e) => {
                debug!("Could not read page url: {}", e);
                self.navigation.lock().current_url().map(str::to_string)
            }
        };
        if let Some(url) = url {
            self.broadcaster.url(&url);
        }
    }
}

pub struct Session {
    core: Arc<SessionCore>,
    commands: CommandSerializer,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Adopt the engine's first page and bring up the worker and the streamer.
    pub async fn start(
        config: SessionConfig,
        engine: Arc<dyn BrowserEngine>,
    ) -> Result<Arc<Self>, SessionError> {
        let core = SessionCore::new(config, engine.clone());

        let first = engine
            .pages()
            .await?
            .into_iter()
            .next()
            .ok_or(EngineError::NoPage)?;
        core.adopt_page(first).await;

        let (commands, worker) = CommandSerializer::spawn(core.clone());
        let targets = spawn_target_listener(engine.subscribe(), commands.clone());

        if core.config.navigate_home_on_start {
            commands.submit_system(ClientCommand::Navigate(core.config.home_url.clone()));
        }
        core.streamer.start(&core);
        info!("Session started");

        Ok(Arc::new(Self {
            core,
            commands,
            tasks: Mutex::new(vec![worker, targets]),
        }))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    pub fn join(&self, participant: ParticipantId) {
        self.mutate_queue(|queue| queue.join(participant));
    }

    pub fn leave(&self, participant: &ParticipantId) {
        self.core.viewports.lock().remove(participant);
        self.mutate_queue(|queue| queue.leave(participant));
    }

    /// Hand control to the next participant. Only the holder may release.
    pub fn release_control(&self, participant: &ParticipantId) -> bool {
        let change = self.mutate_queue(|queue| {
            if !queue.is_holder(participant) {
                return QueueChange {
                    changed: false,
                    previous_holder: queue.current_holder().cloned(),
                    holder: queue.current_holder().cloned(),
                };
            }
            queue.advance()
        });
        if !change.changed {
            debug!("Release from {} ignored", participant);
        }
        change.changed
    }

    /// Apply `f` to the queue. The broadcast and any handoff release are
    /// issued before the scheduler lock drops.
    fn mutate_queue(&self, f: impl FnOnce(&mut ControlScheduler) -> QueueChange) -> QueueChange {
        let mut scheduler = self.core.scheduler.lock();
        let change = f(&mut scheduler);
        if change.changed {
            self.core.broadcaster.queue(&scheduler.ordered());
        }
        if change.holder_changed() {
            debug!(
                "Control moved from {:?} to {:?}",
                change.previous_holder.as_ref().map(ToString::to_string),
                change.holder.as_ref().map(ToString::to_string)
            );
            self.commands.release_input();
        }
        change
    }

    /// Remember the size `participant` renders the stream at. Unusable sizes are ignored.
    pub fn set_client_viewport(&self, participant: &ParticipantId, width: f64, height: f64) -> bool {
        match ClientViewport::new(width, height) {
            Some(viewport) => {
                self.core
                    .viewports
                    .lock()
                    .insert(participant.clone(), viewport);
                true
            }
            None => {
                debug!("Ignoring screen size {}x{} from {}", width, height, participant);
                false
            }
        }
    }

    /// Queue `command` if `participant` holds control; silently drop it otherwise.
    pub fn submit(&self, participant: &ParticipantId, command: ClientCommand) -> bool {
        let viewport = self
            .core
            .viewports
            .lock()
            .get(participant)
            .copied()
            .unwrap_or_else(|| ClientViewport::from(self.core.config.viewport));

        // Holding the lock across the enqueue keeps a concurrent handoff from
        // slipping between the check and the send.
        let scheduler = self.core.scheduler.lock();
        if !scheduler.is_holder(participant) {
            debug!(
                "Dropping {} from {}: not the control holder",
                command.label(),
                participant
            );
            self.core.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let accepted = self.commands.submit(participant.clone(), viewport, command);
        drop(scheduler);
        accepted
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.core.broadcaster.subscribe()
    }

    /// What a freshly connected participant needs before the next broadcast.
    pub fn greeting(&self, participant: &ParticipantId) -> Vec<SendMessage> {
        let mut messages = vec![
            SendMessage::Connected(crate::models::ConnectedMessage {
                id: participant.clone(),
            }),
            broadcaster::queue_message(&self.core.scheduler.lock().ordered()),
        ];
        if let Some(url) = self.core.navigation.lock().current_url() {
            if url != BLANK_URL {
                messages.push(broadcaster::url_message(url));
            }
        }
        messages
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (ordered_ids, holder) = {
            let scheduler = self.core.scheduler.lock();
            (scheduler.ordered(), scheduler.current_holder().cloned())
        };
        let navigation = self.core.navigation.lock();
        SessionSnapshot {
            ordered_ids,
            holder,
            current_url: navigation.current_url().map(str::to_string),
            history: navigation.history().to_vec(),
            forward: navigation.forward().to_vec(),
            navigating: navigation.is_navigating(),
            streaming: self.core.streamer.is_running(),
        }
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let (history_depth, forward_depth) = {
            let navigation = self.core.navigation.lock();
            (navigation.history().len(), navigation.forward().len())
        };
        let stats = &self.core.stats;
        SessionDiagnostics {
            participants: self.core.scheduler.lock().len(),
            connections: self.core.broadcaster.receiver_count(),
            history_depth,
            forward_depth,
            frames_sent: self.core.broadcaster.frames_sent(),
            capture_failures: self.core.streamer.capture_failures(),
            commands_executed: stats.executed.load(Ordering::Relaxed),
            commands_failed: stats.failed.load(Ordering::Relaxed),
            commands_dropped: stats.dropped.load(Ordering::Relaxed),
            started_at: self.core.started_at,
            uptime_seconds: (Utc::now() - self.core.started_at).num_seconds(),
        }
    }

    /// True while a live page is attached.
    pub fn is_ready(&self) -> bool {
        self.core.page.live().is_some()
    }

    /// Wait for every command queued so far.
    pub async fn flush(&self) {
        self.commands.flush().await;
    }

    pub async fn shutdown(&self) {
        info!("Shutting down session");
        self.core.streamer.stop();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.core.page.clear();
        if let Err(e) = self.core.engine.close().await {
            warn!("Failed to close browser: {}", e);
        }
    }
}

fn spawn_target_listener(
    mut events: broadcast::Receiver<EngineEvent>,
    commands: CommandSerializer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::TargetCreated(page)) => {
                    info!("New page {} opened", page.id());
                    if !commands.adopt_page(page) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} browser events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
