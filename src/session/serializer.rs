//! Strictly ordered execution of every page-affecting command.
//!
//! Commands are pushed onto an unbounded channel read by exactly one worker
//! task, so at most one command touches the page at a time and commands run in
//! submission order. A failing command is logged and the worker moves on.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::input::{scale_point, ClientViewport, InputState};
use super::navigation::{is_self_target, normalize_url, Landing, NavigationGate};
use super::{ParticipantId, SessionCore, SessionError};
use crate::engine::{EngineError, Modifiers, PageHandle, PointerButton};
use crate::models::{KeyAction, MouseAction};

#[derive(Debug, Clone, PartialEq)]
pub struct PointerInput {
    pub action: MouseAction,
    pub x: f64,
    pub y: f64,
    pub button: PointerButton,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyInput {
    pub action: KeyAction,
    pub key: String,
    pub modifiers: Modifiers,
    pub is_char: Option<bool>,
    pub selector: Option<String>,
}

impl KeyInput {
    /// Printable input is inserted as text rather than pressed as a key.
    fn is_text(&self) -> bool {
        self.is_char.unwrap_or_else(|| self.key.chars().count() == 1)
    }

    fn is_shortcut(&self) -> bool {
        self.modifiers.ctrl || self.modifiers.meta
    }

    fn is_copy(&self) -> bool {
        self.is_shortcut() && self.key.eq_ignore_ascii_case("c")
    }
}

/// Commands a participant may issue while holding control.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Navigate(String),
    Back,
    Forward,
    Refresh,
    Pointer(PointerInput),
    Key(KeyInput),
    Wheel { delta_x: f64, delta_y: f64 },
}

impl ClientCommand {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            ClientCommand::Navigate(_) => "navigate",
            ClientCommand::Back => "back",
            ClientCommand::Forward => "forward",
            ClientCommand::Refresh => "refresh",
            ClientCommand::Pointer(_) => "pointer",
            ClientCommand::Key(_) => "key",
            ClientCommand::Wheel { .. } => "wheel",
        }
    }
}

enum Command {
    Client {
        issuer: ParticipantId,
        viewport: ClientViewport,
        command: ClientCommand,
    },
    /// Issued by the session itself; never subject to the holder check.
    System(ClientCommand),
    ReleaseInput,
    AdoptPage(Arc<dyn PageHandle>),
    Barrier(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct CommandSerializer {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSerializer {
    pub(crate) fn spawn(core: Arc<SessionCore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = CommandWorker {
            core,
            input: InputState::new(),
        };
        let task = tokio::spawn(worker.run(rx));
        (Self { tx }, task)
    }

    fn enqueue(&self, command: Command) -> bool {
        if self.tx.send(command).is_err() {
            warn!("Command worker has stopped; command discarded");
            return false;
        }
        true
    }

    pub fn submit(
        &self,
        issuer: ParticipantId,
        viewport: ClientViewport,
        command: ClientCommand,
    ) -> bool {
        self.enqueue(Command::Client {
            issuer,
            viewport,
            command,
        })
    }

    pub fn submit_system(&self, command: ClientCommand) -> bool {
        self.enqueue(Command::System(command))
    }

    /// Force-release every held key and button.
    pub fn release_input(&self) -> bool {
        self.enqueue(Command::ReleaseInput)
    }

    pub fn adopt_page(&self, page: Arc<dyn PageHandle>) -> bool {
        self.enqueue(Command::AdoptPage(page))
    }

    /// Resolves once every command enqueued before this call has finished.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.enqueue(Command::Barrier(tx)) {
            let _ = rx.await;
        }
    }
}

enum NavStep<'a> {
    Goto(&'a str, Landing),
    Reload,
}

struct CommandWorker {
    core: Arc<SessionCore>,
    input: InputState,
}

impl CommandWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!("Command worker started");
        while let Some(command) = rx.recv().await {
            self.execute(command).await;
        }
        debug!("Command worker stopped");
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Barrier(done) => {
                let _ = done.send(());
            }
            Command::ReleaseInput => self.release_held().await,
            Command::AdoptPage(page) => {
                // Whatever was held belonged to the page being replaced.
                self.input.take_held();
                self.core.adopt_page(page).await;
            }
            Command::System(command) => {
                let viewport = ClientViewport::from(self.core.config.viewport);
                self.run_counted(command, viewport).await;
            }
            Command::Client {
                issuer,
                viewport,
                command,
            } => {
                if self.core.config.recheck_control_on_execute && !self.core.is_holder(&issuer) {
                    debug!(
                        "Dropping {} from {}: control changed hands while queued",
                        command.label(),
                        issuer
                    );
                    self.core.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                self.run_counted(command, viewport).await;
            }
        }
    }

    async fn run_counted(&mut self, command: ClientCommand, viewport: ClientViewport) {
        let label = command.label();
        match self.run_client(command, viewport).await {
            Ok(()) => {
                self.core.stats.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.core.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Command {} failed: {}", label, e);
            }
        }
    }

    fn page(&self) -> Result<Arc<dyn PageHandle>, SessionError> {
        self.core
            .page
            .live()
            .ok_or(SessionError::Engine(EngineError::PageClosed))
    }

    async fn run_client(
        &mut self,
        command: ClientCommand,
        viewport: ClientViewport,
    ) -> Result<(), SessionError> {
        match command {
            ClientCommand::Navigate(input) => self.navigate(&input).await,
            ClientCommand::Back => {
                let page = self.page()?;
                let target = self.core.navigation.lock().begin_back();
                match target {
                    Some(url) => self.navigation_step(&page, "Going back…", NavStep::Goto(&url, Landing::Back)).await,
                    None => {
                        debug!("Back ignored: history too shallow");
                        Ok(())
                    }
                }
            }
            ClientCommand::Forward => {
                let page = self.page()?;
                let target = self.core.navigation.lock().begin_forward();
                match target {
                    Some(url) => {
                        self.navigation_step(&page, "Going forward…", NavStep::Goto(&url, Landing::Forward))
                            .await
                    }
                    None => {
                        debug!("Forward ignored: nothing ahead");
                        Ok(())
                    }
                }
            }
            ClientCommand::Refresh => {
                let page = self.page()?;
                self.core.navigation.lock().begin_refresh();
                self.navigation_step(&page, "Refreshing…", NavStep::Reload).await
            }
            ClientCommand::Pointer(pointer) => self.pointer(pointer, viewport).await,
            ClientCommand::Key(key) => self.key(key).await,
            ClientCommand::Wheel { delta_x, delta_y } => {
                let page = self.page()?;
                page.mouse_wheel(delta_x, delta_y).await?;
                Ok(())
            }
        }
    }

    async fn navigate(&mut self, input: &str) -> Result<(), SessionError> {
        let config = &self.core.config;
        let url = normalize_url(input, &config.home_url, &config.search_url)?;
        if is_self_target(&url, &config.public_host) {
            info!("Navigation to own address blocked: {}", url);
            self.core
                .broadcaster
                .loading(false, Some("Navigation blocked: own server URL"));
            return Err(SessionError::SelfNavigation(url.to_string()));
        }

        let page = self.page()?;
        self.core.navigation.lock().begin_navigate();
        self.navigation_step(&page, "Navigating…", NavStep::Goto(url.as_str(), Landing::Fresh))
            .await
    }

    /// Shared tail of every navigation: the in-flight flag is already set and
    /// is cleared here however the engine call ends.
    async fn navigation_step(
        &mut self,
        page: &Arc<dyn PageHandle>,
        message: &str,
        step: NavStep<'_>,
    ) -> Result<(), SessionError> {
        let core = self.core.clone();
        let gate = NavigationGate::opened(&core.navigation);

        self.release_held().await;
        core.broadcaster.loading(true, Some(message));

        let timeout = core.config.navigation_timeout;
        let (result, landing) = match step {
            NavStep::Goto(url, landing) => {
                debug!("Loading {}", url);
                (page.goto(url, timeout).await, landing)
            }
            NavStep::Reload => (page.reload(timeout).await, Landing::Reload),
        };

        // History only moves for a navigation that landed, and moves before
        // the gate reopens the page to observed transitions.
        if result.is_ok() {
            match page.url().await {
                Ok(url) => core.navigation.lock().land(landing, &url),
                Err(e) => debug!("Could not read landed url: {}", e),
            }
        }
        drop(gate);
        core.broadcaster.loading(false, None);
        core.sync_url(page).await;
        result.map_err(SessionError::from)
    }

    async fn pointer(
        &mut self,
        pointer: PointerInput,
        viewport: ClientViewport,
    ) -> Result<(), SessionError> {
        let page = self.page()?;
        let (x, y) = scale_point(pointer.x, pointer.y, viewport, self.core.config.viewport);
        page.mouse_move(x, y).await?;

        let button = pointer.button;
        match pointer.action {
            MouseAction::Move => {}
            MouseAction::Down => {
                if !self.input.press_button(button) {
                    debug!("Ignoring repeated {:?} press", button);
                    return Ok(());
                }
                if let Err(e) = page.mouse_down(button).await {
                    self.input.release_button(button);
                    return Err(e.into());
                }
            }
            MouseAction::Up => {
                if self.input.release_button(button) {
                    page.mouse_up(button).await?;
                }
            }
        }
        Ok(())
    }

    async fn key(&mut self, key: KeyInput) -> Result<(), SessionError> {
        let page = self.page()?;
        if let Err(e) = page.focus(key.selector.as_deref()).await {
            debug!("Focus before key input failed: {}", e);
        }

        let text = key.is_text();
        match key.action {
            KeyAction::Type => page.insert_text(&key.key).await?,
            KeyAction::Down if key.is_copy() => self.copy_selection(&page).await?,
            // Multi-character text is a paste and goes in as-is, modifiers or not.
            KeyAction::Down if text && (!key.is_shortcut() || key.key.chars().count() > 1) => {
                page.insert_text(&key.key).await?
            }
            KeyAction::Down => {
                page.key_down(&key.key, key.modifiers).await?;
                self.input.press_key(&key.key);
            }
            KeyAction::Up => {
                if self.input.release_key(&key.key) || !text {
                    page.key_up(&key.key, key.modifiers).await?;
                }
            }
        }
        Ok(())
    }

    async fn copy_selection(&self, page: &Arc<dyn PageHandle>) -> Result<(), SessionError> {
        let selected = page.selected_text().await?;
        if selected.is_empty() {
            debug!("Copy shortcut with empty selection");
        } else {
            debug!("Copying {} characters of selection", selected.chars().count());
            self.core.broadcaster.clipboard(&selected);
        }
        Ok(())
    }

    /// Best effort: a release that fails is logged and the rest still go out.
    async fn release_held(&mut self) {
        let held = self.input.take_held();
        if held.is_empty() {
            return;
        }
        let Some(page) = self.core.page.live() else {
            return;
        };
        debug!(
            "Releasing {} keys and {} buttons",
            held.keys.len(),
            held.buttons.len()
        );
        for key in &held.keys {
            if let Err(e) = page.key_up(key, Modifiers::default()).await {
                debug!("Releasing key {} failed: {}", key, e);
            }
        }
        for button in held.buttons {
            if let Err(e) = page.mouse_up(button).await {
                debug!("Releasing {:?} failed: {}", button, e);
            }
        }
    }
}
