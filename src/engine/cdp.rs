//! Chromium engine driven over the DevTools protocol.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, BringToFrontParams, CaptureScreenshotFormat,
    CaptureScreenshotParams, EventFrameNavigated,
};
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCreated, EventTargetDestroyed};
use chromiumoxide::page::Page as CdpPage;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    BrowserEngine, EngineError, EngineEvent, EngineResult, Modifiers, PageEvent, PageHandle,
    PageId, PointerButton, Viewport, BLANK_URL,
};

const LAUNCH_ARGS: [&str; 4] = [
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-infobars",
    "--lang=en-US",
];

const MASK_AUTOMATION_SCRIPT: &str = r#"
    Object.defineProperty(navigator, "webdriver", { get: () => false });
    Object.defineProperty(navigator, "plugins", { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, "languages", { get: () => ["en-US", "en"] });
"#;

const ENSURE_FOCUS_SCRIPT: &str = r#"(() => {
    const active = document.activeElement;
    if (!active || active === document.body) document.body && document.body.focus();
    return true;
})()"#;

const SELECTION_SCRIPT: &str =
    "(() => { const s = window.getSelection && window.getSelection(); return s ? s.toString() : ''; })()";

fn protocol<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Protocol(e.to_string())
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub viewport: Viewport,
    pub request_timeout: Duration,
}

pub struct CdpEngine {
    browser: AsyncMutex<Browser>,
    pages: Mutex<HashMap<String, Arc<CdpPageHandle>>>,
    events: broadcast::Sender<EngineEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpEngine {
    pub async fn launch(options: LaunchOptions) -> EngineResult<Arc<Self>> {
        info!("Launching browser (headless: {})", options.headless);

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(options.request_timeout)
            .window_size(options.viewport.width, options.viewport.height)
            .args(LAUNCH_ARGS);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(EngineError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;

        // The handler drives the DevTools connection and must be polled for the browser's lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("DevTools handler error: {}", e);
                }
            }
            debug!("DevTools handler finished");
        });

        let (events, _) = broadcast::channel(16);
        let engine = Arc::new(Self {
            browser: AsyncMutex::new(browser),
            pages: Mutex::new(HashMap::new()),
            events,
            tasks: Mutex::new(vec![handler_task]),
        });

        let created = tokio::spawn(watch_created_targets(Arc::downgrade(&engine)));
        let destroyed = tokio::spawn(watch_destroyed_targets(Arc::downgrade(&engine)));
        engine.tasks.lock().extend([created, destroyed]);

        Ok(engine)
    }

    async fn wrap(&self, page: CdpPage) -> Arc<CdpPageHandle> {
        let key = page.target_id().inner().clone();
        if let Some(existing) = self.pages.lock().get(&key) {
            return existing.clone();
        }
        let handle = CdpPageHandle::new(page).await;
        self.pages
            .lock()
            .entry(key)
            .or_insert_with(|| handle.clone())
            .clone()
    }

    /// Find the page for `target_id`, retrying while the target finishes attaching.
    async fn resolve_page(&self, target_id: &str) -> EngineResult<Arc<CdpPageHandle>> {
        for _ in 0..5 {
            if let Some(existing) = self.pages.lock().get(target_id) {
                return Ok(existing.clone());
            }
            let pages = self.browser.lock().await.pages().await.map_err(protocol)?;
            if let Some(page) = pages
                .into_iter()
                .find(|p| p.target_id().inner() == target_id)
            {
                return Ok(self.wrap(page).await);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(EngineError::NoPage)
    }

    fn mark_destroyed(&self, target_id: &str) {
        if let Some(page) = self.pages.lock().remove(target_id) {
            page.mark_closed();
        }
    }
}

async fn watch_created_targets(engine: Weak<CdpEngine>) {
    let mut created = {
        let Some(strong) = engine.upgrade() else { return };
        let browser = strong.browser.lock().await;
        match browser.event_listener::<EventTargetCreated>().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot listen for new targets: {}", e);
                return;
            }
        }
    };

    while let Some(event) = created.next().await {
        if event.target_info.r#type != "page" {
            continue;
        }
        let Some(engine) = engine.upgrade() else { break };
        let target_id = event.target_info.target_id.inner().clone();
        match engine.resolve_page(&target_id).await {
            Ok(page) => {
                debug!("New page target {}", target_id);
                let _ = engine.events.send(EngineEvent::TargetCreated(page));
            }
            Err(e) => warn!("New page target {} could not be attached: {}", target_id, e),
        }
    }
}

async fn watch_destroyed_targets(engine: Weak<CdpEngine>) {
    let mut destroyed = {
        let Some(strong) = engine.upgrade() else { return };
        let browser = strong.browser.lock().await;
        match browser.event_listener::<EventTargetDestroyed>().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot listen for closed targets: {}", e);
                return;
            }
        }
    };

    while let Some(event) = destroyed.next().await {
        let Some(engine) = engine.upgrade() else { break };
        engine.mark_destroyed(event.target_id.inner());
    }
}

#[async_trait]
impl BrowserEngine for CdpEngine {
    async fn pages(&self) -> EngineResult<Vec<Arc<dyn PageHandle>>> {
        let mut pages = self.browser.lock().await.pages().await.map_err(protocol)?;
        if pages.is_empty() {
            let page = self
                .browser
                .lock()
                .await
                .new_page(BLANK_URL)
                .await
                .map_err(protocol)?;
            pages.push(page);
        }

        let mut handles: Vec<Arc<dyn PageHandle>> = Vec::with_capacity(pages.len());
        for page in pages {
            let handle = self.wrap(page).await;
            if !handle.is_closed() {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> EngineResult<()> {
        info!("Closing browser");
        let result = self.browser.lock().await.close().await.map(|_| ()).map_err(protocol);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for (_, page) in self.pages.lock().drain() {
            page.mark_closed();
        }
        result
    }
}

pub struct CdpPageHandle {
    id: PageId,
    page: CdpPage,
    closed: AtomicBool,
    events: broadcast::Sender<PageEvent>,
    // Last pointer position and held button; wheel and drag events are dispatched from here.
    pointer: Mutex<PointerState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct PointerState {
    x: f64,
    y: f64,
    held: Option<PointerButton>,
}

impl CdpPageHandle {
    async fn new(page: CdpPage) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let handle = Arc::new(Self {
            id: PageId(page.target_id().inner().clone()),
            page,
            closed: AtomicBool::new(false),
            events,
            pointer: Mutex::new(PointerState::default()),
            listener: Mutex::new(None),
        });

        match handle.page.event_listener::<EventFrameNavigated>().await {
            Ok(mut navigations) => {
                let tx = handle.events.clone();
                let task = tokio::spawn(async move {
                    while let Some(event) = navigations.next().await {
                        // Child frames navigate too; only the main document counts.
                        if event.frame.parent_id.is_none() {
                            let _ = tx.send(PageEvent::FrameNavigated(event.frame.url.clone()));
                        }
                    }
                });
                *handle.listener.lock() = Some(task);
            }
            Err(e) => warn!("Cannot listen for navigations on page {}: {}", handle.id, e),
        }

        handle
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Page {} closed", self.id);
            if let Some(task) = self.listener.lock().take() {
                task.abort();
            }
            let _ = self.events.send(PageEvent::Closed);
        }
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            Err(EngineError::PageClosed)
        } else {
            Ok(())
        }
    }

    async fn dispatch_mouse(&self, params: DispatchMouseEventParams) -> EngineResult<()> {
        self.ensure_open()?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn dispatch_key(
        &self,
        kind: DispatchKeyEventType,
        key: &str,
        modifiers: Modifiers,
    ) -> EngineResult<()> {
        self.ensure_open()?;
        let (code, text, virtual_key) = key_definition(key);
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.to_string())
            .code(code.to_string())
            .modifiers(modifiers.bits());
        if let Some(vk) = virtual_key {
            builder = builder
                .windows_virtual_key_code(vk)
                .native_virtual_key_code(vk);
        }
        if let (DispatchKeyEventType::KeyDown, Some(text)) = (kind, text) {
            builder = builder.text(text.to_string());
        }
        let params = builder.build().map_err(EngineError::Protocol)?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }
}

fn cdp_button(button: PointerButton) -> MouseButton {
    match button {
        PointerButton::Left => MouseButton::Left,
        PointerButton::Right => MouseButton::Right,
        PointerButton::Middle => MouseButton::Middle,
    }
}

fn buttons_mask(held: Option<PointerButton>) -> i64 {
    match held {
        None => 0,
        Some(PointerButton::Left) => 1,
        Some(PointerButton::Right) => 2,
        Some(PointerButton::Middle) => 4,
    }
}

/// DOM `code`, produced text and virtual key code for keys that need them.
fn key_definition(key: &str) -> (&str, Option<&'static str>, Option<i64>) {
    match key {
        "Enter" => ("Enter", Some("\r"), Some(13)),
        "Tab" => ("Tab", Some("\t"), Some(9)),
        "Escape" => ("Escape", None, Some(27)),
        "Backspace" => ("Backspace", None, Some(8)),
        "Delete" => ("Delete", None, Some(46)),
        "ArrowUp" => ("ArrowUp", None, Some(38)),
        "ArrowDown" => ("ArrowDown", None, Some(40)),
        "ArrowLeft" => ("ArrowLeft", None, Some(37)),
        "ArrowRight" => ("ArrowRight", None, Some(39)),
        "Home" => ("Home", None, Some(36)),
        "End" => ("End", None, Some(35)),
        "PageUp" => ("PageUp", None, Some(33)),
        "PageDown" => ("PageDown", None, Some(34)),
        "Shift" => ("ShiftLeft", None, Some(16)),
        "Control" => ("ControlLeft", None, Some(17)),
        "Alt" => ("AltLeft", None, Some(18)),
        "Meta" => ("MetaLeft", None, Some(91)),
        _ => (key, None, None),
    }
}

#[async_trait]
impl PageHandle for CdpPageHandle {
    fn id(&self) -> PageId {
        self.id.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn url(&self) -> EngineResult<String> {
        self.ensure_open()?;
        let url = self.page.url().await.map_err(protocol)?;
        Ok(url.unwrap_or_else(|| BLANK_URL.to_string()))
    }

    async fn goto(&self, url: &str, timeout: Duration) -> EngineResult<()> {
        self.ensure_open()?;
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| EngineError::Timeout("navigation"))?
            .map_err(protocol)?;
        Ok(())
    }

    async fn reload(&self, timeout: Duration) -> EngineResult<()> {
        self.ensure_open()?;
        tokio::time::timeout(timeout, self.page.reload())
            .await
            .map_err(|_| EngineError::Timeout("reload"))?
            .map_err(protocol)?;
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> EngineResult<()> {
        self.ensure_open()?;
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(EngineError::Protocol)?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> EngineResult<()> {
        self.ensure_open()?;
        let mut last_error = None;
        for attempt in 1..=3 {
            let applied = async {
                self.page
                    .execute(SetUserAgentOverrideParams::new(user_agent))
                    .await?;
                self.page
                    .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                        MASK_AUTOMATION_SCRIPT,
                    ))
                    .await?;
                Ok::<_, chromiumoxide::error::CdpError>(())
            }
            .await;
            match applied {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("User agent override attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Err(last_error.map(protocol).unwrap_or(EngineError::PageClosed))
    }

    async fn bring_to_front(&self) -> EngineResult<()> {
        self.ensure_open()?;
        self.page
            .execute(BringToFrontParams::default())
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let result = self.page.clone().close().await.map_err(protocol);
        self.mark_closed();
        result
    }

    async fn screenshot_jpeg(&self, quality: u8, timeout: Duration) -> EngineResult<Vec<u8>> {
        self.ensure_open()?;
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(quality as i64)
            .build();
        let resp = tokio::time::timeout(timeout, self.page.execute(params))
            .await
            .map_err(|_| EngineError::Timeout("screenshot"))?
            .map_err(protocol)?;
        let data_b64: &str = resp.data.as_ref();
        base64::engine::general_purpose::STANDARD
            .decode(data_b64.as_bytes())
            .map_err(|e| EngineError::Protocol(format!("base64 decode failed: {}", e)))
    }

    async fn mouse_move(&self, x: f64, y: f64) -> EngineResult<()> {
        let held = {
            let mut pointer = self.pointer.lock();
            pointer.x = x;
            pointer.y = y;
            pointer.held
        };
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .button(held.map(cdp_button).unwrap_or(MouseButton::None))
            .buttons(buttons_mask(held))
            .build()
            .map_err(EngineError::Protocol)?;
        self.dispatch_mouse(params).await
    }

    async fn mouse_down(&self, button: PointerButton) -> EngineResult<()> {
        let (x, y) = {
            let mut pointer = self.pointer.lock();
            pointer.held = Some(button);
            (pointer.x, pointer.y)
        };
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(cdp_button(button))
            .buttons(buttons_mask(Some(button)))
            .click_count(1)
            .build()
            .map_err(EngineError::Protocol)?;
        self.dispatch_mouse(params).await
    }

    async fn mouse_up(&self, button: PointerButton) -> EngineResult<()> {
        let (x, y) = {
            let mut pointer = self.pointer.lock();
            pointer.held = None;
            (pointer.x, pointer.y)
        };
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(cdp_button(button))
            .click_count(1)
            .build()
            .map_err(EngineError::Protocol)?;
        self.dispatch_mouse(params).await
    }

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> EngineResult<()> {
        let (x, y) = {
            let pointer = self.pointer.lock();
            (pointer.x, pointer.y)
        };
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(delta_x)
            .delta_y(delta_y)
            .build()
            .map_err(EngineError::Protocol)?;
        self.dispatch_mouse(params).await
    }

    async fn key_down(&self, key: &str, modifiers: Modifiers) -> EngineResult<()> {
        self.dispatch_key(DispatchKeyEventType::KeyDown, key, modifiers)
            .await
    }

    async fn key_up(&self, key: &str, modifiers: Modifiers) -> EngineResult<()> {
        self.dispatch_key(DispatchKeyEventType::KeyUp, key, modifiers)
            .await
    }

    async fn insert_text(&self, text: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn focus(&self, selector: Option<&str>) -> EngineResult<()> {
        self.ensure_open()?;
        let script = match selector {
            Some(selector) => {
                let quoted = serde_json::to_string(selector).map_err(protocol)?;
                format!(
                    "(() => {{ const el = document.querySelector({quoted}); if (el) el.focus(); return !!el; }})()"
                )
            }
            None => ENSURE_FOCUS_SCRIPT.to_string(),
        };
        self.page.evaluate(script).await.map_err(protocol)?;
        Ok(())
    }

    async fn selected_text(&self) -> EngineResult<String> {
        self.ensure_open()?;
        let result = self.page.evaluate(SELECTION_SCRIPT).await.map_err(protocol)?;
        Ok(result.into_value::<String>().unwrap_or_default())
    }
}
