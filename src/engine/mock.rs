//! Recording engine used by the test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{
    BrowserEngine, EngineError, EngineEvent, EngineResult, Modifiers, PageEvent, PageHandle,
    PageId, PointerButton, Viewport, BLANK_URL,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Goto(String),
    Reload,
    SetViewport(Viewport),
    SetUserAgent,
    BringToFront,
    Close,
    MouseMove(f64, f64),
    MouseDown(PointerButton),
    MouseUp(PointerButton),
    Wheel(f64, f64),
    KeyDown(String),
    KeyUp(String),
    InsertText(String),
    Focus(Option<String>),
    SelectedText,
}

pub struct MockEngine {
    pages: Mutex<Vec<Arc<MockPage>>>,
    events: broadcast::Sender<EngineEvent>,
    pub closed: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Self::with_page(MockPage::new("page-1"))
    }

    pub fn with_page(page: Arc<MockPage>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            pages: Mutex::new(vec![page]),
            events,
            closed: AtomicBool::new(false),
        })
    }

    pub fn first_page(&self) -> Arc<MockPage> {
        self.pages.lock()[0].clone()
    }

    /// Simulate the page opening a new tab.
    pub fn open_tab(&self, page: Arc<MockPage>) {
        self.pages.lock().push(page.clone());
        let _ = self.events.send(EngineEvent::TargetCreated(page));
    }

    pub fn add_page(&self, page: Arc<MockPage>) {
        self.pages.lock().push(page);
    }
}

#[async_trait]
impl BrowserEngine for MockEngine {
    async fn pages(&self) -> EngineResult<Vec<Arc<dyn PageHandle>>> {
        Ok(self
            .pages
            .lock()
            .iter()
            .filter(|p| !p.is_closed())
            .map(|p| p.clone() as Arc<dyn PageHandle>)
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockPage {
    id: PageId,
    url: Mutex<String>,
    closed: AtomicBool,
    events: broadcast::Sender<PageEvent>,
    calls: Mutex<Vec<Call>>,
    input_delays: Mutex<VecDeque<Duration>>,
    goto_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub fail_goto: AtomicBool,
    pub fail_screenshot: AtomicBool,
    pub screenshots: AtomicUsize,
    pub selection: Mutex<String>,
}

impl MockPage {
    pub fn new(id: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            id: PageId(id.to_string()),
            url: Mutex::new(BLANK_URL.to_string()),
            closed: AtomicBool::new(false),
            events,
            calls: Mutex::new(Vec::new()),
            input_delays: Mutex::new(VecDeque::new()),
            goto_delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail_goto: AtomicBool::new(false),
            fail_screenshot: AtomicBool::new(false),
            screenshots: AtomicUsize::new(0),
            selection: Mutex::new(String::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Latency applied to the next input calls, one entry per call.
    pub fn script_input_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.input_delays.lock().extend(delays);
    }

    pub fn set_goto_delay(&self, delay: Duration) {
        *self.goto_delay.lock() = delay;
    }

    /// Highest number of engine calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn current_url(&self) -> String {
        self.url.lock().clone()
    }

    /// Simulate a page-initiated navigation (redirect, link click).
    pub fn navigate_organically(&self, url: &str) {
        *self.url.lock() = url.to_string();
        let _ = self.events.send(PageEvent::FrameNavigated(url.to_string()));
    }

    /// Deliver a frame navigation late: the page itself stays where it is.
    pub fn replay_frame_navigated(&self, url: &str) {
        let _ = self.events.send(PageEvent::FrameNavigated(url.to_string()));
    }

    pub fn close_now(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
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

    async fn record(&self, call: Call, delay: Duration) -> EngineResult<()> {
        self.ensure_open()?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn record_input(&self, call: Call) -> EngineResult<()> {
        let delay = self.input_delays.lock().pop_front().unwrap_or_default();
        self.record(call, delay).await
    }

    fn commit(&self, url: &str) {
        *self.url.lock() = url.to_string();
        let _ = self.events.send(PageEvent::FrameNavigated(url.to_string()));
    }
}

#[async_trait]
impl PageHandle for MockPage {
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
        Ok(self.current_url())
    }

    async fn goto(&self, url: &str, _timeout: Duration) -> EngineResult<()> {
        let delay = *self.goto_delay.lock();
        self.record(Call::Goto(url.to_string()), delay).await?;
        if self.fail_goto.load(Ordering::SeqCst) {
            return Err(EngineError::Timeout("navigation"));
        }
        self.commit(url);
        Ok(())
    }

    async fn reload(&self, _timeout: Duration) -> EngineResult<()> {
        self.record(Call::Reload, Duration::ZERO).await?;
        let url = self.current_url();
        self.commit(&url);
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> EngineResult<()> {
        self.record(Call::SetViewport(viewport), Duration::ZERO).await
    }

    async fn set_user_agent(&self, _user_agent: &str) -> EngineResult<()> {
        self.record(Call::SetUserAgent, Duration::ZERO).await
    }

    async fn bring_to_front(&self) -> EngineResult<()> {
        self.record(Call::BringToFront, Duration::ZERO).await
    }

    async fn close(&self) -> EngineResult<()> {
        self.record(Call::Close, Duration::ZERO).await?;
        self.close_now();
        Ok(())
    }

    async fn screenshot_jpeg(&self, _quality: u8, _timeout: Duration) -> EngineResult<Vec<u8>> {
        self.ensure_open()?;
        if self.fail_screenshot.load(Ordering::SeqCst) {
            return Err(EngineError::Timeout("screenshot"));
        }
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0xff, 0xd8, 0xff, 0xd9])
    }

    async fn mouse_move(&self, x: f64, y: f64) -> EngineResult<()> {
        self.record_input(Call::MouseMove(x, y)).await
    }

    async fn mouse_down(&self, button: PointerButton) -> EngineResult<()> {
        self.record_input(Call::MouseDown(button)).await
    }

    async fn mouse_up(&self, button: PointerButton) -> EngineResult<()> {
        self.record_input(Call::MouseUp(button)).await
    }

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> EngineResult<()> {
        self.record_input(Call::Wheel(delta_x, delta_y)).await
    }

    async fn key_down(&self, key: &str, _modifiers: Modifiers) -> EngineResult<()> {
        self.record_input(Call::KeyDown(key.to_string())).await
    }

    async fn key_up(&self, key: &str, _modifiers: Modifiers) -> EngineResult<()> {
        self.record_input(Call::KeyUp(key.to_string())).await
    }

    async fn insert_text(&self, text: &str) -> EngineResult<()> {
        self.record_input(Call::InsertText(text.to_string())).await
    }

    async fn focus(&self, selector: Option<&str>) -> EngineResult<()> {
        self.record(Call::Focus(selector.map(str::to_string)), Duration::ZERO)
            .await
    }

    async fn selected_text(&self) -> EngineResult<String> {
        self.record(Call::SelectedText, Duration::ZERO).await?;
        Ok(self.selection.lock().clone())
    }
}
