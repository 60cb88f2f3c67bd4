//! Boundary to the browser engine.
//!
//! The session core only talks to the engine through [`BrowserEngine`] and
//! [`PageHandle`]. The production implementation lives in [`cdp`]; tests use
//! the recording engine in `mock`.

pub mod cdp;
#[cfg(test)]
pub mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Placeholder document every fresh tab starts on.
pub const BLANK_URL: &str = "about:blank";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("page is closed")]
    PageClosed,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("no page available")]
    NoPage,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Opaque identity of a top-level page, stable for the page's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageId(pub String);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed capture resolution applied to every adopted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// Modifier keys held while a key event is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    /// Bitmask in the DevTools convention (Alt=1, Ctrl=2, Meta=4, Shift=8).
    pub fn bits(&self) -> i64 {
        let mut bits = 0;
        if self.alt {
            bits |= 1;
        }
        if self.ctrl {
            bits |= 2;
        }
        if self.meta {
            bits |= 4;
        }
        if self.shift {
            bits |= 8;
        }
        bits
    }
}

/// Events raised by a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// The main document committed a navigation to `url`.
    FrameNavigated(String),
    Closed,
}

/// Browser-wide events.
#[derive(Clone)]
pub enum EngineEvent {
    /// A new top-level page was opened (for example by `window.open`).
    TargetCreated(Arc<dyn PageHandle>),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::TargetCreated(page) => {
                f.debug_tuple("TargetCreated").field(&page.id()).finish()
            }
        }
    }
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Currently open top-level pages, oldest first.
    async fn pages(&self) -> EngineResult<Vec<Arc<dyn PageHandle>>>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    async fn close(&self) -> EngineResult<()>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    fn id(&self) -> PageId;

    fn is_closed(&self) -> bool;

    /// Events for this page only. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<PageEvent>;

    async fn url(&self) -> EngineResult<String>;

    /// Load `url` and wait for DOMContentLoaded.
    async fn goto(&self, url: &str, timeout: Duration) -> EngineResult<()>;

    async fn reload(&self, timeout: Duration) -> EngineResult<()>;

    async fn set_viewport(&self, viewport: Viewport) -> EngineResult<()>;

    async fn set_user_agent(&self, user_agent: &str) -> EngineResult<()>;

    async fn bring_to_front(&self) -> EngineResult<()>;

    async fn close(&self) -> EngineResult<()>;

    /// Compressed raster snapshot of the visible viewport.
    async fn screenshot_jpeg(&self, quality: u8, timeout: Duration) -> EngineResult<Vec<u8>>;

    async fn mouse_move(&self, x: f64, y: f64) -> EngineResult<()>;

    async fn mouse_down(&self, button: PointerButton) -> EngineResult<()>;

    async fn mouse_up(&self, button: PointerButton) -> EngineResult<()>;

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> EngineResult<()>;

    async fn key_down(&self, key: &str, modifiers: Modifiers) -> EngineResult<()>;

    async fn key_up(&self, key: &str, modifiers: Modifiers) -> EngineResult<()>;

    async fn insert_text(&self, text: &str) -> EngineResult<()>;

    /// Focus `selector`, or make sure something in the document holds focus.
    async fn focus(&self, selector: Option<&str>) -> EngineResult<()>;

    /// Text of the current document selection, empty when nothing is selected.
    async fn selected_text(&self) -> EngineResult<String>;
}
