use std::collections::BTreeSet;

use crate::engine::{PointerButton, Viewport};

/// Keys and pointer buttons the engine currently believes are held down.
///
/// Owned by the command worker. Drained at every control-affecting boundary so
/// a held modifier or button never leaks to the next holder or page.
#[derive(Debug, Default)]
pub struct InputState {
    keys: BTreeSet<String>,
    buttons: BTreeSet<PointerButton>,
}

/// Everything that has to be released, keys first.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HeldInput {
    pub keys: Vec<String>,
    pub buttons: Vec<PointerButton>,
}

impl HeldInput {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.buttons.is_empty()
    }
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the button is already down.
    pub fn press_button(&mut self, button: PointerButton) -> bool {
        self.buttons.insert(button)
    }

    /// Returns false when the button is not down.
    pub fn release_button(&mut self, button: PointerButton) -> bool {
        self.buttons.remove(&button)
    }

    pub fn press_key(&mut self, key: &str) {
        self.keys.insert(key.to_string());
    }

    pub fn release_key(&mut self, key: &str) -> bool {
        self.keys.remove(key)
    }

    pub fn take_held(&mut self) -> HeldInput {
        HeldInput {
            keys: std::mem::take(&mut self.keys).into_iter().collect(),
            buttons: std::mem::take(&mut self.buttons).into_iter().collect(),
        }
    }
}

/// Size at which one participant renders the stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientViewport {
    pub width: f64,
    pub height: f64,
}

impl ClientViewport {
    /// `None` for sizes that cannot be used as a divisor.
    pub fn new(width: f64, height: f64) -> Option<Self> {
        if width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0 {
            Some(Self { width, height })
        } else {
            None
        }
    }
}

impl From<Viewport> for ClientViewport {
    fn from(viewport: Viewport) -> Self {
        Self {
            width: viewport.width as f64,
            height: viewport.height as f64,
        }
    }
}

/// Map a point reported in client coordinates onto the capture resolution.
pub fn scale_point(x: f64, y: f64, client: ClientViewport, session: Viewport) -> (f64, f64) {
    (
        x * session.width as f64 / client.width,
        y * session.height as f64 / client.height,
    )
}
