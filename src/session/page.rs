use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::engine::{PageHandle, PageId};

/// A running event listener. Dropping it unsubscribes.
pub struct Subscription(JoinHandle<()>);

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self(task)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The single live page every participant shares.
///
/// The page and its listener are swapped together, so a replaced page never
/// keeps feeding events into the session.
#[derive(Default)]
pub struct SharedPage {
    current: RwLock<Option<Arc<dyn PageHandle>>>,
    listener: Mutex<Option<Subscription>>,
}

impl SharedPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn PageHandle>> {
        self.current.read().clone()
    }

    /// The current page, unless it has been closed.
    pub fn live(&self) -> Option<Arc<dyn PageHandle>> {
        self.get().filter(|page| !page.is_closed())
    }

    pub fn current_id(&self) -> Option<PageId> {
        self.current.read().as_ref().map(|page| page.id())
    }

    pub fn is_current(&self, id: &PageId) -> bool {
        self.current_id().as_ref() == Some(id)
    }

    /// Install `page` with its listener and hand back the page it replaced.
    pub fn replace(
        &self,
        page: Arc<dyn PageHandle>,
        listener: Subscription,
    ) -> Option<Arc<dyn PageHandle>> {
        let previous_listener = self.listener.lock().replace(listener);
        drop(previous_listener);
        self.current.write().replace(page)
    }

    pub fn clear(&self) {
        self.listener.lock().take();
        self.current.write().take();
    }
}
