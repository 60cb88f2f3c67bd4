//! Polling capture loop that keeps every participant's screen current.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::SessionCore;
use crate::engine::{EngineError, BLANK_URL};

const CAPTURE_RETRY_MSG: &str = "Screen update failed… retrying";

#[derive(Default)]
struct StreamerState {
    running: AtomicBool,
    /// Bumped on every start and halt; a loop exits once its generation is stale.
    generation: AtomicU64,
    shutdown: AtomicBool,
    capture_failures: AtomicU64,
    failing: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone, Default)]
pub struct FrameStreamer {
    state: Arc<StreamerState>,
}

impl FrameStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the loop. Returns false when it was already running or has been stopped.
    pub(crate) fn start(&self, core: &Arc<SessionCore>) -> bool {
        if self.state.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        if self.state.running.swap(true, Ordering::SeqCst) {
            debug!("Frame streamer already running");
            return false;
        }

        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let interval = core.config.frame_interval.max(Duration::from_millis(1));
        let streamer = self.clone();
        let weak = Arc::downgrade(core);
        let task = tokio::spawn(async move { streamer.run(weak, generation, interval).await });
        if let Some(previous) = self.state.task.lock().replace(task) {
            previous.abort();
        }
        info!("Frame streamer started (every {:?})", interval);
        true
    }

    pub fn halt(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        if self.state.running.swap(false, Ordering::SeqCst) {
            info!("Frame streamer halted");
        }
        if let Some(task) = self.state.task.lock().take() {
            task.abort();
        }
    }

    /// Halt now and start again once the cooldown has passed.
    pub(crate) fn halt_and_restart(&self, core: &Arc<SessionCore>) {
        self.halt();
        if self.state.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let cooldown = core.config.stream_restart_cooldown;
        let streamer = self.clone();
        let weak = Arc::downgrade(core);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(core) = weak.upgrade() {
                streamer.start(&core);
            }
        });
    }

    /// Halt for good; later starts and restarts are refused.
    pub fn stop(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.halt();
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn capture_failures(&self) -> u64 {
        self.state.capture_failures.load(Ordering::Relaxed)
    }

    async fn run(self, core: Weak<SessionCore>, generation: u64, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.state.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            let Some(core) = core.upgrade() else { break };
            let backoff = self.cycle(&core).await;
            drop(core);
            if let Some(backoff) = backoff {
                tokio::time::sleep(backoff).await;
            }
        }
        debug!("Frame loop {} exited", generation);
    }

    /// One capture attempt. Returns an extra wait when no page could be found.
    async fn cycle(&self, core: &Arc<SessionCore>) -> Option<Duration> {
        let Some(page) = core.page.live() else {
            if core.recover_page().await {
                return None;
            }
            return Some(core.config.page_recovery_delay);
        };

        if core.navigation.lock().is_navigating() {
            return None;
        }
        match page.url().await {
            Ok(url) if url == BLANK_URL => return None,
            Ok(_) => {}
            Err(e) => {
                debug!("Skipping capture, page url unavailable: {}", e);
                return None;
            }
        }

        let config = &core.config;
        match page
            .screenshot_jpeg(config.frame_quality, config.screenshot_timeout)
            .await
        {
            Ok(jpeg) => {
                if self.state.failing.swap(false, Ordering::SeqCst) {
                    info!("Screen capture recovered");
                }
                // A navigation may have begun while the capture was in flight.
                if core.navigation.lock().is_navigating() {
                    return None;
                }
                core.broadcaster.frame(&jpeg);
                core.broadcaster.loading(false, None);
            }
            Err(EngineError::PageClosed) => {
                debug!("Page closed during capture");
            }
            Err(e) => {
                self.state.capture_failures.fetch_add(1, Ordering::Relaxed);
                if self.state.failing.swap(true, Ordering::SeqCst) {
                    debug!("Screen capture still failing: {}", e);
                } else {
                    warn!("Screen capture failed: {}", e);
                    core.broadcaster.loading(true, Some(CAPTURE_RETRY_MSG));
                }
            }
        }
        None
    }
}
