//! Fan-out of observable session state to every participant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error};

use super::ParticipantId;
use crate::models::{
    ClipboardMessage, LoadingMessage, QueueMessage, ScreenMessage, SendMessage, UrlMessage,
};

/// A serialized outbound frame, shared by every receiving connection.
pub type Outbound = Arc<str>;

pub fn queue_message(ordered: &[ParticipantId]) -> SendMessage {
    SendMessage::QueueUpdate(QueueMessage {
        ordered_ids: ordered.to_vec(),
    })
}

pub fn url_message(url: &str) -> SendMessage {
    SendMessage::UpdateUrl(UrlMessage {
        url: url.to_string(),
    })
}

pub fn loading_message(loading: bool, msg: Option<&str>) -> SendMessage {
    let payload = LoadingMessage {
        msg: msg.map(str::to_string),
    };
    if loading {
        SendMessage::LoadingStart(payload)
    } else {
        SendMessage::LoadingEnd(payload)
    }
}

pub fn frame_message(jpeg: &[u8]) -> SendMessage {
    let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
    SendMessage::Screen(ScreenMessage {
        data_url: format!("data:image/jpeg;base64,{encoded}"),
    })
}

pub fn encode(message: &SendMessage) -> Option<Outbound> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

pub struct SessionStateBroadcaster {
    tx: broadcast::Sender<Outbound>,
    loading: Mutex<Option<bool>>,
    frames_sent: AtomicU64,
}

impl SessionStateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            loading: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.tx.subscribe()
    }

    pub fn publish(&self, message: &SendMessage) {
        let Some(frame) = encode(message) else { return };
        // No receivers simply means nobody is connected yet.
        if self.tx.send(frame).is_err() {
            debug!("No participants connected; dropping outbound message");
        }
    }

    pub fn queue(&self, ordered: &[ParticipantId]) {
        self.publish(&queue_message(ordered));
    }

    pub fn url(&self, url: &str) {
        self.publish(&url_message(url));
    }

    /// Emits transitions only; a repeated state goes out again only when it carries a message.
    pub fn loading(&self, loading: bool, msg: Option<&str>) {
        {
            let mut last = self.loading.lock();
            if *last == Some(loading) && msg.is_none() {
                return;
            }
            *last = Some(loading);
        }
        self.publish(&loading_message(loading, msg));
    }

    pub fn frame(&self, jpeg: &[u8]) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.publish(&frame_message(jpeg));
    }

    pub fn clipboard(&self, text: &str) {
        self.publish(&SendMessage::ClipboardCopy(ClipboardMessage {
            text: text.to_string(),
        }));
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut broadcast::Receiver<Outbound>) -> Vec<SendMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn test_loading_emits_transitions_only() {
        let broadcaster = SessionStateBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();

        broadcaster.loading(false, None);
        broadcaster.loading(false, None);
        broadcaster.loading(true, Some("Navigating…"));
        broadcaster.loading(true, None);
        broadcaster.loading(false, None);

        assert_eq!(
            drain(&mut rx),
            vec![
                loading_message(false, None),
                loading_message(true, Some("Navigating…")),
                loading_message(false, None),
            ]
        );
    }

    #[test]
    fn test_frame_is_a_jpeg_data_url() {
        let broadcaster = SessionStateBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        broadcaster.frame(&[0xff, 0xd8]);

        let messages = drain(&mut rx);
        let SendMessage::Screen(screen) = &messages[0] else {
            panic!("expected a screen message");
        };
        assert_eq!(screen.data_url, "data:image/jpeg;base64,/9g=");
        assert_eq!(broadcaster.frames_sent(), 1);
    }

    #[test]
    fn test_every_subscriber_gets_the_same_queue() {
        let broadcaster = SessionStateBroadcaster::new(16);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        let ordered = vec![ParticipantId::from("a"), ParticipantId::from("b")];
        broadcaster.queue(&ordered);

        assert_eq!(drain(&mut a), vec![queue_message(&ordered)]);
        assert_eq!(drain(&mut b), vec![queue_message(&ordered)]);
    }

    #[test]
    fn test_publish_without_receivers_is_harmless() {
        let broadcaster = SessionStateBroadcaster::new(4);
        broadcaster.url("https://example.com/");
        assert_eq!(broadcaster.receiver_count(), 0);
    }
}
