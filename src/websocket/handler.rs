use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::models::{ReceivedMessage, SendMessage};
use crate::session::{ParticipantId, Session};
use crate::websocket::msg_control_handler::handle_control_message;
use crate::websocket::msg_nav_handler::{handle_history_message, handle_navigate_message, HistoryStep};
use crate::websocket::msg_session_handler::{handle_release_message, handle_screen_size_message};
use crate::AppState;

type SharedSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = state.session.clone();

    // Every connection is a new participant
    let participant = ParticipantId::new_random();
    info!("WebSocket connection established for participant {}", participant);

    // Split the socket into sender and receiver
    let (sender, mut receiver) = socket.split();
    let sender: SharedSender = Arc::new(Mutex::new(sender));

    // Subscribe before joining so the join broadcast is not missed
    let mut rbc = session.subscribe();
    session.join(participant.clone());

    for message in session.greeting(&participant) {
        if !send_message(&sender, &message).await {
            session.leave(&participant);
            return;
        }
    }

    // Inbound: parse and dispatch every frame the participant sends
    let inbound_session = session.clone();
    let inbound_participant = participant.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("WebSocket error for {}: {}", inbound_participant, e);
                    break;
                }
            };

            let msg: ReceivedMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse message from {}: {}", inbound_participant, e);
                    continue;
                }
            };
            dispatch(msg, &inbound_session, &inbound_participant);
        }
    });

    // Outbound: forward every session broadcast to this participant
    let outbound_participant = participant.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rbc.recv().await {
                Ok(frame) => {
                    if sender
                        .lock()
                        .await
                        .send(Message::Text(frame.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(
                        "Participant {} is slow, skipped {} messages",
                        outbound_participant, skipped
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    session.leave(&participant);
    info!("WebSocket connection terminated for participant {}", participant);
}

fn dispatch(msg: ReceivedMessage, session: &Session, participant: &ParticipantId) {
    match msg {
        ReceivedMessage::ControlEvent(event) => handle_control_message(event, session, participant),
        ReceivedMessage::Navigate(navigate_msg) => {
            handle_navigate_message(&navigate_msg, session, participant)
        }
        ReceivedMessage::NavBack => handle_history_message(HistoryStep::Back, session, participant),
        ReceivedMessage::NavForward => {
            handle_history_message(HistoryStep::Forward, session, participant)
        }
        ReceivedMessage::NavRefresh => {
            handle_history_message(HistoryStep::Refresh, session, participant)
        }
        ReceivedMessage::ScreenSize(size_msg) => {
            handle_screen_size_message(&size_msg, session, participant)
        }
        ReceivedMessage::ReleaseControl => handle_release_message(session, participant),
    }
}

async fn send_message(sender: &SharedSender, message: &SendMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            return true;
        }
    };
    sender.lock().await.send(Message::Text(text)).await.is_ok()
}
