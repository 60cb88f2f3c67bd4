use tracing::{debug, info};

use crate::models::ScreenSizeMessage;
use crate::session::{ParticipantId, Session};

/// Handle ScreenSizeMessage: the size this participant renders the stream at
pub fn handle_screen_size_message(
    size_msg: &ScreenSizeMessage,
    session: &Session,
    participant: &ParticipantId,
) {
    if session.set_client_viewport(participant, size_msg.w, size_msg.h) {
        debug!("Participant {} renders at {}x{}", participant, size_msg.w, size_msg.h);
    }
}

/// Handle release-control: the holder hands control to the next participant
pub fn handle_release_message(session: &Session, participant: &ParticipantId) {
    if session.release_control(participant) {
        info!("Participant {} released control", participant);
    }
}
