use tracing::{debug, info};

use crate::models::NavigateMessage;
use crate::session::{ClientCommand, ParticipantId, Session};

/// Which history step a nav-* event asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStep {
    Back,
    Forward,
    Refresh,
}

/// Handle NavigateMessage: free-text address input from the holder
pub fn handle_navigate_message(
    navigate_msg: &NavigateMessage,
    session: &Session,
    participant: &ParticipantId,
) {
    info!("Navigate to {:?} requested by {}", navigate_msg.url, participant);
    let command = ClientCommand::Navigate(navigate_msg.url.clone());
    if !session.submit(participant, command) {
        debug!("Navigate from {} not accepted", participant);
    }
}

/// Handle nav-back, nav-forward and nav-refresh
pub fn handle_history_message(step: HistoryStep, session: &Session, participant: &ParticipantId) {
    let command = match step {
        HistoryStep::Back => ClientCommand::Back,
        HistoryStep::Forward => ClientCommand::Forward,
        HistoryStep::Refresh => ClientCommand::Refresh,
    };
    if !session.submit(participant, command) {
        debug!("{:?} from {} not accepted", step, participant);
    }
}
