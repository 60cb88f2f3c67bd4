use tracing::debug;

use crate::engine::Modifiers;
use crate::models::{ControlEventMessage, KeyboardEventMessage, MouseEventMessage};
use crate::session::{ClientCommand, KeyInput, ParticipantId, PointerInput, Session};

/// Handle a control-event: mouse, keyboard or wheel input for the shared page
pub fn handle_control_message(
    event: ControlEventMessage,
    session: &Session,
    participant: &ParticipantId,
) {
    let command = control_command(event);
    if !session.submit(participant, command) {
        debug!("Control event from {} not accepted", participant);
    }
}

pub fn control_command(event: ControlEventMessage) -> ClientCommand {
    match event {
        ControlEventMessage::Mouse(mouse) => ClientCommand::Pointer(pointer_input(mouse)),
        ControlEventMessage::Keyboard(key) => ClientCommand::Key(key_input(key)),
        ControlEventMessage::Wheel(wheel) => ClientCommand::Wheel {
            delta_x: wheel.delta_x,
            delta_y: wheel.delta_y,
        },
    }
}

fn pointer_input(mouse: MouseEventMessage) -> PointerInput {
    PointerInput {
        action: mouse.action,
        x: mouse.x,
        y: mouse.y,
        button: mouse.button,
    }
}

fn key_input(key: KeyboardEventMessage) -> KeyInput {
    KeyInput {
        action: key.action,
        modifiers: Modifiers {
            alt: key.alt,
            ctrl: key.ctrl,
            meta: key.meta,
            shift: key.shift,
        },
        key: key.key,
        is_char: key.is_char,
        selector: key.selector.filter(|selector| !selector.trim().is_empty()),
    }
}
