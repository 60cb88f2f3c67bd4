use serde::{Deserialize, Serialize};

use crate::engine::PointerButton;
use crate::session::ParticipantId;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MouseAction {
    Down,
    Up,
    Move,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MouseEventMessage {
    pub action: MouseAction,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub button: PointerButton,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    #[serde(rename = "keydown", alias = "down")]
    Down,
    #[serde(rename = "keyup", alias = "up")]
    Up,
    #[serde(rename = "type")]
    Type,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardEventMessage {
    pub action: KeyAction,
    pub key: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub is_char: Option<bool>,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WheelEventMessage {
    #[serde(default)]
    pub delta_x: f64,
    pub delta_y: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlEventMessage {
    Mouse(MouseEventMessage),
    Keyboard(KeyboardEventMessage),
    Wheel(WheelEventMessage),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NavigateMessage {
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScreenSizeMessage {
    pub w: f64,
    pub h: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event")]
pub enum ReceivedMessage {
    #[serde(rename = "control-event")]
    ControlEvent(ControlEventMessage),
    #[serde(rename = "navigate")]
    Navigate(NavigateMessage),
    #[serde(rename = "nav-back")]
    NavBack,
    #[serde(rename = "nav-forward")]
    NavForward,
    #[serde(rename = "nav-refresh")]
    NavRefresh,
    #[serde(rename = "screen-size")]
    ScreenSize(ScreenSizeMessage),
    #[serde(rename = "release-control")]
    ReleaseControl,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectedMessage {
    pub id: ParticipantId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenMessage {
    pub data_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UrlMessage {
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoadingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub ordered_ids: Vec<ParticipantId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClipboardMessage {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event")]
pub enum SendMessage {
    #[serde(rename = "connected")]
    Connected(ConnectedMessage),
    #[serde(rename = "screen")]
    Screen(ScreenMessage),
    #[serde(rename = "update-url")]
    UpdateUrl(UrlMessage),
    #[serde(rename = "loading-start")]
    LoadingStart(LoadingMessage),
    #[serde(rename = "loading-end")]
    LoadingEnd(LoadingMessage),
    #[serde(rename = "queue-update")]
    QueueUpdate(QueueMessage),
    #[serde(rename = "clipboard-copy")]
    ClipboardCopy(ClipboardMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mouse_control_event() {
        let raw = r#"{"event":"control-event","type":"mouse","action":"down","x":10.5,"y":20}"#;
        let msg: ReceivedMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ReceivedMessage::ControlEvent(ControlEventMessage::Mouse(MouseEventMessage {
                action: MouseAction::Down,
                x: 10.5,
                y: 20.0,
                button: PointerButton::Left,
            }))
        );
    }

    #[test]
    fn test_parse_keyboard_event_with_browser_field_names() {
        let raw = r#"{"event":"control-event","type":"keyboard","action":"keydown","key":"a",
            "code":"KeyA","shift":false,"ctrl":true,"alt":false,"meta":false,"isChar":true}"#;
        let msg: ReceivedMessage = serde_json::from_str(raw).unwrap();
        let ReceivedMessage::ControlEvent(ControlEventMessage::Keyboard(key)) = msg else {
            panic!("expected keyboard event");
        };
        assert_eq!(key.action, KeyAction::Down);
        assert!(key.ctrl);
        assert_eq!(key.is_char, Some(true));
        assert_eq!(key.selector, None);

        let short: KeyboardEventMessage =
            serde_json::from_value(json!({"action": "up", "key": "Shift"})).unwrap();
        assert_eq!(short.action, KeyAction::Up);
    }

    #[test]
    fn test_parse_unit_and_payload_events() {
        let back: ReceivedMessage = serde_json::from_str(r#"{"event":"nav-back"}"#).unwrap();
        assert_eq!(back, ReceivedMessage::NavBack);

        let size: ReceivedMessage =
            serde_json::from_str(r#"{"event":"screen-size","w":800,"h":450}"#).unwrap();
        assert_eq!(size, ReceivedMessage::ScreenSize(ScreenSizeMessage { w: 800.0, h: 450.0 }));

        let wheel: ReceivedMessage =
            serde_json::from_str(r#"{"event":"control-event","type":"wheel","deltaY":-120}"#).unwrap();
        assert_eq!(
            wheel,
            ReceivedMessage::ControlEvent(ControlEventMessage::Wheel(WheelEventMessage {
                delta_x: 0.0,
                delta_y: -120.0,
            }))
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ReceivedMessage>(r#"{"event":"format-disk"}"#).is_err());
        assert!(serde_json::from_str::<ReceivedMessage>(
            r#"{"event":"control-event","type":"gamepad"}"#
        )
        .is_err());
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let queue = SendMessage::QueueUpdate(QueueMessage {
            ordered_ids: vec![ParticipantId::from("a"), ParticipantId::from("b")],
        });
        assert_eq!(
            serde_json::to_value(&queue).unwrap(),
            json!({"event": "queue-update", "orderedIds": ["a", "b"]})
        );

        let screen = SendMessage::Screen(ScreenMessage { data_url: "data:x".into() });
        assert_eq!(
            serde_json::to_value(&screen).unwrap(),
            json!({"event": "screen", "dataUrl": "data:x"})
        );

        let idle = SendMessage::LoadingEnd(LoadingMessage { msg: None });
        assert_eq!(serde_json::to_value(&idle).unwrap(), json!({"event": "loading-end"}));
    }
}
