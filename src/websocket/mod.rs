pub mod handler;
pub mod msg_control_handler;
pub mod msg_nav_handler;
pub mod msg_session_handler;

pub use handler::websocket_handler;
