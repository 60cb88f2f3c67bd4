pub mod diagnostics;
pub mod health;
pub mod session_state;

pub use diagnostics::*;
pub use health::*;
pub use session_state::*;
