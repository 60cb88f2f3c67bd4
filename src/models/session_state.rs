use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::session::SessionSnapshot;

/// Observable state of the shared browsing session
#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateResponse {
    /// Participant ids in queue order; the first one holds control
    pub ordered_ids: Vec<String>,
    pub holder: Option<String>,
    pub current_url: Option<String>,
    /// Visited pages, most recent last
    pub history: Vec<String>,
    /// Pages reachable with forward, next one last
    pub forward: Vec<String>,
    pub navigating: bool,
    pub streaming: bool,
}

impl From<SessionSnapshot> for SessionStateResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            ordered_ids: snapshot.ordered_ids.into_iter().map(|id| id.0).collect(),
            holder: snapshot.holder.map(|id| id.0),
            current_url: snapshot.current_url,
            history: snapshot.history,
            forward: snapshot.forward,
            navigating: snapshot.navigating,
            streaming: snapshot.streaming,
        }
    }
}
