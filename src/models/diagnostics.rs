use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_participants: u32,
    pub n_conn: u32,
    pub history_depth: u32,
    pub forward_depth: u32,
    pub frames_sent: u64,
    pub capture_failures: u64,
    pub commands_executed: u64,
    pub commands_failed: u64,
    pub commands_dropped: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
