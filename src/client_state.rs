/// file: src/client_state.rs
/// description: per-session connection bookkeeping and feed integrity counters
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionStats {
    pub connection_id: String,
    /// Consecutive reconnect attempts since the last successful open.
    pub reconnect_count: u32,
    pub total_reconnects: u64,
    pub is_connected: bool,
    pub last_message_time: Option<Instant>,
    pub total_frames_received: u64,
    pub events_applied: u64,
    pub malformed_frames: u64,
    pub last_disconnection_time: Option<Instant>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            reconnect_count: 0,
            total_reconnects: 0,
            is_connected: false,
            last_message_time: None,
            total_frames_received: 0,
            events_applied: 0,
            malformed_frames: 0,
            last_disconnection_time: None,
        }
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_connection(&mut self) {
        self.connection_id = uuid::Uuid::new_v4().to_string();
        self.last_message_time = Some(Instant::now());
        self.is_connected = true;
        self.reconnect_count = 0;
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnect_count = self.reconnect_count.saturating_add(1);
        self.total_reconnects += 1;
        if self.is_connected {
            self.last_disconnection_time = Some(Instant::now());
        }
        self.is_connected = false;
    }

    pub fn record_frame(&mut self) {
        self.last_message_time = Some(Instant::now());
        self.total_frames_received += 1;
    }

    pub fn record_event(&mut self) {
        self.events_applied += 1;
    }

    pub fn record_malformed(&mut self) {
        self.malformed_frames += 1;
    }

    pub fn disconnect(&mut self) {
        if self.is_connected {
            self.last_disconnection_time = Some(Instant::now());
        }
        self.is_connected = false;
    }
}
