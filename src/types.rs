// file: src/types.rs
// description: execution data model and the JSON frames exchanged with the push endpoint

use crate::error::TrackerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// `completed` and `failed` never regress to a non-terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, ExecutionStatus::Queued | ExecutionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag of a push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Started,
    Progress,
    Completed,
    Failed,
    Log,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Started,
        EventKind::Progress,
        EventKind::Completed,
        EventKind::Failed,
        EventKind::Log,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Log => "log",
        }
    }

    /// Name used in the `type` field of inbound frames.
    pub fn wire_name(self) -> &'static str {
        match self {
            EventKind::Started => "task:started",
            EventKind::Progress => "task:progress",
            EventKind::Completed => "task:completed",
            EventKind::Failed => "task:failed",
            EventKind::Log => "task:log",
        }
    }

    /// Accepts both the namespaced (`task:progress`) and bare (`progress`) forms.
    pub fn from_wire(name: &str) -> Option<Self> {
        let bare = name.strip_prefix("task:").unwrap_or(name);
        EventKind::ALL.into_iter().find(|kind| kind.as_str() == bare)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status announced by a `started` event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStatus {
    Queued,
    #[default]
    Running,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayload {
    #[serde(default)]
    pub status: StartStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    /// Percentage in `0..=100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPayload {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub message: String,
}

/// Kind-specific body of an [`ExecutionEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventPayload {
    Started(StartedPayload),
    Progress(ProgressPayload),
    Completed(CompletedPayload),
    Failed(FailedPayload),
    Log(LogPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Started(_) => EventKind::Started,
            EventPayload::Progress(_) => EventKind::Progress,
            EventPayload::Completed(_) => EventKind::Completed,
            EventPayload::Failed(_) => EventKind::Failed,
            EventPayload::Log(_) => EventKind::Log,
        }
    }
}

/// One typed push event for a single execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub execution_id: String,
    pub task_id: Option<String>,
    pub payload: EventPayload,
}

impl ExecutionEvent {
    pub fn new(execution_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: None,
            payload,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Status this event moves an execution towards, ignoring terminal protection.
    pub fn target_status(&self) -> ExecutionStatus {
        match &self.payload {
            EventPayload::Started(started) => match started.status {
                StartStatus::Queued => ExecutionStatus::Queued,
                StartStatus::Running => ExecutionStatus::Running,
            },
            EventPayload::Progress(_) | EventPayload::Log(_) => ExecutionStatus::Running,
            EventPayload::Completed(_) => ExecutionStatus::Completed,
            EventPayload::Failed(_) => ExecutionStatus::Failed,
        }
    }
}

/// Merged view of one execution as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub execution_id: String,
    pub task_id: Option<String>,
    pub status: ExecutionStatus,
    pub last_event_kind: EventKind,
    pub payload: EventPayload,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Progress percentage carried by the last event, if it was a progress event.
    pub fn progress(&self) -> Option<f64> {
        match &self.payload {
            EventPayload::Progress(progress) => progress.progress,
            EventPayload::Completed(_) => Some(100.0),
            _ => None,
        }
    }
}

/// Topic descriptor a consumer can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    Task(String),
    Execution(String),
    All,
}

impl Subscription {
    pub fn task(id: impl Into<String>) -> Self {
        Subscription::Task(id.into())
    }

    pub fn execution(id: impl Into<String>) -> Self {
        Subscription::Execution(id.into())
    }

    /// Canonical string form, also used as the registry key and wire topic.
    pub fn canonical(&self) -> String {
        match self {
            Subscription::Task(id) => format!("task:{id}"),
            Subscription::Execution(id) => format!("execution:{id}"),
            Subscription::All => "all".to_string(),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Subscription {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Subscription::All);
        }
        match s.split_once(':') {
            Some(("task", id)) if !id.is_empty() => Ok(Subscription::task(id)),
            Some(("execution", id)) if !id.is_empty() => Ok(Subscription::execution(id)),
            _ => Err(TrackerError::InvalidTopic(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Outbound subscription frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: SubscriptionAction,
    pub topic: String,
}

impl ClientMessage {
    pub fn subscribe(topic: &Subscription) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            topic: topic.canonical(),
        }
    }

    pub fn unsubscribe(topic: &Subscription) -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            topic: topic.canonical(),
        }
    }

    pub fn to_json(&self) -> Result<String, TrackerError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Raw `{"type": ..., "data": ...}` envelope before kind-specific validation.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventEnvelope<P> {
    execution_id: String,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(flatten)]
    payload: P,
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Event(ExecutionEvent),
    /// Server acknowledgement of a subscribe/unsubscribe.
    Ack {
        action: SubscriptionAction,
        topic: Option<String>,
    },
    Pong,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, TrackerError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        match raw.frame_type.as_str() {
            "pong" => return Ok(InboundFrame::Pong),
            "subscribed" | "unsubscribed" => {
                let action = if raw.frame_type == "subscribed" {
                    SubscriptionAction::Subscribe
                } else {
                    SubscriptionAction::Unsubscribe
                };
                let topic = raw
                    .data
                    .get("topic")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                return Ok(InboundFrame::Ack { action, topic });
            }
            _ => {}
        }

        let kind = EventKind::from_wire(&raw.frame_type)
            .ok_or_else(|| TrackerError::UnknownEventKind(raw.frame_type.clone()))?;

        let event = match kind {
            EventKind::Started => decode(raw.data, EventPayload::Started)?,
            EventKind::Progress => check_progress(decode(raw.data, EventPayload::Progress)?)?,
            EventKind::Completed => decode(raw.data, EventPayload::Completed)?,
            EventKind::Failed => decode(raw.data, EventPayload::Failed)?,
            EventKind::Log => decode(raw.data, EventPayload::Log)?,
        };
        Ok(InboundFrame::Event(event))
    }
}

fn decode<P: DeserializeOwned>(
    data: serde_json::Value,
    wrap: fn(P) -> EventPayload,
) -> Result<ExecutionEvent, TrackerError> {
    let envelope: EventEnvelope<P> = serde_json::from_value(data)
        .map_err(|e| TrackerError::InvalidFrame(e.to_string()))?;

    if envelope.execution_id.trim().is_empty() {
        return Err(TrackerError::InvalidFrame("empty executionId".to_string()));
    }

    Ok(ExecutionEvent {
        execution_id: envelope.execution_id,
        task_id: envelope.task_id.filter(|id| !id.is_empty()),
        payload: wrap(envelope.payload),
    })
}

/// Progress is a percentage; anything outside `0..=100` is a malformed frame.
fn check_progress(event: ExecutionEvent) -> Result<ExecutionEvent, TrackerError> {
    if let EventPayload::Progress(ProgressPayload {
        progress: Some(value),
        ..
    }) = &event.payload
        && !(0.0..=100.0).contains(value)
    {
        return Err(TrackerError::InvalidFrame(format!(
            "progress {value} outside 0..=100"
        )));
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_started_defaults_to_running() {
        let json = r#"{"type":"task:started","data":{"executionId":"exec-1","taskId":"task-9"}}"#;
        let frame = InboundFrame::parse(json).unwrap();
        match frame {
            InboundFrame::Event(event) => {
                assert_eq!(event.execution_id, "exec-1");
                assert_eq!(event.task_id.as_deref(), Some("task-9"));
                assert_eq!(event.kind(), EventKind::Started);
                assert_eq!(event.target_status(), ExecutionStatus::Running);
            }
            other => panic!("Expected Event, got {other:?}"),
        }
    }

    #[test]
    fn parse_started_queued() {
        let json = r#"{"type":"started","data":{"executionId":"exec-1","status":"queued"}}"#;
        let InboundFrame::Event(event) = InboundFrame::parse(json).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.target_status(), ExecutionStatus::Queued);
        assert!(event.task_id.is_none());
    }

    #[test]
    fn parse_progress_payload() {
        let json = r#"{"type":"task:progress","data":{"executionId":"e","taskId":null,"progress":42.5,"step":"render"}}"#;
        let InboundFrame::Event(event) = InboundFrame::parse(json).unwrap() else {
            panic!("expected event");
        };
        match event.payload {
            EventPayload::Progress(p) => {
                assert_eq!(p.progress, Some(42.5));
                assert_eq!(p.step.as_deref(), Some("render"));
                assert!(p.message.is_none());
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_progress_out_of_range() {
        for value in ["-250", "-0.5", "100.5", "1e9"] {
            let json = format!(
                r#"{{"type":"task:progress","data":{{"executionId":"e","progress":{value}}}}}"#
            );
            let err = InboundFrame::parse(&json).unwrap_err();
            assert!(err.is_malformed_frame(), "{value} accepted");
        }

        for value in ["0", "100"] {
            let json = format!(
                r#"{{"type":"task:progress","data":{{"executionId":"e","progress":{value}}}}}"#
            );
            assert!(InboundFrame::parse(&json).is_ok(), "{value} rejected");
        }
    }

    #[test]
    fn parse_failed_requires_error() {
        let json = r#"{"type":"task:failed","data":{"executionId":"e"}}"#;
        assert!(matches!(
            InboundFrame::parse(json),
            Err(TrackerError::InvalidFrame(_))
        ));
    }

    #[test]
    fn parse_rejects_missing_execution_id() {
        let json = r#"{"type":"task:progress","data":{"taskId":"t"}}"#;
        assert!(InboundFrame::parse(json).is_err());

        let json = r#"{"type":"task:progress","data":{"executionId":"  "}}"#;
        assert!(InboundFrame::parse(json).unwrap_err().is_malformed_frame());

        assert!(InboundFrame::parse("not json").unwrap_err().is_malformed_frame());
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        let json = r#"{"type":"task:paused","data":{"executionId":"e"}}"#;
        assert!(matches!(
            InboundFrame::parse(json),
            Err(TrackerError::UnknownEventKind(kind)) if kind == "task:paused"
        ));
    }

    #[test]
    fn parse_control_frames() {
        assert_eq!(InboundFrame::parse(r#"{"type":"pong"}"#).unwrap(), InboundFrame::Pong);
        let ack = InboundFrame::parse(r#"{"type":"subscribed","data":{"topic":"all"}}"#).unwrap();
        assert_eq!(
            ack,
            InboundFrame::Ack {
                action: SubscriptionAction::Subscribe,
                topic: Some("all".to_string())
            }
        );
    }

    #[test]
    fn subscription_canonical_forms() {
        assert_eq!(Subscription::task("t1").canonical(), "task:t1");
        assert_eq!(Subscription::execution("e1").canonical(), "execution:e1");
        assert_eq!(Subscription::All.canonical(), "all");

        assert_eq!("task:t1".parse::<Subscription>().unwrap(), Subscription::task("t1"));
        assert_eq!("all".parse::<Subscription>().unwrap(), Subscription::All);
        assert!("job:x".parse::<Subscription>().is_err());
        assert!("execution:".parse::<Subscription>().is_err());
    }

    #[test]
    fn client_message_json_shape() {
        let json = ClientMessage::subscribe(&Subscription::execution("exec-1"))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"action":"subscribe","topic":"execution:exec-1"}"#);
    }
}
