//! Calendar scheduler tool: an in-memory event book.
//!
//! Events live for the lifetime of the process. Failures the user can fix
//! (a missing title, an unknown event id) are returned as an `error` payload
//! so they are spoken back as a tool error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};
use voxturn_core::error::ToolError;
use voxturn_core::tools::ToolExecutor;
use voxturn_core::types::{ParamSpec, ParamType, ToolDescriptor};

pub const NAME: &str = "calendar_scheduler";

const ACTIONS: [&str; 5] = [
    "create_event",
    "list_events",
    "update_event",
    "delete_event",
    "find_free_time",
];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";
const DEFAULT_DURATION_MINUTES: i64 = 60;
const LIST_WINDOW_DAYS: i64 = 7;
/// Working hours searched by `find_free_time`, in minutes after midnight.
const WORK_START: i64 = 9 * 60;
const WORK_END: i64 = 17 * 60;

/// A scheduled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    #[serde(with = "hour_minute")]
    pub time: NaiveTime,
    /// Length in minutes.
    pub duration: i64,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
}

impl CalendarEvent {
    fn start_minute(&self) -> i64 {
        minutes_of(self.time)
    }

    fn end_minute(&self) -> i64 {
        self.start_minute() + self.duration
    }

    fn summary(&self) -> String {
        format!(
            "{} on {} at {}",
            self.title,
            self.date.format(DATE_FORMAT),
            self.time.format(TIME_FORMAT)
        )
    }
}

mod hour_minute {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_FORMAT;

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// One free interval, in `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeSlot {
    pub start_time: String,
    pub end_time: String,
    pub duration_available: i64,
}

type Today = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct CalendarScheduler {
    events: Mutex<Vec<CalendarEvent>>,
    today: Today,
}

impl CalendarScheduler {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Pin "today", used when a list or free-time query omits its date.
    pub fn with_today(mut self, date: NaiveDate) -> Self {
        self.today = Arc::new(move || date);
        self
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Manage calendar events: create, list, update and delete appointments, \
             or find free time on a day.",
        )
        .with_param(
            ParamSpec::required("action", ParamType::String, "Calendar action to perform")
                .with_allowed(ACTIONS),
        )
        .with_param(ParamSpec::optional(
            "title",
            ParamType::String,
            "Event title or name",
        ))
        .with_param(ParamSpec::optional(
            "date",
            ParamType::String,
            "Event date in YYYY-MM-DD format",
        ))
        .with_param(ParamSpec::optional(
            "time",
            ParamType::String,
            "Event time in HH:MM format (24-hour)",
        ))
        .with_param(ParamSpec::optional(
            "duration",
            ParamType::Integer,
            "Event duration in minutes (default: 60)",
        ))
        .with_param(ParamSpec::optional(
            "description",
            ParamType::String,
            "Event description or notes",
        ))
        .with_param(ParamSpec::optional(
            "event_id",
            ParamType::String,
            "Event ID for update and delete",
        ))
        .with_param(ParamSpec::optional(
            "start_date",
            ParamType::String,
            "Start date for listing events (YYYY-MM-DD)",
        ))
        .with_param(ParamSpec::optional(
            "end_date",
            ParamType::String,
            "End date for listing events (YYYY-MM-DD)",
        ))
    }

    /// Snapshot of every stored event.
    pub async fn events(&self) -> Vec<CalendarEvent> {
        self.events.lock().await.clone()
    }

    async fn create_event(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let title = text(params, "title").ok_or("Event title is required")?;
        let date = text(params, "date").ok_or("Event date is required")?;
        let time = text(params, "time").ok_or("Event time is required")?;
        let (date, time) = match (parse_date(date), parse_time(time)) {
            (Some(d), Some(t)) => (d, t),
            _ => return Err("Invalid date/time format. Use YYYY-MM-DD and HH:MM".into()),
        };
        let duration = duration(params)?.unwrap_or(DEFAULT_DURATION_MINUTES);

        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        let event = CalendarEvent {
            id,
            title: title.to_string(),
            date,
            time,
            duration,
            description: text(params, "description").unwrap_or_default().to_string(),
            created_at: Local::now().to_rfc3339(),
        };
        info!(id = %event.id, title = %event.title, "Created calendar event");

        let message = format!(
            "Event '{}' scheduled for {} at {} (Duration: {} minutes)",
            event.title,
            event.date.format(DATE_FORMAT),
            event.time.format(TIME_FORMAT),
            event.duration
        );
        let payload = json!({
            "action": "create_event",
            "event": event,
            "message": message,
        });
        self.events.lock().await.push(event);
        Ok(payload)
    }

    async fn list_events(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let start = match text(params, "start_date") {
            Some(raw) => parse_date(raw).ok_or("Invalid start_date. Use YYYY-MM-DD")?,
            None => (self.today)(),
        };
        let end = match text(params, "end_date") {
            Some(raw) => parse_date(raw).ok_or("Invalid end_date. Use YYYY-MM-DD")?,
            None => start + Duration::days(LIST_WINDOW_DAYS),
        };

        let mut events: Vec<CalendarEvent> = self
            .events
            .lock()
            .await
            .iter()
            .filter(|e| e.date >= start && e.date <= end)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.date, e.time));

        let range = format!("{} to {}", start.format(DATE_FORMAT), end.format(DATE_FORMAT));
        let message = if events.is_empty() {
            format!("No events scheduled from {range}")
        } else {
            let listed: Vec<String> = events.iter().map(CalendarEvent::summary).collect();
            format!(
                "{} event(s) from {range}: {}",
                events.len(),
                listed.join("; ")
            )
        };
        Ok(json!({
            "action": "list_events",
            "count": events.len(),
            "events": events,
            "date_range": range,
            "message": message,
        }))
    }

    async fn update_event(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let id = text(params, "event_id").ok_or("Event ID is required for updates")?;
        let title = text(params, "title");
        let date = text(params, "date")
            .map(|raw| parse_date(raw).ok_or("Invalid date. Use YYYY-MM-DD"))
            .transpose()?;
        let time = text(params, "time")
            .map(|raw| parse_time(raw).ok_or("Invalid time. Use HH:MM"))
            .transpose()?;
        let duration = duration(params)?;
        let description = text(params, "description");

        let mut events = self.events.lock().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| format!("Event with ID {id} not found"))?;
        if let Some(title) = title {
            event.title = title.to_string();
        }
        if let Some(date) = date {
            event.date = date;
        }
        if let Some(time) = time {
            event.time = time;
        }
        if let Some(duration) = duration {
            event.duration = duration;
        }
        if let Some(description) = description {
            event.description = description.to_string();
        }
        debug!(id, "Updated calendar event");

        Ok(json!({
            "action": "update_event",
            "event": event,
            "message": format!("Event '{}' updated successfully", event.title),
        }))
    }

    async fn delete_event(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let id = text(params, "event_id").ok_or("Event ID is required for deletion")?;
        let mut events = self.events.lock().await;
        let index = events
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| format!("Event with ID {id} not found"))?;
        let deleted = events.remove(index);
        info!(id, title = %deleted.title, "Deleted calendar event");

        Ok(json!({
            "action": "delete_event",
            "message": format!("Event '{}' deleted successfully", deleted.title),
            "deleted_event": deleted,
        }))
    }

    async fn find_free_time(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let date = match text(params, "date") {
            Some(raw) => parse_date(raw).ok_or("Invalid date. Use YYYY-MM-DD")?,
            None => (self.today)(),
        };
        let wanted = duration(params)?.unwrap_or(DEFAULT_DURATION_MINUTES);

        let mut day: Vec<(i64, i64)> = self
            .events
            .lock()
            .await
            .iter()
            .filter(|e| e.date == date)
            .map(|e| (e.start_minute(), e.end_minute()))
            .collect();
        day.sort_unstable();

        let slots = free_slots(&day, wanted);
        let date = date.format(DATE_FORMAT).to_string();
        let mut message = format!("Found {} free time slots on {date}", slots.len());
        if !slots.is_empty() {
            let listed: Vec<String> = slots
                .iter()
                .map(|s| format!("{} to {}", s.start_time, s.end_time))
                .collect();
            message.push_str(": ");
            message.push_str(&listed.join(", "));
        }
        Ok(json!({
            "action": "find_free_time",
            "date": date,
            "requested_duration": wanted,
            "free_slots": slots,
            "message": message,
        }))
    }
}

impl Default for CalendarScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for CalendarScheduler {
    async fn execute(&self, _name: &str, params: &Map<String, Value>) -> Result<Value, ToolError> {
        let action = params.get("action").and_then(Value::as_str).unwrap_or("");
        let outcome = match action {
            "create_event" => self.create_event(params).await,
            "list_events" => self.list_events(params).await,
            "update_event" => self.update_event(params).await,
            "delete_event" => self.delete_event(params).await,
            "find_free_time" => self.find_free_time(params).await,
            other => Err(format!("Unknown calendar action: {other}")),
        };
        Ok(outcome.unwrap_or_else(|message| json!({ "error": message })))
    }
}

/// Gaps of at least `wanted` minutes inside working hours, given events as
/// sorted `(start, end)` minute pairs.
fn free_slots(events: &[(i64, i64)], wanted: i64) -> Vec<FreeSlot> {
    let mut slots = Vec::new();
    let mut cursor = WORK_START;
    let mut push = |from: i64, to: i64| {
        if to - from >= wanted {
            slots.push(FreeSlot {
                start_time: clock(from),
                end_time: clock(to),
                duration_available: to - from,
            });
        }
    };

    for &(start, end) in events {
        if start > cursor {
            push(cursor, start.min(WORK_END));
        }
        cursor = cursor.max(end);
        if cursor >= WORK_END {
            break;
        }
    }
    if cursor < WORK_END {
        push(cursor, WORK_END);
    }
    slots
}

fn text<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn duration(params: &Map<String, Value>) -> Result<Option<i64>, String> {
    match params.get("duration").and_then(Value::as_i64) {
        Some(minutes) if minutes <= 0 => Err("Duration must be a positive number of minutes".into()),
        other => Ok(other),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT).ok()
}

fn minutes_of(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

fn clock(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
