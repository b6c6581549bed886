//! Weather checker tool.
//!
//! A placeholder service: readings are synthesized from the location name,
//! so the same question always gets the same answer and no network access
//! is needed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use serde_json::{Map, Value, json};
use tracing::debug;
use voxturn_core::error::ToolError;
use voxturn_core::tools::ToolExecutor;
use voxturn_core::types::{ParamSpec, ParamType, ToolDescriptor};

pub const NAME: &str = "weather_checker";

const ACTIONS: [&str; 3] = ["current", "forecast", "hourly"];
const DEFAULT_DAYS: i64 = 3;
const MAX_DAYS: i64 = 7;

const CONDITIONS: [&str; 7] = [
    "sunny",
    "cloudy",
    "rainy",
    "partly cloudy",
    "thunderstorm",
    "snow",
    "fog",
];

type Today = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct WeatherChecker {
    today: Today,
}

impl WeatherChecker {
    pub fn new() -> Self {
        Self {
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Pin the first forecast day.
    pub fn with_today(mut self, date: NaiveDate) -> Self {
        self.today = Arc::new(move || date);
        self
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Get current weather information and forecasts for specified locations",
        )
        .with_param(ParamSpec::required(
            "location",
            ParamType::String,
            "City name or location (e.g., 'New York', 'London', 'Tokyo')",
        ))
        .with_param(
            ParamSpec::optional(
                "action",
                ParamType::String,
                "Type of weather information to get",
            )
            .with_allowed(ACTIONS)
            .with_default("current"),
        )
        .with_param(
            ParamSpec::optional(
                "days",
                ParamType::Integer,
                "Number of days for forecast (1-7)",
            )
            .with_default(DEFAULT_DAYS),
        )
    }

    fn current(&self, location: &str) -> Value {
        let reading = Reading::new(location, 0);
        json!({
            "action": "current",
            "data": {
                "location": location,
                "temperature": reading.temperature,
                "condition": reading.condition,
                "humidity": reading.humidity,
                "wind_speed": reading.wind_speed,
                "feels_like": reading.temperature - reading.wind_speed / 10,
            },
            "summary": format!(
                "Current weather in {location}: {}°C, {}, humidity {}%, wind {} km/h",
                reading.temperature, reading.condition, reading.humidity, reading.wind_speed
            ),
        })
    }

    fn forecast(&self, location: &str, days: i64) -> Value {
        let days = days.clamp(1, MAX_DAYS);
        let today = (self.today)();
        let mut data = Vec::new();
        let mut spoken = Vec::new();
        for day in 0..days {
            let reading = Reading::new(location, 100 + day as u64);
            let date = (today + Duration::days(day)).format("%Y-%m-%d").to_string();
            let low = reading.temperature - 4 - (reading.humidity % 6);
            spoken.push(format!(
                "{date} {}, {low} to {}°C",
                reading.condition, reading.temperature
            ));
            data.push(json!({
                "day": day + 1,
                "date": date,
                "high_temp": reading.temperature,
                "low_temp": low,
                "condition": reading.condition,
                "precipitation_chance": reading.precipitation,
            }));
        }
        json!({
            "action": "forecast",
            "location": location,
            "days": days,
            "data": data,
            "summary": format!("{days}-day forecast for {location}: {}", spoken.join("; ")),
        })
    }

    fn hourly(&self, location: &str) -> Value {
        let readings: Vec<Reading> = (0..24).map(|h| Reading::new(location, 200 + h)).collect();
        let data: Vec<Value> = readings
            .iter()
            .enumerate()
            .map(|(hour, r)| {
                json!({
                    "hour": format!("{hour:02}:00"),
                    "temperature": r.temperature,
                    "condition": r.condition,
                    "precipitation_chance": r.precipitation,
                })
            })
            .collect();
        let low = readings.iter().map(|r| r.temperature).min().unwrap_or_default();
        let high = readings.iter().map(|r| r.temperature).max().unwrap_or_default();
        json!({
            "action": "hourly",
            "location": location,
            "data": data,
            "summary": format!(
                "24-hour forecast for {location}: between {low} and {high}°C, starting {}",
                readings[0].condition
            ),
        })
    }
}

impl Default for WeatherChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for WeatherChecker {
    async fn execute(&self, _name: &str, params: &Map<String, Value>) -> Result<Value, ToolError> {
        let location = params
            .get("location")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if location.is_empty() {
            return Ok(json!({ "error": "Location is required" }));
        }
        let action = params
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("current");
        debug!(location, action, "Weather lookup");

        Ok(match action {
            "current" => self.current(location),
            "forecast" => {
                let days = params
                    .get("days")
                    .and_then(Value::as_i64)
                    .unwrap_or(DEFAULT_DAYS);
                self.forecast(location, days)
            }
            "hourly" => self.hourly(location),
            other => json!({ "error": format!("Unknown weather action: {other}") }),
        })
    }
}

/// One synthesized observation.
struct Reading {
    temperature: i64,
    condition: &'static str,
    humidity: i64,
    wind_speed: i64,
    precipitation: i64,
}

impl Reading {
    fn new(location: &str, slot: u64) -> Self {
        let seed = fnv1a(&location.to_lowercase()) ^ slot.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let mut state = seed;
        let mut next = |range: u64| {
            state = splitmix64(state);
            (state % range) as i64
        };
        Self {
            temperature: next(50) - 10,
            condition: CONDITIONS[next(CONDITIONS.len() as u64) as usize],
            humidity: 20 + next(80),
            wind_speed: next(30),
            precipitation: next(101),
        }
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
