//! Execution Timeline
//!
//! Records step start/end events for a run, for timing reports and
//! an ASCII Gantt chart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::workflow::step::Scope;

/// Type of timeline event.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Step started executing
    Started,
    /// Step produced a value
    Completed,
    /// Step exhausted its attempts
    Failed,
    /// Step failed but its fallback succeeded
    Recovered,
    /// Step was never started (cancellation)
    Skipped,
}

impl EventType {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            EventType::Completed | EventType::Failed | EventType::Recovered
        )
    }
}

/// A single event in the execution timeline.
#[derive(Serialize, Debug, Clone)]
pub struct TimelineEvent {
    /// Step name
    pub step: String,
    pub scope: Scope,
    pub event_type: EventType,
    /// Attempts made, for terminal events
    pub attempts: u32,
    /// Wall-clock time of the event
    pub at: DateTime<Utc>,
    /// Offset from the start of the run
    pub elapsed: Duration,
}

/// Tracks the execution timeline of a run.
#[derive(Serialize, Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    started_at: DateTime<Utc>,
    #[serde(skip)]
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            started_at: Utc::now(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    pub fn add_event(&mut self, step: impl Into<String>, scope: Scope, event_type: EventType) {
        self.add_event_with_attempts(step, scope, event_type, 0);
    }

    pub fn add_event_with_attempts(
        &mut self,
        step: impl Into<String>,
        scope: Scope,
        event_type: EventType,
        attempts: u32,
    ) {
        self.events.push(TimelineEvent {
            step: step.into(),
            scope,
            event_type,
            attempts,
            at: Utc::now(),
            elapsed: self.start_time.elapsed(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Names of steps that started in `scope`, in start order.
    pub fn started_in(&self, scope: Scope) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.scope == scope && e.event_type == EventType::Started)
            .map(|e| e.step.as_str())
            .collect()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generates an ASCII Gantt chart representation.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        // Names are only unique within a scope.
        let mut step_times: HashMap<(Scope, &str), (u128, u128)> = HashMap::new();
        for event in &self.events {
            let key = (event.scope, event.step.as_str());
            let elapsed = event.elapsed.as_millis();
            if event.event_type == EventType::Started {
                step_times.entry(key).or_insert((elapsed, 0)).0 = elapsed;
            } else if event.event_type.is_terminal() {
                if let Some(times) = step_times.get_mut(&key) {
                    times.1 = elapsed;
                }
            }
        }

        let mut sorted_steps: Vec<_> = step_times.into_iter().collect();
        sorted_steps.sort_by_key(|(_, (start, _))| *start);

        for ((scope, step), (start, end)) in sorted_steps {
            if end < start {
                continue;
            }
            let start_pos = (start as f64 * scale) as usize;
            let duration = ((end - start) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(duration));

            output.push_str(&format!(
                "{:6} {:12} |{}| ({} ms)\n",
                scope.to_string(),
                truncate(step, 12),
                bar,
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns step durations keyed by scope and step name.
    pub fn get_durations(&self) -> HashMap<(Scope, String), Duration> {
        let mut starts: HashMap<(Scope, &str), Duration> = HashMap::new();
        let mut durations = HashMap::new();

        for event in &self.events {
            let key = (event.scope, event.step.as_str());
            if event.event_type == EventType::Started {
                starts.insert(key, event.elapsed);
            } else if event.event_type.is_terminal() {
                if let Some(start) = starts.get(&key) {
                    durations.insert(
                        (event.scope, event.step.clone()),
                        event.elapsed.saturating_sub(*start),
                    );
                }
            }
        }

        durations
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a step name to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
