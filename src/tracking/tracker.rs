//! Presence tracker.
//!
//! Learns a resting distance (baseline) per sensor, then reports a person
//! wherever a sensor sees something stable and clearly closer than its
//! baseline. Also derives the reference position from opposing sensors on
//! every reading.
//!
//! ```text
//! Uninitialized ──first reading──▶ Calibrating ──all baselines / timeout──▶ Operational
//! ```
//!
//! Several occupied sensors collapse to one averaged position; the system
//! steers for a single listener.

use crate::config::{Config, TrackingConfig};
use crate::geometry::{Point, Room};
use crate::sensor::frame::{SENSOR_COUNT, SensorId, SensorReading};
use crate::tracking::clock::{Clock, SystemClock};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Uninitialized,
    Calibrating,
    Operational,
}

/// Result of feeding one reading to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingUpdate {
    /// At most one aggregate position.
    pub people: Vec<Point>,
    pub reference: Point,
    pub occupied: [bool; SENSOR_COUNT],
    pub state: TrackerState,
}

pub struct PresenceTracker<C: Clock = SystemClock> {
    room: Room,
    config: TrackingConfig,
    clock: C,
    state: TrackerState,
    history: [VecDeque<f64>; SENSOR_COUNT],
    baselines: [Option<f64>; SENSOR_COUNT],
    calibration_started: Option<Instant>,
    reference: Point,
}

impl PresenceTracker<SystemClock> {
    pub fn new(room: Room, config: TrackingConfig) -> Self {
        Self::with_clock(room, config, SystemClock)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Room::from_config(&config.room), config.tracking.clone())
    }
}

impl<C: Clock> PresenceTracker<C> {
    pub fn with_clock(room: Room, config: TrackingConfig, clock: C) -> Self {
        let depth = config.history_length.max(2);
        Self {
            room,
            config,
            clock,
            state: TrackerState::Uninitialized,
            history: std::array::from_fn(|_| VecDeque::with_capacity(depth)),
            baselines: [None; SENSOR_COUNT],
            calibration_started: None,
            reference: room.center(),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn baselines(&self) -> [Option<f64>; SENSOR_COUNT] {
        self.baselines
    }

    pub fn reference(&self) -> Point {
        self.reference
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Feed one reading; returns the people and reference for this cycle.
    pub fn update(&mut self, reading: &SensorReading) -> TrackingUpdate {
        self.record(reading);
        self.reference = self.compute_reference(reading);

        if self.state == TrackerState::Uninitialized {
            self.state = TrackerState::Calibrating;
            self.calibration_started = Some(self.clock.now());
        }
        if self.state == TrackerState::Calibrating {
            self.calibrate();
        }

        let mut occupied = [false; SENSOR_COUNT];
        let people = if self.state == TrackerState::Operational {
            self.detect(reading, &mut occupied)
        } else {
            Vec::new()
        };

        TrackingUpdate {
            people,
            reference: self.reference,
            occupied,
            state: self.state,
        }
    }

    fn depth(&self) -> usize {
        self.config.history_length.max(2)
    }

    fn record(&mut self, reading: &SensorReading) {
        let depth = self.depth();
        let max = self.room.max_distance;
        for (history, distance) in self.history.iter_mut().zip(reading.distances) {
            // No echo means nothing closer than the sensor's range.
            history.push_back(distance.unwrap_or(max));
            while history.len() > depth {
                history.pop_front();
            }
        }
    }

    fn is_full(&self, sensor: SensorId) -> bool {
        self.history[sensor.index()].len() >= self.depth()
    }

    fn calibrate(&mut self) {
        for sensor in SensorId::ALL {
            let i = sensor.index();
            if self.baselines[i].is_some() || !self.is_full(sensor) {
                continue;
            }
            let window = &self.history[i];
            let Some(&first) = window.front() else {
                continue;
            };
            if window.iter().all(|v| (v - first).abs() <= self.config.tolerance) {
                self.baselines[i] = Some(first);
                tracing::info!(
                    target: "sweetspot::tracking",
                    "Baseline for {} sensor: {:.1} cm",
                    sensor.name(),
                    first
                );
            }
        }

        let all_set = self.baselines.iter().all(Option::is_some);
        let timed_out = self.calibration_started.is_some_and(|started| {
            self.clock.now().duration_since(started)
                >= Duration::from_millis(self.config.calibration_timeout_ms)
        });

        if all_set || timed_out {
            for sensor in SensorId::ALL {
                let baseline = &mut self.baselines[sensor.index()];
                if baseline.is_none() {
                    tracing::warn!(
                        target: "sweetspot::tracking",
                        "Calibration timed out for {} sensor, using {:.0} cm",
                        sensor.name(),
                        self.room.max_distance
                    );
                    *baseline = Some(self.room.max_distance);
                }
            }
            self.state = TrackerState::Operational;
        }
    }

    fn detect(&self, reading: &SensorReading, occupied: &mut [bool; SENSOR_COUNT]) -> Vec<Point> {
        let mut candidates = Vec::with_capacity(SENSOR_COUNT);

        for sensor in SensorId::ALL {
            let i = sensor.index();
            if !self.is_full(sensor) {
                continue;
            }
            let (Some(baseline), Some(&current)) = (self.baselines[i], self.history[i].back())
            else {
                continue;
            };
            let previous = self.history[i]
                .iter()
                .rev()
                .nth(1)
                .copied()
                .unwrap_or(current);

            if baseline - current > self.config.min_change
                && (previous - current).abs() <= self.config.tolerance
            {
                occupied[i] = true;
                let position = sensor.locate(current, &self.room);
                tracing::debug!(
                    target: "sweetspot::tracking",
                    "Person at {} sensor: ({:.1}, {:.1}) cm",
                    sensor.name(),
                    position.x,
                    position.y
                );
                candidates.push(position);
            }
        }

        if !reading.positions.is_empty() {
            candidates = reading
                .positions
                .iter()
                .map(|&p| self.room.clamp(p))
                .collect();
        }

        Point::centroid(&candidates)
            .map(|p| vec![self.room.clamp(p)])
            .unwrap_or_default()
    }

    /// x from the left sensor (or mirrored right), y from the front sensor
    /// (or mirrored back). An axis with no valid pair keeps its last value.
    fn compute_reference(&self, reading: &SensorReading) -> Point {
        let room = &self.room;
        let x = reading
            .distance(SensorId::Left)
            .or_else(|| reading.distance(SensorId::Right).map(|d| room.width - d))
            .map(|x| room.clamp_x(x))
            .unwrap_or(self.reference.x);
        let y = reading
            .distance(SensorId::Front)
            .or_else(|| reading.distance(SensorId::Back).map(|d| room.height - d))
            .map(|y| room.clamp_y(y))
            .unwrap_or(self.reference.y);
        Point::new(x, y)
    }
}
