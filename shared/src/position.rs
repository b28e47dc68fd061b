//! Relative position compression
//!
//! Points near the controlled actor are sent as offsets inside the visible
//! window, quantized to the position grid. Anything the compact form cannot
//! carry bit-exactly (far jumps, off-grid coordinates, non-finite values)
//! falls back to two full-precision floats, so nothing is ever clamped.

use crate::bitstream::{bits_for_range, BitStream};
use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

pub const PLAYER_HORIZ_VIS_DISTANCE: u32 = 600;
pub const PLAYER_VERT_VIS_DISTANCE: u32 = 450;
pub const PLAYER_SCOPE_MARGIN: u32 = 150;

/// Grid steps per world unit. A power of two keeps grid arithmetic exact.
pub const POSITION_GRID_STEPS: u32 = 16;

const HALF_WINDOW_X: u32 = (PLAYER_HORIZ_VIS_DISTANCE + PLAYER_SCOPE_MARGIN) * POSITION_GRID_STEPS;
const HALF_WINDOW_Y: u32 = (PLAYER_VERT_VIS_DISTANCE + PLAYER_SCOPE_MARGIN) * POSITION_GRID_STEPS;
const MAX_STEPS_X: u32 = HALF_WINDOW_X * 2;
const MAX_STEPS_Y: u32 = HALF_WINDOW_Y * 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn scale(self, factor: f32) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }

    /// Rounds both axes to the nearest position grid step
    pub fn snapped_to_grid(self) -> Point {
        let steps = POSITION_GRID_STEPS as f32;
        Point::new(
            (self.x * steps).round() / steps,
            (self.y * steps).round() / steps,
        )
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Bits spent by the compact branch, flag included
pub fn compact_point_bits() -> u32 {
    1 + bits_for_range(MAX_STEPS_X) + bits_for_range(MAX_STEPS_Y)
}

fn axis_from_steps(reference: f32, steps: u32, half_window: u32) -> f32 {
    reference + (steps as f32 - half_window as f32) / POSITION_GRID_STEPS as f32
}

fn axis_to_steps(value: f32, reference: f32, half_window: u32, max_steps: u32) -> Option<u32> {
    let steps = ((value - reference) * POSITION_GRID_STEPS as f32).round() + half_window as f32;
    if !(steps >= 0.0 && steps <= max_steps as f32) {
        return None;
    }
    let steps = steps as u32;
    // Only take the compact form if it reconstructs the exact same bits
    if axis_from_steps(reference, steps, half_window).to_bits() != value.to_bits() {
        return None;
    }
    Some(steps)
}

pub fn encode_point(point: Point, reference: Point, relative: bool, stream: &mut BitStream) {
    if relative {
        let compact = axis_to_steps(point.x, reference.x, HALF_WINDOW_X, MAX_STEPS_X)
            .zip(axis_to_steps(point.y, reference.y, HALF_WINDOW_Y, MAX_STEPS_Y));

        if stream.write_flag(compact.is_some()) {
            if let Some((dx, dy)) = compact {
                stream.write_ranged_u32(dx, 0, MAX_STEPS_X);
                stream.write_ranged_u32(dy, 0, MAX_STEPS_Y);
            }
            return;
        }
    }

    stream.write_f32(point.x);
    stream.write_f32(point.y);
}

pub fn decode_point(
    reference: Point,
    relative: bool,
    stream: &mut BitStream,
) -> Result<Point, StreamError> {
    if relative && stream.read_flag()? {
        let dx = stream.read_ranged_u32(0, MAX_STEPS_X)?;
        let dy = stream.read_ranged_u32(0, MAX_STEPS_Y)?;
        return Ok(Point::new(
            axis_from_steps(reference.x, dx, HALF_WINDOW_X),
            axis_from_steps(reference.y, dy, HALF_WINDOW_Y),
        ));
    }

    Ok(Point::new(stream.read_f32()?, stream.read_f32()?))
}

/// Reference position plus the per-packet relative mode, owned by one session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointCompressor {
    pub reference: Point,
    pub relative: bool,
}

impl PointCompressor {
    pub fn write_point(&self, stream: &mut BitStream, point: Point) {
        encode_point(point, self.reference, self.relative, stream);
    }

    pub fn read_point(&self, stream: &mut BitStream) -> Result<Point, StreamError> {
        decode_point(self.reference, self.relative, stream)
    }
}
