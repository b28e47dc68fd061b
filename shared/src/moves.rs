//! Input frames and their delta encoding

use crate::bitstream::BitStream;
use crate::error::StreamError;
use crate::position::Point;
use std::f32::consts::TAU;

pub const MODULE_COUNT: usize = 2;
pub const MAX_MOVE_DURATION_MS: u32 = 127;

const THRUST_STEPS: i32 = 127;
const ANGLE_BITS: u32 = 12;
const ANGLE_STEPS: u32 = 1 << ANGLE_BITS;
const BUTTON_BITS: u32 = 1 + MODULE_COUNT as u32;

fn quantize_thrust(value: f32) -> i32 {
    (value.clamp(-1.0, 1.0) * THRUST_STEPS as f32).round() as i32
}

fn dequantize_thrust(steps: i32) -> f32 {
    steps as f32 / THRUST_STEPS as f32
}

fn quantize_angle(angle: f32) -> u32 {
    ((angle.rem_euclid(TAU) / TAU) * ANGLE_STEPS as f32).round() as u32 % ANGLE_STEPS
}

fn dequantize_angle(steps: u32) -> f32 {
    steps as f32 * TAU / ANGLE_STEPS as f32
}

/// One input sample covering `duration` milliseconds.
///
/// Every constructor quantizes to wire precision, so the copy a client applies
/// locally is identical to the copy the server decodes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Move {
    thrust: Point,
    angle: f32,
    fire: bool,
    modules: [bool; MODULE_COUNT],
    duration: u32,
}

impl Move {
    pub fn new(thrust: Point, angle: f32, duration: u32) -> Self {
        Self {
            thrust: Point::new(
                dequantize_thrust(quantize_thrust(thrust.x)),
                dequantize_thrust(quantize_thrust(thrust.y)),
            ),
            angle: dequantize_angle(quantize_angle(angle)),
            fire: false,
            modules: [false; MODULE_COUNT],
            duration: duration.min(MAX_MOVE_DURATION_MS),
        }
    }

    /// Idle input with only a duration
    pub fn idle(duration: u32) -> Self {
        Self::new(Point::ZERO, 0.0, duration)
    }

    pub fn with_fire(mut self, fire: bool) -> Self {
        self.fire = fire;
        self
    }

    pub fn with_module(mut self, module: usize, active: bool) -> Self {
        if let Some(slot) = self.modules.get_mut(module) {
            *slot = active;
        }
        self
    }

    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = duration.min(MAX_MOVE_DURATION_MS);
        self
    }

    pub fn thrust(&self) -> Point {
        self.thrust
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn fire(&self) -> bool {
        self.fire
    }

    pub fn module(&self, module: usize) -> bool {
        self.modules.get(module).copied().unwrap_or(false)
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    fn button_bits(&self) -> u32 {
        let mut bits = self.fire as u32;
        for (i, active) in self.modules.iter().enumerate() {
            bits |= (*active as u32) << (i + 1);
        }
        bits
    }

    fn set_button_bits(&mut self, bits: u32) {
        self.fire = bits & 1 != 0;
        for (i, active) in self.modules.iter_mut().enumerate() {
            *active = bits & (1 << (i + 1)) != 0;
        }
    }

    /// Writes only the field groups that differ from `prev`
    pub fn pack(&self, stream: &mut BitStream, prev: &Move) {
        if stream.write_flag(self.thrust != prev.thrust) {
            let range = (THRUST_STEPS * 2) as u32;
            stream.write_ranged_u32((quantize_thrust(self.thrust.x) + THRUST_STEPS) as u32, 0, range);
            stream.write_ranged_u32((quantize_thrust(self.thrust.y) + THRUST_STEPS) as u32, 0, range);
        }
        if stream.write_flag(self.angle != prev.angle) {
            stream.write_int(quantize_angle(self.angle), ANGLE_BITS);
        }
        if stream.write_flag(self.button_bits() != prev.button_bits()) {
            stream.write_int(self.button_bits(), BUTTON_BITS);
        }
        if stream.write_flag(self.duration != prev.duration) {
            stream.write_ranged_u32(self.duration, 0, MAX_MOVE_DURATION_MS);
        }
    }

    pub fn unpack(stream: &mut BitStream, prev: &Move) -> Result<Move, StreamError> {
        let mut mv = *prev;
        if stream.read_flag()? {
            let range = (THRUST_STEPS * 2) as u32;
            let x = stream.read_ranged_u32(0, range)? as i32 - THRUST_STEPS;
            let y = stream.read_ranged_u32(0, range)? as i32 - THRUST_STEPS;
            mv.thrust = Point::new(dequantize_thrust(x), dequantize_thrust(y));
        }
        if stream.read_flag()? {
            mv.angle = dequantize_angle(stream.read_int(ANGLE_BITS)?);
        }
        if stream.read_flag()? {
            mv.set_button_bits(stream.read_int(BUTTON_BITS)?);
        }
        if stream.read_flag()? {
            mv.duration = stream.read_ranged_u32(0, MAX_MOVE_DURATION_MS)?;
        }
        Ok(mv)
    }
}
