//! Scripted input: turns elapsed time into moves
//!
//! There is no window or keyboard here; an autopilot pattern stands in for
//! the player so the protocol can be exercised headless.

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::moves::{Move, MAX_MOVE_DURATION_MS};
use shared::position::Point;
use shared::ship::{MODULE_BOOST, MODULE_SHIELD};
use std::f32::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Pattern {
    /// No thrust at all
    Idle,
    /// Thrust steadily turning through a full circle every four seconds
    Circle,
    /// Alternate left and right every second, firing on each switch
    Zigzag,
    /// Random thrust, boost and shots, changing every half second
    Random,
}

/// Produces one move per sample, covering the time since the last sample
pub struct InputManager {
    pattern: Pattern,
    elapsed_ms: u64,
    rng: StdRng,
    held: Move,
    next_change_ms: u64,
}

impl InputManager {
    pub fn new(pattern: Pattern) -> Self {
        Self::with_seed(pattern, rand::random())
    }

    pub fn with_seed(pattern: Pattern, seed: u64) -> Self {
        Self {
            pattern,
            elapsed_ms: 0,
            rng: StdRng::seed_from_u64(seed),
            held: Move::default(),
            next_change_ms: 0,
        }
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Samples the pattern for a frame of `duration_ms`
    pub fn sample(&mut self, duration_ms: u32) -> Move {
        let duration = duration_ms.clamp(1, MAX_MOVE_DURATION_MS);
        let t = self.elapsed_ms;
        self.elapsed_ms += duration as u64;

        match self.pattern {
            Pattern::Idle => Move::idle(duration),
            Pattern::Circle => {
                let angle = (t % 4000) as f32 / 4000.0 * TAU;
                Move::new(Point::new(angle.cos(), angle.sin()), angle, duration)
            }
            Pattern::Zigzag => {
                let second = t / 1000;
                let direction = if second % 2 == 0 { 1.0 } else { -1.0 };
                let switched = t % 1000 < duration as u64;
                Move::new(Point::new(direction, 0.0), 0.0, duration).with_fire(switched)
            }
            Pattern::Random => {
                if t >= self.next_change_ms {
                    self.next_change_ms = t + 500;
                    let thrust = Point::new(self.rng.gen_range(-1.0..=1.0), self.rng.gen_range(-1.0..=1.0));
                    self.held = Move::new(thrust, self.rng.gen_range(0.0..TAU), duration)
                        .with_fire(self.rng.gen_bool(0.3))
                        .with_module(MODULE_BOOST, self.rng.gen_bool(0.2))
                        .with_module(MODULE_SHIELD, self.rng.gen_bool(0.1));
                }
                self.held.with_duration(duration)
            }
        }
    }
}
