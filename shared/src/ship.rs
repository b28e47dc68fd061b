//! Reference controlled actor
//!
//! A thrust-driven ship with a boost module. Integration is deterministic and
//! positions are snapped to the position grid after every step, so the same
//! move sequence yields bit-identical state on both ends of the connection.

use crate::actor::{ControlActor, SimulationMode};
use crate::bitstream::BitStream;
use crate::error::StreamError;
use crate::moves::Move;
use crate::position::Point;
use crate::replica::Ghost;

pub const SHIP_ACCELERATION: f32 = 900.0;
pub const SHIP_MAX_SPEED: f32 = 300.0;
pub const BOOST_MULTIPLIER: f32 = 1.75;
/// Milliseconds of boost a full tank holds
pub const MAX_ENERGY: u32 = 2000;

pub const MODULE_BOOST: usize = 0;
pub const MODULE_SHIELD: usize = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ship {
    position: Point,
    velocity: Point,
    angle: f32,
    energy: u32,
    current_move: Move,

    // Diagnostics, not part of the control state
    pub shots_fired: u32,
    pub moves_applied: u64,
    pub replays_completed: u32,
}

impl Ship {
    pub fn spawn(position: Point) -> Self {
        Self {
            position: position.snapped_to_grid(),
            energy: MAX_ENERGY,
            ..Self::default()
        }
    }

    pub fn velocity(&self) -> Point {
        self.velocity
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn energy(&self) -> u32 {
        self.energy
    }
}

impl ControlActor for Ship {
    fn write_control_state(&self, stream: &mut BitStream) {
        stream.write_f32(self.position.x);
        stream.write_f32(self.position.y);
        stream.write_f32(self.velocity.x);
        stream.write_f32(self.velocity.y);
        stream.write_f32(self.angle);
        stream.write_ranged_u32(self.energy, 0, MAX_ENERGY);
    }

    fn read_control_state(&mut self, stream: &mut BitStream) -> Result<(), StreamError> {
        self.position = Point::new(stream.read_f32()?, stream.read_f32()?);
        self.velocity = Point::new(stream.read_f32()?, stream.read_f32()?);
        self.angle = stream.read_f32()?;
        self.energy = stream.read_ranged_u32(0, MAX_ENERGY)?;
        Ok(())
    }

    fn apply_move(&mut self, mv: &Move) {
        self.current_move = *mv;
    }

    fn advance_simulation(&mut self, mode: SimulationMode) {
        let mv = self.current_move;
        let dt = mv.duration() as f32 / 1000.0;

        let boosting = mv.module(MODULE_BOOST) && self.energy > 0;
        let boost = if boosting { BOOST_MULTIPLIER } else { 1.0 };
        if boosting {
            self.energy = self.energy.saturating_sub(mv.duration());
        } else {
            self.energy = (self.energy + mv.duration() / 2).min(MAX_ENERGY);
        }

        let thrust = mv.thrust();
        self.velocity = self.velocity + thrust.scale(SHIP_ACCELERATION * boost * dt);
        let max_speed = SHIP_MAX_SPEED * boost;
        let speed = self.velocity.length();
        if speed > max_speed {
            self.velocity = self.velocity.scale(max_speed / speed);
        }

        self.position = (self.position + self.velocity.scale(dt)).snapped_to_grid();
        self.angle = mv.angle();

        // Replayed shots were already fired the first time round
        if mv.fire() && mode != SimulationMode::ClientReplay {
            self.shots_fired += 1;
        }
        self.moves_applied += 1;
    }

    fn position(&self) -> Point {
        self.position
    }

    fn current_move(&self) -> Move {
        self.current_move
    }

    fn on_replay_complete(&mut self) {
        self.replays_completed += 1;
    }
}

impl Ghost for Ship {
    fn set_ghost_position(&mut self, position: Point) {
        self.position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::drive;
    use assert_approx_eq::assert_approx_eq;

    fn thrust_right(duration: u32) -> Move {
        Move::new(Point::new(1.0, 0.0), 0.0, duration)
    }

    #[test]
    fn test_spawn_is_on_grid_with_full_tank() {
        let ship = Ship::spawn(Point::new(10.01, -3.99));
        assert_eq!(ship.position(), Point::new(10.0, -4.0));
        assert_eq!(ship.energy(), MAX_ENERGY);
        assert_eq!(ship.velocity(), Point::ZERO);
    }

    #[test]
    fn test_thrust_accelerates_and_moves() {
        let mut ship = Ship::spawn(Point::ZERO);
        drive(&mut ship, &thrust_right(100), SimulationMode::ClientPredict);

        assert_approx_eq!(ship.velocity().x, 90.0, 0.01);
        assert!(ship.position().x > 0.0);
        assert_eq!(ship.position().y, 0.0);
        assert_eq!(ship.moves_applied, 1);
    }

    #[test]
    fn test_speed_is_capped() {
        let mut ship = Ship::spawn(Point::ZERO);
        for _ in 0..20 {
            drive(&mut ship, &thrust_right(100), SimulationMode::ServerFromClient);
        }
        assert_approx_eq!(ship.velocity().length(), SHIP_MAX_SPEED, 0.01);
    }

    #[test]
    fn test_boost_drains_energy() {
        let mut ship = Ship::spawn(Point::ZERO);
        let boost = thrust_right(100).with_module(MODULE_BOOST, true);
        drive(&mut ship, &boost, SimulationMode::ClientPredict);
        assert_eq!(ship.energy(), MAX_ENERGY - 100);
        assert_approx_eq!(ship.velocity().x, 90.0 * BOOST_MULTIPLIER, 0.01);

        drive(&mut ship, &thrust_right(100), SimulationMode::ClientPredict);
        assert_eq!(ship.energy(), MAX_ENERGY - 50);
    }

    #[test]
    fn test_replay_does_not_refire() {
        let mut ship = Ship::spawn(Point::ZERO);
        let shot = Move::idle(16).with_fire(true);
        drive(&mut ship, &shot, SimulationMode::ClientPredict);
        drive(&mut ship, &shot, SimulationMode::ClientReplay);
        assert_eq!(ship.shots_fired, 1);
        assert_eq!(ship.moves_applied, 2);
    }

    #[test]
    fn test_same_moves_give_identical_state() {
        let moves = [
            thrust_right(16),
            Move::new(Point::new(0.3, -0.8), 1.2, 17).with_module(MODULE_BOOST, true),
            Move::new(Point::new(-1.0, 0.5), 2.5, 33),
        ];
        let mut a = Ship::spawn(Point::new(40.0, 40.0));
        let mut b = a.clone();
        for mv in &moves {
            drive(&mut a, mv, SimulationMode::ClientPredict);
            drive(&mut b, mv, SimulationMode::ServerFromClient);
        }
        assert_eq!(a.position(), b.position());
        assert_eq!(a.velocity(), b.velocity());
        assert_eq!(a.energy(), b.energy());
    }

    #[test]
    fn test_control_state_round_trip() {
        let mut ship = Ship::spawn(Point::new(-12.5, 300.0));
        drive(
            &mut ship,
            &Move::new(Point::new(0.2, 0.9), 0.7, 40),
            SimulationMode::ServerFromClient,
        );

        let mut stream = BitStream::new();
        ship.write_control_state(&mut stream);
        let mut copy = Ship::default();
        copy.read_control_state(&mut BitStream::from_bytes(stream.into_bytes()))
            .unwrap();

        assert_eq!(copy.position(), ship.position());
        assert_eq!(copy.velocity(), ship.velocity());
        assert_eq!(copy.angle(), ship.angle());
        assert_eq!(copy.energy(), ship.energy());
    }
}
