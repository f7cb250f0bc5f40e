//! Gravity-rotating cube physics shared by the server simulation and the
//! client-side mirror.
//!
//! A cube always falls towards one of four cardinal directions. Landing on
//! a platform turns gravity so that it pulls into the surface that was hit,
//! which lets a cube run along floors, walls and ceilings alike. Jumping
//! pushes the cube away from the current surface; if it sails past the
//! computed rotation point without touching anything, gravity flips around.
//!
//! Each tick velocity is integrated first, then the X axis is moved and
//! resolved completely before the Y axis is attempted. That ordering decides
//! the outcome of diagonal corner hits and must not be changed.

use crate::color::Color;
use crate::level::{Block, GridIndex, Level};
use crate::vector::{sign, Vector2D};
use crate::{ACCELERATION, BLOCK_WIDTH, CUBE_SIZE, MAX_VELOCITY, VELOCITY};

/// Direction gravity pulls in, measured clockwise from "down".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gravity {
    Down,
    Right,
    Up,
    Left,
}

impl Gravity {
    pub fn degrees(self) -> u16 {
        match self {
            Gravity::Down => 0,
            Gravity::Right => 90,
            Gravity::Up => 180,
            Gravity::Left => 270,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Gravity> {
        match degrees % 360 {
            0 => Some(Gravity::Down),
            90 => Some(Gravity::Right),
            180 => Some(Gravity::Up),
            270 => Some(Gravity::Left),
            _ => None,
        }
    }

    /// `(sin θ, cos θ)` with exact zeros.
    pub fn unit(self) -> Vector2D {
        match self {
            Gravity::Down => Vector2D::new(0.0, 1.0),
            Gravity::Right => Vector2D::new(1.0, 0.0),
            Gravity::Up => Vector2D::new(0.0, -1.0),
            Gravity::Left => Vector2D::new(-1.0, 0.0),
        }
    }

    /// Recovers the direction of an acceleration vector.
    pub fn from_vector(v: Vector2D) -> Option<Gravity> {
        match (sign(v.x) as i8, sign(v.y) as i8) {
            (0, 1) => Some(Gravity::Down),
            (1, 0) => Some(Gravity::Right),
            (0, -1) => Some(Gravity::Up),
            (-1, 0) => Some(Gravity::Left),
            _ => None,
        }
    }

    pub fn flipped(self) -> Gravity {
        match self {
            Gravity::Down => Gravity::Up,
            Gravity::Up => Gravity::Down,
            Gravity::Right => Gravity::Left,
            Gravity::Left => Gravity::Right,
        }
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Gravity::Down | Gravity::Up)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn of(self, v: Vector2D) -> f64 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
        }
    }

    fn set(self, v: &mut Vector2D, value: f64) {
        match self {
            Axis::X => v.x = value,
            Axis::Y => v.y = value,
        }
    }

    /// Gravity pulling into a surface hit while moving along this axis.
    fn surface_gravity(self, moving_positive: bool) -> Gravity {
        match (self, moving_positive) {
            (Axis::X, true) => Gravity::Right,
            (Axis::X, false) => Gravity::Left,
            (Axis::Y, true) => Gravity::Down,
            (Axis::Y, false) => Gravity::Up,
        }
    }
}

/// Physics constants of a cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeConfig {
    /// Edge length in pixels.
    pub size: i32,
    /// Speed along the surface the cube is running on.
    pub velocity: f64,
    /// Jump impulse.
    pub max_velocity: f64,
    /// Gravity strength.
    pub acceleration: f64,
    pub block_width: i32,
}

impl Default for CubeConfig {
    fn default() -> Self {
        CubeConfig {
            size: CUBE_SIZE,
            velocity: VELOCITY,
            max_velocity: MAX_VELOCITY,
            acceleration: ACCELERATION,
            block_width: BLOCK_WIDTH,
        }
    }
}

/// Variant behaviour plugged into [`Cube::step`].
///
/// The server turns these into match events; mirrors on the client can
/// ignore them.
pub trait CubeHooks {
    fn on_death(&mut self, _cube: &Cube) {}

    fn on_coin_collision(&mut self, _cell: GridIndex) {}

    fn on_goal_reached(&mut self, _cell: GridIndex) {}
}

/// Hooks that do nothing.
pub struct NoHooks;

impl CubeHooks for NoHooks {}

#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    pub position: Vector2D,
    pub velocity: Vector2D,
    acceleration: Vector2D,
    gravity: Gravity,
    pub jumping: bool,
    pub can_rotate: bool,
    pub rotation_point: Option<Vector2D>,
    pub landed_on_color: Option<Color>,
    /// Colour of the owning player; only platforms of this colour allow jumping.
    pub color: Color,
    pub dead: bool,
    config: CubeConfig,
}

impl Cube {
    /// A resting cube with gravity pointing down.
    pub fn new(position: Vector2D, color: Color, config: CubeConfig) -> Self {
        Cube {
            position,
            velocity: Vector2D::ZERO,
            acceleration: Gravity::Down.unit() * config.acceleration,
            gravity: Gravity::Down,
            jumping: false,
            can_rotate: false,
            rotation_point: None,
            landed_on_color: None,
            color,
            dead: false,
            config,
        }
    }

    /// A cube placed at `position` already running to the right.
    pub fn spawned(position: Vector2D, color: Color, config: CubeConfig) -> Self {
        let mut cube = Cube::new(position, color, config);
        cube.velocity = Vector2D::new(config.velocity, 0.0);
        cube
    }

    /// Puts the cube back at `position` in its freshly spawned state.
    pub fn respawn(&mut self, position: Vector2D) {
        *self = Cube::spawned(position, self.color, self.config);
    }

    pub fn acceleration(&self) -> Vector2D {
        self.acceleration
    }

    pub fn gravity(&self) -> Gravity {
        self.gravity
    }

    pub fn config(&self) -> &CubeConfig {
        &self.config
    }

    pub fn size(&self) -> f64 {
        self.config.size as f64
    }

    /// Turns gravity without touching velocity; used mid-air.
    pub fn rotate_acceleration(&mut self, gravity: Gravity) {
        self.gravity = gravity;
        self.acceleration = gravity.unit() * self.config.acceleration;
    }

    /// Turns gravity and, unless the turn is a multiple of 180°, snaps the
    /// velocity to run along the new surface.
    ///
    /// The snapped velocity is `sign(-a_old) * velocity` per axis, where
    /// `a_old` is the acceleration before the turn.
    pub fn set_acceleration_angle(&mut self, gravity: Gravity) {
        let old = self.acceleration;
        let delta = (self.gravity.degrees() as i32 - gravity.degrees() as i32).rem_euclid(180);
        self.rotate_acceleration(gravity);
        if delta != 0 {
            let speed = self.config.velocity;
            self.velocity = Vector2D::new(sign(-old.x) * speed, sign(-old.y) * speed);
        }
    }

    pub fn can_jump(&self) -> bool {
        !self.dead && !self.jumping && self.landed_on_color == Some(self.color)
    }

    /// Jumps if standing on a platform of the cube's own colour.
    pub fn try_jump(&mut self) -> bool {
        if !self.can_jump() {
            return false;
        }
        self.jump();
        true
    }

    /// Leaves the current surface.
    ///
    /// The rotation point lies half a velocity step ahead and one block
    /// further along gravity; passing it in the air flips gravity.
    pub fn jump(&mut self) {
        let bw = self.config.block_width as f64;
        let offset = self.acceleration.signum() * bw;
        self.rotation_point = Some(self.position + self.velocity * 0.5 + offset);
        self.velocity = self.velocity - self.gravity.unit() * self.config.max_velocity;
        self.jumping = true;
        self.can_rotate = true;
    }

    /// Advances the cube by `dt` seconds against `level`.
    pub fn step(&mut self, level: &Level, dt: f64, hooks: &mut dyn CubeHooks) {
        if self.dead {
            return;
        }
        self.pin_velocity();
        self.velocity = self.velocity + self.acceleration * dt;

        self.position.x += self.velocity.x * dt;
        self.resolve(level, Axis::X, hooks);
        if self.dead {
            return;
        }

        self.position.y += self.velocity.y * dt;
        self.resolve(level, Axis::Y, hooks);
        if self.dead {
            return;
        }

        if self.is_out_of_world(level) {
            self.die(hooks);
            return;
        }
        self.check_triggers(level, hooks);
        self.check_rotation();
    }

    /// Keeps the surface-parallel speed at the configured constant while grounded.
    fn pin_velocity(&mut self) {
        if self.jumping {
            return;
        }
        let speed = self.config.velocity;
        if self.gravity.is_vertical() {
            self.velocity.x = sign(self.velocity.x) * speed;
        } else {
            self.velocity.y = sign(self.velocity.y) * speed;
        }
    }

    fn resolve(&mut self, level: &Level, axis: Axis, hooks: &mut dyn CubeHooks) {
        let candidates = level.neighbour_blocks(self.position.x, self.position.y);
        for block in candidates.iter().flatten() {
            let moving = axis.of(self.velocity);
            if moving == 0.0 {
                return;
            }
            if !self.intersects(block)
                || !self.is_leading(block, axis, moving)
                || self.is_edge_collision(block, axis)
            {
                continue;
            }

            let face = axis.of(Vector2D::new(block.x(), block.y()));
            let resolved = if moving > 0.0 {
                face - self.size()
            } else {
                face + block.extent()
            };
            axis.set(&mut self.position, resolved);
            axis.set(&mut self.velocity, 0.0);

            if block.is_lethal() {
                self.die(hooks);
                return;
            }
            self.land(block, axis.surface_gravity(moving > 0.0));
        }
    }

    fn land(&mut self, block: &Block, gravity: Gravity) {
        self.set_acceleration_angle(gravity);
        self.jumping = false;
        self.can_rotate = false;
        self.rotation_point = None;
        self.landed_on_color = block.color;
    }

    fn die(&mut self, hooks: &mut dyn CubeHooks) {
        self.dead = true;
        hooks.on_death(self);
    }

    /// Inclusive AABB test: touching faces count as intersecting.
    fn intersects(&self, block: &Block) -> bool {
        let (x, y, s) = (self.position.x, self.position.y, self.size());
        let (bx, by, bs) = (block.x(), block.y(), block.extent());
        x <= bx + bs && x + s >= bx && y <= by + bs && y + s >= by
    }

    /// The block lies ahead of the cube's centre in the direction of travel.
    fn is_leading(&self, block: &Block, axis: Axis, moving: f64) -> bool {
        let centre = axis.of(self.position) + self.size() / 2.0;
        let block_centre = axis.of(Vector2D::new(block.x(), block.y())) + block.extent() / 2.0;
        if moving > 0.0 {
            block_centre > centre
        } else {
            block_centre < centre
        }
    }

    /// Corner graze: the spans across the sweep axis only share one boundary.
    fn is_edge_collision(&self, block: &Block, axis: Axis) -> bool {
        let s = self.size();
        let bs = block.extent();
        match axis {
            Axis::X => block.y() == self.position.y + s || block.y() + bs == self.position.y,
            Axis::Y => block.x() == self.position.x + s || block.x() + bs == self.position.x,
        }
    }

    fn is_out_of_world(&self, level: &Level) -> bool {
        let margin = level.block_width() as f64;
        let s = self.size();
        self.position.x + s < -margin
            || self.position.y + s < -margin
            || self.position.x > level.pixel_width() + margin
            || self.position.y > level.pixel_height() + margin
    }

    /// Reports coin and goal cells the cube overlaps.
    fn check_triggers(&mut self, level: &Level, hooks: &mut dyn CubeHooks) {
        let bw = level.block_width() as f64;
        let (col, row) = level.cell_at(self.position.x, self.position.y);
        let (x, y, s) = (self.position.x, self.position.y, self.size());
        for dy in -1..=1 {
            for dx in -1..=1 {
                let cell = (col + dx, row + dy);
                let (cx, cy) = (cell.0 as f64 * bw, cell.1 as f64 * bw);
                let overlaps = x < cx + bw && x + s > cx && y < cy + bw && y + s > cy;
                if !overlaps {
                    continue;
                }
                if level.is_coin(cell) {
                    hooks.on_coin_collision(cell);
                }
                if level.is_goal(cell) {
                    hooks.on_goal_reached(cell);
                }
            }
        }
    }

    /// Flips gravity once the airborne cube has passed its rotation point.
    fn check_rotation(&mut self) {
        if !self.can_rotate {
            return;
        }
        let Some(point) = self.rotation_point else {
            return;
        };
        let axis = if self.gravity.is_vertical() { Axis::X } else { Axis::Y };
        let travel = axis.of(self.velocity);
        let offset = axis.of(self.position) - axis.of(point);
        let passed = (travel > 0.0 && offset > 0.0) || (travel < 0.0 && offset < 0.0);
        if passed {
            self.rotate_acceleration(self.gravity.flipped());
            self.can_rotate = false;
        }
    }
}
