pub mod color;
pub mod cube;
pub mod heartbeat;
pub mod level;
pub mod levels;
pub mod protocol;
pub mod vector;

pub use color::Color;
pub use cube::{Cube, CubeConfig, CubeHooks, Gravity, NoHooks};
pub use level::{Block, ColorMode, CriticalBlock, GridIndex, Level, LevelError};
pub use protocol::{Packet, ProtocolError};
pub use vector::Vector2D;

/// Connection identifier, unique for the lifetime of a server.
pub type PlayerId = u32;

pub const DEFAULT_PORT: u16 = 9090;

pub const BLOCK_WIDTH: i32 = 50;
pub const CUBE_SIZE: i32 = 30;
/// Speed along the surface a cube is running on.
pub const VELOCITY: f64 = 250.0;
/// Jump impulse.
pub const MAX_VELOCITY: f64 = 600.0;
pub const ACCELERATION: f64 = 1500.0;

pub const TICK_RATE: u32 = 60;
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const HEARTBEAT_MISS_THRESHOLD: u32 = 3;
