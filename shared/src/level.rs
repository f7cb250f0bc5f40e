//! Level grid parsing, neighbour queries and platform colouring.
//!
//! Levels are newline-separated rows of single-character cell codes:
//!
//! | code        | cell                                   |
//! |-------------|----------------------------------------|
//! | `0`         | empty                                  |
//! | `1`         | lethal platform                        |
//! | `2`..=`5`   | coloured platform (red/green/blue/yellow) |
//! | `S`         | spawn marker (empty cell)              |
//! | `G`         | goal (non-solid trigger)               |
//! | `C`         | coin (non-solid trigger)               |
//!
//! Platforms may be loaded with their colour left open ([`ColorMode::Deferred`]).
//! The server then paints them with [`Level::flood_fill`], which reports the
//! *critical blocks*: one seed cell per connected platform region. Sending
//! those seeds is enough for a client to reproduce the whole colouring with
//! [`Level::apply_critical_blocks`].

use crate::color::Color;
use crate::vector::Vector2D;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Grid coordinate as `(column, row)`.
pub type GridIndex = (i32, i32);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    #[error("level text contains no cells")]
    Empty,
    #[error("unknown cell code {code:?} at row {row}, column {col}")]
    UnknownCell { code: char, row: usize, col: usize },
    #[error("level has no spawn marker")]
    MissingSpawn,
    #[error("second spawn marker at row {row}, column {col}")]
    DuplicateSpawn { row: usize, col: usize },
    #[error("malformed critical block entry `{0}`")]
    MalformedCriticalBlock(String),
    #[error("critical block at ({0}, {1}) is not a colourable platform")]
    NotAPlatform(i32, i32),
}

/// How platform codes `2..=5` are coloured while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Keep the colour encoded in the level text.
    Fixed,
    /// Leave platforms uncoloured until flood-filled.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    pub color: Option<Color>,
    pub grid_x: i32,
    pub grid_y: i32,
    pub size: i32,
}

impl Block {
    pub fn x(&self) -> f64 {
        (self.grid_x * self.size) as f64
    }

    pub fn y(&self) -> f64 {
        (self.grid_y * self.size) as f64
    }

    pub fn extent(&self) -> f64 {
        self.size as f64
    }

    pub fn is_lethal(&self) -> bool {
        self.color.is_some_and(Color::is_lethal)
    }
}

/// Seed cell of a flood-filled platform region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriticalBlock {
    pub grid_x: i32,
    pub grid_y: i32,
    pub color: Color,
}

impl CriticalBlock {
    /// Serializes a list as `x,y,COLOR;x,y,COLOR`.
    pub fn encode_list(blocks: &[CriticalBlock]) -> String {
        blocks
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn decode_list(text: &str) -> Result<Vec<CriticalBlock>, LevelError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        text.split(';').map(CriticalBlock::decode).collect()
    }

    fn decode(entry: &str) -> Result<CriticalBlock, LevelError> {
        let malformed = || LevelError::MalformedCriticalBlock(entry.to_string());
        let mut parts = entry.split(',');
        let (Some(x), Some(y), Some(color), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        Ok(CriticalBlock {
            grid_x: x.parse().map_err(|_| malformed())?,
            grid_y: y.parse().map_err(|_| malformed())?,
            color: color.parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for CriticalBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.grid_x, self.grid_y, self.color)
    }
}

#[derive(Debug, Clone)]
pub struct Level {
    /// Row-major: `grid[row][col]`.
    grid: Vec<Vec<Option<Block>>>,
    block_width: i32,
    spawn_index: GridIndex,
    goals: HashSet<GridIndex>,
    coins: HashSet<GridIndex>,
}

impl Level {
    /// Parses level text into a grid of `block_width`-sized cells.
    pub fn parse(text: &str, block_width: i32, mode: ColorMode) -> Result<Level, LevelError> {
        let rows: Vec<&str> = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .collect();
        if rows.is_empty() {
            return Err(LevelError::Empty);
        }
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0);

        let mut grid = vec![vec![None; width]; rows.len()];
        let mut spawn_index = None;
        let mut goals = HashSet::new();
        let mut coins = HashSet::new();

        for (row, line) in rows.iter().enumerate() {
            for (col, code) in line.chars().enumerate() {
                let index = (col as i32, row as i32);
                match code {
                    '0' => {}
                    'S' => {
                        if spawn_index.replace(index).is_some() {
                            return Err(LevelError::DuplicateSpawn { row, col });
                        }
                    }
                    'G' => {
                        goals.insert(index);
                    }
                    'C' => {
                        coins.insert(index);
                    }
                    _ => {
                        let color = Color::from_code(code)
                            .ok_or(LevelError::UnknownCell { code, row, col })?;
                        let color = match mode {
                            ColorMode::Deferred if !color.is_lethal() => None,
                            _ => Some(color),
                        };
                        grid[row][col] = Some(Block {
                            color,
                            grid_x: index.0,
                            grid_y: index.1,
                            size: block_width,
                        });
                    }
                }
            }
        }

        Ok(Level {
            grid,
            block_width,
            spawn_index: spawn_index.ok_or(LevelError::MissingSpawn)?,
            goals,
            coins,
        })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.grid.first().map_or(0, Vec::len)
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.grid.len()
    }

    pub fn block_width(&self) -> i32 {
        self.block_width
    }

    pub fn pixel_width(&self) -> f64 {
        (self.width() as i32 * self.block_width) as f64
    }

    pub fn pixel_height(&self) -> f64 {
        (self.height() as i32 * self.block_width) as f64
    }

    pub fn spawn_index(&self) -> GridIndex {
        self.spawn_index
    }

    /// Top-left pixel position for a cube of `cube_size` standing on the
    /// floor of the spawn cell, horizontally centred.
    pub fn spawn_position(&self, cube_size: i32) -> Vector2D {
        let (col, row) = self.spawn_index;
        let bw = self.block_width;
        Vector2D::new(
            (col * bw + (bw - cube_size) / 2) as f64,
            ((row + 1) * bw - cube_size) as f64,
        )
    }

    pub fn block(&self, col: i32, row: i32) -> Option<&Block> {
        if col < 0 || row < 0 {
            return None;
        }
        self.grid
            .get(row as usize)
            .and_then(|cells| cells.get(col as usize))
            .and_then(Option::as_ref)
    }

    fn block_mut(&mut self, col: i32, row: i32) -> Option<&mut Block> {
        if col < 0 || row < 0 {
            return None;
        }
        self.grid
            .get_mut(row as usize)
            .and_then(|cells| cells.get_mut(col as usize))
            .and_then(Option::as_mut)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.grid.iter().flatten().flatten()
    }

    /// Grid cell containing pixel `(x, y)`.
    pub fn cell_at(&self, x: f64, y: f64) -> GridIndex {
        let bw = self.block_width as f64;
        ((x / bw).floor() as i32, (y / bw).floor() as i32)
    }

    /// The 3×3 neighbourhood of the cell containing `(x, y)`, row-major,
    /// with out-of-bounds cells reported as empty.
    pub fn neighbour_blocks(&self, x: f64, y: f64) -> [Option<Block>; 9] {
        let (col, row) = self.cell_at(x, y);
        let mut out = [None; 9];
        for dy in -1..=1 {
            for dx in -1..=1 {
                out[((dy + 1) * 3 + (dx + 1)) as usize] = self.block(col + dx, row + dy).copied();
            }
        }
        out
    }

    pub fn is_goal(&self, cell: GridIndex) -> bool {
        self.goals.contains(&cell)
    }

    pub fn is_coin(&self, cell: GridIndex) -> bool {
        self.coins.contains(&cell)
    }

    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }

    pub fn is_fully_colored(&self) -> bool {
        self.blocks().all(|b| b.color.is_some())
    }

    /// Paints every uncoloured platform region with a random palette colour.
    ///
    /// Returns the critical blocks in the order the regions were seeded.
    pub fn flood_fill<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<CriticalBlock> {
        let mut critical = Vec::new();
        for row in 0..self.height() as i32 {
            for col in 0..self.width() as i32 {
                let uncoloured = self.block(col, row).is_some_and(|b| b.color.is_none());
                if uncoloured {
                    let color = Color::random(rng);
                    self.propagate((col, row), color);
                    critical.push(CriticalBlock {
                        grid_x: col,
                        grid_y: row,
                        color,
                    });
                }
            }
        }
        critical
    }

    /// Recolours each critical block and spreads its colour over the
    /// uncoloured region it seeds.
    pub fn apply_critical_blocks(&mut self, blocks: &[CriticalBlock]) -> Result<(), LevelError> {
        for critical in blocks {
            let (col, row) = (critical.grid_x, critical.grid_y);
            match self.block_mut(col, row) {
                Some(block) if !block.is_lethal() => block.color = None,
                _ => return Err(LevelError::NotAPlatform(col, row)),
            }
            self.propagate((col, row), critical.color);
        }
        Ok(())
    }

    /// Breadth-first fill over 4-adjacent uncoloured platforms.
    fn propagate(&mut self, start: GridIndex, color: Color) {
        let mut queue = VecDeque::from([start]);
        while let Some((col, row)) = queue.pop_front() {
            let Some(block) = self.block_mut(col, row) else {
                continue;
            };
            if block.color.is_some() {
                continue;
            }
            block.color = Some(color);
            for (dx, dy) in [(0, -1), (1, 0), (0, 1), (-1, 0)] {
                queue.push_back((col + dx, row + dy));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SAMPLE: &str = "\
11111111
1S000G01
10220C01
10000301
14400331
11111111";

    #[test]
    fn test_parse_fixed_colors() {
        let level = Level::parse(SAMPLE, 50, ColorMode::Fixed).unwrap();
        assert_eq!(level.width(), 8);
        assert_eq!(level.height(), 6);
        assert_eq!(level.spawn_index(), (1, 1));
        assert!(level.is_goal((5, 1)));
        assert!(level.is_coin((5, 2)));
        assert_eq!(level.block(2, 2).unwrap().color, Some(Color::Red));
        assert_eq!(level.block(1, 4).unwrap().color, Some(Color::Blue));
        assert!(level.block(0, 0).unwrap().is_lethal());
        assert!(level.block(1, 1).is_none());
    }

    #[test]
    fn test_block_bounds_follow_grid() {
        let level = Level::parse(SAMPLE, 50, ColorMode::Fixed).unwrap();
        for block in level.blocks() {
            assert_eq!(block.x(), (block.grid_x * 50) as f64);
            assert_eq!(block.y(), (block.grid_y * 50) as f64);
            assert_eq!(block.size, 50);
        }
    }

    #[test]
    fn test_parse_deferred_keeps_lethal_only() {
        let level = Level::parse(SAMPLE, 50, ColorMode::Deferred).unwrap();
        assert!(level.block(0, 0).unwrap().is_lethal());
        assert_eq!(level.block(2, 2).unwrap().color, None);
        assert!(!level.is_fully_colored());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Level::parse("", 50, ColorMode::Fixed).unwrap_err(), LevelError::Empty);
        assert_eq!(
            Level::parse("0000\n0110", 50, ColorMode::Fixed).unwrap_err(),
            LevelError::MissingSpawn
        );
        assert_eq!(
            Level::parse("S0S", 50, ColorMode::Fixed).unwrap_err(),
            LevelError::DuplicateSpawn { row: 0, col: 2 }
        );
        assert_eq!(
            Level::parse("S0x", 50, ColorMode::Fixed).unwrap_err(),
            LevelError::UnknownCell { code: 'x', row: 0, col: 2 }
        );
    }

    #[test]
    fn test_short_rows_are_padded() {
        let level = Level::parse("S\r\n1111\n", 50, ColorMode::Fixed).unwrap();
        assert_eq!(level.width(), 4);
        assert!(level.block(3, 0).is_none());
        assert!(level.block(3, 1).is_some());
    }

    #[test]
    fn test_neighbour_blocks_out_of_bounds_are_empty() {
        let level = Level::parse(SAMPLE, 50, ColorMode::Fixed).unwrap();

        let corner = level.neighbour_blocks(10.0, 10.0);
        // Row above and column left of (0, 0) are outside the grid.
        assert!(corner[0].is_none() && corner[1].is_none() && corner[2].is_none());
        assert!(corner[3].is_none() && corner[6].is_none());
        assert_eq!(corner[4].unwrap().grid_x, 0);
        assert_eq!(corner[4].unwrap().grid_y, 0);

        let outside = level.neighbour_blocks(-500.0, -500.0);
        assert!(outside.iter().all(Option::is_none));
    }

    #[test]
    fn test_neighbour_blocks_centre_cell() {
        let level = Level::parse(SAMPLE, 50, ColorMode::Fixed).unwrap();
        let around = level.neighbour_blocks(125.0, 125.0); // cell (2, 2)
        assert_eq!(around[4].unwrap().color, Some(Color::Red));
        assert_eq!(around[5].unwrap().grid_x, 3);
        assert!(around[3].is_none()); // (1, 2) is empty
    }

    #[test]
    fn test_flood_fill_colours_everything_and_regions_agree() {
        let mut level = Level::parse(SAMPLE, 50, ColorMode::Deferred).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let critical = level.flood_fill(&mut rng);

        assert!(level.is_fully_colored());
        // Regions: {(2,2),(3,2)}, {(1,4),(2,4)}, {(5,3),(5,4),(6,4)}.
        assert_eq!(critical.len(), 3);

        for block in level.blocks().filter(|b| !b.is_lethal()) {
            for (dx, dy) in [(1, 0), (0, 1)] {
                if let Some(other) = level.block(block.grid_x + dx, block.grid_y + dy) {
                    if !other.is_lethal() {
                        assert_eq!(block.color, other.color);
                    }
                }
            }
        }
    }

    #[test]
    fn test_critical_blocks_reproduce_colouring() {
        let mut server = Level::parse(SAMPLE, 50, ColorMode::Deferred).unwrap();
        let critical = server.flood_fill(&mut StdRng::seed_from_u64(9));

        let wire = CriticalBlock::encode_list(&critical);
        let decoded = CriticalBlock::decode_list(&wire).unwrap();
        assert_eq!(decoded, critical);

        let mut client = Level::parse(SAMPLE, 50, ColorMode::Deferred).unwrap();
        client.apply_critical_blocks(&decoded).unwrap();
        let server_colors: Vec<_> = server.blocks().map(|b| b.color).collect();
        let client_colors: Vec<_> = client.blocks().map(|b| b.color).collect();
        assert_eq!(server_colors, client_colors);
    }

    #[test]
    fn test_critical_block_errors() {
        assert!(CriticalBlock::decode_list("").unwrap().is_empty());
        assert!(CriticalBlock::decode_list("1,2").is_err());
        assert!(CriticalBlock::decode_list("1,2,PINK").is_err());
        assert!(CriticalBlock::decode_list("1,2,RED,4").is_err());

        let mut level = Level::parse(SAMPLE, 50, ColorMode::Deferred).unwrap();
        let lethal = CriticalBlock { grid_x: 0, grid_y: 0, color: Color::Red };
        assert_eq!(
            level.apply_critical_blocks(&[lethal]),
            Err(LevelError::NotAPlatform(0, 0))
        );
    }

    #[test]
    fn test_spawn_position_rests_on_cell_floor() {
        let level = Level::parse(SAMPLE, 50, ColorMode::Fixed).unwrap();
        let spawn = level.spawn_position(30);
        assert_eq!(spawn, Vector2D::new(60.0, 70.0));
    }
}
