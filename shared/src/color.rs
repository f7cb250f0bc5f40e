use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Platform and player colours.
///
/// `Lethal` only ever appears on blocks; players are assigned one of
/// the [`Color::PALETTE`] entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Color {
    Lethal,
    Red,
    Green,
    Blue,
    Yellow,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown colour `{0}`")]
pub struct UnknownColor(pub String);

impl Color {
    /// Colours a platform (and a player) can carry.
    pub const PALETTE: [Color; 4] = [Color::Red, Color::Green, Color::Blue, Color::Yellow];

    /// Maps a level cell code to its colour: `'1'` lethal, `'2'..='5'` palette.
    pub fn from_code(code: char) -> Option<Color> {
        match code {
            '1' => Some(Color::Lethal),
            '2' => Some(Color::Red),
            '3' => Some(Color::Green),
            '4' => Some(Color::Blue),
            '5' => Some(Color::Yellow),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Color::Lethal => '1',
            Color::Red => '2',
            Color::Green => '3',
            Color::Blue => '4',
            Color::Yellow => '5',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Color::Lethal => "LETHAL",
            Color::Red => "RED",
            Color::Green => "GREEN",
            Color::Blue => "BLUE",
            Color::Yellow => "YELLOW",
        }
    }

    pub fn is_lethal(self) -> bool {
        self == Color::Lethal
    }

    /// Draws a palette colour uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Color {
        Color::PALETTE[rng.gen_range(0..Color::PALETTE.len())]
    }

    /// Colour handed to the `index`-th player of a match.
    pub fn for_player(index: usize) -> Color {
        Color::PALETTE[index % Color::PALETTE.len()]
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Color {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LETHAL" => Ok(Color::Lethal),
            "RED" => Ok(Color::Red),
            "GREEN" => Ok(Color::Green),
            "BLUE" => Ok(Color::Blue),
            "YELLOW" => Ok(Color::Yellow),
            other => Err(UnknownColor(other.to_string())),
        }
    }
}
