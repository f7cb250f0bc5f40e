//! Built-in levels, addressed by name so that both ends load the same grid.

use crate::level::{ColorMode, Level, LevelError};

pub const DEFAULT_LEVEL: &str = "tutorial";

const TUTORIAL: &str = "\
1111111111111111
1000000000000001
10000000C000G001
1000002222222001
1000000000000001
1S00000000000001
1222222200033331
1111111111111111";

const SWITCHBACK: &str = "\
111111111111111111111
100000000000000000001
10000C00000000000G001
100333333000004444001
100000000000000000001
100000000022200000001
1S0000000000000000C01
122222221111122222221
111111111111111111111";

const CATALOG: &[(&str, &str)] = &[("tutorial", TUTORIAL), ("switchback", SWITCHBACK)];

/// Names of every built-in level.
pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|(name, _)| *name)
}

/// Raw text of a built-in level.
pub fn text(name: &str) -> Option<&'static str> {
    CATALOG
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, text)| *text)
}

/// Parses the named level, or `None` when it is not in the catalog.
pub fn load(name: &str, block_width: i32, mode: ColorMode) -> Option<Result<Level, LevelError>> {
    text(name).map(|text| Level::parse(text, block_width, mode))
}
