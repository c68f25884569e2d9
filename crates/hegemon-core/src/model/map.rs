use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: i64,
    pub y: i64,
}

impl Coord {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// One of the 8 surrounding tiles.
    pub fn is_king_neighbor(&self, other: &Coord) -> bool {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y)) == 1
    }

    /// One of the 4 edge-sharing tiles.
    pub fn is_cardinal_neighbor(&self, other: &Coord) -> bool {
        let (dx, dy) = (self.x.abs_diff(other.x), self.y.abs_diff(other.y));
        (dx == 1 && dy == 0) || (dx == 0 && dy == 1)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terrain {
    Open,
    Forest,
    Mountains,
    Water,
    Desert,
    Hills,
    #[serde(untagged)]
    Other(String),
}

impl Terrain {
    pub fn parse(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "forest" => Self::Forest,
            "mountains" => Self::Mountains,
            "water" => Self::Water,
            "desert" => Self::Desert,
            "hills" => Self::Hills,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::Forest => "forest",
            Self::Mountains => "mountains",
            Self::Water => "water",
            Self::Desert => "desert",
            Self::Hills => "hills",
            Self::Other(s) => s,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for Terrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub position: Coord,
    pub terrain: Terrain,
    pub movement_cost: i64,
    pub defence_bonus: i64,
}

/// Inclusive rectangle of playable coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapBounds {
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl Default for MapBounds {
    fn default() -> Self {
        Self {
            min_x: -15,
            max_x: 14,
            min_y: -10,
            max_y: 9,
        }
    }
}

impl MapBounds {
    pub fn contains(&self, c: Coord) -> bool {
        (self.min_x..=self.max_x).contains(&c.x) && (self.min_y..=self.max_y).contains(&c.y)
    }
}
