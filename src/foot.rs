//! Foot identifiers and per-foot storage.

use std::ops::{Index, IndexMut};

/// One of the two feet of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Foot {
    /// The left foot.
    Left,
    /// The right foot.
    Right,
}

impl Foot {
    /// Both feet, left first.
    pub const ALL: [Foot; 2] = [Foot::Left, Foot::Right];

    /// Lower-case name, as used in robot descriptions and log messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Foot::Left => "left",
            Foot::Right => "right",
        }
    }
}

impl std::fmt::Display for Foot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A value stored for each foot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Feet<T> {
    /// Value for the left foot.
    pub left: T,
    /// Value for the right foot.
    pub right: T,
}

impl<T> Feet<T> {
    /// Creates a pair from the left and right values.
    pub const fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    /// Builds a pair by calling `f` for each foot.
    pub fn from_fn(mut f: impl FnMut(Foot) -> T) -> Self {
        Self {
            left: f(Foot::Left),
            right: f(Foot::Right),
        }
    }

    /// Applies `f` to both values.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Feet<U> {
        Feet {
            left: f(self.left),
            right: f(self.right),
        }
    }
}

impl<T> Index<Foot> for Feet<T> {
    type Output = T;

    fn index(&self, foot: Foot) -> &T {
        match foot {
            Foot::Left => &self.left,
            Foot::Right => &self.right,
        }
    }
}

impl<T> IndexMut<Foot> for Feet<T> {
    fn index_mut(&mut self, foot: Foot) -> &mut T {
        match foot {
            Foot::Left => &mut self.left,
            Foot::Right => &mut self.right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_by_foot() {
        let mut feet = Feet::new(1, 2);
        feet[Foot::Right] += 10;
        assert_eq!(feet[Foot::Left], 1);
        assert_eq!(feet[Foot::Right], 12);
    }

    #[test]
    fn from_fn_and_map() {
        let feet = Feet::from_fn(Foot::name).map(str::len);
        assert_eq!(feet, Feet::new(4, 5));
    }

    #[test]
    fn display_uses_description_name() {
        assert_eq!(Foot::Left.to_string(), "left");
        assert_eq!(Foot::Right.to_string(), "right");
    }
}
