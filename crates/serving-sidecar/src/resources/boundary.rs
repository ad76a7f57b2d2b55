use snafu::{Snafu, ensure};

use crate::quantity::Quantity;

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("minimum {min} is bigger than maximum {max}"))]
pub struct InvertedBoundaryError {
    min: Quantity,
    max: Quantity,
}

/// A closed interval `[min, max]` derived resource quantities are clamped into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceBoundary {
    min: Quantity,
    max: Quantity,
}

impl ResourceBoundary {
    pub fn new(min: Quantity, max: Quantity) -> Result<Self, InvertedBoundaryError> {
        ensure!(min <= max, InvertedBoundarySnafu { min, max });
        Ok(Self { min, max })
    }

    /// Only for bounds which are known to be ordered, like the built-in defaults.
    pub(crate) fn new_unchecked(min: Quantity, max: Quantity) -> Self {
        Self { min, max }
    }

    pub fn min(&self) -> Quantity {
        self.min
    }

    pub fn max(&self) -> Quantity {
        self.max
    }

    /// Clamps `quantity` into the boundary. A clamped result is the bound itself, including its
    /// format.
    pub fn apply(&self, quantity: Quantity) -> Quantity {
        if quantity < self.min {
            self.min
        } else if quantity > self.max {
            self.max
        } else {
            quantity
        }
    }
}
