//! Human readable byte counts.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// A size in bytes, printed with a binary unit suffix.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StorageSize(pub u64);

impl StorageSize {
    /// Zero bytes.
    pub const ZERO: StorageSize = StorageSize(0);

    /// Creates a size from a byte count.
    pub const fn bytes(n: u64) -> Self {
        StorageSize(n)
    }

    /// Creates a size from a number of mebibytes.
    pub const fn mib(n: u64) -> Self {
        StorageSize(n * MIB)
    }

    /// Returns the raw byte count.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, rhs: StorageSize) -> StorageSize {
        StorageSize(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for StorageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0 as f64;
        if self.0 >= TIB {
            write!(f, "{:.2} TiB", n / TIB as f64)
        } else if self.0 >= GIB {
            write!(f, "{:.2} GiB", n / GIB as f64)
        } else if self.0 >= MIB {
            write!(f, "{:.2} MiB", n / MIB as f64)
        } else if self.0 >= KIB {
            write!(f, "{:.2} KiB", n / KIB as f64)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

impl From<usize> for StorageSize {
    fn from(n: usize) -> Self {
        StorageSize(n as u64)
    }
}

impl From<u64> for StorageSize {
    fn from(n: u64) -> Self {
        StorageSize(n)
    }
}

impl Add for StorageSize {
    type Output = StorageSize;

    fn add(self, rhs: StorageSize) -> StorageSize {
        StorageSize(self.0 + rhs.0)
    }
}

impl AddAssign for StorageSize {
    fn add_assign(&mut self, rhs: StorageSize) {
        self.0 += rhs.0;
    }
}

impl Sub for StorageSize {
    type Output = StorageSize;

    fn sub(self, rhs: StorageSize) -> StorageSize {
        StorageSize(self.0 - rhs.0)
    }
}

impl SubAssign for StorageSize {
    fn sub_assign(&mut self, rhs: StorageSize) {
        self.0 -= rhs.0;
    }
}

impl Sum for StorageSize {
    fn sum<I: Iterator<Item = StorageSize>>(iter: I) -> Self {
        iter.fold(StorageSize::ZERO, Add::add)
    }
}
