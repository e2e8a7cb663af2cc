use serde::{Serialize, Deserialize, Serializer};
use std::fmt;

/// Wraps a phone number (or any other identifying string) so that log output
/// only shows its last four characters. Serialization still emits the real
/// value, since API responses need it.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Masked<T>(pub T);

const VISIBLE_TAIL: usize = 4;

fn write_masked(value: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let total = value.chars().count();
    if total <= VISIBLE_TAIL {
        return write!(f, "{}", "*".repeat(total.max(1)));
    }
    let tail: String = value.chars().skip(total - VISIBLE_TAIL).collect();
    write!(f, "{}{}", "*".repeat(total - VISIBLE_TAIL), tail)
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_masked(self.0.as_ref(), f)
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_masked(self.0.as_ref(), f)
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}
