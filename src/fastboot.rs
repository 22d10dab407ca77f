//! Fastboot transport interface
//!
//! The USB transport and wire protocol live outside this crate. A host
//! plugs them in by implementing [`FastbootDevice`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{Error, FastbootError};
use crate::runner::ImageHandle;

/// A/B slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// The slot that is not `self`
    pub fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" => Ok(Slot::A),
            "b" => Ok(Slot::B),
            other => Err(Error::InvalidSlot(other.to_string())),
        }
    }
}

/// Progress callback used by the transport while streaming a blob
pub type FlashProgress<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Primitives offered by a fastboot transport
#[async_trait]
pub trait FastbootDevice: Send + Sync {
    /// Whether the host can talk USB at all
    fn is_supported(&self) -> bool {
        true
    }

    /// Ask the host to open a device (may prompt the user)
    async fn connect(&self) -> Result<(), FastbootError>;

    /// Resolves once a device is attached and ready for commands
    async fn wait_for_connect(&self) -> Result<(), FastbootError>;

    /// `getvar:<name>`
    async fn get_variable(&self, name: &str) -> Result<String, FastbootError>;

    /// `getvar:all`, as newline-separated `key:value` lines
    async fn get_all_variables(&self) -> Result<String, FastbootError>;

    /// Run a raw command such as `erase:userdata`, returning the OKAY payload
    async fn run_command(&self, command: &str) -> Result<String, FastbootError>;

    /// Download `image` and flash it to `partition` on `slot`
    async fn flash_blob(
        &self,
        partition: &str,
        image: &ImageHandle,
        slot: Slot,
        on_progress: FlashProgress<'_>,
    ) -> Result<(), FastbootError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_parse() {
        assert_eq!("a".parse::<Slot>().unwrap(), Slot::A);
        assert_eq!("b".parse::<Slot>().unwrap(), Slot::B);
        assert!(matches!("c".parse::<Slot>(), Err(Error::InvalidSlot(s)) if s == "c"));
        assert!("".parse::<Slot>().is_err());
        assert!("_a".parse::<Slot>().is_err());
    }

    #[test]
    fn test_slot_other() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other(), Slot::A);
        assert_eq!(Slot::B.other().to_string(), "a");
    }
}
