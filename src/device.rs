//! Device recognition
//!
//! Before anything destructive happens the connected device must report
//! the expected bootloader variables, a partition layout within the known
//! set, and a serial number.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::config;
use crate::log_warn;

const MODULE: &str = "device";

const PARTITION_TYPE_PREFIX: &str = "partition-type:";

/// Variables reported by the bootloader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    vars: HashMap<String, String>,
}

impl DeviceInfo {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn serial(&self) -> Option<&str> {
        self.get("serialno").filter(|s| !s.is_empty())
    }

    /// Partition names from `partition-type:*` keys, slot suffix removed
    pub fn partitions(&self) -> BTreeSet<&str> {
        self.vars
            .keys()
            .filter_map(|key| key.strip_prefix(PARTITION_TYPE_PREFIX))
            .map(|name| {
                name.strip_suffix("_a")
                    .or_else(|| name.strip_suffix("_b"))
                    .unwrap_or(name)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceInfo {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Parse `getvar:all` output
///
/// One `key:value` pair per line. Keys may contain colons, so the value is
/// whatever follows the last colon. Lines without a colon are ignored.
pub fn parse_variables(text: &str) -> DeviceInfo {
    text.lines()
        .map(str::trim)
        .filter_map(|line| line.rsplit_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Why a device was not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Kernel(Option<String>),
    MaxDownloadSize(Option<String>),
    SlotCount(Option<String>),
    UnexpectedPartitions(Vec<String>),
    MissingSerial,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Kernel(v) => write!(f, "kernel mismatch: {:?}", v),
            Mismatch::MaxDownloadSize(v) => write!(f, "max-download-size mismatch: {:?}", v),
            Mismatch::SlotCount(v) => write!(f, "slot-count mismatch: {:?}", v),
            Mismatch::UnexpectedPartitions(names) => {
                write!(f, "unexpected partitions: {}", names.join(", "))
            }
            Mismatch::MissingSerial => write!(f, "missing serial number"),
        }
    }
}

fn expect_var(
    info: &DeviceInfo,
    name: &str,
    expected: &str,
    mismatch: fn(Option<String>) -> Mismatch,
) -> Result<(), Mismatch> {
    match info.get(name) {
        Some(value) if value == expected => Ok(()),
        value => Err(mismatch(value.map(str::to_string))),
    }
}

/// Check a device against the supported profile
///
/// Every reported partition must be known, but not every known partition
/// has to be reported.
pub fn recognize(info: &DeviceInfo) -> Result<(), Mismatch> {
    expect_var(info, "kernel", config::device::KERNEL, Mismatch::Kernel)?;
    expect_var(
        info,
        "max-download-size",
        config::device::MAX_DOWNLOAD_SIZE,
        Mismatch::MaxDownloadSize,
    )?;
    expect_var(
        info,
        "slot-count",
        config::device::SLOT_COUNT,
        Mismatch::SlotCount,
    )?;

    let unexpected: Vec<String> = info
        .partitions()
        .into_iter()
        .filter(|name| !config::device::EXPECTED_PARTITIONS.contains(name))
        .map(str::to_string)
        .collect();
    if !unexpected.is_empty() {
        return Err(Mismatch::UnexpectedPartitions(unexpected));
    }

    if info.serial().is_none() {
        return Err(Mismatch::MissingSerial);
    }

    Ok(())
}

/// [`recognize`] as a yes/no answer, logging the reason for a no
pub fn is_recognized(info: &DeviceInfo) -> bool {
    match recognize(info) {
        Ok(()) => true,
        Err(mismatch) => {
            log_warn!(MODULE, "Device not recognized: {}", mismatch);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_info() -> DeviceInfo {
        [
            ("kernel", "uefi"),
            ("max-download-size", "104857600"),
            ("slot-count", "2"),
            ("partition-type:boot_a", "raw"),
            ("partition-type:boot_b", "raw"),
            ("partition-type:system_a", "ext4"),
            ("partition-type:userdata", "ext4"),
            ("serialno", "a1b2c3d4"),
            ("current-slot", "a"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_parse_variables_uses_last_colon() {
        let info = parse_variables(
            "kernel:uefi\n\
             partition-type:boot_a:raw\n\
             partition-size:xbl_a: 0x380000\n\
             \n\
             garbage line\n\
             serialno:1234abcd\r\n",
        );
        assert_eq!(info.get("kernel"), Some("uefi"));
        assert_eq!(info.get("partition-type:boot_a"), Some("raw"));
        assert_eq!(info.get("partition-size:xbl_a"), Some("0x380000"));
        assert_eq!(info.get("serialno"), Some("1234abcd"));
        assert_eq!(info.len(), 4);
    }

    #[test]
    fn test_partitions_strip_slot_suffix() {
        let info = valid_info();
        let partitions: Vec<&str> = info.partitions().into_iter().collect();
        assert_eq!(partitions, vec!["boot", "system", "userdata"]);
    }

    #[test]
    fn test_valid_device_is_recognized() {
        assert_eq!(recognize(&valid_info()), Ok(()));
        assert!(is_recognized(&valid_info()));
    }

    #[test]
    fn test_missing_serial_is_rejected() {
        let mut info = valid_info();
        info.vars.remove("serialno");
        assert_eq!(recognize(&info), Err(Mismatch::MissingSerial));

        info.insert("serialno", "");
        assert_eq!(recognize(&info), Err(Mismatch::MissingSerial));
    }

    #[test]
    fn test_variables_compared_as_strings() {
        let mut info = valid_info();
        info.insert("slot-count", "3");
        assert_eq!(
            recognize(&info),
            Err(Mismatch::SlotCount(Some("3".to_string())))
        );

        let mut info = valid_info();
        info.insert("max-download-size", "0x6400000");
        assert!(matches!(
            recognize(&info),
            Err(Mismatch::MaxDownloadSize(_))
        ));

        let mut info = valid_info();
        info.vars.remove("kernel");
        assert_eq!(recognize(&info), Err(Mismatch::Kernel(None)));
    }

    #[test]
    fn test_unknown_partition_is_rejected() {
        let mut info = valid_info();
        info.insert("partition-type:recovery_a", "raw");
        assert_eq!(
            recognize(&info),
            Err(Mismatch::UnexpectedPartitions(vec!["recovery".to_string()]))
        );
    }

    #[test]
    fn test_full_partition_set_is_accepted() {
        let mut info = valid_info();
        for name in config::device::EXPECTED_PARTITIONS {
            info.insert(format!("partition-type:{}_a", name), "raw");
        }
        assert_eq!(recognize(&info), Ok(()));
    }
}
