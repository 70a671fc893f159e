//! Device directory collaborator
//!
//! The directory is a flat table mapping device names to their device type and
//! bus address. The master consults and mutates it while onboarding slaves and
//! enumerates it when collecting data. Storage is up to the implementation;
//! [`MemoryDirectory`] keeps everything in memory.

use crate::error::{RtuError, RtuResult};
use crate::regmap::{FIRST_ASSIGNED_ID, LAST_ASSIGNED_ID, MAX_NAME_LEN};

/// One directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceRow {
    /// Bus address of the slave hosting the device
    pub slave_id: u8,
    /// Directory row number, also written to the slave's device block
    pub device_number: u16,
    /// Device type code
    pub device_type: u16,
    /// Number of data registers the device exposes
    pub device_regs: u16,
}

/// Outcome of [`DeviceDirectory::add_or_replace_device`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryUpdate {
    /// A new entry was created
    Added,
    /// An existing entry with the same name was overwritten
    Replaced,
}

/// Name to (type, bus address) registry
///
/// The directory is not internally synchronised; callers must not run two
/// onboarding workflows against the same directory at once.
pub trait DeviceDirectory {
    /// Clear the directory and set its name length and capacity
    fn init(&mut self, name_len: usize, max_devices: usize) -> RtuResult<()>;

    /// Look up a device by name
    fn find_device_for_name(&self, name: &[u8]) -> Option<DeviceRow>;

    /// Store `row` under `name`, replacing any entry with that name
    ///
    /// The entry is placed at `row.device_number`.
    fn add_or_replace_device(&mut self, name: &[u8], row: DeviceRow) -> RtuResult<DirectoryUpdate>;

    /// First unused row number
    fn find_free_row(&self) -> Option<u16>;

    /// Lowest slave id not used by any entry
    fn find_free_slave_id(&self) -> Option<u8>;

    /// Remove entries of `slave_id` whose name is not in `known_names`
    ///
    /// Returns the number of entries removed.
    fn filter_devices_for_slave(&mut self, known_names: &[&[u8]], slave_id: u8) -> usize;

    /// Fixed name length in bytes
    fn device_name_length(&self) -> usize;

    /// Snapshot of every entry, ordered by row number
    fn rows(&self) -> Vec<(Vec<u8>, DeviceRow)>;
}

/// In-memory directory with a fixed number of rows
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    name_len: usize,
    rows: Vec<Option<(Vec<u8>, DeviceRow)>>,
}

impl MemoryDirectory {
    /// Create an initialised directory
    pub fn new(name_len: usize, max_devices: usize) -> RtuResult<Self> {
        let mut directory = Self {
            name_len: 0,
            rows: Vec::new(),
        };
        directory.init(name_len, max_devices)?;
        Ok(directory)
    }

    /// Number of occupied rows
    pub fn len(&self) -> usize {
        self.rows.iter().filter(|r| r.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names are stored zero padded to the directory name length
    fn normalise(&self, name: &[u8]) -> Vec<u8> {
        let mut stored: Vec<u8> = name.iter().copied().take(self.name_len).collect();
        stored.resize(self.name_len, 0);
        stored
    }

    fn position(&self, name: &[u8]) -> Option<usize> {
        let wanted = self.normalise(name);
        self.rows
            .iter()
            .position(|r| matches!(r, Some((n, _)) if *n == wanted))
    }
}

impl DeviceDirectory for MemoryDirectory {
    fn init(&mut self, name_len: usize, max_devices: usize) -> RtuResult<()> {
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(RtuError::InvalidConfig(format!(
                "Device name length must be 1..={}, got {}",
                MAX_NAME_LEN, name_len
            )));
        }
        if max_devices > u16::MAX as usize {
            return Err(RtuError::InvalidConfig(format!(
                "Directory capacity {} exceeds row number range",
                max_devices
            )));
        }
        self.name_len = name_len;
        self.rows = vec![None; max_devices];
        Ok(())
    }

    fn find_device_for_name(&self, name: &[u8]) -> Option<DeviceRow> {
        self.position(name)
            .and_then(|i| self.rows[i].as_ref().map(|(_, row)| *row))
    }

    fn add_or_replace_device(&mut self, name: &[u8], row: DeviceRow) -> RtuResult<DirectoryUpdate> {
        let target = row.device_number as usize;
        if target >= self.rows.len() {
            return Err(RtuError::Directory(format!(
                "Row {} outside directory of {} rows",
                target,
                self.rows.len()
            )));
        }
        let stored = self.normalise(name);
        let previous = self.position(name);
        match &self.rows[target] {
            Some((other, _)) if *other != stored => {
                return Err(RtuError::Directory(format!(
                    "Row {} already holds another device",
                    target
                )));
            }
            _ => {}
        }
        if let Some(old) = previous {
            self.rows[old] = None;
        }
        self.rows[target] = Some((stored, row));
        Ok(if previous.is_some() {
            DirectoryUpdate::Replaced
        } else {
            DirectoryUpdate::Added
        })
    }

    fn find_free_row(&self) -> Option<u16> {
        self.rows.iter().position(|r| r.is_none()).map(|i| i as u16)
    }

    fn find_free_slave_id(&self) -> Option<u8> {
        (FIRST_ASSIGNED_ID..=LAST_ASSIGNED_ID).find(|id| {
            !self
                .rows
                .iter()
                .flatten()
                .any(|(_, row)| row.slave_id == *id)
        })
    }

    fn filter_devices_for_slave(&mut self, known_names: &[&[u8]], slave_id: u8) -> usize {
        let known: Vec<Vec<u8>> = known_names.iter().map(|n| self.normalise(n)).collect();
        let mut removed = 0;
        for slot in self.rows.iter_mut() {
            let stale = matches!(slot, Some((name, row)) if row.slave_id == slave_id && !known.contains(name));
            if stale {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    fn device_name_length(&self) -> usize {
        self.name_len
    }

    fn rows(&self) -> Vec<(Vec<u8>, DeviceRow)> {
        self.rows.iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(slave_id: u8, device_number: u16) -> DeviceRow {
        DeviceRow {
            slave_id,
            device_number,
            device_type: 7,
            device_regs: 4,
        }
    }

    #[test]
    fn test_add_and_find() {
        let mut dir = MemoryDirectory::new(8, 4).unwrap();
        assert_eq!(dir.find_free_row(), Some(0));
        assert_eq!(dir.add_or_replace_device(b"meter1", row(2, 0)).unwrap(), DirectoryUpdate::Added);
        assert_eq!(dir.find_device_for_name(b"meter1"), Some(row(2, 0)));
        assert_eq!(dir.find_free_row(), Some(1));
        assert_eq!(dir.find_free_slave_id(), Some(3));
    }

    #[test]
    fn test_replace_moves_row() {
        let mut dir = MemoryDirectory::new(8, 4).unwrap();
        dir.add_or_replace_device(b"meter1", row(2, 0)).unwrap();
        let update = dir.add_or_replace_device(b"meter1", row(3, 2)).unwrap();
        assert_eq!(update, DirectoryUpdate::Replaced);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.find_device_for_name(b"meter1"), Some(row(3, 2)));
        assert_eq!(dir.find_free_row(), Some(0));
    }

    #[test]
    fn test_occupied_row_rejected() {
        let mut dir = MemoryDirectory::new(8, 4).unwrap();
        dir.add_or_replace_device(b"meter1", row(2, 0)).unwrap();
        assert!(dir.add_or_replace_device(b"meter2", row(2, 0)).is_err());
        assert!(dir.add_or_replace_device(b"meter2", row(2, 9)).is_err());
    }

    #[test]
    fn test_filter_devices_for_slave() {
        let mut dir = MemoryDirectory::new(8, 4).unwrap();
        dir.add_or_replace_device(b"a", row(2, 0)).unwrap();
        dir.add_or_replace_device(b"b", row(2, 1)).unwrap();
        dir.add_or_replace_device(b"c", row(3, 2)).unwrap();
        assert_eq!(dir.filter_devices_for_slave(&[b"a"], 2), 1);
        assert!(dir.find_device_for_name(b"b").is_none());
        assert!(dir.find_device_for_name(b"a").is_some());
        assert_eq!(dir.filter_devices_for_slave(&[], 3), 1);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_names_are_padded_and_truncated() {
        let mut dir = MemoryDirectory::new(4, 2).unwrap();
        dir.add_or_replace_device(b"abcdef", row(2, 0)).unwrap();
        assert!(dir.find_device_for_name(b"abcd").is_some());
        assert_eq!(dir.rows()[0].0, b"abcd".to_vec());
        dir.add_or_replace_device(b"xy", row(2, 1)).unwrap();
        assert_eq!(dir.rows()[1].0, vec![b'x', b'y', 0, 0]);
    }

    #[test]
    fn test_full_directory() {
        let mut dir = MemoryDirectory::new(4, 1).unwrap();
        dir.add_or_replace_device(b"a", row(2, 0)).unwrap();
        assert_eq!(dir.find_free_row(), None);
    }

    #[test]
    fn test_invalid_init() {
        assert!(MemoryDirectory::new(0, 4).is_err());
        assert!(MemoryDirectory::new(MAX_NAME_LEN + 1, 4).is_err());
    }
}
