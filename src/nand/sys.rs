// nand/sys.rs from wadforge
//
// Implements the structures and methods required for parsing and editing `uid.sys`, which maps
// every title the console has seen to a persistent user ID.

use std::io::{Cursor, Read, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UidSysError {
    #[error("uid.sys length {0} is not a whole number of entries")]
    InvalidLength(usize),
    #[error("uid.sys data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// One entry of `uid.sys`: a Title ID and the user ID assigned to it.
#[derive(Debug, Clone)]
pub struct UidSysEntry {
    pub title_id: [u8; 8],
    pub uid: u32,
}

#[derive(Debug, Default)]
/// A structure that represents the `uid.sys` file stored in `/sys/` on a NAND filesystem. User
/// IDs are handed out in install order, starting from 0x1000.
pub struct UidSys {
    pub entries: Vec<UidSysEntry>,
}

impl UidSys {
    /// Creates a new, empty UidSys instance.
    pub fn new() -> Self {
        UidSys { entries: Vec::new() }
    }

    /// Creates a new UidSys instance from the binary data of a `uid.sys` file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, UidSysError> {
        if data.len() % 12 != 0 {
            return Err(UidSysError::InvalidLength(data.len()));
        }
        let mut buf = Cursor::new(data);
        let mut entries = Vec::with_capacity(data.len() / 12);
        for _ in 0..data.len() / 12 {
            let mut title_id = [0u8; 8];
            buf.read_exact(&mut title_id)?;
            let uid = buf.read_u32::<BigEndian>()?;
            entries.push(UidSysEntry { title_id, uid });
        }
        Ok(UidSys { entries })
    }

    /// Dumps the data in a UidSys instance back into binary data that can be written to a file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf: Vec<u8> = Vec::new();
        for entry in &self.entries {
            buf.write_all(&entry.title_id)?;
            buf.write_u32::<BigEndian>(entry.uid)?;
        }
        Ok(buf)
    }

    /// Gets the user ID assigned to a Title ID, if one has been assigned.
    pub fn get_uid(&self, title_id: &[u8; 8]) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.title_id == *title_id)
            .map(|entry| entry.uid)
    }

    /// Records a Title ID, assigning it the next free user ID. A title that already has an
    /// entry keeps the user ID it was first given.
    pub fn add(&mut self, title_id: &[u8; 8]) -> u32 {
        if let Some(uid) = self.get_uid(title_id) {
            return uid;
        }
        let uid = self
            .entries
            .iter()
            .map(|entry| entry.uid + 1)
            .max()
            .unwrap_or(0x1000);
        self.entries.push(UidSysEntry {
            title_id: *title_id,
            uid,
        });
        uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_assigned_in_order() {
        let mut uid_sys = UidSys::new();
        assert_eq!(uid_sys.add(&[0, 0, 0, 1, 0, 0, 0, 2]), 0x1000);
        assert_eq!(uid_sys.add(&[0, 1, 0, 0, 0x41, 0x42, 0x43, 0x44]), 0x1001);
        // Adding the same title again keeps its existing entry.
        assert_eq!(uid_sys.add(&[0, 0, 0, 1, 0, 0, 0, 2]), 0x1000);
        assert_eq!(uid_sys.entries.len(), 2);
    }

    #[test]
    fn round_trip() {
        let mut uid_sys = UidSys::new();
        uid_sys.add(&[0, 0, 0, 1, 0, 0, 0, 2]);
        uid_sys.add(&[0, 1, 0, 0, 0x41, 0x42, 0x43, 0x44]);
        let raw = uid_sys.to_bytes().unwrap();
        assert_eq!(raw.len(), 24);
        let parsed = UidSys::from_bytes(&raw).unwrap();
        assert_eq!(parsed.get_uid(&[0, 1, 0, 0, 0x41, 0x42, 0x43, 0x44]), Some(0x1001));
    }

    #[test]
    fn invalid_length_is_rejected() {
        assert!(matches!(
            UidSys::from_bytes(&[0u8; 10]),
            Err(UidSysError::InvalidLength(10))
        ));
    }
}
