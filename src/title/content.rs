// title/content.rs from wadforge
//
// Implements content parsing and editing, and the shared content map used by NAND installs.

use std::cell::RefCell;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;
use thiserror::Error;
use crate::title::crypto;
use crate::title::crypto::sha1_hash;
use crate::title::tmd::{ContentRecord, ContentType};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("requested index {index} is out of range (must not exceed {max})")]
    IndexOutOfRange { index: usize, max: usize },
    #[error("expected {required} contents based on content records but found {found}")]
    MissingContents { required: usize, found: usize },
    #[error("content with requested Content ID {0} could not be found")]
    CIDNotFound(u32),
    #[error("the specified index {0} already exists in the content records")]
    IndexAlreadyExists(u16),
    #[error("the specified Content ID {0} already exists in the content records")]
    CIDAlreadyExists(u32),
    #[error("hash of content at index {index} did not match its record (was {actual}, expected {expected})")]
    BadHash {
        index: u16,
        expected: String,
        actual: String,
    },
    #[error("shared content map length {0} is not a whole number of entries")]
    InvalidContentMap(usize),
    #[error("content data is not in a valid format")]
    IO(#[from] std::io::Error),
}

#[derive(Debug)]
/// A structure that represents the block of data containing the contents of a digital Wii title.
/// The record list is borrowed from the TMD the region was loaded against, so record updates made
/// here are visible to that TMD as well.
pub struct ContentRegion {
    pub content_records: Rc<RefCell<Vec<ContentRecord>>>,
    contents: Vec<Vec<u8>>,
}

impl ContentRegion {
    /// Creates a ContentRegion instance from the content area of a WAD and the content records
    /// from its TMD. Each content is stored from a 64-byte-aligned offset, sized by its record.
    pub fn from_bytes(
        data: &[u8],
        content_records: Rc<RefCell<Vec<ContentRecord>>>,
    ) -> Result<Self, ContentError> {
        let mut contents: Vec<Vec<u8>> = Vec::with_capacity(content_records.borrow().len());
        let mut buf = Cursor::new(data);
        let mut offset: u64 = 0;
        for record in content_records.borrow().iter() {
            buf.seek(SeekFrom::Start(offset))?;
            // Ciphertext runs to the nearest multiple of 16; the rest up to 64 is padding.
            let size = record.content_size.next_multiple_of(16);
            let mut content = vec![0u8; size as usize];
            buf.read_exact(&mut content)?;
            contents.push(content);
            offset += record.content_size.next_multiple_of(64);
        }
        Ok(ContentRegion {
            content_records: Rc::clone(&content_records),
            contents,
        })
    }

    /// Creates a ContentRegion instance from a vector of already-encrypted contents and the
    /// content records from a TMD.
    pub fn from_contents(
        contents: Vec<Vec<u8>>,
        content_records: Rc<RefCell<Vec<ContentRecord>>>,
    ) -> Result<Self, ContentError> {
        if contents.len() != content_records.borrow().len() {
            return Err(ContentError::MissingContents {
                required: content_records.borrow().len(),
                found: contents.len(),
            });
        }
        let mut content_region = Self::new(Rc::clone(&content_records));
        for (i, content) in contents.into_iter().enumerate() {
            content_region.load_enc_content(&content, i)?;
        }
        Ok(content_region)
    }

    /// Creates a ContentRegion instance holding no content yet, to be filled in from files or
    /// downloads matching the provided content records.
    pub fn new(content_records: Rc<RefCell<Vec<ContentRecord>>>) -> Self {
        let num_contents = content_records.borrow().len();
        ContentRegion {
            content_records,
            contents: vec![Vec::new(); num_contents],
        }
    }

    /// Dumps the entire ContentRegion back into binary data that can be written to a file, with
    /// every content padded out to a 64-byte boundary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf: Vec<u8> = Vec::new();
        for content in &self.contents {
            buf.write_all(content)?;
            buf.resize(buf.len().next_multiple_of(64), 0);
        }
        Ok(buf)
    }

    fn check_position(&self, index: usize) -> Result<(), ContentError> {
        if index >= self.contents.len() {
            return Err(ContentError::IndexOutOfRange {
                index,
                max: self.contents.len().saturating_sub(1),
            });
        }
        Ok(())
    }

    fn position_from_cid(&self, cid: u32) -> Result<usize, ContentError> {
        self.content_records
            .borrow()
            .iter()
            .position(|record| record.content_id == cid)
            .ok_or(ContentError::CIDNotFound(cid))
    }

    /// Gets the encrypted content file from the ContentRegion at the specified index, trimmed of
    /// its padding down to the next block boundary past the recorded size.
    pub fn get_enc_content_by_index(&self, index: usize) -> Result<Vec<u8>, ContentError> {
        self.check_position(index)?;
        Ok(self.contents[index].clone())
    }

    /// Gets the decrypted content file from the ContentRegion at the specified index. The result
    /// is trimmed to the recorded size and checked against the recorded hash.
    pub fn get_content_by_index(
        &self,
        index: usize,
        title_key: [u8; 16],
    ) -> Result<Vec<u8>, ContentError> {
        let content = self.get_enc_content_by_index(index)?;
        let record = self.content_records.borrow()[index].clone();
        let mut content_dec = crypto::decrypt_content(&content, title_key, record.index);
        content_dec.truncate(record.content_size as usize);
        let content_hash = sha1_hash(&content_dec);
        if content_hash != record.content_hash {
            return Err(ContentError::BadHash {
                index: record.index,
                expected: hex::encode(record.content_hash),
                actual: hex::encode(content_hash),
            });
        }
        Ok(content_dec)
    }

    /// Gets the encrypted content file from the ContentRegion with the specified Content ID.
    pub fn get_enc_content_by_cid(&self, cid: u32) -> Result<Vec<u8>, ContentError> {
        let index = self.position_from_cid(cid)?;
        self.get_enc_content_by_index(index)
    }

    /// Gets the decrypted content file from the ContentRegion with the specified Content ID.
    pub fn get_content_by_cid(&self, cid: u32, title_key: [u8; 16]) -> Result<Vec<u8>, ContentError> {
        let index = self.position_from_cid(cid)?;
        self.get_content_by_index(index, title_key)
    }

    /// Loads existing content into the specified index of a ContentRegion instance. This content
    /// must already be encrypted; its record is left untouched.
    pub fn load_enc_content(&mut self, content: &[u8], index: usize) -> Result<(), ContentError> {
        self.check_position(index)?;
        // Trim any 64-byte storage padding; everything past the block boundary is not ciphertext.
        let size = self.content_records.borrow()[index].content_size.next_multiple_of(16);
        let mut content = content.to_vec();
        content.truncate(size as usize);
        self.contents[index] = content;
        Ok(())
    }

    /// Loads existing decrypted content into the specified index of a ContentRegion instance.
    /// The content must match the size and hash listed in the record at that index, and is
    /// stored encrypted under the provided Title Key.
    pub fn load_content(
        &mut self,
        content: &[u8],
        index: usize,
        title_key: [u8; 16],
    ) -> Result<(), ContentError> {
        self.check_position(index)?;
        let record = self.content_records.borrow()[index].clone();
        let content_hash = sha1_hash(content);
        if content_hash != record.content_hash {
            return Err(ContentError::BadHash {
                index: record.index,
                expected: hex::encode(record.content_hash),
                actual: hex::encode(content_hash),
            });
        }
        self.contents[index] = crypto::encrypt_content(content, title_key, record.index);
        Ok(())
    }

    /// Sets the content at the specified index to the provided encrypted content. The size and
    /// hash of the matching decrypted data must be supplied so the record can be updated.
    /// Optionally takes a new Content ID or content type, keeping the existing values otherwise.
    pub fn set_enc_content(
        &mut self,
        content: &[u8],
        index: usize,
        content_size: u64,
        content_hash: [u8; 20],
        cid: Option<u32>,
        content_type: Option<ContentType>,
    ) -> Result<(), ContentError> {
        self.check_position(index)?;
        if let Some(cid) = cid {
            let records = self.content_records.borrow();
            if records
                .iter()
                .enumerate()
                .any(|(i, record)| i != index && record.content_id == cid)
            {
                return Err(ContentError::CIDAlreadyExists(cid));
            }
        }
        let mut records = self.content_records.borrow_mut();
        records[index].content_size = content_size;
        records[index].content_hash = content_hash;
        if let Some(cid) = cid {
            records[index].content_id = cid;
        }
        if let Some(content_type) = content_type {
            records[index].content_type = content_type;
        }
        self.contents[index] = content.to_vec();
        Ok(())
    }

    /// Sets the content at the specified index to the provided decrypted content, encrypting it
    /// under the provided Title Key and recording its size and hash. Optionally takes a new
    /// Content ID or content type, keeping the existing values otherwise.
    pub fn set_content(
        &mut self,
        content: &[u8],
        index: usize,
        cid: Option<u32>,
        content_type: Option<ContentType>,
        title_key: [u8; 16],
    ) -> Result<(), ContentError> {
        self.check_position(index)?;
        let record_index = self.content_records.borrow()[index].index;
        let content_enc = crypto::encrypt_content(content, title_key, record_index);
        self.set_enc_content(
            &content_enc,
            index,
            content.len() as u64,
            sha1_hash(content),
            cid,
            content_type,
        )?;
        Ok(())
    }

    /// Adds new encrypted content to the end of the content list and content records. The
    /// provided Content ID, index, type, decrypted size, and decrypted hash are recorded.
    pub fn add_enc_content(
        &mut self,
        content: &[u8],
        index: u16,
        cid: u32,
        content_type: ContentType,
        content_size: u64,
        content_hash: [u8; 20],
    ) -> Result<(), ContentError> {
        {
            let records = self.content_records.borrow();
            if records.iter().any(|record| record.index == index) {
                return Err(ContentError::IndexAlreadyExists(index));
            }
            if records.iter().any(|record| record.content_id == cid) {
                return Err(ContentError::CIDAlreadyExists(cid));
            }
        }
        self.contents.push(content.to_vec());
        self.content_records.borrow_mut().push(ContentRecord {
            content_id: cid,
            index,
            content_type,
            content_size,
            content_hash,
        });
        Ok(())
    }

    /// Adds new decrypted content to the end of the content list and content records, encrypted
    /// under the provided Title Key. An index one past the highest recorded index is assigned.
    pub fn add_content(
        &mut self,
        content: &[u8],
        cid: u32,
        content_type: ContentType,
        title_key: [u8; 16],
    ) -> Result<(), ContentError> {
        let new_index = self
            .content_records
            .borrow()
            .iter()
            .map(|record| record.index + 1)
            .max()
            .unwrap_or(0);
        let content_enc = crypto::encrypt_content(content, title_key, new_index);
        self.add_enc_content(
            &content_enc,
            new_index,
            cid,
            content_type,
            content.len() as u64,
            sha1_hash(content),
        )?;
        Ok(())
    }

    /// Removes the content at the specified index from the content list and content records.
    /// This may leave a gap in the recorded indices, which the Wii tolerates.
    pub fn remove_content(&mut self, index: usize) -> Result<(), ContentError> {
        self.check_position(index)?;
        self.contents.remove(index);
        self.content_records.borrow_mut().remove(index);
        Ok(())
    }
}

/// One entry in a shared content map: the on-disk file name (eight ASCII hex digits) and the
/// SHA-1 of the decrypted content it stores.
#[derive(Debug, Clone)]
pub struct SharedContentEntry {
    pub name: String,
    pub hash: [u8; 20],
}

#[derive(Debug, Default)]
/// A structure that represents the `content.map` file used to track the shared contents
/// installed to the `/shared1/` directory of a NAND filesystem.
pub struct SharedContentMap {
    pub entries: Vec<SharedContentEntry>,
}

impl SharedContentMap {
    /// Creates a new, empty SharedContentMap instance.
    pub fn new() -> Self {
        SharedContentMap { entries: Vec::new() }
    }

    /// Creates a new SharedContentMap instance from the binary data of a `content.map` file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ContentError> {
        if data.len() % 28 != 0 {
            return Err(ContentError::InvalidContentMap(data.len()));
        }
        let mut entries = Vec::with_capacity(data.len() / 28);
        let mut buf = Cursor::new(data);
        for _ in 0..data.len() / 28 {
            let mut name = [0u8; 8];
            buf.read_exact(&mut name)?;
            let mut hash = [0u8; 20];
            buf.read_exact(&mut hash)?;
            entries.push(SharedContentEntry {
                name: String::from_utf8_lossy(&name).to_string(),
                hash,
            });
        }
        Ok(SharedContentMap { entries })
    }

    /// Dumps the data in a SharedContentMap back into binary data that can be written to a file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf: Vec<u8> = Vec::new();
        for entry in &self.entries {
            let mut name = entry.name.clone().into_bytes();
            name.resize(8, b'0');
            buf.write_all(&name)?;
            buf.write_all(&entry.hash)?;
        }
        Ok(buf)
    }

    /// Records a shared content hash in the map. Returns the file name the content should be
    /// stored under, or None if the hash is already installed and nothing needs to be written.
    pub fn add(&mut self, hash: &[u8; 20]) -> Option<String> {
        if self.lookup(hash).is_some() {
            return None;
        }
        let name = format!("{:08x}", self.entries.len());
        self.entries.push(SharedContentEntry {
            name: name.clone(),
            hash: *hash,
        });
        Some(name)
    }

    /// Gets the file name a shared content hash is stored under, if it is installed.
    pub fn lookup(&self, hash: &[u8; 20]) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| entry.hash == *hash)
            .map(|entry| entry.name.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::title::tmd::tests::sample_record;

    pub(crate) fn sample_region(
        title_key: [u8; 16],
        plains: &[&[u8]],
    ) -> (ContentRegion, Rc<RefCell<Vec<ContentRecord>>>) {
        let records: Vec<ContentRecord> = plains
            .iter()
            .enumerate()
            .map(|(i, data)| sample_record(i as u16, 0x20 + i as u32, data))
            .collect();
        let records = Rc::new(RefCell::new(records));
        let mut region = ContentRegion::new(Rc::clone(&records));
        for (i, data) in plains.iter().enumerate() {
            region.load_content(data, i, title_key).unwrap();
        }
        (region, records)
    }

    #[test]
    fn region_round_trip() {
        let title_key = [0x13u8; 16];
        let (region, records) = sample_region(title_key, &[b"first content", b"second, longer content"]);
        let raw = region.to_bytes().unwrap();
        assert_eq!(raw.len() % 64, 0);
        let parsed = ContentRegion::from_bytes(&raw, records).unwrap();
        assert_eq!(parsed.get_content_by_index(0, title_key).unwrap(), b"first content");
        assert_eq!(
            parsed.get_content_by_index(1, title_key).unwrap(),
            b"second, longer content"
        );
    }

    #[test]
    fn corrupted_ciphertext_fails_hash_check() {
        let title_key = [0x13u8; 16];
        let (mut region, _) = sample_region(title_key, &[b"some content"]);
        let mut enc = region.get_enc_content_by_index(0).unwrap();
        enc[0] ^= 0xFF;
        region.load_enc_content(&enc, 0).unwrap();
        assert!(matches!(
            region.get_content_by_index(0, title_key),
            Err(ContentError::BadHash { index: 0, .. })
        ));
    }

    #[test]
    fn set_content_updates_record() {
        let title_key = [0x13u8; 16];
        let (mut region, records) = sample_region(title_key, &[b"old content"]);
        region.set_content(b"replacement", 0, None, None, title_key).unwrap();
        assert_eq!(records.borrow()[0].content_size, 11);
        assert_eq!(records.borrow()[0].content_hash, sha1_hash(b"replacement"));
        assert_eq!(region.get_content_by_index(0, title_key).unwrap(), b"replacement");
    }

    #[test]
    fn load_content_checks_hash() {
        let title_key = [0x13u8; 16];
        let (mut region, _) = sample_region(title_key, &[b"expected data"]);
        assert!(matches!(
            region.load_content(b"something else", 0, title_key),
            Err(ContentError::BadHash { .. })
        ));
    }

    #[test]
    fn add_and_remove_content() {
        let title_key = [0x13u8; 16];
        let (mut region, records) = sample_region(title_key, &[b"base"]);
        region.add_content(b"extra", 0x30, ContentType::Normal, title_key).unwrap();
        assert_eq!(records.borrow().len(), 2);
        assert_eq!(records.borrow()[1].index, 1);
        assert_eq!(region.get_content_by_cid(0x30, title_key).unwrap(), b"extra");
        assert!(matches!(
            region.add_enc_content(b"dup", 1, 0x99, ContentType::Normal, 3, [0; 20]),
            Err(ContentError::IndexAlreadyExists(1))
        ));
        region.remove_content(1).unwrap();
        assert_eq!(records.borrow().len(), 1);
        assert!(region.get_content_by_cid(0x30, title_key).is_err());
    }

    #[test]
    fn unknown_lookups_are_reported() {
        let title_key = [0x13u8; 16];
        let (region, _) = sample_region(title_key, &[b"base"]);
        assert!(matches!(
            region.get_enc_content_by_index(4),
            Err(ContentError::IndexOutOfRange { index: 4, .. })
        ));
        assert!(matches!(
            region.get_enc_content_by_cid(0x99),
            Err(ContentError::CIDNotFound(0x99))
        ));
    }

    #[test]
    fn shared_content_map_round_trip() {
        let mut map = SharedContentMap::new();
        let name_a = map.add(&[0xAA; 20]).unwrap();
        assert_eq!(name_a, "00000000");
        assert_eq!(map.add(&[0xBB; 20]).unwrap(), "00000001");
        // A hash that is already present is not installed twice.
        assert!(map.add(&[0xAA; 20]).is_none());
        let raw = map.to_bytes().unwrap();
        assert_eq!(raw.len(), 56);
        let parsed = SharedContentMap::from_bytes(&raw).unwrap();
        assert_eq!(parsed.lookup(&[0xBB; 20]).unwrap(), "00000001");
        assert!(parsed.lookup(&[0xCC; 20]).is_none());
    }

    #[test]
    fn malformed_content_map_is_rejected() {
        assert!(matches!(
            SharedContentMap::from_bytes(&[0u8; 30]),
            Err(ContentError::InvalidContentMap(30))
        ));
    }
}
