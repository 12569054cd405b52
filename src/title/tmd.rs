// title/tmd.rs from wadforge
//
// Implements the structures and methods required for TMD parsing and editing.

use std::cell::RefCell;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::rc::Rc;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use crate::title::crypto::sha1_hash;
use crate::title::signature::{SignatureBlock, SignatureError};

#[derive(Debug, Error)]
pub enum TMDError {
    #[error("TMD data could not be fakesigned")]
    CannotFakesign,
    #[error("signature issuer string must not exceed 64 characters (was {0})")]
    IssuerTooLong(usize),
    #[error("TMD data contains content record with invalid type `{0}`")]
    InvalidContentType(u16),
    #[error("content record index {0} appears more than once")]
    DuplicateIndex(u16),
    #[error("content record with Content ID {0} appears more than once")]
    DuplicateCID(u32),
    #[error("boot index {boot_index} does not match any of the {num_contents} content records")]
    InvalidBootIndex { boot_index: u16, num_contents: u16 },
    #[error("no content record exists with index {0}")]
    IndexNotFound(u16),
    #[error("no content record exists with Content ID {0}")]
    CIDNotFound(u32),
    #[error("signature processing error")]
    Signature(#[from] SignatureError),
    #[error("TMD data is not in a valid format")]
    IO(#[from] std::io::Error),
}

pub enum TitleType {
    System,
    Game,
    Channel,
    SystemChannel,
    GameChannel,
    DLC,
    HiddenChannel,
    Unknown,
}

impl fmt::Display for TitleType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TitleType::System => write!(f, "System"),
            TitleType::Game => write!(f, "Game"),
            TitleType::Channel => write!(f, "Channel"),
            TitleType::SystemChannel => write!(f, "SystemChannel"),
            TitleType::GameChannel => write!(f, "GameChannel"),
            TitleType::DLC => write!(f, "DLC"),
            TitleType::HiddenChannel => write!(f, "HiddenChannel"),
            TitleType::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Normal,
    Development,
    HashTree,
    DLC,
    Shared,
}

impl ContentType {
    pub fn from_value(value: u16) -> Result<Self, TMDError> {
        match value {
            0x0001 => Ok(ContentType::Normal),
            0x0002 => Ok(ContentType::Development),
            0x0003 => Ok(ContentType::HashTree),
            0x4001 => Ok(ContentType::DLC),
            0x8001 => Ok(ContentType::Shared),
            _ => Err(TMDError::InvalidContentType(value)),
        }
    }

    pub fn value(&self) -> u16 {
        match self {
            ContentType::Normal => 0x0001,
            ContentType::Development => 0x0002,
            ContentType::HashTree => 0x0003,
            ContentType::DLC => 0x4001,
            ContentType::Shared => 0x8001,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContentType::Normal => write!(f, "Normal"),
            ContentType::Development => write!(f, "Development/Unknown"),
            ContentType::HashTree => write!(f, "Hash Tree"),
            ContentType::DLC => write!(f, "DLC"),
            ContentType::Shared => write!(f, "Shared"),
        }
    }
}

pub enum AccessRight {
    AHB = 0,
    DVDVideo = 1,
}

#[derive(Debug, Clone)]
/// A structure that represents the metadata of a content file in a digital Wii title. The hash
/// is of the decrypted content, trimmed to exactly `content_size` bytes.
pub struct ContentRecord {
    pub content_id: u32,
    pub index: u16,
    pub content_type: ContentType,
    pub content_size: u64,
    pub content_hash: [u8; 20],
}

impl ContentRecord {
    fn from_reader<R: Read>(reader: &mut R) -> Result<Self, TMDError> {
        let content_id = reader.read_u32::<BigEndian>()?;
        let index = reader.read_u16::<BigEndian>()?;
        let content_type = ContentType::from_value(reader.read_u16::<BigEndian>()?)?;
        let content_size = reader.read_u64::<BigEndian>()?;
        let mut content_hash = [0u8; 20];
        reader.read_exact(&mut content_hash)?;
        Ok(ContentRecord {
            content_id,
            index,
            content_type,
            content_size,
            content_hash,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_u32::<BigEndian>(self.content_id)?;
        writer.write_u16::<BigEndian>(self.index)?;
        writer.write_u16::<BigEndian>(self.content_type.value())?;
        writer.write_u64::<BigEndian>(self.content_size)?;
        writer.write_all(&self.content_hash)?;
        Ok(())
    }
}

#[derive(Debug)]
/// A structure that represents a Wii TMD (Title Metadata) file.
pub struct TMD {
    pub signature: SignatureBlock,
    pub signature_issuer: [u8; 64],
    pub tmd_version: u8,
    pub ca_crl_version: u8,
    pub signer_crl_version: u8,
    pub is_vwii: u8,
    pub ios_tid: [u8; 8],
    pub title_id: [u8; 8],
    pub title_type: [u8; 4],
    pub group_id: u16,
    padding1: [u8; 2],
    pub region: u16,
    pub ratings: [u8; 16],
    reserved1: [u8; 12],
    pub ipc_mask: [u8; 12],
    reserved2: [u8; 18],
    pub access_rights: u32,
    pub title_version: u16,
    pub boot_index: u16,
    pub minor_version: u16,
    /// The record list is shared with the ContentRegion loaded against this TMD, so content
    /// edits land in both places. The TMD owns the single source of truth.
    pub content_records: Rc<RefCell<Vec<ContentRecord>>>,
}

impl TMD {
    /// Creates a new TMD instance from the binary data of a TMD file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TMDError> {
        let mut buf = Cursor::new(data);
        let signature = SignatureBlock::from_reader(&mut buf)?;
        let mut signature_issuer = [0u8; 64];
        buf.read_exact(&mut signature_issuer)?;
        let tmd_version = buf.read_u8()?;
        let ca_crl_version = buf.read_u8()?;
        let signer_crl_version = buf.read_u8()?;
        let is_vwii = buf.read_u8()?;
        let mut ios_tid = [0u8; 8];
        buf.read_exact(&mut ios_tid)?;
        let mut title_id = [0u8; 8];
        buf.read_exact(&mut title_id)?;
        let mut title_type = [0u8; 4];
        buf.read_exact(&mut title_type)?;
        let group_id = buf.read_u16::<BigEndian>()?;
        let mut padding1 = [0u8; 2];
        buf.read_exact(&mut padding1)?;
        let region = buf.read_u16::<BigEndian>()?;
        let mut ratings = [0u8; 16];
        buf.read_exact(&mut ratings)?;
        let mut reserved1 = [0u8; 12];
        buf.read_exact(&mut reserved1)?;
        let mut ipc_mask = [0u8; 12];
        buf.read_exact(&mut ipc_mask)?;
        let mut reserved2 = [0u8; 18];
        buf.read_exact(&mut reserved2)?;
        let access_rights = buf.read_u32::<BigEndian>()?;
        let title_version = buf.read_u16::<BigEndian>()?;
        let num_contents = buf.read_u16::<BigEndian>()?;
        let boot_index = buf.read_u16::<BigEndian>()?;
        let minor_version = buf.read_u16::<BigEndian>()?;
        let mut content_records = Vec::with_capacity(num_contents as usize);
        for _ in 0..num_contents {
            content_records.push(ContentRecord::from_reader(&mut buf)?);
        }
        Ok(TMD {
            signature,
            signature_issuer,
            tmd_version,
            ca_crl_version,
            signer_crl_version,
            is_vwii,
            ios_tid,
            title_id,
            title_type,
            group_id,
            padding1,
            region,
            ratings,
            reserved1,
            ipc_mask,
            reserved2,
            access_rights,
            title_version,
            boot_index,
            minor_version,
            content_records: Rc::new(RefCell::new(content_records)),
        })
    }

    /// Dumps the data in a TMD back into binary data that can be written to a file. The number
    /// of contents is always recomputed from the record list, and the records are checked for
    /// index and Content ID collisions first.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TMDError> {
        let records = self.content_records.borrow();
        self.validate_records(&records)?;
        let mut buf: Vec<u8> = Vec::new();
        self.signature.write_to(&mut buf)?;
        buf.write_all(&self.signature_issuer)?;
        buf.write_u8(self.tmd_version)?;
        buf.write_u8(self.ca_crl_version)?;
        buf.write_u8(self.signer_crl_version)?;
        buf.write_u8(self.is_vwii)?;
        buf.write_all(&self.ios_tid)?;
        buf.write_all(&self.title_id)?;
        buf.write_all(&self.title_type)?;
        buf.write_u16::<BigEndian>(self.group_id)?;
        buf.write_all(&self.padding1)?;
        buf.write_u16::<BigEndian>(self.region)?;
        buf.write_all(&self.ratings)?;
        buf.write_all(&self.reserved1)?;
        buf.write_all(&self.ipc_mask)?;
        buf.write_all(&self.reserved2)?;
        buf.write_u32::<BigEndian>(self.access_rights)?;
        buf.write_u16::<BigEndian>(self.title_version)?;
        buf.write_u16::<BigEndian>(records.len() as u16)?;
        buf.write_u16::<BigEndian>(self.boot_index)?;
        buf.write_u16::<BigEndian>(self.minor_version)?;
        for record in records.iter() {
            record.write_to(&mut buf)?;
        }
        Ok(buf)
    }

    fn validate_records(&self, records: &[ContentRecord]) -> Result<(), TMDError> {
        for (i, record) in records.iter().enumerate() {
            if records[..i].iter().any(|r| r.index == record.index) {
                return Err(TMDError::DuplicateIndex(record.index));
            }
            if records[..i].iter().any(|r| r.content_id == record.content_id) {
                return Err(TMDError::DuplicateCID(record.content_id));
            }
        }
        if !records.is_empty() && self.boot_index as usize >= records.len() {
            return Err(TMDError::InvalidBootIndex {
                boot_index: self.boot_index,
                num_contents: records.len() as u16,
            });
        }
        Ok(())
    }

    /// Gets the number of contents listed in the TMD.
    pub fn num_contents(&self) -> u16 {
        self.content_records.borrow().len() as u16
    }

    /// Gets a copy of the content record with the specified index.
    pub fn content_record(&self, index: u16) -> Result<ContentRecord, TMDError> {
        self.content_records
            .borrow()
            .iter()
            .find(|record| record.index == index)
            .cloned()
            .ok_or(TMDError::IndexNotFound(index))
    }

    /// Gets a copy of the content record with the specified Content ID.
    pub fn content_record_by_cid(&self, cid: u32) -> Result<ContentRecord, TMDError> {
        self.content_records
            .borrow()
            .iter()
            .find(|record| record.content_id == cid)
            .cloned()
            .ok_or(TMDError::CIDNotFound(cid))
    }

    /// Adds a new content record to the TMD. The record's index and Content ID must not already
    /// be present.
    pub fn add_content_record(&mut self, record: ContentRecord) -> Result<(), TMDError> {
        let mut records = self.content_records.borrow_mut();
        if records.iter().any(|r| r.index == record.index) {
            return Err(TMDError::DuplicateIndex(record.index));
        }
        if records.iter().any(|r| r.content_id == record.content_id) {
            return Err(TMDError::DuplicateCID(record.content_id));
        }
        records.push(record);
        Ok(())
    }

    /// Removes the content record with the specified index from the TMD.
    pub fn remove_content_record(&mut self, index: u16) -> Result<ContentRecord, TMDError> {
        let mut records = self.content_records.borrow_mut();
        let position = records
            .iter()
            .position(|record| record.index == index)
            .ok_or(TMDError::IndexNotFound(index))?;
        Ok(records.remove(position))
    }

    /// Gets whether a TMD is fakesigned using the strncmp (trucha) bug or not.
    pub fn is_fakesigned(&self) -> bool {
        if !self.signature.is_null() {
            return false;
        }
        let Ok(tmd_body) = self.to_bytes() else {
            return false;
        };
        sha1_hash(&tmd_body[self.signature.body_offset()..])[0] == 0
    }

    /// Fakesigns a TMD for use with the strncmp (trucha) bug. The signature is erased and the
    /// normally unused minor version field is walked until the body hash gains a leading zero.
    pub fn fakesign(&mut self) -> Result<(), TMDError> {
        self.signature.nullify();
        let body_offset = self.signature.body_offset();
        for attempt in 0..=u16::MAX {
            self.minor_version = attempt;
            let tmd_body = self.to_bytes()?;
            if sha1_hash(&tmd_body[body_offset..])[0] == 0 {
                return Ok(());
            }
        }
        Err(TMDError::CannotFakesign)
    }

    /// Gets the 3-letter code of the region a TMD was created for.
    pub fn region_name(&self) -> &str {
        match self.region {
            0 => "JPN",
            1 => "USA",
            2 => "EUR",
            3 => "None",
            4 => "KOR",
            _ => "Unknown",
        }
    }

    /// Gets the type of title described by a TMD.
    pub fn title_type(&self) -> TitleType {
        match u32::from_be_bytes(self.title_id[..4].try_into().unwrap()) {
            0x00000001 => TitleType::System,
            0x00010000 => TitleType::Game,
            0x00010001 => TitleType::Channel,
            0x00010002 => TitleType::SystemChannel,
            0x00010004 => TitleType::GameChannel,
            0x00010005 => TitleType::DLC,
            0x00010008 => TitleType::HiddenChannel,
            _ => TitleType::Unknown,
        }
    }

    /// Gets whether a specified access right is enabled in a TMD.
    pub fn check_access_right(&self, right: AccessRight) -> bool {
        self.access_rights & (1 << right as u8) != 0
    }

    /// Gets the name of the certificate used to sign a TMD as a string.
    pub fn signature_issuer(&self) -> String {
        String::from_utf8_lossy(&self.signature_issuer).trim_end_matches('\0').to_owned()
    }

    /// Sets a new name for the certificate used to sign a TMD.
    pub fn set_signature_issuer(&mut self, signature_issuer: String) -> Result<(), TMDError> {
        if signature_issuer.len() > 64 {
            return Err(TMDError::IssuerTooLong(signature_issuer.len()));
        }
        let mut issuer = signature_issuer.into_bytes();
        issuer.resize(64, 0);
        self.signature_issuer = issuer.try_into().unwrap();
        Ok(())
    }

    /// Gets whether this TMD was signed by the development certificate authority.
    pub fn is_dev(&self) -> bool {
        self.signature_issuer().starts_with("Root-CA00000002")
    }

    /// Gets whether this TMD describes a vWii title or not.
    pub fn is_vwii(&self) -> bool {
        self.is_vwii == 1
    }
}
