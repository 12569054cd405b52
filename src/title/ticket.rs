// title/ticket.rs from wadforge
//
// Implements the structures and methods required for Ticket parsing and editing.

use std::io::{Cursor, Read, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use crate::title::commonkeys::CommonKeyError;
use crate::title::crypto::{decrypt_title_key, encrypt_title_key, sha1_hash};
use crate::title::signature::{SignatureBlock, SignatureError};

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("only version 0 Tickets are supported (found version {0})")]
    UnsupportedVersion(u8),
    #[error("Ticket data could not be fakesigned")]
    CannotFakesign,
    #[error("common key error")]
    CommonKey(#[from] CommonKeyError),
    #[error("signature processing error")]
    Signature(#[from] SignatureError),
    #[error("Ticket data is not in a valid format")]
    IO(#[from] std::io::Error),
}

#[derive(Debug, Copy, Clone)]
/// A single launch restriction applied by a Ticket: the kind of limit and its maximum value.
pub struct TitleLimit {
    pub limit_type: u32,
    pub limit_max: u32,
}

#[derive(Debug)]
/// A structure that represents a Wii Ticket file, which carries the Title Key wrapped under one
/// of the common keys.
pub struct Ticket {
    pub signature: SignatureBlock,
    pub signature_issuer: [u8; 64],
    pub ecdh_data: [u8; 60],
    pub ticket_version: u8,
    reserved1: [u8; 2],
    pub title_key_enc: [u8; 16],
    unknown1: [u8; 1],
    pub ticket_id: [u8; 8],
    pub console_id: [u8; 4],
    pub title_id: [u8; 8],
    // Unused u16 inside the signed body; doubles as the fakesign scratch slot.
    unknown2: [u8; 2],
    pub title_version: u16,
    pub permitted_titles_mask: [u8; 4],
    pub permit_mask: [u8; 4],
    pub title_export_allowed: u8,
    pub common_key_index: u8,
    unknown3: [u8; 48],
    pub content_access_permission: [u8; 64],
    padding1: [u8; 2],
    pub title_limits: [TitleLimit; 8],
}

impl Ticket {
    /// Creates a new Ticket instance from the binary data of a Ticket file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TicketError> {
        let mut buf = Cursor::new(data);
        let signature = SignatureBlock::from_reader(&mut buf)?;
        let mut signature_issuer = [0u8; 64];
        buf.read_exact(&mut signature_issuer)?;
        let mut ecdh_data = [0u8; 60];
        buf.read_exact(&mut ecdh_data)?;
        let ticket_version = buf.read_u8()?;
        if ticket_version != 0 {
            return Err(TicketError::UnsupportedVersion(ticket_version));
        }
        let mut reserved1 = [0u8; 2];
        buf.read_exact(&mut reserved1)?;
        let mut title_key_enc = [0u8; 16];
        buf.read_exact(&mut title_key_enc)?;
        let mut unknown1 = [0u8; 1];
        buf.read_exact(&mut unknown1)?;
        let mut ticket_id = [0u8; 8];
        buf.read_exact(&mut ticket_id)?;
        let mut console_id = [0u8; 4];
        buf.read_exact(&mut console_id)?;
        let mut title_id = [0u8; 8];
        buf.read_exact(&mut title_id)?;
        let mut unknown2 = [0u8; 2];
        buf.read_exact(&mut unknown2)?;
        let title_version = buf.read_u16::<BigEndian>()?;
        let mut permitted_titles_mask = [0u8; 4];
        buf.read_exact(&mut permitted_titles_mask)?;
        let mut permit_mask = [0u8; 4];
        buf.read_exact(&mut permit_mask)?;
        let title_export_allowed = buf.read_u8()?;
        let common_key_index = buf.read_u8()?;
        let mut unknown3 = [0u8; 48];
        buf.read_exact(&mut unknown3)?;
        let mut content_access_permission = [0u8; 64];
        buf.read_exact(&mut content_access_permission)?;
        let mut padding1 = [0u8; 2];
        buf.read_exact(&mut padding1)?;
        let mut title_limits = [TitleLimit { limit_type: 0, limit_max: 0 }; 8];
        for limit in title_limits.iter_mut() {
            limit.limit_type = buf.read_u32::<BigEndian>()?;
            limit.limit_max = buf.read_u32::<BigEndian>()?;
        }
        Ok(Ticket {
            signature,
            signature_issuer,
            ecdh_data,
            ticket_version,
            reserved1,
            title_key_enc,
            unknown1,
            ticket_id,
            console_id,
            title_id,
            unknown2,
            title_version,
            permitted_titles_mask,
            permit_mask,
            title_export_allowed,
            common_key_index,
            unknown3,
            content_access_permission,
            padding1,
            title_limits,
        })
    }

    /// Dumps the data in a Ticket back into binary data that can be written to a file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf: Vec<u8> = Vec::new();
        self.signature.write_to(&mut buf)?;
        buf.write_all(&self.signature_issuer)?;
        buf.write_all(&self.ecdh_data)?;
        buf.write_u8(self.ticket_version)?;
        buf.write_all(&self.reserved1)?;
        buf.write_all(&self.title_key_enc)?;
        buf.write_all(&self.unknown1)?;
        buf.write_all(&self.ticket_id)?;
        buf.write_all(&self.console_id)?;
        buf.write_all(&self.title_id)?;
        buf.write_all(&self.unknown2)?;
        buf.write_u16::<BigEndian>(self.title_version)?;
        buf.write_all(&self.permitted_titles_mask)?;
        buf.write_all(&self.permit_mask)?;
        buf.write_u8(self.title_export_allowed)?;
        buf.write_u8(self.common_key_index)?;
        buf.write_all(&self.unknown3)?;
        buf.write_all(&self.content_access_permission)?;
        buf.write_all(&self.padding1)?;
        for limit in &self.title_limits {
            buf.write_u32::<BigEndian>(limit.limit_type)?;
            buf.write_u32::<BigEndian>(limit.limit_max)?;
        }
        Ok(buf)
    }

    /// Gets the decrypted Title Key carried by this Ticket.
    pub fn dec_title_key(&self) -> Result<[u8; 16], TicketError> {
        let title_key = decrypt_title_key(
            self.title_key_enc,
            self.common_key_index,
            self.title_id,
            self.is_dev(),
        )?;
        Ok(title_key)
    }

    /// Sets a new Title Key, wrapping it under the currently selected common key with the
    /// current Title ID as the IV.
    pub fn set_title_key(&mut self, title_key: [u8; 16]) -> Result<(), TicketError> {
        self.title_key_enc = encrypt_title_key(
            title_key,
            self.common_key_index,
            self.title_id,
            self.is_dev(),
        )?;
        Ok(())
    }

    /// Sets a new Title ID. Because the Title ID is the IV that wraps the Title Key, the key is
    /// unwrapped first and re-wrapped under the new ID so that its cleartext value survives.
    pub fn set_title_id(&mut self, title_id: [u8; 8]) -> Result<(), TicketError> {
        let title_key = self.dec_title_key()?;
        self.title_id = title_id;
        self.set_title_key(title_key)?;
        Ok(())
    }

    /// Sets a new common key index, re-wrapping the Title Key under the newly selected key. The
    /// index must name one of the known retail keys, except on development Tickets, where the
    /// issuer selects the development key no matter what the index says.
    pub fn set_common_key_index(&mut self, index: u8) -> Result<(), TicketError> {
        if !self.is_dev() && index > 2 {
            return Err(TicketError::CommonKey(CommonKeyError::InvalidCommonKeyIndex(index)));
        }
        let title_key = self.dec_title_key()?;
        self.common_key_index = index;
        self.set_title_key(title_key)?;
        Ok(())
    }

    /// Gets whether this Ticket was signed with the development certificates, which selects the
    /// development common key no matter what the common key index says.
    pub fn is_dev(&self) -> bool {
        self.signature_issuer().starts_with("Root-CA00000002")
    }

    /// Gets whether a Ticket is fakesigned using the strncmp (trucha) bug or not.
    pub fn is_fakesigned(&self) -> bool {
        if !self.signature.is_null() {
            return false;
        }
        let Ok(ticket_body) = self.to_bytes() else {
            return false;
        };
        sha1_hash(&ticket_body[self.signature.body_offset()..])[0] == 0
    }

    /// Fakesigns a Ticket for use with the strncmp (trucha) bug. The signature is erased and the
    /// unused u16 after the Title ID is walked until the body hash gains a leading zero.
    pub fn fakesign(&mut self) -> Result<(), TicketError> {
        self.signature.nullify();
        let body_offset = self.signature.body_offset();
        for attempt in 0..=u16::MAX {
            self.unknown2 = attempt.to_be_bytes();
            let ticket_body = self.to_bytes()?;
            if sha1_hash(&ticket_body[body_offset..])[0] == 0 {
                return Ok(());
            }
        }
        Err(TicketError::CannotFakesign)
    }

    /// Gets the name of the certificate used to sign a Ticket as a string.
    pub fn signature_issuer(&self) -> String {
        String::from_utf8_lossy(&self.signature_issuer).trim_end_matches('\0').to_owned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::title::signature::SignatureType;

    pub(crate) fn sample_ticket(title_id: [u8; 8], title_key: [u8; 16]) -> Ticket {
        let mut signature_issuer = [0u8; 64];
        signature_issuer[..18].copy_from_slice(b"Root-CA00000001-XS");
        let mut ticket = Ticket {
            signature: SignatureBlock::new_null(SignatureType::Rsa2048Sha1),
            signature_issuer,
            ecdh_data: [0; 60],
            ticket_version: 0,
            reserved1: [0; 2],
            title_key_enc: [0; 16],
            unknown1: [0; 1],
            ticket_id: [0; 8],
            console_id: [0; 4],
            title_id,
            unknown2: [0; 2],
            title_version: 0,
            permitted_titles_mask: [0; 4],
            permit_mask: [0; 4],
            title_export_allowed: 0,
            common_key_index: 0,
            unknown3: [0; 48],
            content_access_permission: [0; 64],
            padding1: [0; 2],
            title_limits: [TitleLimit { limit_type: 0, limit_max: 0 }; 8],
        };
        ticket.set_title_key(title_key).unwrap();
        ticket
    }

    #[test]
    fn serialized_length_is_v0_ticket_size() {
        let ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        assert_eq!(ticket.to_bytes().unwrap().len(), 0x2A4);
    }

    #[test]
    fn parse_serialize_round_trip() {
        let ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        let raw = ticket.to_bytes().unwrap();
        let parsed = Ticket::from_bytes(&raw).unwrap();
        assert_eq!(parsed.title_id, ticket.title_id);
        assert_eq!(parsed.title_key_enc, ticket.title_key_enc);
        assert_eq!(parsed.to_bytes().unwrap(), raw);
    }

    #[test]
    fn title_key_cycle() {
        let mut ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        ticket.set_title_key([0x5A; 16]).unwrap();
        assert_ne!(ticket.title_key_enc, [0x5A; 16]);
        assert_eq!(ticket.dec_title_key().unwrap(), [0x5A; 16]);
    }

    #[test]
    fn title_id_rewrap_preserves_key() {
        let tid_a = [0, 0, 0, 1, 0, 0, 0, 2];
        let tid_b = [0, 0, 1, 0, 0x41, 0x42, 0x43, 0x44];
        let mut ticket = sample_ticket(tid_a, [0xAA; 16]);
        let wrapped_a = ticket.title_key_enc;
        ticket.set_title_id(tid_b).unwrap();
        assert_ne!(ticket.title_key_enc, wrapped_a);
        assert_eq!(ticket.dec_title_key().unwrap(), [0xAA; 16]);
        ticket.set_title_id(tid_a).unwrap();
        assert_eq!(ticket.title_key_enc, wrapped_a);
    }

    #[test]
    fn common_key_index_rewrap() {
        let mut ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        let wrapped_retail = ticket.title_key_enc;
        ticket.set_common_key_index(1).unwrap();
        assert_ne!(ticket.title_key_enc, wrapped_retail);
        assert_eq!(ticket.dec_title_key().unwrap(), [0xAA; 16]);
        assert!(ticket.set_common_key_index(3).is_err());
    }

    #[test]
    fn dev_ticket_accepts_out_of_range_index() {
        let mut ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        let mut issuer = [0u8; 64];
        issuer[..18].copy_from_slice(b"Root-CA00000002-XS");
        ticket.signature_issuer = issuer;
        assert!(ticket.is_dev());
        // The key was wrapped while the issuer was still retail; wrap it again under the
        // development key the new issuer selects.
        ticket.set_title_key([0xAA; 16]).unwrap();
        ticket.set_common_key_index(9).unwrap();
        assert_eq!(ticket.common_key_index, 9);
        assert_eq!(ticket.dec_title_key().unwrap(), [0xAA; 16]);
    }

    #[test]
    fn invalid_common_key_index_is_reported() {
        let mut ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        ticket.common_key_index = 7;
        assert!(matches!(
            ticket.dec_title_key(),
            Err(TicketError::CommonKey(CommonKeyError::InvalidCommonKeyIndex(7)))
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        let mut raw = ticket.to_bytes().unwrap();
        raw[0x1BC] = 1;
        assert!(matches!(
            Ticket::from_bytes(&raw),
            Err(TicketError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn fakesign_produces_leading_zero_hash() {
        let mut ticket = sample_ticket([0, 0, 0, 1, 0, 0, 0, 2], [0xAA; 16]);
        assert!(!ticket.is_fakesigned());
        ticket.fakesign().unwrap();
        assert!(ticket.is_fakesigned());
        let raw = ticket.to_bytes().unwrap();
        assert_eq!(sha1_hash(&raw[320..])[0], 0);
    }
}
