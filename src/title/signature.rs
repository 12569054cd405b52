// title/signature.rs from wadforge
//
// Implements the signature header shared by all of the signed blobs in the title
// system (TMDs, Tickets, and certificates).

use std::io::{Read, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature type {0:#010X} is not supported")]
    UnsupportedSignatureType(u32),
    #[error("signature data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// The signature schemes that can open a signed blob. The tag stored on the wire determines how
/// many signature bytes follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Rsa4096Sha1,
    Rsa2048Sha1,
    EcdsaSha1,
}

impl SignatureType {
    /// Matches a signature type tag to a known signature scheme.
    pub fn from_tag(tag: u32) -> Result<Self, SignatureError> {
        match tag {
            0x10000 => Ok(SignatureType::Rsa4096Sha1),
            0x10001 => Ok(SignatureType::Rsa2048Sha1),
            0x10002 => Ok(SignatureType::EcdsaSha1),
            _ => Err(SignatureError::UnsupportedSignatureType(tag)),
        }
    }

    /// Gets the tag stored on the wire for this signature scheme.
    pub fn tag(&self) -> u32 {
        match self {
            SignatureType::Rsa4096Sha1 => 0x10000,
            SignatureType::Rsa2048Sha1 => 0x10001,
            SignatureType::EcdsaSha1 => 0x10002,
        }
    }

    /// Gets the length of the signature itself, in bytes.
    pub fn size(&self) -> usize {
        match self {
            SignatureType::Rsa4096Sha1 => 512,
            SignatureType::Rsa2048Sha1 => 256,
            SignatureType::EcdsaSha1 => 60,
        }
    }

    /// Gets the offset at which the signed body starts: the 4-byte tag, the signature, and 60
    /// bytes of padding. The signature only ever covers data from this offset onward.
    pub fn body_offset(&self) -> usize {
        4 + self.size() + 60
    }
}

/// The full signature header of a signed blob: the type tag, the signature bytes, and the 60
/// bytes of padding that separate the signature from the signed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    sig_type: SignatureType,
    signature: Vec<u8>,
    padding: [u8; 60],
}

impl SignatureBlock {
    /// Reads a signature header from the start of a signed blob.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, SignatureError> {
        let tag = reader.read_u32::<BigEndian>()?;
        let sig_type = SignatureType::from_tag(tag)?;
        let mut signature = vec![0u8; sig_type.size()];
        reader.read_exact(&mut signature)?;
        let mut padding = [0u8; 60];
        reader.read_exact(&mut padding)?;
        Ok(SignatureBlock {
            sig_type,
            signature,
            padding,
        })
    }

    /// Creates a signature header of the requested scheme with every signature byte zeroed.
    pub fn new_null(sig_type: SignatureType) -> Self {
        SignatureBlock {
            sig_type,
            signature: vec![0u8; sig_type.size()],
            padding: [0u8; 60],
        }
    }

    /// Writes the signature header back out in its wire format.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_u32::<BigEndian>(self.sig_type.tag())?;
        writer.write_all(&self.signature)?;
        writer.write_all(&self.padding)?;
        Ok(())
    }

    pub fn sig_type(&self) -> SignatureType {
        self.sig_type
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Replaces the signature bytes. The new signature must match the length demanded by the
    /// signature type.
    pub fn set_signature(&mut self, signature: Vec<u8>) {
        assert_eq!(
            signature.len(),
            self.sig_type.size(),
            "signature length must match the signature type"
        );
        self.signature = signature;
    }

    /// Gets whether every byte of the signature is zero, which is the first requirement for a
    /// fakesigned blob.
    pub fn is_null(&self) -> bool {
        self.signature.iter().all(|&b| b == 0)
    }

    /// Erases the signature, leaving a null signature of the same type in place.
    pub fn nullify(&mut self) {
        self.signature = vec![0u8; self.sig_type.size()];
    }

    /// Gets the offset of the signed body within the blob this header opens.
    pub fn body_offset(&self) -> usize {
        self.sig_type.body_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn tag_round_trip() {
        for sig_type in [
            SignatureType::Rsa4096Sha1,
            SignatureType::Rsa2048Sha1,
            SignatureType::EcdsaSha1,
        ] {
            assert_eq!(SignatureType::from_tag(sig_type.tag()).unwrap(), sig_type);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            SignatureType::from_tag(0x10007),
            Err(SignatureError::UnsupportedSignatureType(0x10007))
        ));
    }

    #[test]
    fn body_offsets() {
        assert_eq!(SignatureType::Rsa2048Sha1.body_offset(), 320);
        assert_eq!(SignatureType::Rsa4096Sha1.body_offset(), 576);
        assert_eq!(SignatureType::EcdsaSha1.body_offset(), 124);
    }

    #[test]
    fn block_round_trip() {
        let mut data = vec![0u8; 320];
        data[..4].copy_from_slice(&0x10001u32.to_be_bytes());
        data[4..260].fill(0xAB);
        let block = SignatureBlock::from_reader(&mut Cursor::new(data.as_slice())).unwrap();
        assert_eq!(block.sig_type(), SignatureType::Rsa2048Sha1);
        assert!(!block.is_null());
        let mut out = Vec::new();
        block.write_to(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn nullify_erases_signature() {
        let mut block = SignatureBlock::new_null(SignatureType::Rsa2048Sha1);
        block.set_signature(vec![0xFF; 256]);
        assert!(!block.is_null());
        block.nullify();
        assert!(block.is_null());
    }
}
