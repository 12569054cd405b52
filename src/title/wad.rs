// title/wad.rs from wadforge
//
// Implements the structures and methods required for WAD parsing and editing.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::str;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use crate::title::{cert, content, ticket, tmd};

#[derive(Debug, Error)]
pub enum WADError {
    #[error("data does not begin with a valid WAD type")]
    BadType,
    #[error("WAD header claims {needed} bytes but only {available} are present")]
    Truncated { needed: u64, available: u64 },
    #[error("an error occurred while processing TMD data")]
    TMD(#[from] tmd::TMDError),
    #[error("WAD data is not in a valid format")]
    IO(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WADType {
    /// An ordinary installable title ("Is").
    Installable,
    /// A boot2 WAD ("ib").
    ImportBoot,
}

#[derive(Debug)]
pub struct WAD {
    pub header: WADHeader,
    pub body: WADBody,
}

#[derive(Debug)]
pub struct WADHeader {
    pub header_size: u32,
    pub wad_type: WADType,
    pub wad_version: u16,
    cert_chain_size: u32,
    crl_size: u32,
    ticket_size: u32,
    tmd_size: u32,
    content_size: u32,
    meta_size: u32,
    padding: [u8; 32],
}

#[derive(Debug)]
pub struct WADBody {
    cert_chain: Vec<u8>,
    crl: Vec<u8>,
    ticket: Vec<u8>,
    tmd: Vec<u8>,
    content: Vec<u8>,
    meta: Vec<u8>,
}

fn align_64(offset: u64) -> u64 {
    offset.next_multiple_of(64)
}

impl WAD {
    /// Creates a new WAD instance from the binary data of a WAD file.
    pub fn from_bytes(data: &[u8]) -> Result<WAD, WADError> {
        let mut buf = Cursor::new(data);
        let header_size = buf.read_u32::<BigEndian>()?;
        let mut wad_type = [0u8; 2];
        buf.read_exact(&mut wad_type)?;
        let wad_type = match str::from_utf8(&wad_type) {
            Ok("Is") => WADType::Installable,
            Ok("ib") => WADType::ImportBoot,
            _ => return Err(WADError::BadType),
        };
        let wad_version = buf.read_u16::<BigEndian>()?;
        let cert_chain_size = buf.read_u32::<BigEndian>()?;
        let crl_size = buf.read_u32::<BigEndian>()?;
        let ticket_size = buf.read_u32::<BigEndian>()?;
        let tmd_size = buf.read_u32::<BigEndian>()?;
        // The recorded content size can fall short of the stored ciphertext; round it up to the
        // nearest block.
        let content_size = buf.read_u32::<BigEndian>()?.next_multiple_of(16);
        let meta_size = buf.read_u32::<BigEndian>()?;
        let mut padding = [0u8; 32];
        buf.read_exact(&mut padding)?;
        let header = WADHeader {
            header_size,
            wad_type,
            wad_version,
            cert_chain_size,
            crl_size,
            ticket_size,
            tmd_size,
            content_size,
            meta_size,
            padding,
        };
        // Each region starts at the next 64-byte boundary past the previous one.
        let cert_chain_offset = align_64(header.header_size as u64);
        let crl_offset = align_64(cert_chain_offset + header.cert_chain_size as u64);
        let ticket_offset = align_64(crl_offset + header.crl_size as u64);
        let tmd_offset = align_64(ticket_offset + header.ticket_size as u64);
        let content_offset = align_64(tmd_offset + header.tmd_size as u64);
        let meta_offset = align_64(content_offset + header.content_size as u64);
        let needed = meta_offset + header.meta_size as u64;
        if needed > data.len() as u64 {
            return Err(WADError::Truncated {
                needed,
                available: data.len() as u64,
            });
        }
        let mut read_region = |offset: u64, size: u32| -> Result<Vec<u8>, WADError> {
            buf.seek(SeekFrom::Start(offset))?;
            let mut region = vec![0u8; size as usize];
            buf.read_exact(&mut region)?;
            Ok(region)
        };
        let body = WADBody {
            cert_chain: read_region(cert_chain_offset, header.cert_chain_size)?,
            crl: read_region(crl_offset, header.crl_size)?,
            ticket: read_region(ticket_offset, header.ticket_size)?,
            tmd: read_region(tmd_offset, header.tmd_size)?,
            content: read_region(content_offset, header.content_size)?,
            meta: read_region(meta_offset, header.meta_size)?,
        };
        Ok(WAD { header, body })
    }

    /// Creates a new WAD instance from parsed title components. The WAD type is decided by the
    /// Title ID in the TMD, since only boot2 uses the import boot type.
    pub fn from_parts(
        cert_chain: &cert::CertificateChain,
        crl: &[u8],
        ticket: &ticket::Ticket,
        tmd: &tmd::TMD,
        content: &content::ContentRegion,
        meta: &[u8],
    ) -> Result<WAD, WADError> {
        let wad_type = if tmd.title_id == [0, 0, 0, 1, 0, 0, 0, 1] {
            WADType::ImportBoot
        } else {
            WADType::Installable
        };
        let body = WADBody {
            cert_chain: cert_chain.to_bytes()?,
            crl: crl.to_vec(),
            ticket: ticket.to_bytes()?,
            tmd: tmd.to_bytes()?,
            content: content.to_bytes()?,
            meta: meta.to_vec(),
        };
        let header = WADHeader {
            header_size: 32,
            wad_type,
            wad_version: 0,
            cert_chain_size: body.cert_chain.len() as u32,
            crl_size: body.crl.len() as u32,
            ticket_size: body.ticket.len() as u32,
            tmd_size: body.tmd.len() as u32,
            content_size: body.content.len() as u32,
            meta_size: body.meta.len() as u32,
            padding: [0; 32],
        };
        Ok(WAD { header, body })
    }

    /// Dumps the data in a WAD back into binary data that can be written to a file. Every region
    /// is padded out to a 64-byte boundary with zeroes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WADError> {
        let mut buf: Vec<u8> = Vec::new();
        buf.write_u32::<BigEndian>(self.header.header_size)?;
        match self.header.wad_type {
            WADType::Installable => buf.write_all(b"Is")?,
            WADType::ImportBoot => buf.write_all(b"ib")?,
        }
        buf.write_u16::<BigEndian>(self.header.wad_version)?;
        buf.write_u32::<BigEndian>(self.header.cert_chain_size)?;
        buf.write_u32::<BigEndian>(self.header.crl_size)?;
        buf.write_u32::<BigEndian>(self.header.ticket_size)?;
        buf.write_u32::<BigEndian>(self.header.tmd_size)?;
        buf.write_u32::<BigEndian>(self.header.content_size)?;
        buf.write_u32::<BigEndian>(self.header.meta_size)?;
        buf.write_all(&self.header.padding)?;
        for region in [
            &self.body.cert_chain,
            &self.body.crl,
            &self.body.ticket,
            &self.body.tmd,
            &self.body.content,
            &self.body.meta,
        ] {
            buf.resize(buf.len().next_multiple_of(64), 0);
            buf.write_all(region)?;
        }
        buf.resize(buf.len().next_multiple_of(64), 0);
        Ok(buf)
    }

    pub fn cert_chain_size(&self) -> u32 {
        self.header.cert_chain_size
    }

    pub fn cert_chain(&self) -> Vec<u8> {
        self.body.cert_chain.clone()
    }

    pub fn set_cert_chain(&mut self, cert_chain: &[u8]) {
        self.body.cert_chain = cert_chain.to_vec();
        self.header.cert_chain_size = cert_chain.len() as u32;
    }

    pub fn crl_size(&self) -> u32 {
        self.header.crl_size
    }

    pub fn crl(&self) -> Vec<u8> {
        self.body.crl.clone()
    }

    pub fn set_crl(&mut self, crl: &[u8]) {
        self.body.crl = crl.to_vec();
        self.header.crl_size = crl.len() as u32;
    }

    pub fn ticket_size(&self) -> u32 {
        self.header.ticket_size
    }

    pub fn ticket(&self) -> Vec<u8> {
        self.body.ticket.clone()
    }

    pub fn set_ticket(&mut self, ticket: &[u8]) {
        self.body.ticket = ticket.to_vec();
        self.header.ticket_size = ticket.len() as u32;
    }

    pub fn tmd_size(&self) -> u32 {
        self.header.tmd_size
    }

    pub fn tmd(&self) -> Vec<u8> {
        self.body.tmd.clone()
    }

    pub fn set_tmd(&mut self, tmd: &[u8]) {
        self.body.tmd = tmd.to_vec();
        self.header.tmd_size = tmd.len() as u32;
    }

    pub fn content_size(&self) -> u32 {
        self.header.content_size
    }

    pub fn content(&self) -> Vec<u8> {
        self.body.content.clone()
    }

    pub fn set_content(&mut self, content: &[u8]) {
        self.body.content = content.to_vec();
        self.header.content_size = content.len() as u32;
    }

    pub fn meta_size(&self) -> u32 {
        self.header.meta_size
    }

    pub fn meta(&self) -> Vec<u8> {
        self.body.meta.clone()
    }

    pub fn set_meta(&mut self, meta: &[u8]) {
        self.body.meta = meta.to_vec();
        self.header.meta_size = meta.len() as u32;
    }
}
