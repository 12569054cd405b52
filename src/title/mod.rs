// title/mod.rs from wadforge
//
// Root for all title-related modules and implementation of the high-level Title object.

pub mod cert;
pub mod commonkeys;
pub mod content;
pub mod crypto;
pub mod ios;
pub mod nus;
pub mod signature;
pub mod ticket;
pub mod tmd;
pub mod wad;

use std::rc::Rc;
use thiserror::Error;
use crate::title::cert::{verify_signed_data, CertificateChain, CertificateError};
use crate::title::content::{ContentError, ContentRegion};
use crate::title::ticket::{Ticket, TicketError};
use crate::title::tmd::{TMDError, TMD};
use crate::title::wad::{WADError, WAD};

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("an error occurred while processing certificate data")]
    Certificate(#[from] CertificateError),
    #[error("an error occurred while processing TMD data")]
    TMD(#[from] TMDError),
    #[error("an error occurred while processing Ticket data")]
    Ticket(#[from] TicketError),
    #[error("an error occurred while processing content data")]
    Content(#[from] ContentError),
    #[error("a WAD could not be built from the provided data")]
    WAD(#[from] WADError),
    #[error("the provided Title data was invalid")]
    IO(#[from] std::io::Error),
}

#[derive(Debug)]
/// A high-level structure that owns all of the components of a digital Wii title and keeps their
/// cross-references intact while they are edited.
pub struct Title {
    pub cert_chain: CertificateChain,
    crl: Vec<u8>,
    pub ticket: Ticket,
    pub tmd: TMD,
    pub content: ContentRegion,
    meta: Vec<u8>,
}

impl Title {
    /// Creates a new Title instance from an already-parsed WAD. The content region is loaded
    /// against the TMD's record list, so the two share one set of content records.
    pub fn from_wad(wad: &WAD) -> Result<Title, TitleError> {
        let cert_chain = CertificateChain::from_bytes(&wad.cert_chain())?;
        let ticket = Ticket::from_bytes(&wad.ticket())?;
        let tmd = TMD::from_bytes(&wad.tmd())?;
        let content = ContentRegion::from_bytes(&wad.content(), Rc::clone(&tmd.content_records))?;
        Ok(Title {
            cert_chain,
            crl: wad.crl(),
            ticket,
            tmd,
            content,
            meta: wad.meta(),
        })
    }

    /// Creates a new Title instance directly from the binary data of a WAD file.
    pub fn from_bytes(data: &[u8]) -> Result<Title, TitleError> {
        let wad = WAD::from_bytes(data)?;
        Title::from_wad(&wad)
    }

    /// Creates a new Title instance from already-parsed components. The content region must have
    /// been loaded against the provided TMD so that the two share one record list.
    pub fn from_parts(
        cert_chain: CertificateChain,
        crl: Option<&[u8]>,
        ticket: Ticket,
        tmd: TMD,
        content: ContentRegion,
        meta: Option<&[u8]>,
    ) -> Title {
        Title {
            cert_chain,
            crl: crl.map(|c| c.to_vec()).unwrap_or_default(),
            ticket,
            tmd,
            content,
            meta: meta.map(|m| m.to_vec()).unwrap_or_default(),
        }
    }

    /// Packs the Title back into a WAD.
    pub fn to_wad(&self) -> Result<WAD, TitleError> {
        let wad = WAD::from_parts(
            &self.cert_chain,
            &self.crl,
            &self.ticket,
            &self.tmd,
            &self.content,
            &self.meta,
        )?;
        Ok(wad)
    }

    /// Gets the decrypted Title Key carried by this Title's Ticket.
    pub fn title_key(&self) -> Result<[u8; 16], TitleError> {
        Ok(self.ticket.dec_title_key()?)
    }

    /// Gets the decrypted content file at the specified index.
    pub fn get_content_by_index(&self, index: usize) -> Result<Vec<u8>, TitleError> {
        let title_key = self.ticket.dec_title_key()?;
        Ok(self.content.get_content_by_index(index, title_key)?)
    }

    /// Gets the decrypted content file with the specified Content ID.
    pub fn get_content_by_cid(&self, cid: u32) -> Result<Vec<u8>, TitleError> {
        let title_key = self.ticket.dec_title_key()?;
        Ok(self.content.get_content_by_cid(cid, title_key)?)
    }

    /// Sets the content at the specified index to the provided decrypted data. The size and hash
    /// in the matching TMD content record are updated along the way.
    pub fn set_content(&mut self, data: &[u8], index: usize) -> Result<(), TitleError> {
        let title_key = self.ticket.dec_title_key()?;
        self.content.set_content(data, index, None, None, title_key)?;
        Ok(())
    }

    /// Sets a new Title ID on both the Ticket and the TMD. The Ticket re-wraps its Title Key
    /// under the new ID, and both blobs are fakesigned since their old signatures can no longer
    /// be valid.
    pub fn set_title_id(&mut self, title_id: [u8; 8]) -> Result<(), TitleError> {
        self.ticket.set_title_id(title_id)?;
        self.tmd.title_id = title_id;
        self.fakesign()?;
        Ok(())
    }

    /// Sets a new title version in the TMD and fakesigns it.
    pub fn set_title_version(&mut self, title_version: u16) -> Result<(), TitleError> {
        self.tmd.title_version = title_version;
        self.tmd.fakesign()?;
        Ok(())
    }

    /// Gets whether both the TMD and Ticket are fakesigned.
    pub fn is_fakesigned(&self) -> bool {
        self.tmd.is_fakesigned() && self.ticket.is_fakesigned()
    }

    /// Fakesigns the TMD and the Ticket.
    pub fn fakesign(&mut self) -> Result<(), TitleError> {
        self.tmd.fakesign()?;
        self.ticket.fakesign()?;
        Ok(())
    }

    /// Gets whether the Title carries valid official signatures: the certificate chain must head
    /// at a known certificate authority, the CP certificate must have signed the TMD, and the XS
    /// certificate must have signed the Ticket. A fakesigned or edited title fails this check.
    pub fn is_signed(&self) -> Result<bool, TitleError> {
        if !self.cert_chain.verify_chain()? {
            return Ok(false);
        }
        if !verify_signed_data(self.cert_chain.tmd_cert(), &self.tmd.to_bytes()?)? {
            return Ok(false);
        }
        if !verify_signed_data(self.cert_chain.ticket_cert(), &self.ticket.to_bytes()?)? {
            return Ok(false);
        }
        Ok(true)
    }

    /// Gets the installed size of the title, in bytes. Shared contents are only counted when
    /// `absolute` is true, since they may already be installed.
    pub fn title_size(&self, absolute: Option<bool>) -> Result<usize, TitleError> {
        let mut title_size = self.tmd.to_bytes()?.len();
        title_size += self.ticket.to_bytes()?.len();
        for record in self.tmd.content_records.borrow().iter() {
            if matches!(record.content_type, tmd::ContentType::Shared) && absolute != Some(true) {
                continue;
            }
            title_size += record.content_size as usize;
        }
        Ok(title_size)
    }

    /// Gets the installed size of the title, in 128 KiB Wii blocks.
    pub fn title_size_blocks(&self, absolute: Option<bool>) -> Result<usize, TitleError> {
        let title_size = self.title_size(absolute)?;
        Ok(title_size.div_ceil(131072))
    }

    pub fn crl(&self) -> Vec<u8> {
        self.crl.clone()
    }

    pub fn set_crl(&mut self, crl: &[u8]) {
        self.crl = crl.to_vec();
    }

    pub fn meta(&self) -> Vec<u8> {
        self.meta.clone()
    }

    pub fn set_meta(&mut self, meta: &[u8]) {
        self.meta = meta.to_vec();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::title::cert::tests::{make_chain, sign_blob};
    use crate::title::crypto::sha1_hash;
    use crate::title::ticket::tests::sample_ticket;
    use crate::title::tmd::tests::{sample_record, sample_tmd};

    pub(crate) fn sample_title(title_id: [u8; 8], plains: &[&[u8]]) -> Title {
        let (chain, _, _) = make_chain();
        let ticket = sample_ticket(title_id, [0xAA; 16]);
        let title_key = ticket.dec_title_key().unwrap();
        let records = plains
            .iter()
            .enumerate()
            .map(|(i, data)| sample_record(i as u16, 0x20 + i as u32, data))
            .collect();
        let tmd = sample_tmd(title_id, records);
        let mut content = ContentRegion::new(Rc::clone(&tmd.content_records));
        for (i, data) in plains.iter().enumerate() {
            content.load_content(data, i, title_key).unwrap();
        }
        Title::from_parts(chain, None, ticket, tmd, content, None)
    }

    #[test]
    fn wad_round_trip_preserves_content() {
        let title = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"\x42"]);
        let raw = title.to_wad().unwrap().to_bytes().unwrap();
        let reparsed = Title::from_bytes(&raw).unwrap();
        assert_eq!(reparsed.get_content_by_index(0).unwrap(), b"\x42");
        assert_eq!(reparsed.to_wad().unwrap().to_bytes().unwrap(), raw);
    }

    #[test]
    fn set_content_updates_tmd_record() {
        let mut title = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"before"]);
        title.set_content(b"afterwards", 0).unwrap();
        let record = title.tmd.content_record(0).unwrap();
        assert_eq!(record.content_size, 10);
        assert_eq!(record.content_hash, sha1_hash(b"afterwards"));
        assert_eq!(title.get_content_by_index(0).unwrap(), b"afterwards");
    }

    #[test]
    fn fakesign_marks_both_blobs() {
        let mut title = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"data"]);
        assert!(!title.is_fakesigned());
        title.fakesign().unwrap();
        assert!(title.is_fakesigned());
        assert!(!title.is_signed().unwrap());
    }

    #[test]
    fn signed_title_verifies_until_edited() {
        let mut title = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"data"]);
        let (_, cp_key, xs_key) = make_chain();
        let tmd_sig = sign_blob(&cp_key, &title.tmd.to_bytes().unwrap());
        title.tmd.signature.set_signature(tmd_sig);
        let ticket_sig = sign_blob(&xs_key, &title.ticket.to_bytes().unwrap());
        title.ticket.signature.set_signature(ticket_sig);
        assert!(title.is_signed().unwrap());
        // Any edit to the signed body has to break verification.
        title.tmd.title_version ^= 1;
        assert!(!title.is_signed().unwrap());
    }

    #[test]
    fn set_title_id_rewraps_and_resigns() {
        let mut title = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"data"]);
        let title_key = title.title_key().unwrap();
        let new_tid = [0, 1, 0, 0, 0x41, 0x41, 0x41, 0x41];
        title.set_title_id(new_tid).unwrap();
        assert_eq!(title.tmd.title_id, new_tid);
        assert_eq!(title.ticket.title_id, new_tid);
        assert_eq!(title.title_key().unwrap(), title_key);
        assert!(title.is_fakesigned());
    }

    #[test]
    fn title_size_counts_contents() {
        let title = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"12345678", b"1234"]);
        let base = title.tmd.to_bytes().unwrap().len() + title.ticket.to_bytes().unwrap().len();
        assert_eq!(title.title_size(None).unwrap(), base + 12);
        assert_eq!(title.title_size_blocks(None).unwrap(), 1);
    }
}
