// title/nus.rs from wadforge
//
// Implements downloading title components from the Nintendo Update Servers.

use std::io::Cursor;
use std::rc::Rc;
use thiserror::Error;
use crate::title::cert::{Certificate, CertificateChain, CertificateError};
use crate::title::content::{ContentError, ContentRegion};
use crate::title::ticket::{Ticket, TicketError};
use crate::title::tmd::{TMDError, TMD};
use crate::title::Title;

// The servers only answer requests that look like they came from a console.
const USER_AGENT: &str = "wii libnup/1.0";

// The System Menu always exists and always has a common Ticket, so its responses are the
// canonical source for the certificate chain.
const SYSTEM_MENU_TID: [u8; 8] = [0, 0, 0, 1, 0, 0, 0, 2];

#[derive(Debug, Error)]
pub enum NUSError {
    #[error("server responded with status {0}")]
    DownloadFailed(u16),
    #[error("download could not be completed")]
    Request(#[from] reqwest::Error),
    #[error("an error occurred while processing certificate data")]
    Certificate(#[from] CertificateError),
    #[error("an error occurred while processing TMD data")]
    TMD(#[from] TMDError),
    #[error("an error occurred while processing Ticket data")]
    Ticket(#[from] TicketError),
    #[error("an error occurred while processing content data")]
    Content(#[from] ContentError),
}

/// The update servers a title can be fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endpoint {
    #[default]
    Retail,
    Dev,
}

impl Endpoint {
    pub fn base_url(&self) -> &'static str {
        match self {
            Endpoint::Retail => "http://nus.cdn.shop.wii.com/ccs/download",
            Endpoint::Dev => "http://ccs.cdn.shop.wii.com/ccs/download",
        }
    }
}

fn tmd_url(title_id: [u8; 8], version: Option<u16>, endpoint: Endpoint) -> String {
    match version {
        Some(version) => format!("{}/{}/tmd.{}", endpoint.base_url(), hex::encode(title_id), version),
        None => format!("{}/{}/tmd", endpoint.base_url(), hex::encode(title_id)),
    }
}

fn cetk_url(title_id: [u8; 8], endpoint: Endpoint) -> String {
    format!("{}/{}/cetk", endpoint.base_url(), hex::encode(title_id))
}

fn content_url(title_id: [u8; 8], content_id: u32, endpoint: Endpoint) -> String {
    format!("{}/{}/{:08x}", endpoint.base_url(), hex::encode(title_id), content_id)
}

fn download(url: &str) -> Result<Vec<u8>, NUSError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()?;
    let response = client.get(url).send()?;
    if !response.status().is_success() {
        return Err(NUSError::DownloadFailed(response.status().as_u16()));
    }
    Ok(response.bytes()?.to_vec())
}

// The server appends the signing certificates to TMD and cetk responses; this picks them back
// off given the parsed length of the blob they follow.
fn certs_after(response: &[u8], blob_len: usize) -> Result<Vec<Certificate>, NUSError> {
    let mut certs = Vec::new();
    let trailing = &response[blob_len.min(response.len())..];
    let mut buf = Cursor::new(trailing);
    while (buf.position() as usize) < trailing.len() {
        certs.push(Certificate::from_reader(&mut buf)?);
    }
    Ok(certs)
}

/// Downloads the TMD for a title, at the given version or the latest one. The trailing
/// certificates the server appends are trimmed off.
pub fn download_tmd(
    title_id: [u8; 8],
    version: Option<u16>,
    endpoint: Endpoint,
) -> Result<Vec<u8>, NUSError> {
    let mut response = download(&tmd_url(title_id, version, endpoint))?;
    let tmd = TMD::from_bytes(&response)?;
    response.truncate(tmd.to_bytes()?.len());
    Ok(response)
}

/// Downloads the common Ticket for a title, if one exists. The trailing certificates the server
/// appends are trimmed off.
pub fn download_ticket(title_id: [u8; 8], endpoint: Endpoint) -> Result<Vec<u8>, NUSError> {
    let mut response = download(&cetk_url(title_id, endpoint))?;
    let ticket = Ticket::from_bytes(&response)?;
    response.truncate(ticket.to_bytes().map_err(TicketError::IO)?.len());
    Ok(response)
}

/// Downloads one encrypted content of a title by its Content ID.
pub fn download_content(
    title_id: [u8; 8],
    content_id: u32,
    endpoint: Endpoint,
) -> Result<Vec<u8>, NUSError> {
    download(&content_url(title_id, content_id, endpoint))
}

/// Downloads every encrypted content listed by a TMD, in record order.
pub fn download_contents(tmd: &TMD, endpoint: Endpoint) -> Result<Vec<Vec<u8>>, NUSError> {
    let records = tmd.content_records.borrow().clone();
    let mut contents = Vec::with_capacity(records.len());
    for record in records {
        contents.push(download_content(tmd.title_id, record.content_id, endpoint)?);
    }
    Ok(contents)
}

/// Downloads the certificate chain by collecting the certificates the server appends to the
/// System Menu's TMD (CP and CA) and cetk (XS and CA) responses.
pub fn download_cert_chain(endpoint: Endpoint) -> Result<CertificateChain, NUSError> {
    let tmd_response = download(&tmd_url(SYSTEM_MENU_TID, None, endpoint))?;
    let tmd = TMD::from_bytes(&tmd_response)?;
    let mut certs = certs_after(&tmd_response, tmd.to_bytes()?.len())?;
    let cetk_response = download(&cetk_url(SYSTEM_MENU_TID, endpoint))?;
    let ticket = Ticket::from_bytes(&cetk_response)?;
    certs.extend(certs_after(&cetk_response, ticket.to_bytes().map_err(TicketError::IO)?.len())?);
    Ok(CertificateChain::from_cert_list(certs)?)
}

/// Downloads a complete title (TMD, Ticket, certificate chain, and every content) and composes
/// it into a Title. Fails if the title has no common Ticket on the server.
pub fn download_title(
    title_id: [u8; 8],
    version: Option<u16>,
    endpoint: Endpoint,
) -> Result<Title, NUSError> {
    let tmd_response = download(&tmd_url(title_id, version, endpoint))?;
    let tmd = TMD::from_bytes(&tmd_response)?;
    let cetk_response = download(&cetk_url(title_id, endpoint))?;
    let ticket = Ticket::from_bytes(&cetk_response)?;
    let mut certs = certs_after(&tmd_response, tmd.to_bytes()?.len())?;
    certs.extend(certs_after(&cetk_response, ticket.to_bytes().map_err(TicketError::IO)?.len())?);
    let cert_chain = CertificateChain::from_cert_list(certs)?;
    let contents = download_contents(&tmd, endpoint)?;
    let content = ContentRegion::from_contents(contents, Rc::clone(&tmd.content_records))?;
    Ok(Title::from_parts(cert_chain, None, ticket, tmd, content, None))
}
