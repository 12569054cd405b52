// title/cert.rs from wadforge
//
// Implements the structures and methods required for parsing the certificate chain
// stored in a WAD and verifying the signatures issued with it.

use std::io::{Cursor, Read, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use thiserror::Error;
use crate::title::crypto::sha1_hash;
use crate::title::signature::{SignatureBlock, SignatureError};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("public key type `{0}` is not recognized")]
    UnknownKeyType(u32),
    #[error("certificate chain contains unexpected certificate `{0}`")]
    UnknownCertificate(String),
    #[error("certificate chain is missing the required {0} certificate")]
    MissingCertificate(&'static str),
    #[error("an ECC public key cannot verify an RSA signature")]
    NotRsaKey,
    #[error("public key could not be loaded")]
    Rsa(#[from] rsa::Error),
    #[error("signature processing error")]
    Signature(#[from] SignatureError),
    #[error("certificate data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// The kinds of public keys a certificate can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa4096,
    Rsa2048,
    Ecc,
}

impl KeyType {
    fn from_tag(tag: u32) -> Result<Self, CertificateError> {
        match tag {
            0 => Ok(KeyType::Rsa4096),
            1 => Ok(KeyType::Rsa2048),
            2 => Ok(KeyType::Ecc),
            _ => Err(CertificateError::UnknownKeyType(tag)),
        }
    }

    fn tag(&self) -> u32 {
        match self {
            KeyType::Rsa4096 => 0,
            KeyType::Rsa2048 => 1,
            KeyType::Ecc => 2,
        }
    }

    /// Gets the length of the key material itself: the modulus for RSA keys, the whole key blob
    /// for ECC keys.
    fn key_len(&self) -> usize {
        match self {
            KeyType::Rsa4096 => 512,
            KeyType::Rsa2048 => 256,
            KeyType::Ecc => 60,
        }
    }

    // RSA key material is followed by a 4-byte exponent and 52 bytes of padding; ECC key
    // material is followed by 60 bytes of padding. Both pad the certificate to a 64-byte
    // boundary.
    fn trailing_pad(&self) -> usize {
        match self {
            KeyType::Rsa4096 | KeyType::Rsa2048 => 52,
            KeyType::Ecc => 60,
        }
    }
}

/// Classification of the CA certificate heading a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootCertKind {
    Retail,
    Dev,
    Unknown,
}

#[derive(Debug, Clone)]
/// A single certificate: a signed blob whose body carries an identity and a public key.
pub struct Certificate {
    pub signature: SignatureBlock,
    pub issuer: [u8; 64],
    pub key_type: KeyType,
    pub child_name: [u8; 64],
    pub key_id: u32,
    pub pub_key_modulus: Vec<u8>,
    pub pub_key_exponent: u32,
}

impl Certificate {
    /// Reads one certificate from a stream, leaving the stream positioned at the next one.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, CertificateError> {
        let signature = SignatureBlock::from_reader(reader)?;
        let mut issuer = [0u8; 64];
        reader.read_exact(&mut issuer)?;
        let key_type = KeyType::from_tag(reader.read_u32::<BigEndian>()?)?;
        let mut child_name = [0u8; 64];
        reader.read_exact(&mut child_name)?;
        let key_id = reader.read_u32::<BigEndian>()?;
        let mut pub_key_modulus = vec![0u8; key_type.key_len()];
        reader.read_exact(&mut pub_key_modulus)?;
        let pub_key_exponent = match key_type {
            KeyType::Rsa4096 | KeyType::Rsa2048 => reader.read_u32::<BigEndian>()?,
            KeyType::Ecc => 0,
        };
        let mut pad = vec![0u8; key_type.trailing_pad()];
        reader.read_exact(&mut pad)?;
        Ok(Certificate {
            signature,
            issuer,
            key_type,
            child_name,
            key_id,
            pub_key_modulus,
            pub_key_exponent,
        })
    }

    /// Creates a new Certificate instance from the binary data of a certificate.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CertificateError> {
        Certificate::from_reader(&mut Cursor::new(data))
    }

    /// Dumps the data in a Certificate back into binary data that can be written to a file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf: Vec<u8> = Vec::new();
        self.signature.write_to(&mut buf)?;
        buf.write_all(&self.issuer)?;
        buf.write_u32::<BigEndian>(self.key_type.tag())?;
        buf.write_all(&self.child_name)?;
        buf.write_u32::<BigEndian>(self.key_id)?;
        buf.write_all(&self.pub_key_modulus)?;
        if matches!(self.key_type, KeyType::Rsa4096 | KeyType::Rsa2048) {
            buf.write_u32::<BigEndian>(self.pub_key_exponent)?;
        }
        buf.resize(buf.len() + self.key_type.trailing_pad(), 0);
        Ok(buf)
    }

    /// Gets the name of the certificate that issued this certificate as a string.
    pub fn issuer(&self) -> String {
        String::from_utf8_lossy(&self.issuer).trim_end_matches('\0').to_owned()
    }

    /// Gets the name of this certificate as a string.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.child_name).trim_end_matches('\0').to_owned()
    }

    /// Gets the identity this certificate stamps into the issuer field of blobs it signs.
    pub fn identity(&self) -> String {
        format!("{}-{}", self.issuer(), self.name())
    }

    /// Builds the RSA public key stored in this certificate.
    pub fn public_key(&self) -> Result<RsaPublicKey, CertificateError> {
        if self.key_type == KeyType::Ecc {
            return Err(CertificateError::NotRsaKey);
        }
        let n = BigUint::from_bytes_be(&self.pub_key_modulus);
        let e = BigUint::from(self.pub_key_exponent);
        Ok(RsaPublicKey::new(n, e)?)
    }
}

/// Verifies an RSA-SHA1 PKCS#1 v1.5 signature over a signed blob. The blob must start with its
/// signature header; the signature covers everything after that header.
pub fn verify_signed_data(signer: &Certificate, signed_blob: &[u8]) -> Result<bool, CertificateError> {
    let block = SignatureBlock::from_reader(&mut Cursor::new(signed_blob))?;
    if signed_blob.len() < block.body_offset() {
        return Ok(false);
    }
    let digest = sha1_hash(&signed_blob[block.body_offset()..]);
    let key = signer.public_key()?;
    Ok(key
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, block.signature())
        .is_ok())
}

/// Verifies that a parent certificate signed a child certificate.
pub fn verify_child_cert(parent: &Certificate, child: &Certificate) -> Result<bool, CertificateError> {
    verify_signed_data(parent, &child.to_bytes()?)
}

/// Classifies the CA certificate heading a chain. The retail and development CAs are identified
/// by the identity certified into them: issued by "Root" and named CA00000001 (retail) or
/// CA00000002 (development), carrying an RSA-2048 key.
pub fn classify_ca_cert(ca_cert: &Certificate) -> RootCertKind {
    if ca_cert.issuer() != "Root" || ca_cert.key_type != KeyType::Rsa2048 {
        return RootCertKind::Unknown;
    }
    match ca_cert.name().as_str() {
        "CA00000001" => RootCertKind::Retail,
        "CA00000002" => RootCertKind::Dev,
        _ => RootCertKind::Unknown,
    }
}

#[derive(Debug, Clone)]
/// The three-certificate chain stored in a WAD: the CA certificate, the CP certificate that
/// signs TMDs, and the XS certificate that signs Tickets.
pub struct CertificateChain {
    ca_cert: Certificate,
    tmd_cert: Certificate,
    ticket_cert: Certificate,
}

impl CertificateChain {
    /// Creates a new CertificateChain instance from the binary data of a certificate chain. The
    /// three certificates are recognized by name no matter what order they were stored in.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CertificateError> {
        let mut buf = Cursor::new(data);
        let mut certs = Vec::new();
        while (buf.position() as usize) < data.len() {
            certs.push(Certificate::from_reader(&mut buf)?);
        }
        CertificateChain::from_cert_list(certs)
    }

    /// Creates a new CertificateChain instance from a list of parsed certificates in any order,
    /// recognizing the CA, CP, and XS certificates by name.
    pub fn from_cert_list(certs: Vec<Certificate>) -> Result<Self, CertificateError> {
        let mut ca_cert: Option<Certificate> = None;
        let mut tmd_cert: Option<Certificate> = None;
        let mut ticket_cert: Option<Certificate> = None;
        for cert in certs {
            match cert.name() {
                name if name.starts_with("CA") => ca_cert = Some(cert),
                name if name.starts_with("CP") => tmd_cert = Some(cert),
                name if name.starts_with("XS") => ticket_cert = Some(cert),
                name => return Err(CertificateError::UnknownCertificate(name)),
            }
        }
        Ok(CertificateChain {
            ca_cert: ca_cert.ok_or(CertificateError::MissingCertificate("CA"))?,
            tmd_cert: tmd_cert.ok_or(CertificateError::MissingCertificate("CP"))?,
            ticket_cert: ticket_cert.ok_or(CertificateError::MissingCertificate("XS"))?,
        })
    }

    /// Creates a new CertificateChain instance from three already-parsed certificates.
    pub fn from_certs(
        ca_cert: Certificate,
        tmd_cert: Certificate,
        ticket_cert: Certificate,
    ) -> Self {
        CertificateChain {
            ca_cert,
            tmd_cert,
            ticket_cert,
        }
    }

    /// Dumps the data in a CertificateChain back into binary data, in standard WAD order
    /// (CA, then CP, then XS).
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf: Vec<u8> = Vec::new();
        buf.write_all(&self.ca_cert.to_bytes()?)?;
        buf.write_all(&self.tmd_cert.to_bytes()?)?;
        buf.write_all(&self.ticket_cert.to_bytes()?)?;
        Ok(buf)
    }

    pub fn ca_cert(&self) -> &Certificate {
        &self.ca_cert
    }

    pub fn tmd_cert(&self) -> &Certificate {
        &self.tmd_cert
    }

    pub fn ticket_cert(&self) -> &Certificate {
        &self.ticket_cert
    }

    /// Classifies the CA certificate heading this chain.
    pub fn ca_kind(&self) -> RootCertKind {
        classify_ca_cert(&self.ca_cert)
    }

    /// Verifies the chain below the root: the CA must classify as a known root and must have
    /// signed both the CP and XS certificates.
    pub fn verify_chain(&self) -> Result<bool, CertificateError> {
        if self.ca_kind() == RootCertKind::Unknown {
            return Ok(false);
        }
        Ok(verify_child_cert(&self.ca_cert, &self.tmd_cert)?
            && verify_child_cert(&self.ca_cert, &self.ticket_cert)?)
    }
}
