// title/crypto.rs from wadforge
//
// Implements the common crypto routines required to handle Wii content encryption.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};
use crate::title::commonkeys::{get_common_key, CommonKeyError};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Computes the SHA-1 digest of the provided data.
pub fn sha1_hash(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Builds the IV used to wrap and unwrap a Title Key: the Title ID followed by 8 zero bytes.
pub fn title_iv(title_id: [u8; 8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&title_id);
    iv
}

/// Builds the IV used to crypt a content file: its index as two big-endian bytes, zero-extended.
pub fn content_iv(index: u16) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..2].copy_from_slice(&index.to_be_bytes());
    iv
}

/// Raw AES-128-CBC encryption. The data length must already be a multiple of 16; padding is the
/// caller's job, so a misuse here is a bug and panics.
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % 16, 0, "plaintext length must be a multiple of 16");
    let mut buf = data.to_owned();
    let len = buf.len();
    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .unwrap();
    buf
}

/// Raw AES-128-CBC decryption. The data length must be a multiple of 16.
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % 16, 0, "ciphertext length must be a multiple of 16");
    let mut buf = data.to_owned();
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .unwrap();
    buf
}

/// Decrypts a Title Key using the common key selected by the provided index and dev status, with
/// the IV derived from the Title ID.
pub fn decrypt_title_key(
    title_key_enc: [u8; 16],
    common_key_index: u8,
    title_id: [u8; 8],
    is_dev: bool,
) -> Result<[u8; 16], CommonKeyError> {
    let common_key = get_common_key(common_key_index, is_dev)?;
    let iv = title_iv(title_id);
    let title_key = aes_cbc_decrypt(&common_key, &iv, &title_key_enc);
    Ok(title_key.try_into().unwrap())
}

/// Encrypts a Title Key using the common key selected by the provided index and dev status, with
/// the IV derived from the Title ID.
pub fn encrypt_title_key(
    title_key_dec: [u8; 16],
    common_key_index: u8,
    title_id: [u8; 8],
    is_dev: bool,
) -> Result<[u8; 16], CommonKeyError> {
    let common_key = get_common_key(common_key_index, is_dev)?;
    let iv = title_iv(title_id);
    let title_key = aes_cbc_encrypt(&common_key, &iv, &title_key_dec);
    Ok(title_key.try_into().unwrap())
}

/// Decrypts a content file with a Title Key, using the IV built from the content's index. The
/// input is zero-extended to a full block before decryption; the caller truncates the result to
/// the size recorded for the content.
pub fn decrypt_content(data: &[u8], title_key: [u8; 16], index: u16) -> Vec<u8> {
    let mut buf = data.to_owned();
    buf.resize(buf.len().next_multiple_of(16), 0);
    let iv = content_iv(index);
    aes_cbc_decrypt(&title_key, &iv, &buf)
}

/// Encrypts a content file with a Title Key, using the IV built from the content's index. The
/// plaintext is zero-padded to a full block first.
pub fn encrypt_content(data: &[u8], title_key: [u8; 16], index: u16) -> Vec<u8> {
    let mut buf = data.to_owned();
    buf.resize(buf.len().next_multiple_of(16), 0);
    let iv = content_iv(index);
    aes_cbc_encrypt(&title_key, &iv, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_iv_layout() {
        let iv = title_iv([0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(iv, [0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn content_iv_layout() {
        let iv = content_iv(0x0102);
        assert_eq!(iv[..2], [0x01, 0x02]);
        assert!(iv[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn cbc_round_trip() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let plain = [0x33u8; 48];
        let enc = aes_cbc_encrypt(&key, &iv, &plain);
        assert_ne!(enc.as_slice(), plain.as_slice());
        assert_eq!(aes_cbc_decrypt(&key, &iv, &enc), plain);
    }

    #[test]
    #[should_panic]
    fn unaligned_input_panics() {
        aes_cbc_encrypt(&[0u8; 16], &[0u8; 16], &[0u8; 15]);
    }

    #[test]
    fn title_key_round_trip() {
        let tid = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02];
        let key = [0xAAu8; 16];
        let wrapped = encrypt_title_key(key, 0, tid, false).unwrap();
        assert_ne!(wrapped, key);
        assert_eq!(decrypt_title_key(wrapped, 0, tid, false).unwrap(), key);
    }

    #[test]
    fn title_key_wrap_depends_on_tid() {
        let key = [0xAAu8; 16];
        let wrapped_a = encrypt_title_key(key, 0, [0u8; 8], false).unwrap();
        let wrapped_b = encrypt_title_key(key, 0, [1u8; 8], false).unwrap();
        assert_ne!(wrapped_a, wrapped_b);
    }

    #[test]
    fn content_round_trip_with_padding() {
        let key = [0x42u8; 16];
        let plain = b"not a multiple of sixteen".to_vec();
        let enc = encrypt_content(&plain, key, 3);
        assert_eq!(enc.len(), plain.len().next_multiple_of(16));
        let mut dec = decrypt_content(&enc, key, 3);
        dec.truncate(plain.len());
        assert_eq!(dec, plain);
    }

    #[test]
    fn content_crypt_depends_on_index() {
        let key = [0x42u8; 16];
        let plain = [0x55u8; 32];
        assert_ne!(
            encrypt_content(&plain, key, 0),
            encrypt_content(&plain, key, 1)
        );
    }
}
