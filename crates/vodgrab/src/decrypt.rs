// AES-128-CBC segment decryption with the HLS sequence-derived IV.

use crate::error::DownloadError;
use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use tracing::warn;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// HLS convention when the playlist carries no explicit IV: 8 zero bytes
/// followed by the big-endian media sequence number.
pub fn sequence_iv(segment_index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&segment_index.to_be_bytes());
    iv
}

/// Decrypt one segment body (AES-128-CBC, PKCS#7).
pub fn decrypt_segment(
    ciphertext: &[u8],
    key: &[u8; 16],
    iv: &[u8; 16],
) -> Result<Vec<u8>, DownloadError> {
    let mut buffer = ciphertext.to_vec();
    let decryptor = Aes128CbcDec::new(key.into(), iv.into());
    let len = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| DownloadError::decryption(format!("AES-128-CBC decrypt failed: {e}")))?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

/// Decrypt, falling back to the untouched ciphertext when decryption fails.
///
/// Some sources mislabel unencrypted segments; a padding error here is
/// logged and the original bytes are kept (degraded mode).
pub fn decrypt_or_passthrough(
    ciphertext: Bytes,
    key: &[u8; 16],
    iv: &[u8; 16],
    segment_index: u64,
) -> Bytes {
    match decrypt_segment(&ciphertext, key, iv) {
        Ok(plaintext) => Bytes::from(plaintext),
        Err(e) => {
            warn!(
                segment = segment_index,
                error = %e,
                "decryption failed, keeping ciphertext"
            );
            ciphertext
        }
    }
}
