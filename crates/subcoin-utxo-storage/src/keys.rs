//! Storage key encoding.

use bitcoin::OutPoint;
use bitcoin::hashes::Hash;

/// Convert OutPoint to storage key (36 bytes).
///
/// Format: txid (32 bytes, raw) || vout (4 bytes, little-endian)
pub fn outpoint_to_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(outpoint.txid.as_ref());
    key[32..].copy_from_slice(&outpoint.vout.to_le_bytes());
    key
}

/// Parse a storage key back to OutPoint, `None` if the key is not 36 bytes long.
pub fn key_to_outpoint(key: &[u8]) -> Option<OutPoint> {
    let key: &[u8; 36] = key.try_into().ok()?;
    let mut txid_bytes = [0u8; 32];
    txid_bytes.copy_from_slice(&key[..32]);
    let mut vout_bytes = [0u8; 4];
    vout_bytes.copy_from_slice(&key[32..]);
    Some(OutPoint {
        txid: bitcoin::Txid::from_byte_array(txid_bytes),
        vout: u32::from_le_bytes(vout_bytes),
    })
}
