//! Binary layouts for the lending protocol's records.
//!
//! All integers are little-endian. Layouts:
//!
//! - pool list: `[count: u8]` + `count` x `[mint: 32][ltv_bps: u16][decimals: u8]`
//! - asset price: `[mint: 32][price_e8: u64][slot: u64]`
//! - user record: `[wallet: 32][page_id: u32][count: u8]` +
//!   `count` x `[pool_id: u8][deposit: u64][borrow: u64]`
//! - users page: `N` x `[wallet: 32]`, empty slots hold [`Pubkey::NULL`]

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

use crate::pubkey::Pubkey;

/// Fixed-point decimals of on-ledger USD prices.
pub const PRICE_DECIMALS: u8 = 8;

/// Multiplier matching [`PRICE_DECIMALS`].
pub const PRICE_SCALE: f64 = 100_000_000.0;

/// Maximum number of asset entries a user record can carry.
pub const MAX_USER_ASSETS: usize = 16;

/// Maximum number of wallet slots in one users page.
pub const MAX_PAGE_SLOTS: usize = 256;

const POOL_ENTRY_LEN: usize = 32 + 2 + 1;
const PRICE_RECORD_LEN: usize = 32 + 8 + 8;
const USER_HEADER_LEN: usize = 32 + 4 + 1;
const USER_ASSET_LEN: usize = 1 + 8 + 8;

/// Errors decoding a raw record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{record}: truncated payload (expected {expected} bytes, got {actual})")]
    Truncated {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{record}: {extra} unexpected trailing bytes")]
    TrailingBytes { record: &'static str, extra: usize },
    #[error("users page: length {0} is not a multiple of 32")]
    MisalignedPage(usize),
    #[error("{record}: {count} entries exceeds capacity {max}")]
    TooManyEntries {
        record: &'static str,
        count: usize,
        max: usize,
    },
}

/// One entry of the pool list. The pool id is the entry's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolListEntry {
    pub mint: Pubkey,
    /// Loan-to-value in basis points (8000 = 80%)
    pub ltv_bps: u16,
    pub decimals: u8,
}

/// Asset price record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub mint: Pubkey,
    /// USD price, fixed-point with [`PRICE_DECIMALS`]
    pub price_e8: u64,
    /// Ledger height at which the price was written
    pub slot: u64,
}

impl PriceRecord {
    pub fn price_usd(&self) -> f64 {
        self.price_e8 as f64 / PRICE_SCALE
    }
}

/// Per-pool balances of a user, in native (base) units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAsset {
    pub pool_id: u8,
    pub deposit_amount: u64,
    pub borrow_amount: u64,
}

/// A user's account record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub wallet: Pubkey,
    pub page_id: u32,
    pub assets: ArrayVec<UserAsset, MAX_USER_ASSETS>,
}

impl UserRecord {
    pub fn new(wallet: Pubkey, page_id: u32) -> Self {
        Self {
            wallet,
            page_id,
            assets: ArrayVec::new(),
        }
    }

    /// Builder helper; silently ignores entries beyond capacity.
    pub fn with_asset(mut self, pool_id: u8, deposit_amount: u64, borrow_amount: u64) -> Self {
        let _ = self.assets.try_push(UserAsset {
            pool_id,
            deposit_amount,
            borrow_amount,
        });
        self
    }
}

/// Little-endian cursor over a record payload.
struct Reader<'a> {
    record: &'static str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(record: &'static str, data: &'a [u8]) -> Self {
        Self { record, data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(DecodeError::Truncated {
                record: self.record,
                expected: end,
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn pubkey(&mut self) -> Result<Pubkey, DecodeError> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(32)?);
        Ok(Pubkey::new(buf))
    }

    fn finish(self) -> Result<(), DecodeError> {
        let extra = self.data.len() - self.pos;
        if extra > 0 {
            return Err(DecodeError::TrailingBytes {
                record: self.record,
                extra,
            });
        }
        Ok(())
    }
}

/// Decode the pool list. Entries keep their position so that the index is the pool id.
pub fn decode_pool_list(data: &[u8]) -> Result<Vec<PoolListEntry>, DecodeError> {
    let mut r = Reader::new("pool list", data);
    let count = r.u8()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(PoolListEntry {
            mint: r.pubkey()?,
            ltv_bps: r.u16()?,
            decimals: r.u8()?,
        });
    }
    r.finish()?;
    Ok(entries)
}

pub fn decode_price(data: &[u8]) -> Result<PriceRecord, DecodeError> {
    let mut r = Reader::new("asset price", data);
    let record = PriceRecord {
        mint: r.pubkey()?,
        price_e8: r.u64()?,
        slot: r.u64()?,
    };
    r.finish()?;
    Ok(record)
}

pub fn decode_user_record(data: &[u8]) -> Result<UserRecord, DecodeError> {
    let mut r = Reader::new("user record", data);
    let wallet = r.pubkey()?;
    let page_id = r.u32()?;
    let count = r.u8()? as usize;
    if count > MAX_USER_ASSETS {
        return Err(DecodeError::TooManyEntries {
            record: "user record",
            count,
            max: MAX_USER_ASSETS,
        });
    }

    let mut record = UserRecord::new(wallet, page_id);
    for _ in 0..count {
        record.assets.push(UserAsset {
            pool_id: r.u8()?,
            deposit_amount: r.u64()?,
            borrow_amount: r.u64()?,
        });
    }
    r.finish()?;
    Ok(record)
}

/// Decode a users page into its ordered slots, sentinel slots included.
pub fn decode_index_page(data: &[u8]) -> Result<Vec<Pubkey>, DecodeError> {
    if data.len() % Pubkey::LEN != 0 {
        return Err(DecodeError::MisalignedPage(data.len()));
    }
    let slots = data.len() / Pubkey::LEN;
    if slots > MAX_PAGE_SLOTS {
        return Err(DecodeError::TooManyEntries {
            record: "users page",
            count: slots,
            max: MAX_PAGE_SLOTS,
        });
    }
    Ok(data
        .chunks_exact(Pubkey::LEN)
        .filter_map(Pubkey::from_slice)
        .collect())
}

pub fn encode_pool_list(entries: &[PoolListEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + entries.len() * POOL_ENTRY_LEN);
    out.push(entries.len().min(u8::MAX as usize) as u8);
    for entry in entries.iter().take(u8::MAX as usize) {
        out.extend_from_slice(entry.mint.as_bytes());
        out.extend_from_slice(&entry.ltv_bps.to_le_bytes());
        out.push(entry.decimals);
    }
    out
}

pub fn encode_price(record: &PriceRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(PRICE_RECORD_LEN);
    out.extend_from_slice(record.mint.as_bytes());
    out.extend_from_slice(&record.price_e8.to_le_bytes());
    out.extend_from_slice(&record.slot.to_le_bytes());
    out
}

pub fn encode_user_record(record: &UserRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(USER_HEADER_LEN + record.assets.len() * USER_ASSET_LEN);
    out.extend_from_slice(record.wallet.as_bytes());
    out.extend_from_slice(&record.page_id.to_le_bytes());
    out.push(record.assets.len() as u8);
    for asset in &record.assets {
        out.push(asset.pool_id);
        out.extend_from_slice(&asset.deposit_amount.to_le_bytes());
        out.extend_from_slice(&asset.borrow_amount.to_le_bytes());
    }
    out
}

pub fn encode_index_page(slots: &[Pubkey]) -> Vec<u8> {
    slots.iter().flat_map(|k| k.to_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_list_layout() {
        let entries = vec![
            PoolListEntry {
                mint: Pubkey::repeat_byte(1),
                ltv_bps: 8000,
                decimals: 6,
            },
            PoolListEntry {
                mint: Pubkey::NULL,
                ltv_bps: 0,
                decimals: 0,
            },
        ];
        let bytes = encode_pool_list(&entries);
        assert_eq!(bytes.len(), 1 + 2 * POOL_ENTRY_LEN);
        assert_eq!(bytes[0], 2);
        assert_eq!(decode_pool_list(&bytes).unwrap(), entries);
    }

    #[test]
    fn test_price_usd() {
        let record = PriceRecord {
            mint: Pubkey::repeat_byte(2),
            price_e8: 2_000_00000000,
            slot: 42,
        };
        let decoded = decode_price(&encode_price(&record)).unwrap();
        assert_eq!(decoded.slot, 42);
        assert!((decoded.price_usd() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_user_record_layout() {
        let record = UserRecord::new(Pubkey::repeat_byte(3), 7)
            .with_asset(0, 1_000, 0)
            .with_asset(1, 0, 900);
        let bytes = encode_user_record(&record);
        assert_eq!(bytes.len(), USER_HEADER_LEN + 2 * USER_ASSET_LEN);

        let decoded = decode_user_record(&bytes).unwrap();
        assert_eq!(decoded.page_id, 7);
        assert_eq!(decoded.assets[1].borrow_amount, 900);
    }

    #[test]
    fn test_truncated_payloads() {
        assert!(matches!(
            decode_price(&[0u8; 40]),
            Err(DecodeError::Truncated { expected: 48, actual: 40, .. })
        ));

        let record = UserRecord::new(Pubkey::repeat_byte(3), 0).with_asset(0, 1, 1);
        let bytes = encode_user_record(&record);
        assert!(decode_user_record(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_price(&PriceRecord {
            mint: Pubkey::repeat_byte(2),
            price_e8: 1,
            slot: 1,
        });
        bytes.push(0);
        assert!(matches!(
            decode_price(&bytes),
            Err(DecodeError::TrailingBytes { extra: 1, .. })
        ));
    }

    #[test]
    fn test_user_record_capacity() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[9u8; 32]);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push((MAX_USER_ASSETS + 1) as u8);
        assert!(matches!(
            decode_user_record(&bytes),
            Err(DecodeError::TooManyEntries { .. })
        ));
    }

    #[test]
    fn test_index_page_slots() {
        let slots = vec![Pubkey::repeat_byte(1), Pubkey::NULL, Pubkey::repeat_byte(2)];
        let decoded = decode_index_page(&encode_index_page(&slots)).unwrap();
        assert_eq!(decoded, slots);

        assert_eq!(decode_index_page(&[0u8; 33]), Err(DecodeError::MisalignedPage(33)));
        assert!(decode_index_page(&vec![0u8; 32 * (MAX_PAGE_SLOTS + 1)]).is_err());
        assert!(decode_index_page(&[]).unwrap().is_empty());
    }
}
