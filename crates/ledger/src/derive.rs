//! Derivation of well-known record addresses.

use sha2::{Digest, Sha256};

use crate::pubkey::Pubkey;

/// Well-known records whose addresses are derived rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// The protocol's pool list
    PoolList,
    /// Price record of an asset mint
    AssetPrice { mint: Pubkey },
    /// Account record of a user wallet
    UserRecord { wallet: Pubkey },
    /// One page of the sharded user index
    UsersPage { page_id: u32 },
    /// Token account holding `mint` for `owner`
    TokenAccount { owner: Pubkey, mint: Pubkey },
}

impl AddressKind {
    fn tag(&self) -> &'static [u8] {
        match self {
            Self::PoolList => b"pool_list",
            Self::AssetPrice { .. } => b"asset_price",
            Self::UserRecord { .. } => b"user_info",
            Self::UsersPage { .. } => b"users_page",
            Self::TokenAccount { .. } => b"token_account",
        }
    }
}

/// Resolves derived addresses.
pub trait AddressDeriver: Send + Sync {
    fn derive_address(&self, kind: &AddressKind) -> Pubkey;
}

/// Hash-based deriver: `sha256(program_id || tag || params)`.
#[derive(Debug, Clone, Copy)]
pub struct SeedDeriver {
    program_id: Pubkey,
}

impl SeedDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }
}

impl AddressDeriver for SeedDeriver {
    fn derive_address(&self, kind: &AddressKind) -> Pubkey {
        let mut hasher = Sha256::new();
        hasher.update(self.program_id.as_bytes());
        hasher.update(kind.tag());
        match kind {
            AddressKind::PoolList => {}
            AddressKind::AssetPrice { mint } => hasher.update(mint.as_bytes()),
            AddressKind::UserRecord { wallet } => hasher.update(wallet.as_bytes()),
            AddressKind::UsersPage { page_id } => hasher.update(page_id.to_le_bytes()),
            AddressKind::TokenAccount { owner, mint } => {
                hasher.update(owner.as_bytes());
                hasher.update(mint.as_bytes());
            }
        }
        Pubkey::new(hasher.finalize().into())
    }
}
