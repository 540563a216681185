//! Mint/burn handling, spec §4.2.1. Applied once per transaction inside
//! [`super::connect_transaction`]/[`super::disconnect_transaction`]; mints
//! and burns are processed in list order on connect and reverse order on
//! disconnect, per spec.

use crate::account::types::{Account, AssetCreatedAt, AssetRecord};
use crate::errors::WalletError;
use crate::store::{keys, values, Txn, CF_ASSETS};
use crate::types::{BlockHeader, BurnDescriptor, MintDescriptor, TxHash};

fn read_asset(
    txn: &Txn,
    account: &Account,
    asset_id: [u8; 32],
) -> Result<Option<AssetRecord>, WalletError> {
    let key = keys::prefix_asset_key(account.prefix(), asset_id);
    match txn.get_cf(CF_ASSETS, &key)? {
        Some(bytes) => Ok(Some(values::decode(&bytes)?)),
        None => Ok(None),
    }
}

fn write_asset(txn: &Txn, account: &Account, record: &AssetRecord) -> Result<(), WalletError> {
    let key = keys::prefix_asset_key(account.prefix(), record.id);
    txn.put_cf(CF_ASSETS, &key, &values::encode(record)?)
}

/// Connect-side mint application: upserts the `AssetRecord` when this
/// account is (becoming) the owner or already holds the asset; accumulates
/// supply only for the owner, only for on-chain mints. Returns whether the
/// asset table was actually touched, so the caller knows whether this
/// affected the account at all.
pub fn apply_mint(
    txn: &Txn,
    account: &Account,
    mint: &MintDescriptor,
    header: &BlockHeader,
    tx_hash: TxHash,
) -> Result<bool, WalletError> {
    let existing = read_asset(txn, account, mint.asset_id)?;
    let is_owner = existing
        .as_ref()
        .map(|a| a.owner == mint.owner)
        .unwrap_or(mint.owner == account.public_address);
    let already_held = existing.is_some();
    if !is_owner && !already_held {
        return Ok(false);
    }

    let created_at = existing
        .as_ref()
        .and_then(|a| a.created_at)
        .or(Some(AssetCreatedAt {
            block_hash: header.hash,
            sequence: header.sequence,
            created_transaction_hash: tx_hash,
        }));

    let supply = if is_owner {
        let base = existing.as_ref().and_then(|a| a.supply).unwrap_or(0);
        Some(base + i128::from(mint.value))
    } else {
        None
    };

    let record = AssetRecord {
        id: mint.asset_id,
        metadata: mint.metadata.clone(),
        name: mint.asset_name.clone(),
        nonce: mint.nonce,
        creator: mint.creator.clone(),
        owner: mint.owner.clone(),
        created_at,
        supply,
    };
    write_asset(txn, account, &record)?;
    Ok(true)
}

/// The inverse of [`apply_mint`], run when disconnecting the block that
/// contained it: undoes the supply accumulation and, if this block is the
/// one that first confirmed the asset, clears `created_at` again.
pub fn reverse_mint(
    txn: &Txn,
    account: &Account,
    mint: &MintDescriptor,
    header: &BlockHeader,
) -> Result<(), WalletError> {
    let Some(mut existing) = read_asset(txn, account, mint.asset_id)? else {
        return Ok(());
    };
    let is_owner = existing.owner == mint.owner;

    if let Some(created_at) = existing.created_at {
        if created_at.block_hash == header.hash && created_at.sequence == header.sequence {
            existing.created_at = None;
        }
    }
    if is_owner {
        if let Some(supply) = existing.supply.as_mut() {
            *supply -= i128::from(mint.value);
        }
    }
    write_asset(txn, account, &existing)
}

/// Connect-side burn application: decrements supply if this account is the
/// owner. Fails [`WalletError::InvalidBurn`] if that would go negative.
/// Returns whether the asset table was touched.
pub fn apply_burn(
    txn: &Txn,
    account: &Account,
    burn: &BurnDescriptor,
) -> Result<bool, WalletError> {
    let Some(mut existing) = read_asset(txn, account, burn.asset_id)? else {
        return Ok(false);
    };
    let is_owner = existing.owner == account.public_address;
    if !is_owner {
        return Ok(false);
    }
    let supply = existing.supply.unwrap_or(0);
    let new_supply = supply - i128::from(burn.value);
    if new_supply < 0 {
        return Err(WalletError::InvalidBurn);
    }
    existing.supply = Some(new_supply);
    write_asset(txn, account, &existing)?;
    Ok(true)
}

/// The inverse of [`apply_burn`]: adds the burned value back to supply.
pub fn reverse_burn(
    txn: &Txn,
    account: &Account,
    burn: &BurnDescriptor,
) -> Result<(), WalletError> {
    let Some(mut existing) = read_asset(txn, account, burn.asset_id)? else {
        return Ok(());
    };
    let is_owner = existing.owner == account.public_address;
    if !is_owner {
        return Ok(());
    }
    if let Some(supply) = existing.supply.as_mut() {
        *supply += i128::from(burn.value);
    }
    write_asset(txn, account, &existing)
}
