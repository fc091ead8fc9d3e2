//! Consensus encoding of shares
//!
//! Field layout, in order:
//! - `SmallBlockHeader`: varint version, 256-bit previous block (zero for none),
//!   u32 timestamp, compact bits, u32 nonce
//! - `ShareInfo`: nested `ShareData`, new transaction hashes, transaction hash
//!   refs (varint pair count, then pairs), far share hash, max bits, bits,
//!   u32 timestamp, u32 absheight, u128 abswork
//! - ref merkle link, u64 last txout nonce, hash link, merkle link
//!
//! Merkle link indices and hash link extra data are zero-width.

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::io::{self, Read, Write};
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, PubkeyHash, Txid};

use super::hash_link::HashLink;
use super::merkle::MerkleLink;
use super::{
    RawShare, ShareContents, ShareData, ShareInfo, SmallBlockHeader, StaleInfo,
    TransactionHashRef,
};

/// Upper bound on decoded list lengths.
const MAX_LIST_LEN: u64 = 100_000;

fn encode_optional<W: Write + ?Sized>(
    hash: Option<sha256d::Hash>,
    w: &mut W,
) -> Result<usize, io::Error> {
    hash.unwrap_or_else(sha256d::Hash::all_zeros)
        .consensus_encode(w)
}

fn decode_optional<R: Read + ?Sized>(r: &mut R) -> Result<Option<sha256d::Hash>, encode::Error> {
    let hash = sha256d::Hash::consensus_decode(r)?;
    Ok((hash != sha256d::Hash::all_zeros()).then_some(hash))
}

fn decode_len<R: Read + ?Sized>(r: &mut R) -> Result<u64, encode::Error> {
    let VarInt(len) = VarInt::consensus_decode(r)?;
    if len > MAX_LIST_LEN {
        return Err(encode::Error::ParseFailed("list too long"));
    }
    Ok(len)
}

fn encode_list<T: Encodable, W: Write + ?Sized>(
    items: &[T],
    w: &mut W,
) -> Result<usize, io::Error> {
    let mut len = VarInt(items.len() as u64).consensus_encode(w)?;
    for item in items {
        len += item.consensus_encode(w)?;
    }
    Ok(len)
}

fn decode_list<T: Decodable, R: Read + ?Sized>(r: &mut R) -> Result<Vec<T>, encode::Error> {
    let len = decode_len(r)?;
    (0..len).map(|_| T::consensus_decode(r)).collect()
}

impl Encodable for StaleInfo {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        u8::from(*self).consensus_encode(w)
    }
}

impl Decodable for StaleInfo {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(StaleInfo::from(u8::consensus_decode(r)?))
    }
}

impl Encodable for SmallBlockHeader {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = VarInt(self.version).consensus_encode(w)?;
        len += encode_optional(self.previous_block.map(BlockHash::to_raw_hash), w)?;
        len += self.timestamp.consensus_encode(w)?;
        len += self.bits.consensus_encode(w)?;
        len += self.nonce.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for SmallBlockHeader {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(SmallBlockHeader {
            version: VarInt::consensus_decode(r)?.0,
            previous_block: decode_optional(r)?.map(BlockHash::from_raw_hash),
            timestamp: u32::consensus_decode(r)?,
            bits: CompactTarget::consensus_decode(r)?,
            nonce: u32::consensus_decode(r)?,
        })
    }
}

impl Encodable for ShareData {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = encode_optional(self.previous_share_hash, w)?;
        len += self.coinbase.consensus_encode(w)?;
        len += self.nonce.consensus_encode(w)?;
        w.write_all(self.pubkey_hash.as_byte_array())?;
        len += 20;
        len += self.subsidy.consensus_encode(w)?;
        len += self.donation.consensus_encode(w)?;
        len += self.stale_info.consensus_encode(w)?;
        len += VarInt(self.desired_version).consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for ShareData {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let previous_share_hash = decode_optional(r)?;
        let coinbase = Vec::<u8>::consensus_decode(r)?;
        let nonce = u32::consensus_decode(r)?;
        let mut pubkey_hash = [0u8; 20];
        r.read_exact(&mut pubkey_hash)?;
        Ok(ShareData {
            previous_share_hash,
            coinbase,
            nonce,
            pubkey_hash: PubkeyHash::from_byte_array(pubkey_hash),
            subsidy: u64::consensus_decode(r)?,
            donation: u16::consensus_decode(r)?,
            stale_info: StaleInfo::consensus_decode(r)?,
            desired_version: VarInt::consensus_decode(r)?.0,
        })
    }
}

impl Encodable for ShareInfo {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.share_data.consensus_encode(w)?;
        len += encode_list(&self.new_transaction_hashes, w)?;
        len += VarInt(self.transaction_hash_refs.len() as u64).consensus_encode(w)?;
        for tx_ref in &self.transaction_hash_refs {
            len += VarInt(tx_ref.share_count).consensus_encode(w)?;
            len += VarInt(tx_ref.tx_count).consensus_encode(w)?;
        }
        len += encode_optional(self.far_share_hash, w)?;
        len += self.max_bits.consensus_encode(w)?;
        len += self.bits.consensus_encode(w)?;
        len += self.timestamp.consensus_encode(w)?;
        len += self.absheight.consensus_encode(w)?;
        len += (self.abswork as u64).consensus_encode(w)?;
        len += ((self.abswork >> 64) as u64).consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for ShareInfo {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let share_data = ShareData::consensus_decode(r)?;
        let new_transaction_hashes = decode_list::<Txid, _>(r)?;
        let ref_count = decode_len(r)?;
        let transaction_hash_refs = (0..ref_count)
            .map(|_| {
                Ok(TransactionHashRef {
                    share_count: VarInt::consensus_decode(r)?.0,
                    tx_count: VarInt::consensus_decode(r)?.0,
                })
            })
            .collect::<Result<Vec<_>, encode::Error>>()?;
        let far_share_hash = decode_optional(r)?;
        let max_bits = CompactTarget::consensus_decode(r)?;
        let bits = CompactTarget::consensus_decode(r)?;
        let timestamp = u32::consensus_decode(r)?;
        let absheight = u32::consensus_decode(r)?;
        let low = u64::consensus_decode(r)?;
        let high = u64::consensus_decode(r)?;
        Ok(ShareInfo {
            share_data,
            new_transaction_hashes,
            transaction_hash_refs,
            far_share_hash,
            max_bits,
            bits,
            timestamp,
            absheight,
            abswork: u128::from(low) | (u128::from(high) << 64),
        })
    }
}

impl Encodable for MerkleLink {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        encode_list(&self.branch, w)
    }
}

impl Decodable for MerkleLink {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(MerkleLink {
            branch: decode_list(r)?,
            index: 0,
        })
    }
}

impl Encodable for HashLink {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let len = self.state.consensus_encode(w)?;
        Ok(len + VarInt(self.length).consensus_encode(w)?)
    }
}

impl Decodable for HashLink {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(HashLink {
            state: <[u8; 32]>::consensus_decode(r)?,
            extra_data: Vec::new(),
            length: VarInt::consensus_decode(r)?.0,
        })
    }
}

impl Encodable for ShareContents {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.min_header.consensus_encode(w)?;
        len += self.share_info.consensus_encode(w)?;
        len += self.ref_merkle_link.consensus_encode(w)?;
        len += self.last_txout_nonce.consensus_encode(w)?;
        len += self.hash_link.consensus_encode(w)?;
        len += self.merkle_link.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for ShareContents {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(ShareContents {
            min_header: SmallBlockHeader::consensus_decode(r)?,
            share_info: ShareInfo::consensus_decode(r)?,
            ref_merkle_link: MerkleLink::consensus_decode(r)?,
            last_txout_nonce: u64::consensus_decode(r)?,
            hash_link: HashLink::consensus_decode(r)?,
            merkle_link: MerkleLink::consensus_decode(r)?,
        })
    }
}

impl Encodable for RawShare {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let len = VarInt(self.share_type).consensus_encode(w)?;
        Ok(len + self.contents.consensus_encode(w)?)
    }
}

impl Decodable for RawShare {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(RawShare {
            share_type: VarInt::consensus_decode(r)?.0,
            contents: Vec::<u8>::consensus_decode(r)?,
        })
    }
}
