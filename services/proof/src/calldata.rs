//! Settlement calldata builder
//!
//! Packs a contribution proof into byte-exact calldata for the reward
//! contract: `submitProof(...)` for relay/storage nodes, `submitProofEx(...)`
//! for matching nodes. The digest is
//! `keccak256(period ‖ big-endian 32-byte uints ‖ node_type u8)` and the
//! signature is a 65-byte recoverable secp256k1 `r‖s‖v` with `v ∈ {27, 28}`.

use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use types::proof::ContributionProof;

/// 1.0 uptime scaled to 18 decimals.
const UPTIME_SCALE: u128 = 1_000_000_000_000_000_000;

const SUBMIT_PROOF_SIG: &str = "submitProof(string,uint256,uint256,uint256,uint256,uint8,bytes)";
const SUBMIT_PROOF_EX_SIG: &str =
    "submitProofEx(string,uint256,uint256,uint256,uint256,uint256,uint256,uint8,bytes)";

#[derive(Error, Debug)]
pub enum CalldataError {
    #[error("malformed signing key hex: {0}")]
    BadKeyHex(#[from] hex::FromHexError),

    #[error("invalid secp256k1 signing key")]
    BadKey,

    #[error("ecdsa signing failed")]
    Sign,
}

/// Arguments of `submitProof` / `submitProofEx`, all uints already scaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitProofArgs {
    pub period: String,
    /// Uptime in [0, 10^18].
    pub uptime: u128,
    pub storage_used_gb: u128,
    pub storage_total_gb: u128,
    pub bytes_relayed: u128,
    pub trades_matched: u128,
    pub volume_matched: u128,
    /// 0 = relay, 1 = storage, 2 = match.
    pub node_type: u8,
}

impl SubmitProofArgs {
    /// Build contract arguments from an emitted proof; uptime is scaled to
    /// 18 decimals and clamped to 10^18.
    pub fn from_proof(proof: &ContributionProof) -> Self {
        let uptime = (proof.metrics.uptime.max(0.0) * UPTIME_SCALE as f64) as u128;
        Self {
            period: proof.period.clone(),
            uptime: uptime.min(UPTIME_SCALE),
            storage_used_gb: proof.metrics.storage_used_gb.max(0.0) as u128,
            storage_total_gb: proof.metrics.storage_total_gb.max(0.0) as u128,
            bytes_relayed: u128::from(proof.metrics.bytes_relayed),
            trades_matched: u128::from(proof.metrics.trades_matched),
            volume_matched: proof.metrics.volume_matched,
            node_type: proof.node_type.as_u8(),
        }
    }

    /// Matching nodes (or any proof carrying match totals) use the extended
    /// entry point.
    pub fn use_submit_proof_ex(&self) -> bool {
        self.node_type == 2 || self.trades_matched != 0 || self.volume_matched != 0
    }
}

fn be32(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// `submitProof` digest (no match totals).
pub fn digest(args: &SubmitProofArgs) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(args.period.as_bytes());
    hasher.update(be32(args.uptime));
    hasher.update(be32(args.storage_used_gb));
    hasher.update(be32(args.storage_total_gb));
    hasher.update(be32(args.bytes_relayed));
    hasher.update([args.node_type]);
    hasher.finalize().into()
}

/// `submitProofEx` digest (match totals included before the node type).
pub fn digest_ex(args: &SubmitProofArgs) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(args.period.as_bytes());
    hasher.update(be32(args.uptime));
    hasher.update(be32(args.storage_used_gb));
    hasher.update(be32(args.storage_total_gb));
    hasher.update(be32(args.bytes_relayed));
    hasher.update(be32(args.trades_matched));
    hasher.update(be32(args.volume_matched));
    hasher.update([args.node_type]);
    hasher.finalize().into()
}

/// ECDSA-sign a digest with the on-chain key (hex, `0x` optional).
/// Returns 65 bytes `r ‖ s ‖ v`, `v ∈ {27, 28}`.
pub fn sign_digest(digest: &[u8; 32], private_key_hex: &str) -> Result<[u8; 65], CalldataError> {
    let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
    let key_bytes = hex::decode(key_hex)?;
    let key = SigningKey::from_slice(&key_bytes).map_err(|_| CalldataError::BadKey)?;
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .map_err(|_| CalldataError::Sign)?;

    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = 27 + recovery_id.to_byte();
    Ok(out)
}

fn selector(signature: &str) -> [u8; 4] {
    let hash: [u8; 32] = Keccak256::digest(signature.as_bytes()).into();
    [hash[0], hash[1], hash[2], hash[3]]
}

fn pad32(len: usize) -> usize {
    len.div_ceil(32) * 32
}

fn push_dynamic(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&be32(data.len() as u128));
    out.extend_from_slice(data);
    out.resize(out.len() + pad32(data.len()) - data.len(), 0);
}

fn encode(signature: &str, uints: &[u128], args: &SubmitProofArgs, sig: &[u8]) -> Vec<u8> {
    // Head: one word per argument; dynamic args hold tail offsets.
    let head_words = 1 + uints.len() + 1 + 1;
    let period_offset = head_words * 32;
    let sig_offset = period_offset + 32 + pad32(args.period.len());

    let mut out = Vec::with_capacity(4 + sig_offset + 32 + pad32(sig.len()));
    out.extend_from_slice(&selector(signature));
    out.extend_from_slice(&be32(period_offset as u128));
    for value in uints {
        out.extend_from_slice(&be32(*value));
    }
    out.extend_from_slice(&be32(u128::from(args.node_type)));
    out.extend_from_slice(&be32(sig_offset as u128));
    push_dynamic(&mut out, args.period.as_bytes());
    push_dynamic(&mut out, sig);
    out
}

/// Calldata for `submitProof(period, uptime, storageUsedGB, storageTotalGB,
/// bytesRelayed, nodeType, signature)`.
pub fn encode_submit_proof(args: &SubmitProofArgs, sig: &[u8]) -> Vec<u8> {
    encode(
        SUBMIT_PROOF_SIG,
        &[
            args.uptime,
            args.storage_used_gb,
            args.storage_total_gb,
            args.bytes_relayed,
        ],
        args,
        sig,
    )
}

/// Calldata for `submitProofEx(..., tradesMatched, volumeMatched, nodeType,
/// signature)`.
pub fn encode_submit_proof_ex(args: &SubmitProofArgs, sig: &[u8]) -> Vec<u8> {
    encode(
        SUBMIT_PROOF_EX_SIG,
        &[
            args.uptime,
            args.storage_used_gb,
            args.storage_total_gb,
            args.bytes_relayed,
            args.trades_matched,
            args.volume_matched,
        ],
        args,
        sig,
    )
}

/// Proof + on-chain key -> signed calldata, choosing the entry point by
/// node type and match totals.
pub fn build_signed_calldata(
    proof: &ContributionProof,
    private_key_hex: &str,
) -> Result<Vec<u8>, CalldataError> {
    let args = SubmitProofArgs::from_proof(proof);
    if args.use_submit_proof_ex() {
        let sig = sign_digest(&digest_ex(&args), private_key_hex)?;
        Ok(encode_submit_proof_ex(&args, &sig))
    } else {
        let sig = sign_digest(&digest(&args), private_key_hex)?;
        Ok(encode_submit_proof(&args, &sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use types::proof::{NodeType, ProofMetrics};

    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn args() -> SubmitProofArgs {
        SubmitProofArgs {
            period: "2026-07-20_2026-07-27".into(),
            uptime: UPTIME_SCALE,
            storage_used_gb: 12,
            storage_total_gb: 100,
            bytes_relayed: 4_096,
            trades_matched: 0,
            volume_matched: 0,
            node_type: 1,
        }
    }

    #[test]
    fn test_digest_is_deterministic_and_input_sensitive() {
        let a = args();
        assert_eq!(digest(&a), digest(&a));
        let mut b = args();
        b.bytes_relayed += 1;
        assert_ne!(digest(&a), digest(&b));
        assert_ne!(digest(&a), digest_ex(&a), "entry points hash differently");
    }

    #[test]
    fn test_signature_is_recoverable_with_legacy_v() {
        let d = digest(&args());
        let sig = sign_digest(&d, TEST_KEY).unwrap();
        assert!(sig[64] == 27 || sig[64] == 28);

        let key_bytes = hex::decode(TEST_KEY.trim_start_matches("0x")).unwrap();
        let expected = SigningKey::from_slice(&key_bytes).unwrap();
        let parsed = Signature::from_slice(&sig[..64]).unwrap();
        let recid = RecoveryId::try_from(sig[64] - 27).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&d, &parsed, recid).unwrap();
        assert_eq!(recovered, *expected.verifying_key());
    }

    #[test]
    fn test_sign_rejects_bad_keys() {
        let d = digest(&args());
        assert!(matches!(sign_digest(&d, "zz"), Err(CalldataError::BadKeyHex(_))));
        assert!(matches!(sign_digest(&d, "0x00"), Err(CalldataError::BadKey)));
    }

    #[test]
    fn test_submit_proof_layout() {
        let sig = [0xAAu8; 65];
        let data = encode_submit_proof(&args(), &sig);

        // selector + 7 head words + period tail + signature tail
        let period_tail = 32 + pad32("2026-07-20_2026-07-27".len());
        assert_eq!(data.len(), 4 + 7 * 32 + period_tail + 32 + pad32(65));

        let word = |i: usize| &data[4 + i * 32..4 + (i + 1) * 32];
        assert_eq!(word(0), &be32(7 * 32), "period offset");
        assert_eq!(word(1), &be32(UPTIME_SCALE), "uptime");
        assert_eq!(word(4), &be32(4_096), "bytesRelayed");
        assert_eq!(word(5), &be32(1), "nodeType");
        assert_eq!(word(6), &be32((7 * 32 + period_tail) as u128), "sig offset");

        // Period tail: length word then utf8, zero padded.
        let tail = &data[4 + 7 * 32..];
        assert_eq!(&tail[..32], &be32(21));
        assert_eq!(&tail[32..53], b"2026-07-20_2026-07-27");
        assert!(tail[53..64].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_submit_proof_ex_layout() {
        let mut a = args();
        a.node_type = 2;
        a.trades_matched = 3;
        a.volume_matched = 7;
        let data = encode_submit_proof_ex(&a, &[0u8; 65]);
        let word = |i: usize| &data[4 + i * 32..4 + (i + 1) * 32];
        assert_eq!(word(0), &be32(9 * 32), "period offset after 9 head words");
        assert_eq!(word(5), &be32(3), "tradesMatched");
        assert_eq!(word(6), &be32(7), "volumeMatched");
        assert_eq!(word(7), &be32(2), "nodeType");
    }

    #[test]
    fn test_args_from_proof_scales_and_clamps_uptime() {
        let mut proof = ContributionProof {
            node_id: "n".into(),
            node_type: NodeType::Match,
            period: "2026-07-20_2026-07-27".into(),
            metrics: ProofMetrics {
                uptime: 0.5,
                trades_matched: 10,
                volume_matched: 1_000,
                ..Default::default()
            },
            signature: String::new(),
            timestamp: 0,
        };
        let a = SubmitProofArgs::from_proof(&proof);
        assert_eq!(a.uptime, UPTIME_SCALE / 2);
        assert_eq!(a.node_type, 2);
        assert!(a.use_submit_proof_ex());

        proof.metrics.uptime = 3.5;
        assert_eq!(
            SubmitProofArgs::from_proof(&proof).uptime,
            UPTIME_SCALE,
            "clamped to 1e18"
        );
    }

    #[test]
    fn test_entry_point_selection() {
        let relay = args();
        assert!(!relay.use_submit_proof_ex());
        let mut matched = args();
        matched.trades_matched = 1;
        assert!(matched.use_submit_proof_ex());

        let proof = ContributionProof {
            node_id: "n".into(),
            node_type: NodeType::Relay,
            period: "2026-07-20_2026-07-27".into(),
            metrics: ProofMetrics {
                uptime: 1.0,
                bytes_relayed: 5,
                ..Default::default()
            },
            signature: String::new(),
            timestamp: 0,
        };
        let calldata = build_signed_calldata(&proof, TEST_KEY).unwrap();
        assert_eq!(&calldata[..4], &selector(SUBMIT_PROOF_SIG));

        let mut match_proof = proof;
        match_proof.node_type = NodeType::Match;
        let calldata = build_signed_calldata(&match_proof, TEST_KEY).unwrap();
        assert_eq!(&calldata[..4], &selector(SUBMIT_PROOF_EX_SIG));
    }
}
