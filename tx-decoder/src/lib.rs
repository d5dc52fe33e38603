//! Raw transaction decoding.
//!
//! Delegates consensus (de)serialization and address derivation to the
//! `bitcoin` crate instead of hand-rolling varint/script parsing — the
//! whole Bitcoin-facing Rust ecosystem (`bdk`, `liana`, `lwk`) builds on the
//! same crate for exactly this.

use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::blockdata::script::Instruction;
use bitcoin::{Address, Network, ScriptBuf, Transaction};
use btcwatch_error::DecodeError;
use btcwatch_types::{AddressKind, DecodedInput, DecodedOutput, DecodedTransaction, InputKey};

/// Scripts past this length are rejected outright rather than classified;
/// mirrors Bitcoin Core's own `MAX_SCRIPT_SIZE` policy constant.
const MAX_SCRIPT_SIZE: usize = 10_000;

/// Decodes raw transaction byte strings for a fixed network, since address
/// derivation is network-dependent (§4.3: "given a known network").
#[derive(Debug, Clone, Copy)]
pub struct TxDecoder {
    network: Network,
}

impl TxDecoder {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    /// Parse `raw` into txid, coinbase flag, ordered inputs and outputs.
    pub fn decode(&self, raw: &[u8]) -> Result<DecodedTransaction, DecodeError> {
        let tx: Transaction = bitcoin::consensus::deserialize(raw)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let is_coinbase = tx.is_coinbase();

        let inputs = tx
            .input
            .iter()
            .map(|txin| DecodedInput {
                input_key: InputKey::new(txin.previous_output.txid, txin.previous_output.vout),
            })
            .collect();

        let mut outputs = Vec::with_capacity(tx.output.len());
        for txout in &tx.output {
            if txout.script_pubkey.len() > MAX_SCRIPT_SIZE {
                return Err(DecodeError::ScriptTooLong);
            }
            outputs.push(DecodedOutput {
                value_sats: txout.value.to_sat(),
                script_pubkey: txout.script_pubkey.to_bytes(),
                address: self.classify_script(&txout.script_pubkey),
            });
        }

        Ok(DecodedTransaction {
            txid: tx.compute_txid(),
            is_coinbase,
            inputs,
            outputs,
        })
    }

    /// Standard pay-to-… address, bare multisig, or "no address" (§4.3).
    fn classify_script(&self, script: &ScriptBuf) -> AddressKind {
        if let Ok(address) = Address::from_script(script, self.network) {
            return AddressKind::Address(address.to_string());
        }
        if is_bare_multisig(script) {
            return AddressKind::BareMultisig;
        }
        AddressKind::None
    }
}

/// A legacy bare multisig script: `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`,
/// not wrapped in P2SH/P2WSH. Pattern-matched directly on opcodes rather
/// than relying on a single crate helper, since the standardness check is
/// narrow enough to state outright.
fn is_bare_multisig(script: &ScriptBuf) -> bool {
    let mut instructions = script.instructions();

    let m = match instructions.next() {
        Some(Ok(Instruction::Op(op))) => small_num(op.to_u8()),
        _ => None,
    };
    let Some(m) = m else { return false };

    let mut pushed_keys = 0usize;
    let n = loop {
        match instructions.next() {
            Some(Ok(Instruction::PushBytes(bytes))) => {
                let len = bytes.len();
                if len != 33 && len != 65 {
                    return false;
                }
                pushed_keys += 1;
            }
            Some(Ok(Instruction::Op(op))) => match small_num(op.to_u8()) {
                Some(n) => break n,
                None => return false,
            },
            _ => return false,
        }
    };

    if pushed_keys == 0 || (n as usize) != pushed_keys || m > n {
        return false;
    }

    matches!(
        instructions.next(),
        Some(Ok(Instruction::Op(op))) if op == OP_CHECKMULTISIG
    ) && instructions.next().is_none()
}

fn small_num(opcode: u8) -> Option<u8> {
    const OP_1: u8 = 0x51;
    const OP_16: u8 = 0x60;
    if (OP_1..=OP_16).contains(&opcode) {
        Some(opcode - OP_1 + 1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{absolute::LockTime, transaction::Version, Amount, OutPoint, TxIn, TxOut, Txid};

    fn sample_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 0xffff_ffff),
                ..Default::default()
            }],
            output: vec![TxOut {
                value: Amount::from_sat(5_000),
                script_pubkey: ScriptBuf::new_op_return(b"hi"),
            }],
        }
    }

    #[test]
    fn decodes_a_simple_transaction() {
        let tx = sample_tx();
        let raw = bitcoin::consensus::serialize(&tx);
        let decoder = TxDecoder::new(Network::Bitcoin);
        let decoded = decoder.decode(&raw).unwrap();
        assert_eq!(decoded.txid, tx.compute_txid());
        assert_eq!(decoded.outputs.len(), 1);
        assert_eq!(decoded.outputs[0].value_sats, 5_000);
        assert_eq!(decoded.outputs[0].address, AddressKind::None);
    }

    #[test]
    fn rejects_truncated_bytes() {
        let decoder = TxDecoder::new(Network::Bitcoin);
        assert!(decoder.decode(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn derives_p2wpkh_address() {
        use bitcoin::WPubkeyHash;
        let hash = WPubkeyHash::from_slice(&[7u8; 20]).unwrap();
        let script = ScriptBuf::new_p2wpkh(&hash);

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn::default()],
            output: vec![TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: script,
            }],
        };
        let raw = bitcoin::consensus::serialize(&tx);
        let decoder = TxDecoder::new(Network::Bitcoin);
        let decoded = decoder.decode(&raw).unwrap();
        assert!(matches!(decoded.outputs[0].address, AddressKind::Address(_)));
    }
}
