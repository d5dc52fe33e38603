use crate::InputKey;
use bitcoin::Txid;
use std::collections::BTreeSet;

/// What an output script resolves to under a given network (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AddressKind {
    /// A standard pay-to-… script with a single canonical address.
    Address(String),
    /// A legacy bare multisig script: it would accept payment to more than
    /// one key, so it has no single canonical address.
    BareMultisig,
    /// Not a recognized standard script.
    None,
}

impl AddressKind {
    pub fn as_address(&self) -> Option<&str> {
        match self {
            AddressKind::Address(a) => Some(a.as_str()),
            _ => None,
        }
    }

    pub fn is_multi_address(&self) -> bool {
        matches!(self, AddressKind::BareMultisig)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInput {
    pub input_key: InputKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOutput {
    pub value_sats: u64,
    pub script_pubkey: Vec<u8>,
    pub address: AddressKind,
}

/// The parsed form of a raw transaction byte string (§4.3): txid, coinbase
/// flag, ordered inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub txid: Txid,
    pub is_coinbase: bool,
    pub inputs: Vec<DecodedInput>,
    pub outputs: Vec<DecodedOutput>,
}

impl DecodedTransaction {
    /// The input keys of this transaction, computed fresh each call; callers
    /// that need to store them should collect once.
    pub fn input_keys(&self) -> BTreeSet<InputKey> {
        self.inputs.iter().map(|i| i.input_key).collect()
    }
}
