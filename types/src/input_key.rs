use bitcoin::Txid;
use std::fmt;
use std::str::FromStr;

/// The canonical "prev-txid:output-index" string form of a transaction
/// input, used as the key of the conflict index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputKey {
    pub previous_txid: Txid,
    pub previous_vout: u32,
}

impl InputKey {
    pub fn new(previous_txid: Txid, previous_vout: u32) -> Self {
        Self {
            previous_txid,
            previous_vout,
        }
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.previous_txid, self.previous_vout)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed input key: {0}")]
pub struct ParseInputKeyError(String);

impl FromStr for InputKey {
    type Err = ParseInputKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseInputKeyError(s.to_string()))?;
        let previous_txid = Txid::from_str(txid).map_err(|_| ParseInputKeyError(s.to_string()))?;
        let previous_vout: u32 = vout.parse().map_err(|_| ParseInputKeyError(s.to_string()))?;
        Ok(InputKey::new(previous_txid, previous_vout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let txid =
            Txid::from_str("aa00000000000000000000000000000000000000000000000000000000aa")
                .unwrap();
        let key = InputKey::new(txid, 3);
        let text = key.to_string();
        let parsed: InputKey = text.parse().unwrap();
        assert_eq!(key, parsed);
    }
}
