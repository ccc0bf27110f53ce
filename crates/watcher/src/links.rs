use primitives::{OwnedKeys, Slot, ValidatorIdx};

/// Markdown links to the beaconcha.in explorer of one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Links {
    network: String,
}

impl Links {
    /// Links for `network`, e.g. `mainnet` or `holesky`.
    pub fn new(network: impl Into<String>) -> Self {
        Self { network: network.into() }
    }

    /// Network name.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// `[slot](https://{network}.beaconcha.in/slot/{slot})`
    pub fn slot(&self, slot: Slot) -> String {
        format!("[{slot}](https://{}.beaconcha.in/slot/{slot})", self.network)
    }

    /// `[index](http://{network}.beaconcha.in/validator/{index})`
    pub fn validator(&self, index: ValidatorIdx) -> String {
        format!("[{index}](http://{}.beaconcha.in/validator/{index})", self.network)
    }

    /// Bracketed, comma separated validator links.
    pub fn validators(&self, indices: &[ValidatorIdx]) -> String {
        let links = indices.iter().map(|index| self.validator(*index)).collect::<Vec<_>>();
        format!("[{}]", links.join(", "))
    }

    /// Validator link titled by the owning operator name, if known, and the pubkey.
    pub fn pubkey(&self, pubkey: &str, keys: &OwnedKeys) -> String {
        let title = match keys.get(&primitives::NamedKey::normalize(pubkey)) {
            Some(owned) => format!("{} {pubkey}", owned.operator_name),
            None => pubkey.to_owned(),
        };
        format!("[{title}](https://{}.beaconcha.in/validator/{pubkey})", self.network)
    }
}

#[cfg(test)]
mod tests {
    use primitives::NamedKey;

    use super::*;

    #[test]
    fn renders_explorer_links() {
        let links = Links::new("holesky");
        assert_eq!(links.slot(7), "[7](https://holesky.beaconcha.in/slot/7)");
        assert_eq!(
            links.validators(&[1, 2]),
            "[[1](http://holesky.beaconcha.in/validator/1), [2](http://holesky.beaconcha.in/validator/2)]"
        );
    }

    #[test]
    fn pubkey_link_names_owner() {
        let mut keys = OwnedKeys::new();
        keys.insert(
            "0xaa".to_owned(),
            NamedKey {
                key: "0xaa".to_owned(),
                operator_name: "Operator A".to_owned(),
                operator_index: 1,
                module_index: 1,
            },
        );
        let links = Links::new("mainnet");
        assert_eq!(links.pubkey("0xAA", &keys), "[Operator A 0xAA](https://mainnet.beaconcha.in/validator/0xAA)");
        assert_eq!(links.pubkey("0xbb", &keys), "[0xbb](https://mainnet.beaconcha.in/validator/0xbb)");
    }
}
