use std::collections::HashMap;

use async_trait::async_trait;
use eyre::Result;
use network::KeysApiClient;
use primitives::{NamedKey, OwnedKeys};
use prometheus::IntGauge;
use tracing::{debug, info};

use crate::KeySource;

/// Keys of all staking modules served by the keys API.
///
/// A refresh is skipped unless the served EL snapshot advanced and the sum of
/// module nonces changed.
#[derive(Debug)]
pub struct KeysApiSource {
    client: KeysApiClient,
    block_number: Option<IntGauge>,
    last_timestamp: Option<u64>,
    last_nonce: Option<u64>,
}

impl KeysApiSource {
    /// Source over `client`. `block_number` tracks the snapshot block of the service.
    pub const fn new(client: KeysApiClient, block_number: Option<IntGauge>) -> Self {
        Self { client, block_number, last_timestamp: None, last_nonce: None }
    }
}

#[async_trait]
impl KeySource for KeysApiSource {
    async fn update_keys(&mut self) -> Result<Option<OwnedKeys>> {
        let status = self.client.get_status().await?;
        let snapshot = status.el_block_snapshot;
        if let Some(gauge) = &self.block_number {
            gauge.set(i64::try_from(snapshot.block_number).unwrap_or(i64::MAX));
        }
        if self.last_timestamp.is_some_and(|last| last >= snapshot.timestamp) {
            debug!(timestamp = snapshot.timestamp, "Keys API snapshot did not advance");
            return Ok(None);
        }

        let modules = self.client.get_modules().await?;
        let nonce = modules.iter().map(|module| module.nonce).sum::<u64>();
        if self.last_nonce == Some(nonce) {
            debug!(nonce, "Keys API nonce did not change");
            self.last_timestamp = Some(snapshot.timestamp);
            return Ok(None);
        }

        info!(nonce, block = snapshot.block_number, "Updating owned keys");
        let mut operators = HashMap::new();
        for entry in self.client.get_operators().await? {
            let address = entry.module.staking_module_address.to_lowercase();
            for operator in entry.operators {
                operators
                    .insert((address.clone(), operator.index), (operator.name, entry.module.id));
            }
        }

        let mut keys = OwnedKeys::new();
        for registered in self.client.get_used_keys().await? {
            let address = registered.module_address.to_lowercase();
            let Some((name, module_index)) = operators.get(&(address, registered.operator_index))
            else {
                debug!(key = %registered.key, "Key of an unknown operator");
                continue;
            };
            let key = NamedKey::normalize(&registered.key);
            keys.insert(
                key.clone(),
                NamedKey {
                    key,
                    operator_name: name.clone(),
                    operator_index: registered.operator_index,
                    module_index: *module_index,
                },
            );
        }

        self.last_timestamp = Some(snapshot.timestamp);
        self.last_nonce = Some(nonce);
        Ok(Some(keys))
    }
}
