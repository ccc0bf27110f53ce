use ILidoLocator::ILidoLocatorInstance;
use alloy_contract::Result as ContractResult;
use alloy_primitives::Address;
use alloy_sol_macro::sol;

use crate::DefaultProvider;

/// A wrapper over the `LidoLocator` contract, the registry of protocol addresses.
#[derive(Debug, Clone)]
pub struct LidoLocator(ILidoLocatorInstance<DefaultProvider>);

impl LidoLocator {
    /// Create a new `LidoLocator` instance at the given contract address.
    pub const fn new(address: Address, provider: DefaultProvider) -> Self {
        Self(ILidoLocatorInstance::new(address, provider))
    }

    /// Address of the withdrawal vault, the only valid source of EL requests
    /// for protocol validators.
    pub async fn withdrawal_vault(&self) -> ContractResult<Address> {
        self.0.withdrawalVault().call().await
    }

    /// Address of the validators exit bus oracle.
    pub async fn validators_exit_bus_oracle(&self) -> ContractResult<Address> {
        self.0.validatorsExitBusOracle().call().await
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    interface ILidoLocator {
        function withdrawalVault() external view returns (address);
        function validatorsExitBusOracle() external view returns (address);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::address;
    use mockito::{Matcher, Server};
    use url::Url;

    use super::*;
    use crate::connect_http;

    #[tokio::test]
    async fn reads_withdrawal_vault_over_http() {
        let mut server = Server::new_async().await;
        let vault = address!("0xb9d7934878b5fb9610b3fe8a5e441e8fad7e293f");
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::Regex("eth_call".to_owned()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":0,"result":"0x000000000000000000000000b9d7934878b5fb9610b3fe8a5e441e8fad7e293f"}"#,
            )
            .create_async()
            .await;

        let provider = connect_http(Url::parse(&server.url()).unwrap(), Duration::from_secs(5)).unwrap();
        let locator = LidoLocator::new(Address::repeat_byte(0x11), provider);

        assert_eq!(locator.withdrawal_vault().await.unwrap(), vault);
        mock.assert_async().await;
    }
}
