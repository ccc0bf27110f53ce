use std::{
    io::{self, BufReader, Read},
    time::Duration,
};

use futures::{Stream, StreamExt, TryStreamExt};
use primitives::{
    BlockHeaderResponse, BlockId, ChainReorgEvent, Genesis, ValidatorEntry, beacon::SignedBlock,
};
use prometheus::HistogramVec;
use reqwest::Url;
use serde::Deserialize;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

use crate::{
    ProviderError,
    http_provider::{ForceUseFallback, HttpProvider, RequestOptions, RequestPolicy},
    sse::decode_events,
};

const API_GET_GENESIS: &str = "eth/v1/beacon/genesis";
const API_GET_BLOCK_HEADER: &str = "eth/v1/beacon/headers/{block_id}";
const API_GET_BLOCK_DETAILS: &str = "eth/v2/beacon/blocks/{block_id}";
const API_GET_VALIDATORS: &str = "eth/v1/beacon/states/{state_id}/validators";
const API_GET_EVENTS: &str = "eth/v1/events";

/// Head polling must not stall on a slow node.
const HEAD_REQUEST_TIMEOUT: Duration = Duration::from_millis(1500);
const HEAD_REQUEST_RETRIES: usize = 1;
const HEAD_REQUEST_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

/// Typed beacon node API client.
///
/// Spec: <https://ethereum.github.io/beacon-APIs/>
#[derive(Debug, Clone)]
pub struct ConsensusClient {
    provider: HttpProvider,
    head_policy: RequestPolicy,
    stream_policy: RequestPolicy,
}

impl ConsensusClient {
    /// Create a client over `hosts`, tried in order.
    pub fn new(
        hosts: Vec<Url>,
        policy: RequestPolicy,
        metrics: Option<HistogramVec>,
    ) -> Result<Self, ProviderError> {
        let head_policy =
            RequestPolicy::new(HEAD_REQUEST_TIMEOUT, HEAD_REQUEST_RETRIES, HEAD_REQUEST_BACKOFF);
        let stream_policy = policy.clone().without_timeout();
        Ok(Self {
            provider: HttpProvider::new("ConsensusClient", hosts, policy, metrics)?,
            head_policy,
            stream_policy,
        })
    }

    /// `GET /eth/v1/beacon/genesis`
    pub async fn get_genesis(&self) -> Result<Genesis, ProviderError> {
        let response: DataResponse<Genesis> =
            self.provider.get_json(API_GET_GENESIS, API_GET_GENESIS, RequestOptions::default()).await?;
        Ok(response.data)
    }

    /// `GET /eth/v1/beacon/headers/{block_id}`
    ///
    /// `force_use_fallback` may reject a header (e.g. a stale head) so the next host is asked.
    pub async fn get_block_header(
        &self,
        block_id: &BlockId,
        force_use_fallback: Option<ForceUseFallback<'_, BlockHeaderResponse>>,
    ) -> Result<BlockHeaderResponse, ProviderError> {
        let path = format!("eth/v1/beacon/headers/{block_id}");
        let hosts = self.provider.hosts().len();
        let raise_missed_slot = move |errors: &[ProviderError]| missed_slot_error(errors, hosts);
        let rejects = move |response: &DataResponse<BlockHeaderResponse>| {
            force_use_fallback.is_some_and(|rejects| rejects(&response.data))
        };
        let options = RequestOptions {
            policy: Some(&self.head_policy),
            force_raise: Some(&raise_missed_slot),
            force_use_fallback: Some(&rejects),
            ..Default::default()
        };
        let response = self.provider.get_json(API_GET_BLOCK_HEADER, &path, options).await?;
        Ok(response.data)
    }

    /// `GET /eth/v2/beacon/blocks/{block_id}`
    pub async fn get_block_details(&self, block_id: &BlockId) -> Result<SignedBlock, ProviderError> {
        let path = format!("eth/v2/beacon/blocks/{block_id}");
        let hosts = self.provider.hosts().len();
        let raise_missed_slot = move |errors: &[ProviderError]| missed_slot_error(errors, hosts);
        let options = RequestOptions {
            policy: Some(&self.head_policy),
            force_raise: Some(&raise_missed_slot),
            ..Default::default()
        };
        let response: DataResponse<SignedBlock> =
            self.provider.get_json(API_GET_BLOCK_DETAILS, &path, options).await?;
        Ok(response.data)
    }

    /// `GET /eth/v1/beacon/states/{state_id}/validators`
    ///
    /// The body is decoded as it arrives on a blocking thread and only index and
    /// pubkey are kept per entry.
    pub async fn get_validators(
        &self,
        state_id: &BlockId,
    ) -> Result<Vec<ValidatorEntry>, ProviderError> {
        let path = format!("eth/v1/beacon/states/{state_id}/validators");
        let response =
            self.provider.get_stream(API_GET_VALIDATORS, &path, &[], None, None).await?;
        let chunks = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let reader = SyncIoBridge::new(StreamReader::new(chunks));

        let endpoint = path.clone();
        tokio::task::spawn_blocking(move || decode_validators(reader, endpoint))
            .await
            .map_err(|source| ProviderError::Task { endpoint: path, source })?
    }

    /// Subscribe to `chain_reorg` events. The stream never times out.
    pub async fn chain_reorg_events(
        &self,
    ) -> Result<impl Stream<Item = Result<ChainReorgEvent, ProviderError>> + use<>, ProviderError>
    {
        let response = self
            .provider
            .get_stream(
                API_GET_EVENTS,
                API_GET_EVENTS,
                &[("topics", "chain_reorg")],
                Some(&self.stream_policy),
                None,
            )
            .await?;

        Ok(decode_events(response.bytes_stream()).filter_map(|event| async move {
            match event {
                Ok(event) if event.event == "chain_reorg" => Some(
                    serde_json::from_str(&event.data).map_err(|source| ProviderError::Decode {
                        endpoint: API_GET_EVENTS.to_owned(),
                        source,
                    }),
                ),
                Ok(event) => {
                    debug!(event = %event.event, "Skipping unexpected event");
                    None
                }
                Err(source) => {
                    Some(Err(ProviderError::Transport { endpoint: API_GET_EVENTS.to_owned(), source }))
                }
            }
        }))
    }
}

/// Decode a validators response from `reader` without holding the raw body.
fn decode_validators(reader: impl Read, endpoint: String) -> Result<Vec<ValidatorEntry>, ProviderError> {
    let response: DataResponse<Vec<ValidatorEntry>> =
        serde_json::from_reader(BufReader::new(reader))
            .map_err(|source| ProviderError::Decode { endpoint, source })?;
    Ok(response.data)
}

/// A 404 is only conclusive once every host has answered. It then wins over
/// connection or timeout errors of other hosts: the slot was missed.
fn missed_slot_error(errors: &[ProviderError], hosts: usize) -> Option<usize> {
    if errors.len() != hosts {
        return None;
    }
    errors.iter().position(ProviderError::is_not_found)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use mockito::Server;

    use super::*;

    const HEADER: &str = r#"{
        "execution_optimistic": false,
        "finalized": false,
        "data": {
            "root": "0xroot100",
            "canonical": true,
            "header": {
                "message": {
                    "slot": "100",
                    "proposer_index": "7",
                    "parent_root": "0xroot99",
                    "state_root": "0xstate",
                    "body_root": "0xbody"
                },
                "signature": "0x00"
            }
        }
    }"#;

    fn client(servers: &[&Server]) -> ConsensusClient {
        let hosts = servers.iter().map(|s| Url::parse(&s.url()).unwrap()).collect();
        let policy = RequestPolicy::new(Duration::from_secs(5), 0, Duration::ZERO);
        ConsensusClient::new(hosts, policy, None).unwrap()
    }

    #[tokio::test]
    async fn get_genesis() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/eth/v1/beacon/genesis")
            .with_body(r#"{"data": {"genesis_time": "1606824023", "genesis_validators_root": "0x4b", "genesis_fork_version": "0x00"}}"#)
            .create_async()
            .await;

        let genesis = client(&[&server]).get_genesis().await.unwrap();
        assert_eq!(genesis.genesis_time, 1_606_824_023);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_header_by_slot() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/eth/v1/beacon/headers/100").with_body(HEADER).create_async().await;

        let header = client(&[&server]).get_block_header(&BlockId::Slot(100), None).await.unwrap();
        assert_eq!(header.slot(), 100);
        assert_eq!(header.root, "0xroot100");
        assert_eq!(header.header.message.parent_root, "0xroot99");
    }

    #[tokio::test]
    async fn missed_slot_is_reported_after_all_hosts() {
        let mut first = Server::new_async().await;
        let mut second = Server::new_async().await;
        let first_mock =
            first.mock("GET", "/eth/v1/beacon/headers/101").with_status(404).expect(1).create_async().await;
        let second_mock =
            second.mock("GET", "/eth/v1/beacon/headers/101").with_status(500).expect_at_least(1).create_async().await;

        let err = client(&[&first, &second])
            .get_block_header(&BlockId::Slot(101), None)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        first_mock.assert_async().await;
        second_mock.assert_async().await;
    }

    #[tokio::test]
    async fn stale_head_falls_back() {
        let mut first = Server::new_async().await;
        let mut second = Server::new_async().await;
        first.mock("GET", "/eth/v1/beacon/headers/head").with_body(HEADER).create_async().await;
        second
            .mock("GET", "/eth/v1/beacon/headers/head")
            .with_body(HEADER.replace("\"100\"", "\"105\""))
            .create_async()
            .await;

        let stale = |header: &BlockHeaderResponse| header.slot() < 105;
        let header = client(&[&first, &second])
            .get_block_header(&BlockId::Head, Some(&stale))
            .await
            .unwrap();
        assert_eq!(header.slot(), 105);
    }

    #[tokio::test]
    async fn get_validators_keeps_index_and_pubkey() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/eth/v1/beacon/states/head/validators")
            .with_body(r#"{"data": [
                {"index": "0", "balance": "32000000000", "status": "active_ongoing", "validator": {"pubkey": "0xaa", "slashed": false}},
                {"index": "1", "balance": "32000000000", "status": "active_ongoing", "validator": {"pubkey": "0xbb", "slashed": false}}
            ]}"#)
            .create_async()
            .await;

        let validators = client(&[&server]).get_validators(&BlockId::Head).await.unwrap();
        assert_eq!(validators.len(), 2);
        assert_eq!(validators[1].index, 1);
        assert_eq!(validators[1].validator.pubkey, "0xbb");
    }

    #[tokio::test]
    async fn get_validators_decodes_chunked_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/eth/v1/beacon/states/head/validators")
            .with_chunked_body(|w| {
                w.write_all(br#"{"data": [{"index": "0", "validator": {"pub"#)?;
                w.write_all(br#"key": "0xaa"}}, {"index": "1"#)?;
                w.write_all(br#"7", "validator": {"pubkey": "0xbb"}}]}"#)
            })
            .create_async()
            .await;

        let validators = client(&[&server]).get_validators(&BlockId::Head).await.unwrap();
        assert_eq!(validators.len(), 2);
        assert_eq!(validators[0].validator.pubkey, "0xaa");
        assert_eq!(validators[1].index, 17);
    }

    #[tokio::test]
    async fn get_validators_rejects_truncated_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/eth/v1/beacon/states/head/validators")
            .with_body(r#"{"data": [{"index": "0", "validator": {"pubkey": "0xaa"}}, {"ind"#)
            .create_async()
            .await;

        let err = client(&[&server]).get_validators(&BlockId::Head).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode { .. }));
    }

    #[test]
    fn decode_validators_reads_incrementally() {
        let body = r#"{"execution_optimistic": false, "data": [{"index": "3", "balance": "1", "validator": {"pubkey": "0xcc", "slashed": false}}]}"#;
        let reader = io::Read::chain(&body.as_bytes()[..20], &body.as_bytes()[20..]);
        let validators = decode_validators(reader, "validators".to_owned()).unwrap();
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0].index, 3);
    }

    #[tokio::test]
    async fn chain_reorg_stream() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/eth/v1/events")
            .match_query(mockito::Matcher::UrlEncoded("topics".into(), "chain_reorg".into()))
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "event: chain_reorg\n",
                "data: {\"slot\":\"200\",\"depth\":\"2\",\"old_head_block\":\"0xaa\",\"new_head_block\":\"0xbb\"}\n\n",
                "event: head\n",
                "data: {}\n\n",
            ))
            .create_async()
            .await;

        let events: Vec<_> = client(&[&server]).chain_reorg_events().await.unwrap().collect().await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.slot, 200);
        assert_eq!(event.depth, 2);
        assert_eq!(event.new_head_block, "0xbb");
    }

    #[test]
    fn missed_slot_needs_every_host() {
        let not_found = || ProviderError::NotOk { endpoint: "x".to_owned(), status: 404, text: String::new() };
        let failed = || ProviderError::NotOk { endpoint: "x".to_owned(), status: 500, text: String::new() };
        assert_eq!(missed_slot_error(&[not_found()], 2), None);
        assert_eq!(missed_slot_error(&[failed(), not_found()], 2), Some(1));
        assert_eq!(missed_slot_error(&[failed(), failed()], 2), None);
    }
}
