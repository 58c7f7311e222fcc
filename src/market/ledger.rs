//! Ledger access - the market contract's fixed read/write surface
//!
//! The controller only talks to the ledger through the [`Ledger`] trait;
//! [`EthLedger`] implements it over JSON-RPC with `ethers`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256, U64};
use std::sync::Arc;

use crate::config::LedgerCredentials;
use crate::types::{decode_symbol, encode_symbol, Direction, MarketRecord, NewMarket};

abigen!(
    ArenaContract,
    r#"[
        function createMarket(string question, bytes32 asset, uint256 strike, bool above, uint64 resolveTime) returns (uint256 marketId)
        function resolveMarketAndSettle(uint256 marketId, bool outcome)
        function getMarket(uint256 marketId) view returns (string question, bytes32 asset, uint256 strike, bool above, uint64 resolveTime, bool resolved, bool outcome)
        function nextMarketId() view returns (uint256)
    ]"#
);

type ArenaClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Read/write surface of the market ledger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Monotonic id counter; the newest market is `counter - 1`
    async fn next_market_id(&self) -> Result<u64>;

    async fn get_market(&self, id: u64) -> Result<MarketRecord>;

    /// Submit an open-market call and return the id the ledger assigned
    async fn open_market(&self, market: NewMarket) -> Result<u64>;

    async fn resolve_market(&self, id: u64, outcome: bool) -> Result<()>;
}

fn u256_to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        bail!("{} {} does not fit in u64", what, value);
    }
    Ok(value.as_u64())
}

/// Contract-backed ledger
pub struct EthLedger {
    contract: ArenaContract<ArenaClient>,
    address: Address,
    chain_id: u64,
}

impl EthLedger {
    /// Build a signing client for the market contract.
    ///
    /// When `chain_id` is not configured it is read from the RPC endpoint.
    pub async fn connect(credentials: &LedgerCredentials, chain_id: Option<u64>) -> Result<Self> {
        let provider = Provider::<Http>::try_from(credentials.rpc_url.as_str())
            .with_context(|| format!("Invalid RPC_URL '{}'", credentials.rpc_url))?;

        let chain_id = match chain_id {
            Some(id) => id,
            None => provider
                .get_chainid()
                .await
                .context("Failed to read chain id from RPC")?
                .as_u64(),
        };

        let wallet: LocalWallet = credentials
            .private_key()
            .parse()
            .context("Invalid PRIVATE_KEY")?;
        let signer = wallet.with_chain_id(chain_id);
        let operator = signer.address();
        let client = Arc::new(SignerMiddleware::new(provider, signer));

        tracing::info!(
            contract = %format!("{:#x}", credentials.contract_address),
            operator = %format!("{:#x}", operator),
            chain_id = chain_id,
            "Ledger client ready"
        );

        Ok(Self {
            contract: ArenaContract::new(credentials.contract_address, client),
            address: credentials.contract_address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl Ledger for EthLedger {
    async fn next_market_id(&self) -> Result<u64> {
        let next = self
            .contract
            .next_market_id()
            .call()
            .await
            .context("nextMarketId call failed")?;
        u256_to_u64(next, "nextMarketId")
    }

    async fn get_market(&self, id: u64) -> Result<MarketRecord> {
        let (question, asset, strike, above, resolve_time, resolved, outcome) = self
            .contract
            .get_market(U256::from(id))
            .call()
            .await
            .with_context(|| format!("getMarket({}) call failed", id))?;

        Ok(MarketRecord {
            id,
            question,
            asset: decode_symbol(&asset),
            strike: u256_to_u64(strike, "strike")?,
            direction: Direction::from_above(above),
            resolve_time,
            resolved,
            outcome,
        })
    }

    async fn open_market(&self, market: NewMarket) -> Result<u64> {
        let call = self.contract.create_market(
            market.question.clone(),
            encode_symbol(&market.asset)?,
            U256::from(market.strike),
            market.direction.is_above(),
            market.resolve_time,
        );

        // The simulated call returns the id this transaction will be assigned.
        let assigned = call
            .call()
            .await
            .context("createMarket would revert")?;

        let pending = call
            .send()
            .await
            .context("Failed to submit createMarket transaction")?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .context("createMarket transaction failed while pending")?
            .context("createMarket transaction dropped before confirmation")?;

        if receipt.status != Some(U64::from(1)) {
            bail!("createMarket transaction {:#x} reverted", tx_hash);
        }

        tracing::debug!(
            tx_hash = %format!("{:#x}", tx_hash),
            block = ?receipt.block_number,
            "createMarket confirmed"
        );

        u256_to_u64(assigned, "marketId")
    }

    async fn resolve_market(&self, id: u64, outcome: bool) -> Result<()> {
        let call = self
            .contract
            .resolve_market_and_settle(U256::from(id), outcome);

        call.call()
            .await
            .with_context(|| format!("resolveMarketAndSettle({}) would revert", id))?;

        let pending = call
            .send()
            .await
            .context("Failed to submit resolveMarketAndSettle transaction")?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .context("resolveMarketAndSettle transaction failed while pending")?
            .context("resolveMarketAndSettle transaction dropped before confirmation")?;

        if receipt.status != Some(U64::from(1)) {
            bail!("resolveMarketAndSettle transaction {:#x} reverted", tx_hash);
        }

        tracing::debug!(
            tx_hash = %format!("{:#x}", tx_hash),
            block = ?receipt.block_number,
            "resolveMarketAndSettle confirmed"
        );

        Ok(())
    }
}
