use std::collections::HashMap;

use alloy_primitives::{Address, B256};
use serde::Deserialize;

use crate::types::filter::{
    AddressSpec, BlockFilter, CallTraceFilter, ChildAddressLocation, Factory, Filter, LogFilter,
    TopicSlot, TopicSlotRaw,
};

pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 10_000;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AddressOrAddresses {
    Single(Address),
    Multiple(Vec<Address>),
}

#[derive(Debug, Deserialize)]
pub struct FactoryConfig {
    pub address: Address,
    pub event_selector: B256,
    /// `"topic1" | "topic2" | "topic3" | "offset<N>"`.
    pub child_address_location: String,
}

impl FactoryConfig {
    pub fn resolve(&self, chain_id: u64) -> anyhow::Result<Factory> {
        let location = ChildAddressLocation::parse(&self.child_address_location)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid child_address_location '{}'",
                    self.child_address_location
                )
            })?;
        Ok(Factory {
            chain_id,
            address: self.address,
            event_selector: self.event_selector,
            child_address_location: location,
        })
    }
}

/// Per-contract trace collection settings.
#[derive(Debug, Deserialize)]
pub struct TraceConfig {
    pub function_selectors: Vec<String>,
    pub from_address: Option<Vec<Address>>,
}

#[derive(Debug, Deserialize)]
pub struct ContractConfig {
    /// Networks this contract is indexed on, by config name.
    pub networks: Vec<String>,
    pub address: Option<AddressOrAddresses>,
    pub factory: Option<FactoryConfig>,
    #[serde(default)]
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub max_block_range: Option<u64>,
    /// topic0 values of the events to index; empty means all events.
    #[serde(default)]
    pub events: Vec<B256>,
    pub topic1: Option<TopicSlotRaw>,
    pub topic2: Option<TopicSlotRaw>,
    pub topic3: Option<TopicSlotRaw>,
    #[serde(default)]
    pub include_receipts: bool,
    pub trace: Option<TraceConfig>,
}

pub type Contracts = HashMap<String, ContractConfig>;

/// Block-marker sources: `(n - offset) % interval == 0`.
#[derive(Debug, Deserialize)]
pub struct BlockSourceConfig {
    pub networks: Vec<String>,
    pub interval: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub start_block: u64,
    pub end_block: Option<u64>,
}

pub type BlockSources = HashMap<String, BlockSourceConfig>;

/// A named unit of sync work: one filter, one network.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub filter: Filter,
    pub max_block_range: u64,
}

impl ContractConfig {
    fn address_spec(&self, chain_id: u64) -> anyhow::Result<AddressSpec> {
        match (&self.address, &self.factory) {
            (Some(_), Some(_)) => {
                anyhow::bail!("contract declares both 'address' and 'factory'")
            }
            (Some(AddressOrAddresses::Single(addr)), None) => Ok(AddressSpec::Single(*addr)),
            (Some(AddressOrAddresses::Multiple(addrs)), None) => {
                Ok(AddressSpec::List(addrs.clone()))
            }
            (None, Some(factory)) => Ok(AddressSpec::Factory(factory.resolve(chain_id)?)),
            (None, None) => Ok(AddressSpec::Any),
        }
    }

    /// Lower this contract into filters for one network.
    pub fn to_sources(&self, name: &str, chain_id: u64) -> anyhow::Result<Vec<Source>> {
        let address = self.address_spec(chain_id)?;
        let max_block_range = self.max_block_range.unwrap_or(DEFAULT_MAX_BLOCK_RANGE);

        let topic0 = if self.events.is_empty() {
            TopicSlot::Any
        } else {
            TopicSlot::OneOf(self.events.clone())
        };

        let mut sources = vec![Source {
            name: name.to_string(),
            filter: Filter::Log(
                LogFilter {
                    chain_id,
                    from_block: self.start_block,
                    to_block: self.end_block,
                    address: address.clone(),
                    topics: [
                        topic0,
                        self.topic1.clone().into(),
                        self.topic2.clone().into(),
                        self.topic3.clone().into(),
                    ],
                    include_receipts: self.include_receipts,
                }
                .normalized(),
            ),
            max_block_range,
        }];

        if let Some(trace) = &self.trace {
            let function_selectors = trace
                .function_selectors
                .iter()
                .map(|raw| parse_selector(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;

            sources.push(Source {
                name: format!("{name}.trace"),
                filter: Filter::CallTrace(CallTraceFilter {
                    chain_id,
                    from_block: self.start_block,
                    to_block: self.end_block,
                    from_address: trace.from_address.clone(),
                    to_address: address,
                    function_selectors,
                }),
                max_block_range,
            });
        }

        Ok(sources)
    }
}

impl BlockSourceConfig {
    pub fn to_source(&self, name: &str, chain_id: u64) -> Source {
        Source {
            name: name.to_string(),
            filter: Filter::Block(BlockFilter {
                chain_id,
                from_block: self.start_block,
                to_block: self.end_block,
                interval: self.interval,
                offset: self.offset,
            }),
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
        }
    }
}

fn parse_selector(raw: &str) -> anyhow::Result<[u8; 4]> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))?;
    let selector: [u8; 4] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("function selector '{raw}' is not 4 bytes"))?;
    Ok(selector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_with_events_builds_normalized_log_filter() {
        let config = ContractConfig {
            networks: vec!["mainnet".into()],
            address: Some(AddressOrAddresses::Single(Address::repeat_byte(1))),
            factory: None,
            start_block: 100,
            end_block: None,
            max_block_range: None,
            events: vec![B256::repeat_byte(0xaa)],
            topic1: None,
            topic2: None,
            topic3: None,
            include_receipts: false,
            trace: None,
        };

        let sources = config.to_sources("pool", 1).unwrap();
        assert_eq!(sources.len(), 1);
        let Filter::Log(filter) = &sources[0].filter else {
            panic!("expected log filter");
        };
        // One-element event list collapses to a scalar topic0.
        assert_eq!(filter.topics[0], TopicSlot::One(B256::repeat_byte(0xaa)));
        assert_eq!(sources[0].max_block_range, DEFAULT_MAX_BLOCK_RANGE);
    }

    #[test]
    fn address_and_factory_are_mutually_exclusive() {
        let config = ContractConfig {
            networks: vec!["mainnet".into()],
            address: Some(AddressOrAddresses::Single(Address::repeat_byte(1))),
            factory: Some(FactoryConfig {
                address: Address::repeat_byte(2),
                event_selector: B256::repeat_byte(0xab),
                child_address_location: "topic1".into(),
            }),
            start_block: 0,
            end_block: None,
            max_block_range: None,
            events: vec![],
            topic1: None,
            topic2: None,
            topic3: None,
            include_receipts: false,
            trace: None,
        };
        assert!(config.to_sources("bad", 1).is_err());
    }

    #[test]
    fn trace_config_adds_call_trace_source() {
        let config = ContractConfig {
            networks: vec!["mainnet".into()],
            address: Some(AddressOrAddresses::Single(Address::repeat_byte(1))),
            factory: None,
            start_block: 0,
            end_block: None,
            max_block_range: Some(500),
            events: vec![],
            topic1: None,
            topic2: None,
            topic3: None,
            include_receipts: false,
            trace: Some(TraceConfig {
                function_selectors: vec!["0xa9059cbb".into()],
                from_address: None,
            }),
        };

        let sources = config.to_sources("router", 10).unwrap();
        assert_eq!(sources.len(), 2);
        let Filter::CallTrace(trace) = &sources[1].filter else {
            panic!("expected trace filter");
        };
        assert_eq!(trace.function_selectors, vec![[0xa9, 0x05, 0x9c, 0xbb]]);
    }
}
