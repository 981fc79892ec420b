use alloy::primitives::{Address, B256};
use serde::Deserialize;

/// Where a factory event encodes the child contract address.
///
/// Either one of the indexed topics or a 32-byte word at a fixed byte offset
/// into the log's `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildAddressLocation {
    Topic1,
    Topic2,
    Topic3,
    DataOffset(usize),
}

impl ChildAddressLocation {
    /// Parse the config form: `"topic1" | "topic2" | "topic3" | "offset<N>"`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "topic1" => Some(Self::Topic1),
            "topic2" => Some(Self::Topic2),
            "topic3" => Some(Self::Topic3),
            _ => raw
                .strip_prefix("offset")
                .and_then(|n| n.parse::<usize>().ok())
                .map(Self::DataOffset),
        }
    }

    /// Extract the child address from a log's topics/data, if present.
    pub fn extract(&self, topics: &[B256], data: &[u8]) -> Option<Address> {
        match self {
            Self::Topic1 => topic_address(topics, 1),
            Self::Topic2 => topic_address(topics, 2),
            Self::Topic3 => topic_address(topics, 3),
            Self::DataOffset(offset) => {
                let word = data.get(*offset..*offset + 32)?;
                Some(Address::from_slice(&word[12..32]))
            }
        }
    }

    /// Canonical string form, the inverse of `parse`.
    pub fn id_part(&self) -> String {
        match self {
            Self::Topic1 => "topic1".into(),
            Self::Topic2 => "topic2".into(),
            Self::Topic3 => "topic3".into(),
            Self::DataOffset(offset) => format!("offset{offset}"),
        }
    }
}

fn topic_address(topics: &[B256], index: usize) -> Option<Address> {
    topics.get(index).map(|t| Address::from_slice(&t[12..32]))
}

/// An address set defined by the emissions of a prior log: every log from
/// `address` with `topic0 == event_selector` registers one child address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Factory {
    pub chain_id: u64,
    pub address: Address,
    pub event_selector: B256,
    pub child_address_location: ChildAddressLocation,
}

impl Factory {
    pub fn id(&self) -> String {
        format!(
            "factory_{}_{}_{}_{}",
            self.chain_id,
            hex::encode(self.address),
            hex::encode(self.event_selector),
            self.child_address_location.id_part()
        )
    }

    /// Decode the child address from a matching log.
    pub fn child_address(&self, topics: &[B256], data: &[u8]) -> Option<Address> {
        self.child_address_location.extract(topics, data)
    }
}

/// The address selector of a log or trace filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    /// Match any address.
    Any,
    Single(Address),
    List(Vec<Address>),
    Factory(Factory),
}

impl AddressSpec {
    pub fn is_factory(&self) -> bool {
        matches!(self, Self::Factory(_))
    }

    /// Enumerated addresses, if statically known. `None` for `Any` and
    /// `Factory` (factories resolve at sync time).
    pub fn static_addresses(&self) -> Option<Vec<Address>> {
        match self {
            Self::Single(addr) => Some(vec![*addr]),
            Self::List(addrs) => Some(addrs.clone()),
            Self::Any | Self::Factory(_) => None,
        }
    }

    pub fn matches(&self, address: &Address, factory_children: Option<&[Address]>) -> bool {
        match self {
            Self::Any => true,
            Self::Single(a) => a == address,
            Self::List(addrs) => addrs.contains(address),
            Self::Factory(_) => factory_children
                .map(|children| children.contains(address))
                .unwrap_or(false),
        }
    }
}

/// One of the four indexed-topic positions of a log filter.
///
/// A single-element list is equivalent to the scalar form at every layer:
/// `[x]` collapses to `x` during normalization, so fragment ids, SQL
/// predicates, and in-memory matching never observe the one-element list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSlot {
    Any,
    One(B256),
    OneOf(Vec<B256>),
}

impl TopicSlot {
    pub fn normalize(self) -> Self {
        match self {
            Self::OneOf(values) if values.is_empty() => Self::Any,
            Self::OneOf(values) if values.len() == 1 => Self::One(values[0]),
            other => other,
        }
    }

    pub fn matches(&self, topic: Option<&B256>) -> bool {
        match self {
            Self::Any => true,
            Self::One(value) => topic == Some(value),
            Self::OneOf(values) => topic.map(|t| values.contains(t)).unwrap_or(false),
        }
    }

    /// The concrete values this slot can take, one fragment per value.
    fn fragment_values(&self) -> Vec<Option<B256>> {
        match self {
            Self::Any => vec![None],
            Self::One(value) => vec![Some(*value)],
            Self::OneOf(values) => values.iter().copied().map(Some).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub address: AddressSpec,
    pub topics: [TopicSlot; 4],
    pub include_receipts: bool,
}

impl LogFilter {
    /// Normalize all four topic slots; call once at construction.
    pub fn normalized(mut self) -> Self {
        self.topics = self.topics.map(TopicSlot::normalize);
        self
    }

    pub fn matches(
        &self,
        address: &Address,
        topics: &[B256],
        factory_children: Option<&[Address]>,
    ) -> bool {
        self.address.matches(address, factory_children)
            && self
                .topics
                .iter()
                .enumerate()
                .all(|(i, slot)| slot.matches(topics.get(i)))
    }
}

/// Selects blocks where `(number - offset) % interval == 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFilter {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub interval: u64,
    pub offset: u64,
}

impl BlockFilter {
    pub fn matches(&self, block_number: u64) -> bool {
        block_number >= self.offset && (block_number - self.offset) % self.interval == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTraceFilter {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub from_address: Option<Vec<Address>>,
    pub to_address: AddressSpec,
    pub function_selectors: Vec<[u8; 4]>,
}

impl CallTraceFilter {
    pub fn matches(
        &self,
        from: &Address,
        to: &Address,
        input: &[u8],
        factory_children: Option<&[Address]>,
    ) -> bool {
        if let Some(froms) = &self.from_address {
            if !froms.contains(from) {
                return false;
            }
        }
        if !self.to_address.matches(to, factory_children) {
            return false;
        }
        if self.function_selectors.is_empty() {
            return true;
        }
        input.len() >= 4 && self.function_selectors.iter().any(|s| &input[..4] == s)
    }
}

/// A user-declared description of what to sync on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Log(LogFilter),
    Block(BlockFilter),
    CallTrace(CallTraceFilter),
}

impl Filter {
    pub fn chain_id(&self) -> u64 {
        match self {
            Filter::Log(f) => f.chain_id,
            Filter::Block(f) => f.chain_id,
            Filter::CallTrace(f) => f.chain_id,
        }
    }

    pub fn from_block(&self) -> u64 {
        match self {
            Filter::Log(f) => f.from_block,
            Filter::Block(f) => f.from_block,
            Filter::CallTrace(f) => f.from_block,
        }
    }

    pub fn to_block(&self) -> Option<u64> {
        match self {
            Filter::Log(f) => f.to_block,
            Filter::Block(f) => f.to_block,
            Filter::CallTrace(f) => f.to_block,
        }
    }

    /// The factory backing this filter's address set, if any.
    pub fn factory(&self) -> Option<&Factory> {
        match self {
            Filter::Log(f) => match &f.address {
                AddressSpec::Factory(factory) => Some(factory),
                _ => None,
            },
            Filter::CallTrace(f) => match &f.to_address {
                AddressSpec::Factory(factory) => Some(factory),
                _ => None,
            },
            Filter::Block(_) => None,
        }
    }

    /// Decompose into storage fragments. The union of the fragments equals
    /// the filter: one fragment per enumerated address per topic-slot value.
    pub fn fragments(&self) -> Vec<FilterFragment> {
        match self {
            Filter::Log(f) => log_fragments(f),
            Filter::Block(f) => vec![FilterFragment::Block(BlockFragment {
                chain_id: f.chain_id,
                interval: f.interval,
                offset: f.offset,
            })],
            Filter::CallTrace(f) => trace_fragments(f),
        }
    }
}

fn log_fragments(filter: &LogFilter) -> Vec<FilterFragment> {
    let topic_axes: Vec<Vec<Option<B256>>> =
        filter.topics.iter().map(TopicSlot::fragment_values).collect();

    let mut topic_combos: Vec<[Option<B256>; 4]> = vec![[None; 4]];
    for (slot, values) in topic_axes.iter().enumerate() {
        let mut next = Vec::with_capacity(topic_combos.len() * values.len());
        for combo in &topic_combos {
            for value in values {
                let mut combo = *combo;
                combo[slot] = *value;
                next.push(combo);
            }
        }
        topic_combos = next;
    }

    match &filter.address {
        AddressSpec::Factory(factory) => topic_combos
            .into_iter()
            .map(|topics| {
                FilterFragment::FactoryLog(FactoryLogFragment {
                    chain_id: filter.chain_id,
                    factory: factory.clone(),
                    topics,
                    include_receipts: filter.include_receipts,
                })
            })
            .collect(),
        spec => {
            let addresses: Vec<Option<Address>> = match spec.static_addresses() {
                Some(addrs) => addrs.into_iter().map(Some).collect(),
                None => vec![None],
            };
            let mut fragments = Vec::with_capacity(addresses.len() * topic_combos.len());
            for address in &addresses {
                for topics in &topic_combos {
                    fragments.push(FilterFragment::Log(LogFragment {
                        chain_id: filter.chain_id,
                        address: *address,
                        topics: *topics,
                        include_receipts: filter.include_receipts,
                    }));
                }
            }
            fragments
        }
    }
}

fn trace_fragments(filter: &CallTraceFilter) -> Vec<FilterFragment> {
    let from_addresses: Vec<Option<Address>> = match &filter.from_address {
        Some(addrs) => addrs.iter().copied().map(Some).collect(),
        None => vec![None],
    };

    match &filter.to_address {
        AddressSpec::Factory(factory) => from_addresses
            .into_iter()
            .map(|from| {
                FilterFragment::FactoryTrace(FactoryTraceFragment {
                    chain_id: filter.chain_id,
                    factory: factory.clone(),
                    from_address: from,
                })
            })
            .collect(),
        spec => {
            let to_addresses: Vec<Option<Address>> = match spec.static_addresses() {
                Some(addrs) => addrs.into_iter().map(Some).collect(),
                None => vec![None],
            };
            let mut fragments = Vec::with_capacity(from_addresses.len() * to_addresses.len());
            for from in &from_addresses {
                for to in &to_addresses {
                    fragments.push(FilterFragment::Trace(TraceFragment {
                        chain_id: filter.chain_id,
                        from_address: *from,
                        to_address: *to,
                    }));
                }
            }
            fragments
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFragment {
    pub chain_id: u64,
    pub address: Option<Address>,
    pub topics: [Option<B256>; 4],
    pub include_receipts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryLogFragment {
    pub chain_id: u64,
    pub factory: Factory,
    pub topics: [Option<B256>; 4],
    pub include_receipts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFragment {
    pub chain_id: u64,
    pub interval: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFragment {
    pub chain_id: u64,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryTraceFragment {
    pub chain_id: u64,
    pub factory: Factory,
    pub from_address: Option<Address>,
}

/// A canonical storage-level subdivision of a filter. Fragment ids are
/// deterministic: the same filter always produces the same ids, so interval
/// coverage accumulates across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterFragment {
    Log(LogFragment),
    FactoryLog(FactoryLogFragment),
    Block(BlockFragment),
    Trace(TraceFragment),
    FactoryTrace(FactoryTraceFragment),
}

fn opt_hex<T: AsRef<[u8]>>(value: &Option<T>) -> String {
    match value {
        Some(v) => hex::encode(v),
        None => "null".into(),
    }
}

impl FilterFragment {
    pub fn id(&self) -> String {
        match self {
            Self::Log(f) => format!(
                "log_{}_{}_{}_{}_{}_{}_{}",
                f.chain_id,
                opt_hex(&f.address),
                opt_hex(&f.topics[0]),
                opt_hex(&f.topics[1]),
                opt_hex(&f.topics[2]),
                opt_hex(&f.topics[3]),
                f.include_receipts as u8,
            ),
            Self::FactoryLog(f) => format!(
                "flog_{}_{}_{}_{}_{}_{}_{}",
                f.chain_id,
                f.factory.id(),
                opt_hex(&f.topics[0]),
                opt_hex(&f.topics[1]),
                opt_hex(&f.topics[2]),
                opt_hex(&f.topics[3]),
                f.include_receipts as u8,
            ),
            Self::Block(f) => format!("block_{}_{}_{}", f.chain_id, f.interval, f.offset),
            Self::Trace(f) => format!(
                "trace_{}_{}_{}",
                f.chain_id,
                opt_hex(&f.from_address),
                opt_hex(&f.to_address),
            ),
            Self::FactoryTrace(f) => format!(
                "ftrace_{}_{}_{}",
                f.chain_id,
                f.factory.id(),
                opt_hex(&f.from_address),
            ),
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Log(f) => f.chain_id,
            Self::FactoryLog(f) => f.chain_id,
            Self::Block(f) => f.chain_id,
            Self::Trace(f) => f.chain_id,
            Self::FactoryTrace(f) => f.chain_id,
        }
    }
}

/// Config form of a topic slot, accepting scalar or list hex values.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TopicSlotRaw {
    One(B256),
    Many(Vec<B256>),
}

impl From<Option<TopicSlotRaw>> for TopicSlot {
    fn from(raw: Option<TopicSlotRaw>) -> Self {
        match raw {
            None => TopicSlot::Any,
            Some(TopicSlotRaw::One(value)) => TopicSlot::One(value),
            Some(TopicSlotRaw::Many(values)) => TopicSlot::OneOf(values).normalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn topic(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    fn log_filter(address: AddressSpec, topics: [TopicSlot; 4]) -> LogFilter {
        LogFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            address,
            topics,
            include_receipts: false,
        }
        .normalized()
    }

    #[test]
    fn single_element_topic_list_collapses() {
        let filter = log_filter(
            AddressSpec::Any,
            [
                TopicSlot::OneOf(vec![topic(0xab)]),
                TopicSlot::Any,
                TopicSlot::Any,
                TopicSlot::Any,
            ],
        );
        assert_eq!(filter.topics[0], TopicSlot::One(topic(0xab)));
    }

    #[test]
    fn topic_array_yields_one_fragment_per_value() {
        let filter = log_filter(
            AddressSpec::Any,
            [
                TopicSlot::OneOf(vec![topic(0xaa), topic(0xbb)]),
                TopicSlot::Any,
                TopicSlot::Any,
                TopicSlot::Any,
            ],
        );
        let fragments = Filter::Log(filter).fragments();
        assert_eq!(fragments.len(), 2);

        let ids: Vec<String> = fragments.iter().map(FilterFragment::id).collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn address_list_and_topics_multiply() {
        let filter = log_filter(
            AddressSpec::List(vec![addr(1), addr(2)]),
            [
                TopicSlot::OneOf(vec![topic(0xaa), topic(0xbb)]),
                TopicSlot::Any,
                TopicSlot::Any,
                TopicSlot::Any,
            ],
        );
        assert_eq!(Filter::Log(filter).fragments().len(), 4);
    }

    #[test]
    fn fragment_ids_are_deterministic() {
        let make = || {
            Filter::Log(log_filter(
                AddressSpec::Single(addr(7)),
                [
                    TopicSlot::One(topic(0x11)),
                    TopicSlot::Any,
                    TopicSlot::Any,
                    TopicSlot::Any,
                ],
            ))
        };
        let a: Vec<String> = make().fragments().iter().map(FilterFragment::id).collect();
        let b: Vec<String> = make().fragments().iter().map(FilterFragment::id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn scalar_and_singleton_list_produce_same_fragment_id() {
        let scalar = log_filter(
            AddressSpec::Any,
            [TopicSlot::One(topic(0xcd)), TopicSlot::Any, TopicSlot::Any, TopicSlot::Any],
        );
        let list = log_filter(
            AddressSpec::Any,
            [
                TopicSlot::OneOf(vec![topic(0xcd)]),
                TopicSlot::Any,
                TopicSlot::Any,
                TopicSlot::Any,
            ],
        );
        assert_eq!(
            Filter::Log(scalar).fragments()[0].id(),
            Filter::Log(list).fragments()[0].id()
        );
    }

    #[test]
    fn block_filter_modulus() {
        let filter = BlockFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            interval: 10,
            offset: 3,
        };
        assert!(filter.matches(3));
        assert!(filter.matches(13));
        assert!(!filter.matches(10));
    }

    #[test]
    fn factory_child_address_from_topic() {
        let factory = Factory {
            chain_id: 1,
            address: addr(0xfa),
            event_selector: topic(0xab),
            child_address_location: ChildAddressLocation::Topic1,
        };
        let mut child_topic = [0u8; 32];
        child_topic[12..].copy_from_slice(addr(0xde).as_slice());
        let topics = vec![topic(0xab), B256::from(child_topic)];
        assert_eq!(factory.child_address(&topics, &[]), Some(addr(0xde)));
    }

    #[test]
    fn factory_child_address_from_data_offset() {
        let factory = Factory {
            chain_id: 1,
            address: addr(0xfa),
            event_selector: topic(0xab),
            child_address_location: ChildAddressLocation::DataOffset(32),
        };
        let mut data = vec![0u8; 64];
        data[44..64].copy_from_slice(addr(0xbe).as_slice());
        assert_eq!(factory.child_address(&[], &data), Some(addr(0xbe)));
        assert_eq!(factory.child_address(&[], &data[..40]), None);
    }

    #[test]
    fn child_address_location_parsing() {
        assert_eq!(ChildAddressLocation::parse("topic2"), Some(ChildAddressLocation::Topic2));
        assert_eq!(
            ChildAddressLocation::parse("offset64"),
            Some(ChildAddressLocation::DataOffset(64))
        );
        assert_eq!(ChildAddressLocation::parse("topic0"), None);
        assert_eq!(ChildAddressLocation::parse("offset"), None);
    }

    #[test]
    fn trace_filter_selector_matching() {
        let filter = CallTraceFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            from_address: None,
            to_address: AddressSpec::Single(addr(9)),
            function_selectors: vec![[0xa9, 0x05, 0x9c, 0xbb]],
        };
        let input = [0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x01];
        assert!(filter.matches(&addr(1), &addr(9), &input, None));
        assert!(!filter.matches(&addr(1), &addr(9), &input[..3], None));
        assert!(!filter.matches(&addr(1), &addr(8), &input, None));
    }
}
