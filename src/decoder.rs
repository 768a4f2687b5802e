use std::collections::HashMap;

use alloy_primitives::U256;
use tracing::warn;

use crate::{
    cache::{Resolution, ResolutionCache},
    config::IngestConfig,
    error::DecodeError,
    felt::Felt,
    models::{NormalizedTransfer, RawEvent},
};

/// Two layouts of the same Transfer event exist on chain. Newer tokens index
/// `from`/`to` as keys; older ones pack everything into data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferLayout {
    Indexed,
    Packed,
}

impl TransferLayout {
    pub fn of(event: &RawEvent) -> Self {
        if event.keys.len() >= 3 {
            TransferLayout::Indexed
        } else {
            TransferLayout::Packed
        }
    }
}

struct TransferFields {
    sender: Felt,
    recipient: Felt,
    low: Felt,
    high: Felt,
}

fn split_fields(event: &RawEvent) -> Result<TransferFields, DecodeError> {
    match TransferLayout::of(event) {
        TransferLayout::Indexed => {
            if event.data.len() < 2 {
                return Err(DecodeError::IndexedTooShort(event.data.len()));
            }
            Ok(TransferFields {
                sender: event.keys[1],
                recipient: event.keys[2],
                low: event.data[0],
                high: event.data[1],
            })
        }
        TransferLayout::Packed => {
            if event.data.len() < 4 {
                return Err(DecodeError::PackedTooShort(event.data.len()));
            }
            Ok(TransferFields {
                sender: event.data[0],
                recipient: event.data[1],
                low: event.data[2],
                high: event.data[3],
            })
        }
    }
}

/// `low + (high << 128)`.
pub fn u256_from_split(low: Felt, high: Felt) -> Result<U256, DecodeError> {
    let high = high.to_u256();
    if high >> 128usize != U256::ZERO {
        return Err(DecodeError::AmountOverflow(format!("{high:#x}")));
    }
    (high << 128usize)
        .checked_add(low.to_u256())
        .ok_or_else(|| DecodeError::AmountOverflow(format!("{high:#x}")))
}

/// Decodes one event against an already populated cache. `now` stands in for
/// the block timestamp when the block could not be resolved.
pub fn decode_transfer(
    event: &RawEvent,
    event_index: u64,
    cache: &ResolutionCache,
    config: &IngestConfig,
    now: u64,
) -> Result<NormalizedTransfer, DecodeError> {
    let selector = event.keys.first().ok_or(DecodeError::NoKeys)?;
    if *selector != config.event_selector {
        return Err(DecodeError::UnexpectedSelector(selector.to_hex()));
    }

    let fields = split_fields(event)?;
    let amount = u256_from_split(fields.low, fields.high)?;

    let block_timestamp = match cache.block(event.block_number) {
        Some(Resolution::Resolved(block)) => block.timestamp,
        Some(Resolution::Unresolved) => {
            warn!(
                block_number = event.block_number,
                fallback = now,
                "resolution miss, using fallback timestamp"
            );
            now
        }
        None => return Err(DecodeError::BlockNotLookedUp(event.block_number)),
    };

    let submitter = match cache.transaction(&event.transaction_hash) {
        Some(Resolution::Resolved(tx)) => tx.sender_address,
        Some(Resolution::Unresolved) => {
            warn!(
                tx_hash = %event.transaction_hash,
                fallback = %config.facilitator_address,
                "resolution miss, using facilitator as submitter"
            );
            config.facilitator_address
        }
        None => return Err(DecodeError::TransactionNotLookedUp(event.transaction_hash.to_hex())),
    };

    Ok(NormalizedTransfer {
        token_address: event.from_address.to_hex(),
        submitter: submitter.to_hex(),
        sender: fields.sender.to_hex(),
        recipient: fields.recipient.to_hex(),
        amount,
        block_number: event.block_number,
        block_timestamp,
        tx_hash: event.transaction_hash.to_hex(),
        chain_id: config.chain_id.clone(),
        provider: config.provider_id.clone(),
        decimals: config.token_decimals,
        facilitator_id: config.facilitator_id.clone(),
        event_index,
    })
}

/// Ordinal of each event among the events sharing its transaction, in batch order.
pub fn event_indices(events: &[RawEvent]) -> Vec<u64> {
    let mut seen: HashMap<Felt, u64> = HashMap::new();
    events
        .iter()
        .map(|event| {
            let next = seen.entry(event.transaction_hash).or_insert(0);
            let index = *next;
            *next += 1;
            index
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub transfers: Vec<NormalizedTransfer>,
    pub failures: usize,
}

/// Decodes a batch. A bad event is logged and skipped, never fatal.
pub fn decode_batch(
    events: &[RawEvent],
    cache: &ResolutionCache,
    config: &IngestConfig,
    now: u64,
) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for (position, (event, event_index)) in events.iter().zip(event_indices(events)).enumerate() {
        match decode_transfer(event, event_index, cache, config, now) {
            Ok(transfer) => batch.transfers.push(transfer),
            Err(e) => {
                batch.failures += 1;
                warn!(
                    position,
                    tx_hash = %event.transaction_hash,
                    block_number = event.block_number,
                    error = %e,
                    "failed to decode transfer event"
                );
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        felt::TRANSFER_SELECTOR,
        retry::{RetryExecutor, RetryProfile},
        scheduler::BoundedScheduler,
        test_utils::{felt, ingest_config, MockTransport},
    };
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_999;

    fn config() -> IngestConfig {
        ingest_config("0xaaa")
    }

    fn event(keys: &[&str], data: &[&str]) -> RawEvent {
        let mut all_keys = vec![*TRANSFER_SELECTOR];
        all_keys.extend(keys.iter().map(|k| felt(k)));
        RawEvent {
            from_address: felt("0x70"),
            keys: all_keys,
            data: data.iter().map(|d| felt(d)).collect(),
            block_number: 5,
            transaction_hash: felt("0x77"),
        }
    }

    async fn cache_with(transport: MockTransport) -> ResolutionCache {
        let transport = Arc::new(transport);
        let retry =
            RetryExecutor::new(RetryProfile { max_attempts: 1, ..RetryProfile::aggressive() });
        let mut cache = ResolutionCache::new();
        cache.resolve_blocks(transport.clone(), retry, BoundedScheduler::new(2), [5]).await;
        let scheduler = BoundedScheduler::new(2);
        cache.resolve_transactions(transport, retry, scheduler, [felt("0x77")]).await;
        cache
    }

    async fn resolved_cache() -> ResolutionCache {
        let transport = MockTransport::new()
            .with_block(5, 1_700_000_000)
            .with_transaction(felt("0x77"), felt("0x5eed"));
        cache_with(transport).await
    }

    #[tokio::test]
    async fn indexed_form_reads_parties_from_keys() {
        let cache = resolved_cache().await;
        // data deliberately holds values that would be wrong parties
        let ev = event(&["0xAAA", "0xBBB"], &["0x64", "0x0", "0xdead", "0xbeef"]);

        let t = decode_transfer(&ev, 0, &cache, &config(), NOW).unwrap();

        assert_eq!(t.sender, "0xaaa");
        assert_eq!(t.recipient, "0xbbb");
        assert_eq!(t.amount, U256::from(100u64));
        assert_eq!(t.block_timestamp, 1_700_000_000);
        assert_eq!(t.submitter, "0x5eed");
        assert_eq!(t.decimals, 18);
        assert_eq!(t.facilitator_id, "facilitator-1");
    }

    #[tokio::test]
    async fn packed_form_reads_parties_from_data() {
        let cache = resolved_cache().await;
        let ev = event(&[], &["0xCCC", "0xDDD", "0xC8", "0x0"]);

        let t = decode_transfer(&ev, 0, &cache, &config(), NOW).unwrap();

        assert_eq!(TransferLayout::of(&ev), TransferLayout::Packed);
        assert_eq!(t.sender, "0xccc");
        assert_eq!(t.recipient, "0xddd");
        assert_eq!(t.amount, U256::from(200u64));
    }

    #[tokio::test]
    async fn short_packed_event_fails() {
        let cache = resolved_cache().await;
        let ev = event(&[], &["0xCCC", "0xDDD", "0xC8"]);

        assert_eq!(
            decode_transfer(&ev, 0, &cache, &config(), NOW),
            Err(DecodeError::PackedTooShort(3))
        );
    }

    #[test]
    fn amount_combines_low_and_high() {
        let max128 = U256::from(u128::MAX);
        let max = Felt::from_u256(max128).unwrap();

        assert_eq!(u256_from_split(Felt::from(100u64), Felt::ZERO).unwrap(), U256::from(100u64));
        let one_high = u256_from_split(Felt::ZERO, Felt::from(1u64)).unwrap();
        assert_eq!(one_high, U256::from(1u64) << 128usize);
        assert_eq!(u256_from_split(max, max).unwrap(), max128 + (max128 << 128usize));
        assert!(matches!(
            u256_from_split(Felt::ZERO, Felt::from_u256(U256::from(1u64) << 128usize).unwrap()),
            Err(DecodeError::AmountOverflow(_))
        ));
    }

    #[tokio::test]
    async fn unresolved_context_uses_fallbacks() {
        let cache = cache_with(MockTransport::new()).await;
        let ev = event(&["0x1", "0x2"], &["0x1", "0x0"]);

        let t = decode_transfer(&ev, 0, &cache, &config(), NOW).unwrap();

        assert_eq!(t.block_timestamp, NOW);
        assert_eq!(t.submitter, "0xaaa");
    }

    #[tokio::test]
    async fn never_looked_up_is_an_error() {
        let cache = ResolutionCache::new();
        let ev = event(&["0x1", "0x2"], &["0x1", "0x0"]);

        assert_eq!(
            decode_transfer(&ev, 0, &cache, &config(), NOW),
            Err(DecodeError::BlockNotLookedUp(5))
        );
    }

    #[tokio::test]
    async fn rejects_foreign_selector() {
        let cache = resolved_cache().await;
        let mut ev = event(&["0x1", "0x2"], &["0x1", "0x0"]);
        ev.keys[0] = felt("0x1234");

        assert_eq!(
            decode_transfer(&ev, 0, &cache, &config(), NOW),
            Err(DecodeError::UnexpectedSelector("0x1234".into()))
        );
    }

    #[tokio::test]
    async fn batch_skips_bad_events_and_continues() {
        let cache = resolved_cache().await;
        let events = vec![
            event(&[], &["0x1"]),
            event(&["0x1", "0x2"], &["0x5", "0x0"]),
            event(&[], &["0x3", "0x4", "0x6", "0x0"]),
        ];

        let batch = decode_batch(&events, &cache, &config(), NOW);

        assert_eq!(batch.failures, 1);
        assert_eq!(batch.transfers.len(), 2);
        // all share tx 0x77, so ordinals follow batch order
        assert_eq!(batch.transfers[0].event_index, 1);
        assert_eq!(batch.transfers[1].event_index, 2);
    }

    #[test]
    fn event_indices_count_per_transaction() {
        let mut a = event(&["0x1", "0x2"], &["0x1", "0x0"]);
        let mut b = a.clone();
        b.transaction_hash = felt("0x88");
        a.block_number = 1;
        let events = vec![a.clone(), b.clone(), a, b.clone(), b];

        assert_eq!(event_indices(&events), vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn layout_is_chosen_by_key_count() {
        let indexed = event(&["0x1", "0x2"], &[]);
        let packed = event(&["0x1"], &[]);
        assert_eq!(TransferLayout::of(&indexed), TransferLayout::Indexed);
        assert_eq!(TransferLayout::of(&packed), TransferLayout::Packed);
    }
}
