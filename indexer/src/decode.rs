use alloy::{
    primitives::{Address, B256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};
use anyhow::{Context, Result};

sol! {
    #[derive(Debug)]
    event Locked(address indexed holder, uint96 amount);
}

sol! {
    #[derive(Debug)]
    event Unlocked(address indexed holder, uint32 indexed index, uint96 amount);
}

sol! {
    #[derive(Debug)]
    event Withdrawn(address indexed holder, uint32 indexed index, uint96 amount);
}

#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Lock {
        holder: Address,
        amount: u128,
    },
    Unlock {
        holder: Address,
        unlock_index: u32,
        amount: u128,
    },
    Withdrawn {
        holder: Address,
        unlock_index: u32,
        amount: u128,
    },
}

/// Topic-0 → ordered decoder list. Each topic is tried against its registered decoders in
/// order; the first successful decode wins (§9 "Dynamic event ABI dispatch"). Today each topic
/// maps to exactly one decoder since the three events have distinct signatures, but a topic
/// could be registered against more than one decoder without changing this shape.
type Decoder = fn(&[B256], &[u8]) -> Result<DecodedEvent>;

fn decoders_for_topic(topic0: B256) -> &'static [Decoder] {
    const LOCK: &[Decoder] = &[decode_locked];
    const UNLOCK: &[Decoder] = &[decode_unlocked];
    const WITHDRAWN: &[Decoder] = &[decode_withdrawn];
    const EMPTY: &[Decoder] = &[];

    if topic0 == Locked::SIGNATURE_HASH {
        LOCK
    } else if topic0 == Unlocked::SIGNATURE_HASH {
        UNLOCK
    } else if topic0 == Withdrawn::SIGNATURE_HASH {
        WITHDRAWN
    } else {
        EMPTY
    }
}

fn decode_locked(topics: &[B256], data: &[u8]) -> Result<DecodedEvent> {
    let ev = Locked::decode_raw_log(topics.iter().copied(), data, true)
        .context("decode Locked")?;
    Ok(DecodedEvent::Lock {
        holder: ev.holder,
        amount: u128::try_from(ev.amount).context("Locked.amount overflow")?,
    })
}

fn decode_unlocked(topics: &[B256], data: &[u8]) -> Result<DecodedEvent> {
    let ev = Unlocked::decode_raw_log(topics.iter().copied(), data, true)
        .context("decode Unlocked")?;
    Ok(DecodedEvent::Unlock {
        holder: ev.holder,
        unlock_index: ev.index,
        amount: u128::try_from(ev.amount).context("Unlocked.amount overflow")?,
    })
}

fn decode_withdrawn(topics: &[B256], data: &[u8]) -> Result<DecodedEvent> {
    let ev = Withdrawn::decode_raw_log(topics.iter().copied(), data, true)
        .context("decode Withdrawn")?;
    Ok(DecodedEvent::Withdrawn {
        holder: ev.holder,
        unlock_index: ev.index,
        amount: u128::try_from(ev.amount).context("Withdrawn.amount overflow")?,
    })
}

/// All topic-0 hashes this indexer subscribes to, for the `eth_getLogs` topic filter (§4.1
/// `getLogs` — "the union of topic-0 hashes of all known event ABIs").
pub fn known_topic0s() -> [B256; 3] {
    [
        Locked::SIGNATURE_HASH,
        Unlocked::SIGNATURE_HASH,
        Withdrawn::SIGNATURE_HASH,
    ]
}

/// Decodes a single log against every decoder registered for its `topics[0]`, returning the
/// first successful decode. Returns `Ok(None)` — logged by the caller, not here — when the
/// topic is unrecognized or every registered decoder rejects it (§4.1 `decodeLog`).
pub fn decode_log(log: &Log) -> Option<DecodedEvent> {
    let topics = log.topics();
    let topic0 = *topics.first()?;
    let data = log.data().data.as_ref();

    for decoder in decoders_for_topic(topic0) {
        if let Ok(ev) = decoder(topics, data) {
            return Some(ev);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{U256, address};
    use alloy::sol_types::SolEvent;

    fn encode_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        use alloy::primitives::{Bytes, LogData};
        use alloy::rpc::types::Log as RpcLog;

        let inner = alloy::primitives::Log {
            address: Address::ZERO,
            data: LogData::new(topics, Bytes::from(data)).expect("valid log data"),
        };
        RpcLog {
            inner,
            ..Default::default()
        }
    }

    #[test]
    fn decodes_locked_event() {
        let holder = address!("00000000000000000000000000000000000001");
        let ev = Locked {
            holder,
            amount: U256::from(100u64),
        };
        let log = encode_log(vec![Locked::SIGNATURE_HASH, holder.into_word().into()], {
            let mut buf = Vec::new();
            alloy::sol_types::SolEvent::encode_data_to(&ev, &mut buf);
            buf
        });

        let decoded = decode_log(&log).expect("decodes");
        match decoded {
            DecodedEvent::Lock { holder: h, amount } => {
                assert_eq!(h, holder);
                assert_eq!(amount, 100);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_topic() {
        let log = encode_log(vec![B256::repeat_byte(0xAB)], vec![]);
        assert!(decode_log(&log).is_none());
    }

    #[test]
    fn rejects_locked_log_with_extra_indexed_topic() {
        // Three topics (topic0 + two indexed) can never satisfy `Locked`, which expects
        // exactly one indexed topic beyond topic0.
        let holder = address!("00000000000000000000000000000000000002");
        let log = encode_log(
            vec![
                Locked::SIGNATURE_HASH,
                holder.into_word().into(),
                B256::repeat_byte(0x01),
            ],
            vec![],
        );
        assert!(decode_log(&log).is_none());
    }
}
