//! Negentropy (protocol version 1) range-based set reconciliation.
//!
//! Only the initiating side is implemented: the client announces the ids it
//! already holds, and the relay answers with ranges that let the client work
//! out which ids it is missing. The message codec is public so the relay side
//! can be assembled from the same pieces.
//!
//! A message is a version byte followed by consecutive ranges. Each range is
//! an upper [`Bound`] (its lower bound is the previous range's upper bound,
//! starting from the zero bound) and a payload: skip, a 16-byte fingerprint of
//! the items in the range, or the full list of ids in the range.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// Protocol version 1.
pub const PROTOCOL_VERSION: u8 = 0x61;

const ID_SIZE: usize = 32;
const FINGERPRINT_SIZE: usize = 16;

const MODE_SKIP: u64 = 0;
const MODE_FINGERPRINT: u64 = 1;
const MODE_ID_LIST: u64 = 2;

/// Errors produced while decoding or processing a negentropy message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegentropyError {
    #[error("unsupported protocol version 0x{0:02x}")]
    UnsupportedVersion(u8),
    #[error("empty message")]
    Empty,
    #[error("message truncated")]
    Truncated,
    #[error("varint overflow")]
    VarintOverflow,
    #[error("unknown range mode {0}")]
    UnknownMode(u64),
    #[error("bound id prefix of {0} bytes exceeds 32")]
    PrefixTooLong(usize),
}

/// A range boundary: a timestamp plus an id prefix.
///
/// Items order by `(timestamp, id)`; a bound sorts before every item that
/// shares its timestamp and starts with (or sorts after) its prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bound {
    pub timestamp: u64,
    pub prefix: Vec<u8>,
}

impl Bound {
    /// The bound every range starts from.
    pub fn zero() -> Self {
        Self {
            timestamp: 0,
            prefix: Vec::new(),
        }
    }

    /// The bound after every item.
    pub fn infinity() -> Self {
        Self {
            timestamp: u64::MAX,
            prefix: Vec::new(),
        }
    }

    fn is_after(&self, item: &Item) -> bool {
        (self.timestamp, self.prefix.as_slice()) > (item.timestamp, item.id.as_slice())
    }
}

/// Payload of one range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeMode {
    Skip,
    Fingerprint([u8; FINGERPRINT_SIZE]),
    IdList(Vec<[u8; ID_SIZE]>),
}

/// One range of a message, ending (exclusively) at `upper`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub upper: Bound,
    pub mode: RangeMode,
}

/// An element of the reconciled set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Item {
    pub timestamp: u64,
    pub id: [u8; ID_SIZE],
}

// ---------------------------------------------------------------------------
// Varints and fingerprints
// ---------------------------------------------------------------------------

/// Encode a varint: base-128, most significant group first, high bit set on
/// every byte but the last.
pub fn encode_varint(mut n: u64, out: &mut Vec<u8>) {
    let mut groups = Vec::with_capacity(10);
    loop {
        groups.push((n & 0x7f) as u8);
        n >>= 7;
        if n == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (i, group) in groups.iter().rev().enumerate() {
        out.push(if i == last { *group } else { group | 0x80 });
    }
}

fn decode_varint(input: &mut &[u8]) -> Result<u64, NegentropyError> {
    let mut n: u64 = 0;
    loop {
        let (&byte, rest) = input.split_first().ok_or(NegentropyError::Truncated)?;
        *input = rest;
        if n > (u64::MAX >> 7) {
            return Err(NegentropyError::VarintOverflow);
        }
        n = (n << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(n);
        }
    }
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8], NegentropyError> {
    if input.len() < len {
        return Err(NegentropyError::Truncated);
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

/// Fingerprint of a set of items: the first 16 bytes of
/// `sha256(sum(ids) mod 2^256 || varint(count))`, ids read as little-endian.
pub fn fingerprint<'a>(items: impl IntoIterator<Item = &'a Item>) -> [u8; FINGERPRINT_SIZE] {
    let mut sum = [0u8; ID_SIZE];
    let mut count = 0u64;
    for item in items {
        let mut carry = 0u16;
        for (acc, byte) in sum.iter_mut().zip(item.id.iter()) {
            let total = u16::from(*acc) + u16::from(*byte) + carry;
            *acc = total as u8;
            carry = total >> 8;
        }
        count += 1;
    }

    let mut input = sum.to_vec();
    encode_varint(count, &mut input);
    let digest = Sha256::digest(&input);
    let mut out = [0u8; FINGERPRINT_SIZE];
    out.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
    out
}

// ---------------------------------------------------------------------------
// Message codec
// ---------------------------------------------------------------------------

/// Encode a full message. Timestamps are delta-encoded within the message.
pub fn encode_message(ranges: &[Range]) -> Vec<u8> {
    let mut out = vec![PROTOCOL_VERSION];
    let mut last_timestamp = 0u64;
    for range in ranges {
        let bound = &range.upper;
        if bound.timestamp == u64::MAX {
            encode_varint(0, &mut out);
            last_timestamp = u64::MAX;
        } else {
            let delta = bound.timestamp.saturating_sub(last_timestamp);
            encode_varint(delta.saturating_add(1), &mut out);
            last_timestamp = bound.timestamp;
        }
        encode_varint(bound.prefix.len() as u64, &mut out);
        out.extend_from_slice(&bound.prefix);

        match &range.mode {
            RangeMode::Skip => encode_varint(MODE_SKIP, &mut out),
            RangeMode::Fingerprint(fp) => {
                encode_varint(MODE_FINGERPRINT, &mut out);
                out.extend_from_slice(fp);
            }
            RangeMode::IdList(ids) => {
                encode_varint(MODE_ID_LIST, &mut out);
                encode_varint(ids.len() as u64, &mut out);
                for id in ids {
                    out.extend_from_slice(id);
                }
            }
        }
    }
    out
}

/// Decode a full message into its ranges.
pub fn decode_message(message: &[u8]) -> Result<Vec<Range>, NegentropyError> {
    let (&version, mut input) = message.split_first().ok_or(NegentropyError::Empty)?;
    if version != PROTOCOL_VERSION {
        return Err(NegentropyError::UnsupportedVersion(version));
    }

    let mut ranges = Vec::new();
    let mut last_timestamp = 0u64;
    while !input.is_empty() {
        let encoded = decode_varint(&mut input)?;
        let timestamp = if encoded == 0 || last_timestamp == u64::MAX {
            u64::MAX
        } else {
            last_timestamp.saturating_add(encoded - 1)
        };
        last_timestamp = timestamp;

        let prefix_len = decode_varint(&mut input)? as usize;
        if prefix_len > ID_SIZE {
            return Err(NegentropyError::PrefixTooLong(prefix_len));
        }
        let prefix = take(&mut input, prefix_len)?.to_vec();

        let mode = match decode_varint(&mut input)? {
            MODE_SKIP => RangeMode::Skip,
            MODE_FINGERPRINT => {
                let mut fp = [0u8; FINGERPRINT_SIZE];
                fp.copy_from_slice(take(&mut input, FINGERPRINT_SIZE)?);
                RangeMode::Fingerprint(fp)
            }
            MODE_ID_LIST => {
                let count = decode_varint(&mut input)? as usize;
                let mut ids = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let mut id = [0u8; ID_SIZE];
                    id.copy_from_slice(take(&mut input, ID_SIZE)?);
                    ids.push(id);
                }
                RangeMode::IdList(ids)
            }
            other => return Err(NegentropyError::UnknownMode(other)),
        };

        ranges.push(Range {
            upper: Bound { timestamp, prefix },
            mode,
        });
    }
    Ok(ranges)
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// The initiating side of a reconciliation over a fixed local set.
#[derive(Debug, Clone)]
pub struct Negentropy {
    items: Vec<Item>,
}

impl Negentropy {
    pub fn new(items: impl IntoIterator<Item = Item>) -> Self {
        let mut items: Vec<Item> = items.into_iter().collect();
        items.sort();
        items.dedup();
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The opening message: every local id in a single range.
    pub fn initiate(&self) -> Vec<u8> {
        encode_message(&[Range {
            upper: Bound::infinity(),
            mode: RangeMode::IdList(self.items.iter().map(|i| i.id).collect()),
        }])
    }

    /// Process a relay reply.
    ///
    /// Ids the relay has and we lack are appended to `need`. Returns the next
    /// message to send, or `None` once the sets are reconciled.
    pub fn reconcile(
        &self,
        message: &[u8],
        need: &mut Vec<[u8; ID_SIZE]>,
    ) -> Result<Option<Vec<u8>>, NegentropyError> {
        let ranges = decode_message(message)?;

        let mut out: Vec<Range> = Vec::new();
        let mut pending_skip = false;
        let mut lower = Bound::zero();

        for range in ranges {
            let local = self.items_in(&lower, &range.upper);
            match range.mode {
                RangeMode::Skip => pending_skip = true,
                RangeMode::Fingerprint(theirs) => {
                    if fingerprint(local) == theirs {
                        pending_skip = true;
                    } else {
                        if pending_skip {
                            out.push(Range {
                                upper: lower.clone(),
                                mode: RangeMode::Skip,
                            });
                            pending_skip = false;
                        }
                        out.push(Range {
                            upper: range.upper.clone(),
                            mode: RangeMode::IdList(local.iter().map(|i| i.id).collect()),
                        });
                    }
                }
                RangeMode::IdList(theirs) => {
                    let ours: HashSet<&[u8; ID_SIZE]> = local.iter().map(|i| &i.id).collect();
                    need.extend(theirs.iter().filter(|id| !ours.contains(id)));
                    pending_skip = true;
                }
            }
            lower = range.upper;
        }

        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(encode_message(&out)))
        }
    }

    fn items_in(&self, lower: &Bound, upper: &Bound) -> &[Item] {
        let start = self.items.partition_point(|item| lower.is_after(item));
        let end = self.items.partition_point(|item| upper.is_after(item));
        &self.items[start..end.max(start)]
    }
}
