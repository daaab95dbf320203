// Copyright 2019 Fullstop000 <fullstop1005@gmail.com>.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

// Copyright (c) 2011 The LevelDB Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::util::coding::{decode_fixed_64, put_fixed_64};
use crate::util::comparator::Comparator;
use crate::util::varint::VarintU32;
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::str;

/// The max key sequence number. Sequence numbers occupy 56 bits of the
/// 8-byte internal key tail; the low byte holds the value type.
pub const MAX_KEY_SEQUENCE: u64 = (1u64 << 56) - 1;

/// Length of the internal key tail: 7 bytes of sequence number plus 1 type
/// byte.
pub const INTERNAL_KEY_TAIL: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ValueType {
    /// A tombstone: the key is deleted as of this sequence number.
    Deletion = 0,
    /// A normal value.
    Value = 1,
    Unknown,
}

/// The `ValueType` to use when composing an internal key for seeking to a
/// particular sequence number. Internal keys sort by decreasing sequence,
/// with the type in the low bits, so the highest-numbered type forms the
/// maximal key for a `(user_key, seq)` pair.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl From<u64> for ValueType {
    fn from(v: u64) -> Self {
        match v {
            0 => ValueType::Deletion,
            1 => ValueType::Value,
            _ => ValueType::Unknown,
        }
    }
}

/// The three components of an internal key, borrowed from its encoding.
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub seq: u64,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(user_key: &'a [u8], seq: u64, value_type: ValueType) -> Self {
        Self {
            user_key,
            seq,
            value_type,
        }
    }

    /// Splits an encoded internal key. Returns `None` when the data is
    /// shorter than the tail or carries an unknown value type.
    pub fn decode_from(internal_key: &'a [u8]) -> Option<ParsedInternalKey<'a>> {
        let size = internal_key.len();
        if size < INTERNAL_KEY_TAIL {
            return None;
        }
        let tail = decode_fixed_64(&internal_key[size - INTERNAL_KEY_TAIL..]);
        let value_type = ValueType::from(tail & 0xff);
        if value_type == ValueType::Unknown {
            return None;
        }
        Some(Self {
            user_key: &internal_key[..size - INTERNAL_KEY_TAIL],
            seq: tail >> 8,
            value_type,
        })
    }

    /// Re-encodes into an owned `InternalKey`.
    #[inline]
    pub fn encode(&self) -> InternalKey {
        InternalKey::new(self.user_key, self.seq, self.value_type)
    }

    /// The user key as a str, for diagnostics.
    pub fn as_str(&self) -> &'a str {
        str::from_utf8(self.user_key).unwrap()
    }
}

impl<'a> Debug for ParsedInternalKey<'a> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:?} @ {} : {:?}",
            self.user_key, self.seq, self.value_type
        )
    }
}

/// An owned, encoded internal key:
///
/// ```text
/// | ----------- n bytes ----------- | --- 7 bytes --- | - 1 byte - |
///              user key                  seq number        type
/// ```
#[derive(Default, Clone, PartialEq, Eq)]
pub struct InternalKey {
    data: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], seq: u64, t: ValueType) -> Self {
        let mut data = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TAIL);
        data.extend_from_slice(user_key);
        put_fixed_64(&mut data, pack_seq_and_type(seq, t));
        Self { data }
    }

    #[inline]
    pub fn decoded_from(src: &[u8]) -> Self {
        Self {
            data: src.to_vec(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn user_key(&self) -> &[u8] {
        &self.data[..self.data.len() - INTERNAL_KEY_TAIL]
    }

    pub fn parsed(&self) -> Option<ParsedInternalKey<'_>> {
        ParsedInternalKey::decode_from(&self.data)
    }
}

impl Debug for InternalKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if let Some(parsed) = self.parsed() {
            write!(f, "{:?}", parsed)
        } else {
            write!(f, "(bad){:?}", self.data)
        }
    }
}

/// A key assembled for a point lookup at a specific sequence number:
///
/// ```text
///   +---------------------------------+
///   | varint32 of internal key length |
///   +---------------------------------+ --------------- user key start
///   | user key bytes                  |
///   +---------------------------------+   internal key
///   | sequence (7)        |  seek (1) |
///   +---------------------------------+ ---------------
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    ukey_start: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], seq: u64) -> Self {
        let mut data = vec![];
        let ukey_start =
            VarintU32::put_varint(&mut data, (user_key.len() + INTERNAL_KEY_TAIL) as u32);
        data.extend_from_slice(user_key);
        put_fixed_64(&mut data, pack_seq_and_type(seq, VALUE_TYPE_FOR_SEEK));
        Self { data, ukey_start }
    }

    /// The full encoding, suitable for memtable lookup.
    #[inline]
    pub fn mem_key(&self) -> &[u8] {
        &self.data
    }

    /// The internal key portion.
    #[inline]
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.ukey_start..]
    }

    /// The user key portion.
    #[inline]
    pub fn user_key(&self) -> &[u8] {
        &self.data[self.ukey_start..self.data.len() - INTERNAL_KEY_TAIL]
    }
}

/// Orders internal keys by user key ascending (per the wrapped user
/// comparator), then sequence number descending, then type descending.
/// Entries for the same user key therefore surface newest first.
#[derive(Clone, Default)]
pub struct InternalKeyComparator<C: Comparator> {
    pub user_comparator: C,
}

impl<C: Comparator> InternalKeyComparator<C> {
    pub fn new(user_comparator: C) -> Self {
        Self { user_comparator }
    }
}

impl<C: Comparator> Comparator for InternalKeyComparator<C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let sa = extract_seq_number(a);
                let sb = extract_seq_number(b);
                // Higher sequence numbers are newer and sort first.
                sb.cmp(&sa)
            }
            ord => ord,
        }
    }

    #[inline]
    fn name(&self) -> &str {
        "leveldb.InternalKeyComparator"
    }

    fn separator(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        let ua = extract_user_key(a);
        let ub = extract_user_key(b);
        let mut sep = self.user_comparator.separator(ua, ub);
        if sep.len() < ua.len() && self.user_comparator.compare(ua, &sep) == Ordering::Less {
            // The user key shrank physically but grew logically; tack on the
            // earliest possible tail.
            put_fixed_64(
                &mut sep,
                pack_seq_and_type(MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            sep
        } else {
            a.to_vec()
        }
    }

    fn successor(&self, key: &[u8]) -> Vec<u8> {
        let ukey = extract_user_key(key);
        let mut suc = self.user_comparator.successor(ukey);
        if suc.len() < ukey.len() && self.user_comparator.compare(ukey, &suc) == Ordering::Less {
            put_fixed_64(
                &mut suc,
                pack_seq_and_type(MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            suc
        } else {
            key.to_vec()
        }
    }
}

/// Strips the tail of an encoded internal key.
///
/// # Panics
///
/// Panics when `key` is shorter than the tail.
#[inline]
pub fn extract_user_key(key: &[u8]) -> &[u8] {
    assert!(
        key.len() >= INTERNAL_KEY_TAIL,
        "[internal key] invalid length {}, expect >= {}",
        key.len(),
        INTERNAL_KEY_TAIL,
    );
    &key[..key.len() - INTERNAL_KEY_TAIL]
}

#[inline]
fn extract_seq_number(key: &[u8]) -> u64 {
    assert!(
        key.len() >= INTERNAL_KEY_TAIL,
        "[internal key] invalid length {}, expect >= {}",
        key.len(),
        INTERNAL_KEY_TAIL,
    );
    decode_fixed_64(&key[key.len() - INTERNAL_KEY_TAIL..]) >> 8
}

#[inline]
fn pack_seq_and_type(seq: u64, t: ValueType) -> u64 {
    assert!(
        seq <= MAX_KEY_SEQUENCE,
        "[internal key] sequence number {} exceeds the max {}",
        seq,
        MAX_KEY_SEQUENCE,
    );
    seq << 8 | t as u64
}
