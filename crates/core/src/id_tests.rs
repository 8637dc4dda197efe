// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

crate::define_id! {
    /// Test-only ID type.
    pub struct ProbeId;
}

#[test]
fn display_and_as_str() {
    let id = ProbeId::new("probe-42");
    assert_eq!(id.to_string(), "probe-42");
    assert_eq!(id.as_str(), "probe-42");
}

#[test]
fn short_truncates() {
    let id = ProbeId::new("abcdefghij");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefghij");
}

#[test]
fn short_id_on_str() {
    assert_eq!("abcdef".short(3), "abc");
    assert_eq!("ab".short(3), "ab");
}

#[test]
fn equality_with_str() {
    let id = ProbeId::new("x");
    assert_eq!(id, "x");
    assert_ne!(id, "y");
}

#[test]
fn serde_is_transparent() {
    let id = TenantId::new("tenant-a");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"tenant-a\"");
    let parsed: TenantId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

crate::define_id! {
    /// Test-only prefixed ID type.
    pub struct TaggedId("tag-");
}

#[test]
fn generate_applies_prefix() {
    let ids = SequentialIdGen::new("n");
    let id = TaggedId::generate(&ids);
    assert_eq!(id.as_str(), "tag-n-1");
    assert_eq!(TaggedId::PREFIX, "tag-");
}

#[test]
fn uuid_gen_is_unique() {
    let id_gen = UuidIdGen;
    let a = id_gen.next();
    let b = id_gen.next();
    assert_ne!(a, b);
}

#[test]
fn sequential_gen_counts_up() {
    let id_gen = SequentialIdGen::new("t");
    assert_eq!(id_gen.next(), "t-1");
    assert_eq!(id_gen.next(), "t-2");
    let cloned = id_gen.clone();
    assert_eq!(cloned.next(), "t-3");
}
