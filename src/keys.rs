//! Byte encoding of entry keys and packed entry values
//!
//! Forward keys are `resource|principal` so one resource's entries share a
//! prefix; reverse keys are `principal|resource`. Each half is a kind tag
//! followed by a big-endian id (0 for singleton resources).

use crate::bits::{Mask, ALL_BITS};
use crate::constants::{ENTRY_KEY_LEN, FLAG_DENY, FLAG_INHERIT, PRINCIPAL_KEY_LEN, RESOURCE_KEY_LEN};
use crate::model::{EntryKey, Grant, PrincipalKind, PrincipalRef, ResourceKind, ResourceRef};

#[inline]
pub fn resource_key(r: &ResourceRef) -> [u8; RESOURCE_KEY_LEN] {
    let mut k = [0u8; RESOURCE_KEY_LEN];
    k[0] = r.kind.tag();
    k[1..].copy_from_slice(&r.id.unwrap_or(0).to_be_bytes());
    k
}

#[inline]
pub fn principal_key(p: &PrincipalRef) -> [u8; PRINCIPAL_KEY_LEN] {
    let mut k = [0u8; PRINCIPAL_KEY_LEN];
    k[0] = p.kind.tag();
    k[1..].copy_from_slice(&p.id.to_be_bytes());
    k
}

/// `resource|principal`
#[inline]
pub fn forward_key(key: &EntryKey) -> [u8; ENTRY_KEY_LEN] {
    let mut k = [0u8; ENTRY_KEY_LEN];
    k[..RESOURCE_KEY_LEN].copy_from_slice(&resource_key(&key.resource));
    k[RESOURCE_KEY_LEN..].copy_from_slice(&principal_key(&key.principal));
    k
}

/// `principal|resource`
#[inline]
pub fn reverse_key(key: &EntryKey) -> [u8; ENTRY_KEY_LEN] {
    let mut k = [0u8; ENTRY_KEY_LEN];
    k[..PRINCIPAL_KEY_LEN].copy_from_slice(&principal_key(&key.principal));
    k[PRINCIPAL_KEY_LEN..].copy_from_slice(&resource_key(&key.resource));
    k
}

fn decode_resource(b: &[u8]) -> Option<ResourceRef> {
    let kind = ResourceKind::from_tag(b[0])?;
    let id = u64::from_be_bytes(b[1..RESOURCE_KEY_LEN].try_into().ok()?);
    let id = if kind.is_singleton() { None } else { Some(id) };
    Some(ResourceRef { kind, id })
}

fn decode_principal(b: &[u8]) -> Option<PrincipalRef> {
    let kind = PrincipalKind::from_tag(b[0])?;
    let id = u64::from_be_bytes(b[1..PRINCIPAL_KEY_LEN].try_into().ok()?);
    Some(PrincipalRef { kind, id })
}

pub fn decode_forward(b: &[u8]) -> Option<EntryKey> {
    if b.len() != ENTRY_KEY_LEN {
        return None;
    }
    Some(EntryKey::new(
        decode_resource(&b[..RESOURCE_KEY_LEN])?,
        decode_principal(&b[RESOURCE_KEY_LEN..])?,
    ))
}

pub fn decode_reverse(b: &[u8]) -> Option<EntryKey> {
    if b.len() != ENTRY_KEY_LEN {
        return None;
    }
    Some(EntryKey::new(
        decode_resource(&b[PRINCIPAL_KEY_LEN..])?,
        decode_principal(&b[..PRINCIPAL_KEY_LEN])?,
    ))
}

#[inline]
pub fn pack(g: &Grant) -> u64 {
    let mut v = u64::from(g.permissions & ALL_BITS);
    if g.deny {
        v |= FLAG_DENY;
    }
    if g.inherit_to_children {
        v |= FLAG_INHERIT;
    }
    v
}

#[inline]
pub fn unpack(v: u64) -> Grant {
    Grant {
        permissions: (v & u64::from(ALL_BITS)) as Mask,
        deny: v & FLAG_DENY != 0,
        inherit_to_children: v & FLAG_INHERIT != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_reverse_decode_to_same_key() {
        let key = EntryKey::new(ResourceRef::project(42), PrincipalRef::group(7));
        assert_eq!(decode_forward(&forward_key(&key)), Some(key));
        assert_eq!(decode_reverse(&reverse_key(&key)), Some(key));
    }

    #[test]
    fn singleton_decodes_without_id() {
        let key = EntryKey::new(ResourceRef::root(), PrincipalRef::user(1));
        assert_eq!(decode_forward(&forward_key(&key)).unwrap().resource.id, None);
    }

    #[test]
    fn resource_prefix_groups_entries() {
        let a = forward_key(&EntryKey::new(ResourceRef::workspace(1), PrincipalRef::user(1)));
        let b = forward_key(&EntryKey::new(ResourceRef::workspace(1), PrincipalRef::group(9)));
        assert_eq!(a[..RESOURCE_KEY_LEN], b[..RESOURCE_KEY_LEN]);
    }

    #[test]
    fn packed_flags_survive() {
        let g = Grant { permissions: 21, deny: true, inherit_to_children: false };
        assert_eq!(unpack(pack(&g)), g);
        assert!(decode_forward(&[0u8; 3]).is_none());
    }
}
