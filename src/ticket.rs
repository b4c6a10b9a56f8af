use std::collections::BTreeSet;

use crate::{data::record::RecordLocation, key::Key};

/// Key-set delta of one document update, computed by
/// [`IndexAccessMethod::validate_update`](crate::access::IndexAccessMethod::validate_update)
/// and applied by [`IndexAccessMethod::update`](crate::access::IndexAccessMethod::update).
///
/// The ticket is consumed when applied, so it can be committed at most once.
/// A default ticket is invalid and is rejected by `update`.
#[derive(Clone, Debug, Default)]
pub struct UpdateTicket {
    pub(crate) old_keys: BTreeSet<Key>,
    pub(crate) new_keys: BTreeSet<Key>,
    /// 新文档有、旧文档没有的 key
    pub(crate) added: Vec<Key>,
    /// 旧文档有、新文档没有的 key
    pub(crate) removed: Vec<Key>,
    pub(crate) location: RecordLocation,
    pub(crate) dups_allowed: bool,
    pub(crate) valid: bool,
}

impl UpdateTicket {
    pub(crate) fn new(
        old_keys: BTreeSet<Key>,
        new_keys: BTreeSet<Key>,
        location: RecordLocation,
        dups_allowed: bool,
    ) -> Self {
        let added = new_keys.difference(&old_keys).cloned().collect();
        let removed = old_keys.difference(&new_keys).cloned().collect();
        Self {
            old_keys,
            new_keys,
            added,
            removed,
            location,
            dups_allowed,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn added(&self) -> &[Key] {
        &self.added
    }

    pub fn removed(&self) -> &[Key] {
        &self.removed
    }

    pub fn old_keys(&self) -> &BTreeSet<Key> {
        &self.old_keys
    }

    pub fn new_keys(&self) -> &BTreeSet<Key> {
        &self.new_keys
    }

    pub fn location(&self) -> RecordLocation {
        self.location
    }

    pub fn dups_allowed(&self) -> bool {
        self.dups_allowed
    }

    /// 更新后文档拥有的 key 数
    pub(crate) fn resulting_key_count(&self) -> usize {
        self.old_keys.len() + self.added.len() - self.removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(raw: &[&[u8]]) -> BTreeSet<Key> {
        raw.iter().map(|k| Key::from_bytes(k.to_vec())).collect()
    }

    #[test]
    fn test_ticket_delta() {
        let ticket = UpdateTicket::new(
            keys(&[b"a", b"b", b"c"]),
            keys(&[b"b", b"c", b"d", b"e"]),
            RecordLocation::new(1, 2),
            false,
        );
        assert!(!ticket.is_valid());
        assert_eq!(ticket.added(), &[Key::from_bytes(b"d".to_vec()), Key::from_bytes(b"e".to_vec())]);
        assert_eq!(ticket.removed(), &[Key::from_bytes(b"a".to_vec())]);
        assert_eq!(ticket.resulting_key_count(), 4);
        assert_eq!(ticket.location(), RecordLocation::new(1, 2));
    }

    #[test]
    fn test_default_ticket_is_invalid() {
        let ticket = UpdateTicket::default();
        assert!(!ticket.is_valid());
        assert!(ticket.added().is_empty());
        assert_eq!(ticket.resulting_key_count(), 0);
    }
}
