//! Domain helpers layered over the generated protobuf types.
//!
//! The wire types stay plain prost structs. This module adds the identity key
//! of an [`Item`], the `exists` predicate that separates real records from the
//! empty "not found" sentinel, and the slot predicates used to filter
//! server-streaming calls.

use crate::proto::{Item, Note, Record, RecordRequest, RequestWrapper, RequestWrapperSmall};

/// Identity of a stored record: `(guid, source_id)`.
pub type RecordKey = (String, i32);

/// Returns `true` if `record` is present and its item carries a non-empty
/// guid.
///
/// An empty [`Record`] is how a unary lookup reports "not found", so callers
/// use this instead of checking for `None` alone.
pub fn exists(record: Option<&Record>) -> bool {
    record.is_some_and(Record::exists)
}

impl Item {
    pub fn new(guid: impl Into<String>, source_id: i32) -> Self {
        Self {
            guid: guid.into(),
            source_id,
            owner: String::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn key(&self) -> RecordKey {
        (self.guid.clone(), self.source_id)
    }
}

impl Record {
    pub fn new(item: Item) -> Self {
        Self {
            item: Some(item),
            payload: String::new(),
        }
    }

    /// The "not found" sentinel returned by a unary lookup miss.
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn exists(&self) -> bool {
        self.item.as_ref().is_some_and(|item| !item.guid.is_empty())
    }
}

impl RecordRequest {
    pub fn for_item(guid: impl Into<String>, source_id: i32) -> Self {
        Self {
            item: Some(Item::new(guid, source_id)),
        }
    }
}

impl Note {
    pub fn new(message: impl Into<String>, item: Item) -> Self {
        Self {
            message: message.into(),
            item: Some(item),
        }
    }
}

/// A server-streaming request envelope that gates which stored records are
/// emitted.
pub trait SlotFilter {
    /// Number of request slots carried by this envelope.
    const SLOTS: usize;

    /// Whether slot `n` (1-based) is set. Out of range slots are never set.
    fn has_slot(&self, n: usize) -> bool;

    /// Whether the call should emit records at all.
    fn admits(&self) -> bool;
}

impl SlotFilter for RequestWrapper {
    const SLOTS: usize = 4;

    fn has_slot(&self, n: usize) -> bool {
        match n {
            1 => self.req1.is_some(),
            2 => self.req2.is_some(),
            3 => self.req3.is_some(),
            4 => self.req4.is_some(),
            _ => false,
        }
    }

    /// Only a complete wrapper admits records; any missing slot yields an
    /// empty stream.
    fn admits(&self) -> bool {
        (1..=Self::SLOTS).all(|n| self.has_slot(n))
    }
}

impl SlotFilter for RequestWrapperSmall {
    const SLOTS: usize = 1;

    fn has_slot(&self, n: usize) -> bool {
        n == 1 && self.req1.is_some()
    }

    fn admits(&self) -> bool {
        self.has_slot(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_rejects_absent_and_empty_guid() {
        assert!(!exists(None));
        assert!(!exists(Some(&Record::not_found())));
        assert!(!exists(Some(&Record::new(Item::new("", 7)))));
        assert!(exists(Some(&Record::new(Item::new("407838352", 456124)))));
    }

    #[test]
    fn full_wrapper_admits_only_when_every_slot_is_set() {
        let mut wrapper = RequestWrapper {
            req1: Some(RecordRequest::for_item("1", 1)),
            req2: Some(RecordRequest::for_item("2", 2)),
            req3: Some(RecordRequest::for_item("3", 3)),
            req4: Some(RecordRequest::for_item("4", 4)),
        };
        assert!(wrapper.admits());

        wrapper.req3 = None;
        assert!(!wrapper.admits());
        assert!(wrapper.has_slot(4));
        assert!(!wrapper.has_slot(5));

        assert!(!RequestWrapper::default().admits());
    }

    #[test]
    fn small_wrapper_checks_first_slot() {
        let wrapper = RequestWrapperSmall {
            req1: Some(RecordRequest::for_item("1", 1)),
        };
        assert!(wrapper.admits());
        assert!(!wrapper.has_slot(2));
        assert!(!RequestWrapperSmall::default().admits());
    }
}
