use std::collections::HashSet;

use anyhow::Result;
use chatsync_types::{Record, Watermark};
use chrono::{DateTime, Utc};

use crate::error::IdentityError;
use crate::fingerprint::{MessageId, fingerprint, quarantine_fingerprint};
use crate::store::StorageProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The fingerprint is already persisted.
    AlreadyStored,
    /// Strictly inside the range a trusted previous pass covered.
    CoveredRange,
    /// Already scanned earlier in this pass (the page grew around it).
    SeenThisPass,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyStored => "already_stored",
            Self::CoveredRange => "covered_range",
            Self::SeenThisPass => "seen_this_pass",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Process {
        message_id: MessageId,
        /// Set when the id is a quarantine id; the record must carry the
        /// error as its `processing_error`.
        identity_error: Option<IdentityError>,
    },
    Skip {
        message_id: MessageId,
        reason: SkipReason,
    },
}

/// Decides new versus seen for one traversal pass of one conversation.
///
/// Holds the watermark as it was before the pass started; the traversal
/// keeps its own working copy.
pub struct Deduplicator {
    conversation_id: String,
    prior: Watermark,
    seen: HashSet<MessageId>,
}

impl Deduplicator {
    pub fn new(conversation_id: &str, prior: &Watermark) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            prior: prior.clone(),
            seen: HashSet::new(),
        }
    }

    /// Page-level early stop: the previous pass is trusted and nothing on
    /// the page is newer than its last record, so neither this page nor any
    /// older one can hold anything new.
    pub fn page_is_known(&self, newest_visible: Option<DateTime<Utc>>) -> bool {
        if !self.prior.is_trusted() {
            return false;
        }
        match (newest_visible, self.prior.last_message_timestamp) {
            (Some(newest), Some(last)) => newest <= last,
            _ => false,
        }
    }

    /// Strictly between the first and last record of a trusted previous
    /// pass. Boundary timestamps are left to the storage probe because
    /// several records can share a minute.
    pub fn in_covered_range(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        if !self.prior.is_trusted() {
            return false;
        }
        match (
            timestamp,
            self.prior.first_known_message_timestamp,
            self.prior.last_message_timestamp,
        ) {
            (Some(ts), Some(first), Some(last)) => first < ts && ts < last,
            _ => false,
        }
    }

    pub fn should_process<P>(&mut self, record: &Record, probe: &P) -> Result<Decision>
    where
        P: StorageProbe + ?Sized,
    {
        let (message_id, identity_error) = match fingerprint(record) {
            Ok(id) => (id, None),
            Err(e) => (quarantine_fingerprint(&self.conversation_id, record), Some(e)),
        };

        if !self.seen.insert(message_id.clone()) {
            return Ok(Decision::Skip { message_id, reason: SkipReason::SeenThisPass });
        }

        if identity_error.is_none() && self.in_covered_range(record.timestamp_utc) {
            return Ok(Decision::Skip { message_id, reason: SkipReason::CoveredRange });
        }

        if probe.exists(&message_id)? {
            // Keep scanning: an older unseen record can still sit behind it.
            return Ok(Decision::Skip { message_id, reason: SkipReason::AlreadyStored });
        }

        Ok(Decision::Process { message_id, identity_error })
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;

    struct SetProbe {
        stored: HashSet<String>,
        probes: RefCell<u32>,
    }

    impl SetProbe {
        fn new(ids: &[&str]) -> Self {
            Self {
                stored: ids.iter().map(|s| s.to_string()).collect(),
                probes: RefCell::new(0),
            }
        }
    }

    impl StorageProbe for SetProbe {
        fn exists(&self, message_id: &str) -> Result<bool> {
            *self.probes.borrow_mut() += 1;
            Ok(self.stored.contains(message_id))
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, minute, 0).unwrap()
    }

    fn record(minute: u32, text: &str) -> Record {
        Record {
            timestamp_utc: Some(at(minute)),
            sender: Some("Alice".into()),
            body_text: Some(text.into()),
            ..Default::default()
        }
    }

    fn trusted(first: u32, last: u32) -> Watermark {
        Watermark {
            first_known_message_id: Some("first".into()),
            first_known_message_timestamp: Some(at(first)),
            last_message_id: Some("last".into()),
            last_message_timestamp: Some(at(last)),
            is_complete: true,
            ..Default::default()
        }
    }

    #[test]
    fn fast_path_needs_a_trusted_cursor() {
        let dedup = Deduplicator::new("c", &trusted(1, 30));
        assert!(dedup.page_is_known(Some(at(30))));
        assert!(dedup.page_is_known(Some(at(12))));
        assert!(!dedup.page_is_known(Some(at(31))));
        assert!(!dedup.page_is_known(None));

        let mut interrupted = trusted(1, 30);
        interrupted.had_transient_error = true;
        let dedup = Deduplicator::new("c", &interrupted);
        assert!(!dedup.page_is_known(Some(at(10))));

        let dedup = Deduplicator::new("c", &Watermark::default());
        assert!(!dedup.page_is_known(Some(at(10))));
    }

    #[test]
    fn stored_records_are_skipped_without_stopping() {
        let stored = fingerprint(&record(5, "hello")).unwrap();
        let probe = SetProbe::new(&[&stored]);
        let mut dedup = Deduplicator::new("c", &Watermark::default());

        let first = dedup.should_process(&record(5, "hello"), &probe).unwrap();
        assert_eq!(first, Decision::Skip { message_id: stored, reason: SkipReason::AlreadyStored });

        let second = dedup.should_process(&record(6, "new one"), &probe).unwrap();
        assert!(matches!(second, Decision::Process { identity_error: None, .. }));
    }

    #[test]
    fn covered_range_skips_without_probing() {
        let probe = SetProbe::new(&[]);
        let mut dedup = Deduplicator::new("c", &trusted(1, 30));

        let inside = dedup.should_process(&record(15, "middle"), &probe).unwrap();
        assert!(matches!(inside, Decision::Skip { reason: SkipReason::CoveredRange, .. }));
        assert_eq!(*probe.probes.borrow(), 0);

        // Boundary minutes still go to the store
        let boundary = dedup.should_process(&record(30, "same minute"), &probe).unwrap();
        assert!(matches!(boundary, Decision::Process { .. }));
        assert_eq!(*probe.probes.borrow(), 1);

        let newer = dedup.should_process(&record(31, "tail"), &probe).unwrap();
        assert!(matches!(newer, Decision::Process { .. }));
    }

    #[test]
    fn untrusted_cursor_reverifies_everything() {
        let mut wm = trusted(1, 30);
        wm.is_complete = false;
        let probe = SetProbe::new(&[]);
        let mut dedup = Deduplicator::new("c", &wm);

        let d = dedup.should_process(&record(15, "middle"), &probe).unwrap();
        assert!(matches!(d, Decision::Process { .. }));
        assert_eq!(*probe.probes.borrow(), 1);
    }

    #[test]
    fn repeated_record_in_one_pass_is_seen_once() {
        let probe = SetProbe::new(&[]);
        let mut dedup = Deduplicator::new("c", &Watermark::default());
        assert!(matches!(dedup.should_process(&record(2, "x"), &probe).unwrap(), Decision::Process { .. }));
        assert!(matches!(
            dedup.should_process(&record(2, "x"), &probe).unwrap(),
            Decision::Skip { reason: SkipReason::SeenThisPass, .. }
        ));
        assert_eq!(dedup.seen_count(), 1);
    }

    #[test]
    fn unidentifiable_record_gets_quarantine_id() {
        let probe = SetProbe::new(&[]);
        let mut dedup = Deduplicator::new("5511", &Watermark::default());
        let blank = Record::default();

        match dedup.should_process(&blank, &probe).unwrap() {
            Decision::Process { message_id, identity_error } => {
                assert_eq!(message_id, quarantine_fingerprint("5511", &blank));
                assert_eq!(identity_error, Some(IdentityError::MissingField("timestamp")));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
