use crate::signal::{Notification, Signal};

/// Fixed-capacity ring of the most recent notifications.
///
/// `observed` counts every notification ever pushed and doubles as the
/// sequence number source, so it keeps growing after the ring wraps.
pub(crate) struct HistoryRing {
    slots: Vec<Option<Notification>>,
    next: usize,
    len: usize,
    observed: u64,
}

impl HistoryRing {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { slots: vec![None; capacity], next: 0, len: 0, observed: 0 }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn observed(&self) -> u64 {
        self.observed
    }

    /// Records a signal as the newest entry, overwriting the oldest one when
    /// full, and returns a copy of the stored notification.
    pub(crate) fn push(&mut self, path: &str, signal: Signal) -> Notification {
        self.observed += 1;
        let note = Notification { seq: self.observed, path: path.to_owned(), signal };
        self.slots[self.next] = Some(note.clone());
        self.next = (self.next + 1) % self.capacity();
        self.len = (self.len + 1).min(self.capacity());
        note
    }

    /// Newest first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Notification> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |age| {
            let index = (self.next + capacity - 1 - age) % capacity;
            self.slots[index].as_ref()
        })
    }

    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryRing;
    use crate::signal::Signal;

    fn opened(ring: &mut HistoryRing, wallet: &str) {
        ring.push("/modules/kwalletd5", Signal::WalletOpened { wallet: wallet.to_owned() });
    }

    fn wallets(ring: &HistoryRing) -> Vec<String> {
        ring.iter()
            .map(|note| match &note.signal {
                Signal::WalletOpened { wallet } => wallet.clone(),
                other => panic!("unexpected signal {other:?}"),
            })
            .collect()
    }

    #[test]
    fn newest_first_before_wrapping() {
        let mut ring = HistoryRing::new(4);
        opened(&mut ring, "a");
        opened(&mut ring, "b");
        assert_eq!(wallets(&ring), vec!["b", "a"]);
        assert_eq!(ring.observed(), 2);
    }

    #[test]
    fn wrapping_overwrites_oldest() {
        let mut ring = HistoryRing::new(3);
        for wallet in ["a", "b", "c", "d", "e"] {
            opened(&mut ring, wallet);
        }
        assert_eq!(wallets(&ring), vec!["e", "d", "c"]);
        assert_eq!(ring.observed(), 5);
        let seqs: Vec<u64> = ring.iter().map(|note| note.seq).collect();
        assert_eq!(seqs, vec![5, 4, 3]);
    }

    #[test]
    fn clear_keeps_sequence() {
        let mut ring = HistoryRing::new(2);
        opened(&mut ring, "a");
        ring.clear();
        assert_eq!(ring.iter().count(), 0);
        opened(&mut ring, "b");
        assert_eq!(ring.iter().next().map(|note| note.seq), Some(2));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut ring = HistoryRing::new(0);
        opened(&mut ring, "a");
        opened(&mut ring, "b");
        assert_eq!(wallets(&ring), vec!["b"]);
    }
}
