use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Creates a single-slot channel where a new value replaces an unread one.
///
/// Consumers use the returned [`Receiver`] as usual (including in
/// `select!`); they observe a disconnect once the [`LatestSender`] is dropped.
pub fn latest<T>() -> (LatestSender<T>, Receiver<T>) {
    let (tx, rx) = bounded(1);
    let sender = LatestSender {
        tx,
        evict: rx.clone(),
    };
    (sender, rx)
}

/// Sending half of a [`latest`] channel.
#[derive(Debug)]
pub struct LatestSender<T> {
    tx: Sender<T>,
    // Held so the sender can evict a stale value from the full slot.
    evict: Receiver<T>,
}

impl<T> LatestSender<T> {
    /// Publishes `value`, discarding any value nobody has read yet.
    pub fn publish(&self, mut value: T) {
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    let _ = self.evict.try_recv();
                    value = returned;
                }
                // Unreachable while `evict` is alive; nothing to deliver to.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}
