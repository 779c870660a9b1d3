//! Consumer side of a subscription.

use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::ledger::{BlockEvent, EventQuery, LedgerError, SubscriptionId};
use crate::lifecycle::CancelToken;

/// One item on a subscription channel. An `Err` is always
/// [`LedgerError::SubscriptionLost`] and is the last item.
pub type Delivery = Result<BlockEvent, LedgerError>;

/// Receiving end of a registry subscription.
///
/// Events arrive in height order. Once the subscription is unsubscribed,
/// no further events are yielded, even ones already buffered.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    query: EventQuery,
    rx: mpsc::Receiver<Delivery>,
    cancel: CancelToken,
}

/// Create a subscription of bounded `capacity` and the unbounded inbox
/// feeding it. A forwarder task moves items across, so a consumer that
/// falls behind backs up only its own inbox.
pub(crate) fn open(
    id: SubscriptionId,
    query: EventQuery,
    capacity: usize,
    cancel: CancelToken,
) -> (mpsc::UnboundedSender<Delivery>, Subscription) {
    let (inbox_tx, inbox) = mpsc::unbounded_channel();
    let (outbox, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(forward(inbox, outbox, cancel.clone()));
    (inbox_tx, Subscription::new(id, query, rx, cancel))
}

/// Runs until the inbox closes, the consumer goes away or the
/// subscription is cancelled.
async fn forward(
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    outbox: mpsc::Sender<Delivery>,
    mut cancel: CancelToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = outbox.closed() => return,
            item = inbox.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = outbox.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

impl Subscription {
    fn new(
        id: SubscriptionId,
        query: EventQuery,
        rx: mpsc::Receiver<Delivery>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            id,
            query,
            rx,
            cancel,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn query(&self) -> &EventQuery {
        &self.query
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next event. `None` once unsubscribed, or after the lost notice.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item.filter(|_| !self.cancel.is_cancelled()),
        }
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(_)) if this.cancel.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}
