use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use super::router::Command;
use crate::mailbox::{Mailbox, Next};
use crate::types::{ProviderKind, RequestId};
use crate::Error;

pub(crate) type Delivery = Result<String, Error>;

/// Pull-based view of a streamed completion: yields each text delta in order,
/// then ends. A failure is yielded once as the last item.
///
/// Dropping the stream before it ends aborts the request.
pub struct TextStream {
    id: RequestId,
    provider: ProviderKind,
    mailbox: Mailbox<Delivery>,
    waiting: Option<oneshot::Receiver<Option<Delivery>>>,
    finished: bool,
    commands: UnboundedSender<Command>,
}

impl TextStream {
    pub(crate) fn new(
        id: RequestId,
        provider: ProviderKind,
        mailbox: Mailbox<Delivery>,
        commands: UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            provider,
            mailbox,
            waiting: None,
            finished: false,
            commands,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    fn deliver(&mut self, item: Delivery) -> Poll<Option<Delivery>> {
        if item.is_err() {
            self.finished = true;
        }
        Poll::Ready(Some(item))
    }
}

impl Stream for TextStream {
    type Item = Result<String, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            if let Some(waiting) = self.waiting.as_mut() {
                let delivered = ready!(Pin::new(waiting).poll(cx));
                self.waiting = None;
                return match delivered {
                    Ok(Some(item)) => self.deliver(item),
                    Ok(None) => {
                        self.finished = true;
                        Poll::Ready(None)
                    }
                    Err(_) => {
                        let error = Error::unavailable(self.provider);
                        self.deliver(Err(error))
                    }
                };
            }

            match self.mailbox.try_next() {
                Next::Item(item) => return self.deliver(item),
                Next::Closed => {
                    self.finished = true;
                    return Poll::Ready(None);
                }
                Next::Wait(receiver) => self.waiting = Some(receiver),
            }
        }
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        if !self.finished && !self.mailbox.is_closed() {
            let _ = self.commands.send(Command::Abort(self.id.clone()));
        }
    }
}
