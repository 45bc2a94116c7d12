use core::pin::Pin;
use core::task::{Context, Poll};
use std::time::Duration;

use futures::{ready, Future, Stream};
use pin_project_lite::pin_project;

/// Result of polling a [`TimeoutStream`].
#[derive(Debug, PartialEq, Eq)]
pub enum TimeoutStreamResult<T> {
    /// A value produced by the inner stream.
    Value(T),
    /// No value arrived within the idle duration.
    Timeout,
}

// Implementation adapted from:
//  https://github.com/tokio-rs/tokio/blob/master/tokio-stream/src/stream_ext/chunks_timeout.rs.
pin_project! {
    /// A stream adapter that yields timeout markers when idle.
    ///
    /// The pipeline uses the markers to flush buffers that aged past their fill limit while
    /// the input is quiet.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct TimeoutStream<B, S: Stream<Item = B>> {
        #[pin]
        stream: S,
        #[pin]
        deadline: Option<tokio::time::Sleep>,
        reset_timer: bool,
        idle_duration: Duration,
    }
}

impl<B, S: Stream<Item = B>> TimeoutStream<B, S> {
    /// Wraps a stream to emit a [`TimeoutStreamResult::Timeout`] every `idle_duration`
    /// without a new item.
    pub fn wrap(stream: S, idle_duration: Duration) -> Self {
        Self {
            stream,
            deadline: None,
            reset_timer: true,
            idle_duration,
        }
    }

    /// Restarts the idle timer on the next poll.
    pub fn mark_reset_timer(self: Pin<&mut Self>) {
        let this = self.project();
        *this.reset_timer = true;
    }
}

impl<B, S: Stream<Item = B>> Stream for TimeoutStream<B, S> {
    type Item = TimeoutStreamResult<B>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.reset_timer {
            this.deadline
                .set(Some(tokio::time::sleep(*this.idle_duration)));
            *this.reset_timer = false;
        }

        match this.stream.poll_next(cx) {
            Poll::Ready(Some(value)) => {
                *this.reset_timer = true;
                Poll::Ready(Some(TimeoutStreamResult::Value(value)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => {
                if let Some(deadline) = this.deadline.as_pin_mut() {
                    // Registers the waker when the deadline is not reached yet.
                    ready!(deadline.poll(cx));
                    *this.reset_timer = true;

                    return Poll::Ready(Some(TimeoutStreamResult::Timeout));
                }

                Poll::Pending
            }
        }
    }
}
