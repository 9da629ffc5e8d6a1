//! Body wrappers for relayed responses

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};

use crate::error::GatewayError;
use crate::proxy::request_log::RequestScope;

/// Body type of every response the gateway produces
pub type GatewayBody = UnsyncBoxBody<Bytes, GatewayError>;

/// Fully buffered gateway body
pub fn full_body(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pin_project! {
    /// Fails the stream with [`GatewayError::Timeout`] once the deadline passes
    pub struct DeadlineBody<B> {
        #[pin]
        inner: B,
        #[pin]
        deadline: Sleep,
    }
}

impl<B> DeadlineBody<B> {
    pub fn new(inner: B, deadline: Instant) -> Self {
        Self {
            inner,
            deadline: tokio::time::sleep_until(deadline),
        }
    }
}

impl<B> Body for DeadlineBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<GatewayError>,
{
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        if this.deadline.poll(cx).is_ready() {
            return Poll::Ready(Some(Err(GatewayError::Timeout)));
        }

        match this.inner.poll_frame(cx) {
            Poll::Ready(frame) => Poll::Ready(frame.map(|r| r.map_err(Into::into))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pin_project! {
    /// Streams the upstream body to the client.
    ///
    /// When the body is dropped (fully sent, failed, or abandoned by the
    /// client) the streamed byte count and completion marker are traced and
    /// the request scope is released.
    pub struct RelayBody<B> {
        #[pin]
        inner: B,
        bytes: u64,
        ended: bool,
        error: Option<String>,
        scope: Option<RequestScope>,
    }

    impl<B> PinnedDrop for RelayBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(mut scope) = this.scope.take() {
                scope.log.add_entry("res_len", *this.bytes);
                if let Some(err) = this.error.take() {
                    scope.log.add_entry("io.copy_err", err);
                } else if !*this.ended {
                    scope.log.add_marker("client_gone");
                }
                scope.log.add_marker("OK");
            }
        }
    }
}

impl<B: Body> RelayBody<B> {
    pub fn new(inner: B, scope: RequestScope) -> Self {
        let ended = inner.is_end_stream();
        Self {
            inner,
            bytes: 0,
            ended,
            error: None,
            scope: Some(scope),
        }
    }
}

impl<B> Body for RelayBody<B>
where
    B: Body<Data = Bytes, Error = GatewayError>,
{
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.bytes += data.len() as u64;
                }
                *this.ended = this.inner.is_end_stream();
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                *this.error = Some(e.to_string());
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                *this.ended = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
