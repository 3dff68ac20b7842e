//! Response body that owns the request's session until the last frame has
//! been handed to the connection.
//!
//! The session closes with its pending reason as soon as the inner body has
//! yielded its final frame. If the connection drops the body before that,
//! the session's own `Drop` records `Disconnected`.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::session::{CloseReason, TransportSession};

pub(crate) struct SessionBody {
    inner: Body,
    session: Option<TransportSession>,
    reason: CloseReason,
}

impl SessionBody {
    pub(crate) fn new(inner: Body, session: TransportSession, reason: CloseReason) -> Self {
        Self {
            inner,
            session: Some(session),
            reason,
        }
    }

    fn finish(&mut self, reason: CloseReason) {
        if let Some(mut session) = self.session.take() {
            session.close(reason);
        }
    }
}

impl HttpBody for SessionBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let reason = this.reason;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish(reason),
            Poll::Ready(None) => this.finish(reason),
            Poll::Ready(Some(Err(_))) => this.finish(CloseReason::Failed),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.session.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Turn `response` into one whose body closes `session` with `reason`
/// after it has been fully written. A response without a body closes the
/// session right away, since the connection never polls an empty body.
pub(crate) fn close_after_body(
    response: impl IntoResponse,
    mut session: TransportSession,
    reason: CloseReason,
) -> Response {
    let response = response.into_response();
    if response.body().is_end_stream() {
        session.close(reason);
        return response;
    }
    response.map(|inner| Body::new(SessionBody::new(inner, session, reason)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use parking_lot::Mutex;

    use super::*;
    use crate::session::SessionObserver;

    #[derive(Default)]
    struct Closes(Mutex<Vec<CloseReason>>);

    impl SessionObserver for Closes {
        fn on_closed(&self, _: &str, reason: CloseReason) {
            self.0.lock().push(reason);
        }
    }

    fn session(closes: &Arc<Closes>) -> TransportSession {
        let mut session = TransportSession::open(Some(closes.clone() as Arc<dyn SessionObserver>));
        session.activate(None).unwrap();
        session
    }

    async fn next_frame(body: &mut SessionBody) -> Option<Result<Frame<Bytes>, axum::Error>> {
        std::future::poll_fn(|cx| Pin::new(&mut *body).poll_frame(cx)).await
    }

    #[tokio::test]
    async fn session_closes_when_last_frame_is_handed_over() {
        let closes = Arc::new(Closes::default());
        let mut body = SessionBody::new(Body::from("payload"), session(&closes), CloseReason::Completed);
        assert!(!body.is_end_stream());
        assert!(closes.0.lock().is_empty());

        let frame = next_frame(&mut body).await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from("payload"));
        assert_eq!(closes.0.lock().as_slice(), &[CloseReason::Completed]);
        assert!(body.is_end_stream());

        assert!(next_frame(&mut body).await.is_none());
        drop(body);
        assert_eq!(closes.0.lock().len(), 1);
    }

    #[test]
    fn bodiless_response_closes_immediately() {
        let closes = Arc::new(Closes::default());
        let response = close_after_body(StatusCode::ACCEPTED, session(&closes), CloseReason::Failed);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(closes.0.lock().as_slice(), &[CloseReason::Failed]);
        drop(response);
        assert_eq!(closes.0.lock().len(), 1);
    }

    #[test]
    fn body_dropped_before_end_is_a_disconnect() {
        let closes = Arc::new(Closes::default());
        let response = close_after_body(
            (StatusCode::OK, "unsent"),
            session(&closes),
            CloseReason::Completed,
        );
        assert!(closes.0.lock().is_empty(), "closed before the body was written");
        drop(response);
        assert_eq!(closes.0.lock().as_slice(), &[CloseReason::Disconnected]);
    }
}
