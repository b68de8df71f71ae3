use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream;
use std::{convert::Infallible, time::Duration};
use tokio_stream::StreamExt;
use tracing::debug;

use crate::api::AppState;
use crate::broker::{self, Subscription};

/// Long-lived event stream; one `update` event per applied reading.
///
/// The subscription lives inside the stream, so a closed connection drops it
/// and the broker forgets the subscriber.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.pipeline.broker().subscribe();
    debug!(id = %subscription.id(), "event stream opened");

    let events = stream::unfold(subscription, |mut sub: Subscription| async move {
        let ev = sub.recv().await?;
        Some((ev, sub))
    })
    .map(|ev| Ok(to_sse_event(&ev)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

/// Same wire form as `broker::Event::to_sse`: `event:` line first, then `data:`.
fn to_sse_event(ev: &broker::Event) -> Event {
    let event = match &ev.name {
        Some(name) => Event::default().event(name.as_str()),
        None => Event::default(),
    };
    event.data(ev.data.as_str())
}
