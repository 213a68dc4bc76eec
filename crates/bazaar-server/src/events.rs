//! Server-Sent Events bridge for notifier subscriptions.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use tokio::sync::mpsc::UnboundedReceiver;

use bazaar_chat::{Notifier, Subscription, Update};
use bazaar_shared::types::SubscriptionId;

/// Unsubscribes when the client goes away and the stream is dropped.
struct Teardown {
    id: SubscriptionId,
    notifier: Arc<Notifier>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.notifier.unsubscribe(self.id);
    }
}

fn event_name(update: &Update) -> &'static str {
    match update {
        Update::Chat { .. } => "chat",
        Update::Message { .. } => "message",
        Update::Typing { .. } => "typing",
        Update::Unread { .. } => "unread",
        Update::Presence { .. } => "presence",
    }
}

fn to_event(update: &Update) -> Event {
    Event::default()
        .event(event_name(update))
        .json_data(update)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Dropping unserializable update");
            Event::default().comment("unserializable update")
        })
}

/// Turn a subscription into an SSE response.
pub fn stream(
    subscription: Subscription,
    notifier: Arc<Notifier>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let teardown = Teardown {
        id: subscription.id,
        notifier,
    };
    let state: (UnboundedReceiver<Update>, Teardown) = (subscription.updates, teardown);

    let events = stream::unfold(state, |(mut updates, teardown)| async move {
        let update = updates.recv().await?;
        Some((Ok(to_event(&update)), (updates, teardown)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
