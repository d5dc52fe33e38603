//! Reexports `crossbeam_channel` so the rest of the workspace depends on one
//! name, plus a small `Request`/`call` helper for request-response traffic
//! over a channel (the watcher's control surface is built on this).

pub use crossbeam_channel as channel;
pub use crossbeam_channel::{Receiver, RecvError, Sender, TryRecvError};

const ONESHOT_CHANNEL_SIZE: usize = 1;

/// A request carrying its own one-shot response channel, so a scheduler loop
/// can treat "someone wants an answer" the same as any other message on its
/// input channel instead of needing a side-channel callback.
pub struct Request<A, R> {
    pub responder: Sender<R>,
    pub arguments: A,
}

impl<A, R> Request<A, R> {
    /// Send `arguments` to `sender` and block for the response. Returns
    /// `None` if the receiving end was dropped without responding.
    pub fn call(sender: &Sender<Request<A, R>>, arguments: A) -> Option<R> {
        let (responder, response) = crossbeam_channel::bounded(ONESHOT_CHANNEL_SIZE);
        sender
            .send(Request {
                responder,
                arguments,
            })
            .ok()?;
        response.recv().ok()
    }
}
