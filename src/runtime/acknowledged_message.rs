/// A message type that includes an acknowledgement mechanism.
/// When this is dropped or `acknowledge` is called, the sender will be notified.
#[derive(Debug)]
pub(crate) struct AcknowledgedMessage<M, R = ()> {
    acknowledger: Acknowledgment<R>,
    message: M,
}

impl<M, R> AcknowledgedMessage<M, R> {
    /// Create a new message and return it along with the receiver half that will be notified
    /// when the message is acknowledged or when it is dropped.
    pub(crate) fn package(message: M) -> (Self, AcknowledgmentReceiver<R>) {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        (
            Self {
                message,
                acknowledger: Acknowledgment { sender },
            },
            AcknowledgmentReceiver { receiver },
        )
    }

    /// Split the message from its acknowledgment so the latter can be sent once the message has
    /// been fully handled.
    pub(crate) fn into_parts(self) -> (M, Acknowledgment<R>) {
        (self.message, self.acknowledger)
    }
}

/// The sending half of an acknowledgment.
#[derive(Debug)]
pub(crate) struct Acknowledgment<R> {
    sender: tokio::sync::oneshot::Sender<R>,
}

impl<R> Acknowledgment<R> {
    /// Send acknowledgement to the receiver.
    pub(crate) fn acknowledge(self, result: impl Into<R>) {
        // returns an error when the other end hangs up e.g. because the caller was cancelled.
        let _: std::result::Result<_, _> = self.sender.send(result.into());
    }
}

/// Receiver for the acknowledgement that the message was received or dropped.
pub(crate) struct AcknowledgmentReceiver<R> {
    receiver: tokio::sync::oneshot::Receiver<R>,
}

impl<R> AcknowledgmentReceiver<R> {
    /// Wait for the message to be acknowledged. If this returns None, that means the message
    /// was dropped without the receiving end explicitly sending anything back.
    pub(crate) async fn wait_for_acknowledgment(self) -> Option<R> {
        self.receiver.await.ok()
    }
}
