use tracing::{debug, info};

use super::host::{BufferInstance, FilterCallbacks, FilterStatus, LocalReply};

/// Byte written over a suppressed response body.
pub const FILLER_BYTE: u8 = 0x00;

/// Malformed input or a body over its size limit.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Rule block.
pub const STATUS_FORBIDDEN: u16 = 403;

/// How a stream was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    /// A local reply with this status replaced the exchange.
    Blocked(u16),
    /// Response headers were already out; the body was overwritten.
    Suppressed,
}

/// Turns verdicts into host actions and latches the first one.
///
/// At most one local reply is ever sent per stream.
#[derive(Debug, Default)]
pub struct ReplyBridge {
    latch: Option<Latch>,
}

impl ReplyBridge {
    pub fn new() -> Self {
        ReplyBridge::default()
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.latch.is_some()
    }

    pub fn latch(&self) -> Option<Latch> {
        self.latch
    }

    /// Send a local reply, unless the stream is already interrupted.
    pub fn block<C: FilterCallbacks + ?Sized>(
        &mut self,
        callbacks: &C,
        reply: LocalReply,
    ) -> FilterStatus {
        if let Some(latch) = self.latch {
            debug!(?latch, "Interruption already handled");
            return FilterStatus::LocalReply;
        }

        info!(status = reply.status, details = %reply.details, "Sending local reply");
        self.latch = Some(Latch::Blocked(reply.status));
        callbacks.send_local_reply(reply);
        FilterStatus::LocalReply
    }

    /// Overwrite the body with filler of the same length and let it through.
    ///
    /// Once suppressed, every later chunk of the stream is overwritten too.
    /// A stream that already sent a local reply is left alone.
    pub fn suppress<B: BufferInstance + ?Sized>(&mut self, buffer: &mut B) -> FilterStatus {
        match self.latch {
            Some(Latch::Blocked(_)) => return FilterStatus::Continue,
            Some(Latch::Suppressed) => {}
            None => {
                info!(
                    bytes = buffer.len(),
                    "Response body suppressed after headers were forwarded"
                );
                self.latch = Some(Latch::Suppressed);
            }
        }

        let filler = vec![FILLER_BYTE; buffer.len()];
        buffer.set(&filler);
        FilterStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Replies(Mutex<Vec<LocalReply>>);

    impl FilterCallbacks for Replies {
        fn downstream_remote_address(&self) -> String {
            "10.0.0.1:1000".to_string()
        }

        fn downstream_local_address(&self) -> String {
            "10.0.0.2:80".to_string()
        }

        fn response_code(&self) -> Option<u16> {
            None
        }

        fn send_local_reply(&self, reply: LocalReply) {
            self.0.lock().push(reply);
        }
    }

    #[test]
    fn test_block_sends_one_reply() {
        let callbacks = Replies::default();
        let mut bridge = ReplyBridge::new();

        let first = LocalReply::new(STATUS_FORBIDDEN, "rule").with_body("blocked");
        assert_eq!(bridge.block(&callbacks, first), FilterStatus::LocalReply);
        let second = LocalReply::new(STATUS_BAD_REQUEST, "again");
        assert_eq!(bridge.block(&callbacks, second), FilterStatus::LocalReply);

        let replies = callbacks.0.lock();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].status, STATUS_FORBIDDEN);
        assert_eq!(replies[0].body, "blocked");
        assert_eq!(bridge.latch(), Some(Latch::Blocked(STATUS_FORBIDDEN)));
    }

    #[test]
    fn test_suppress_preserves_length() {
        let mut bridge = ReplyBridge::new();
        let mut body = b"card=4111111111111111".to_vec();

        assert_eq!(bridge.suppress(&mut body), FilterStatus::Continue);

        assert_eq!(body.len(), 21);
        assert!(body.iter().all(|b| *b == FILLER_BYTE));
        assert!(bridge.is_interrupted());
        assert_eq!(bridge.latch(), Some(Latch::Suppressed));
    }

    #[test]
    fn test_no_reply_after_suppression() {
        let callbacks = Replies::default();
        let mut bridge = ReplyBridge::new();
        let mut body = b"x".to_vec();

        bridge.suppress(&mut body);
        bridge.block(&callbacks, LocalReply::new(STATUS_FORBIDDEN, "late"));

        assert!(callbacks.0.lock().is_empty());
    }

    #[test]
    fn test_suppression_covers_later_chunks() {
        let mut bridge = ReplyBridge::new();
        let mut first = b"secret-part-1".to_vec();
        let mut second = b"secret-part-2".to_vec();

        bridge.suppress(&mut first);
        assert_eq!(bridge.suppress(&mut second), FilterStatus::Continue);

        assert_eq!(second, vec![FILLER_BYTE; 13]);
        assert_eq!(bridge.latch(), Some(Latch::Suppressed));
    }

    #[test]
    fn test_suppress_leaves_local_reply_alone() {
        let callbacks = Replies::default();
        let mut bridge = ReplyBridge::new();
        bridge.block(&callbacks, LocalReply::new(STATUS_FORBIDDEN, "rule"));

        let mut body = b"forbidden".to_vec();
        assert_eq!(bridge.suppress(&mut body), FilterStatus::Continue);
        assert_eq!(body, b"forbidden");
    }
}
