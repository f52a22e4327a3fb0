//! ALPN-selected connection factories (spec component C4): which upper-layer
//! handler owns a stream endpoint is decided once, at creation time, by the
//! protocol the transport negotiated over ALPN.

use std::sync::Arc;

use super::endpoint::StreamEndpoint;

/// One upper-layer protocol handler a session can hand newly created stream
/// endpoints to. `protocol()` is matched case-sensitively against whatever
/// `QuicTransport::alpn_protocol` reports (e.g. `"h3"`).
pub trait ConnectionFactory: Send + Sync {
    fn protocol(&self) -> &str;
    fn on_stream_created(&self, endpoint: &Arc<StreamEndpoint>);
}

/// Picks the factory whose `protocol()` matches `alpn`, if any.
pub fn select_factory<'a>(
    factories: &'a [Arc<dyn ConnectionFactory>],
    alpn: Option<&str>,
) -> Option<&'a Arc<dyn ConnectionFactory>> {
    let alpn = alpn?;
    factories.iter().find(|f| f.protocol() == alpn)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);
    impl ConnectionFactory for Noop {
        fn protocol(&self) -> &str {
            self.0
        }
        fn on_stream_created(&self, _endpoint: &Arc<StreamEndpoint>) {}
    }

    #[test]
    fn selects_matching_protocol() {
        let factories: Vec<Arc<dyn ConnectionFactory>> = vec![Arc::new(Noop("h3")), Arc::new(Noop("h3-29"))];
        let selected = select_factory(&factories, Some("h3-29"));
        assert_eq!(selected.unwrap().protocol(), "h3-29");
    }

    #[test]
    fn no_match_or_no_alpn_returns_none() {
        let factories: Vec<Arc<dyn ConnectionFactory>> = vec![Arc::new(Noop("h3"))];
        assert!(select_factory(&factories, Some("spdy")).is_none());
        assert!(select_factory(&factories, None).is_none());
    }
}
