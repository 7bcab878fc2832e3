//! Spans that tag log lines with the router or destination they belong to
//!
//! Several routers can run in one process (tests, local test networks).
//! Entering a router span makes every event below it carry the router's
//! short id in the JSONL output.

use sable_core::IdentHash;
use tracing::{Span, info_span};

/// Span for work done on behalf of a router
pub fn router_span(router: &IdentHash) -> Span {
    info_span!("router", router = %router.short_id())
}

/// Span for work done on behalf of a local destination
pub fn session_span(destination: &IdentHash) -> Span {
    info_span!("session", destination = %destination.short_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_nest() {
        let _router = router_span(&IdentHash::new([1; 32])).entered();
        let _session = session_span(&IdentHash::new([2; 32])).entered();
        tracing::warn!("inside both spans");
    }
}
