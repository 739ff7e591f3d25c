//! Typed control messages.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::coord::{BundleAddress, BundleFingerprint};

use super::{Message, ProtocolError, ENQUEUE_TYPE};

/// Default request id prefix. Ids starting with `n` are reserved for the
/// tile server on a shared Tirex master.
pub const DEFAULT_ID_PREFIX: &str = "nodets";

/// Generates request ids unique within the process.
///
/// Ids have the form `{prefix}-{pid}-{counter}`. The `{prefix}-{pid}-` part
/// is the tag used to recognise replies addressed to this process.
#[derive(Debug)]
pub struct RequestIdGenerator {
    tag: String,
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a generator tagged with `prefix` and the current process id.
    pub fn new(prefix: &str) -> Self {
        Self::with_tag(format!("{}-{}-", prefix, std::process::id()))
    }

    /// Creates a generator with an explicit tag.
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.tag, n)
    }

    /// Whether `id` was issued by this generator's process.
    pub fn is_own(&self, id: &str) -> bool {
        id.starts_with(&self.tag)
    }
}

/// Request to render one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub id: String,
    pub prio: u8,
    /// Bundle origin, never the requested tile's own coordinates
    pub bundle: BundleAddress,
}

impl EnqueueRequest {
    pub fn new(id: impl Into<String>, prio: u8, bundle: BundleAddress) -> Self {
        Self {
            id: id.into(),
            prio,
            bundle,
        }
    }

    pub fn fingerprint(&self) -> BundleFingerprint {
        self.bundle.fingerprint()
    }

    pub fn to_message(&self) -> Message {
        Message::new()
            .with("id", &self.id)
            .with("type", ENQUEUE_TYPE)
            .with("prio", self.prio)
            .with("map", &self.bundle.map)
            .with("x", self.bundle.x)
            .with("y", self.bundle.y)
            .with("z", self.bundle.zoom)
    }

    pub fn encode(&self) -> String {
        self.to_message().encode()
    }
}

/// Notice from the renderer that a bundle request has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionNotice {
    pub id: String,
    pub bundle: BundleAddress,
    /// `result` field, `ok` or `error` when the master sets it
    pub result: Option<String>,
    pub errmsg: Option<String>,
}

impl CompletionNotice {
    /// Decodes a datagram.
    ///
    /// # Errors
    ///
    /// Fails if the datagram is not UTF-8, or if `id`, `map`, `x`, `y` or `z`
    /// is missing or not numeric where required.
    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_message(&Message::parse(datagram)?)
    }

    /// A `type` field, when present, must name an enqueue request.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        if let Some(kind) = msg.get("type") {
            if kind != ENQUEUE_TYPE {
                return Err(ProtocolError::WrongType(kind.to_string()));
            }
        }
        let id = msg.require("id")?.to_string();
        let map = msg.require("map")?.to_string();
        let x: u32 = msg.require_number("x")?;
        let y: u32 = msg.require_number("y")?;
        let zoom: u8 = msg.require_number("z")?;

        Ok(Self {
            id,
            bundle: BundleAddress::containing(map, zoom, x, y),
            result: msg.get("result").map(str::to_string),
            errmsg: msg.get("errmsg").map(str::to_string),
        })
    }

    pub fn fingerprint(&self) -> BundleFingerprint {
        self.bundle.fingerprint()
    }

    /// Whether the renderer reported a failure.
    pub fn is_error(&self) -> bool {
        self.result.as_deref() == Some("error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generator_is_unique_and_tagged() {
        let ids = RequestIdGenerator::with_tag("nodets-1-");
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a, "nodets-1-1");
        assert_eq!(b, "nodets-1-2");
        assert!(ids.is_own(&a));
        assert!(!ids.is_own("nodets-2-1"));
        assert!(!ids.is_own("tirex-1"));
    }

    #[test]
    fn test_id_generator_new_embeds_pid() {
        let ids = RequestIdGenerator::new(DEFAULT_ID_PREFIX);
        assert!(ids.tag().starts_with('n'));
        assert!(ids.tag().contains(&std::process::id().to_string()));
        assert!(ids.is_own(&ids.next_id()));
    }

    #[test]
    fn test_enqueue_wire_format() {
        let request = EnqueueRequest::new(
            "nodets-1-7",
            8,
            BundleAddress::containing("osm", 10, 13, 5),
        );
        assert_eq!(
            request.encode(),
            "id=nodets-1-7\ntype=metatile_enqueue_request\nprio=8\nmap=osm\nx=8\ny=0\nz=10\n"
        );
        assert_eq!(request.fingerprint().as_str(), "osm/10/8/0");
    }

    #[test]
    fn test_decode_completion() {
        let notice = CompletionNotice::decode(
            b"id=nodets-1-7\ntype=metatile_enqueue_request\nresult=ok\nmap=osm\nx=8\ny=0\nz=10\n",
        )
        .unwrap();
        assert_eq!(notice.id, "nodets-1-7");
        assert_eq!(notice.bundle, BundleAddress::containing("osm", 10, 8, 0));
        assert_eq!(notice.fingerprint().as_str(), "osm/10/8/0");
        assert!(!notice.is_error());
    }

    #[test]
    fn test_decode_error_result() {
        let notice = CompletionNotice::decode(
            b"id=n1\nresult=error\nerrmsg=renderer internal error\nmap=osm\nx=0\ny=0\nz=3\n",
        )
        .unwrap();
        assert!(notice.is_error());
        assert_eq!(notice.errmsg.as_deref(), Some("renderer internal error"));
    }

    #[test]
    fn test_decode_missing_field() {
        for missing in ["id", "map", "x", "y", "z"] {
            let text: String = [("id", "n1"), ("map", "osm"), ("x", "0"), ("y", "0"), ("z", "3")]
                .iter()
                .filter(|(k, _)| *k != missing)
                .map(|(k, v)| format!("{}={}\n", k, v))
                .collect();
            let err = CompletionNotice::decode(text.as_bytes()).unwrap_err();
            assert_eq!(err, ProtocolError::MissingField(missing));
        }
    }

    #[test]
    fn test_decode_rejects_other_message_types() {
        let err = CompletionNotice::decode(b"id=n1\ntype=metatile_render_request\nmap=osm\nx=0\ny=0\nz=3\n")
            .unwrap_err();
        assert_eq!(err, ProtocolError::WrongType("metatile_render_request".to_string()));
    }

    #[test]
    fn test_decode_rejects_negative_coordinates() {
        let err = CompletionNotice::decode(b"id=n1\nmap=osm\nx=-8\ny=0\nz=3\n").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidNumber { field: "x", .. }));
    }

    #[test]
    fn test_enqueue_then_decode_as_completion() {
        // The master echoes the request fields back in its reply
        let request = EnqueueRequest::new("n-5", 8, BundleAddress::containing("topo", 12, 100, 200));
        let notice = CompletionNotice::decode(request.encode().as_bytes()).unwrap();
        assert_eq!(notice.fingerprint(), request.fingerprint());
        assert_eq!(notice.id, request.id);
    }
}
