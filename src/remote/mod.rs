/// Remote data servers.
///
/// ```text
///   RemoteFileRetriever ─┐
///                        ├─► ProtocolClient ──TCP──► server
///   LiveRetriever ───────┘    (handshake, reconnect)
/// ```

pub mod client;
pub mod protocol;
pub mod retriever;
