//! Well-known namespaces and endpoint identities.

/// Device authentication (binary payloads).
pub const NS_DEVICE_AUTH: &str = "urn:x-cast:com.google.cast.tp.deviceauth";
/// Virtual connection (`CONNECT`) handshake.
pub const NS_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
/// Keepalive `PING` / `PONG`.
pub const NS_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
/// Receiver control: status, launch, stop, volume, availability.
pub const NS_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
/// Media control: load, play, pause, seek, media status.
pub const NS_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// The fixed receiver endpoint on every device.
pub const DEFAULT_RECEIVER_ID: &str = "receiver-0";
/// Source id the device uses when it addresses us generically.
pub const DEFAULT_SENDER_ID: &str = "sender-0";

/// Default TCP port of the control channel.
pub const DEFAULT_PORT: u16 = 8009;

const RESERVED: [&str; 5] = [
    NS_DEVICE_AUTH,
    NS_CONNECTION,
    NS_HEARTBEAT,
    NS_RECEIVER,
    NS_MEDIA,
];

/// Returns `true` for the protocol's own namespaces. Anything else
/// belongs to a receiver application.
pub fn is_reserved_namespace(namespace: &str) -> bool {
    RESERVED.contains(&namespace)
}
