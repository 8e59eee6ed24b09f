//! Server-to-client notices.
//!
//! Informational text only; clients never parse it.

use crate::connection::ConnectionId;

/// Banner every new connection receives first.
pub const WELCOME_BANNER: &str = "--- Welcome to the example server! ---\n\n";

/// Greeting for a client that connects to an empty server.
pub const SOLITARY_GREETING: &str =
    "Hello! Looks like you are alone here.\nOpen another connection and start typing something…\n";

/// Welcome text queued when `id` connects.
///
/// `alone` selects the solitary greeting over the join notice.
pub fn welcome(id: ConnectionId, alone: bool) -> String {
    if alone {
        format!("{WELCOME_BANNER}{SOLITARY_GREETING}")
    } else {
        format!("{WELCOME_BANNER}{}", joined(id))
    }
}

/// Notice that `id` joined.
pub fn joined(id: ConnectionId) -> String {
    format!("{id} joined\n")
}

/// A chunk of bytes `id` sent, tagged with the sender.
pub fn said(id: ConnectionId, data: &[u8]) -> Vec<u8> {
    let prefix = format!("{id} said: ");
    let mut message = Vec::with_capacity(prefix.len() + data.len() + 1);
    message.extend_from_slice(prefix.as_bytes());
    message.extend_from_slice(data);
    message.push(b'\n');
    message
}

/// Notice that `id` left.
pub fn left(id: ConnectionId) -> String {
    format!("{id} left\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solitary_welcome() {
        let text = welcome(ConnectionId::new(1), true);
        assert_eq!(
            text,
            "--- Welcome to the example server! ---\n\nHello! Looks like you are alone here.\nOpen \
             another connection and start typing something…\n"
        );
    }

    #[test]
    fn joined_welcome() {
        let text = welcome(ConnectionId::new(2), false);
        assert_eq!(text, "--- Welcome to the example server! ---\n\n2 joined\n");
    }

    #[test]
    fn said_keeps_raw_bytes() {
        let message = said(ConnectionId::new(4), b"hello\r\n\xff");
        assert_eq!(message, b"4 said: hello\r\n\xff\n");
    }

    #[test]
    fn left_notice() {
        assert_eq!(left(ConnectionId::new(12)), "12 left\n");
    }
}
