//! Wire framing for [`Message`] over a [`Transport`](crate::transport::Transport).
//!
//! `Transport` only knows about opaque frames (`Bytes` in, `Bytes` out); the
//! Connection is what understands `Kind`/`CorrelationId`, so it is the
//! Connection's job to fold that metadata into the bytes it hands to
//! `Transport::send` and unfold it back out of whatever `Transport::recv`
//! returns.
//!
//! Encoding: `[kind: u8][has_id: u8][id: u64 LE if has_id][payload...]`.
//! Deliberately not a general-purpose codec — real deployments plug in
//! whatever wire format their websocket/long-poll library speaks; this one
//! only needs to be self-consistent between `encode`/`decode`.

use bytes::Bytes;

use crate::message::{CorrelationId, Kind, Message};

pub fn encode(msg: &Message) -> Bytes {
    let mut buf = Vec::with_capacity(10 + msg.payload.len());
    buf.push(match msg.kind {
        Kind::Async => 0,
        Kind::Request => 1,
        Kind::Response => 2,
    });
    match msg.id {
        Some(id) => {
            buf.push(1);
            buf.extend_from_slice(&id.to_le_bytes());
        }
        None => buf.push(0),
    }
    buf.extend_from_slice(&msg.payload);
    Bytes::from(buf)
}

pub fn decode(raw: &Bytes) -> Option<Message> {
    let kind = match *raw.first()? {
        0 => Kind::Async,
        1 => Kind::Request,
        2 => Kind::Response,
        _ => return None,
    };
    let has_id = *raw.get(1)?;
    let (id, payload): (Option<CorrelationId>, Bytes) = if has_id == 1 {
        let id_bytes: [u8; 8] = raw.get(2..10)?.try_into().ok()?;
        (Some(u64::from_le_bytes(id_bytes)), raw.slice(10..))
    } else {
        (None, raw.slice(2..))
    };
    Some(Message {
        kind,
        id,
        payload,
        ts: std::time::Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_kinds() {
        let cases = [
            Message::new_async(Bytes::from_static(b"ping")),
            Message::new_request(7, Bytes::from_static(b"hello")),
            Message::new_response(7, Bytes::from_static(b"world")),
        ];
        for msg in cases {
            let encoded = encode(&msg);
            let decoded = decode(&encoded).expect("decodes");
            assert_eq!(decoded.kind, msg.kind);
            assert_eq!(decoded.id, msg.id);
            assert_eq!(decoded.payload, msg.payload);
        }
    }
}
