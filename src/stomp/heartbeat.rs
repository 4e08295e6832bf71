use std::time::Duration;

use super::StompError;

/// The `heart-beat:cx,cy` header: `send_ms` is how often this side can send,
/// `recv_ms` how often it wants to receive. Zero disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub send_ms: u64,
    pub recv_ms: u64,
}

/// Intervals agreed for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// How often this side must emit a heart-beat.
    pub outgoing: Option<Duration>,
    /// How long this side may go without hearing from the peer.
    pub incoming: Option<Duration>,
}

impl HeartBeat {
    pub fn new(send_ms: u64, recv_ms: u64) -> Self {
        Self { send_ms, recv_ms }
    }

    pub fn parse(value: &str) -> Result<Self, StompError> {
        let (send, recv) = value
            .split_once(',')
            .ok_or_else(|| StompError::BadHeartBeat(value.to_string()))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| StompError::BadHeartBeat(value.to_string()))
        };
        Ok(Self {
            send_ms: parse(send)?,
            recv_ms: parse(recv)?,
        })
    }

    pub fn to_header(&self) -> String {
        format!("{},{}", self.send_ms, self.recv_ms)
    }

    /// Combine the local setting with what the peer advertised.
    pub fn negotiate(&self, remote: HeartBeat) -> Negotiated {
        let outgoing = (self.send_ms > 0 && remote.recv_ms > 0)
            .then(|| Duration::from_millis(self.send_ms.max(remote.recv_ms)));
        let incoming = (self.recv_ms > 0 && remote.send_ms > 0)
            .then(|| Duration::from_millis(self.recv_ms.max(remote.send_ms)));
        Negotiated { outgoing, incoming }
    }
}
