//! Per-session client slot.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Session ID marking a free slot.
pub const SESSION_NONE: &str = "-1";

/// Default watchdog interval: the client must show RTSP activity within
/// this window or the slot is reclaimed (RFC 2326 §12.37 timeout).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// One endpoint attached to a stream.
///
/// A stream carries up to [`MAX_CLIENTS`](crate::stream::MAX_CLIENTS)
/// slots. Slot 0 is the owner — the session that tuned the frontend;
/// the rest are companions sharing the RTP flow. A slot whose session ID
/// is [`SESSION_NONE`] is free.
#[derive(Debug)]
pub struct StreamClient {
    client_id: usize,
    ip: Option<IpAddr>,
    rtp_port: u16,
    rtcp_port: u16,
    session_id: String,
    cseq: u32,
    session_timeout: Duration,
    watchdog_deadline: Option<Instant>,
    can_close: bool,
    self_destruct: bool,
}

impl StreamClient {
    pub fn new(client_id: usize) -> Self {
        Self {
            client_id,
            ip: None,
            rtp_port: 0,
            rtcp_port: 0,
            session_id: SESSION_NONE.to_string(),
            cseq: 0,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            watchdog_deadline: None,
            can_close: false,
            self_destruct: false,
        }
    }

    pub fn client_id(&self) -> usize {
        self.client_id
    }

    pub fn is_free(&self) -> bool {
        self.session_id == SESSION_NONE
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn set_session_id(&mut self, session_id: &str) {
        self.session_id = session_id.to_string();
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn set_remote(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
    }

    pub fn set_rtp_port(&mut self, port: u16) {
        self.rtp_port = port;
    }

    pub fn set_rtcp_port(&mut self, port: u16) {
        self.rtcp_port = port;
    }

    /// RTP destination, once both the remote IP and port are known.
    pub fn rtp_addr(&self) -> Option<SocketAddr> {
        match (self.ip, self.rtp_port) {
            (Some(ip), port) if port != 0 => Some(SocketAddr::new(ip, port)),
            _ => None,
        }
    }

    /// RTCP destination, once both the remote IP and port are known.
    pub fn rtcp_addr(&self) -> Option<SocketAddr> {
        match (self.ip, self.rtcp_port) {
            (Some(ip), port) if port != 0 => Some(SocketAddr::new(ip, port)),
            _ => None,
        }
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn set_cseq(&mut self, cseq: u32) {
        self.cseq = cseq;
    }

    pub fn set_session_timeout(&mut self, timeout: Duration) {
        self.session_timeout = timeout;
    }

    /// Re-arm the watchdog; called on every processed request.
    pub fn restart_watchdog(&mut self) {
        self.watchdog_deadline = Some(Instant::now() + self.session_timeout);
    }

    /// Whether the watchdog deadline has passed. A slot with no armed
    /// watchdog never times out.
    pub fn watchdog_expired(&self) -> bool {
        self.watchdog_deadline
            .is_some_and(|deadline| Instant::now() > deadline)
    }

    /// Whether the last request allows this slot to be closed: the verb
    /// was TEARDOWN, or the request carried no Session header.
    pub fn can_close(&self) -> bool {
        self.can_close
    }

    pub fn set_can_close(&mut self, can_close: bool) {
        self.can_close = can_close;
    }

    /// Flagged by the producer on a send failure; collected by the
    /// controller's next sweep.
    pub fn self_destruct(&self) -> bool {
        self.self_destruct
    }

    pub fn mark_self_destruct(&mut self) {
        self.self_destruct = true;
    }

    /// Release the slot. Graceful teardown came from the client's own
    /// TEARDOWN; non-graceful is the owner cascade, a watchdog timeout,
    /// or a transport failure.
    pub fn teardown(&mut self, graceful: bool) {
        if !self.is_free() {
            tracing::info!(
                client_id = self.client_id,
                session_id = %self.session_id,
                graceful,
                "client slot released"
            );
        }
        self.ip = None;
        self.rtp_port = 0;
        self.rtcp_port = 0;
        self.session_id = SESSION_NONE.to_string();
        self.cseq = 0;
        self.watchdog_deadline = None;
        self.can_close = false;
        self.self_destruct = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_free() {
        let client = StreamClient::new(0);
        assert!(client.is_free());
        assert_eq!(client.session_id(), SESSION_NONE);
        assert!(client.rtp_addr().is_none());
    }

    #[test]
    fn addresses_need_ip_and_port() {
        let mut client = StreamClient::new(1);
        client.set_remote("10.0.0.5".parse().unwrap());
        assert!(client.rtp_addr().is_none());

        client.set_rtp_port(5000);
        client.set_rtcp_port(5001);
        assert_eq!(client.rtp_addr().unwrap().to_string(), "10.0.0.5:5000");
        assert_eq!(client.rtcp_addr().unwrap().to_string(), "10.0.0.5:5001");
    }

    #[test]
    fn unarmed_watchdog_never_expires() {
        let client = StreamClient::new(0);
        assert!(!client.watchdog_expired());
    }

    #[test]
    fn watchdog_expires_after_timeout() {
        let mut client = StreamClient::new(0);
        client.set_session_timeout(Duration::from_millis(1));
        client.restart_watchdog();
        std::thread::sleep(Duration::from_millis(10));
        assert!(client.watchdog_expired());
    }

    #[test]
    fn teardown_frees_the_slot() {
        let mut client = StreamClient::new(2);
        client.set_session_id("ABCD1234");
        client.set_remote("10.0.0.5".parse().unwrap());
        client.set_rtp_port(5000);
        client.mark_self_destruct();

        client.teardown(false);
        assert!(client.is_free());
        assert!(!client.self_destruct());
        assert!(client.rtp_addr().is_none());
    }
}
