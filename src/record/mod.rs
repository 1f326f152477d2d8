//! Record layer: framing, protection, and cipher-state promotion.
//!
//! Outgoing data is fragmented, sealed under the active write state, and
//! buffered until the transport accepts it. Incoming bytes are reassembled
//! into records, opened under the active read state, and surfaced as
//! [`RecvEvent`]s. Handshake messages may span record boundaries, so they
//! are reassembled through a separate handshake buffer before delivery.

pub(crate) mod cipher;

use std::io;

use rand_core::OsRng;

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::error::Violation;
use crate::msgs::content_type;
use crate::version::Version;

use self::cipher::{PendingStates, ReadState, WriteState};

/// Largest outgoing plaintext fragment.
pub(crate) const MAX_FRAGMENT: usize = 16384;

/// Largest acceptable incoming record payload: a full fragment plus
/// generous room for MAC, IV, and padding.
const MAX_INCOMING: usize = 18432;

const RECV_CHUNK: usize = 8192;

/// One unit of peer traffic delivered to the handshake or data plane. A
/// handshake event carries the complete message, header included.
#[derive(Debug)]
pub(crate) enum RecvEvent {
    Handshake(u8, Vec<u8>),
    ChangeCipherSpec,
    Alert(AlertLevel, AlertDescription),
    AppData(Vec<u8>),
}

/// Failure inside the record layer, before error policy is applied.
#[derive(Debug)]
pub(crate) enum RecordFailure {
    Violation(Violation),
    Io(io::Error),
    /// Transport closed mid-record with no close_notify.
    AbruptClose,
}

impl From<Violation> for RecordFailure {
    fn from(v: Violation) -> Self {
        RecordFailure::Violation(v)
    }
}

impl From<io::Error> for RecordFailure {
    fn from(e: io::Error) -> Self {
        RecordFailure::Io(e)
    }
}

enum Step {
    Event(RecvEvent),
    Consumed,
    NeedData,
}

pub(crate) struct RecordLayer<T> {
    transport: T,
    /// Record-header version for outgoing records and MAC computation.
    pub version: Version,
    write: WriteState,
    read: ReadState,
    pending_write: Option<WriteState>,
    pending_read: Option<ReadState>,
    send_buf: Vec<u8>,
    send_pos: usize,
    raw_in: Vec<u8>,
    hs_buf: Vec<u8>,
    corrupt_mac: bool,
    corrupt_padding: bool,
}

impl<T: crate::transport::Transport> RecordLayer<T> {
    pub fn new(transport: T) -> Self {
        RecordLayer {
            transport,
            version: Version::TLS10,
            write: WriteState::plaintext(),
            read: ReadState::plaintext(),
            pending_write: None,
            pending_read: None,
            send_buf: Vec::new(),
            send_pos: 0,
            raw_in: Vec::new(),
            hs_buf: Vec::new(),
            corrupt_mac: false,
            corrupt_padding: false,
        }
    }

    /// Seal `payload` as records of `content_type` onto the send buffer.
    /// An empty payload still produces one (empty) record.
    pub fn queue(&mut self, content_type: u8, payload: &[u8]) {
        let mut rest = payload;
        loop {
            let take = rest.len().min(MAX_FRAGMENT);
            let record = self.write.seal(content_type, self.version, &rest[..take]);
            self.send_buf.extend_from_slice(&record);
            rest = &rest[take..];
            if rest.is_empty() {
                break;
            }
        }
    }

    pub fn queue_alert(&mut self, alert: Alert) {
        self.queue(content_type::ALERT, &alert.encode());
    }

    /// Push buffered records to the transport. `Ok(false)` means the
    /// transport would block with bytes still queued.
    pub fn flush(&mut self) -> Result<bool, RecordFailure> {
        while self.send_pos < self.send_buf.len() {
            match self.transport.send(&self.send_buf[self.send_pos..]) {
                Ok(0) => {
                    return Err(RecordFailure::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    )))
                }
                Ok(n) => self.send_pos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RecordFailure::Io(e)),
            }
        }
        self.send_buf.clear();
        self.send_pos = 0;
        Ok(true)
    }

    pub fn wants_write(&self) -> bool {
        self.send_pos < self.send_buf.len()
    }

    /// Deliver the next event, reading from the transport as needed.
    /// `Ok(None)` means the transport would block.
    pub fn recv_event(&mut self) -> Result<Option<RecvEvent>, RecordFailure> {
        loop {
            if let Some(ev) = self.take_handshake_message() {
                return Ok(Some(ev));
            }
            match self.take_record()? {
                Step::Event(ev) => return Ok(Some(ev)),
                Step::Consumed => continue,
                Step::NeedData => {}
            }
            let mut scratch = [0u8; RECV_CHUNK];
            match self.transport.recv(&mut scratch) {
                Ok(0) => return Err(RecordFailure::AbruptClose),
                Ok(n) => self.raw_in.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RecordFailure::Io(e)),
            }
        }
    }

    fn take_handshake_message(&mut self) -> Option<RecvEvent> {
        if self.hs_buf.len() < 4 {
            return None;
        }
        let typ = self.hs_buf[0];
        let len = ((self.hs_buf[1] as usize) << 16)
            | ((self.hs_buf[2] as usize) << 8)
            | self.hs_buf[3] as usize;
        if self.hs_buf.len() < 4 + len {
            return None;
        }
        let message: Vec<u8> = self.hs_buf.drain(..4 + len).collect();
        Some(RecvEvent::Handshake(typ, message))
    }

    fn take_record(&mut self) -> Result<Step, RecordFailure> {
        if self.raw_in.len() < 5 {
            return Ok(Step::NeedData);
        }
        let typ = self.raw_in[0];
        // the header's version bytes are not validated; some stacks echo
        // odd values there
        let len = u16::from_be_bytes([self.raw_in[3], self.raw_in[4]]) as usize;
        if len > MAX_INCOMING {
            return Err(Violation::new(
                AlertDescription::RecordOverflow,
                "record payload too large",
            )
            .into());
        }
        if self.raw_in.len() < 5 + len {
            return Ok(Step::NeedData);
        }
        let payload: Vec<u8> = self.raw_in.drain(..5 + len).skip(5).collect();
        let data = self.read.open(typ, self.version, &payload)?;

        match typ {
            content_type::HANDSHAKE => {
                self.hs_buf.extend_from_slice(&data);
                Ok(Step::Consumed)
            }
            content_type::CHANGE_CIPHER_SPEC => {
                if data != [1] {
                    return Err(Violation::new(
                        AlertDescription::DecodeError,
                        "malformed ChangeCipherSpec",
                    )
                    .into());
                }
                Ok(Step::Event(RecvEvent::ChangeCipherSpec))
            }
            content_type::ALERT => {
                let alert = Alert::decode(&data).map_err(|_| {
                    Violation::new(AlertDescription::DecodeError, "malformed alert")
                })?;
                Ok(Step::Event(RecvEvent::Alert(alert.level, alert.description)))
            }
            content_type::APPLICATION_DATA => {
                if data.is_empty() {
                    Ok(Step::Consumed)
                } else {
                    Ok(Step::Event(RecvEvent::AppData(data)))
                }
            }
            _ => Err(Violation::new(
                AlertDescription::UnexpectedMessage,
                "unknown record type",
            )
            .into()),
        }
    }

    /// Derive the pending cipher states for `cipher_suite`. Each direction
    /// is promoted separately when its ChangeCipherSpec is sent or seen.
    pub fn calc_pending(
        &mut self,
        cipher_suite: u16,
        master: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        is_client: bool,
    ) -> Result<(), Violation> {
        let PendingStates { mut write, read } = cipher::pending_states(
            cipher_suite,
            master,
            client_random,
            server_random,
            self.version,
            is_client,
            &mut OsRng,
        )?;
        write.corrupt_mac = self.corrupt_mac;
        write.corrupt_padding = self.corrupt_padding;
        self.pending_write = Some(write);
        self.pending_read = Some(read);
        Ok(())
    }

    pub fn promote_write(&mut self) -> Result<(), Violation> {
        self.write = self
            .pending_write
            .take()
            .ok_or(Violation::internal("no pending write state"))?;
        Ok(())
    }

    pub fn promote_read(&mut self) -> Result<(), Violation> {
        self.read = self
            .pending_read
            .take()
            .ok_or(Violation::internal("no pending read state"))?;
        Ok(())
    }

    /// Whether application writes need the empty-fragment countermeasure
    /// against chosen-plaintext attacks on chained CBC IVs.
    pub fn needs_empty_fragment(&self) -> bool {
        self.version == Version::TLS10 && self.write.active() && self.write.is_block()
    }

    pub fn set_fault_flags(&mut self, corrupt_mac: bool, corrupt_padding: bool) {
        self.corrupt_mac = corrupt_mac;
        self.corrupt_padding = corrupt_padding;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Loopback transport fed by hand.
    #[derive(Default)]
    struct Loopback {
        incoming: VecDeque<u8>,
        outgoing: Vec<u8>,
    }

    impl crate::transport::Transport for Loopback {
        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outgoing.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.incoming.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
            }
            let n = buf.len().min(self.incoming.len());
            for b in buf.iter_mut().take(n) {
                *b = self.incoming.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    fn layer() -> RecordLayer<Loopback> {
        RecordLayer::new(Loopback::default())
    }

    #[test]
    fn large_writes_are_fragmented() {
        let mut rl = layer();
        rl.queue(content_type::APPLICATION_DATA, &vec![7u8; MAX_FRAGMENT + 1]);
        assert!(rl.flush().unwrap());
        let out = &rl.transport.outgoing;
        // two records: a full fragment and a single byte
        assert_eq!(out.len(), 5 + MAX_FRAGMENT + 5 + 1);
        let second = &out[5 + MAX_FRAGMENT..];
        assert_eq!(u16::from_be_bytes([second[3], second[4]]), 1);
    }

    #[test]
    fn handshake_message_spanning_records_is_reassembled() {
        let mut rl = layer();
        // a 6-byte Finished-shaped message split across two records
        let msg = [20u8, 0, 0, 2, 0xaa, 0xbb];
        for half in [&msg[..3], &msg[3..]] {
            rl.transport.incoming.push_back(content_type::HANDSHAKE);
            rl.transport.incoming.extend([3, 1]);
            rl.transport.incoming.extend((half.len() as u16).to_be_bytes());
            rl.transport.incoming.extend(half.iter().copied());
        }
        let ev = rl.recv_event().unwrap().unwrap();
        let RecvEvent::Handshake(typ, message) = ev else {
            panic!("expected a handshake event");
        };
        assert_eq!(typ, 20);
        assert_eq!(message, msg);
    }

    #[test]
    fn oversized_record_is_an_overflow() {
        let mut rl = layer();
        rl.transport.incoming.push_back(content_type::HANDSHAKE);
        rl.transport.incoming.extend([3, 1]);
        rl.transport.incoming.extend(((MAX_INCOMING as u16) + 1).to_be_bytes());
        let err = rl.recv_event().unwrap_err();
        let RecordFailure::Violation(v) = err else {
            panic!("expected a violation");
        };
        assert_eq!(v.alert, AlertDescription::RecordOverflow);
    }

    #[test]
    fn abrupt_close_is_detected() {
        struct Closed;
        impl crate::transport::Transport for Closed {
            fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }
            fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        let mut rl = RecordLayer::new(Closed);
        assert!(matches!(
            rl.recv_event(),
            Err(RecordFailure::AbruptClose)
        ));
    }

    #[test]
    fn empty_app_data_records_are_skipped() {
        let mut rl = layer();
        rl.transport
            .incoming
            .extend([content_type::APPLICATION_DATA, 3, 1, 0, 0]);
        assert!(rl.recv_event().unwrap().is_none());
    }
}
