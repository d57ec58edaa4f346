//! Transport abstraction and the authenticated message channel.
//!
//! A [`Transport`] moves opaque frames reliably and in order; how is its own business.
//! [`AuthenticatedChannel`] wraps one and is the only way protocol messages are sent or
//! received. Frames are `{ seq, pad_offset, payload, tag }`; a receiver checks sequence
//! number and pad offset against its own state, then the tag, and only then decodes
//! the payload.

use std::ops::Range;
use std::sync::mpsc::{self, Receiver, Sender};

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthKeyBuffer, WegmanCarter};
use crate::bits::BitString;
use crate::error::AbortReason;
use crate::message::Message;
use crate::{Error, Result};

/// Reliable, ordered, bidirectional frame transport.
pub trait Transport {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<()>;
    fn recv_frame(&mut self) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        (**self).send_frame(frame)
    }

    fn recv_frame(&mut self) -> Result<Vec<u8>> {
        (**self).recv_frame()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        (**self).send_frame(frame)
    }

    fn recv_frame(&mut self) -> Result<Vec<u8>> {
        (**self).recv_frame()
    }
}

/// In-process transport; one end per party.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

impl Transport for MemoryTransport {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::Channel("peer hung up".into()))
    }

    fn recv_frame(&mut self) -> Result<Vec<u8>> {
        self.rx
            .recv()
            .map_err(|_| Error::Channel("peer hung up".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    seq: u64,
    pad_offset: u64,
    payload: Vec<u8>,
    tag: BitString,
}

/// Wegman–Carter authenticated message channel for one session.
///
/// Borrows the party's [`AuthKeyBuffer`] for the session: opening pops the matrix seed,
/// every send and every receive pops one tag-length pad.
pub struct AuthenticatedChannel<'a, T> {
    transport: &'a mut T,
    buffer: &'a mut AuthKeyBuffer,
    mac: WegmanCarter,
    send_seq: u64,
    recv_seq: u64,
    opened_at: u64,
    pads: Vec<Range<u64>>,
}

impl<'a, T: Transport> AuthenticatedChannel<'a, T> {
    pub fn open(transport: &'a mut T, buffer: &'a mut AuthKeyBuffer, tag_bits: usize) -> Result<Self> {
        let opened_at = buffer.consumed();
        let mac = WegmanCarter::from_buffer(buffer, tag_bits)?;
        Ok(Self {
            transport,
            buffer,
            mac,
            send_seq: 0,
            recv_seq: 0,
            opened_at,
            pads: Vec::new(),
        })
    }

    pub fn send(&mut self, msg: &Message) -> Result<()> {
        let payload = msg.encode()?;
        let pad = self.buffer.pop(self.mac.tag_bits())?;
        let tag = self.mac.tag(self.send_seq, &pad, &payload)?;
        trace!(
            "send #{} {} ({} bytes, pad {:?})",
            self.send_seq,
            msg.kind(),
            payload.len(),
            pad.range()
        );
        let frame = Frame {
            seq: self.send_seq,
            pad_offset: pad.offset,
            payload,
            tag,
        };
        self.pads.push(pad.range());
        self.send_seq += 1;
        self.transport.send_frame(bincode::serialize(&frame)?)
    }

    /// Receive, authenticate and decode the next message.
    ///
    /// A peer's `AbortNotice` surfaces as [`Error::PeerAbort`].
    ///
    /// Fails with [`Error::KeyExhaustion`] without touching the transport when no pad is
    /// left to authenticate a frame with; a peer in lockstep is out of pads as well.
    pub fn recv(&mut self) -> Result<Message> {
        if self.buffer.available() < self.mac.tag_bits() {
            warn!("auth buffer drained, not waiting for frame #{}", self.recv_seq);
            return Err(Error::KeyExhaustion {
                requested: self.mac.tag_bits(),
                available: self.buffer.available(),
            });
        }
        let bytes = self.transport.recv_frame()?;
        let frame: Frame = bincode::deserialize(&bytes)?;
        if frame.seq != self.recv_seq {
            return Err(Error::Channel(format!(
                "frame sequence {} where {} was expected",
                frame.seq, self.recv_seq
            )));
        }
        if frame.pad_offset != self.buffer.consumed() {
            return Err(Error::Channel(format!(
                "frame pad offset {} but local buffer is at {}",
                frame.pad_offset,
                self.buffer.consumed()
            )));
        }

        let pad = self.buffer.pop(self.mac.tag_bits())?;
        self.pads.push(pad.range());
        self.recv_seq += 1;
        let expected = self.mac.tag(frame.seq, &pad, &frame.payload)?;
        if expected != frame.tag {
            warn!("tag mismatch on frame #{}, payload discarded", frame.seq);
            return Err(Error::Authentication(format!(
                "tag mismatch on frame {}",
                frame.seq
            )));
        }

        let msg = Message::decode(&frame.payload)?;
        trace!("recv #{} {}", frame.seq, msg.kind());
        if let Message::AbortNotice { reason } = msg {
            warn!("peer aborted: {reason}");
            return Err(Error::PeerAbort(reason));
        }
        Ok(msg)
    }

    pub fn send_abort(&mut self, reason: AbortReason) -> Result<()> {
        self.send(&Message::AbortNotice { reason })
    }

    /// Pad ranges used by this channel, in use order.
    pub fn pad_ranges(&self) -> &[Range<u64>] {
        &self.pads
    }

    /// Secret bits consumed since opening, matrix seed included.
    pub fn auth_bits_consumed(&self) -> u64 {
        self.buffer.consumed() - self.opened_at
    }

    pub fn messages_sent(&self) -> u64 {
        self.send_seq
    }

    pub fn messages_received(&self) -> u64 {
        self.recv_seq
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    pub(crate) fn shared_buffers(len: usize, seed: u64) -> (AuthKeyBuffer, AuthKeyBuffer) {
        let mut rng = StdRng::seed_from_u64(seed);
        let buf = AuthKeyBuffer::new(&BitString::random(len, &mut rng));
        (buf.clone(), buf)
    }

    /// Decode the message inside a raw frame without authenticating it.
    pub(crate) fn frame_message(bytes: &[u8]) -> Message {
        let frame: Frame = bincode::deserialize(bytes).unwrap();
        Message::decode(&frame.payload).unwrap()
    }

    /// Flips one payload byte of the next frame it sends.
    struct Tamper<T> {
        inner: T,
        armed: bool,
    }

    impl<T: Transport> Transport for Tamper<T> {
        fn send_frame(&mut self, mut frame: Vec<u8>) -> Result<()> {
            if self.armed {
                // seq, pad_offset and the payload length prefix are 8 bytes each.
                frame[24] ^= 0x01;
                self.armed = false;
            }
            self.inner.send_frame(frame)
        }

        fn recv_frame(&mut self) -> Result<Vec<u8>> {
            self.inner.recv_frame()
        }
    }

    #[test]
    fn test_roundtrip_both_directions() {
        let (mut ta, mut tb) = MemoryTransport::pair();
        let (mut ka, mut kb) = shared_buffers(4096, 1);
        let mut a = AuthenticatedChannel::open(&mut ta, &mut ka, 40).unwrap();
        let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();

        let hello = Message::PermSeed { pass: 2, seed: 77 };
        a.send(&hello).unwrap();
        assert_eq!(b.recv().unwrap(), hello);
        let reply = Message::PassComplete { pass: 2 };
        b.send(&reply).unwrap();
        assert_eq!(a.recv().unwrap(), reply);

        assert_eq!(a.pad_ranges(), b.pad_ranges());
        assert_eq!(a.auth_bits_consumed(), 256 + 80);
        assert_eq!(a.messages_sent(), 1);
        assert_eq!(a.messages_received(), 1);
    }

    #[test]
    fn test_pad_ranges_never_overlap() {
        let (mut ta, mut tb) = MemoryTransport::pair();
        let (mut ka, mut kb) = shared_buffers(1 << 14, 2);
        let mut a = AuthenticatedChannel::open(&mut ta, &mut ka, 40).unwrap();
        let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();
        for i in 0..50 {
            let msg = Message::VerifyResult { matched: i % 2 == 0 };
            if i % 3 == 0 {
                b.send(&msg).unwrap();
                a.recv().unwrap();
            } else {
                a.send(&msg).unwrap();
                b.recv().unwrap();
            }
        }
        let mut ranges = a.pad_ranges().to_vec();
        ranges.sort_by_key(|r| r.start);
        for pair in ranges.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        assert!(ranges.iter().all(|r| r.start >= 256));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let (ta, mut tb) = MemoryTransport::pair();
        let mut ta = Tamper {
            inner: ta,
            armed: true,
        };
        let (mut ka, mut kb) = shared_buffers(4096, 3);
        let mut a = AuthenticatedChannel::open(&mut ta, &mut ka, 40).unwrap();
        let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();
        a.send(&Message::VerifyResult { matched: true }).unwrap();
        let err = b.recv().unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(err.abort_reason(), AbortReason::ChannelError);
    }

    #[test]
    fn test_replayed_frame_rejected() {
        let (mut ta, mut tb) = MemoryTransport::pair();
        let (mut ka, mut kb) = shared_buffers(4096, 4);
        let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();
        let mac = WegmanCarter::from_buffer(&mut ka, 40).unwrap();
        let pad = ka.pop(40).unwrap();
        let payload = Message::VerifyResult { matched: true }.encode().unwrap();
        let frame = Frame {
            seq: 0,
            pad_offset: pad.offset,
            tag: mac.tag(0, &pad, &payload).unwrap(),
            payload,
        };
        let bytes = bincode::serialize(&frame).unwrap();
        ta.send_frame(bytes.clone()).unwrap();
        ta.send_frame(bytes).unwrap();
        assert!(b.recv().is_ok());
        assert!(matches!(b.recv(), Err(Error::Channel(_))));
    }

    #[test]
    fn test_pad_offset_mismatch_rejected() {
        let (mut ta, mut tb) = MemoryTransport::pair();
        let (mut ka, _) = shared_buffers(4096, 5);
        let (_, mut kb) = shared_buffers(4096, 5);
        kb.pop(8).unwrap();
        let mut a = AuthenticatedChannel::open(&mut ta, &mut ka, 40).unwrap();
        let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();
        a.send(&Message::VerifyResult { matched: true }).unwrap();
        assert!(matches!(b.recv(), Err(Error::Channel(_))));
    }

    #[test]
    fn test_abort_notice_surfaces_as_peer_abort() {
        let (mut ta, mut tb) = MemoryTransport::pair();
        let (mut ka, mut kb) = shared_buffers(4096, 6);
        let mut a = AuthenticatedChannel::open(&mut ta, &mut ka, 40).unwrap();
        let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();
        a.send_abort(AbortReason::SecurityAbort).unwrap();
        assert!(matches!(
            b.recv(),
            Err(Error::PeerAbort(AbortReason::SecurityAbort))
        ));
    }

    #[test]
    fn test_hang_up_is_channel_error() {
        let (ta, mut tb) = MemoryTransport::pair();
        drop(ta);
        let (_, mut kb) = shared_buffers(4096, 7);
        let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();
        assert!(matches!(b.recv(), Err(Error::Channel(_))));
    }

    #[test]
    fn test_exhausted_sender_and_receiver() {
        let (mut ta, mut tb) = MemoryTransport::pair();
        let (mut ka, mut kb) = shared_buffers(256 + 60, 8);
        {
            let mut a = AuthenticatedChannel::open(&mut ta, &mut ka, 40).unwrap();
            let mut b = AuthenticatedChannel::open(&mut tb, &mut kb, 40).unwrap();
            a.send(&Message::PassComplete { pass: 1 }).unwrap();
            b.recv().unwrap();
            let err = b.send(&Message::PassComplete { pass: 1 }).unwrap_err();
            assert!(matches!(err, Error::KeyExhaustion { .. }));
        }
        drop(ta);
        let mut drained = AuthKeyBuffer::new(&BitString::zeros(256));
        let mut b = AuthenticatedChannel::open(&mut tb, &mut drained, 40).unwrap();
        assert!(matches!(b.recv(), Err(Error::KeyExhaustion { .. })));
    }
}
