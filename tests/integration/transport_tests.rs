//! Integration tests for the byte-stream and UDP channels.

use std::io::{self, Cursor, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devbus::adapters::serial::{self, FrameDecoder, StreamChannel, encode_frame};
use devbus::adapters::time::{ManualClock, MonotonicClock};
use devbus::adapters::udp::UdpChannel;
use devbus::bus::{BusBuilder, ChannelContext, EP_BEGIN, EP_CONTROL};
use devbus::config::BusConfig;

use crate::mock_channel::{ReverseEcho, Tracker, begin_frame, data, split};

const ECHO: u8 = 0x10;
const TRACKED: u8 = 0x20;

// ── Serial ────────────────────────────────────────────────────

/// Writer shared between the channel and the test.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn stream(frames: &[Vec<u8>]) -> Cursor<Vec<u8>> {
    let bytes: Vec<u8> = frames
        .iter()
        .flat_map(|f| encode_frame(f).unwrap())
        .collect();
    Cursor::new(bytes)
}

fn decode_all(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    FrameDecoder::new(256).feed(bytes, |f| out.push(f.to_vec()));
    out
}

#[test]
fn serial_stream_opens_sessions_and_ends_them_at_eof() {
    let out = SharedBuf::default();
    let tracker = Tracker::new(TRACKED);
    let mut builder = BusBuilder::new(&BusConfig::default());
    let channel = builder
        .register_channel(StreamChannel::new("serial", 64, out.clone()))
        .unwrap();
    builder.register_endpoint(Arc::clone(&tracker)).unwrap();
    let bus = builder.build(ManualClock::new(0));

    let input = stream(&[begin_frame(), begin_frame(), data(1, TRACKED, b"x")]);
    serial::pump(&bus, channel, input, 256).unwrap();

    let echoes = decode_all(&out.0.lock().unwrap());
    assert_eq!(echoes.len(), 2);
    assert_eq!(split(&echoes[0]), (1, EP_BEGIN, vec![]));
    assert_eq!(split(&echoes[1]), (2, EP_BEGIN, vec![]));

    // The stream closed before the worker ran: the queued message is
    // dropped and both sessions were cleaned up.
    assert_eq!(bus.active_sessions(), 0);
    bus.process_pending();
    assert!(tracker.handled().is_empty());
    assert_eq!(tracker.cleanups(), vec![1, 2]);
}

#[test]
fn serial_stream_with_worker_round_trip() {
    let out = SharedBuf::default();
    let mut builder = BusBuilder::new(&BusConfig::default());
    let channel = builder
        .register_channel(StreamChannel::new("serial", 64, out.clone()))
        .unwrap();
    builder.register_endpoint(ReverseEcho(ECHO)).unwrap();
    let bus = builder.build(ManualClock::new(0));

    serial::pump(&bus, channel, stream(&[begin_frame()]), 256).unwrap();
    bus.dispatch(channel, &begin_frame(), ChannelContext::None);
    bus.dispatch(channel, &data(2, ECHO, b"stream"), ChannelContext::None);
    bus.process_pending();

    let frames = decode_all(&out.0.lock().unwrap());
    assert_eq!(frames.len(), 3);
    assert_eq!(split(&frames[2]), (2, ECHO, b"maerts".to_vec()));
}

// ── UDP ───────────────────────────────────────────────────────

fn client() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let (n, _) = socket.recv_from(&mut buf).unwrap();
    buf[..n].to_vec()
}

#[test]
fn udp_replies_go_to_the_source_address() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let udp = Arc::new(UdpChannel::bind(addr, 64).unwrap());
    let server = udp.local_addr().unwrap();

    let mut builder = BusBuilder::new(&BusConfig::default());
    let channel = builder.register_channel(Arc::clone(&udp)).unwrap();
    builder.register_endpoint(ReverseEcho(ECHO)).unwrap();
    let bus = builder.build(MonotonicClock::new());

    let _worker = bus.spawn_worker().unwrap();
    {
        let bus = Arc::clone(&bus);
        let udp = Arc::clone(&udp);
        std::thread::spawn(move || udp.serve(&bus, channel));
    }

    let alice = client();
    let bob = client();

    alice.send_to(&begin_frame(), server).unwrap();
    let (a_sid, ep, _) = split(&recv(&alice));
    assert_eq!(ep, EP_BEGIN);

    alice.send_to(&data(a_sid, ECHO, b"abc"), server).unwrap();
    assert_eq!(split(&recv(&alice)), (a_sid, ECHO, b"cba".to_vec()));

    bob.send_to(&begin_frame(), server).unwrap();
    let (b_sid, ep, _) = split(&recv(&bob));
    assert_eq!(ep, EP_BEGIN);
    assert_ne!(a_sid, b_sid);

    bob.send_to(&data(b_sid, ECHO, b"xyz"), server).unwrap();
    assert_eq!(split(&recv(&bob)), (b_sid, ECHO, b"zyx".to_vec()));

    // Oversized datagrams never reach the bus.
    alice.send_to(&data(a_sid, ECHO, &[0; 100]), server).unwrap();
    alice.send_to(&data(a_sid, 0x33, &[]), server).unwrap();
    assert_eq!(split(&recv(&alice)), (a_sid, EP_CONTROL, vec![0x04]));
}
