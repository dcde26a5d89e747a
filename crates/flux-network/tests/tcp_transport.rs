use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::Duration,
};

use flux_network::{
    tcp::{Transport, WireHeader, HEADER_SIZE},
    Buffer, OwnedBuffer, TransportOptions,
};

fn spin_until<F: FnMut() -> bool>(mut done: F) {
    let deadline = Duration::from_secs(5);
    let step = Duration::from_micros(50);
    let mut waited = Duration::ZERO;
    while !done() {
        thread::sleep(step);
        waited += step;
        assert!(waited < deadline, "timed out waiting for condition");
    }
}

#[test]
fn echo_roundtrip() {
    let server = Transport::<OwnedBuffer>::bind("tcp:host=127.0.0.1,port=0", TransportOptions::default())
        .unwrap();
    let locator = server.get_service_locator();

    let server_thread = thread::spawn(move || {
        loop {
            server.poll_once().unwrap();
            if let Some(mut rpc) = server.server_recv().unwrap() {
                let request = rpc.request().clone();
                rpc.reply_mut().append(request.as_slice());
                server.send_reply(rpc).unwrap();
                break;
            }
        }
        // drive a few more cycles so the reply actually leaves the socket
        for _ in 0..50 {
            server.poll_once().unwrap();
            thread::sleep(Duration::from_micros(50));
        }
    });

    let client = Transport::<OwnedBuffer>::client_only(TransportOptions::default()).unwrap();
    let session = client.get_session(&locator).unwrap();
    let handle = session.client_send(OwnedBuffer::from_vec(b"hello".to_vec())).unwrap();

    let mut result = None;
    spin_until(|| {
        client.poll_once().unwrap();
        if let Some(r) = handle.take() {
            result = Some(r);
        }
        result.is_some()
    });

    assert_eq!(result.unwrap().unwrap().into_vec(), b"hello".to_vec());
    server_thread.join().unwrap();
}

#[test]
fn large_payload_round_trips_across_partial_writes() {
    let options =
        TransportOptions { socket_buf_size: Some(4096), ..TransportOptions::default() };

    let server = Transport::<OwnedBuffer>::bind("tcp:host=127.0.0.1,port=0", options).unwrap();
    let locator = server.get_service_locator();

    let payload = vec![0x5au8; 512 * 1024];
    let expected = payload.clone();

    let server_thread = thread::spawn(move || {
        let mut replied = false;
        while !replied {
            server.poll_once().unwrap();
            if let Some(mut rpc) = server.server_recv().unwrap() {
                let request = rpc.request().clone();
                rpc.reply_mut().append(request.as_slice());
                server.send_reply(rpc).unwrap();
                replied = true;
            }
        }
        for _ in 0..2000 {
            server.poll_once().unwrap();
            thread::sleep(Duration::from_micros(100));
        }
    });

    let client = Transport::<OwnedBuffer>::client_only(options).unwrap();
    let session = client.get_session(&locator).unwrap();
    let handle = session.client_send(OwnedBuffer::from_vec(payload)).unwrap();

    let mut result = None;
    spin_until(|| {
        client.poll_once().unwrap();
        if let Some(r) = handle.take() {
            result = Some(r);
        }
        result.is_some()
    });

    assert_eq!(result.unwrap().unwrap().into_vec(), expected);
    server_thread.join().unwrap();
}

/// Replies out of the order their requests were sent in; the correlation
/// layer must still route each reply to the right waiting handle by nonce.
#[test]
fn responses_complete_out_of_order() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let locator = format!("tcp:host=127.0.0.1,port={}", listener.local_addr().unwrap().port());

    let server_thread = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let mut headers = Vec::new();
        for _ in 0..2 {
            let mut buf = [0u8; HEADER_SIZE];
            stream.read_exact(&mut buf).unwrap();
            let header = WireHeader::from_bytes(&buf);
            let mut body = vec![0u8; header.len as usize];
            stream.read_exact(&mut body).unwrap();
            headers.push((header, body));
        }

        // reply to the second request first
        for (header, body) in headers.into_iter().rev() {
            let reply_header = WireHeader { nonce: header.nonce, len: body.len() as u32 };
            stream.write_all(&reply_header.to_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        }
    });

    let client = Transport::<OwnedBuffer>::client_only(TransportOptions::default()).unwrap();
    let session = client.get_session(&locator).unwrap();

    let first = session.client_send(OwnedBuffer::from_vec(b"first".to_vec())).unwrap();
    let second = session.client_send(OwnedBuffer::from_vec(b"second".to_vec())).unwrap();

    let mut first_result = None;
    let mut second_result = None;
    spin_until(|| {
        client.poll_once().unwrap();
        if first_result.is_none() {
            first_result = first.take();
        }
        if second_result.is_none() {
            second_result = second.take();
        }
        first_result.is_some() && second_result.is_some()
    });

    assert_eq!(first_result.unwrap().unwrap().into_vec(), b"first".to_vec());
    assert_eq!(second_result.unwrap().unwrap().into_vec(), b"second".to_vec());
    server_thread.join().unwrap();
}

#[test]
fn oversized_response_fails_rpc_and_closes_session() {
    let options = TransportOptions { max_rpc_len: 16, ..TransportOptions::default() };

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let locator = format!("tcp:host=127.0.0.1,port={}", listener.local_addr().unwrap().port());

    let server_thread = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; HEADER_SIZE];
        stream.read_exact(&mut buf).unwrap();
        let header = WireHeader::from_bytes(&buf);
        let mut body = vec![0u8; header.len as usize];
        stream.read_exact(&mut body).unwrap();

        // declare a body far larger than the client's max_rpc_len
        let bad_header = WireHeader { nonce: header.nonce, len: 1024 };
        stream.write_all(&bad_header.to_bytes()).unwrap();
        stream.write_all(&vec![0u8; 1024]).unwrap();
    });

    let client = Transport::<OwnedBuffer>::client_only(options).unwrap();
    let session = client.get_session(&locator).unwrap();
    let handle = session.client_send(OwnedBuffer::from_vec(b"ping".to_vec())).unwrap();

    let mut result = None;
    spin_until(|| {
        client.poll_once().unwrap();
        if result.is_none() {
            result = handle.take();
        }
        result.is_some()
    });

    assert!(matches!(result.unwrap(), Err(flux_network::RpcFailure::Protocol { .. })));
    assert!(!session.is_usable());
    server_thread.join().unwrap();
}

#[test]
fn peer_close_mid_response_fails_outstanding_rpc() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let locator = format!("tcp:host=127.0.0.1,port={}", listener.local_addr().unwrap().port());

    let server_thread = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; HEADER_SIZE];
        stream.read_exact(&mut buf).unwrap();
        let header = WireHeader::from_bytes(&buf);
        let mut body = vec![0u8; header.len as usize];
        stream.read_exact(&mut body).unwrap();
        // close without ever replying
    });

    let client = Transport::<OwnedBuffer>::client_only(TransportOptions::default()).unwrap();
    let session = client.get_session(&locator).unwrap();
    let handle = session.client_send(OwnedBuffer::from_vec(b"ping".to_vec())).unwrap();

    let mut result = None;
    spin_until(|| {
        client.poll_once().unwrap();
        if result.is_none() {
            result = handle.take();
        }
        result.is_some()
    });

    assert!(result.unwrap().is_err());
    assert!(!session.is_usable());
    server_thread.join().unwrap();
}

#[test]
fn unsolicited_response_nonce_is_discarded_without_breaking_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let locator = format!("tcp:host=127.0.0.1,port={}", listener.local_addr().unwrap().port());

    let server_thread = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; HEADER_SIZE];
        stream.read_exact(&mut buf).unwrap();
        let header = WireHeader::from_bytes(&buf);
        let mut body = vec![0u8; header.len as usize];
        stream.read_exact(&mut body).unwrap();

        // a reply for a nonce nobody is waiting on
        let bogus = WireHeader { nonce: header.nonce.wrapping_add(999), len: 3 };
        stream.write_all(&bogus.to_bytes()).unwrap();
        stream.write_all(b"xyz").unwrap();

        // then the real reply
        let real = WireHeader { nonce: header.nonce, len: body.len() as u32 };
        stream.write_all(&real.to_bytes()).unwrap();
        stream.write_all(&body).unwrap();
    });

    let client = Transport::<OwnedBuffer>::client_only(TransportOptions::default()).unwrap();
    let session = client.get_session(&locator).unwrap();
    let handle = session.client_send(OwnedBuffer::from_vec(b"ping".to_vec())).unwrap();

    let mut result = None;
    spin_until(|| {
        client.poll_once().unwrap();
        if result.is_none() {
            result = handle.take();
        }
        result.is_some()
    });

    assert_eq!(result.unwrap().unwrap().into_vec(), b"ping".to_vec());
    assert!(session.is_usable());
    server_thread.join().unwrap();
}

/// Cancelling an RPC that hasn't started going out over the wire yet is a
/// clean detach: it vanishes from the queue, never resolves its handle, and
/// leaves the rest of the session (including whatever is ahead of it) alone.
#[test]
fn cancel_detaches_unsent_rpc_without_disturbing_session() {
    let options = TransportOptions { socket_buf_size: Some(4096), ..TransportOptions::default() };

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let locator = format!("tcp:host=127.0.0.1,port={}", listener.local_addr().unwrap().port());

    // accept, then never read: the first request's write stalls against the
    // shrunk send buffer and the second never gets a turn at the front.
    let server_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(200));
        drop(stream);
    });

    let client = Transport::<OwnedBuffer>::client_only(options).unwrap();
    let session = client.get_session(&locator).unwrap();

    let first = session.client_send(OwnedBuffer::from_vec(vec![0u8; 512 * 1024])).unwrap();
    let second = session.client_send(OwnedBuffer::from_vec(b"second".to_vec())).unwrap();

    session.cancel(&second);

    assert!(second.take().is_none());
    assert!(first.take().is_none());
    assert!(session.is_usable());

    drop(session);
    drop(client);
    server_thread.join().unwrap();
}

/// Cancelling the RPC that's already partway out over the wire can't be done
/// cleanly — the peer would receive a truncated frame — so it tears down the
/// whole session instead, failing everything still queued behind it.
#[test]
fn cancel_mid_write_closes_session_and_fails_queued_rpcs() {
    let options = TransportOptions { socket_buf_size: Some(4096), ..TransportOptions::default() };

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let locator = format!("tcp:host=127.0.0.1,port={}", listener.local_addr().unwrap().port());

    let server_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(200));
        drop(stream);
    });

    let client = Transport::<OwnedBuffer>::client_only(options).unwrap();
    let session = client.get_session(&locator).unwrap();

    let first = session.client_send(OwnedBuffer::from_vec(vec![0u8; 512 * 1024])).unwrap();
    let second = session.client_send(OwnedBuffer::from_vec(b"second".to_vec())).unwrap();

    // `first` is still the front of waiting_to_send with a partial write
    // outstanding against the 4 KiB send buffer and an unreading peer.
    session.cancel(&first);

    assert!(matches!(first.take(), Some(Err(flux_network::RpcFailure::Cancelled))));
    assert!(matches!(second.take(), Some(Err(flux_network::RpcFailure::Cancelled))));
    assert!(!session.is_usable());

    server_thread.join().unwrap();
}

/// A raw peer that declares a request body larger than `max_rpc_len` must be
/// dropped by the server before the bad frame ever surfaces as a request.
#[test]
fn server_closes_connection_on_oversized_request() {
    let options = TransportOptions { max_rpc_len: 16, ..TransportOptions::default() };

    let server = Transport::<OwnedBuffer>::bind("tcp:host=127.0.0.1,port=0", options).unwrap();
    let locator = server.get_service_locator();
    let addr = flux_network::ServiceLocator::parse(&locator).unwrap().socket_addr().unwrap();

    let mut raw = TcpStream::connect(addr).unwrap();
    let bad_header = WireHeader { nonce: 1, len: 1024 };
    raw.write_all(&bad_header.to_bytes()).unwrap();
    raw.write_all(&vec![0u8; 1024]).unwrap();
    raw.set_read_timeout(Some(Duration::from_millis(1))).unwrap();

    let mut closed = false;
    let mut saw_request = false;
    spin_until(|| {
        server.poll_once().unwrap();
        if server.server_recv().unwrap().is_some() {
            saw_request = true;
        }
        let mut buf = [0u8; 1];
        if let Ok(0) = raw.read(&mut buf) {
            closed = true;
        }
        closed
    });

    assert!(closed, "server should close the connection after an oversized request");
    assert!(!saw_request, "an oversized request must never surface via server_recv");
}
