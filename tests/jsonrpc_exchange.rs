use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use commwire::config::JsonRpcConfig;
use commwire::message::AtomicIdGenerator;
use commwire::network::Channel;
use commwire::protocol::jsonrpc::ContentEncoding;
use commwire::protocol::{JsonRpcProtocol, ProtocolError, Role};
use commwire::{CommMessage, Fault, Value};

/// Answers requests until the client hangs up
fn serve(listener: TcpListener) -> usize {
    let (stream, _) = listener.accept().unwrap();
    let protocol = JsonRpcProtocol::new(Role::Server)
        .with_id_generator(Arc::new(AtomicIdGenerator::starting_at(1_000)));
    let mut channel = Channel::new(stream, Box::new(protocol));

    let mut handled = 0;
    loop {
        let request = match channel.recv() {
            Ok(request) => request,
            Err(ProtocolError::Closed) => return handled,
            Err(e) => panic!("server failed: {e}"),
        };
        handled += 1;

        let reply = if request.has_generic_id() {
            CommMessage::create_empty_response(&request)
        } else if request.operation_name() == "fail" {
            CommMessage::create_fault_response(
                &request,
                Fault::new("Refused", request.value().clone()),
            )
        } else {
            CommMessage::create_response(&request, request.value().clone())
        };
        channel.send(&reply).unwrap();
    }
}

fn payload() -> Value {
    let mut value = Value::from("order");
    value.set_first_child("qty", 3);
    value.set_first_child("express", true);
    let lines = value.get_or_create_children("lines");
    lines.push(Value::from("apple"));
    lines.push(Value::from("pear"));
    value
}

#[test]
fn client_and_server_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || serve(listener));

    let config = JsonRpcConfig {
        host: addr.to_string(),
        path: "/rpc".to_string(),
        request_compression: Some(ContentEncoding::Gzip),
        ..JsonRpcConfig::default()
    };
    let stream = TcpStream::connect(addr).unwrap();
    let mut client = Channel::new(stream, Box::new(JsonRpcProtocol::from_config(&config)));

    let request = CommMessage::create_request("echo", "/", payload());
    let reply = client.call(&request).unwrap();
    assert_eq!(reply.id(), request.id());
    assert_eq!(reply.operation_name(), "echo");
    assert_eq!(reply.value(), &payload());

    let ack = client
        .call(&CommMessage::create_notification("audit", "/", Value::from("seen")))
        .unwrap();
    assert!(ack.has_generic_id());
    assert!(!ack.is_fault());

    let refused = client
        .call(&CommMessage::create_request("fail", "/", Value::from(7)))
        .unwrap();
    let fault = refused.fault().unwrap();
    assert_eq!(fault.name, "Refused");
    assert_eq!(fault.value.int_value(), 7);

    drop(client);
    assert_eq!(server.join().unwrap(), 3);
}

#[test]
fn server_rejects_get() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let sender = thread::spawn(move || {
        use std::io::Write;
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET /rpc HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        stream
    });

    let (stream, _) = listener.accept().unwrap();
    let mut channel = Channel::new(stream, Box::new(JsonRpcProtocol::new(Role::Server)));
    match channel.recv() {
        Err(ProtocolError::UnsupportedMethod(method)) => assert_eq!(method, "GET"),
        other => panic!("unexpected {other:?}"),
    }
    drop(sender.join().unwrap());
}
