use std::thread;
use std::time::{Duration, Instant};

use zone::net::{NetLink, Outbound};
use zone::{
    Inbound, Message, NetworkPump, Peer, Target, Transport, UdpClientTransport,
    UdpServerTransport, link,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn start_server() -> (NetworkPump, NetLink, std::net::SocketAddr) {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = UdpServerTransport::bind("127.0.0.1:0", 4, TIMEOUT).unwrap();
    let addr = server.local_addr();
    let (net, transport) = link();
    (NetworkPump::spawn(Box::new(server), transport), net, addr)
}

fn wait_inbound(net: &mut NetLink) -> Inbound {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(event) = net.try_recv() {
            return event;
        }
        assert!(Instant::now() < deadline, "no inbound event");
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_client(client: &mut UdpClientTransport) -> Vec<Inbound> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        client.flush().unwrap();
        let events = client.poll().unwrap();
        if !events.is_empty() {
            return events;
        }
        assert!(Instant::now() < deadline, "client received nothing");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn handshake_and_messages_both_ways() {
    let (mut pump, mut server, addr) = start_server();

    let mut client = UdpClientTransport::connect(addr, "alice", TIMEOUT).unwrap();
    let id = client.client_id();

    assert_eq!(
        wait_inbound(&mut server),
        Inbound::Connected {
            client: id,
            name: "alice".to_string()
        }
    );

    let join = Message::JoinAccepted {
        player_id: 1,
        group_id: 0,
    };
    assert!(server.send(Outbound {
        target: Target::Client(id),
        message: join.clone(),
    }));
    assert_eq!(
        wait_client(&mut client),
        vec![Inbound::Message {
            from: Peer::Server,
            message: join
        }]
    );

    let chat = Message::ChatText {
        text: "hi".to_string(),
    };
    client.send(Target::Server, &chat, true).unwrap();
    client.flush().unwrap();
    assert_eq!(
        wait_inbound(&mut server),
        Inbound::Message {
            from: Peer::Client(id),
            message: chat
        }
    );

    client.close();
    assert_eq!(wait_inbound(&mut server), Inbound::Disconnected { client: id });

    pump.shutdown();
}

#[test]
fn reliable_messages_arrive_in_order() {
    let (mut pump, mut server, addr) = start_server();
    let mut client = UdpClientTransport::connect(addr, "bob", TIMEOUT).unwrap();
    let id = client.client_id();
    assert!(matches!(
        wait_inbound(&mut server),
        Inbound::Connected { .. }
    ));

    for i in 0..20 {
        client
            .send(
                Target::Server,
                &Message::ChatText {
                    text: i.to_string(),
                },
                true,
            )
            .unwrap();
    }
    client.flush().unwrap();

    for i in 0..20 {
        let expected = Inbound::Message {
            from: Peer::Client(id),
            message: Message::ChatText {
                text: i.to_string(),
            },
        };
        assert_eq!(wait_inbound(&mut server), expected);
    }

    pump.shutdown();
}
