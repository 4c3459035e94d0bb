use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use tokio::sync::mpsc::UnboundedReceiver;

use zone::net::{MemoryTransport, TransportLink};
use zone::{
    AssetCatalog, ClientConfig, ClientSession, ControlInput, MemoryHub, Notification, Notifier,
    RapierSpace, ServerConfig, ServerSession, Transport, WorldConfig, link,
};

const DT: f32 = 1.0 / 60.0;

struct Client {
    session: ClientSession,
    link: TransportLink,
    transport: MemoryTransport,
    notifications: UnboundedReceiver<Notification>,
}

struct Harness {
    hub: MemoryHub,
    server: ServerSession,
    server_link: TransportLink,
    server_transport: MemoryTransport,
    clients: Vec<Client>,
}

impl Harness {
    fn new(ai_players: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let hub = MemoryHub::new();
        let (net, server_link) = link();
        let config = ServerConfig {
            ai_players,
            ..Default::default()
        };
        let server = ServerSession::new(
            config,
            Box::new(RapierSpace::new(DT)),
            Arc::new(AssetCatalog::builtin()),
            net,
            Notifier::disabled(),
        );

        Self {
            server_transport: hub.server(),
            hub,
            server,
            server_link,
            clients: Vec::new(),
        }
    }

    fn join(&mut self, name: &str) -> usize {
        let transport = self.hub.connect(name).unwrap();
        let (net, link) = link();
        let (notifier, notifications) = Notifier::channel();
        let session = ClientSession::new(
            ClientConfig {
                world: WorldConfig::default(),
                name: name.to_string(),
                bot: false,
            },
            Box::new(RapierSpace::new(DT)),
            Arc::new(AssetCatalog::builtin()),
            net,
            notifier,
        );
        self.clients.push(Client {
            session,
            link,
            transport,
            notifications,
        });
        self.clients.len() - 1
    }

    fn leave(&mut self, index: usize) {
        let mut client = self.clients.remove(index);
        client.transport.close();
    }

    fn step(&mut self) {
        self.server.update(DT);
        self.server_link.pump(&mut self.server_transport).unwrap();

        for client in &mut self.clients {
            client.link.pump(&mut client.transport).unwrap();
            client.session.update(DT);
            client.link.pump(&mut client.transport).unwrap();
        }
    }

    fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    fn run_until(&mut self, what: &str, mut done: impl FnMut(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            self.step();
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn client(&self, index: usize) -> &ClientSession {
        &self.clients[index].session
    }

    fn mirrored(&self, index: usize) -> bool {
        let server = self.server.world();
        let client = self.client(index).world();
        client.level_name() == server.level_name()
            && client.players().len() == server.players().len()
            && client.entities().len() == server.entities().len()
            && client.local_entity().is_some()
    }
}

#[test]
fn joining_client_mirrors_the_server_world() {
    let mut h = Harness::new(1);
    h.run_until("server level", |h| h.server.is_level_ready());

    let c = h.join("alice");
    h.run_until("client mirror", |h| h.mirrored(c));

    let server = h.server.world();
    let client = h.client(c).world();
    for record in server.entities().iter() {
        let mirror = client.entity(record.id).unwrap();
        assert_eq!(mirror.model, record.model);
        assert_eq!(mirror.kind, record.kind);
    }

    let local = client.local_player().unwrap();
    let on_server = server.player(local).unwrap();
    assert_eq!(on_server.name, "alice");
    assert_eq!(client.local_entity(), on_server.entity);
    assert_eq!(client.player(local).unwrap().entity, on_server.entity);
}

#[test]
fn late_joiner_sees_players_that_joined_before() {
    let mut h = Harness::new(2);
    h.run_until("server level", |h| h.server.is_level_ready());

    let first = h.join("alice");
    h.run_until("first mirror", |h| h.mirrored(first));
    h.run(30);

    let second = h.join("bob");
    h.run_until("both mirrors", |h| h.mirrored(first) && h.mirrored(second));

    let names: Vec<String> = h
        .client(second)
        .world()
        .players()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(names.len(), 4);
    for name in ["alice", "bob", "bot-1", "bot-2"] {
        assert!(names.iter().any(|n| n == name), "missing {}", name);
    }
}

#[test]
fn client_input_drives_its_character_on_the_server() {
    let mut h = Harness::new(0);
    h.run_until("server level", |h| h.server.is_level_ready());
    let c = h.join("alice");
    h.run_until("client mirror", |h| h.mirrored(c));
    h.run(60);

    let entity = h.client(c).world().local_entity().unwrap();
    let start = h.server.world().entity_position(entity).unwrap();

    let input = ControlInput {
        movement: Vec3::X,
        look: Vec3::X,
    };
    for _ in 0..60 {
        assert!(h.clients[c].session.set_input(input));
        h.step();
    }

    let moved = h.server.world().entity_position(entity).unwrap() - start;
    assert!(moved.x > 1.0, "character only moved {:?}", moved);
}

#[test]
fn server_samples_reach_clients() {
    let mut h = Harness::new(1);
    h.run_until("server level", |h| h.server.is_level_ready());
    let c = h.join("alice");
    h.run_until("client mirror", |h| h.mirrored(c));

    // Let the bot wander and the crates settle.
    h.run(180);

    let server = h.server.world();
    let client = h.client(c).world();
    let bot = server
        .players()
        .iter()
        .find(|p| p.name == "bot-1")
        .and_then(|p| p.entity)
        .unwrap();
    let on_server = server.entity_position(bot).unwrap();
    let on_client = client.entity_position(bot).unwrap();
    // Samples go out at 20 Hz; the mirror lags at most a few ticks.
    assert!(
        on_server.distance(on_client) < 1.0,
        "server {:?} client {:?}",
        on_server,
        on_client
    );
}

#[test]
fn entering_an_occupied_entity_evicts_the_occupant_everywhere() {
    let mut h = Harness::new(0);
    h.run_until("server level", |h| h.server.is_level_ready());
    let a = h.join("alice");
    let b = h.join("bob");
    h.run_until("mirrors", |h| h.mirrored(a) && h.mirrored(b));

    let alice = h.client(a).world().local_player().unwrap();
    let bob = h.client(b).world().local_player().unwrap();
    let bobs_entity = h.client(b).world().local_entity().unwrap();

    assert!(h.server.world_mut().enter_entity(alice, Some(bobs_entity)));
    h.run_until("eviction", |h| {
        h.client(b).world().local_entity().is_none()
            && h.client(a).world().local_entity() == Some(bobs_entity)
    });

    for index in [a, b] {
        let world = h.client(index).world();
        assert_eq!(world.player(alice).unwrap().entity, Some(bobs_entity));
        assert_eq!(world.player(bob).unwrap().entity, None);
        assert_eq!(world.entity(bobs_entity).unwrap().player_id, Some(alice));
    }
}

#[test]
fn leaving_client_is_removed_from_every_world() {
    let mut h = Harness::new(0);
    h.run_until("server level", |h| h.server.is_level_ready());
    let a = h.join("alice");
    let b = h.join("bob");
    h.run_until("mirrors", |h| h.mirrored(a) && h.mirrored(b));

    h.leave(b);
    h.run_until("removal", |h| {
        h.server.world().players().len() == 1 && h.client(a).world().players().len() == 1
    });
    assert_eq!(h.client(a).world().players().iter().next().unwrap().name, "alice");
}

#[test]
fn chat_and_level_requests_round_trip() {
    let mut h = Harness::new(1);
    h.run_until("server level", |h| h.server.is_level_ready());
    let c = h.join("alice");
    h.run_until("client mirror", |h| h.mirrored(c));

    h.client(c).send_chat("hello");
    h.run(5);
    let mut chats = Vec::new();
    while let Ok(notification) = h.clients[c].notifications.try_recv() {
        if let Notification::ChatReceived { text } = notification {
            chats.push(text);
        }
    }
    assert_eq!(chats, vec!["alice: hello".to_string()]);

    h.client(c).request_start("");
    h.run_until("level close", |h| {
        h.client(c).world().level_name().is_none() && h.client(c).world().entities().is_empty()
    });
    assert!(h.server.world().entities().is_empty());

    h.client(c).request_start("arena");
    h.run_until("level restart", |h| {
        h.server.is_level_ready() && h.client(c).world().level_name() == Some("arena")
    });
}
