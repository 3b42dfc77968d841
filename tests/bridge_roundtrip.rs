use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use cardbridge::collection::Collection;
use cardbridge::config::BridgeConfig;
use cardbridge::connection::ConnectionManager;
use cardbridge::host::HostEventLoop;
use cardbridge::operations;
use serde_json::{Value, json};

/// Line-delimited JSON-RPC client that talks to the server from its own thread.
struct Client {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    next_id: i64,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Self {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
            next_id: 1,
        }
    }

    fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        writeln!(self.writer, "{message}").unwrap();
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], id);
        reply
    }

    fn call(&mut self, tool: &str, arguments: Value) -> Value {
        self.request("tools/call", json!({ "name": tool, "arguments": arguments }))
    }
}

fn start(event_loop: &HostEventLoop<Collection>) -> ConnectionManager<Collection> {
    let config = BridgeConfig {
        port: 0,
        shutdown_grace_ms: 2_000,
        ..BridgeConfig::default()
    };
    let table = Rc::new(operations::table().unwrap());
    let mut manager = ConnectionManager::new(config, event_loop.scheduler().clone(), table);
    manager.start().unwrap();
    manager
}

/// Run `client` on a worker thread while the test thread acts as the host.
fn drive<T, F>(event_loop: &mut HostEventLoop<Collection>, addr: SocketAddr, client: F) -> T
where
    T: Send + 'static,
    F: FnOnce(Client) -> T + Send + 'static,
{
    let done = Arc::new(AtomicBool::new(false));
    let worker = thread::spawn({
        let done = done.clone();
        move || {
            let result = client(Client::connect(addr));
            done.store(true, Ordering::SeqCst);
            result
        }
    });
    assert!(
        event_loop.run_until(|_| done.load(Ordering::SeqCst), Duration::from_secs(20)),
        "client did not finish"
    );
    worker.join().unwrap()
}

#[test]
fn add_find_and_read_a_note() {
    let mut event_loop = HostEventLoop::new(Collection::new());
    let mut manager = start(&event_loop);
    let addr = manager.local_addr().unwrap();

    let (created, found, info) = drive(&mut event_loop, addr, |mut client| {
        let init = client.request("initialize", json!({}));
        assert_eq!(init["result"]["serverInfo"]["name"], "cardbridge");

        let deck = client.call("create_deck", json!({ "deck_name": "Spanish::Verbs" }));
        assert_eq!(deck["result"]["structuredContent"]["created"], true);

        let created = client.call(
            "addNote",
            json!({
                "deckName": "Spanish::Verbs",
                "modelName": "Basic",
                "fields": { "Front": "hablar", "Back": "to speak" },
                "tags": ["verb"],
            }),
        );
        let found = client.call("findNotes", json!({ "query": "deck:Spanish tag:verb" }));
        let note_id = found["result"]["structuredContent"]["noteIds"][0].clone();
        let info = client.call("notesInfo", json!({ "notes": [note_id] }));
        (created, found, info)
    });

    let note_id = created["result"]["structuredContent"]["noteId"].as_i64().unwrap();
    assert_eq!(found["result"]["structuredContent"]["noteIds"], json!([note_id]));
    let note = &info["result"]["structuredContent"]["notes"][0];
    assert_eq!(note["fields"]["Back"]["value"], "to speak");
    assert_eq!(note["tags"], json!(["verb"]));

    // every write went through a write session on the host thread
    assert_eq!(event_loop.state().ui_refreshes(), 2);
    assert_eq!(event_loop.state().note_count(), 1);
    manager.stop();
}

#[test]
fn failures_come_back_as_rpc_errors() {
    let mut event_loop = HostEventLoop::new(Collection::new());
    let mut manager = start(&event_loop);
    let addr = manager.local_addr().unwrap();

    let (unknown_tool, bad_deck, listed) = drive(&mut event_loop, addr, |mut client| {
        let unknown_tool = client.call("rate_card", json!({}));
        let bad_deck = client.call("create_deck", json!({ "deck_name": "a::b::c" }));
        let listed = client.request("tools/list", json!({}));
        (unknown_tool, bad_deck, listed)
    });

    assert_eq!(unknown_tool["error"]["code"], -32000);
    assert_eq!(unknown_tool["error"]["message"], "unknown operation: rate_card");
    assert!(
        bad_deck["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Deck name can have maximum 2 levels")
    );
    assert_eq!(
        listed["result"]["tools"].as_array().unwrap().len(),
        operations::catalog(&operations::table().unwrap().infos()).len()
    );
    manager.stop();
}

#[test]
fn resources_and_prompts_are_served() {
    let mut event_loop = HostEventLoop::new(Collection::new());
    let mut manager = start(&event_loop);
    let addr = manager.local_addr().unwrap();

    let (listed, info, missing, prompt) = drive(&mut event_loop, addr, |mut client| {
        let listed = client.request("resources/list", json!({}));
        let info = client.request("resources/read", json!({ "uri": "anki://system-info" }));
        let missing = client.request("resources/read", json!({ "uri": "anki://nope" }));
        let prompt = client.request(
            "prompts/get",
            json!({ "name": "review_session", "arguments": { "card_limit": "5" } }),
        );
        (listed, info, missing, prompt)
    });

    let uris: Vec<&str> = listed["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap())
        .collect();
    assert!(uris.contains(&"anki://system-info"));
    assert!(uris.contains(&"anki://query-syntax"));

    let text = info["result"]["contents"][0]["text"].as_str().unwrap();
    let system: Value = serde_json::from_str(text).unwrap();
    assert_eq!(system["server_name"], "cardbridge");
    assert_eq!(system["decks"], 1);

    assert_eq!(missing["error"]["code"], -32002);
    assert!(
        prompt["result"]["messages"][0]["content"]["text"]
            .as_str()
            .unwrap()
            .contains("limit=5")
    );
    manager.stop();
}

#[test]
fn closed_collection_is_reported_to_the_client() {
    let mut event_loop = HostEventLoop::new(Collection::new());
    event_loop.state_mut().set_open(false);
    let mut manager = start(&event_loop);
    let addr = manager.local_addr().unwrap();

    let reply = drive(&mut event_loop, addr, |mut client| client.call("list_decks", json!({})));
    assert_eq!(
        reply["error"]["message"],
        "Collection not available (hint: Open a profile in Anki first)"
    );
    manager.stop();
}

#[test]
fn stopping_releases_the_port() {
    let event_loop = HostEventLoop::new(Collection::new());
    let mut manager = start(&event_loop);
    let addr = manager.local_addr().unwrap();
    manager.stop();

    let rebound = std::net::TcpListener::bind(addr);
    assert!(rebound.is_ok(), "port {addr} still held after stop");
}
