//! Interactive console for the session layer
//!
//! Starts a server on 0.0.0.0:23333 that prints every event. Each line of
//! input is a `host:port` to connect a new client to, followed by one line of
//! text for that client to send. Type `quit` to stop.
//!
//! ```bash
//! RUST_LOG=tcp_session=debug cargo run --example console
//! ```

use std::io::{self, BufRead};

use tcp_session::io::{Client, ClientHandler, ConnectionId, Server, ServerHandler};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct ServerPrinter;

impl ServerHandler for ServerPrinter {
    fn on_accept(&self, _server: &Server, id: ConnectionId) {
        println!("Server: new client connected: {}", id);
    }

    fn on_receive(&self, server: &Server, id: ConnectionId, available: usize) {
        let data = server.read_data(id, available);
        println!(
            "Server: received data from {}: {}",
            id,
            String::from_utf8_lossy(&data)
        );
    }

    fn on_disconnect(&self, _server: &Server, id: ConnectionId) {
        println!("Server: client disconnected: {}", id);
    }
}

struct ClientPrinter;

impl ClientHandler for ClientPrinter {
    fn on_receive(&self, client: &Client, available: usize) {
        let data = client.read_data(available);
        println!(
            "Client: received data from server: {}",
            String::from_utf8_lossy(&data)
        );
    }

    fn on_disconnect(&self, _client: &Client) {
        println!("Client: disconnected");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let server = Server::new("0.0.0.0:23333", ServerPrinter);
    server.start()?;
    println!("Socket started on {}", server.local_addr()?);

    // Clients stay alive until the program exits.
    let mut clients = Vec::new();
    let mut lines = io::stdin().lock().lines();

    while let Some(line) = lines.next() {
        let line = line?;
        let target = line.trim();
        if target == "quit" {
            break;
        }

        let Some((host, port)) = target.rsplit_once(':') else {
            eprintln!("expected host:port, got {:?}", target);
            continue;
        };
        let port: u16 = match port.parse() {
            Ok(port) => port,
            Err(e) => {
                eprintln!("invalid port {:?}: {}", port, e);
                continue;
            }
        };

        let client = Client::new(ClientPrinter);
        if let Err(e) = client.connect(host, port) {
            eprintln!("{}", e);
            continue;
        }

        if let Some(content) = lines.next() {
            let sent = client.send(content?.as_bytes())?;
            info!(bytes = sent, "Client sent line");
        }
        clients.push(client);
    }

    server.stop();
    Ok(())
}
