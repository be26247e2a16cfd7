//! # Tickwire Demo
//!
//! One authoritative server and a couple of clients in a single process,
//! linked by in-memory transports. The server orbits a ring of crates; each
//! client spawns a pilot, predicts its own input and interpolates the rest.
//!
//! ```bash
//! tickwire_demo                 # default settings
//! tickwire_demo host.toml       # settings from a TOML file
//! RUST_LOG=debug tickwire_demo  # per-command and per-entity logging
//! ```

mod game;

use std::error::Error;
use std::time::Duration;

use tickwire_networking::{ConnectionManager, LoopbackTransport, Role, Transport, World};
use tickwire_shared::HostSettings;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CLIENTS: usize = 2;
const CRATES: usize = 8;
const DURATION: Duration = Duration::from_secs(10);
const FRAME: Duration = Duration::from_millis(16);
const FRAMES_PER_REPORT: u32 = 125;

type Host = ConnectionManager<LoopbackTransport>;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading settings from {}", path);
            HostSettings::load(&path)?
        }
        None => HostSettings::default(),
    };
    info!(
        "{} Hz, one packet every {} ticks, {} byte packets",
        settings.tick_frequency, settings.send_rate, settings.max_packet_size
    );

    let mut server = ConnectionManager::new(
        Role::Server,
        LoopbackTransport::new(),
        settings.clone(),
        game::world(Role::Server)?,
        game::controllers(settings.controller.clone()),
    );
    {
        let mut world = server.world().lock();
        for _ in 0..CRATES {
            world.spawn(game::CRATE)?;
        }
    }

    let mut clients = Vec::with_capacity(CLIENTS);
    for index in 0..CLIENTS {
        let client_settings = HostSettings {
            player_name: format!("pilot-{index}"),
            ..settings.clone()
        };
        let mut client = ConnectionManager::new(
            Role::Client,
            LoopbackTransport::new(),
            client_settings,
            game::world(Role::Client)?,
            game::controllers(settings.controller.clone()),
        );
        client.transport_mut().connect(server.transport_mut());
        clients.push(client);
    }

    let frames = u32::try_from(DURATION.as_millis() / FRAME.as_millis()).unwrap_or(u32::MAX);
    for frame in 1..=frames {
        server.update(FRAME);
        for client in &mut clients {
            client.update(FRAME);
        }
        if frame % FRAMES_PER_REPORT == 0 {
            report(&server, &clients);
        }
    }

    summary(&server, &clients);

    for client in &mut clients {
        client.shutdown();
    }
    server.update(FRAME);
    info!("Server closed with {} connections left", server.len());
    Ok(())
}

fn report(server: &Host, clients: &[Host]) {
    for connection in server.connections() {
        if let Some(stats) = connection.stats() {
            info!(
                "server <- {}: tick {}, acked snapshot {:?}, {} commands acked, {} repeated inputs",
                connection.remote_name().unwrap_or("?"),
                stats.local_tick,
                connection.acked_snapshot_tick(),
                stats.commands.acked,
                stats.controller.repeated_inputs
            );
        }
    }

    for client in clients {
        for connection in client.connections() {
            if let Some(stats) = connection.stats() {
                info!(
                    "client -> {}: remote tick {:?}, snapshot {:?}, {} entities, {} mispredictions",
                    connection.remote_name().unwrap_or("?"),
                    stats.remote_tick,
                    connection.last_recv_snapshot_tick(),
                    client.world().lock().states().len(),
                    stats.controller.mispredictions
                );
            }
        }
    }
}

fn summary(server: &Host, clients: &[Host]) {
    let transport = server.transport().stats();
    info!("=== Summary ===");
    info!(
        "Server: {} world ticks, {} connections, {} entities",
        server.stats().world_ticks,
        server.len(),
        server.world().lock().states().len()
    );
    info!(
        "Server transport: {} packets / {} bytes out, {} packets / {} bytes in",
        transport.packets_sent, transport.bytes_sent, transport.packets_received, transport.bytes_received
    );

    for (index, client) in clients.iter().enumerate() {
        let transport = client.transport().stats();
        let associated = client
            .connections()
            .flat_map(|connection| connection.associated())
            .collect::<Vec<_>>();
        info!(
            "Client {}: {} entities, controlling {:?}, {} bytes out, {} bytes in",
            index,
            client.world().lock().states().len(),
            associated,
            transport.bytes_sent,
            transport.bytes_received
        );
    }
}
