// SPDX-License-Identifier: BSD-3-Clause

//! A Modbus TCP server exposing a fixed holding-register table, driven by
//! [`modbus_core::server::Server`] over one connection at a time.

use std::net::TcpListener;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;

use modbus_core::client::LinkFraming;
use modbus_core::config::Config;
use modbus_core::diag::{Diagnostics, NullSink};
use modbus_core::framing::tcp::TcpFraming;
use modbus_core::pool::Pool;
use modbus_core::server::{CoilRegion, PendingRequest, RegisterRegion, Server};
use modbus_core::spsc::SpscQueue;

use modbus_posix_host::{TcpTransport, DEFAULT_TCP_PORT};

const HOLDING_COUNT: usize = 64;
const POOL_DEPTH: usize = 8;
const QUEUE_DEPTH: usize = 8;

#[derive(Parser)]
#[command(about = "Modbus TCP server backed by modbus-core")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    port: u16,

    #[arg(long, default_value_t = 1)]
    unit_id: u8,
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let listener = TcpListener::bind((args.bind.as_str(), args.port))?;
    log::info!("modbus server listening on {}:{}", args.bind, args.port);

    loop {
        let (stream, peer) = listener.accept()?;
        log::info!("accepted connection from {peer}");
        if let Err(e) = serve_one(stream, args.unit_id) {
            log::warn!("connection from {peer} ended: {e}");
        }
    }
}

fn serve_one(stream: std::net::TcpStream, unit_id: u8) -> std::io::Result<()> {
    let transport = TcpTransport::new(stream)?;

    let mut holding = [0u16; HOLDING_COUNT];
    let mut holding_regions = [RegisterRegion::direct(0, false, &mut holding)];
    let mut coil_regions: [CoilRegion; 0] = [];
    let mut discrete_regions: [CoilRegion; 0] = [];
    let mut input_regions: [RegisterRegion; 0] = [];

    let mut slots: [Option<PendingRequest>; POOL_DEPTH] = [(); POOL_DEPTH].map(|_| None);
    let mut free_next = [0usize; POOL_DEPTH];
    let pool = Pool::new(&mut slots, &mut free_next).unwrap();
    let mut high_storage: [Option<usize>; QUEUE_DEPTH] = [None; QUEUE_DEPTH];
    let mut normal_storage: [Option<usize>; QUEUE_DEPTH] = [None; QUEUE_DEPTH];
    let high_queue = SpscQueue::new(&mut high_storage).unwrap();
    let normal_queue = SpscQueue::new(&mut normal_storage).unwrap();
    let mut rx_storage = [0u8; 512];
    let framing = LinkFraming::Tcp(TcpFraming::new(&mut rx_storage).unwrap());

    let mut fc_hist = [0u64; modbus_core::diag::FC_SLOT_COUNT];
    let mut err_hist = [0u64; modbus_core::ErrorKind::SLOT_COUNT];
    let mut exc_hist = [0u64; modbus_core::ExceptionCode::SLOT_COUNT];
    let mut trace_ring: [Option<modbus_core::diag::TraceEvent>; 32] = [None; 32];
    let diag = Diagnostics::<NullSink>::new(&mut fc_hist, &mut err_hist, &mut exc_hist, &mut trace_ring);

    let mut server = Server::new(
        Config::full(),
        transport,
        unit_id,
        &mut coil_regions,
        &mut discrete_regions,
        &mut holding_regions,
        &mut input_regions,
        pool,
        high_queue,
        normal_queue,
        framing,
        diag,
    );

    let start = std::time::Instant::now();
    loop {
        let now_ms = start.elapsed().as_millis() as u64;
        if let Err(e) = server.poll(now_ms) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, format!("{e:?}")));
        }
        sleep(Duration::from_millis(1));
    }
}
