// SPDX-License-Identifier: BSD-3-Clause

//! A one-shot Modbus TCP client: connects, submits a single request driven
//! by [`modbus_core::client::Client`], and prints the response.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use modbus_core::client::{Client, LinkFraming, Priority};
use modbus_core::config::Config;
use modbus_core::diag::{Diagnostics, NullSink};
use modbus_core::framing::tcp::TcpFraming;
use modbus_core::pdu::{fc, registers};
use modbus_core::pool::Pool;
use modbus_core::spsc::SpscQueue;
use modbus_core::status::Status;

use modbus_posix_host::{TcpTransport, DEFAULT_TCP_PORT};

#[derive(Parser)]
#[command(about = "One-shot Modbus TCP client backed by modbus-core")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    port: u16,

    #[arg(long, default_value_t = 1)]
    unit_id: u8,

    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    #[command(subcommand)]
    op: Op,
}

#[derive(Subcommand)]
enum Op {
    /// FC03: read holding registers.
    ReadHolding { address: u16, quantity: u16 },
    /// FC06: write a single holding register.
    WriteSingle { address: u16, value: u16 },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port))?;
    let transport = TcpTransport::new(stream)?;

    let mut slots: [Option<modbus_core::client::Transaction>; 4] = [(); 4].map(|_| None);
    let mut free_next = [0usize; 4];
    let pool = Pool::new(&mut slots, &mut free_next).unwrap();
    let mut high_storage: [Option<usize>; 4] = [None; 4];
    let mut normal_storage: [Option<usize>; 4] = [None; 4];
    let high_queue = SpscQueue::new(&mut high_storage).unwrap();
    let normal_queue = SpscQueue::new(&mut normal_storage).unwrap();
    let mut rx_storage = [0u8; 512];
    let framing = LinkFraming::Tcp(TcpFraming::new(&mut rx_storage).unwrap());

    let mut fc_hist = [0u64; modbus_core::diag::FC_SLOT_COUNT];
    let mut err_hist = [0u64; modbus_core::ErrorKind::SLOT_COUNT];
    let mut exc_hist = [0u64; modbus_core::ExceptionCode::SLOT_COUNT];
    let mut trace_ring: [Option<modbus_core::diag::TraceEvent>; 16] = [None; 16];
    let diag = Diagnostics::<NullSink>::new(&mut fc_hist, &mut err_hist, &mut exc_hist, &mut trace_ring);

    let mut client = Client::new(Config::full(), transport, pool, high_queue, normal_queue, framing, diag);

    let mut req = [0u8; 260];
    let req_len = match args.op {
        Op::ReadHolding { address, quantity } => {
            registers::build_read_request(&mut req, fc::READ_HOLDING_REGISTERS, address, quantity)?
        }
        Op::WriteSingle { address, value } => registers::build_write_single_request(&mut req, address, value)?,
    };

    let start = Instant::now();
    let now_ms = |start: Instant| start.elapsed().as_millis() as u64;
    let handle = client.submit(args.unit_id, &req[..req_len], Priority::Normal, now_ms(start))?;

    let mut out = [0u8; 260];
    loop {
        client.poll(now_ms(start))?;
        if let Some((status, len)) = client.take_response(handle, &mut out)? {
            print_result(&args.op, status, &out[..len]);
            return Ok(());
        }
        if now_ms(start) > args.timeout_ms {
            return Err("timed out waiting for a response".into());
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn print_result(op: &Op, status: Status, pdu: &[u8]) {
    match status {
        Status::Ok => match op {
            Op::ReadHolding { .. } => match registers::parse_read_response(pdu, fc::READ_HOLDING_REGISTERS) {
                Ok(view) => {
                    let values: Vec<u16> = (0..view.count()).filter_map(|i| view.get(i)).collect();
                    println!("ok: {values:?}");
                }
                Err(e) => println!("malformed response: {e:?}"),
            },
            Op::WriteSingle { .. } => println!("ok"),
        },
        Status::Exception(code) => println!("exception: {code:?}"),
        Status::Error(kind) => println!("error: {kind:?}"),
    }
}
