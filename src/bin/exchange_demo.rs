//! Simulated master driving an `owx` peripheral over an in-memory bus.
//!
//! Pushes typed values at the peripheral, triggers a custom refresh
//! command and reads the scratchpad back, printing every exchange.

use clap::Parser;
use owx::{ACK, Bus, Opcode, Peripheral, Responder, ShortRead, TypeTag};
use std::{collections::VecDeque, error::Error};

/// Custom command understood by the demo's handler: refresh the
/// scratchpad with current readings.
const REFRESH_COMMAND: u8 = 0xf0;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Integer the simulated master writes to the peripheral
    #[arg(short, long, default_value_t = 12_345)]
    int: i32,

    /// Float the simulated master writes to the peripheral
    #[arg(short, long, default_value_t = 1.5)]
    float: f32,
}

/// Half-duplex wire shared by master and peripheral: the master queues
/// request bytes at the back, the peripheral consumes from the front
/// and appends its replies behind them.
struct SimBus {
    wire: VecDeque<u8>,
}

impl SimBus {
    fn drain(&mut self) -> Vec<u8> {
        self.wire.drain(..).collect()
    }
}

impl Bus for SimBus {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(), ShortRead> {
        if self.wire.len() < buf.len() {
            return Err(ShortRead);
        }

        for slot in &mut *buf {
            *slot = self.wire.pop_front().ok_or(ShortRead)?;
        }

        Ok(())
    }

    fn send(&mut self, buf: &[u8]) {
        self.wire.extend(buf.iter().copied());
    }

    fn raise_device_error(&mut self, command: u8) {
        eprintln!("device error raised for command {command:#04x}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();

    let mut bus = SimBus {
        wire: VecDeque::new(),
    };
    let mut dev = Peripheral::new([0x28, 0x45, 0x01, 0x00, 0x00, 0x00, 0x19]);

    dev.set_command_handler(|command: u8, responder: &mut Responder<'_>| {
        if command == REFRESH_COMMAND {
            responder.scratchpad().write(0, 0x2a_u8);
            responder.scratchpad().write(1, 40_000_u16);
            responder.scratchpad().write(3, 2.75_f32);

            return true;
        }

        false
    });

    println!("Peripheral ROM: {:02x?}", dev.rom());

    // The master writes an int32, then a float32. Reusing the frame
    // writer on the master side produces exactly the bytes a real
    // master would put on the wire.
    owx::send_frame(&mut bus, TypeTag::Int32 as u8, &args.int.to_le_bytes())?;
    dev.poll(&mut bus);

    println!(
        "int32 push:      device now holds {:?}, acknowledged: {}",
        dev.take_value(),
        bus.drain() == [ACK]
    );

    owx::send_frame(&mut bus, TypeTag::Float32 as u8, &args.float.to_le_bytes())?;
    dev.poll(&mut bus);

    println!(
        "float32 push:    device now holds {:?}, acknowledged: {}",
        dev.take_value(),
        bus.drain() == [ACK]
    );

    // Out-of-band refresh command: one raw byte, no frame around it.
    bus.wire
        .extend([Opcode::HandlerCommand as u8, REFRESH_COMMAND]);
    dev.poll(&mut bus);

    println!(
        "refresh command: acknowledged: {}",
        bus.drain() == [ACK]
    );

    // Bulk scratchpad read returns whatever the handler put there.
    bus.wire.extend([Opcode::ReadScratchpad as u8]);
    dev.poll(&mut bus);

    println!("scratchpad read: {:02x?}", bus.drain());

    Ok(())
}
